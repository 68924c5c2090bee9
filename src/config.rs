//! Process configuration.
//!
//! Only two settings are material to the collection manager: the
//! directory all databases live under, and the fixed slot capacity
//! of a block file. The config file is JSON and its path comes from
//! the `CERES_CONFIG` environment variable.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::errors::{CeresError, Result};

// Environment variable naming the config file path.
pub const CONFIG_ENV: &str = "CERES_CONFIG";

// Default number of slots per block file.
pub const DEFAULT_BLOCK_CAPACITY: usize = 32;

// File names of the persisted registries under the data root. Dot
// prefixes keep them out of the database namespace.
pub(crate) const FREESPACE_FILE: &str = ".freespace.json";
pub(crate) const SCHEMA_FILE: &str = ".schema.json";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Directory holding one subdirectory per database.
    pub data_dir: PathBuf,

    /// Number of slots in every block file. Fixed for the lifetime
    /// of the data directory.
    #[serde(default = "default_block_capacity")]
    pub block_capacity: usize,
}

fn default_block_capacity() -> usize {
    DEFAULT_BLOCK_CAPACITY
}

impl Config {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            block_capacity: DEFAULT_BLOCK_CAPACITY,
        }
    }

    // ReadConfigFile resolves the config path from the environment
    // and loads it.
    pub fn from_env() -> Result<Self> {
        let path = env::var(CONFIG_ENV)
            .map_err(|_| CeresError::Config(format!("{CONFIG_ENV} is not set")))?;
        Self::read_file(Path::new(&path))
    }

    pub fn read_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| {
            CeresError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config: Config = serde_json::from_str(&text).map_err(|e| {
            CeresError::Config(format!("cannot parse {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.block_capacity == 0 {
            return Err(CeresError::Config(
                "block_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    #[inline]
    pub(crate) fn database_dir(&self, database: &str) -> PathBuf {
        self.data_dir.join(database)
    }

    #[inline]
    pub(crate) fn collection_dir(&self, database: &str, collection: &str) -> PathBuf {
        self.data_dir.join(database).join(collection)
    }

    #[inline]
    pub(crate) fn block_path(&self, database: &str, collection: &str, prefix: &str) -> PathBuf {
        self.collection_dir(database, collection).join(prefix)
    }

    #[inline]
    pub(crate) fn freespace_path(&self) -> PathBuf {
        self.data_dir.join(FREESPACE_FILE)
    }

    #[inline]
    pub(crate) fn schema_path(&self) -> PathBuf {
        self.data_dir.join(SCHEMA_FILE)
    }
}
