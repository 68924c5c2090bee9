//! The schema registry.
//!
//! Every collection declares its fields up front; records written to
//! it may only carry declared fields, and the query executor uses the
//! declared type to coerce filter literals. The registry is persisted
//! under the data root on each DDL change.

use std::collections::BTreeMap;
use std::fs;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::Config;
use crate::errors::{CeresError, Result};
use crate::record::{ID_FIELD, Record};

/// The type tag of a schema field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FieldType {
    Int,
    Float,
    String,
    Bool,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::Int => "INT",
            FieldType::Float => "FLOAT",
            FieldType::String => "STRING",
            FieldType::Bool => "BOOL",
        }
    }

    // Whether a record value inhabits this type. INT wants an
    // integral number, FLOAT any finite number. JSON null inhabits
    // nothing.
    pub(crate) fn admits(&self, value: &Value) -> bool {
        match self {
            FieldType::Int => value.as_i64().is_some(),
            FieldType::Float => value.is_number(),
            FieldType::String => value.is_string(),
            FieldType::Bool => value.is_boolean(),
        }
    }
}

impl FromStr for FieldType {
    type Err = CeresError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "INT" => Ok(FieldType::Int),
            "FLOAT" => Ok(FieldType::Float),
            "STRING" => Ok(FieldType::String),
            "BOOL" => Ok(FieldType::Bool),
            other => Err(CeresError::Parse(format!("unknown field type '{other}'"))),
        }
    }
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declared fields of one collection.
pub type CollectionSchema = BTreeMap<String, FieldType>;

// Persisted shape: { "db": { "col": { "field": "TYPE" } } }.
#[derive(Debug, Default)]
pub(crate) struct SchemaRegistry {
    entries: BTreeMap<String, BTreeMap<String, CollectionSchema>>,
}

impl SchemaRegistry {
    // LoadSchema reads the persisted registry. A data root without
    // one yet starts empty.
    pub(crate) fn load(config: &Config) -> Result<Self> {
        let path = config.schema_path();
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::default());
            }
            Err(e) => return Err(CeresError::at_path(&path, e)),
        };
        let entries = serde_json::from_str(&text)
            .map_err(|e| CeresError::Parse(format!("{}: {}", path.display(), e)))?;
        Ok(Self { entries })
    }

    pub(crate) fn persist(&self, config: &Config) -> Result<()> {
        let text = serde_json::to_string(&self.entries)
            .map_err(|e| CeresError::Serialization(e.to_string()))?;
        crate::os::write_atomic(&config.schema_path(), &text)
    }

    pub(crate) fn define(
        &mut self,
        database: &str,
        collection: &str,
        schema: CollectionSchema,
    ) {
        self.entries
            .entry(database.to_string())
            .or_default()
            .insert(collection.to_string(), schema);
    }

    // The declared fields of a collection. Undeclared collections
    // have no presence on disk either, hence the Path error.
    pub(crate) fn collection(
        &self,
        config: &Config,
        database: &str,
        collection: &str,
    ) -> Result<&CollectionSchema> {
        self.entries
            .get(database)
            .and_then(|d| d.get(collection))
            .ok_or_else(|| CeresError::Path(config.collection_dir(database, collection)))
    }

    // lookup resolves one field's declared type, for typed
    // comparison in the query executor.
    pub(crate) fn lookup(
        &self,
        config: &Config,
        database: &str,
        collection: &str,
        field: &str,
    ) -> Result<FieldType> {
        let schema = self.collection(config, database, collection)?;
        schema.get(field).copied().ok_or_else(|| {
            CeresError::Schema(format!(
                "field '{field}' is not declared in {database}.{collection}"
            ))
        })
    }

    // Checks a record against the declared fields: nothing
    // undeclared, nothing of the wrong type. `.id` is synthetic and
    // exempt.
    pub(crate) fn validate(
        &self,
        config: &Config,
        database: &str,
        collection: &str,
        record: &Record,
    ) -> Result<()> {
        let schema = self.collection(config, database, collection)?;
        for (field, value) in record {
            if field == ID_FIELD {
                continue;
            }
            let Some(ty) = schema.get(field) else {
                return Err(CeresError::Schema(format!(
                    "field '{field}' is not declared in {database}.{collection}"
                )));
            };
            if !ty.admits(value) {
                return Err(CeresError::Schema(format!(
                    "field '{field}' expects {ty}, got {value}"
                )));
            }
        }
        Ok(())
    }

    pub(crate) fn drop_collection(&mut self, database: &str, collection: &str) {
        if let Some(collections) = self.entries.get_mut(database) {
            collections.remove(collection);
        }
    }

    pub(crate) fn drop_database(&mut self, database: &str) {
        self.entries.remove(database);
    }
}
