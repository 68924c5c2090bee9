use std::ops::Deref;

use tempfile::TempDir;

use crate::config::Config;
use crate::db::Db;

// A Db rooted in a temp directory that lives as long as the harness.
pub(crate) struct TestDb {
    _dir: TempDir,
    db: Db,
}

impl Deref for TestDb {
    type Target = Db;

    fn deref(&self) -> &Self::Target {
        &self.db
    }
}

impl TestDb {
    pub(crate) fn new() -> crate::Result<Self> {
        Self::with_capacity(crate::config::DEFAULT_BLOCK_CAPACITY)
    }

    pub(crate) fn with_capacity(capacity: usize) -> crate::Result<Self> {
        let _ = env_logger::builder().is_test(true).try_init();

        let dir = TempDir::new()?;
        let mut config = Config::new(dir.path());
        config.block_capacity = capacity;
        let db = Db::open(config)?;

        Ok(Self { _dir: dir, db })
    }
}
