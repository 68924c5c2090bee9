//! The free-space map.
//!
//! Tracks every free slot of every collection so inserts never scan
//! block files for room. The map is persisted under the data root
//! after each mutation that changes free space, and reloaded on
//! process start. Allocation policy: alphabetically earliest block
//! file first, lowest slot first; new block files are created only
//! when the map runs dry.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;

use log::debug;
use rand::Rng;
use rand::distr::Alphanumeric;

use crate::block;
use crate::config::Config;
use crate::errors::{CeresError, Result};
use crate::record::RecordId;

// Length of a block-file id prefix.
const PREFIX_LEN: usize = 8;

// Free slots of one collection, keyed by block-file prefix.
type CollectionSlots = BTreeMap<String, BTreeSet<usize>>;

// Persisted shape: { "db": { "col": [ ["prefix", slot], ... ] } }.
type PersistedMap = BTreeMap<String, BTreeMap<String, Vec<(String, usize)>>>;

#[derive(Debug, Default)]
pub(crate) struct FreeList {
    entries: BTreeMap<String, BTreeMap<String, CollectionSlots>>,
}

fn new_prefix() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(PREFIX_LEN)
        .map(char::from)
        .collect()
}

impl FreeList {
    // LoadFreeSpace reads the persisted map. A data root without one
    // yet starts empty.
    pub(crate) fn load(config: &Config) -> Result<Self> {
        let path = config.freespace_path();
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::default());
            }
            Err(e) => return Err(CeresError::at_path(&path, e)),
        };
        let persisted: PersistedMap = serde_json::from_str(&text)
            .map_err(|e| CeresError::Parse(format!("{}: {}", path.display(), e)))?;

        let mut list = Self::default();
        for (database, collections) in persisted {
            for (collection, slots) in collections {
                let target = list
                    .entries
                    .entry(database.clone())
                    .or_default()
                    .entry(collection)
                    .or_default();
                for (prefix, slot) in slots {
                    target.entry(prefix).or_default().insert(slot);
                }
            }
        }
        Ok(list)
    }

    // Dumps the map so the next process start resumes the same
    // allocation state.
    pub(crate) fn persist(&self, config: &Config) -> Result<()> {
        let mut persisted: PersistedMap = BTreeMap::new();
        for (database, collections) in &self.entries {
            let out = persisted.entry(database.clone()).or_default();
            for (collection, slots) in collections {
                let flat: Vec<(String, usize)> = slots
                    .iter()
                    .flat_map(|(prefix, set)| {
                        set.iter().map(move |&slot| (prefix.clone(), slot))
                    })
                    .collect();
                out.insert(collection.clone(), flat);
            }
        }
        let text = serde_json::to_string(&persisted)
            .map_err(|e| CeresError::Serialization(e.to_string()))?;
        crate::os::write_atomic(&config.freespace_path(), &text)
    }

    // Hands out `n` free slots in allocation order: existing free
    // slots first (earliest file, lowest slot), then slots of block
    // files created on demand. The map is only debited once the whole
    // allocation is decided, so a failure mid-way leaves it as it
    // was.
    pub(crate) fn allocate(
        &mut self,
        config: &Config,
        database: &str,
        collection: &str,
        n: usize,
    ) -> Result<Vec<RecordId>> {
        let mut picked: Vec<RecordId> = Vec::with_capacity(n);
        if let Some(slots) = self
            .entries
            .get(database)
            .and_then(|d| d.get(collection))
        {
            'drain: for (prefix, set) in slots {
                for &slot in set {
                    if picked.len() == n {
                        break 'drain;
                    }
                    picked.push(RecordId::new(prefix.clone(), slot));
                }
            }
        }

        while picked.len() < n {
            let prefix = new_prefix();
            let path = config.block_path(database, collection, &prefix);
            if path.exists() {
                // Prefix collision, roll again.
                continue;
            }
            block::create(&path, config.block_capacity)?;
            self.enroll(database, collection, &prefix, config.block_capacity);
            for slot in 0..config.block_capacity {
                if picked.len() == n {
                    break;
                }
                picked.push(RecordId::new(prefix.clone(), slot));
            }
        }

        for id in &picked {
            self.remove(database, collection, id);
        }
        debug!(
            "allocated {} slot(s) in {}.{}",
            picked.len(),
            database,
            collection
        );
        Ok(picked)
    }

    // Returns slots to the free set. Releasing an already-free slot
    // is a no-op.
    pub(crate) fn release(&mut self, database: &str, collection: &str, ids: &[RecordId]) {
        let slots = self
            .entries
            .entry(database.to_string())
            .or_default()
            .entry(collection.to_string())
            .or_default();
        for id in ids {
            slots.entry(id.prefix.clone()).or_default().insert(id.slot);
        }
    }

    pub(crate) fn free_count(&self, database: &str, collection: &str) -> usize {
        self.entries
            .get(database)
            .and_then(|d| d.get(collection))
            .map(|slots| slots.values().map(BTreeSet::len).sum())
            .unwrap_or(0)
    }

    pub(crate) fn drop_collection(&mut self, database: &str, collection: &str) {
        if let Some(collections) = self.entries.get_mut(database) {
            collections.remove(collection);
        }
    }

    pub(crate) fn drop_database(&mut self, database: &str) {
        self.entries.remove(database);
    }

    fn enroll(&mut self, database: &str, collection: &str, prefix: &str, capacity: usize) {
        self.entries
            .entry(database.to_string())
            .or_default()
            .entry(collection.to_string())
            .or_default()
            .insert(prefix.to_string(), (0..capacity).collect());
    }

    fn remove(&mut self, database: &str, collection: &str, id: &RecordId) {
        let Some(slots) = self
            .entries
            .get_mut(database)
            .and_then(|d| d.get_mut(collection))
        else {
            return;
        };
        if let Some(set) = slots.get_mut(&id.prefix) {
            set.remove(&id.slot);
            if set.is_empty() {
                slots.remove(&id.prefix);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::path::Path;

    const CAPACITY: usize = 4;

    fn setup() -> (tempfile::TempDir, Config) {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::new(dir.path());
        config.block_capacity = CAPACITY;
        fs::create_dir_all(config.collection_dir("db1", "foo")).unwrap();
        (dir, config)
    }

    #[test]
    fn test_allocate_creates_block_files_on_demand() {
        let (_dir, config) = setup();
        let mut list = FreeList::default();

        let ids = list.allocate(&config, "db1", "foo", 6).unwrap();
        assert_eq!(ids.len(), 6);

        // Two files of four slots each, two slots left over.
        let files = crate::os::visible_entries(&config.collection_dir("db1", "foo")).unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(list.free_count("db1", "foo"), 2);

        // First file filled completely before the second was opened.
        assert_eq!(ids[0].prefix, ids[3].prefix);
        assert_eq!(ids[4].prefix, ids[5].prefix);
        assert_ne!(ids[0].prefix, ids[4].prefix);
        assert_eq!(
            ids.iter().map(|id| id.slot).collect::<Vec<_>>(),
            vec![0, 1, 2, 3, 0, 1]
        );
    }

    #[test]
    fn test_allocate_prefers_earliest_file_lowest_slot() {
        let (_dir, config) = setup();
        let mut list = FreeList::default();
        let col = config.collection_dir("db1", "foo");
        for name in ["alpha", "beta"] {
            block::create(&col.join(name), CAPACITY).unwrap();
        }
        list.release(
            "db1",
            "foo",
            &[
                RecordId::new("beta", 0),
                RecordId::new("alpha", 3),
                RecordId::new("alpha", 1),
            ],
        );

        let ids = list.allocate(&config, "db1", "foo", 3).unwrap();
        assert_eq!(
            ids,
            vec![
                RecordId::new("alpha", 1),
                RecordId::new("alpha", 3),
                RecordId::new("beta", 0),
            ]
        );
    }

    #[test]
    fn test_release_then_allocate_returns_same_slot() {
        let (_dir, config) = setup();
        let mut list = FreeList::default();

        let ids = list.allocate(&config, "db1", "foo", CAPACITY).unwrap();
        assert_eq!(list.free_count("db1", "foo"), 0);

        list.release("db1", "foo", &[ids[1].clone()]);
        let again = list.allocate(&config, "db1", "foo", 1).unwrap();
        assert_eq!(again, vec![ids[1].clone()]);
    }

    #[test]
    fn test_release_is_idempotent() {
        let (_dir, config) = setup();
        let mut list = FreeList::default();
        let ids = list.allocate(&config, "db1", "foo", 2).unwrap();

        list.release("db1", "foo", &ids[..1]);
        list.release("db1", "foo", &ids[..1]);
        assert_eq!(list.free_count("db1", "foo"), CAPACITY - 1);
    }

    #[test]
    fn test_persist_and_load_round_trip() {
        let (_dir, config) = setup();
        let mut list = FreeList::default();
        let ids = list.allocate(&config, "db1", "foo", 3).unwrap();
        list.persist(&config).unwrap();

        let mut reloaded = FreeList::load(&config).unwrap();
        assert_eq!(reloaded.free_count("db1", "foo"), CAPACITY - 3);

        // The reloaded map resumes exactly where the old one stopped.
        let next = reloaded.allocate(&config, "db1", "foo", 1).unwrap();
        assert_eq!(next[0].prefix, ids[0].prefix);
        assert_eq!(next[0].slot, 3);
    }

    #[test]
    fn test_load_without_file_is_empty() {
        let (_dir, config) = setup();
        let list = FreeList::load(&config).unwrap();
        assert_eq!(list.free_count("db1", "foo"), 0);
    }

    #[test]
    fn test_persisted_shape() {
        let (_dir, config) = setup();
        let mut list = FreeList::default();
        list.release("db1", "foo", &[RecordId::new("bar", 7)]);
        list.persist(&config).unwrap();

        let text = fs::read_to_string(config.freespace_path()).unwrap();
        assert_eq!(text, "{\"db1\":{\"foo\":[[\"bar\",7]]}}");
    }

    #[test]
    fn test_allocate_missing_collection_dir() {
        let (_dir, config) = setup();
        let mut list = FreeList::default();
        match list.allocate(&config, "db1", "nope", 1) {
            Err(CeresError::Path(p)) => {
                assert!(p.starts_with(Path::new(&config.data_dir)));
            }
            other => panic!("expected Path error, got {other:?}"),
        }
    }

    #[test]
    fn test_drop_collection() {
        let (_dir, config) = setup();
        let mut list = FreeList::default();
        list.allocate(&config, "db1", "foo", 1).unwrap();
        assert!(list.free_count("db1", "foo") > 0);

        list.drop_collection("db1", "foo");
        assert_eq!(list.free_count("db1", "foo"), 0);
    }
}
