//! Collection CRUD.
//!
//! The executor sees a collection as an id-addressable record store.
//! Ids are grouped by block file and collapsed to minimal slot
//! ranges, so each operation makes exactly one mutating slot-I/O pass
//! per affected file. Mutations validate every target before touching
//! any file; a failed validation leaves storage as it was.

use std::collections::{BTreeMap, BTreeSet};

use log::warn;

use crate::block;
use crate::config::Config;
use crate::errors::{CeresError, Result};
use crate::freelist::FreeList;
use crate::record::{self, ID_FIELD, Record, RecordId};
use crate::schema::SchemaRegistry;

// Every targeted slot must currently hold a record. Mutations aimed
// at a free slot or an unknown block file report the offending id.
fn verify_occupied(
    config: &Config,
    database: &str,
    collection: &str,
    prefix: &str,
    slots: &BTreeSet<usize>,
) -> Result<()> {
    let path = config.block_path(database, collection, prefix);
    if !path.is_file() {
        let first = slots.iter().next().copied().unwrap_or(0);
        return Err(CeresError::NotFound(format!("{prefix}.{first}")));
    }
    let occupied: BTreeSet<usize> = block::occupied_slots(&path, config.block_capacity)?
        .into_iter()
        .collect();
    for &slot in slots {
        if !occupied.contains(&slot) {
            return Err(CeresError::NotFound(format!("{prefix}.{slot}")));
        }
    }
    Ok(())
}

// Read returns the records behind `ids` in on-disk order: block files
// alphabetically, slots ascending within a file. Duplicate ids
// collapse to one result.
pub(crate) fn read(
    config: &Config,
    database: &str,
    collection: &str,
    ids: &[String],
) -> Result<Vec<Record>> {
    let groups = record::group_by_prefix(ids)?;

    let mut records = Vec::new();
    for (prefix, slots) in &groups {
        let path = config.block_path(database, collection, prefix);
        let ranges = record::collapse_ranges(slots);
        records.extend(block::read_slots(&path, &ranges, config.block_capacity)?);
    }
    Ok(records)
}

// Write allocates one slot per record, stamps the assigned ids, and
// lands each record in its slot with one pass per affected block
// file. Returns the assigned ids in record order. Schema validation
// happens before allocation; any failure after allocation releases
// the allocated slots again.
pub(crate) fn write(
    config: &Config,
    freelist: &mut FreeList,
    registry: &SchemaRegistry,
    database: &str,
    collection: &str,
    records: &[Record],
) -> Result<Vec<String>> {
    registry.collection(config, database, collection)?;
    for record in records {
        registry.validate(config, database, collection, record)?;
    }

    let ids = freelist.allocate(config, database, collection, records.len())?;
    if let Err(err) = write_allocated(config, database, collection, &ids, records) {
        freelist.release(database, collection, &ids);
        if let Err(persist_err) = freelist.persist(config) {
            warn!("free-space map persist failed during rollback: {persist_err}");
        }
        return Err(err);
    }
    freelist.persist(config)?;

    Ok(ids.iter().map(RecordId::to_string).collect())
}

fn write_allocated(
    config: &Config,
    database: &str,
    collection: &str,
    ids: &[RecordId],
    records: &[Record],
) -> Result<()> {
    // prefix -> (slot, index into records), slots ascending.
    let mut groups: BTreeMap<&str, Vec<(usize, usize)>> = BTreeMap::new();
    for (k, id) in ids.iter().enumerate() {
        groups.entry(id.prefix.as_str()).or_default().push((id.slot, k));
    }

    for (prefix, mut targets) in groups {
        targets.sort_unstable();
        let slots: BTreeSet<usize> = targets.iter().map(|&(slot, _)| slot).collect();
        let ordered: Vec<Record> = targets
            .iter()
            .map(|&(_, k)| records[k].clone())
            .collect();

        let path = config.block_path(database, collection, prefix);
        let ranges = record::collapse_ranges(&slots);
        block::write_slots(&path, &ranges, &ordered, config.block_capacity)?;
    }
    Ok(())
}

// Patch shallow-merges one patch object over each targeted record:
// patched fields win, everything else including `.id` is preserved.
pub(crate) fn patch(
    config: &Config,
    registry: &SchemaRegistry,
    database: &str,
    collection: &str,
    ids: &[String],
    patch: &Record,
) -> Result<()> {
    registry.validate(config, database, collection, patch)?;
    let groups = record::group_by_prefix(ids)?;
    for (prefix, slots) in &groups {
        verify_occupied(config, database, collection, prefix, slots)?;
    }

    for (prefix, slots) in &groups {
        let path = config.block_path(database, collection, prefix);
        let ranges = record::collapse_ranges(slots);
        let mut records = block::read_slots(&path, &ranges, config.block_capacity)?;
        for record in &mut records {
            for (field, value) in patch {
                if field != ID_FIELD {
                    record.insert(field.clone(), value.clone());
                }
            }
        }
        block::write_slots(&path, &ranges, &records, config.block_capacity)?;
    }
    Ok(())
}

// OverWrite replaces each targeted record wholesale. Every record
// must carry the `.id` of an occupied slot.
pub(crate) fn overwrite(
    config: &Config,
    registry: &SchemaRegistry,
    database: &str,
    collection: &str,
    records: &[Record],
) -> Result<()> {
    // prefix -> slot -> record; a later duplicate id wins.
    let mut groups: BTreeMap<String, BTreeMap<usize, &Record>> = BTreeMap::new();
    for record in records {
        let id = record::id_of(record).ok_or_else(|| {
            CeresError::Schema(format!("record is missing '{ID_FIELD}'"))
        })?;
        let id = RecordId::parse(id)?;
        registry.validate(config, database, collection, record)?;
        groups.entry(id.prefix).or_default().insert(id.slot, record);
    }

    for (prefix, targets) in &groups {
        let slots: BTreeSet<usize> = targets.keys().copied().collect();
        verify_occupied(config, database, collection, prefix, &slots)?;
    }

    for (prefix, targets) in &groups {
        let slots: BTreeSet<usize> = targets.keys().copied().collect();
        let ordered: Vec<Record> = targets.values().map(|&r| r.clone()).collect();

        let path = config.block_path(database, collection, prefix);
        let ranges = record::collapse_ranges(&slots);
        block::write_slots(&path, &ranges, &ordered, config.block_capacity)?;
    }
    Ok(())
}

// Delete clears the targeted slots and returns them to the free-space
// map.
pub(crate) fn delete(
    config: &Config,
    freelist: &mut FreeList,
    database: &str,
    collection: &str,
    ids: &[String],
) -> Result<()> {
    let groups = record::group_by_prefix(ids)?;
    for (prefix, slots) in &groups {
        verify_occupied(config, database, collection, prefix, slots)?;
    }

    let mut released = Vec::new();
    for (prefix, slots) in &groups {
        let path = config.block_path(database, collection, prefix);
        let ranges = record::collapse_ranges(slots);
        block::delete_slots(&path, &ranges, config.block_capacity)?;
        released.extend(slots.iter().map(|&slot| RecordId::new(prefix.clone(), slot)));
    }
    freelist.release(database, collection, &released);
    freelist.persist(config)
}
