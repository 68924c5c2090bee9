//! Records and record ids.
//!
//! A record is a flat JSON object. Every persisted record carries the
//! synthetic `.id` field whose value is `<prefix>.<slot>`: the name of
//! the block file it lives in and the slot index inside that file.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde_json::Value;

use crate::errors::{CeresError, Result};

/// Field holding a record's id. Assigned on write, never supplied.
pub const ID_FIELD: &str = ".id";

/// A schema-typed record: field name to scalar value.
pub type Record = serde_json::Map<String, Value>;

// A decomposed record id. Ordering follows (prefix, slot), which is
// the on-disk order of the record.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct RecordId {
    pub(crate) prefix: String,
    pub(crate) slot: usize,
}

impl RecordId {
    pub(crate) fn new(prefix: impl Into<String>, slot: usize) -> Self {
        Self { prefix: prefix.into(), slot }
    }

    // Splits `<prefix>.<slot>` on the last dot. Prefixes are plain
    // alphanumeric tokens, so the last dot is the only one.
    pub(crate) fn parse(id: &str) -> Result<Self> {
        let (prefix, slot) = id
            .rsplit_once('.')
            .ok_or_else(|| CeresError::Parse(format!("malformed record id '{id}'")))?;
        if prefix.is_empty() {
            return Err(CeresError::Parse(format!("malformed record id '{id}'")));
        }
        let slot = slot
            .parse::<usize>()
            .map_err(|_| CeresError::Parse(format!("malformed record id '{id}'")))?;
        Ok(Self::new(prefix, slot))
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.prefix, self.slot)
    }
}

// Returns the id a record carries, if any.
pub(crate) fn id_of(record: &Record) -> Option<&str> {
    record.get(ID_FIELD).and_then(Value::as_str)
}

// Groups ids by block-file prefix. Duplicates collapse and slots come
// out sorted, so iteration visits records in on-disk order.
pub(crate) fn group_by_prefix(ids: &[String]) -> Result<BTreeMap<String, BTreeSet<usize>>> {
    let mut groups: BTreeMap<String, BTreeSet<usize>> = BTreeMap::new();
    for id in ids {
        let id = RecordId::parse(id)?;
        groups.entry(id.prefix).or_default().insert(id.slot);
    }
    Ok(groups)
}

// Collapses a sorted slot set into maximal inclusive [lo, hi] runs,
// so slot I/O touches each covered stretch once.
pub(crate) fn collapse_ranges(slots: &BTreeSet<usize>) -> Vec<(usize, usize)> {
    let mut ranges: Vec<(usize, usize)> = Vec::new();
    for &slot in slots {
        match ranges.last_mut() {
            Some((_, hi)) if *hi + 1 == slot => *hi = slot,
            _ => ranges.push((slot, slot)),
        }
    }
    ranges
}
