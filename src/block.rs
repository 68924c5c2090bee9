//! Slot I/O over a single block file.
//!
//! A block file holds exactly `capacity` newline-terminated slots. An
//! occupied slot is one serialized record on one line; a free slot is
//! an empty line. The file is small by design, so every operation
//! reads it whole, mutates the line vector by index, and rewrites it
//! atomically. Whole-file rewrite keeps a torn write from ever being
//! observable under the single-writer model.

use std::fs;
use std::path::Path;

use log::info;

use crate::errors::{CeresError, Result};
use crate::os;
use crate::record::{ID_FIELD, Record};

// An inclusive [lo, hi] run of slot indexes.
pub(crate) type SlotRange = (usize, usize);

// Slot indexes covered by the ranges, in file order. Indexes past the
// file capacity are skipped.
fn covered(ranges: &[SlotRange], capacity: usize) -> Vec<usize> {
    let mut slots = Vec::new();
    for &(lo, hi) in ranges {
        for slot in lo..=hi.min(capacity.saturating_sub(1)) {
            slots.push(slot);
        }
    }
    slots
}

// Reads the file into exactly `capacity` slot lines, padding a short
// file with free slots.
fn load_lines(path: &Path, capacity: usize) -> Result<Vec<String>> {
    let text = fs::read_to_string(path).map_err(|e| CeresError::at_path(path, e))?;
    let mut lines: Vec<String> = text.split('\n').map(str::to_owned).collect();
    lines.resize(capacity, String::new());
    Ok(lines)
}

fn store_lines(path: &Path, lines: &[String]) -> Result<()> {
    let mut contents = lines.join("\n");
    contents.push('\n');
    os::write_atomic(path, &contents)
}

// Creates a fresh block file of `capacity` free slots.
pub(crate) fn create(path: &Path, capacity: usize) -> Result<()> {
    store_lines(path, &vec![String::new(); capacity])?;
    info!("created block file {}", path.display());
    Ok(())
}

// readSlots returns the records occupying the covered slots, in file
// order. Free slots are skipped. An occupied slot that does not parse
// as a record object fails the whole read.
pub(crate) fn read_slots(
    path: &Path,
    ranges: &[SlotRange],
    capacity: usize,
) -> Result<Vec<Record>> {
    let lines = load_lines(path, capacity)?;

    let mut records = Vec::new();
    for slot in covered(ranges, capacity) {
        let line = &lines[slot];
        if line.is_empty() {
            continue;
        }
        let record: Record = serde_json::from_str(line).map_err(|e| {
            CeresError::Parse(format!("{} slot {}: {}", path.display(), slot, e))
        })?;
        records.push(record);
    }
    Ok(records)
}

// writeSlots places records[k] into the k-th covered slot, stopping
// when the records run out. Each record is stamped with the `.id` its
// slot dictates before serialization, so a slot's line always names
// its own position. All records serialize before any byte lands on
// disk.
pub(crate) fn write_slots(
    path: &Path,
    ranges: &[SlotRange],
    records: &[Record],
    capacity: usize,
) -> Result<()> {
    let prefix = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| CeresError::Path(path.to_path_buf()))?;

    let slots = covered(ranges, capacity);
    let mut encoded: Vec<(usize, String)> = Vec::with_capacity(records.len());
    for (&slot, record) in slots.iter().zip(records) {
        let mut record = record.clone();
        record.insert(
            ID_FIELD.to_string(),
            serde_json::Value::String(format!("{prefix}.{slot}")),
        );
        let line = serde_json::to_string(&record)
            .map_err(|e| CeresError::Serialization(e.to_string()))?;
        encoded.push((slot, line));
    }

    let mut lines = load_lines(path, capacity)?;
    for (slot, line) in encoded {
        lines[slot] = line;
    }
    store_lines(path, &lines)
}

// deleteSlots frees every covered slot.
pub(crate) fn delete_slots(path: &Path, ranges: &[SlotRange], capacity: usize) -> Result<()> {
    let mut lines = load_lines(path, capacity)?;
    for slot in covered(ranges, capacity) {
        lines[slot].clear();
    }
    store_lines(path, &lines)
}

// Slot indexes currently holding a record.
pub(crate) fn occupied_slots(path: &Path, capacity: usize) -> Result<Vec<usize>> {
    let lines = load_lines(path, capacity)?;
    Ok((0..capacity).filter(|&slot| !lines[slot].is_empty()).collect())
}
