//! Merge Resolver: combine an authoritative remote snapshot with pending
//! local changes.
//!
//! Remote wins for every id that is not dirty. A local record wins when its
//! id is dirty or the remote does not know it (unconfirmed create). Remote
//! order is kept; local-only records follow in local order.
//!
//! Conflicts on a clean record resolve whole-record, last writer wins at the
//! backend. There is no field-level merge.

use std::collections::{BTreeSet, HashMap};

use crate::types::{Record, RecordId};

/// Merge `remote` with the dirty subset of `local`.
pub fn merge(remote: Vec<Record>, dirty: &BTreeSet<RecordId>, local: &[Record]) -> Vec<Record> {
    let mut merged: Vec<Record> = Vec::with_capacity(remote.len() + dirty.len());
    let mut index: HashMap<RecordId, usize> = HashMap::with_capacity(remote.len());

    for record in remote {
        match index.get(&record.id) {
            // A duplicate id in the remote read keeps its first position.
            Some(&pos) => merged[pos] = record,
            None => {
                index.insert(record.id.clone(), merged.len());
                merged.push(record);
            }
        }
    }

    let remote_len = merged.len();
    for record in local {
        match index.get(&record.id) {
            Some(&pos) if pos < remote_len => {
                if dirty.contains(&record.id) {
                    merged[pos] = record.clone();
                }
            }
            Some(&pos) => merged[pos] = record.clone(),
            None => {
                index.insert(record.id.clone(), merged.len());
                merged.push(record.clone());
            }
        }
    }

    merged
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
