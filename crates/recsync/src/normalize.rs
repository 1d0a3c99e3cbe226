//! Normalization applied to every proposed collection before it is
//! committed locally.

use std::collections::HashMap;

use crate::types::{generate_id, now_rfc3339, ProfileScope, Record};

/// Applies domain invariants to a proposed collection. Hosts can plug in
/// their own rules (pricing recalculation, validation) by implementing this.
pub trait Normalizer: Send + Sync {
    fn normalize(&self, records: Vec<Record>, profile: &ProfileScope) -> Vec<Record>;
}

/// Canonicalizes scoped identifiers:
/// - ids are trimmed; records without one get a fresh id
/// - records without an owner are assigned to the active profile
/// - a missing creation timestamp is stamped with the current time
/// - envelope keys (`id`, `profile_id`, `created_at`) are stripped from the
///   business fields
/// - duplicate ids collapse to the last occurrence, at the first position
#[derive(Debug, Clone, Copy, Default)]
pub struct CanonicalIds;

impl Normalizer for CanonicalIds {
    fn normalize(&self, records: Vec<Record>, profile: &ProfileScope) -> Vec<Record> {
        let mut out: Vec<Record> = Vec::with_capacity(records.len());
        let mut seen: HashMap<String, usize> = HashMap::new();

        for mut record in records {
            let trimmed = record.id.trim().to_string();
            record.id = if trimmed.is_empty() {
                generate_id()
            } else {
                trimmed
            };
            if record.profile_id.trim().is_empty() {
                record.profile_id = profile.as_str().to_string();
            }
            if record.created_at.is_empty() {
                record.created_at = now_rfc3339();
            }
            for key in ["id", "profile_id", "created_at"] {
                record.fields.remove(key);
            }

            match seen.get(&record.id) {
                Some(&pos) => out[pos] = record,
                None => {
                    seen.insert(record.id.clone(), out.len());
                    out.push(record);
                }
            }
        }

        out
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
