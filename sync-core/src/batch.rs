//! In-batch conflict collapsing.
//!
//! Paginated sources can return the same record twice within one run. The
//! store merge keys on `record_id`, so duplicates are resolved here first
//! with the same last-writer-wins rule the merge applies.

use std::collections::HashMap;

use filing_sync_types::FilingRecord;

/// Rows with unique ids plus the number of copies that lost.
#[derive(Debug, Clone, PartialEq)]
pub struct Collapsed {
    /// One row per `record_id`, in order of first appearance.
    pub rows: Vec<FilingRecord>,
    /// Copies discarded in favor of another version.
    pub dropped: u64,
}

/// Collapse duplicate `record_id`s.
///
/// A later copy replaces the kept one only when it would supersede it in the
/// store. Equal timestamps keep the first copy.
pub fn collapse_duplicates(rows: Vec<FilingRecord>) -> Collapsed {
    let mut index: HashMap<String, usize> = HashMap::with_capacity(rows.len());
    let mut kept: Vec<FilingRecord> = Vec::with_capacity(rows.len());
    let mut dropped = 0;

    for row in rows {
        match index.get(&row.record_id) {
            Some(&slot) => {
                if row.supersedes(kept[slot].remote_modified_at) {
                    kept[slot] = row;
                }
                dropped += 1;
            }
            None => {
                index.insert(row.record_id.clone(), kept.len());
                kept.push(row);
            }
        }
    }

    Collapsed {
        rows: kept,
        dropped,
    }
}
