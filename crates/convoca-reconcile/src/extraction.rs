//! Label extraction from an execution record
//!
//! The automation component reports the same field on several wizard steps
//! when the form repeats a summary panel, so observations are deduplicated
//! by first-seen label. Discovery order is preserved: it is the only order
//! the engine guarantees stable, and the fuzzy resolver's tie-break
//! depends on it.

use crate::{ExecutionRecord, RealFieldRecord};
use std::collections::HashSet;

/// Deduplicate real field observations across all completed steps,
/// preserving first-seen order.
pub fn extract_real_fields(record: &ExecutionRecord) -> Vec<RealFieldRecord> {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut fields = Vec::new();

    for step in &record.completed_steps {
        for detail in &step.field_details {
            if seen.insert(detail.label.as_str()) {
                fields.push(detail.clone());
            }
        }
    }

    fields
}
