//! Exact and fuzzy label resolution
//!
//! Resolution order per canonical field: learned variants against the
//! normalized lookup index first (cheap, deterministic), token-overlap
//! similarity against the field's name and description second.
//!
//! Tie-break rule: candidates are scanned in extraction order and only a
//! strictly greater score replaces the current best, so the earliest
//! extracted field wins ties.

use crate::RealFieldRecord;
use convoca_registry::{normalize, similarity, CanonicalField};
use std::collections::HashMap;

/// Lookup from `normalize(label)` to the index of the first extracted field
/// carrying that label. Built once per comparison run.
pub struct LabelIndex {
    by_normalized: HashMap<String, usize>,
}

impl LabelIndex {
    pub fn build(fields: &[RealFieldRecord]) -> Self {
        let mut by_normalized = HashMap::new();
        for (idx, field) in fields.iter().enumerate() {
            by_normalized.entry(normalize(&field.label)).or_insert(idx);
        }
        Self { by_normalized }
    }

    fn lookup<'a>(
        &self,
        fields: &'a [RealFieldRecord],
        normalized: &str,
    ) -> Option<&'a RealFieldRecord> {
        self.by_normalized.get(normalized).map(|&idx| &fields[idx])
    }
}

/// Probe a canonical field's learned variants against the index. Variant
/// order is registry insertion order; the first hit wins.
pub fn resolve_exact<'a>(
    canonical: &CanonicalField,
    index: &LabelIndex,
    fields: &'a [RealFieldRecord],
) -> Option<&'a RealFieldRecord> {
    canonical
        .learned_label_variants
        .iter()
        .find_map(|variant| index.lookup(fields, &normalize(variant)))
}

/// Best-scoring real field for a canonical field's name/description, or
/// `None` when nothing reaches `threshold` (inclusive).
pub fn resolve_fuzzy<'a>(
    field_name: &str,
    description: &str,
    fields: &'a [RealFieldRecord],
    threshold: f64,
) -> Option<(&'a RealFieldRecord, f64)> {
    let mut best: Option<(&RealFieldRecord, f64)> = None;

    for candidate in fields {
        let score = similarity(&candidate.label, field_name)
            .max(similarity(&candidate.label, description));
        if best.map_or(true, |(_, b)| score > b) {
            best = Some((candidate, score));
        }
    }

    best.filter(|&(_, score)| score >= threshold)
}
