//! Comparison orchestrator (read-only reporting path)
//!
//! For every active+fundamental canonical field, decides found/missing via
//! the exact resolver with fuzzy fallback, then aggregates global and
//! per-category coverage. Never mutates the registry; safe to run
//! concurrently with other comparisons.

use crate::extraction::extract_real_fields;
use crate::matching::{resolve_exact, resolve_fuzzy, LabelIndex};
use crate::{ExecutionRecord, ReconcileConfig};
use convoca_registry::CanonicalRegistry;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ============================================================================
// Report Types
// ============================================================================

/// Global coverage numbers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoverageStats {
    pub total_fundamentals: usize,
    pub found: usize,
    pub missing: usize,
    pub coverage_percent: u32,
}

/// Coverage numbers for one category.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryStats {
    pub total: usize,
    pub found: usize,
    pub missing: usize,
    pub percent: u32,
}

/// A fundamental field the execution record did not account for.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MissingField {
    pub category: String,
    pub field_name: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_number: Option<String>,
}

/// A fundamental field matched to an observed label.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FoundField {
    pub category: String,
    pub field_name: String,
    pub matched_label: String,
    pub completed: bool,
}

/// Full output of a comparison run. Field ordering follows registry
/// iteration order; formatting is the consumer's concern.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparisonReport {
    pub stats: CoverageStats,
    pub by_category: BTreeMap<String, CategoryStats>,
    pub missing_fields: Vec<MissingField>,
    pub found_fields: Vec<FoundField>,
}

fn percent(found: usize, total: usize) -> u32 {
    if total == 0 {
        return 0;
    }
    (found as f64 / total as f64 * 100.0).round() as u32
}

// ============================================================================
// Orchestrator
// ============================================================================

/// Compare an execution record against the canonical registry.
pub fn compare(
    registry: &CanonicalRegistry,
    record: &ExecutionRecord,
    config: &ReconcileConfig,
) -> ComparisonReport {
    let real_fields = extract_real_fields(record);
    let index = LabelIndex::build(&real_fields);

    let mut stats = CoverageStats::default();
    let mut by_category: BTreeMap<String, CategoryStats> = BTreeMap::new();
    let mut missing_fields = Vec::new();
    let mut found_fields = Vec::new();

    for fundamental in registry.fundamental_fields() {
        stats.total_fundamentals += 1;
        let category_stats = by_category.entry(fundamental.category.to_string()).or_default();
        category_stats.total += 1;

        let matched = resolve_exact(fundamental.field, &index, &real_fields).or_else(|| {
            resolve_fuzzy(
                fundamental.name,
                &fundamental.field.description,
                &real_fields,
                config.fuzzy_threshold,
            )
            .map(|(record, _)| record)
        });

        match matched {
            Some(real) => {
                stats.found += 1;
                category_stats.found += 1;
                found_fields.push(FoundField {
                    category: fundamental.category.to_string(),
                    field_name: fundamental.name.to_string(),
                    matched_label: real.label.clone(),
                    completed: real.completed,
                });
            }
            None => {
                stats.missing += 1;
                category_stats.missing += 1;
                missing_fields.push(MissingField {
                    category: fundamental.category.to_string(),
                    field_name: fundamental.name.to_string(),
                    description: fundamental.field.description.clone(),
                    reference_number: fundamental.field.reference_number.clone(),
                });
            }
        }
    }

    stats.coverage_percent = percent(stats.found, stats.total_fundamentals);
    for category_stats in by_category.values_mut() {
        category_stats.percent = percent(category_stats.found, category_stats.total);
    }

    tracing::debug!(
        total = stats.total_fundamentals,
        found = stats.found,
        coverage = stats.coverage_percent,
        "comparison finished"
    );

    ComparisonReport {
        stats,
        by_category,
        missing_fields,
        found_fields,
    }
}
