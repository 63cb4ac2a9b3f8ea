//! AI batch mapper (learning path)
//!
//! Partitions the extracted real fields into fixed-size batches and asks
//! the completion service to classify each batch against the fundamental
//! field catalog. Batches are issued strictly one at a time: batch *i+1*
//! never starts before batch *i* is fully applied, which keeps the
//! confirmation policy coherent and bounds outstanding cost against the
//! service.
//!
//! Failure isolation per batch:
//! - the response carries no recognizable JSON → every record in the batch
//!   is re-mapped through the fuzzy resolver;
//! - the service call itself fails → every record gets a zero-confidence
//!   unmapped entry, no fuzzy attempt. The asymmetry distinguishes
//!   "service unusable" from "service responded but malformed".

use crate::{
    CanonicalFieldRef, CompletionService, FieldMapping, LlmError, RealFieldRecord, ReconcileConfig,
};
use convoca_registry::{similarity, CanonicalRegistry, FundamentalField};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

// ============================================================================
// Outcome Types
// ============================================================================

/// Why a batch fell off the AI path.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum DegradationReason {
    ServiceFailure(String),
    ParseFailure(String),
}

/// One degraded batch, reported in the update summary.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchDegradation {
    pub batch_index: usize,
    pub size: usize,
    pub reason: DegradationReason,
}

/// Everything the mapper produced for one run: exactly one mapping per
/// extracted real field, plus the list of degraded batches.
#[derive(Debug)]
pub struct MappingOutcome {
    pub mappings: Vec<FieldMapping>,
    pub degraded: Vec<BatchDegradation>,
}

// ============================================================================
// Wire Format
// ============================================================================

/// One item of the JSON array the service is asked to return. `index` is
/// 1-based on the wire.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireMapping {
    index: usize,
    #[serde(default)]
    #[allow(dead_code)]
    label: String,
    #[serde(default)]
    canonical_field_name: Option<String>,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    confidence: f64,
    #[serde(default)]
    rationale: Option<String>,
}

/// Pull the first JSON array out of a free-text response. Tolerates prose
/// and code fences around the payload.
fn parse_response(text: &str) -> Result<Vec<WireMapping>, LlmError> {
    let start = text
        .find('[')
        .ok_or_else(|| LlmError::Parse("no JSON array in response".to_string()))?;
    let end = text
        .rfind(']')
        .filter(|&end| end > start)
        .ok_or_else(|| LlmError::Parse("unterminated JSON array in response".to_string()))?;

    serde_json::from_str(&text[start..=end]).map_err(|e| LlmError::Parse(e.to_string()))
}

// ============================================================================
// Prompts
// ============================================================================

const SYSTEM_PROMPT: &str = "You classify field labels observed on a grant application form \
against a canonical field catalog. Labels may be in Spanish and vary in phrasing across \
contest editions. Respond with ONLY a JSON array, one object per observed field: \
{\"index\": <1-based input index>, \"label\": <the label>, \"canonicalFieldName\": <catalog \
name or null>, \"category\": <catalog category or null>, \"confidence\": <0.0-1.0>, \
\"rationale\": <short reason>}. Use null when no catalog field corresponds.";

fn build_user_prompt(batch: &[RealFieldRecord], catalog: &[FundamentalField<'_>]) -> String {
    let mut prompt = String::from("Observed form fields:\n");
    for (i, field) in batch.iter().enumerate() {
        let _ = writeln!(
            prompt,
            "{}. label=\"{}\" type={} required={}",
            i + 1,
            field.label,
            field.field_type,
            field.required
        );
    }

    prompt.push_str("\nCanonical catalog (category / name / description / reference):\n");
    for entry in catalog {
        let _ = writeln!(
            prompt,
            "- {} / {} / {} / {}",
            entry.category,
            entry.name,
            entry.field.description,
            entry.field.reference_number.as_deref().unwrap_or("-")
        );
    }
    prompt
}

// ============================================================================
// Fuzzy Fallback
// ============================================================================

/// Map one record to its best-scoring fundamental field, or leave it
/// unmapped below the threshold. Catalog order breaks ties (earliest
/// entry wins on equal score).
fn fuzzy_map(
    record: &RealFieldRecord,
    catalog: &[FundamentalField<'_>],
    threshold: f64,
) -> FieldMapping {
    let mut best: Option<(FundamentalField<'_>, f64)> = None;
    for entry in catalog {
        let score = similarity(&record.label, entry.name)
            .max(similarity(&record.label, &entry.field.description));
        if best.map_or(true, |(_, b)| score > b) {
            best = Some((*entry, score));
        }
    }

    match best {
        Some((entry, score)) if score >= threshold => FieldMapping {
            real_field: record.clone(),
            canonical_ref: Some(CanonicalFieldRef {
                category: entry.category.to_string(),
                field_name: entry.name.to_string(),
            }),
            confidence: score,
            rationale: Some("token-overlap fallback".to_string()),
        },
        _ => FieldMapping::unmapped(record.clone()),
    }
}

// ============================================================================
// Batch Mapper
// ============================================================================

/// Resolve a wire item's canonical reference, requiring an existing
/// active+fundamental field in an active category.
fn resolve_wire_ref(registry: &CanonicalRegistry, item: &WireMapping) -> Option<CanonicalFieldRef> {
    let category = item.category.as_deref()?;
    let name = item.canonical_field_name.as_deref()?;

    let cat = registry.categories.get(category).filter(|c| c.active)?;
    cat.fields
        .get(name)
        .filter(|f| f.active && f.is_fundamental)?;

    Some(CanonicalFieldRef {
        category: category.to_string(),
        field_name: name.to_string(),
    })
}

fn apply_wire_items(
    registry: &CanonicalRegistry,
    batch: &[RealFieldRecord],
    items: Vec<WireMapping>,
) -> Vec<FieldMapping> {
    let mut slots: Vec<Option<FieldMapping>> = vec![None; batch.len()];

    for item in items {
        // 1-based on the wire.
        let Some(i) = item.index.checked_sub(1) else {
            tracing::warn!(index = item.index, "classification item with zero index");
            continue;
        };
        if i >= batch.len() {
            tracing::warn!(index = item.index, "classification item out of batch range");
            continue;
        }
        if slots[i].is_some() {
            continue;
        }

        let canonical_ref = resolve_wire_ref(registry, &item);
        slots[i] = Some(FieldMapping {
            real_field: batch[i].clone(),
            canonical_ref,
            confidence: item.confidence.clamp(0.0, 1.0),
            rationale: item.rationale,
        });
    }

    slots
        .into_iter()
        .enumerate()
        .map(|(i, slot)| slot.unwrap_or_else(|| FieldMapping::unmapped(batch[i].clone())))
        .collect()
}

/// Classify all extracted real fields against the registry's fundamental
/// catalog, one sequential batch at a time.
pub async fn map_fields(
    service: &dyn CompletionService,
    registry: &CanonicalRegistry,
    fields: &[RealFieldRecord],
    config: &ReconcileConfig,
) -> MappingOutcome {
    let catalog = registry.fundamental_fields();
    let mut mappings = Vec::with_capacity(fields.len());
    let mut degraded = Vec::new();

    for (batch_index, batch) in fields.chunks(config.batch_size.max(1)).enumerate() {
        let user_prompt = build_user_prompt(batch, &catalog);

        match service
            .classify(SYSTEM_PROMPT, &user_prompt, config.temperature)
            .await
        {
            Ok(completion) => {
                service.record_usage(completion.usage.input_tokens, completion.usage.output_tokens);

                match parse_response(&completion.text) {
                    Ok(items) => {
                        mappings.extend(apply_wire_items(registry, batch, items));
                    }
                    Err(err) => {
                        tracing::warn!(batch = batch_index, %err, "unparseable response, using fuzzy fallback");
                        mappings.extend(
                            batch
                                .iter()
                                .map(|r| fuzzy_map(r, &catalog, config.fuzzy_threshold)),
                        );
                        degraded.push(BatchDegradation {
                            batch_index,
                            size: batch.len(),
                            reason: DegradationReason::ParseFailure(err.to_string()),
                        });
                    }
                }
            }
            Err(err) => {
                tracing::warn!(batch = batch_index, %err, "service call failed, degrading batch");
                mappings.extend(batch.iter().cloned().map(FieldMapping::unmapped));
                degraded.push(BatchDegradation {
                    batch_index,
                    size: batch.len(),
                    reason: DegradationReason::ServiceFailure(err.to_string()),
                });
            }
        }
    }

    MappingOutcome { mappings, degraded }
}
