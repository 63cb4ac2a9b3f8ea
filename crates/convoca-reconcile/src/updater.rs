//! Registry updater (learning path)
//!
//! Applies AI-confirmed mappings back into the canonical registry:
//! high-confidence labels become learned variants, very high confidence
//! additionally unlocks policy-gated metadata corrections, and confidently
//! unmapped labels may become brand-new canonical fields. At the end of a
//! run the registry metadata is recomputed and the whole document is
//! persisted atomically.
//!
//! Run state machine:
//!
//! ```text
//! idle → registry-loaded → fields-extracted → ai-mapped
//!      → updates-applied (per-mapping loop, policy may pause each step)
//!      → persisted | failed
//! ```
//!
//! Only registry load/persist errors abort the run; everything else
//! degrades in place and shows up in the [`UpdateSummary`].

use crate::extraction::extract_real_fields;
use crate::mapper::{map_fields, BatchDegradation};
use crate::policy::{CreateDecision, DecisionPolicy};
use crate::{CompletionService, ExecutionRecord, FieldMapping, ReconcileConfig};
use chrono::{DateTime, Utc};
use convoca_registry::{
    save_registry, CanonicalField, CanonicalRegistry, RegistryError,
};
use serde::Serialize;
use std::path::Path;

// ============================================================================
// Update Summary
// ============================================================================

/// User-visible outcome of one update run, reported even on partial
/// degradation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateSummary {
    pub mappings_total: usize,
    pub mappings_resolved: usize,
    pub variants_added: usize,
    pub corrections_applied: usize,
    pub fields_created: usize,
    pub validation_skipped: usize,
    pub batches_degraded: Vec<BatchDegradation>,
    pub finished_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct AppliedCounts {
    variants_added: usize,
    corrections_applied: usize,
    fields_created: usize,
    validation_skipped: usize,
}

// ============================================================================
// Symbolic Names
// ============================================================================

/// Derive a registry key from a freeform label: uppercase, with runs of
/// non-alphanumeric characters collapsed to single underscores.
///
/// `"Fecha Nacimiento"` → `"FECHA_NACIMIENTO"`; an all-punctuation label
/// derives to the empty string and is rejected by the caller.
pub fn derive_symbolic_name(label: &str) -> String {
    let mut out = String::with_capacity(label.len());
    let mut gap = false;
    for ch in label.chars() {
        if ch.is_alphanumeric() {
            if gap && !out.is_empty() {
                out.push('_');
            }
            gap = false;
            out.extend(ch.to_uppercase());
        } else {
            gap = true;
        }
    }
    out
}

// ============================================================================
// Mutation
// ============================================================================

fn apply_mappings(
    registry: &mut CanonicalRegistry,
    mappings: &[FieldMapping],
    policy: &dyn DecisionPolicy,
    config: &ReconcileConfig,
) -> AppliedCounts {
    let mut counts = AppliedCounts::default();

    for mapping in mappings {
        match &mapping.canonical_ref {
            Some(canonical_ref) => {
                let Some(field) =
                    registry.find_field_mut(&canonical_ref.category, &canonical_ref.field_name)
                else {
                    // Reference resolved at mapping time; a policy-driven
                    // deletion in between would be an external edit.
                    continue;
                };

                if mapping.confidence > config.variant_threshold
                    && field.add_label_variant(&mapping.real_field.label)
                {
                    counts.variants_added += 1;
                }

                if mapping.confidence > config.correction_threshold {
                    let differs = field.field_type != mapping.real_field.field_type
                        || field.obligatory != mapping.real_field.required;
                    if differs
                        && policy.should_apply_correction(canonical_ref, mapping.confidence)
                    {
                        field.field_type = mapping.real_field.field_type.clone();
                        field.obligatory = mapping.real_field.required;
                        counts.corrections_applied += 1;
                    }
                }
            }
            None if mapping.confidence < config.creation_threshold => {
                let label = &mapping.real_field.label;
                let category_name = match policy.should_create_field(label) {
                    CreateDecision::Skip => continue,
                    CreateDecision::InCategory(name) => name,
                    CreateDecision::InDefaultCategory => config.default_category.clone(),
                };

                let symbolic = derive_symbolic_name(label);
                if symbolic.is_empty() {
                    tracing::warn!(%label, "label derives an empty symbolic name, skipping");
                    counts.validation_skipped += 1;
                    continue;
                }

                let category = registry.ensure_category(&category_name);
                if let Some(existing) = category.fields.get_mut(&symbolic) {
                    // Already created on an earlier run; just learn the label.
                    if existing.add_label_variant(label) {
                        counts.variants_added += 1;
                    }
                } else {
                    category.fields.insert(
                        symbolic,
                        CanonicalField {
                            value: None,
                            field_type: mapping.real_field.field_type.clone(),
                            obligatory: mapping.real_field.required,
                            description: label.clone(),
                            active: true,
                            is_fundamental: true,
                            reference_number: None,
                            learned_label_variants: vec![label.clone()],
                        },
                    );
                    counts.fields_created += 1;
                }
            }
            None => {}
        }
    }

    counts
}

// ============================================================================
// Entry Point
// ============================================================================

/// Run the full learning path against an already-loaded registry and
/// persist it at `registry_path`. Only persist errors abort; degraded
/// batches are reported in the summary.
pub async fn reconcile_and_learn(
    record: &ExecutionRecord,
    registry: &mut CanonicalRegistry,
    registry_path: &Path,
    service: &dyn CompletionService,
    policy: &dyn DecisionPolicy,
    config: &ReconcileConfig,
) -> Result<UpdateSummary, RegistryError> {
    let fields = extract_real_fields(record);
    tracing::info!(fields = fields.len(), "update run: fields extracted");

    let outcome = map_fields(service, registry, &fields, config).await;
    let resolved = outcome
        .mappings
        .iter()
        .filter(|m| m.canonical_ref.is_some())
        .count();

    let counts = apply_mappings(registry, &outcome.mappings, policy, config);

    registry.recount_fundamentals();
    registry.touch(&config.modified_by);
    save_registry(registry_path, registry)?;

    tracing::info!(
        variants = counts.variants_added,
        corrections = counts.corrections_applied,
        created = counts.fields_created,
        degraded = outcome.degraded.len(),
        "update run persisted"
    );

    Ok(UpdateSummary {
        mappings_total: outcome.mappings.len(),
        mappings_resolved: resolved,
        variants_added: counts.variants_added,
        corrections_applied: counts.corrections_applied,
        fields_created: counts.fields_created,
        validation_skipped: counts.validation_skipped,
        batches_degraded: outcome.degraded,
        finished_at: Utc::now(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::AutoPolicy;
    use crate::providers::MockCompletion;
    use crate::{CanonicalFieldRef, CompletedStep, RealFieldRecord};
    use convoca_registry::{load_registry, CanonicalCategory, RegistryMetadata};
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    fn real(label: &str) -> RealFieldRecord {
        RealFieldRecord {
            label: label.to_string(),
            field_type: "text".to_string(),
            required: true,
            completed: true,
            assigned_value: None,
        }
    }

    fn mapped(label: &str, confidence: f64) -> FieldMapping {
        FieldMapping {
            real_field: real(label),
            canonical_ref: Some(CanonicalFieldRef {
                category: "projectData".to_string(),
                field_name: "PROJECT_TITLE".to_string(),
            }),
            confidence,
            rationale: None,
        }
    }

    fn unmapped(label: &str, confidence: f64) -> FieldMapping {
        FieldMapping {
            real_field: real(label),
            canonical_ref: None,
            confidence,
            rationale: None,
        }
    }

    fn registry() -> CanonicalRegistry {
        let mut fields = BTreeMap::new();
        fields.insert(
            "PROJECT_TITLE".to_string(),
            CanonicalField {
                value: None,
                field_type: "text".to_string(),
                obligatory: true,
                description: "Project title".to_string(),
                active: true,
                is_fundamental: true,
                reference_number: None,
                learned_label_variants: vec!["Nombre Proyecto".to_string()],
            },
        );
        let mut categories = BTreeMap::new();
        categories.insert(
            "projectData".to_string(),
            CanonicalCategory {
                name: "projectData".to_string(),
                description: String::new(),
                active: true,
                fields,
            },
        );
        CanonicalRegistry {
            metadata: RegistryMetadata {
                version: "1.0".to_string(),
                last_modified: Utc::now(),
                last_modified_by: "test".to_string(),
                total_fundamental_field_count: 1,
                description: String::new(),
                source: String::new(),
            },
            categories,
        }
    }

    #[test]
    fn derive_symbolic_name_collapses_punctuation_runs() {
        assert_eq!(derive_symbolic_name("Fecha Nacimiento"), "FECHA_NACIMIENTO");
        assert_eq!(derive_symbolic_name("C.I.F. / N.I.F."), "C_I_F_N_I_F");
        assert_eq!(derive_symbolic_name("  presupuesto  total "), "PRESUPUESTO_TOTAL");
        assert_eq!(derive_symbolic_name("???"), "");
        assert_eq!(derive_symbolic_name(""), "");
    }

    #[test]
    fn variant_added_above_threshold_only() {
        let mut reg = registry();
        let policy = AutoPolicy::default();
        let config = ReconcileConfig::default();

        // Exactly at the threshold: gate is exclusive, nothing happens.
        let counts = apply_mappings(&mut reg, &[mapped("Titulo", 0.5)], &policy, &config);
        assert_eq!(counts.variants_added, 0);

        let counts = apply_mappings(&mut reg, &[mapped("Titulo", 0.51)], &policy, &config);
        assert_eq!(counts.variants_added, 1);

        let field = reg.find_field("projectData", "PROJECT_TITLE").unwrap();
        assert_eq!(field.learned_label_variants.len(), 2);
    }

    #[test]
    fn duplicate_variant_is_not_counted() {
        let mut reg = registry();
        let counts = apply_mappings(
            &mut reg,
            &[mapped("NOMBRE PROYECTO", 0.9)],
            &AutoPolicy::default(),
            &ReconcileConfig::default(),
        );
        assert_eq!(counts.variants_added, 0);
        let field = reg.find_field("projectData", "PROJECT_TITLE").unwrap();
        assert_eq!(field.learned_label_variants.len(), 1);
    }

    #[test]
    fn correction_requires_very_high_confidence_and_policy() {
        let config = ReconcileConfig::default();
        let mut mapping = mapped("Titulo del Proyecto", 0.81);
        mapping.real_field.field_type = "textarea".to_string();
        mapping.real_field.required = false;

        // Policy approves.
        let mut reg = registry();
        let counts = apply_mappings(
            &mut reg,
            std::slice::from_ref(&mapping),
            &AutoPolicy::default(),
            &config,
        );
        assert_eq!(counts.corrections_applied, 1);
        let field = reg.find_field("projectData", "PROJECT_TITLE").unwrap();
        assert_eq!(field.field_type, "textarea");
        assert!(!field.obligatory);

        // Policy declines: variant still lands, metadata untouched.
        let mut reg = registry();
        let no_corrections = AutoPolicy {
            apply_corrections: false,
            create_in_category: None,
        };
        let counts =
            apply_mappings(&mut reg, std::slice::from_ref(&mapping), &no_corrections, &config);
        assert_eq!(counts.corrections_applied, 0);
        assert_eq!(counts.variants_added, 1);
        let field = reg.find_field("projectData", "PROJECT_TITLE").unwrap();
        assert_eq!(field.field_type, "text");

        // At exactly 0.8 the gate stays closed.
        let mut reg = registry();
        mapping.confidence = 0.8;
        let counts = apply_mappings(
            &mut reg,
            std::slice::from_ref(&mapping),
            &AutoPolicy::default(),
            &config,
        );
        assert_eq!(counts.corrections_applied, 0);
    }

    #[test]
    fn identical_metadata_is_not_a_correction() {
        let mut reg = registry();
        let counts = apply_mappings(
            &mut reg,
            &[mapped("Titulo del Proyecto", 0.95)],
            &AutoPolicy::default(),
            &ReconcileConfig::default(),
        );
        assert_eq!(counts.corrections_applied, 0);
    }

    #[test]
    fn confidently_unmapped_label_creates_a_field() {
        let mut reg = registry();
        let policy = AutoPolicy {
            apply_corrections: true,
            create_in_category: Some("personalData".to_string()),
        };

        let counts = apply_mappings(
            &mut reg,
            &[unmapped("Fecha Nacimiento", 0.1)],
            &policy,
            &ReconcileConfig::default(),
        );
        assert_eq!(counts.fields_created, 1);

        let field = reg.find_field("personalData", "FECHA_NACIMIENTO").unwrap();
        assert!(field.active);
        assert!(field.is_fundamental);
        assert_eq!(field.learned_label_variants, vec!["Fecha Nacimiento"]);
    }

    #[test]
    fn unmapped_at_or_above_creation_threshold_is_ignored() {
        let mut reg = registry();
        let policy = AutoPolicy {
            apply_corrections: true,
            create_in_category: Some("personalData".to_string()),
        };

        let counts = apply_mappings(
            &mut reg,
            &[unmapped("Fecha Nacimiento", 0.3)],
            &policy,
            &ReconcileConfig::default(),
        );
        assert_eq!(counts.fields_created, 0);
        assert!(reg.categories.get("personalData").is_none());
    }

    #[test]
    fn empty_symbolic_name_is_rejected() {
        let mut reg = registry();
        let policy = AutoPolicy {
            apply_corrections: true,
            create_in_category: Some("personalData".to_string()),
        };

        let counts = apply_mappings(
            &mut reg,
            &[unmapped("???", 0.0)],
            &policy,
            &ReconcileConfig::default(),
        );
        assert_eq!(counts.fields_created, 0);
        assert_eq!(counts.validation_skipped, 1);
    }

    #[test]
    fn recreating_an_existing_field_learns_the_label_instead() {
        let mut reg = registry();
        let policy = AutoPolicy {
            apply_corrections: true,
            create_in_category: Some("personalData".to_string()),
        };
        let config = ReconcileConfig::default();

        apply_mappings(&mut reg, &[unmapped("Fecha Nacimiento", 0.1)], &policy, &config);
        let counts = apply_mappings(
            &mut reg,
            &[unmapped("Fecha-Nacimiento", 0.1)],
            &policy,
            &config,
        );

        assert_eq!(counts.fields_created, 0);
        // "Fecha-Nacimiento" normalizes like the original label, so not
        // even a new variant appears.
        let field = reg.find_field("personalData", "FECHA_NACIMIENTO").unwrap();
        assert_eq!(field.learned_label_variants.len(), 1);
    }

    #[tokio::test]
    async fn update_run_persists_learned_variants() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("registry.json");
        let mut reg = registry();

        let record = ExecutionRecord {
            completed_steps: vec![CompletedStep {
                step_title: "Paso 1".to_string(),
                field_details: vec![real("Titulo del Proyecto")],
            }],
        };
        let service = MockCompletion::always(
            r#"[{"index": 1, "label": "Titulo del Proyecto",
                 "canonicalFieldName": "PROJECT_TITLE", "category": "projectData",
                 "confidence": 0.93, "rationale": "synonym"}]"#,
        );

        let summary = reconcile_and_learn(
            &record,
            &mut reg,
            &path,
            &service,
            &AutoPolicy::default(),
            &ReconcileConfig::default(),
        )
        .await
        .unwrap();

        assert_eq!(summary.mappings_total, 1);
        assert_eq!(summary.mappings_resolved, 1);
        assert_eq!(summary.variants_added, 1);
        assert!(summary.batches_degraded.is_empty());

        let persisted = load_registry(&path).unwrap();
        let field = persisted.find_field("projectData", "PROJECT_TITLE").unwrap();
        assert!(field
            .learned_label_variants
            .contains(&"Titulo del Proyecto".to_string()));
        assert_eq!(persisted.metadata.last_modified_by, "convoca-reconcile");
        assert_eq!(persisted.metadata.total_fundamental_field_count, 1);
    }

    #[tokio::test]
    async fn degraded_run_still_persists_and_reports() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("registry.json");
        let mut reg = registry();

        let record = ExecutionRecord {
            completed_steps: vec![CompletedStep {
                step_title: "Paso 1".to_string(),
                field_details: vec![real("Algo")],
            }],
        };
        let service = MockCompletion::failing("offline");

        let summary = reconcile_and_learn(
            &record,
            &mut reg,
            &path,
            &service,
            &AutoPolicy::default(),
            &ReconcileConfig::default(),
        )
        .await
        .unwrap();

        assert_eq!(summary.batches_degraded.len(), 1);
        assert_eq!(summary.variants_added, 0);
        assert!(path.exists());
    }

    #[tokio::test]
    async fn persist_failure_aborts_the_run() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("no_such_dir").join("registry.json");
        let mut reg = registry();

        let record = ExecutionRecord {
            completed_steps: vec![],
        };
        let service = MockCompletion::always("[]");

        let err = reconcile_and_learn(
            &record,
            &mut reg,
            &path,
            &service,
            &AutoPolicy::default(),
            &ReconcileConfig::default(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, RegistryError::Persist(_)));
    }
}
