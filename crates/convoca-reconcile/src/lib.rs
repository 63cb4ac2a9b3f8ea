//! Convoca Field Reconciliation Engine
//!
//! After an automated run over the grant application form, this crate
//! verifies that the catalog of fundamental fields was actually present and
//! completed in the form the automation encountered. Because live labels
//! vary across contest editions and UI revisions, matching happens in
//! tiers:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    RECONCILIATION PIPELINE                      │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                 │
//! │  execution record ──► Label Extractor ──┬──► Comparison         │
//! │                                         │    (exact + fuzzy,    │
//! │                                         │     read-only)        │
//! │                                         │                       │
//! │                                         └──► AI Batch Mapper    │
//! │                                              │  (completion     │
//! │                                              │   service)       │
//! │                                              ▼                  │
//! │                                         Registry Updater        │
//! │                                         (confidence-gated,      │
//! │                                          atomic persist)        │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The comparison path never touches the registry; the learning path
//! mutates it under a single-writer, run-to-completion model and persists
//! it atomically at the end of the run.

pub mod comparison;
pub mod extraction;
pub mod mapper;
pub mod matching;
pub mod policy;
pub mod providers;
pub mod updater;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use comparison::{compare, CategoryStats, ComparisonReport, CoverageStats, FoundField, MissingField};
pub use extraction::extract_real_fields;
pub use mapper::{map_fields, BatchDegradation, DegradationReason, MappingOutcome};
pub use policy::{
    AutoPolicy, ChooseCategoryFn, ConfirmFn, CreateDecision, DecisionPolicy, InteractivePolicy,
};
pub use providers::MockCompletion;
pub use updater::{derive_symbolic_name, reconcile_and_learn, UpdateSummary};

// ============================================================================
// Execution Record (external input)
// ============================================================================

/// What the browser-automation component observed during one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRecord {
    #[serde(default)]
    pub completed_steps: Vec<CompletedStep>,
}

/// One wizard step of the multi-step form.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedStep {
    pub step_title: String,
    #[serde(default)]
    pub field_details: Vec<RealFieldRecord>,
}

/// A field observation taken from the live form. Ephemeral: rebuilt from
/// the execution record on every run, never persisted by this engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RealFieldRecord {
    pub label: String,
    #[serde(rename = "type")]
    pub field_type: String,
    pub required: bool,
    pub completed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_value: Option<String>,
}

// ============================================================================
// Mappings
// ============================================================================

/// Reference into the canonical registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalFieldRef {
    pub category: String,
    pub field_name: String,
}

/// A proposed correspondence between an observed field and a canonical
/// field, produced by the AI batch mapper or the fuzzy resolver.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldMapping {
    pub real_field: RealFieldRecord,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub canonical_ref: Option<CanonicalFieldRef>,
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
}

impl FieldMapping {
    /// A mapping carrying no canonical reference and zero confidence, used
    /// when the completion service is unusable for a batch.
    pub fn unmapped(real_field: RealFieldRecord) -> Self {
        Self {
            real_field,
            canonical_ref: None,
            confidence: 0.0,
            rationale: None,
        }
    }
}

// ============================================================================
// Completion-Service Capability
// ============================================================================

/// Tokens consumed by one completion call.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// One completion returned by the hosted service.
#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    pub usage: TokenUsage,
}

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("service call failed: {0}")]
    Service(String),
    #[error("response parse failed: {0}")]
    Parse(String),
}

/// The only two things the engine needs from the completion-service
/// collaborator: a classify call and a cost-accounting hook. Request
/// negotiation, retries and token budgeting live behind this seam.
#[async_trait]
pub trait CompletionService: Send + Sync {
    async fn classify(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        temperature: f32,
    ) -> Result<Completion, LlmError>;

    /// Report consumed tokens to the external accounting subsystem.
    fn record_usage(&self, input_tokens: u64, output_tokens: u64);
}

// ============================================================================
// Configuration
// ============================================================================

/// Tunables for a reconciliation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileConfig {
    /// Real fields per classification request.
    pub batch_size: usize,
    /// Minimum token-overlap similarity for a fuzzy match (inclusive).
    pub fuzzy_threshold: f64,
    /// Confidence above which a label becomes a learned variant (exclusive).
    pub variant_threshold: f64,
    /// Confidence above which metadata corrections may apply (exclusive).
    pub correction_threshold: f64,
    /// Unmapped confidence below which new-field creation is offered.
    pub creation_threshold: f64,
    /// Category for new fields when the policy names none.
    pub default_category: String,
    /// Sampling temperature for classification requests.
    pub temperature: f32,
    /// Stamped into `metadata.lastModifiedBy` on persist.
    pub modified_by: String,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            batch_size: 20,
            fuzzy_threshold: 0.6,
            variant_threshold: 0.5,
            correction_threshold: 0.8,
            creation_threshold: 0.3,
            default_category: "uncategorized".to_string(),
            temperature: 0.2,
            modified_by: "convoca-reconcile".to_string(),
        }
    }
}
