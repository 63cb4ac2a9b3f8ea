//! Decision policies for registry mutation
//!
//! High-confidence mappings may correct canonical metadata, and very
//! low-confidence unmapped labels may become brand-new canonical fields.
//! Whether those mutations actually happen is a policy decision injected
//! into the updater, not a mode flag threaded through call sites: an
//! unattended run uses [`AutoPolicy`], an operator-driven run uses
//! [`InteractivePolicy`] with injected confirm/choose capabilities.

use crate::CanonicalFieldRef;

/// Outcome of asking a policy about creating a brand-new canonical field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateDecision {
    /// Do not create anything for this label.
    Skip,
    /// Create the field in this category.
    InCategory(String),
    /// Create the field in the configured default category.
    InDefaultCategory,
}

/// Policy seam consulted by the registry updater.
pub trait DecisionPolicy: Send + Sync {
    /// May the updater correct `field`'s type/obligatory metadata?
    fn should_apply_correction(&self, field: &CanonicalFieldRef, confidence: f64) -> bool;

    /// Should an unmapped `label` become a new canonical field, and where?
    fn should_create_field(&self, label: &str) -> CreateDecision;
}

// ============================================================================
// Automatic Policy
// ============================================================================

/// Unattended runs: fixed answers, no prompting.
#[derive(Debug, Clone)]
pub struct AutoPolicy {
    /// Apply metadata corrections without asking.
    pub apply_corrections: bool,
    /// Create new fields for unmapped labels. `None` disables creation,
    /// `Some(category)` targets that category.
    pub create_in_category: Option<String>,
}

impl Default for AutoPolicy {
    fn default() -> Self {
        Self {
            apply_corrections: true,
            create_in_category: None,
        }
    }
}

impl DecisionPolicy for AutoPolicy {
    fn should_apply_correction(&self, _field: &CanonicalFieldRef, _confidence: f64) -> bool {
        self.apply_corrections
    }

    fn should_create_field(&self, _label: &str) -> CreateDecision {
        match &self.create_in_category {
            Some(category) => CreateDecision::InCategory(category.clone()),
            None => CreateDecision::Skip,
        }
    }
}

// ============================================================================
// Interactive Policy
// ============================================================================

/// Blocking yes/no question put to the operator.
pub type ConfirmFn = Box<dyn Fn(&str) -> bool + Send + Sync>;

/// Category chosen by the operator for a new field; `None` means "use the
/// default category".
pub type ChooseCategoryFn = Box<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Operator-driven runs: every mutation pauses for confirmation through
/// the injected capabilities.
pub struct InteractivePolicy {
    confirm: ConfirmFn,
    choose_category: ChooseCategoryFn,
}

impl InteractivePolicy {
    pub fn new(confirm: ConfirmFn, choose_category: ChooseCategoryFn) -> Self {
        Self {
            confirm,
            choose_category,
        }
    }
}

impl DecisionPolicy for InteractivePolicy {
    fn should_apply_correction(&self, field: &CanonicalFieldRef, confidence: f64) -> bool {
        (self.confirm)(&format!(
            "Correct metadata of {}/{} (confidence {:.0}%)?",
            field.category,
            field.field_name,
            confidence * 100.0
        ))
    }

    fn should_create_field(&self, label: &str) -> CreateDecision {
        if !(self.confirm)(&format!("Create a new canonical field for \"{label}\"?")) {
            return CreateDecision::Skip;
        }
        match (self.choose_category)(label) {
            Some(category) => CreateDecision::InCategory(category),
            None => CreateDecision::InDefaultCategory,
        }
    }
}
