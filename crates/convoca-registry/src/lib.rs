//! Canonical field registry for grant-form reconciliation
//!
//! The registry is the persisted catalog of fields the target application
//! form is expected to contain. Each field carries the real-world label
//! variants that were previously confirmed to refer to it, so that future
//! runs can match observed labels without any AI involvement.
//!
//! ## Structure
//!
//! ```text
//! CanonicalRegistry
//! ├── metadata            (version, lastModified, fundamental count, ...)
//! └── categories          (BTreeMap, lexicographic iteration)
//!     └── CanonicalCategory
//!         └── fields      (BTreeMap, lexicographic iteration)
//!             └── CanonicalField
//!                 └── learnedLabelVariants  (document order, normalize-deduped)
//! ```
//!
//! The whole document is loaded once per process, mutated only during a
//! single update run, and written back atomically (see [`persistence`]).
//! Iteration order is deterministic by construction: lexicographic for
//! categories and fields, insertion order for label variants.

pub mod persistence;
pub mod text;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub use persistence::{load_registry, save_registry, RegistryError};
pub use text::{normalize, similarity};

// ============================================================================
// Registry Document
// ============================================================================

/// Top-level persisted registry document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalRegistry {
    pub metadata: RegistryMetadata,
    pub categories: BTreeMap<String, CanonicalCategory>,
}

/// Registry bookkeeping, recomputed at the end of every update run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryMetadata {
    pub version: String,
    pub last_modified: DateTime<Utc>,
    pub last_modified_by: String,
    pub total_fundamental_field_count: usize,
    pub description: String,
    pub source: String,
}

/// A group of related canonical fields (one section of the form).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalCategory {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub active: bool,
    #[serde(default)]
    pub fields: BTreeMap<String, CanonicalField>,
}

/// One field the form is expected to contain.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalField {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(rename = "type")]
    pub field_type: String,
    pub obligatory: bool,
    #[serde(default)]
    pub description: String,
    pub active: bool,
    pub is_fundamental: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_number: Option<String>,
    #[serde(default)]
    pub learned_label_variants: Vec<String>,
}

impl CanonicalField {
    /// Register a confirmed real-world label for this field.
    ///
    /// Variants are a set under normalization: if an existing variant
    /// normalizes to the same string, the list is left untouched and
    /// `false` is returned. Insertion order is preserved otherwise.
    pub fn add_label_variant(&mut self, label: &str) -> bool {
        let normalized = normalize(label);
        if self
            .learned_label_variants
            .iter()
            .any(|v| normalize(v) == normalized)
        {
            return false;
        }
        self.learned_label_variants.push(label.to_string());
        true
    }
}

// ============================================================================
// Flattened Views
// ============================================================================

/// A fundamental field flattened out of the category tree, as handed to the
/// resolvers and the AI mapper.
#[derive(Debug, Clone, Copy)]
pub struct FundamentalField<'a> {
    pub category: &'a str,
    pub name: &'a str,
    pub field: &'a CanonicalField,
}

impl CanonicalRegistry {
    /// All active+fundamental fields of active categories, in registry
    /// iteration order (lexicographic by category, then field name).
    pub fn fundamental_fields(&self) -> Vec<FundamentalField<'_>> {
        self.categories
            .values()
            .filter(|c| c.active)
            .flat_map(|c| {
                c.fields
                    .iter()
                    .filter(|(_, f)| f.active && f.is_fundamental)
                    .map(move |(name, field)| FundamentalField {
                        category: &c.name,
                        name,
                        field,
                    })
            })
            .collect()
    }

    pub fn find_field(&self, category: &str, name: &str) -> Option<&CanonicalField> {
        self.categories.get(category)?.fields.get(name)
    }

    pub fn find_field_mut(&mut self, category: &str, name: &str) -> Option<&mut CanonicalField> {
        self.categories.get_mut(category)?.fields.get_mut(name)
    }

    /// Get a category, creating an empty active one if absent.
    pub fn ensure_category(&mut self, name: &str) -> &mut CanonicalCategory {
        self.categories
            .entry(name.to_string())
            .or_insert_with(|| CanonicalCategory {
                name: name.to_string(),
                description: String::new(),
                active: true,
                fields: BTreeMap::new(),
            })
    }

    /// Recompute `metadata.totalFundamentalFieldCount` from the category
    /// tree. Returns the fresh count.
    pub fn recount_fundamentals(&mut self) -> usize {
        let count = self.fundamental_fields().len();
        self.metadata.total_fundamental_field_count = count;
        count
    }

    /// Stamp the modification metadata before persisting.
    pub fn touch(&mut self, modified_by: &str) {
        self.metadata.last_modified = Utc::now();
        self.metadata.last_modified_by = modified_by.to_string();
    }
}
