//! Registry persistence
//!
//! The registry is a single JSON document. Saves are atomic: the new
//! content is written to a `.json.tmp` sibling and renamed over the target,
//! so a concurrently running comparison never observes a partial write.

use crate::CanonicalRegistry;
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("registry load failed: {0}")]
    Load(String),
    #[error("registry persist failed: {0}")]
    Persist(String),
    #[error("validation failed: {0}")]
    Validation(String),
}

/// Load the registry document. A missing or unparseable file is fatal for
/// the run; no mutation has happened yet at this point.
pub fn load_registry(path: &Path) -> Result<CanonicalRegistry, RegistryError> {
    let raw = fs::read_to_string(path)
        .map_err(|e| RegistryError::Load(format!("{}: {e}", path.display())))?;
    serde_json::from_str(&raw)
        .map_err(|e| RegistryError::Load(format!("{}: {e}", path.display())))
}

/// Persist the whole registry atomically (temp file + rename).
///
/// On failure the in-memory registry is unaffected and the previously
/// persisted document stays intact.
pub fn save_registry(path: &Path, registry: &CanonicalRegistry) -> Result<(), RegistryError> {
    let json = serde_json::to_string_pretty(registry)
        .map_err(|e| RegistryError::Persist(e.to_string()))?;

    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json)
        .map_err(|e| RegistryError::Persist(format!("{}: {e}", tmp.display())))?;
    fs::rename(&tmp, path)
        .map_err(|e| RegistryError::Persist(format!("{}: {e}", path.display())))?;

    tracing::debug!(path = %path.display(), "registry persisted");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CanonicalCategory, CanonicalField, RegistryMetadata};
    use chrono::Utc;
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    fn sample_registry() -> CanonicalRegistry {
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
                reference_number: Some("1.1".to_string()),
                learned_label_variants: vec!["Nombre Proyecto".to_string()],
            },
        );
        let mut categories = BTreeMap::new();
        categories.insert(
            "projectData".to_string(),
            CanonicalCategory {
                name: "projectData".to_string(),
                description: "Project identification".to_string(),
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
                description: "sample".to_string(),
                source: "unit test".to_string(),
            },
            categories,
        }
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("registry.json");

        let reg = sample_registry();
        save_registry(&path, &reg).unwrap();

        let loaded = load_registry(&path).unwrap();
        assert_eq!(loaded.metadata.total_fundamental_field_count, 1);
        let field = loaded.find_field("projectData", "PROJECT_TITLE").unwrap();
        assert_eq!(field.learned_label_variants, vec!["Nombre Proyecto"]);
    }

    #[test]
    fn save_leaves_no_temp_file_behind() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("registry.json");
        save_registry(&path, &sample_registry()).unwrap();

        assert!(path.exists());
        assert!(!dir.path().join("registry.json.tmp").exists());
    }

    #[test]
    fn load_missing_file_is_a_load_error() {
        let dir = tempdir().unwrap();
        let err = load_registry(&dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, RegistryError::Load(_)));
    }

    #[test]
    fn load_malformed_document_is_a_load_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.json");
        fs::write(&path, "{ not json").unwrap();

        let err = load_registry(&path).unwrap_err();
        assert!(matches!(err, RegistryError::Load(_)));
    }
}
