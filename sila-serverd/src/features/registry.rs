use std::path::Path;
use indexmap::IndexMap;
use parking_lot::RwLock;
use crate::error::NotFoundError;

/// A registered feature and its single-line definition document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureRecord {
    pub feature_id: String,
    pub definition_document: String,
}

/// Directory of the features this server implements.
///
/// Shared between request handlers, so every access goes through the lock.
#[derive(Debug, Default)]
pub struct FeatureRegistry {
    features: RwLock<IndexMap<String, FeatureRecord>>,
}

impl FeatureRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a feature from a definition file.
    ///
    /// Never fails: a missing source or unreadable file stores a placeholder
    /// definition and logs an error. Re-registering an id replaces the record.
    pub fn register(&self, feature_id: &str, definition_source: Option<&Path>) {
        let document = match definition_source {
            Some(path) => match std::fs::read_to_string(path) {
                Ok(contents) => contents,
                Err(e) => {
                    tracing::error!(
                        "Failed to read definition for feature {} from {}: {}",
                        feature_id,
                        path.display(),
                        e
                    );
                    placeholder_definition(feature_id)
                }
            },
            None => {
                tracing::error!(
                    "No definition supplied for feature {}, storing placeholder",
                    feature_id
                );
                placeholder_definition(feature_id)
            }
        };

        self.register_document(feature_id, &document);
    }

    /// Register a feature from an in-memory definition document
    pub fn register_document(&self, feature_id: &str, document: &str) {
        let record = FeatureRecord {
            feature_id: feature_id.to_string(),
            definition_document: normalize_definition(document),
        };

        let previous = self.features.write().insert(feature_id.to_string(), record);
        if previous.is_some() {
            tracing::debug!("Replaced definition of feature {}", feature_id);
        } else {
            tracing::info!("Registered feature {}", feature_id);
        }
    }

    pub fn get_definition(&self, feature_id: &str) -> Result<String, NotFoundError> {
        self.features
            .read()
            .get(feature_id)
            .map(|record| record.definition_document.clone())
            .ok_or_else(|| NotFoundError {
                feature_id: feature_id.to_string(),
            })
    }

    /// Look up a feature by bare or fully qualified identifier.
    ///
    /// Qualified identifiers have the form `originator/category/Identifier/vN`;
    /// when the full string is unknown the `Identifier` segment is tried.
    pub fn resolve(&self, qualified_id: &str) -> Result<String, NotFoundError> {
        if let Ok(document) = self.get_definition(qualified_id) {
            return Ok(document);
        }

        qualified_id
            .split('/')
            .nth(2)
            .filter(|segment| !segment.is_empty())
            .and_then(|identifier| self.get_definition(identifier).ok())
            .ok_or_else(|| NotFoundError {
                feature_id: qualified_id.to_string(),
            })
    }

    /// Registered identifiers in registration order
    pub fn list_ids(&self) -> Vec<String> {
        self.features.read().keys().cloned().collect()
    }

    pub fn contains(&self, feature_id: &str) -> bool {
        self.features.read().contains_key(feature_id)
    }

    pub fn len(&self) -> usize {
        self.features.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.read().is_empty()
    }
}

/// Strip line breaks so the document travels as a single-line string value
pub fn normalize_definition(document: &str) -> String {
    document.chars().filter(|c| *c != '\n' && *c != '\r').collect()
}

fn placeholder_definition(feature_id: &str) -> String {
    format!(
        "<Feature><Identifier>{id}</Identifier><DisplayName>{id}</DisplayName>\
         <Description>No feature definition available</Description></Feature>",
        id = feature_id
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::io::Write;

    #[test]
    fn test_register_normalizes_line_breaks() {
        let registry = FeatureRegistry::new();
        registry.register_document("PumpControl", "<Feature>\r\n  <Identifier>PumpControl</Identifier>\n</Feature>\n");

        assert_eq!(
            registry.get_definition("PumpControl").unwrap(),
            "<Feature>  <Identifier>PumpControl</Identifier></Feature>"
        );
    }

    #[test]
    fn test_reregistration_keeps_last_document() {
        let registry = FeatureRegistry::new();
        registry.register_document("PumpControl", "<first/>");
        registry.register_document("PumpControl", "<second>\n</second>");

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get_definition("PumpControl").unwrap(), "<second></second>");
    }

    #[test]
    fn test_unknown_lookup_fails() {
        let registry = FeatureRegistry::new();
        let err = registry.get_definition("nonexistent").unwrap_err();
        assert_eq!(err.feature_id, "nonexistent");

        registry.register_document("A", "<a/>");
        assert!(registry.get_definition("nonexistent").is_err());
    }

    #[test]
    fn test_missing_source_stores_placeholder() {
        let registry = FeatureRegistry::new();
        registry.register("Thermostat", None);
        registry.register("Shaker", Some(Path::new("/nonexistent/Shaker.sila.xml")));

        let placeholder = registry.get_definition("Thermostat").unwrap();
        assert!(placeholder.contains("<Identifier>Thermostat</Identifier>"));
        assert!(registry.contains("Shaker"));
    }

    #[test]
    fn test_register_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "<Feature>\n<Identifier>Balance</Identifier>\r\n</Feature>").unwrap();

        let registry = FeatureRegistry::new();
        registry.register("Balance", Some(file.path()));

        assert_eq!(
            registry.get_definition("Balance").unwrap(),
            "<Feature><Identifier>Balance</Identifier></Feature>"
        );
    }

    #[test]
    fn test_resolve_qualified_identifier() {
        let registry = FeatureRegistry::new();
        registry.register_document("SiLAService", "<silaservice/>");

        assert_eq!(
            registry.resolve("org.silastandard/core/SiLAService/v1").unwrap(),
            "<silaservice/>"
        );
        assert_eq!(registry.resolve("SiLAService").unwrap(), "<silaservice/>");

        let err = registry.resolve("org.silastandard/core/Unknown/v1").unwrap_err();
        assert_eq!(err.feature_id, "org.silastandard/core/Unknown/v1");
    }

    #[test]
    fn test_list_ids_set_equality() {
        let registry = FeatureRegistry::new();
        for id in ["C", "A", "B"] {
            registry.register_document(id, "<f/>");
        }

        let ids: HashSet<String> = registry.list_ids().into_iter().collect();
        let expected: HashSet<String> = ["A", "B", "C"].iter().map(|s| s.to_string()).collect();
        assert_eq!(ids, expected);
    }
}
