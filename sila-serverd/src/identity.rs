use std::sync::Arc;
use parking_lot::RwLock;
use crate::features::FeatureRegistry;

/// Identity fields a server is constructed with
#[derive(Debug, Clone)]
pub struct ServerIdentity {
    pub name: String,
    pub description: String,
    pub version: String,
    pub server_type: String,
    pub uuid: String,
    pub vendor_url: String,
}

/// Answers "who are you" queries. Only the name can change after construction.
pub struct IdentityService {
    name: RwLock<String>,
    description: String,
    version: String,
    server_type: String,
    uuid: String,
    vendor_url: String,
    registry: Arc<FeatureRegistry>,
}

impl IdentityService {
    pub fn new(identity: ServerIdentity, registry: Arc<FeatureRegistry>) -> Self {
        Self {
            name: RwLock::new(identity.name),
            description: identity.description,
            version: identity.version,
            server_type: identity.server_type,
            uuid: identity.uuid,
            vendor_url: identity.vendor_url,
            registry,
        }
    }

    pub fn name(&self) -> String {
        self.name.read().clone()
    }

    pub fn set_name(&self, new_name: impl Into<String>) {
        let new_name = new_name.into();
        tracing::info!("Server renamed to {:?}", new_name);
        *self.name.write() = new_name;
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn server_type(&self) -> &str {
        &self.server_type
    }

    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    pub fn vendor_url(&self) -> &str {
        &self.vendor_url
    }

    pub fn list_feature_ids(&self) -> Vec<String> {
        self.registry.list_ids()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_identity() -> ServerIdentity {
        ServerIdentity {
            name: "Pump Station".to_string(),
            description: "Syringe pump controller".to_string(),
            version: "1.2.0".to_string(),
            server_type: "PumpServer".to_string(),
            uuid: "abc-123".to_string(),
            vendor_url: "https://example.org".to_string(),
        }
    }

    #[test]
    fn test_accessors() {
        let service = IdentityService::new(test_identity(), Arc::new(FeatureRegistry::new()));

        assert_eq!(service.name(), "Pump Station");
        assert_eq!(service.description(), "Syringe pump controller");
        assert_eq!(service.version(), "1.2.0");
        assert_eq!(service.server_type(), "PumpServer");
        assert_eq!(service.uuid(), "abc-123");
        assert_eq!(service.vendor_url(), "https://example.org");
    }

    #[test]
    fn test_rename_keeps_uuid() {
        let service = IdentityService::new(test_identity(), Arc::new(FeatureRegistry::new()));

        for name in ["", "Pumpe Nr. 2 \u{1F9EA}", "Pump Station"] {
            service.set_name(name);
            assert_eq!(service.name(), name);
            assert_eq!(service.uuid(), "abc-123");
        }
    }

    #[test]
    fn test_list_feature_ids_delegates_to_registry() {
        let registry = Arc::new(FeatureRegistry::new());
        let service = IdentityService::new(test_identity(), registry.clone());
        assert!(service.list_feature_ids().is_empty());

        registry.register_document("PumpControl", "<f/>");
        assert_eq!(service.list_feature_ids(), vec!["PumpControl".to_string()]);
    }
}
