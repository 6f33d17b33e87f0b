use std::sync::Arc;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use shared::protocol::{SILA_SERVICE_PATH, SIMULATION_CONTROLLER_PATH};
use crate::error::NotFoundError;
use crate::features::FeatureRegistry;
use crate::identity::IdentityService;
use crate::simulation::{SimulationCoordinator, SimulationMode};

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<FeatureRegistry>,
    pub identity: Arc<IdentityService>,
    pub simulation: Arc<SimulationCoordinator>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GetFeatureDefinitionParameters {
    pub qualified_feature_identifier: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GetFeatureDefinitionResponses {
    pub feature_definition: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SetServerNameParameters {
    pub server_name: String,
}

/// Acknowledgement for commands without responses
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Empty {}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ServerNameResponse {
    pub server_name: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ServerTypeResponse {
    pub server_type: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ServerUuidResponse {
    #[serde(rename = "ServerUUID")]
    pub server_uuid: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ServerDescriptionResponse {
    pub server_description: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ServerVersionResponse {
    pub server_version: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ServerVendorUrlResponse {
    #[serde(rename = "ServerVendorURL")]
    pub server_vendor_url: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ImplementedFeaturesResponse {
    pub implemented_features: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SimulationModeResponse {
    pub simulation_mode: bool,
}

/// Error body in the shape of a SiLA validation error
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ValidationError {
    pub parameter: String,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ErrorBody {
    pub validation_error: ValidationError,
}

/// Errors reported to RPC callers
#[derive(Debug)]
pub enum ApiError {
    Validation { parameter: String, message: String },
}

impl From<NotFoundError> for ApiError {
    fn from(e: NotFoundError) -> Self {
        ApiError::Validation {
            parameter: "QualifiedFeatureIdentifier".to_string(),
            message: e.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Validation { parameter, message } => {
                tracing::debug!("Rejected request: {}: {}", parameter, message);
                let body = ErrorBody {
                    validation_error: ValidationError { parameter, message },
                };
                (StatusCode::BAD_REQUEST, Json(body)).into_response()
            }
        }
    }
}

/// Routes of the two built-in features
pub fn router(state: AppState) -> Router {
    let sila_service = Router::new()
        .route("/GetFeatureDefinition", post(get_feature_definition))
        .route("/SetServerName", post(set_server_name))
        .route("/Get_ServerName", post(get_server_name))
        .route("/Get_ServerType", post(get_server_type))
        .route("/Get_ServerUUID", post(get_server_uuid))
        .route("/Get_ServerDescription", post(get_server_description))
        .route("/Get_ServerVersion", post(get_server_version))
        .route("/Get_ServerVendorURL", post(get_server_vendor_url))
        .route("/Get_ImplementedFeatures", post(get_implemented_features));

    let simulation_controller = Router::new()
        .route("/StartSimulationMode", post(start_simulation_mode))
        .route("/StartRealMode", post(start_real_mode))
        .route("/Get_SimulationMode", post(get_simulation_mode));

    Router::new()
        .nest(SILA_SERVICE_PATH, sila_service)
        .nest(SIMULATION_CONTROLLER_PATH, simulation_controller)
        .with_state(state)
}

async fn get_feature_definition(
    State(state): State<AppState>,
    Json(params): Json<GetFeatureDefinitionParameters>,
) -> Result<Json<GetFeatureDefinitionResponses>, ApiError> {
    let feature_definition = state.registry.resolve(&params.qualified_feature_identifier)?;
    Ok(Json(GetFeatureDefinitionResponses { feature_definition }))
}

async fn set_server_name(
    State(state): State<AppState>,
    Json(params): Json<SetServerNameParameters>,
) -> Json<Empty> {
    state.identity.set_name(params.server_name);
    Json(Empty {})
}

async fn get_server_name(State(state): State<AppState>) -> Json<ServerNameResponse> {
    Json(ServerNameResponse {
        server_name: state.identity.name(),
    })
}

async fn get_server_type(State(state): State<AppState>) -> Json<ServerTypeResponse> {
    Json(ServerTypeResponse {
        server_type: state.identity.server_type().to_string(),
    })
}

async fn get_server_uuid(State(state): State<AppState>) -> Json<ServerUuidResponse> {
    Json(ServerUuidResponse {
        server_uuid: state.identity.uuid().to_string(),
    })
}

async fn get_server_description(State(state): State<AppState>) -> Json<ServerDescriptionResponse> {
    Json(ServerDescriptionResponse {
        server_description: state.identity.description().to_string(),
    })
}

async fn get_server_version(State(state): State<AppState>) -> Json<ServerVersionResponse> {
    Json(ServerVersionResponse {
        server_version: state.identity.version().to_string(),
    })
}

async fn get_server_vendor_url(State(state): State<AppState>) -> Json<ServerVendorUrlResponse> {
    Json(ServerVendorUrlResponse {
        server_vendor_url: state.identity.vendor_url().to_string(),
    })
}

async fn get_implemented_features(State(state): State<AppState>) -> Json<ImplementedFeaturesResponse> {
    Json(ImplementedFeaturesResponse {
        implemented_features: state.identity.list_feature_ids(),
    })
}

async fn start_simulation_mode(State(state): State<AppState>) -> Json<Empty> {
    switch_mode(state.simulation, SimulationMode::Simulation).await;
    Json(Empty {})
}

async fn start_real_mode(State(state): State<AppState>) -> Json<Empty> {
    switch_mode(state.simulation, SimulationMode::Real).await;
    Json(Empty {})
}

/// Hooks talk to hardware, so the fan-out runs on the blocking pool
async fn switch_mode(simulation: Arc<SimulationCoordinator>, target: SimulationMode) {
    let result = tokio::task::spawn_blocking(move || {
        simulation.set_simulating(target.is_simulating())
    })
    .await;

    if let Err(e) = result {
        tracing::error!("Switch to {} mode did not complete: {}", target, e);
    }
}

async fn get_simulation_mode(State(state): State<AppState>) -> Json<SimulationModeResponse> {
    Json(SimulationModeResponse {
        simulation_mode: state.simulation.is_simulating(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, Request};
    use http_body_util::BodyExt;
    use serde::de::DeserializeOwned;
    use tower::ServiceExt;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;
    use crate::identity::ServerIdentity;
    use crate::simulation::ModeSwitch;

    fn test_state() -> AppState {
        let registry = Arc::new(FeatureRegistry::new());
        registry.register_document("SiLAService", "<Feature>\n<Identifier>SiLAService</Identifier>\n</Feature>");
        let identity = Arc::new(IdentityService::new(
            ServerIdentity {
                name: "Pump Station".to_string(),
                description: "Syringe pump".to_string(),
                version: "1.0".to_string(),
                server_type: "PumpServer".to_string(),
                uuid: "abc-123".to_string(),
                vendor_url: "https://example.org".to_string(),
            },
            registry.clone(),
        ));
        AppState {
            registry,
            identity,
            simulation: Arc::new(SimulationCoordinator::new(SimulationMode::Simulation)),
        }
    }

    async fn call(app: &Router, path: &str, body: &str) -> (StatusCode, Vec<u8>) {
        let request = Request::post(path)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, bytes.to_vec())
    }

    async fn call_json<T: DeserializeOwned>(app: &Router, path: &str, body: &str) -> T {
        let (status, bytes) = call(app, path, body).await;
        assert_eq!(status, StatusCode::OK, "{}", String::from_utf8_lossy(&bytes));
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_identity_properties() {
        let app = router(test_state());

        let name: ServerNameResponse = call_json(&app, "/SiLAService/Get_ServerName", "{}").await;
        assert_eq!(name.server_name, "Pump Station");

        let uuid: ServerUuidResponse = call_json(&app, "/SiLAService/Get_ServerUUID", "{}").await;
        assert_eq!(uuid.server_uuid, "abc-123");

        let url: ServerVendorUrlResponse =
            call_json(&app, "/SiLAService/Get_ServerVendorURL", "{}").await;
        assert_eq!(url.server_vendor_url, "https://example.org");

        let server_type: ServerTypeResponse = call_json(&app, "/SiLAService/Get_ServerType", "{}").await;
        assert_eq!(server_type.server_type, "PumpServer");
    }

    #[tokio::test]
    async fn test_set_server_name() {
        let app = router(test_state());

        let _: Empty = call_json(&app, "/SiLAService/SetServerName", r#"{"ServerName":"Waage é"}"#).await;
        let name: ServerNameResponse = call_json(&app, "/SiLAService/Get_ServerName", "{}").await;
        assert_eq!(name.server_name, "Waage \u{e9}");

        let _: Empty = call_json(&app, "/SiLAService/SetServerName", r#"{"ServerName":""}"#).await;
        let name: ServerNameResponse = call_json(&app, "/SiLAService/Get_ServerName", "{}").await;
        assert_eq!(name.server_name, "");
    }

    #[tokio::test]
    async fn test_get_feature_definition() {
        let app = router(test_state());

        let response: GetFeatureDefinitionResponses = call_json(
            &app,
            "/SiLAService/GetFeatureDefinition",
            r#"{"QualifiedFeatureIdentifier":"org.silastandard/core/SiLAService/v1"}"#,
        )
        .await;
        assert_eq!(
            response.feature_definition,
            "<Feature><Identifier>SiLAService</Identifier></Feature>"
        );
    }

    #[tokio::test]
    async fn test_unknown_feature_is_validation_error() {
        let app = router(test_state());

        let (status, bytes) = call(
            &app,
            "/SiLAService/GetFeatureDefinition",
            r#"{"QualifiedFeatureIdentifier":"nonexistent"}"#,
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        let body: ErrorBody = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body.validation_error.parameter, "QualifiedFeatureIdentifier");
        assert!(body.validation_error.message.contains("nonexistent"));
    }

    #[tokio::test]
    async fn test_simulation_controller() {
        let app = router(test_state());

        let _: Empty = call_json(&app, "/SimulationController/StartRealMode", "").await;
        let mode: SimulationModeResponse =
            call_json(&app, "/SimulationController/Get_SimulationMode", "").await;
        assert!(!mode.simulation_mode);

        let _: Empty = call_json(&app, "/SimulationController/StartSimulationMode", "").await;
        let mode: SimulationModeResponse =
            call_json(&app, "/SimulationController/Get_SimulationMode", "").await;
        assert!(mode.simulation_mode);
    }

    /// Holds `to_real` until released
    struct GatedHook {
        entered: AtomicBool,
        release: AtomicBool,
    }

    impl ModeSwitch for GatedHook {
        fn to_simulation(&self) -> anyhow::Result<()> {
            Ok(())
        }

        fn to_real(&self) -> anyhow::Result<()> {
            self.entered.store(true, Ordering::SeqCst);
            while !self.release.load(Ordering::SeqCst) {
                std::thread::sleep(Duration::from_millis(5));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_mode_switch_does_not_block_runtime() {
        let state = test_state();
        let hook = Arc::new(GatedHook {
            entered: AtomicBool::new(false),
            release: AtomicBool::new(false),
        });
        state.simulation.register_module("Stage", Some(hook.clone()));
        let app = router(state);

        let switching = {
            let app = app.clone();
            tokio::spawn(async move {
                let _: Empty = call_json(&app, "/SimulationController/StartRealMode", "").await;
            })
        };
        while !hook.entered.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        // Served on the same single-threaded runtime while the hook is busy
        let mode: SimulationModeResponse =
            call_json(&app, "/SimulationController/Get_SimulationMode", "").await;
        assert!(mode.simulation_mode);

        hook.release.store(true, Ordering::SeqCst);
        switching.await.unwrap();
        let mode: SimulationModeResponse =
            call_json(&app, "/SimulationController/Get_SimulationMode", "").await;
        assert!(!mode.simulation_mode);
    }
}
