//! Registry HTTP API
//!
//! Clients and peers speak the same routes; a peer marks its requests
//! with the replication header, which switches handlers to the
//! non-re-replicating apply path.

use crate::models::{ErrorResponse, HealthResponse, RegistryStatusResponse};
use crate::state::AppState;
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Json, Router,
};
use beacon_registry::{
    AppName, ApplicationResponse, DeltaResponse, FullRegistryResponse, InstanceId, InstanceStatus,
    Lease, RegisterRequest, RegistryError, StatusOverrideRequest, REPLICATION_HEADER,
};
use serde::Deserialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::instrument;

/// Create the API router with all routes
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/registry/status", get(registry_status))
        .route("/registry/apps", get(full_registry))
        .route("/registry/apps/:app", post(register).get(application))
        .route("/registry/apps/:app/:instance", delete(cancel))
        .route("/registry/apps/:app/:instance/renew", put(renew))
        .route(
            "/registry/apps/:app/:instance/status",
            put(set_status).delete(clear_status),
        )
        .route("/registry/delta", get(delta))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

fn is_replicated(headers: &HeaderMap) -> bool {
    headers.contains_key(REPLICATION_HEADER)
}

fn parse_names(app: &str, instance: &str) -> Result<(AppName, InstanceId), ApiError> {
    let app_name = AppName::new(app).map_err(ApiError::from)?;
    let instance_id = InstanceId::new(instance).map_err(ApiError::from)?;
    Ok((app_name, instance_id))
}

/// Health check endpoint
async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Node status: lease count, preservation state, peer health
///
/// GET /registry/status
async fn registry_status(State(state): State<AppState>) -> Json<RegistryStatusResponse> {
    let lease_count = state.store.lease_count().await;
    let now_ms = state.store.time().now_ms();
    let preservation = state.store.monitor().stats(lease_count, now_ms);
    let (peers, replication_retry_queue_len) = match &state.replication {
        Some(channel) => (channel.peer_stats(), channel.retry_queue_len()),
        None => (vec![], 0),
    };

    Json(RegistryStatusResponse {
        node_id: state.node_id.clone(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        lease_count,
        delta_version: state.store.delta_version().await,
        preservation,
        peers,
        replication_retry_queue_len,
    })
}

/// Register an instance
///
/// POST /registry/apps/{app}
#[instrument(skip(state, headers, request), fields(app = %app), level = "info")]
async fn register(
    State(state): State<AppState>,
    Path(app): Path<String>,
    headers: HeaderMap,
    Json(request): Json<RegisterRequest>,
) -> Result<StatusCode, ApiError> {
    let app_name = AppName::new(&app)?;
    if request.identity.app_name != app_name {
        return Err(ApiError::bad_request(format!(
            "path application '{}' does not match identity application '{}'",
            app_name, request.identity.app_name
        )));
    }

    let duration_ms = request.duration_ms.unwrap_or(state.default_duration_ms);

    if is_replicated(&headers) {
        let now_ms = state.store.time().now_ms();
        let mut lease = Lease::new(
            request.identity,
            request.status,
            duration_ms,
            request.registered_at_ms.unwrap_or(now_ms),
        );
        lease.last_renewal_ms = request.last_renewal_ms.unwrap_or(lease.registered_at_ms);
        state.store.apply_replicated_register(lease).await?;
    } else {
        state
            .store
            .register(request.identity, request.status, duration_ms)
            .await?;
    }

    Ok(StatusCode::NO_CONTENT)
}

/// Renew a lease
///
/// PUT /registry/apps/{app}/{instance}/renew
#[instrument(skip(state, headers), level = "debug")]
async fn renew(
    State(state): State<AppState>,
    Path((app, instance)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    let (app_name, instance_id) = parse_names(&app, &instance)?;

    let renewed = if is_replicated(&headers) {
        state
            .store
            .apply_replicated_renew(&app_name, &instance_id)
            .await
    } else {
        state.store.renew(&app_name, &instance_id).await
    };

    if renewed {
        Ok(StatusCode::OK)
    } else {
        Err(ApiError::not_found("lease", &format!("{}/{}", app_name, instance_id)))
    }
}

/// Cancel a lease
///
/// DELETE /registry/apps/{app}/{instance}
///
/// Idempotent: cancelling an unknown lease is a success.
#[instrument(skip(state, headers), level = "info")]
async fn cancel(
    State(state): State<AppState>,
    Path((app, instance)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    let (app_name, instance_id) = parse_names(&app, &instance)?;

    if is_replicated(&headers) {
        state
            .store
            .apply_replicated_cancel(&app_name, &instance_id)
            .await;
    } else {
        state.store.cancel(&app_name, &instance_id).await;
    }

    Ok(StatusCode::OK)
}

/// Override an instance's status
///
/// PUT /registry/apps/{app}/{instance}/status
#[instrument(skip(state, headers, request), level = "info")]
async fn set_status(
    State(state): State<AppState>,
    Path((app, instance)): Path<(String, String)>,
    headers: HeaderMap,
    Json(request): Json<StatusOverrideRequest>,
) -> Result<Json<Lease>, ApiError> {
    apply_status(&state, &app, &instance, request.status, &headers).await
}

/// Clear a status override, returning the instance to UP
///
/// DELETE /registry/apps/{app}/{instance}/status
#[instrument(skip(state, headers), level = "info")]
async fn clear_status(
    State(state): State<AppState>,
    Path((app, instance)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Json<Lease>, ApiError> {
    apply_status(&state, &app, &instance, InstanceStatus::Up, &headers).await
}

async fn apply_status(
    state: &AppState,
    app: &str,
    instance: &str,
    status: InstanceStatus,
    headers: &HeaderMap,
) -> Result<Json<Lease>, ApiError> {
    let (app_name, instance_id) = parse_names(app, instance)?;

    let updated = if is_replicated(headers) {
        state
            .store
            .apply_replicated_status(&app_name, &instance_id, status)
            .await
    } else {
        state.store.set_status(&app_name, &instance_id, status).await
    };

    updated.map(Json).ok_or_else(|| {
        ApiError::not_found("lease", &format!("{}/{}", app_name, instance_id))
    })
}

/// Full registry view
///
/// GET /registry/apps
async fn full_registry(State(state): State<AppState>) -> Json<FullRegistryResponse> {
    let (applications, version) = state.store.snapshot_full().await;
    Json(FullRegistryResponse {
        applications,
        version,
    })
}

/// One application's instances
///
/// GET /registry/apps/{app}
#[instrument(skip(state), level = "debug")]
async fn application(
    State(state): State<AppState>,
    Path(app): Path<String>,
) -> Result<Json<ApplicationResponse>, ApiError> {
    let app_name = AppName::new(&app)?;

    match state.store.snapshot_application(&app_name).await {
        Some(leases) => Ok(Json(ApplicationResponse {
            name: app_name,
            leases,
        })),
        None => Err(ApiError::not_found("application", &app)),
    }
}

#[derive(Debug, Deserialize)]
struct DeltaQuery {
    /// Last delta version the caller has applied
    #[serde(default)]
    since: u64,
}

/// Deltas since a version
///
/// GET /registry/delta?since=N
///
/// Answers 410 when `since` predates the delta retention window; the
/// caller must fall back to a full fetch.
#[instrument(skip(state), level = "debug")]
async fn delta(
    State(state): State<AppState>,
    Query(query): Query<DeltaQuery>,
) -> Result<Json<DeltaResponse>, ApiError> {
    let (deltas, version) = state.store.deltas_since(query.since).await?;
    Ok(Json(DeltaResponse { deltas, version }))
}

/// API error type that converts to HTTP responses
pub struct ApiError {
    status: StatusCode,
    body: ErrorResponse,
}

impl ApiError {
    pub fn not_found(resource: &str, id: &str) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            body: ErrorResponse::not_found(resource, id),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            body: ErrorResponse::bad_request(message),
        }
    }

    pub fn gone(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::GONE,
            body: ErrorResponse::gone(message),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

impl From<RegistryError> for ApiError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::DeltaExpired { .. } => ApiError::gone(err.to_string()),
            RegistryError::RegistryFull { .. }
            | RegistryError::InvalidIdentity { .. }
            | RegistryError::InvalidAppName { .. }
            | RegistryError::InvalidInstanceId { .. }
            | RegistryError::InvalidLeaseDuration { .. } => ApiError::bad_request(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use beacon_core::{MockClock, PreservationConfig, DELTA_RETENTION_MS_DEFAULT};
    use beacon_registry::{LeaseStore, SelfPreservationMonitor, StoreEvent};
    use std::sync::Arc;
    use tokio::sync::mpsc;
    use tower::ServiceExt;

    fn test_monitor() -> Arc<SelfPreservationMonitor> {
        Arc::new(SelfPreservationMonitor::new(
            &PreservationConfig::default(),
            30_000,
        ))
    }

    fn test_app_with(
        delta_retention_ms: u64,
    ) -> (
        Router,
        Arc<MockClock>,
        mpsc::UnboundedReceiver<StoreEvent>,
    ) {
        let clock = Arc::new(MockClock::new(1_000_000));
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let store = Arc::new(LeaseStore::new(
            clock.clone(),
            test_monitor(),
            delta_retention_ms,
            Some(events_tx),
        ));
        let state = AppState::new(store, None, "test-node", 90_000);
        (router(state), clock, events_rx)
    }

    fn test_app() -> Router {
        test_app_with(DELTA_RETENTION_MS_DEFAULT).0
    }

    fn register_body(app: &str, instance: &str) -> serde_json::Value {
        serde_json::json!({
            "identity": {
                "instance_id": instance,
                "app_name": app,
                "hostname": "host-1",
                "ip_addr": "10.0.0.1",
                "port": 8080
            }
        })
    }

    fn post_json(uri: &str, body: &serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(body).unwrap()))
            .unwrap()
    }

    fn request(method: &str, uri: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    async fn body_json<T: serde::de::DeserializeOwned>(response: Response) -> T {
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn test_register_then_fetch_application() {
        let app = test_app();

        let response = app
            .clone()
            .oneshot(post_json(
                "/registry/apps/orders",
                &register_body("orders", "host-1:8080"),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        // lookups are case-insensitive
        let response = app
            .oneshot(request("GET", "/registry/apps/ORDERS"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let application: ApplicationResponse = body_json(response).await;
        assert_eq!(application.leases.len(), 1);
        assert_eq!(application.leases[0].instance_id().as_str(), "host-1:8080");
    }

    #[tokio::test]
    async fn test_register_rejects_mismatched_app() {
        let app = test_app();

        let response = app
            .oneshot(post_json(
                "/registry/apps/billing",
                &register_body("orders", "host-1:8080"),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_register_rejects_bad_duration() {
        let app = test_app();

        let mut body = register_body("orders", "host-1:8080");
        body["duration_ms"] = serde_json::json!(10);
        let response = app
            .oneshot(post_json("/registry/apps/orders", &body))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_renew_known_and_unknown() {
        let app = test_app();

        let response = app
            .clone()
            .oneshot(request("PUT", "/registry/apps/orders/host-1:8080/renew"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        app.clone()
            .oneshot(post_json(
                "/registry/apps/orders",
                &register_body("orders", "host-1:8080"),
            ))
            .await
            .unwrap();

        let response = app
            .oneshot(request("PUT", "/registry/apps/orders/host-1:8080/renew"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_cancel_is_idempotent() {
        let app = test_app();

        // cancelling a lease that never existed still succeeds
        let response = app
            .clone()
            .oneshot(request("DELETE", "/registry/apps/orders/host-1:8080"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        app.clone()
            .oneshot(post_json(
                "/registry/apps/orders",
                &register_body("orders", "host-1:8080"),
            ))
            .await
            .unwrap();
        let response = app
            .clone()
            .oneshot(request("DELETE", "/registry/apps/orders/host-1:8080"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        // the application is gone once its last lease is cancelled
        let response = app
            .oneshot(request("GET", "/registry/apps/orders"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_status_override_and_clear() {
        let app = test_app();
        app.clone()
            .oneshot(post_json(
                "/registry/apps/orders",
                &register_body("orders", "host-1:8080"),
            ))
            .await
            .unwrap();

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("PUT")
                    .uri("/registry/apps/orders/host-1:8080/status")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"status":"OUT_OF_SERVICE"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let lease: Lease = body_json(response).await;
        assert_eq!(lease.status, InstanceStatus::OutOfService);

        let response = app
            .oneshot(request("DELETE", "/registry/apps/orders/host-1:8080/status"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let lease: Lease = body_json(response).await;
        assert_eq!(lease.status, InstanceStatus::Up);
    }

    #[tokio::test]
    async fn test_full_registry_view() {
        let app = test_app();
        app.clone()
            .oneshot(post_json(
                "/registry/apps/orders",
                &register_body("orders", "host-1:8080"),
            ))
            .await
            .unwrap();
        app.clone()
            .oneshot(post_json(
                "/registry/apps/billing",
                &register_body("billing", "host-2:9090"),
            ))
            .await
            .unwrap();

        let response = app
            .oneshot(request("GET", "/registry/apps"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let registry: FullRegistryResponse = body_json(response).await;
        assert_eq!(registry.applications.len(), 2);
        assert_eq!(registry.version, 2);
    }

    #[tokio::test]
    async fn test_delta_fetch_and_gone() {
        let (app, clock, _events) = test_app_with(1000);

        app.clone()
            .oneshot(post_json(
                "/registry/apps/orders",
                &register_body("orders", "host-1:8080"),
            ))
            .await
            .unwrap();

        let response = app
            .clone()
            .oneshot(request("GET", "/registry/delta?since=0"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let deltas: DeltaResponse = body_json(response).await;
        assert_eq!(deltas.deltas.len(), 1);
        assert_eq!(deltas.version, 1);

        // age the first entry out of retention with a later mutation
        clock.advance(5000);
        app.clone()
            .oneshot(post_json(
                "/registry/apps/orders",
                &register_body("orders", "host-2:8080"),
            ))
            .await
            .unwrap();

        let response = app
            .oneshot(request("GET", "/registry/delta?since=0"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::GONE);
    }

    #[tokio::test]
    async fn test_replicated_mutation_is_not_re_replicated() {
        let (app, _, mut events) = test_app_with(DELTA_RETENTION_MS_DEFAULT);

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/registry/apps/orders")
                    .header("content-type", "application/json")
                    .header(REPLICATION_HEADER, "true")
                    .body(Body::from(
                        serde_json::to_vec(&register_body("orders", "host-1:8080")).unwrap(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert!(events.try_recv().is_err());

        // the same mutation from a client does fan out
        app.oneshot(post_json(
            "/registry/apps/orders",
            &register_body("orders", "host-2:8080"),
        ))
        .await
        .unwrap();
        assert!(matches!(
            events.try_recv(),
            Ok(StoreEvent::Registered(_))
        ));
    }

    #[tokio::test]
    async fn test_replicated_register_last_writer_wins() {
        let (app, _, _events) = test_app_with(DELTA_RETENTION_MS_DEFAULT);

        // local register at mock time 1_000_000
        app.clone()
            .oneshot(post_json(
                "/registry/apps/orders",
                &register_body("orders", "host-1:8080"),
            ))
            .await
            .unwrap();

        // replicated register with an older registration timestamp loses
        let mut body = register_body("orders", "host-1:8080");
        body["status"] = serde_json::json!("DOWN");
        body["registered_at_ms"] = serde_json::json!(500);
        body["last_renewal_ms"] = serde_json::json!(500);
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/registry/apps/orders")
                    .header("content-type", "application/json")
                    .header(REPLICATION_HEADER, "true")
                    .body(Body::from(serde_json::to_vec(&body).unwrap()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = app
            .oneshot(request("GET", "/registry/apps/orders"))
            .await
            .unwrap();
        let application: ApplicationResponse = body_json(response).await;
        assert_eq!(application.leases[0].status, InstanceStatus::Up);
        assert_eq!(application.leases[0].registered_at_ms, 1_000_000);
    }

    #[tokio::test]
    async fn test_health_and_status() {
        let app = test_app();

        let response = app
            .clone()
            .oneshot(request("GET", "/health"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(request("GET", "/registry/status"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let status: serde_json::Value = body_json(response).await;
        assert_eq!(status["node_id"], "test-node");
        assert_eq!(status["lease_count"], 0);
        assert_eq!(status["preservation"]["enabled"], true);
    }
}
