use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::clients::AwsClients;
use crate::cloudwatch::CloudWatchManager;
use crate::config::Config;
use crate::orchestrator::Orchestrator;
use crate::s3::S3Manager;
use crate::schedule::{ScheduleAction, ScheduleManager};

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub orchestrator: Orchestrator,
    pub schedules: ScheduleManager,
    pub cloudwatch: CloudWatchManager,
    pub s3: S3Manager,
}

impl AppState {
    pub fn new(config: &Config, clients: &AwsClients) -> Self {
        Self {
            orchestrator: Orchestrator::new(config, clients),
            schedules: ScheduleManager::new(clients, config),
            cloudwatch: CloudWatchManager::new(clients),
            s3: S3Manager::new(clients),
        }
    }
}

pub type SharedState = Arc<AppState>;

// ── Request/response payload types ────────────────────────────────────

#[derive(Deserialize)]
pub struct CreateScheduleRequest {
    pub name: String,
    pub expression: String,
    pub action: String,
}

#[derive(Serialize)]
pub struct CreateScheduleResponse {
    pub name: String,
    pub expression: String,
    pub action: String,
}

#[derive(Serialize)]
pub struct DeletedResponse {
    pub deleted: String,
}

// ── Error handling ────────────────────────────────────────────────────

/// Errors surfaced to HTTP callers. Partial per-kind failures are not
/// errors here: they come back inside a 200 body. Only the production
/// guard (403) and unexpected top-level failures (500) are non-200.
pub enum ApiError {
    Forbidden(String),
    BadRequest(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::Internal(format!("{err:#}"))
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/shutdown", post(shutdown))
        .route("/startup", post(startup))
        .route("/status", get(status))
        .route("/schedule", get(list_schedules).post(create_schedule))
        .route("/schedule/{name}", delete(delete_schedule))
        .route("/cloudwatch/analyze", get(cloudwatch_analyze))
        .route("/cloudwatch/optimize", post(cloudwatch_optimize))
        .route("/cloudwatch/alarms", get(cloudwatch_alarms))
        .route("/s3/analyze", get(s3_analyze))
        .route("/s3/optimize", post(s3_optimize))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health() -> StatusCode {
    StatusCode::OK
}

async fn shutdown(State(state): State<SharedState>) -> Result<impl IntoResponse, ApiError> {
    match state.orchestrator.shutdown_resources().await {
        Ok(result) => Ok(Json(result)),
        // The production guard is the only error the orchestrator raises.
        Err(err) => Err(ApiError::Forbidden(format!("{err:#}"))),
    }
}

async fn startup(State(state): State<SharedState>) -> Result<impl IntoResponse, ApiError> {
    match state.orchestrator.startup_resources().await {
        Ok(result) => Ok(Json(result)),
        Err(err) => Err(ApiError::Forbidden(format!("{err:#}"))),
    }
}

async fn status(State(state): State<SharedState>) -> impl IntoResponse {
    Json(state.orchestrator.get_resource_status().await)
}

async fn list_schedules(State(state): State<SharedState>) -> Result<impl IntoResponse, ApiError> {
    let schedules = state.schedules.list().await?;
    Ok(Json(schedules))
}

async fn create_schedule(
    State(state): State<SharedState>,
    Json(request): Json<CreateScheduleRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let action: ScheduleAction = request
        .action
        .parse()
        .map_err(|err: anyhow::Error| ApiError::BadRequest(err.to_string()))?;

    if !state.schedules.is_configured() {
        return Err(ApiError::BadRequest(
            "schedule target is not configured (SCHEDULE_TARGET_ARN, SCHEDULE_ROLE_ARN)".to_string(),
        ));
    }

    state
        .schedules
        .create(&request.name, &request.expression, action)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(CreateScheduleResponse {
            name: request.name,
            expression: request.expression,
            action: action.to_string(),
        }),
    ))
}

async fn delete_schedule(
    State(state): State<SharedState>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state.schedules.delete(&name).await?;
    Ok(Json(DeletedResponse { deleted: name }))
}

async fn cloudwatch_analyze(
    State(state): State<SharedState>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.cloudwatch.analyze().await?))
}

async fn cloudwatch_optimize(
    State(state): State<SharedState>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.cloudwatch.optimize().await?))
}

async fn cloudwatch_alarms(
    State(state): State<SharedState>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.cloudwatch.alarms().await?))
}

async fn s3_analyze(State(state): State<SharedState>) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.s3.analyze().await?))
}

async fn s3_optimize(State(state): State<SharedState>) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.s3.optimize().await?))
}

// ── Server ────────────────────────────────────────────────────────────

pub async fn serve(config: Config, clients: AwsClients) -> Result<()> {
    let port = config.port;
    let state = Arc::new(AppState::new(&config, &clients));
    let app = router(state);

    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    info!(addr = %listener.local_addr()?, "Resource manager listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("Server shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "Failed to install Ctrl+C handler");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn test_state(environment: &str) -> SharedState {
        let sdk_config = aws_config::SdkConfig::builder()
            .behavior_version(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new("eu-west-1"))
            .build();
        let clients = AwsClients::from_config(&sdk_config);

        let environment = environment.to_string();
        let config = Config::from_lookup(|name| match name {
            "ENVIRONMENT" => Some(environment.clone()),
            "AWS_REGION" => Some("eu-west-1".to_string()),
            "PROJECT_NAME" => Some("legitmark".to_string()),
            _ => None,
        })
        .unwrap();

        Arc::new(AppState::new(&config, &clients))
    }

    #[tokio::test]
    async fn health_returns_ok() {
        let app = router(test_state("dev"));
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn unknown_route_is_not_found() {
        let app = router(test_state("dev"));
        let response = app
            .oneshot(Request::builder().uri("/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn shutdown_is_forbidden_in_prod() {
        let app = router(test_state("prod"));
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/shutdown")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert!(body["error"].as_str().unwrap().contains("prod"));
    }

    #[tokio::test]
    async fn startup_is_forbidden_in_prod() {
        let app = router(test_state("prod"));
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/startup")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn create_schedule_rejects_unknown_action() {
        let app = router(test_state("dev"));
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/schedule")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        serde_json::json!({
                            "name": "nightly-stop",
                            "expression": "cron(0 20 * * ? *)",
                            "action": "reboot"
                        })
                        .to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn create_schedule_requires_target_configuration() {
        let app = router(test_state("dev"));
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/schedule")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        serde_json::json!({
                            "name": "nightly-stop",
                            "expression": "cron(0 20 * * ? *)",
                            "action": "shutdown"
                        })
                        .to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert!(body["error"].as_str().unwrap().contains("SCHEDULE_TARGET_ARN"));
    }
}
