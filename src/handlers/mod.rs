//! HTTP admission layer: parses client requests into orchestrator calls.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::error;
use uuid::Uuid;
use validator::Validate;

use crate::error::OrchestrationError;
use crate::AppState;

pub fn api_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/v1/sagas", post(create_saga))
        .route("/api/v1/sagas/:saga_id", get(get_saga))
        .route("/api/v1/sagas/:saga_id/executions", post(create_saga_execution))
        .route(
            "/api/v1/sagas/:saga_id/executions/:execution_id",
            get(get_saga_execution),
        )
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

/// Error envelope returned to clients as `{"error": ...}`.
struct ApiError {
    status: StatusCode,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(serde_json::json!({ "error": self.message })),
        )
            .into_response()
    }
}

impl From<OrchestrationError> for ApiError {
    fn from(err: OrchestrationError) -> Self {
        let status = match &err {
            OrchestrationError::InvalidJsonSchema
            | OrchestrationError::PayloadValidation(_)
            | OrchestrationError::EmptySteps => StatusCode::BAD_REQUEST,
            OrchestrationError::SagaNotFound(_)
            | OrchestrationError::ExecutionNotFound(_)
            | OrchestrationError::Repository { .. }
            | OrchestrationError::Dispatch { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            error!("request failed: {err}");
        }

        ApiError {
            status,
            message: err.to_string(),
        }
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(errors: validator::ValidationErrors) -> Self {
        ApiError {
            status: StatusCode::BAD_REQUEST,
            message: errors.to_string(),
        }
    }
}

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "orchestration-service",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": Utc::now()
    }))
}

#[derive(Debug, Deserialize, Validate)]
struct CreateSagaRequest {
    #[validate(required, length(min = 1))]
    name: Option<String>,
    #[validate(required)]
    payload: Option<serde_json::Value>,
    #[validate(required, length(min = 1), nested)]
    steps: Option<Vec<CreateSagaStepRequest>>,
}

#[derive(Debug, Deserialize, Serialize, Validate)]
struct CreateSagaStepRequest {
    #[validate(required, length(min = 1))]
    name: Option<String>,
}

#[derive(Debug, Serialize)]
struct CreateSagaResponse {
    id: Uuid,
    name: String,
    created_at: DateTime<Utc>,
}

async fn create_saga(
    State(state): State<AppState>,
    Json(request): Json<CreateSagaRequest>,
) -> Result<(StatusCode, Json<CreateSagaResponse>), ApiError> {
    request.validate()?;

    let step_names = request
        .steps
        .unwrap_or_default()
        .into_iter()
        .map(|step| step.name.unwrap_or_default())
        .collect();
    let saga = state
        .orchestrator
        .create_saga(
            request.name.unwrap_or_default(),
            request.payload.unwrap_or(serde_json::Value::Null),
            step_names,
        )
        .await?;

    let response = CreateSagaResponse {
        id: saga.saga_id,
        name: saga.name,
        created_at: saga.created_at,
    };
    Ok((StatusCode::CREATED, Json(response)))
}

#[derive(Debug, Serialize)]
struct GetSagaResponse {
    saga_id: Uuid,
    name: String,
    formatted_name: String,
    payload: serde_json::Value,
    created_at: DateTime<Utc>,
}

async fn get_saga(
    State(state): State<AppState>,
    Path(saga_id): Path<Uuid>,
) -> Result<Json<GetSagaResponse>, ApiError> {
    let saga = state.orchestrator.get_saga_by_id(saga_id).await?;

    Ok(Json(GetSagaResponse {
        saga_id: saga.saga_id,
        name: saga.name,
        formatted_name: saga.formatted_name,
        payload: saga.payload_schema,
        created_at: saga.created_at,
    }))
}

#[derive(Debug, Deserialize, Validate)]
struct CreateSagaExecutionRequest {
    #[validate(required)]
    payload: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
struct CreateSagaExecutionResponse {
    saga_execution_id: Uuid,
    started_at: DateTime<Utc>,
}

async fn create_saga_execution(
    State(state): State<AppState>,
    Path(saga_id): Path<Uuid>,
    Json(request): Json<CreateSagaExecutionRequest>,
) -> Result<(StatusCode, Json<CreateSagaExecutionResponse>), ApiError> {
    request.validate()?;

    let execution = state
        .orchestrator
        .create_saga_execution(
            saga_id,
            request.payload.unwrap_or(serde_json::Value::Null),
        )
        .await?;

    let response = CreateSagaExecutionResponse {
        saga_execution_id: execution.saga_execution_id,
        started_at: execution.created_at,
    };
    Ok((StatusCode::CREATED, Json(response)))
}

#[derive(Debug, Serialize)]
struct GetSagaExecutionResponse {
    saga_execution_id: Uuid,
    saga_id: Uuid,
    payload: serde_json::Value,
    steps: Vec<GetSagaExecutionStepResponse>,
}

#[derive(Debug, Serialize)]
struct GetSagaExecutionStepResponse {
    name: String,
    status: String,
}

async fn get_saga_execution(
    State(state): State<AppState>,
    Path((_saga_id, execution_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<GetSagaExecutionResponse>, ApiError> {
    let details = state.orchestrator.get_saga_execution(execution_id).await?;

    let steps = details
        .steps
        .into_iter()
        .map(|step| GetSagaExecutionStepResponse {
            name: step.name,
            status: step.status.to_string(),
        })
        .collect();

    Ok(Json(GetSagaExecutionResponse {
        saga_execution_id: details.execution.saga_execution_id,
        saga_id: details.execution.saga_id,
        payload: details.execution.payload,
        steps,
    }))
}
