use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use pantry_service::{
	Error as ServiceError, SearchRequest, SearchResponse,
	admin::{BackfillReport, SemanticDebugReport},
	freshness::{RefreshOptions, RefreshReport},
};

use crate::state::AppState;

pub fn router(state: AppState) -> Router {
	Router::new()
		.route("/health", get(health))
		.route("/v1/search", post(search))
		.with_state(state)
}

pub fn admin_router(state: AppState) -> Router {
	Router::new()
		.route("/v1/admin/refresh_embeddings", post(refresh_embeddings))
		.route("/v1/admin/backfill_ingredient_tokens", post(backfill_ingredient_tokens))
		.route("/v1/admin/semantic_debug", post(semantic_debug))
		.route("/v1/admin/backfill_last_cooked", post(backfill_last_cooked))
		.with_state(state)
}

async fn health() -> StatusCode {
	StatusCode::OK
}

async fn search(
	State(state): State<AppState>,
	Json(payload): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, ApiError> {
	let response = state.service.search(payload).await?;
	Ok(Json(response))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshEmbeddingsRequest {
	limit: Option<u32>,
	force: Option<bool>,
	model: Option<String>,
	max_chars: Option<u32>,
}

async fn refresh_embeddings(
	State(state): State<AppState>,
	headers: HeaderMap,
	Json(payload): Json<RefreshEmbeddingsRequest>,
) -> Result<Json<RefreshReport>, ApiError> {
	require_admin(state.admin_token.as_deref(), &headers)?;
	let opts = RefreshOptions {
		limit: payload.limit,
		force: payload.force.unwrap_or(false),
		model: payload.model,
		max_chars: payload.max_chars,
	};
	let report = state.service.refresh_embeddings(&opts).await?;
	Ok(Json(report))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BackfillTokensRequest {
	limit: Option<u32>,
	dry_run: Option<bool>,
}

async fn backfill_ingredient_tokens(
	State(state): State<AppState>,
	headers: HeaderMap,
	Json(payload): Json<BackfillTokensRequest>,
) -> Result<Json<BackfillReport>, ApiError> {
	require_admin(state.admin_token.as_deref(), &headers)?;
	let report = state
		.service
		.backfill_ingredient_tokens(payload.limit, payload.dry_run.unwrap_or(false))
		.await?;
	Ok(Json(report))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SemanticDebugRequest {
	q: String,
	scope: Option<String>,
	limit: Option<u32>,
}

async fn semantic_debug(
	State(state): State<AppState>,
	headers: HeaderMap,
	Json(payload): Json<SemanticDebugRequest>,
) -> Result<Json<SemanticDebugReport>, ApiError> {
	require_admin(state.admin_token.as_deref(), &headers)?;
	let report = state
		.service
		.semantic_debug(&payload.q, payload.scope.as_deref(), payload.limit)
		.await?;
	Ok(Json(report))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BackfillCookedRequest {
	limit: Option<u32>,
}

async fn backfill_last_cooked(
	State(state): State<AppState>,
	headers: HeaderMap,
	Json(payload): Json<BackfillCookedRequest>,
) -> Result<Json<BackfillReport>, ApiError> {
	require_admin(state.admin_token.as_deref(), &headers)?;
	let report = state.service.backfill_last_cooked(payload.limit).await?;
	Ok(Json(report))
}

fn require_admin(token: Option<&str>, headers: &HeaderMap) -> Result<(), ApiError> {
	// The admin bind is loopback-only; a configured token adds a second check.
	let Some(expected) = token else {
		return Ok(());
	};
	let provided = headers.get("x-admin-token").and_then(|value| value.to_str().ok());

	if provided == Some(expected) {
		Ok(())
	} else {
		Err(ApiError::new(
			StatusCode::UNAUTHORIZED,
			"unauthorized",
			"Missing or invalid x-admin-token header.",
		))
	}
}

#[derive(Debug, Serialize)]
struct ErrorBody {
	error_code: String,
	message: String,
}

#[derive(Debug)]
pub struct ApiError {
	status: StatusCode,
	error_code: String,
	message: String,
}

impl ApiError {
	fn new(status: StatusCode, error_code: impl Into<String>, message: impl Into<String>) -> Self {
		Self { status, error_code: error_code.into(), message: message.into() }
	}
}

impl From<ServiceError> for ApiError {
	fn from(err: ServiceError) -> Self {
		let message = err.to_string();
		let (status, code) = match err {
			ServiceError::InvalidRequest { .. } =>
				(StatusCode::BAD_REQUEST, "invalid_request"),
			ServiceError::Unauthorized { .. } => (StatusCode::UNAUTHORIZED, "unauthorized"),
			ServiceError::RateLimited { .. } =>
				(StatusCode::INTERNAL_SERVER_ERROR, "provider_rate_limited"),
			ServiceError::Provider { .. } =>
				(StatusCode::INTERNAL_SERVER_ERROR, "provider_error"),
			ServiceError::Storage { .. } =>
				(StatusCode::INTERNAL_SERVER_ERROR, "storage_error"),
			ServiceError::Qdrant { .. } =>
				(StatusCode::INTERNAL_SERVER_ERROR, "vector_store_error"),
		};

		ApiError::new(status, code, message)
	}
}

impl IntoResponse for ApiError {
	fn into_response(self) -> Response {
		let body = ErrorBody { error_code: self.error_code, message: self.message };
		(self.status, Json(body)).into_response()
	}
}
