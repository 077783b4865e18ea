#![forbid(unsafe_code)]

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use phaseout_os::ServiceError;

use crate::{parse_payload, parse_result_id, AdapterRuntime, ErrorBody};

pub type SharedRuntime = Arc<AdapterRuntime>;

#[derive(Debug, Default, Deserialize)]
pub struct StatusQuery {
    pub result_id: Option<String>,
}

pub fn router(runtime: SharedRuntime) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/param_submit", post(param_submit))
        .route("/api/param_lookup", post(param_lookup))
        .route("/api/find_param_sets", post(find_param_sets))
        .route("/api/check_results_status", get(check_results_status))
        .with_state(runtime)
}

pub fn status_code_for(err: &ServiceError) -> StatusCode {
    match err {
        ServiceError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
        ServiceError::TransactionConflict => StatusCode::CONFLICT,
        ServiceError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

pub async fn healthz(State(runtime): State<SharedRuntime>) -> Response {
    let out = on_blocking_pool(runtime, |rt| rt.health_report()).await;
    respond("healthz", out)
}

pub async fn param_submit(State(runtime): State<SharedRuntime>, body: Bytes) -> Response {
    let out = match parse_payload(&body) {
        Ok(payload) => on_blocking_pool(runtime, move |rt| rt.submit(&payload)).await,
        Err(err) => Err(err),
    };
    respond("param_submit", out)
}

pub async fn param_lookup(State(runtime): State<SharedRuntime>, body: Bytes) -> Response {
    let out = match parse_payload(&body) {
        Ok(payload) => on_blocking_pool(runtime, move |rt| rt.lookup(&payload)).await,
        Err(err) => Err(err),
    };
    respond("param_lookup", out)
}

pub async fn find_param_sets(State(runtime): State<SharedRuntime>, body: Bytes) -> Response {
    let out = match parse_payload(&body) {
        Ok(payload) => on_blocking_pool(runtime, move |rt| rt.find_param_sets(&payload)).await,
        Err(err) => Err(err),
    };
    respond("find_param_sets", out)
}

pub async fn check_results_status(
    State(runtime): State<SharedRuntime>,
    Query(query): Query<StatusQuery>,
) -> Response {
    let result_id = parse_result_id(query.result_id.as_deref());
    let out = on_blocking_pool(runtime, move |rt| rt.check_results_status(result_id)).await;
    respond("check_results_status", out)
}

/// Store calls may sleep while waiting for the write lock, so they leave the async workers.
async fn on_blocking_pool<T, F>(runtime: SharedRuntime, f: F) -> Result<T, ServiceError>
where
    T: Send + 'static,
    F: FnOnce(&AdapterRuntime) -> Result<T, ServiceError> + Send + 'static,
{
    tokio::task::spawn_blocking(move || f(&runtime))
        .await
        .map_err(|err| ServiceError::StoreUnavailable(format!("request worker failed: {err}")))?
}

fn respond<T: Serialize>(route: &str, out: Result<T, ServiceError>) -> Response {
    match out {
        Ok(body) => (StatusCode::OK, Json(body)).into_response(),
        Err(err) => {
            let code = status_code_for(&err);
            if code.is_server_error() {
                warn!("{route} failed ({}): {err}", code.as_u16());
            } else {
                debug!("{route} rejected ({}): {err}", code.as_u16());
            }
            (
                code,
                Json(ErrorBody {
                    error: err.to_string(),
                }),
            )
                .into_response()
        }
    }
}
