//! HTTP surface for the read path.

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use mys_growth_app::{KvBackend, MemberSource, RESPONSE_HEADERS, ReadService, handle_read};
use serde_json::json;

/// Router answering `GET /` and `GET /data` with the cached series.
pub fn router<B, S>(service: ReadService<B, S>) -> Router
where
    B: KvBackend + 'static,
    S: MemberSource + 'static,
{
    Router::new()
        .route("/", get(read_series::<B, S>))
        .route("/data", get(read_series::<B, S>))
        .with_state(service)
}

async fn read_series<B, S>(State(service): State<ReadService<B, S>>) -> Response
where
    B: KvBackend + 'static,
    S: MemberSource + 'static,
{
    match handle_read(&service).await {
        Ok(response) => (StatusCode::OK, RESPONSE_HEADERS, response.body).into_response(),
        Err(err) => {
            let body = json!({ "error": err.to_string(), "kind": err.kind() }).to_string();
            (StatusCode::INTERNAL_SERVER_ERROR, RESPONSE_HEADERS, body).into_response()
        }
    }
}
