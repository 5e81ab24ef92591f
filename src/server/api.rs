use crate::append::AppendEngine;
use crate::ingress::{ self, MAX_PAYLOAD_BYTES };
use crate::models::api::Accepted;
use super::error::ApiError;
use axum::{
    routing::{ get, post },
    Router,
    Json,
    body::Bytes,
    extract::{ DefaultBodyLimit, Request, State },
    middleware::{ from_fn, from_fn_with_state, Next },
    response::{ IntoResponse, Response },
    http::{ Method, StatusCode },
};
use governor::{ RateLimiter, Quota, state::{ InMemoryState, NotKeyed }, clock::DefaultClock };
use log::info;
use serde_json::{ json, Value as JsonValue };
use std::num::NonZeroU32;
use std::sync::Arc;
use tower_http::cors::{ Any, CorsLayer };

pub const API_KEY_HEADER: &str = "x-api-key";

// Bodies up to this size are read so that oversized payloads get a JSON 413
// from validation rather than a bare rejection from the extractor.
const BODY_READ_LIMIT: usize = 2 * MAX_PAYLOAD_BYTES;

type Limiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

#[derive(Clone)]
pub struct AppState {
    engine: Arc<AppendEngine>,
    api_key: Option<Arc<str>>,
    limiter: Option<Arc<Limiter>>,
}

impl AppState {
    /// A blank `api_key` disables authentication; a zero rate disables limiting.
    pub fn new(engine: Arc<AppendEngine>, api_key: Option<String>, rate_limit_per_second: u32) -> Self {
        let api_key = api_key.filter(|k| !k.trim().is_empty()).map(Arc::from);
        let limiter = NonZeroU32::new(rate_limit_per_second).map(|n|
            Arc::new(RateLimiter::direct(Quota::per_second(n)))
        );
        Self { engine, api_key, limiter }
    }

    pub fn requires_api_key(&self) -> bool {
        self.api_key.is_some()
    }
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    let conversations = post(submit_conversation)
        .route_layer(from_fn_with_state(state.clone(), throttle))
        .route_layer(from_fn_with_state(state.clone(), require_api_key));

    let routes = Router::new()
        .route("/health", get(health))
        .route("/conversations", conversations);

    Router::new()
        .merge(routes.clone())
        .nest("/api", routes)
        .layer(DefaultBodyLimit::max(BODY_READ_LIMIT))
        .layer(cors)
        .layer(from_fn(no_content_for_options))
        .with_state(state)
}

async fn health() -> Json<JsonValue> {
    Json(json!({ "status": "ok" }))
}

async fn submit_conversation(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let record = ingress::accept(&body)?;
    let receipt = state.engine.append(&record).await?;
    info!(
        "Accepted conversation {} ({}, {} turns) after {} attempt(s)",
        record.conversation_id(),
        record.payload.platform,
        record.num_turns,
        receipt.attempts
    );
    Ok((StatusCode::ACCEPTED, Json(Accepted::new(record.conversation_id()))))
}

async fn require_api_key(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if let Some(expected) = &state.api_key {
        let provided = req
            .headers()
            .get(API_KEY_HEADER)
            .and_then(|v| v.to_str().ok());
        if provided != Some(expected.as_ref()) {
            return Err(ApiError::Unauthorized);
        }
    }
    Ok(next.run(req).await)
}

async fn throttle(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if let Some(limiter) = &state.limiter {
        if limiter.check().is_err() {
            return Err(ApiError::RateLimited);
        }
    }
    Ok(next.run(req).await)
}

/// The CORS layer answers every OPTIONS request itself with a 200; reply 204 instead.
async fn no_content_for_options(req: Request, next: Next) -> Response {
    let is_options = req.method() == Method::OPTIONS;
    let mut resp = next.run(req).await;
    if is_options && resp.status() == StatusCode::OK {
        *resp.status_mut() = StatusCode::NO_CONTENT;
    }
    resp
}
