//! Axum router construction and middleware.
//!
//! The [`app`] function wires every API endpoint to its handler and
//! returns a ready-to-serve [`axum::Router`].  Three layers wrap the
//! routes, innermost first: bearer-token auth (before any body is
//! read), request context (request id, `Server` header, request log),
//! and RED metrics.

use axum::body::{Body, Bytes};
use axum::extract::{DefaultBodyLimit, Path, Query, Request, State};
use axum::http::{header, HeaderMap, HeaderValue};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{delete, get, post, put};
use axum::{Extension, Router};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

use crate::errors::{generate_request_id, ApiError};
use crate::handlers;
use crate::metrics::{metrics_handler, metrics_middleware};
use crate::AppState;

/// Per-request context created before routing and auth.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// UUID-v4 id attached to the response, the log line, and any
    /// error envelope.
    pub request_id: String,
}

/// Paths that bypass authentication.
const PUBLIC_PATHS: &[&str] = &["/healthz", "/readyz", "/metrics"];

/// Build the axum [`Router`] with all API routes.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz_route))
        .route("/readyz", get(readyz_route))
        .route("/metrics", get(metrics_handler))
        .route(
            "/v1/buckets",
            post(create_bucket_route).get(list_buckets_route),
        )
        .route(
            "/v1/buckets/:bucket/objects",
            get(list_objects_route).post(upload_object_alias_route),
        )
        .route(
            "/v1/buckets/:bucket/objects/:object",
            put(put_object_route)
                .get(get_object_route)
                .delete(delete_object_route),
        )
        .route(
            "/v1/buckets/:bucket/multipart-uploads",
            post(initiate_multipart_route),
        )
        .route(
            "/v1/buckets/:bucket/multipart-uploads/:upload_id",
            delete(abort_multipart_route),
        )
        .route(
            "/v1/buckets/:bucket/multipart-uploads/:upload_id/parts",
            get(list_parts_route),
        )
        .route(
            "/v1/buckets/:bucket/multipart-uploads/:upload_id/parts/:part_number",
            put(upload_part_route),
        )
        .route(
            "/v1/buckets/:bucket/multipart-uploads/:upload_id/complete",
            post(complete_multipart_route),
        )
        .fallback(fallback_route)
        .with_state(state.clone())
        // Layer ordering: inner layers run last. Auth must see the
        // request context, so the context middleware wraps it.
        .layer(middleware::from_fn_with_state(state, auth_middleware))
        .layer(middleware::from_fn(request_context_middleware))
        .layer(middleware::from_fn(metrics_middleware))
        // Handlers enforce their own byte caps with enveloped errors.
        .layer(DefaultBodyLimit::disable())
}

// -- Request context middleware ----------------------------------------------

/// Assign a request id, stamp the standard response headers, and emit
/// the structured request log line.
async fn request_context_middleware(mut req: Request, next: Next) -> Response {
    let ctx = RequestContext {
        request_id: generate_request_id(),
    };
    let method = req.method().to_string();
    let target = req.uri().to_string();
    req.extensions_mut().insert(ctx.clone());

    let start = Instant::now();
    let mut response = next.run(req).await;
    let latency_ms = start.elapsed().as_millis() as u64;

    let headers = response.headers_mut();
    headers.insert(header::SERVER, HeaderValue::from_static("NebulaFS"));
    if !headers.contains_key("x-request-id") {
        if let Ok(value) = ctx.request_id.parse() {
            headers.insert("x-request-id", value);
        }
    }

    info!(
        request_id = %ctx.request_id,
        %method,
        %target,
        status = response.status().as_u16(),
        latency_ms,
        "request"
    );
    response
}

// -- Auth middleware ---------------------------------------------------------

/// Extract the token from `Authorization: Bearer <token>`.
fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?.trim();
    if value.len() < 7 || !value[..7].eq_ignore_ascii_case("bearer ") {
        return None;
    }
    Some(value[7..].trim().to_string())
}

/// Bearer-token middleware.  Runs before handlers read any body so
/// unauthorized uploads are never buffered or written to disk.
async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Response {
    if !state.config.auth.enabled || PUBLIC_PATHS.contains(&req.uri().path()) {
        return next.run(req).await;
    }

    let request_id = req
        .extensions()
        .get::<RequestContext>()
        .map(|ctx| ctx.request_id.clone())
        .unwrap_or_else(generate_request_id);

    let token = match bearer_token(req.headers()) {
        Some(token) if !token.is_empty() => token,
        _ => {
            return ApiError::Unauthorized("missing bearer token".to_string())
                .into_response_with(&request_id)
        }
    };

    match state.verifier.verify(&token).await {
        Ok(claims) => {
            debug!(request_id = %request_id, subject = %claims.subject, "bearer token accepted");
            req.extensions_mut().insert(claims);
            next.run(req).await
        }
        Err(e) => ApiError::Unauthorized(e.to_string()).into_response_with(&request_id),
    }
}

// -- Route wrappers ----------------------------------------------------------

/// Buffer a request body up to the configured cap, rendering the 413
/// envelope on excess.
async fn read_body(state: &AppState, ctx: &RequestContext, body: Body) -> Result<Bytes, Response> {
    axum::body::to_bytes(body, state.config.server.limits.max_body_bytes as usize)
        .await
        .map_err(|_| ApiError::BodyTooLarge.into_response_with(&ctx.request_id))
}

async fn healthz_route(Extension(ctx): Extension<RequestContext>) -> Response {
    handlers::health::healthz(&ctx.request_id)
}

async fn readyz_route(Extension(ctx): Extension<RequestContext>) -> Response {
    handlers::health::readyz(&ctx.request_id)
}

async fn fallback_route(Extension(ctx): Extension<RequestContext>) -> Response {
    ApiError::RouteNotFound.into_response_with(&ctx.request_id)
}

async fn create_bucket_route(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    body: Body,
) -> Response {
    let body = match read_body(&state, &ctx, body).await {
        Ok(body) => body,
        Err(response) => return response,
    };
    handlers::bucket::create_bucket(&state, &body)
        .await
        .unwrap_or_else(|err| err.into_response_with(&ctx.request_id))
}

async fn list_buckets_route(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
) -> Response {
    handlers::bucket::list_buckets(&state)
        .await
        .unwrap_or_else(|err| err.into_response_with(&ctx.request_id))
}

async fn list_objects_route(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    Path(bucket): Path<String>,
    Query(query): Query<handlers::object::ListObjectsQuery>,
) -> Response {
    handlers::object::list_objects(&state, &bucket, query.prefix.as_deref().unwrap_or(""))
        .await
        .unwrap_or_else(|err| err.into_response_with(&ctx.request_id))
}

#[derive(Debug, Deserialize)]
struct UploadAliasQuery {
    #[serde(default)]
    name: Option<String>,
}

/// `POST /v1/buckets/{bucket}/objects?name=<o>` -- upload alias.
async fn upload_object_alias_route(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    Path(bucket): Path<String>,
    Query(query): Query<UploadAliasQuery>,
    body: Body,
) -> Response {
    let Some(name) = query.name.filter(|name| !name.is_empty()) else {
        return ApiError::MissingName.into_response_with(&ctx.request_id);
    };
    handlers::object::put_object(&state, &bucket, &name, body)
        .await
        .unwrap_or_else(|err| err.into_response_with(&ctx.request_id))
}

async fn put_object_route(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    Path((bucket, object)): Path<(String, String)>,
    body: Body,
) -> Response {
    handlers::object::put_object(&state, &bucket, &object, body)
        .await
        .unwrap_or_else(|err| err.into_response_with(&ctx.request_id))
}

async fn get_object_route(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    Path((bucket, object)): Path<(String, String)>,
    headers: HeaderMap,
) -> Response {
    handlers::object::get_object(&state, &bucket, &object, &headers)
        .await
        .unwrap_or_else(|err| err.into_response_with(&ctx.request_id))
}

async fn delete_object_route(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    Path((bucket, object)): Path<(String, String)>,
) -> Response {
    handlers::object::delete_object(&state, &bucket, &object)
        .await
        .unwrap_or_else(|err| err.into_response_with(&ctx.request_id))
}

async fn initiate_multipart_route(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    Path(bucket): Path<String>,
    body: Body,
) -> Response {
    let body = match read_body(&state, &ctx, body).await {
        Ok(body) => body,
        Err(response) => return response,
    };
    handlers::multipart::initiate(&state, &bucket, &body)
        .await
        .unwrap_or_else(|err| err.into_response_with(&ctx.request_id))
}

async fn upload_part_route(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    Path((bucket, upload_id, part_number)): Path<(String, String, String)>,
    body: Body,
) -> Response {
    handlers::multipart::upload_part(&state, &bucket, &upload_id, &part_number, body)
        .await
        .unwrap_or_else(|err| err.into_response_with(&ctx.request_id))
}

async fn list_parts_route(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    Path((bucket, upload_id)): Path<(String, String)>,
) -> Response {
    handlers::multipart::list_parts(&state, &bucket, &upload_id)
        .await
        .unwrap_or_else(|err| err.into_response_with(&ctx.request_id))
}

async fn complete_multipart_route(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    Path((bucket, upload_id)): Path<(String, String)>,
    body: Body,
) -> Response {
    let body = match read_body(&state, &ctx, body).await {
        Ok(body) => body,
        Err(response) => return response,
    };
    handlers::multipart::complete(&state, &bucket, &upload_id, &body)
        .await
        .unwrap_or_else(|err| err.into_response_with(&ctx.request_id))
}

async fn abort_multipart_route(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    Path((bucket, upload_id)): Path<(String, String)>,
) -> Response {
    handlers::multipart::abort(&state, &bucket, &upload_id)
        .await
        .unwrap_or_else(|err| err.into_response_with(&ctx.request_id))
}

// -- Tests --------------------------------------------------------------------
