use actix_web::http::header;
use actix_web::{web, HttpResponse, Responder};
use futures_util::StreamExt;
use log::{error, info, warn};
use serde_json::json;
use std::convert::Infallible;
use tera::{Context, Tera};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::RelayError;
use crate::web::relay::{self, RelayOutcome};
use crate::web::validate::parse_chat_request;
use crate::web::AppState;

// Index page handler
pub async fn index(tera: web::Data<Tera>, state: web::Data<AppState>) -> impl Responder {
    let mut context = Context::new();
    context.insert("default_model", &state.config.default_model);
    context.insert("chat_enabled", &state.config.api_configured());

    match tera.render("index.html", &context) {
        Ok(html) => HttpResponse::Ok().content_type("text/html").body(html),
        Err(e) => {
            error!("Template error: {}", e);
            HttpResponse::InternalServerError().body("Template error")
        }
    }
}

// Health check endpoint
pub async fn health(state: web::Data<AppState>) -> impl Responder {
    let timestamp = OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_default();
    let environment = &state.config.environment;

    if state.config.api_configured() {
        HttpResponse::Ok().json(json!({
            "status": "ok",
            "timestamp": timestamp,
            "environment": environment,
            "apiConfigured": true,
        }))
    } else {
        HttpResponse::ServiceUnavailable().json(json!({
            "status": "degraded",
            "timestamp": timestamp,
            "environment": environment,
            "apiConfigured": false,
        }))
    }
}

// Chat relay endpoint
pub async fn chat(state: web::Data<AppState>, body: web::Bytes) -> Result<HttpResponse, RelayError> {
    let request_id = Uuid::new_v4();

    if !state.config.api_configured() {
        error!("[{request_id}] chat request rejected: no upstream credential configured");
        return Err(RelayError::ServiceUnavailable);
    }

    let request = parse_chat_request(&body).map_err(|e| {
        warn!("[{request_id}] invalid chat request: {e}");
        RelayError::from(e)
    })?;

    info!(
        "[{request_id}] chat request ({} messages, stream: {})",
        request.messages.len(),
        request.stream
    );

    let completion = relay::build_completion(&state.config, request, request_id);
    let outcome = relay::dispatch(state.upstream.as_ref(), &completion, request_id)
        .await
        .map_err(|e| {
            error!("[{request_id}] upstream call failed: {e}");
            e
        })?;

    Ok(match outcome {
        RelayOutcome::Complete(response) => HttpResponse::Ok().json(response),
        RelayOutcome::Stream(frames) => HttpResponse::Ok()
            .content_type("text/event-stream")
            .insert_header((header::CACHE_CONTROL, "no-cache"))
            .insert_header(("X-Accel-Buffering", "no"))
            .streaming(frames.map(Ok::<_, Infallible>)),
    })
}

// Model listing, proxied from upstream
pub async fn models(state: web::Data<AppState>) -> Result<HttpResponse, RelayError> {
    if !state.config.api_configured() {
        error!("model listing rejected: no upstream credential configured");
        return Err(RelayError::ServiceUnavailable);
    }

    let listing = state.upstream.list_models().await.map_err(|e| {
        error!("Failed to fetch model listing: {e}");
        e
    })?;
    let data = listing.get("data").cloned().unwrap_or_else(|| json!([]));

    Ok(HttpResponse::Ok().json(json!({ "data": data })))
}
