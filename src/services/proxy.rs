//! HTTP proxy that keeps the Gemini API key on the server.
//!
//! `POST /api/generate` forwards a [`PromptRequest`] to the configured model;
//! every other path is served from the static asset directory.

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use log::{error, info, warn};
use tower_http::{cors::CorsLayer, services::ServeDir};

use crate::core::config::Config;
use crate::services::llm::{
    GeminiClient, LlmClient, LlmError, PromptRequest, ProxyErrorResponse, ProxyResponse,
};

pub const PROMPT_REQUIRED: &str = "Prompt is required.";
pub const SERVER_ERROR: &str = "Failed to generate content due to a server error.";

pub type ProxyState = Arc<dyn LlmClient>;

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ProxyErrorResponse {
            error: message.into(),
        }),
    )
        .into_response()
}

async fn generate_handler(
    State(llm): State<ProxyState>,
    payload: Result<Json<PromptRequest>, JsonRejection>,
) -> Response {
    let request = match payload {
        Ok(Json(request)) if !request.prompt.trim().is_empty() => request,
        Ok(_) => return error_response(StatusCode::BAD_REQUEST, PROMPT_REQUIRED),
        Err(rejection) => {
            warn!("Rejected generate request: {}", rejection);
            return error_response(StatusCode::BAD_REQUEST, PROMPT_REQUIRED);
        }
    };

    match llm.generate(&request).await {
        Ok(text) => (StatusCode::OK, Json(ProxyResponse { text })).into_response(),
        Err(LlmError::Upstream { status, message }) => {
            error!("Upstream error ({}): {}", status, message);
            let status = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
            error_response(status, message)
        }
        Err(e) => {
            error!("Error in /api/generate: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, SERVER_ERROR)
        }
    }
}

pub fn create_router(llm: ProxyState, static_dir: &str) -> Router {
    Router::new()
        .route("/api/generate", post(generate_handler))
        .fallback_service(ServeDir::new(static_dir))
        .layer(CorsLayer::permissive())
        .with_state(llm)
}

/// Runs the proxy until the process is stopped. Fails fast without an API key.
pub async fn serve(config: &Config) -> Result<()> {
    let api_key = config.require_api_key()?;
    let llm: ProxyState = Arc::new(GeminiClient::new(api_key, &config.llm.gemini.model));

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!(
        "Serving {} and /api/generate on http://{} (model {})",
        config.server.static_dir, addr, config.llm.gemini.model
    );
    axum::serve(listener, create_router(llm, &config.server.static_dir))
        .await
        .context("Proxy server stopped unexpectedly")?;
    Ok(())
}
