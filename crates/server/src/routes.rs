use std::sync::Arc;

use rocket::{Catcher, Route, State, data::Capped, serde::json::Json};
use tracing::{debug, error, info, warn};

use crate::{
    error::{ApiError, BODY_TOO_LARGE, json_catcher},
    generation::{complete, extract_inputs, parse_request},
    models::{ChatCompletionResponse, HealthResponse},
    state::AppState,
};

#[get("/health")]
pub fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "healthy" })
}

#[post("/chat/completions", data = "<body>")]
pub async fn chat_completions(
    state: &State<AppState>,
    body: Capped<Vec<u8>>,
) -> Result<Json<ChatCompletionResponse>, ApiError> {
    info!("Received request to /v1/chat/completions");
    match respond(state, body).await {
        Ok(text) => Ok(Json(ChatCompletionResponse::single(text))),
        Err(err) if err.is_client_error() => {
            warn!("Rejected request: {err}");
            Err(err)
        }
        Err(err) => {
            error!("Error processing request: {err}");
            Err(err)
        }
    }
}

async fn respond(state: &AppState, body: Capped<Vec<u8>>) -> Result<String, ApiError> {
    if !body.is_complete() {
        return Err(ApiError::PayloadTooLarge(BODY_TOO_LARGE.into()));
    }
    let body = body.into_inner();
    let request = parse_request(&body)?;
    let inputs = extract_inputs(&request)?;
    debug!(
        model = %state.model_id,
        prompt_chars = inputs.prompt.len(),
        image_bytes = inputs.image_data.len(),
        "extracted chat inputs"
    );
    complete(Arc::clone(&state.model), inputs).await
}

pub fn root_routes() -> Vec<Route> {
    routes![health]
}

pub fn v1_routes() -> Vec<Route> {
    routes![chat_completions]
}

pub fn v1_catchers() -> Vec<Catcher> {
    catchers![json_catcher]
}
