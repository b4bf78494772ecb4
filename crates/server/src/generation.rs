use base64::Engine;
use rocket::tokio;
use tracing::warn;
use vision_chat_core::describe_image;

use crate::{
    error::{ApiError, MISSING_INPUTS, NO_MESSAGES},
    models::{ChatCompletionRequest, ContentItem},
    state::SharedModel,
};

/// Prompt text and raw image bytes pulled out of a chat request.
#[derive(Debug)]
pub struct ChatInputs {
    pub prompt: String,
    pub image_data: Vec<u8>,
}

/// Shape errors surface as processing failures, not validation failures.
pub fn parse_request(body: &[u8]) -> Result<ChatCompletionRequest, ApiError> {
    serde_json::from_slice(body).map_err(|err| ApiError::Internal(err.to_string()))
}

/// Read the first message; the last `text` and `image_url` items win.
pub fn extract_inputs(request: &ChatCompletionRequest) -> Result<ChatInputs, ApiError> {
    let message = request
        .messages
        .as_deref()
        .and_then(<[_]>::first)
        .ok_or_else(|| ApiError::BadRequest(NO_MESSAGES.into()))?;

    let mut prompt = None;
    let mut image_data = None;
    for item in &message.content {
        match item {
            ContentItem::Text { text } => prompt = Some(text.clone()),
            ContentItem::ImageUrl { image_url } => {
                image_data = Some(decode_data_uri(&image_url.url)?)
            }
            ContentItem::Other => {}
        }
    }

    match (prompt, image_data) {
        (Some(prompt), Some(image_data)) if !prompt.is_empty() && !image_data.is_empty() => {
            Ok(ChatInputs { prompt, image_data })
        }
        _ => Err(ApiError::BadRequest(MISSING_INPUTS.into())),
    }
}

/// Base64-decode the field after the first comma, up to any further comma.
/// Line breaks and other ASCII whitespace in the payload are skipped. The
/// media type is not checked.
pub fn decode_data_uri(url: &str) -> Result<Vec<u8>, ApiError> {
    let payload = url
        .split(',')
        .nth(1)
        .ok_or_else(|| ApiError::Internal("invalid data URI: missing ',' separator".into()))?;
    let payload: Vec<u8> = payload
        .bytes()
        .filter(|byte| !byte.is_ascii_whitespace())
        .collect();
    base64::engine::general_purpose::STANDARD
        .decode(payload)
        .map_err(|err| ApiError::Internal(format!("invalid base64 image payload: {err}")))
}

/// Decode the image and run the model off the async runtime.
pub async fn complete(model: SharedModel, inputs: ChatInputs) -> Result<String, ApiError> {
    let join_result = tokio::task::spawn_blocking(move || complete_blocking(&model, inputs)).await;
    match join_result {
        Ok(result) => result,
        Err(err) => Err(ApiError::Internal(format!("generation task failed: {err}"))),
    }
}

fn complete_blocking(model: &SharedModel, inputs: ChatInputs) -> Result<String, ApiError> {
    let image = image::load_from_memory(&inputs.image_data)
        .map_err(|err| ApiError::Internal(err.to_string()))?;
    // The handle is never mutated, so a panic in an earlier request leaves it usable.
    let guard = model.lock().unwrap_or_else(|poisoned| {
        warn!("model lock was poisoned by an earlier request");
        poisoned.into_inner()
    });
    let text = describe_image(&**guard, &inputs.prompt, image)?;
    Ok(text)
}
