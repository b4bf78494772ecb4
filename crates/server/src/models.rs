use serde::{Deserialize, Serialize};

#[derive(Debug, Default, Deserialize)]
pub struct ChatCompletionRequest {
    /// `null` and a missing field are treated alike.
    #[serde(default)]
    pub messages: Option<Vec<ApiMessage>>,
}

#[derive(Debug, Deserialize)]
pub struct ApiMessage {
    #[serde(default)]
    pub content: Vec<ContentItem>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentItem {
    Text {
        text: String,
    },
    ImageUrl {
        image_url: ImagePayload,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
pub struct ImagePayload {
    pub url: String,
}

#[derive(Debug, Serialize)]
pub struct ChatCompletionResponse {
    pub choices: Vec<ChatChoice>,
}

impl ChatCompletionResponse {
    pub fn single(content: String) -> Self {
        Self {
            choices: vec![ChatChoice {
                message: ChatMessageResponse { content },
            }],
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ChatChoice {
    pub message: ChatMessageResponse,
}

#[derive(Debug, Serialize)]
pub struct ChatMessageResponse {
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}
