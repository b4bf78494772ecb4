use std::sync::{Arc, Mutex};

use vision_chat_core::MultimodalModel;

/// The mutex admits one generation at a time.
pub type SharedModel = Arc<Mutex<Box<dyn MultimodalModel>>>;

pub struct AppState {
    pub model: SharedModel,
    pub model_id: String,
}

impl AppState {
    pub fn new(model: Box<dyn MultimodalModel>, model_id: impl Into<String>) -> Self {
        Self {
            model: Arc::new(Mutex::new(model)),
            model_id: model_id.into(),
        }
    }
}
