pub mod generation;
pub mod inference;
pub mod model;
pub mod prompt;
pub mod runtime;
pub mod tokenizer;
pub mod vision;

pub use generation::{GenerationConfig, MAX_NEW_TOKENS};
pub use inference::{MAX_PARTITION, describe_image};
pub use model::{
    Backbone, BackboneLoadArgs, BackboneRegistry, DecodeSession, ModelFiles, ModelLoadArgs,
    MultimodalModel, PreprocessedInputs, TextTokenizer, VisionChatEngine, VisualTokenizer,
    load_model,
};
pub use tokenizer::HfTextTokenizer;
