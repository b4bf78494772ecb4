//! Model handle abstractions consumed by the request pipeline.
//!
//! A [`MultimodalModel`] is provisioned once at startup and then only read.
//! The neural decoder behind it is a [`Backbone`]; this crate drives it with
//! greedy decoding in [`engine::VisionChatEngine`].

pub mod engine;
pub mod loader;

use anyhow::Result;
use candle_core::{DType, Device, Tensor};
use image::DynamicImage;

use crate::generation::GenerationConfig;

pub use engine::VisionChatEngine;
pub use loader::{
    BackboneLoadArgs, BackboneLoader, BackboneRegistry, ModelFiles, ModelLoadArgs, load_model,
};

/// Output of [`MultimodalModel::preprocess_inputs`].
#[derive(Debug, Clone)]
pub struct PreprocessedInputs {
    /// Prompt text as seen by the model (may differ from the query).
    pub prompt: String,
    /// Token ids, shape `[seq]`, dtype `i64`.
    pub input_ids: Tensor,
    /// Stacked image views `[views, 3, H, W]`, absent when no image was consumed.
    pub pixel_values: Option<Tensor>,
}

pub trait TextTokenizer: Send + Sync {
    fn pad_token_id(&self) -> i64;
    fn decode(&self, ids: &[i64], skip_special_tokens: bool) -> Result<String>;
}

pub trait VisualTokenizer: Send + Sync {
    /// Precision pixel tensors must be cast to before generation.
    fn dtype(&self) -> DType;
    fn device(&self) -> &Device;
}

/// Capabilities the request pipeline needs from a provisioned model.
pub trait MultimodalModel: Send + Sync {
    fn preprocess_inputs(
        &self,
        query: &str,
        images: &[DynamicImage],
        max_partition: usize,
    ) -> Result<PreprocessedInputs>;

    /// Returns generated token ids with shape `[batch, new_tokens]`.
    fn generate(
        &self,
        input_ids: &Tensor,
        pixel_values: &[Option<Tensor>],
        attention_mask: &Tensor,
        config: &GenerationConfig,
    ) -> Result<Tensor>;

    fn device(&self) -> &Device;

    /// End-of-sequence ids from the model's generation config.
    fn eos_token_id(&self) -> &[i64];

    fn text_tokenizer(&self) -> &dyn TextTokenizer;

    fn visual_tokenizer(&self) -> &dyn VisualTokenizer;
}

/// Neural decoder over text tokens and image views.
pub trait Backbone: Send + Sync {
    fn start_session(&self) -> Result<Box<dyn DecodeSession + '_>>;
}

/// Incremental decoding state for one generation call.
pub trait DecodeSession {
    /// Runs the full prompt and returns logits for its final position, `[batch, vocab]`.
    fn prefill(
        &mut self,
        input_ids: &Tensor,
        pixel_values: &[Option<Tensor>],
        attention_mask: &Tensor,
    ) -> Result<Tensor>;

    /// Feeds one token (`[batch, 1]`) using the cached state, returning `[batch, vocab]` logits.
    fn step(&mut self, token: &Tensor) -> Result<Tensor>;
}
