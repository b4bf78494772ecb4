use anyhow::Result;
use candle_core::{DType, Tensor};
use image::DynamicImage;
use tracing::debug;

use crate::{
    generation::GenerationConfig,
    model::{MultimodalModel, PreprocessedInputs},
    tokenizer::IMAGE_TOKEN,
};

/// Tiling granularity passed to the preprocessor for every request.
pub const MAX_PARTITION: usize = 9;

/// Model-ready tensors for a single request.
#[derive(Debug)]
pub struct PreparedBatch {
    /// `[1, seq]` on the model device.
    pub input_ids: Tensor,
    /// `[1, seq]` u8, zero at pad positions.
    pub attention_mask: Tensor,
    /// One entry per image, cast to the visual tokenizer's dtype and device.
    pub pixel_values: Vec<Option<Tensor>>,
}

pub fn build_query(prompt: &str) -> String {
    format!("{IMAGE_TOKEN}\n{prompt}")
}

/// Mark every position that does not hold `pad_token_id`.
pub fn attention_mask(input_ids: &Tensor, pad_token_id: i64) -> Result<Tensor> {
    Ok(input_ids.ne(pad_token_id)?)
}

pub fn prepare_batch(model: &dyn MultimodalModel, inputs: PreprocessedInputs) -> Result<PreparedBatch> {
    let pad_token_id = model.text_tokenizer().pad_token_id();
    let mask = attention_mask(&inputs.input_ids, pad_token_id)?;
    let input_ids = inputs.input_ids.unsqueeze(0)?.to_device(model.device())?;
    let attention_mask = mask.unsqueeze(0)?.to_device(model.device())?;

    let pixel_values = match inputs.pixel_values {
        Some(pixels) => {
            let visual = model.visual_tokenizer();
            Some(pixels.to_dtype(visual.dtype())?.to_device(visual.device())?)
        }
        None => None,
    };

    Ok(PreparedBatch {
        input_ids,
        attention_mask,
        pixel_values: vec![pixel_values],
    })
}

/// Run preprocessing, generation and detokenisation for one prompt/image pair.
///
/// Errors from the model are returned untouched so callers can surface the
/// underlying message.
pub fn describe_image(model: &dyn MultimodalModel, prompt: &str, image: DynamicImage) -> Result<String> {
    let query = build_query(prompt);
    let inputs = model.preprocess_inputs(&query, &[image], MAX_PARTITION)?;
    debug!(
        tokens = inputs.input_ids.elem_count(),
        has_pixels = inputs.pixel_values.is_some(),
        "preprocessed request"
    );
    let batch = prepare_batch(model, inputs)?;

    let config = GenerationConfig::greedy(
        model.eos_token_id().to_vec(),
        model.text_tokenizer().pad_token_id(),
    );
    let output = model.generate(
        &batch.input_ids,
        &batch.pixel_values,
        &batch.attention_mask,
        &config,
    )?;
    let output_ids = output.get(0)?.to_dtype(DType::I64)?.to_vec1::<i64>()?;
    model.text_tokenizer().decode(&output_ids, true)
}
