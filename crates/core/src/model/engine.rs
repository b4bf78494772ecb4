use std::fmt;

use anyhow::{Context, Result, anyhow, ensure};
use candle_core::{DType, Device, Tensor};
use image::DynamicImage;
use tracing::{debug, trace};

use super::{
    Backbone, MultimodalModel, PreprocessedInputs, TextTokenizer, VisualTokenizer,
};
use crate::{
    generation::{GenerationConfig, select_token_id},
    prompt::{PromptLayout, build_prompt_tokens},
    tokenizer::{HfTextTokenizer, IMAGE_TOKEN},
    vision::{ImageSettings, partition_image, views_to_tensor},
};

/// Longest multimodal prompt the engine accepts before truncation.
pub const MULTIMODAL_MAX_LENGTH: usize = 32768;

/// Turns images into normalised view tensors and reports the precision the
/// backbone expects them in.
pub struct VisualPreprocessor {
    settings: ImageSettings,
    dtype: DType,
    device: Device,
}

impl VisualPreprocessor {
    pub fn new(settings: ImageSettings, dtype: DType, device: Device) -> Result<Self> {
        settings.validate()?;
        Ok(Self {
            settings,
            dtype,
            device,
        })
    }

    pub fn settings(&self) -> &ImageSettings {
        &self.settings
    }
}

impl VisualTokenizer for VisualPreprocessor {
    fn dtype(&self) -> DType {
        self.dtype
    }

    fn device(&self) -> &Device {
        &self.device
    }
}

/// Settings that are not carried by the tokenizer or the image settings.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub device: Device,
    pub dtype: DType,
    pub eos_token_id: Vec<i64>,
    pub bos_token_id: Option<i64>,
    pub max_length: usize,
}

pub struct VisionChatEngine {
    tokenizer: HfTextTokenizer,
    visual: VisualPreprocessor,
    layout: PromptLayout,
    backbone: Box<dyn Backbone>,
    device: Device,
    eos_token_id: Vec<i64>,
}

impl fmt::Debug for VisionChatEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VisionChatEngine")
            .field("layout", &self.layout)
            .field("image_size", &self.visual.settings.image_size)
            .field("device", &self.device)
            .field("eos_token_id", &self.eos_token_id)
            .finish_non_exhaustive()
    }
}

impl VisionChatEngine {
    pub fn new(
        tokenizer: HfTextTokenizer,
        settings: ImageSettings,
        backbone: Box<dyn Backbone>,
        options: EngineOptions,
    ) -> Result<Self> {
        let image_token_id = tokenizer
            .token_id(IMAGE_TOKEN)
            .ok_or_else(|| anyhow!("tokenizer missing {IMAGE_TOKEN} token"))?;
        ensure!(
            !options.eos_token_id.is_empty(),
            "model declares no eos_token_id"
        );
        let visual = VisualPreprocessor::new(settings, options.dtype, options.device.clone())?;
        let layout = PromptLayout {
            image_token_id,
            bos_token_id: options.bos_token_id,
            tokens_per_view: visual.settings().tokens_per_view(),
            max_length: options.max_length,
        };
        Ok(Self {
            tokenizer,
            visual,
            layout,
            backbone,
            device: options.device,
            eos_token_id: options.eos_token_id,
        })
    }

    pub fn layout(&self) -> &PromptLayout {
        &self.layout
    }

    fn decode_with_cache(
        &self,
        input_ids: &Tensor,
        pixel_values: &[Option<Tensor>],
        attention_mask: &Tensor,
        config: &GenerationConfig,
    ) -> Result<Vec<i64>> {
        let mut session = self.backbone.start_session()?;
        let logits = session.prefill(input_ids, pixel_values, attention_mask)?;
        let mut current = select_token_id(&logits)?;
        let mut generated = Vec::with_capacity(config.max_new_tokens.min(256));
        loop {
            if config.is_eos(current) {
                break;
            }
            generated.push(current);
            if generated.len() >= config.max_new_tokens {
                break;
            }
            let next = Tensor::from_vec(vec![current], (1, 1), &self.device)?;
            let logits = session.step(&next)?;
            current = select_token_id(&logits)?;
        }
        Ok(generated)
    }

    fn decode_without_cache(
        &self,
        input_ids: &Tensor,
        pixel_values: &[Option<Tensor>],
        attention_mask: &Tensor,
        config: &GenerationConfig,
    ) -> Result<Vec<i64>> {
        let prompt = input_ids
            .to_dtype(DType::I64)?
            .get(0)?
            .to_vec1::<i64>()
            .context("failed to extract input_ids for no-cache generation")?;
        let mask = attention_mask
            .to_dtype(DType::U8)?
            .get(0)?
            .to_vec1::<u8>()
            .context("failed to extract attention mask for no-cache generation")?;
        ensure!(
            prompt.len() == mask.len(),
            "attention mask length {} does not match input length {}",
            mask.len(),
            prompt.len()
        );

        let mut generated: Vec<i64> = Vec::new();
        loop {
            let mut ids = prompt.clone();
            ids.extend_from_slice(&generated);
            let mut attention = mask.clone();
            attention.extend(std::iter::repeat_n(1u8, generated.len()));
            let len = ids.len();
            let ids = Tensor::from_vec(ids, (1, len), &self.device)?;
            let attention = Tensor::from_vec(attention, (1, len), &self.device)?;

            let mut session = self.backbone.start_session()?;
            let logits = session.prefill(&ids, pixel_values, &attention)?;
            let current = select_token_id(&logits)?;
            if config.is_eos(current) {
                break;
            }
            generated.push(current);
            if generated.len() >= config.max_new_tokens {
                break;
            }
        }
        Ok(generated)
    }
}

impl MultimodalModel for VisionChatEngine {
    fn preprocess_inputs(
        &self,
        query: &str,
        images: &[DynamicImage],
        max_partition: usize,
    ) -> Result<PreprocessedInputs> {
        let settings = self.visual.settings();
        let mut views_per_image = Vec::with_capacity(images.len());
        let mut views = Vec::new();
        for image in images {
            let partition = partition_image(image, max_partition, settings.image_size)?;
            debug!(
                cols = partition.grid.0,
                rows = partition.grid.1,
                views = partition.views.len(),
                "partitioned image"
            );
            views_per_image.push(partition.views.len());
            views.extend(partition.views);
        }

        let ids = build_prompt_tokens(&self.tokenizer, query, &views_per_image, &self.layout)?;
        let input_ids = Tensor::new(ids.as_slice(), &Device::Cpu)?;
        let pixel_values = if views.is_empty() {
            None
        } else {
            Some(views_to_tensor(&views, settings, &Device::Cpu)?)
        };
        Ok(PreprocessedInputs {
            prompt: query.to_owned(),
            input_ids,
            pixel_values,
        })
    }

    fn generate(
        &self,
        input_ids: &Tensor,
        pixel_values: &[Option<Tensor>],
        attention_mask: &Tensor,
        config: &GenerationConfig,
    ) -> Result<Tensor> {
        config.ensure_greedy()?;
        ensure!(
            input_ids.rank() == 2,
            "generate expects input_ids with shape [batch, seq]"
        );
        let (batch, seq_len) = input_ids.dims2()?;
        ensure!(
            batch == 1,
            "generate currently supports batch size 1 (got {batch})"
        );
        ensure!(
            attention_mask.dims() == input_ids.dims(),
            "attention mask shape {:?} does not match input_ids {:?}",
            attention_mask.dims(),
            input_ids.dims()
        );
        trace!(seq_len, use_cache = config.use_cache, "starting greedy decode");

        let generated = if config.max_new_tokens == 0 {
            Vec::new()
        } else if config.use_cache {
            self.decode_with_cache(input_ids, pixel_values, attention_mask, config)?
        } else {
            self.decode_without_cache(input_ids, pixel_values, attention_mask, config)?
        };
        debug!(prompt_tokens = seq_len, generated = generated.len(), "decode finished");
        let len = generated.len();
        Ok(Tensor::from_vec(generated, (1, len), &self.device)?)
    }

    fn device(&self) -> &Device {
        &self.device
    }

    fn eos_token_id(&self) -> &[i64] {
        &self.eos_token_id
    }

    fn text_tokenizer(&self) -> &dyn TextTokenizer {
        &self.tokenizer
    }

    fn visual_tokenizer(&self) -> &dyn VisualTokenizer {
        &self.visual
    }
}
