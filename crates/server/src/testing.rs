//! Stub models and request builders shared by the server's unit tests.

use std::{
    io::Cursor,
    sync::{Arc, Mutex},
};

use anyhow::{Result, anyhow, bail};
use base64::Engine;
use candle_core::{DType, Device, Tensor};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use vision_chat_core::{
    GenerationConfig, MultimodalModel, PreprocessedInputs, TextTokenizer, VisualTokenizer,
};

const WORDS: [&str; 6] = ["<pad>", "</s>", "<image>", "a", "small", "square"];
const SPECIAL: [i64; 3] = [0, 1, 2];
pub const PAD_ID: i64 = 0;

pub fn png_data_uri(width: u32, height: u32) -> Result<String> {
    let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([10, 200, 30])));
    let mut bytes = Cursor::new(Vec::new());
    image.write_to(&mut bytes, ImageFormat::Png)?;
    let payload = base64::engine::general_purpose::STANDARD.encode(bytes.into_inner());
    Ok(format!("data:image/png;base64,{payload}"))
}

/// One message whose content items are `(type, value)` pairs.
pub fn request_body(items: &[(&str, &str)]) -> String {
    let content: Vec<serde_json::Value> = items
        .iter()
        .map(|&(kind, value)| match kind {
            "text" => serde_json::json!({"type": "text", "text": value}),
            "image_url" => serde_json::json!({"type": "image_url", "image_url": {"url": value}}),
            other => serde_json::json!({"type": other, "data": value}),
        })
        .collect();
    serde_json::json!({"messages": [{"content": content}]}).to_string()
}

/// What the pipeline handed to the model.
#[derive(Debug, Default, Clone)]
pub struct Recorded {
    pub queries: Vec<String>,
    pub max_partitions: Vec<usize>,
    pub attention_masks: Vec<Vec<u8>>,
    pub pixel_dtypes: Vec<Option<DType>>,
    pub use_cache: Vec<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailAt {
    Preprocess,
    Generate,
}

pub struct StubModel {
    recorded: Arc<Mutex<Recorded>>,
    failure: Mutex<Option<(FailAt, String)>>,
    tokenizer: StubTokenizer,
    visual: StubVisual,
    eos: Vec<i64>,
}

impl StubModel {
    pub fn new() -> (Self, Arc<Mutex<Recorded>>) {
        let recorded = Arc::new(Mutex::new(Recorded::default()));
        let model = Self {
            recorded: Arc::clone(&recorded),
            failure: Mutex::new(None),
            tokenizer: StubTokenizer,
            visual: StubVisual {
                device: Device::Cpu,
            },
            eos: vec![1],
        };
        (model, recorded)
    }

    /// Fail once at `stage` with `message`, then behave normally.
    pub fn failing_once(stage: FailAt, message: &str) -> (Self, Arc<Mutex<Recorded>>) {
        let (model, recorded) = Self::new();
        *model.failure.lock().expect("failure lock") = Some((stage, message.to_owned()));
        (model, recorded)
    }

    fn take_failure(&self, stage: FailAt) -> Result<()> {
        let mut failure = self.failure.lock().expect("failure lock");
        if matches!(failure.as_ref(), Some((at, _)) if *at == stage) {
            if let Some((_, message)) = failure.take() {
                bail!(message);
            }
        }
        Ok(())
    }
}

impl MultimodalModel for StubModel {
    fn preprocess_inputs(
        &self,
        query: &str,
        images: &[DynamicImage],
        max_partition: usize,
    ) -> Result<PreprocessedInputs> {
        self.take_failure(FailAt::Preprocess)?;
        {
            let mut recorded = self.recorded.lock().expect("record lock");
            recorded.queries.push(query.to_owned());
            recorded.max_partitions.push(max_partition);
        }
        let pixel_values = match images {
            [] => None,
            _ => Some(Tensor::zeros((1, 3, 4, 4), DType::F32, &Device::Cpu)?),
        };
        Ok(PreprocessedInputs {
            prompt: query.to_owned(),
            input_ids: Tensor::new(&[PAD_ID, 2, 2, 3], &Device::Cpu)?,
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
        self.take_failure(FailAt::Generate)?;
        config.ensure_greedy()?;
        if input_ids.dims() != attention_mask.dims() {
            return Err(anyhow!("mask/ids shape mismatch"));
        }
        {
            let mut recorded = self.recorded.lock().expect("record lock");
            recorded
                .attention_masks
                .push(attention_mask.get(0)?.to_dtype(DType::U8)?.to_vec1::<u8>()?);
            recorded
                .pixel_dtypes
                .push(pixel_values.first().and_then(|p| p.as_ref().map(Tensor::dtype)));
            recorded.use_cache.push(config.use_cache);
        }
        // "a small square" followed by a stray image token
        Ok(Tensor::new(&[[3i64, 4, 5, 2]], &Device::Cpu)?)
    }

    fn device(&self) -> &Device {
        &self.visual.device
    }

    fn eos_token_id(&self) -> &[i64] {
        &self.eos
    }

    fn text_tokenizer(&self) -> &dyn TextTokenizer {
        &self.tokenizer
    }

    fn visual_tokenizer(&self) -> &dyn VisualTokenizer {
        &self.visual
    }
}

struct StubTokenizer;

impl TextTokenizer for StubTokenizer {
    fn pad_token_id(&self) -> i64 {
        PAD_ID
    }

    fn decode(&self, ids: &[i64], skip_special_tokens: bool) -> Result<String> {
        let words: Vec<&str> = ids
            .iter()
            .filter(|&&id| !(skip_special_tokens && SPECIAL.contains(&id)))
            .map(|&id| {
                usize::try_from(id)
                    .ok()
                    .and_then(|idx| WORDS.get(idx).copied())
                    .ok_or_else(|| anyhow!("unknown token id {id}"))
            })
            .collect::<Result<_>>()?;
        Ok(words.join(" "))
    }
}

struct StubVisual {
    device: Device,
}

impl VisualTokenizer for StubVisual {
    fn dtype(&self) -> DType {
        DType::BF16
    }

    fn device(&self) -> &Device {
        &self.device
    }
}
