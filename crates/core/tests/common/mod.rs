#![allow(dead_code)]

use std::{
    collections::HashMap,
    fs,
    path::Path,
    sync::{Arc, Mutex},
};

use anyhow::{Result, anyhow};
use candle_core::{DType, Device, Tensor};
use candle_nn::{Embedding, Module, VarBuilder};
use image::{DynamicImage, Rgb, RgbImage};
use tokenizers::Tokenizer;

use vision_chat_core::{
    Backbone, BackboneLoadArgs, DecodeSession, HfTextTokenizer, ModelFiles,
    model::engine::{EngineOptions, VisionChatEngine},
    vision::ImageSettings,
};

pub const VOCAB: [&str; 10] = [
    "<pad>", "<unk>", "</s>", "<image>", "Describe", "this", "image", "a", "cat", "sits",
];
pub const PAD_ID: i64 = 0;
pub const EOS_ID: i64 = 2;
pub const IMAGE_ID: i64 = 3;

pub fn tokenizer_json() -> String {
    let vocab: Vec<String> = VOCAB
        .iter()
        .enumerate()
        .map(|(id, token)| format!("\"{token}\": {id}"))
        .collect();
    let added: Vec<String> = ["<pad>", "<unk>", "</s>", "<image>"]
        .iter()
        .enumerate()
        .map(|(id, token)| {
            format!(
                r#"{{"id": {id}, "content": "{token}", "single_word": false, "lstrip": false, "rstrip": false, "normalized": false, "special": true}}"#
            )
        })
        .collect();
    format!(
        r#"{{
  "version": "1.0",
  "truncation": null,
  "padding": null,
  "added_tokens": [{}],
  "normalizer": null,
  "pre_tokenizer": {{"type": "Whitespace"}},
  "post_processor": null,
  "decoder": null,
  "model": {{"type": "WordLevel", "vocab": {{{}}}, "unk_token": "<unk>"}}
}}"#,
        added.join(", "),
        vocab.join(", ")
    )
}

pub fn test_tokenizer() -> Result<HfTextTokenizer> {
    let inner: Tokenizer = tokenizer_json()
        .parse()
        .map_err(|err| anyhow!("invalid test tokenizer: {err}"))?;
    Ok(HfTextTokenizer::new(inner, PAD_ID))
}

/// Geometry producing a single visual token per 28x28 view.
pub fn tiny_image_settings() -> ImageSettings {
    ImageSettings {
        image_size: 28,
        patch_size: 14,
        hidden_stride: 2,
        ..ImageSettings::default()
    }
}

pub fn solid_image(width: u32, height: u32) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([255, 0, 128])))
}

/// Row `i` of the transition matrix scores token `i + 1` highest; the last
/// vocabulary entry transitions to EOS.
pub fn shift_transition() -> Result<Tensor> {
    let n = VOCAB.len();
    let mut data = vec![0f32; n * n];
    for row in 0..n {
        let next = if row + 1 < n { row + 1 } else { EOS_ID as usize };
        data[row * n + next] = 1.0;
    }
    Ok(Tensor::from_vec(data, (n, n), &Device::Cpu)?)
}

/// Records what the engine handed to the backbone.
#[derive(Debug, Default)]
pub struct CallLog {
    pub prefills: usize,
    pub steps: usize,
    pub saw_pixels: bool,
    pub prefill_lengths: Vec<usize>,
}

/// Next-token scores come straight from a `[vocab, vocab]` transition table
/// looked up with the last input token.
pub struct TransitionBackbone {
    transition: Embedding,
    log: Arc<Mutex<CallLog>>,
}

impl TransitionBackbone {
    pub fn from_var_builder(vb: VarBuilder<'_>) -> Result<Self> {
        let n = VOCAB.len();
        let transition = candle_nn::embedding(n, n, vb.pp("transition"))?;
        Ok(Self {
            transition,
            log: Arc::default(),
        })
    }

    pub fn shifting() -> Result<(Self, Arc<Mutex<CallLog>>)> {
        let mut tensors = HashMap::new();
        tensors.insert("transition.weight".to_string(), shift_transition()?);
        let vb = VarBuilder::from_tensors(tensors, DType::F32, &Device::Cpu);
        let backbone = Self::from_var_builder(vb)?;
        let log = Arc::clone(&backbone.log);
        Ok((backbone, log))
    }
}

pub fn load_transition_backbone(args: BackboneLoadArgs<'_>) -> Result<Box<dyn Backbone>> {
    Ok(Box::new(TransitionBackbone::from_var_builder(args.vb)?))
}

impl Backbone for TransitionBackbone {
    fn start_session(&self) -> Result<Box<dyn DecodeSession + '_>> {
        Ok(Box::new(TransitionSession { backbone: self }))
    }
}

struct TransitionSession<'a> {
    backbone: &'a TransitionBackbone,
}

impl TransitionSession<'_> {
    fn logits_for_last(&self, ids: &Tensor) -> Result<Tensor> {
        let (_, seq) = ids.dims2()?;
        let last = ids.narrow(1, seq - 1, 1)?.to_dtype(DType::U32)?;
        let scores = self.backbone.transition.forward(&last)?;
        Ok(scores.squeeze(1)?.to_dtype(DType::F32)?)
    }
}

impl DecodeSession for TransitionSession<'_> {
    fn prefill(
        &mut self,
        input_ids: &Tensor,
        pixel_values: &[Option<Tensor>],
        _attention_mask: &Tensor,
    ) -> Result<Tensor> {
        {
            let mut log = self.backbone.log.lock().expect("log lock");
            log.prefills += 1;
            log.saw_pixels |= pixel_values.iter().any(Option::is_some);
            log.prefill_lengths.push(input_ids.dims2()?.1);
        }
        self.logits_for_last(input_ids)
    }

    fn step(&mut self, token: &Tensor) -> Result<Tensor> {
        self.backbone.log.lock().expect("log lock").steps += 1;
        self.logits_for_last(token)
    }
}

pub fn test_engine() -> Result<(VisionChatEngine, Arc<Mutex<CallLog>>)> {
    let (backbone, log) = TransitionBackbone::shifting()?;
    let engine = VisionChatEngine::new(
        test_tokenizer()?,
        tiny_image_settings(),
        Box::new(backbone),
        EngineOptions {
            device: Device::Cpu,
            dtype: DType::F32,
            eos_token_id: vec![EOS_ID],
            bos_token_id: None,
            max_length: 32768,
        },
    )?;
    Ok((engine, log))
}

/// Write a loadable model directory and return its file listing.
pub fn write_model_dir(dir: &Path, model_type: &str) -> Result<ModelFiles> {
    let config = dir.join("config.json");
    fs::write(
        &config,
        format!(r#"{{"model_type": "{model_type}", "eos_token_id": 9}}"#),
    )?;
    let generation_config = dir.join("generation_config.json");
    fs::write(&generation_config, r#"{"eos_token_id": [2]}"#)?;
    let tokenizer = dir.join("tokenizer.json");
    fs::write(&tokenizer, tokenizer_json())?;
    let tokenizer_config = dir.join("tokenizer_config.json");
    fs::write(
        &tokenizer_config,
        r#"{"pad_token": {"content": "<pad>", "special": true}}"#,
    )?;
    let preprocessor_config = dir.join("preprocessor_config.json");
    fs::write(
        &preprocessor_config,
        r#"{"image_size": 28, "patch_size": 14, "hidden_stride": 2}"#,
    )?;
    let weights = dir.join("model.safetensors");
    let mut tensors = HashMap::new();
    tensors.insert("transition.weight".to_string(), shift_transition()?);
    candle_core::safetensors::save(&tensors, &weights)?;
    Ok(ModelFiles {
        config,
        tokenizer,
        weights: vec![weights],
        generation_config: Some(generation_config),
        tokenizer_config: Some(tokenizer_config),
        preprocessor_config: Some(preprocessor_config),
    })
}
