use std::{
    collections::BTreeMap,
    fmt, fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, anyhow, ensure};
use candle_core::{DType, Device};
use candle_nn::VarBuilder;
use serde::Deserialize;
use tracing::{debug, info};

use super::{Backbone, engine::{EngineOptions, MULTIMODAL_MAX_LENGTH, VisionChatEngine}};
use crate::{runtime::describe_device, tokenizer::HfTextTokenizer, vision::ImageSettings};

/// Local paths of everything needed to build a [`VisionChatEngine`].
#[derive(Debug, Clone)]
pub struct ModelFiles {
    pub config: PathBuf,
    pub tokenizer: PathBuf,
    pub weights: Vec<PathBuf>,
    pub generation_config: Option<PathBuf>,
    pub tokenizer_config: Option<PathBuf>,
    pub preprocessor_config: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ModelLoadArgs {
    pub files: ModelFiles,
    pub device: Device,
    pub dtype: DType,
    /// Fraction of accelerator memory the backbone may claim, in `(0, 1]`.
    pub max_memory: f32,
}

/// Everything a backbone constructor receives.
pub struct BackboneLoadArgs<'a> {
    pub model_type: &'a str,
    pub config: &'a serde_json::Value,
    pub vb: VarBuilder<'static>,
    pub device: &'a Device,
    pub dtype: DType,
    pub max_memory: f32,
}

pub type BackboneLoader = fn(BackboneLoadArgs<'_>) -> Result<Box<dyn Backbone>>;

/// Backbone constructors keyed by the checkpoint's `model_type`.
#[derive(Default, Clone)]
pub struct BackboneRegistry {
    loaders: BTreeMap<String, BackboneLoader>,
}

impl fmt::Debug for BackboneRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.loaders.keys()).finish()
    }
}

impl BackboneRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, model_type: impl Into<String>, loader: BackboneLoader) -> &mut Self {
        self.loaders.insert(model_type.into(), loader);
        self
    }

    pub fn model_types(&self) -> impl Iterator<Item = &str> {
        self.loaders.keys().map(String::as_str)
    }

    pub fn load(&self, args: BackboneLoadArgs<'_>) -> Result<Box<dyn Backbone>> {
        let loader = self.loaders.get(args.model_type).ok_or_else(|| {
            let known: Vec<&str> = self.model_types().collect();
            anyhow!(
                "no backbone registered for model_type `{}` (registered: [{}])",
                args.model_type,
                known.join(", ")
            )
        })?;
        loader(args)
    }
}

// HF configs store eos ids either as a single integer or a list.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum TokenIds {
    One(i64),
    Many(Vec<i64>),
}

impl TokenIds {
    fn into_vec(self) -> Vec<i64> {
        match self {
            TokenIds::One(id) => vec![id],
            TokenIds::Many(ids) => ids,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ModelConfigHeader {
    model_type: String,
    #[serde(default)]
    bos_token_id: Option<i64>,
    #[serde(default)]
    eos_token_id: Option<TokenIds>,
}

#[derive(Debug, Default, Deserialize)]
struct GenerationConfigFile {
    #[serde(default)]
    eos_token_id: Option<TokenIds>,
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path, what: &str) -> Result<T> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read {what} {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("failed to parse {what} {}", path.display()))
}

pub fn load_image_settings(path: Option<&Path>) -> Result<ImageSettings> {
    match path {
        Some(path) => read_json(path, "preprocessor config"),
        None => Ok(ImageSettings::default()),
    }
}

/// Build the process-wide model handle. Any failure here is a startup failure.
pub fn load_model(args: ModelLoadArgs, registry: &BackboneRegistry) -> Result<VisionChatEngine> {
    let ModelLoadArgs {
        files,
        device,
        dtype,
        max_memory,
    } = args;
    ensure!(
        max_memory > 0.0 && max_memory <= 1.0,
        "max_memory must be in (0, 1], got {max_memory}"
    );
    ensure!(!files.weights.is_empty(), "no weight files resolved");

    let config_value: serde_json::Value = read_json(&files.config, "model config")?;
    let header: ModelConfigHeader = serde_json::from_value(config_value.clone())
        .with_context(|| format!("model config {} lacks model_type", files.config.display()))?;

    let generation: GenerationConfigFile = match files.generation_config.as_deref() {
        Some(path) => read_json(path, "generation config")?,
        None => GenerationConfigFile::default(),
    };
    let eos_token_id = generation
        .eos_token_id
        .or(header.eos_token_id.clone())
        .map(TokenIds::into_vec)
        .ok_or_else(|| anyhow!("neither generation_config.json nor config.json defines eos_token_id"))?;

    let tokenizer = HfTextTokenizer::from_files(&files.tokenizer, files.tokenizer_config.as_deref())?;
    let settings = load_image_settings(files.preprocessor_config.as_deref())?;
    debug!(?settings, ?eos_token_id, "resolved model metadata");

    info!(
        "Loading `{}` backbone on {} ({:?}, max_memory={max_memory})",
        header.model_type,
        describe_device(&device),
        dtype
    );
    // SAFETY: the weight files are memory-mapped read-only and must not be
    // modified while the process is running.
    let vb = unsafe { VarBuilder::from_mmaped_safetensors(&files.weights, dtype, &device)? };
    let backbone = registry.load(BackboneLoadArgs {
        model_type: &header.model_type,
        config: &config_value,
        vb,
        device: &device,
        dtype,
        max_memory,
    })?;

    VisionChatEngine::new(
        tokenizer,
        settings,
        backbone,
        EngineOptions {
            device,
            dtype,
            eos_token_id,
            bos_token_id: header.bos_token_id,
            max_length: MULTIMODAL_MAX_LENGTH,
        },
    )
}
