mod providers;

use std::{
    collections::{BTreeMap, BTreeSet},
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, ensure};
use serde::Deserialize;
use tracing::{debug, info};
use vision_chat_core::ModelFiles;

use providers::{AssetProvider, HuggingFaceProvider, LocalDirProvider};

pub const CONFIG_FILENAME: &str = "config.json";
pub const TOKENIZER_FILENAME: &str = "tokenizer.json";
pub const WEIGHTS_FILENAME: &str = "model.safetensors";
pub const WEIGHTS_INDEX_FILENAME: &str = "model.safetensors.index.json";
pub const GENERATION_CONFIG_FILENAME: &str = "generation_config.json";
pub const TOKENIZER_CONFIG_FILENAME: &str = "tokenizer_config.json";
pub const PREPROCESSOR_CONFIG_FILENAME: &str = "preprocessor_config.json";

/// A checkpoint reference: an existing local directory or a Hub repo id.
#[derive(Debug, Clone)]
pub struct ModelSource {
    pub id: String,
    pub revision: String,
    /// Hub download cache; `None` uses the hf-hub default.
    pub cache_dir: Option<PathBuf>,
}

impl ModelSource {
    pub fn new(id: impl Into<String>, revision: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            revision: revision.into(),
            cache_dir: None,
        }
    }

    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    pub fn is_local(&self) -> bool {
        Path::new(&self.id).is_dir()
    }
}

/// Make every file the loader needs available locally and return the paths.
pub fn resolve_model_files(source: &ModelSource) -> Result<ModelFiles> {
    if source.is_local() {
        resolve_with(&LocalDirProvider::new(&source.id))
    } else {
        let provider = HuggingFaceProvider::new(source)?;
        resolve_with(&provider)
    }
}

fn resolve_with(provider: &dyn AssetProvider) -> Result<ModelFiles> {
    info!("Resolving model files from {}", provider.display_name());
    let config = provider.fetch(CONFIG_FILENAME)?;
    let tokenizer = provider.fetch(TOKENIZER_FILENAME)?;
    let weights = resolve_weights(provider)?;
    let generation_config = provider.fetch_optional(GENERATION_CONFIG_FILENAME)?;
    let tokenizer_config = provider.fetch_optional(TOKENIZER_CONFIG_FILENAME)?;
    let preprocessor_config = provider.fetch_optional(PREPROCESSOR_CONFIG_FILENAME)?;
    debug!(
        shards = weights.len(),
        generation_config = generation_config.is_some(),
        tokenizer_config = tokenizer_config.is_some(),
        preprocessor_config = preprocessor_config.is_some(),
        "model files resolved"
    );
    Ok(ModelFiles {
        config,
        tokenizer,
        weights,
        generation_config,
        tokenizer_config,
        preprocessor_config,
    })
}

#[derive(Debug, Deserialize)]
struct SafetensorsIndex {
    weight_map: BTreeMap<String, String>,
}

/// Shard file names referenced by a `model.safetensors.index.json`, deduplicated
/// and sorted.
pub fn shard_names(index_path: &Path) -> Result<Vec<String>> {
    let raw = fs::read_to_string(index_path)
        .with_context(|| format!("failed to read {}", index_path.display()))?;
    let index: SafetensorsIndex = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse {}", index_path.display()))?;
    let shards: BTreeSet<String> = index.weight_map.into_values().collect();
    ensure!(
        !shards.is_empty(),
        "{} lists no weight shards",
        index_path.display()
    );
    Ok(shards.into_iter().collect())
}

fn resolve_weights(provider: &dyn AssetProvider) -> Result<Vec<PathBuf>> {
    match provider.fetch_optional(WEIGHTS_INDEX_FILENAME)? {
        Some(index) => shard_names(&index)?
            .iter()
            .map(|name| provider.fetch(name))
            .collect(),
        None => Ok(vec![provider.fetch(WEIGHTS_FILENAME)?]),
    }
}
