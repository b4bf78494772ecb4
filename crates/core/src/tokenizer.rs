use std::{convert::TryFrom, fs, path::Path};

use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use tokenizers::Tokenizer;

use crate::model::TextTokenizer;

pub const IMAGE_TOKEN: &str = "<image>";

/// `tokenizers` backed text tokenizer with a resolved pad id.
pub struct HfTextTokenizer {
    inner: Tokenizer,
    pad_token_id: i64,
}

#[derive(Debug, Default, Deserialize)]
struct TokenizerConfigFile {
    #[serde(default)]
    pad_token: Option<SpecialToken>,
}

// tokenizer_config.json stores special tokens either as plain strings or as
// AddedToken objects.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SpecialToken {
    Plain(String),
    Detailed { content: String },
}

impl SpecialToken {
    fn content(&self) -> &str {
        match self {
            SpecialToken::Plain(s) => s,
            SpecialToken::Detailed { content } => content,
        }
    }
}

impl HfTextTokenizer {
    pub fn new(inner: Tokenizer, pad_token_id: i64) -> Self {
        Self {
            inner,
            pad_token_id,
        }
    }

    /// Load `tokenizer.json`, resolving the pad token from `tokenizer_config.json`
    /// when given, else from the tokenizer's padding parameters.
    pub fn from_files(tokenizer_path: &Path, config_path: Option<&Path>) -> Result<Self> {
        let inner = Tokenizer::from_file(tokenizer_path).map_err(|err| {
            anyhow!(
                "failed to load tokenizer from {}: {err}",
                tokenizer_path.display()
            )
        })?;
        let declared = match config_path {
            Some(path) => read_pad_token(path)?,
            None => None,
        };
        let pad_token_id = resolve_pad_token_id(&inner, declared.as_deref())?;
        Ok(Self::new(inner, pad_token_id))
    }

    pub fn token_id(&self, token: &str) -> Option<i64> {
        self.inner.token_to_id(token).map(i64::from)
    }

    /// Encode plain text without adding special tokens.
    pub fn encode_segment(&self, text: &str) -> Result<Vec<i64>> {
        let encoding = self
            .inner
            .encode(text, false)
            .map_err(|err| anyhow!("tokenization failed: {err}"))?;
        Ok(encoding.get_ids().iter().map(|&id| i64::from(id)).collect())
    }
}

impl TextTokenizer for HfTextTokenizer {
    fn pad_token_id(&self) -> i64 {
        self.pad_token_id
    }

    fn decode(&self, ids: &[i64], skip_special_tokens: bool) -> Result<String> {
        let ids: Vec<u32> = ids
            .iter()
            .filter_map(|&id| u32::try_from(id).ok())
            .collect();
        self.inner
            .decode(&ids, skip_special_tokens)
            .map_err(|err| anyhow!("detokenization failed: {err}"))
    }
}

fn read_pad_token(path: &Path) -> Result<Option<String>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read tokenizer config {}", path.display()))?;
    let parsed: TokenizerConfigFile = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse tokenizer config {}", path.display()))?;
    Ok(parsed.pad_token.map(|token| token.content().to_owned()))
}

fn resolve_pad_token_id(tokenizer: &Tokenizer, declared: Option<&str>) -> Result<i64> {
    if let Some(token) = declared {
        return tokenizer
            .token_to_id(token)
            .map(i64::from)
            .ok_or_else(|| anyhow!("pad token `{token}` is not in the tokenizer vocabulary"));
    }
    tokenizer
        .get_padding()
        .map(|padding| i64::from(padding.pad_id))
        .ok_or_else(|| anyhow!("tokenizer defines no pad token"))
}
