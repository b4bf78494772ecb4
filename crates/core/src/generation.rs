use std::cmp::Ordering;

use anyhow::{Context, Result, ensure};
use candle_core::{DType, Tensor};

/// Upper bound on generated tokens per request.
pub const MAX_NEW_TOKENS: usize = 1024;

/// Decoding options handed to [`crate::MultimodalModel::generate`].
///
/// The server always builds this through [`GenerationConfig::greedy`]; callers
/// cannot tune it per request.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationConfig {
    pub max_new_tokens: usize,
    pub do_sample: bool,
    pub top_p: Option<f64>,
    pub top_k: Option<usize>,
    pub temperature: Option<f64>,
    pub repetition_penalty: Option<f32>,
    pub eos_token_id: Vec<i64>,
    pub pad_token_id: i64,
    pub use_cache: bool,
}

impl GenerationConfig {
    pub fn greedy(eos_token_id: Vec<i64>, pad_token_id: i64) -> Self {
        Self {
            max_new_tokens: MAX_NEW_TOKENS,
            do_sample: false,
            top_p: None,
            top_k: None,
            temperature: None,
            repetition_penalty: None,
            eos_token_id,
            pad_token_id,
            use_cache: true,
        }
    }

    pub fn is_eos(&self, token: i64) -> bool {
        self.eos_token_id.contains(&token)
    }

    /// Rejects any option that would make decoding non-deterministic.
    pub fn ensure_greedy(&self) -> Result<()> {
        ensure!(!self.do_sample, "sampling-based decoding is not supported");
        ensure!(
            self.temperature.is_none() && self.top_p.is_none() && self.top_k.is_none(),
            "temperature/top_p/top_k must be disabled for greedy decoding"
        );
        ensure!(
            self.repetition_penalty.is_none(),
            "repetition penalty is not supported"
        );
        Ok(())
    }
}

/// Pick the highest scoring token from `[vocab]` or `[1, vocab]` logits.
pub fn select_token_id(logits: &Tensor) -> Result<i64> {
    let logits = match logits.rank() {
        1 => logits.clone(),
        2 => logits.get(0).context("logits missing batch row")?,
        rank => anyhow::bail!("expected logits of rank 1 or 2, got rank {rank}"),
    };
    let values = logits
        .to_dtype(DType::F32)?
        .to_vec1::<f32>()
        .context("failed to extract logits for token selection")?;
    ensure!(!values.is_empty(), "logits tensor is empty");
    argmax_index(&values)
        .map(|idx| idx as i64)
        .context("logits contain no finite values")
}

fn argmax_index(values: &[f32]) -> Option<usize> {
    values
        .iter()
        .enumerate()
        .filter(|(_, v)| v.is_finite())
        // `max_by` keeps the last maximum; reverse so ties resolve to the lowest id
        .rev()
        .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(Ordering::Equal))
        .map(|(idx, _)| idx)
}
