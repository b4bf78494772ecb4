use anyhow::{Result, ensure};
use tracing::{trace, warn};

use crate::tokenizer::{HfTextTokenizer, IMAGE_TOKEN};

/// Token ids surrounding and standing in for images in a prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PromptLayout {
    pub image_token_id: i64,
    pub bos_token_id: Option<i64>,
    pub tokens_per_view: usize,
    pub max_length: usize,
}

/// Tokenise `query`, expanding every `<image>` slot into placeholder ids.
///
/// `views_per_image[i]` is the number of views produced for the i-th image.
pub fn build_prompt_tokens(
    tokenizer: &HfTextTokenizer,
    query: &str,
    views_per_image: &[usize],
    layout: &PromptLayout,
) -> Result<Vec<i64>> {
    let segments: Vec<&str> = query.split(IMAGE_TOKEN).collect();
    let slots = segments.len() - 1;
    ensure!(
        slots == views_per_image.len(),
        "prompt/image mismatch: {slots} `{IMAGE_TOKEN}` slots vs {} images",
        views_per_image.len()
    );

    let mut tokens = Vec::new();
    if let Some(bos) = layout.bos_token_id {
        tokens.push(bos);
    }
    for (idx, segment) in segments.iter().enumerate() {
        if !segment.is_empty() {
            tokens.extend(tokenizer.encode_segment(segment)?);
        }
        if let Some(&views) = views_per_image.get(idx) {
            let count = views * layout.tokens_per_view;
            tokens.extend(std::iter::repeat_n(layout.image_token_id, count));
        }
    }

    if tokens.len() > layout.max_length {
        warn!(
            "prompt has {} tokens, truncating to {}",
            tokens.len(),
            layout.max_length
        );
        tokens.truncate(layout.max_length);
    }
    trace!(tokens = tokens.len(), images = slots, "built prompt tokens");
    Ok(tokens)
}
