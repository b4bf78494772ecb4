mod common;

use anyhow::Result;
use candle_core::{DType, Device, Tensor};
use common::{EOS_ID, IMAGE_ID, PAD_ID, solid_image, test_engine};
use vision_chat_core::{GenerationConfig, MultimodalModel, TextTokenizer, inference::prepare_batch};

fn prompt_tensors(ids: &[i64]) -> Result<(Tensor, Tensor)> {
    let input_ids = Tensor::new(ids, &Device::Cpu)?.unsqueeze(0)?;
    let mask = Tensor::ones((1, ids.len()), DType::U8, &Device::Cpu)?;
    Ok((input_ids, mask))
}

#[test]
fn preprocess_expands_image_and_keeps_query() -> Result<()> {
    let (engine, _) = test_engine()?;
    let inputs = engine.preprocess_inputs("<image>\nDescribe this image", &[solid_image(64, 32)], 9)?;
    assert_eq!(inputs.prompt, "<image>\nDescribe this image");
    let ids = inputs.input_ids.to_vec1::<i64>()?;
    assert_eq!(ids, vec![IMAGE_ID, IMAGE_ID, IMAGE_ID, 4, 5, 6]);
    let pixels = inputs.pixel_values.expect("pixel values");
    assert_eq!(pixels.dims(), &[3, 3, 28, 28]);
    assert_eq!(pixels.dtype(), DType::F32);
    Ok(())
}

#[test]
fn text_only_query_has_no_pixels() -> Result<()> {
    let (engine, _) = test_engine()?;
    let inputs = engine.preprocess_inputs("Describe this image", &[], 9)?;
    assert!(inputs.pixel_values.is_none());
    Ok(())
}

#[test]
fn greedy_decode_stops_at_eos() -> Result<()> {
    let (engine, log) = test_engine()?;
    let (input_ids, mask) = prompt_tensors(&[IMAGE_ID, 4, 5, 6])?;
    let config = GenerationConfig::greedy(vec![EOS_ID], PAD_ID);
    let output = engine.generate(&input_ids, &[None], &mask, &config)?;
    assert_eq!(output.dims(), &[1, 3]);
    assert_eq!(output.get(0)?.to_vec1::<i64>()?, vec![7, 8, 9]);

    let log = log.lock().expect("log lock");
    assert_eq!(log.prefills, 1);
    assert_eq!(log.steps, 3);
    Ok(())
}

#[test]
fn decoding_without_cache_matches_cached_decoding() -> Result<()> {
    let (engine, log) = test_engine()?;
    let (input_ids, mask) = prompt_tensors(&[IMAGE_ID, 4, 5, 6])?;
    let mut config = GenerationConfig::greedy(vec![EOS_ID], PAD_ID);
    let cached = engine.generate(&input_ids, &[None], &mask, &config)?;
    config.use_cache = false;
    let uncached = engine.generate(&input_ids, &[None], &mask, &config)?;
    assert_eq!(
        cached.get(0)?.to_vec1::<i64>()?,
        uncached.get(0)?.to_vec1::<i64>()?
    );

    let log = log.lock().expect("log lock");
    // one cached prefill plus four full re-runs (three tokens, then EOS)
    assert_eq!(log.prefills, 5);
    assert_eq!(log.prefill_lengths[1..], [4, 5, 6, 7]);
    Ok(())
}

#[test]
fn max_new_tokens_caps_output() -> Result<()> {
    let (engine, _) = test_engine()?;
    let (input_ids, mask) = prompt_tensors(&[4])?;
    let mut config = GenerationConfig::greedy(vec![EOS_ID], PAD_ID);
    config.max_new_tokens = 2;
    let output = engine.generate(&input_ids, &[None], &mask, &config)?;
    assert_eq!(output.get(0)?.to_vec1::<i64>()?, vec![5, 6]);

    config.max_new_tokens = 0;
    let output = engine.generate(&input_ids, &[None], &mask, &config)?;
    assert_eq!(output.dims(), &[1, 0]);
    Ok(())
}

#[test]
fn sampling_and_batches_are_refused() -> Result<()> {
    let (engine, _) = test_engine()?;
    let (input_ids, mask) = prompt_tensors(&[4])?;
    let mut config = GenerationConfig::greedy(vec![EOS_ID], PAD_ID);
    config.do_sample = true;
    assert!(engine.generate(&input_ids, &[None], &mask, &config).is_err());

    let config = GenerationConfig::greedy(vec![EOS_ID], PAD_ID);
    let batch = Tensor::new(&[[4i64], [5]], &Device::Cpu)?;
    let batch_mask = Tensor::ones((2, 1), DType::U8, &Device::Cpu)?;
    assert!(engine.generate(&batch, &[None], &batch_mask, &config).is_err());
    Ok(())
}

#[test]
fn pixel_values_reach_the_backbone() -> Result<()> {
    let (engine, log) = test_engine()?;
    let inputs = engine.preprocess_inputs("<image>\nDescribe this image", &[solid_image(30, 30)], 9)?;
    let batch = prepare_batch(&engine, inputs)?;
    let config = GenerationConfig::greedy(vec![EOS_ID], PAD_ID);
    engine.generate(&batch.input_ids, &batch.pixel_values, &batch.attention_mask, &config)?;
    assert!(log.lock().expect("log lock").saw_pixels);
    Ok(())
}

#[test]
fn decode_skips_special_tokens() -> Result<()> {
    let (engine, _) = test_engine()?;
    let tokenizer = engine.text_tokenizer();
    assert_eq!(tokenizer.pad_token_id(), PAD_ID);
    assert_eq!(tokenizer.decode(&[IMAGE_ID, 7, 8, EOS_ID, PAD_ID], true)?, "a cat");
    assert!(tokenizer.decode(&[IMAGE_ID, 7], false)?.contains("<image>"));
    Ok(())
}
