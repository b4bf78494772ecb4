use anyhow::{Context, Result};
use candle_core::{DType, Device};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    Cpu,
    Metal,
    #[default]
    Cuda,
}

/// Numeric precision of the loaded weights and pixel tensors.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
pub enum Precision {
    #[serde(rename = "float32", alias = "f32")]
    #[value(name = "float32", alias = "f32")]
    F32,
    #[serde(rename = "float16", alias = "f16")]
    #[value(name = "float16", alias = "f16")]
    F16,
    #[default]
    #[serde(rename = "bfloat16", alias = "bf16")]
    #[value(name = "bfloat16", alias = "bf16")]
    Bf16,
}

pub fn prepare_device(device: DeviceKind) -> Result<Device> {
    match device {
        DeviceKind::Cpu => Ok(Device::Cpu),
        DeviceKind::Metal => Device::new_metal(0).context("failed to initialise Metal device"),
        DeviceKind::Cuda => Device::new_cuda(0).context("failed to initialise CUDA device"),
    }
}

pub fn prepare_device_and_dtype(device: DeviceKind, precision: Precision) -> Result<(Device, DType)> {
    let device = prepare_device(device)?;
    Ok((device, dtype_from_precision(precision)))
}

pub fn dtype_from_precision(p: Precision) -> DType {
    match p {
        Precision::F32 => DType::F32,
        Precision::F16 => DType::F16,
        Precision::Bf16 => DType::BF16,
    }
}

/// Human-readable device label for startup logs.
pub fn describe_device(device: &Device) -> &'static str {
    if device.is_cuda() {
        "cuda"
    } else if device.is_metal() {
        "metal"
    } else {
        "cpu"
    }
}
