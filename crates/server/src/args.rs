use std::path::PathBuf;

use clap::Parser;
use vision_chat_config::{AppConfig, ConfigOverride, ConfigOverrides};
use vision_chat_core::runtime::{DeviceKind, Precision};

#[derive(Parser, Debug)]
#[command(author, version, about = "Multimodal chat completion server", long_about = None)]
pub struct Args {
    /// Optional path to a configuration file (defaults to platform config dir).
    #[arg(long, value_name = "PATH", help_heading = "Application")]
    pub config: Option<PathBuf>,

    /// Local model directory or Hugging Face repo id (required unless set in the config file).
    #[arg(long, value_name = "ID", help_heading = "Model")]
    pub model: Option<String>,

    /// Hub revision to download.
    #[arg(long, value_name = "REV", help_heading = "Model")]
    pub revision: Option<String>,

    /// Device backend (cpu/metal/cuda).
    #[arg(long, help_heading = "Inference")]
    pub device: Option<DeviceKind>,

    /// Weight precision (float32/float16/bfloat16).
    #[arg(long = "torch-dtype", value_name = "DTYPE", help_heading = "Inference")]
    pub torch_dtype: Option<Precision>,

    /// Fraction of accelerator memory the model may use, in (0, 1].
    #[arg(long, value_name = "FRACTION", help_heading = "Inference")]
    pub max_memory: Option<f32>,

    /// Host/IP for Rocket to bind to.
    #[arg(long, help_heading = "Application")]
    pub host: Option<String>,

    /// TCP port for Rocket.
    #[arg(long, help_heading = "Application")]
    pub port: Option<u16>,

    /// Maximum request body size in megabytes.
    #[arg(long, value_name = "MB", help_heading = "Application")]
    pub body_limit_mb: Option<u64>,
}

impl From<&Args> for ConfigOverrides {
    fn from(args: &Args) -> Self {
        let mut overrides = ConfigOverrides::default();
        overrides.config_path = args.config.clone();
        overrides.model_id = args.model.clone();
        overrides.revision = args.revision.clone();
        overrides.inference.device = args.device;
        overrides.inference.precision = args.torch_dtype;
        overrides.inference.max_memory = args.max_memory;
        overrides.server.host = args.host.clone();
        overrides.server.port = args.port;
        overrides.server.body_limit_mb = args.body_limit_mb;
        overrides
    }
}

impl ConfigOverride for &Args {
    fn apply(self, config: &mut AppConfig) {
        config.apply_overrides(&ConfigOverrides::from(self));
    }
}
