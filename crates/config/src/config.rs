use std::{
    fs,
    ops::AddAssign,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, anyhow, ensure};
use serde::{Deserialize, Serialize};
use vision_chat_core::runtime::{DeviceKind, Precision};

use crate::fs::{VirtualFileSystem, VirtualPath};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub model: ModelSettings,
    pub inference: InferenceSettings,
    pub server: ServerSettings,
}

/// Which checkpoint to serve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    /// Local directory or Hugging Face repo id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub revision: String,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            id: None,
            revision: "main".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceSettings {
    pub device: DeviceKind,
    pub precision: Precision,
    pub max_memory: f32,
}

impl Default for InferenceSettings {
    fn default() -> Self {
        Self {
            device: DeviceKind::Cuda,
            precision: Precision::Bf16,
            max_memory: 0.9,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub body_limit_mb: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            body_limit_mb: 50,
        }
    }
}

#[derive(Debug, Clone)]
pub enum ResourceLocation {
    Virtual(VirtualPath),
    Physical(PathBuf),
}

impl ResourceLocation {
    pub fn display_with(&self, fs: &impl VirtualFileSystem) -> Result<String> {
        match self {
            ResourceLocation::Virtual(path) => {
                fs.with_physical_path(path, |p| Ok(p.display().to_string()))
            }
            ResourceLocation::Physical(path) => Ok(path.display().to_string()),
        }
    }
}

/// Where the configuration was read from (or written to, on first run).
#[derive(Debug, Clone)]
pub struct ConfigDescriptor {
    pub location: ResourceLocation,
}

impl AppConfig {
    pub fn load_or_init(
        fs: &impl VirtualFileSystem,
        override_path: Option<&Path>,
    ) -> Result<(Self, ConfigDescriptor)> {
        match override_path {
            Some(path) => load_physical_config(path),
            None => load_virtual_config(fs),
        }
    }

    pub fn load_with_overrides(
        fs: &impl VirtualFileSystem,
        overrides: &ConfigOverrides,
    ) -> Result<(Self, ConfigDescriptor)> {
        let (mut config, descriptor) = Self::load_or_init(fs, overrides.config_path.as_deref())?;
        config += overrides;
        config.validate()?;
        Ok((config, descriptor))
    }

    pub fn validate(&self) -> Result<()> {
        let max_memory = self.inference.max_memory;
        ensure!(
            max_memory > 0.0 && max_memory <= 1.0,
            "inference.max_memory must be in (0, 1], got {max_memory}"
        );
        ensure!(
            self.server.body_limit_mb > 0,
            "server.body_limit_mb must be positive"
        );
        Ok(())
    }

    pub fn model_id(&self) -> Result<&str> {
        self.model
            .id
            .as_deref()
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| anyhow!("no model configured; pass --model or set model.id"))
    }

    pub fn body_limit_bytes(&self) -> u64 {
        self.server.body_limit_mb.saturating_mul(1024 * 1024)
    }

    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(model_id) = overrides.model_id.as_ref() {
            self.model.id = Some(model_id.clone());
        }
        if let Some(revision) = overrides.revision.as_ref() {
            self.model.revision = revision.clone();
        }
        if let Some(device) = overrides.inference.device {
            self.inference.device = device;
        }
        if let Some(precision) = overrides.inference.precision {
            self.inference.precision = precision;
        }
        if let Some(max_memory) = overrides.inference.max_memory {
            self.inference.max_memory = max_memory;
        }
        if let Some(host) = overrides.server.host.as_ref() {
            self.server.host = host.clone();
        }
        if let Some(port) = overrides.server.port {
            self.server.port = port;
        }
        if let Some(limit) = overrides.server.body_limit_mb {
            self.server.body_limit_mb = limit;
        }
    }
}

fn load_virtual_config(fs: &impl VirtualFileSystem) -> Result<(AppConfig, ConfigDescriptor)> {
    let path = VirtualPath::config_file();
    let descriptor = ConfigDescriptor {
        location: ResourceLocation::Virtual(path.clone()),
    };
    if !fs.exists(&path)? {
        let cfg = AppConfig::default();
        let serialized = toml::to_string_pretty(&cfg)?;
        fs.write(&path, serialized.as_bytes())?;
        return Ok((cfg, descriptor));
    }

    let bytes = fs.read(&path)?;
    let contents = String::from_utf8(bytes).context("configuration file is not valid UTF-8")?;
    let cfg: AppConfig = toml::from_str(&contents).context("failed to parse configuration file")?;
    Ok((cfg, descriptor))
}

fn load_physical_config(path: &Path) -> Result<(AppConfig, ConfigDescriptor)> {
    let path_buf = path.to_path_buf();
    let descriptor = ConfigDescriptor {
        location: ResourceLocation::Physical(path_buf.clone()),
    };
    if !path.exists() {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create directory {}", parent.display()))?;
        }
        let cfg = AppConfig::default();
        let serialized = toml::to_string_pretty(&cfg)?;
        fs::write(&path_buf, serialized)
            .with_context(|| format!("failed to write configuration to {}", path_buf.display()))?;
        return Ok((cfg, descriptor));
    }

    let contents = fs::read_to_string(&path_buf)
        .with_context(|| format!("failed to read configuration from {}", path_buf.display()))?;
    let cfg: AppConfig = toml::from_str(&contents)
        .with_context(|| format!("failed to parse configuration at {}", path_buf.display()))?;
    Ok((cfg, descriptor))
}

/// Command-line values layered over the file configuration.
#[derive(Debug, Default, Clone)]
pub struct ConfigOverrides {
    pub config_path: Option<PathBuf>,
    pub model_id: Option<String>,
    pub revision: Option<String>,
    pub inference: InferenceOverride,
    pub server: ServerOverride,
}

#[derive(Debug, Default, Clone)]
pub struct InferenceOverride {
    pub device: Option<DeviceKind>,
    pub precision: Option<Precision>,
    pub max_memory: Option<f32>,
}

#[derive(Debug, Default, Clone)]
pub struct ServerOverride {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub body_limit_mb: Option<u64>,
}

pub trait ConfigOverride {
    fn apply(self, config: &mut AppConfig);
}

impl ConfigOverride for &ConfigOverrides {
    fn apply(self, config: &mut AppConfig) {
        config.apply_overrides(self);
    }
}

impl<O: ConfigOverride> AddAssign<O> for AppConfig {
    fn add_assign(&mut self, rhs: O) {
        rhs.apply(self);
    }
}
