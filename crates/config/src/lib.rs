pub mod config;
pub mod fs;

pub use config::{
    AppConfig, ConfigDescriptor, ConfigOverride, ConfigOverrides, InferenceOverride,
    InferenceSettings, ModelSettings, ResourceLocation, ServerOverride, ServerSettings,
};
pub use fs::{LocalFileSystem, Namespace, VirtualFileSystem, VirtualPath};
