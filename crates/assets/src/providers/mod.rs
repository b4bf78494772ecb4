use std::path::PathBuf;

use anyhow::Result;

mod hugging_face;
mod local;

pub(crate) use hugging_face::HuggingFaceProvider;
pub(crate) use local::LocalDirProvider;

pub(crate) trait AssetProvider {
    fn display_name(&self) -> String;
    /// Local path of `remote_name`, downloading it first if needed.
    fn fetch(&self, remote_name: &str) -> Result<PathBuf>;
    /// Like [`AssetProvider::fetch`], but a missing file is `Ok(None)`.
    fn fetch_optional(&self, remote_name: &str) -> Result<Option<PathBuf>>;
}
