use std::path::PathBuf;

use anyhow::{Result, bail};

use super::AssetProvider;

pub(crate) struct LocalDirProvider {
    root: PathBuf,
}

impl LocalDirProvider {
    pub(crate) fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl AssetProvider for LocalDirProvider {
    fn display_name(&self) -> String {
        format!("local directory {}", self.root.display())
    }

    fn fetch(&self, remote_name: &str) -> Result<PathBuf> {
        match self.fetch_optional(remote_name)? {
            Some(path) => Ok(path),
            None => bail!("{remote_name} not found in {}", self.root.display()),
        }
    }

    fn fetch_optional(&self, remote_name: &str) -> Result<Option<PathBuf>> {
        let path = self.root.join(remote_name);
        Ok(path.is_file().then_some(path))
    }
}
