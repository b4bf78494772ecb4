use std::{path::PathBuf, sync::OnceLock};

use anyhow::{Context, Result};
use hf_hub::{
    Cache, CacheRepo, Repo, RepoType,
    api::sync::{ApiBuilder, ApiRepo},
};
use tracing::{debug, info};

use super::AssetProvider;
use crate::ModelSource;

pub(crate) struct HuggingFaceProvider {
    repo: ApiRepo,
    cache: CacheRepo,
    listing: OnceLock<Vec<String>>,
    label: String,
}

impl HuggingFaceProvider {
    pub(crate) fn new(source: &ModelSource) -> Result<Self> {
        let cache = match source.cache_dir.as_ref() {
            Some(dir) => Cache::new(dir.clone()),
            None => Cache::default(),
        };
        let api = ApiBuilder::from_cache(cache.clone())
            .with_progress(false)
            .build()
            .context("failed to initialise Hugging Face API client")?;
        let hub_repo = Repo::with_revision(
            source.id.clone(),
            RepoType::Model,
            source.revision.clone(),
        );
        Ok(Self {
            repo: api.repo(hub_repo.clone()),
            cache: cache.repo(hub_repo),
            listing: OnceLock::new(),
            label: format!("Hugging Face Hub {}@{}", source.id, source.revision),
        })
    }

    fn listing(&self) -> Result<&[String]> {
        if let Some(files) = self.listing.get() {
            return Ok(files);
        }
        let info = self
            .repo
            .info()
            .with_context(|| format!("failed to list files of {}", self.label))?;
        let files = info.siblings.into_iter().map(|s| s.rfilename).collect();
        Ok(self.listing.get_or_init(|| files))
    }
}

impl AssetProvider for HuggingFaceProvider {
    fn display_name(&self) -> String {
        self.label.clone()
    }

    fn fetch(&self, remote_name: &str) -> Result<PathBuf> {
        info!("Fetching {remote_name} from {}", self.label);
        self.repo
            .get(remote_name)
            .with_context(|| format!("failed to download {remote_name} from {}", self.label))
    }

    fn fetch_optional(&self, remote_name: &str) -> Result<Option<PathBuf>> {
        optional_file(
            remote_name,
            self.cache.get(remote_name),
            || self.listing(),
            |name| self.fetch(name),
        )
    }
}

/// A cached copy wins; otherwise the file is absent only when the repo
/// listing does not name it. Listing and download failures propagate.
fn optional_file<'a>(
    remote_name: &str,
    cached: Option<PathBuf>,
    listing: impl FnOnce() -> Result<&'a [String]>,
    fetch: impl FnOnce(&str) -> Result<PathBuf>,
) -> Result<Option<PathBuf>> {
    if let Some(path) = cached {
        return Ok(Some(path));
    }
    if !listing()?.iter().any(|name| name == remote_name) {
        debug!("optional file {remote_name} is not in the repository");
        return Ok(None);
    }
    fetch(remote_name).map(Some)
}
