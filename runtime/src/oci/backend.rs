//! ImageServer - the collaborator interface consumed by the pull path,
//! and its registry/disk-backed implementation.

use std::sync::Arc;

use async_trait::async_trait;
use stevedore_core::error::Result;
use stevedore_core::PullConfig;

use super::reference::{self, ImageReference};
use super::registry::{RegistryAuth, RegistryClient, RemoteImage};
use super::store::{ImageStore, StoredImage};

/// Locally stored counterpart of an image, as seen by the pull path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageRecord {
    /// Stable image ID
    pub id: String,
    /// Digest of the config blob the local copy was built from (may be empty)
    pub config_digest: String,
    /// Registry-qualified digests known to refer to this content
    pub repo_digests: Vec<String>,
}

impl From<StoredImage> for ImageRecord {
    fn from(image: StoredImage) -> Self {
        Self {
            id: image.id,
            config_digest: image.config_digest,
            repo_digests: image.repo_digests,
        }
    }
}

/// Inspectable, registry-session-bound image handle.
pub trait RemoteHandle: Send + Sync {
    /// Digest of the image's configuration blob; empty if the registry did
    /// not report one.
    fn config_digest(&self) -> &str;
}

impl RemoteHandle for RemoteImage {
    fn config_digest(&self) -> &str {
        RemoteImage::config_digest(self)
    }
}

/// Capabilities the pull path needs from the outside world.
#[async_trait]
pub trait ImageServer: Send + Sync {
    type Handle: RemoteHandle;

    /// Expand a caller reference into ordered, fully-qualified candidate names.
    async fn resolve_names(&self, reference: &str) -> Result<Vec<String>>;

    /// Contact the registry for `name` without transferring layers.
    async fn prepare_image(&self, name: &str, auth: &RegistryAuth) -> Result<Self::Handle>;

    /// Look up the local record for `name`; `Ok(None)` means not found.
    async fn image_status(&self, name: &str) -> Result<Option<ImageRecord>>;

    /// Transfer and commit the full image content into the local store.
    async fn pull_image(&self, handle: &Self::Handle, auth: &RegistryAuth) -> Result<()>;
}

/// ImageServer backed by OCI registries and the disk image store.
pub struct OciImageServer {
    search_registries: Vec<String>,
    registry: RegistryClient,
    store: Arc<ImageStore>,
}

impl OciImageServer {
    pub fn new(config: &PullConfig, store: Arc<ImageStore>) -> Self {
        Self {
            search_registries: config.search_registries.clone(),
            registry: RegistryClient::with_insecure_registries(config.insecure_registries.clone()),
            store,
        }
    }

    /// Open the image store described by `config`.
    pub fn from_config(config: &PullConfig) -> Result<Self> {
        let store = ImageStore::new(&config.resolved_store_dir(), config.max_cache_bytes)?;
        Ok(Self::new(config, Arc::new(store)))
    }

    pub fn store(&self) -> &Arc<ImageStore> {
        &self.store
    }
}

#[async_trait]
impl ImageServer for OciImageServer {
    type Handle = RemoteImage;

    async fn resolve_names(&self, reference: &str) -> Result<Vec<String>> {
        let names = reference::resolve_names(reference, &self.search_registries)?;
        Ok(names.iter().map(ImageReference::full_reference).collect())
    }

    async fn prepare_image(&self, name: &str, auth: &RegistryAuth) -> Result<RemoteImage> {
        let reference = ImageReference::parse(name)?;
        self.registry.inspect(&reference, auth).await
    }

    async fn image_status(&self, name: &str) -> Result<Option<ImageRecord>> {
        Ok(self.store.status(name).await?.map(ImageRecord::from))
    }

    async fn pull_image(&self, handle: &RemoteImage, auth: &RegistryAuth) -> Result<()> {
        let name = handle.reference().full_reference();
        let _guard = self.store.lock_reference(&name).await;

        // Another request may have committed this content while we waited.
        if let Some(current) = self.store.status(&name).await? {
            if !current.config_digest.is_empty() && current.config_digest == handle.config_digest() {
                tracing::debug!(reference = %name, "Image committed by a concurrent pull");
                return Ok(());
            }
        }

        let staging_root = self.store.staging_dir();
        tokio::fs::create_dir_all(&staging_root).await?;
        let staging = tempfile::TempDir::new_in(&staging_root)?;

        self.registry.fetch(handle, auth, staging.path()).await?;
        self.store
            .commit(&name, handle.config_digest(), &handle.repo_digest(), staging.path())
            .await?;

        let evicted = self.store.evict(&name).await?;
        if !evicted.is_empty() {
            tracing::info!(
                count = evicted.len(),
                references = ?evicted,
                "Evicted images from cache"
            );
        }

        Ok(())
    }
}
