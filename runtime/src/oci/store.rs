//! Disk-based OCI image store with LRU eviction.
//!
//! Stores pulled OCI images on disk, keyed by config digest, with an
//! in-memory index backed by a persistent `index.json` file. Each record
//! carries the digest bookkeeping the pull path compares against.
//!
//! Layouts are assembled under `tmp/` and renamed into `sha256/<id>`, so a
//! layout directory is either absent or complete.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use stevedore_core::error::{ImageError, Result};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use super::registry::digest_hex;

/// Metadata for a stored OCI image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredImage {
    /// Stable image ID (hex of the config digest)
    pub id: String,
    /// Image reference string (e.g., "ghcr.io/org/app:v0.1.0")
    pub reference: String,
    /// Digest of the config blob this copy was built from
    #[serde(default)]
    pub config_digest: String,
    /// Registry-qualified digests known to refer to this content
    #[serde(default)]
    pub repo_digests: Vec<String>,
    /// Total size in bytes
    pub size_bytes: u64,
    /// When the image was pulled
    pub pulled_at: DateTime<Utc>,
    /// When the image was last used
    pub last_used: DateTime<Utc>,
    /// Path to the OCI image layout on disk
    pub path: PathBuf,
}

impl StoredImage {
    fn matches(&self, key: &str) -> bool {
        self.reference == key || self.id == key || self.repo_digests.iter().any(|d| d == key)
    }
}

/// Persistent index stored as JSON on disk.
#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreIndex {
    images: Vec<StoredImage>,
}

/// Disk-based image store with in-memory index and LRU eviction.
pub struct ImageStore {
    /// Root directory for image storage
    store_dir: PathBuf,
    /// In-memory index: reference → StoredImage
    index: Arc<RwLock<HashMap<String, StoredImage>>>,
    /// Held across snapshot, write and rename of `index.json`
    persist_lock: Mutex<()>,
    /// Pull locks, one per reference with a pull in flight
    pull_locks: DashMap<String, Arc<Mutex<()>>>,
    /// Maximum total size in bytes
    max_size_bytes: u64,
}

impl ImageStore {
    /// Create a new image store.
    ///
    /// Creates the store directory if it doesn't exist and loads
    /// any existing index from disk.
    pub fn new(store_dir: &Path, max_size_bytes: u64) -> Result<Self> {
        std::fs::create_dir_all(store_dir).map_err(|e| {
            ImageError::StoreError(format!(
                "Failed to create image store directory {}: {}",
                store_dir.display(),
                e
            ))
        })?;

        let index = load_index(store_dir)?;
        Ok(Self {
            store_dir: store_dir.to_path_buf(),
            index: Arc::new(RwLock::new(index)),
            persist_lock: Mutex::new(()),
            pull_locks: DashMap::new(),
            max_size_bytes,
        })
    }

    /// Look up an image by reference, ID, or repo digest.
    ///
    /// Returns `Ok(None)` when nothing matches. An entry whose layout
    /// directory has vanished is dropped and reported as not found; an entry
    /// whose layout is damaged is an error.
    ///
    /// `last_used` is only updated in memory; it reaches disk with the next
    /// commit or removal.
    pub async fn status(&self, key: &str) -> Result<Option<StoredImage>> {
        let mut index = self.index.write().await;
        let Some(reference) = index
            .get(key)
            .or_else(|| index.values().find(|img| img.matches(key)))
            .map(|img| img.reference.clone())
        else {
            return Ok(None);
        };

        let Some(image) = index.get_mut(&reference) else {
            return Ok(None);
        };

        if !tokio::fs::try_exists(&image.path).await.unwrap_or(false) {
            tracing::warn!(reference = %reference, path = %image.path.display(), "Stored image directory missing, dropping entry");
            index.remove(&reference);
            drop(index);
            self.save_index().await?;
            return Ok(None);
        }

        if !tokio::fs::try_exists(image.path.join("index.json")).await.unwrap_or(false) {
            return Err(ImageError::StoreError(format!(
                "Image layout for {} at {} is missing index.json",
                reference,
                image.path.display()
            )));
        }

        image.last_used = Utc::now();
        Ok(Some(image.clone()))
    }

    /// Record an image from a source OCI layout.
    ///
    /// Installs a copy of the layout as `sha256/<config hex>/` unless that
    /// content is already present, then records `reference` with the given
    /// digests. Recording the same content again merges its repo digests.
    pub async fn commit(
        &self,
        reference: &str,
        config_digest: &str,
        repo_digest: &str,
        source_dir: &Path,
    ) -> Result<StoredImage> {
        if config_digest.is_empty() {
            return Err(ImageError::StoreError(format!(
                "Refusing to store {} without a config digest",
                reference
            )));
        }

        let id = digest_hex(config_digest).to_string();
        let target_dir = self.store_dir.join("sha256").join(&id);

        let (source, staging, target) = (
            source_dir.to_path_buf(),
            self.staging_dir(),
            target_dir.clone(),
        );
        let size_bytes = blocking(move || {
            install_layout(&source, &staging, &target)?;
            Ok(dir_size(&target))
        })
        .await
        .map_err(|e| ImageError::StoreError(format!("Failed to copy image to store: {}", e)))?;

        let now = Utc::now();

        let mut index = self.index.write().await;
        let mut repo_digests = vec![repo_digest.to_string()];
        if let Some(previous) = index.get(reference) {
            if previous.config_digest == config_digest {
                repo_digests.extend(
                    previous
                        .repo_digests
                        .iter()
                        .filter(|d| d.as_str() != repo_digest)
                        .cloned(),
                );
            }
        }

        let stored = StoredImage {
            id,
            reference: reference.to_string(),
            config_digest: config_digest.to_string(),
            repo_digests,
            size_bytes,
            pulled_at: now,
            last_used: now,
            path: target_dir,
        };
        let replaced = index.insert(reference.to_string(), stored.clone());
        let orphaned = replaced
            .filter(|old| old.path != stored.path)
            .filter(|old| !index.values().any(|img| img.path == old.path))
            .map(|old| old.path);
        drop(index);

        if let Some(path) = orphaned {
            remove_layout(&path).await?;
        }

        self.save_index().await?;

        tracing::debug!(reference = %reference, id = %stored.id, "Image recorded in store");
        Ok(stored)
    }

    /// Take the pull lock for `reference`.
    ///
    /// Concurrent pulls of the same reference queue behind the holder;
    /// distinct references do not contend. Locks nobody holds or waits on
    /// are dropped from the map.
    pub async fn lock_reference(&self, reference: &str) -> OwnedMutexGuard<()> {
        self.pull_locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        let lock = self
            .pull_locks
            .entry(reference.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }

    /// Remove an image by reference.
    pub async fn remove(&self, reference: &str) -> Result<()> {
        let mut index = self.index.write().await;
        let Some(image) = index.remove(reference) else {
            return Err(ImageError::StoreError(format!(
                "Image not found: {}",
                reference
            )));
        };

        // Keep content that another reference still points to
        let still_used = index.values().any(|img| img.path == image.path);
        drop(index);

        if !still_used {
            remove_layout(&image.path).await?;
        }
        self.pull_locks
            .remove_if(reference, |_, lock| Arc::strong_count(lock) == 1);

        self.save_index().await
    }

    /// List all stored images.
    pub async fn list(&self) -> Vec<StoredImage> {
        let index = self.index.read().await;
        index.values().cloned().collect()
    }

    /// Evict least-recently-used images until total size is under the limit.
    ///
    /// `keep` is never evicted. Returns the references of evicted images.
    pub async fn evict(&self, keep: &str) -> Result<Vec<String>> {
        let mut evicted = Vec::new();

        while self.total_size().await > self.max_size_bytes {
            let lru_ref = {
                let index = self.index.read().await;
                index
                    .values()
                    .filter(|img| img.reference != keep)
                    .min_by_key(|img| img.last_used)
                    .map(|img| img.reference.clone())
            };

            match lru_ref {
                Some(reference) => {
                    self.remove(&reference).await?;
                    evicted.push(reference);
                }
                None => break,
            }
        }

        Ok(evicted)
    }

    /// Get total size of all stored images in bytes.
    ///
    /// Content shared by several references is counted once.
    pub async fn total_size(&self) -> u64 {
        let index = self.index.read().await;
        let mut by_path: HashMap<&Path, u64> = HashMap::new();
        for img in index.values() {
            by_path.insert(img.path.as_path(), img.size_bytes);
        }
        by_path.values().sum()
    }

    /// Directory used for staging downloads before they are committed.
    pub fn staging_dir(&self) -> PathBuf {
        self.store_dir.join("tmp")
    }

    /// Get the store directory path.
    pub fn store_dir(&self) -> &Path {
        &self.store_dir
    }

    /// Write the current index to `index.json`.
    ///
    /// The snapshot is taken under `persist_lock`, so the last writer always
    /// persists a state at least as new as every earlier writer's.
    async fn save_index(&self) -> Result<()> {
        let _persist = self.persist_lock.lock().await;

        let store_index = {
            let index = self.index.read().await;
            StoreIndex {
                images: index.values().cloned().collect(),
            }
        };

        let data = serde_json::to_string_pretty(&store_index)?;
        let index_path = self.store_dir.join("index.json");
        let tmp_path = index_path.with_extension("json.tmp");

        tokio::fs::write(&tmp_path, data).await.map_err(|e| {
            ImageError::StoreError(format!(
                "Failed to write image store index {}: {}",
                tmp_path.display(),
                e
            ))
        })?;
        tokio::fs::rename(&tmp_path, &index_path).await.map_err(|e| {
            ImageError::StoreError(format!(
                "Failed to replace image store index {}: {}",
                index_path.display(),
                e
            ))
        })?;

        Ok(())
    }
}

/// Load the persisted index, skipping entries whose directories are gone.
fn load_index(store_dir: &Path) -> Result<HashMap<String, StoredImage>> {
    let index_path = store_dir.join("index.json");
    if !index_path.exists() {
        return Ok(HashMap::new());
    }

    let data = std::fs::read_to_string(&index_path).map_err(|e| {
        ImageError::StoreError(format!(
            "Failed to read image store index {}: {}",
            index_path.display(),
            e
        ))
    })?;

    let store_index: StoreIndex = serde_json::from_str(&data).map_err(|e| {
        ImageError::StoreError(format!("Failed to parse image store index: {}", e))
    })?;

    Ok(store_index
        .images
        .into_iter()
        .filter(|image| image.path.exists())
        .map(|image| (image.reference.clone(), image))
        .collect())
}

/// Run blocking filesystem work off the async workers.
async fn blocking<T, F>(f: F) -> std::io::Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> std::io::Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?
}

/// Copy `source` into a fresh directory under `staging` and rename it to
/// `target`. A partial copy is removed with its staging directory.
fn install_layout(source: &Path, staging: &Path, target: &Path) -> std::io::Result<()> {
    if target.join("index.json").exists() {
        return Ok(());
    }
    // Left over from an interrupted install by an older process
    if target.exists() && !target.join("index.json").exists() {
        std::fs::remove_dir_all(target)?;
    }

    std::fs::create_dir_all(staging)?;
    let scratch = tempfile::TempDir::new_in(staging)?;
    let layout = scratch.path().join("layout");
    copy_dir_recursive(source, &layout)?;

    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent)?;
    }
    match std::fs::rename(&layout, target) {
        Ok(()) => Ok(()),
        // A concurrent commit of the same content got there first
        Err(_) if target.join("index.json").exists() => Ok(()),
        Err(e) => Err(e),
    }
}

async fn remove_layout(path: &Path) -> Result<()> {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(ImageError::StoreError(format!(
            "Failed to remove image directory {}: {}",
            path.display(),
            e
        ))),
    }
}

/// Recursively copy a directory.
fn copy_dir_recursive(src: &Path, dst: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dst)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let src_path = entry.path();
        let dst_path = dst.join(entry.file_name());
        if src_path.is_dir() {
            copy_dir_recursive(&src_path, &dst_path)?;
        } else {
            std::fs::copy(&src_path, &dst_path)?;
        }
    }
    Ok(())
}

/// Calculate total size of a directory recursively.
fn dir_size(path: &Path) -> u64 {
    let mut total = 0;
    if let Ok(entries) = std::fs::read_dir(path) {
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                total += dir_size(&path);
            } else if let Ok(meta) = path.metadata() {
                total += meta.len();
            }
        }
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_oci_layout(dir: &Path) {
        std::fs::create_dir_all(dir.join("blobs/sha256")).unwrap();
        std::fs::write(dir.join("oci-layout"), r#"{"imageLayoutVersion":"1.0.0"}"#).unwrap();
        std::fs::write(dir.join("index.json"), r#"{"manifests":[]}"#).unwrap();
        std::fs::write(dir.join("blobs/sha256/testblob"), "x".repeat(1024)).unwrap();
    }

    fn setup(max: u64) -> (TempDir, ImageStore, PathBuf) {
        let tmp = TempDir::new().unwrap();
        let source_dir = tmp.path().join("source");
        create_test_oci_layout(&source_dir);
        let store = ImageStore::new(&tmp.path().join("store"), max).unwrap();
        (tmp, store, source_dir)
    }

    #[tokio::test]
    async fn test_new_creates_directory() {
        let tmp = TempDir::new().unwrap();
        let store_dir = tmp.path().join("images");
        let store = ImageStore::new(&store_dir, 1024 * 1024).unwrap();
        assert!(store_dir.exists());
        assert_eq!(store.total_size().await, 0);
    }

    #[tokio::test]
    async fn test_commit_and_status() {
        let (_tmp, store, source) = setup(10 * 1024 * 1024);

        let stored = store
            .commit("docker.io/library/nginx:latest", "sha256:abc123", "docker.io/library/nginx@sha256:m1", &source)
            .await
            .unwrap();

        assert_eq!(stored.id, "abc123");
        assert_eq!(stored.config_digest, "sha256:abc123");
        assert_eq!(stored.repo_digests, vec!["docker.io/library/nginx@sha256:m1"]);
        assert!(stored.size_bytes > 0);
        assert!(stored.path.exists());

        let by_ref = store.status("docker.io/library/nginx:latest").await.unwrap().unwrap();
        assert_eq!(by_ref.id, "abc123");

        let by_id = store.status("abc123").await.unwrap().unwrap();
        assert_eq!(by_id.reference, "docker.io/library/nginx:latest");

        let by_digest = store.status("docker.io/library/nginx@sha256:m1").await.unwrap().unwrap();
        assert_eq!(by_digest.id, "abc123");
    }

    #[tokio::test]
    async fn test_status_not_found() {
        let (_tmp, store, _source) = setup(1024 * 1024);
        assert!(store.status("nonexistent").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_status_drops_vanished_directory() {
        let (_tmp, store, source) = setup(10 * 1024 * 1024);
        let stored = store.commit("app:v1", "sha256:aaa", "r/app@sha256:1", &source).await.unwrap();
        std::fs::remove_dir_all(&stored.path).unwrap();

        assert!(store.status("app:v1").await.unwrap().is_none());
        assert!(store.list().await.is_empty());
    }

    #[tokio::test]
    async fn test_status_damaged_layout_is_error() {
        let (_tmp, store, source) = setup(10 * 1024 * 1024);
        let stored = store.commit("app:v1", "sha256:aaa", "r/app@sha256:1", &source).await.unwrap();
        std::fs::remove_file(stored.path.join("index.json")).unwrap();

        let err = store.status("app:v1").await.unwrap_err();
        assert!(matches!(err, ImageError::StoreError(_)));
    }

    #[tokio::test]
    async fn test_commit_requires_config_digest() {
        let (_tmp, store, source) = setup(1024 * 1024);
        assert!(store.commit("app:v1", "", "r/app@sha256:1", &source).await.is_err());
    }

    #[tokio::test]
    async fn test_recommit_same_content_merges_repo_digests() {
        let (_tmp, store, source) = setup(10 * 1024 * 1024);
        store.commit("app:v1", "sha256:aaa", "r/app@sha256:1", &source).await.unwrap();
        let again = store.commit("app:v1", "sha256:aaa", "r/app@sha256:2", &source).await.unwrap();
        assert_eq!(again.repo_digests, vec!["r/app@sha256:2", "r/app@sha256:1"]);
    }

    #[tokio::test]
    async fn test_recommit_new_content_replaces_record() {
        let (_tmp, store, source) = setup(10 * 1024 * 1024);
        let old = store.commit("app:v1", "sha256:aaa", "r/app@sha256:1", &source).await.unwrap();
        let new = store.commit("app:v1", "sha256:bbb", "r/app@sha256:2", &source).await.unwrap();

        assert_eq!(new.repo_digests, vec!["r/app@sha256:2"]);
        assert!(!old.path.exists());
        assert_eq!(store.list().await.len(), 1);
    }

    #[tokio::test]
    async fn test_remove_keeps_shared_content() {
        let (_tmp, store, source) = setup(10 * 1024 * 1024);
        let a = store.commit("app:v1", "sha256:aaa", "r/app@sha256:1", &source).await.unwrap();
        store.commit("app:latest", "sha256:aaa", "r/app@sha256:1", &source).await.unwrap();

        store.remove("app:v1").await.unwrap();
        assert!(a.path.exists());
        assert!(store.status("app:latest").await.unwrap().is_some());

        store.remove("app:latest").await.unwrap();
        assert!(!a.path.exists());
    }

    #[tokio::test]
    async fn test_remove_nonexistent() {
        let (_tmp, store, _source) = setup(1024 * 1024);
        assert!(store.remove("nonexistent").await.is_err());
    }

    #[tokio::test]
    async fn test_total_size_counts_shared_content_once() {
        let (_tmp, store, source) = setup(10 * 1024 * 1024);
        let a = store.commit("app:v1", "sha256:aaa", "r/app@sha256:1", &source).await.unwrap();
        store.commit("app:latest", "sha256:aaa", "r/app@sha256:1", &source).await.unwrap();
        assert_eq!(store.total_size().await, a.size_bytes);
    }

    #[tokio::test]
    async fn test_lru_eviction_spares_kept_reference() {
        let (_tmp, store, source) = setup(100);

        store.commit("old:v1", "sha256:old1", "r/old@sha256:1", &source).await.unwrap();
        tokio::time::sleep(tokio::time::Duration::from_millis(10)).await;
        store.commit("new:v2", "sha256:new2", "r/new@sha256:2", &source).await.unwrap();

        let evicted = store.evict("new:v2").await.unwrap();
        assert_eq!(evicted, vec!["old:v1".to_string()]);
        assert!(store.status("new:v2").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_index_persistence() {
        let tmp = TempDir::new().unwrap();
        let store_dir = tmp.path().join("store");
        let source_dir = tmp.path().join("source");
        create_test_oci_layout(&source_dir);

        {
            let store = ImageStore::new(&store_dir, 10 * 1024 * 1024).unwrap();
            store
                .commit("nginx:latest", "sha256:persist", "r/nginx@sha256:1", &source_dir)
                .await
                .unwrap();
        }

        let store = ImageStore::new(&store_dir, 10 * 1024 * 1024).unwrap();
        let image = store.status("nginx:latest").await.unwrap().unwrap();
        assert_eq!(image.config_digest, "sha256:persist");
        assert_eq!(image.repo_digests, vec!["r/nginx@sha256:1"]);
    }

    #[tokio::test]
    async fn test_corrupt_index_fails_to_open() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("index.json"), "not json").unwrap();
        assert!(ImageStore::new(tmp.path(), 1024).is_err());
    }

    #[tokio::test]
    async fn test_lock_reference_serializes_same_reference() {
        let (_tmp, store, _source) = setup(1024);
        let store = Arc::new(store);

        let guard = store.lock_reference("app:v1").await;
        let contender = {
            let store = store.clone();
            tokio::spawn(async move {
                let _g = store.lock_reference("app:v1").await;
            })
        };
        tokio::time::sleep(tokio::time::Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        // A different reference is not blocked
        let _other = store.lock_reference("app:v2").await;

        drop(guard);
        contender.await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_concurrent_commits_of_distinct_references() {
        let tmp = TempDir::new().unwrap();
        let store_dir = tmp.path().join("store");
        let source = tmp.path().join("source");
        create_test_oci_layout(&source);
        let store = Arc::new(ImageStore::new(&store_dir, u64::MAX).unwrap());

        let mut tasks = Vec::new();
        for i in 0..64 {
            let store = store.clone();
            let source = source.clone();
            tasks.push(tokio::spawn(async move {
                store
                    .commit(
                        &format!("app{}:v1", i),
                        &format!("sha256:{:04x}", i),
                        &format!("r/app{}@sha256:1", i),
                        &source,
                    )
                    .await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }
        assert_eq!(store.list().await.len(), 64);
        drop(store);

        let reopened = ImageStore::new(&store_dir, u64::MAX).unwrap();
        assert_eq!(reopened.list().await.len(), 64);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_commits_of_shared_content() {
        let (_tmp, store, source) = setup(u64::MAX);
        let store = Arc::new(store);

        let mut tasks = Vec::new();
        for i in 0..8 {
            let store = store.clone();
            let source = source.clone();
            tasks.push(tokio::spawn(async move {
                let reference = format!("app:tag{}", i);
                store
                    .commit(&reference, "sha256:shared", "r/app@sha256:1", &source)
                    .await?;
                store.status(&reference).await
            }));
        }
        for task in tasks {
            let image = task.await.unwrap().unwrap().unwrap();
            assert!(image.path.join("index.json").exists());
        }
    }

    #[tokio::test]
    async fn test_failed_copy_leaves_no_layout() {
        let (tmp, store, _source) = setup(1024 * 1024);
        let missing = tmp.path().join("missing");

        assert!(store.commit("app:v1", "sha256:aaa", "r/app@sha256:1", &missing).await.is_err());
        assert!(!store.store_dir().join("sha256/aaa").exists());
        let leftovers = std::fs::read_dir(store.staging_dir()).unwrap().count();
        assert_eq!(leftovers, 0);
        assert!(store.list().await.is_empty());
    }

    #[tokio::test]
    async fn test_commit_replaces_incomplete_layout() {
        let (_tmp, store, source) = setup(10 * 1024 * 1024);
        let partial = store.store_dir().join("sha256/aaa");
        std::fs::create_dir_all(partial.join("blobs")).unwrap();

        store.commit("app:v1", "sha256:aaa", "r/app@sha256:1", &source).await.unwrap();
        let image = store.status("app:v1").await.unwrap().unwrap();
        assert!(image.path.join("index.json").exists());
    }

    #[tokio::test]
    async fn test_status_does_not_rewrite_index() {
        let (_tmp, store, source) = setup(10 * 1024 * 1024);
        store.commit("app:v1", "sha256:aaa", "r/app@sha256:1", &source).await.unwrap();
        let index_path = store.store_dir().join("index.json");
        let before = std::fs::read_to_string(&index_path).unwrap();

        tokio::time::sleep(tokio::time::Duration::from_millis(5)).await;
        store.status("app:v1").await.unwrap().unwrap();

        assert_eq!(std::fs::read_to_string(&index_path).unwrap(), before);
    }

    #[tokio::test]
    async fn test_idle_pull_locks_are_dropped() {
        let (_tmp, store, source) = setup(10 * 1024 * 1024);
        for reference in ["a:v1", "b:v1", "c:v1"] {
            drop(store.lock_reference(reference).await);
        }
        let held = store.lock_reference("d:v1").await;
        assert_eq!(store.pull_locks.len(), 1);
        drop(held);

        store.commit("d:v1", "sha256:ddd", "r/d@sha256:1", &source).await.unwrap();
        store.remove("d:v1").await.unwrap();
        assert!(store.pull_locks.is_empty());
    }
}
