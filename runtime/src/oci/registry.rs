//! OCI registry client for inspecting and fetching images.
//!
//! Uses the `oci-distribution` crate to talk to container registries
//! (Docker Hub, GHCR, etc.). Inspection only fetches the manifest; layers are
//! transferred by [`RegistryClient::fetch`].

use std::path::{Path, PathBuf};

use oci_distribution::client::{ClientConfig, ClientProtocol};
use oci_distribution::manifest::{
    ImageIndexEntry, OciDescriptor, OciImageManifest, IMAGE_MANIFEST_MEDIA_TYPE,
    OCI_IMAGE_MEDIA_TYPE,
};
use oci_distribution::secrets::RegistryAuth as OciRegistryAuth;
use oci_distribution::{Client, Reference};
use sha2::{Digest, Sha256};
use stevedore_core::error::{ImageError, Result};

use super::reference::ImageReference;

/// Authentication credentials for a container registry.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct RegistryAuth {
    username: Option<String>,
    password: Option<String>,
}

impl RegistryAuth {
    /// Create anonymous authentication (no credentials).
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Create basic authentication with username and password.
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            password: Some(password.into()),
        }
    }

    /// Build from caller-supplied fields; both empty means anonymous.
    pub fn from_parts(username: &str, password: &str) -> Self {
        if username.is_empty() && password.is_empty() {
            Self::anonymous()
        } else {
            Self::basic(username, password)
        }
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    pub fn is_anonymous(&self) -> bool {
        self.username.is_none() && self.password.is_none()
    }

    /// Convert to oci-distribution auth type.
    fn to_oci_auth(&self) -> OciRegistryAuth {
        match (&self.username, &self.password) {
            (Some(u), Some(p)) => OciRegistryAuth::Basic(u.clone(), p.clone()),
            _ => OciRegistryAuth::Anonymous,
        }
    }
}

// Keep passwords out of logs.
impl std::fmt::Debug for RegistryAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryAuth")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// A registry-side image whose manifest has been fetched but whose
/// config and layers have not.
#[derive(Debug, Clone)]
pub struct RemoteImage {
    reference: ImageReference,
    manifest: OciImageManifest,
    manifest_digest: String,
}

impl RemoteImage {
    pub fn new(reference: ImageReference, manifest: OciImageManifest, manifest_digest: String) -> Self {
        Self {
            reference,
            manifest,
            manifest_digest,
        }
    }

    pub fn reference(&self) -> &ImageReference {
        &self.reference
    }

    pub fn manifest(&self) -> &OciImageManifest {
        &self.manifest
    }

    pub fn manifest_digest(&self) -> &str {
        &self.manifest_digest
    }

    /// Digest of the image configuration blob, as listed in the manifest.
    pub fn config_digest(&self) -> &str {
        &self.manifest.config.digest
    }

    /// Registry-qualified digest reference for this image.
    pub fn repo_digest(&self) -> String {
        self.reference.repo_digest(&self.manifest_digest)
    }
}

/// Inspects and fetches OCI images from container registries.
pub struct RegistryClient {
    client: Client,
}

impl RegistryClient {
    /// Create a client that uses HTTPS for every registry.
    pub fn new() -> Self {
        Self::with_insecure_registries(Vec::new())
    }

    /// Create a client that uses plain HTTP for the listed registries.
    pub fn with_insecure_registries(insecure: Vec<String>) -> Self {
        let protocol = if insecure.is_empty() {
            ClientProtocol::Https
        } else {
            ClientProtocol::HttpsExcept(insecure)
        };
        let config = ClientConfig {
            protocol,
            platform_resolver: Some(Box::new(linux_platform_resolver)),
            ..Default::default()
        };
        Self {
            client: Client::new(config),
        }
    }

    /// Fetch the platform-resolved manifest for `reference`.
    pub async fn inspect(&self, reference: &ImageReference, auth: &RegistryAuth) -> Result<RemoteImage> {
        let oci_ref = to_oci_reference(reference)?;

        tracing::debug!(reference = %reference, "Fetching image manifest");

        let (manifest, manifest_digest) = self
            .client
            .pull_image_manifest(&oci_ref, &auth.to_oci_auth())
            .await
            .map_err(|e| ImageError::RegistryError {
                registry: reference.registry.clone(),
                message: format!("Failed to pull manifest for {}: {}", reference, e),
            })?;

        Ok(RemoteImage::new(reference.clone(), manifest, manifest_digest))
    }

    /// Download config and layers of `image` as an OCI image layout in
    /// `target_dir`, verifying every blob against its descriptor digest.
    ///
    /// The resulting directory will contain:
    /// - `oci-layout`
    /// - `index.json`
    /// - `blobs/sha256/...`
    pub async fn fetch(&self, image: &RemoteImage, auth: &RegistryAuth, target_dir: &Path) -> Result<PathBuf> {
        let reference = image.reference();
        let registry = reference.registry.as_str();
        let oci_ref = to_oci_reference(reference)?;

        tracing::info!(
            reference = %reference,
            target = %target_dir.display(),
            "Fetching image content"
        );

        let blobs_dir = target_dir.join("blobs").join("sha256");
        tokio::fs::create_dir_all(&blobs_dir).await?;

        // Authenticates the session for blob pulls.
        self.client
            .auth(
                &oci_ref,
                &auth.to_oci_auth(),
                oci_distribution::RegistryOperation::Pull,
            )
            .await
            .map_err(|e| registry_error(registry, format!("Authentication failed: {}", e)))?;

        // Stored as served so the blob hashes to its name.
        let by_digest = Reference::with_digest(
            oci_ref.registry().to_string(),
            oci_ref.repository().to_string(),
            image.manifest_digest().to_string(),
        );
        let (manifest_raw, _) = self
            .client
            .pull_manifest_raw(
                &by_digest,
                &auth.to_oci_auth(),
                &[OCI_IMAGE_MEDIA_TYPE, IMAGE_MANIFEST_MEDIA_TYPE],
            )
            .await
            .map_err(|e| registry_error(registry, format!("Failed to pull raw manifest: {}", e)))?;
        write_blob(&blobs_dir, image.manifest_digest(), &manifest_raw).await?;

        let manifest = image.manifest();
        self.fetch_blob(&oci_ref, &manifest.config, &blobs_dir, registry).await?;
        for layer in &manifest.layers {
            self.fetch_blob(&oci_ref, layer, &blobs_dir, registry).await?;
        }

        tokio::fs::write(
            target_dir.join("oci-layout"),
            r#"{"imageLayoutVersion":"1.0.0"}"#,
        )
        .await?;

        let index = serde_json::json!({
            "schemaVersion": 2,
            "manifests": [{
                "mediaType": manifest.media_type.as_deref().unwrap_or(OCI_IMAGE_MEDIA_TYPE),
                "digest": image.manifest_digest(),
                "size": manifest_raw.len(),
                "annotations": {
                    "org.opencontainers.image.ref.name": reference.full_reference()
                }
            }]
        });
        tokio::fs::write(
            target_dir.join("index.json"),
            serde_json::to_string_pretty(&index)?,
        )
        .await?;

        tracing::info!(
            reference = %reference,
            digest = %image.manifest_digest(),
            layers = manifest.layers.len(),
            "Image content fetched"
        );

        Ok(target_dir.to_path_buf())
    }

    async fn fetch_blob(
        &self,
        oci_ref: &Reference,
        descriptor: &OciDescriptor,
        blobs_dir: &Path,
        registry: &str,
    ) -> Result<()> {
        tracing::debug!(digest = %descriptor.digest, size = descriptor.size, "Pulling blob");

        let mut data: Vec<u8> = Vec::new();
        self.client
            .pull_blob(oci_ref, descriptor, &mut data)
            .await
            .map_err(|e| registry_error(registry, format!("Failed to pull blob {}: {}", descriptor.digest, e)))?;

        write_blob(blobs_dir, &descriptor.digest, &data).await
    }
}

impl Default for RegistryClient {
    fn default() -> Self {
        Self::new()
    }
}

fn registry_error(registry: &str, message: String) -> ImageError {
    ImageError::RegistryError {
        registry: registry.to_string(),
        message,
    }
}

/// Hex part of an `algorithm:hex` digest.
pub(crate) fn digest_hex(digest: &str) -> &str {
    digest.split_once(':').map(|(_, hex)| hex).unwrap_or(digest)
}

/// Check `data` against a `sha256:` digest. Other algorithms are not checked.
pub(crate) fn verify_digest(expected: &str, data: &[u8]) -> Result<()> {
    let Some(expected_hex) = expected.strip_prefix("sha256:") else {
        tracing::debug!(digest = %expected, "Skipping verification for non-sha256 digest");
        return Ok(());
    };
    let actual = hex::encode(Sha256::digest(data));
    if !actual.eq_ignore_ascii_case(expected_hex) {
        return Err(ImageError::OciImageError(format!(
            "Digest mismatch: expected {}, got sha256:{}",
            expected, actual
        )));
    }
    Ok(())
}

/// Write `data` as the blob named by `digest`, refusing content that does
/// not hash to it.
async fn write_blob(blobs_dir: &Path, digest: &str, data: &[u8]) -> Result<()> {
    verify_digest(digest, data)?;
    tokio::fs::write(blobs_dir.join(digest_hex(digest)), data).await?;
    Ok(())
}

/// Convert an ImageReference to an oci-distribution Reference.
fn to_oci_reference(reference: &ImageReference) -> Result<Reference> {
    let ref_str = reference.full_reference();
    ref_str.parse::<Reference>().map_err(|e| {
        ImageError::OciImageError(format!(
            "Invalid OCI reference '{}': {}",
            ref_str, e
        ))
    })
}

/// Platform resolver that selects linux images matching the host architecture.
fn linux_platform_resolver(manifests: &[ImageIndexEntry]) -> Option<String> {
    let arch = match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        other => other,
    };

    manifests
        .iter()
        .find(|entry| {
            entry
                .platform
                .as_ref()
                .is_some_and(|p| p.os == "linux" && p.architecture == arch)
        })
        .map(|entry| entry.digest.clone())
}
