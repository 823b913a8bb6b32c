//! CRI image pull.
//!
//! Decides, per request, whether the requested image is already in the
//! local store with the same content and pulls it only when it is not:
//!
//! ```text
//! resolve names ─► decode auth ─► prepare (first candidate that works)
//!      ─► local status ─► config digests equal? ──yes──┐
//!                               │ no                     │
//!                               ▼                        ▼
//!                             pull ─────────────► local status ─► image ref
//! ```

use std::sync::Arc;
use std::time::Duration;

use stevedore_core::error::ImageError;
use stevedore_runtime::{ImageRecord, ImageServer, RegistryAuth, RemoteHandle};
use tonic::{Request, Response, Status};

use crate::auth::decode_auth;
use crate::context::PullContext;
use crate::cri_api::{AuthConfig, PullImageRequest, PullImageResponse};
use crate::error::{pull_error_to_status, PullError, Stage};
use crate::metrics::PullMetrics;

/// Result of a successful pull request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullOutcome {
    /// Digest-qualified reference (or image ID) to hand back to the caller
    pub image_ref: String,
    /// Candidate name the image was found under
    pub name: String,
    /// Whether content was transferred (false on a cache hit)
    pub pulled: bool,
}

/// Image pull service over an [`ImageServer`].
///
/// Holds no per-request state; one instance serves concurrent requests.
pub struct ImagePullService<S> {
    server: Arc<S>,
    metrics: Arc<PullMetrics>,
}

impl<S: ImageServer> ImagePullService<S> {
    pub fn new(server: Arc<S>) -> Self {
        Self {
            server,
            metrics: Arc::new(PullMetrics::new()),
        }
    }

    pub fn metrics(&self) -> &Arc<PullMetrics> {
        &self.metrics
    }

    /// CRI PullImage.
    ///
    /// A request without an image spec is treated as an empty reference.
    pub async fn pull_image(
        &self,
        ctx: &PullContext,
        request: PullImageRequest,
    ) -> Result<PullImageResponse, PullError> {
        let outcome = self
            .pull(ctx, request.image_reference(), request.auth.as_ref())
            .await?;
        Ok(PullImageResponse {
            image_ref: outcome.image_ref,
        })
    }

    /// gRPC entry point: honours the `grpc-timeout` header and maps
    /// failures to a `Status`.
    pub async fn handle(
        &self,
        request: Request<PullImageRequest>,
    ) -> Result<Response<PullImageResponse>, Status> {
        let mut ctx = PullContext::background();
        if let Some(timeout) = grpc_timeout(request.metadata()) {
            ctx = ctx.with_timeout(timeout);
        }
        self.pull_image(&ctx, request.into_inner())
            .await
            .map(Response::new)
            .map_err(pull_error_to_status)
    }

    /// Pull `reference` unless the local copy already has the same content.
    pub async fn pull(
        &self,
        ctx: &PullContext,
        reference: &str,
        auth: Option<&AuthConfig>,
    ) -> Result<PullOutcome, PullError> {
        self.metrics.record_request();
        tracing::info!(image = %reference, "PullImage");

        let result = self.run_pull(ctx, reference, auth).await;
        match &result {
            Ok(outcome) => {
                if outcome.pulled {
                    self.metrics.record_pull();
                } else {
                    self.metrics.record_cache_hit();
                }
                tracing::info!(
                    image = %reference,
                    name = %outcome.name,
                    image_ref = %outcome.image_ref,
                    pulled = outcome.pulled,
                    "PullImage succeeded"
                );
            }
            Err(e) => {
                self.metrics.record_failure(e.kind());
                tracing::warn!(image = %reference, kind = %e.kind(), error = %e, "PullImage failed");
            }
        }
        result
    }

    async fn run_pull(
        &self,
        ctx: &PullContext,
        reference: &str,
        auth: Option<&AuthConfig>,
    ) -> Result<PullOutcome, PullError> {
        let names = ctx
            .run(Stage::Resolving, self.server.resolve_names(reference))
            .await?
            .map_err(|source| PullError::NameResolutionFailed {
                reference: reference.to_string(),
                source,
            })?;
        if names.is_empty() {
            return Err(PullError::NameResolutionFailed {
                reference: reference.to_string(),
                source: ImageError::OciImageError(format!(
                    "No candidate names for '{}'",
                    reference
                )),
            });
        }

        // Decoded after resolution and before any registry contact.
        let credential = decode_auth(auth)?;

        let (name, handle) = self.prepare(ctx, reference, &names, &credential).await?;

        let cached = ctx
            .run(Stage::CheckingCache, self.server.image_status(name))
            .await?
            .map_err(|source| PullError::LocalStatusUnavailable {
                name: name.to_string(),
                source,
            })?;

        let remote_digest = handle.config_digest();
        let cache_hit = cached
            .as_ref()
            .is_some_and(|record| digests_match(remote_digest, &record.config_digest));

        if cache_hit {
            tracing::debug!(name = %name, digest = %remote_digest, "Image already in store, skipping pull");
        } else {
            tracing::debug!(
                name = %name,
                remote = %remote_digest,
                local = %cached.as_ref().map(|r| r.config_digest.as_str()).unwrap_or(""),
                "Local copy missing or stale, pulling"
            );
            ctx.run(Stage::Pulling, self.server.pull_image(&handle, &credential))
                .await?
                .map_err(|source| PullError::PullFailed {
                    name: name.to_string(),
                    source,
                })?;
        }
        drop(handle);

        // Always re-read so the reference reflects the store as it is now.
        let record = ctx
            .run(Stage::Finalizing, self.server.image_status(name))
            .await?
            .map_err(|source| PullError::PostPullStatusUnavailable {
                name: name.to_string(),
                source,
            })?
            .ok_or_else(|| PullError::PostPullStatusUnavailable {
                name: name.to_string(),
                source: ImageError::StoreError(format!("{} not found in store", name)),
            })?;

        Ok(PullOutcome {
            image_ref: image_ref(record),
            name: name.to_string(),
            pulled: !cache_hit,
        })
    }

    /// Try each candidate in order; the first one the registry answers for wins.
    async fn prepare<'a>(
        &self,
        ctx: &PullContext,
        reference: &str,
        names: &'a [String],
        credential: &RegistryAuth,
    ) -> Result<(&'a str, S::Handle), PullError> {
        let mut last_error = None;
        for name in names {
            match ctx
                .run(Stage::Preparing, self.server.prepare_image(name, credential))
                .await?
            {
                Ok(handle) => {
                    tracing::debug!(candidate = %name, digest = %handle.config_digest(), "Prepared image");
                    return Ok((name.as_str(), handle));
                }
                Err(e) => {
                    tracing::warn!(candidate = %name, error = %e, "Failed to prepare image");
                    last_error = Some(e);
                }
            }
        }

        Err(PullError::RemoteHandleUnavailable {
            reference: reference.to_string(),
            source: last_error.unwrap_or_else(|| {
                ImageError::Other(format!("No candidates to prepare for '{}'", reference))
            }),
        })
    }
}

/// Content identity check; an empty digest on either side never matches.
pub fn digests_match(remote: &str, local: &str) -> bool {
    !remote.is_empty() && !local.is_empty() && remote == local
}

/// First repo digest, falling back to the image ID.
fn image_ref(record: ImageRecord) -> String {
    record
        .repo_digests
        .into_iter()
        .next()
        .unwrap_or(record.id)
}

/// Parse the gRPC `grpc-timeout` header (`<digits><H|M|S|m|u|n>`).
fn grpc_timeout(metadata: &tonic::metadata::MetadataMap) -> Option<Duration> {
    let value = metadata.get("grpc-timeout")?.to_str().ok()?;
    if value.len() < 2 || value.len() > 9 {
        return None;
    }
    let (amount, unit) = value.split_at(value.len() - 1);
    let amount: u64 = amount.parse().ok()?;
    let timeout = match unit {
        "H" => Duration::from_secs(amount.checked_mul(3600)?),
        "M" => Duration::from_secs(amount.checked_mul(60)?),
        "S" => Duration::from_secs(amount),
        "m" => Duration::from_millis(amount),
        "u" => Duration::from_micros(amount),
        "n" => Duration::from_nanos(amount),
        _ => return None,
    };
    Some(timeout)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digests_match() {
        assert!(digests_match("sha256:abc", "sha256:abc"));
        assert!(!digests_match("sha256:abc", "sha256:def"));
        assert!(!digests_match("", ""));
        assert!(!digests_match("sha256:abc", ""));
        assert!(!digests_match("", "sha256:abc"));
    }

    #[test]
    fn test_image_ref_prefers_repo_digest() {
        let record = ImageRecord {
            id: "image".to_string(),
            config_digest: String::new(),
            repo_digests: vec!["digest".to_string(), "other".to_string()],
        };
        assert_eq!(image_ref(record), "digest");
    }

    #[test]
    fn test_image_ref_falls_back_to_id() {
        let record = ImageRecord {
            id: "image".to_string(),
            ..Default::default()
        };
        assert_eq!(image_ref(record), "image");
    }

    #[test]
    fn test_grpc_timeout_parsing() {
        let mut metadata = tonic::metadata::MetadataMap::new();
        assert_eq!(grpc_timeout(&metadata), None);

        metadata.insert("grpc-timeout", "30S".parse().unwrap());
        assert_eq!(grpc_timeout(&metadata), Some(Duration::from_secs(30)));

        metadata.insert("grpc-timeout", "1500m".parse().unwrap());
        assert_eq!(grpc_timeout(&metadata), Some(Duration::from_millis(1500)));

        metadata.insert("grpc-timeout", "2H".parse().unwrap());
        assert_eq!(grpc_timeout(&metadata), Some(Duration::from_secs(7200)));

        metadata.insert("grpc-timeout", "10x".parse().unwrap());
        assert_eq!(grpc_timeout(&metadata), None);

        metadata.insert("grpc-timeout", "S".parse().unwrap());
        assert_eq!(grpc_timeout(&metadata), None);
    }
}
