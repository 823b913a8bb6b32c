//! Image reference parsing and short-name resolution.
//!
//! Turns caller references like `nginx`, `org/app:1.2` or
//! `ghcr.io/org/app@sha256:...` into fully-qualified candidate names.

use stevedore_core::error::{ImageError, Result};

/// Registry whose single-component repositories live under `library/`.
const DOCKER_HUB: &str = "docker.io";

/// Default tag when neither tag nor digest is specified.
const DEFAULT_TAG: &str = "latest";

/// Parsed, fully-qualified image reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    /// Registry hostname (e.g., "ghcr.io", "docker.io", "localhost:5000")
    pub registry: String,
    /// Repository path (e.g., "library/nginx")
    pub repository: String,
    /// Tag (e.g., "latest", "v0.1.0")
    pub tag: Option<String>,
    /// Digest (e.g., "sha256:abc123...")
    pub digest: Option<String>,
}

impl ImageReference {
    /// Parse a reference, qualifying short names against Docker Hub.
    ///
    /// - `nginx` → docker.io/library/nginx:latest
    /// - `myuser/app` → docker.io/myuser/app:latest
    /// - `ghcr.io/org/app@sha256:abc...` → ghcr.io/org/app@sha256:abc...
    pub fn parse(reference: &str) -> Result<Self> {
        Self::parse_with_registry(reference, DOCKER_HUB)
    }

    /// Parse a reference, qualifying short names against `registry`.
    pub fn parse_with_registry(reference: &str, registry: &str) -> Result<Self> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(ImageError::OciImageError(
                "Empty image reference".to_string(),
            ));
        }

        let (name_tag, digest) = match reference.rfind('@') {
            Some(at_pos) => {
                let digest = &reference[at_pos + 1..];
                if !is_valid_digest(digest) {
                    return Err(ImageError::OciImageError(format!(
                        "Invalid digest format in reference '{}': expected algorithm:hex",
                        reference
                    )));
                }
                (&reference[..at_pos], Some(digest.to_string()))
            }
            None => (reference, None),
        };

        let (name, tag) = split_tag(name_tag);
        if name.is_empty() || tag.is_some_and(str::is_empty) {
            return Err(ImageError::OciImageError(format!(
                "Invalid image reference '{}'",
                reference
            )));
        }

        let (registry, repository) = match split_domain(name) {
            Some((domain, repo)) => (domain.to_string(), repo.to_string()),
            None => {
                let registry = registry.trim();
                let repository = if registry == DOCKER_HUB && !name.contains('/') {
                    format!("library/{}", name)
                } else {
                    name.to_string()
                };
                (registry.to_string(), repository)
            }
        };

        if repository.is_empty() || repository.split('/').any(str::is_empty) {
            return Err(ImageError::OciImageError(format!(
                "Empty repository in reference '{}'",
                reference
            )));
        }

        let tag = match (tag, &digest) {
            (None, None) => Some(DEFAULT_TAG.to_string()),
            (tag, _) => tag.map(str::to_string),
        };

        Ok(ImageReference {
            registry,
            repository,
            tag,
            digest,
        })
    }

    /// Registry-qualified digest reference for a manifest digest,
    /// e.g. `docker.io/library/nginx@sha256:...`.
    pub fn repo_digest(&self, manifest_digest: &str) -> String {
        format!("{}/{}@{}", self.registry, self.repository, manifest_digest)
    }

    /// Get the full reference string.
    pub fn full_reference(&self) -> String {
        let mut s = format!("{}/{}", self.registry, self.repository);
        if let Some(ref tag) = self.tag {
            s.push(':');
            s.push_str(tag);
        }
        if let Some(ref digest) = self.digest {
            s.push('@');
            s.push_str(digest);
        }
        s
    }
}

impl std::fmt::Display for ImageReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.full_reference())
    }
}

/// Whether `reference` already names a registry host.
pub fn is_qualified(reference: &str) -> bool {
    let reference = reference.trim();
    let name = reference.split('@').next().unwrap_or(reference);
    split_domain(name).is_some()
}

/// Expand a caller reference into ordered, fully-qualified candidate names.
///
/// Qualified references produce exactly one candidate. Short names produce
/// one candidate per search registry, in the configured order.
pub fn resolve_names(reference: &str, search_registries: &[String]) -> Result<Vec<ImageReference>> {
    if is_qualified(reference) {
        return Ok(vec![ImageReference::parse(reference)?]);
    }

    let mut candidates: Vec<ImageReference> = Vec::new();
    for registry in search_registries.iter().filter(|r| !r.trim().is_empty()) {
        let candidate = ImageReference::parse_with_registry(reference, registry)?;
        if !candidates.contains(&candidate) {
            candidates.push(candidate);
        }
    }

    if candidates.is_empty() {
        return Err(ImageError::OciImageError(format!(
            "No search registries configured to qualify '{}'",
            reference.trim()
        )));
    }
    Ok(candidates)
}

/// Split `name[:tag]`, treating a colon inside the registry host as a port.
fn split_tag(name_tag: &str) -> (&str, Option<&str>) {
    let last_slash = name_tag.rfind('/').map(|p| p + 1).unwrap_or(0);
    match name_tag[last_slash..].rfind(':') {
        Some(colon) => {
            let colon = last_slash + colon;
            (&name_tag[..colon], Some(&name_tag[colon + 1..]))
        }
        None => (name_tag, None),
    }
}

/// Split off the leading registry host when the first path component is one
/// (contains a dot or colon, or is "localhost").
fn split_domain(name: &str) -> Option<(&str, &str)> {
    let slash = name.find('/')?;
    let first = &name[..slash];
    if first.contains('.') || first.contains(':') || first == "localhost" {
        Some((first, &name[slash + 1..]))
    } else {
        None
    }
}

fn is_valid_digest(digest: &str) -> bool {
    match digest.split_once(':') {
        Some((algorithm, hex)) => {
            !algorithm.is_empty()
                && !hex.is_empty()
                && hex.chars().all(|c| c.is_ascii_hexdigit())
        }
        None => false,
    }
}
