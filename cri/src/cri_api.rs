//! CRI `runtime.v1` image messages used by the pull path.
//!
//! Field numbers follow `k8s.io/cri-api/pkg/apis/runtime/v1/api.proto` so
//! the messages are wire-compatible with kubelet.

use std::collections::HashMap;

/// ImageSpec is an internal representation of an image.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ImageSpec {
    /// Container's image field (e.g. imageID or imageDigest).
    #[prost(string, tag = "1")]
    pub image: String,
    /// Unstructured key-value map holding arbitrary metadata.
    #[prost(map = "string, string", tag = "2")]
    pub annotations: HashMap<String, String>,
}

/// AuthConfig contains authorization information for connecting to a registry.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AuthConfig {
    #[prost(string, tag = "1")]
    pub username: String,
    #[prost(string, tag = "2")]
    pub password: String,
    /// Base64 of `username:password`; overrides `username`/`password` when set.
    #[prost(string, tag = "3")]
    pub auth: String,
    #[prost(string, tag = "4")]
    pub server_address: String,
    /// IdentityToken is used to authenticate the user and get
    /// an access token for the registry.
    #[prost(string, tag = "5")]
    pub identity_token: String,
    /// RegistryToken is a bearer token to be sent to a registry
    #[prost(string, tag = "6")]
    pub registry_token: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PullImageRequest {
    /// Spec of the image.
    #[prost(message, optional, tag = "1")]
    pub image: Option<ImageSpec>,
    /// Authentication configuration for pulling the image.
    #[prost(message, optional, tag = "2")]
    pub auth: Option<AuthConfig>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PullImageResponse {
    /// Reference to the image in use. For most runtimes, this should be an
    /// image ID or digest.
    #[prost(string, tag = "1")]
    pub image_ref: String,
}

impl PullImageRequest {
    /// Request for `image` without credentials.
    pub fn for_image(image: impl Into<String>) -> Self {
        Self {
            image: Some(ImageSpec {
                image: image.into(),
                annotations: HashMap::new(),
            }),
            auth: None,
        }
    }

    pub fn with_auth(mut self, auth: AuthConfig) -> Self {
        self.auth = Some(auth);
        self
    }

    /// Requested image reference; empty when no spec was sent.
    pub fn image_reference(&self) -> &str {
        self.image.as_ref().map(|spec| spec.image.as_str()).unwrap_or_default()
    }
}
