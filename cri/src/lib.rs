//! Stevedore CRI - image pull for the Kubernetes Container Runtime Interface.
//!
//! Implements CRI `PullImage` on top of an [`ImageServer`]: candidate names
//! are tried in order, the local store is consulted by config digest, and
//! content is transferred only when the local copy is missing or stale.
//!
//! [`ImageServer`]: stevedore_runtime::ImageServer

pub mod auth;
pub mod context;
pub mod cri_api;
pub mod error;
pub mod image_service;
pub mod metrics;

pub use auth::decode_auth;
pub use context::{CancelHandle, PullContext};
pub use error::{pull_error_to_status, PullError, PullErrorKind, Stage};
pub use image_service::{digests_match, ImagePullService, PullOutcome};
pub use metrics::{PullMetrics, PullStats};
