//! Pull errors and their gRPC status conversions.

use stevedore_core::error::ImageError;
use thiserror::Error;
use tonic::Status;

/// Stage of the pull protocol a request was in when it ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Resolving,
    Preparing,
    CheckingCache,
    Pulling,
    Finalizing,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::Resolving => "name resolution",
            Stage::Preparing => "image preparation",
            Stage::CheckingCache => "local status check",
            Stage::Pulling => "image pull",
            Stage::Finalizing => "post-pull status check",
        };
        f.write_str(name)
    }
}

/// Classified failure of a pull request.
#[derive(Error, Debug)]
pub enum PullError {
    /// The combined auth token is not valid base64
    #[error("Invalid credential encoding: {0}")]
    InvalidCredentialEncoding(#[source] base64::DecodeError),

    /// The decoded auth token has no `username:password` separator
    #[error("Invalid credential format: decoded auth is not username:password")]
    InvalidCredentialFormat,

    #[error("Failed to resolve image name {reference}: {source}")]
    NameResolutionFailed {
        reference: String,
        #[source]
        source: ImageError,
    },

    /// Every candidate name failed preparation; `source` is the last failure
    #[error("No candidate for {reference} could be prepared: {source}")]
    RemoteHandleUnavailable {
        reference: String,
        #[source]
        source: ImageError,
    },

    #[error("Failed to get local status of {name}: {source}")]
    LocalStatusUnavailable {
        name: String,
        #[source]
        source: ImageError,
    },

    #[error("Failed to pull {name}: {source}")]
    PullFailed {
        name: String,
        #[source]
        source: ImageError,
    },

    #[error("Failed to get status of {name} after pull: {source}")]
    PostPullStatusUnavailable {
        name: String,
        #[source]
        source: ImageError,
    },

    #[error("Pull canceled during {stage}")]
    Canceled { stage: Stage },

    #[error("Deadline exceeded during {stage}")]
    DeadlineExceeded { stage: Stage },
}

/// Fieldless discriminant of [`PullError`], for logs and counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PullErrorKind {
    InvalidCredentialEncoding,
    InvalidCredentialFormat,
    NameResolutionFailed,
    RemoteHandleUnavailable,
    LocalStatusUnavailable,
    PullFailed,
    PostPullStatusUnavailable,
    Canceled,
    DeadlineExceeded,
}

impl PullErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidCredentialEncoding => "invalid_credential_encoding",
            Self::InvalidCredentialFormat => "invalid_credential_format",
            Self::NameResolutionFailed => "name_resolution_failed",
            Self::RemoteHandleUnavailable => "remote_handle_unavailable",
            Self::LocalStatusUnavailable => "local_status_unavailable",
            Self::PullFailed => "pull_failed",
            Self::PostPullStatusUnavailable => "post_pull_status_unavailable",
            Self::Canceled => "canceled",
            Self::DeadlineExceeded => "deadline_exceeded",
        }
    }
}

impl std::fmt::Display for PullErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl PullError {
    pub fn kind(&self) -> PullErrorKind {
        match self {
            Self::InvalidCredentialEncoding(_) => PullErrorKind::InvalidCredentialEncoding,
            Self::InvalidCredentialFormat => PullErrorKind::InvalidCredentialFormat,
            Self::NameResolutionFailed { .. } => PullErrorKind::NameResolutionFailed,
            Self::RemoteHandleUnavailable { .. } => PullErrorKind::RemoteHandleUnavailable,
            Self::LocalStatusUnavailable { .. } => PullErrorKind::LocalStatusUnavailable,
            Self::PullFailed { .. } => PullErrorKind::PullFailed,
            Self::PostPullStatusUnavailable { .. } => PullErrorKind::PostPullStatusUnavailable,
            Self::Canceled { .. } => PullErrorKind::Canceled,
            Self::DeadlineExceeded { .. } => PullErrorKind::DeadlineExceeded,
        }
    }

    /// The collaborator error underneath, if any.
    pub fn cause(&self) -> Option<&ImageError> {
        match self {
            Self::NameResolutionFailed { source, .. }
            | Self::RemoteHandleUnavailable { source, .. }
            | Self::LocalStatusUnavailable { source, .. }
            | Self::PullFailed { source, .. }
            | Self::PostPullStatusUnavailable { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Convert a PullError to a gRPC Status.
pub fn pull_error_to_status(err: PullError) -> Status {
    let message = err.to_string();
    match err.kind() {
        PullErrorKind::InvalidCredentialEncoding | PullErrorKind::InvalidCredentialFormat => {
            Status::invalid_argument(message)
        }
        PullErrorKind::NameResolutionFailed => Status::not_found(message),
        PullErrorKind::RemoteHandleUnavailable
        | PullErrorKind::LocalStatusUnavailable
        | PullErrorKind::PostPullStatusUnavailable => Status::unavailable(message),
        PullErrorKind::PullFailed => Status::internal(message),
        PullErrorKind::Canceled => Status::cancelled(message),
        PullErrorKind::DeadlineExceeded => Status::deadline_exceeded(message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry_error() -> ImageError {
        ImageError::RegistryError {
            registry: "ghcr.io".to_string(),
            message: "auth failed".to_string(),
        }
    }

    #[test]
    fn test_credential_errors_map_to_invalid_argument() {
        let status = pull_error_to_status(PullError::InvalidCredentialFormat);
        assert_eq!(status.code(), tonic::Code::InvalidArgument);
    }

    #[test]
    fn test_name_resolution_maps_to_not_found() {
        let err = PullError::NameResolutionFailed {
            reference: "".to_string(),
            source: ImageError::OciImageError("Empty image reference".to_string()),
        };
        let status = pull_error_to_status(err);
        assert_eq!(status.code(), tonic::Code::NotFound);
        assert!(status.message().contains("Empty image reference"));
    }

    #[test]
    fn test_remote_handle_unavailable_maps_to_unavailable() {
        let err = PullError::RemoteHandleUnavailable {
            reference: "app".to_string(),
            source: registry_error(),
        };
        let status = pull_error_to_status(err);
        assert_eq!(status.code(), tonic::Code::Unavailable);
        assert!(status.message().contains("ghcr.io"));
    }

    #[test]
    fn test_pull_failed_maps_to_internal() {
        let err = PullError::PullFailed {
            name: "ghcr.io/org/app:v1".to_string(),
            source: registry_error(),
        };
        assert_eq!(pull_error_to_status(err).code(), tonic::Code::Internal);
    }

    #[test]
    fn test_context_errors_map_to_grpc_codes() {
        let canceled = pull_error_to_status(PullError::Canceled { stage: Stage::Pulling });
        assert_eq!(canceled.code(), tonic::Code::Cancelled);

        let expired = pull_error_to_status(PullError::DeadlineExceeded { stage: Stage::Preparing });
        assert_eq!(expired.code(), tonic::Code::DeadlineExceeded);
        assert!(expired.message().contains("image preparation"));
    }

    #[test]
    fn test_kind_and_cause() {
        let err = PullError::PostPullStatusUnavailable {
            name: "app".to_string(),
            source: ImageError::StoreError("gone".to_string()),
        };
        assert_eq!(err.kind(), PullErrorKind::PostPullStatusUnavailable);
        assert_eq!(err.kind().as_str(), "post_pull_status_unavailable");
        assert!(matches!(err.cause(), Some(ImageError::StoreError(_))));
        assert!(PullError::InvalidCredentialFormat.cause().is_none());
    }
}
