//! Error types for the Scaleway volume client.

use crate::backend::ProviderFailure;
use crate::config::ConfigError;
use scaleway_rs::ScalewayError;
use thiserror::Error;

/// Errors raised by the Scaleway volume client.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ScalewayBackendError {
    /// Raised when the high-level configuration is incomplete.
    #[error("configuration error: {0}")]
    Config(String),
    /// Raised when the configured instance is not visible to the account.
    #[error("instance {instance_id} not found in zone {zone}")]
    InstanceNotFound {
        /// Configured instance identifier.
        instance_id: String,
        /// Zone used for the lookup.
        zone: String,
    },
    /// Wrapper for transport, SDK and decoding failures.
    #[error("provider error: {message}")]
    Provider {
        /// Message returned by the HTTP client or SDK.
        message: String,
    },
    /// Raised when the API answers with an unexpected status.
    #[error("{action} failed with HTTP {status}: {message}")]
    Http {
        /// Request being made.
        action: &'static str,
        /// HTTP status code.
        status: u16,
        /// Response body.
        message: String,
    },
    /// Raised when a volume cannot be attached to an instance.
    #[error("failed to attach volume {volume_id} to instance {instance_id}: {message}")]
    VolumeAttachmentFailed {
        /// Volume identifier that could not be attached.
        volume_id: String,
        /// Instance identifier.
        instance_id: String,
        /// Error message from the provider.
        message: String,
    },
    /// Raised when a volume cannot be detached from an instance.
    #[error("failed to detach volume {volume_id} from instance {instance_id}: {message}")]
    VolumeDetachFailed {
        /// Volume identifier that could not be detached.
        volume_id: String,
        /// Instance identifier.
        instance_id: String,
        /// Error message from the provider.
        message: String,
    },
    /// Raised when a volume cannot be created.
    #[error("failed to create volume {name} in zone {zone}: {message}")]
    VolumeCreateFailed {
        /// Volume name requested.
        name: String,
        /// Zone where creation was attempted.
        zone: String,
        /// Error message from the provider.
        message: String,
    },
    /// Raised when the volume lives in a zone other than the instance's.
    #[error("volume {volume_id} is in zone {volume_zone}, instance is in {instance_zone}")]
    ZoneMismatch {
        /// Volume identifier.
        volume_id: String,
        /// Zone of the volume.
        volume_zone: String,
        /// Zone of the instance.
        instance_zone: String,
    },
}

impl ScalewayBackendError {
    pub(super) fn provider(err: &impl std::error::Error) -> Self {
        Self::Provider {
            message: err.to_string(),
        }
    }
}

impl ProviderFailure for ScalewayBackendError {
    fn is_zone_mismatch(&self) -> bool {
        matches!(self, Self::ZoneMismatch { .. })
    }
}

impl From<ScalewayError> for ScalewayBackendError {
    fn from(value: ScalewayError) -> Self {
        Self::Provider {
            message: value.to_string(),
        }
    }
}

impl From<ConfigError> for ScalewayBackendError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value.to_string())
    }
}
