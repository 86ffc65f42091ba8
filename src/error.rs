//! Error types for device backends, configuration and the registry.

use thiserror::Error;

use crate::traits::{CameraId, Format};

const ENODEV: i32 = 19;
const EINVAL: i32 = 22;
const EIO: i32 = 5;

/// Error type for camera backend operations.
#[derive(Debug, Error)]
pub enum CameraError {
    /// Device with given index was not found.
    #[error("Device {0} not found")]
    DeviceNotFound(CameraId),
    /// Failed to open device.
    #[error("Failed to open device: {0}")]
    DeviceOpenFailed(String),
    /// Requested format is not supported.
    #[error("Format not supported: {0:?}")]
    FormatNotSupported(Format),
    /// Error during streaming operation.
    #[error("Stream error: {0}")]
    StreamError(String),
    /// Hardware was unplugged.
    #[error("Device {0} is disconnected")]
    Disconnected(CameraId),
    /// Operation timed out.
    #[error("Operation timed out")]
    Timeout,
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for camera operations.
pub type Result<T> = std::result::Result<T, CameraError>;

/// Errors surfaced by the registry and the dispatch adapter.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The registry failed to initialize or has been shut down.
    #[error("camera registry is not ready")]
    NotReady,
    /// Id outside the table or slot not ready.
    #[error("camera id {0} is out of range")]
    OutOfRange(i64),
    /// Malformed caller argument.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// The device handle reported an error.
    #[error("camera backend error: {0}")]
    Backend(#[from] CameraError),
}

impl RegistryError {
    /// Negative errno value returned across the module boundary.
    pub fn errno(&self) -> i32 {
        match self {
            Self::NotReady | Self::InvalidArgument(_) => -EINVAL,
            Self::OutOfRange(_) => -ENODEV,
            Self::Backend(CameraError::Io(err)) => err.raw_os_error().map_or(-EIO, |code| -code),
            Self::Backend(CameraError::DeviceNotFound(_) | CameraError::Disconnected(_)) => {
                -ENODEV
            }
            Self::Backend(_) => -EIO,
        }
    }
}

/// Result type for registry operations.
pub type RegistryResult<T> = std::result::Result<T, RegistryError>;

/// Rejected configuration value.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Poll interval must be non-zero when detection is enabled.
    #[error("poll interval must be greater than zero")]
    ZeroPollInterval,
    /// Candidate id does not fit the slot table.
    #[error("candidate camera id {0} exceeds capacity {1}")]
    CandidateOutOfRange(CameraId, usize),
    /// Orientation must be a multiple of 90 below 360.
    #[error("invalid orientation {0}")]
    InvalidOrientation(u32),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errno_mapping() {
        assert_eq!(RegistryError::NotReady.errno(), -22);
        assert_eq!(RegistryError::OutOfRange(7).errno(), -19);
        assert_eq!(RegistryError::InvalidArgument("x".to_owned()).errno(), -22);
        assert_eq!(
            RegistryError::from(CameraError::Disconnected(0)).errno(),
            -19
        );
        assert_eq!(
            RegistryError::from(CameraError::StreamError("boom".to_owned())).errno(),
            -5
        );
    }

    #[test]
    fn test_errno_uses_os_error() {
        let err = CameraError::Io(std::io::Error::from_raw_os_error(16));
        assert_eq!(RegistryError::from(err).errno(), -16);
    }

    #[test]
    fn test_display() {
        assert_eq!(
            RegistryError::OutOfRange(9).to_string(),
            "camera id 9 is out of range"
        );
        assert_eq!(CameraError::DeviceNotFound(3).to_string(), "Device 3 not found");
    }
}
