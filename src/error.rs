//! Error types for mftscan
//!
//! Volume-level failures are fatal to a single worker only; record-level
//! failures are recovered inside the decoder.

use crate::volume::VolumeId;
use thiserror::Error;

/// Main error type for mftscan operations
#[derive(Error, Debug)]
pub enum MftScanError {
    #[error("Access denied opening volume '{0}' (administrator rights are required)")]
    VolumeAccessDenied(VolumeId),

    #[error("Volume '{0}' is not a ready, fixed volume")]
    VolumeNotFound(VolumeId),

    #[error("Failed to open volume '{0}': {1}")]
    VolumeOpenError(VolumeId, std::io::Error),

    #[error("Malformed USN record at buffer offset {offset}: {reason}")]
    MalformedRecord { offset: usize, reason: String },

    #[error("USN enumeration failed on volume '{volume}': {source}")]
    EnumerationIoFailure {
        volume: VolumeId,
        #[source]
        source: std::io::Error,
    },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("{} volume(s) failed: {}", .0.len(), format_failures(.0))]
    VolumesFailed(Vec<VolumeFailure>),

    #[error("A volume worker panicked; results are incomplete")]
    WorkerPanicked,

    #[error("Raw volume access is not supported on this platform")]
    Unsupported,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Result type alias for mftscan operations
pub type Result<T> = std::result::Result<T, MftScanError>;

/// A volume whose worker stopped with an error
#[derive(Debug)]
pub struct VolumeFailure {
    pub volume: VolumeId,
    pub error: MftScanError,
}

fn format_failures(failures: &[VolumeFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("{}: {}", f.volume, f.error))
        .collect::<Vec<_>>()
        .join("; ")
}

impl MftScanError {
    /// Classify a raw Win32 error code returned while opening a volume
    pub fn from_win32(code: u32, volume: &VolumeId) -> Self {
        match code {
            // ERROR_ACCESS_DENIED
            5 => MftScanError::VolumeAccessDenied(volume.clone()),
            // ERROR_FILE_NOT_FOUND, ERROR_PATH_NOT_FOUND, ERROR_INVALID_DRIVE, ERROR_NOT_READY
            2 | 3 | 15 | 21 => MftScanError::VolumeNotFound(volume.clone()),
            _ => MftScanError::VolumeOpenError(
                volume.clone(),
                std::io::Error::from_raw_os_error(code as i32),
            ),
        }
    }

    /// Check if this error is recoverable (enumeration can continue)
    pub fn is_recoverable(&self) -> bool {
        matches!(self, MftScanError::MalformedRecord { .. })
    }
}
