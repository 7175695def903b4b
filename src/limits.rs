//! Upload limit knobs
//!
//! One request to the batched write RPC must stay under the server's message
//! ceiling, and each RPC stream is paced independently. The defaults match
//! the control plane's published quotas; override them only when the server
//! is configured differently.

use std::time::Duration;

/// Longest possible varint64 length-delimiter, in bytes.
pub const MAX_VARINT64_LENGTH: usize = 10;

/// Byte and pacing limits for one upload session.
#[derive(Debug, Clone)]
pub struct UploadLimits {
    /// Minimum interval between scalar write requests.
    pub min_scalar_request_interval: Duration,
    /// Minimum interval between tensor write requests.
    pub min_tensor_request_interval: Duration,
    /// Minimum interval between blob write requests.
    pub min_blob_request_interval: Duration,
    /// Minimum interval between logdir polls.
    pub min_logdir_poll_interval: Duration,
    /// Byte ceiling for one scalar write request.
    pub max_scalar_request_size: usize,
    /// Byte ceiling for one tensor write request.
    pub max_tensor_request_size: usize,
    /// Byte ceiling for one blob write request.
    pub max_blob_request_size: usize,
    /// Largest single tensor point; bigger points are skipped with a warning.
    pub max_tensor_point_size: usize,
    /// Largest single blob; bigger blobs are skipped with a warning.
    pub max_blob_size: u64,
}

impl Default for UploadLimits {
    fn default() -> Self {
        Self {
            min_scalar_request_interval: Duration::from_millis(10),
            min_tensor_request_interval: Duration::from_millis(10),
            min_blob_request_interval: Duration::from_millis(10),
            min_logdir_poll_interval: Duration::from_secs(1),
            max_scalar_request_size: 24 * 1024,
            max_tensor_request_size: 512 * 1024,
            max_blob_request_size: 4 * 1024 * 1024 - 256 * 1024,
            max_tensor_point_size: 16 * 1024,
            max_blob_size: 10 * 1024 * 1024 * 1024,
        }
    }
}

impl UploadLimits {
    /// Create limits with the control plane defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the byte ceiling for one scalar write request.
    #[must_use]
    pub const fn with_max_scalar_request_size(mut self, bytes: usize) -> Self {
        self.max_scalar_request_size = bytes;
        self
    }

    /// Set the byte ceiling for one tensor write request.
    #[must_use]
    pub const fn with_max_tensor_request_size(mut self, bytes: usize) -> Self {
        self.max_tensor_request_size = bytes;
        self
    }

    /// Set the largest accepted single tensor point.
    #[must_use]
    pub const fn with_max_tensor_point_size(mut self, bytes: usize) -> Self {
        self.max_tensor_point_size = bytes;
        self
    }

    /// Set the largest accepted single blob.
    #[must_use]
    pub const fn with_max_blob_size(mut self, bytes: u64) -> Self {
        self.max_blob_size = bytes;
        self
    }

    /// Set the minimum interval between logdir polls.
    #[must_use]
    pub const fn with_min_logdir_poll_interval(mut self, interval: Duration) -> Self {
        self.min_logdir_poll_interval = interval;
        self
    }
}
