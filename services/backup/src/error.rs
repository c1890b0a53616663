//! Per-message error taxonomy.
//!
//! Every failure raised while handling one message is a [`ProcessError`]. The
//! listener never propagates these; it classifies them with
//! [`ProcessError::disposition`] and keeps consuming.

use crate::store::StoreError;
use crate::topic::TopicError;
use thiserror::Error;

/// How a failed message should be treated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// The message itself is bad; retrying it can never succeed
    Drop,
    /// An external dependency failed; the message was valid
    Operational,
}

/// Errors that can occur while handling a single message
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error(transparent)]
    InvalidTopic(#[from] TopicError),

    #[error("Failed to decode envelope: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    #[error("Failed to encode metadata as JSON: {0}")]
    MetadataEncode(#[from] serde_json::Error),

    #[error("Failed to write object {key}: {source} (already written: {written:?})")]
    Store {
        key: String,
        written: Vec<String>,
        #[source]
        source: StoreError,
    },

    #[error("No free minute bucket under {base_path} after {attempts} attempts")]
    BucketExhausted { base_path: String, attempts: u32 },
}

impl ProcessError {
    /// Classify the error for logging and metrics
    pub fn disposition(&self) -> Disposition {
        match self {
            ProcessError::InvalidTopic(_)
            | ProcessError::Decode(_)
            | ProcessError::MetadataEncode(_) => Disposition::Drop,
            ProcessError::Store { .. } | ProcessError::BucketExhausted { .. } => {
                Disposition::Operational
            }
        }
    }

    /// Short label used for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            ProcessError::InvalidTopic(_) => "invalid_topic",
            ProcessError::Decode(_) => "decode",
            ProcessError::MetadataEncode(_) => "metadata_encode",
            ProcessError::Store { .. } => "store",
            ProcessError::BucketExhausted { .. } => "bucket_exhausted",
        }
    }
}
