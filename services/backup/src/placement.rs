//! Object placement: where a decoded envelope lands in the bucket.
//!
//! Key layout:
//!
//! ```text
//! {device}/{sensor}/{YYYY}/{MM}/{DD}/{HH}-{mm}/metadata.json
//! {device}/{sensor}/{YYYY}/{MM}/{DD}/{HH}-{mm}/data.h5
//! ```
//!
//! The timestamp is the UTC time the message was received, never a time taken
//! from the envelope.

use crate::config::CollisionPolicy;
use crate::envelope::Envelope;
use crate::error::ProcessError;
use crate::store::ObjectStore;
use crate::topic::TopicIdentity;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

pub const METADATA_OBJECT: &str = "metadata.json";
pub const PAYLOAD_OBJECT: &str = "data.h5";

const METADATA_CONTENT_TYPE: &str = "application/json";
const PAYLOAD_CONTENT_TYPE: &str = "application/octet-stream";

/// Upper bound on `-N` suffixes tried under [`CollisionPolicy::Preserve`]
const MAX_BUCKET_SUFFIX: u32 = 1000;

/// Keys written for one message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    pub base_path: String,
    pub metadata_key: String,
    pub payload_key: String,
    pub metadata_bytes: usize,
    pub payload_bytes: usize,
}

/// Minute bucket directory for a topic identity
pub fn base_path(identity: &TopicIdentity, received_at: DateTime<Utc>) -> String {
    format!(
        "{device}/{sensor}/{time_path}",
        device = identity.device_name,
        sensor = identity.sensor_name,
        time_path = received_at.format("%Y/%m/%d/%H-%M"),
    )
}

/// Writes the metadata and payload objects of decoded envelopes
pub struct ObjectPlacementWriter {
    store: Arc<dyn ObjectStore>,
    policy: CollisionPolicy,
}

impl ObjectPlacementWriter {
    pub fn new(store: Arc<dyn ObjectStore>, policy: CollisionPolicy) -> Self {
        Self { store, policy }
    }

    /// Write `metadata.json` then `data.h5` under the minute bucket.
    ///
    /// Both writes are always attempted. A failure on either one is reported
    /// together with the keys that did get written, since there is no
    /// rollback.
    #[instrument(
        skip(self, identity, envelope),
        fields(device = %identity.device_name, sensor = %identity.sensor_name)
    )]
    pub async fn place(
        &self,
        identity: &TopicIdentity,
        envelope: &Envelope,
        received_at: DateTime<Utc>,
    ) -> Result<Placement, ProcessError> {
        let metadata = envelope.metadata_json()?;
        let base_path = self.resolve_base_path(identity, received_at).await?;

        let placement = Placement {
            metadata_key: format!("{}/{}", base_path, METADATA_OBJECT),
            payload_key: format!("{}/{}", base_path, PAYLOAD_OBJECT),
            metadata_bytes: metadata.len(),
            payload_bytes: envelope.payload().len(),
            base_path,
        };

        let metadata_result = self
            .store
            .put_object(&placement.metadata_key, metadata, METADATA_CONTENT_TYPE)
            .await;
        let payload_result = self
            .store
            .put_object(
                &placement.payload_key,
                envelope.payload().to_vec(),
                PAYLOAD_CONTENT_TYPE,
            )
            .await;

        match (metadata_result, payload_result) {
            (Ok(()), Ok(())) => {
                debug!(base_path = %placement.base_path, "Envelope placed");
                Ok(placement)
            }
            (Err(source), payload_result) => {
                let written = if payload_result.is_ok() {
                    vec![placement.payload_key.clone()]
                } else {
                    Vec::new()
                };
                Err(ProcessError::Store {
                    key: placement.metadata_key,
                    written,
                    source,
                })
            }
            (Ok(()), Err(source)) => Err(ProcessError::Store {
                key: placement.payload_key,
                written: vec![placement.metadata_key],
                source,
            }),
        }
    }

    async fn resolve_base_path(
        &self,
        identity: &TopicIdentity,
        received_at: DateTime<Utc>,
    ) -> Result<String, ProcessError> {
        let base = base_path(identity, received_at);

        if self.policy == CollisionPolicy::Overwrite {
            return Ok(base);
        }

        if !self.bucket_taken(&base).await? {
            return Ok(base);
        }

        for suffix in 1..=MAX_BUCKET_SUFFIX {
            let candidate = format!("{}-{}", base, suffix);
            if !self.bucket_taken(&candidate).await? {
                debug!(base_path = %candidate, "Minute bucket taken, using suffix");
                return Ok(candidate);
            }
        }

        warn!(base_path = %base, "All minute bucket suffixes taken");
        Err(ProcessError::BucketExhausted {
            base_path: base,
            attempts: MAX_BUCKET_SUFFIX,
        })
    }

    async fn bucket_taken(&self, base_path: &str) -> Result<bool, ProcessError> {
        for object in [METADATA_OBJECT, PAYLOAD_OBJECT] {
            let key = format!("{}/{}", base_path, object);
            let exists = self
                .store
                .object_exists(&key)
                .await
                .map_err(|source| ProcessError::Store {
                    key,
                    written: Vec::new(),
                    source,
                })?;
            if exists {
                return Ok(true);
            }
        }
        Ok(false)
    }
}
