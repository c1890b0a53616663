use crate::envelope::Envelope;
use crate::error::ProcessError;
use crate::placement::{ObjectPlacementWriter, Placement};
use crate::topic::TopicIdentity;
use chrono::{DateTime, Utc};
use tracing::{debug, instrument};

/// Handles one inbound message end to end: topic, envelope, placement
pub struct BackupHandler {
    writer: ObjectPlacementWriter,
}

impl BackupHandler {
    pub fn new(writer: ObjectPlacementWriter) -> Self {
        Self { writer }
    }

    /// Process a raw publish. Nothing is written unless the topic parses and
    /// the envelope decodes.
    #[instrument(skip(self, payload), fields(size_bytes = payload.len()))]
    pub async fn handle(
        &self,
        topic: &str,
        payload: &[u8],
        received_at: DateTime<Utc>,
    ) -> Result<Placement, ProcessError> {
        let identity = TopicIdentity::parse(topic)?;
        let envelope = Envelope::decode(payload)?;

        debug!(
            device = %identity.device_name,
            sensor = %identity.sensor_name,
            metadata_keys = envelope.metadata.len(),
            "Decoded envelope"
        );

        self.writer.place(&identity, &envelope, received_at).await
    }
}
