//! MessagePack envelope published by the sensor gateways.
//!
//! The envelope is a map with two optional keys:
//!
//! - `metadata`: a map of string keys to JSON-compatible values
//! - `file`: the raw payload bytes (`bin`, or legacy `raw` strings)

use serde::de::{Deserialize, Deserializer, IgnoredAny, MapAccess, Visitor};
use serde_bytes::ByteBuf;
use serde_json::{Map, Value};
use std::fmt;

/// Decoded envelope
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Envelope {
    /// Sensor metadata; absent or nil decodes to an empty map
    pub metadata: Map<String, Value>,
    /// Opaque payload; absent decodes to zero bytes
    pub file: ByteBuf,
}

impl Envelope {
    /// Decode an envelope from its MessagePack representation
    pub fn decode(payload: &[u8]) -> Result<Self, rmp_serde::decode::Error> {
        rmp_serde::from_slice(payload)
    }

    /// Metadata serialized as UTF-8 JSON
    pub fn metadata_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(&self.metadata)
    }

    /// Payload bytes
    pub fn payload(&self) -> &[u8] {
        self.file.as_ref()
    }
}

// Only a map is an envelope. A derived impl would also take a positional
// array, which gateways never send.
impl<'de> Deserialize<'de> for Envelope {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_map(EnvelopeVisitor)
    }
}

struct EnvelopeVisitor;

impl<'de> Visitor<'de> for EnvelopeVisitor {
    type Value = Envelope;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a map with optional `metadata` and `file` keys")
    }

    fn visit_map<A>(self, mut map: A) -> Result<Envelope, A::Error>
    where
        A: MapAccess<'de>,
    {
        let mut envelope = Envelope::default();

        // Keys may arrive as str or bin depending on the packer
        while let Some(key) = map.next_key::<ByteBuf>()? {
            match key.as_slice() {
                b"metadata" => {
                    envelope.metadata = map
                        .next_value::<Option<Map<String, Value>>>()?
                        .unwrap_or_default();
                }
                b"file" => envelope.file = map.next_value()?,
                _ => {
                    map.next_value::<IgnoredAny>()?;
                }
            }
        }

        Ok(envelope)
    }
}
