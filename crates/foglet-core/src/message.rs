//! The message envelope carried by the routing core.

use serde::{Deserialize, Serialize};

/// A message published by a workload and fanned out to the receivers of
/// its route.
///
/// `content` is raw bytes; on the wire (local API bodies and connector
/// frames) it is base64-encoded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    /// Node-unique, time-sortable id (base32). Assigned by the router
    /// on publish; empty in inbound API bodies.
    #[serde(default)]
    pub id: String,
    /// Uuid of the publishing workload.
    pub publisher: String,
    /// Publication time, unix milliseconds. Assigned on publish.
    #[serde(default)]
    pub timestamp: u64,
    #[serde(default)]
    pub tag: String,
    #[serde(default)]
    pub content_type: String,
    #[serde(with = "base64_bytes")]
    pub content: Vec<u8>,
}

impl Message {
    /// Approximate in-memory size, used for broker memory accounting.
    pub fn size_bytes(&self) -> usize {
        self.id.len()
            + self.publisher.len()
            + self.tag.len()
            + self.content_type.len()
            + self.content.len()
            + std::mem::size_of::<u64>()
    }
}

/// Serialize byte content as a base64 string.
mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
