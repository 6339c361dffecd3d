use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;
use crate::types::{AgentId, Timestamp};

/// A self-signed advertisement of an agent's reachable addresses.
///
/// Travels as the JSON `content` of an `announcement` envelope; the envelope
/// sender must be the announcing agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Announcement {
    pub agent_id: AgentId,
    pub display_name: String,
    pub protocol_version: String,
    pub timestamp: Timestamp,
    #[serde(default)]
    pub advertised_addresses: Vec<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(default)]
    pub signature: String,
}

impl Announcement {
    /// Canonical bytes covered by the announcement's own signature.
    pub fn signing_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        let mut fields: BTreeMap<&'static str, Value> = BTreeMap::new();
        fields.insert("agentId", Value::from(self.agent_id.as_str()));
        fields.insert("displayName", Value::from(self.display_name.as_str()));
        fields.insert("protocolVersion", Value::from(self.protocol_version.as_str()));
        fields.insert("timestamp", Value::from(self.timestamp));
        fields.insert(
            "advertisedAddresses",
            Value::from(self.advertised_addresses.clone()),
        );
        let metadata: serde_json::Map<String, Value> = self
            .metadata
            .iter()
            .map(|(k, v)| (k.clone(), Value::from(v.as_str())))
            .collect();
        fields.insert("metadata", Value::Object(metadata));
        serde_json::to_vec(&fields).map_err(|e| ProtocolError::Encode(e.to_string()))
    }

    /// Encode as envelope content.
    pub fn to_content(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Encode(e.to_string()))
    }

    pub fn from_content(content: &str) -> Result<Self, ProtocolError> {
        let announcement: Self =
            serde_json::from_str(content).map_err(|e| ProtocolError::Decode(e.to_string()))?;
        if announcement.signature.is_empty() {
            return Err(ProtocolError::MissingField("signature"));
        }
        Ok(announcement)
    }

    /// Major component of `protocol_version`, if it parses.
    pub fn major_version(&self) -> Option<u64> {
        major_of(&self.protocol_version)
    }
}

/// Major component of a `MAJOR.MINOR.PATCH` version string.
pub fn major_of(version: &str) -> Option<u64> {
    version.split('.').next()?.trim().parse().ok()
}
