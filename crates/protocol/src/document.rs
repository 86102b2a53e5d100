//! Instance identity document

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A cloud provider's statement of a compute instance's properties
///
/// Only the fields below are kept; anything else in the document is ignored.
/// Absent fields take their zero value.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct InstanceIdentityDocument {
    pub instance_id: String,

    pub account_id: String,

    pub private_ip: String,

    pub region: String,

    pub availability_zone: String,

    /// When the instance entered the pending state
    pub pending_time: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub architecture: Option<String>,

    /// Document schema version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl InstanceIdentityDocument {
    pub fn from_json(raw: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(raw)
    }
}
