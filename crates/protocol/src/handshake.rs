//! Handshake messages

use serde::{Deserialize, Serialize};

/// Key/value data a client declares during a handshake
pub type Claims = serde_json::Map<String, serde_json::Value>;

/// Server verdict on a handshake
///
/// Field names match the JSON peers already speak: `{"Successful":..,"Errormsg":..}`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct HandshakeResponse {
    #[serde(rename = "Successful")]
    pub successful: bool,

    #[serde(rename = "Errormsg", default)]
    pub errormsg: String,
}

impl HandshakeResponse {
    pub fn accepted() -> Self {
        Self {
            successful: true,
            errormsg: String::new(),
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            successful: false,
            errormsg: reason.into(),
        }
    }

    /// `Err` carries the server-supplied reason
    pub fn into_result(self) -> Result<(), String> {
        if self.successful {
            Ok(())
        } else {
            Err(self.errormsg)
        }
    }
}

/// Signed instance identity document, as sent by an attesting client
///
/// Both fields travel as base64 strings inside the JSON payload.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct IdentityHandshake {
    /// Raw document bytes exactly as the metadata service returned them
    #[serde(rename = "Doc", with = "base64_bytes")]
    pub doc: Vec<u8>,

    /// Detached signature over `doc` (itself base64 text from the metadata service)
    #[serde(rename = "Sig", with = "base64_bytes")]
    pub sig: Vec<u8>,
}

mod base64_bytes {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        // `null` is how an empty byte slice comes across from some peers
        match Option::<String>::deserialize(deserializer)? {
            Some(encoded) => STANDARD
                .decode(encoded.as_bytes())
                .map_err(serde::de::Error::custom),
            None => Ok(Vec::new()),
        }
    }
}
