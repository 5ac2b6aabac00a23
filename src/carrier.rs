//! Carrier wire formats.
//!
//! A carrier is the string a QR code holds. It comes in two shapes:
//!
//! ```text
//! DirectUrl     <base>/play?audio=<base64url clip>&filename=<name>&id=<id>[&ts=<YYYYMMDDhhmmss>][&loc=<lat,lon>]
//!               <base>/play?data=<percent-encoded base64(JSON document)>
//! JsonDocument  {"pearl_memorial":"v1.0","type":"standalone_audio",
//!                "audio_data":"data:audio/ogg;codecs=opus;base64,<...>","metadata":{...}}
//! ```

use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::clip::Metadata;
use crate::constants::{FORMAT_VERSION, STANDALONE_AUDIO};

/// JSON document carrier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonDocument {
    #[serde(rename = "pearl_memorial")]
    pub format_tag: String,
    #[serde(rename = "type")]
    pub payload_type: String,
    /// `data:<mime>;base64,<clip>`
    pub audio_data: String,
    #[serde(default)]
    pub metadata: Metadata,
}

impl JsonDocument {
    pub fn standalone(mime: &str, bytes: &[u8], metadata: Metadata) -> Self {
        Self {
            format_tag: FORMAT_VERSION.to_string(),
            payload_type: STANDALONE_AUDIO.to_string(),
            audio_data: to_data_uri(mime, bytes),
            metadata,
        }
    }

    /// Compact serialization, non-ASCII kept as UTF-8
    pub fn to_compact_string(&self) -> String {
        // Plain structs with string/number fields cannot fail to serialize
        serde_json::to_string(self).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CarrierKind {
    DirectUrl,
    JsonDocument,
}

impl fmt::Display for CarrierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CarrierKind::DirectUrl => write!(f, "URL (camera compatible)"),
            CarrierKind::JsonDocument => write!(f, "JSON Data"),
        }
    }
}

/// Serialized carrier, exactly one representation per encode
#[derive(Debug, Clone, PartialEq)]
pub enum Carrier {
    DirectUrl(String),
    JsonDocument(String),
}

impl Carrier {
    pub fn kind(&self) -> CarrierKind {
        match self {
            Carrier::DirectUrl(_) => CarrierKind::DirectUrl,
            Carrier::JsonDocument(_) => CarrierKind::JsonDocument,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Carrier::DirectUrl(s) | Carrier::JsonDocument(s) => s,
        }
    }

    /// Length in characters, the unit the capacity budget is expressed in
    pub fn len(&self) -> usize {
        carrier_len(self.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.as_str().is_empty()
    }

    pub fn into_string(self) -> String {
        match self {
            Carrier::DirectUrl(s) | Carrier::JsonDocument(s) => s,
        }
    }
}

pub fn carrier_len(s: &str) -> usize {
    s.chars().count()
}

pub fn to_data_uri(mime: &str, bytes: &[u8]) -> String {
    format!("data:{};base64,{}", mime, STANDARD.encode(bytes))
}

/// Split `data:<mime>;base64,<payload>` into `(mime, payload)`
///
/// Returns `None` for anything that is not a base64 data URI.
pub fn split_data_uri(s: &str) -> Option<(&str, &str)> {
    let rest = s.strip_prefix("data:")?;
    let (header, payload) = rest.split_once(',')?;
    let mime = header.strip_suffix(";base64")?;
    Some((mime, payload))
}

/// Decode base64 in either alphabet, padded or not
///
/// Form encoders turn `+` into a space; those are mapped back first.
/// Empty input is rejected.
pub fn decode_base64_lenient(s: &str) -> Option<Vec<u8>> {
    let normalized: String = s
        .trim()
        .chars()
        .filter(|c| *c != '\n' && *c != '\r')
        .map(|c| match c {
            ' ' | '+' => '-',
            '/' => '_',
            other => other,
        })
        .collect();
    let normalized = normalized.trim_end_matches('=');
    if normalized.is_empty() {
        return None;
    }
    URL_SAFE_NO_PAD.decode(normalized).ok()
}
