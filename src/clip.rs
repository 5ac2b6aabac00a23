use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::constants::{CLIP_MIME, CREATOR, TECHNOLOGY};

/// Transcoded low-bitrate Opus clip, ready to be embedded in a carrier
#[derive(Debug, Clone, PartialEq)]
pub struct CompressedClip {
    pub bytes: Vec<u8>,
    pub duration_seconds: f64,
    /// Extension of the upload the clip was made from (e.g. ".wav")
    pub source_extension: String,
}

impl CompressedClip {
    pub fn new(bytes: Vec<u8>, duration_seconds: f64, source_extension: impl Into<String>) -> Self {
        Self {
            bytes,
            duration_seconds,
            source_extension: source_extension.into(),
        }
    }

    pub fn mime(&self) -> &'static str {
        CLIP_MIME
    }
}

/// Latitude/longitude pair, written as `lat,lon` in URLs
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub lat: f64,
    pub lon: f64,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.lat, self.lon)
    }
}

impl FromStr for Location {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (lat, lon) = s
            .split_once(',')
            .ok_or_else(|| format!("Location '{}' is not in lat,lon form", s))?;
        let lat: f64 = lat
            .trim()
            .parse()
            .map_err(|_| format!("Invalid latitude '{}'", lat))?;
        let lon: f64 = lon
            .trim()
            .parse()
            .map_err(|_| format!("Invalid longitude '{}'", lon))?;
        if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
            return Err(format!("Location {},{} out of range", lat, lon));
        }
        Ok(Location { lat, lon })
    }
}

/// Descriptive record embedded next to the clip
///
/// Optional fields are skipped when `None` so they never cost carrier
/// characters as explicit nulls. Every field defaults on deserialization so
/// documents written by older generators still decode.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Metadata {
    pub title: String,
    pub filename: String,
    /// ISO-8601 creation time
    pub created: String,
    /// Clip duration in seconds
    pub duration: f64,
    pub id: String,
    pub technology: String,
    pub creator: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recipient: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location_data: Option<Location>,
}

impl Metadata {
    /// Metadata for a fresh upload, stamped with the current time
    pub fn for_upload(filename: &str, id: &str, duration: f64) -> Self {
        Self {
            title: filename.to_string(),
            filename: filename.to_string(),
            created: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            duration,
            id: id.to_string(),
            technology: TECHNOLOGY.to_string(),
            creator: CREATOR.to_string(),
            recipient: None,
            description: None,
            location_data: None,
        }
    }

    pub fn with_recipient(mut self, recipient: Option<String>) -> Self {
        self.recipient = recipient.filter(|s| !s.trim().is_empty());
        self
    }

    pub fn with_description(mut self, description: Option<String>) -> Self {
        self.description = description.filter(|s| !s.trim().is_empty());
        self
    }

    pub fn with_location(mut self, location: Option<Location>) -> Self {
        self.location_data = location;
        self
    }
}
