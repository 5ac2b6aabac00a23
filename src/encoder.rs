use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use chrono::{DateTime, Utc};
use log::{debug, info};

use crate::capacity::CapacityGuard;
use crate::carrier::{carrier_len, Carrier, JsonDocument};
use crate::clip::{CompressedClip, Metadata};
use crate::config::{PayloadConfig, UrlFraming};
use crate::constants::{COMPACT_TS_FORMAT, PLAY_PATH};
use crate::error::PayloadError;

/// Packs a clip and its metadata into the shorter carrier that fits
#[derive(Debug, Clone)]
pub struct PayloadEncoder {
    guard: CapacityGuard,
    framing: UrlFraming,
}

impl PayloadEncoder {
    pub fn new(config: &PayloadConfig) -> Self {
        Self {
            guard: CapacityGuard::new(config.capacity_budget),
            framing: config.url_framing,
        }
    }

    pub fn guard(&self) -> CapacityGuard {
        self.guard
    }

    /// Serialized JSON document candidate
    pub fn json_document_candidate(&self, clip: &CompressedClip, metadata: &Metadata) -> String {
        JsonDocument::standalone(clip.mime(), &clip.bytes, metadata.clone()).to_compact_string()
    }

    /// Direct play URL candidate, framed per configuration
    pub fn direct_url_candidate(
        &self,
        clip: &CompressedClip,
        metadata: &Metadata,
        base_url: &str,
    ) -> String {
        let mut url = format!("{}{}?", base_url.trim_end_matches('/'), PLAY_PATH);

        match self.framing {
            UrlFraming::Audio => {
                url.push_str("audio=");
                url.push_str(&urlencoding::encode(&URL_SAFE_NO_PAD.encode(&clip.bytes)));
                url.push_str("&filename=");
                url.push_str(&urlencoding::encode(&metadata.filename));
                url.push_str("&id=");
                url.push_str(&urlencoding::encode(&metadata.id));
                if let Some(ts) = compact_timestamp(&metadata.created) {
                    url.push_str("&ts=");
                    url.push_str(&ts);
                }
                if let Some(loc) = metadata.location_data {
                    url.push_str("&loc=");
                    url.push_str(&loc.to_string());
                }
            }
            UrlFraming::Data => {
                let document = self.json_document_candidate(clip, metadata);
                url.push_str("data=");
                url.push_str(&urlencoding::encode(&STANDARD.encode(document.as_bytes())));
            }
        }

        url
    }

    /// Choose between the DirectURL and JSON document representations
    ///
    /// DirectURL wins when it fits and is no longer than the JSON document;
    /// otherwise the JSON document is used if it fits.
    pub fn encode(
        &self,
        clip: &CompressedClip,
        metadata: &Metadata,
        base_url: &str,
    ) -> Result<Carrier, PayloadError> {
        let json = self.json_document_candidate(clip, metadata);
        let url = self.direct_url_candidate(clip, metadata, base_url);
        let json_len = carrier_len(&json);
        let url_len = carrier_len(&url);

        debug!(
            "Carrier candidates for {}: url={} chars, json={} chars, budget={}",
            metadata.id,
            url_len,
            json_len,
            self.guard.limit()
        );

        if self.guard.fits(url_len) && url_len <= json_len {
            info!("Using URL carrier for {}: {} chars", metadata.id, url_len);
            return Ok(Carrier::DirectUrl(url));
        }

        if self.guard.fits(json_len) {
            info!("Using JSON carrier for {}: {} chars", metadata.id, json_len);
            return Ok(Carrier::JsonDocument(json));
        }

        Err(PayloadError::PayloadTooLarge {
            length: url_len.min(json_len),
            limit: self.guard.limit(),
        })
    }
}

/// RFC 3339 `created` value → `YYYYMMDDhhmmss` in UTC
pub fn compact_timestamp(created: &str) -> Option<String> {
    DateTime::parse_from_rfc3339(created)
        .ok()
        .map(|dt| dt.with_timezone(&Utc).format(COMPACT_TS_FORMAT).to_string())
}
