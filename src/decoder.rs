use chrono::NaiveDateTime;
use log::{debug, warn};
use serde_json::Value;
use url::Url;

use crate::audio::ogg_opus_duration;
use crate::carrier::{decode_base64_lenient, split_data_uri, CarrierKind};
use crate::clip::{Location, Metadata};
use crate::constants::{CLIP_MIME, COMPACT_TS_FORMAT, FORMAT_TAG_KEY, FORMAT_VERSION, STANDALONE_AUDIO};
use crate::error::PayloadError;

/// Clip bytes and metadata recovered from a carrier
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedPayload {
    /// Shape of the carrier the payload came from
    pub kind: CarrierKind,
    pub mime: String,
    pub bytes: Vec<u8>,
    pub metadata: Metadata,
}

/// Result of looking at a carrier string's shape, in priority order
#[derive(Debug, Clone, PartialEq)]
pub enum Classified {
    /// Any JSON object; tags are checked when decoding
    JsonDocument(Value),
    /// Percent-decoded query parameters that include `audio` or `data`
    DirectUrl(Vec<(String, String)>),
    Unrecognized,
}

/// Classify a carrier without decoding it
///
/// A JSON object always wins, so URL-looking text inside JSON string values
/// never sends the input down the URL path.
pub fn classify(input: &str) -> Classified {
    let trimmed = input.trim();

    if let Some(value) = try_json_object(trimmed) {
        return Classified::JsonDocument(value);
    }

    if let Some(params) = try_query_params(trimmed) {
        return Classified::DirectUrl(params);
    }

    Classified::Unrecognized
}

fn try_json_object(s: &str) -> Option<Value> {
    serde_json::from_str::<Value>(s)
        .ok()
        .filter(Value::is_object)
}

fn try_query_params(s: &str) -> Option<Vec<(String, String)>> {
    let query = match Url::parse(s) {
        Ok(url) => url.query()?.to_string(),
        Err(_) => match s.split_once('?') {
            Some((_, q)) => q.to_string(),
            None => s.to_string(),
        },
    };

    if query.is_empty() || query.chars().any(char::is_whitespace) {
        return None;
    }

    let params = parse_query(&query);
    if params.iter().any(|(k, _)| k == "audio" || k == "data") {
        Some(params)
    } else {
        None
    }
}

/// Split a raw query string and percent-decode it
///
/// `+` is left alone; it is a base64 character here, not a space.
pub fn parse_query(query: &str) -> Vec<(String, String)> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            (percent_decode(key), percent_decode(value))
        })
        .collect()
}

fn percent_decode(s: &str) -> String {
    match urlencoding::decode(s) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => s.to_string(),
    }
}

fn param<'a>(params: &'a [(String, String)], key: &str) -> Option<&'a str> {
    params
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}

/// `YYYYMMDDhhmmss` → `YYYY-MM-DD hh:mm:ss UTC`
///
/// Anything that does not parse is returned unchanged.
pub fn display_timestamp(ts: &str) -> String {
    match NaiveDateTime::parse_from_str(ts, COMPACT_TS_FORMAT) {
        Ok(dt) => dt.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        Err(e) => {
            warn!("Keeping unparsable ts parameter '{}': {}", ts, e);
            ts.to_string()
        }
    }
}

/// Turns carrier strings back into clip bytes
#[derive(Debug, Clone, Default)]
pub struct PayloadDecoder;

impl PayloadDecoder {
    pub fn new() -> Self {
        Self
    }

    pub fn decode(&self, carrier: &str) -> Result<DecodedPayload, PayloadError> {
        match classify(carrier) {
            Classified::JsonDocument(value) => {
                debug!("Decoding carrier as JSON document");
                decode_json_document(value, CarrierKind::JsonDocument)
            }
            Classified::DirectUrl(params) => {
                debug!("Decoding carrier as URL with {} parameters", params.len());
                decode_url_params(&params)
            }
            Classified::Unrecognized => Err(PayloadError::UnrecognizedCarrier),
        }
    }
}

fn decode_json_document(value: Value, kind: CarrierKind) -> Result<DecodedPayload, PayloadError> {
    let tag = value.get(FORMAT_TAG_KEY).and_then(Value::as_str);
    if tag != Some(FORMAT_VERSION) {
        return Err(PayloadError::InvalidFormat(format!(
            "expected {} tag {}, found {:?}",
            FORMAT_TAG_KEY, FORMAT_VERSION, tag
        )));
    }

    let payload_type = value.get("type").and_then(Value::as_str);
    if payload_type != Some(STANDALONE_AUDIO) {
        return Err(PayloadError::InvalidFormat(format!(
            "expected type {}, found {:?}",
            STANDALONE_AUDIO, payload_type
        )));
    }

    let audio_data = value
        .get("audio_data")
        .and_then(Value::as_str)
        .ok_or_else(|| PayloadError::InvalidFormat("audio_data is missing".to_string()))?;

    let (mime, bytes) = decode_audio_data_uri(audio_data)?.ok_or_else(|| {
        PayloadError::InvalidFormat("audio_data is not an audio data URI".to_string())
    })?;

    Ok(DecodedPayload {
        kind,
        mime,
        bytes,
        metadata: lenient_metadata(value.get("metadata")),
    })
}

/// Read document metadata without letting a mistyped field cost the clip
///
/// Falls back to field-by-field extraction when the object does not match
/// `Metadata` exactly; fields that cannot be read keep their defaults.
fn lenient_metadata(value: Option<&Value>) -> Metadata {
    let value = match value {
        Some(v) if !v.is_null() => v,
        _ => return Metadata::default(),
    };

    match serde_json::from_value::<Metadata>(value.clone()) {
        Ok(metadata) => return metadata,
        Err(e) => warn!("Reading metadata field by field: {}", e),
    }

    let text = |key: &str| value.get(key).and_then(value_as_text);

    Metadata {
        title: text("title").unwrap_or_default(),
        filename: text("filename").unwrap_or_default(),
        created: text("created").unwrap_or_default(),
        duration: value.get("duration").and_then(value_as_f64).unwrap_or(0.0),
        id: text("id").unwrap_or_default(),
        technology: text("technology").unwrap_or_default(),
        creator: text("creator").unwrap_or_default(),
        recipient: text("recipient").filter(|s| !s.trim().is_empty()),
        description: text("description").filter(|s| !s.trim().is_empty()),
        location_data: value.get("location_data").and_then(value_as_location),
    }
}

fn value_as_text(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn value_as_f64(v: &Value) -> Option<f64> {
    v.as_f64().or_else(|| v.as_str()?.trim().parse().ok())
}

/// `{"lat":..,"lon":..}` with numbers or numeric strings, or a `lat,lon` string
fn value_as_location(v: &Value) -> Option<Location> {
    let parsed = match v.as_str() {
        Some(s) => s.parse::<Location>(),
        None => {
            let lat = v.get("lat").and_then(value_as_f64)?;
            let lon = v.get("lon").and_then(value_as_f64)?;
            format!("{},{}", lat, lon).parse::<Location>()
        }
    };
    match parsed {
        Ok(location) => Some(location),
        Err(e) => {
            warn!("Ignoring location_data: {}", e);
            None
        }
    }
}

/// `Ok(None)` when `s` is not an audio data URI at all
fn decode_audio_data_uri(s: &str) -> Result<Option<(String, Vec<u8>)>, PayloadError> {
    if !s.starts_with("data:audio/") {
        return Ok(None);
    }

    let (mime, payload) = split_data_uri(s).ok_or_else(|| {
        PayloadError::InvalidFormat("audio data URI is not base64 encoded".to_string())
    })?;
    let bytes = decode_base64_lenient(payload).ok_or_else(|| {
        PayloadError::InvalidFormat("audio data URI payload is not valid base64".to_string())
    })?;

    Ok(Some((mime.to_string(), bytes)))
}

fn decode_url_params(params: &[(String, String)]) -> Result<DecodedPayload, PayloadError> {
    if let Some(audio) = param(params, "audio") {
        let (mime, bytes) = match decode_audio_data_uri(audio)? {
            Some(decoded) => decoded,
            None => {
                let bytes = decode_base64_lenient(audio).ok_or(PayloadError::UnrecognizedCarrier)?;
                (CLIP_MIME.to_string(), bytes)
            }
        };
        let metadata = url_metadata(params, &bytes);
        return Ok(DecodedPayload {
            kind: CarrierKind::DirectUrl,
            mime,
            bytes,
            metadata,
        });
    }

    let data = param(params, "data").ok_or(PayloadError::UnrecognizedCarrier)?;

    if let Some((mime, bytes)) = decode_audio_data_uri(data)? {
        let metadata = url_metadata(params, &bytes);
        return Ok(DecodedPayload {
            kind: CarrierKind::DirectUrl,
            mime,
            bytes,
            metadata,
        });
    }

    if let Some(value) = try_json_object(data) {
        return decode_json_document(value, CarrierKind::DirectUrl);
    }

    let text = decode_base64_lenient(data)
        .and_then(|raw| String::from_utf8(raw).ok())
        .ok_or(PayloadError::UnrecognizedCarrier)?;

    match try_json_object(&text) {
        Some(value) => decode_json_document(value, CarrierKind::DirectUrl),
        None => Err(PayloadError::UnrecognizedCarrier),
    }
}

fn url_metadata(params: &[(String, String)], bytes: &[u8]) -> Metadata {
    let filename = param(params, "filename").unwrap_or_default().to_string();

    let location_data = param(params, "loc").and_then(|loc| match loc.parse::<Location>() {
        Ok(location) => Some(location),
        Err(e) => {
            warn!("Ignoring loc parameter: {}", e);
            None
        }
    });

    Metadata {
        title: filename.clone(),
        filename,
        created: param(params, "ts").map(display_timestamp).unwrap_or_default(),
        duration: ogg_opus_duration(bytes).unwrap_or(0.0),
        id: param(params, "id").unwrap_or_default().to_string(),
        location_data,
        ..Metadata::default()
    }
}
