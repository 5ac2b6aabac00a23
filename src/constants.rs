use rand::Rng;

/// Key of the top-level format tag in a JSON document carrier
pub const FORMAT_TAG_KEY: &str = "pearl_memorial";

/// Carrier format version
/// Decoders reject JSON documents carrying any other version
pub const FORMAT_VERSION: &str = "v1.0";

/// Type discriminator for payloads holding a single self-contained clip
pub const STANDALONE_AUDIO: &str = "standalone_audio";

/// Mime of every clip produced by the transcoder
pub const CLIP_MIME: &str = "audio/ogg;codecs=opus";

/// Path appended to the base URL for direct play links
pub const PLAY_PATH: &str = "/play";

pub const TECHNOLOGY: &str = "Server-Independent DataURI";
pub const CREATOR: &str = "Pearl Memorial System";

/// Length of the per-request clip id
pub const CLIP_ID_LEN: usize = 8;

/// Compact timestamp format used by the `ts` URL parameter
pub const COMPACT_TS_FORMAT: &str = "%Y%m%d%H%M%S";

/// Byte capacity of a version 40 QR symbol at error correction level L
pub const QR_V40_L_BYTES: usize = 2953;

/// Generate a short random clip id
/// Only needs to be unique for the lifetime of one request
pub fn generate_clip_id() -> String {
    rand::thread_rng()
        .sample_iter(&rand::distributions::Alphanumeric)
        .take(CLIP_ID_LEN)
        .map(char::from)
        .collect::<String>()
        .to_lowercase()
}
