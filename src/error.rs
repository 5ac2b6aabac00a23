use std::fmt;
use std::time::Duration;

/// Errors raised while packing a clip into a carrier or unpacking one
#[derive(Debug, Clone, PartialEq)]
pub enum PayloadError {
    /// Carrier does not fit the capacity budget or the largest QR symbol
    PayloadTooLarge { length: usize, limit: usize },
    /// JSON document without the expected format tag or type discriminator,
    /// or with an unusable `audio_data` field
    InvalidFormat(String),
    /// Neither a tagged JSON document nor a URL/query carrying audio
    UnrecognizedCarrier,
}

impl PayloadError {
    pub fn kind(&self) -> &'static str {
        match self {
            PayloadError::PayloadTooLarge { .. } => "payload_too_large",
            PayloadError::InvalidFormat(_) => "invalid_format",
            PayloadError::UnrecognizedCarrier => "unrecognized_carrier",
        }
    }
}

impl fmt::Display for PayloadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PayloadError::PayloadTooLarge { length, limit } => {
                write!(
                    f,
                    "Payload too large: {} characters exceeds limit of {}. Record a shorter clip",
                    length, limit
                )
            }
            PayloadError::InvalidFormat(reason) => write!(f, "Invalid carrier format: {}", reason),
            PayloadError::UnrecognizedCarrier => {
                write!(f, "Input is neither a carrier JSON document nor a play URL")
            }
        }
    }
}

impl std::error::Error for PayloadError {}

/// Errors surfaced by the upload → QR and carrier → playback pipelines
#[derive(Debug)]
pub enum ServiceError {
    /// No file in the upload form
    MissingUpload,
    /// Extension outside the accepted set, or input ffmpeg cannot read
    UnsupportedMediaFormat(String),
    FileTooLarge { size: usize, limit: usize },
    TranscodeTimeout(Duration),
    TranscodeFailed(String),
    /// ffmpeg binary could not be spawned at all
    TranscoderUnavailable(String),
    Payload(PayloadError),
    Io(std::io::Error),
    Image(String),
}

impl ServiceError {
    /// Stable kind string reported to API clients
    pub fn kind(&self) -> &'static str {
        match self {
            ServiceError::MissingUpload => "missing_upload",
            ServiceError::UnsupportedMediaFormat(_) => "unsupported_media_format",
            ServiceError::FileTooLarge { .. } => "file_too_large",
            ServiceError::TranscodeTimeout(_) => "transcode_timeout",
            ServiceError::TranscodeFailed(_) => "transcode_failed",
            ServiceError::TranscoderUnavailable(_) => "transcoder_unavailable",
            ServiceError::Payload(e) => e.kind(),
            ServiceError::Io(_) => "io",
            ServiceError::Image(_) => "image",
        }
    }
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceError::MissingUpload => write!(f, "No audio file was provided"),
            ServiceError::UnsupportedMediaFormat(msg) => {
                write!(f, "Unsupported media format: {}", msg)
            }
            ServiceError::FileTooLarge { size, limit } if *limit >= 1024 * 1024 => write!(
                f,
                "File too large: {} bytes (max {}MB)",
                size,
                limit / 1024 / 1024
            ),
            ServiceError::FileTooLarge { size, limit } => {
                write!(f, "File too large: {} bytes (max {} bytes)", size, limit)
            }
            ServiceError::TranscodeTimeout(after) => {
                write!(f, "Audio processing timed out after {:?}", after)
            }
            ServiceError::TranscodeFailed(msg) => write!(f, "Audio processing failed: {}", msg),
            ServiceError::TranscoderUnavailable(msg) => {
                write!(f, "Audio processing service unavailable: {}", msg)
            }
            ServiceError::Payload(e) => write!(f, "{}", e),
            ServiceError::Io(e) => write!(f, "I/O error: {}", e),
            ServiceError::Image(msg) => write!(f, "Image error: {}", msg),
        }
    }
}

impl std::error::Error for ServiceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ServiceError::Payload(e) => Some(e),
            ServiceError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<PayloadError> for ServiceError {
    fn from(e: PayloadError) -> Self {
        ServiceError::Payload(e)
    }
}

impl From<std::io::Error> for ServiceError {
    fn from(e: std::io::Error) -> Self {
        ServiceError::Io(e)
    }
}
