use clap::ValueEnum;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::QR_V40_L_BYTES;

#[derive(Debug, Clone, Copy, PartialEq, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UrlFraming {
    /// `/play?audio=<base64url clip>&filename=..&id=..&ts=..&loc=..`
    Audio,
    /// `/play?data=<base64 JSON document>`
    Data,
}

fn default_port() -> u16 {
    5000
}

fn default_base_url() -> String {
    "http://localhost:5000".to_string()
}

/// Service configuration file structure
///
/// Every section is optional; a missing file section falls back to the
/// defaults below.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// HTTP port for `serve` (default: 5000)
    #[serde(default = "default_port")]
    pub port: u16,
    /// Public base URL that direct play links are built on
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub payload: PayloadConfig,
    #[serde(default)]
    pub upload: UploadLimits,
    #[serde(default)]
    pub transcode: TranscodeConfig,
    #[serde(default)]
    pub qr: QrConfig,
}

/// Carrier encoding settings (maps to [payload] section in TOML)
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PayloadConfig {
    /// Maximum carrier length in characters
    pub capacity_budget: usize,
    /// Query framing used for the DirectURL candidate
    pub url_framing: UrlFraming,
}

/// Upload acceptance rules (maps to [upload] section in TOML)
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UploadLimits {
    /// Upload byte ceiling (default: 3 MiB)
    pub max_file_size: usize,
    /// Seconds of audio kept from the upload
    pub clip_duration: f64,
    pub audio_extensions: Vec<String>,
    /// Video containers whose audio track is extracted
    pub video_extensions: Vec<String>,
}

/// External transcoder settings (maps to [transcode] section in TOML)
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TranscodeConfig {
    pub ffmpeg_path: PathBuf,
    /// Upper bound for a single ffmpeg run, in seconds
    pub timeout_secs: u64,
    /// Opus bitrate passed to `-b:a`
    pub bitrate: String,
    pub sample_rate: u32,
    pub highpass_hz: u32,
    pub lowpass_hz: u32,
    /// Sample rate of the WAV produced for playback
    pub playback_sample_rate: u32,
}

/// QR symbol rendering (maps to [qr] section in TOML)
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QrConfig {
    /// Pixels per module
    pub box_size: u32,
    /// Quiet zone width in modules
    pub border: u32,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            base_url: default_base_url(),
            payload: PayloadConfig::default(),
            upload: UploadLimits::default(),
            transcode: TranscodeConfig::default(),
            qr: QrConfig::default(),
        }
    }
}

impl Default for PayloadConfig {
    fn default() -> Self {
        Self {
            capacity_budget: QR_V40_L_BYTES,
            url_framing: UrlFraming::Audio,
        }
    }
}

impl Default for UploadLimits {
    fn default() -> Self {
        Self {
            max_file_size: 3 * 1024 * 1024,
            clip_duration: 2.0,
            audio_extensions: [".mp3", ".m4a", ".wav", ".aac", ".ogg", ".flac"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            video_extensions: [".webm", ".mp4", ".mov", ".avi", ".mkv"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl Default for TranscodeConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: PathBuf::from("ffmpeg"),
            timeout_secs: 30,
            bitrate: "1k".to_string(),
            sample_rate: 8000,
            highpass_hz: 80,
            lowpass_hz: 8000,
            playback_sample_rate: 16000,
        }
    }
}

impl Default for QrConfig {
    fn default() -> Self {
        Self {
            box_size: 4,
            border: 1,
        }
    }
}

impl TranscodeConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl ServiceConfig {
    /// Read and validate a TOML config file
    pub fn load(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file '{}': {}", path.display(), e))?;
        let config: ServiceConfig = toml::from_str(&content)
            .map_err(|e| format!("Failed to parse config file '{}': {}", path.display(), e))?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path` if given, otherwise use defaults
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, Box<dyn std::error::Error>> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::default()),
        }
    }

    /// Validate cross-field constraints that serde cannot express
    pub fn validate(&self) -> Result<(), String> {
        if self.payload.capacity_budget == 0 {
            return Err("payload.capacity_budget must be greater than 0".to_string());
        }

        match url::Url::parse(&self.base_url) {
            Ok(u) if u.scheme() == "http" || u.scheme() == "https" => {}
            Ok(u) => {
                return Err(format!(
                    "base_url must use http or https, found '{}'",
                    u.scheme()
                ))
            }
            Err(e) => return Err(format!("Invalid base_url '{}': {}", self.base_url, e)),
        }

        if !(self.upload.clip_duration > 0.0) {
            return Err("upload.clip_duration must be positive".to_string());
        }

        if self.upload.max_file_size == 0 {
            return Err("upload.max_file_size must be greater than 0".to_string());
        }

        for ext in self
            .upload
            .audio_extensions
            .iter()
            .chain(self.upload.video_extensions.iter())
        {
            if !ext.starts_with('.') {
                return Err(format!("Extension '{}' must start with '.'", ext));
            }
        }

        if self.transcode.timeout_secs == 0 {
            return Err("transcode.timeout_secs must be greater than 0".to_string());
        }

        if self.qr.box_size == 0 {
            return Err("qr.box_size must be greater than 0".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config: ServiceConfig = toml::from_str("").unwrap();
        assert_eq!(config.port, 5000);
        assert_eq!(config.payload.capacity_budget, QR_V40_L_BYTES);
        assert_eq!(config.payload.url_framing, UrlFraming::Audio);
        assert_eq!(config.upload.max_file_size, 3 * 1024 * 1024);
        assert_eq!(config.transcode.timeout_secs, 30);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_sections() {
        let config: ServiceConfig = toml::from_str(
            r#"
            base_url = "https://voice.example.com"

            [payload]
            capacity_budget = 60000
            url_framing = "data"

            [transcode]
            timeout_secs = 5
            "#,
        )
        .unwrap();

        assert_eq!(config.base_url, "https://voice.example.com");
        assert_eq!(config.payload.capacity_budget, 60000);
        assert_eq!(config.payload.url_framing, UrlFraming::Data);
        assert_eq!(config.transcode.timeout(), Duration::from_secs(5));
        assert_eq!(config.transcode.bitrate, "1k");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = ServiceConfig::default();
        config.payload.capacity_budget = 0;
        assert!(config.validate().is_err());

        let mut config = ServiceConfig::default();
        config.base_url = "ftp://example.com".to_string();
        assert!(config.validate().unwrap_err().contains("http"));

        let mut config = ServiceConfig::default();
        config.upload.audio_extensions.push("wav".to_string());
        assert!(config.validate().is_err());
    }
}
