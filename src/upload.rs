use std::path::Path;

use crate::config::UploadLimits;
use crate::error::ServiceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Audio,
    /// Container whose audio track has to be extracted
    Video,
}

/// Accepted upload, identified by its lowercase extension
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedUpload {
    pub kind: MediaKind,
    /// Lowercase, with the leading dot
    pub extension: String,
}

impl ValidatedUpload {
    pub fn is_video(&self) -> bool {
        self.kind == MediaKind::Video
    }

    /// Human readable description of what the transcoder did
    pub fn process_label(&self) -> String {
        match self.kind {
            MediaKind::Video => format!(
                "Audio extracted from {} video",
                self.extension.to_uppercase()
            ),
            MediaKind::Audio => format!("Audio processed from {}", self.extension.to_uppercase()),
        }
    }
}

/// Check filename, size and extension of an upload
pub fn validate_upload(
    filename: &str,
    size: usize,
    limits: &UploadLimits,
) -> Result<ValidatedUpload, ServiceError> {
    if filename.trim().is_empty() {
        return Err(ServiceError::MissingUpload);
    }

    if size > limits.max_file_size {
        return Err(ServiceError::FileTooLarge {
            size,
            limit: limits.max_file_size,
        });
    }

    let extension = Path::new(filename)
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
        .unwrap_or_default();

    let kind = if limits.audio_extensions.iter().any(|e| *e == extension) {
        MediaKind::Audio
    } else if limits.video_extensions.iter().any(|e| *e == extension) {
        MediaKind::Video
    } else {
        return Err(ServiceError::UnsupportedMediaFormat(format!(
            "'{}' is not supported. Supported formats: {}",
            filename,
            supported_extensions(limits).join(", ")
        )));
    };

    Ok(ValidatedUpload { kind, extension })
}

/// Every accepted extension, sorted
pub fn supported_extensions(limits: &UploadLimits) -> Vec<String> {
    let mut all: Vec<String> = limits
        .audio_extensions
        .iter()
        .chain(limits.video_extensions.iter())
        .cloned()
        .collect();
    all.sort();
    all.dedup();
    all
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audio_and_video() {
        let limits = UploadLimits::default();

        let upload = validate_upload("Voice.WAV", 1000, &limits).unwrap();
        assert_eq!(upload.kind, MediaKind::Audio);
        assert_eq!(upload.extension, ".wav");
        assert_eq!(upload.process_label(), "Audio processed from .WAV");

        let upload = validate_upload("clip.mp4", 1000, &limits).unwrap();
        assert!(upload.is_video());
        assert_eq!(upload.process_label(), "Audio extracted from .MP4 video");
    }

    #[test]
    fn test_rejections() {
        let limits = UploadLimits::default();

        assert!(matches!(
            validate_upload("", 10, &limits),
            Err(ServiceError::MissingUpload)
        ));
        assert!(matches!(
            validate_upload("a.wav", limits.max_file_size + 1, &limits),
            Err(ServiceError::FileTooLarge { .. })
        ));
        match validate_upload("notes.txt", 10, &limits) {
            Err(ServiceError::UnsupportedMediaFormat(msg)) => assert!(msg.contains(".flac")),
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(
            validate_upload("noext", 10, &limits),
            Err(ServiceError::UnsupportedMediaFormat(_))
        ));
    }

    #[test]
    fn test_size_at_limit_is_accepted() {
        let limits = UploadLimits::default();
        assert!(validate_upload("a.ogg", limits.max_file_size, &limits).is_ok());
    }
}
