//! ffmpeg invocation.
//!
//! Uploads are squeezed into a tiny mono Opus clip; decoded clips are
//! re-encoded to WAV so any browser can play them. Every run is bounded by
//! the configured timeout and the child process is killed when the wait is
//! abandoned. Inputs and outputs live in a per-call temp directory that is
//! removed on every exit path.

use log::{debug, info, warn};
use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;

use crate::audio::ogg_opus_duration;
use crate::clip::CompressedClip;
use crate::config::TranscodeConfig;
use crate::error::ServiceError;
use crate::upload::ValidatedUpload;

const AVAILABILITY_TIMEOUT: Duration = Duration::from_secs(10);
const STDERR_EXCERPT_CHARS: usize = 200;

#[derive(Debug, Clone)]
pub struct Transcoder {
    config: TranscodeConfig,
}

impl Transcoder {
    pub fn new(config: TranscodeConfig) -> Self {
        Self { config }
    }

    /// `ffmpeg -version` succeeds within a few seconds
    pub async fn check_available(&self) -> bool {
        let mut cmd = Command::new(&self.config.ffmpeg_path);
        cmd.arg("-version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        match tokio::time::timeout(AVAILABILITY_TIMEOUT, cmd.status()).await {
            Ok(Ok(status)) => status.success(),
            Ok(Err(e)) => {
                debug!("ffmpeg not available: {}", e);
                false
            }
            Err(_) => false,
        }
    }

    /// Arguments for the upload → low bitrate Opus step
    pub fn compress_args(
        &self,
        input: &Path,
        output: &Path,
        is_video: bool,
        duration: f64,
    ) -> Vec<String> {
        let mut args = vec!["-i".to_string(), input.to_string_lossy().to_string()];
        if is_video {
            args.push("-vn".to_string());
        }
        args.extend([
            "-af".to_string(),
            format!(
                "highpass=f={},lowpass=f={}",
                self.config.highpass_hz, self.config.lowpass_hz
            ),
            "-c:a".to_string(),
            "libopus".to_string(),
            "-b:a".to_string(),
            self.config.bitrate.clone(),
            "-ac".to_string(),
            "1".to_string(),
            "-ar".to_string(),
            self.config.sample_rate.to_string(),
            "-t".to_string(),
            duration.to_string(),
            "-y".to_string(),
            output.to_string_lossy().to_string(),
        ]);
        args
    }

    /// Arguments for the clip → WAV playback step
    pub fn playback_args(&self, input: &Path, output: &Path) -> Vec<String> {
        vec![
            "-i".to_string(),
            input.to_string_lossy().to_string(),
            "-vn".to_string(),
            "-c:a".to_string(),
            "pcm_s16le".to_string(),
            "-ac".to_string(),
            "1".to_string(),
            "-ar".to_string(),
            self.config.playback_sample_rate.to_string(),
            "-f".to_string(),
            "wav".to_string(),
            "-y".to_string(),
            output.to_string_lossy().to_string(),
        ]
    }

    /// Shrink an upload into a `CompressedClip` of at most `duration` seconds
    pub async fn compress(
        &self,
        input: &[u8],
        upload: &ValidatedUpload,
        duration: f64,
    ) -> Result<CompressedClip, ServiceError> {
        let dir = tempfile::Builder::new().prefix("voice_qr_").tempdir()?;
        let input_path = dir.path().join(format!("input{}", upload.extension));
        let output_path = dir.path().join("processed.opus");
        tokio::fs::write(&input_path, input).await?;

        let args = self.compress_args(&input_path, &output_path, upload.is_video(), duration);
        self.run(&args).await?;

        let bytes = read_output(&output_path).await?;
        let duration_seconds = ogg_opus_duration(&bytes).unwrap_or(duration);
        info!(
            "Compressed {} byte {} upload to {} bytes ({:.2}s)",
            input.len(),
            upload.extension,
            bytes.len(),
            duration_seconds
        );

        Ok(CompressedClip::new(bytes, duration_seconds, upload.extension.clone()))
    }

    /// Re-encode decoded clip bytes as 16-bit mono WAV
    pub async fn to_playback(&self, clip: &[u8], mime: &str) -> Result<Vec<u8>, ServiceError> {
        let dir = tempfile::Builder::new().prefix("voice_qr_").tempdir()?;
        let input_path = dir.path().join(format!("clip{}", extension_for_mime(mime)));
        let output_path = dir.path().join("playback.wav");
        tokio::fs::write(&input_path, clip).await?;

        let args = self.playback_args(&input_path, &output_path);
        self.run(&args).await?;

        read_output(&output_path).await
    }

    async fn run(&self, args: &[String]) -> Result<(), ServiceError> {
        let program = &self.config.ffmpeg_path;
        let timeout = self.config.timeout();
        debug!("Running {} {}", program.display(), args.join(" "));

        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd.spawn().map_err(|e| {
            ServiceError::TranscoderUnavailable(format!(
                "failed to spawn {}: {}",
                program.display(),
                e
            ))
        })?;

        let started = Instant::now();
        // On timeout the wait future is dropped along with the child, which kills it
        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Err(_) => {
                warn!("{} timed out after {:?}", program.display(), timeout);
                Err(ServiceError::TranscodeTimeout(timeout))
            }
            Ok(Err(e)) => Err(ServiceError::TranscodeFailed(format!(
                "I/O error waiting for {}: {}",
                program.display(),
                e
            ))),
            Ok(Ok(output)) => {
                debug!(
                    "{} finished in {:.2}s with {}",
                    program.display(),
                    started.elapsed().as_secs_f64(),
                    output.status
                );
                if output.status.success() {
                    Ok(())
                } else {
                    Err(classify_failure(&String::from_utf8_lossy(&output.stderr)))
                }
            }
        }
    }
}

async fn read_output(path: &Path) -> Result<Vec<u8>, ServiceError> {
    match tokio::fs::read(path).await {
        Ok(bytes) if !bytes.is_empty() => Ok(bytes),
        Ok(_) => Err(ServiceError::TranscodeFailed(
            "ffmpeg produced an empty file".to_string(),
        )),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(ServiceError::TranscodeFailed(
            "ffmpeg produced no output".to_string(),
        )),
        Err(e) => Err(e.into()),
    }
}

/// Map ffmpeg stderr of a failed run onto an error kind
pub fn classify_failure(stderr: &str) -> ServiceError {
    if stderr.contains("Invalid data") || stderr.contains("could not find codec") {
        return ServiceError::UnsupportedMediaFormat(
            "input is corrupt or uses an unsupported codec".to_string(),
        );
    }

    let trimmed = stderr.trim();
    let count = trimmed.chars().count();
    let excerpt: String = if count > STDERR_EXCERPT_CHARS {
        let tail: String = trimmed.chars().skip(count - STDERR_EXCERPT_CHARS).collect();
        format!("...{}", tail)
    } else {
        trimmed.to_string()
    };
    ServiceError::TranscodeFailed(excerpt)
}

fn extension_for_mime(mime: &str) -> &'static str {
    let base = mime.split(';').next().unwrap_or_default().trim();
    match base {
        "audio/ogg" | "audio/opus" => ".ogg",
        "audio/webm" => ".webm",
        "audio/mpeg" | "audio/mp3" => ".mp3",
        "audio/mp4" | "audio/m4a" | "audio/x-m4a" => ".m4a",
        "audio/wav" | "audio/x-wav" | "audio/wave" => ".wav",
        _ => ".bin",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn transcoder(program: &str, timeout_secs: u64) -> Transcoder {
        Transcoder::new(TranscodeConfig {
            ffmpeg_path: PathBuf::from(program),
            timeout_secs,
            ..TranscodeConfig::default()
        })
    }

    #[test]
    fn test_compress_args_video() {
        let args = transcoder("ffmpeg", 30).compress_args(
            Path::new("/tmp/in.mp4"),
            Path::new("/tmp/out.opus"),
            true,
            2.0,
        );
        assert_eq!(
            args,
            vec![
                "-i",
                "/tmp/in.mp4",
                "-vn",
                "-af",
                "highpass=f=80,lowpass=f=8000",
                "-c:a",
                "libopus",
                "-b:a",
                "1k",
                "-ac",
                "1",
                "-ar",
                "8000",
                "-t",
                "2",
                "-y",
                "/tmp/out.opus"
            ]
        );
    }

    #[test]
    fn test_compress_args_audio_has_no_vn() {
        let args = transcoder("ffmpeg", 30).compress_args(
            Path::new("in.wav"),
            Path::new("out.opus"),
            false,
            1.5,
        );
        assert!(!args.contains(&"-vn".to_string()));
        assert!(args.contains(&"1.5".to_string()));
    }

    #[test]
    fn test_classify_failure() {
        assert!(matches!(
            classify_failure("in.wav: Invalid data found when processing input"),
            ServiceError::UnsupportedMediaFormat(_)
        ));

        let long = "x".repeat(500);
        match classify_failure(&long) {
            ServiceError::TranscodeFailed(msg) => {
                assert_eq!(msg.chars().count(), STDERR_EXCERPT_CHARS + 3)
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_extension_for_mime() {
        assert_eq!(extension_for_mime("audio/ogg;codecs=opus"), ".ogg");
        assert_eq!(extension_for_mime("audio/webm"), ".webm");
        assert_eq!(extension_for_mime("application/x-thing"), ".bin");
    }

    #[tokio::test]
    async fn test_missing_binary_is_unavailable() {
        let t = transcoder("nonexistent_ffmpeg_xyz_12345", 5);
        assert!(!t.check_available().await);

        let err = t.run(&["-version".to_string()]).await.unwrap_err();
        assert!(matches!(err, ServiceError::TranscoderUnavailable(_)));
    }

    #[tokio::test]
    async fn test_timeout_kills_child() {
        let t = transcoder("sleep", 1);
        match t.run(&["5".to_string()]).await {
            Err(ServiceError::TranscodeTimeout(after)) => assert_eq!(after, Duration::from_secs(1)),
            // Minimal environments without `sleep`
            Err(ServiceError::TranscoderUnavailable(_)) => {}
            other => panic!("unexpected {:?}", other),
        }
    }
}
