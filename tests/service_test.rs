use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use std::io::Cursor;
use std::path::PathBuf;
use std::sync::Arc;
use tower::ServiceExt;

use voice_qr::config::ServiceConfig;
use voice_qr::service::{create_router, AppState};
use voice_qr::transcode::Transcoder;

const BOUNDARY: &str = "voiceqrtestboundary";

fn router_with(config: ServiceConfig) -> Router {
    create_router(Arc::new(AppState::new(config)))
}

fn router() -> Router {
    router_with(ServiceConfig::default())
}

/// Config whose transcoder binary does not exist
fn config_without_ffmpeg() -> ServiceConfig {
    let mut config = ServiceConfig::default();
    config.transcode.ffmpeg_path = PathBuf::from("nonexistent_ffmpeg_xyz_12345");
    config
}

/// Build a multipart/form-data body from text fields and an optional file
fn multipart_body(fields: &[(&str, &str)], file: Option<(&str, &[u8])>) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        body.extend_from_slice(
            format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", name).as_bytes(),
        );
        body.extend_from_slice(value.as_bytes());
        body.extend_from_slice(b"\r\n");
    }
    if let Some((filename, data)) = file {
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        body.extend_from_slice(
            format!(
                "Content-Disposition: form-data; name=\"audio\"; filename=\"{}\"\r\n",
                filename
            )
            .as_bytes(),
        );
        body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
        body.extend_from_slice(data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
    body
}

fn upload_request(path: &str, body: Vec<u8>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(path)
        .header(
            "content-type",
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(body))
        .unwrap()
}

/// One second of a 440 Hz tone as 16 kHz mono WAV
fn tone_wav() -> Vec<u8> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 16000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for i in 0..16000 {
            let t = i as f32 / 16000.0;
            let sample = (t * 440.0 * 2.0 * std::f32::consts::PI).sin() * 0.5;
            writer.write_sample((sample * i16::MAX as f32) as i16).unwrap();
        }
        writer.finalize().unwrap();
    }
    cursor.into_inner()
}

async fn json_body(response: axum::response::Response) -> Value {
    let body = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&body).unwrap()
}

#[tokio::test]
async fn test_health() {
    let response = router()
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = json_body(response).await;
    let status = json["status"].as_str().unwrap();
    assert!(status == "healthy" || status == "degraded");
    assert_eq!(json["ffmpeg_available"], status == "healthy");
    assert_eq!(json["technology"], "Server-Independent DataURI");
    assert_eq!(json["version"], "Pearl Memorial v1.0");
    let audio = json["supported_formats"]["audio"].as_array().unwrap();
    assert!(audio.iter().any(|e| e == ".wav"));
    let video = json["supported_formats"]["video_with_audio"].as_array().unwrap();
    assert!(video.iter().any(|e| e == ".mp4"));
}

#[tokio::test]
async fn test_health_degraded_without_ffmpeg() {
    let response = router_with(config_without_ffmpeg())
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = json_body(response).await;
    assert_eq!(json["status"], "degraded");
    assert_eq!(json["ffmpeg_available"], false);
}

#[tokio::test]
async fn test_play_decodes_url_parameters() {
    let uri = "/play?audio=AQID&filename=voice.wav&id=abc12345&ts=20250101120000&loc=35.5,139.25";
    let response = router()
        .oneshot(Request::get(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = json_body(response).await;
    assert_eq!(json["kind"], "direct_url");
    assert_eq!(json["mime"], "audio/ogg;codecs=opus");
    assert_eq!(json["size"], 3);
    assert_eq!(json["metadata"]["id"], "abc12345");
    assert_eq!(json["metadata"]["filename"], "voice.wav");
    assert_eq!(json["metadata"]["created"], "2025-01-01 12:00:00 UTC");
    assert_eq!(json["metadata"]["location_data"]["lat"], 35.5);
    assert!(json["audio_url"]
        .as_str()
        .unwrap()
        .starts_with("/play/audio?audio=AQID"));
}

#[tokio::test]
async fn test_play_without_query_is_bad_request() {
    for uri in ["/play", "/play?id=abc12345"] {
        let response = router()
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{}", uri);
        assert_eq!(json_body(response).await["kind"], "unrecognized_carrier");
    }
}

#[tokio::test]
async fn test_decode_pasted_json_document() {
    let document = r#"{"pearl_memorial":"v1.0","type":"standalone_audio","audio_data":"data:audio/ogg;codecs=opus;base64,AQIDBA==","metadata":{"title":"memo.m4a","filename":"memo.m4a","id":"zz99yy88","recipient":"Aiko"}}"#;
    let response = router()
        .oneshot(
            Request::post("/decode")
                .body(Body::from(document))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = json_body(response).await;
    assert_eq!(json["kind"], "json_document");
    assert_eq!(json["size"], 4);
    assert_eq!(json["metadata"]["recipient"], "Aiko");
    assert!(json.get("audio_url").is_none());
}

#[tokio::test]
async fn test_decode_errors_are_classified() {
    let cases = [
        ("not json and not a url", "unrecognized_carrier"),
        (r#"{"pearl_memorial":"v9"}"#, "invalid_format"),
    ];
    for (input, kind) in cases {
        let response = router()
            .oneshot(Request::post("/decode").body(Body::from(input)).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = json_body(response).await;
        assert_eq!(json["kind"], kind);
        assert!(json["error"].as_str().is_some());
    }
}

#[tokio::test]
async fn test_generate_without_file_is_missing_upload() {
    let body = multipart_body(&[("recipient", "Aiko")], None);
    let response = router()
        .oneshot(upload_request("/generate", body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["kind"], "missing_upload");
}

#[tokio::test]
async fn test_generate_rejects_unsupported_extension() {
    let body = multipart_body(&[], Some(("notes.txt", &b"hello"[..])));
    let response = router()
        .oneshot(upload_request("/generate", body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = json_body(response).await;
    assert_eq!(json["kind"], "unsupported_media_format");
    assert!(json["error"].as_str().unwrap().contains(".mp3"));
}

#[tokio::test]
async fn test_upload_over_limit_is_rejected() {
    let mut config = config_without_ffmpeg();
    config.upload.max_file_size = 100;
    let body = multipart_body(&[], Some(("voice.wav", &[0u8; 200][..])));

    let response = router_with(config)
        .oneshot(upload_request("/encode", body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(json_body(response).await["kind"], "file_too_large");
}

#[tokio::test]
async fn test_encode_without_ffmpeg_is_unavailable() {
    let body = multipart_body(&[], Some(("voice.wav", tone_wav().as_slice())));
    let response = router_with(config_without_ffmpeg())
        .oneshot(upload_request("/encode", body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json_body(response).await["kind"], "transcoder_unavailable");
}

#[tokio::test]
async fn test_generate_with_ffmpeg() {
    let config = ServiceConfig::default();
    if !Transcoder::new(config.transcode.clone()).check_available().await {
        eprintln!("Skipping: ffmpeg not available");
        return;
    }

    let body = multipart_body(
        &[("recipient", "Aiko"), ("lat", "35.5"), ("lon", "139.25")],
        Some(("voice.wav", tone_wav().as_slice())),
    );
    let response = router_with(config)
        .oneshot(upload_request("/generate", body))
        .await
        .unwrap();

    if response.status() == StatusCode::INTERNAL_SERVER_ERROR {
        // ffmpeg builds without libopus cannot produce the clip
        let json = json_body(response).await;
        assert_eq!(json["kind"], "transcode_failed");
        eprintln!("Skipping: {}", json["error"]);
        return;
    }

    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers().clone();
    assert_eq!(headers["content-type"], "image/png");
    let id = headers["x-pearl-id"].to_str().unwrap().to_string();
    assert_eq!(id.len(), 8);
    assert_eq!(
        headers["content-disposition"].to_str().unwrap(),
        format!("attachment; filename=\"pearl_memorial_voice_{}.png\"", id)
    );
    let version: i16 = headers["x-pearl-qr-version"].to_str().unwrap().parse().unwrap();
    assert!((1..=40).contains(&version));

    let png = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&png[..8], b"\x89PNG\r\n\x1a\n");
}
