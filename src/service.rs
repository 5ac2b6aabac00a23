use axum::{
    body::Body,
    extract::{DefaultBodyLimit, Multipart, RawQuery, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use log::{error, info, warn};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::audio::wav_duration;
use crate::carrier::{Carrier, CarrierKind};
use crate::clip::{CompressedClip, Location, Metadata};
use crate::config::ServiceConfig;
use crate::constants::{generate_clip_id, FORMAT_VERSION, TECHNOLOGY};
use crate::decoder::{DecodedPayload, PayloadDecoder};
use crate::encoder::PayloadEncoder;
use crate::error::{PayloadError, ServiceError};
use crate::qr::{png_filename, render_qr_png, BannerInfo};
use crate::transcode::Transcoder;
use crate::upload::{validate_upload, ValidatedUpload};

/// Room for multipart boundaries and the small text fields
const MULTIPART_SLACK: usize = 64 * 1024;

// State shared by all handlers
pub struct AppState {
    pub config: ServiceConfig,
    pub encoder: PayloadEncoder,
    pub decoder: PayloadDecoder,
    pub transcoder: Transcoder,
}

impl AppState {
    pub fn new(config: ServiceConfig) -> Self {
        Self {
            encoder: PayloadEncoder::new(&config.payload),
            decoder: PayloadDecoder::new(),
            transcoder: Transcoder::new(config.transcode.clone()),
            config,
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = match &self {
            ServiceError::MissingUpload
            | ServiceError::UnsupportedMediaFormat(_)
            | ServiceError::Payload(_) => StatusCode::BAD_REQUEST,
            ServiceError::FileTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            ServiceError::TranscodeTimeout(_) => StatusCode::REQUEST_TIMEOUT,
            ServiceError::TranscoderUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ServiceError::TranscodeFailed(_) | ServiceError::Io(_) | ServiceError::Image(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        if status.is_server_error() {
            error!("{} ({})", self, self.kind());
        } else {
            warn!("{} ({})", self, self.kind());
        }

        (
            status,
            Json(serde_json::json!({"error": self.to_string(), "kind": self.kind()})),
        )
            .into_response()
    }
}

/// Build the HTTP router
pub fn create_router(state: Arc<AppState>) -> Router {
    let body_limit = state.config.upload.max_file_size + MULTIPART_SLACK;

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/generate", post(generate_handler))
        .route("/encode", post(encode_handler))
        .route("/play", get(play_handler))
        .route("/play/audio", get(play_audio_handler))
        .route("/decode", post(decode_handler))
        .route("/decode/audio", post(decode_audio_handler))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .with_state(state)
}

/// Run the HTTP server until it fails
pub fn serve(config: ServiceConfig) -> Result<(), Box<dyn std::error::Error>> {
    let port = config.port;

    println!("Starting voice QR server");
    println!("Base URL: {}", config.base_url);
    println!(
        "Capacity budget: {} chars ({:?} URL framing)",
        config.payload.capacity_budget, config.payload.url_framing
    );
    println!("Listening on: http://[::]:{} (IPv4 + IPv6)", port);
    println!("Endpoints:");
    println!("  GET  /health  - Health check");
    println!("  POST /generate  - Upload audio (multipart 'audio'), returns QR PNG");
    println!("  POST /encode  - Upload audio, returns carrier JSON");
    println!("  GET  /play?...  - Decode a play URL");
    println!("  GET  /play/audio?...  - Decode a play URL to WAV");
    println!("  POST /decode  - Decode pasted carrier text");
    println!("  POST /decode/audio  - Decode pasted carrier text to WAV");

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let app_state = Arc::new(AppState::new(config));

        if !app_state.transcoder.check_available().await {
            warn!("ffmpeg is not available; uploads will fail until it is installed");
        }

        let app = create_router(app_state);

        let listener = tokio::net::TcpListener::bind(format!("[::]:{}", port))
            .await
            .map_err(|e| format!("Failed to bind to port {}: {}", port, e))?;
        axum::serve(listener, app)
            .await
            .map_err(|e| format!("Server error: {}", e))?;

        Ok::<(), Box<dyn std::error::Error>>(())
    })
}

#[derive(Serialize)]
struct SupportedFormats {
    audio: Vec<String>,
    video_with_audio: Vec<String>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    message: &'static str,
    ffmpeg_available: bool,
    technology: &'static str,
    capacity_budget: usize,
    supported_formats: SupportedFormats,
    version: String,
}

async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let ffmpeg_available = state.transcoder.check_available().await;

    Json(HealthResponse {
        status: if ffmpeg_available { "healthy" } else { "degraded" },
        message: "Pearl Memorial Standalone QR Generator",
        ffmpeg_available,
        technology: TECHNOLOGY,
        capacity_budget: state.config.payload.capacity_budget,
        supported_formats: SupportedFormats {
            audio: state.config.upload.audio_extensions.clone(),
            video_with_audio: state.config.upload.video_extensions.clone(),
        },
        version: format!("Pearl Memorial {}", FORMAT_VERSION),
    })
}

/// Fields of the upload form
#[derive(Debug, Default)]
struct UploadForm {
    filename: String,
    data: Bytes,
    has_file: bool,
    recipient: Option<String>,
    description: Option<String>,
    lat: Option<String>,
    lon: Option<String>,
}

impl UploadForm {
    fn location(&self) -> Option<Location> {
        let (lat, lon) = (self.lat.as_deref()?, self.lon.as_deref()?);
        match format!("{},{}", lat, lon).parse::<Location>() {
            Ok(location) => Some(location),
            Err(e) => {
                warn!("Ignoring location from upload form: {}", e);
                None
            }
        }
    }
}

async fn read_upload_form(
    mut multipart: Multipart,
    limit: usize,
) -> Result<UploadForm, ServiceError> {
    let mut form = UploadForm::default();

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => return Err(multipart_error(e, limit)),
        };
        let field_name = field.name().map(|s| s.to_string()).unwrap_or_default();

        match field_name.as_str() {
            "audio" => {
                form.filename = field.file_name().map(|s| s.to_string()).unwrap_or_default();
                form.data = field.bytes().await.map_err(|e| multipart_error(e, limit))?;
                form.has_file = true;
            }
            "recipient" | "description" | "lat" | "lon" => {
                let value = field.text().await.map_err(|e| multipart_error(e, limit))?;
                let value = Some(value.trim().to_string()).filter(|v| !v.is_empty());
                match field_name.as_str() {
                    "recipient" => form.recipient = value,
                    "description" => form.description = value,
                    "lat" => form.lat = value,
                    _ => form.lon = value,
                }
            }
            _ => {}
        }
    }

    if !form.has_file {
        return Err(ServiceError::MissingUpload);
    }

    Ok(form)
}

/// The body limit trips before the whole file is read, so the size is only known to exceed `limit`
fn multipart_error(e: axum::extract::multipart::MultipartError, limit: usize) -> ServiceError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ServiceError::FileTooLarge {
            size: limit + 1,
            limit,
        }
    } else {
        ServiceError::UnsupportedMediaFormat(format!("Failed to read upload: {}", e.body_text()))
    }
}

/// Everything produced for one upload
struct EncodedUpload {
    upload: ValidatedUpload,
    clip: CompressedClip,
    metadata: Metadata,
    carrier: Carrier,
}

async fn encode_upload(state: &AppState, form: &UploadForm) -> Result<EncodedUpload, ServiceError> {
    let upload = validate_upload(&form.filename, form.data.len(), &state.config.upload)?;

    if !state.transcoder.check_available().await {
        return Err(ServiceError::TranscoderUnavailable(
            "ffmpeg is not installed".to_string(),
        ));
    }

    let id = generate_clip_id();
    info!(
        "[{}] Processing {} ({} bytes)",
        id,
        form.filename,
        form.data.len()
    );

    let clip = state
        .transcoder
        .compress(&form.data, &upload, state.config.upload.clip_duration)
        .await?;

    let metadata = Metadata::for_upload(&form.filename, &id, clip.duration_seconds)
        .with_recipient(form.recipient.clone())
        .with_description(form.description.clone())
        .with_location(form.location());

    let carrier = state
        .encoder
        .encode(&clip, &metadata, &state.config.base_url)?;

    Ok(EncodedUpload {
        upload,
        clip,
        metadata,
        carrier,
    })
}

fn header_value(value: impl ToString) -> HeaderValue {
    HeaderValue::from_str(&value.to_string()).unwrap_or_else(|_| HeaderValue::from_static(""))
}

async fn generate_handler(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<Response, ServiceError> {
    let form = read_upload_form(multipart, state.config.upload.max_file_size).await?;
    let encoded = encode_upload(&state, &form).await?;

    let banner = BannerInfo {
        filename: encoded.metadata.filename.clone(),
        process_label: encoded.upload.process_label(),
        id: encoded.metadata.id.clone(),
        raw_size: encoded.clip.bytes.len(),
    };
    let rendered = render_qr_png(
        &encoded.carrier,
        &state.encoder.guard(),
        &state.config.qr,
        &banner,
    )?;

    let download_name = png_filename(&form.filename, &encoded.metadata.id);

    let mut response = Response::new(Body::from(rendered.png));
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("image/png"));
    headers.insert(
        header::CONTENT_DISPOSITION,
        header_value(format!("attachment; filename=\"{}\"", download_name)),
    );
    headers.insert("x-pearl-id", header_value(&encoded.metadata.id));
    headers.insert("x-pearl-qr-version", header_value(rendered.version));
    headers.insert("x-pearl-carrier-kind", header_value(rendered.kind));
    headers.insert("x-pearl-content-length", header_value(rendered.content_length));
    headers.insert("x-pearl-raw-size", header_value(banner.raw_size));

    Ok(response)
}

#[derive(Serialize)]
struct EncodeResponse {
    id: String,
    kind: CarrierKind,
    length: usize,
    limit: usize,
    raw_size: usize,
    duration: f64,
    carrier: String,
}

async fn encode_handler(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<Json<EncodeResponse>, ServiceError> {
    let form = read_upload_form(multipart, state.config.upload.max_file_size).await?;
    let encoded = encode_upload(&state, &form).await?;

    Ok(Json(EncodeResponse {
        id: encoded.metadata.id.clone(),
        kind: encoded.carrier.kind(),
        length: encoded.carrier.len(),
        limit: state.encoder.guard().limit(),
        raw_size: encoded.clip.bytes.len(),
        duration: encoded.clip.duration_seconds,
        carrier: encoded.carrier.into_string(),
    }))
}

#[derive(Serialize)]
struct DecodeResponse {
    kind: CarrierKind,
    mime: String,
    size: usize,
    metadata: Metadata,
    /// Present for URL carriers, which can be replayed through `/play/audio`
    #[serde(skip_serializing_if = "Option::is_none")]
    audio_url: Option<String>,
}

impl DecodeResponse {
    fn new(decoded: DecodedPayload, query: Option<&str>) -> Self {
        Self {
            kind: decoded.kind,
            mime: decoded.mime,
            size: decoded.bytes.len(),
            metadata: decoded.metadata,
            audio_url: query.map(|q| format!("/play/audio?{}", q)),
        }
    }
}

fn decode_query(state: &AppState, query: Option<&str>) -> Result<DecodedPayload, ServiceError> {
    let query = query
        .filter(|q| !q.is_empty())
        .ok_or(ServiceError::Payload(PayloadError::UnrecognizedCarrier))?;
    Ok(state.decoder.decode(&format!("?{}", query))?)
}

async fn play_handler(
    State(state): State<Arc<AppState>>,
    RawQuery(query): RawQuery,
) -> Result<Json<DecodeResponse>, ServiceError> {
    let decoded = decode_query(&state, query.as_deref())?;
    Ok(Json(DecodeResponse::new(decoded, query.as_deref())))
}

async fn play_audio_handler(
    State(state): State<Arc<AppState>>,
    RawQuery(query): RawQuery,
) -> Result<Response, ServiceError> {
    let decoded = decode_query(&state, query.as_deref())?;
    playback_response(&state, decoded).await
}

async fn decode_handler(
    State(state): State<Arc<AppState>>,
    body: String,
) -> Result<Json<DecodeResponse>, ServiceError> {
    let decoded = state.decoder.decode(&body)?;
    Ok(Json(DecodeResponse::new(decoded, None)))
}

async fn decode_audio_handler(
    State(state): State<Arc<AppState>>,
    body: String,
) -> Result<Response, ServiceError> {
    let decoded = state.decoder.decode(&body)?;
    playback_response(&state, decoded).await
}

async fn playback_response(
    state: &AppState,
    decoded: DecodedPayload,
) -> Result<Response, ServiceError> {
    let wav = state
        .transcoder
        .to_playback(&decoded.bytes, &decoded.mime)
        .await?;
    let duration = wav_duration(&wav);

    let mut response = Response::new(Body::from(wav));
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("audio/wav"));
    headers.insert("x-pearl-id", header_value(&decoded.metadata.id));
    if let Some(duration) = duration {
        headers.insert("x-pearl-duration", header_value(format!("{:.3}", duration)));
    }

    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_form_location() {
        let form = UploadForm {
            lat: Some("35.6".to_string()),
            lon: Some("139.7".to_string()),
            ..UploadForm::default()
        };
        assert_eq!(form.location(), Some(Location { lat: 35.6, lon: 139.7 }));

        let form = UploadForm {
            lat: Some("35.6".to_string()),
            ..UploadForm::default()
        };
        assert_eq!(form.location(), None);
    }

    #[test]
    fn test_error_status_mapping() {
        let cases = [
            (ServiceError::MissingUpload, StatusCode::BAD_REQUEST),
            (
                ServiceError::FileTooLarge { size: 10, limit: 5 },
                StatusCode::PAYLOAD_TOO_LARGE,
            ),
            (
                ServiceError::TranscodeTimeout(std::time::Duration::from_secs(30)),
                StatusCode::REQUEST_TIMEOUT,
            ),
            (
                ServiceError::TranscoderUnavailable("gone".to_string()),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                ServiceError::TranscodeFailed("boom".to_string()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                PayloadError::UnrecognizedCarrier.into(),
                StatusCode::BAD_REQUEST,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(err.into_response().status(), status);
        }
    }
}
