use ab_glyph::{FontRef, PxScale};
use image::{imageops, DynamicImage, ImageFormat, Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use log::{debug, info};
use qrcode::types::QrError;
use qrcode::{EcLevel, QrCode, Version};
use std::io::Cursor;
use std::path::Path;

use crate::capacity::CapacityGuard;
use crate::carrier::{Carrier, CarrierKind};
use crate::config::QrConfig;
use crate::constants::FORMAT_VERSION;
use crate::error::ServiceError;

const HEADER_HEIGHT: u32 = 160;
const FOOTER_HEIGHT: u32 = 240;
const PADDING: u32 = 15;
const SEPARATOR_Y: u32 = 155;
const LINE_HEIGHT: u32 = 20;
const FOOTER_LINE_HEIGHT: u32 = 18;
const TEXT_SCALE: f32 = 13.0;
const MAX_QR_VERSION: i16 = 40;

/// DejaVu Sans, see `assets/DejaVuSans-LICENSE.txt`
static BANNER_FONT: &[u8] = include_bytes!("../assets/DejaVuSans.ttf");

const WHITE: Rgb<u8> = Rgb([255, 255, 255]);
const SEPARATOR: Rgb<u8> = Rgb([0x34, 0x98, 0xdb]);
const FOOTER_INK: Rgb<u8> = Rgb([0x34, 0x49, 0x5e]);

const HEADER_LINES: [(&str, Rgb<u8>); 6] = [
    ("Pearl Memorial QR", Rgb([0x2c, 0x3e, 0x50])),
    ("Server-Independent DataURI Technology", Rgb([0xe7, 0x4c, 0x3c])),
    ("Scan -> Instant Offline Play", Rgb([0x27, 0xae, 0x60])),
    ("No Internet Required Forever", Rgb([0x9b, 0x59, 0xb6])),
    ("Works in Airplane Mode", Rgb([0xf3, 0x9c, 0x12])),
    ("Long-Term Guaranteed Playback", Rgb([0xe6, 0x7e, 0x22])),
];

/// Details about the clip printed around the QR code
#[derive(Debug, Clone)]
pub struct BannerInfo {
    pub filename: String,
    pub process_label: String,
    pub id: String,
    /// Size of the compressed clip in bytes
    pub raw_size: usize,
}

#[derive(Debug, Clone)]
pub struct RenderedQr {
    pub png: Vec<u8>,
    pub version: i16,
    pub kind: CarrierKind,
    pub content_length: usize,
    /// Banner lines in display order
    pub footer_lines: Vec<String>,
}

fn footer_lines(banner: &BannerInfo, version: i16, carrier: &Carrier) -> Vec<String> {
    vec![
        format!("File: {}", banner.filename),
        format!("Process: {}", banner.process_label),
        format!("ID: {}", banner.id),
        format!("Raw: {} bytes", banner.raw_size),
        format!("Content: {} chars", carrier.len()),
        format!("QR: Version {}", version),
        format!("Tech: {}", carrier.kind()),
        format!("Format: Pearl Memorial {}", FORMAT_VERSION),
        "Audio: Base64 Opus Codec".to_string(),
        "Action: Scan with Any QR Reader".to_string(),
    ]
}

/// Encode `carrier` as a QR code and frame it with the banner
///
/// A carrier the QR library cannot fit into version 40 fails with the same
/// `PayloadTooLarge` kind as one that exceeds the capacity budget.
pub fn render_qr_png(
    carrier: &Carrier,
    guard: &CapacityGuard,
    config: &QrConfig,
    banner: &BannerInfo,
) -> Result<RenderedQr, ServiceError> {
    guard.check(carrier.as_str())?;

    let code = QrCode::with_error_correction_level(carrier.as_str().as_bytes(), EcLevel::L)
        .map_err(|e| match e {
            QrError::DataTooLong => {
                ServiceError::from(guard.symbol_overflow(carrier.as_str().len()))
            }
            other => ServiceError::Image(format!("QR encoding failed: {}", other)),
        })?;

    let version = match code.version() {
        Version::Normal(v) | Version::Micro(v) => v,
    };
    if version > MAX_QR_VERSION {
        return Err(guard.symbol_overflow(carrier.as_str().len()).into());
    }
    debug!("QR version {} for {} char {:?} carrier", version, carrier.len(), carrier.kind());

    let symbol = code
        .render::<image::Luma<u8>>()
        .quiet_zone(false)
        .module_dimensions(config.box_size, config.box_size)
        .build();
    let symbol = DynamicImage::ImageLuma8(symbol).to_rgb8();

    let lines = footer_lines(banner, version, carrier);
    let canvas = compose(&symbol, config, &lines)?;

    let mut png = Vec::new();
    canvas
        .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
        .map_err(|e| ServiceError::Image(format!("PNG encoding failed: {}", e)))?;

    info!(
        "Rendered QR version {} ({}) for {}: {} byte PNG",
        version,
        carrier.kind(),
        banner.id,
        png.len()
    );

    Ok(RenderedQr {
        png,
        version,
        kind: carrier.kind(),
        content_length: carrier.len(),
        footer_lines: lines,
    })
}

/// Download name for the PNG of `source` (an uploaded filename)
///
/// Only ASCII alphanumerics and `-` of the stem survive; everything else
/// collapses into single `_` separators so the name is usable in a
/// Content-Disposition header.
pub fn png_filename(source: &str, id: &str) -> String {
    let stem = Path::new(source)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();

    let mut cleaned = String::with_capacity(stem.len());
    for c in stem.chars() {
        if c.is_ascii_alphanumeric() || c == '-' {
            cleaned.push(c);
        } else if !cleaned.is_empty() && !cleaned.ends_with('_') {
            // Runs of replaced characters and underscores become one `_`
            cleaned.push('_');
        }
    }
    let cleaned = cleaned.trim_end_matches('_');

    let stem = if cleaned.is_empty() { "audio" } else { cleaned };
    format!("pearl_memorial_{}_{}.png", stem, id)
}

fn compose(symbol: &RgbImage, config: &QrConfig, footer: &[String]) -> Result<RgbImage, ServiceError> {
    let font = FontRef::try_from_slice(BANNER_FONT)
        .map_err(|e| ServiceError::Image(format!("banner font: {}", e)))?;
    let scale = PxScale::from(TEXT_SCALE);

    let border = config.border * config.box_size;
    let qr_width = symbol.width() + border * 2;
    let qr_height = symbol.height() + border * 2;

    let total_width = qr_width + PADDING * 2;
    let total_height = HEADER_HEIGHT + qr_height + FOOTER_HEIGHT + PADDING * 3;

    let mut canvas = RgbImage::from_pixel(total_width, total_height, WHITE);

    let mut y = PADDING;
    for (text, color) in HEADER_LINES.iter() {
        draw_text_mut(&mut canvas, *color, PADDING as i32, y as i32, scale, &font, text);
        y += LINE_HEIGHT;
    }

    draw_filled_rect_mut(
        &mut canvas,
        Rect::at(PADDING as i32, SEPARATOR_Y as i32).of_size(total_width - PADDING * 2, 2),
        SEPARATOR,
    );

    imageops::overlay(
        &mut canvas,
        symbol,
        (PADDING + border) as i64,
        (HEADER_HEIGHT + PADDING + border) as i64,
    );

    // Lines past the canvas edge are clipped by the drawing routines
    let footer_y = HEADER_HEIGHT + qr_height + PADDING * 2;
    for (i, line) in footer.iter().enumerate() {
        let y = footer_y + i as u32 * FOOTER_LINE_HEIGHT;
        draw_text_mut(&mut canvas, FOOTER_INK, PADDING as i32, y as i32, scale, &font, line);
    }

    Ok(canvas)
}
