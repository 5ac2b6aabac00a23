use clap::{Parser, Subcommand};
use log::info;
use std::io::Read;
use std::path::{Path, PathBuf};

use voice_qr::clip::{Location, Metadata};
use voice_qr::config::{ServiceConfig, UrlFraming};
use voice_qr::constants::generate_clip_id;
use voice_qr::qr::{png_filename, render_qr_png, BannerInfo};
use voice_qr::transcode::Transcoder;
use voice_qr::upload::validate_upload;
use voice_qr::{PayloadDecoder, PayloadEncoder};

#[derive(Parser, Debug)]
#[command(author, version, about = "Pack short voice clips into QR codes that play without a server")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the upload, QR and playback endpoints over HTTP
    Serve {
        /// Path to config file (TOML format)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Port to listen on (overrides config file)
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Compress an audio or video file and write its QR code
    Encode {
        /// Audio or video file to encode
        input: PathBuf,

        /// Path to config file (TOML format)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Output PNG path (default: pearl_memorial_<name>_<id>.png)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Print the carrier text instead of rendering a PNG
        #[arg(long)]
        carrier_only: bool,

        /// URL framing (overrides config file)
        #[arg(long, value_enum)]
        framing: Option<UrlFraming>,

        #[arg(long)]
        recipient: Option<String>,

        #[arg(long)]
        description: Option<String>,

        /// Recording location as lat,lon
        #[arg(long, allow_hyphen_values = true)]
        location: Option<Location>,
    },
    /// Decode carrier text back into the clip and its metadata
    Decode {
        /// Carrier text, @path to read it from a file, or - for stdin
        carrier: String,

        /// Path to config file (TOML format)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Write the clip to this path
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Convert the clip to WAV before writing it
        #[arg(long, requires = "output")]
        playback: bool,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    match args.command {
        Command::Serve { config, port } => {
            let mut config = ServiceConfig::load_or_default(config.as_deref())?;
            if let Some(port) = port {
                config.port = port;
            }
            voice_qr::service::serve(config)
        }
        Command::Encode {
            input,
            config,
            output,
            carrier_only,
            framing,
            recipient,
            description,
            location,
        } => {
            let mut config = ServiceConfig::load_or_default(config.as_deref())?;
            if let Some(framing) = framing {
                config.payload.url_framing = framing;
            }
            let request = EncodeRequest {
                input,
                output,
                carrier_only,
                recipient,
                description,
                location,
            };
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(encode(config, request))
        }
        Command::Decode {
            carrier,
            config,
            output,
            playback,
        } => {
            let config = ServiceConfig::load_or_default(config.as_deref())?;
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(decode(config, &carrier, output.as_deref(), playback))
        }
    }
}

struct EncodeRequest {
    input: PathBuf,
    output: Option<PathBuf>,
    carrier_only: bool,
    recipient: Option<String>,
    description: Option<String>,
    location: Option<Location>,
}

async fn encode(
    config: ServiceConfig,
    request: EncodeRequest,
) -> Result<(), Box<dyn std::error::Error>> {
    let data = std::fs::read(&request.input)
        .map_err(|e| format!("Failed to read '{}': {}", request.input.display(), e))?;
    let filename = request
        .input
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    let upload = validate_upload(&filename, data.len(), &config.upload)?;
    let transcoder = Transcoder::new(config.transcode.clone());
    let clip = transcoder
        .compress(&data, &upload, config.upload.clip_duration)
        .await?;

    let id = generate_clip_id();
    let metadata = Metadata::for_upload(&filename, &id, clip.duration_seconds)
        .with_recipient(request.recipient)
        .with_description(request.description)
        .with_location(request.location);

    let encoder = PayloadEncoder::new(&config.payload);
    let carrier = encoder.encode(&clip, &metadata, &config.base_url)?;

    if request.carrier_only {
        println!("{}", carrier.as_str());
        return Ok(());
    }

    let banner = BannerInfo {
        filename: filename.clone(),
        process_label: upload.process_label(),
        id: id.clone(),
        raw_size: clip.bytes.len(),
    };
    let rendered = render_qr_png(&carrier, &encoder.guard(), &config.qr, &banner)?;

    let output = request
        .output
        .unwrap_or_else(|| PathBuf::from(png_filename(&filename, &id)));
    std::fs::write(&output, &rendered.png)
        .map_err(|e| format!("Failed to write '{}': {}", output.display(), e))?;

    info!("Wrote {}", output.display());
    for line in &rendered.footer_lines {
        println!("{}", line);
    }
    Ok(())
}

/// Resolve the `carrier` argument into carrier text
fn read_carrier(arg: &str) -> Result<String, Box<dyn std::error::Error>> {
    if arg == "-" {
        let mut text = String::new();
        std::io::stdin().read_to_string(&mut text)?;
        Ok(text)
    } else if let Some(path) = arg.strip_prefix('@') {
        std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read carrier file '{}': {}", path, e).into())
    } else {
        Ok(arg.to_string())
    }
}

async fn decode(
    config: ServiceConfig,
    carrier: &str,
    output: Option<&Path>,
    playback: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let text = read_carrier(carrier)?;
    let decoded = PayloadDecoder::new().decode(&text)?;

    println!("Representation: {}", decoded.kind);
    println!("MIME: {}", decoded.mime);
    println!("Size: {} bytes", decoded.bytes.len());
    println!("{}", serde_json::to_string_pretty(&decoded.metadata)?);

    if let Some(output) = output {
        let bytes = if playback {
            Transcoder::new(config.transcode)
                .to_playback(&decoded.bytes, &decoded.mime)
                .await?
        } else {
            decoded.bytes
        };
        std::fs::write(output, &bytes)
            .map_err(|e| format!("Failed to write '{}': {}", output.display(), e))?;
        info!("Wrote {} bytes to {}", bytes.len(), output.display());
    }

    Ok(())
}
