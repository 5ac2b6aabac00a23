use ogg::reading::PacketReader;
use ogg::writing::{PacketWriteEndInfo, PacketWriter};
use std::io::{Cursor, Write};

/// Opus granule positions always count 48 kHz samples
pub const OPUS_GRANULE_RATE: f64 = 48000.0;

/// Create Opus identification header
pub fn create_opus_id_header(channels: u8, sample_rate: u32, pre_skip: u16) -> Vec<u8> {
    let mut header = Vec::with_capacity(19);
    header.extend_from_slice(b"OpusHead");
    header.push(1); // Version
    header.push(channels); // Channel count
    header.extend_from_slice(&pre_skip.to_le_bytes()); // Pre-skip
    header.extend_from_slice(&sample_rate.to_le_bytes()); // Input sample rate
    header.extend_from_slice(&0i16.to_le_bytes()); // Output gain
    header.push(0); // Channel mapping family
    header
}

/// Create Opus comment header with no user comments
pub fn create_opus_comment_header() -> Vec<u8> {
    let mut header = Vec::new();
    header.extend_from_slice(b"OpusTags");

    let vendor = b"voice_qr";
    header.extend_from_slice(&(vendor.len() as u32).to_le_bytes());
    header.extend_from_slice(vendor);
    header.extend_from_slice(&0u32.to_le_bytes());

    header
}

/// Write raw Opus packets as a single-stream Ogg file
///
/// Fixture builder: the service gets its clips from ffmpeg, so this is for
/// tests and tooling that need a known Ogg Opus stream without a transcoder
/// (see `tests/payload_test.rs`). Each packet is assumed to hold
/// `samples_per_packet` 48 kHz samples.
pub fn write_ogg_opus<W: Write>(
    packets: &[Vec<u8>],
    sample_rate: u32,
    pre_skip: u16,
    samples_per_packet: u64,
    writer: W,
) -> Result<W, std::io::Error> {
    let serial = 1;
    let mut writer = PacketWriter::new(writer);

    writer.write_packet(
        create_opus_id_header(1, sample_rate, pre_skip),
        serial,
        PacketWriteEndInfo::EndPage,
        0,
    )?;
    writer.write_packet(
        create_opus_comment_header(),
        serial,
        PacketWriteEndInfo::EndPage,
        0,
    )?;

    let mut granule_pos: u64 = 0;
    for (i, packet) in packets.iter().enumerate() {
        granule_pos += samples_per_packet;
        let end_info = if i + 1 == packets.len() {
            PacketWriteEndInfo::EndStream
        } else {
            PacketWriteEndInfo::NormalPacket
        };
        writer.write_packet(packet.clone(), serial, end_info, granule_pos)?;
    }

    Ok(writer.into_inner())
}

/// Playable duration of an Ogg Opus clip in seconds
///
/// Uses the last page granule position minus the OpusHead pre-skip.
/// Returns `None` when the bytes are not an Ogg Opus stream. A truncated
/// stream reports the duration of the pages that could be read.
pub fn ogg_opus_duration(bytes: &[u8]) -> Option<f64> {
    let mut reader = PacketReader::new(Cursor::new(bytes));
    let mut pre_skip: Option<u16> = None;
    let mut last_granule: u64 = 0;

    loop {
        let packet = match reader.read_packet() {
            Ok(Some(packet)) => packet,
            Ok(None) => break,
            Err(_) => break,
        };

        if pre_skip.is_none() {
            let data = &packet.data;
            if data.len() < 19 || &data[..8] != b"OpusHead" {
                return None;
            }
            pre_skip = Some(u16::from_le_bytes([data[10], data[11]]));
            continue;
        }

        let granule = packet.absgp_page();
        // u64::MAX marks a page on which no packet ends
        if packet.last_in_page() && granule != u64::MAX && granule > last_granule {
            last_granule = granule;
        }
    }

    let samples = last_granule.saturating_sub(pre_skip? as u64);
    Some(samples as f64 / OPUS_GRANULE_RATE)
}

/// Duration of a WAV file in seconds
pub fn wav_duration(bytes: &[u8]) -> Option<f64> {
    let reader = hound::WavReader::new(Cursor::new(bytes)).ok()?;
    let spec = reader.spec();
    if spec.sample_rate == 0 {
        return None;
    }
    Some(reader.duration() as f64 / spec.sample_rate as f64)
}
