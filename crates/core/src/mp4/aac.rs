//! AAC track setup: AudioSpecificConfig and the `mp4a`/`esds` sample entry.

use crate::bytes::from_hex;
use crate::error::{Result, RtspError};
use crate::protocol::sdp::MediaDescription;

use super::boxes::Mp4Box;
use super::builder::{TrackKind, TrackSettings};

/// Samples per AAC frame.
const AAC_FRAME_DURATION: u32 = 1024;

const DEFAULT_BITRATE: u32 = 320_000;

const FREQUENCIES: [&str; 16] = [
    "96 kHz",
    "88.2 kHz",
    "64 kHz",
    "48 kHz",
    "44.1 kHz",
    "32 kHz",
    "24 kHz",
    "22.05 kHz",
    "16 kHz",
    "12 kHz",
    "11.025 kHz",
    "8 kHz",
    "7.35 kHz",
    "unknown",
    "unknown",
    "custom",
];

/// The leading fields of an AudioSpecificConfig (ISO/IEC 14496-3 §1.6.2.1).
///
/// ```text
/// audioObjectType         5 bits (31 escapes to 32 + 6 more bits)
/// samplingFrequencyIndex  4 bits (15 means an explicit 24-bit rate)
/// channelConfiguration    4 bits
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioSpecificConfig {
    pub object_type: u8,
    pub frequency_index: Option<u8>,
    pub channel_config: Option<u8>,
}

impl AudioSpecificConfig {
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let (&b0, &b1) = match bytes {
            [b0, b1, ..] => (b0, b1),
            _ => return Err(RtspError::truncated("AudioSpecificConfig", 2, bytes.len())),
        };

        let object_type = b0 >> 3;
        if object_type == 31 {
            return Ok(Self {
                object_type: 32 + (b0 & 0x07) * 8 + (b1 >> 5),
                frequency_index: None,
                channel_config: None,
            });
        }

        let frequency_index = (b0 & 0x07) * 2 + (b1 >> 7);
        let channel_config = (frequency_index != 0x0f).then_some((b1 >> 3) & 0x0f);
        Ok(Self {
            object_type,
            frequency_index: Some(frequency_index),
            channel_config,
        })
    }

    /// e.g. `AAC LC, 16 kHz, Mono`.
    pub fn name(&self) -> String {
        let audio_type = match self.object_type {
            1 => "AAC Main".to_string(),
            2 => "AAC LC".to_string(),
            other => format!("AAC ({other})"),
        };
        let Some(frequency) = self.frequency_index else {
            return audio_type;
        };
        let rate = FREQUENCIES[frequency as usize & 0x0f];
        match self.channel_config {
            None => format!("{audio_type}, {rate}"),
            Some(1) => format!("{audio_type}, {rate}, Mono"),
            Some(2) => format!("{audio_type}, {rate}, Stereo"),
            Some(n) => format!("{audio_type}, {rate}, {n}"),
        }
    }
}

/// ES_Descriptor with DecoderConfig and SLConfig (ISO/IEC 14496-1 §7.2.6).
fn esds(config: &[u8], bitrate: u32) -> Mp4Box {
    let asc_len = config.len() as u8;
    let mut fields = vec![
        0x03,
        23 + asc_len,
        0x00,
        0x01,
        0x00,
        0x04,
        15 + asc_len,
        0x40,
        0x15,
        0,
        0,
        0,
    ];
    fields.extend_from_slice(&bitrate.to_be_bytes());
    fields.extend_from_slice(&bitrate.to_be_bytes());
    fields.extend_from_slice(&[0x05, asc_len]);
    fields.extend_from_slice(config);
    fields.extend_from_slice(&[0x06, 0x01, 0x02]);
    Mp4Box::full(b"esds", 0, 0, &fields)
}

/// AudioSampleEntry `mp4a` (ISO/IEC 14496-12 §12.2.3).
fn mp4a(clock_rate: u32, channels: u16, esds: Mp4Box) -> Mp4Box {
    let mut payload = vec![0; 6];
    payload.extend_from_slice(&1u16.to_be_bytes());
    payload.extend_from_slice(&[0; 8]);
    payload.extend_from_slice(&channels.to_be_bytes());
    payload.extend_from_slice(&16u16.to_be_bytes());
    payload.extend_from_slice(&[0; 4]);
    payload.extend_from_slice(&(clock_rate << 16).to_be_bytes());
    Mp4Box::leaf(b"mp4a", payload).with_children(vec![esds])
}

/// Read the AudioSpecificConfig back out of an `esds` payload.
pub fn config_from_esds(esds: &[u8]) -> Option<&[u8]> {
    // Skip version/flags, then walk descriptors looking for tag 5.
    let mut i = 4;
    while i + 1 < esds.len() {
        let tag = esds[i];
        let len = esds[i + 1] as usize;
        match tag {
            0x03 => i += 2 + 3,
            0x04 => i += 2 + 13,
            0x05 => return esds.get(i + 2..i + 2 + len),
            _ => i += 2 + len,
        }
    }
    None
}

pub fn settings(media: &MediaDescription, track_id: u32) -> Result<TrackSettings> {
    let payload_type = media
        .payload_type()
        .ok_or_else(|| RtspError::MissingPayloadType("MPEG4-GENERIC".to_string()))?;
    let clock_rate = media
        .clock_rate()
        .ok_or_else(|| RtspError::InvalidConfig("AAC media without clock rate".to_string()))?;
    let config_hex = media
        .fmtp_param("config")
        .ok_or_else(|| RtspError::InvalidConfig("missing AAC config".to_string()))?;
    let config_bytes = from_hex(config_hex)?;
    let config = AudioSpecificConfig::parse(&config_bytes)?;

    let bitrate = media
        .fmtp_param("bitrate")
        .and_then(|b| b.trim().parse().ok())
        .unwrap_or(DEFAULT_BITRATE);
    let channels = match config.channel_config {
        Some(n @ 1..=7) => n as u16,
        _ => 2,
    };

    Ok(TrackSettings {
        track_id,
        payload_type,
        clock_rate,
        default_duration: AAC_FRAME_DURATION,
        codec: format!("mp4a.40.{}", config.object_type),
        name: config.name(),
        kind: TrackKind::Audio,
        sample_entry: mp4a(clock_rate, channels, esds(&config_bytes, bitrate)),
    })
}
