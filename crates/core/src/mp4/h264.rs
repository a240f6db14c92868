//! H.264 track setup: SPS parsing and the `avc1`/`avcC` sample entry.

use base64::prelude::{BASE64_STANDARD, Engine as _};

use crate::bytes::{BitReader, unescape_rbsp};
use crate::error::{Result, RtspError};
use crate::protocol::sdp::MediaDescription;

use super::boxes::Mp4Box;
use super::builder::{TrackKind, TrackSettings};

/// Profiles whose SPS carries chroma format and bit depth fields.
const HIGH_PROFILES: [u32; 8] = [100, 110, 122, 244, 44, 83, 86, 118];

/// Used when the SDP has no framerate: 90 kHz at 25 fps.
const FALLBACK_FRAME_DURATION: u32 = 3600;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpsInfo {
    pub profile: u8,
    pub level: f64,
    pub width: u32,
    pub height: u32,
}

/// Parse an SPS NAL unit (header byte included) far enough to get the
/// coded picture size (ITU-T H.264 §7.3.2.1.1).
pub fn parse_sps(nal: &[u8]) -> Result<SpsInfo> {
    let rbsp = unescape_rbsp(nal);
    let mut reader = BitReader::new(&rbsp);

    reader.skip_bits(8)?;
    let profile = reader.read_bits(8)?;
    reader.skip_bits(8)?;
    let level = reader.read_bits(8)?;
    reader.read_ue()?;

    if HIGH_PROFILES.contains(&profile) {
        let chroma_format = reader.read_ue()?;
        if chroma_format == 3 {
            reader.skip_bits(1)?;
        }
        reader.read_ue()?;
        reader.read_ue()?;
        reader.skip_bits(1)?;
        if reader.read_bit()? == 1 {
            let lists = if chroma_format == 3 { 12 } else { 8 };
            for i in 0..lists {
                if reader.read_bit()? == 1 {
                    skip_scaling_list(&mut reader, if i < 6 { 16 } else { 64 })?;
                }
            }
        }
    }

    reader.read_ue()?;
    match reader.read_ue()? {
        0 => {
            reader.read_ue()?;
        }
        1 => {
            reader.skip_bits(1)?;
            reader.read_se()?;
            reader.read_se()?;
            for _ in 0..reader.read_ue()? {
                reader.read_se()?;
            }
        }
        _ => {}
    }

    reader.read_ue()?;
    reader.skip_bits(1)?;
    let width_mbs = reader.read_ue()? + 1;
    let height_map_units = reader.read_ue()? + 1;
    let frame_mbs_only = reader.read_bit()?;
    if frame_mbs_only == 0 {
        reader.skip_bits(1)?;
    }
    reader.skip_bits(1)?;

    let (mut left, mut right, mut top, mut bottom) = (0, 0, 0, 0);
    if reader.read_bit()? == 1 {
        left = reader.read_ue()?;
        right = reader.read_ue()?;
        top = reader.read_ue()?;
        bottom = reader.read_ue()?;
    }

    let width = picture_size(width_mbs, 1, left, right)
        .ok_or_else(|| RtspError::InvalidConfig("SPS width out of range".to_string()))?;
    let height = picture_size(height_map_units, 2 - frame_mbs_only, top, bottom)
        .ok_or_else(|| RtspError::InvalidConfig("SPS height out of range".to_string()))?;

    Ok(SpsInfo {
        profile: profile as u8,
        level: level as f64 / 10.0,
        width,
        height,
    })
}

/// Luma samples along one axis: `units * 16 * factor - (crop_a + crop_b) * 2`.
/// `None` when the fields do not fit in 32 bits.
fn picture_size(units: u32, factor: u32, crop_a: u32, crop_b: u32) -> Option<u32> {
    let full = units.checked_mul(16)?.checked_mul(factor)?;
    let crop = crop_a.checked_add(crop_b)?.checked_mul(2)?;
    Some(full.saturating_sub(crop))
}

fn skip_scaling_list(reader: &mut BitReader<'_>, size: usize) -> Result<()> {
    let mut last = 8i64;
    let mut next = 8i64;
    for _ in 0..size {
        if next != 0 {
            let delta = reader.read_se()? as i64;
            next = (last + delta).rem_euclid(256);
        }
        if next != 0 {
            last = next;
        }
    }
    Ok(())
}

/// Human readable codec description, e.g. `H.264, Main Profile, level 4.1`.
pub fn encoding_name(profile_level_id: &str) -> String {
    let byte = |i: usize| {
        profile_level_id
            .get(i..i + 2)
            .and_then(|s| u8::from_str_radix(s, 16).ok())
            .unwrap_or(0)
    };
    let profile = match byte(0) {
        66 => "Baseline Profile".to_string(),
        77 => "Main Profile".to_string(),
        100 => "High Profile".to_string(),
        other => other.to_string(),
    };
    format!("H.264, {}, level {:.1}", profile, byte(4) as f64 / 10.0)
}

/// AVCDecoderConfigurationRecord (ISO/IEC 14496-15 §5.2.4.1).
fn avcc(sps: &[Vec<u8>], pps: &[Vec<u8>]) -> Mp4Box {
    let first = sps.first().map(Vec::as_slice).unwrap_or_default();
    let profile_bytes = first.get(1..4).unwrap_or(&[0x4d, 0x00, 0x29]);

    let mut payload = vec![1];
    payload.extend_from_slice(profile_bytes);
    // 4-byte NAL length prefixes.
    payload.push(0xff);
    payload.push(0xe0 | sps.len() as u8);
    for set in sps {
        payload.extend_from_slice(&(set.len() as u16).to_be_bytes());
        payload.extend_from_slice(set);
    }
    payload.push(pps.len() as u8);
    for set in pps {
        payload.extend_from_slice(&(set.len() as u16).to_be_bytes());
        payload.extend_from_slice(set);
    }
    Mp4Box::leaf(b"avcC", payload)
}

/// VisualSampleEntry `avc1` (ISO/IEC 14496-12 §12.1.3).
fn avc1(width: u32, height: u32, avcc: Mp4Box) -> Mp4Box {
    let mut payload = vec![0; 6];
    payload.extend_from_slice(&1u16.to_be_bytes());
    payload.extend_from_slice(&[0; 16]);
    payload.extend_from_slice(&(width as u16).to_be_bytes());
    payload.extend_from_slice(&(height as u16).to_be_bytes());
    payload.extend_from_slice(&0x0048_0000u32.to_be_bytes());
    payload.extend_from_slice(&0x0048_0000u32.to_be_bytes());
    payload.extend_from_slice(&[0; 4]);
    payload.extend_from_slice(&1u16.to_be_bytes());
    payload.extend_from_slice(&[0; 32]);
    payload.extend_from_slice(&0x0018u16.to_be_bytes());
    payload.extend_from_slice(&0xffffu16.to_be_bytes());
    Mp4Box::leaf(b"avc1", payload).with_children(vec![avcc])
}

/// Track settings from an H.264 media description. Requires
/// `sprop-parameter-sets`; the first set is the SPS, the rest are PPS.
pub fn settings(media: &MediaDescription, track_id: u32) -> Result<TrackSettings> {
    let payload_type = media
        .payload_type()
        .ok_or_else(|| RtspError::MissingPayloadType("H264".to_string()))?;
    let clock_rate = media.clock_rate().unwrap_or(90_000);
    let sprop = media
        .fmtp_param("sprop-parameter-sets")
        .ok_or_else(|| RtspError::InvalidConfig("missing sprop-parameter-sets".to_string()))?;

    let mut sets = sprop
        .split(',')
        .map(|s| BASE64_STANDARD.decode(s.trim()))
        .collect::<std::result::Result<Vec<_>, _>>()?;
    if sets.is_empty() {
        return Err(RtspError::InvalidConfig("empty sprop-parameter-sets".to_string()));
    }
    let pps = sets.split_off(1);
    let sps = sets;
    let info = parse_sps(&sps[0])?;

    let profile_level_id = media
        .fmtp_param("profile-level-id")
        .map(str::to_string)
        .unwrap_or_else(|| sps[0].iter().skip(1).take(3).map(|b| format!("{b:02x}")).collect());

    let default_duration = match media.framerate {
        Some(fps) if fps > 0.0 => (clock_rate as f64 / fps).round() as u32,
        _ => FALLBACK_FRAME_DURATION,
    };

    tracing::debug!(
        width = info.width,
        height = info.height,
        profile = info.profile,
        "parsed SPS"
    );

    Ok(TrackSettings {
        track_id,
        payload_type,
        clock_rate,
        default_duration,
        codec: format!("avc1.{profile_level_id}"),
        name: encoding_name(&profile_level_id),
        kind: TrackKind::Video {
            width: info.width,
            height: info.height,
        },
        sample_entry: avc1(info.width, info.height, avcc(&sps, &pps)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::sdp::Sdp;

    const SPS_B64: &str = "Z00AKeKQDwBE/LgLcBAQGkHiRFQ=";

    #[test]
    fn axis_sps_is_1080p() {
        let sps = BASE64_STANDARD.decode(SPS_B64).unwrap();
        let info = parse_sps(&sps).unwrap();
        assert_eq!(info.profile, 77);
        assert_eq!(info.level, 4.1);
        assert_eq!((info.width, info.height), (1920, 1080));
    }

    #[test]
    fn baseline_sps_without_cropping() {
        let sps = [0x67, 0x42, 0x00, 0x1e, 0xdc, 0x05, 0x00, 0x5b, 0xa0];
        let info = parse_sps(&sps).unwrap();
        assert_eq!(info.profile, 66);
        assert_eq!((info.width, info.height), (1280, 720));
    }

    #[test]
    fn oversized_sps_width_is_rejected() {
        // pic_width_in_mbs_minus1 = 2^29 - 2
        let sps = [
            0x67, 0x42, 0x00, 0x1e, 0xdc, 0x00, 0x00, 0x00, 0x1f, 0xff, 0xff, 0xff, 0xe8,
        ];
        assert!(matches!(parse_sps(&sps), Err(RtspError::InvalidConfig(_))));
    }

    #[test]
    fn picture_size_overflow() {
        assert_eq!(picture_size(120, 1, 0, 4), Some(1912));
        assert_eq!(picture_size(u32::MAX / 16, 2, 0, 0), None);
        assert_eq!(picture_size(1, 1, u32::MAX, 1), None);
    }

    #[test]
    fn truncated_sps_is_an_error() {
        assert!(parse_sps(&[0x67, 0x4d]).is_err());
    }

    #[test]
    fn encoding_names() {
        assert_eq!(encoding_name("4d0029"), "H.264, Main Profile, level 4.1");
        assert_eq!(encoding_name("42e01f"), "H.264, Baseline Profile, level 3.1");
        assert_eq!(encoding_name("58001e"), "H.264, 88, level 3.0");
    }

    #[test]
    fn settings_from_sdp() {
        let sdp = Sdp::parse(
            "v=0\r\nm=video 0 RTP/AVP 96\r\na=rtpmap:96 H264/90000\r\n\
             a=fmtp:96 packetization-mode=1;profile-level-id=4d0029;sprop-parameter-sets=Z00AKeKQDwBE/LgLcBAQGkHiRFQ=,aO48gA==\r\n\
             a=framerate:25.000000\r\n",
        )
        .unwrap();
        let settings = settings(&sdp.media[0], 1).unwrap();
        assert_eq!(settings.codec, "avc1.4d0029");
        assert_eq!(settings.default_duration, 3600);
        assert_eq!(settings.payload_type, 96);

        let avcc = settings.sample_entry.find_child(b"avcC").unwrap();
        assert_eq!(&avcc.payload[..6], &[1, 0x4d, 0x00, 0x29, 0xff, 0xe1]);
        // SPS (20 bytes), then one PPS of 4 bytes.
        assert_eq!(&avcc.payload[6..8], &[0, 20]);
        assert_eq!(&avcc.payload[28..], &[1, 0, 4, 0x68, 0xee, 0x3c, 0x80]);
        assert_eq!(settings.sample_entry.payload.len(), 78);
    }

    #[test]
    fn missing_parameter_sets_fail() {
        let sdp = Sdp::parse("v=0\r\nm=video 0 RTP/AVP 96\r\na=rtpmap:96 H264/90000\r\n").unwrap();
        assert!(matches!(
            settings(&sdp.media[0], 1),
            Err(RtspError::InvalidConfig(_))
        ));
    }
}
