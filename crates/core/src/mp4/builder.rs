//! Construction of the init segment (`ftyp` + `moov`) and of per-sample
//! fragments (`moof` + `mdat`).
//!
//! ```text
//! ftyp
//! moov
//! ├── mvhd
//! ├── trak (one per supported SDP media)
//! │   ├── tkhd
//! │   └── mdia
//! │       ├── mdhd
//! │       ├── hdlr
//! │       └── minf
//! │           ├── vmhd | smhd
//! │           ├── dinf ─ dref ─ url
//! │           └── stbl ─ stsd (avc1 | mp4a), stts, stsc, stsz, stco
//! └── mvex ─ trex (one per track)
//!
//! moof
//! ├── mfhd
//! └── traf ─ tfhd, tfdt, trun
//! mdat
//! ```
//!
//! Every fragment carries exactly one sample.

use std::collections::HashMap;

use crate::protocol::sdp::Sdp;

use super::boxes::Mp4Box;
use super::{aac, h264};

/// Seconds between 1904-01-01 (MP4 epoch) and 1970-01-01.
pub const MP4_EPOCH_OFFSET_SECS: u64 = 2_082_844_800;

const UNITY_MATRIX: [u32; 9] = [0x0001_0000, 0, 0, 0, 0x0001_0000, 0, 0, 0, 0x4000_0000];

/// tfhd: default-sample-flags-present.
const TFHD_FLAGS: u32 = 0x00_0020;
/// trun: data-offset, first-sample-flags, sample-duration, sample-size.
const TRUN_FLAGS: u32 = 0x00_0305;

/// sample_depends_on = 2 (no dependencies).
const KEYFRAME_SAMPLE_FLAGS: u32 = 0x0200_0000;
/// sample_depends_on = 1, sample_is_non_sync_sample.
const DELTA_SAMPLE_FLAGS: u32 = 0x0101_0000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Video { width: u32, height: u32 },
    Audio,
}

/// Everything needed to describe one track, derived from its SDP media.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackSettings {
    pub track_id: u32,
    pub payload_type: u8,
    pub clock_rate: u32,
    /// Duration in clock ticks used for the first sample.
    pub default_duration: u32,
    /// RFC 6381 codec string, e.g. `avc1.4d0029`.
    pub codec: String,
    pub name: String,
    pub kind: TrackKind,
    pub sample_entry: Mp4Box,
}

/// Per-track fragment state.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackData {
    pub settings: TrackSettings,
    pub last_timestamp: Option<u32>,
    pub base_media_decode_time: u64,
    pub bitrate: f64,
    pub framerate: f64,
    cumulative_bytes: u64,
    cumulative_duration: u64,
    cumulative_frames: u64,
}

impl TrackData {
    fn new(settings: TrackSettings) -> Self {
        Self {
            settings,
            last_timestamp: None,
            base_media_decode_time: 0,
            bitrate: 0.0,
            framerate: 0.0,
            cumulative_bytes: 0,
            cumulative_duration: 0,
            cumulative_frames: 0,
        }
    }

    /// Accumulate size and duration; once a second of media has been
    /// seen, recompute bitrate and framerate and start over.
    fn update_rates(&mut self, byte_length: usize, duration: u32) {
        self.cumulative_bytes += byte_length as u64;
        self.cumulative_duration += duration as u64;
        self.cumulative_frames += 1;

        let clock_rate = self.settings.clock_rate as u64;
        if clock_rate > 0 && self.cumulative_duration >= clock_rate {
            let seconds = self.cumulative_duration as f64 / clock_rate as f64;
            self.bitrate = (8 * self.cumulative_bytes) as f64 / seconds;
            self.framerate = self.cumulative_frames as f64 / seconds;
            self.cumulative_bytes = 0;
            self.cumulative_duration = 0;
            self.cumulative_frames = 0;
        }
    }
}

fn matrix() -> Vec<u8> {
    UNITY_MATRIX.iter().flat_map(|v| v.to_be_bytes()).collect()
}

pub fn ftyp() -> Mp4Box {
    let mut payload = b"isom".to_vec();
    payload.extend_from_slice(&0u32.to_be_bytes());
    payload.extend_from_slice(b"mp41");
    Mp4Box::leaf(b"ftyp", payload)
}

fn mvhd(date: u32) -> Mp4Box {
    let mut f = Vec::with_capacity(96);
    f.extend_from_slice(&date.to_be_bytes());
    f.extend_from_slice(&date.to_be_bytes());
    f.extend_from_slice(&1000u32.to_be_bytes());
    f.extend_from_slice(&0u32.to_be_bytes());
    f.extend_from_slice(&0x0001_0000u32.to_be_bytes());
    f.extend_from_slice(&0x0100u16.to_be_bytes());
    f.extend_from_slice(&[0; 10]);
    f.extend_from_slice(&matrix());
    f.extend_from_slice(&[0; 24]);
    f.extend_from_slice(&0xffff_ffffu32.to_be_bytes());
    Mp4Box::full(b"mvhd", 0, 0, &f)
}

fn tkhd(settings: &TrackSettings, date: u32) -> Mp4Box {
    let (width, height, volume) = match settings.kind {
        TrackKind::Video { width, height } => (width, height, 0u16),
        TrackKind::Audio => (0, 0, 0x0100),
    };
    let mut f = Vec::with_capacity(80);
    f.extend_from_slice(&date.to_be_bytes());
    f.extend_from_slice(&date.to_be_bytes());
    f.extend_from_slice(&settings.track_id.to_be_bytes());
    f.extend_from_slice(&[0; 4]);
    f.extend_from_slice(&0u32.to_be_bytes());
    f.extend_from_slice(&[0; 8]);
    f.extend_from_slice(&0u16.to_be_bytes());
    f.extend_from_slice(&0u16.to_be_bytes());
    f.extend_from_slice(&volume.to_be_bytes());
    f.extend_from_slice(&[0; 2]);
    f.extend_from_slice(&matrix());
    f.extend_from_slice(&(width << 16).to_be_bytes());
    f.extend_from_slice(&(height << 16).to_be_bytes());
    // track_enabled | track_in_movie
    Mp4Box::full(b"tkhd", 0, 0x03, &f)
}

fn mdhd(settings: &TrackSettings, date: u32) -> Mp4Box {
    let mut f = Vec::with_capacity(20);
    f.extend_from_slice(&date.to_be_bytes());
    f.extend_from_slice(&date.to_be_bytes());
    f.extend_from_slice(&settings.clock_rate.to_be_bytes());
    f.extend_from_slice(&0u32.to_be_bytes());
    f.extend_from_slice(&[0; 4]);
    Mp4Box::full(b"mdhd", 0, 0, &f)
}

fn hdlr(kind: TrackKind) -> Mp4Box {
    let (handler, name): (&[u8; 4], &[u8]) = match kind {
        TrackKind::Video { .. } => (b"vide", &b"VideoHandler\0"[..]),
        TrackKind::Audio => (b"soun", &b"SoundHandler\0"[..]),
    };
    let mut f = vec![0; 4];
    f.extend_from_slice(handler);
    f.extend_from_slice(&[0; 12]);
    f.extend_from_slice(name);
    Mp4Box::full(b"hdlr", 0, 0, &f)
}

fn media_header(kind: TrackKind) -> Mp4Box {
    match kind {
        TrackKind::Video { .. } => Mp4Box::full(b"vmhd", 0, 1, &[0; 8]),
        TrackKind::Audio => Mp4Box::full(b"smhd", 0, 0, &[0; 4]),
    }
}

fn dinf() -> Mp4Box {
    let url = Mp4Box::full(b"url ", 0, 1, &[]);
    let dref = Mp4Box::full(b"dref", 0, 0, &1u32.to_be_bytes()).with_children(vec![url]);
    Mp4Box::container(b"dinf", vec![dref])
}

fn stbl(settings: &TrackSettings) -> Mp4Box {
    let stsd = Mp4Box::full(b"stsd", 0, 0, &1u32.to_be_bytes())
        .with_children(vec![settings.sample_entry.clone()]);
    Mp4Box::container(
        b"stbl",
        vec![
            stsd,
            Mp4Box::full(b"stts", 0, 0, &[0; 4]),
            Mp4Box::full(b"stsc", 0, 0, &[0; 4]),
            Mp4Box::full(b"stsz", 0, 0, &[0; 8]),
            Mp4Box::full(b"stco", 0, 0, &[0; 4]),
        ],
    )
}

fn trak(settings: &TrackSettings, date: u32) -> Mp4Box {
    let minf = Mp4Box::container(
        b"minf",
        vec![media_header(settings.kind), dinf(), stbl(settings)],
    );
    let mdia = Mp4Box::container(
        b"mdia",
        vec![mdhd(settings, date), hdlr(settings.kind), minf],
    );
    Mp4Box::container(b"trak", vec![tkhd(settings, date), mdia])
}

fn trex(track_id: u32) -> Mp4Box {
    let mut f = Vec::with_capacity(20);
    f.extend_from_slice(&track_id.to_be_bytes());
    f.extend_from_slice(&1u32.to_be_bytes());
    f.extend_from_slice(&[0; 12]);
    Mp4Box::full(b"trex", 0, 0, &f)
}

/// Builds boxes for one "movie", i.e. one SDP exchange.
#[derive(Debug, Default)]
pub struct BoxBuilder {
    tracks: HashMap<u8, TrackData>,
    sequence_number: u32,
    video_payload_type: Option<u8>,
    ntp_presentation_time: Option<f64>,
}

impl BoxBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build `moov` for every SDP media with a supported encoding and reset
    /// all fragment state. Unsupported or misconfigured media are skipped.
    pub fn moov(&mut self, sdp: &Sdp, date: u32) -> Mp4Box {
        self.tracks.clear();
        self.sequence_number = 0;
        self.video_payload_type = None;
        self.ntp_presentation_time = None;

        let mut children = vec![mvhd(date)];
        let mut trexes = Vec::new();
        let mut track_id = 0;

        for media in &sdp.media {
            let build = match media.encoding_name() {
                Some("H264") => h264::settings,
                Some("MPEG4-GENERIC") => aac::settings,
                _ => continue,
            };
            let settings = match build(media, track_id + 1) {
                Ok(settings) => settings,
                Err(err) => {
                    tracing::warn!(%err, media = %media.media_type, "skipping track");
                    continue;
                }
            };
            track_id += 1;

            if matches!(settings.kind, TrackKind::Video { .. }) {
                self.video_payload_type = Some(settings.payload_type);
            }
            tracing::debug!(
                track_id,
                payload_type = settings.payload_type,
                codec = %settings.codec,
                name = %settings.name,
                "track added"
            );
            children.push(trak(&settings, date));
            trexes.push(trex(track_id));
            self.tracks
                .insert(settings.payload_type, TrackData::new(settings));
        }

        children.push(Mp4Box::container(b"mvex", trexes));
        Mp4Box::container(b"moov", children)
    }

    pub fn track(&self, payload_type: u8) -> Option<&TrackData> {
        self.tracks.get(&payload_type)
    }

    /// Codec strings ordered by track id.
    pub fn codecs(&self) -> Vec<String> {
        let mut tracks: Vec<&TrackData> = self.tracks.values().collect();
        tracks.sort_by_key(|t| t.settings.track_id);
        tracks.iter().map(|t| t.settings.codec.clone()).collect()
    }

    pub fn ntp_presentation_time(&self) -> Option<f64> {
        self.ntp_presentation_time
    }

    /// Fix the wall-clock origin from the first timed sample of the video
    /// track (or of any track when there is no video). Returns the origin
    /// when it was set by this call.
    pub fn set_presentation_time(&mut self, payload_type: u8, ntp_timestamp: Option<f64>) -> Option<f64> {
        if self.ntp_presentation_time.is_some() {
            return None;
        }
        if self.video_payload_type.is_some_and(|pt| pt != payload_type) {
            return None;
        }
        let ntp = ntp_timestamp?;
        let track = self.tracks.get(&payload_type)?;
        let clock_rate = track.settings.clock_rate.max(1) as f64;
        let origin = ntp - 1000.0 * (track.base_media_decode_time as f64 / clock_rate);
        self.ntp_presentation_time = Some(origin);
        Some(origin)
    }

    /// One-sample `moof` for the given track, advancing its decode time.
    pub fn moof(
        &mut self,
        payload_type: u8,
        timestamp: u32,
        byte_length: usize,
        keyframe: bool,
    ) -> Option<Mp4Box> {
        let track = self.tracks.get_mut(&payload_type)?;

        // Wrap-safe delta in the signed 32-bit domain, clamped at zero.
        let duration = match track.last_timestamp {
            Some(last) => (timestamp.wrapping_sub(last) as i32).max(0) as u32,
            None => track.settings.default_duration,
        };
        track.last_timestamp = Some(timestamp);

        let sample_flags = if keyframe {
            KEYFRAME_SAMPLE_FLAGS
        } else {
            DELTA_SAMPLE_FLAGS
        };

        self.sequence_number += 1;
        let mfhd = Mp4Box::full(b"mfhd", 0, 0, &self.sequence_number.to_be_bytes());

        let mut tfhd = track.settings.track_id.to_be_bytes().to_vec();
        tfhd.extend_from_slice(&0u32.to_be_bytes());
        let tfhd = Mp4Box::full(b"tfhd", 0, TFHD_FLAGS, &tfhd);
        let tfdt = Mp4Box::full(b"tfdt", 1, 0, &track.base_media_decode_time.to_be_bytes());

        // data_offset points past the moof and the mdat header; the moof
        // size does not depend on the offset value, so patch it afterwards.
        let trun_fields = |data_offset: u32| {
            let mut f = Vec::with_capacity(20);
            f.extend_from_slice(&1u32.to_be_bytes());
            f.extend_from_slice(&data_offset.to_be_bytes());
            f.extend_from_slice(&sample_flags.to_be_bytes());
            f.extend_from_slice(&duration.to_be_bytes());
            f.extend_from_slice(&(byte_length as u32).to_be_bytes());
            f
        };

        let mut moof = Mp4Box::container(
            b"moof",
            vec![
                mfhd,
                Mp4Box::container(
                    b"traf",
                    vec![tfhd, tfdt, Mp4Box::full(b"trun", 0, TRUN_FLAGS, &trun_fields(0))],
                ),
            ],
        );
        let data_offset = (moof.size() + 8) as u32;
        if let Some(trun) = moof
            .children
            .get_mut(1)
            .and_then(|traf| traf.children.get_mut(2))
        {
            *trun = Mp4Box::full(b"trun", 0, TRUN_FLAGS, &trun_fields(data_offset));
        }

        track.base_media_decode_time += duration as u64;
        track.update_rates(byte_length, duration);
        Some(moof)
    }

    pub fn mdat(data: &[u8]) -> Mp4Box {
        Mp4Box::leaf(b"mdat", data.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytes::read_u32_be;

    const SDP: &str = "v=0\r\n\
o=- 1 1 IN IP4 127.0.0.1\r\n\
s=Session streamed with GStreamer\r\n\
t=0 0\r\n\
m=video 0 RTP/AVP 96\r\n\
a=rtpmap:96 H264/90000\r\n\
a=fmtp:96 packetization-mode=1;profile-level-id=4d0029;sprop-parameter-sets=Z00AKeKQDwBE/LgLcBAQGkHiRFQ=,aO48gA==\r\n\
a=framerate:25.000000\r\n\
m=audio 0 RTP/AVP 97\r\n\
a=rtpmap:97 MPEG4-GENERIC/16000/1\r\n\
a=fmtp:97 streamtype=5;profile-level-id=2;mode=AAC-hbr;config=1408;sizelength=13;indexlength=3;indexdeltalength=3\r\n\
m=application 0 RTP/AVP 98\r\n\
a=rtpmap:98 vnd.onvif.metadata/90000\r\n";

    fn builder() -> BoxBuilder {
        let mut builder = BoxBuilder::new();
        builder.moov(&Sdp::parse(SDP).unwrap(), 3_800_000_000);
        builder
    }

    #[test]
    fn ftyp_bytes() {
        assert_eq!(
            ftyp().to_bytes(),
            b"\x00\x00\x00\x14ftypisom\x00\x00\x00\x00mp41".to_vec()
        );
    }

    #[test]
    fn moov_has_one_trak_per_supported_media() {
        let mut builder = BoxBuilder::new();
        let moov = builder.moov(&Sdp::parse(SDP).unwrap(), 1);
        assert_eq!(moov.children_of_kind(b"trak").count(), 2);
        assert_eq!(moov.find_child(b"mvex").unwrap().children.len(), 2);
        assert_eq!(moov.find_child(b"mvhd").unwrap().size(), 108);
        assert_eq!(builder.codecs(), vec!["avc1.4d0029", "mp4a.40.2"]);

        let video = moov.children_of_kind(b"trak").next().unwrap();
        let tkhd = video.find_child(b"tkhd").unwrap();
        assert_eq!(tkhd.size(), 92);
        // width 1920 << 16 at the end of the box
        assert_eq!(read_u32_be(&tkhd.payload, 76), Some(1920 << 16));
        let hdlr = video.find_path(&[b"mdia", b"hdlr"]).unwrap();
        assert_eq!(&hdlr.payload[8..12], b"vide");
        let mdhd = video.find_path(&[b"mdia", b"mdhd"]).unwrap();
        assert_eq!(read_u32_be(&mdhd.payload, 12), Some(90_000));
    }

    #[test]
    fn moof_layout_and_data_offset() {
        let mut builder = builder();
        let moof = builder.moof(96, 1000, 500, true).unwrap();
        assert_eq!(moof.size(), 104);
        let bytes = moof.to_bytes();
        // mfhd sequence number starts at 1
        assert_eq!(read_u32_be(&bytes, 20), Some(1));

        let trun = moof.find_path(&[b"traf", b"trun"]).unwrap();
        assert_eq!(&trun.payload[..4], &[0, 0, 0x03, 0x05]);
        assert_eq!(read_u32_be(&trun.payload, 8), Some(112));
        assert_eq!(read_u32_be(&trun.payload, 12), Some(KEYFRAME_SAMPLE_FLAGS));
        assert_eq!(read_u32_be(&trun.payload, 16), Some(3600));
        assert_eq!(read_u32_be(&trun.payload, 20), Some(500));
    }

    #[test]
    fn durations_follow_timestamps() {
        let mut builder = builder();
        builder.moof(96, 1000, 10, true);
        builder.moof(96, 4000, 10, false);
        assert_eq!(builder.track(96).unwrap().base_media_decode_time, 3600 + 3000);

        let moof = builder.moof(96, 7000, 10, false).unwrap();
        let tfdt = moof.find_path(&[b"traf", b"tfdt"]).unwrap();
        assert_eq!(tfdt.payload[0], 1);
        assert_eq!(&tfdt.payload[4..], &6600u64.to_be_bytes());
    }

    #[test]
    fn timestamp_wrap_and_reordering() {
        let mut builder = builder();
        builder.moof(96, u32::MAX - 99, 10, true);
        let moof = builder.moof(96, 200, 10, false).unwrap();
        let trun = moof.find_path(&[b"traf", b"trun"]).unwrap();
        assert_eq!(read_u32_be(&trun.payload, 16), Some(300));

        let moof = builder.moof(96, 100, 10, false).unwrap();
        let trun = moof.find_path(&[b"traf", b"trun"]).unwrap();
        assert_eq!(read_u32_be(&trun.payload, 16), Some(0));
    }

    #[test]
    fn unknown_payload_type_has_no_track() {
        let mut builder = builder();
        assert!(builder.moof(98, 0, 10, false).is_none());
    }

    #[test]
    fn rates_after_one_second() {
        let mut builder = builder();
        for i in 0..26u32 {
            builder.moof(96, 1000 + i * 3600, 1000, i == 0);
        }
        let track = builder.track(96).unwrap();
        assert_eq!(track.framerate, 25.0);
        assert_eq!(track.bitrate, 200_000.0);
    }

    #[test]
    fn presentation_time_uses_video_track() {
        let mut builder = builder();
        assert_eq!(builder.set_presentation_time(97, Some(5000.0)), None);
        builder.moof(96, 0, 10, true);
        // 3600 ticks = 40 ms already decoded
        assert_eq!(builder.set_presentation_time(96, Some(5000.0)), Some(4960.0));
        assert_eq!(builder.set_presentation_time(96, Some(9000.0)), None);
        assert_eq!(builder.ntp_presentation_time(), Some(4960.0));
    }
}
