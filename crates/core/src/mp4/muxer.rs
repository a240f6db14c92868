use std::collections::VecDeque;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::message::{IsomMessage, Message};

use super::builder::{BoxBuilder, MP4_EPOCH_OFFSET_SECS, ftyp};
use super::mime_type;

#[derive(Debug, Clone, PartialEq)]
pub enum MuxerEvent {
    /// The wall-clock origin (NTP milliseconds) of presentation time zero.
    /// Delivered once per movie.
    Sync { ntp_presentation_time: f64 },
}

/// Converts depacketized H.264 and AAC into fragmented MP4.
///
/// An `Sdp` starts a new movie: the init segment (`ftyp` + `moov`) is
/// emitted right after the SDP itself. Each `H264` or `Elementary` sample
/// of a known payload type then becomes one `moof` + `mdat` pair. IDR
/// samples carry a checkpoint time, in seconds since the presentation
/// origin, before which buffered media may be evicted.
#[derive(Debug, Default)]
pub struct Mp4Muxer {
    builder: BoxBuilder,
    mime: Option<String>,
    events: VecDeque<MuxerEvent>,
}

impl Mp4Muxer {
    pub fn new() -> Self {
        Self::default()
    }

    /// `video/mp4; codecs="..."` for the current movie.
    pub fn mime(&self) -> Option<&str> {
        self.mime.as_deref()
    }

    pub fn ntp_presentation_time(&self) -> Option<f64> {
        self.builder.ntp_presentation_time()
    }

    /// Bits per second over the last full second of the track.
    pub fn bitrate(&self, payload_type: u8) -> Option<f64> {
        self.builder.track(payload_type).map(|t| t.bitrate)
    }

    pub fn framerate(&self, payload_type: u8) -> Option<f64> {
        self.builder.track(payload_type).map(|t| t.framerate)
    }

    pub fn poll_event(&mut self) -> Option<MuxerEvent> {
        self.events.pop_front()
    }

    pub fn process(&mut self, msg: Message) -> Vec<Message> {
        match msg {
            Message::Sdp(sdp) => {
                let moov = self.builder.moov(&sdp, mp4_now());
                let mime = mime_type(&self.builder.codecs());
                tracing::info!(%mime, "new movie");

                let ftyp = ftyp();
                let mut data = Vec::with_capacity(ftyp.size() + moov.size());
                ftyp.write_to(&mut data);
                moov.write_to(&mut data);
                self.mime = Some(mime.clone());

                vec![
                    Message::Sdp(sdp),
                    Message::Isom(IsomMessage {
                        data,
                        mime: Some(mime),
                        checkpoint_time: None,
                        ntp_timestamp: None,
                    }),
                ]
            }
            Message::H264(frame) => self
                .fragment(
                    frame.payload_type,
                    frame.timestamp,
                    frame.ntp_timestamp,
                    &frame.data,
                    frame.idr,
                )
                .into_iter()
                .collect(),
            Message::Elementary(sample) => self
                .fragment(
                    sample.payload_type,
                    sample.timestamp,
                    sample.ntp_timestamp,
                    &sample.data,
                    false,
                )
                .into_iter()
                .collect(),
            other => vec![other],
        }
    }

    /// `None` when the payload type has no track in the current movie; the
    /// sample is then dropped.
    fn fragment(
        &mut self,
        payload_type: u8,
        timestamp: u32,
        ntp_timestamp: Option<f64>,
        data: &[u8],
        idr: bool,
    ) -> Option<Message> {
        if self.builder.track(payload_type).is_none() {
            tracing::debug!(payload_type, "sample without track dropped");
            return None;
        }

        if let Some(origin) = self
            .builder
            .set_presentation_time(payload_type, ntp_timestamp)
        {
            tracing::debug!(ntp_presentation_time = origin, "presentation time synced");
            self.events.push_back(MuxerEvent::Sync {
                ntp_presentation_time: origin,
            });
        }

        let checkpoint_time = match (idr, ntp_timestamp, self.builder.ntp_presentation_time()) {
            (true, Some(ntp), Some(origin)) => Some((ntp - origin) / 1000.0),
            _ => None,
        };

        let moof = self
            .builder
            .moof(payload_type, timestamp, data.len(), idr)?;
        let mdat = BoxBuilder::mdat(data);
        let mut bytes = Vec::with_capacity(moof.size() + mdat.size());
        moof.write_to(&mut bytes);
        mdat.write_to(&mut bytes);
        tracing::trace!(payload_type, timestamp, bytes = bytes.len(), "fragment");

        Some(Message::Isom(IsomMessage {
            data: bytes,
            mime: None,
            checkpoint_time,
            ntp_timestamp,
        }))
    }
}

/// Seconds since 1904-01-01, truncated to 32 bits as `mvhd` v0 stores it.
fn mp4_now() -> u32 {
    let unix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    (unix + MP4_EPOCH_OFFSET_SECS) as u32
}
