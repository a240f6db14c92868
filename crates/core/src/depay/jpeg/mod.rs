//! JPEG depacketizer (RFC 2435).
//!
//! Every RTP/JPEG payload starts with an 8-byte main header:
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! | Type-specific |              Fragment Offset                  |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |      Type     |       Q       |     Width     |     Height    |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! followed by a restart marker header when `64 <= Type <= 127` and a
//! quantization table header in the first fragment when `Q >= 128`.
//! Fragments are concatenated until the marker bit, then the JFIF headers
//! are rebuilt in front of the scan data.

mod headers;

use std::collections::HashMap;

pub use headers::{make_headers, make_qtables};

use crate::bytes::read_u24_be;
use crate::error::{Result, RtspError};
use crate::message::{JpegFrame, Message, RtpMessage};
use crate::protocol::rtp;
use crate::protocol::sdp::MediaDescription;

use super::Depacketizer;

/// Static payload type assigned to JPEG (RFC 3551 §6).
pub const JPEG_PAYLOAD_TYPE: u8 = 26;

const MAIN_HEADER_LEN: usize = 8;
const RESTART_HEADER_LEN: usize = 4;
const QTABLE_HEADER_LEN: usize = 4;

/// Q value whose tables change every frame and must not be cached.
const Q_DYNAMIC: u8 = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FrameInfo {
    jpeg_type: u8,
    q: u8,
    width: u32,
    height: u32,
    restart_interval: u16,
}

#[derive(Debug)]
pub struct JpegDepay {
    payload_type: u8,
    /// Fallback dimensions from `a=framesize` / `a=x-dimensions`.
    framesize: Option<(u32, u32)>,
    info: Option<FrameInfo>,
    precision: u8,
    qtables: Vec<u8>,
    scan: Vec<u8>,
    /// In-band tables per Q in 128..=254, which may be sent only once.
    table_cache: HashMap<u8, (u8, Vec<u8>)>,
    broken: bool,
}

impl JpegDepay {
    pub fn new(payload_type: u8, framesize: Option<(u32, u32)>) -> Self {
        Self {
            payload_type,
            framesize,
            info: None,
            precision: 0,
            qtables: Vec::new(),
            scan: Vec::new(),
            table_cache: HashMap::new(),
            broken: false,
        }
    }

    fn clear_frame(&mut self) {
        self.info = None;
        self.precision = 0;
        self.qtables.clear();
        self.scan.clear();
        self.broken = false;
    }

    /// Feed one payload; returns false if the fragment could not be used.
    fn push_fragment(&mut self, payload: &[u8]) -> bool {
        if payload.len() < MAIN_HEADER_LEN {
            return false;
        }
        let Some(offset) = read_u24_be(payload, 1) else {
            return false;
        };
        let jpeg_type = payload[4];
        let q = payload[5];
        let mut width = payload[6] as u32 * 8;
        let mut height = payload[7] as u32 * 8;
        if let Some((w, h)) = self.framesize {
            if width == 0 {
                width = w;
            }
            if height == 0 {
                height = h;
            }
        }
        let mut cursor = MAIN_HEADER_LEN;

        let mut restart_interval = 0;
        if (64..128).contains(&jpeg_type) {
            let Some(header) = payload.get(cursor..cursor + RESTART_HEADER_LEN) else {
                return false;
            };
            restart_interval = u16::from_be_bytes([header[0], header[1]]);
            cursor += RESTART_HEADER_LEN;
        }

        if offset == 0 {
            if !self.scan.is_empty() {
                tracing::debug!("JPEG frame without marker bit, discarding partial frame");
            }
            self.clear_frame();
            self.info = Some(FrameInfo {
                jpeg_type,
                q,
                width,
                height,
                restart_interval,
            });

            if q >= 128 {
                let Some(header) = payload.get(cursor..cursor + QTABLE_HEADER_LEN) else {
                    return false;
                };
                let precision = header[1];
                let length = u16::from_be_bytes([header[2], header[3]]) as usize;
                cursor += QTABLE_HEADER_LEN;
                if length > 0 {
                    let Some(tables) = payload.get(cursor..cursor + length) else {
                        return false;
                    };
                    self.precision = precision;
                    self.qtables = tables.to_vec();
                    cursor += length;
                    if q != Q_DYNAMIC {
                        self.table_cache
                            .insert(q, (precision, self.qtables.clone()));
                    }
                } else if let Some((precision, tables)) = self.table_cache.get(&q) {
                    self.precision = *precision;
                    self.qtables = tables.clone();
                } else {
                    tracing::warn!(q, "JPEG frame references tables never received");
                    return false;
                }
            } else {
                self.qtables = make_qtables(q);
            }
        } else if self.info.is_none() || offset as usize != self.scan.len() {
            // Lost the first fragment or a middle one.
            return false;
        }

        self.scan.extend_from_slice(&payload[cursor..]);
        true
    }
}

impl Depacketizer for JpegDepay {
    fn accepts(media: &MediaDescription) -> bool {
        media.media_type == "video"
            && (media.encoding_name() == Some("JPEG")
                || media.payload_type() == Some(JPEG_PAYLOAD_TYPE))
    }

    fn from_media(media: &MediaDescription) -> Result<Self> {
        let pt = media
            .payload_type()
            .ok_or_else(|| RtspError::MissingPayloadType("JPEG".to_string()))?;
        Ok(Self::new(pt, media.framesize))
    }

    fn payload_type(&self) -> u8 {
        self.payload_type
    }

    fn depay(&mut self, packet: &RtpMessage) -> Vec<Message> {
        let payload = match rtp::payload(&packet.data) {
            Ok(p) => p,
            Err(err) => {
                tracing::debug!(%err, "dropping malformed RTP packet");
                return Vec::new();
            }
        };

        if !self.push_fragment(payload) {
            self.broken = true;
        }
        if !packet.marker() {
            return Vec::new();
        }

        let broken = self.broken;
        let info = self.info;
        let scan = std::mem::take(&mut self.scan);
        let qtables = std::mem::take(&mut self.qtables);
        let precision = self.precision;
        self.clear_frame();

        let Some(info) = info.filter(|_| !broken) else {
            tracing::debug!("dropping incomplete JPEG frame");
            return Vec::new();
        };

        let mut data = make_headers(
            info.jpeg_type,
            info.width,
            info.height,
            precision,
            &qtables,
            info.restart_interval,
        );
        data.extend_from_slice(&scan);
        if !data.ends_with(&headers::EOI) {
            data.extend_from_slice(&headers::EOI);
        }

        vec![Message::Jpeg(JpegFrame {
            data,
            width: info.width,
            height: info.height,
            timestamp: packet.timestamp().unwrap_or(0),
            ntp_timestamp: packet.ntp_timestamp,
            payload_type: self.payload_type,
        })]
    }

    fn reset(&mut self) {
        self.clear_frame();
        self.table_cache.clear();
    }
}
