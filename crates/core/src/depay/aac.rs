//! MPEG-4 audio depacketizer (RFC 3640, `mpeg4-generic`).
//!
//! ```text
//! +---------+-----------+-----------+---------------+
//! | RTP     | AU Header | Auxiliary | Access Unit   |
//! | Header  | Section   | Section   | Data Section  |
//! +---------+-----------+-----------+---------------+
//! ```
//!
//! The AU header section starts with a 16-bit `AU-headers-length` in bits,
//! padded to a whole byte. Whether it is present at all follows from the
//! field widths declared in the SDP `fmtp` (§3.3.6): it is absent only when
//! every width is zero.

use crate::bytes::{BitReader, read_u16_be};
use crate::error::{Result, RtspError};
use crate::message::{Elementary, Message, RtpMessage};
use crate::protocol::rtp;
use crate::protocol::sdp::MediaDescription;

use super::Depacketizer;

/// Samples per AAC frame, the RTP timestamp step between AUs in a packet.
const AAC_FRAME_SAMPLES: u32 = 1024;

/// AU-header field widths in bits, from `fmtp`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AuHeaderLayout {
    pub size_length: u32,
    pub index_length: u32,
    pub index_delta_length: u32,
    pub cts_delta_length: u32,
    pub dts_delta_length: u32,
    pub random_access_indication: u32,
    pub stream_state_indication: u32,
    pub auxiliary_data_size_length: u32,
}

impl AuHeaderLayout {
    pub fn from_media(media: &MediaDescription) -> Self {
        let field = |key: &str| {
            media
                .fmtp_param(key)
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(0)
        };
        Self {
            size_length: field("sizelength"),
            index_length: field("indexlength"),
            index_delta_length: field("indexdeltalength"),
            cts_delta_length: field("ctsdeltalength"),
            dts_delta_length: field("dtsdeltalength"),
            random_access_indication: field("randomaccessindication"),
            stream_state_indication: field("streamstateindication"),
            auxiliary_data_size_length: field("auxiliarydatasizelength"),
        }
    }

    pub fn has_header(&self) -> bool {
        self.size_length
            + self.index_length.max(self.index_delta_length)
            + self.cts_delta_length
            + self.dts_delta_length
            + self.random_access_indication
            + self.stream_state_indication
            + self.auxiliary_data_size_length
            > 0
    }

    /// Per-AU sizes can be read directly only for the plain
    /// size + index layout used by AAC-hbr/AAC-lbr.
    fn sizes_only(&self) -> bool {
        self.size_length > 0
            && self.cts_delta_length == 0
            && self.dts_delta_length == 0
            && self.random_access_indication == 0
            && self.stream_state_indication == 0
    }
}

#[derive(Debug)]
pub struct AacDepay {
    payload_type: u8,
    layout: AuHeaderLayout,
}

impl AacDepay {
    pub fn new(payload_type: u8, layout: AuHeaderLayout) -> Self {
        Self {
            payload_type,
            layout,
        }
    }

    /// Split the payload into access units.
    fn access_units<'a>(&self, payload: &'a [u8]) -> Result<Vec<&'a [u8]>> {
        if !self.layout.has_header() {
            return Ok(vec![payload]);
        }

        let header_bits = read_u16_be(payload, 0)
            .ok_or_else(|| RtspError::truncated("AU-headers-length", 2, payload.len()))?
            as usize;
        let header_len = 2 + header_bits.div_ceil(8);
        if payload.len() < header_len {
            return Err(RtspError::truncated("AU header section", header_len, payload.len()));
        }
        let data = &payload[header_len..];

        if !self.layout.sizes_only() {
            return Ok(vec![data]);
        }

        let mut reader = BitReader::new(&payload[2..header_len]);
        let mut units = Vec::new();
        let mut offset = 0;
        let mut consumed = 0;
        let mut first = true;
        while consumed < header_bits {
            let size = reader.read_bits(self.layout.size_length)? as usize;
            let index_bits = if first {
                self.layout.index_length
            } else {
                self.layout.index_delta_length
            };
            reader.read_bits(index_bits)?;
            consumed += (self.layout.size_length + index_bits) as usize;
            first = false;

            let unit = data
                .get(offset..offset + size)
                .ok_or_else(|| RtspError::truncated("access unit", offset + size, data.len()))?;
            units.push(unit);
            offset += size;
        }

        if units.is_empty() {
            units.push(data);
        }
        Ok(units)
    }
}

impl Depacketizer for AacDepay {
    fn accepts(media: &MediaDescription) -> bool {
        media.media_type == "audio" && media.encoding_name() == Some("MPEG4-GENERIC")
    }

    fn from_media(media: &MediaDescription) -> Result<Self> {
        let pt = media
            .payload_type()
            .ok_or_else(|| RtspError::MissingPayloadType("MPEG4-GENERIC".to_string()))?;
        Ok(Self::new(pt, AuHeaderLayout::from_media(media)))
    }

    fn payload_type(&self) -> u8 {
        self.payload_type
    }

    fn depay(&mut self, packet: &RtpMessage) -> Vec<Message> {
        let units = match rtp::payload(&packet.data).and_then(|p| self.access_units(p)) {
            Ok(units) => units,
            Err(err) => {
                tracing::debug!(%err, "dropping malformed AAC packet");
                return Vec::new();
            }
        };

        let timestamp = packet.timestamp().unwrap_or(0);
        units
            .into_iter()
            .enumerate()
            .filter(|(_, unit)| !unit.is_empty())
            .map(|(i, unit)| {
                Message::Elementary(Elementary {
                    data: unit.to_vec(),
                    timestamp: timestamp.wrapping_add(i as u32 * AAC_FRAME_SAMPLES),
                    ntp_timestamp: packet.ntp_timestamp,
                    payload_type: self.payload_type,
                })
            })
            .collect()
    }

    fn reset(&mut self) {}
}
