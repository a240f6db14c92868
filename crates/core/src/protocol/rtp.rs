//! RTP fixed header reader (RFC 3550 §5.1).
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |V=2|P|X|  CC   |M|     PT      |       Sequence Number         |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                           Timestamp                           |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                             SSRC                              |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |            CSRC list (CC × 32 bits), optional extension       |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```

use crate::bytes::{read_u16_be, read_u32_be};
use crate::error::{Result, RtspError};

/// Length of the fixed part of the header.
pub const RTP_HEADER_LEN: usize = 12;

/// Decoded RTP fixed header fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtpHeader {
    pub version: u8,
    pub padding: bool,
    pub extension: bool,
    pub csrc_count: u8,
    pub marker: bool,
    /// RTP payload type (7-bit, RFC 3551).
    pub payload_type: u8,
    pub sequence_number: u16,
    pub timestamp: u32,
    pub ssrc: u32,
}

impl RtpHeader {
    /// Read the fixed header from the start of `packet`.
    pub fn parse(packet: &[u8]) -> Result<Self> {
        if packet.len() < RTP_HEADER_LEN {
            return Err(RtspError::truncated(
                "RTP header",
                RTP_HEADER_LEN,
                packet.len(),
            ));
        }
        Ok(Self {
            version: packet[0] >> 6,
            padding: packet[0] & 0x20 != 0,
            extension: packet[0] & 0x10 != 0,
            csrc_count: packet[0] & 0x0f,
            marker: packet[1] & 0x80 != 0,
            payload_type: packet[1] & 0x7f,
            sequence_number: u16::from_be_bytes([packet[2], packet[3]]),
            timestamp: u32::from_be_bytes([packet[4], packet[5], packet[6], packet[7]]),
            ssrc: u32::from_be_bytes([packet[8], packet[9], packet[10], packet[11]]),
        })
    }

    /// Serialize a 12-byte header with no CSRCs, extension, or padding.
    pub fn write(&self) -> [u8; RTP_HEADER_LEN] {
        let mut header = [0u8; RTP_HEADER_LEN];
        header[0] = 2 << 6;
        header[1] = ((self.marker as u8) << 7) | (self.payload_type & 0x7f);
        header[2..4].copy_from_slice(&self.sequence_number.to_be_bytes());
        header[4..8].copy_from_slice(&self.timestamp.to_be_bytes());
        header[8..12].copy_from_slice(&self.ssrc.to_be_bytes());
        header
    }
}

pub fn marker(packet: &[u8]) -> bool {
    packet.get(1).is_some_and(|b| b & 0x80 != 0)
}

pub fn payload_type(packet: &[u8]) -> Option<u8> {
    packet.get(1).map(|b| b & 0x7f)
}

pub fn sequence_number(packet: &[u8]) -> Option<u16> {
    read_u16_be(packet, 2)
}

pub fn timestamp(packet: &[u8]) -> Option<u32> {
    read_u32_be(packet, 4)
}

/// Offset of the payload: fixed header, CSRC list, and the optional
/// extension header (RFC 3550 §5.3.1).
pub fn payload_offset(packet: &[u8]) -> Result<usize> {
    let header = RtpHeader::parse(packet)?;
    let mut offset = RTP_HEADER_LEN + 4 * header.csrc_count as usize;
    if header.extension {
        let words = read_u16_be(packet, offset + 2)
            .ok_or_else(|| RtspError::truncated("RTP extension", offset + 4, packet.len()))?;
        offset += 4 + 4 * words as usize;
    }
    if offset > packet.len() {
        return Err(RtspError::truncated("RTP packet", offset, packet.len()));
    }
    Ok(offset)
}

/// Payload bytes with any trailing padding removed (RFC 3550 §5.1, P bit).
pub fn payload(packet: &[u8]) -> Result<&[u8]> {
    let offset = payload_offset(packet)?;
    let mut end = packet.len();
    if packet[0] & 0x20 != 0 {
        let pad = packet[end - 1] as usize;
        if pad == 0 || offset + pad > end {
            return Err(RtspError::truncated("RTP padding", offset + pad, end));
        }
        end -= pad;
    }
    Ok(&packet[offset..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_header(marker: bool) -> RtpHeader {
        RtpHeader {
            version: 2,
            padding: false,
            extension: false,
            csrc_count: 0,
            marker,
            payload_type: 96,
            sequence_number: 0x1234,
            timestamp: 3000,
            ssrc: 0xAABBCCDD,
        }
    }

    #[test]
    fn write_then_parse_header() {
        let h = make_header(true);
        let buf = h.write();
        assert_eq!(buf[0] >> 6, 2);
        assert_eq!(RtpHeader::parse(&buf).unwrap(), h);
    }

    #[test]
    fn field_readers() {
        let buf = make_header(false).write();
        assert!(!marker(&buf));
        assert_eq!(payload_type(&buf), Some(96));
        assert_eq!(sequence_number(&buf), Some(0x1234));
        assert_eq!(timestamp(&buf), Some(3000));
    }

    #[test]
    fn payload_skips_csrc_and_extension() {
        let mut packet = make_header(false).write().to_vec();
        packet[0] |= 0x10 | 0x01;
        packet.extend_from_slice(&[0, 0, 0, 1]); // one CSRC
        packet.extend_from_slice(&[0xbe, 0xde, 0, 1]); // extension, 1 word
        packet.extend_from_slice(&[9, 9, 9, 9]);
        packet.extend_from_slice(&[1, 2, 3]);
        assert_eq!(payload_offset(&packet).unwrap(), 24);
        assert_eq!(payload(&packet).unwrap(), &[1, 2, 3]);
    }

    #[test]
    fn payload_strips_padding() {
        let mut packet = make_header(false).write().to_vec();
        packet[0] |= 0x20;
        packet.extend_from_slice(&[7, 8, 0, 0, 3]);
        assert_eq!(payload(&packet).unwrap(), &[7, 8]);
    }

    #[test]
    fn short_packet_is_truncated() {
        assert!(matches!(
            RtpHeader::parse(&[0x80, 96]),
            Err(RtspError::Truncated { needed: 12, .. })
        ));
    }
}
