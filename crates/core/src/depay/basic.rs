use crate::error::{Result, RtspError};
use crate::message::{Elementary, Message, RtpMessage};
use crate::protocol::rtp;
use crate::protocol::sdp::MediaDescription;

use super::Depacketizer;

/// Generic depacketizer: concatenates payloads until the marker bit.
///
/// Used for any payload format without codec-specific framing. An access
/// unit with no payload bytes is dropped rather than emitted empty.
#[derive(Debug)]
pub struct BasicDepay {
    payload_type: u8,
    buffer: Vec<u8>,
}

impl BasicDepay {
    pub fn new(payload_type: u8) -> Self {
        Self {
            payload_type,
            buffer: Vec::new(),
        }
    }
}

impl Depacketizer for BasicDepay {
    fn accepts(_media: &MediaDescription) -> bool {
        true
    }

    fn from_media(media: &MediaDescription) -> Result<Self> {
        let pt = media
            .payload_type()
            .ok_or_else(|| RtspError::MissingPayloadType(media.media_type.clone()))?;
        Ok(Self::new(pt))
    }

    fn payload_type(&self) -> u8 {
        self.payload_type
    }

    fn depay(&mut self, packet: &RtpMessage) -> Vec<Message> {
        match rtp::payload(&packet.data) {
            Ok(payload) => self.buffer.extend_from_slice(payload),
            Err(err) => {
                tracing::debug!(%err, "dropping malformed RTP packet");
                return Vec::new();
            }
        }
        if !packet.marker() {
            return Vec::new();
        }

        let data = std::mem::take(&mut self.buffer);
        if data.is_empty() {
            return Vec::new();
        }
        vec![Message::Elementary(Elementary {
            data,
            timestamp: packet.timestamp().unwrap_or(0),
            ntp_timestamp: packet.ntp_timestamp,
            payload_type: self.payload_type,
        })]
    }

    fn reset(&mut self) {
        self.buffer.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::depay::test_support::rtp_packet;

    #[test]
    fn concatenates_until_marker() {
        let mut depay = BasicDepay::new(99);
        assert!(depay.depay(&rtp_packet(99, false, 10, b"ab")).is_empty());
        let out = depay.depay(&rtp_packet(99, true, 10, b"cd"));
        match &out[..] {
            [Message::Elementary(e)] => {
                assert_eq!(e.data, b"abcd".to_vec());
                assert_eq!(e.timestamp, 10);
                assert_eq!(e.payload_type, 99);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn empty_access_unit_is_not_emitted() {
        let mut depay = BasicDepay::new(99);
        assert!(depay.depay(&rtp_packet(99, true, 0, b"")).is_empty());
    }

    #[test]
    fn missing_payload_type_fails_fast() {
        let media = MediaDescription {
            media_type: "application".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            BasicDepay::from_media(&media),
            Err(RtspError::MissingPayloadType(_))
        ));
    }
}
