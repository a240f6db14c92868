//! H.264 depacketizer (RFC 6184).
//!
//! The inverse of the FU-A packetizer: RTP payloads are turned back into
//! NAL units, each written with a 4-byte big-endian length prefix (the
//! AVC sample format of ISO 14496-15), and grouped into access units that
//! end at the RTP marker bit.
//!
//! ```text
//! FU indicator:  [F|NRI|Type=28]     (1 byte)
//! FU header:     [S|E|R|NAL_Type]    (1 byte)
//! Fragment data: [...]
//! ```
//!
//! - **Single NAL unit** (§5.6): types 1 (non-IDR slice), 5 (IDR slice)
//!   and 6 (SEI) are prefixed and kept.
//! - **FU-A** (§5.8): the start fragment rebuilds the NAL header from the
//!   indicator's F/NRI bits and the FU header's type; the end fragment
//!   patches the length prefix.
//!
//! Other packetization types are dropped. Everything before the first IDR
//! access unit is discarded, since a decoder cannot start from it.

use std::collections::HashSet;

use crate::error::{Result, RtspError};
use crate::message::{H264Frame, Message, RtpMessage};
use crate::protocol::rtp;
use crate::protocol::sdp::MediaDescription;

use super::Depacketizer;

pub const NAL_NON_IDR: u8 = 1;
pub const NAL_IDR: u8 = 5;
pub const NAL_SEI: u8 = 6;
pub const NAL_SPS: u8 = 7;
pub const NAL_PPS: u8 = 8;
pub const NAL_FU_A: u8 = 28;

#[derive(Debug)]
pub struct H264Depay {
    payload_type: u8,
    /// NAL unit under FU-A reassembly, length prefix included.
    buffer: Vec<u8>,
    /// Completed NAL units of the current access unit.
    frame: Vec<u8>,
    idr_in_frame: bool,
    idr_found: bool,
    ignored_types: HashSet<u8>,
}

impl H264Depay {
    pub fn new(payload_type: u8) -> Self {
        Self {
            payload_type,
            buffer: Vec::new(),
            frame: Vec::new(),
            idr_in_frame: false,
            idr_found: false,
            ignored_types: HashSet::new(),
        }
    }

    /// Returns the completed NAL unit (length-prefixed) and its type, if any.
    fn take_nal(&mut self, payload: &[u8]) -> Option<(Vec<u8>, u8)> {
        let indicator = *payload.first()?;
        let packet_type = indicator & 0x1f;

        match packet_type {
            NAL_FU_A => {
                let fu_header = *payload.get(1)?;
                let nal_type = fu_header & 0x1f;
                let start = fu_header & 0x80 != 0;
                let end = fu_header & 0x40 != 0;

                if start {
                    self.buffer.clear();
                    self.buffer
                        .extend_from_slice(&[0, 0, 0, 0, (indicator & 0xe0) | nal_type]);
                } else if self.buffer.is_empty() {
                    tracing::trace!("FU-A continuation without start fragment");
                    return None;
                }
                self.buffer.extend_from_slice(&payload[2..]);

                if !end {
                    return None;
                }
                let mut nal = std::mem::take(&mut self.buffer);
                let len = (nal.len() - 4) as u32;
                nal[..4].copy_from_slice(&len.to_be_bytes());
                Some((nal, nal_type))
            }
            NAL_NON_IDR | NAL_IDR | NAL_SEI if self.buffer.is_empty() => {
                let mut nal = Vec::with_capacity(payload.len() + 4);
                nal.extend_from_slice(&(payload.len() as u32).to_be_bytes());
                nal.extend_from_slice(payload);
                Some((nal, packet_type))
            }
            other => {
                if self.ignored_types.insert(other) {
                    tracing::warn!(
                        nal_type = other,
                        "only NAL types 1, 5, 6 and FU-A are extracted; ignoring this type from now on"
                    );
                }
                self.buffer.clear();
                None
            }
        }
    }
}

impl Depacketizer for H264Depay {
    fn accepts(media: &MediaDescription) -> bool {
        media.media_type == "video" && media.encoding_name() == Some("H264")
    }

    fn from_media(media: &MediaDescription) -> Result<Self> {
        let pt = media
            .payload_type()
            .ok_or_else(|| RtspError::MissingPayloadType("H264".to_string()))?;
        Ok(Self::new(pt))
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

        let mut last_type = None;
        if let Some((nal, nal_type)) = self.take_nal(payload) {
            self.frame.extend_from_slice(&nal);
            self.idr_in_frame |= nal_type == NAL_IDR;
            last_type = Some(nal_type);
        }

        if !packet.marker() {
            return Vec::new();
        }
        let Some(nal_type) = last_type else {
            // The access unit ends incomplete: drop it rather than let it
            // prefix the next one.
            if !self.frame.is_empty() || !self.buffer.is_empty() {
                tracing::debug!(bytes = self.frame.len(), "dropping incomplete access unit");
            }
            self.buffer.clear();
            self.frame.clear();
            self.idr_in_frame = false;
            return Vec::new();
        };

        let data = std::mem::take(&mut self.frame);
        let idr = std::mem::take(&mut self.idr_in_frame);
        self.idr_found |= idr;
        if !self.idr_found {
            tracing::debug!(nal_type, "dropping access unit before first IDR");
            return Vec::new();
        }

        vec![Message::H264(H264Frame {
            data,
            idr,
            nal_type,
            timestamp: packet.timestamp().unwrap_or(0),
            ntp_timestamp: packet.ntp_timestamp,
            payload_type: self.payload_type,
        })]
    }

    fn reset(&mut self) {
        self.buffer.clear();
        self.frame.clear();
        self.idr_in_frame = false;
        self.idr_found = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::prelude::{BASE64_STANDARD, Engine as _};

    const SINGLE_NALU: &str = "gOATzCCbbTXpPLiiQZrALBJ/AEphqA==";
    const FUA_PART1: &str = "gGBwUAkfABNeSvUmfIWIgwAAv7fhaOZ7/8I48OQXY7Fpl6o9HpvJiYz5b2JyowHtuVDBxLY9ZL8FHJOD6rs6h91CSMQmA9fgnTDCVgJ5vdm99c7OMzF3l4K9+VJeZ4eKyC32WVXoVh3h+KVVJERORlYXJDq+1IlMC0EzAqltdPKwC1UmwbsMgtz6fjR/v19wZf0DXOfxTBnb0OnN83kR5G8TffuGm2njvkWsEX7ecpJDzhu0Wn0RZ9Z0I39RuOT5hHrKKSMQSfwWbITrzL+j5bneysE7nAD9mPsEQxqH99GPZodENIbuYhog8TS/Qlv+Ty20GkAZfbZILfjoELO9ahh2wQgLaGd031W4Z7bmM7WACu7fPVm4blRP1rhomufuUAD8ceqjqxcivy5CxeyWS764bBNkffWBVHL7PpzXPhd4e56YduXnWwQO1REIs2MiPfyx7UumMIwDCCKhgDf3BUxWuSXVqcORn0aSp7k8SFCM/767e1peyADK+WKuWVDbrDvPW2igZKBADyashVjvNhdaHJBCWPOpVwfghRhSjeaK2k6/OdY6ebpRDv4J7ZnUCGnNspqy6fo5WbUoQwc4+3xXbq8lN7kYP9zSH4iExe7f//+9flejgJql61Z4A34bwazQ/KlCmySYm/cbIyWuZVQo0R8=";
    const FUA_PART2: &str =
        "gOBwUQkfABNeSvUmfEV10JWHPGgQDhsFYeRYLNcUCLF5ek1hA7BRpPeURyWGQa9vOSr5DM0WpqX78A==";

    fn packet(b64: &str) -> RtpMessage {
        RtpMessage::new(0, BASE64_STANDARD.decode(b64).unwrap())
    }

    fn single(out: Vec<Message>) -> H264Frame {
        match out.as_slice() {
            [Message::H264(frame)] => frame.clone(),
            other => panic!("expected one H264 frame, got {other:?}"),
        }
    }

    #[test]
    fn fu_a_frame_split_on_two_packets() {
        let mut depay = H264Depay::new(96);
        assert!(depay.depay(&packet(FUA_PART1)).is_empty());

        let frame = single(depay.depay(&packet(FUA_PART2)));
        assert_eq!(frame.timestamp, 153026579);
        assert_eq!(frame.payload_type, 96);
        assert_eq!(frame.data.len(), 535);
        let prefix = u32::from_be_bytes([frame.data[0], frame.data[1], frame.data[2], frame.data[3]]);
        assert_eq!(prefix as usize, frame.data.len() - 4);
        assert_eq!(frame.data[4] & 0x1f, NAL_IDR);
        assert!(frame.idr);
    }

    #[test]
    fn single_nalu_after_idr() {
        let mut depay = H264Depay::new(96);
        depay.depay(&packet(FUA_PART1));
        depay.depay(&packet(FUA_PART2));

        let frame = single(depay.depay(&packet(SINGLE_NALU)));
        assert_eq!(frame.timestamp, 547056949);
        assert_eq!(frame.data.len(), 14);
        assert_eq!(frame.nal_type, NAL_NON_IDR);
        assert!(!frame.idr);
    }

    #[test]
    fn frames_before_first_idr_are_dropped() {
        let mut depay = H264Depay::new(96);
        assert!(depay.depay(&packet(SINGLE_NALU)).is_empty());
    }

    #[test]
    fn marker_without_nal_ends_access_unit() {
        use crate::depay::test_support::rtp_packet;

        let mut depay = H264Depay::new(96);
        depay.depay(&packet(FUA_PART1));
        depay.depay(&packet(FUA_PART2));

        assert!(depay.depay(&rtp_packet(96, false, 10, &[0x41, 0x9a])).is_empty());
        // FU-A continuation whose start fragment was lost.
        assert!(depay.depay(&rtp_packet(96, true, 10, &[0x7c, 0x01, 0xaa])).is_empty());

        let frame = single(depay.depay(&rtp_packet(96, true, 20, &[0x41, 0x01])));
        assert_eq!(frame.data, vec![0, 0, 0, 2, 0x41, 0x01]);
        assert_eq!(frame.timestamp, 20);
    }

    #[test]
    fn unsupported_types_are_ignored() {
        let mut depay = H264Depay::new(96);
        let mut data = packet(SINGLE_NALU).data;
        data[12] = (data[12] & 0xe0) | 24; // STAP-A
        assert!(depay.depay(&RtpMessage::new(0, data)).is_empty());
        assert!(depay.ignored_types.contains(&24));
    }

    #[test]
    fn accepts_h264_video_only() {
        let media = MediaDescription {
            media_type: "video".to_string(),
            rtpmap: Some(crate::protocol::sdp::RtpMap {
                payload_type: 96,
                encoding_name: "H264".to_string(),
                clock_rate: 90000,
                encoding_parameters: None,
            }),
            ..Default::default()
        };
        assert!(H264Depay::accepts(&media));
        assert_eq!(H264Depay::from_media(&media).unwrap().payload_type(), 96);
    }
}
