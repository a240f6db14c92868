//! Messages flowing between pipeline stages.
//!
//! Every stage consumes and produces [`Message`] values. Messages that carry
//! media timing have an RTP `timestamp` in codec clock units and, once an
//! RTCP sender report has been seen, an `ntp_timestamp` in Unix-epoch
//! milliseconds. Synchronization is keyed on the latter.

use crate::protocol::rtp;
use crate::protocol::sdp::Sdp;
use crate::protocol::{RtspRequest, RtspResponse};

/// An RTP packet together with the interleaved channel it arrived on.
#[derive(Debug, Clone, PartialEq)]
pub struct RtpMessage {
    pub channel: u8,
    /// Complete packet, header included.
    pub data: Vec<u8>,
    pub ntp_timestamp: Option<f64>,
}

impl RtpMessage {
    pub fn new(channel: u8, data: Vec<u8>) -> Self {
        Self {
            channel,
            data,
            ntp_timestamp: None,
        }
    }

    pub fn payload_type(&self) -> Option<u8> {
        rtp::payload_type(&self.data)
    }

    pub fn timestamp(&self) -> Option<u32> {
        rtp::timestamp(&self.data)
    }

    pub fn marker(&self) -> bool {
        rtp::marker(&self.data)
    }
}

/// An RTCP packet (one element of a compound packet).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtcpMessage {
    pub channel: u8,
    pub data: Vec<u8>,
}

/// Outgoing request or incoming response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RtspMessage {
    Request(RtspRequest),
    Response(RtspResponse),
}

/// A depacketized codec payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Elementary {
    pub data: Vec<u8>,
    pub timestamp: u32,
    pub ntp_timestamp: Option<f64>,
    pub payload_type: u8,
}

/// One H.264 access unit as length-prefixed NAL units (ISO 14496-15 §5.3).
#[derive(Debug, Clone, PartialEq)]
pub struct H264Frame {
    pub data: Vec<u8>,
    /// Whether the access unit contains an IDR slice.
    pub idr: bool,
    /// Type of the last NAL unit in the access unit.
    pub nal_type: u8,
    pub timestamp: u32,
    pub ntp_timestamp: Option<f64>,
    pub payload_type: u8,
}

/// A reconstructed JPEG (JFIF) image.
#[derive(Debug, Clone, PartialEq)]
pub struct JpegFrame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp: u32,
    pub ntp_timestamp: Option<f64>,
    pub payload_type: u8,
}

/// Complete ISO BMFF boxes, ready for a media buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct IsomMessage {
    pub data: Vec<u8>,
    /// Set on the init segment: `video/mp4; codecs="..."`.
    pub mime: Option<String>,
    /// Seconds since the presentation origin at which everything before
    /// this keyframe may be discarded.
    pub checkpoint_time: Option<f64>,
    pub ntp_timestamp: Option<f64>,
}

/// An ONVIF metadata document.
#[derive(Debug, Clone, PartialEq)]
pub struct XmlMessage {
    pub data: Vec<u8>,
    pub timestamp: u32,
    pub ntp_timestamp: Option<f64>,
    pub payload_type: u8,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Raw(Vec<u8>),
    Rtsp(RtspMessage),
    Sdp(Sdp),
    Rtp(RtpMessage),
    Rtcp(RtcpMessage),
    Elementary(Elementary),
    H264(H264Frame),
    Jpeg(JpegFrame),
    Isom(IsomMessage),
    Xml(XmlMessage),
}

impl Message {
    /// Wall-clock presentation key, if the message carries one.
    pub fn ntp_timestamp(&self) -> Option<f64> {
        match self {
            Message::Rtp(m) => m.ntp_timestamp,
            Message::Elementary(m) => m.ntp_timestamp,
            Message::H264(m) => m.ntp_timestamp,
            Message::Jpeg(m) => m.ntp_timestamp,
            Message::Isom(m) => m.ntp_timestamp,
            Message::Xml(m) => m.ntp_timestamp,
            Message::Raw(_) | Message::Rtsp(_) | Message::Sdp(_) | Message::Rtcp(_) => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Message::Raw(_) => "raw",
            Message::Rtsp(_) => "rtsp",
            Message::Sdp(_) => "sdp",
            Message::Rtp(_) => "rtp",
            Message::Rtcp(_) => "rtcp",
            Message::Elementary(_) => "elementary",
            Message::H264(_) => "h264",
            Message::Jpeg(_) => "jpeg",
            Message::Isom(_) => "isom",
            Message::Xml(_) => "xml",
        }
    }

    /// Size of the carried payload in bytes.
    pub fn len(&self) -> usize {
        match self {
            Message::Raw(data) => data.len(),
            Message::Rtsp(RtspMessage::Request(r)) => r.serialize().len(),
            Message::Rtsp(RtspMessage::Response(r)) => r.body.as_ref().map_or(0, String::len),
            Message::Sdp(_) => 0,
            Message::Rtp(m) => m.data.len(),
            Message::Rtcp(m) => m.data.len(),
            Message::Elementary(m) => m.data.len(),
            Message::H264(m) => m.data.len(),
            Message::Jpeg(m) => m.data.len(),
            Message::Isom(m) => m.data.len(),
            Message::Xml(m) => m.data.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
