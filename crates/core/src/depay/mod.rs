//! RTP depacketizers.
//!
//! A depacketizer turns the RTP packets of one payload type back into
//! codec units. Each one is configured from its SDP media description
//! and only looks at packets carrying its payload type; every other
//! message passes through untouched.
//!
//! | Encoding | Depacketizer | Output |
//! |----------|--------------|--------|
//! | `H264` | [`H264Depay`] | [`Message::H264`] (AVC length-prefixed) |
//! | `MPEG4-GENERIC` | [`AacDepay`] | [`Message::Elementary`] per AU |
//! | `JPEG` / PT 26 | [`JpegDepay`] | [`Message::Jpeg`] (JFIF) |
//! | `VND.ONVIF.METADATA` | [`OnvifDepay`] | [`Message::Xml`] |
//! | anything else | [`BasicDepay`] | [`Message::Elementary`] |

pub mod aac;
pub mod basic;
pub mod h264;
pub mod jpeg;
pub mod onvif;

use std::collections::HashMap;

pub use aac::AacDepay;
pub use basic::BasicDepay;
pub use h264::H264Depay;
pub use jpeg::JpegDepay;
pub use onvif::{OnvifDepay, XmlHandler};

use crate::error::Result;
use crate::message::{Message, RtpMessage};
use crate::protocol::sdp::{MediaDescription, Sdp};

pub trait Depacketizer: Send {
    /// Whether this depacketizer handles the given media.
    fn accepts(media: &MediaDescription) -> bool
    where
        Self: Sized;

    fn from_media(media: &MediaDescription) -> Result<Self>
    where
        Self: Sized;

    fn payload_type(&self) -> u8;

    /// Consume one RTP packet, returning any completed units.
    fn depay(&mut self, packet: &RtpMessage) -> Vec<Message>;

    /// Drop partially assembled state.
    fn reset(&mut self);

    /// Route metadata documents to `handler` instead of downstream. Only
    /// metadata depacketizers care.
    fn set_xml_handler(&mut self, _handler: XmlHandler) {}
}

/// Single-codec stage: configures `D` from the first accepted media of the
/// SDP and depacketizes packets of that payload type.
pub struct Depay<D> {
    inner: Option<D>,
    xml_handler: Option<XmlHandler>,
}

impl<D: Depacketizer> Default for Depay<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: Depacketizer> Depay<D> {
    pub fn new() -> Self {
        Self {
            inner: None,
            xml_handler: None,
        }
    }

    /// Installed on every depacketizer configured from now on.
    pub fn with_xml_handler(mut self, handler: XmlHandler) -> Self {
        self.xml_handler = Some(handler);
        self
    }

    pub fn depacketizer(&self) -> Option<&D> {
        self.inner.as_ref()
    }

    pub fn process(&mut self, msg: Message) -> Result<Vec<Message>> {
        match msg {
            Message::Sdp(sdp) => {
                if let Some(media) = sdp.media.iter().find(|m| D::accepts(m)) {
                    let mut depay = D::from_media(media)?;
                    if let Some(handler) = &self.xml_handler {
                        depay.set_xml_handler(handler.clone());
                    }
                    tracing::debug!(payload_type = depay.payload_type(), "depacketizer configured");
                    self.inner = Some(depay);
                }
                Ok(vec![Message::Sdp(sdp)])
            }
            Message::Rtp(rtp) => match self.inner.as_mut() {
                Some(depay) if rtp.payload_type() == Some(depay.payload_type()) => {
                    Ok(depay.depay(&rtp))
                }
                _ => Ok(vec![Message::Rtp(rtp)]),
            },
            other => Ok(vec![other]),
        }
    }
}

/// Multi-codec stage: one depacketizer per media in the SDP, chosen by
/// encoding name. RTP with an unknown payload type is dropped.
#[derive(Default)]
pub struct RtpDepay {
    depays: HashMap<u8, Box<dyn Depacketizer>>,
    xml_handler: Option<XmlHandler>,
}

impl RtpDepay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Send ONVIF metadata to `handler`, across SDP changes, instead of
    /// emitting [`Message::Xml`].
    pub fn with_xml_handler(mut self, handler: XmlHandler) -> Self {
        self.xml_handler = Some(handler);
        self
    }

    pub fn payload_types(&self) -> Vec<u8> {
        let mut types: Vec<u8> = self.depays.keys().copied().collect();
        types.sort_unstable();
        types
    }

    /// Rebuild the payload type map. Media whose depacketizer cannot be
    /// configured are skipped with a warning.
    fn configure(&mut self, sdp: &Sdp) {
        self.depays.clear();
        for media in &sdp.media {
            let mut depay = match select(media) {
                Ok(depay) => depay,
                Err(err) => {
                    tracing::warn!(media = %media.media_type, %err, "media skipped");
                    continue;
                }
            };
            if let Some(handler) = &self.xml_handler {
                depay.set_xml_handler(handler.clone());
            }
            tracing::debug!(
                media = %media.media_type,
                encoding = media.encoding_name().unwrap_or("-"),
                payload_type = depay.payload_type(),
                "depacketizer configured"
            );
            self.depays.insert(depay.payload_type(), depay);
        }
    }

    pub fn process(&mut self, msg: Message) -> Result<Vec<Message>> {
        match msg {
            Message::Sdp(sdp) => {
                self.configure(&sdp);
                Ok(vec![Message::Sdp(sdp)])
            }
            Message::Rtp(rtp) => {
                let Some(pt) = rtp.payload_type() else {
                    return Ok(Vec::new());
                };
                match self.depays.get_mut(&pt) {
                    Some(depay) => Ok(depay.depay(&rtp)),
                    None => {
                        tracing::debug!(payload_type = pt, "no depacketizer for payload type");
                        Ok(Vec::new())
                    }
                }
            }
            other => Ok(vec![other]),
        }
    }

    pub fn reset(&mut self) {
        self.depays.values_mut().for_each(|d| d.reset());
    }
}

fn select(media: &MediaDescription) -> Result<Box<dyn Depacketizer>> {
    let depay: Box<dyn Depacketizer> = if H264Depay::accepts(media) {
        Box::new(H264Depay::from_media(media)?)
    } else if AacDepay::accepts(media) {
        Box::new(AacDepay::from_media(media)?)
    } else if JpegDepay::accepts(media) {
        Box::new(JpegDepay::from_media(media)?)
    } else if OnvifDepay::accepts(media) {
        Box::new(OnvifDepay::from_media(media)?)
    } else {
        Box::new(BasicDepay::from_media(media)?)
    };
    Ok(depay)
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::message::RtpMessage;
    use crate::protocol::rtp::RtpHeader;

    pub fn rtp_packet(pt: u8, marker: bool, timestamp: u32, payload: &[u8]) -> RtpMessage {
        let header = RtpHeader {
            version: 2,
            padding: false,
            extension: false,
            csrc_count: 0,
            marker,
            payload_type: pt,
            sequence_number: 0,
            timestamp,
            ssrc: 0x1234,
        };
        let mut data = header.write().to_vec();
        data.extend_from_slice(payload);
        RtpMessage::new(0, data)
    }
}
