use std::sync::Arc;

use crate::error::{Result, RtspError};
use crate::message::{Message, RtpMessage, XmlMessage};
use crate::protocol::rtp;
use crate::protocol::sdp::MediaDescription;

use super::Depacketizer;

pub const ONVIF_METADATA: &str = "VND.ONVIF.METADATA";

/// Callback that takes metadata documents out of the pipeline. Shared, so
/// the depacketizers rebuilt for each new SDP keep delivering to it.
pub type XmlHandler = Arc<dyn Fn(XmlMessage) + Send + Sync>;

/// ONVIF metadata depacketizer (ONVIF Streaming Spec §5.2.1.1).
///
/// XML over RTP uses the marker bit to flag the last fragment of a
/// document. With a handler installed, documents go to the handler and
/// nothing is emitted downstream.
pub struct OnvifDepay {
    payload_type: u8,
    buffer: Vec<u8>,
    handler: Option<XmlHandler>,
}

impl OnvifDepay {
    pub fn new(payload_type: u8) -> Self {
        Self {
            payload_type,
            buffer: Vec::new(),
            handler: None,
        }
    }

    pub fn with_handler(mut self, handler: XmlHandler) -> Self {
        self.handler = Some(handler);
        self
    }
}

impl Depacketizer for OnvifDepay {
    fn accepts(media: &MediaDescription) -> bool {
        media.media_type == "application" && media.encoding_name() == Some(ONVIF_METADATA)
    }

    fn from_media(media: &MediaDescription) -> Result<Self> {
        let pt = media
            .payload_type()
            .ok_or_else(|| RtspError::MissingPayloadType(ONVIF_METADATA.to_string()))?;
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
        if !packet.marker() || self.buffer.is_empty() {
            return Vec::new();
        }

        let xml = XmlMessage {
            data: std::mem::take(&mut self.buffer),
            timestamp: packet.timestamp().unwrap_or(0),
            ntp_timestamp: packet.ntp_timestamp,
            payload_type: self.payload_type,
        };
        match &self.handler {
            Some(handler) => {
                handler(xml);
                Vec::new()
            }
            None => vec![Message::Xml(xml)],
        }
    }

    fn reset(&mut self) {
        self.buffer.clear();
    }

    fn set_xml_handler(&mut self, handler: XmlHandler) {
        self.handler = Some(handler);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::prelude::{BASE64_STANDARD, Engine as _};
    use std::sync::atomic::{AtomicUsize, Ordering};

    const RTP1: &str = concat!(
        "gGIrsXKxrCZG6KGHPD94bWwgdmVyc2lvbj0iMS4wIiBlbmNvZGluZ",
        "z0iVVRGLTgiPz4KPHR0Ok1ldGFkYXRhU3RyZWFtIHhtbG5zOnR0PSJodHRwOi8vd3d3Lm9u",
        "dmlmLm9yZy92ZXIxMC9zY2hlbWEiPgo8dHQ6UFRaPgo8dHQ6UFRaU3RhdHVzPgogIDx0dDp",
        "VdGNUaW1lPjIwMTctMDMtMjlUMTI6MTU6MzEuNjEwMDIwWjwvdHQ6VXRjVGltZT4KPC90dDpQVFpTdGF0dXM="
    );
    const RTP2: &str = "gOIrsnKxrCZG6KGHL3R0OlBUWj4KPC90dDpNZXRhZGF0YVN0cmVhbT4K";
    const XML: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
<tt:MetadataStream xmlns:tt=\"http://www.onvif.org/ver10/schema\">\n\
<tt:PTZ>\n\
<tt:PTZStatus>\n  \
<tt:UtcTime>2017-03-29T12:15:31.610020Z</tt:UtcTime>\n\
</tt:PTZStatus/tt:PTZ>\n\
</tt:MetadataStream>\n";

    fn packet(b64: &str) -> RtpMessage {
        RtpMessage::new(4, BASE64_STANDARD.decode(b64).unwrap())
    }

    #[test]
    fn xml_split_across_two_packets() {
        let mut depay = OnvifDepay::new(98);
        assert!(depay.depay(&packet(RTP1)).is_empty());
        let out = depay.depay(&packet(RTP2));
        match &out[..] {
            [Message::Xml(xml)] => {
                assert_eq!(String::from_utf8_lossy(&xml.data), XML);
                assert_eq!(xml.payload_type, 98);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn handler_bypasses_pipeline() {
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        let mut depay = OnvifDepay::new(98).with_handler(Arc::new(move |xml: XmlMessage| {
            counter.fetch_add(xml.data.len(), Ordering::SeqCst);
        }));
        depay.depay(&packet(RTP1));
        assert!(depay.depay(&packet(RTP2)).is_empty());
        assert_eq!(seen.load(Ordering::SeqCst), XML.len());
    }
}
