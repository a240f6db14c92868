//! Splits an ISO BMFF byte stream back into top-level boxes.
//!
//! Only the boxes of an ISO BMFF byte stream (ISO/IEC 14496-12 §8.16) are
//! forwarded: `ftyp` and `moov` for the init segment, then `styp`, `moof`
//! and `mdat` per fragment. `ftyp` is held back and emitted together with
//! the following `moov`, which also yields the stream's MIME type.

use crate::error::{ParseErrorKind, Result, RtspError};
use crate::message::{IsomMessage, Message};

use super::aac::{AudioSpecificConfig, config_from_esds};
use super::boxes::{BOX_HEADER_LEN, FourCC, Mp4Box};
use super::mime_type;

const BYTE_STREAM_BOXES: [&FourCC; 5] = [b"ftyp", b"moov", b"styp", b"moof", b"mdat"];

/// `size` value announcing a 64-bit size after the type.
const LARGESIZE: usize = 1;
const LARGE_HEADER_LEN: usize = 16;

/// `avc1` fields before its child boxes.
const VISUAL_SAMPLE_ENTRY_LEN: usize = 78;
/// `mp4a` fields before its child boxes.
const AUDIO_SAMPLE_ENTRY_LEN: usize = 28;

#[derive(Debug, Default)]
pub struct Mp4Parser {
    buffer: Vec<u8>,
    ftyp: Option<Vec<u8>>,
}

impl Mp4Parser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
        self.ftyp = None;
    }

    /// Append a chunk and return a message per complete box.
    ///
    /// Both 32-bit sizes and 64-bit `largesize` (size field 1) are read. A
    /// box with a size smaller than its header, including size 0 ("to end
    /// of file", meaningless in a stream), makes the rest of the buffer
    /// unusable: it is dropped and an error returned.
    pub fn parse(&mut self, chunk: &[u8]) -> Result<Vec<Message>> {
        self.buffer.extend_from_slice(chunk);
        let mut messages = Vec::new();

        while let Some((size, kind)) = Mp4Box::parse_header(&self.buffer) {
            let (size, header_len) = if size == LARGESIZE {
                let Some(large) = self.buffer.get(BOX_HEADER_LEN..LARGE_HEADER_LEN) else {
                    break;
                };
                let mut bytes = [0; 8];
                bytes.copy_from_slice(large);
                let size = usize::try_from(u64::from_be_bytes(bytes)).unwrap_or(usize::MAX);
                (size, LARGE_HEADER_LEN)
            } else {
                (size, BOX_HEADER_LEN)
            };
            if size < header_len {
                tracing::warn!(
                    kind = %String::from_utf8_lossy(&kind),
                    size,
                    "box smaller than its header, buffer dropped"
                );
                self.buffer.clear();
                return Err(RtspError::parse(ParseErrorKind::InvalidBoxSize));
            }
            if self.buffer.len() < size {
                break;
            }
            let data: Vec<u8> = self.buffer.drain(..size).collect();

            if !BYTE_STREAM_BOXES.contains(&&kind) {
                tracing::warn!(
                    kind = %String::from_utf8_lossy(&kind),
                    size,
                    "ignored non-ISO BMFF byte stream box"
                );
                continue;
            }

            match &kind {
                b"ftyp" => self.ftyp = Some(data),
                b"moov" => {
                    let mime = match Mp4Box::parse(&data) {
                        Ok(moov) => Some(mime_type(&track_codecs(&moov))),
                        Err(err) => {
                            tracing::warn!(%err, "unreadable moov, no MIME type");
                            None
                        }
                    };
                    let mut init = self.ftyp.take().unwrap_or_default();
                    init.extend_from_slice(&data);
                    messages.push(Message::Isom(IsomMessage {
                        data: init,
                        mime,
                        checkpoint_time: None,
                        ntp_timestamp: None,
                    }));
                }
                _ => messages.push(Message::Isom(IsomMessage {
                    data,
                    mime: None,
                    checkpoint_time: None,
                    ntp_timestamp: None,
                })),
            }
        }

        Ok(messages)
    }

    /// `Raw` chunks are parsed; every other message passes through.
    pub fn process(&mut self, msg: Message) -> Result<Vec<Message>> {
        match msg {
            Message::Raw(chunk) => self.parse(&chunk),
            other => Ok(vec![other]),
        }
    }
}

/// RFC 6381 codec strings for every track of a parsed `moov`.
pub fn track_codecs(moov: &Mp4Box) -> Vec<String> {
    moov.children_of_kind(b"trak")
        .filter_map(|trak| {
            let stsd = trak.find_path(&[b"mdia", b"minf", b"stbl", b"stsd"])?;
            // version/flags + entry_count precede the sample entries
            let entries = Mp4Box::parse_children(stsd.payload.get(8..)?).ok()?;
            entries.first().and_then(sample_entry_codec)
        })
        .collect()
}

fn sample_entry_codec(entry: &Mp4Box) -> Option<String> {
    match &entry.kind {
        b"avc1" => {
            let children =
                Mp4Box::parse_children(entry.payload.get(VISUAL_SAMPLE_ENTRY_LEN..)?).ok()?;
            let avcc = children.iter().find(|c| &c.kind == b"avcC")?;
            let profile = avcc.payload.get(1..4)?;
            Some(format!(
                "avc1.{:02x}{:02x}{:02x}",
                profile[0], profile[1], profile[2]
            ))
        }
        b"mp4a" => {
            let children =
                Mp4Box::parse_children(entry.payload.get(AUDIO_SAMPLE_ENTRY_LEN..)?).ok()?;
            let esds = children.iter().find(|c| &c.kind == b"esds")?;
            let config = AudioSpecificConfig::parse(config_from_esds(&esds.payload)?).ok()?;
            Some(format!("mp4a.40.{}", config.object_type))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mp4::builder::{BoxBuilder, ftyp};
    use crate::protocol::sdp::Sdp;

    const SDP: &str = "v=0\r\n\
m=video 0 RTP/AVP 96\r\n\
a=rtpmap:96 H264/90000\r\n\
a=fmtp:96 packetization-mode=1;profile-level-id=4d0029;sprop-parameter-sets=Z00AKeKQDwBE/LgLcBAQGkHiRFQ=,aO48gA==\r\n\
m=audio 0 RTP/AVP 97\r\n\
a=rtpmap:97 MPEG4-GENERIC/16000/1\r\n\
a=fmtp:97 streamtype=5;config=1408;sizelength=13;indexlength=3;indexdeltalength=3\r\n";

    fn init_segment() -> Vec<u8> {
        let mut builder = BoxBuilder::new();
        let moov = builder.moov(&Sdp::parse(SDP).unwrap(), 0);
        let mut data = ftyp().to_bytes();
        moov.write_to(&mut data);
        data
    }

    #[test]
    fn init_segment_yields_mime() {
        let data = init_segment();
        let mut parser = Mp4Parser::new();
        let messages = parser.parse(&data).unwrap();
        match &messages[..] {
            [Message::Isom(isom)] => {
                assert_eq!(isom.data, data);
                assert_eq!(
                    isom.mime.as_deref(),
                    Some(r#"video/mp4; codecs="avc1.4d0029, mp4a.40.2""#)
                );
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn boxes_split_across_chunks() {
        let mut builder = BoxBuilder::new();
        builder.moov(&Sdp::parse(SDP).unwrap(), 0);
        let mut data = builder.moof(96, 0, 3, true).unwrap().to_bytes();
        BoxBuilder::mdat(&[1, 2, 3]).write_to(&mut data);

        let mut parser = Mp4Parser::new();
        let mut messages = Vec::new();
        for chunk in data.chunks(7) {
            messages.extend(parser.parse(chunk).unwrap());
        }
        assert_eq!(messages.len(), 2);
        assert!(matches!(&messages[1], Message::Isom(m) if m.data == vec![0, 0, 0, 11, b'm', b'd', b'a', b't', 1, 2, 3]));
        assert_eq!(parser.buffered(), 0);
    }

    #[test]
    fn unknown_boxes_are_dropped() {
        let mut data = Mp4Box::leaf(b"free", vec![0; 4]).to_bytes();
        BoxBuilder::mdat(&[9]).write_to(&mut data);
        let mut parser = Mp4Parser::new();
        let messages = parser.parse(&data).unwrap();
        assert_eq!(messages.len(), 1);
        assert!(matches!(&messages[0], Message::Isom(m) if m.data.ends_with(b"mdat\x09")));
    }

    #[test]
    fn invalid_size_resets() {
        let mut parser = Mp4Parser::new();
        assert!(parser.parse(&[0, 0, 0, 4, b'm', b'o', b'o', b'f']).is_err());
        assert_eq!(parser.buffered(), 0);
        assert!(parser.parse(&[0, 0, 0, 0, b'm', b'd', b'a', b't']).is_err());
        assert_eq!(parser.buffered(), 0);
    }

    #[test]
    fn largesize_box() {
        let mut data = vec![0, 0, 0, 1, b'm', b'd', b'a', b't', 0, 0, 0, 0, 0, 0, 0, 20, 1, 2, 3, 4];
        data.extend_from_slice(&BoxBuilder::mdat(&[5]).to_bytes());

        let mut parser = Mp4Parser::new();
        assert!(parser.parse(&data[..12]).unwrap().is_empty());
        let messages = parser.parse(&data[12..]).unwrap();
        assert_eq!(messages.len(), 2);
        assert!(matches!(&messages[0], Message::Isom(m) if m.data == data[..20]));
        assert_eq!(parser.buffered(), 0);

        let mut parser = Mp4Parser::new();
        let short = [0, 0, 0, 1, b'm', b'd', b'a', b't', 0, 0, 0, 0, 0, 0, 0, 8];
        assert!(matches!(
            parser.parse(&short),
            Err(RtspError::Parse {
                kind: ParseErrorKind::InvalidBoxSize
            })
        ));
    }

    #[test]
    fn non_raw_messages_pass_through() {
        let mut parser = Mp4Parser::new();
        let out = parser.process(Message::Sdp(Sdp::default())).unwrap();
        assert!(matches!(&out[..], [Message::Sdp(_)]));
    }
}
