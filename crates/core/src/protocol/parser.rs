//! Interleaved RTSP/RTP demultiplexer (RFC 2326 §10.12).
//!
//! Over TCP, RTSP responses and media share one byte stream. Media is
//! framed with a 4-byte prefix:
//!
//! ```text
//! +------+---------+----------------+----------------------+
//! | '$'  | channel | length (16 BE) | RTP or RTCP packet   |
//! +------+---------+----------------+----------------------+
//! ```
//!
//! Even channels carry RTP and odd channels carry the matching RTCP
//! (SETUP negotiates `interleaved=2i-2i+1`). Anything starting with
//! `RTSP` is a response, optionally followed by `Content-Length` bytes
//! of body.
//!
//! The parser is fed arbitrary chunks and returns every complete message;
//! partial data stays buffered until the next chunk arrives.

use crate::error::{ParseErrorKind, Result, RtspError};
use crate::message::{Message, RtcpMessage, RtpMessage, RtspMessage};
use crate::protocol::response::{RtspResponse, body_offset};
use crate::protocol::rtcp;

const INTERLEAVED_HEADER_LEN: usize = 4;
const DOLLAR: u8 = b'$';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserState {
    Idle,
    Interleaved,
    Rtsp,
}

#[derive(Debug)]
pub struct InterleavedParser {
    buffer: Vec<u8>,
    state: ParserState,
}

impl Default for InterleavedParser {
    fn default() -> Self {
        Self::new()
    }
}

impl InterleavedParser {
    pub fn new() -> Self {
        Self {
            buffer: Vec::new(),
            state: ParserState::Idle,
        }
    }

    pub fn state(&self) -> ParserState {
        self.state
    }

    /// Bytes held back waiting for the rest of a message.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Drop any partially received message.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.state = ParserState::Idle;
    }

    /// Append a chunk and extract all complete messages.
    ///
    /// Data that is neither `$`-framed nor an RTSP response is a stream
    /// integrity failure: the buffer is cleared and an error returned.
    pub fn parse(&mut self, chunk: &[u8]) -> Result<Vec<Message>> {
        self.buffer.extend_from_slice(chunk);
        let mut messages = Vec::new();

        loop {
            self.state = match self.buffer.first().copied() {
                None => ParserState::Idle,
                Some(DOLLAR) => ParserState::Interleaved,
                Some(_) if self.buffer.starts_with(b"RTSP") => ParserState::Rtsp,
                Some(_) if b"RTSP".starts_with(&self.buffer) => ParserState::Idle,
                Some(_) => {
                    tracing::warn!(bytes = self.buffer.len(), "unexpected data in RTSP stream");
                    self.reset();
                    return Err(RtspError::parse(ParseErrorKind::InvalidInterleaved));
                }
            };

            let extracted = match self.state {
                ParserState::Idle => None,
                ParserState::Interleaved => self.take_interleaved(),
                ParserState::Rtsp => self.take_rtsp()?,
            };
            match extracted {
                Some(mut batch) => messages.append(&mut batch),
                None => break,
            }
        }

        Ok(messages)
    }

    fn take_interleaved(&mut self) -> Option<Vec<Message>> {
        if self.buffer.len() < INTERLEAVED_HEADER_LEN {
            return None;
        }
        let channel = self.buffer[1];
        let length = u16::from_be_bytes([self.buffer[2], self.buffer[3]]) as usize;
        let end = INTERLEAVED_HEADER_LEN + length;
        if self.buffer.len() < end {
            return None;
        }

        let packet: Vec<u8> = self.buffer.drain(..end).skip(INTERLEAVED_HEADER_LEN).collect();
        tracing::trace!(channel, length, "interleaved packet");

        if channel % 2 == 0 {
            return Some(vec![Message::Rtp(RtpMessage::new(channel, packet))]);
        }

        let parts = rtcp::split_compound(&packet);
        if parts.is_empty() {
            tracing::warn!(channel, length, "malformed RTCP packet dropped");
        }
        Some(
            parts
                .into_iter()
                .map(|p| {
                    Message::Rtcp(RtcpMessage {
                        channel,
                        data: p.to_vec(),
                    })
                })
                .collect(),
        )
    }

    fn take_rtsp(&mut self) -> Result<Option<Vec<Message>>> {
        let Some(header_len) = body_offset(&self.buffer) else {
            return Ok(None);
        };
        let head = String::from_utf8_lossy(&self.buffer[..header_len]).into_owned();
        let parsed = RtspResponse::parse(&head).and_then(|response| {
            let body_len = match response.get_header("Content-Length") {
                Some(v) => v
                    .trim()
                    .parse::<usize>()
                    .map_err(|_| RtspError::parse(ParseErrorKind::InvalidContentLength))?,
                None => 0,
            };
            Ok((response, body_len))
        });
        let (mut response, body_len) = match parsed {
            Ok(parsed) => parsed,
            Err(err) => {
                // Skip the unreadable head so the stream can resync on
                // whatever follows it.
                tracing::warn!(%err, header_len, "malformed RTSP response dropped");
                self.buffer.drain(..header_len);
                return Err(err);
            }
        };
        if self.buffer.len() < header_len + body_len {
            return Ok(None);
        }

        let raw: Vec<u8> = self.buffer.drain(..header_len + body_len).collect();
        if body_len > 0 {
            response.body = Some(String::from_utf8_lossy(&raw[header_len..]).into_owned());
        }
        tracing::trace!(status = response.status_code, body_len, "RTSP response");

        Ok(Some(vec![Message::Rtsp(RtspMessage::Response(response))]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: [u8; 28] = [
        128, 200, 0, 6, 243, 203, 32, 1, 131, 171, 3, 161, 235, 2, 11, 58, 0, 0, 148, 32, 0, 0,
        0, 158, 0, 0, 155, 136,
    ];
    const RR: [u8; 8] = [128, 201, 0, 1, 27, 117, 249, 76];

    fn frame(channel: u8, packet: &[u8]) -> Vec<u8> {
        let mut out = vec![DOLLAR, channel];
        out.extend_from_slice(&(packet.len() as u16).to_be_bytes());
        out.extend_from_slice(packet);
        out
    }

    #[test]
    fn partial_header_is_buffered() {
        let mut parser = InterleavedParser::new();
        let messages = parser.parse(&[36, 0, 5]).unwrap();
        assert!(messages.is_empty());
        assert_eq!(parser.buffered(), 3);
        assert_eq!(parser.state(), ParserState::Interleaved);
    }

    #[test]
    fn garbage_is_rejected() {
        let mut parser = InterleavedParser::new();
        assert!(parser.parse(&[1, 2, 3]).is_err());
        assert_eq!(parser.buffered(), 0);
    }

    #[test]
    fn rtp_split_across_chunks() {
        let packet = [0x80, 0x60, 0, 1, 0, 0, 0, 0, 0, 0, 0, 1, 0xaa, 0xbb];
        let data = frame(0, &packet);
        let mut parser = InterleavedParser::new();
        assert!(parser.parse(&data[..6]).unwrap().is_empty());
        let messages = parser.parse(&data[6..]).unwrap();
        assert_eq!(messages.len(), 1);
        match &messages[0] {
            Message::Rtp(rtp) => {
                assert_eq!(rtp.channel, 0);
                assert_eq!(rtp.data, packet.to_vec());
            }
            other => panic!("expected RTP, got {other:?}"),
        }
        assert_eq!(parser.buffered(), 0);
    }

    #[test]
    fn compound_rtcp_is_split() {
        let mut compound = SR.to_vec();
        compound.extend_from_slice(&RR);
        let mut parser = InterleavedParser::new();
        let messages = parser.parse(&frame(1, &compound)).unwrap();
        assert_eq!(messages.len(), 2);
        assert!(matches!(&messages[0], Message::Rtcp(m) if m.channel == 1 && m.data == SR.to_vec()));
        assert!(matches!(&messages[1], Message::Rtcp(m) if m.data == RR.to_vec()));
    }

    #[test]
    fn response_followed_by_rtp() {
        let mut data =
            b"RTSP/1.0 200 OK\r\nCSeq: 4\r\nRange: npt=678-\r\n\r\n".to_vec();
        data.extend_from_slice(&frame(0, &[0x80, 0x60, 0, 1, 0, 0, 0, 0, 0, 0, 0, 1]));
        let mut parser = InterleavedParser::new();
        let messages = parser.parse(&data).unwrap();
        assert_eq!(messages.len(), 2);
        assert!(matches!(
            &messages[0],
            Message::Rtsp(RtspMessage::Response(r)) if r.cseq() == Some(4) && r.body.is_none()
        ));
        assert!(matches!(&messages[1], Message::Rtp(_)));
    }

    #[test]
    fn response_body_waits_for_content_length() {
        let body = "v=0\r\nm=video 0 RTP/AVP 96\r\n";
        let raw = format!(
            "RTSP/1.0 200 OK\r\nCSeq: 1\r\nContent-Length: {}\r\n\r\n{}",
            body.len(),
            body
        );
        let (first, second) = raw.as_bytes().split_at(raw.len() - 4);
        let mut parser = InterleavedParser::new();
        assert!(parser.parse(first).unwrap().is_empty());
        assert_eq!(parser.state(), ParserState::Rtsp);
        let messages = parser.parse(second).unwrap();
        match &messages[..] {
            [Message::Rtsp(RtspMessage::Response(r))] => {
                assert_eq!(r.body.as_deref(), Some(body));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn partial_rtsp_prefix_is_buffered() {
        let mut parser = InterleavedParser::new();
        assert!(parser.parse(b"RT").unwrap().is_empty());
        let messages = parser.parse(b"SP/1.0 200 OK\r\nCSeq: 1\r\n\r\n").unwrap();
        assert_eq!(messages.len(), 1);
    }

    #[test]
    fn bad_status_line_does_not_block_media() {
        let rtp = frame(0, &[0x80, 0x60, 0, 1, 0, 0, 0, 0, 0, 0, 0, 1]);
        let mut parser = InterleavedParser::new();
        assert!(parser.parse(b"RTSP/1.0 abc OK\r\nCSeq: 1\r\n\r\n").is_err());
        assert_eq!(parser.buffered(), 0);

        assert!(matches!(&parser.parse(&rtp).unwrap()[..], [Message::Rtp(_)]));
        assert!(matches!(&parser.parse(&rtp).unwrap()[..], [Message::Rtp(_)]));
        assert_eq!(parser.buffered(), 0);
    }

    #[test]
    fn bad_content_length_is_skipped() {
        let mut data = b"RTSP/1.0 200 OK\r\nCSeq: 2\r\nContent-Length: x\r\n\r\n".to_vec();
        data.extend_from_slice(&frame(0, &[0x80, 0x60, 0, 1, 0, 0, 0, 0, 0, 0, 0, 1]));
        let mut parser = InterleavedParser::new();
        assert!(matches!(
            parser.parse(&data),
            Err(RtspError::Parse {
                kind: ParseErrorKind::InvalidContentLength
            })
        ));
        assert_eq!(parser.buffered(), 16);

        let messages = parser.parse(&[]).unwrap();
        assert!(matches!(&messages[..], [Message::Rtp(_)]));
        assert_eq!(parser.buffered(), 0);
    }
}
