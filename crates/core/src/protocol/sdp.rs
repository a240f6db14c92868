//! SDP (Session Description Protocol) parsing (RFC 4566 / RFC 8866).
//!
//! The DESCRIBE response body describes every track the server offers:
//!
//! ```text
//! v=0                                          ← protocol version
//! o=- 1188340656180883 1 IN IP4 192.168.0.96   ← origin
//! s=Session streamed with GStreamer            ← session name
//! t=0 0                                        ← timing (live stream)
//! a=control:rtsp://camera/media.amp            ← aggregate control URL
//! m=video 0 RTP/AVP 96                         ← media description
//! a=rtpmap:96 H264/90000                       ← codec/clock rate
//! a=fmtp:96 packetization-mode=1;...           ← codec parameters
//! a=control:stream=0                           ← track control URL
//! ```
//!
//! Only the subset needed to pick depacketizers and build MP4 sample
//! descriptions is kept. Unknown lines and attributes are ignored.

use std::collections::HashMap;

use crate::error::{ParseErrorKind, Result, RtspError};

/// A parsed session description.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Sdp {
    pub session: SessionDescription,
    pub media: Vec<MediaDescription>,
}

/// Session-level fields (before the first `m=` line).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionDescription {
    pub version: Option<u32>,
    pub origin: Option<String>,
    pub name: Option<String>,
    pub connection: Option<String>,
    pub bandwidth: Option<String>,
    pub time: Option<String>,
    /// Aggregate control URL (RFC 2326 §C.1.1).
    pub control: Option<String>,
}

/// `a=rtpmap:<pt> <encoding>/<clock>[/<params>]` (RFC 4566 §6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpMap {
    pub payload_type: u8,
    /// Upper-cased encoding name, e.g. `H264`, `MPEG4-GENERIC`.
    pub encoding_name: String,
    pub clock_rate: u32,
    /// Channel count for audio.
    pub encoding_parameters: Option<String>,
}

/// `a=fmtp:<fmt> k=v;k=v`. Keys are lower-cased.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Fmtp {
    pub format: String,
    pub parameters: HashMap<String, String>,
}

/// One `m=` section with its attributes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MediaDescription {
    /// `video`, `audio`, or `application`.
    pub media_type: String,
    pub port: u16,
    pub protocol: String,
    pub formats: Vec<String>,
    pub connection: Option<String>,
    pub bandwidth: Option<String>,
    pub rtpmap: Option<RtpMap>,
    pub fmtp: Option<Fmtp>,
    pub control: Option<String>,
    pub framerate: Option<f64>,
    /// `a=framesize:<pt> <w>-<h>`, used by the JPEG depacketizer.
    pub framesize: Option<(u32, u32)>,
    pub transform: Option<[[f64; 3]; 3]>,
    pub sensor_transform: Option<[[f64; 3]; 3]>,
}

impl MediaDescription {
    /// Payload type from the rtpmap, falling back to the first format.
    pub fn payload_type(&self) -> Option<u8> {
        self.rtpmap
            .as_ref()
            .map(|r| r.payload_type)
            .or_else(|| self.formats.first().and_then(|f| f.parse().ok()))
    }

    pub fn encoding_name(&self) -> Option<&str> {
        self.rtpmap.as_ref().map(|r| r.encoding_name.as_str())
    }

    pub fn clock_rate(&self) -> Option<u32> {
        self.rtpmap.as_ref().map(|r| r.clock_rate)
    }

    /// Look up an fmtp parameter (key is matched lower-case).
    pub fn fmtp_param(&self, key: &str) -> Option<&str> {
        self.fmtp
            .as_ref()
            .and_then(|f| f.parameters.get(&key.to_ascii_lowercase()))
            .map(String::as_str)
    }
}

impl Sdp {
    /// Parse an SDP body. Lines may end in `\r\n` or `\n`.
    pub fn parse(text: &str) -> Result<Self> {
        let mut sdp = Sdp::default();

        for line in text.lines() {
            let line = line.trim_end();
            if line.is_empty() {
                continue;
            }
            let bytes = line.as_bytes();
            if bytes.len() < 2 || bytes[1] != b'=' {
                return Err(RtspError::parse(ParseErrorKind::InvalidSdpLine));
            }
            let value = &line[2..];

            if bytes[0] == b'm' {
                sdp.media.push(parse_media_line(value)?);
                continue;
            }

            match (bytes[0], sdp.media.last_mut()) {
                (b'a', Some(media)) => parse_media_attribute(media, value),
                (b'a', None) => {
                    if let Some(control) = value.strip_prefix("control:") {
                        sdp.session.control = Some(control.to_string());
                    }
                }
                (b'c', Some(media)) => media.connection = Some(value.to_string()),
                (b'b', Some(media)) => media.bandwidth = Some(value.to_string()),
                (b'v', None) => sdp.session.version = value.parse().ok(),
                (b'o', None) => sdp.session.origin = Some(value.to_string()),
                (b's', None) => sdp.session.name = Some(value.to_string()),
                (b'c', None) => sdp.session.connection = Some(value.to_string()),
                (b'b', None) => sdp.session.bandwidth = Some(value.to_string()),
                (b't', None) => sdp.session.time = Some(value.to_string()),
                _ => {}
            }
        }

        tracing::debug!(tracks = sdp.media.len(), "SDP parsed");
        Ok(sdp)
    }

    /// The media section whose payload type is `pt`.
    pub fn media_by_payload_type(&self, pt: u8) -> Option<&MediaDescription> {
        self.media.iter().find(|m| m.payload_type() == Some(pt))
    }
}

fn parse_media_line(value: &str) -> Result<MediaDescription> {
    let mut parts = value.split_whitespace();
    let media_type = parts
        .next()
        .ok_or(RtspError::parse(ParseErrorKind::InvalidSdpLine))?;
    let port = parts
        .next()
        .and_then(|p| p.split('/').next())
        .and_then(|p| p.parse().ok())
        .ok_or(RtspError::parse(ParseErrorKind::InvalidSdpLine))?;
    let protocol = parts
        .next()
        .ok_or(RtspError::parse(ParseErrorKind::InvalidSdpLine))?;

    Ok(MediaDescription {
        media_type: media_type.to_string(),
        port,
        protocol: protocol.to_string(),
        formats: parts.map(str::to_string).collect(),
        ..Default::default()
    })
}

fn parse_media_attribute(media: &mut MediaDescription, value: &str) {
    let (name, rest) = value.split_once(':').unwrap_or((value, ""));
    match name {
        "rtpmap" => media.rtpmap = parse_rtpmap(rest),
        "fmtp" => media.fmtp = Some(parse_fmtp(rest)),
        "control" => media.control = Some(rest.to_string()),
        "framerate" => media.framerate = rest.trim().parse().ok(),
        "framesize" => {
            media.framesize = rest.split_whitespace().nth(1).and_then(|size| {
                let (w, h) = size.split_once('-')?;
                Some((w.parse().ok()?, h.parse().ok()?))
            });
        }
        "transform" => media.transform = parse_matrix(rest),
        "x-sensor-transform" => media.sensor_transform = parse_matrix(rest),
        _ => {}
    }
}

fn parse_rtpmap(value: &str) -> Option<RtpMap> {
    let (pt, encoding) = value.trim().split_once(' ')?;
    let mut fields = encoding.trim().split('/');
    let encoding_name = fields.next()?.to_ascii_uppercase();
    let clock_rate = fields.next()?.parse().ok()?;
    Some(RtpMap {
        payload_type: pt.parse().ok()?,
        encoding_name,
        clock_rate,
        encoding_parameters: fields.next().map(str::to_string),
    })
}

fn parse_fmtp(value: &str) -> Fmtp {
    let (format, params) = value.trim().split_once(' ').unwrap_or((value.trim(), ""));
    let parameters = params
        .split(';')
        .filter_map(|kv| {
            let (k, v) = kv.split_once('=')?;
            Some((k.trim().to_ascii_lowercase(), v.trim().to_string()))
        })
        .collect();
    Fmtp {
        format: format.to_string(),
        parameters,
    }
}

fn parse_matrix(value: &str) -> Option<[[f64; 3]; 3]> {
    let mut matrix = [[0.0; 3]; 3];
    let rows: Vec<&str> = value.trim().split(';').collect();
    if rows.len() != 3 {
        return None;
    }
    for (i, row) in rows.iter().enumerate() {
        let cols: Vec<&str> = row.split(',').collect();
        if cols.len() != 3 {
            return None;
        }
        for (j, col) in cols.iter().enumerate() {
            matrix[i][j] = col.trim().parse().ok()?;
        }
    }
    Some(matrix)
}
