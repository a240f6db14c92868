use crate::error::{ParseErrorKind, Result, RtspError};

/// A parsed RTSP response (RFC 2326 §7).
///
/// ```text
/// RTSP/1.0 200 OK\r\n
/// CSeq: 1\r\n
/// Session: Bk48Ak7wjcWaAgRD; timeout=60\r\n
/// Content-Length: 142\r\n
/// \r\n
/// v=0\r\n...
/// ```
///
/// Header lookup is case-insensitive per RFC 2326 §4.2. The accessor
/// helpers below read the headers the client session reacts to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtspResponse {
    pub status_code: u16,
    pub status_text: String,
    /// Headers as ordered (name, value) pairs, names stored as received.
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

impl RtspResponse {
    /// Parse a complete response: status line, headers, blank line and an
    /// optional body. Returns [`RtspError::Parse`] on malformed input.
    pub fn parse(raw: &str) -> Result<Self> {
        let (head, body) = match body_offset(raw.as_bytes()) {
            Some(offset) => (&raw[..offset], &raw[offset..]),
            None => (raw, ""),
        };
        let mut lines = head.lines();

        let status_line = lines
            .next()
            .filter(|l| !l.is_empty())
            .ok_or(RtspError::parse(ParseErrorKind::EmptyMessage))?;
        let status_code = status_code(status_line)?;
        let status_text = status_line
            .splitn(3, ' ')
            .nth(2)
            .unwrap_or_default()
            .trim()
            .to_string();

        let mut headers = Vec::new();
        for line in lines {
            if line.trim().is_empty() {
                break;
            }
            let (name, value) = line
                .split_once(':')
                .ok_or(RtspError::parse(ParseErrorKind::InvalidHeader))?;
            headers.push((name.trim().to_string(), value.trim().to_string()));
        }

        Ok(RtspResponse {
            status_code,
            status_text,
            headers,
            body: (!body.is_empty()).then(|| body.to_string()),
        })
    }

    /// Look up a header value by name (case-insensitive, per RFC 2326 §4.2).
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// The CSeq echoed by the server (RFC 2326 §12.17).
    pub fn cseq(&self) -> Option<u32> {
        self.get_header("CSeq").and_then(|v| v.trim().parse().ok())
    }

    /// Session identifier, the part of the `Session` header before any
    /// `;timeout=` parameter (RFC 2326 §12.37).
    pub fn session_id(&self) -> Option<&str> {
        self.get_header("Session")
            .and_then(|v| v.split(';').next())
            .map(str::trim)
            .filter(|id| !id.is_empty())
    }

    /// Session timeout in seconds, if the server advertised one.
    pub fn session_timeout(&self) -> Option<u64> {
        self.get_header("Session")?
            .split(';')
            .skip(1)
            .find_map(|p| p.trim().strip_prefix("timeout="))
            .and_then(|t| t.trim().parse().ok())
    }

    /// Whether the server will close the connection after this response
    /// (RFC 2326 §12.10).
    pub fn connection_ended(&self) -> bool {
        self.get_header("Connection")
            .is_some_and(|v| v.trim().eq_ignore_ascii_case("close"))
    }

    pub fn content_base(&self) -> Option<&str> {
        self.get_header("Content-Base")
    }

    /// Playback range from `Range: npt=<start>-[<end>]` (RFC 2326 §3.6).
    pub fn range(&self) -> Option<(String, Option<String>)> {
        let npt = self.get_header("Range")?.trim().strip_prefix("npt=")?;
        let (start, end) = npt.split_once('-')?;
        let end = end.trim();
        Some((
            start.trim().to_string(),
            (!end.is_empty()).then(|| end.to_string()),
        ))
    }
}

/// Status code from an `RTSP/1.0 <code> <reason>` status line.
pub fn status_code(status_line: &str) -> Result<u16> {
    let mut parts = status_line.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some(version), Some(code)) if version.starts_with("RTSP/") => code
            .parse()
            .map_err(|_| RtspError::parse(ParseErrorKind::InvalidStatusLine)),
        _ => Err(RtspError::parse(ParseErrorKind::InvalidStatusLine)),
    }
}

/// Offset of the first body byte: the earliest of `\r\n\r\n`, `\n\n`
/// or `\r\r`, plus the separator length.
pub fn body_offset(data: &[u8]) -> Option<usize> {
    [&b"\r\n\r\n"[..], b"\n\n", b"\r\r"]
        .iter()
        .filter_map(|sep| {
            data.windows(sep.len())
                .position(|w| w == *sep)
                .map(|pos| pos + sep.len())
        })
        .min()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SETUP: &str = "RTSP/1.0 200 OK\r\n\
CSeq: 1\r\n\
Transport: RTP/AVP;unicast;client_port=40472-40473;server_port=50000-50001\r\n\
Server: GStreamer RTSP server\r\n\
Session: Bk48Ak7wjcWaAgRD; timeout=60\r\n\r\n";

    #[test]
    fn parse_setup_response() {
        let resp = RtspResponse::parse(SETUP).unwrap();
        assert_eq!(resp.status_code, 200);
        assert_eq!(resp.status_text, "OK");
        assert_eq!(resp.cseq(), Some(1));
        assert_eq!(resp.session_id(), Some("Bk48Ak7wjcWaAgRD"));
        assert_eq!(resp.session_timeout(), Some(60));
        assert!(resp.body.is_none());
        assert!(!resp.connection_ended());
    }

    #[test]
    fn header_lookup_case_insensitive() {
        let resp = RtspResponse::parse("RTSP/1.0 200 OK\r\ncseq: 42\r\n\r\n").unwrap();
        assert_eq!(resp.get_header("CSeq"), Some("42"));
        assert_eq!(resp.get_header("CSEQ"), Some("42"));
    }

    #[test]
    fn parse_body() {
        let raw = "RTSP/1.0 200 OK\r\nCSeq: 2\r\nContent-Length: 5\r\n\r\nv=0\r\n";
        let resp = RtspResponse::parse(raw).unwrap();
        assert_eq!(resp.body.as_deref(), Some("v=0\r\n"));
    }

    #[test]
    fn range_open_and_closed() {
        let open = RtspResponse::parse("RTSP/1.0 200 OK\r\nRange: npt=678-\r\n\r\n").unwrap();
        assert_eq!(open.range(), Some(("678".to_string(), None)));
        let closed =
            RtspResponse::parse("RTSP/1.0 200 OK\r\nRange: npt=0.5-10.25\r\n\r\n").unwrap();
        assert_eq!(
            closed.range(),
            Some(("0.5".to_string(), Some("10.25".to_string())))
        );
    }

    #[test]
    fn connection_close() {
        let resp = RtspResponse::parse("RTSP/1.0 200 OK\r\nConnection: Close\r\n\r\n").unwrap();
        assert!(resp.connection_ended());
    }

    #[test]
    fn status_codes() {
        assert_eq!(status_code("RTSP/1.0 401 Unauthorized").unwrap(), 401);
        assert!(status_code("HTTP/1.1 abc").is_err());
        assert!(RtspResponse::parse("").is_err());
        assert!(RtspResponse::parse("RTSP/1.0 200 OK\r\nno colon\r\n\r\n").is_err());
    }

    #[test]
    fn body_offset_picks_earliest_separator() {
        assert_eq!(body_offset(b"A\r\n\r\nbody"), Some(5));
        assert_eq!(body_offset(b"A\n\nbody\r\n\r\n"), Some(3));
        assert_eq!(body_offset(b"no separator"), None);
    }
}
