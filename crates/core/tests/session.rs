//! Session behaviour driven through the interleaved parser, the way bytes
//! arrive from a socket.

use rtsp::RtspError;
use rtsp::message::Message;
use rtsp::protocol::auth::{Challenge, DigestAuth};
use rtsp::protocol::{Credentials, InterleavedParser, Method, RtspRequest};
use rtsp::session::{
    RtspSession, SessionConfig, SessionEvent, SessionState, SessionTimer, StatusRetry,
};

const SDP: &str = "v=0\r\n\
o=- 1 1 IN IP4 10.0.0.5\r\n\
s=Camera\r\n\
t=0 0\r\n\
m=video 0 RTP/AVP 96\r\n\
a=rtpmap:96 H264/90000\r\n\
a=control:trackID=1\r\n";

struct Client {
    parser: InterleavedParser,
    session: RtspSession,
}

impl Client {
    fn new(config: SessionConfig) -> Self {
        Self {
            parser: InterleavedParser::new(),
            session: RtspSession::new(config).unwrap(),
        }
    }

    fn receive(&mut self, bytes: &str) -> Vec<Message> {
        let mut out = Vec::new();
        for msg in self.parser.parse(bytes.as_bytes()).unwrap() {
            out.extend(self.session.process(msg).unwrap());
        }
        out
    }

    fn sent(&mut self) -> Vec<RtspRequest> {
        self.session.take_outgoing()
    }

    fn events(&mut self) -> Vec<SessionEvent> {
        std::iter::from_fn(|| self.session.poll_event()).collect()
    }
}

fn ok(cseq: u32, extra: &str) -> String {
    format!("RTSP/1.0 200 OK\r\nCSeq: {cseq}\r\n{extra}\r\n")
}

fn describe(cseq: u32) -> String {
    format!(
        "RTSP/1.0 200 OK\r\nCSeq: {cseq}\r\nContent-Type: application/sdp\r\nContent-Length: {}\r\n\r\n{SDP}",
        SDP.len()
    )
}

#[test]
fn digest_challenge_is_answered_and_reused() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let uri = "rtsp://10.0.0.5/axis-media/media.amp";
    let challenge = r#"Digest realm="AXIS_ACCC8E000000", nonce="0024e47aY398109708de9ccd8056c58a068a59540a99d3""#;
    let credentials = Credentials::new("root", "pass");

    let mut config = SessionConfig::with_uri(uri);
    config.credentials = Some(credentials.clone());
    let mut client = Client::new(config);

    client.session.play(None);
    let first = client.sent();
    assert_eq!(first[0].get_header("Authorization"), None);

    client.receive(&format!(
        "RTSP/1.0 401 Unauthorized\r\nCSeq: 1\r\nWWW-Authenticate: {challenge}\r\n\r\n"
    ));
    let retried = client.sent();
    assert_eq!(retried.len(), 1);
    assert_eq!(retried[0].method, Method::Options);
    assert_eq!(retried[0].cseq(), Some(2));

    // Without qop the digest does not depend on the cnonce.
    let mut digest = DigestAuth::from_challenge(&Challenge::parse(challenge).unwrap()).unwrap();
    let expected = digest.authorization_with_cnonce(&credentials, "OPTIONS", uri, b"", "");
    assert_eq!(retried[0].get_header("Authorization"), Some(expected.as_str()));

    client.receive(&ok(2, ""));
    let describe = client.sent();
    assert_eq!(describe[0].method, Method::Describe);
    let expected = digest.authorization_with_cnonce(&credentials, "DESCRIBE", uri, b"", "");
    assert_eq!(describe[0].get_header("Authorization"), Some(expected.as_str()));
    assert!(client.events().is_empty());
}

#[test]
fn rejected_credentials_are_reported() {
    let mut config = SessionConfig::with_uri("rtsp://10.0.0.5/axis-media/media.amp");
    config.credentials = Some(Credentials::new("root", "wrong"));
    let mut client = Client::new(config);
    client.session.play(None);
    client.sent();

    let unauthorized =
        "RTSP/1.0 401 Unauthorized\r\nCSeq: {}\r\nWWW-Authenticate: Basic realm=\"cam\"\r\n\r\n";
    client.receive(&unauthorized.replace("{}", "1"));
    assert_eq!(client.sent().len(), 1);
    client.receive(&unauthorized.replace("{}", "2"));

    let events = client.events();
    assert!(matches!(
        &events[..],
        [SessionEvent::Error(RtspError::Status { code: 401, .. })]
    ));
    // The queue moves on to DESCRIBE.
    assert_eq!(client.sent()[0].method, Method::Describe);
}

#[test]
fn hostname_config_without_content_base() {
    let mut config = SessionConfig::with_hostname("10.0.0.5");
    config.parameters = vec!["resolution=640x480".to_string(), "fps=15".to_string()];
    let mut client = Client::new(config);
    assert_eq!(
        client.session.uri(),
        "rtsp://10.0.0.5/axis-media/media.amp?resolution=640x480&fps=15"
    );

    client.session.play(None);
    client.sent();
    client.receive(&ok(1, ""));
    client.sent();
    let out = client.receive(&describe(2));
    assert!(matches!(&out[..], [Message::Sdp(_)]));

    // Relative control resolves against the request URI.
    let setup = client.sent();
    assert_eq!(setup[0].method, Method::Setup);
    assert_eq!(setup[0].uri, "rtsp://10.0.0.5/axis-media/trackID=1");
    assert_eq!(setup[0].get_header("Blocksize"), Some("64000"));
    assert_eq!(
        setup[0].get_header("Transport"),
        Some("RTP/AVP/TCP;unicast;interleaved=0-1")
    );
}

#[test]
fn pause_and_resume() {
    let mut client = Client::new(SessionConfig::with_uri("rtsp://10.0.0.5/media"));
    client.session.play(None);
    client.sent();
    client.receive(&ok(1, ""));
    client.sent();
    client.receive(&describe(2));
    client.sent();
    client.receive(&ok(3, "Session: 12345678;timeout=30\r\n"));
    let play = client.sent();
    assert_eq!(play[0].get_header("Range"), Some("npt=0-"));
    assert_eq!(play[0].get_header("Session"), Some("12345678"));
    client.receive(&ok(4, "Session: 12345678\r\n"));

    let events = client.events();
    assert!(events.iter().any(|e| matches!(
        e,
        SessionEvent::Timer(SessionTimer::Renew { after_secs: 25 })
    )));

    client.session.pause();
    assert_eq!(client.session.state(), SessionState::Paused);
    assert_eq!(client.sent()[0].method, Method::Pause);
    client.receive(&ok(5, ""));

    client.session.play(None);
    let resume = client.sent();
    assert_eq!(resume[0].method, Method::Play);
    assert_eq!(resume[0].get_header("Range"), None);
    assert_eq!(resume[0].cseq(), Some(6));
}

#[test]
fn unavailable_server_is_retried() {
    let mut config = SessionConfig::with_uri("rtsp://10.0.0.5/media");
    config.retry = Box::new(StatusRetry {
        max: 1,
        codes: vec![503],
        delay_ms: 250,
    });
    let mut client = Client::new(config);
    client.session.play(None);
    client.sent();

    let unavailable = "RTSP/1.0 503 Service Unavailable\r\nCSeq: {}\r\n\r\n";
    client.receive(&unavailable.replace("{}", "1"));
    assert!(client.sent().is_empty());
    let events = client.events();
    let [SessionEvent::Timer(timer)] = &events[..] else {
        panic!("expected a retry timer, got {events:?}");
    };
    assert_eq!(*timer, SessionTimer::Retry { after_ms: 250 });

    client.session.fire(*timer);
    let resent = client.sent();
    assert_eq!(resent[0].method, Method::Options);
    assert_eq!(resent[0].cseq(), Some(2));

    client.receive(&unavailable.replace("{}", "2"));
    assert!(matches!(
        &client.events()[..],
        [SessionEvent::Error(RtspError::Status { code: 503, .. })]
    ));
}
