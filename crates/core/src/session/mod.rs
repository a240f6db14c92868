//! Client-side RTSP session (RFC 2326 §A.1).
//!
//! The session is sans-IO: it consumes parsed responses and media from the
//! [`InterleavedParser`](crate::protocol::InterleavedParser) and produces
//! requests for the caller to write to the socket
//! ([`RtspSession::take_outgoing`]), events for the application
//! ([`RtspSession::poll_event`]), and timers to arm
//! ([`SessionEvent::Timer`]).
//!
//! ## Command queue
//!
//! Commands are queued and sent strictly one at a time. The next command
//! leaves only once the response to the previous one has arrived.
//!
//! ```text
//! play()  (idle)    OPTIONS, DESCRIBE
//! DESCRIBE 200      SETUP per media (interleaved=2i-2i+1), PLAY
//! pause()           PAUSE
//! play()  (paused)  PLAY
//! stop()            TEARDOWN, or drop the queue if there is no session
//! ```
//!
//! ## Timing
//!
//! RTCP sender reports map RTP time to wall-clock time per channel. Every
//! RTP packet that follows one gets an `ntp_timestamp` in Unix milliseconds:
//!
//! ```text
//! ntp = (rtp_ts - sr_rtp_ts) as i32 / clock_rate * 1000 + sr_ntp_ms
//! ```

pub mod config;
pub mod retry;

use std::collections::{HashMap, VecDeque};

use crate::error::{Result, RtspError};
use crate::message::{Message, RtcpMessage, RtpMessage, RtspMessage};
use crate::protocol::ntp::ntp_to_millis;
use crate::protocol::rtcp::{self, SenderReport};
use crate::protocol::sdp::Sdp;
use crate::protocol::{Authenticator, Method, RtspRequest, RtspResponse};

pub use config::SessionConfig;
pub use retry::{NoRetry, RetryDecision, RetryPolicy, StatusRetry};

/// Session timeout assumed when the server does not advertise one
/// (RFC 2326 §12.37).
pub const DEFAULT_SESSION_TIMEOUT_SECS: u64 = 60;
/// Lower bound for the renewal interval.
pub const MIN_RENEW_INTERVAL_SECS: u64 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Playing,
    Paused,
}

/// `npt` start and optional end from a PLAY response.
pub type PlayRange = (String, Option<String>);

/// A timer the caller should arm and hand back to [`RtspSession::fire`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionTimer {
    /// Send a keepalive so the server does not expire the session.
    Renew { after_secs: u64 },
    /// Resend the command that failed with a retryable status.
    Retry { after_ms: u64 },
}

#[derive(Debug)]
pub enum SessionEvent {
    Sdp(Sdp),
    Play(Option<PlayRange>),
    Error(RtspError),
    Timer(SessionTimer),
}

#[derive(Debug, Clone)]
struct Command {
    method: Method,
    uri: Option<String>,
    headers: Vec<(String, String)>,
}

impl Command {
    fn new(method: Method) -> Self {
        Self {
            method,
            uri: None,
            headers: Vec::new(),
        }
    }

    fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }
}

#[derive(Debug)]
struct InFlight {
    command: Command,
    request: RtspRequest,
    /// Retries already made for a retryable status.
    attempt: u32,
}

/// RTP channel → timing reference from the latest sender report.
#[derive(Debug, Clone, Copy)]
struct SyncPoint {
    rtp_timestamp: u32,
    ntp_millis: f64,
}

#[derive(Debug)]
pub struct RtspSession {
    config: SessionConfig,
    uri: String,
    state: SessionState,
    start_time: f64,
    cseq: u32,
    queue: VecDeque<Command>,
    in_flight: Option<InFlight>,
    /// A command waiting for its retry timer.
    pending_retry: Option<(Command, u32)>,
    session_id: Option<String>,
    content_base: Option<String>,
    renew_interval: Option<u64>,
    authenticator: Option<Authenticator>,
    clock_rates: HashMap<u8, u32>,
    sync: HashMap<u8, SyncPoint>,
    outgoing: VecDeque<RtspRequest>,
    events: VecDeque<SessionEvent>,
}

impl RtspSession {
    pub fn new(config: SessionConfig) -> Result<Self> {
        config.validate()?;
        let uri = config.resolve_uri()?;
        Ok(Self {
            config,
            uri,
            state: SessionState::Idle,
            start_time: 0.0,
            cseq: 1,
            queue: VecDeque::new(),
            in_flight: None,
            pending_retry: None,
            session_id: None,
            content_base: None,
            renew_interval: None,
            authenticator: None,
            clock_rates: HashMap::new(),
            sync: HashMap::new(),
            outgoing: VecDeque::new(),
            events: VecDeque::new(),
        })
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Seconds between keepalives, while renewal is armed.
    pub fn renew_interval(&self) -> Option<u64> {
        self.renew_interval
    }

    /// Whether a request is waiting for its response.
    pub fn is_waiting(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Requests to write to the server, in order.
    pub fn take_outgoing(&mut self) -> Vec<RtspRequest> {
        self.outgoing.drain(..).collect()
    }

    pub fn poll_event(&mut self) -> Option<SessionEvent> {
        self.events.pop_front()
    }

    /// Start playback, at `start_time` seconds when starting from idle.
    pub fn play(&mut self, start_time: Option<f64>) {
        match self.state {
            SessionState::Idle => {
                self.start_time = start_time.filter(|t| t.is_finite()).unwrap_or(0.0);
                self.enqueue(Command::new(Method::Options));
                self.enqueue(Command::new(Method::Describe));
            }
            SessionState::Paused => self.enqueue(Command::new(Method::Play)),
            SessionState::Playing => {}
        }
        self.set_state(SessionState::Playing);
        self.dequeue();
    }

    pub fn pause(&mut self) {
        self.enqueue(Command::new(Method::Pause));
        self.set_state(SessionState::Paused);
        self.dequeue();
    }

    /// Tear down the session, or cancel queued commands if there is none.
    pub fn stop(&mut self) {
        if self.session_id.is_some() {
            self.enqueue(Command::new(Method::Teardown));
        } else {
            self.queue.clear();
        }
        self.pending_retry = None;
        self.renew_interval = None;
        self.set_state(SessionState::Idle);
        self.dequeue();
    }

    /// Execute an expired timer.
    pub fn fire(&mut self, timer: SessionTimer) {
        match timer {
            SessionTimer::Renew { .. } => self.renew(),
            SessionTimer::Retry { .. } => self.retry_now(),
        }
    }

    /// Resend the command waiting for a retry.
    pub fn retry_now(&mut self) {
        let Some((command, attempt)) = self.pending_retry.take() else {
            tracing::debug!("no command to retry");
            return;
        };
        if self.in_flight.is_some() {
            self.queue.push_front(command);
            return;
        }
        self.send(command, attempt);
    }

    /// Drop all in-flight state when the connection goes away.
    pub fn end(&mut self) {
        self.queue.clear();
        self.in_flight = None;
        self.pending_retry = None;
        self.renew_interval = None;
        self.sync.clear();
        self.session_id = None;
        self.set_state(SessionState::Idle);
    }

    /// Consume one message from the demultiplexer.
    ///
    /// Responses are absorbed (a DESCRIBE body comes back as
    /// [`Message::Sdp`]); RTP gets its NTP timestamp; everything else
    /// passes through.
    pub fn process(&mut self, msg: Message) -> Result<Vec<Message>> {
        match msg {
            Message::Rtsp(RtspMessage::Response(response)) => {
                Ok(self.on_response(response).map(Message::Sdp).into_iter().collect())
            }
            Message::Rtp(mut rtp) => {
                self.add_ntp_timestamp(&mut rtp);
                Ok(vec![Message::Rtp(rtp)])
            }
            Message::Rtcp(rtcp) => {
                self.on_rtcp(&rtcp);
                Ok(vec![Message::Rtcp(rtcp)])
            }
            other => Ok(vec![other]),
        }
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            tracing::debug!(old_state = ?self.state, new_state = ?state, "session state");
            self.state = state;
        }
    }

    fn enqueue(&mut self, command: Command) {
        tracing::debug!(method = %command.method, queued = self.queue.len() + 1, "command queued");
        self.queue.push_back(command);
    }

    fn dequeue(&mut self) {
        if self.in_flight.is_some() || self.pending_retry.is_some() {
            return;
        }
        if let Some(command) = self.queue.pop_front() {
            self.send(command, 0);
        }
    }

    fn next_cseq(&mut self) -> u32 {
        let cseq = self.cseq;
        self.cseq = self.cseq.wrapping_add(1);
        cseq
    }

    fn build_request(&mut self, command: &Command) -> RtspRequest {
        let uri = command.uri.as_deref().unwrap_or(&self.uri).to_string();
        let mut request =
            RtspRequest::new(command.method, &uri).add_header("CSeq", &self.next_cseq().to_string());
        for (name, value) in self.config.headers_for(command.method) {
            request.set_header(name, value);
        }
        for (name, value) in &command.headers {
            request.set_header(name, value);
        }
        if let Some(id) = &self.session_id {
            request.set_header("Session", id);
        }
        if let (Some(auth), Some(credentials)) =
            (self.authenticator.as_mut(), self.config.credentials.as_ref())
        {
            let authorization = auth.authorization(credentials, command.method.as_str(), &uri, b"");
            request.set_header("Authorization", &authorization);
        }
        request
    }

    fn send(&mut self, command: Command, attempt: u32) {
        let request = self.build_request(&command);
        tracing::debug!(
            method = %request.method,
            uri = %request.uri,
            cseq = request.cseq(),
            "request sent"
        );
        self.outgoing.push_back(request.clone());
        self.in_flight = Some(InFlight {
            command,
            request,
            attempt,
        });
    }

    fn report(&mut self, err: RtspError) {
        tracing::error!(%err, "session error");
        self.events.push_back(SessionEvent::Error(err));
    }

    fn on_response(&mut self, response: RtspResponse) -> Option<Sdp> {
        let Some(in_flight) = self.in_flight.take() else {
            tracing::warn!(status = response.status_code, "ignored unsolicited response");
            return None;
        };
        let method = in_flight.command.method;
        let ended = response.connection_ended();
        tracing::debug!(%method, status = response.status_code, cseq = response.cseq(), "response");

        if response.status_code == 401 && self.answer_challenge(&in_flight, &response) {
            return None;
        }

        if self.session_id.is_none() && !ended {
            if let Some(id) = response.session_id() {
                let timeout = response
                    .session_timeout()
                    .unwrap_or(DEFAULT_SESSION_TIMEOUT_SECS);
                tracing::info!(session_id = %id, timeout, "session established");
                self.session_id = Some(id.to_string());
                self.arm_renewal(timeout);
            }
        }
        if self.content_base.is_none() {
            self.content_base = response.content_base().map(str::to_string);
        }

        let mut sdp = None;
        if response.status_code >= 400 {
            let decision = self
                .config
                .retry
                .on_status(method, response.status_code, in_flight.attempt);
            match decision {
                RetryDecision::Retry { delay_ms } => {
                    self.pending_retry = Some((in_flight.command, in_flight.attempt + 1));
                    self.events
                        .push_back(SessionEvent::Timer(SessionTimer::Retry { after_ms: delay_ms }));
                    return None;
                }
                RetryDecision::GiveUp => self.report(RtspError::Status {
                    code: response.status_code,
                    method: method.to_string(),
                }),
            }
        } else {
            match method {
                Method::Play => {
                    let range = response.range();
                    tracing::info!(?range, "playing");
                    self.events.push_back(SessionEvent::Play(range));
                }
                Method::Describe => sdp = self.on_describe(&response),
                Method::Teardown => {
                    tracing::info!(session_id = ?self.session_id, "session torn down");
                    self.session_id = None;
                    self.renew_interval = None;
                }
                _ => {}
            }
        }

        if ended {
            tracing::info!(session_id = ?self.session_id, status = response.status_code, "connection closed by server");
            self.session_id = None;
        }

        self.dequeue();
        sdp
    }

    /// Resend a 401'd request with credentials. `false` when the challenge
    /// cannot be answered; the 401 is then handled like any error status.
    fn answer_challenge(&mut self, in_flight: &InFlight, response: &RtspResponse) -> bool {
        if in_flight.request.get_header("Authorization").is_some() {
            tracing::warn!(method = %in_flight.command.method, "credentials rejected");
            return false;
        }
        if self.config.credentials.is_none() {
            return false;
        }
        let Some(challenge) = response.get_header("WWW-Authenticate") else {
            return false;
        };
        match Authenticator::from_challenge(challenge) {
            Ok(auth) => {
                tracing::debug!(method = %in_flight.command.method, "answering authentication challenge");
                self.authenticator = Some(auth);
                self.send(in_flight.command.clone(), in_flight.attempt);
                true
            }
            Err(err) => {
                tracing::warn!(%err, "cannot answer authentication challenge");
                self.report(err);
                false
            }
        }
    }

    fn on_describe(&mut self, response: &RtspResponse) -> Option<Sdp> {
        let body = response.body.as_deref()?;
        match Sdp::parse(body) {
            Ok(sdp) => {
                tracing::info!(media = sdp.media.len(), "SDP received");
                self.setup_media(&sdp);
                self.events.push_back(SessionEvent::Sdp(sdp.clone()));
                Some(sdp)
            }
            Err(err) => {
                self.report(err);
                None
            }
        }
    }

    fn setup_media(&mut self, sdp: &Sdp) {
        self.clock_rates.clear();
        self.sync.clear();

        for (index, media) in sdp.media.iter().enumerate() {
            let Some(clock_rate) = media.clock_rate() else {
                tracing::warn!(media = %media.media_type, "media without rtpmap skipped");
                continue;
            };
            let Ok(rtp) = u8::try_from(index * 2) else {
                self.report(RtspError::InvalidConfig(format!(
                    "no interleaved channel left for media {index}"
                )));
                break;
            };
            let rtcp = rtp + 1;
            let uri = match self.control_uri(media.control.as_deref()) {
                Ok(uri) => uri,
                Err(err) => {
                    self.report(err);
                    continue;
                }
            };
            self.clock_rates.insert(rtp, clock_rate);
            let mut command = Command::new(Method::Setup).header(
                "Transport",
                &format!("RTP/AVP/TCP;unicast;interleaved={rtp}-{rtcp}"),
            );
            command.uri = Some(uri);
            self.enqueue(command);
        }

        if self.state == SessionState::Playing {
            self.enqueue(
                Command::new(Method::Play).header("Range", &format!("npt={}-", self.start_time)),
            );
        }
    }

    /// Resolve a media `a=control` against Content-Base (RFC 2326 §C.1.1).
    fn control_uri(&self, control: Option<&str>) -> Result<String> {
        let base = self.content_base.as_deref().unwrap_or(&self.uri);
        match control {
            None | Some("*") => Ok(base.to_string()),
            Some(control) => match url::Url::parse(control) {
                Ok(absolute) => Ok(absolute.to_string()),
                Err(url::ParseError::RelativeUrlWithoutBase) => {
                    Ok(url::Url::parse(base)?.join(control)?.to_string())
                }
                Err(err) => Err(err.into()),
            },
        }
    }

    fn arm_renewal(&mut self, timeout: u64) {
        let interval = timeout.saturating_sub(5).max(MIN_RENEW_INTERVAL_SECS);
        tracing::debug!(interval, "session renewal armed");
        self.renew_interval = Some(interval);
        self.events.push_back(SessionEvent::Timer(SessionTimer::Renew {
            after_secs: interval,
        }));
    }

    fn renew(&mut self) {
        let Some(interval) = self.renew_interval else {
            return;
        };
        if self.session_id.is_none() {
            self.renew_interval = None;
            return;
        }
        self.enqueue(Command::new(self.config.keepalive));
        self.dequeue();
        self.events.push_back(SessionEvent::Timer(SessionTimer::Renew {
            after_secs: interval,
        }));
    }

    fn on_rtcp(&mut self, msg: &RtcpMessage) {
        match rtcp::packet_type(&msg.data) {
            Some(rtcp::PT_SR) => match SenderReport::parse(&msg.data) {
                Ok(sr) => {
                    let channel = msg.channel.wrapping_sub(1);
                    let sync = SyncPoint {
                        rtp_timestamp: sr.rtp_timestamp,
                        ntp_millis: ntp_to_millis(sr.ntp_most, sr.ntp_least),
                    };
                    tracing::trace!(channel, ntp = sync.ntp_millis, "sender report");
                    self.sync.insert(channel, sync);
                }
                Err(err) => tracing::warn!(%err, "unreadable sender report"),
            },
            Some(rtcp::PT_BYE) => {
                tracing::info!(channel = msg.channel, "RTCP BYE");
                self.renew_interval = None;
            }
            _ => {}
        }
    }

    fn add_ntp_timestamp(&self, msg: &mut RtpMessage) {
        let (Some(sync), Some(&clock_rate), Some(timestamp)) = (
            self.sync.get(&msg.channel),
            self.clock_rates.get(&msg.channel),
            msg.timestamp(),
        ) else {
            return;
        };
        if clock_rate == 0 {
            return;
        }
        let delta = timestamp.wrapping_sub(sync.rtp_timestamp) as i32;
        msg.ntp_timestamp = Some(delta as f64 / clock_rate as f64 * 1000.0 + sync.ntp_millis);
    }
}
