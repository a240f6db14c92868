//! Stage wiring and the cooperative pipeline runtime.
//!
//! ```text
//!  push(Raw)  ┌────────────┐   ┌─────────────┐   ┌──────────┐   ┌───────────┐  drain()
//! ───────────▶│ RtspParser │──▶│ RtspSession │──▶│ RtpDepay │──▶│ Mp4Muxer  │──────────▶
//!             └────────────┘   └─────────────┘   └──────────┘   └───────────┘
//! ```
//!
//! Each stage owns a bounded outbox. A stage is [`ready`](MessageConsumer::ready)
//! while its outbox has room, and [`Pipeline::drain`] only moves a message
//! into a stage that is ready, so a slow tail holds back everything
//! upstream instead of growing queues without bound. Message order is
//! preserved end to end.

pub mod capture;

use std::collections::VecDeque;

use crate::depay::RtpDepay;
use crate::error::{Result, RtspError};
use crate::message::Message;
use crate::mp4::{Mp4Muxer, Mp4Parser};
use crate::protocol::InterleavedParser;
use crate::session::RtspSession;

pub use capture::{CaptureEvent, Mp4Capture, Mp4CaptureConfig};

/// Messages a stage may hold before it stops accepting input.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

pub trait MessageProducer {
    fn poll(&mut self) -> Option<Message>;
}

pub trait MessageConsumer {
    /// Hand over one message. `false` means it was refused and the caller
    /// should retry once [`ready`](Self::ready) is true again.
    fn accept(&mut self, msg: Message) -> bool;

    fn ready(&self) -> bool;

    /// No more input will arrive: discard partial state.
    fn end(&mut self);
}

/// Logs a summary of every message and passes it on.
#[derive(Debug, Clone)]
pub struct Inspector {
    name: String,
}

impl Inspector {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }

    pub fn inspect(&self, msg: Message) -> Message {
        tracing::debug!(
            stage = %self.name,
            kind = msg.kind(),
            bytes = msg.len(),
            ntp_timestamp = ?msg.ntp_timestamp(),
            "message"
        );
        msg
    }
}

pub enum Component {
    Inspector(Inspector),
    RtspParser(InterleavedParser),
    RtspSession(Box<RtspSession>),
    RtpDepay(RtpDepay),
    Mp4Muxer(Mp4Muxer),
    Mp4Parser(Mp4Parser),
    Mp4Capture(Mp4Capture),
}

impl Component {
    pub fn name(&self) -> &'static str {
        match self {
            Component::Inspector(_) => "inspector",
            Component::RtspParser(_) => "rtsp-parser",
            Component::RtspSession(_) => "rtsp-session",
            Component::RtpDepay(_) => "rtp-depay",
            Component::Mp4Muxer(_) => "mp4-muxer",
            Component::Mp4Parser(_) => "mp4-parser",
            Component::Mp4Capture(_) => "mp4-capture",
        }
    }

    fn process(&mut self, msg: Message) -> Result<Vec<Message>> {
        match self {
            Component::Inspector(inspector) => Ok(vec![inspector.inspect(msg)]),
            Component::RtspParser(parser) => match msg {
                Message::Raw(chunk) => parser.parse(&chunk),
                other => Ok(vec![other]),
            },
            Component::RtspSession(session) => session.process(msg),
            Component::RtpDepay(depay) => depay.process(msg),
            Component::Mp4Muxer(muxer) => Ok(muxer.process(msg)),
            Component::Mp4Parser(parser) => parser.process(msg),
            Component::Mp4Capture(capture) => Ok(capture.process(msg)),
        }
    }

    fn end(&mut self) {
        match self {
            Component::Inspector(_) | Component::Mp4Muxer(_) => {}
            Component::RtspParser(parser) => parser.reset(),
            Component::RtspSession(session) => session.end(),
            Component::RtpDepay(depay) => depay.reset(),
            Component::Mp4Parser(parser) => parser.reset(),
            Component::Mp4Capture(capture) => capture.end(),
        }
    }
}

/// A component plus its bounded outbox.
pub struct Stage {
    component: Component,
    outbox: VecDeque<Message>,
    capacity: usize,
    errors: Vec<RtspError>,
}

impl Stage {
    pub fn new(component: Component) -> Self {
        Self::with_capacity(component, DEFAULT_CHANNEL_CAPACITY)
    }

    pub fn with_capacity(component: Component, capacity: usize) -> Self {
        Self {
            component,
            outbox: VecDeque::new(),
            capacity: capacity.max(1),
            errors: Vec::new(),
        }
    }

    pub fn component(&self) -> &Component {
        &self.component
    }

    pub fn component_mut(&mut self) -> &mut Component {
        &mut self.component
    }

    pub fn pending(&self) -> usize {
        self.outbox.len()
    }

    pub fn take_errors(&mut self) -> Vec<RtspError> {
        std::mem::take(&mut self.errors)
    }
}

impl MessageConsumer for Stage {
    fn accept(&mut self, msg: Message) -> bool {
        if !self.ready() {
            return false;
        }
        match self.component.process(msg) {
            Ok(out) => self.outbox.extend(out),
            Err(err) => {
                tracing::warn!(stage = self.component.name(), %err, "stage error");
                self.errors.push(err);
            }
        }
        true
    }

    fn ready(&self) -> bool {
        self.outbox.len() < self.capacity
    }

    fn end(&mut self) {
        tracing::debug!(stage = self.component.name(), "end of stream");
        self.component.end();
    }
}

impl MessageProducer for Stage {
    fn poll(&mut self) -> Option<Message> {
        self.outbox.pop_front()
    }
}

/// A chain of stages fed from a bounded head channel.
pub struct Pipeline {
    stages: Vec<Stage>,
    head: VecDeque<Message>,
    capacity: usize,
}

impl Pipeline {
    pub fn new(components: Vec<Component>) -> Self {
        Self {
            stages: components.into_iter().map(Stage::new).collect(),
            head: VecDeque::new(),
            capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }

    pub fn from_stages(stages: Vec<Stage>, capacity: usize) -> Self {
        Self {
            stages,
            head: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// Queue a message at the head. `false` when the head channel is full.
    pub fn push(&mut self, msg: Message) -> bool {
        if self.head.len() >= self.capacity {
            tracing::trace!(queued = self.head.len(), "pipeline full");
            return false;
        }
        self.head.push_back(msg);
        true
    }

    /// Move messages downstream as far as each stage's readiness allows and
    /// return what came out of the last stage.
    pub fn drain(&mut self) -> Vec<Message> {
        let mut tail = Vec::new();
        if self.stages.is_empty() {
            tail.extend(self.head.drain(..));
            return tail;
        }

        loop {
            let mut progressed = false;

            let first = &mut self.stages[0];
            while first.ready() {
                let Some(msg) = self.head.pop_front() else {
                    break;
                };
                first.accept(msg);
                progressed = true;
            }

            for i in 1..self.stages.len() {
                let (upstream, downstream) = self.stages.split_at_mut(i);
                let (source, sink) = (&mut upstream[i - 1], &mut downstream[0]);
                while sink.ready() {
                    let Some(msg) = source.poll() else {
                        break;
                    };
                    sink.accept(msg);
                    progressed = true;
                }
            }

            if let Some(last) = self.stages.last_mut() {
                while let Some(msg) = last.poll() {
                    tail.push(msg);
                    progressed = true;
                }
            }

            if !progressed {
                break;
            }
        }
        tail
    }

    /// Flush what is complete, then signal end of stream to every stage in
    /// order.
    pub fn end(&mut self) -> Vec<Message> {
        let mut tail = self.drain();
        self.head.clear();
        for stage in &mut self.stages {
            stage.end();
        }
        tail.extend(self.drain());
        tail
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn take_errors(&mut self) -> Vec<RtspError> {
        self.stages
            .iter_mut()
            .flat_map(Stage::take_errors)
            .collect()
    }

    pub fn session_mut(&mut self) -> Option<&mut RtspSession> {
        self.stages
            .iter_mut()
            .find_map(|stage| match &mut stage.component {
                Component::RtspSession(session) => Some(&mut **session),
                _ => None,
            })
    }

    pub fn muxer(&self) -> Option<&Mp4Muxer> {
        self.stages.iter().find_map(|stage| match &stage.component {
            Component::Mp4Muxer(muxer) => Some(muxer),
            _ => None,
        })
    }

    pub fn muxer_mut(&mut self) -> Option<&mut Mp4Muxer> {
        self.stages
            .iter_mut()
            .find_map(|stage| match &mut stage.component {
                Component::Mp4Muxer(muxer) => Some(muxer),
                _ => None,
            })
    }

    pub fn capture_mut(&mut self) -> Option<&mut Mp4Capture> {
        self.stages
            .iter_mut()
            .find_map(|stage| match &mut stage.component {
                Component::Mp4Capture(capture) => Some(capture),
                _ => None,
            })
    }
}
