use std::collections::VecDeque;

use crate::message::Message;

/// Five minutes at 6 Mbit/s.
pub const DEFAULT_MAX_CAPTURE_BYTES: usize = 225_000_000;

#[derive(Debug, Clone)]
pub struct Mp4CaptureConfig {
    pub max_bytes: usize,
}

impl Default for Mp4CaptureConfig {
    fn default() -> Self {
        Self {
            max_bytes: DEFAULT_MAX_CAPTURE_BYTES,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureEvent {
    Captured(Vec<u8>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CaptureState {
    Idle,
    /// Waiting for the next movie to start.
    Armed,
    Recording,
}

/// Records the MP4 bytes of one movie.
///
/// After [`start`](Self::start), recording begins with the next movie (an
/// `Sdp`, or an init segment carrying a MIME type) and ends when the
/// buffer would overflow, on [`stop`](Self::stop), or when the stream
/// ends. Messages always pass through unchanged.
#[derive(Debug)]
pub struct Mp4Capture {
    max_bytes: usize,
    state: CaptureState,
    buffer: Vec<u8>,
    events: VecDeque<CaptureEvent>,
}

impl Default for Mp4Capture {
    fn default() -> Self {
        Self::new(Mp4CaptureConfig::default())
    }
}

impl Mp4Capture {
    pub fn new(config: Mp4CaptureConfig) -> Self {
        Self {
            max_bytes: config.max_bytes,
            state: CaptureState::Idle,
            buffer: Vec::new(),
            events: VecDeque::new(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.state != CaptureState::Idle
    }

    pub fn is_recording(&self) -> bool {
        self.state == CaptureState::Recording
    }

    pub fn captured(&self) -> usize {
        self.buffer.len()
    }

    pub fn start(&mut self) {
        if self.state == CaptureState::Idle {
            tracing::info!(max_bytes = self.max_bytes, "start MP4 capture");
            self.buffer.clear();
            self.state = CaptureState::Armed;
        }
    }

    /// End an active capture and deliver what was recorded.
    pub fn stop(&mut self) {
        if self.state == CaptureState::Idle {
            return;
        }
        tracing::info!(bytes = self.buffer.len(), "stop MP4 capture");
        self.state = CaptureState::Idle;
        let data = std::mem::take(&mut self.buffer);
        self.events.push_back(CaptureEvent::Captured(data));
    }

    pub fn end(&mut self) {
        self.stop();
    }

    pub fn poll_event(&mut self) -> Option<CaptureEvent> {
        self.events.pop_front()
    }

    pub fn process(&mut self, msg: Message) -> Vec<Message> {
        if self.state == CaptureState::Armed {
            let new_movie = match &msg {
                Message::Sdp(_) => true,
                Message::Isom(isom) => isom.mime.is_some(),
                _ => false,
            };
            if new_movie {
                tracing::debug!("new movie, recording");
                self.state = CaptureState::Recording;
            }
        }

        if self.state == CaptureState::Recording {
            if let Message::Isom(isom) = &msg {
                if self.buffer.len() + isom.data.len() < self.max_bytes {
                    self.buffer.extend_from_slice(&isom.data);
                } else {
                    self.stop();
                }
            }
        }

        vec![msg]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::IsomMessage;
    use crate::protocol::sdp::Sdp;

    fn isom(data: &[u8]) -> Message {
        Message::Isom(IsomMessage {
            data: data.to_vec(),
            mime: None,
            checkpoint_time: None,
            ntp_timestamp: None,
        })
    }

    #[test]
    fn records_from_next_movie() {
        let mut capture = Mp4Capture::default();
        capture.start();
        capture.process(isom(&[9, 9]));
        assert_eq!(capture.captured(), 0);

        capture.process(Message::Sdp(Sdp::default()));
        capture.process(isom(&[1, 2]));
        capture.process(isom(&[3]));
        assert!(capture.is_recording());

        capture.stop();
        assert_eq!(
            capture.poll_event(),
            Some(CaptureEvent::Captured(vec![1, 2, 3]))
        );
        assert!(!capture.is_active());
    }

    #[test]
    fn stops_when_full() {
        let mut capture = Mp4Capture::new(Mp4CaptureConfig { max_bytes: 4 });
        capture.start();
        capture.process(Message::Sdp(Sdp::default()));
        capture.process(isom(&[1, 2]));
        capture.process(isom(&[3, 4]));
        assert_eq!(capture.poll_event(), Some(CaptureEvent::Captured(vec![1, 2])));
        capture.process(isom(&[5]));
        assert_eq!(capture.poll_event(), None);
    }

    #[test]
    fn init_segment_starts_recording() {
        let mut capture = Mp4Capture::default();
        capture.start();
        let init = Message::Isom(IsomMessage {
            data: vec![7],
            mime: Some("video/mp4".to_string()),
            checkpoint_time: None,
            ntp_timestamp: None,
        });
        let out = capture.process(init.clone());
        assert_eq!(out, vec![init]);
        capture.end();
        assert_eq!(capture.poll_event(), Some(CaptureEvent::Captured(vec![7])));
    }

    #[test]
    fn stop_without_start_is_silent() {
        let mut capture = Mp4Capture::default();
        capture.stop();
        assert_eq!(capture.poll_event(), None);
    }
}
