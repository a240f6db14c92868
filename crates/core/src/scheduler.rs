//! Presentation-time scheduling against a playback clock.
//!
//! Messages are queued with their `ntp_timestamp`. Once the presentation
//! origin is known (see [`MuxerEvent::Sync`](crate::mp4::MuxerEvent)), each
//! run compares the head of the queue with the clock:
//!
//! ```text
//! time_to_present = (ntp_timestamp - origin) - clock.current_time() * 1000
//!
//!   |ttp| < tolerance   dispatch to the handler, look at the next one
//!   ttp  >= tolerance   message is early: requeue, rerun later
//!   ttp  <= -tolerance  queue ran dry behind the clock: pause the clock,
//!                       play again once the data has caught up
//! ```
//!
//! There is no internal timer. [`Scheduler::run`] returns the timers to
//! arm as [`TimerAction`]s and the caller hands each back to
//! [`Scheduler::fire`] when it expires.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

use crate::error::{Result, RtspError};
use crate::message::Message;

/// A playback clock the scheduler can read and steer.
pub trait Clock: Send + Sync {
    /// Presentation time in seconds.
    fn current_time(&self) -> f64;
    fn play(&self);
    fn pause(&self);
}

impl<C: Clock + ?Sized> Clock for Arc<C> {
    fn current_time(&self) -> f64 {
        (**self).current_time()
    }

    fn play(&self) {
        (**self).play()
    }

    fn pause(&self) {
        (**self).pause()
    }
}

#[derive(Debug)]
struct WallClockState {
    /// Seconds accumulated before the current run.
    elapsed: f64,
    running_since: Option<Instant>,
}

/// A clock driven by [`Instant`], for when there is no media element to
/// follow. Starts paused at zero.
#[derive(Debug)]
pub struct WallClock {
    state: Mutex<WallClockState>,
}

impl WallClock {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(WallClockState {
                elapsed: 0.0,
                running_since: None,
            }),
        }
    }

    pub fn is_playing(&self) -> bool {
        self.state.lock().running_since.is_some()
    }
}

impl Default for WallClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for WallClock {
    fn current_time(&self) -> f64 {
        let state = self.state.lock();
        state.elapsed
            + state
                .running_since
                .map_or(0.0, |since| since.elapsed().as_secs_f64())
    }

    fn play(&self) {
        let mut state = self.state.lock();
        if state.running_since.is_none() {
            state.running_since = Some(Instant::now());
        }
    }

    fn pause(&self) {
        let mut state = self.state.lock();
        if let Some(since) = state.running_since.take() {
            state.elapsed += since.elapsed().as_secs_f64();
        }
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Half-width of the "in sync" window, in milliseconds.
    pub tolerance_ms: f64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { tolerance_ms: 10.0 }
    }
}

impl SchedulerConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.tolerance_ms.is_finite() && self.tolerance_ms > 0.0) {
            return Err(RtspError::InvalidConfig(format!(
                "scheduler tolerance must be positive, got {}",
                self.tolerance_ms
            )));
        }
        Ok(())
    }
}

/// A timer the caller should arm, then pass back to [`Scheduler::fire`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TimerAction {
    /// Run the queue again.
    Rerun { after_ms: f64 },
    /// Restart the clock paused for an underrun.
    Play { after_ms: f64 },
}

pub type Handler = Box<dyn FnMut(Message) + Send>;

pub struct Scheduler<C: Clock> {
    clock: C,
    handler: Handler,
    tolerance: f64,
    fifo: VecDeque<Message>,
    ntp_presentation_time: Option<f64>,
    suspended: bool,
    /// Set while a `Play` timer is outstanding; cleared by `suspend`.
    play_pending: bool,
}

impl<C: Clock> Scheduler<C> {
    pub fn new(clock: C, handler: Handler) -> Self {
        Self {
            clock,
            handler,
            tolerance: SchedulerConfig::default().tolerance_ms,
            fifo: VecDeque::new(),
            ntp_presentation_time: None,
            suspended: false,
            play_pending: false,
        }
    }

    pub fn with_config(clock: C, handler: Handler, config: SchedulerConfig) -> Result<Self> {
        config.validate()?;
        let mut scheduler = Self::new(clock, handler);
        scheduler.tolerance = config.tolerance_ms;
        Ok(scheduler)
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn queued(&self) -> usize {
        self.fifo.len()
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended
    }

    /// Back to the freshly constructed state. Outstanding timers become
    /// no-ops.
    pub fn reset(&mut self) {
        self.fifo.clear();
        self.ntp_presentation_time = None;
        self.suspended = false;
        self.play_pending = false;
    }

    /// Set the NTP time (ms) of presentation time zero and start scheduling.
    pub fn init(&mut self, ntp_presentation_time: f64) -> Vec<TimerAction> {
        self.ntp_presentation_time = Some(ntp_presentation_time);
        self.run(None)
    }

    /// Stop steering the clock. Queued messages are kept.
    pub fn suspend(&mut self) {
        self.play_pending = false;
        self.suspended = true;
    }

    pub fn resume(&mut self) -> Vec<TimerAction> {
        self.suspended = false;
        self.run(None)
    }

    /// Execute an expired timer.
    pub fn fire(&mut self, action: TimerAction) -> Vec<TimerAction> {
        match action {
            TimerAction::Rerun { .. } => self.run(None),
            TimerAction::Play { .. } => {
                if self.play_pending {
                    self.play_pending = false;
                    self.clock.play();
                }
                Vec::new()
            }
        }
    }

    /// Queue `msg` (if any) and dispatch everything that is in sync.
    pub fn run(&mut self, msg: Option<Message>) -> Vec<TimerAction> {
        if let Some(msg) = msg {
            self.fifo.push_back(msg);
        }
        if self.suspended {
            return Vec::new();
        }
        let Some(origin) = self.ntp_presentation_time else {
            return Vec::new();
        };

        let tolerance = self.tolerance;
        let mut time_to_present = 0.0;
        let mut early = None;
        while let Some(current) = self.fifo.pop_front() {
            let Some(ntp_timestamp) = current.ntp_timestamp() else {
                tracing::trace!(kind = current.kind(), "unscheduled message dropped");
                continue;
            };
            time_to_present = ntp_timestamp - origin - self.clock.current_time() * 1000.0;

            if time_to_present.abs() < tolerance {
                (self.handler)(current);
            } else if time_to_present >= tolerance {
                early = Some(current);
                break;
            }
        }

        if let Some(current) = early {
            self.fifo.push_front(current);
            let after_ms = time_to_present - tolerance;
            tracing::trace!(after_ms, queued = self.fifo.len(), "message ahead of clock");
            return vec![TimerAction::Rerun { after_ms }];
        }

        if time_to_present <= -tolerance {
            let after_ms = -time_to_present;
            tracing::debug!(after_ms, "clock ahead of data, pausing");
            self.clock.pause();
            self.play_pending = true;
            return vec![TimerAction::Play { after_ms }];
        }

        Vec::new()
    }
}
