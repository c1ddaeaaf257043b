//! Connection lifecycle for the live tail feed.
//!
//! [`LiveTailMachine`] performs no I/O. Every input takes the current time explicitly and
//! returns the [`Effect`]s the driver must carry out, in order.

use std::{fmt, str::FromStr, time::Duration};

use chrono::{DateTime, Utc};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::{
    backoff::{reconnect_delay, reconnect_message},
    buffer::{LiveTailBuffer, LiveTailEvent, StreamFrame},
    error::LiveTailError,
};

pub const DECODE_FAILURE_MESSAGE: &str = "Failed to decode streaming payload.";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum LevelFilter {
    #[default]
    All,
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
    Unknown,
}

impl LevelFilter {
    pub const ALL: [LevelFilter; 7] = [
        LevelFilter::All,
        LevelFilter::Debug,
        LevelFilter::Info,
        LevelFilter::Warn,
        LevelFilter::Error,
        LevelFilter::Fatal,
        LevelFilter::Unknown,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            LevelFilter::All => "all",
            LevelFilter::Debug => "debug",
            LevelFilter::Info => "info",
            LevelFilter::Warn => "warn",
            LevelFilter::Error => "error",
            LevelFilter::Fatal => "fatal",
            LevelFilter::Unknown => "unknown",
        }
    }
}

impl fmt::Display for LevelFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LevelFilter {
    type Err = LiveTailError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalized = raw.trim().to_ascii_lowercase();
        LevelFilter::ALL
            .into_iter()
            .find(|level| level.as_str() == normalized)
            .ok_or_else(|| LiveTailError::UnknownLevel(raw.to_string()))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LiveTailFilters {
    pub level: LevelFilter,
    pub search: String,
    pub analysis_id: Option<u64>,
}

impl LiveTailFilters {
    /// Query parameters for the stream request; `all` and blank search are omitted.
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        if self.level != LevelFilter::All {
            pairs.push(("level", self.level.as_str().to_string()));
        }
        let search = self.search.trim();
        if !search.is_empty() {
            pairs.push(("q", search.to_string()));
        }
        if let Some(analysis_id) = self.analysis_id {
            pairs.push(("analysis_id", analysis_id.to_string()));
        }
        pairs
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Streaming,
    Backoff { attempt: u32, resume_at: Instant },
}

impl ConnectionState {
    fn has_channel(&self) -> bool {
        matches!(self, ConnectionState::Connecting | ConnectionState::Streaming)
    }
}

/// Work the driver performs on the machine's behalf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    Open(LiveTailFilters),
    Close,
    ScheduleReconnect { at: Instant, delay: Duration },
    CancelTimer,
}

/// Snapshot of everything a renderer needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveTailView {
    pub state: ConnectionState,
    pub paused: bool,
    pub filters: LiveTailFilters,
    pub events: Vec<LiveTailEvent>,
    pub truncated_count: u64,
    pub error: Option<String>,
    pub last_update_at: Option<DateTime<Utc>>,
    pub reconnect_attempt: u32,
}

#[derive(Debug, Clone)]
pub struct LiveTailMachine {
    state: ConnectionState,
    filters: LiveTailFilters,
    paused: bool,
    attempt: u32,
    buffer: LiveTailBuffer,
    error: Option<String>,
    last_update_at: Option<DateTime<Utc>>,
}

impl LiveTailMachine {
    pub fn new(filters: LiveTailFilters, paused: bool) -> Self {
        Self::with_buffer(filters, paused, LiveTailBuffer::default())
    }

    pub fn with_buffer(filters: LiveTailFilters, paused: bool, buffer: LiveTailBuffer) -> Self {
        Self {
            state: ConnectionState::Idle,
            filters,
            paused,
            attempt: 0,
            buffer,
            error: None,
            last_update_at: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn buffer(&self) -> &LiveTailBuffer {
        &self.buffer
    }

    pub fn start(&mut self) -> Vec<Effect> {
        if self.paused || self.state != ConnectionState::Idle {
            return Vec::new();
        }
        self.connect()
    }

    pub fn on_open(&mut self) -> Vec<Effect> {
        if !self.state.has_channel() {
            return Vec::new();
        }
        if self.state == ConnectionState::Connecting {
            debug!(target: "loglens::live_tail", attempt = self.attempt, "stream connected");
        }
        self.state = ConnectionState::Streaming;
        self.attempt = 0;
        self.error = None;
        Vec::new()
    }

    /// Applies one `data:` payload. A payload that fails to decode leaves the channel open.
    pub fn on_frame(&mut self, data: &str, received_at: DateTime<Utc>) -> Vec<Effect> {
        if !self.state.has_channel() {
            return Vec::new();
        }
        let effects = self.on_open();
        match StreamFrame::decode(data) {
            Ok(Some(frame)) => {
                let evicted = self.buffer.apply(frame);
                if evicted > 0 {
                    debug!(target: "loglens::live_tail", evicted, "live tail buffer truncated");
                }
                self.error = None;
                self.last_update_at = Some(received_at);
            }
            Ok(None) => {}
            Err(err) => {
                warn!(target: "loglens::live_tail", error = %err, "failed to decode stream frame");
                self.error = Some(DECODE_FAILURE_MESSAGE.to_string());
            }
        }
        effects
    }

    /// Channel errored or closed: tear it down and schedule the next attempt.
    pub fn on_error(&mut self, now: Instant) -> Vec<Effect> {
        if !self.state.has_channel() {
            return Vec::new();
        }
        self.attempt = self.attempt.saturating_add(1);
        let delay = reconnect_delay(self.attempt);
        let resume_at = now + delay;
        self.state = ConnectionState::Backoff {
            attempt: self.attempt,
            resume_at,
        };
        self.error = Some(reconnect_message(delay));
        warn!(
            target: "loglens::live_tail",
            attempt = self.attempt,
            delay_ms = delay.as_millis() as u64,
            "stream dropped; scheduling reconnect"
        );
        vec![Effect::Close, Effect::ScheduleReconnect { at: resume_at, delay }]
    }

    pub fn on_timer(&mut self, now: Instant) -> Vec<Effect> {
        match self.state {
            ConnectionState::Backoff { resume_at, .. } if now >= resume_at => self.connect(),
            _ => Vec::new(),
        }
    }

    pub fn pause(&mut self) -> Vec<Effect> {
        self.paused = true;
        self.teardown()
    }

    pub fn resume(&mut self) -> Vec<Effect> {
        self.paused = false;
        self.attempt = 0;
        self.restart()
    }

    pub fn set_filters(&mut self, filters: LiveTailFilters) -> Vec<Effect> {
        self.filters = filters;
        self.reset()
    }

    /// Drops buffered events and reconnects from a clean slate.
    pub fn reset(&mut self) -> Vec<Effect> {
        self.buffer.clear();
        self.attempt = 0;
        if self.paused {
            self.teardown()
        } else {
            self.restart()
        }
    }

    pub fn shutdown(&mut self) -> Vec<Effect> {
        self.teardown()
    }

    pub fn view(&self) -> LiveTailView {
        LiveTailView {
            state: self.state,
            paused: self.paused,
            filters: self.filters.clone(),
            events: self.buffer.events().to_vec(),
            truncated_count: self.buffer.truncated_count(),
            error: self.error.clone(),
            last_update_at: self.last_update_at,
            reconnect_attempt: self.attempt,
        }
    }

    fn connect(&mut self) -> Vec<Effect> {
        self.state = ConnectionState::Connecting;
        if self.attempt == 0 {
            self.error = None;
        }
        vec![Effect::Open(self.filters.clone())]
    }

    fn restart(&mut self) -> Vec<Effect> {
        let mut effects = self.teardown();
        effects.extend(self.connect());
        effects
    }

    fn teardown(&mut self) -> Vec<Effect> {
        let effects = match self.state {
            ConnectionState::Idle => Vec::new(),
            ConnectionState::Connecting | ConnectionState::Streaming => vec![Effect::Close],
            ConnectionState::Backoff { .. } => vec![Effect::CancelTimer],
        };
        self.state = ConnectionState::Idle;
        effects
    }
}
