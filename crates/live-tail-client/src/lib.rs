//! Live tail feed client for the LogLens console.
//!
//! Keeps one server-sent event channel to the console's `/api/live-tail/stream` open, merges
//! frames into a capped, id-ordered buffer, and reconnects with exponential backoff when the
//! channel drops. [`LiveTailMachine`] holds the lifecycle rules; [`LiveTailClient`] drives it.

pub mod backoff;
pub mod buffer;
pub mod client;
pub mod error;
pub mod machine;

pub use backoff::{reconnect_delay, reconnect_message, MAX_RECONNECT_DELAY};
pub use buffer::{LiveTailBuffer, LiveTailEvent, StreamFrame, MAX_BUFFERED_EVENTS};
pub use client::{LiveTailClient, LiveTailConfig};
pub use error::LiveTailError;
pub use machine::{
    ConnectionState, Effect, LevelFilter, LiveTailFilters, LiveTailMachine, LiveTailView,
    DECODE_FAILURE_MESSAGE,
};
