use std::collections::HashSet;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

pub const MAX_BUFFERED_EVENTS: usize = 600;

/// One redacted log line as streamed by the backend.
///
/// Only `id` is required. Any other field may be missing or null and falls back to its default.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveTailEvent {
    pub id: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub analysis_id: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub source_id: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub source_name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub line_no: i64,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub level: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub service: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub message: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub created_at: String,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Option::unwrap_or_default)
}

/// A `data:` payload on the live tail channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamFrame {
    pub events: Vec<LiveTailEvent>,
    #[serde(default)]
    pub cursor: Option<i64>,
    #[serde(default)]
    pub snapshot: bool,
}

impl StreamFrame {
    /// Returns `Ok(None)` for well-formed JSON that carries no `events` array (keepalives).
    pub fn decode(data: &str) -> Result<Option<Self>, serde_json::Error> {
        let value: Value = serde_json::from_str(data)?;
        if !value.get("events").is_some_and(Value::is_array) {
            return Ok(None);
        }
        serde_json::from_value(value).map(Some)
    }
}

/// Events ordered by id, capped at a fixed size; the oldest ids are evicted first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveTailBuffer {
    events: Vec<LiveTailEvent>,
    capacity: usize,
    truncated_count: u64,
}

impl Default for LiveTailBuffer {
    fn default() -> Self {
        Self::with_capacity(MAX_BUFFERED_EVENTS)
    }
}

impl LiveTailBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: Vec::new(),
            capacity,
            truncated_count: 0,
        }
    }

    /// Merges a frame and returns how many events the cap evicted.
    pub fn apply(&mut self, frame: StreamFrame) -> usize {
        if frame.snapshot {
            self.events = frame.events;
        } else {
            let incoming: HashSet<i64> = frame.events.iter().map(|event| event.id).collect();
            self.events.retain(|event| !incoming.contains(&event.id));
            self.events.extend(frame.events);
        }
        self.events.sort_by_key(|event| event.id);
        self.events.dedup_by_key(|event| event.id);

        let evicted = self.events.len().saturating_sub(self.capacity);
        if evicted > 0 {
            self.events.drain(..evicted);
            self.truncated_count += evicted as u64;
        }
        evicted
    }

    pub fn clear(&mut self) {
        self.events.clear();
        self.truncated_count = 0;
    }

    pub fn events(&self) -> &[LiveTailEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn truncated_count(&self) -> u64 {
        self.truncated_count
    }
}

#[cfg(test)]
pub(crate) fn test_event(id: i64) -> LiveTailEvent {
    LiveTailEvent {
        id,
        analysis_id: 1,
        source_id: 1,
        source_name: "api.log".into(),
        line_no: id,
        timestamp: None,
        level: "info".into(),
        service: "api".into(),
        message: format!("line {id}"),
        created_at: "2026-01-01T00:00:00Z".into(),
    }
}
