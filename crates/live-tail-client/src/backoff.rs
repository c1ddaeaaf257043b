use std::time::Duration;

pub const INITIAL_RECONNECT_DELAY: Duration = Duration::from_millis(1_000);
pub const MAX_RECONNECT_DELAY: Duration = Duration::from_millis(15_000);

/// Delay before reconnect number `attempt` (1-based): doubles from one second, capped at 15s.
pub fn reconnect_delay(attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16);
    let delay = INITIAL_RECONNECT_DELAY.saturating_mul(1 << exponent);
    delay.min(MAX_RECONNECT_DELAY)
}

pub fn reconnect_message(delay: Duration) -> String {
    let seconds = (delay.as_millis() + 999) / 1000;
    format!("Live stream connection dropped. Reconnecting in {seconds}s.")
}
