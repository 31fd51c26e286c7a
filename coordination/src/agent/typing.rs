//! Simulated typing delay

use std::time::Duration;

/// How long an agent "types" a message at the given speed, capped at `max`
pub fn typing_delay(message: &str, words_per_minute: u32, max: Duration) -> Duration {
    if words_per_minute == 0 {
        return Duration::ZERO;
    }
    let words = message.split_whitespace().count() as u64;
    let millis = words * 60_000 / words_per_minute as u64;
    Duration::from_millis(millis).min(max)
}
