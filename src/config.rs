//! Tuning for the synchronization components.

use std::time::Duration;

use crate::session::{DEFAULT_EVENT_CHANNEL_CAPACITY, DEFAULT_SHUTDOWN_TIMEOUT};

/// Default drift, in seconds, tolerated before a hard correction.
pub const DEFAULT_DRIFT_THRESHOLD_SECS: f64 = 3.0;

/// Default time a committed local seek ignores server position updates.
pub const DEFAULT_SEEK_ECHO_GUARD: Duration = Duration::from_millis(500);

/// Default distance, in seconds, within which a remote seek counts as the
/// echo of our own.
pub const DEFAULT_SEEK_ECHO_TOLERANCE_SECS: f64 = 0.5;

/// Default window for collapsing outbound seek requests.
pub const DEFAULT_SEEK_DEBOUNCE: Duration = Duration::from_millis(150);

/// Default number of consecutive unauthorized errors before rejoining stops.
pub const DEFAULT_MAX_AUTH_RETRIES: u32 = 3;

/// Default base delay between rejoins; retry `n` waits `n` times this long.
pub const DEFAULT_AUTH_RETRY_BASE_DELAY: Duration = Duration::from_secs(2);

/// Default delay before asking for the current song after a join.
pub const DEFAULT_CURRENT_SONG_FALLBACK: Duration = Duration::from_secs(1);

/// Configuration for a [`RoomClient`](crate::room::RoomClient) and its sync
/// components.
///
/// Invalid values are clamped by the builders: negative or non-finite
/// distances fall back to their defaults.
///
/// # Example
///
/// ```
/// use room_sync_client::config::SyncConfig;
/// use std::time::Duration;
///
/// let config = SyncConfig::new()
///     .with_drift_threshold(2.0)
///     .with_seek_debounce(Duration::from_millis(100));
/// assert_eq!(config.drift_threshold_secs, 2.0);
/// ```
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Drift above this triggers a hard correction. Defaults to **3.0 s**.
    pub drift_threshold_secs: f64,
    /// How long a committed local seek shields the clock from server
    /// updates. Defaults to **500 ms**.
    pub seek_echo_guard: Duration,
    /// A remote seek this close to the pending target clears the guard.
    /// Defaults to **0.5 s**.
    pub seek_echo_tolerance_secs: f64,
    /// Outbound seeks within this window collapse into one. Defaults to **150 ms**.
    pub seek_debounce: Duration,
    /// Consecutive unauthorized errors tolerated. Defaults to **3**.
    pub max_auth_retries: u32,
    /// Rejoin `n` is scheduled `n × auth_retry_base_delay` after the error.
    /// Defaults to **2 s**.
    pub auth_retry_base_delay: Duration,
    /// Delay of the one-shot `get-current-song` after a join. Defaults to **1 s**.
    pub current_song_fallback: Duration,
    /// Capacity of the room event channel. Defaults to **256**.
    pub event_channel_capacity: usize,
    /// Time the room loop gets to stop on shutdown. Defaults to **1 s**.
    pub shutdown_timeout: Duration,
}

impl SyncConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self {
            drift_threshold_secs: DEFAULT_DRIFT_THRESHOLD_SECS,
            seek_echo_guard: DEFAULT_SEEK_ECHO_GUARD,
            seek_echo_tolerance_secs: DEFAULT_SEEK_ECHO_TOLERANCE_SECS,
            seek_debounce: DEFAULT_SEEK_DEBOUNCE,
            max_auth_retries: DEFAULT_MAX_AUTH_RETRIES,
            auth_retry_base_delay: DEFAULT_AUTH_RETRY_BASE_DELAY,
            current_song_fallback: DEFAULT_CURRENT_SONG_FALLBACK,
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }

    /// Set the drift threshold in seconds.
    #[must_use]
    pub fn with_drift_threshold(mut self, secs: f64) -> Self {
        self.drift_threshold_secs = non_negative_or(secs, DEFAULT_DRIFT_THRESHOLD_SECS);
        self
    }

    /// Set the seek echo guard window.
    #[must_use]
    pub fn with_seek_echo_guard(mut self, guard: Duration) -> Self {
        self.seek_echo_guard = guard;
        self
    }

    /// Set the echo tolerance in seconds.
    #[must_use]
    pub fn with_seek_echo_tolerance(mut self, secs: f64) -> Self {
        self.seek_echo_tolerance_secs = non_negative_or(secs, DEFAULT_SEEK_ECHO_TOLERANCE_SECS);
        self
    }

    /// Set the outbound seek debounce window.
    #[must_use]
    pub fn with_seek_debounce(mut self, window: Duration) -> Self {
        self.seek_debounce = window;
        self
    }

    /// Set the number of consecutive unauthorized errors tolerated.
    #[must_use]
    pub fn with_max_auth_retries(mut self, retries: u32) -> Self {
        self.max_auth_retries = retries;
        self
    }

    /// Set the rejoin base delay.
    #[must_use]
    pub fn with_auth_retry_base_delay(mut self, delay: Duration) -> Self {
        self.auth_retry_base_delay = delay;
        self
    }

    /// Set the delay of the post-join `get-current-song` fallback.
    #[must_use]
    pub fn with_current_song_fallback(mut self, delay: Duration) -> Self {
        self.current_song_fallback = delay;
        self
    }

    /// Set the room event channel capacity. Values below 1 are clamped to 1.
    #[must_use]
    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity.max(1);
        self
    }

    /// Set the room loop shutdown timeout.
    #[must_use]
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new()
    }
}

fn non_negative_or(value: f64, fallback: f64) -> f64 {
    if value.is_finite() && value >= 0.0 {
        value
    } else {
        fallback
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = SyncConfig::new();
        assert_eq!(config.drift_threshold_secs, 3.0);
        assert_eq!(config.seek_echo_guard, Duration::from_millis(500));
        assert_eq!(config.seek_debounce, Duration::from_millis(150));
        assert_eq!(config.max_auth_retries, 3);
        assert_eq!(config.auth_retry_base_delay, Duration::from_secs(2));
        assert_eq!(config.current_song_fallback, Duration::from_secs(1));
    }

    #[test]
    fn invalid_distances_fall_back_to_defaults() {
        let config = SyncConfig::new()
            .with_drift_threshold(f64::NAN)
            .with_seek_echo_tolerance(-1.0);
        assert_eq!(config.drift_threshold_secs, DEFAULT_DRIFT_THRESHOLD_SECS);
        assert_eq!(config.seek_echo_tolerance_secs, DEFAULT_SEEK_ECHO_TOLERANCE_SECS);
    }

    #[test]
    fn zero_capacity_is_clamped() {
        assert_eq!(SyncConfig::new().with_event_channel_capacity(0).event_channel_capacity, 1);
    }
}
