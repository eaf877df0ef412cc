//! Log throttling for reconnect loops
//!
//! A supervisor that retries forever would otherwise emit one warning per
//! attempt. The throttler lets the first occurrence of a key through, then
//! suppresses repeats for an interval and remembers how many were dropped so
//! the next logged line can mention them.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

#[derive(Debug)]
struct Entry {
    last_logged: Instant,
    suppressed: u32,
}

/// Per-key log rate limiter
#[derive(Debug)]
pub struct LogThrottler {
    entries: Mutex<HashMap<String, Entry>>,
    interval: Duration,
}

impl LogThrottler {
    pub fn new(interval: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            interval,
        }
    }

    pub fn with_secs(secs: u64) -> Self {
        Self::new(Duration::from_secs(secs))
    }

    /// Returns `true` when a message for `key` should be emitted now.
    pub fn should_log(&self, key: &str) -> bool {
        self.admit(key).is_some()
    }

    /// Like [`should_log`](Self::should_log), but on admission returns how
    /// many messages for this key were suppressed since the last one.
    pub fn admit(&self, key: &str) -> Option<u32> {
        let now = Instant::now();
        let mut entries = self.entries.lock();

        match entries.get_mut(key) {
            Some(entry) if now.duration_since(entry.last_logged) < self.interval => {
                entry.suppressed = entry.suppressed.saturating_add(1);
                None
            }
            Some(entry) => {
                let suppressed = entry.suppressed;
                entry.last_logged = now;
                entry.suppressed = 0;
                Some(suppressed)
            }
            None => {
                entries.insert(
                    key.to_string(),
                    Entry {
                        last_logged: now,
                        suppressed: 0,
                    },
                );
                Some(0)
            }
        }
    }

    /// Forget a key, typically once the failing connection has recovered.
    pub fn clear(&self, key: &str) {
        self.entries.lock().remove(key);
    }

    /// Forget every key whose text starts with `prefix`.
    pub fn clear_prefix(&self, prefix: &str) {
        self.entries.lock().retain(|k, _| !k.starts_with(prefix));
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl Default for LogThrottler {
    fn default() -> Self {
        Self::with_secs(5)
    }
}

/// Throttled warning
///
/// ```rust
/// use smartbow_viewer::utils::LogThrottler;
/// use smartbow_viewer::warn_throttled;
///
/// let throttler = LogThrottler::default();
/// warn_throttled!(throttler, "media:target1:failed", "camera {} failed", "target1");
/// ```
#[macro_export]
macro_rules! warn_throttled {
    ($throttler:expr, $key:expr, $($arg:tt)*) => {
        if let Some(suppressed) = $throttler.admit($key) {
            if suppressed > 0 {
                tracing::warn!(suppressed, $($arg)*);
            } else {
                tracing::warn!($($arg)*);
            }
        }
    };
}

/// Throttled debug line
#[macro_export]
macro_rules! debug_throttled {
    ($throttler:expr, $key:expr, $($arg:tt)*) => {
        if $throttler.should_log($key) {
            tracing::debug!($($arg)*);
        }
    };
}
