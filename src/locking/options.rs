use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Lock acquisition policy.
///
/// A blocked acquisition fails with [`crate::types::Error::Deadlock`] as soon
/// as waiting would close a cycle (when detection is enabled), or with
/// [`crate::types::Error::LockTimeout`] once `acquire_timeout` elapses.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawLockOptions", into = "RawLockOptions")]
pub struct LockOptions {
    /// Maximum time to block on one acquisition; `None` waits indefinitely.
    ///
    /// `Some(Duration::ZERO)` fails any acquisition that would block. When
    /// written out, finite timeouts are rounded up to whole milliseconds with
    /// a minimum of 1 ms, since `acquire_timeout_ms = 0` reads as `None`.
    pub acquire_timeout: Option<Duration>,
    /// Whether blocked acquisitions check the wait-for graph for cycles.
    pub deadlock_detection: bool,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            acquire_timeout: Some(Duration::from_secs(10)),
            deadlock_detection: true,
        }
    }
}

impl LockOptions {
    /// Sets the acquisition timeout.
    pub fn acquire_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// Enables or disables deadlock detection.
    pub fn deadlock_detection(mut self, enabled: bool) -> Self {
        self.deadlock_detection = enabled;
        self
    }
}

// On-disk shape: timeouts in milliseconds, 0 meaning no timeout.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
struct RawLockOptions {
    acquire_timeout_ms: u64,
    deadlock_detection: bool,
}

impl Default for RawLockOptions {
    fn default() -> Self {
        LockOptions::default().into()
    }
}

impl From<RawLockOptions> for LockOptions {
    fn from(raw: RawLockOptions) -> Self {
        Self {
            acquire_timeout: (raw.acquire_timeout_ms > 0)
                .then(|| Duration::from_millis(raw.acquire_timeout_ms)),
            deadlock_detection: raw.deadlock_detection,
        }
    }
}

impl From<LockOptions> for RawLockOptions {
    fn from(opts: LockOptions) -> Self {
        Self {
            acquire_timeout_ms: opts
                .acquire_timeout
                .map(|t| {
                    u64::try_from(t.as_nanos().div_ceil(1_000_000))
                        .unwrap_or(u64::MAX)
                        .max(1)
                })
                .unwrap_or(0),
            deadlock_detection: opts.deadlock_detection,
        }
    }
}
