//! Device communication layer with error handling and retry logic.
//!
//! Classifies transport errors so the poll loop can tell a hiccup from an
//! unplugged controller, retries transient write failures, and schedules
//! reconnect attempts with capped exponential backoff.

use crate::error::{Error, Result};
use crate::transport::HidTransport;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// Maximum retry attempts for transient errors.
pub const MAX_RETRIES: u32 = 3;

/// Classification of communication errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Transient errors that may succeed on retry (timeout, busy).
    Transient,
    /// Device is disconnected: stop polling, reconnect.
    Disconnected,
    /// Permission denied: udev rule or exclusive access.
    PermissionDenied,
    /// Report framing error: drop the frame, keep polling.
    Protocol,
    /// Invalid data or parameters.
    InvalidResponse,
}

impl ErrorClass {
    /// Classify an error for retry decisions.
    pub fn classify(err: &Error) -> Self {
        match err {
            Error::Timeout(_) => Self::Transient,
            Error::PermissionDenied(_) => Self::PermissionDenied,
            Error::DeviceNotFound(_) | Error::TransportDisconnected(_) | Error::SessionClosed => {
                Self::Disconnected
            }
            Error::MalformedReport(_) | Error::ChecksumMismatch { .. } => Self::Protocol,
            Error::Hid(msg) => {
                let lower = msg.to_lowercase();
                if lower.contains("disconnect")
                    || lower.contains("not found")
                    || lower.contains("no such device")
                    || lower.contains("input/output error")
                {
                    Self::Disconnected
                } else if lower.contains("permission")
                    || lower.contains("access denied")
                    || lower.contains("access is denied")
                {
                    Self::PermissionDenied
                } else if lower.contains("timeout")
                    || lower.contains("timed out")
                    || lower.contains("resource temporarily unavailable")
                {
                    Self::Transient
                } else {
                    Self::InvalidResponse
                }
            }
            Error::TemplateRender { .. }
            | Error::ActionQueueFull { .. }
            | Error::InvalidBindingSelector { .. }
            | Error::OutOfRange { .. }
            | Error::Config(_)
            | Error::Profile(_)
            | Error::ActionFailed(_) => Self::InvalidResponse,
        }
    }

    /// Whether this error class is worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient)
    }

    /// Whether the handle should be dropped and reopened.
    pub fn needs_reconnect(&self) -> bool {
        matches!(
            self,
            Self::Disconnected | Self::PermissionDenied | Self::InvalidResponse
        )
    }
}

/// Write an output report with automatic retry for transient errors.
///
/// Returns the last error after exhausting retries.
pub fn write_with_retry(
    transport: &dyn HidTransport,
    report: &[u8],
    max_retries: u32,
) -> Result<usize> {
    let mut last_error = None;

    for attempt in 0..=max_retries {
        match transport.write(report) {
            Ok(n) => {
                if attempt > 0 {
                    debug!("output write succeeded on attempt {}", attempt + 1);
                }
                return Ok(n);
            }
            Err(e) => {
                let class = ErrorClass::classify(&e);

                if !class.is_retryable() || attempt == max_retries {
                    warn!(
                        "output write failed (class={:?}, attempt={}/{}): {}",
                        class,
                        attempt + 1,
                        max_retries + 1,
                        e
                    );
                    return Err(e);
                }

                debug!(
                    "transient write error (attempt {}/{}): {}, retrying...",
                    attempt + 1,
                    max_retries + 1,
                    e
                );
                last_error = Some(e);
            }
        }
    }

    Err(last_error.unwrap_or_else(|| Error::Hid("retry loop completed without result".into())))
}

/// Reconnect backoff parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    #[serde(with = "millis")]
    pub initial: Duration,
    #[serde(with = "millis")]
    pub max: Duration,
    pub factor: f32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(250),
            max: Duration::from_secs(5),
            factor: 2.0,
        }
    }
}

/// Exponential backoff capped at [`BackoffConfig::max`].
#[derive(Debug, Clone)]
pub struct Backoff {
    config: BackoffConfig,
    attempt: u32,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// Delay before the next attempt; grows until the cap.
    pub fn next_delay(&mut self) -> Duration {
        let exp = (self.config.factor.max(1.0) as f64).powi(self.attempt.min(32) as i32);
        let nanos = (self.config.initial.as_nanos() as f64 * exp).min(u64::MAX as f64);
        let delay = Duration::from_nanos(nanos as u64).min(self.config.max);
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    /// Attempts since the last reset.
    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

/// Serde helper: `Duration` as integer milliseconds.
pub(crate) mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> std::result::Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}
