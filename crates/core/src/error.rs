//! Error types for dualsense-bridge-core.

use thiserror::Error;

/// Core library error type.
#[derive(Debug, Error)]
pub enum Error {
    /// HID device communication failure.
    #[error("HID error: {0}")]
    Hid(String),

    /// No matching controller at connect time.
    #[error("device not found: {0}")]
    DeviceNotFound(String),

    /// Input report with the wrong length or an unrecognized report ID.
    #[error("malformed report: {0}")]
    MalformedReport(String),

    /// Bluetooth frame whose trailing CRC32 does not match its body.
    #[error("checksum mismatch: expected 0x{expected:08X}, got 0x{actual:08X}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    /// The transport stopped delivering reports.
    #[error("transport disconnected: {0}")]
    TransportDisconnected(String),

    /// Action template failed to render, usually a placeholder the snapshot does not have.
    #[error("template '{template}' failed to render: {reason}")]
    TemplateRender { template: String, reason: String },

    /// Dispatch queue was full and the oldest requests were dropped.
    #[error("action queue full ({capacity} pending), dropped {dropped} oldest")]
    ActionQueueFull { capacity: usize, dropped: u64 },

    /// Configuration references an unknown or unusable input channel.
    #[error("invalid binding selector '{selector}': {reason}")]
    InvalidBindingSelector { selector: String, reason: String },

    /// Value out of safe range.
    #[error("value out of range: {field} = {value} (allowed {min}..={max})")]
    OutOfRange {
        field: &'static str,
        value: u32,
        min: u32,
        max: u32,
    },

    /// Mapping configuration document error.
    #[error("config error: {0}")]
    Config(String),

    /// Profile document error.
    #[error("profile error: {0}")]
    Profile(String),

    /// Permission denied opening the HID node.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Operation timed out.
    #[error("timeout: {0}")]
    Timeout(String),

    /// An executor could not carry out a dispatched action.
    #[error("action failed: {0}")]
    ActionFailed(String),

    /// The session's poll thread is gone.
    #[error("session closed")]
    SessionClosed,
}

/// Convenience Result alias.
pub type Result<T> = std::result::Result<T, Error>;
