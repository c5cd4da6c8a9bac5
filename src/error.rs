//! Unified error types for the simulated firmware API.
//!
//! The firmware reports most failures through boolean returns or callbacks;
//! the operations that would raise a Lua error (bad arguments, rejected
//! configuration) return [`Error`].  All variants are `Copy` so they can be
//! passed through callbacks without allocation.

use core::fmt;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Every fallible operation in the crate funnels into this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    Timer(TimerError),
    Net(NetError),
    Wifi(WifiError),
    Rtc(RtcError),
    /// Configuration is invalid.
    Config(ConfigError),
    /// The operation is already in progress (SNTP sync, wifi suspend).
    Busy(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timer(e) => write!(f, "tmr: {e}"),
            Self::Net(e) => write!(f, "net: {e}"),
            Self::Wifi(e) => write!(f, "wifi: {e}"),
            Self::Rtc(e) => write!(f, "rtc: {e}"),
            Self::Config(e) => write!(f, "config: {e}"),
            Self::Busy(what) => write!(f, "{what} already in progress"),
        }
    }
}

impl std::error::Error for Error {}

// ---------------------------------------------------------------------------
// Timer errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerError {
    /// Interval is zero or above the firmware maximum.
    IntervalOutOfRange(u32),
    /// The timer has no registered configuration.
    NotRegistered,
}

impl fmt::Display for TimerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IntervalOutOfRange(ms) => write!(f, "interval {ms} ms out of range"),
            Self::NotRegistered => write!(f, "timer not registered"),
        }
    }
}

impl From<TimerError> for Error {
    fn from(e: TimerError) -> Self {
        Self::Timer(e)
    }
}

// ---------------------------------------------------------------------------
// Network errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetError {
    /// Server inactivity timeout outside 1..=28800 seconds.
    TimeoutOutOfRange(u32),
}

impl fmt::Display for NetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TimeoutOutOfRange(s) => write!(f, "server timeout {s} s out of range"),
        }
    }
}

impl From<NetError> for Error {
    fn from(e: NetError) -> Self {
        Self::Net(e)
    }
}

// ---------------------------------------------------------------------------
// WiFi errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WifiError {
    InvalidSsid,
    InvalidPassword,
    InvalidChannel(u8),
    InvalidMaxConnections(u8),
    InvalidSuspendDuration(u32),
    /// The operation needs a mode the radio is not in.
    WrongMode,
    /// No station configuration is stored.
    NoConfig,
}

impl fmt::Display for WifiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidSsid => write!(f, "SSID must be 1-32 bytes"),
            Self::InvalidPassword => {
                write!(f, "password must be empty, 5 or 13 chars (WEP) or 8-64 chars (WPA)")
            }
            Self::InvalidChannel(c) => write!(f, "channel {c} outside 1-13"),
            Self::InvalidMaxConnections(n) => write!(f, "max connections {n} outside 1-4"),
            Self::InvalidSuspendDuration(us) => {
                write!(f, "suspend duration {us} us outside 50000-268435454")
            }
            Self::WrongMode => write!(f, "operation not available in current mode"),
            Self::NoConfig => write!(f, "no station configuration"),
        }
    }
}

impl From<WifiError> for Error {
    fn from(e: WifiError) -> Self {
        Self::Wifi(e)
    }
}

// ---------------------------------------------------------------------------
// RTC errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RtcError {
    /// Wall-clock time has never been set.
    TimeNotSet,
    /// Alignment period of zero.
    ZeroAlignment,
}

impl fmt::Display for RtcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TimeNotSet => write!(f, "time not set"),
            Self::ZeroAlignment => write!(f, "alignment must be non-zero"),
        }
    }
}

impl From<RtcError> for Error {
    fn from(e: RtcError) -> Self {
        Self::Rtc(e)
    }
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// A field failed range validation.
    /// The `&'static str` describes which field and why.
    ValidationFailed(&'static str),
    /// A stored record failed to decode.
    Corrupted,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ValidationFailed(msg) => write!(f, "validation failed: {msg}"),
            Self::Corrupted => write!(f, "stored record corrupted"),
        }
    }
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Crate-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
