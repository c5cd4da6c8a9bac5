//! Port traits: the boundary between the simulated firmware and the outside world.
//!
//! ```text
//!   World adapter ──▶ Port trait ──▶ Device (firmware model)
//! ```
//!
//! The [`Device`](crate::device::Device) only reaches flash, analog inputs,
//! remote hosts and its lifecycle observer through these traits, so tests
//! can swap any of them for a recording mock.

use std::net::SocketAddrV4;

use crate::node::DeviceEvent;

// ───────────────────────────────────────────────────────────────
// Storage port (device ↔ flash)
// ───────────────────────────────────────────────────────────────

/// Persistent key-value storage for the firmware's flash records
/// (saved station config, WiFi mode, ADC init mode).
///
/// Contents survive every reset, power cycles included.  Writes are atomic.
pub trait StoragePort {
    /// Read a value.  Returns the number of bytes written to `buf`.
    fn read(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError>;

    /// Write a value atomically.
    fn write(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError>;

    /// Delete a key.  Returns `Ok(())` even if the key didn't exist.
    fn delete(&mut self, namespace: &str, key: &str) -> Result<(), StorageError>;

    /// Check whether a key exists without reading it.
    fn exists(&self, namespace: &str, key: &str) -> bool;
}

// ───────────────────────────────────────────────────────────────
// Event sink port (device → logging / test recorder)
// ───────────────────────────────────────────────────────────────

/// The device reports lifecycle events (boot, reset, sleep) through this port.
pub trait EventSink {
    fn emit(&mut self, event: &DeviceEvent);
}

// ───────────────────────────────────────────────────────────────
// Analog port (world → ADC)
// ───────────────────────────────────────────────────────────────

/// Source of the voltages the ADC samples.
pub trait AnalogSource {
    /// Raw 10-bit reading of the TOUT pin.
    fn tout(&mut self) -> u16;

    /// Supply voltage in millivolts.
    fn vdd33_mv(&mut self) -> u16;
}

// ───────────────────────────────────────────────────────────────
// Remote service port (world hosts reachable over TCP/UDP)
// ───────────────────────────────────────────────────────────────

/// What a remote host can see when it handles traffic.
#[derive(Debug, Clone, Copy)]
pub struct ServiceContext {
    /// True UTC time in microseconds since the Unix epoch.
    pub true_time_us: u64,
}

/// Frames a remote host sends back, in order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceReply {
    pub frames: Vec<Vec<u8>>,
    /// Close the connection after the frames (TCP only).
    pub close: bool,
}

impl ServiceReply {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn frame(data: impl Into<Vec<u8>>) -> Self {
        Self { frames: vec![data.into()], close: false }
    }

    pub fn and_close(mut self) -> Self {
        self.close = true;
        self
    }
}

/// A host in the simulated world listening on one address.
///
/// TCP services see `on_connect` once per connection; UDP services only see
/// `on_data`, and their reply frames go back to the sender.
pub trait RemoteService {
    fn on_connect(&mut self, _ctx: &ServiceContext, _peer: SocketAddrV4) -> ServiceReply {
        ServiceReply::none()
    }

    fn on_data(&mut self, ctx: &ServiceContext, peer: SocketAddrV4, data: &[u8]) -> ServiceReply;
}

// ───────────────────────────────────────────────────────────────
// Error types
// ───────────────────────────────────────────────────────────────

/// Errors from [`StoragePort`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageError {
    /// Requested key does not exist.
    NotFound,
    /// Storage partition is full.
    Full,
    /// Generic I/O error.
    IoError,
}

impl core::fmt::Display for StorageError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NotFound => write!(f, "key not found"),
            Self::Full => write!(f, "storage full"),
            Self::IoError => write!(f, "I/O error"),
        }
    }
}
