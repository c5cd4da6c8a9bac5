//! Firmware tasks posted to the event loop.
//!
//! Tasks are produced by:
//! - API calls that complete asynchronously (connect, send, DNS, suspend)
//! - Armed timers and the software watchdog
//! - The simulated world (frames arriving, stations joining, AP loss)
//!
//! and consumed one at a time by [`Device::run_for`](crate::device::Device::run_for),
//! which routes each variant to the module that owns it.
//!
//! ```text
//! ┌─────────────┐     ┌──────────────┐     ┌──────────────┐
//! │ API calls   │────▶│              │     │              │
//! │ Timers      │────▶│   Timeline   │────▶│  Event loop  │
//! │ World hooks │────▶│ (due, seq)   │     │  (dispatch)  │
//! └─────────────┘     └──────────────┘     └──────────────┘
//! ```
//!
//! Stale tasks are never removed from the timeline; each carries the
//! generation it was posted under and is ignored on dispatch if its owner
//! has moved on.

use std::net::SocketAddrV4;

use crate::device::Device;
use crate::net::Notice;
use crate::net::dns::DnsReply;
use crate::wifi::eventmon::WifiEvent;
use crate::wifi::sta::ScanReply;

/// Identifier of a socket or server inside the net stack.
pub(crate) type NetId = u32;

pub(crate) enum Task {
    // ── tmr ───────────────────────────────────────────────
    /// A timer's alarm is due.
    TimerFire { id: u32, generation: u32 },
    /// `tmr.softwd` expired without being re-armed.
    SoftWatchdog { generation: u32 },

    // ── net ───────────────────────────────────────────────
    /// A TCP SYN reaches its destination.
    TcpConnect { sock: NetId, addr: SocketAddrV4 },
    /// A device server accepted a connection.
    Accept { server: NetId, sock: NetId },
    /// Connection-level callback (connection, reconnection, disconnection, sent).
    Notify { sock: NetId, notice: Notice },
    /// One inbound frame for a socket.
    Deliver { sock: NetId, frame: Vec<u8>, from: Option<SocketAddrV4> },
    /// Outbound payload reaches the wire; `to` is set for UDP.
    Transmit { sock: NetId, to: Option<SocketAddrV4>, data: Vec<u8> },
    /// Inactivity check for a server-side connection; at most one per socket.
    IdleCheck { sock: NetId },
    /// A DNS answer arrives.
    DnsAnswer { host: String, reply: DnsReply },

    // ── wifi ──────────────────────────────────────────────
    /// Station association attempt completes.
    WifiAssoc { generation: u32 },
    /// DHCP exchange completes.
    WifiDhcp { generation: u32 },
    /// Deliver an event to the event monitor.
    WifiEvent(WifiEvent),
    /// The radio honours a pending suspend request.
    WifiSuspend,
    /// A timed suspension ends.
    WifiResume { generation: u32 },
    /// A scan finishes.
    WifiScan(ScanReply),

    // ── node ──────────────────────────────────────────────
    /// Deep sleep ends.
    Wake,

    /// Deferred one-shot callback (resume confirmations, replays).
    Call(Box<dyn FnOnce(&mut Device)>),
}

impl Task {
    /// Short label for trace logging.
    pub(crate) fn label(&self) -> &'static str {
        match self {
            Self::TimerFire { .. } => "timer",
            Self::SoftWatchdog { .. } => "softwd",
            Self::TcpConnect { .. } => "tcp-connect",
            Self::Accept { .. } => "accept",
            Self::Notify { .. } => "notify",
            Self::Deliver { .. } => "deliver",
            Self::Transmit { .. } => "transmit",
            Self::IdleCheck { .. } => "idle-check",
            Self::DnsAnswer { .. } => "dns",
            Self::WifiAssoc { .. } => "wifi-assoc",
            Self::WifiDhcp { .. } => "wifi-dhcp",
            Self::WifiEvent(_) => "wifi-event",
            Self::WifiSuspend => "wifi-suspend",
            Self::WifiResume { .. } => "wifi-resume",
            Self::WifiScan(_) => "wifi-scan",
            Self::Wake => "wake",
            Self::Call(_) => "call",
        }
    }
}
