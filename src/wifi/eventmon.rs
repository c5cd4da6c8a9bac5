//! WiFi event monitor.
//!
//! One handler slot per [`WifiEventKind`]; registering overwrites.  Whether
//! an event has a handler is decided when it fires: a handled event is
//! queued on the loop, an unhandled one goes straight to the delivery
//! policy.  A handler registered after the event fired never sees it, even
//! within the same callback.  Unregistering before a queued event is
//! dispatched still cancels it.
//!
//! - [`EventDelivery::Drop`] (default): unhandled events are counted and
//!   discarded.
//! - [`EventDelivery::Buffer`]: up to [`BACKLOG_PER_KIND`] unhandled events
//!   per kind are kept (oldest evicted) and replayed when a handler for
//!   that kind is registered.

use std::cell::RefCell;
use std::net::Ipv4Addr;
use std::rc::Rc;

use log::debug;
use serde::{Deserialize, Serialize};

use super::sta::DisconnectReason;
use super::{AuthMode, Mode};
use crate::device::Device;
use crate::events::Task;

pub const BACKLOG_PER_KIND: usize = 8;
const KINDS: usize = 9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WifiEventKind {
    StaConnected,
    StaDisconnected,
    StaAuthModeChange,
    StaGotIp,
    StaDhcpTimeout,
    ApStaConnected,
    ApStaDisconnected,
    ApProbeReq,
    WifiModeChanged,
}

impl WifiEventKind {
    pub const ALL: [Self; KINDS] = [
        Self::StaConnected,
        Self::StaDisconnected,
        Self::StaAuthModeChange,
        Self::StaGotIp,
        Self::StaDhcpTimeout,
        Self::ApStaConnected,
        Self::ApStaDisconnected,
        Self::ApProbeReq,
        Self::WifiModeChanged,
    ];

    fn index(self) -> usize {
        self as usize
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WifiEvent {
    StaConnected { ssid: String, bssid: [u8; 6], channel: u8 },
    StaDisconnected { ssid: String, bssid: [u8; 6], reason: DisconnectReason },
    StaAuthModeChange { old: AuthMode, new: AuthMode },
    StaGotIp { ip: Ipv4Addr, netmask: Ipv4Addr, gateway: Ipv4Addr },
    StaDhcpTimeout,
    ApStaConnected { mac: [u8; 6], aid: u16 },
    ApStaDisconnected { mac: [u8; 6], aid: u16 },
    ApProbeReq { mac: [u8; 6], rssi: i8 },
    WifiModeChanged { old: Mode, new: Mode },
}

impl WifiEvent {
    pub fn kind(&self) -> WifiEventKind {
        match self {
            Self::StaConnected { .. } => WifiEventKind::StaConnected,
            Self::StaDisconnected { .. } => WifiEventKind::StaDisconnected,
            Self::StaAuthModeChange { .. } => WifiEventKind::StaAuthModeChange,
            Self::StaGotIp { .. } => WifiEventKind::StaGotIp,
            Self::StaDhcpTimeout => WifiEventKind::StaDhcpTimeout,
            Self::ApStaConnected { .. } => WifiEventKind::ApStaConnected,
            Self::ApStaDisconnected { .. } => WifiEventKind::ApStaDisconnected,
            Self::ApProbeReq { .. } => WifiEventKind::ApProbeReq,
            Self::WifiModeChanged { .. } => WifiEventKind::WifiModeChanged,
        }
    }
}

/// Fate of events that fire while no handler is registered for their kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EventDelivery {
    #[default]
    Drop,
    Buffer,
}

pub type WifiEventHandler = Rc<RefCell<dyn FnMut(&mut Device, &WifiEvent)>>;

/// Wrap a closure as a [`WifiEventHandler`].
pub fn handler(f: impl FnMut(&mut Device, &WifiEvent) + 'static) -> WifiEventHandler {
    Rc::new(RefCell::new(f))
}

pub(crate) struct EventMonitor {
    handlers: [Option<WifiEventHandler>; KINDS],
    backlog: [heapless::Deque<WifiEvent, BACKLOG_PER_KIND>; KINDS],
    delivery: EventDelivery,
    dropped: u32,
}

impl EventMonitor {
    pub(crate) fn new(delivery: EventDelivery) -> Self {
        Self {
            handlers: Default::default(),
            backlog: Default::default(),
            delivery,
            dropped: 0,
        }
    }

    /// Forget every registration and buffered event (reset).
    pub(crate) fn clear(&mut self) {
        *self = Self::new(self.delivery);
    }
}

/// Install (`Some`) or remove (`None`) the handler for `kind`.
pub fn set_handler(dev: &mut Device, kind: WifiEventKind, handler: Option<WifiEventHandler>) {
    let mon = &mut dev.wifi.events;
    let replay = handler.is_some();
    mon.handlers[kind.index()] = handler;
    if !replay {
        return;
    }
    let mut buffered = Vec::new();
    while let Some(ev) = mon.backlog[kind.index()].pop_front() {
        buffered.push(ev);
    }
    for ev in buffered {
        dev.post_now(Task::WifiEvent(ev));
    }
}

pub fn register(dev: &mut Device, kind: WifiEventKind, f: impl FnMut(&mut Device, &WifiEvent) + 'static) {
    set_handler(dev, kind, Some(handler(f)));
}

pub fn unregister(dev: &mut Device, kind: WifiEventKind) {
    set_handler(dev, kind, None);
}

/// Events discarded for lack of a handler since boot.
pub fn dropped_count(dev: &Device) -> u32 {
    dev.wifi.events.dropped
}

/// Queue `event` for delivery through the loop if a handler for its kind
/// is registered now.
pub(crate) fn emit(dev: &mut Device, event: WifiEvent) {
    if dev.wifi.events.handlers[event.kind().index()].is_none() {
        dev.wifi.events.unhandled(event);
        return;
    }
    dev.post_now(Task::WifiEvent(event));
}

pub(crate) fn deliver(dev: &mut Device, event: WifiEvent) {
    let kind = event.kind();
    let Some(h) = dev.wifi.events.handlers[kind.index()].clone() else {
        dev.wifi.events.unhandled(event);
        return;
    };
    (&mut *h.borrow_mut())(dev, &event);
}

impl EventMonitor {
    fn unhandled(&mut self, event: WifiEvent) {
        let kind = event.kind();
        match self.delivery {
            EventDelivery::Drop => {
                self.dropped += 1;
                debug!("wifi: {:?} dropped, no handler", kind);
            }
            EventDelivery::Buffer => {
                let queue = &mut self.backlog[kind.index()];
                if queue.is_full() {
                    queue.pop_front();
                    self.dropped += 1;
                }
                // Cannot fail: room was made above.
                let _ = queue.push_back(event);
            }
        }
    }
}
