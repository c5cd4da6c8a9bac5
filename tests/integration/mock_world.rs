//! Mock world adapters for integration tests.
//!
//! Each mock keeps its record behind an `Rc<RefCell<..>>` so the test
//! still holds a handle after the device has taken ownership of the boxed
//! adapter.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::net::SocketAddrV4;
use std::rc::Rc;

use nodemcu_sim::Device;
use nodemcu_sim::config::SimConfig;
use nodemcu_sim::node::DeviceEvent;
use nodemcu_sim::ports::{AnalogSource, EventSink, RemoteService, ServiceContext, ServiceReply};
use nodemcu_sim::wifi::sta::{self, StationConfig, StationStatus};

pub const SSID: &str = "nodemcu-lab";
pub const PASSWORD: &str = "correct-horse";

// ── RecordingSink ─────────────────────────────────────────────

#[derive(Clone, Default)]
pub struct RecordingSink {
    pub events: Rc<RefCell<Vec<DeviceEvent>>>,
}

#[allow(dead_code)]
impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn boots(&self) -> usize {
        self.events.borrow().iter().filter(|e| matches!(e, DeviceEvent::Booted(_))).count()
    }

    pub fn last(&self) -> Option<DeviceEvent> {
        self.events.borrow().last().copied()
    }
}

impl EventSink for RecordingSink {
    fn emit(&mut self, event: &DeviceEvent) {
        self.events.borrow_mut().push(*event);
    }
}

// ── ScriptedAnalog ────────────────────────────────────────────

/// Plays back queued TOUT readings, then repeats the last one.
pub struct ScriptedAnalog {
    readings: VecDeque<u16>,
    last: u16,
    pub vdd33_mv: u16,
}

#[allow(dead_code)]
impl ScriptedAnalog {
    pub fn new(readings: &[u16]) -> Self {
        Self { readings: readings.iter().copied().collect(), last: 0, vdd33_mv: 3300 }
    }
}

impl AnalogSource for ScriptedAnalog {
    fn tout(&mut self) -> u16 {
        if let Some(v) = self.readings.pop_front() {
            self.last = v;
        }
        self.last
    }

    fn vdd33_mv(&mut self) -> u16 {
        self.vdd33_mv
    }
}

// ── RecordingService ──────────────────────────────────────────

/// Remote host that records every connection and payload.  Replies with
/// `ack` to each payload when set.
#[derive(Clone, Default)]
pub struct RecordingService {
    pub connects: Rc<RefCell<Vec<SocketAddrV4>>>,
    pub received: Rc<RefCell<Vec<Vec<u8>>>>,
    pub ack: Option<Vec<u8>>,
}

#[allow(dead_code)]
impl RecordingService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acking(ack: &[u8]) -> Self {
        Self { ack: Some(ack.to_vec()), ..Self::default() }
    }

    pub fn payloads(&self) -> Vec<Vec<u8>> {
        self.received.borrow().clone()
    }
}

impl RemoteService for RecordingService {
    fn on_connect(&mut self, _ctx: &ServiceContext, peer: SocketAddrV4) -> ServiceReply {
        self.connects.borrow_mut().push(peer);
        ServiceReply::none()
    }

    fn on_data(&mut self, _ctx: &ServiceContext, _peer: SocketAddrV4, data: &[u8]) -> ServiceReply {
        self.received.borrow_mut().push(data.to_vec());
        match &self.ack {
            Some(ack) => ServiceReply::frame(ack.clone()),
            None => ServiceReply::none(),
        }
    }
}

// ── Device helpers ────────────────────────────────────────────

#[allow(dead_code)]
pub fn device() -> Device {
    Device::new(SimConfig::default()).unwrap()
}

#[allow(dead_code)]
pub fn recorded_device() -> (Device, RecordingSink) {
    let sink = RecordingSink::new();
    let dev = Device::with_sink(SimConfig::default(), Box::new(sink.clone())).unwrap();
    (dev, sink)
}

/// Station joined to the default AP with a DHCP lease.
#[allow(dead_code)]
pub fn online_device() -> Device {
    let mut dev = device();
    sta::config(&mut dev, StationConfig::new(SSID, PASSWORD)).unwrap();
    dev.run_ms(2500);
    assert_eq!(sta::status(&dev), StationStatus::GotIp);
    dev
}

/// Shared counter for callbacks to bump.
#[allow(dead_code)]
pub fn counter() -> Rc<RefCell<u32>> {
    Rc::new(RefCell::new(0))
}
