//! The simulated world around a device.
//!
//! ```text
//!   ┌──────────────── World ────────────────┐
//!   │ access points   remote services       │
//!   │ NTP servers     remote peers          │──▶ Device
//!   │ true-time clock analog inputs         │
//!   └───────────────────────────────────────┘
//! ```
//!
//! The world is owned by the [`Device`] and survives every reset.  Tests
//! and the binary script it through the free functions in this module,
//! which play the part of radio neighbours, remote hosts and the person
//! holding the reset button.

pub mod peer;
pub mod services;

use std::collections::HashMap;
use std::net::SocketAddrV4;

use log::info;

use crate::config::{AccessPointConfig, WorldConfig};
use crate::device::Device;
use crate::net::SocketKind;
use crate::node::{BootReason, ResetInfo};
use crate::ports::{AnalogSource, RemoteService};
use crate::sntp::packet::NTP_PORT;
use crate::wifi::{self, AuthMode};

pub use self::peer::{RemotePeer, connect_peer};
pub use self::services::{EchoService, HttpService, NtpService};

/// An access point within radio range.
pub(crate) struct SimAp {
    pub(crate) cfg: AccessPointConfig,
    pub(crate) online: bool,
    /// Authenticates stations but turns down their association (AP full).
    pub(crate) refuses_assoc: bool,
}

pub struct World {
    epoch_us: u64,
    drift_ppm: i32,
    pub(crate) aps: Vec<SimAp>,
    services: HashMap<(SocketKind, SocketAddrV4), Box<dyn RemoteService>>,
    analog: Box<dyn AnalogSource>,
    pub(crate) peers: peer::PeerTable,
}

impl World {
    pub(crate) fn new(cfg: &WorldConfig, analog: Box<dyn AnalogSource>) -> Self {
        let mut services: HashMap<_, Box<dyn RemoteService>> = HashMap::new();
        for ntp in &cfg.ntp_servers {
            let addr = SocketAddrV4::new(ntp.ip, NTP_PORT);
            services.insert((SocketKind::Udp, addr), Box::new(NtpService::new(ntp.stratum, ntp.reachable)));
        }
        Self {
            epoch_us: cfg.epoch_unix_secs.saturating_mul(1_000_000),
            drift_ppm: cfg.counter_drift_ppm,
            aps: cfg
                .access_points
                .iter()
                .map(|ap| SimAp { cfg: ap.clone(), online: true, refuses_assoc: false })
                .collect(),
            services,
            analog,
            peers: peer::PeerTable::new(cfg.remote_client_ip),
        }
    }

    /// True UTC time for a device counter reading.  A crystal running
    /// `drift_ppm` fast has counted that much more than true time.
    pub(crate) fn true_time_us(&self, counter_us: u64) -> u64 {
        let c = i128::from(counter_us);
        let truth = c - c * i128::from(self.drift_ppm) / 1_000_000;
        (i128::from(self.epoch_us) + truth).max(0) as u64
    }

    pub(crate) fn service_mut(
        &mut self,
        kind: SocketKind,
        addr: SocketAddrV4,
    ) -> Option<&mut Box<dyn RemoteService>> {
        self.services.get_mut(&(kind, addr))
    }

    pub(crate) fn analog(&mut self) -> &mut dyn AnalogSource {
        self.analog.as_mut()
    }

    /// Online AP matching `ssid` and, when pinned, `bssid`.
    pub(crate) fn find_ap(&self, ssid: &str, bssid: Option<[u8; 6]>) -> Option<usize> {
        self.aps.iter().position(|ap| {
            ap.online && ap.cfg.ssid == ssid && bssid.is_none_or(|b| b == ap.cfg.bssid)
        })
    }

    fn ap_index(&self, ssid: &str) -> Option<usize> {
        self.aps.iter().position(|ap| ap.cfg.ssid == ssid)
    }

    pub(crate) fn peer_receive(&mut self, id: u32, data: &[u8]) {
        self.peers.receive(id, data);
    }

    pub(crate) fn peer_closed(&mut self, id: u32) {
        self.peers.closed(id);
    }

    /// The device reset or went to sleep; every connection into it is gone.
    pub(crate) fn device_went_down(&mut self) {
        self.peers.close_all();
    }
}

// ───────────────────────────────────────────────────────────────
// Remote hosts
// ───────────────────────────────────────────────────────────────

/// Put `service` on `addr`.  Replaces whatever listened there.
pub fn add_service(
    dev: &mut Device,
    kind: SocketKind,
    addr: SocketAddrV4,
    service: impl RemoteService + 'static,
) {
    dev.world.services.insert((kind, addr), Box::new(service));
}

pub fn remove_service(dev: &mut Device, kind: SocketKind, addr: SocketAddrV4) -> bool {
    dev.world.services.remove(&(kind, addr)).is_some()
}

/// Swap the source the ADC samples.
pub fn set_analog(dev: &mut Device, source: Box<dyn AnalogSource>) {
    dev.world.analog = source;
}

/// True UTC time now, µs since the Unix epoch.
pub fn true_time_us(dev: &Device) -> u64 {
    dev.true_time_us()
}

// ───────────────────────────────────────────────────────────────
// Radio neighbourhood
// ───────────────────────────────────────────────────────────────

/// Switch an access point on or off.  A station associated with it loses
/// the link.  False for an unknown SSID.
pub fn ap_power(dev: &mut Device, ssid: &str, on: bool) -> bool {
    let Some(idx) = dev.world.ap_index(ssid) else {
        return false;
    };
    dev.world.aps[idx].online = on;
    info!("sim: AP \"{ssid}\" {}", if on { "on" } else { "off" });
    if !on {
        wifi::sta::link_lost(dev, idx);
    }
    true
}

/// Change an access point's security.
pub fn ap_set_auth(dev: &mut Device, ssid: &str, auth: AuthMode, password: &str) -> bool {
    let Some(idx) = dev.world.ap_index(ssid) else {
        return false;
    };
    let ap = &mut dev.world.aps[idx].cfg;
    let old = ap.auth;
    ap.auth = auth;
    ap.password = password.to_owned();
    if old != auth {
        wifi::sta::authmode_changed(dev, idx, old, auth);
    }
    true
}

/// Make an access point turn down association requests, as a full AP
/// does.  Stations see a connect failure.  An existing association stays.
pub fn ap_refuse_association(dev: &mut Device, ssid: &str, refuse: bool) -> bool {
    let Some(idx) = dev.world.ap_index(ssid) else {
        return false;
    };
    dev.world.aps[idx].refuses_assoc = refuse;
    true
}

/// Enable or disable the DHCP server of an access point.
pub fn ap_set_dhcp(dev: &mut Device, ssid: &str, enabled: bool) -> bool {
    let Some(idx) = dev.world.ap_index(ssid) else {
        return false;
    };
    dev.world.aps[idx].cfg.dhcp = enabled;
    true
}

/// A station associates with the device's soft-AP.
pub fn station_join(dev: &mut Device, mac: [u8; 6]) -> bool {
    wifi::ap::station_join(dev, mac)
}

pub fn station_leave(dev: &mut Device, mac: [u8; 6]) -> bool {
    wifi::ap::station_leave(dev, mac)
}

/// A station probes for the device's soft-AP.
pub fn probe_request(dev: &mut Device, mac: [u8; 6], rssi: i8) {
    wifi::ap::probe(dev, mac, rssi);
}

// ───────────────────────────────────────────────────────────────
// Faults and resets
// ───────────────────────────────────────────────────────────────

/// Fatal CPU exception with EXCCAUSE `cause`.
pub fn raise_exception(dev: &mut Device, cause: u32) {
    dev.request_reset(ResetInfo::exception(cause));
}

pub fn hardware_watchdog(dev: &mut Device) {
    dev.request_reset(ResetInfo::new(BootReason::HardwareWatchdog));
}

/// Pull the reset pin.  Also wakes a device sleeping without a timer.
pub fn external_reset(dev: &mut Device) {
    dev.request_reset(ResetInfo::new(BootReason::ExternalReset));
}

/// Remove and restore power: RTC memory and RTC time are lost, flash is not.
pub fn power_cycle(dev: &mut Device) {
    dev.request_reset(ResetInfo::new(BootReason::PowerOn));
}
