//! Soft access point.
//!
//! Active whenever the mode includes the AP.  Stations from the simulated
//! world join and leave through [`World`](crate::sim::World) hooks; each
//! gets an association id and a lease from the AP's DHCP range.

use std::net::Ipv4Addr;

use log::{info, warn};
use serde::{Deserialize, Serialize};

use super::eventmon::{self, WifiEvent};
use super::{AuthMode, IpInfo, NVS_NAMESPACE};
use crate::adapters::utils::is_printable_ascii;
use crate::config::DeviceConfig;
use crate::device::Device;
use crate::error::{Result, WifiError};

const NVS_KEY: &str = "ap";

pub const MAX_CONNECTIONS: u8 = 4;
/// First address handed to joining stations.
const DHCP_FIRST_HOST: u8 = 100;

/// Persisted soft-AP settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApSettings {
    pub ssid: heapless::String<32>,
    pub pwd: heapless::String<64>,
    pub channel: u8,
    pub max_connections: u8,
    pub hidden: bool,
}

impl ApSettings {
    pub fn auth(&self) -> AuthMode {
        if self.pwd.is_empty() { AuthMode::Open } else { AuthMode::WpaWpa2Psk }
    }
}

/// Argument to [`config`].
#[derive(Debug, Clone)]
pub struct ApConfig {
    ssid: String,
    pwd: String,
    channel: u8,
    max_connections: u8,
    hidden: bool,
    save: bool,
}

impl ApConfig {
    /// Open network when `pwd` is empty, WPA/WPA2 otherwise.
    pub fn new(ssid: &str, pwd: &str) -> Self {
        Self {
            ssid: ssid.to_owned(),
            pwd: pwd.to_owned(),
            channel: 1,
            max_connections: MAX_CONNECTIONS,
            hidden: false,
            save: false,
        }
    }

    pub fn channel(mut self, channel: u8) -> Self {
        self.channel = channel;
        self
    }

    pub fn max_connections(mut self, n: u8) -> Self {
        self.max_connections = n;
        self
    }

    pub fn hidden(mut self, hidden: bool) -> Self {
        self.hidden = hidden;
        self
    }

    pub fn save(mut self, save: bool) -> Self {
        self.save = save;
        self
    }
}

/// A station associated with the soft-AP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApClient {
    pub mac: [u8; 6],
    pub ip: Ipv4Addr,
    pub aid: u16,
}

pub(crate) struct SoftAp {
    default: ApSettings,
    settings: ApSettings,
    ip: IpInfo,
    clients: Vec<ApClient>,
    next_aid: u16,
    mac: [u8; 6],
}

impl SoftAp {
    pub(crate) fn new(cfg: &DeviceConfig) -> Self {
        let mut ssid = heapless::String::new();
        // Ten characters always fit.
        let _ = ssid.push_str(&format!("ESP_{:06X}", cfg.chip_id & 0x00ff_ffff));
        let default = ApSettings {
            ssid,
            pwd: heapless::String::new(),
            channel: 1,
            max_connections: MAX_CONNECTIONS,
            hidden: false,
        };
        Self {
            settings: default.clone(),
            default,
            ip: default_ip(),
            clients: Vec::new(),
            next_aid: 1,
            mac: cfg.ap_mac,
        }
    }

    pub(crate) fn power_down(&mut self) {
        self.settings = self.default.clone();
        self.ip = default_ip();
        self.clients.clear();
        self.next_aid = 1;
    }
}

fn default_ip() -> IpInfo {
    IpInfo {
        ip: Ipv4Addr::new(192, 168, 4, 1),
        netmask: Ipv4Addr::new(255, 255, 255, 0),
        gateway: Ipv4Addr::new(192, 168, 4, 1),
    }
}

pub(crate) fn boot(dev: &mut Device) {
    match dev.flash.load_record::<ApSettings>(NVS_NAMESPACE, NVS_KEY) {
        Ok(Some(s)) => dev.wifi.ap.settings = s,
        Ok(None) => {}
        Err(e) => warn!("wifi: saved AP config unreadable: {e}"),
    }
    if dev.wifi.mode.has_ap() && !dev.wifi.sta.associated() {
        let ch = dev.wifi.ap.settings.channel;
        dev.wifi.set_channel(ch);
    }
}

/// Configure the soft-AP.  Connected stations are dropped when settings
/// change on a live AP.
pub fn config(dev: &mut Device, cfg: ApConfig) -> Result<()> {
    if cfg.ssid.is_empty() || cfg.ssid.len() > 32 || !is_printable_ascii(&cfg.ssid) {
        return Err(WifiError::InvalidSsid.into());
    }
    if !cfg.pwd.is_empty() && !(8..=64).contains(&cfg.pwd.len()) {
        return Err(WifiError::InvalidPassword.into());
    }
    if !(1..=13).contains(&cfg.channel) {
        return Err(WifiError::InvalidChannel(cfg.channel).into());
    }
    if !(1..=MAX_CONNECTIONS).contains(&cfg.max_connections) {
        return Err(WifiError::InvalidMaxConnections(cfg.max_connections).into());
    }

    let mut ssid = heapless::String::new();
    ssid.push_str(&cfg.ssid).map_err(|()| WifiError::InvalidSsid)?;
    let mut pwd = heapless::String::new();
    pwd.push_str(&cfg.pwd).map_err(|()| WifiError::InvalidPassword)?;
    let settings = ApSettings {
        ssid,
        pwd,
        channel: cfg.channel,
        max_connections: cfg.max_connections,
        hidden: cfg.hidden,
    };
    if cfg.save {
        if let Err(e) = dev.flash.save_record(NVS_NAMESPACE, NVS_KEY, &settings) {
            warn!("wifi: failed to save AP config: {e}");
        }
    }

    if dev.wifi.mode.has_ap() {
        drop_clients(dev);
    }
    info!("wifi: soft-AP \"{}\" on channel {}", settings.ssid, settings.channel);
    dev.wifi.ap.settings = settings;
    if !dev.wifi.sta.associated() {
        dev.wifi.set_channel(cfg.channel);
    }
    Ok(())
}

pub fn getconfig(dev: &Device) -> ApSettings {
    dev.wifi.ap.settings.clone()
}

/// AP interface address; `None` unless the mode includes the AP.
pub fn getip(dev: &Device) -> Option<IpInfo> {
    dev.wifi.mode.has_ap().then_some(dev.wifi.ap.ip)
}

pub fn setip(dev: &mut Device, info: IpInfo) -> bool {
    dev.wifi.ap.ip = info;
    true
}

pub fn getmac(dev: &Device) -> [u8; 6] {
    dev.wifi.ap.mac
}

pub fn clients(dev: &Device) -> Vec<ApClient> {
    dev.wifi.ap.clients.clone()
}

// ───────────────────────────────────────────────────────────────
// World-side hooks
// ───────────────────────────────────────────────────────────────

/// A station associates.  False when the AP is down or full.
pub(crate) fn station_join(dev: &mut Device, mac: [u8; 6]) -> bool {
    if !dev.wifi.mode.has_ap() {
        return false;
    }
    let ap = &mut dev.wifi.ap;
    if ap.clients.iter().any(|c| c.mac == mac) {
        return true;
    }
    if ap.clients.len() >= usize::from(ap.settings.max_connections) {
        warn!("wifi: soft-AP full, station {mac:02x?} refused");
        return false;
    }
    let aid = ap.next_aid;
    ap.next_aid = ap.next_aid.wrapping_add(1);
    let [a, b, c, _] = ap.ip.ip.octets();
    let host = DHCP_FIRST_HOST.saturating_add(ap.clients.len() as u8);
    ap.clients.push(ApClient { mac, ip: Ipv4Addr::new(a, b, c, host), aid });
    eventmon::emit(dev, WifiEvent::ApStaConnected { mac, aid });
    true
}

pub(crate) fn station_leave(dev: &mut Device, mac: [u8; 6]) -> bool {
    let ap = &mut dev.wifi.ap;
    let Some(pos) = ap.clients.iter().position(|c| c.mac == mac) else {
        return false;
    };
    let client = ap.clients.remove(pos);
    eventmon::emit(dev, WifiEvent::ApStaDisconnected { mac, aid: client.aid });
    true
}

pub(crate) fn probe(dev: &mut Device, mac: [u8; 6], rssi: i8) {
    if dev.wifi.mode.has_ap() {
        eventmon::emit(dev, WifiEvent::ApProbeReq { mac, rssi });
    }
}

/// Disassociate every station (AP going down or reconfigured).
pub(crate) fn drop_clients(dev: &mut Device) {
    let gone = std::mem::take(&mut dev.wifi.ap.clients);
    for c in gone {
        eventmon::emit(dev, WifiEvent::ApStaDisconnected { mac: c.mac, aid: c.aid });
    }
}
