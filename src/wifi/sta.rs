//! Station (client) mode.
//!
//! ```text
//!   Idle ──connect──▶ Connecting ──assoc──┬─▶ NoApFound ─────┐
//!                                         ├─▶ WrongPassword ─┤ retry (auto)
//!                                         ├─▶ ConnectFail ───┘
//!                                         └─▶ associated ──dhcp──▶ GotIp
//! ```
//!
//! Credentials live in memory and, when saved, in flash (`wifi::sta`).
//! With auto-connect on, failures are retried after `wifi_retry_ms` and a
//! saved configuration connects again after every boot.

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use super::eventmon::{self, WifiEvent, WifiEventHandler, WifiEventKind};
use super::{AuthMode, IpInfo, NVS_NAMESPACE, SuspendState};
use crate::adapters::utils::{is_printable_ascii, is_valid_hostname};
use crate::device::Device;
use crate::error::{Result, WifiError};
use crate::events::Task;
use crate::net::dns;
use crate::ports::StoragePort;

const NVS_KEY: &str = "sta";

pub const SSID_MAX_LEN: usize = 32;
pub const PASSWORD_MAX_LEN: usize = 64;
pub const HOSTNAME_MAX_LEN: usize = 32;

/// Discriminants match `wifi.sta.status()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StationStatus {
    Idle = 0,
    Connecting = 1,
    WrongPassword = 2,
    NoApFound = 3,
    ConnectFail = 4,
    GotIp = 5,
}

/// 802.11 / SDK disconnect reason codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DisconnectReason {
    Unspecified = 1,
    AssocLeave = 8,
    BeaconTimeout = 200,
    NoApFound = 201,
    AuthFail = 202,
    AssocFail = 203,
}

/// Stored station credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub ssid: heapless::String<SSID_MAX_LEN>,
    pub pwd: heapless::String<PASSWORD_MAX_LEN>,
    pub bssid: Option<[u8; 6]>,
    pub auto: bool,
}

/// Access point seen by a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApInfo {
    pub ssid: String,
    pub bssid: [u8; 6],
    pub rssi: i8,
    pub channel: u8,
    pub auth: AuthMode,
}

pub(crate) type ScanReply = Box<dyn FnOnce(&mut Device, Vec<ApInfo>)>;

/// Argument to [`config`].
pub struct StationConfig {
    ssid: String,
    pwd: String,
    bssid: Option<[u8; 6]>,
    auto: bool,
    save: bool,
    handlers: Vec<(WifiEventKind, WifiEventHandler)>,
}

impl StationConfig {
    pub fn new(ssid: &str, pwd: &str) -> Self {
        Self {
            ssid: ssid.to_owned(),
            pwd: pwd.to_owned(),
            bssid: None,
            auto: true,
            save: false,
            handlers: Vec::new(),
        }
    }

    /// Only associate with this BSSID.
    pub fn bssid(mut self, bssid: [u8; 6]) -> Self {
        self.bssid = Some(bssid);
        self
    }

    pub fn auto(mut self, auto: bool) -> Self {
        self.auto = auto;
        self
    }

    /// Persist to flash.
    pub fn save(mut self, save: bool) -> Self {
        self.save = save;
        self
    }

    fn on(mut self, kind: WifiEventKind, f: impl FnMut(&mut Device, &WifiEvent) + 'static) -> Self {
        self.handlers.push((kind, eventmon::handler(f)));
        self
    }

    pub fn on_connected(self, f: impl FnMut(&mut Device, &WifiEvent) + 'static) -> Self {
        self.on(WifiEventKind::StaConnected, f)
    }

    pub fn on_disconnected(self, f: impl FnMut(&mut Device, &WifiEvent) + 'static) -> Self {
        self.on(WifiEventKind::StaDisconnected, f)
    }

    pub fn on_authmode_change(self, f: impl FnMut(&mut Device, &WifiEvent) + 'static) -> Self {
        self.on(WifiEventKind::StaAuthModeChange, f)
    }

    pub fn on_got_ip(self, f: impl FnMut(&mut Device, &WifiEvent) + 'static) -> Self {
        self.on(WifiEventKind::StaGotIp, f)
    }

    pub fn on_dhcp_timeout(self, f: impl FnMut(&mut Device, &WifiEvent) + 'static) -> Self {
        self.on(WifiEventKind::StaDhcpTimeout, f)
    }
}

pub(crate) struct Station {
    creds: Option<Credentials>,
    status: StationStatus,
    ip: Option<IpInfo>,
    static_ip: Option<IpInfo>,
    hostname: String,
    /// World AP index while associated.
    ap: Option<usize>,
    generation: u32,
    mac: [u8; 6],
}

impl Station {
    pub(crate) fn new(mac: [u8; 6], chip_id: u32) -> Self {
        Self {
            creds: None,
            status: StationStatus::Idle,
            ip: None,
            static_ip: None,
            hostname: format!("NODE-{:06X}", chip_id & 0x00ff_ffff),
            ap: None,
            generation: 0,
            mac,
        }
    }

    /// Drop the link and in-memory credentials (reset).
    pub(crate) fn power_down(&mut self) {
        self.creds = None;
        self.status = StationStatus::Idle;
        self.ip = None;
        self.ap = None;
        self.generation = self.generation.wrapping_add(1);
    }

    pub(crate) fn associated(&self) -> bool {
        self.ap.is_some()
    }

    fn invalidate(&mut self) -> u32 {
        self.generation = self.generation.wrapping_add(1);
        self.generation
    }
}

// ───────────────────────────────────────────────────────────────
// Validation
// ───────────────────────────────────────────────────────────────

fn validate_ssid(ssid: &str) -> Result<()> {
    if ssid.is_empty() || ssid.len() > SSID_MAX_LEN || !is_printable_ascii(ssid) {
        return Err(WifiError::InvalidSsid.into());
    }
    Ok(())
}

/// Empty (open), 5 or 13 characters (WEP), or 8-64 (WPA).
fn validate_password(pwd: &str) -> Result<()> {
    match pwd.len() {
        0 | 5 | 13 | 8..=PASSWORD_MAX_LEN => Ok(()),
        _ => Err(WifiError::InvalidPassword.into()),
    }
}

// ───────────────────────────────────────────────────────────────
// Public API
// ───────────────────────────────────────────────────────────────

/// Set station credentials and install any lifecycle handlers.  With
/// `auto` set and the station interface up, connecting starts at once.
pub fn config(dev: &mut Device, cfg: StationConfig) -> Result<()> {
    validate_ssid(&cfg.ssid)?;
    validate_password(&cfg.pwd)?;

    let mut ssid = heapless::String::new();
    ssid.push_str(&cfg.ssid).map_err(|()| WifiError::InvalidSsid)?;
    let mut pwd = heapless::String::new();
    pwd.push_str(&cfg.pwd).map_err(|()| WifiError::InvalidPassword)?;
    let creds = Credentials { ssid, pwd, bssid: cfg.bssid, auto: cfg.auto };

    for (kind, h) in cfg.handlers {
        eventmon::set_handler(dev, kind, Some(h));
    }
    if cfg.save {
        persist(dev, &creds);
    }
    info!("wifi: station config for \"{}\" (auto={})", creds.ssid, creds.auto);
    dev.wifi.sta.creds = Some(creds);

    if cfg.auto && dev.wifi.mode.has_station() {
        drop_link(dev, DisconnectReason::AssocLeave);
        begin_connect(dev);
    }
    Ok(())
}

/// Start connecting with the stored credentials.
pub fn connect(dev: &mut Device) -> Result<()> {
    if !dev.wifi.mode.has_station() {
        return Err(WifiError::WrongMode.into());
    }
    if dev.wifi.sta.creds.is_none() {
        return Err(WifiError::NoConfig.into());
    }
    if matches!(dev.wifi.sta.status, StationStatus::Connecting | StationStatus::GotIp) {
        return Ok(());
    }
    begin_connect(dev);
    Ok(())
}

/// Leave the access point.  Auto-connect does not kick in until the next
/// `connect` or boot.
pub fn disconnect(dev: &mut Device) {
    drop_link(dev, DisconnectReason::AssocLeave);
}

pub fn status(dev: &Device) -> StationStatus {
    dev.wifi.sta.status
}

/// Station address, netmask and gateway; `None` until got-ip.
pub fn getip(dev: &Device) -> Option<IpInfo> {
    if !dev.wifi.mode.has_station() {
        return None;
    }
    dev.wifi.sta.ip
}

/// Use a static address instead of DHCP.  Applies immediately when
/// associated.
pub fn setip(dev: &mut Device, info: IpInfo) -> bool {
    dev.wifi.sta.static_ip = Some(info);
    if dev.wifi.sta.ip.is_some() {
        dev.wifi.sta.ip = Some(info);
    }
    true
}

/// Letters, digits and hyphens, at most 32, starting and ending
/// alphanumeric.
pub fn set_hostname(dev: &mut Device, name: &str) -> bool {
    if !is_valid_hostname(name, HOSTNAME_MAX_LEN) {
        warn!("wifi: invalid hostname {name:?}");
        return false;
    }
    dev.wifi.sta.hostname = name.to_owned();
    true
}

pub fn hostname(dev: &Device) -> String {
    dev.wifi.sta.hostname.clone()
}

/// Signal strength of the associated AP.
pub fn getrssi(dev: &Device) -> Option<i8> {
    let idx = dev.wifi.sta.ap?;
    dev.world.aps.get(idx).map(|ap| ap.cfg.rssi)
}

pub fn getmac(dev: &Device) -> [u8; 6] {
    dev.wifi.sta.mac
}

pub fn getconfig(dev: &Device) -> Option<Credentials> {
    dev.wifi.sta.creds.clone()
}

/// Forget credentials in memory and flash, and disconnect.
pub fn clearconfig(dev: &mut Device) -> bool {
    drop_link(dev, DisconnectReason::AssocLeave);
    dev.wifi.sta.creds = None;
    if let Err(e) = dev.flash.delete(NVS_NAMESPACE, NVS_KEY) {
        warn!("wifi: failed to erase saved config: {e}");
        return false;
    }
    true
}

/// Turn auto-connect on or off, in memory and in flash if saved.
pub fn autoconnect(dev: &mut Device, enabled: bool) {
    let Some(creds) = dev.wifi.sta.creds.as_mut() else {
        return;
    };
    creds.auto = enabled;
    let creds = creds.clone();
    if dev.flash.exists(NVS_NAMESPACE, NVS_KEY) {
        persist(dev, &creds);
    }
    if enabled && dev.wifi.mode.has_station() && dev.wifi.sta.status != StationStatus::GotIp {
        begin_connect(dev);
    }
}

/// Scan for access points; `callback` gets the list after `scan_ms`.
pub fn scan(dev: &mut Device, callback: impl FnOnce(&mut Device, Vec<ApInfo>) + 'static) -> bool {
    if !dev.wifi.mode.has_station() {
        warn!("wifi: scan needs station mode");
        return false;
    }
    let delay = dev.cfg.timing.scan_ms;
    dev.post_ms(delay, Task::WifiScan(Box::new(callback)));
    true
}

// ───────────────────────────────────────────────────────────────
// Connection state machine
// ───────────────────────────────────────────────────────────────

fn persist(dev: &mut Device, creds: &Credentials) {
    if let Err(e) = dev.flash.save_record(NVS_NAMESPACE, NVS_KEY, creds) {
        warn!("wifi: failed to save station config: {e}");
    }
}

/// Load saved credentials and auto-connect (boot).
pub(crate) fn boot(dev: &mut Device) {
    dev.wifi.sta.creds = match dev.flash.load_record::<Credentials>(NVS_NAMESPACE, NVS_KEY) {
        Ok(creds) => creds,
        Err(e) => {
            warn!("wifi: saved station config unreadable: {e}");
            None
        }
    };
    auto_start(dev);
}

/// Connect if credentials with auto-connect are present.
pub(crate) fn auto_start(dev: &mut Device) {
    let auto = dev.wifi.sta.creds.as_ref().is_some_and(|c| c.auto);
    if auto && dev.wifi.mode.has_station() {
        begin_connect(dev);
    }
}

pub(crate) fn begin_connect(dev: &mut Device) {
    if dev.wifi.suspend_state() != SuspendState::Awake {
        debug!("wifi: radio suspended, connect deferred");
        return;
    }
    let sta = &mut dev.wifi.sta;
    sta.status = StationStatus::Connecting;
    sta.ip = None;
    sta.ap = None;
    let generation = sta.invalidate();
    let delay = dev.cfg.timing.wifi_assoc_ms;
    dev.post_ms(delay, Task::WifiAssoc { generation });
}

fn current(dev: &Device, generation: u32) -> bool {
    dev.wifi.sta.generation == generation && dev.wifi.mode.has_station()
}

pub(crate) fn complete_assoc(dev: &mut Device, generation: u32) {
    if !current(dev, generation) {
        return;
    }
    let Some(creds) = dev.wifi.sta.creds.clone() else {
        dev.wifi.sta.status = StationStatus::Idle;
        return;
    };

    let Some(idx) = dev.world.find_ap(&creds.ssid, creds.bssid) else {
        info!("wifi: AP \"{}\" not found", creds.ssid);
        fail(dev, &creds, StationStatus::NoApFound, [0; 6], DisconnectReason::NoApFound);
        return;
    };
    let ap = dev.world.aps[idx].cfg.clone();
    if ap.auth != AuthMode::Open && ap.password != creds.pwd.as_str() {
        info!("wifi: wrong password for \"{}\"", creds.ssid);
        fail(dev, &creds, StationStatus::WrongPassword, ap.bssid, DisconnectReason::AuthFail);
        return;
    }
    if dev.world.aps[idx].refuses_assoc {
        info!("wifi: \"{}\" refused association", creds.ssid);
        fail(dev, &creds, StationStatus::ConnectFail, ap.bssid, DisconnectReason::AssocFail);
        return;
    }

    dev.wifi.sta.ap = Some(idx);
    dev.wifi.set_channel(ap.channel);
    info!("wifi: associated with \"{}\" on channel {}", ap.ssid, ap.channel);
    eventmon::emit(
        dev,
        WifiEvent::StaConnected { ssid: ap.ssid.clone(), bssid: ap.bssid, channel: ap.channel },
    );
    let delay = dev.cfg.timing.dhcp_ms;
    dev.post_ms(delay, Task::WifiDhcp { generation });
}

fn fail(
    dev: &mut Device,
    creds: &Credentials,
    status: StationStatus,
    bssid: [u8; 6],
    reason: DisconnectReason,
) {
    dev.wifi.sta.status = status;
    eventmon::emit(
        dev,
        WifiEvent::StaDisconnected { ssid: creds.ssid.to_string(), bssid, reason },
    );
    if creds.auto {
        schedule_retry(dev);
    }
}

fn schedule_retry(dev: &mut Device) {
    let generation = dev.wifi.sta.generation;
    let delay = dev.cfg.timing.wifi_retry_ms;
    dev.post_ms(
        delay,
        Task::Call(Box::new(move |dev| {
            if current(dev, generation) {
                begin_connect(dev);
            }
        })),
    );
}

pub(crate) fn complete_dhcp(dev: &mut Device, generation: u32) {
    if !current(dev, generation) {
        return;
    }
    let Some(idx) = dev.wifi.sta.ap else {
        return;
    };
    let Some(ap) = dev.world.aps.get(idx).map(|a| a.cfg.clone()) else {
        return;
    };

    let lease = match dev.wifi.sta.static_ip {
        Some(info) => info,
        None if ap.dhcp => {
            dns::dhcp_offer(dev, ap.dns);
            ap.lease
        }
        None => {
            info!("wifi: DHCP timeout on \"{}\"", ap.ssid);
            eventmon::emit(dev, WifiEvent::StaDhcpTimeout);
            let delay = dev.cfg.timing.wifi_retry_ms;
            dev.post_ms(delay, Task::WifiDhcp { generation });
            return;
        }
    };

    dev.wifi.sta.status = StationStatus::GotIp;
    dev.wifi.sta.ip = Some(lease);
    info!("wifi: got ip {}", lease.ip);
    eventmon::emit(
        dev,
        WifiEvent::StaGotIp { ip: lease.ip, netmask: lease.netmask, gateway: lease.gateway },
    );
}

/// Tear down the current link, reporting `reason` if there was one.
pub(crate) fn drop_link(dev: &mut Device, reason: DisconnectReason) {
    let sta = &mut dev.wifi.sta;
    let ap = sta.ap.take();
    sta.ip = None;
    sta.status = StationStatus::Idle;
    sta.invalidate();
    let Some(idx) = ap else {
        return;
    };
    let (ssid, bssid) = dev
        .world
        .aps
        .get(idx)
        .map(|a| (a.cfg.ssid.clone(), a.cfg.bssid))
        .unwrap_or_default();
    eventmon::emit(dev, WifiEvent::StaDisconnected { ssid, bssid, reason });
}

/// The AP at `idx` went away (world hook).
pub(crate) fn link_lost(dev: &mut Device, idx: usize) {
    if dev.wifi.sta.ap != Some(idx) {
        return;
    }
    drop_link(dev, DisconnectReason::BeaconTimeout);
    if dev.wifi.sta.creds.as_ref().is_some_and(|c| c.auto) {
        dev.wifi.sta.status = StationStatus::Connecting;
        schedule_retry(dev);
    }
}

/// The AP at `idx` changed its auth mode (world hook).
pub(crate) fn authmode_changed(dev: &mut Device, idx: usize, old: AuthMode, new: AuthMode) {
    if dev.wifi.sta.ap == Some(idx) {
        eventmon::emit(dev, WifiEvent::StaAuthModeChange { old, new });
    }
}

/// Drop the association without an event (suspend).
pub(crate) fn suspend_link(dev: &mut Device) {
    let sta = &mut dev.wifi.sta;
    sta.ap = None;
    sta.ip = None;
    sta.status = StationStatus::Idle;
    sta.invalidate();
}

pub(crate) fn complete_scan(dev: &mut Device, reply: ScanReply) {
    let found: Vec<ApInfo> = dev
        .world
        .aps
        .iter()
        .filter(|a| a.online)
        .map(|a| ApInfo {
            ssid: a.cfg.ssid.clone(),
            bssid: a.cfg.bssid,
            rssi: a.cfg.rssi,
            channel: a.cfg.channel,
            auth: a.cfg.auth,
        })
        .collect();
    debug!("wifi: scan found {} APs", found.len());
    reply(dev, found);
}
