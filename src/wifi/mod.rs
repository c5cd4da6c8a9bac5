//! WiFi controller: radio mode, station, soft-AP, event monitor and
//! modem suspend.
//!
//! ```text
//!                 set_mode
//!   Null ◀──────────────────────▶ Station ─┐
//!     ▲                              ▲     │ one radio,
//!     └──────▶ SoftAp ◀──▶ StationAp ┘     │ one channel
//!                              └───────────┘
//! ```
//!
//! In `StationAp` the soft-AP follows whatever channel the station
//! associated on.  Mode, station credentials and AP settings are kept in
//! flash when saved and reloaded on every boot.

pub mod ap;
pub mod eventmon;
pub mod sta;

use std::net::Ipv4Addr;

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::config::DeviceConfig;
use crate::device::Device;
use crate::error::{Error, Result, WifiError};
use crate::events::Task;

use self::ap::SoftAp;
use self::eventmon::{EventMonitor, WifiEvent};
use self::sta::{DisconnectReason, Station};

pub(crate) const NVS_NAMESPACE: &str = "wifi";
const MODE_KEY: &str = "mode";

/// Suspend duration bounds in microseconds; 0 means until `resume`.
pub const MIN_SUSPEND_US: u32 = 50_000;
pub const MAX_SUSPEND_US: u32 = 268_435_454;

/// Radio operating mode.  Discriminants match `wifi.getmode()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum Mode {
    Null = 0,
    Station = 1,
    SoftAp = 2,
    StationAp = 3,
}

impl Mode {
    pub fn has_station(self) -> bool {
        matches!(self, Self::Station | Self::StationAp)
    }

    pub fn has_ap(self) -> bool {
        matches!(self, Self::SoftAp | Self::StationAp)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthMode {
    Open,
    Wep,
    WpaPsk,
    Wpa2Psk,
    WpaWpa2Psk,
}

/// Interface address, netmask and gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpInfo {
    pub ip: Ipv4Addr,
    pub netmask: Ipv4Addr,
    pub gateway: Ipv4Addr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuspendState {
    Awake,
    /// Requested; the radio stops once control returns to the loop.
    Pending,
    Suspended,
}

type Hook = Box<dyn FnOnce(&mut Device)>;

/// Argument to [`suspend`].
pub struct SuspendRequest {
    duration_us: u32,
    on_suspend: Option<Hook>,
    on_resume: Option<Hook>,
    preserve_mode: bool,
}

impl SuspendRequest {
    /// Suspend for `duration_us`, or until [`resume`] when 0.
    pub fn new(duration_us: u32) -> Self {
        Self { duration_us, on_suspend: None, on_resume: None, preserve_mode: true }
    }

    pub fn on_suspend(mut self, f: impl FnOnce(&mut Device) + 'static) -> Self {
        self.on_suspend = Some(Box::new(f));
        self
    }

    pub fn on_resume(mut self, f: impl FnOnce(&mut Device) + 'static) -> Self {
        self.on_resume = Some(Box::new(f));
        self
    }

    /// When false the radio comes back in [`Mode::Null`].
    pub fn preserve_mode(mut self, preserve: bool) -> Self {
        self.preserve_mode = preserve;
        self
    }
}

struct Suspension {
    state: SuspendState,
    generation: u32,
    request: Option<SuspendRequest>,
}

pub(crate) struct WifiController {
    pub(crate) mode: Mode,
    channel: u8,
    pub(crate) sta: Station,
    pub(crate) ap: SoftAp,
    pub(crate) events: EventMonitor,
    suspension: Suspension,
}

impl WifiController {
    pub(crate) fn new(cfg: &DeviceConfig) -> Self {
        Self {
            mode: Mode::Station,
            channel: 1,
            sta: Station::new(cfg.sta_mac, cfg.chip_id),
            ap: SoftAp::new(cfg),
            events: EventMonitor::new(cfg.wifi_event_delivery),
            suspension: Suspension { state: SuspendState::Awake, generation: 0, request: None },
        }
    }

    /// Radio off: links, registrations and unsaved settings are lost.
    pub(crate) fn power_down(&mut self) {
        self.mode = Mode::Station;
        self.channel = 1;
        self.sta.power_down();
        self.ap.power_down();
        self.events.clear();
        self.suspension.state = SuspendState::Awake;
        self.suspension.request = None;
        self.suspension.generation = self.suspension.generation.wrapping_add(1);
    }

    pub(crate) fn set_channel(&mut self, channel: u8) {
        self.channel = channel;
    }

    pub(crate) fn suspend_state(&self) -> SuspendState {
        self.suspension.state
    }
}

/// Reload persisted settings and auto-connect.  Runs on every boot.
pub(crate) fn boot(dev: &mut Device) {
    dev.wifi.mode = match dev.flash.load_record::<Mode>(NVS_NAMESPACE, MODE_KEY) {
        Ok(Some(mode)) => mode,
        Ok(None) => Mode::Station,
        Err(e) => {
            warn!("wifi: saved mode unreadable ({e}), using station");
            Mode::Station
        }
    };
    ap::boot(dev);
    sta::boot(dev);
}

// ───────────────────────────────────────────────────────────────
// Mode and channel
// ───────────────────────────────────────────────────────────────

/// Switch the radio mode, optionally persisting it.  Returns the new mode.
pub fn set_mode(dev: &mut Device, mode: Mode, save: bool) -> Mode {
    if save {
        if let Err(e) = dev.flash.save_record(NVS_NAMESPACE, MODE_KEY, &mode) {
            warn!("wifi: failed to save mode: {e}");
        }
    }
    let old = dev.wifi.mode;
    if old == mode {
        return mode;
    }
    if old.has_station() && !mode.has_station() {
        sta::drop_link(dev, DisconnectReason::AssocLeave);
    }
    if old.has_ap() && !mode.has_ap() {
        ap::drop_clients(dev);
    }
    dev.wifi.mode = mode;
    info!("wifi: mode {old:?} -> {mode:?}");
    eventmon::emit(dev, WifiEvent::WifiModeChanged { old, new: mode });
    if !old.has_station() && mode.has_station() {
        sta::auto_start(dev);
    }
    mode
}

pub fn get_mode(dev: &Device) -> Mode {
    dev.wifi.mode
}

/// Current radio channel.
pub fn get_channel(dev: &Device) -> u8 {
    dev.wifi.channel
}

// ───────────────────────────────────────────────────────────────
// Modem suspend
// ───────────────────────────────────────────────────────────────

/// Request a modem suspend.  Station mode only; the radio actually stops
/// after the caller returns to the loop, and `on_suspend` fires then.
pub fn suspend(dev: &mut Device, req: SuspendRequest) -> Result<()> {
    let d = req.duration_us;
    if d != 0 && !(MIN_SUSPEND_US..=MAX_SUSPEND_US).contains(&d) {
        return Err(WifiError::InvalidSuspendDuration(d).into());
    }
    if dev.wifi.mode.has_ap() {
        return Err(WifiError::WrongMode.into());
    }
    if dev.wifi.suspension.state != SuspendState::Awake {
        return Err(Error::Busy("wifi suspend"));
    }
    dev.wifi.suspension.state = SuspendState::Pending;
    dev.wifi.suspension.request = Some(req);
    dev.post_now(Task::WifiSuspend);
    Ok(())
}

pub fn suspend_state(dev: &Device) -> SuspendState {
    dev.wifi.suspend_state()
}

/// Cancel a pending suspend or wake a suspended radio.  `callback` (or the
/// request's `on_resume`) fires from the loop.  False when already awake.
pub fn resume(dev: &mut Device, callback: Option<Box<dyn FnOnce(&mut Device)>>) -> bool {
    match dev.wifi.suspension.state {
        SuspendState::Awake => false,
        SuspendState::Pending => {
            let req = dev.wifi.suspension.request.take();
            dev.wifi.suspension.state = SuspendState::Awake;
            info!("wifi: pending suspend cancelled");
            if let Some(cb) = callback.or_else(|| req.and_then(|r| r.on_resume)) {
                dev.post_now(Task::Call(cb));
            }
            true
        }
        SuspendState::Suspended => {
            wake(dev, callback);
            true
        }
    }
}

pub(crate) fn complete_suspend(dev: &mut Device) {
    let s = &mut dev.wifi.suspension;
    if s.state != SuspendState::Pending {
        return;
    }
    s.state = SuspendState::Suspended;
    s.generation = s.generation.wrapping_add(1);
    let generation = s.generation;
    let (duration_us, on_suspend) = match s.request.as_mut() {
        Some(r) => (r.duration_us, r.on_suspend.take()),
        None => (0, None),
    };

    sta::suspend_link(dev);
    if duration_us == 0 {
        info!("wifi: suspended until resume");
    } else {
        info!("wifi: suspended for {duration_us} us");
        dev.post(u64::from(duration_us), Task::WifiResume { generation });
    }
    if let Some(cb) = on_suspend {
        cb(dev);
    }
}

pub(crate) fn timed_resume(dev: &mut Device, generation: u32) {
    let s = &dev.wifi.suspension;
    if s.state == SuspendState::Suspended && s.generation == generation {
        wake(dev, None);
    }
}

fn wake(dev: &mut Device, callback: Option<Hook>) {
    let req = dev.wifi.suspension.request.take();
    dev.wifi.suspension.state = SuspendState::Awake;
    dev.wifi.suspension.generation = dev.wifi.suspension.generation.wrapping_add(1);
    let (preserve, on_resume) = match req {
        Some(r) => (r.preserve_mode, r.on_resume),
        None => (true, None),
    };
    info!("wifi: resumed");
    if preserve {
        sta::auto_start(dev);
    } else {
        set_mode(dev, Mode::Null, false);
    }
    if let Some(cb) = callback.or(on_resume) {
        dev.post_now(Task::Call(cb));
    }
}
