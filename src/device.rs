//! The device context and its event loop.
//!
//! A [`Device`] owns every piece of simulated firmware state (timers,
//! sockets, radio, RTC, flash) plus the world it lives in.  All module
//! functions take it as `&mut Device`, so several devices can coexist in one
//! process and tests never share global state.
//!
//! ```text
//!   run_for(d)
//!     │
//!     ├─ apply pending reset / sleep
//!     ├─ loop: pop earliest task ≤ deadline
//!     │        advance clock, feed watchdog, dispatch
//!     │        apply pending reset / sleep
//!     └─ advance clock to deadline
//! ```
//!
//! Resets requested from inside a callback (`node::restart`, a starved
//! watchdog) take effect once that callback returns.

use std::time::Duration;

use log::{error, info, trace};

use crate::adapters::analog::FixedAnalog;
use crate::adapters::log_sink::LogEventSink;
use crate::adapters::nvs::NvsStore;
use crate::clock::Clock;
use crate::config::SimConfig;
use crate::error::Error;
use crate::events::Task;
use crate::net::{self, NetStack};
use crate::node::{BootReason, DeviceEvent, ResetInfo};
use crate::ports::EventSink;
use crate::primitives::adc::{self, AdcMode};
use crate::rtc::mem::RtcMemory;
use crate::rtc::time::RtcClock;
use crate::scheduler::Timeline;
use crate::sim::World;
use crate::sntp::{self, SntpState};
use crate::tmr::{self, TimerTable};
use crate::watchdog::Watchdog;
use crate::wifi::{self, WifiController};

/// Lifecycle transition requested during dispatch.
enum Transition {
    Reset(ResetInfo),
    /// Deep sleep; `None` sleeps until an external reset.
    Sleep(Option<u64>),
}

/// One simulated NodeMCU board.
pub struct Device {
    pub(crate) cfg: SimConfig,
    pub(crate) clock: Clock,
    pub(crate) timeline: Timeline,
    pub(crate) watchdog: Watchdog,
    pub(crate) timers: TimerTable,
    pub(crate) net: NetStack,
    pub(crate) wifi: WifiController,
    pub(crate) rtc: RtcClock,
    pub(crate) rtcmem: RtcMemory,
    pub(crate) sntp: SntpState,
    pub(crate) adc_mode: AdcMode,
    pub(crate) flash: NvsStore,
    pub(crate) world: World,
    reset_info: ResetInfo,
    pending: Option<Transition>,
    asleep: bool,
    dispatching: bool,
    sink: Box<dyn EventSink>,
}

impl Device {
    /// Power on a device described by `cfg`.
    pub fn new(cfg: SimConfig) -> Result<Self, Error> {
        Self::with_sink(cfg, Box::new(LogEventSink::new()))
    }

    /// Power on a device that reports lifecycle events to `sink`.
    pub fn with_sink(cfg: SimConfig, sink: Box<dyn EventSink>) -> Result<Self, Error> {
        cfg.validate()?;

        let analog = FixedAnalog::new(cfg.world.adc_tout, cfg.world.vdd33_mv);
        let world = World::new(&cfg.world, Box::new(analog));
        let clock = Clock::new();
        let watchdog = Watchdog::new(cfg.device.watchdog_timeout_ms, clock.now_us());
        let wifi = WifiController::new(&cfg.device);
        let adc_mode = cfg.device.adc_mode;

        let mut dev = Self {
            cfg,
            clock,
            timeline: Timeline::new(),
            watchdog,
            timers: TimerTable::default(),
            net: NetStack::default(),
            wifi,
            rtc: RtcClock::default(),
            rtcmem: RtcMemory::default(),
            sntp: SntpState::default(),
            adc_mode,
            flash: NvsStore::new(),
            world,
            reset_info: ResetInfo::new(BootReason::PowerOn),
            pending: None,
            asleep: false,
            dispatching: false,
            sink,
        };
        dev.boot(ResetInfo::new(BootReason::PowerOn));
        Ok(dev)
    }

    /// Replace the lifecycle event sink.
    pub fn set_sink(&mut self, sink: Box<dyn EventSink>) {
        self.sink = sink;
    }

    pub fn config(&self) -> &SimConfig {
        &self.cfg
    }

    /// Virtual microseconds since power-on.
    pub fn now_us(&self) -> u64 {
        self.clock.now_us()
    }

    /// True while in deep sleep.
    pub fn is_asleep(&self) -> bool {
        self.asleep
    }

    /// Tasks waiting in the event loop.
    pub fn pending_tasks(&self) -> usize {
        self.timeline.len()
    }

    /// Advance virtual time by `span`, running every task that falls due.
    /// Returns the number of tasks dispatched.
    ///
    /// Refused (returns 0) when called from inside a callback.
    pub fn run_for(&mut self, span: Duration) -> usize {
        if self.dispatching {
            error!("Device: run_for called from inside a callback, ignored");
            return 0;
        }
        let span_us = u64::try_from(span.as_micros()).unwrap_or(u64::MAX);
        let deadline = self.clock.now_us().saturating_add(span_us);

        self.dispatching = true;
        self.apply_pending();
        let mut ran = 0;
        while let Some((due, task)) = self.timeline.pop_due(deadline) {
            self.clock.advance_to(due);
            self.watchdog.feed(self.clock.now_us());
            trace!("Device: t={}us {}", self.clock.now_us(), task.label());
            self.dispatch(task);
            ran += 1;
            self.apply_pending();
        }
        self.clock.advance_to(deadline);
        self.watchdog.feed(self.clock.now_us());
        self.dispatching = false;
        ran
    }

    /// [`run_for`](Self::run_for) in milliseconds.
    pub fn run_ms(&mut self, ms: u64) -> usize {
        self.run_for(Duration::from_millis(ms))
    }

    // ── crate-internal plumbing ───────────────────────────────

    /// Post `task` to run `delay_us` from now.
    pub(crate) fn post(&mut self, delay_us: u64, task: Task) {
        let due = self.clock.now_us().saturating_add(delay_us);
        self.timeline.post(due, task);
    }

    pub(crate) fn post_ms(&mut self, delay_ms: u32, task: Task) {
        self.post(u64::from(delay_ms) * 1000, task);
    }

    /// Post `task` behind everything already due now.
    pub(crate) fn post_now(&mut self, task: Task) {
        self.post(0, task);
    }

    pub(crate) fn reset_info(&self) -> ResetInfo {
        self.reset_info
    }

    /// True UTC time in the simulated world, µs since the Unix epoch.
    pub(crate) fn true_time_us(&self) -> u64 {
        self.world.true_time_us(self.clock.now_us())
    }

    /// Reset once the current callback returns.  The first request wins.
    pub(crate) fn request_reset(&mut self, info: ResetInfo) {
        if self.pending.is_none() {
            self.pending = Some(Transition::Reset(info));
        }
    }

    /// Enter deep sleep once the current callback returns.
    pub(crate) fn request_sleep(&mut self, duration_us: Option<u64>) {
        if self.pending.is_none() {
            self.pending = Some(Transition::Sleep(duration_us));
        }
    }

    pub(crate) fn emit(&mut self, event: DeviceEvent) {
        self.sink.emit(&event);
    }

    fn apply_pending(&mut self) {
        match self.pending.take() {
            None => {}
            Some(Transition::Reset(info)) => {
                self.emit(DeviceEvent::Resetting(info.reason));
                self.boot(info);
            }
            Some(Transition::Sleep(duration_us)) => {
                self.emit(DeviceEvent::Sleeping { duration_us });
                self.shutdown();
                self.asleep = true;
                if let Some(us) = duration_us {
                    self.post(us, Task::Wake);
                }
            }
        }
    }

    /// Drop all volatile state.  Flash, RTC memory and RTC time survive.
    fn shutdown(&mut self) {
        self.timeline.clear();
        self.timers = TimerTable::default();
        self.net = NetStack::default();
        self.sntp = SntpState::default();
        self.wifi.power_down();
        self.world.device_went_down();
    }

    fn boot(&mut self, info: ResetInfo) {
        self.shutdown();
        if info.reason == BootReason::PowerOn {
            self.rtc = RtcClock::default();
            self.rtcmem = RtcMemory::default();
        }
        self.clock.mark_boot();
        self.watchdog = Watchdog::new(self.cfg.device.watchdog_timeout_ms, self.clock.now_us());
        self.asleep = false;
        self.reset_info = info;
        self.adc_mode = adc::load_mode(&self.flash, self.cfg.device.adc_mode);

        info!("Device: boot ({:?})", info.reason);
        self.emit(DeviceEvent::Booted(info));
        wifi::boot(self);
    }

    fn dispatch(&mut self, task: Task) {
        match task {
            Task::TimerFire { id, generation } => tmr::fire(self, id, generation),
            Task::SoftWatchdog { generation } => tmr::soft_watchdog_expired(self, generation),
            Task::TcpConnect { sock, addr } => net::tcp::arrive_connect(self, sock, addr),
            Task::Accept { server, sock } => net::server::deliver_accept(self, server, sock),
            Task::Notify { sock, notice } => net::deliver_notice(self, sock, notice),
            Task::Deliver { sock, frame, from } => net::deliver_frame(self, sock, frame, from),
            Task::Transmit { sock, to, data } => net::transmit(self, sock, to, data),
            Task::IdleCheck { sock } => net::server::idle_check(self, sock),
            Task::DnsAnswer { host, reply } => net::dns::answer(self, &host, reply),
            Task::WifiAssoc { generation } => wifi::sta::complete_assoc(self, generation),
            Task::WifiDhcp { generation } => wifi::sta::complete_dhcp(self, generation),
            Task::WifiEvent(event) => wifi::eventmon::deliver(self, event),
            Task::WifiSuspend => wifi::complete_suspend(self),
            Task::WifiResume { generation } => wifi::timed_resume(self, generation),
            Task::WifiScan(reply) => wifi::sta::complete_scan(self, reply),
            Task::Wake => self.boot(ResetInfo::new(BootReason::DeepSleepAwake)),
            Task::Call(f) => f(self),
        }
    }
}

impl core::fmt::Debug for Device {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Device")
            .field("now_us", &self.clock.now_us())
            .field("reset", &self.reset_info)
            .field("asleep", &self.asleep)
            .field("pending_tasks", &self.timeline.len())
            .finish_non_exhaustive()
    }
}
