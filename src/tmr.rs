//! Timer module.
//!
//! Timers are created detached, registered with an interval, a mode and a
//! callback, then started and stopped any number of times.
//!
//! | Mode     | After firing                                 |
//! |----------|----------------------------------------------|
//! | `Single` | unregistered (before the callback runs)      |
//! | `Semi`   | stopped, keeps its registration              |
//! | `Auto`   | re-armed at `due + interval`                 |
//!
//! Every (re)arm gives the slot a fresh generation from a table-wide
//! counter; alarms posted under an older generation are ignored when they
//! come due.  Only registered timers hold a slot, so unregistering (or a
//! single-shot expiry) frees it.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use embedded_hal::delay::DelayNs;
use log::{debug, warn};

use crate::device::Device;
use crate::error::{Result, TimerError};
use crate::events::Task;
use crate::node::{BootReason, ResetInfo};

/// Longest interval the firmware accepts (about 1 h 54 min).
pub const MAX_INTERVAL_MS: u32 = 6_870_947;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TimerMode {
    Single = 0,
    Auto = 1,
    Semi = 2,
}

/// Snapshot returned by [`Timer::state`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerState {
    pub running: bool,
    pub mode: TimerMode,
}

/// Handle to a timer owned by a [`Device`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Timer(u32);

pub type TimerCallback = Rc<RefCell<dyn FnMut(&mut Device, Timer)>>;

struct Registration {
    interval_ms: u32,
    mode: TimerMode,
    callback: TimerCallback,
}

struct Slot {
    registration: Registration,
    running: bool,
    generation: u32,
}

#[derive(Default)]
pub(crate) struct TimerTable {
    slots: HashMap<u32, Slot>,
    next_id: u32,
    next_generation: u32,
}

impl TimerTable {
    fn fresh_generation(&mut self) -> u32 {
        self.next_generation = self.next_generation.wrapping_add(1);
        self.next_generation
    }

    /// Stop `t` and discard its registration.
    fn remove(&mut self, t: Timer) -> bool {
        self.slots.remove(&t.0).is_some()
    }
}

fn check_interval(interval_ms: u32) -> Result<()> {
    if interval_ms == 0 || interval_ms > MAX_INTERVAL_MS {
        return Err(TimerError::IntervalOutOfRange(interval_ms).into());
    }
    Ok(())
}

/// Create a detached timer.
pub fn create(dev: &mut Device) -> Timer {
    let id = dev.timers.next_id;
    dev.timers.next_id += 1;
    Timer(id)
}

impl Timer {
    /// Bind interval, mode and callback without starting.  A running timer
    /// is stopped first.
    pub fn register(
        self,
        dev: &mut Device,
        interval_ms: u32,
        mode: TimerMode,
        callback: impl FnMut(&mut Device, Timer) + 'static,
    ) -> Result<()> {
        check_interval(interval_ms)?;
        let generation = dev.timers.fresh_generation();
        let registration = Registration {
            interval_ms,
            mode,
            callback: Rc::new(RefCell::new(callback)),
        };
        dev.timers.slots.insert(self.0, Slot { registration, running: false, generation });
        Ok(())
    }

    /// Register and start in one call.
    pub fn alarm(
        self,
        dev: &mut Device,
        interval_ms: u32,
        mode: TimerMode,
        callback: impl FnMut(&mut Device, Timer) + 'static,
    ) -> Result<()> {
        self.register(dev, interval_ms, mode, callback)?;
        self.start(dev);
        Ok(())
    }

    /// Arm the timer.  False when unregistered; a running timer keeps its
    /// current deadline.
    pub fn start(self, dev: &mut Device) -> bool {
        let generation = dev.timers.fresh_generation();
        let Some(slot) = dev.timers.slots.get_mut(&self.0) else {
            warn!("tmr: start on unregistered timer {}", self.0);
            return false;
        };
        if slot.running {
            return true;
        }
        slot.running = true;
        slot.generation = generation;
        let interval_ms = slot.registration.interval_ms;
        dev.post_ms(interval_ms, Task::TimerFire { id: self.0, generation });
        true
    }

    /// Disarm.  True only if the timer was running.
    pub fn stop(self, dev: &mut Device) -> bool {
        let generation = dev.timers.fresh_generation();
        match dev.timers.slots.get_mut(&self.0) {
            Some(slot) if slot.running => {
                slot.running = false;
                slot.generation = generation;
                true
            }
            _ => false,
        }
    }

    /// Stop and discard the registration.
    pub fn unregister(self, dev: &mut Device) {
        dev.timers.remove(self);
    }

    /// Change the interval.  A running timer is re-armed from now.
    pub fn interval(self, dev: &mut Device, interval_ms: u32) -> Result<()> {
        check_interval(interval_ms)?;
        let generation = dev.timers.fresh_generation();
        let Some(slot) = dev.timers.slots.get_mut(&self.0) else {
            return Err(TimerError::NotRegistered.into());
        };
        slot.registration.interval_ms = interval_ms;
        if slot.running {
            slot.generation = generation;
            dev.post_ms(interval_ms, Task::TimerFire { id: self.0, generation });
        }
        Ok(())
    }

    /// `None` when the timer has no registration.
    pub fn state(self, dev: &Device) -> Option<TimerState> {
        let slot = dev.timers.slots.get(&self.0)?;
        Some(TimerState { running: slot.running, mode: slot.registration.mode })
    }
}

pub(crate) fn fire(dev: &mut Device, id: u32, generation: u32) {
    let Some(slot) = dev.timers.slots.get_mut(&id) else {
        return;
    };
    if !slot.running || slot.generation != generation {
        return;
    }
    let callback = slot.registration.callback.clone();
    let interval_ms = slot.registration.interval_ms;
    let mode = slot.registration.mode;
    match mode {
        TimerMode::Single => {
            dev.timers.remove(Timer(id));
        }
        TimerMode::Semi => {
            slot.running = false;
        }
        TimerMode::Auto => {
            dev.post_ms(interval_ms, Task::TimerFire { id, generation });
        }
    }
    (&mut *callback.borrow_mut())(dev, Timer(id));
}

// ---------------------------------------------------------------------------
// Clocks and busy-waiting
// ---------------------------------------------------------------------------

/// System counter in µs since boot, wrapping at 2^31.
pub fn now(dev: &Device) -> u32 {
    (dev.clock.uptime_us() & 0x7fff_ffff) as u32
}

/// Uptime in seconds.
pub fn time(dev: &Device) -> u32 {
    (dev.clock.uptime_us() / 1_000_000) as u32
}

/// Busy-wait `us` microseconds.  The event loop does not run; starving it
/// past the watchdog timeout resets the chip.
pub fn delay(dev: &mut Device, us: u32) {
    dev.clock.spin(u64::from(us));
    if dev.watchdog.starved(dev.clock.now_us()) {
        warn!("tmr: watchdog starved by busy-wait, resetting");
        dev.request_reset(ResetInfo::new(BootReason::SoftwareWatchdog));
    }
}

/// Feed the system watchdog from inside a long busy section.
pub fn wdclr(dev: &mut Device) {
    dev.watchdog.feed(dev.clock.now_us());
}

/// Arm the software watchdog for `secs` seconds; negative disables it.
/// Calling again before expiry re-arms.
pub fn softwd(dev: &mut Device, secs: i32) {
    let generation = dev.watchdog.rearm_soft(secs > 0);
    if let Ok(secs) = u64::try_from(secs) {
        if secs > 0 {
            dev.post(secs * 1_000_000, Task::SoftWatchdog { generation });
        }
    }
}

pub(crate) fn soft_watchdog_expired(dev: &mut Device, generation: u32) {
    if dev.watchdog.soft_expired(generation) {
        warn!("tmr: software watchdog expired");
        dev.request_reset(ResetInfo::new(BootReason::SoftwareWatchdog));
    } else {
        debug!("tmr: stale softwd expiry ignored");
    }
}

/// [`DelayNs`] over [`delay`], for drivers written against embedded-hal.
pub struct BusyWait<'a> {
    dev: &'a mut Device,
}

pub fn busy_wait(dev: &mut Device) -> BusyWait<'_> {
    BusyWait { dev }
}

impl DelayNs for BusyWait<'_> {
    fn delay_ns(&mut self, ns: u32) {
        delay(self.dev, ns.div_ceil(1000));
    }
}
