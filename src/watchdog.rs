//! System and software watchdogs.
//!
//! The system watchdog is fed every time the event loop regains control.
//! Code that busy-waits (`tmr.delay`) without yielding or calling
//! `tmr.wdclr()` for longer than the timeout starves it and the chip resets.
//!
//! The software watchdog (`tmr.softwd`) is an application-armed deadline;
//! each re-arm bumps a generation so stale expiry tasks are ignored.

pub(crate) struct Watchdog {
    timeout_us: u64,
    fed_at_us: u64,
    soft_generation: u32,
    soft_armed: bool,
}

impl Watchdog {
    pub(crate) fn new(timeout_ms: u32, now_us: u64) -> Self {
        Self {
            timeout_us: u64::from(timeout_ms) * 1000,
            fed_at_us: now_us,
            soft_generation: 0,
            soft_armed: false,
        }
    }

    /// Feed the system watchdog.
    pub(crate) fn feed(&mut self, now_us: u64) {
        self.fed_at_us = now_us;
    }

    /// True when the loop has been starved past the timeout.
    pub(crate) fn starved(&self, now_us: u64) -> bool {
        now_us.saturating_sub(self.fed_at_us) > self.timeout_us
    }

    /// Re-arm (or disarm) the software watchdog.  Returns the new generation.
    pub(crate) fn rearm_soft(&mut self, enabled: bool) -> u32 {
        self.soft_generation = self.soft_generation.wrapping_add(1);
        self.soft_armed = enabled;
        self.soft_generation
    }

    /// Whether an expiry posted under `generation` should still fire.
    pub(crate) fn soft_expired(&self, generation: u32) -> bool {
        self.soft_armed && self.soft_generation == generation
    }
}
