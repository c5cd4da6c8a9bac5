//! Virtual time source.
//!
//! Two counters, both in microseconds:
//!
//! - **RTC counter** (`now_us`) runs from power-on and keeps running
//!   through resets and deep sleep.  The wall clock in
//!   [`rtc::time`](crate::rtc::time) is anchored on it.
//! - **System counter** (`uptime_us`) restarts at every boot; this is
//!   what `tmr.now()` and `tmr.time()` report.
//!
//! Time only moves forward, either because the event loop reached the next
//! due task or because application code busy-waited.

#[derive(Debug, Default)]
pub(crate) struct Clock {
    now_us: u64,
    boot_us: u64,
}

impl Clock {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Microseconds since power-on.
    pub(crate) fn now_us(&self) -> u64 {
        self.now_us
    }

    /// Microseconds since the last boot.
    pub(crate) fn uptime_us(&self) -> u64 {
        self.now_us - self.boot_us
    }

    /// Move forward to `t_us`.  Never moves backward: a task that became due
    /// during a busy-wait runs late, at the current time.
    pub(crate) fn advance_to(&mut self, t_us: u64) {
        self.now_us = self.now_us.max(t_us);
    }

    /// Busy-wait: burn `us` microseconds of CPU.
    pub(crate) fn spin(&mut self, us: u64) {
        self.now_us = self.now_us.saturating_add(us);
    }

    /// Restart the system counter.
    pub(crate) fn mark_boot(&mut self) {
        self.boot_us = self.now_us;
    }
}
