//! Node lifecycle: boot reason, restart, deep sleep, chip id.
//!
//! A reset drops timers, sockets, servers, event registrations and every
//! pending task.  RTC memory, RTC time and flash survive; only a power
//! cycle clears the first two.

use log::info;

use crate::device::Device;

/// Why the chip last booted.  Discriminants match `node.bootreason()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BootReason {
    PowerOn = 0,
    HardwareWatchdog = 1,
    Exception = 2,
    SoftwareWatchdog = 3,
    SoftwareRestart = 4,
    DeepSleepAwake = 5,
    ExternalReset = 6,
}

/// Extended reset information.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResetInfo {
    pub reason: BootReason,
    /// EXCCAUSE of the fatal exception, only for [`BootReason::Exception`].
    pub exception_cause: Option<u32>,
}

impl ResetInfo {
    pub fn new(reason: BootReason) -> Self {
        Self { reason, exception_cause: None }
    }

    pub fn exception(cause: u32) -> Self {
        Self { reason: BootReason::Exception, exception_cause: Some(cause) }
    }
}

/// Lifecycle events reported through the [`EventSink`](crate::ports::EventSink) port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceEvent {
    Booted(ResetInfo),
    Resetting(BootReason),
    /// Entering deep sleep; `None` means until an external reset.
    Sleeping { duration_us: Option<u64> },
}

pub fn bootreason(dev: &Device) -> ResetInfo {
    dev.reset_info()
}

/// Software restart.  Takes effect when control returns to the loop.
pub fn restart(dev: &mut Device) {
    info!("node: restart requested");
    dev.request_reset(ResetInfo::new(BootReason::SoftwareRestart));
}

/// Enter deep sleep for `us` microseconds; 0 sleeps until an external reset.
pub fn dsleep(dev: &mut Device, us: u64) {
    info!("node: deep sleep for {us} us");
    dev.request_sleep((us > 0).then_some(us));
}

pub fn chipid(dev: &Device) -> u32 {
    dev.config().device.chip_id
}
