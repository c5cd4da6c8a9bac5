//! Real-time clock: the slewed wall clock (`rtctime`) and RTC user memory
//! (`rtcmem`).  Both survive resets and deep sleep; a power cycle clears
//! them.

pub mod mem;
pub mod time;
