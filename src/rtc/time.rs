//! RTC wall clock.
//!
//! Wall time is an affine function of the RTC counter, re-anchored on every
//! `set`:
//!
//! ```text
//!   wall(c) = anchor.wall + scaled(c - anchor.counter) + applied_slew
//!   scaled(e) = e + e * rate / 2^32
//! ```
//!
//! The first `set` jumps.  After that, corrections are slewed at
//! [`SLEW_PPM`] so the clock never runs backward, except forward
//! corrections larger than the step threshold, which are applied at once.
//! When the caller gives no rate, the drift rate is recalibrated from the
//! offset observed between two syncs at least a minute apart.
//!
//! Timestamps handed out never regress: `get` clamps to the last value it
//! returned.

use chrono::{DateTime, Datelike, Timelike};
use log::{debug, info};

use crate::device::Device;
use crate::error::{Result, RtcError};
use crate::node;

/// Maximum rate at which a correction is absorbed.
pub const SLEW_PPM: i128 = 500;
/// Drift rates are clamped to ±1000 ppm (units of 2^-32).
pub const MAX_RATE: i32 = ((1i64 << 32) / 1000) as i32;
const MIN_CALIBRATION_US: u64 = 60_000_000;
const FRAC_ONE: i128 = 1 << 32;

/// Wall-clock reading.  All zero when the time has never been set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Timestamp {
    pub sec: u64,
    pub usec: u32,
    /// Drift correction in units of 2^-32.
    pub rate: i32,
}

impl Timestamp {
    pub fn as_micros(&self) -> u64 {
        self.sec * 1_000_000 + u64::from(self.usec)
    }
}

/// Broken-down UTC time.  `mon` is 1-12, `yday` 1-366, `wday` 1-7 from Sunday.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Calendar {
    pub year: i32,
    pub mon: u32,
    pub day: u32,
    pub hour: u32,
    pub min: u32,
    pub sec: u32,
    pub yday: u32,
    pub wday: u32,
}

#[derive(Debug, Clone, Copy)]
struct Anchor {
    counter_us: u64,
    wall_us: u64,
    rate: i32,
    /// Correction still to be absorbed (signed).
    slew_us: i64,
}

#[derive(Debug, Default)]
pub(crate) struct RtcClock {
    anchor: Option<Anchor>,
    /// Counter and true wall time at the last `set`.
    last_sync: Option<(u64, u64)>,
    last_observed_us: u64,
}

fn scaled(elapsed_us: u64, rate: i32) -> i128 {
    let e = i128::from(elapsed_us);
    e + e * i128::from(rate) / FRAC_ONE
}

impl RtcClock {
    pub(crate) fn is_set(&self) -> bool {
        self.anchor.is_some()
    }

    pub(crate) fn rate(&self) -> i32 {
        self.anchor.map_or(0, |a| a.rate)
    }

    fn wall_at(&self, counter_us: u64) -> Option<u64> {
        let a = self.anchor?;
        let base = scaled(counter_us.saturating_sub(a.counter_us), a.rate);
        let budget = base * SLEW_PPM / 1_000_000;
        let pending = i128::from(a.slew_us);
        let applied = pending.clamp(-budget, budget);
        Some((i128::from(a.wall_us) + base + applied).max(0) as u64)
    }

    /// Current wall time in µs, never below the last value returned.
    pub(crate) fn now_us(&mut self, counter_us: u64) -> Option<u64> {
        let wall = self.wall_at(counter_us)?.max(self.last_observed_us);
        self.last_observed_us = wall;
        Some(wall)
    }

    pub(crate) fn set(
        &mut self,
        counter_us: u64,
        target_us: u64,
        rate: Option<i32>,
        step_threshold_us: u64,
    ) {
        let Some(current) = self.wall_at(counter_us) else {
            info!("rtctime: set to {}.{:06}", target_us / 1_000_000, target_us % 1_000_000);
            self.anchor = Some(Anchor {
                counter_us,
                wall_us: target_us,
                rate: rate.unwrap_or(0),
                slew_us: 0,
            });
            self.last_sync = Some((counter_us, target_us));
            return;
        };

        let current = current.max(self.last_observed_us);
        let offset = i128::from(target_us) - i128::from(current);
        let rate = rate.unwrap_or_else(|| self.calibrated_rate(counter_us, target_us));

        let anchor = if offset > i128::from(step_threshold_us) {
            info!("rtctime: stepping forward {offset} us");
            Anchor { counter_us, wall_us: target_us, rate, slew_us: 0 }
        } else {
            debug!("rtctime: slewing {offset} us");
            let slew_us = offset.clamp(i128::from(i64::MIN), i128::from(i64::MAX)) as i64;
            Anchor { counter_us, wall_us: current, rate, slew_us }
        };
        self.anchor = Some(anchor);
        self.last_sync = Some((counter_us, target_us));
    }

    /// Drift rate implied by the true time elapsed since the previous sync.
    fn calibrated_rate(&self, counter_us: u64, target_us: u64) -> i32 {
        let current = self.rate();
        let Some((c0, w0)) = self.last_sync else {
            return current;
        };
        let elapsed = counter_us.saturating_sub(c0);
        if elapsed < MIN_CALIBRATION_US {
            return current;
        }
        let truth = i128::from(target_us) - i128::from(w0);
        let elapsed = i128::from(elapsed);
        let rate = (truth - elapsed) * FRAC_ONE / elapsed;
        rate.clamp(i128::from(-MAX_RATE), i128::from(MAX_RATE)) as i32
    }

    /// Counter duration converted to wall duration at the current rate.
    pub(crate) fn adjust_delta(&self, counter_us: u64) -> u64 {
        scaled(counter_us, self.rate()).max(0) as u64
    }

    /// Wall duration converted back to counter duration.
    fn counter_delta(&self, wall_us: u64) -> u64 {
        let w = i128::from(wall_us);
        (w * FRAC_ONE / (FRAC_ONE + i128::from(self.rate()))).max(0) as u64
    }
}

// ---------------------------------------------------------------------------
// rtctime API
// ---------------------------------------------------------------------------

pub fn get(dev: &mut Device) -> Timestamp {
    let counter = dev.clock.now_us();
    match dev.rtc.now_us(counter) {
        Some(us) => Timestamp {
            sec: us / 1_000_000,
            usec: (us % 1_000_000) as u32,
            rate: dev.rtc.rate(),
        },
        None => Timestamp::default(),
    }
}

/// Set the wall clock.  `rate` pins the drift correction; `None` lets the
/// clock recalibrate it.
pub fn set(dev: &mut Device, sec: u64, usec: u32, rate: Option<i32>) {
    let target = sec
        .saturating_mul(1_000_000)
        .saturating_add(u64::from(usec));
    let counter = dev.clock.now_us();
    let threshold = u64::from(dev.cfg.device.rtc_step_threshold_ms) * 1000;
    dev.rtc.set(counter, target, rate, threshold);
}

/// Convert a counter duration to wall time at the current drift rate.
pub fn adjust_delta(dev: &Device, us: u64) -> u64 {
    dev.rtc.adjust_delta(us)
}

/// Deep sleep for `us`.  Wall time keeps running on the RTC counter.
pub fn dsleep(dev: &mut Device, us: u64) {
    node::dsleep(dev, us);
}

/// Sleep until the next wall-clock multiple of `aligned_us` that is at
/// least `min_sleep_us` away.
pub fn dsleep_aligned(dev: &mut Device, aligned_us: u64, min_sleep_us: u64) -> Result<()> {
    if aligned_us == 0 {
        return Err(RtcError::ZeroAlignment.into());
    }
    let counter = dev.clock.now_us();
    let Some(now) = dev.rtc.now_us(counter) else {
        return Err(RtcError::TimeNotSet.into());
    };
    let earliest = now.saturating_add(min_sleep_us);
    let wake = earliest.div_ceil(aligned_us).saturating_mul(aligned_us);
    let sleep = dev.rtc.counter_delta(wake - now).max(1);
    node::dsleep(dev, sleep);
    Ok(())
}

/// Split Unix seconds into UTC calendar fields.
pub fn epoch2cal(sec: i64) -> Option<Calendar> {
    let t = DateTime::from_timestamp(sec, 0)?;
    Some(Calendar {
        year: t.year(),
        mon: t.month(),
        day: t.day(),
        hour: t.hour(),
        min: t.minute(),
        sec: t.second(),
        yday: t.ordinal(),
        wday: t.weekday().number_from_sunday(),
    })
}
