//! RTC user memory: 128 × 32-bit slots that survive resets and deep sleep.
//!
//! Access is by signed index; cells outside `0..RTC_MEM_SLOTS` are skipped
//! rather than rejected.

use crate::device::Device;

pub const RTC_MEM_SLOTS: usize = 128;

#[derive(Debug)]
pub(crate) struct RtcMemory {
    slots: [u32; RTC_MEM_SLOTS],
}

impl Default for RtcMemory {
    fn default() -> Self {
        Self { slots: [0; RTC_MEM_SLOTS] }
    }
}

impl RtcMemory {
    /// In-range slots covered by `count` cells from `idx`, plus how many of
    /// the requested cells fall before slot 0.
    fn span(idx: i32, count: usize) -> (core::ops::Range<usize>, usize) {
        let start = i64::from(idx);
        let end = start.saturating_add(i64::try_from(count).unwrap_or(i64::MAX));
        let clamp = |v: i64| v.clamp(0, RTC_MEM_SLOTS as i64) as usize;
        let skipped = (-start).clamp(0, end - start) as usize;
        (clamp(start)..clamp(end), skipped)
    }

    pub(crate) fn read(&self, idx: i32, count: usize) -> Vec<u32> {
        let (range, _) = Self::span(idx, count);
        self.slots[range].to_vec()
    }

    pub(crate) fn write(&mut self, idx: i32, values: &[u32]) {
        let (range, skipped) = Self::span(idx, values.len());
        let src = values.get(skipped..).unwrap_or_default();
        for (slot, &v) in self.slots[range].iter_mut().zip(src) {
            *slot = v;
        }
    }
}

/// Read `count` consecutive cells from `idx`.  Only in-range cells are
/// returned.
pub fn read32(dev: &Device, idx: i32, count: usize) -> Vec<u32> {
    dev.rtcmem.read(idx, count)
}

/// Write `values` from `idx` on.  Out-of-range cells are ignored.
pub fn write32(dev: &mut Device, idx: i32, values: &[u32]) {
    dev.rtcmem.write(idx, values);
}
