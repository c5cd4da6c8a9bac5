//! Fuzz target: `rtctime::set` / `rtctime::get`
//!
//! Interprets the input as a script of clock sets and virtual-time
//! advances and asserts the wall clock never runs backwards, whatever
//! the sequence of corrections.
//!
//! cargo fuzz run fuzz_rtc_set

#![no_main]

use libfuzzer_sys::fuzz_target;
use nodemcu_sim::Device;
use nodemcu_sim::config::SimConfig;
use nodemcu_sim::rtctime;

fuzz_target!(|data: &[u8]| {
    let Ok(mut dev) = Device::new(SimConfig::default()) else {
        return;
    };
    let mut last = 0u64;
    for op in data.chunks_exact(9) {
        let arg = u64::from_le_bytes([op[1], op[2], op[3], op[4], op[5], op[6], op[7], op[8]]);
        match op[0] % 3 {
            0 => {
                dev.run_ms(arg % 3_600_000);
            }
            1 => rtctime::set(&mut dev, arg >> 20, (arg & 0xf_ffff) as u32 % 1_000_000, None),
            _ => {
                let rate = (arg as i32).clamp(-rtctime::MAX_RATE, rtctime::MAX_RATE);
                rtctime::set(&mut dev, arg >> 24, 0, Some(rate));
            }
        }
        let now = rtctime::get(&mut dev).as_micros();
        assert!(now >= last, "wall clock went from {last} back to {now}");
        last = now;
    }
});
