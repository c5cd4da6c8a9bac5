//! Fuzz target: simulation config loading
//!
//! Parses arbitrary bytes as a JSON `SimConfig`.  Whatever parses must
//! either be rejected by validation or boot a device that survives a
//! short run.
//!
//! cargo fuzz run fuzz_config_json

#![no_main]

use libfuzzer_sys::fuzz_target;
use nodemcu_sim::Device;
use nodemcu_sim::config::SimConfig;

fuzz_target!(|data: &[u8]| {
    let Ok(cfg) = serde_json::from_slice::<SimConfig>(data) else {
        return;
    };
    let valid = cfg.validate().is_ok();
    match Device::new(cfg) {
        Ok(mut dev) => {
            assert!(valid);
            dev.run_ms(10_000);
        }
        Err(_) => assert!(!valid),
    }
});
