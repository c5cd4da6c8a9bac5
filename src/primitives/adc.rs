//! ADC sampling.
//!
//! The ESP8266 ADC is either wired to the TOUT pin or to the supply rail;
//! the choice lives in the flash init data and only changes on restart.
//! Reading the side that is not selected returns [`INVALID_READING`].

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::adapters::nvs::NvsStore;
use crate::device::Device;

pub const INVALID_READING: u16 = 65535;

const NVS_NAMESPACE: &str = "adc";
const NVS_KEY: &str = "mode";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdcMode {
    /// External TOUT pin.
    Tout,
    /// Internal supply voltage.
    Vdd33,
}

/// Sample TOUT (channel 0).  `None` for any other channel.
pub fn read(dev: &mut Device, channel: u8) -> Option<u16> {
    if channel != 0 {
        warn!("adc: no channel {channel}");
        return None;
    }
    if dev.adc_mode != AdcMode::Tout {
        return Some(INVALID_READING);
    }
    Some(dev.world.analog().tout().min(1023))
}

/// Supply voltage in mV.
pub fn readvdd33(dev: &mut Device) -> u16 {
    if dev.adc_mode != AdcMode::Vdd33 {
        return INVALID_READING;
    }
    dev.world.analog().vdd33_mv()
}

/// Write `mode` into the init data.  Returns true when it changed, in which
/// case a restart is needed before it applies.
pub fn force_init_mode(dev: &mut Device, mode: AdcMode) -> bool {
    let stored = load_mode(&dev.flash, dev.cfg.device.adc_mode);
    if stored == mode {
        return false;
    }
    if let Err(e) = dev.flash.save_record(NVS_NAMESPACE, NVS_KEY, &mode) {
        warn!("adc: failed to persist init mode: {e}");
        return false;
    }
    info!("adc: init mode {:?}, effective after restart", mode);
    true
}

/// Mode from flash, falling back to the configured default.
pub(crate) fn load_mode(flash: &NvsStore, default: AdcMode) -> AdcMode {
    match flash.load_record(NVS_NAMESPACE, NVS_KEY) {
        Ok(Some(mode)) => mode,
        Ok(None) => default,
        Err(e) => {
            warn!("adc: init data unreadable ({e}), using {:?}", default);
            default
        }
    }
}
