//! Fixed analog inputs.
//!
//! Default [`AnalogSource`] built from the world configuration.  Tests that
//! need changing readings swap in their own source with
//! [`sim::set_analog`](crate::sim::set_analog).

use crate::ports::AnalogSource;

#[derive(Debug, Clone, Copy)]
pub struct FixedAnalog {
    tout: u16,
    vdd33_mv: u16,
}

impl FixedAnalog {
    pub fn new(tout: u16, vdd33_mv: u16) -> Self {
        Self { tout, vdd33_mv }
    }
}

impl AnalogSource for FixedAnalog {
    fn tout(&mut self) -> u16 {
        self.tout
    }

    fn vdd33_mv(&mut self) -> u16 {
        self.vdd33_mv
    }
}
