//! Stateless and near-stateless helpers: 32-bit bit operations and the ADC.

pub mod adc;
pub mod bit;
