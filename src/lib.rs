//! NodeMCU firmware API, simulated on the host.
//!
//! A [`Device`] models one ESP8266 running the NodeMCU firmware: timers,
//! sockets, the WiFi radio, the RTC and flash, plus the world around it.
//! Everything is driven by a virtual-time event loop, so tests run
//! deterministically and instantly.
//!
//! ```text
//!   application code ──▶ tmr / net / wifi / rtc / sntp / node / adc / bit
//!                               │
//!                               ▼
//!                      Device (event loop, virtual clock)
//!                               │
//!                               ▼
//!                      sim::World (APs, hosts, NTP, peers)
//! ```

#![deny(unused_must_use)]

pub mod adapters;
pub mod config;
pub mod device;
pub mod error;
pub mod net;
pub mod node;
pub mod ports;
pub mod primitives;
pub mod rtc;
pub mod sim;
pub mod sntp;
pub mod tmr;
pub mod wifi;

mod clock;
mod events;
mod scheduler;
mod watchdog;

pub use device::Device;
pub use error::{Error, Result};
pub use primitives::{adc, bit};
pub use rtc::{mem as rtcmem, time as rtctime};
