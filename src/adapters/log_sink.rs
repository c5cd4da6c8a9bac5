//! Log-based event sink adapter.
//!
//! Implements [`EventSink`] by writing device lifecycle events to the `log`
//! facade.  Tests install a recording sink instead.

use log::info;

use crate::node::DeviceEvent;
use crate::ports::EventSink;

/// Adapter that logs every [`DeviceEvent`].
#[derive(Debug, Default)]
pub struct LogEventSink;

impl LogEventSink {
    pub fn new() -> Self {
        Self
    }
}

impl EventSink for LogEventSink {
    fn emit(&mut self, event: &DeviceEvent) {
        match event {
            DeviceEvent::Booted(info) => match info.exception_cause {
                Some(cause) => info!("BOOT  | reason={:?} exccause={}", info.reason, cause),
                None => info!("BOOT  | reason={:?}", info.reason),
            },
            DeviceEvent::Resetting(reason) => {
                info!("RESET | {:?}", reason);
            }
            DeviceEvent::Sleeping { duration_us: Some(us) } => {
                info!("SLEEP | {} us", us);
            }
            DeviceEvent::Sleeping { duration_us: None } => {
                info!("SLEEP | until external reset");
            }
        }
    }
}
