//! Adapters: concrete implementations of the port traits.
//!
//! | Adapter    | Implements    | Connects to               |
//! |------------|---------------|---------------------------|
//! | `analog`   | AnalogSource  | Fixed TOUT / VDD readings |
//! | `log_sink` | EventSink     | `log` facade              |
//! | `nvs`      | StoragePort   | In-memory flash records   |

pub mod analog;
pub mod log_sink;
pub mod nvs;
pub(crate) mod utils;
