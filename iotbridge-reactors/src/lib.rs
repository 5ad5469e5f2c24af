//! IoT Bridge Reactors - out-of-band alert handling
//!
//! Two independent handlers fed by alert queues:
//! - quality below 90% lowers the machine's desired production rate
//! - more than 3 errors triggers the machine's emergency stop

pub mod alerts;
pub mod config;
pub mod http;
pub mod queue;
pub mod reactors;
pub mod service;

pub use alerts::{ErrorAlert, QualityAlert};
pub use queue::{handle_message, AlertOutcome};
pub use reactors::{emergency_stop_on_errors, throttle_on_low_quality, StopOutcome, ThrottleOutcome};
pub use service::{MethodResult, ServiceError, ServiceHub, Twin};
