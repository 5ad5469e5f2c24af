//! IoT Bridge Agent - OPC UA machines to cloud hub
//!
//! This agent bridges a control server to the device hub:
//! - Discovery of `Device <n>` machines on the OPC UA server
//! - Sequential telemetry polling, one hub identity per machine
//! - Direct methods (emergency stop / reset) and desired-property pushes
//! - Reported state echo for every applied change

pub mod commands;
pub mod config;
pub mod discovery;
pub mod error;
pub mod forwarder;
pub mod hub;
pub mod opc;
pub mod polling;
pub mod state;
pub mod telemetry;

pub use commands::CommandHandlers;
pub use config::AgentConfig;
pub use discovery::{discover_devices, Device};
pub use error::{BridgeError, DiscoveryError, HubError};
pub use forwarder::Forwarder;
pub use polling::{PassReport, PollingLoop};
pub use state::{DeviceState, RunMode, StateSnapshot};
pub use telemetry::TelemetrySample;
