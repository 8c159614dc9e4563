//! Configuration module

pub mod cli;
pub mod endpoints;
pub mod settings;

pub use cli::{CliArgs, TransportKind};
pub use endpoints::{BleEndpoints, EndpointMap};
pub use settings::Settings;
