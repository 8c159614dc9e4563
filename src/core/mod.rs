//! Core provisioning logic

pub mod error;
pub mod provision;
pub mod scanner;
pub mod service;
pub mod session;
pub mod types;
