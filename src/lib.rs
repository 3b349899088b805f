// src/lib.rs
// Export modules so they can be used in tests
pub mod client;
pub mod config;
pub mod connection;
pub mod diagnostics;
pub mod error;
pub mod polling;
pub mod protocol;
pub mod watch;

pub use client::SimulatorClient;
pub use error::{ClientError, Result};
