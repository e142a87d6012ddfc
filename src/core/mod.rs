//! Core types and utilities

pub mod types;
pub mod error;
pub mod logging;
pub mod config;
pub mod frame;

pub use types::*;
pub use error::Error;
pub use config::EngineConfig;
pub use frame::{Ring, PingPong, StepSlots};
