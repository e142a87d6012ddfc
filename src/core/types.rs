//! Shared aliases

pub use glam::{Mat4, Vec3};

/// Result with the crate [`Error`](crate::core::error::Error)
pub type Result<T> = std::result::Result<T, crate::core::error::Error>;
