//! Common utility functions
//!
//! - **[`serde`]**: Serialization helpers for durations expressed in seconds

pub mod serde;

// Re-export commonly used items for convenience
pub use self::serde::{duration_secs, duration_secs_opt};
