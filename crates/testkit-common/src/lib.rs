//! # Testkit Common
//!
//! Shared types, errors, and constants used across testkit components.
//!
//! ## Modules
//! - `types` - Core data structures (Platform, ConnectionDescriptor, JoinTokens, etc.)
//! - `error` - Error taxonomy for provisioning and bootstrap
//! - `constants` - Shared defaults and tag keys

pub mod constants;
pub mod error;
pub mod types;

pub use error::{TestkitError, TestkitResult};
pub use types::*;
