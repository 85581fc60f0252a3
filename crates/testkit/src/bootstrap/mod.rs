//! Cluster bootstrap.
//!
//! Turns freshly acquired machines into one cluster: init on a single
//! leader, then sequential worker joins with per-machine failure tracking.

mod orchestrator;
mod result;

pub use orchestrator::{BootstrapOptions, Bootstrapper};
pub use result::BootstrapResult;
