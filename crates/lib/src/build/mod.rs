//! Building targets.
//!
//! # Submodules
//!
//! - [`execute`] - the per-target build: retries, budgets, conclusion
//! - [`budget`] - elapsed and cpu limits around a command evaluation
//! - [`seed`] - deterministic per-target seeding

pub mod budget;
pub mod execute;
pub mod seed;
mod types;

pub use execute::{build_target, derive_meta};
pub use types::*;
