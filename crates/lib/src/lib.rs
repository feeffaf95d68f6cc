//! cairn-lib: an incremental build engine.
//!
//! Targets are named commands with declared dependencies. The engine builds
//! the outdated ones in dependency order across a pool of workers and caches
//! their results:
//! - [`keys`]: one flat key space for plain names, files and namespaced references
//! - [`imports`]: resolving the non-target dependencies, leaf batch by leaf batch
//! - [`build`]: the per-target build with retries, time budgets and seeding
//! - [`predict`]: list-scheduling simulation of a future parallel run
//! - [`make`]: the orchestrator tying them together

pub mod build;
pub mod command;
pub mod config;
pub mod engine;
pub mod env;
pub mod graph;
pub mod hooks;
pub mod imports;
pub mod keys;
pub mod layout;
pub mod make;
pub mod pool;
pub mod predict;
pub mod store;

pub use build::{BuildError, BuildOutcome, build_target};
pub use config::RunConfig;
pub use engine::Engine;
pub use layout::{Layout, LayoutEntry};
pub use make::{RunReport, make};
pub use predict::{PredictOptions, Schedule, predict_runtime, simulate};
