//! Core library for hookfleet: drives a dynamic-instrumentation server and a
//! target app across every Android device attached to the host.

pub mod agent;
pub mod app;
pub mod bridge;
pub mod config;
pub mod device;
pub mod orchestrator;
pub mod outcome;
pub mod payload;
pub mod server;

pub use config::RunConfig;
pub use orchestrator::{OrchestrationResult, Orchestrator, RunOptions};
