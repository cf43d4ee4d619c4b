//! # Runtime
//!
//! Drives the automation's work cycles under the runtime lock, consulting
//! admission control before each one.

pub mod runner;

pub use runner::{CycleContext, CycleRunner, RunExit, RunSummary, RunnerSettings, WorkCycle};
