//! # oflow-core
//!
//! Shared building blocks for the oflow order-flow indicator service:
//! layered configuration and the logging framework used by every other
//! crate in the workspace.

pub mod config;
pub mod logging;
