//! oflow tracker: library interface for integration tests.
//!
//! The binary in `main.rs` wires these modules together; tests drive them
//! hermetically through the [`supervisor::SymbolRegistry`],
//! [`supervisor::TrackerFactory`], and [`publisher::NotificationSink`] seams.

pub mod publisher;
pub mod supervisor;
pub mod tracker;
