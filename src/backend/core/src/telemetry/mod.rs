//! Telemetry: structured logging setup.
//!
//! The engine itself only emits `tracing` events and `metrics` counters; it
//! never installs a subscriber or exporter on its own. Embedding services call
//! [`init_logging`] once at startup (or install their own subscriber).
//!
//! # Example
//!
//! ```rust,no_run
//! use visor_core::telemetry::{init_logging, LoggingConfig};
//!
//! init_logging(&LoggingConfig::default()).expect("Failed to initialize logging");
//! ```

pub mod logging;

pub use logging::{init_logging, LogFormat, LoggingConfig};
