//! Core runtime for voxkit.
//!
//! - [`scheduler`]: fixed worker pool with one-shot and restart-timer jobs.
//! - [`service`]: typed service contracts, validation, call and emit.
//! - [`agent_manager`]: the agent lifecycle service.
//! - [`kernel`]: boots and tears down all of the above as one context.

pub mod agent_manager;
pub mod config;
pub mod error;
pub mod event_bus;
pub mod kernel;
pub mod registry;
pub mod scheduler;
pub mod service;

pub use kernel::Kernel;
