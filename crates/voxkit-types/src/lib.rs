//! Core types for the voxkit agent appliance runtime.
//!
//! This crate defines the shared data model used by the scheduler, the
//! service contract layer and the agent manager: typed values, function and
//! event schemas, the lifecycle vocabulary, configuration and errors. It
//! contains no business logic.

pub mod agent;
pub mod config;
pub mod error;
pub mod scheduler;
pub mod schema;
pub mod serde_compat;
pub mod value;
