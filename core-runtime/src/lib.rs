//! # Core Runtime Module
//!
//! Foundational runtime infrastructure for the lesson player core:
//! - Logging and tracing infrastructure
//! - Configuration and bridge injection
//! - Event bus system
//!
//! ## Overview
//!
//! Every other core crate depends on this one for its logging conventions,
//! its broadcast event types and the validated `CoreConfig` that carries the
//! host's platform bridges.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use error::{Error, Result};
