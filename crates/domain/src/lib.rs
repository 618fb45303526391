//! Shared domain types for the drost gateway.
//!
//! Everything here is wire- or disk-visible: the error taxonomy, message
//! and session records, streaming events, tool types, capability
//! resolution, secret redaction, and the configuration schema.

pub mod capability;
pub mod config;
pub mod error;
pub mod message;
pub mod redact;
pub mod session;
pub mod stream;
pub mod tool;

pub use error::{Error, Result, ValidationIssue};
