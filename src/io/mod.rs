//! Response shaping for exposed operations.
//!
//! This module provides:
//! - The response envelope shared by every operation
//! - Pure insight and hint builders over typed results

pub mod envelope;
pub mod insights;

pub use envelope::{EntityType, Envelope, ErrorDetails, Meta, SCHEMA_VERSION, Status};
