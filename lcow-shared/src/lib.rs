//! LCOW Shared - Common types for the host-side utility VM tooling
//!
//! This crate contains the error taxonomy and the constants that form
//! the contract with the Linux utility VM.

pub mod constants;
pub mod errors;

pub use errors::{CommandFailure, LcowError, LcowResult};
