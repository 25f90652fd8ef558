//! Core constants, configuration, and error types.
//!
//! This module has no I/O dependencies and is always compiled, regardless of
//! which feature layers are enabled.

mod config;
mod constants;
mod error;

pub use config::*;
pub use constants::*;
pub use error::*;
