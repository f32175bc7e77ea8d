//! # dirsearch-core
//!
//! Core types shared by the directory lookup crates.
//!
//! ## Modules
//!
//! - [`error`] - Error taxonomy for configuration, result-shape, transport and native faults
//! - [`sid`] - Security identifier wrapper and its textual decoder

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod sid;

// Re-export commonly used types
pub use error::{Error, Result};
pub use sid::Sid;
