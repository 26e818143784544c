//! Common utilities and types shared across Lockbox modules.
//!
//! This module provides the error taxonomy used by every crate in the
//! workspace, and the validated identifier type used to name stored secrets.

pub mod error;
pub mod types;

pub use error::{Error, ErrorKind, Result};
pub use types::{Identifier, MAX_IDENTIFIER_LENGTH};
