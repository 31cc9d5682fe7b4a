//! Common utilities and types shared across the draftsync crates.
//!
//! This module provides the error type used by every public operation and
//! the identity type an autosave engine is bound to.

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::DocumentId;
