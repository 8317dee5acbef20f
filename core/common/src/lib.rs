//! Common utilities and types shared across photodrive crates.
//!
//! This module provides the error type every crate returns and the
//! validated identifiers passed between the client and its callers.

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{FileId, PageSize};
