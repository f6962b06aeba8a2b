//! Error handling for HPI operations
//!
//! This module re-exports the error types used throughout the crate. The enum
//! itself lives in `common` next to the format constants it reports on, and
//! uses thiserror for the display implementations.

pub use crate::common::HpiError;
pub use crate::common::Result;
