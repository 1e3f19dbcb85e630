//! Synthflow Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared plumbing for the synthflow workspace members.
//!
//! - **Error Handling**: [`SynthflowError`] and the [`Result`] alias
//! - **Logging**: `tracing` subscriber setup driven by [`logging::LogConfig`]
//! - **Checksums**: SHA-256 digests recorded for every uploaded file
//!
//! # Example
//!
//! ```no_run
//! use synthflow_common::checksum::sha256_file;
//! use synthflow_common::Result;
//!
//! fn fingerprint(path: &str) -> Result<String> {
//!     sha256_file(path)
//! }
//! ```

pub mod checksum;
pub mod error;
pub mod logging;

pub use error::{Result, SynthflowError};
