//! Error types for textflow
//!
//! All failures in this crate fall into three families:
//!
//! - **Out of memory**: growth of one of the large per-run buffers (text,
//!   break bits, flow lists) failed. The operation is aborted and the
//!   partially built run is discarded; callers may retry on a later pass.
//! - **Internal consistency**: an offset or flow range did not line up with
//!   the run it was used against. These indicate a scanner bug; they are
//!   asserted in debug builds and propagated (never clamped) in release
//!   builds, since clamping masks mis-rendering.
//! - **Shaping**: the external shaper backend could not shape the text.
//!   The affected objects are left without a run and measure as zero width.
//!
//! Errors use the `thiserror` crate for minimal boilerplate.

use std::collections::TryReserveError;
use thiserror::Error;

/// Result type alias for textflow operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for textflow.
#[derive(Error, Debug)]
pub enum Error {
  /// A buffer could not be grown.
  ///
  /// Raised by the transform and run-building paths, which reserve their
  /// buffers up front so a failed reservation leaves no partial state.
  #[error("out of memory growing a text buffer")]
  OutOfMemory,

  /// An offset range fell outside the run or mapping it was used with.
  ///
  /// This is an internal-consistency violation, not a user input error.
  #[error("offset range {start}..{end} out of bounds (limit {limit})")]
  InvalidRange {
    start: usize,
    end: usize,
    limit: usize,
  },

  /// A mapped flow did not line up with its content node range.
  #[error("mapped flows have a gap or overlap at content offset {offset}")]
  FlowMismatch { offset: usize },

  /// A run or object handle failed validation (stale or already removed).
  #[error("stale handle: {0}")]
  StaleHandle(&'static str),

  /// The external shaper could not produce shaped data for a run.
  #[error("shaper failure: {0}")]
  Shaping(String),
}

impl From<TryReserveError> for Error {
  fn from(_: TryReserveError) -> Self {
    Self::OutOfMemory
  }
}
