//! Error types for the test harness
//!
//! Missing prerequisites are not errors: they surface as
//! [`Verdict::Skip`](crate::Verdict::Skip). The variants here cover the cases where the harness
//! itself cannot continue, plus interruption, which must bypass the verdict mapping entirely.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for harness operations
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for the harness
#[derive(Error, Debug)]
pub enum Error {
  /// A directory the harness needs to write into could not be created
  #[error("failed to create directory {}: {source}", path.display())]
  CreateDir {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  /// An external program could not be started at all
  #[error("failed to run {}: {source}", program.display())]
  Spawn {
    program: PathBuf,
    #[source]
    source: std::io::Error,
  },

  /// An external program was interrupted (SIGINT/SIGTERM); no verdict is produced
  #[error("interrupted while running {}", program.display())]
  Interrupted { program: PathBuf },
}

impl Error {
  /// Returns true when the run was interrupted rather than failing.
  pub fn is_interrupted(&self) -> bool {
    matches!(self, Self::Interrupted { .. })
  }
}
