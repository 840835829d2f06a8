//! Pass/skip/fail verdicts and their exit codes.
//!
//! Exit codes follow the automake/meson test convention: `0` passes, `77` skips, anything else
//! fails. A failing subprocess's own exit code is propagated where one is available.

use std::fmt;
use std::path::PathBuf;
use std::process::ExitStatus;

/// Exit code for a passing test.
pub const EXIT_PASS: i32 = 0;
/// Exit code telling the test runner the test was skipped.
pub const EXIT_SKIP: i32 = 77;
/// Exit code used for failures that carry no subprocess code of their own.
pub const EXIT_FAIL: i32 = 1;
/// Exit code used when the harness is interrupted (128 + SIGINT).
pub const EXIT_INTERRUPTED: i32 = 130;

/// Why a test could not run in this environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
  BackendUnavailable,
  MissingInput(PathBuf),
  MissingProcessingTool(PathBuf),
  MissingComparator(PathBuf),
  MissingReference,
}

impl fmt::Display for SkipReason {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::BackendUnavailable => write!(f, "OpenCL not available"),
      Self::MissingInput(path) => write!(f, "cannot find input file: {}", path.display()),
      Self::MissingProcessingTool(path) => write!(f, "cannot find gegl: {}", path.display()),
      Self::MissingComparator(path) => write!(f, "cannot find imgcmp: {}", path.display()),
      Self::MissingReference => write!(f, "cannot find test reference file"),
    }
  }
}

/// Final classification of one test run. Produced exactly once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
  Pass,
  Skip(SkipReason),
  Fail(i32),
}

impl Verdict {
  pub fn exit_code(&self) -> i32 {
    match self {
      Self::Pass => EXIT_PASS,
      Self::Skip(_) => EXIT_SKIP,
      Self::Fail(code) => *code,
    }
  }
}

/// How a finished subprocess ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
  Success,
  /// Exited with a non-zero code.
  Failed(i32),
  /// Terminated by a signal other than an interrupt; no exit code is available.
  Killed,
  /// Terminated by SIGINT or SIGTERM.
  ///
  /// A child stopped by SIGTERM (for example by a supervisor's wall-clock limit sent to the whole
  /// process group) ends the run without a verdict, exactly like an interrupt.
  Interrupted,
}

impl RunOutcome {
  pub fn from_status(status: &ExitStatus) -> Self {
    if status.success() {
      return Self::Success;
    }
    if let Some(code) = status.code() {
      return Self::Failed(code);
    }
    if is_interrupt_signal(status) {
      Self::Interrupted
    } else {
      Self::Killed
    }
  }

  /// The verdict this outcome forces, if any. `Success` lets the sequence continue and
  /// `Interrupted` has no verdict at all.
  pub fn failure_verdict(self) -> Option<Verdict> {
    match self {
      Self::Success | Self::Interrupted => None,
      // A zero code cannot reach here, but keep the mapping total.
      Self::Failed(code) if code == EXIT_PASS => Some(Verdict::Fail(EXIT_FAIL)),
      Self::Failed(code) => Some(Verdict::Fail(code)),
      Self::Killed => Some(Verdict::Fail(EXIT_FAIL)),
    }
  }
}

#[cfg(unix)]
fn is_interrupt_signal(status: &ExitStatus) -> bool {
  use std::os::unix::process::ExitStatusExt;
  // SIGINT = 2, SIGTERM = 15 on every Unix we build for.
  matches!(status.signal(), Some(2) | Some(15))
}

#[cfg(not(unix))]
fn is_interrupt_signal(_status: &ExitStatus) -> bool {
  false
}
