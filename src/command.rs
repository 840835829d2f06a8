//! Argument trees and external program invocations.
//!
//! Command lines are assembled from a mix of plain values and nested option groups (for example
//! an optional `-s <scale>` pair, or a `-- <ops...>` tail whose ops may themselves be grouped).
//! [`ArgNode`] models that structure and [`flatten`] collapses it into the ordered argument vector
//! handed to the operating system.

use std::collections::BTreeMap;
use std::ffi::{OsStr, OsString};
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;

/// A node in an argument tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgNode {
  /// A single argument.
  Scalar(OsString),
  /// An ordered group of arguments; may be empty or nested arbitrarily deep.
  Group(Vec<ArgNode>),
}

impl ArgNode {
  pub fn scalar(value: impl Into<OsString>) -> Self {
    Self::Scalar(value.into())
  }

  pub fn group<I, T>(items: I) -> Self
  where
    I: IntoIterator<Item = T>,
    T: Into<ArgNode>,
  {
    Self::Group(items.into_iter().map(Into::into).collect())
  }

  /// An empty group, contributing no arguments once flattened.
  pub fn empty() -> Self {
    Self::Group(Vec::new())
  }
}

impl From<&str> for ArgNode {
  fn from(value: &str) -> Self {
    Self::Scalar(value.into())
  }
}

impl From<String> for ArgNode {
  fn from(value: String) -> Self {
    Self::Scalar(value.into())
  }
}

impl From<OsString> for ArgNode {
  fn from(value: OsString) -> Self {
    Self::Scalar(value)
  }
}

impl From<&Path> for ArgNode {
  fn from(value: &Path) -> Self {
    Self::Scalar(value.as_os_str().to_os_string())
  }
}

impl From<&PathBuf> for ArgNode {
  fn from(value: &PathBuf) -> Self {
    Self::from(value.as_path())
  }
}

impl From<Vec<ArgNode>> for ArgNode {
  fn from(value: Vec<ArgNode>) -> Self {
    Self::Group(value)
  }
}

impl<T: Into<ArgNode>> From<Option<T>> for ArgNode {
  fn from(value: Option<T>) -> Self {
    value.map(Into::into).unwrap_or_else(ArgNode::empty)
  }
}

/// Flattens a sequence of argument nodes into a single ordered argument vector.
///
/// Scalars keep their relative order, groups are expanded in place, and empty groups contribute
/// nothing. Flattening an already flat sequence returns it unchanged.
pub fn flatten(parts: &[ArgNode]) -> Vec<OsString> {
  let mut out = Vec::new();
  flatten_into(parts, &mut out);
  out
}

/// Like [`flatten`], appending to an existing vector.
pub fn flatten_into(parts: &[ArgNode], out: &mut Vec<OsString>) {
  for part in parts {
    match part {
      ArgNode::Scalar(value) => out.push(value.clone()),
      ArgNode::Group(children) => flatten_into(children, out),
    }
  }
}

/// A single external program invocation: program, flat arguments, and environment overrides.
///
/// Overrides are merged over the inherited process environment when the invocation runs; the
/// harness's own environment is never modified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
  pub program: PathBuf,
  pub args: Vec<OsString>,
  pub env: BTreeMap<OsString, OsString>,
}

impl Invocation {
  /// Builds an invocation from an argument tree, flattening it in order.
  pub fn build(program: impl Into<PathBuf>, parts: &[ArgNode]) -> Self {
    Self {
      program: program.into(),
      args: flatten(parts),
      env: BTreeMap::new(),
    }
  }

  /// Adds (or replaces) an environment override.
  pub fn with_env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
    self.env.insert(key.into(), value.into());
    self
  }

  pub fn env_override(&self, key: impl AsRef<OsStr>) -> Option<&OsStr> {
    self.env.get(key.as_ref()).map(OsString::as_os_str)
  }

  /// Converts into a `std::process::Command` inheriting the current environment.
  pub fn to_command(&self) -> Command {
    let mut cmd = Command::new(&self.program);
    cmd.args(&self.args);
    cmd.envs(&self.env);
    cmd
  }
}

/// Renders as a copy-pasteable shell line: `$ KEY=VALUE program arg...`.
impl fmt::Display for Invocation {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str("$ ")?;
    for (key, value) in &self.env {
      write!(f, "{}={} ", key.to_string_lossy(), value.to_string_lossy())?;
    }
    write!(f, "{}", self.program.display())?;
    for arg in &self.args {
      write!(f, " {}", arg.to_string_lossy())?;
    }
    Ok(())
  }
}
