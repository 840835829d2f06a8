//! Reference image resolution.
//!
//! A test's reference is found by trying a fixed list of strategies in priority order:
//! generate a fresh reference, use an explicit reference file, or search a reference directory.
//! The first strategy that applies wins; if none applies the test is skipped.

use crate::config::{Endianness, TestSpec};
use crate::error::{Error, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Extension of generated references and the first candidate in a directory search.
pub const CANONICAL_EXTENSION: &str = ".png";
/// High-dynamic-range candidate, searched second.
pub const HDR_EXTENSION: &str = ".hdr";

/// Raw gegl buffer extension for the given endianness, e.g. `.little-endian.gegl`.
pub fn raw_extension(endianness: Endianness) -> String {
  format!(".{}-endian.gegl", endianness.as_str())
}

/// Candidate extensions for a directory search, highest priority first.
pub fn candidate_extensions(endianness: Endianness) -> [String; 3] {
  [
    CANONICAL_EXTENSION.to_string(),
    HDR_EXTENSION.to_string(),
    raw_extension(endianness),
  ]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceMode {
  /// The reference exists on disk already.
  Existing,
  /// The reference will be written by the reference-generation invocation.
  ToGenerate,
}

/// The reference file chosen for a test run. Never mutated once computed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedReference {
  pub path: PathBuf,
  /// Including the leading dot; may be empty for an explicit file without extension.
  pub extension: String,
  pub mode: ReferenceMode,
}

impl ResolvedReference {
  /// Output path for the processing run: `<output_dir>/<test_name><extension>`, so output and
  /// reference share a format.
  pub fn output_path(&self, output_dir: &Path, test_name: &str) -> PathBuf {
    output_dir.join(format!("{test_name}{}", self.extension))
  }
}

/// Result of running the whole strategy list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
  Found(ResolvedReference),
  /// No strategy applied; the test cannot run here.
  Missing,
}

/// Inputs shared by every strategy.
#[derive(Debug, Clone)]
pub struct ResolveContext<'a> {
  pub test_name: &'a str,
  pub reference_path: Option<&'a Path>,
  pub output_dir: &'a Path,
  pub endianness: Endianness,
  pub generate_reference: bool,
}

impl<'a> ResolveContext<'a> {
  pub fn from_spec(spec: &'a TestSpec) -> Self {
    Self {
      test_name: &spec.test_name,
      reference_path: spec.reference_path.as_deref(),
      output_dir: &spec.output_dir,
      endianness: spec.endianness,
      generate_reference: spec.generate_reference,
    }
  }
}

/// One way of finding a reference. `Ok(None)` means "not applicable, try the next one".
pub trait ResolutionStrategy {
  fn name(&self) -> &'static str;
  fn resolve(&self, ctx: &ResolveContext<'_>) -> Result<Option<ResolvedReference>>;
}

/// Target path for a freshly generated reference. Creates the reference directory.
pub struct GenerateReference;

impl ResolutionStrategy for GenerateReference {
  fn name(&self) -> &'static str {
    "generate"
  }

  fn resolve(&self, ctx: &ResolveContext<'_>) -> Result<Option<ResolvedReference>> {
    if !ctx.generate_reference {
      return Ok(None);
    }
    let Some(dir) = ctx.reference_path else {
      return Ok(None);
    };
    create_dir(dir)?;

    // Writing into the output directory would collide with the test's own output file.
    let file_name = if same_directory(dir, ctx.output_dir) {
      format!("{}_ref{CANONICAL_EXTENSION}", ctx.test_name)
    } else {
      format!("{}{CANONICAL_EXTENSION}", ctx.test_name)
    };
    Ok(Some(ResolvedReference {
      path: dir.join(file_name),
      extension: CANONICAL_EXTENSION.to_string(),
      mode: ReferenceMode::ToGenerate,
    }))
  }
}

/// The reference path names a regular file; use it as-is.
pub struct ExplicitFile;

impl ResolutionStrategy for ExplicitFile {
  fn name(&self) -> &'static str {
    "explicit-file"
  }

  fn resolve(&self, ctx: &ResolveContext<'_>) -> Result<Option<ResolvedReference>> {
    let Some(path) = ctx.reference_path.filter(|p| p.is_file()) else {
      return Ok(None);
    };
    let extension = path
      .extension()
      .map(|ext| format!(".{}", ext.to_string_lossy()))
      .unwrap_or_default();
    Ok(Some(ResolvedReference {
      path: path.to_path_buf(),
      extension,
      mode: ReferenceMode::Existing,
    }))
  }
}

/// The reference path names a directory; look for `<test_name><ext>` over the candidate
/// extensions in priority order.
pub struct DirectorySearch;

impl ResolutionStrategy for DirectorySearch {
  fn name(&self) -> &'static str {
    "directory-search"
  }

  fn resolve(&self, ctx: &ResolveContext<'_>) -> Result<Option<ResolvedReference>> {
    let Some(dir) = ctx.reference_path.filter(|p| p.is_dir()) else {
      return Ok(None);
    };
    for extension in candidate_extensions(ctx.endianness) {
      let candidate = dir.join(format!("{}{extension}", ctx.test_name));
      if candidate.exists() {
        return Ok(Some(ResolvedReference {
          path: candidate,
          extension,
          mode: ReferenceMode::Existing,
        }));
      }
      tracing::trace!(candidate = %candidate.display(), "reference candidate missing");
    }
    Ok(None)
  }
}

/// Runs an ordered list of strategies.
pub struct ReferenceResolver {
  strategies: Vec<Box<dyn ResolutionStrategy>>,
}

impl Default for ReferenceResolver {
  fn default() -> Self {
    Self::new(vec![
      Box::new(GenerateReference),
      Box::new(ExplicitFile),
      Box::new(DirectorySearch),
    ])
  }
}

impl ReferenceResolver {
  pub fn new(strategies: Vec<Box<dyn ResolutionStrategy>>) -> Self {
    Self { strategies }
  }

  pub fn strategy_names(&self) -> Vec<&'static str> {
    self.strategies.iter().map(|s| s.name()).collect()
  }

  pub fn resolve(&self, ctx: &ResolveContext<'_>) -> Result<Resolution> {
    for strategy in &self.strategies {
      if let Some(found) = strategy.resolve(ctx)? {
        tracing::debug!(
          strategy = strategy.name(),
          reference = %found.path.display(),
          "reference file"
        );
        return Ok(Resolution::Found(found));
      }
    }
    Ok(Resolution::Missing)
  }
}

/// True when both paths name the same directory, following symlinks for whatever exists.
fn same_directory(a: &Path, b: &Path) -> bool {
  if a == b {
    return true;
  }
  match (fs::canonicalize(a), fs::canonicalize(b)) {
    (Ok(a), Ok(b)) => a == b,
    _ => false,
  }
}

/// Creates `dir` (and parents) with owner-only permissions; an existing directory is fine.
pub(crate) fn create_dir(dir: &Path) -> Result<()> {
  if dir.is_dir() {
    return Ok(());
  }
  let mut builder = fs::DirBuilder::new();
  builder.recursive(true);
  #[cfg(unix)]
  {
    use std::os::unix::fs::DirBuilderExt;
    builder.mode(0o700);
  }
  builder.create(dir).map_err(|source| Error::CreateDir {
    path: dir.to_path_buf(),
    source,
  })
}
