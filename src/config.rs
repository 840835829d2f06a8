//! Command-line configuration and the resolved test specification.
//!
//! [`Args`] is the raw command line; [`TestSpec::from_args`] turns it into absolute paths with the
//! build-tree defaults filled in and contradictory flags normalized.

use crate::command::ArgNode;
use clap::{Parser, ValueEnum};
use std::env::consts::EXE_SUFFIX;
use std::fs;
use std::path::{Component, Path, PathBuf};

/// Environment variable that toggles the OpenCL backend in gegl.
pub const BACKEND_ENV_VAR: &str = "GEGL_USE_OPENCL";
/// Value of [`BACKEND_ENV_VAR`] that disables the backend.
pub const BACKEND_DISABLED: &str = "no";

const DEFAULT_OUTPUT_DIR: &str = "output";
const DEFAULT_REFERENCE_DIR: &str = "reference";

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, ValueEnum)]
#[clap(rename_all = "lowercase")]
pub enum Endianness {
  Big,
  Little,
  #[default]
  Unknown,
}

impl Endianness {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Big => "big",
      Self::Little => "little",
      Self::Unknown => "unknown",
    }
  }
}

#[derive(Parser, Debug, Clone)]
#[command(
  name = "gegl-test-runner",
  about = "Run gegl on an input image and compare the result against a reference image",
  version
)]
pub struct Args {
  /// Print resolved paths and commands
  #[arg(long)]
  pub verbose: bool,

  /// Test name; drives reference and output file names
  #[arg(long, value_name = "TEST_NAME")]
  pub test_name: String,

  /// Root directory of the build tree
  #[arg(long, value_name = "BUILD_ROOT", env = "ABS_TOP_BUILDDIR")]
  pub build_root: Option<PathBuf>,

  /// Test source directory; the default reference directory lives under it
  #[arg(long, value_name = "DIR")]
  pub source_dir: Option<PathBuf>,

  /// Top of the source tree; `<dir>/tests` is used when --source-dir is absent
  #[arg(long, value_name = "DIR", env = "ABS_TOP_SRCDIR", hide = true)]
  pub top_srcdir: Option<PathBuf>,

  /// Directory for output files
  #[arg(long, value_name = "OUTPUT_DIR", default_value = DEFAULT_OUTPUT_DIR)]
  pub output_dir: PathBuf,

  /// Reference file or directory
  #[arg(long, value_name = "REF_PATH")]
  pub reference_path: Option<PathBuf>,

  /// Endianness of reference files to use
  #[arg(long, value_enum, value_name = "big|little", default_value_t = Endianness::Unknown)]
  pub endian: Endianness,

  /// Input file for processing
  #[arg(long, value_name = "INPUT_FILE")]
  pub input_file: PathBuf,

  /// gegl program
  #[arg(long, value_name = "GEGL")]
  pub gegl_exe: Option<PathBuf>,

  /// gegl --scale value, forwarded verbatim
  #[arg(long, value_name = "GEGL_SCALE")]
  pub gegl_scale: Option<String>,

  /// gegl operations
  #[arg(long, num_args = 0.., value_name = "OPS")]
  pub gegl_ops: Option<Vec<String>>,

  /// imgcmp program
  #[arg(long, value_name = "IMGCMP")]
  pub imgcmp_exe: Option<PathBuf>,

  /// imgcmp runtime arguments
  #[arg(long, num_args = 0.., value_name = "ARGS")]
  pub imgcmp_args: Option<Vec<String>>,

  /// Enable OpenCL
  #[arg(long)]
  pub with_opencl: bool,

  /// OpenCL enabled check program
  #[arg(long, value_name = "DETECT_OPENCL")]
  pub detect_opencl_exe: Option<PathBuf>,

  /// Generate non OpenCL reference for OpenCL test
  #[arg(long)]
  pub generate_reference: bool,

  /// Print the computed plan (commands + paths) without executing.
  #[arg(long, hide = true)]
  pub dry_run: bool,
}

/// Locations of the external programs a test run needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tools {
  pub gegl: PathBuf,
  pub imgcmp: PathBuf,
  pub detect_opencl: PathBuf,
}

/// Everything needed to run one test. Built once per run and never mutated afterwards.
#[derive(Debug, Clone)]
pub struct TestSpec {
  pub test_name: String,
  pub input_path: PathBuf,
  pub output_dir: PathBuf,
  /// File to use directly, or directory to search.
  pub reference_path: Option<PathBuf>,
  pub endianness: Endianness,
  pub scale: Option<String>,
  /// Operation arguments forwarded after `--`; groups may nest.
  pub ops: Vec<ArgNode>,
  pub comparator_args: Vec<String>,
  pub use_backend: bool,
  /// Only ever true when `use_backend` is true.
  pub generate_reference: bool,
  pub tools: Tools,
  pub dry_run: bool,
}

impl TestSpec {
  /// Resolves `args` relative to the process's current directory.
  pub fn from_args(args: Args) -> std::io::Result<Self> {
    let cwd = std::env::current_dir()?;
    Ok(Self::from_args_in(args, &cwd))
  }

  /// Resolves `args` with relative paths taken from `cwd`.
  pub fn from_args_in(args: Args, cwd: &Path) -> Self {
    let build_root = args
      .build_root
      .as_deref()
      .map(|p| absolutize(cwd, p))
      .unwrap_or_else(|| cwd.to_path_buf());
    let source_dir = match (&args.source_dir, &args.top_srcdir) {
      (Some(dir), _) => absolutize(cwd, dir),
      (None, Some(top)) => absolutize(cwd, &top.join("tests")),
      (None, None) => cwd.to_path_buf(),
    };
    let reference_path = match &args.reference_path {
      Some(path) => absolutize(cwd, path),
      None => absolutize(cwd, &source_dir.join(DEFAULT_REFERENCE_DIR)),
    };

    let tool = |explicit: &Option<PathBuf>, dir: &str, name: &str| {
      let path = explicit
        .clone()
        .unwrap_or_else(|| build_root.join(dir).join(format!("{name}{EXE_SUFFIX}")));
      absolutize(cwd, &path)
    };
    let tools = Tools {
      gegl: tool(&args.gegl_exe, "bin", "gegl"),
      imgcmp: tool(&args.imgcmp_exe, "tools", "gegl-imgcmp"),
      detect_opencl: tool(&args.detect_opencl_exe, "tools", "detect_opencl"),
    };

    let generate_reference = normalize_generate_reference(args.generate_reference, args.with_opencl);

    let spec = Self {
      test_name: args.test_name,
      input_path: absolutize(cwd, &args.input_file),
      output_dir: absolutize(cwd, &args.output_dir),
      reference_path: Some(reference_path),
      endianness: args.endian,
      scale: args.gegl_scale,
      ops: args
        .gegl_ops
        .unwrap_or_default()
        .into_iter()
        .map(ArgNode::from)
        .collect(),
      comparator_args: args.imgcmp_args.unwrap_or_default(),
      use_backend: args.with_opencl,
      generate_reference,
      tools,
      dry_run: args.dry_run,
    };

    tracing::debug!(build_root = %build_root.display(), "build root");
    tracing::debug!(output_dir = %spec.output_dir.display(), "output dir");
    if let Some(path) = &spec.reference_path {
      tracing::debug!(reference_path = %path.display(), "ref path");
    }
    tracing::debug!(input = %spec.input_path.display(), "input file");
    tracing::debug!(gegl = %spec.tools.gegl.display(), "gegl exe");
    tracing::debug!(imgcmp = %spec.tools.imgcmp.display(), "imgcmp exe");
    tracing::debug!(detect_opencl = %spec.tools.detect_opencl.display(), "detect OpenCL exe");

    spec
  }
}

/// Reference generation only makes sense when comparing against a backend run, so the flag is
/// dropped (with a warning, not an error) when the backend is off.
pub fn normalize_generate_reference(generate_reference: bool, use_backend: bool) -> bool {
  if generate_reference && !use_backend {
    tracing::warn!("--generate-reference only valid with --with-opencl - option ignored");
    return false;
  }
  generate_reference
}

/// Makes `path` absolute the way `realpath` does: relative paths are joined onto `cwd`, the
/// existing prefix has its symlinks resolved, and `.`/`..` are folded even below the first
/// component that does not exist yet.
pub fn absolutize(cwd: &Path, path: &Path) -> PathBuf {
  let joined = if path.is_absolute() {
    path.to_path_buf()
  } else {
    cwd.join(path)
  };

  let mut resolved = PathBuf::new();
  for component in joined.components() {
    match component {
      Component::Prefix(_) | Component::RootDir => resolved.push(component.as_os_str()),
      Component::CurDir => {}
      Component::ParentDir => {
        resolved.pop();
      }
      Component::Normal(name) => {
        resolved.push(name);
        if let Ok(canonical) = fs::canonicalize(&resolved) {
          resolved = canonical;
        }
      }
    }
  }
  resolved
}
