//! Runs one test: precondition checks, then reference generation, processing and comparison.
//!
//! Invocations are strictly sequential and each blocks until the subprocess exits. The first
//! failing step decides the verdict; an interrupted subprocess aborts the run with
//! [`Error::Interrupted`] instead of producing a verdict.

use crate::command::{ArgNode, Invocation};
use crate::config::{TestSpec, BACKEND_DISABLED, BACKEND_ENV_VAR};
use crate::error::{Error, Result};
use crate::reference::{create_dir, ReferenceResolver, Resolution, ResolveContext, ResolvedReference};
use crate::verdict::{RunOutcome, SkipReason, Verdict};
use std::fmt;
use std::io::Write;
use std::path::PathBuf;
use std::process::Stdio;

/// Which external invocation is being run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
  /// Backend availability probe.
  Probe,
  /// Backend-free gegl run writing the reference image.
  GenerateReference,
  /// The test's own gegl run.
  Process,
  /// imgcmp between reference and output.
  Compare,
}

impl fmt::Display for Step {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(match self {
      Self::Probe => "detect",
      Self::GenerateReference => "ref",
      Self::Process => "gegl",
      Self::Compare => "imgcmp",
    })
  }
}

/// Launches external programs.
pub trait ProcessRunner {
  /// Runs `invocation` to completion. Failing to start the program is an error; everything that
  /// happens after it started is reported through [`RunOutcome`].
  fn run(&mut self, step: Step, invocation: &Invocation) -> Result<RunOutcome>;
}

/// Runs invocations as real subprocesses.
#[derive(Debug, Default)]
pub struct SystemRunner;

impl ProcessRunner for SystemRunner {
  fn run(&mut self, step: Step, invocation: &Invocation) -> Result<RunOutcome> {
    let mut cmd = invocation.to_command();
    if step == Step::Probe {
      cmd.stdout(Stdio::null());
    }
    let status = cmd.status().map_err(|source| Error::Spawn {
      program: invocation.program.clone(),
      source,
    })?;
    Ok(RunOutcome::from_status(&status))
  }
}

/// The fully resolved set of invocations for one test.
#[derive(Debug, Clone)]
pub struct Plan {
  pub reference: ResolvedReference,
  pub output_path: PathBuf,
  pub generate_reference: Option<Invocation>,
  pub process: Invocation,
  pub compare: Invocation,
}

impl Plan {
  pub fn new(spec: &TestSpec, reference: ResolvedReference) -> Self {
    let output_path = reference.output_path(&spec.output_dir, &spec.test_name);

    let generate_reference = spec.generate_reference.then(|| {
      gegl_invocation(spec, &reference.path).with_env(BACKEND_ENV_VAR, BACKEND_DISABLED)
    });

    let mut process = gegl_invocation(spec, &output_path);
    if !spec.use_backend {
      process = process.with_env(BACKEND_ENV_VAR, BACKEND_DISABLED);
    }

    let compare = Invocation::build(
      &spec.tools.imgcmp,
      &[
        ArgNode::from(&reference.path),
        ArgNode::from(&output_path),
        ArgNode::group(spec.comparator_args.iter().map(String::as_str)),
      ],
    )
    .with_env(BACKEND_ENV_VAR, BACKEND_DISABLED);

    Self {
      reference,
      output_path,
      generate_reference,
      process,
      compare,
    }
  }

  /// Invocations in execution order.
  pub fn steps(&self) -> Vec<(Step, &Invocation)> {
    let mut steps = Vec::with_capacity(3);
    if let Some(generate) = &self.generate_reference {
      steps.push((Step::GenerateReference, generate));
    }
    steps.push((Step::Process, &self.process));
    steps.push((Step::Compare, &self.compare));
    steps
  }

  pub fn print(&self) {
    println!("gegl-test-runner plan:");
    println!("  reference: {}", self.reference.path.display());
    println!("  output: {}", self.output_path.display());
    println!();
    for (step, invocation) in self.steps() {
      println!("{step} cmd: {invocation}");
    }
  }
}

/// `<gegl> <input> -o <output> [-s <scale>] [-- <ops...>]`
fn gegl_invocation(spec: &TestSpec, output: &std::path::Path) -> Invocation {
  let scale = spec
    .scale
    .as_deref()
    .map(|scale| ArgNode::group(["-s", scale]));
  let ops = if crate::command::flatten(&spec.ops).is_empty() {
    ArgNode::empty()
  } else {
    ArgNode::Group(vec![ArgNode::from("--"), ArgNode::Group(spec.ops.clone())])
  };
  Invocation::build(
    &spec.tools.gegl,
    &[
      ArgNode::from(&spec.input_path),
      ArgNode::from("-o"),
      ArgNode::from(output),
      ArgNode::from(scale),
      ops,
    ],
  )
}

pub struct Orchestrator<R> {
  runner: R,
  resolver: ReferenceResolver,
}

impl<R: ProcessRunner> Orchestrator<R> {
  pub fn new(runner: R) -> Self {
    Self::with_resolver(runner, ReferenceResolver::default())
  }

  pub fn with_resolver(runner: R, resolver: ReferenceResolver) -> Self {
    Self { runner, resolver }
  }

  pub fn runner(&self) -> &R {
    &self.runner
  }

  /// Runs the test described by `spec` and returns its verdict.
  pub fn run(&mut self, spec: &TestSpec) -> Result<Verdict> {
    if let Some(reason) = self.check_preconditions(spec)? {
      return Ok(Verdict::Skip(reason));
    }

    let reference = match self.resolver.resolve(&ResolveContext::from_spec(spec))? {
      Resolution::Found(reference) => reference,
      Resolution::Missing => return Ok(Verdict::Skip(SkipReason::MissingReference)),
    };
    let plan = Plan::new(spec, reference);
    tracing::debug!(output = %plan.output_path.display(), "output file");

    if spec.dry_run {
      plan.print();
      return Ok(Verdict::Pass);
    }

    create_dir(&spec.output_dir)?;

    for (step, invocation) in plan.steps() {
      tracing::debug!("{step} cmd: {invocation}");
    }
    flush_stdout();

    for (step, invocation) in plan.steps() {
      match self.runner.run(step, invocation)? {
        RunOutcome::Interrupted => {
          return Err(Error::Interrupted {
            program: invocation.program.clone(),
          })
        }
        outcome => {
          if let Some(verdict) = outcome.failure_verdict() {
            tracing::debug!(%step, ?outcome, "step failed");
            flush_stdout();
            return Ok(verdict);
          }
        }
      }
    }

    flush_stdout();
    Ok(Verdict::Pass)
  }

  /// Returns the first unmet prerequisite. Runs no subprocess except the backend probe.
  fn check_preconditions(&mut self, spec: &TestSpec) -> Result<Option<SkipReason>> {
    if spec.use_backend {
      if !self.backend_available(spec)? {
        return Ok(Some(SkipReason::BackendUnavailable));
      }
      tracing::debug!("Running with OpenCL");
    }
    if !spec.input_path.exists() {
      return Ok(Some(SkipReason::MissingInput(spec.input_path.clone())));
    }
    if !spec.tools.gegl.exists() {
      return Ok(Some(SkipReason::MissingProcessingTool(
        spec.tools.gegl.clone(),
      )));
    }
    if !spec.tools.imgcmp.exists() {
      return Ok(Some(SkipReason::MissingComparator(spec.tools.imgcmp.clone())));
    }
    Ok(None)
  }

  fn backend_available(&mut self, spec: &TestSpec) -> Result<bool> {
    let probe = Invocation::build(&spec.tools.detect_opencl, &[]);
    match self.runner.run(Step::Probe, &probe) {
      Ok(RunOutcome::Success) => Ok(true),
      Ok(RunOutcome::Interrupted) => Err(Error::Interrupted {
        program: probe.program,
      }),
      Ok(outcome) => {
        tracing::debug!(?outcome, "OpenCL probe failed");
        Ok(false)
      }
      Err(err) => {
        tracing::debug!(error = %err, "OpenCL probe could not run");
        Ok(false)
      }
    }
  }
}

fn flush_stdout() {
  let _ = std::io::stdout().flush();
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::{Endianness, Tools};
  use crate::reference::ReferenceMode;
  use std::collections::VecDeque;
  use std::fs;
  use std::path::Path;
  use tempfile::{tempdir, TempDir};

  /// Records invocations and replays scripted outcomes (success once the script runs out).
  #[derive(Default)]
  struct FakeRunner {
    calls: Vec<(Step, Invocation)>,
    outcomes: VecDeque<Result<RunOutcome>>,
  }

  impl FakeRunner {
    fn scripted(outcomes: Vec<Result<RunOutcome>>) -> Self {
      Self {
        calls: Vec::new(),
        outcomes: outcomes.into(),
      }
    }

    fn steps(&self) -> Vec<Step> {
      self.calls.iter().map(|(step, _)| *step).collect()
    }

    fn call(&self, step: Step) -> &Invocation {
      &self
        .calls
        .iter()
        .find(|(s, _)| *s == step)
        .expect("step was run")
        .1
    }
  }

  impl ProcessRunner for FakeRunner {
    fn run(&mut self, step: Step, invocation: &Invocation) -> Result<RunOutcome> {
      self.calls.push((step, invocation.clone()));
      self.outcomes.pop_front().unwrap_or(Ok(RunOutcome::Success))
    }
  }

  struct Fixture {
    _temp: TempDir,
    spec: TestSpec,
  }

  fn touch(path: &Path) {
    if let Some(parent) = path.parent() {
      fs::create_dir_all(parent).expect("create parent");
    }
    fs::write(path, b"").expect("write placeholder");
  }

  /// input `photo.png`, reference dir with `mytest.png`, fake tools present.
  fn fixture() -> Fixture {
    let temp = tempdir().expect("tempdir");
    let root = temp.path();
    let tools = Tools {
      gegl: root.join("bin/gegl"),
      imgcmp: root.join("tools/gegl-imgcmp"),
      detect_opencl: root.join("tools/detect_opencl"),
    };
    touch(&tools.gegl);
    touch(&tools.imgcmp);
    touch(&tools.detect_opencl);
    touch(&root.join("photo.png"));
    touch(&root.join("reference/mytest.png"));

    let spec = TestSpec {
      test_name: "mytest".to_string(),
      input_path: root.join("photo.png"),
      output_dir: root.join("output"),
      reference_path: Some(root.join("reference")),
      endianness: Endianness::Unknown,
      scale: None,
      ops: Vec::new(),
      comparator_args: Vec::new(),
      use_backend: false,
      generate_reference: false,
      tools,
      dry_run: false,
    };
    Fixture { _temp: temp, spec }
  }

  fn args(invocation: &Invocation) -> Vec<String> {
    invocation
      .args
      .iter()
      .map(|a| a.to_string_lossy().into_owned())
      .collect()
  }

  #[test]
  fn runs_gegl_then_imgcmp_and_passes() {
    let fx = fixture();
    let mut orchestrator = Orchestrator::new(FakeRunner::default());
    let verdict = orchestrator.run(&fx.spec).expect("run");

    assert_eq!(verdict, Verdict::Pass);
    let runner = orchestrator.runner();
    assert_eq!(runner.steps(), [Step::Process, Step::Compare]);

    let output = fx.spec.output_dir.join("mytest.png");
    assert!(fx.spec.output_dir.is_dir());
    assert_eq!(
      args(runner.call(Step::Process)),
      [
        fx.spec.input_path.to_string_lossy().into_owned(),
        "-o".to_string(),
        output.to_string_lossy().into_owned(),
      ]
    );
    assert_eq!(
      args(runner.call(Step::Compare)),
      [
        fx.spec
          .reference_path
          .as_ref()
          .expect("reference path")
          .join("mytest.png")
          .to_string_lossy()
          .into_owned(),
        output.to_string_lossy().into_owned(),
      ]
    );
  }

  #[test]
  fn comparator_exit_code_becomes_verdict() {
    let fx = fixture();
    let mut orchestrator = Orchestrator::new(FakeRunner::scripted(vec![
      Ok(RunOutcome::Success),
      Ok(RunOutcome::Failed(3)),
    ]));
    assert_eq!(orchestrator.run(&fx.spec).expect("run"), Verdict::Fail(3));
    assert_eq!(orchestrator.runner().steps(), [Step::Process, Step::Compare]);
  }

  #[test]
  fn processing_failure_stops_before_compare() {
    let fx = fixture();
    let mut orchestrator =
      Orchestrator::new(FakeRunner::scripted(vec![Ok(RunOutcome::Failed(2))]));
    assert_eq!(orchestrator.run(&fx.spec).expect("run"), Verdict::Fail(2));
    assert_eq!(orchestrator.runner().steps(), [Step::Process]);
  }

  #[test]
  fn killed_subprocess_fails_with_code_one() {
    let fx = fixture();
    let mut orchestrator = Orchestrator::new(FakeRunner::scripted(vec![Ok(RunOutcome::Killed)]));
    assert_eq!(orchestrator.run(&fx.spec).expect("run"), Verdict::Fail(1));
  }

  #[test]
  fn missing_input_skips_without_running_anything() {
    let mut fx = fixture();
    fx.spec.input_path = fx.spec.input_path.with_file_name("absent.png");
    let mut orchestrator = Orchestrator::new(FakeRunner::default());
    let verdict = orchestrator.run(&fx.spec).expect("run");
    assert_eq!(verdict.exit_code(), 77);
    assert!(matches!(
      verdict,
      Verdict::Skip(SkipReason::MissingInput(_))
    ));
    assert!(orchestrator.runner().calls.is_empty());
  }

  #[test]
  fn missing_tools_skip() {
    let fx = fixture();
    let mut spec = fx.spec.clone();
    spec.tools.gegl = spec.tools.gegl.with_file_name("nope");
    let verdict = Orchestrator::new(FakeRunner::default())
      .run(&spec)
      .expect("run");
    assert!(matches!(
      verdict,
      Verdict::Skip(SkipReason::MissingProcessingTool(_))
    ));

    let mut spec = fx.spec.clone();
    spec.tools.imgcmp = spec.tools.imgcmp.with_file_name("nope");
    let verdict = Orchestrator::new(FakeRunner::default())
      .run(&spec)
      .expect("run");
    assert!(matches!(
      verdict,
      Verdict::Skip(SkipReason::MissingComparator(_))
    ));
  }

  #[test]
  fn missing_reference_skips() {
    let mut fx = fixture();
    fx.spec.test_name = "unknown".to_string();
    let mut orchestrator = Orchestrator::new(FakeRunner::default());
    assert_eq!(
      orchestrator.run(&fx.spec).expect("run"),
      Verdict::Skip(SkipReason::MissingReference)
    );
    assert!(orchestrator.runner().calls.is_empty());
  }

  #[test]
  fn unavailable_backend_skips_after_probe() {
    let mut fx = fixture();
    fx.spec.use_backend = true;
    let mut orchestrator =
      Orchestrator::new(FakeRunner::scripted(vec![Ok(RunOutcome::Failed(1))]));
    assert_eq!(
      orchestrator.run(&fx.spec).expect("run"),
      Verdict::Skip(SkipReason::BackendUnavailable)
    );
    assert_eq!(orchestrator.runner().steps(), [Step::Probe]);

    let mut orchestrator = Orchestrator::new(FakeRunner::scripted(vec![Err(Error::Spawn {
      program: fx.spec.tools.detect_opencl.clone(),
      source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
    })]));
    assert_eq!(
      orchestrator.run(&fx.spec).expect("run"),
      Verdict::Skip(SkipReason::BackendUnavailable)
    );
  }

  #[test]
  fn generated_reference_in_output_dir_gets_ref_suffix() {
    let mut fx = fixture();
    fx.spec.use_backend = true;
    fx.spec.generate_reference = true;
    fx.spec.reference_path = Some(fx.spec.output_dir.clone());

    let mut orchestrator = Orchestrator::new(FakeRunner::default());
    assert_eq!(orchestrator.run(&fx.spec).expect("run"), Verdict::Pass);
    let runner = orchestrator.runner();
    assert_eq!(
      runner.steps(),
      [
        Step::Probe,
        Step::GenerateReference,
        Step::Process,
        Step::Compare
      ]
    );

    let reference = fx.spec.output_dir.join("mytest_ref.png");
    let generate = runner.call(Step::GenerateReference);
    assert_eq!(args(generate)[2], reference.to_string_lossy());
    assert_eq!(
      generate.env_override(BACKEND_ENV_VAR),
      Some(std::ffi::OsStr::new(BACKEND_DISABLED))
    );
    assert_eq!(runner.call(Step::Process).env_override(BACKEND_ENV_VAR), None);
    assert_eq!(
      runner.call(Step::Compare).env_override(BACKEND_ENV_VAR),
      Some(std::ffi::OsStr::new(BACKEND_DISABLED))
    );
    assert_eq!(args(runner.call(Step::Compare))[0], reference.to_string_lossy());
  }

  #[test]
  fn scale_and_ops_are_forwarded_in_order() {
    let mut fx = fixture();
    fx.spec.scale = Some("0.5".to_string());
    fx.spec.ops = vec![
      ArgNode::from("gegl:gaussian-blur"),
      ArgNode::group(["std-dev-x=3", "std-dev-y=3"]),
      ArgNode::empty(),
    ];
    fx.spec.comparator_args = vec!["diff.png".to_string()];

    let mut orchestrator = Orchestrator::new(FakeRunner::default());
    orchestrator.run(&fx.spec).expect("run");
    let runner = orchestrator.runner();
    assert_eq!(
      args(runner.call(Step::Process))[3..],
      [
        "-s",
        "0.5",
        "--",
        "gegl:gaussian-blur",
        "std-dev-x=3",
        "std-dev-y=3"
      ]
    );
    assert_eq!(args(runner.call(Step::Compare))[2..], ["diff.png"]);
  }

  #[test]
  fn empty_ops_emit_no_separator() {
    let mut fx = fixture();
    fx.spec.ops = vec![ArgNode::Group(vec![ArgNode::empty()])];
    let mut orchestrator = Orchestrator::new(FakeRunner::default());
    orchestrator.run(&fx.spec).expect("run");
    assert_eq!(args(orchestrator.runner().call(Step::Process)).len(), 3);
  }

  #[test]
  fn interrupted_comparison_yields_no_verdict() {
    let fx = fixture();
    let mut orchestrator = Orchestrator::new(FakeRunner::scripted(vec![
      Ok(RunOutcome::Success),
      Ok(RunOutcome::Interrupted),
    ]));
    let err = orchestrator.run(&fx.spec).expect_err("interrupt propagates");
    assert!(err.is_interrupted());
  }

  #[test]
  fn dry_run_resolves_but_does_not_execute() {
    let mut fx = fixture();
    fx.spec.dry_run = true;
    let mut orchestrator = Orchestrator::new(FakeRunner::default());
    assert_eq!(orchestrator.run(&fx.spec).expect("run"), Verdict::Pass);
    assert!(orchestrator.runner().calls.is_empty());
    assert!(!fx.spec.output_dir.exists());
  }

  #[test]
  fn plan_records_reference_mode() {
    let fx = fixture();
    let reference = ResolvedReference {
      path: PathBuf::from("/refs/mytest.hdr"),
      extension: ".hdr".to_string(),
      mode: ReferenceMode::Existing,
    };
    let plan = Plan::new(&fx.spec, reference);
    assert_eq!(plan.output_path, fx.spec.output_dir.join("mytest.hdr"));
    assert!(plan.generate_reference.is_none());
    assert_eq!(plan.steps().len(), 2);
  }
}
