use anyhow::{Context, Result};
use clap::Parser;
use gegl_test_runner::verdict::{EXIT_FAIL, EXIT_INTERRUPTED};
use gegl_test_runner::{logging, Args, Error, Orchestrator, SystemRunner, TestSpec, Verdict};
use std::io::Write;

fn main() {
  let args = Args::parse();
  logging::init(args.verbose);

  let code = match run(args) {
    Ok(verdict) => {
      if let Verdict::Skip(reason) = &verdict {
        println!("Skipping - {reason}");
      }
      verdict.exit_code()
    }
    // An interrupt ends the run without a verdict.
    Err(err) if is_interrupted(&err) => EXIT_INTERRUPTED,
    Err(err) => {
      eprintln!("error: {err:?}");
      EXIT_FAIL
    }
  };

  let _ = std::io::stdout().flush();
  std::process::exit(code);
}

fn run(args: Args) -> Result<Verdict> {
  let spec = TestSpec::from_args(args).context("resolve current directory")?;
  let test_name = spec.test_name.clone();
  Orchestrator::new(SystemRunner)
    .run(&spec)
    .with_context(|| format!("test {test_name} could not run"))
}

fn is_interrupted(err: &anyhow::Error) -> bool {
  err
    .downcast_ref::<Error>()
    .is_some_and(Error::is_interrupted)
}
