//! Reference-image regression harness for gegl.
//!
//! One run processes an input image with gegl, finds (or generates) the matching reference image,
//! compares the two with `gegl-imgcmp`, and reduces everything to a single [`Verdict`] whose exit
//! code follows the test-runner convention (`0` pass, `77` skip, anything else fail).

pub mod command;
pub mod config;
pub mod error;
pub mod logging;
pub mod orchestrator;
pub mod reference;
pub mod verdict;

pub use command::{flatten, ArgNode, Invocation};
pub use config::{Args, Endianness, TestSpec, Tools};
pub use error::{Error, Result};
pub use orchestrator::{Orchestrator, Plan, ProcessRunner, Step, SystemRunner};
pub use reference::{ReferenceMode, ReferenceResolver, Resolution, ResolvedReference};
pub use verdict::{RunOutcome, SkipReason, Verdict};
