//! emx-inlinecheck: run a script and check it against its own comments
//!
//! A test is an ordinary script whose comments say what it should do. The
//! checker runs it, captures stdout, stderr and how it terminated, and
//! reports every mismatch.
//!
//! # Directives
//!
//! ```text
//! #!/bin/sh
//! # RUN: sh %s %arg
//! # REQUIRES: exec:sh
//! echo "hello $1"
//! # CHECK: hello {{.*}}
//! echo oops >&2
//! # CHECKERR: oops
//! exit 3
//! # EXIT: 3
//! ```
//!
//! | Directive | Meaning |
//! |-----------|---------|
//! | `RUN` | Command template; `%s` is the script path, `%%` a literal `%` |
//! | `CHECK` / `CHECK-OUT` | A line expected on stdout, in order |
//! | `CHECKERR` / `CHECK-ERR` | A line expected on stderr, in order |
//! | `EXIT` | Acceptable exit status; repeat for any-of |
//! | `SIGNAL` | Expected terminating signal (`SIGKILL`, `INT`, `9`) |
//! | `REQUIRES` | Conditions; unmet means skip |
//! | `SKIP` | Skip unconditionally |
//!
//! Without a RUN directive the script runs through its `#!` interpreter, or
//! an interpreter chosen by file extension.
//!
//! # Errors versus failures
//!
//! A broken test file (unknown substitution, malformed directive, unreadable
//! file) is a [`CheckerError`] returned as `Err`. A program that misbehaves
//! produces [`TestFailure`]s inside an `Ok` [`Outcome`] with
//! [`Verdict::Fail`].

mod config;
mod conditions;
mod engine;
mod error;
mod matcher;
mod parser;
mod pattern;
mod process;
mod report;
mod state;
mod subst;

use std::path::{Path, PathBuf};

pub use config::{Config, MatchMode, DEFAULT_TIMEOUT};
pub use conditions::{default_conditions, BoxedCondition, Condition, ConditionEnv};
pub use engine::Checker;
pub use error::{CheckerError, ErrorKind, TestFailure};
pub use matcher::{match_stream, match_termination, reconcile};
pub use matcher::{Check, ExpectedTermination, Expectations, Stream};
pub use parser::{parse_line, parse_source, Directive, DirectiveKind};
pub use parser::{Invocation, InvocationSource, Script, SourceFile};
pub use pattern::{strip_ansi, LinePattern};
pub use process::{ExecutionResult, RunOutcome, Signal, Termination};
pub use report::{render_failures, Outcome, Verdict};
pub use subst::SubstitutionMap;

/// Check one file with the default conditions.
///
/// A relative `s` substitution is taken relative to the current directory,
/// even though the script runs in its own directory.
pub fn check_path(
    path: impl AsRef<Path>,
    subs: &SubstitutionMap,
    config: &Config,
) -> Result<Outcome, CheckerError> {
    Checker::new(config.clone()).check(path.as_ref(), subs)
}

/// Check files and integrate with `#[test]` by panicking on failure.
///
/// Each file gets [`SubstitutionMap::for_script`] and `LANG=C`. Set
/// `INLINECHECK_VERBOSE=1` to print the execution log of every file.
///
/// ```rust,ignore
/// #[test]
/// fn scripts() {
///     emx_inlinecheck::run_and_assert(["tests/files/hello.sh"]);
/// }
/// ```
pub fn run_and_assert<I, P>(paths: I)
where
    I: IntoIterator<Item = P>,
    P: Into<PathBuf>,
{
    let verbose = std::env::var("INLINECHECK_VERBOSE").is_ok();
    let checker = Checker::new(Config::default().env("LANG", "C"));
    let mut failed = 0;

    for path in paths {
        let path: PathBuf = path.into();
        let name = path.display().to_string();
        let subs = SubstitutionMap::for_script(&path);

        match checker.check(&path, &subs) {
            Ok(outcome) => {
                match outcome.verdict {
                    Verdict::Pass => eprintln!("PASS  {}", name),
                    Verdict::Skip => eprintln!("SKIP  {}: {}", name, outcome.skip_reason.as_deref().unwrap_or("")),
                    Verdict::Fail => {
                        failed += 1;
                        eprintln!("FAIL  {}", name);
                        for line in outcome.render_detail().lines() {
                            eprintln!("  {}", line);
                        }
                    }
                }
                if verbose && !outcome.log.is_empty() {
                    eprintln!("  --- log ---");
                    for line in outcome.log.lines() {
                        eprintln!("  {}", line);
                    }
                }
            }
            Err(e) => {
                failed += 1;
                eprintln!("ERROR {}", e);
            }
        }
    }

    if failed > 0 {
        panic!("{} file(s) failed", failed);
    }
}
