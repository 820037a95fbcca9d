//! Check engine
//!
//! The [`Checker`] holds the condition registry and configuration. It is
//! stateless between calls; one checker can check many files, from many
//! threads if the caller likes.

use std::collections::HashMap;
use std::path::Path;
use crate::conditions::{BoxedCondition, ConditionEnv, Requirement};
use crate::config::Config;
use crate::error::{CheckerError, ErrorKind};
use crate::matcher::{reconcile, Expectations};
use crate::parser::{parse_source, DirectiveKind, SourceFile};
use crate::process::{self, RunOutcome};
use crate::report::Outcome;
use crate::state::CheckState;
use crate::subst::SubstitutionMap;

/// Runs scripts and checks them against their directives
pub struct Checker {
    /// Registered REQUIRES conditions
    pub conditions: HashMap<String, BoxedCondition>,
    pub config: Config,
}

impl Checker {
    /// Create a checker with the default conditions
    pub fn new(config: Config) -> Self {
        Self {
            conditions: crate::conditions::default_conditions(),
            config,
        }
    }

    /// Register a custom condition
    pub fn register_condition(&mut self, name: impl Into<String>, cond: BoxedCondition) {
        self.conditions.insert(name.into(), cond);
    }

    /// Check one file.
    ///
    /// Returns `Err` only when the test itself is broken; a misbehaving
    /// program yields `Ok` with a `Fail` verdict.
    pub fn check(&self, path: &Path, subs: &SubstitutionMap) -> Result<Outcome, CheckerError> {
        let filename = path.display().to_string();
        let source = SourceFile::read(path)?;
        self.check_source(&source, subs)
            .map_err(|e| if e.file.is_none() { e.with_file(filename) } else { e })
    }

    /// Check already-read source text. The file is still run from disk at
    /// `source.path`.
    pub fn check_source(&self, source: &SourceFile, subs: &SubstitutionMap) -> Result<Outcome, CheckerError> {
        let mut state = CheckState::new(&source.path);
        state.logf(&format!("# {}", state.path.display()));
        let script = parse_source(source);

        if let Some(skip) = script.skip() {
            let reason = match skip.kind.payload().trim() {
                "" => format!("SKIP directive on line {}", skip.line),
                why => why.to_string(),
            };
            state.logf(&format!("[skip: {}]", reason));
            return Ok(Outcome::skipped(reason, state.log));
        }

        for directive in script.requires() {
            let DirectiveKind::Requires(ref payload) = directive.kind else {
                continue;
            };
            let requirements = crate::conditions::parse_requirements(payload);
            if requirements.is_empty() {
                return Err(CheckerError::malformed(directive.line, "empty REQUIRES directive"));
            }
            for req in &requirements {
                let met = self
                    .eval_requirement(&state, req)
                    .map_err(|e| e.with_line(directive.line))?;
                if !met {
                    let reason = format!("requires {}{}", if req.negate { "!" } else { "" }, req.tag);
                    state.logf(&format!("[skip: {}]", reason));
                    return Ok(Outcome::skipped(reason, state.log));
                }
            }
        }

        let expectations = Expectations::compile(&script.directives, &self.config)?;

        let invocation = script.invocation(&source.path)?;
        let rebased;
        let subs = match subs.get("s").map(Path::new) {
            // The child runs in the script's directory, so a relative script
            // path is resolved against ours first.
            Some(script_path) if script_path.is_relative() => {
                let cwd = std::env::current_dir()?;
                let absolute = cwd.join(script_path).display().to_string();
                state.logf(&format!("[%s -> {}]", absolute));
                rebased = subs.clone().with("s", absolute);
                &rebased
            }
            _ => subs,
        };
        let command = subs.apply(&invocation.template).map_err(|e| match invocation.source {
            crate::parser::InvocationSource::Run(line) => e.with_line(line),
            _ => e,
        })?;

        let failures = match process::run(&command, &mut state, &self.config)? {
            RunOutcome::Finished(result) => reconcile(&expectations, &result, &self.config),
            RunOutcome::Failed(failure) => vec![failure],
        };

        for f in &failures {
            state.logf(&format!("FAIL: {}", f));
        }

        Ok(Outcome::from_failures(failures, state.log))
    }

    /// Evaluate one REQUIRES tag.
    ///
    /// The tag may be "name" or "name:suffix". A bare name that is not a
    /// registered condition means "this program is on the PATH".
    fn eval_requirement(&self, state: &CheckState, req: &Requirement) -> Result<bool, CheckerError> {
        let env = ConditionEnv {
            config: &self.config,
            workdir: &state.workdir,
        };

        let result = match req.tag.split_once(':') {
            Some((prefix, suffix)) => {
                let c = self.conditions.get(prefix).ok_or_else(|| {
                    let mut known: Vec<&str> = self.conditions.keys().map(|s| s.as_str()).collect();
                    known.sort();
                    CheckerError::new(ErrorKind::Condition,
                        format!("unknown condition prefix {:?}; known: {:?}", prefix, known))
                })?;
                if !c.is_prefix() {
                    return Err(CheckerError::new(ErrorKind::Condition,
                        format!("condition {:?} cannot be used with a suffix", prefix)));
                }
                c.eval(&env, suffix)?
            }
            None => match self.conditions.get(req.tag.as_str()) {
                Some(c) if c.is_prefix() => {
                    return Err(CheckerError::new(ErrorKind::Condition,
                        format!("condition {:?} requires a suffix", req.tag)));
                }
                Some(c) => c.eval(&env, "")?,
                None => process::look_path(&req.tag, &self.config, &state.workdir).is_ok(),
            },
        };

        Ok(if req.negate { !result } else { result })
    }
}

impl Default for Checker {
    fn default() -> Self {
        Self::new(Config::default())
    }
}
