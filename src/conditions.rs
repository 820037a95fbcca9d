//! REQUIRES conditions
//!
//! A REQUIRES payload is a list of whitespace-separated condition tags.
//! Each tag is `name`, `name:suffix` for prefix conditions, or either form
//! with a leading `!` to negate it. A bare name that is not a registered
//! condition is taken to be a program that must be on the PATH, so
//! `# REQUIRES: python3` reads naturally.
//!
//! Evaluation is cheap and has no side effects: nothing is spawned.

use std::collections::HashMap;
use std::path::Path;
use crate::config::Config;
use crate::error::{CheckerError, ErrorKind};

/// What a condition may look at while being evaluated
pub struct ConditionEnv<'a> {
    pub config: &'a Config,
    /// Directory the script will run in
    pub workdir: &'a Path,
}

/// A condition that can be evaluated
pub trait Condition: Send + Sync {
    /// Evaluate the condition.
    /// `suffix` is for prefix conditions like `exec:python3` (suffix = "python3").
    /// For non-prefix conditions, suffix is "".
    fn eval(&self, env: &ConditionEnv<'_>, suffix: &str) -> Result<bool, CheckerError>;

    /// Brief description
    fn summary(&self) -> &str;

    /// Whether this is a prefix condition requiring a `:suffix`.
    fn is_prefix(&self) -> bool;
}

/// Boxed condition
pub type BoxedCondition = Box<dyn Condition>;

/// Platform tags a script can require, with their value on this build
const PLATFORMS: &[(&str, &str, bool)] = &[
    ("unix", "true on Unix-like systems", cfg!(unix)),
    ("linux", "true on Linux", cfg!(target_os = "linux")),
    ("windows", "true on Windows", cfg!(windows)),
];

/// The built-in registry: platform tags plus `exec:` and `env:`.
pub fn default_conditions() -> HashMap<String, BoxedCondition> {
    let mut conds: HashMap<String, BoxedCondition> = PLATFORMS
        .iter()
        .map(|&(name, summary, value)| {
            let cond: BoxedCondition = Box::new(PlatformCondition { summary, value });
            (name.to_string(), cond)
        })
        .collect();
    conds.insert("exec".into(), Box::new(ExecCondition));
    conds.insert("env".into(), Box::new(EnvCondition));
    conds
}

/// A platform tag, fixed at compile time
struct PlatformCondition {
    summary: &'static str,
    value: bool,
}

impl Condition for PlatformCondition {
    fn eval(&self, _env: &ConditionEnv<'_>, suffix: &str) -> Result<bool, CheckerError> {
        if !suffix.is_empty() {
            return Err(CheckerError::new(ErrorKind::Condition,
                format!("platform tags take no suffix, got :{}", suffix)));
        }
        Ok(self.value)
    }
    fn summary(&self) -> &str {
        self.summary
    }
    fn is_prefix(&self) -> bool {
        false
    }
}

/// Condition that checks if an executable is on the PATH (prefix condition)
struct ExecCondition;

impl Condition for ExecCondition {
    fn eval(&self, env: &ConditionEnv<'_>, suffix: &str) -> Result<bool, CheckerError> {
        if suffix.is_empty() {
            return Err(CheckerError::new(ErrorKind::Condition,
                "exec condition requires :program suffix"));
        }
        Ok(crate::process::look_path(suffix, env.config, env.workdir).is_ok())
    }

    fn summary(&self) -> &str {
        "true if program is on the PATH"
    }

    fn is_prefix(&self) -> bool {
        true
    }
}

/// Condition that checks if an environment variable is set and non-empty
struct EnvCondition;

impl Condition for EnvCondition {
    fn eval(&self, env: &ConditionEnv<'_>, suffix: &str) -> Result<bool, CheckerError> {
        if suffix.is_empty() {
            return Err(CheckerError::new(ErrorKind::Condition,
                "env condition requires :VAR suffix"));
        }
        Ok(env.config.getenv(suffix).map_or(false, |v| !v.is_empty()))
    }

    fn summary(&self) -> &str {
        "true if the environment variable is set and non-empty"
    }

    fn is_prefix(&self) -> bool {
        true
    }
}

/// A single parsed condition tag
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    /// The full tag without `!` (e.g. "unix", "exec:git")
    pub tag: String,
    pub negate: bool,
}

/// Split a REQUIRES payload into tags.
pub fn parse_requirements(payload: &str) -> Vec<Requirement> {
    payload
        .split_whitespace()
        .map(|word| match word.strip_prefix('!') {
            Some(rest) => Requirement { tag: rest.to_string(), negate: true },
            None => Requirement { tag: word.to_string(), negate: false },
        })
        .collect()
}
