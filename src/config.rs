//! Check configuration
//!
//! The named options a caller may set for a check. There is no
//! configuration file; callers build a [`Config`] directly or through the
//! CLI flags.

use std::time::Duration;

/// How CHECK payloads are compared with output lines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatchMode {
    /// Payload must equal the line
    Exact,
    /// `{{regex}}` segments inside otherwise literal text
    #[default]
    Wildcard,
}

/// Default bound on how long a checked script may run
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Options for a single check
#[derive(Debug, Clone)]
pub struct Config {
    /// Report non-blank output after the last matched line as a failure
    pub treat_extra_output_as_error: bool,
    /// Remove ANSI color sequences from captured output before comparing
    pub strip_color_codes: bool,
    /// Pattern syntax for CHECK/CHECKERR payloads
    pub match_mode: MatchMode,
    /// Trim leading/trailing whitespace on output lines and payloads
    pub normalize_whitespace: bool,
    /// Wall-clock bound on the child process
    pub timeout: Duration,
    /// Environment overrides for the child (applied over the inherited
    /// environment). Locale settings such as `LANG=C` belong here.
    pub env: Vec<(String, String)>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            treat_extra_output_as_error: false,
            strip_color_codes: true,
            match_mode: MatchMode::Wildcard,
            normalize_whitespace: true,
            timeout: DEFAULT_TIMEOUT,
            env: Vec::new(),
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extra_output_is_error(mut self, on: bool) -> Self {
        self.treat_extra_output_as_error = on;
        self
    }

    pub fn strip_color(mut self, on: bool) -> Self {
        self.strip_color_codes = on;
        self
    }

    pub fn match_mode(mut self, mode: MatchMode) -> Self {
        self.match_mode = mode;
        self
    }

    pub fn normalize_whitespace(mut self, on: bool) -> Self {
        self.normalize_whitespace = on;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set an environment variable for the child, replacing an earlier
    /// setting of the same key.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        let value = value.into();
        if let Some(entry) = self.env.iter_mut().find(|(k, _)| *k == key) {
            entry.1 = value;
        } else {
            self.env.push((key, value));
        }
        self
    }

    /// Look up an overridden environment variable, falling back to the
    /// inherited environment.
    pub fn getenv(&self, key: &str) -> Option<String> {
        self.env
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
            .or_else(|| std::env::var(key).ok())
    }
}
