//! Checker errors and test failures
//!
//! Two classes are kept strictly apart:
//! - [`CheckerError`] means the test file or its configuration is broken.
//!   It aborts the whole check and is returned as `Err`.
//! - [`TestFailure`] means the program under test misbehaved. Failures are
//!   accumulated and returned with the outcome.

use std::fmt;

/// The kind of checker error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// The test file could not be read
    Io,
    /// A `%key` placeholder has no entry in the substitution map
    UnknownSubstitution,
    /// A directive payload could not be understood
    MalformedDirective,
    /// EXIT and SIGNAL were both declared
    ConflictingTermination,
    /// A CHECK pattern failed to compile
    InvalidPattern,
    /// No RUN directive, shebang, or known extension
    NoInvocation,
    /// The substituted command could not be tokenized
    MalformedCommand,
    /// A REQUIRES condition could not be evaluated
    Condition,
    /// The shell itself could not be started
    Spawn,
}

/// A fatal configuration-level error with file/line context
#[derive(Debug)]
pub struct CheckerError {
    pub kind: ErrorKind,
    pub message: String,
    pub file: Option<String>,
    pub line: Option<usize>,
}

impl CheckerError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            file: None,
            line: None,
        }
    }

    pub fn with_file(mut self, file: impl Into<String>) -> Self {
        self.file = Some(file.into());
        self
    }

    pub fn with_line(mut self, line: usize) -> Self {
        self.line = Some(line);
        self
    }

    pub fn with_location(self, file: impl Into<String>, line: usize) -> Self {
        self.with_file(file).with_line(line)
    }

    pub fn malformed(line: usize, msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::MalformedDirective, msg).with_line(line)
    }
}

impl fmt::Display for CheckerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ref file) = self.file {
            write!(f, "{}:", file)?;
        }
        if let Some(line) = self.line {
            write!(f, "{}:", line)?;
        }
        if self.file.is_some() || self.line.is_some() {
            write!(f, " ")?;
        }
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CheckerError {}

impl From<std::io::Error> for CheckerError {
    fn from(e: std::io::Error) -> Self {
        Self::new(ErrorKind::Io, e.to_string())
    }
}

/// An observed mismatch between the directives and the program's behavior
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestFailure {
    /// Single-line description
    pub message: String,
    /// Source line of the directive that failed, when there is one
    pub line: Option<usize>,
    /// Optional multi-line context (a diff), shown only in verbose output
    pub detail: Option<String>,
}

impl TestFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            line: None,
            detail: None,
        }
    }

    pub fn at(line: usize, message: impl Into<String>) -> Self {
        Self::new(message).with_line(line)
    }

    pub fn with_line(mut self, line: usize) -> Self {
        self.line = Some(line);
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

impl fmt::Display for TestFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.line {
            Some(line) => write!(f, "line {}: {}", line, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}
