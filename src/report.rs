//! Result reporting
//!
//! Turns the accumulated failures (or a skip decision) into a [`Verdict`]
//! and renders them. Rendering never reorders failures.

use std::fmt;
use similar::TextDiff;
use crate::error::TestFailure;
use crate::matcher::{Check, Stream};

/// Three-valued outcome of a check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Pass,
    Fail,
    Skip,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Verdict::Pass => "PASS",
            Verdict::Fail => "FAIL",
            Verdict::Skip => "SKIP",
        };
        f.write_str(s)
    }
}

/// Everything a check returns
#[derive(Debug, Clone)]
pub struct Outcome {
    pub verdict: Verdict,
    /// Failures in detection order; empty unless the verdict is `Fail`
    pub failures: Vec<TestFailure>,
    /// Why the check was skipped
    pub skip_reason: Option<String>,
    /// Execution log
    pub log: String,
}

impl Outcome {
    pub fn skipped(reason: impl Into<String>, log: String) -> Self {
        Self {
            verdict: Verdict::Skip,
            failures: Vec::new(),
            skip_reason: Some(reason.into()),
            log,
        }
    }

    /// Pass iff there are no failures
    pub fn from_failures(failures: Vec<TestFailure>, log: String) -> Self {
        let verdict = if failures.is_empty() { Verdict::Pass } else { Verdict::Fail };
        Self {
            verdict,
            failures,
            skip_reason: None,
            log,
        }
    }

    pub fn is_pass(&self) -> bool {
        self.verdict == Verdict::Pass
    }

    pub fn is_skip(&self) -> bool {
        self.verdict == Verdict::Skip
    }

    /// One line per failure, in detection order
    pub fn render(&self) -> Vec<String> {
        render_failures(&self.failures)
    }

    /// Failures with their diff detail, for verbose output
    pub fn render_detail(&self) -> String {
        let mut out = String::new();
        for f in &self.failures {
            out.push_str(&f.to_string());
            out.push('\n');
            if let Some(ref detail) = f.detail {
                for line in detail.lines() {
                    out.push_str("    ");
                    out.push_str(line);
                    out.push('\n');
                }
            }
        }
        out
    }
}

/// Render failures as single-line messages.
pub fn render_failures(failures: &[TestFailure]) -> Vec<String> {
    failures.iter().map(|f| f.to_string()).collect()
}

/// Unified diff between the declared patterns and the normalized output.
pub fn stream_diff(stream: Stream, checks: &[Check], lines: &[String]) -> String {
    let expected: String = checks.iter().map(|c| format!("{}\n", c.pattern.text)).collect();
    let actual: String = lines.iter().map(|l| format!("{}\n", l)).collect();
    let old_header = format!("expected {}", stream.label());
    let new_header = format!("actual {}", stream.label());
    TextDiff::from_lines(&expected, &actual)
        .unified_diff()
        .header(&old_header, &new_header)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MatchMode;
    use crate::pattern::LinePattern;

    #[test]
    fn test_verdict_from_failures() {
        assert_eq!(Outcome::from_failures(vec![], String::new()).verdict, Verdict::Pass);
        let out = Outcome::from_failures(vec![TestFailure::new("x")], String::new());
        assert_eq!(out.verdict, Verdict::Fail);
        assert!(!out.is_pass());
    }

    #[test]
    fn test_skip_is_distinct() {
        let out = Outcome::skipped("requires fish", String::new());
        assert!(out.is_skip());
        assert!(!out.is_pass());
        assert!(out.failures.is_empty());
    }

    #[test]
    fn test_render_preserves_order() {
        let out = Outcome::from_failures(vec![
            TestFailure::at(9, "second in file, first detected"),
            TestFailure::new("no line"),
            TestFailure::at(2, "third"),
        ], String::new());
        assert_eq!(out.render(), vec![
            "line 9: second in file, first detected",
            "no line",
            "line 2: third",
        ]);
    }

    #[test]
    fn test_render_detail_indents_diff() {
        let out = Outcome::from_failures(
            vec![TestFailure::at(1, "missing").with_detail("-a\n+b")],
            String::new(),
        );
        assert_eq!(out.render_detail(), "line 1: missing\n    -a\n    +b\n");
    }

    #[test]
    fn test_stream_diff() {
        let checks = vec![Check {
            line: 1,
            pattern: LinePattern::compile("hello", MatchMode::Exact, true).unwrap(),
        }];
        let diff = stream_diff(Stream::Stdout, &checks, &["goodbye".to_string()]);
        assert!(diff.contains("--- expected stdout"));
        assert!(diff.contains("+++ actual stdout"));
        assert!(diff.contains("-hello"));
        assert!(diff.contains("+goodbye"));
    }

    #[test]
    fn test_verdict_display() {
        assert_eq!(Verdict::Skip.to_string(), "SKIP");
    }
}
