//! Matcher
//!
//! Compiles directives into [`Expectations`] and reconciles them with an
//! [`ExecutionResult`]. Every independent mismatch becomes one
//! [`TestFailure`]; nothing stops at the first failure.
//!
//! Stream matching is a forward-only two-cursor scan. Each CHECK pattern
//! looks for a matching line at or after the cursor; lines in between are
//! skipped silently. A pattern with no match leaves the cursor where it was
//! so the following patterns still get their chance.

use crate::config::Config;
use crate::error::{CheckerError, ErrorKind, TestFailure};
use crate::parser::{Directive, DirectiveKind};
use crate::pattern::{normalize_line, LinePattern};
use crate::process::{ExecutionResult, Signal, Termination};

/// What termination the directives ask for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExpectedTermination {
    /// No EXIT or SIGNAL: exit status 0
    Default,
    /// Any of these exit codes; `line` is the first EXIT directive
    Exit { codes: Vec<i32>, line: usize },
    /// Killed by this signal
    Signal { signal: Signal, line: usize },
}

/// One CHECK or CHECKERR line
#[derive(Debug, Clone)]
pub struct Check {
    pub line: usize,
    pub pattern: LinePattern,
}

/// Which captured stream a pattern list applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
}

impl Stream {
    pub fn label(&self) -> &'static str {
        match self {
            Stream::Stdout => "stdout",
            Stream::Stderr => "stderr",
        }
    }
}

/// Compiled expectations for one script
#[derive(Debug, Clone)]
pub struct Expectations {
    pub termination: ExpectedTermination,
    pub stdout: Vec<Check>,
    pub stderr: Vec<Check>,
}

impl Expectations {
    /// Validate and compile directive payloads.
    ///
    /// RUN, REQUIRES and SKIP are handled before this point and ignored here.
    pub fn compile(directives: &[Directive], config: &Config) -> Result<Self, CheckerError> {
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut exit_codes: Vec<i32> = Vec::new();
        let mut exit_line: Option<usize> = None;
        let mut signal: Option<(Signal, usize)> = None;

        for d in directives {
            match &d.kind {
                DirectiveKind::Run(_) | DirectiveKind::Requires(_) | DirectiveKind::Skip(_) => {}
                DirectiveKind::CheckOut(payload) => stdout.push(compile_check(d, payload, config)?),
                DirectiveKind::CheckErr(payload) => stderr.push(compile_check(d, payload, config)?),
                DirectiveKind::Exit(payload) => {
                    for code in parse_exit_codes(d.line, payload)? {
                        if !exit_codes.contains(&code) {
                            exit_codes.push(code);
                        }
                    }
                    if exit_line.is_none() {
                        exit_line = Some(d.line);
                    }
                }
                DirectiveKind::Signal(payload) => {
                    if let Some((_, first)) = signal {
                        return Err(CheckerError::malformed(d.line,
                            format!("multiple {} directives (first on line {})", d.kind.keyword(), first)));
                    }
                    let sig = Signal::parse(payload).ok_or_else(|| {
                        CheckerError::malformed(d.line, format!("unknown signal: {:?}", payload.trim()))
                    })?;
                    signal = Some((sig, d.line));
                }
            }
        }

        let termination = match (exit_line, signal) {
            (Some(exit), Some((_, sig))) => {
                return Err(CheckerError::new(ErrorKind::ConflictingTermination,
                    format!("EXIT (line {}) and SIGNAL (line {}) cannot both be declared", exit, sig))
                    .with_line(exit.max(sig)));
            }
            (Some(line), None) => ExpectedTermination::Exit { codes: exit_codes, line },
            (None, Some((signal, line))) => ExpectedTermination::Signal { signal, line },
            (None, None) => ExpectedTermination::Default,
        };

        Ok(Self { termination, stdout, stderr })
    }

    pub fn checks(&self, stream: Stream) -> &[Check] {
        match stream {
            Stream::Stdout => &self.stdout,
            Stream::Stderr => &self.stderr,
        }
    }
}

fn compile_check(d: &Directive, payload: &str, config: &Config) -> Result<Check, CheckerError> {
    let pattern = LinePattern::compile(payload, config.match_mode, config.normalize_whitespace)
        .map_err(|e| {
            CheckerError::new(ErrorKind::InvalidPattern, format!("{}: {}", d.kind.keyword(), e))
                .with_line(d.line)
        })?;
    Ok(Check { line: d.line, pattern })
}

/// Exit codes from an EXIT payload; several may be separated by spaces or commas.
fn parse_exit_codes(line: usize, payload: &str) -> Result<Vec<i32>, CheckerError> {
    let words: Vec<&str> = payload
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|w| !w.is_empty())
        .collect();
    if words.is_empty() {
        return Err(CheckerError::malformed(line, "EXIT directive needs an exit code"));
    }
    words
        .iter()
        .map(|w| match w.parse::<i32>() {
            Ok(code) if (0..=255).contains(&code) => Ok(code),
            _ => Err(CheckerError::malformed(line, format!("invalid exit code: {:?}", w))),
        })
        .collect()
}

fn describe_codes(codes: &[i32]) -> String {
    match codes {
        [single] => single.to_string(),
        _ => {
            let list: Vec<String> = codes.iter().map(|c| c.to_string()).collect();
            format!("one of {}", list.join(", "))
        }
    }
}

/// Compare the actual termination with the expected one.
pub fn match_termination(expected: &ExpectedTermination, actual: Termination) -> Option<TestFailure> {
    match expected {
        ExpectedTermination::Default => match actual {
            Termination::Exited(0) => None,
            Termination::Exited(code) => Some(TestFailure::new(
                format!("exit status: expected 0, got {}", code))),
            Termination::Signaled(sig) => Some(TestFailure::new(
                format!("exit status: expected 0, but process was killed by signal {}", sig))),
        },
        ExpectedTermination::Exit { codes, line } => match actual {
            Termination::Exited(code) if codes.contains(&code) => None,
            Termination::Exited(code) => Some(TestFailure::at(*line,
                format!("exit status: expected {}, got {}", describe_codes(codes), code))),
            Termination::Signaled(sig) => Some(TestFailure::at(*line,
                format!("exit status: expected {}, but process was killed by signal {}",
                    describe_codes(codes), sig))),
        },
        ExpectedTermination::Signal { signal, line } => match actual {
            Termination::Signaled(sig) if sig == *signal => None,
            Termination::Signaled(sig) => Some(TestFailure::at(*line,
                format!("expected termination by signal {}, got signal {}", signal, sig))),
            Termination::Exited(code) => Some(TestFailure::at(*line,
                format!("expected termination by signal {}, but process exited with status {}",
                    signal, code))),
        },
    }
}

/// Result of matching one stream
#[derive(Debug, Default)]
pub struct StreamMatch {
    /// One failure per pattern that found no line, in pattern order
    pub missing: Vec<TestFailure>,
    /// Non-blank output after the last matched line, when that counts
    pub extra: Option<TestFailure>,
}

/// Match one captured stream against its pattern list.
pub fn match_stream(stream: Stream, checks: &[Check], captured: &str, config: &Config) -> StreamMatch {
    let lines: Vec<String> = captured
        .lines()
        .map(|l| normalize_line(l, config.strip_color_codes, config.normalize_whitespace))
        .collect();

    let label = stream.label();
    let mut result = StreamMatch::default();
    let mut cursor = 0;

    for check in checks {
        match (cursor..lines.len()).find(|&j| check.pattern.is_match(&lines[j])) {
            Some(j) => cursor = j + 1,
            None => result.missing.push(TestFailure::at(check.line,
                format!("{}: missing output matching {:?}", label, check.pattern.text))),
        }
    }

    if config.treat_extra_output_as_error {
        let leftover: Vec<&String> = lines[cursor..]
            .iter()
            .filter(|l| !l.trim().is_empty())
            .collect();
        if let Some(first) = leftover.first() {
            let mut msg = format!("{}: unexpected extra output {:?}", label, first);
            if leftover.len() > 1 {
                msg.push_str(&format!(" (and {} more line{})",
                    leftover.len() - 1,
                    if leftover.len() == 2 { "" } else { "s" }));
            }
            result.extra = Some(TestFailure::new(msg));
        }
    }

    if !result.missing.is_empty() || result.extra.is_some() {
        let detail = crate::report::stream_diff(stream, checks, &lines);
        match result.missing.first_mut() {
            Some(first) => first.detail = Some(detail),
            None => {
                if let Some(extra) = result.extra.as_mut() {
                    extra.detail = Some(detail);
                }
            }
        }
    }

    result
}

/// Reconcile expectations with a finished run.
///
/// Failures come out in a fixed order: termination, missing stdout, missing
/// stderr, extra stdout, extra stderr.
pub fn reconcile(expected: &Expectations, result: &ExecutionResult, config: &Config) -> Vec<TestFailure> {
    let mut failures = Vec::new();

    if let Some(f) = match_termination(&expected.termination, result.termination) {
        failures.push(f);
    }

    let out = match_stream(Stream::Stdout, expected.checks(Stream::Stdout), &result.stdout, config);
    let err = match_stream(Stream::Stderr, expected.checks(Stream::Stderr), &result.stderr, config);

    failures.extend(out.missing);
    failures.extend(err.missing);
    failures.extend(out.extra);
    failures.extend(err.extra);
    failures
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MatchMode;
    use crate::parser::{parse_source, SourceFile};

    fn expectations(text: &str, config: &Config) -> Result<Expectations, CheckerError> {
        let script = parse_source(&SourceFile::from_text("t.sh", text));
        Expectations::compile(&script.directives, config)
    }

    fn exited(stdout: &str, stderr: &str, code: i32) -> ExecutionResult {
        ExecutionResult {
            stdout: stdout.into(),
            stderr: stderr.into(),
            termination: Termination::Exited(code),
        }
    }

    fn messages(failures: &[TestFailure]) -> Vec<String> {
        failures.iter().map(|f| f.to_string()).collect()
    }

    #[test]
    fn test_ok_in_order() {
        let config = Config::default();
        let exp = expectations("# CHECK: a\n# CHECK: b\n", &config).unwrap();
        assert!(reconcile(&exp, &exited("a\nb\n", "", 0), &config).is_empty());
    }

    #[test]
    fn test_intervening_lines_skipped() {
        let config = Config::default();
        let exp = expectations("# CHECK: a\n# CHECK: c\n", &config).unwrap();
        assert!(reconcile(&exp, &exited("a\nb\nc\n", "", 0), &config).is_empty());
    }

    #[test]
    fn test_out_of_order_fails() {
        let config = Config::default();
        let exp = expectations("# CHECK: b\n# CHECK: a\n", &config).unwrap();
        let failures = reconcile(&exp, &exited("a\nb\n", "", 0), &config);
        assert_eq!(messages(&failures), vec![r#"line 2: stdout: missing output matching "a""#]);
    }

    #[test]
    fn test_missing_in_middle_keeps_cursor() {
        let config = Config::default();
        let exp = expectations("# CHECK: a\n# CHECK: nope\n# CHECK: b\n", &config).unwrap();
        let failures = reconcile(&exp, &exited("a\nb\n", "", 0), &config);
        assert_eq!(messages(&failures), vec![r#"line 2: stdout: missing output matching "nope""#]);
    }

    #[test]
    fn test_multiple_error_lines_match_one_to_one() {
        let config = Config::default();
        let exp = expectations("# CHECKERR: error\n# CHECKERR: error\n# CHECKERR: error\n", &config).unwrap();
        let failures = reconcile(&exp, &exited("", "error\nerror\n", 0), &config);
        assert_eq!(messages(&failures), vec![r#"line 3: stderr: missing output matching "error""#]);
    }

    #[test]
    fn test_out_vs_err_independent() {
        let config = Config::default();
        let exp = expectations("# CHECK: to-out\n# CHECKERR: to-err\n", &config).unwrap();
        let failures = reconcile(&exp, &exited("to-err\n", "to-out\n", 0), &config);
        assert_eq!(messages(&failures), vec![
            r#"line 1: stdout: missing output matching "to-out""#,
            r#"line 2: stderr: missing output matching "to-err""#,
        ]);
    }

    #[test]
    fn test_extra_output_tolerated_by_default() {
        let config = Config::default();
        let exp = expectations("# CHECK: a\n", &config).unwrap();
        assert!(reconcile(&exp, &exited("a\nextra\n", "noise\n", 0), &config).is_empty());
    }

    #[test]
    fn test_extra_output_as_error() {
        let config = Config::default().extra_output_is_error(true);
        let exp = expectations("# CHECK: a\n", &config).unwrap();
        let failures = reconcile(&exp, &exited("a\nextra\n\nmore\n", "noise\n", 0), &config);
        assert_eq!(messages(&failures), vec![
            r#"stdout: unexpected extra output "extra" (and 1 more line)"#,
            r#"stderr: unexpected extra output "noise""#,
        ]);
    }

    #[test]
    fn test_extra_output_ignores_blank_lines() {
        let config = Config::default().extra_output_is_error(true);
        let exp = expectations("# CHECK: a\n", &config).unwrap();
        assert!(reconcile(&exp, &exited("a\n\n   \n", "", 0), &config).is_empty());
    }

    #[test]
    fn test_skipped_lines_before_match_are_not_extra() {
        let config = Config::default().extra_output_is_error(true);
        let exp = expectations("# CHECK: b\n", &config).unwrap();
        assert!(reconcile(&exp, &exited("a\nb\n", "", 0), &config).is_empty());
    }

    #[test]
    fn test_whitespace_normalization() {
        let config = Config::default();
        let exp = expectations("# CHECK: a  b\n", &config).unwrap();
        assert!(reconcile(&exp, &exited("   a  b   \n", "", 0), &config).is_empty());

        let strict = Config::default().normalize_whitespace(false);
        let exp = expectations("# CHECK: a  b\n", &strict).unwrap();
        assert_eq!(reconcile(&exp, &exited("   a  b   \n", "", 0), &strict).len(), 1);
    }

    #[test]
    fn test_color_stripping() {
        let config = Config::default();
        let exp = expectations("# CHECK: red\n", &config).unwrap();
        assert!(reconcile(&exp, &exited("\x1b[31mred\x1b[0m\n", "", 0), &config).is_empty());

        let raw = Config::default().strip_color(false);
        let exp = expectations("# CHECK: red\n", &raw).unwrap();
        assert_eq!(reconcile(&exp, &exited("\x1b[31mred\x1b[0m\n", "", 0), &raw).len(), 1);
    }

    #[test]
    fn test_wildcard_vs_exact() {
        let config = Config::default();
        let exp = expectations("# CHECK: pid {{\\d+}}\n", &config).unwrap();
        assert!(reconcile(&exp, &exited("pid 1234\n", "", 0), &config).is_empty());

        let exact = Config::default().match_mode(MatchMode::Exact);
        let exp = expectations("# CHECK: pid {{\\d+}}\n", &exact).unwrap();
        assert_eq!(reconcile(&exp, &exited("pid 1234\n", "", 0), &exact).len(), 1);
    }

    #[test]
    fn test_invalid_pattern_is_checker_error() {
        let err = expectations("\n# CHECK: {{(}}\n", &Config::default()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidPattern);
        assert_eq!(err.line, Some(2));

        let err = expectations("# CHECK-ERR: {{[}}\n", &Config::default()).unwrap_err();
        assert!(err.message.starts_with("CHECKERR: "), "{}", err.message);
    }

    #[test]
    fn test_checks_per_stream() {
        let exp = expectations("# CHECK: a\n# CHECKERR: b\n# CHECK-OUT: c\n", &Config::default()).unwrap();
        let lines: Vec<usize> = exp.checks(Stream::Stdout).iter().map(|c| c.line).collect();
        assert_eq!(lines, vec![1, 3]);
        assert_eq!(exp.checks(Stream::Stderr)[0].pattern.text, "b");
    }

    #[test]
    fn test_default_termination() {
        let exp = ExpectedTermination::Default;
        assert!(match_termination(&exp, Termination::Exited(0)).is_none());
        assert_eq!(match_termination(&exp, Termination::Exited(1)).unwrap().message,
            "exit status: expected 0, got 1");
        assert_eq!(match_termination(&exp, Termination::Signaled(Signal(libc::SIGKILL))).unwrap().message,
            "exit status: expected 0, but process was killed by signal SIGKILL");
    }

    #[test]
    fn test_exit_42() {
        let exp = expectations("# EXIT: 42\n", &Config::default()).unwrap();
        assert!(match_termination(&exp.termination, Termination::Exited(42)).is_none());
        let f = match_termination(&exp.termination, Termination::Exited(0)).unwrap();
        assert_eq!(f.to_string(), "line 1: exit status: expected 42, got 0");
    }

    #[test]
    fn test_exit_multiple_expected() {
        let exp = expectations("# EXIT: 1\n# EXIT: 2\n# EXIT: 3\n", &Config::default()).unwrap();
        assert!(match_termination(&exp.termination, Termination::Exited(2)).is_none());
        let f = match_termination(&exp.termination, Termination::Exited(0)).unwrap();
        assert_eq!(f.message, "exit status: expected one of 1, 2, 3, got 0");
    }

    #[test]
    fn test_exit_list_payload() {
        let exp = expectations("# EXIT: 1, 2 2\n", &Config::default()).unwrap();
        assert_eq!(exp.termination, ExpectedTermination::Exit { codes: vec![1, 2], line: 1 });
    }

    #[test]
    fn test_exit_but_signaled() {
        let exp = expectations("# EXIT: 42\n", &Config::default()).unwrap();
        let f = match_termination(&exp.termination, Termination::Signaled(Signal(libc::SIGTERM))).unwrap();
        assert_eq!(f.message, "exit status: expected 42, but process was killed by signal SIGTERM");
    }

    #[test]
    fn test_signal_expected() {
        let exp = expectations("# SIGNAL: SIGKILL\n", &Config::default()).unwrap();
        let kill = Signal(libc::SIGKILL);
        assert!(match_termination(&exp.termination, Termination::Signaled(kill)).is_none());
        assert_eq!(match_termination(&exp.termination, Termination::Exited(0)).unwrap().message,
            "expected termination by signal SIGKILL, but process exited with status 0");
        assert_eq!(match_termination(&exp.termination, Termination::Signaled(Signal(libc::SIGINT))).unwrap().message,
            "expected termination by signal SIGKILL, got signal SIGINT");
    }

    #[test]
    fn test_exit_and_signal_conflict() {
        let err = expectations("# EXIT: 1\n# SIGNAL: INT\n", &Config::default()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ConflictingTermination);
        assert_eq!(err.line, Some(2));
    }

    #[test]
    fn test_malformed_termination_directives() {
        let config = Config::default();
        assert_eq!(expectations("# EXIT: abc\n", &config).unwrap_err().kind, ErrorKind::MalformedDirective);
        assert_eq!(expectations("# EXIT:\n", &config).unwrap_err().kind, ErrorKind::MalformedDirective);
        assert_eq!(expectations("# EXIT: 300\n", &config).unwrap_err().kind, ErrorKind::MalformedDirective);
        assert_eq!(expectations("# SIGNAL: SIGNOPE\n", &config).unwrap_err().kind, ErrorKind::MalformedDirective);
        let err = expectations("# SIGNAL: INT\n# SIGNAL: TERM\n", &config).unwrap_err();
        assert_eq!(err.kind, ErrorKind::MalformedDirective);
        assert!(err.message.contains("multiple SIGNAL directives (first on line 1)"), "{}", err.message);
    }

    #[test]
    fn test_failure_order() {
        let config = Config::default().extra_output_is_error(true);
        let exp = expectations("# CHECK: x\n# CHECKERR: y\n# EXIT: 2\n", &config).unwrap();
        let failures = reconcile(&exp, &exited("junk\n", "junk\n", 1), &config);
        assert_eq!(messages(&failures), vec![
            "line 3: exit status: expected 2, got 1".to_string(),
            r#"line 1: stdout: missing output matching "x""#.to_string(),
            r#"line 2: stderr: missing output matching "y""#.to_string(),
            r#"stdout: unexpected extra output "junk""#.to_string(),
            r#"stderr: unexpected extra output "junk""#.to_string(),
        ]);
    }

    #[test]
    fn test_missing_failure_carries_diff_detail() {
        let config = Config::default();
        let exp = expectations("# CHECK: want\n", &config).unwrap();
        let failures = reconcile(&exp, &exited("got\n", "", 0), &config);
        let detail = failures[0].detail.as_deref().unwrap();
        assert!(detail.contains("-want"));
        assert!(detail.contains("+got"));
    }
}
