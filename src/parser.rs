//! Directive parser
//!
//! Scans a script's text for comment-embedded directives:
//! - `# RUN: <command template>`: how to invoke the script
//! - `# CHECK: <pattern>` / `# CHECK-OUT:`: expected stdout line
//! - `# CHECKERR: <pattern>` / `# CHECK-ERR:`: expected stderr line
//! - `# EXIT: <code>`: acceptable exit status (repeatable, any-of)
//! - `# SIGNAL: <name>`: expected terminating signal
//! - `# REQUIRES: <condition>...`: precondition, unmet means skip
//! - `# SKIP` / `# SKIP: <reason>`: skip unconditionally
//!
//! The `#` may start the line (after indentation) or follow code and
//! whitespace on the same line, so `echo hi # CHECK: hi` is a directive.
//! One space after the `:` is dropped; the rest of the line is the payload.
//!
//! Parsing is pure text analysis: nothing is executed and nothing fails.
//! Payload validation happens when the matcher compiles expectations, so a
//! SKIP directive wins even over malformed directives elsewhere.

use std::path::{Path, PathBuf};
use crate::error::{CheckerError, ErrorKind};

/// A script read from disk. Immutable once read.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub path: PathBuf,
    pub text: String,
}

impl SourceFile {
    pub fn read(path: &Path) -> Result<Self, CheckerError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            CheckerError::new(ErrorKind::Io, format!("failed to read file: {}", e))
                .with_file(path.display().to_string())
        })?;
        Ok(Self::from_text(path, text))
    }

    pub fn from_text(path: impl Into<PathBuf>, text: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            text: text.into(),
        }
    }

    /// Physical lines, without terminators
    pub fn lines(&self) -> std::str::Lines<'_> {
        self.text.lines()
    }
}

/// A directive and its payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectiveKind {
    Run(String),
    CheckOut(String),
    CheckErr(String),
    Requires(String),
    Skip(String),
    Exit(String),
    Signal(String),
}

impl DirectiveKind {
    /// Canonical keyword, for messages
    pub fn keyword(&self) -> &'static str {
        match self {
            DirectiveKind::Run(_) => "RUN",
            DirectiveKind::CheckOut(_) => "CHECK",
            DirectiveKind::CheckErr(_) => "CHECKERR",
            DirectiveKind::Requires(_) => "REQUIRES",
            DirectiveKind::Skip(_) => "SKIP",
            DirectiveKind::Exit(_) => "EXIT",
            DirectiveKind::Signal(_) => "SIGNAL",
        }
    }

    pub fn payload(&self) -> &str {
        match self {
            DirectiveKind::Run(p)
            | DirectiveKind::CheckOut(p)
            | DirectiveKind::CheckErr(p)
            | DirectiveKind::Requires(p)
            | DirectiveKind::Skip(p)
            | DirectiveKind::Exit(p)
            | DirectiveKind::Signal(p) => p,
        }
    }
}

/// A parsed directive with its 1-based source line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directive {
    pub line: usize,
    pub kind: DirectiveKind,
}

/// Where the invocation template came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationSource {
    /// An explicit RUN directive on this line
    Run(usize),
    /// The `#!` line
    Shebang,
    /// The interpreter conventionally used for this file extension
    Extension(&'static str),
}

/// The command template to run, before substitution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub template: String,
    pub source: InvocationSource,
}

/// Everything extracted from one pass over a source file
#[derive(Debug, Clone, Default)]
pub struct Script {
    /// Directives in file order
    pub directives: Vec<Directive>,
    /// Interpreter line from a leading `#!`, without the `#!`
    pub shebang: Option<String>,
}

/// Interpreters used when there is neither a RUN directive nor a shebang.
const EXTENSION_INTERPRETERS: &[(&str, &str)] = &[
    ("sh", "sh"),
    ("bash", "bash"),
    ("zsh", "zsh"),
    ("fish", "fish"),
    ("py", "python3"),
    ("rb", "ruby"),
    ("pl", "perl"),
    ("js", "node"),
    ("lua", "lua"),
    ("tcl", "tclsh"),
];

impl Script {
    /// The first SKIP directive, if any
    pub fn skip(&self) -> Option<&Directive> {
        self.directives.iter().find(|d| matches!(d.kind, DirectiveKind::Skip(_)))
    }

    /// All REQUIRES directives, in order
    pub fn requires(&self) -> impl Iterator<Item = &Directive> {
        self.directives.iter().filter(|d| matches!(d.kind, DirectiveKind::Requires(_)))
    }

    /// Determine the command template: RUN, then shebang, then extension.
    pub fn invocation(&self, path: &Path) -> Result<Invocation, CheckerError> {
        let mut runs = self.directives.iter().filter_map(|d| match &d.kind {
            DirectiveKind::Run(cmd) => Some((d.line, cmd)),
            _ => None,
        });

        if let Some((line, cmd)) = runs.next() {
            if let Some((dup, _)) = runs.next() {
                return Err(CheckerError::malformed(dup,
                    format!("multiple RUN directives (first on line {})", line)));
            }
            if cmd.trim().is_empty() {
                return Err(CheckerError::malformed(line, "empty RUN directive"));
            }
            return Ok(Invocation {
                template: cmd.trim().to_string(),
                source: InvocationSource::Run(line),
            });
        }

        if let Some(ref interp) = self.shebang {
            if !interp.is_empty() {
                return Ok(Invocation {
                    template: format!("{} %s", crate::subst::escape(interp)),
                    source: InvocationSource::Shebang,
                });
            }
        }

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        if let Some((_, interp)) = EXTENSION_INTERPRETERS.iter().find(|(e, _)| *e == ext) {
            return Ok(Invocation {
                template: format!("{} %s", interp),
                source: InvocationSource::Extension(interp),
            });
        }

        Err(CheckerError::new(ErrorKind::NoInvocation,
            "no RUN directive, shebang line, or known file extension to run this file"))
    }
}

/// Parse a whole source file in one pass.
pub fn parse_source(src: &SourceFile) -> Script {
    let mut script = Script::default();
    for (i, line) in src.lines().enumerate() {
        if i == 0 {
            if let Some(interp) = line.strip_prefix("#!") {
                script.shebang = Some(interp.trim().to_string());
                continue;
            }
        }
        if let Some(d) = parse_line(line, i + 1) {
            script.directives.push(d);
        }
    }
    script
}

/// Parse a single line, returning the directive it carries, if any.
pub fn parse_line(line: &str, line_number: usize) -> Option<Directive> {
    let bytes = line.as_bytes();
    let mut search_from = 0;

    while let Some(offset) = line[search_from..].find('#') {
        let hash = search_from + offset;
        search_from = hash + 1;

        // `#` must start the line or follow whitespace
        if hash > 0 && !bytes[hash - 1].is_ascii_whitespace() {
            continue;
        }

        if let Some(kind) = parse_directive_body(&line[hash + 1..]) {
            return Some(Directive { line: line_number, kind });
        }
    }
    None
}

/// Parse `KEYWORD: payload` following a `#`.
fn parse_directive_body(text: &str) -> Option<DirectiveKind> {
    let text = text.trim_start();
    let kw_len = text
        .find(|c: char| !(c.is_ascii_uppercase() || c == '-'))
        .unwrap_or(text.len());
    let (keyword, rest) = text.split_at(kw_len);

    let payload = match rest.strip_prefix(':') {
        Some(p) => p.strip_prefix(' ').unwrap_or(p).to_string(),
        None => {
            // Only SKIP may stand alone
            if keyword == "SKIP" && rest.trim().is_empty() {
                return Some(DirectiveKind::Skip(String::new()));
            }
            return None;
        }
    };

    let kind = match keyword {
        "RUN" => DirectiveKind::Run(payload),
        "CHECK" | "CHECK-OUT" => DirectiveKind::CheckOut(payload),
        "CHECKERR" | "CHECK-ERR" => DirectiveKind::CheckErr(payload),
        "REQUIRES" => DirectiveKind::Requires(payload),
        "SKIP" => DirectiveKind::Skip(payload),
        "EXIT" => DirectiveKind::Exit(payload),
        "SIGNAL" => DirectiveKind::Signal(payload),
        _ => return None,
    };
    Some(kind)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Script {
        parse_source(&SourceFile::from_text("t.sh", text))
    }

    fn kinds(script: &Script) -> Vec<DirectiveKind> {
        script.directives.iter().map(|d| d.kind.clone()).collect()
    }

    #[test]
    fn test_parse_plain_line() {
        assert!(parse_line("echo hello", 1).is_none());
        assert!(parse_line("", 1).is_none());
        assert!(parse_line("# just a comment", 1).is_none());
    }

    #[test]
    fn test_parse_check() {
        let d = parse_line("# CHECK: hello", 4).unwrap();
        assert_eq!(d.line, 4);
        assert_eq!(d.kind, DirectiveKind::CheckOut("hello".into()));
    }

    #[test]
    fn test_parse_keyword_aliases() {
        assert_eq!(parse_line("# CHECK-OUT: a", 1).unwrap().kind, DirectiveKind::CheckOut("a".into()));
        assert_eq!(parse_line("# CHECK-ERR: b", 1).unwrap().kind, DirectiveKind::CheckErr("b".into()));
        assert_eq!(parse_line("#CHECKERR: c", 1).unwrap().kind, DirectiveKind::CheckErr("c".into()));
    }

    #[test]
    fn test_parse_payload_keeps_extra_spaces() {
        let d = parse_line("# CHECK:    indented", 1).unwrap();
        assert_eq!(d.kind, DirectiveKind::CheckOut("   indented".into()));
    }

    #[test]
    fn test_parse_empty_check() {
        assert_eq!(parse_line("# CHECK:", 1).unwrap().kind, DirectiveKind::CheckOut(String::new()));
    }

    #[test]
    fn test_parse_inline_directive() {
        let d = parse_line("echo foo # CHECK: foo", 2).unwrap();
        assert_eq!(d.kind, DirectiveKind::CheckOut("foo".into()));
    }

    #[test]
    fn test_parse_hash_inside_word_is_not_directive() {
        assert!(parse_line("echo a#CHECK: b", 1).is_none());
    }

    #[test]
    fn test_parse_lowercase_is_not_directive() {
        assert!(parse_line("# check: foo", 1).is_none());
        assert!(parse_line("# CHECKS: foo", 1).is_none());
    }

    #[test]
    fn test_parse_skip_forms() {
        assert_eq!(parse_line("# SKIP", 1).unwrap().kind, DirectiveKind::Skip(String::new()));
        assert_eq!(parse_line("# SKIP: flaky", 1).unwrap().kind, DirectiveKind::Skip("flaky".into()));
        assert!(parse_line("# SKIP this one", 1).is_none());
    }

    #[test]
    fn test_parse_source_order_and_lines() {
        let s = parse("#!/bin/sh\n# RUN: sh %s\necho a\n# CHECK: a\n# CHECKERR: e\n# EXIT: 3\n");
        assert_eq!(s.shebang.as_deref(), Some("/bin/sh"));
        assert_eq!(kinds(&s), vec![
            DirectiveKind::Run("sh %s".into()),
            DirectiveKind::CheckOut("a".into()),
            DirectiveKind::CheckErr("e".into()),
            DirectiveKind::Exit("3".into()),
        ]);
        let lines: Vec<usize> = s.directives.iter().map(|d| d.line).collect();
        assert_eq!(lines, vec![2, 4, 5, 6]);
    }

    #[test]
    fn test_invocation_prefers_run() {
        let s = parse("#!/bin/bash\n# RUN: %sh %s --flag\n");
        let inv = s.invocation(Path::new("t.sh")).unwrap();
        assert_eq!(inv.template, "%sh %s --flag");
        assert_eq!(inv.source, InvocationSource::Run(2));
    }

    #[test]
    fn test_invocation_shebang() {
        let s = parse("#!/usr/bin/env python3\nprint('x')\n");
        let inv = s.invocation(Path::new("t.py")).unwrap();
        assert_eq!(inv.template, "/usr/bin/env python3 %s");
        assert_eq!(inv.source, InvocationSource::Shebang);
    }

    #[test]
    fn test_invocation_shebang_escapes_marker() {
        let s = parse("#!/opt/100%/sh\n");
        assert_eq!(s.invocation(Path::new("t")).unwrap().template, "/opt/100%%/sh %s");
    }

    #[test]
    fn test_invocation_extension() {
        let s = parse("print('x')\n");
        let inv = s.invocation(Path::new("dir/t.py")).unwrap();
        assert_eq!(inv.template, "python3 %s");
        assert_eq!(inv.source, InvocationSource::Extension("python3"));
    }

    #[test]
    fn test_invocation_missing() {
        let err = parse("hello\n").invocation(Path::new("t.txt")).unwrap_err();
        assert_eq!(err.kind, ErrorKind::NoInvocation);
    }

    #[test]
    fn test_invocation_multiple_run() {
        let err = parse("# RUN: a\n# RUN: b\n").invocation(Path::new("t.sh")).unwrap_err();
        assert_eq!(err.kind, ErrorKind::MalformedDirective);
        assert_eq!(err.line, Some(2));
    }

    #[test]
    fn test_shebang_only_on_first_line() {
        let s = parse("echo\n#!/bin/false\n");
        assert!(s.shebang.is_none());
    }

    #[test]
    fn test_skip_and_requires_lookup() {
        let s = parse("# REQUIRES: exec:sh\n# REQUIRES: unix\n# SKIP\n");
        assert_eq!(s.requires().count(), 2);
        assert_eq!(s.skip().map(|d| d.line), Some(3));
    }
}
