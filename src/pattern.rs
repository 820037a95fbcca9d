//! Line patterns and output normalization
//!
//! CHECK payloads compile to a [`LinePattern`]. In exact mode the payload
//! must equal the output line. In wildcard mode text inside `{{...}}` is a
//! regular expression and everything else is literal; the whole line must
//! match.

use std::borrow::Cow;
use std::sync::OnceLock;
use regex::{Regex, RegexBuilder};
use crate::config::MatchMode;

#[derive(Debug, Clone)]
enum Matcher {
    Exact(String),
    Regex(Regex),
}

/// A compiled CHECK/CHECKERR pattern
#[derive(Debug, Clone)]
pub struct LinePattern {
    /// The payload as written (after normalization)
    pub text: String,
    matcher: Matcher,
}

impl LinePattern {
    /// Compile a payload. `trim` applies whitespace normalization to the
    /// payload itself so it lines up with normalized output.
    pub fn compile(payload: &str, mode: MatchMode, trim: bool) -> Result<Self, String> {
        let text = if trim { payload.trim() } else { payload }.to_string();
        let matcher = match mode {
            MatchMode::Exact => Matcher::Exact(text.clone()),
            MatchMode::Wildcard => {
                if text.contains("{{") {
                    Matcher::Regex(wildcard_regex(&text)?)
                } else {
                    Matcher::Exact(text.clone())
                }
            }
        };
        Ok(Self { text, matcher })
    }

    pub fn is_match(&self, line: &str) -> bool {
        match &self.matcher {
            Matcher::Exact(s) => s == line,
            Matcher::Regex(re) => re.is_match(line),
        }
    }
}

/// Build an anchored regex from `literal{{regex}}literal` text.
fn wildcard_regex(text: &str) -> Result<Regex, String> {
    let mut source = String::from("^");
    let mut rest = text;

    while let Some(open) = rest.find("{{") {
        source.push_str(&regex::escape(&rest[..open]));
        let inner = &rest[open + 2..];
        let close = inner
            .find("}}")
            .ok_or_else(|| format!("unterminated '{{{{' in pattern: {}", text))?;
        source.push_str("(?:");
        source.push_str(&inner[..close]);
        source.push(')');
        rest = &inner[close + 2..];
    }
    source.push_str(&regex::escape(rest));
    source.push('$');

    RegexBuilder::new(&source)
        .size_limit(1 << 20)
        .build()
        .map_err(|e| format!("invalid regex in pattern {}: {}", text, e))
}

fn ansi_regex() -> &'static Regex {
    static ANSI: OnceLock<Regex> = OnceLock::new();
    ANSI.get_or_init(|| {
        // CSI sequences, OSC sequences (BEL or ST terminated), and two-byte escapes
        Regex::new(r"\x1b\[[0-?]*[ -/]*[@-~]|\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)|\x1b[@-Z\\-_]")
            .expect("ANSI escape regex is valid")
    })
}

/// Remove terminal color and control escape sequences.
pub fn strip_ansi(s: &str) -> Cow<'_, str> {
    if !s.contains('\x1b') {
        return Cow::Borrowed(s);
    }
    ansi_regex().replace_all(s, "")
}

/// Apply the configured normalization to one captured line.
pub fn normalize_line(line: &str, strip_color: bool, trim: bool) -> String {
    let line = if strip_color { strip_ansi(line) } else { Cow::Borrowed(line) };
    if trim {
        line.trim().to_string()
    } else {
        line.into_owned()
    }
}
