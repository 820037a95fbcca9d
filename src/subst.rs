//! Placeholder substitution for command templates
//!
//! A template such as `%python %s --name %arg` is rendered by replacing each
//! `%key` with the value supplied by the caller. `%%` renders a literal `%`.
//! Substituted values are shell-quoted, so a value like `arg with spaces`
//! reaches the child process as a single argument.

use std::collections::BTreeMap;
use std::path::Path;
use crate::error::{CheckerError, ErrorKind};

/// The placeholder marker character
pub const MARKER: char = '%';

/// Caller-supplied mapping from placeholder name to replacement text
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubstitutionMap {
    entries: BTreeMap<String, String>,
}

impl SubstitutionMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// The usual map for checking `path`: `%` → `%` and `s` → the absolute
    /// script path. The runner changes into the script's directory, so a
    /// relative path would no longer resolve.
    pub fn for_script(path: &Path) -> Self {
        let abs = if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()
                .map(|cwd| cwd.join(path))
                .unwrap_or_else(|_| path.to_path_buf())
        };
        let mut map = Self::new();
        map.insert("%", "%");
        map.insert("s", abs.to_string_lossy());
        map
    }

    /// Add or replace a substitution
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.entries.insert(key.into(), value.into());
        self
    }

    /// Builder-style insert
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(|s| s.as_str())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Longest key that prefixes `text`.
    fn longest_key(&self, text: &str) -> Option<&str> {
        self.entries
            .keys()
            .filter(|k| !k.is_empty() && text.starts_with(k.as_str()))
            .max_by_key(|k| k.len())
            .map(|k| k.as_str())
    }

    /// Render `template`, failing on any placeholder without a mapping.
    pub fn apply(&self, template: &str) -> Result<String, CheckerError> {
        let mut out = String::with_capacity(template.len());
        let mut rest = template;

        while let Some(pos) = rest.find(MARKER) {
            out.push_str(&rest[..pos]);
            let after = &rest[pos + MARKER.len_utf8()..];

            if let Some(tail) = after.strip_prefix(MARKER) {
                out.push(MARKER);
                rest = tail;
                continue;
            }

            let key = self.longest_key(after).ok_or_else(|| unknown_key(after))?;
            out.push_str(&shell_words::quote(&self.entries[key]));
            rest = &after[key.len()..];
        }

        out.push_str(rest);
        Ok(out)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for SubstitutionMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = Self::new();
        for (k, v) in iter {
            map.insert(k, v);
        }
        map
    }
}

/// Escape every marker in `text` so it survives `apply` unchanged.
pub fn escape(text: &str) -> String {
    text.replace(MARKER, "%%")
}

fn unknown_key(after: &str) -> CheckerError {
    let ident: String = after
        .chars()
        .take_while(|c| c.is_alphanumeric() || *c == '_')
        .collect();
    if ident.is_empty() {
        CheckerError::new(ErrorKind::UnknownSubstitution,
            "dangling '%' in command template (use %% for a literal percent sign)")
    } else {
        CheckerError::new(ErrorKind::UnknownSubstitution,
            format!("unknown substitution %{}", ident))
    }
}
