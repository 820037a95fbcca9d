//! Per-check state
//!
//! Holds what a single check owns while it runs: the script path, the
//! directory the script runs in, and the execution log. Nothing here is
//! shared between checks.

use std::path::{Path, PathBuf};

/// Mutable state for a single check
#[derive(Debug)]
pub struct CheckState {
    /// The script being checked
    pub path: PathBuf,
    /// Absolute directory containing the script; the child runs here
    pub workdir: PathBuf,
    /// Execution log
    pub log: String,
}

impl CheckState {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let workdir = script_dir(&path);
        Self {
            path,
            workdir,
            log: String::new(),
        }
    }

    /// Write a log entry
    pub fn logf(&mut self, msg: &str) {
        self.log.push_str(msg);
        if !msg.ends_with('\n') {
            self.log.push('\n');
        }
    }
}

/// The absolute directory containing `path`.
///
/// The directory is canonicalized when it exists, otherwise joined onto the
/// current directory.
fn script_dir(path: &Path) -> PathBuf {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::canonicalize(&dir)
        .or_else(|_| std::env::current_dir().map(|cwd| cwd.join(&dir)))
        .unwrap_or(dir)
}
