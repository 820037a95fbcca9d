//! Process runner
//!
//! Runs the substituted command under `/bin/sh -c` in the script's directory
//! and captures stdout, stderr and the termination cause. The child gets its
//! own process group so that a timeout, or a script that leaves background
//! jobs behind, can be cleaned up with one kill.

use std::fmt;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::{mpsc, Arc, Mutex};
use std::time::{Duration, Instant};
use crate::config::Config;
use crate::error::{CheckerError, ErrorKind, TestFailure};
use crate::state::CheckState;

/// Shell used to run command templates
pub const SHELL: &str = "/bin/sh";

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// How long to keep reading output after the child is gone
const DRAIN_GRACE: Duration = Duration::from_millis(500);

const SIGNAL_NAMES: &[(&str, i32)] = &[
    ("HUP", libc::SIGHUP),
    ("INT", libc::SIGINT),
    ("QUIT", libc::SIGQUIT),
    ("ILL", libc::SIGILL),
    ("TRAP", libc::SIGTRAP),
    ("ABRT", libc::SIGABRT),
    ("BUS", libc::SIGBUS),
    ("FPE", libc::SIGFPE),
    ("KILL", libc::SIGKILL),
    ("USR1", libc::SIGUSR1),
    ("SEGV", libc::SIGSEGV),
    ("USR2", libc::SIGUSR2),
    ("PIPE", libc::SIGPIPE),
    ("ALRM", libc::SIGALRM),
    ("TERM", libc::SIGTERM),
    ("CHLD", libc::SIGCHLD),
    ("CONT", libc::SIGCONT),
    ("STOP", libc::SIGSTOP),
    ("TSTP", libc::SIGTSTP),
    ("TTIN", libc::SIGTTIN),
    ("TTOU", libc::SIGTTOU),
    ("XCPU", libc::SIGXCPU),
    ("XFSZ", libc::SIGXFSZ),
    ("VTALRM", libc::SIGVTALRM),
    ("PROF", libc::SIGPROF),
    ("WINCH", libc::SIGWINCH),
    ("SYS", libc::SIGSYS),
];

/// A signal number
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Signal(pub i32);

impl Signal {
    /// Parse `SIGKILL`, `KILL`, `kill`, or `9`.
    pub fn parse(text: &str) -> Option<Signal> {
        let text = text.trim();
        if let Ok(n) = text.parse::<i32>() {
            return (n > 0).then_some(Signal(n));
        }
        let upper = text.to_ascii_uppercase();
        let name = upper.strip_prefix("SIG").unwrap_or(&upper);
        SIGNAL_NAMES
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, num)| Signal(*num))
    }

    /// Conventional name without the `SIG` prefix, if known
    pub fn name(&self) -> Option<&'static str> {
        SIGNAL_NAMES.iter().find(|(_, n)| *n == self.0).map(|(name, _)| *name)
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "SIG{}", name),
            None => write!(f, "signal {}", self.0),
        }
    }
}

/// How the child ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Exited(i32),
    Signaled(Signal),
}

impl Termination {
    fn from_status(status: ExitStatus) -> Self {
        if let Some(code) = status.code() {
            return Termination::Exited(code);
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(sig) = status.signal() {
                return Termination::Signaled(Signal(sig));
            }
        }
        Termination::Exited(-1)
    }
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Termination::Exited(code) => write!(f, "exit status {}", code),
            Termination::Signaled(sig) => write!(f, "killed by signal {}", sig),
        }
    }
}

/// Captured behavior of one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    pub stdout: String,
    pub stderr: String,
    pub termination: Termination,
}

/// What the runner produced
#[derive(Debug)]
pub enum RunOutcome {
    /// The process ran to completion
    Finished(ExecutionResult),
    /// The process could not be run meaningfully (missing executable,
    /// timeout). This is a test failure, not a checker error.
    Failed(TestFailure),
}

/// Look up an executable by name using the PATH the child will see.
///
/// Names containing `/` are resolved against `cwd` and must be executable
/// files.
pub fn look_path(program: &str, config: &Config, cwd: &Path) -> Result<PathBuf, String> {
    if program.contains('/') {
        let path = cwd.join(program);
        return if is_executable(&path) {
            Ok(path)
        } else if path.exists() {
            Err(format!("not an executable file: {}", program))
        } else {
            Err(format!("executable not found: {}", program))
        };
    }

    let path_env = config.getenv("PATH").unwrap_or_default();
    which::which_in(program, Some(path_env), cwd)
        .map_err(|_| format!("executable not found: {}", program))
}

fn is_executable(path: &Path) -> bool {
    let Ok(meta) = std::fs::metadata(path) else {
        return false;
    };
    if !meta.is_file() {
        return false;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        meta.permissions().mode() & 0o111 != 0
    }
    #[cfg(not(unix))]
    {
        true
    }
}

/// Find the program a shell command line will execute.
///
/// Leading `NAME=value` assignments and `exec`/`command` prefixes are
/// skipped. Returns `Ok(None)` for an empty command.
pub fn program_of(command: &str) -> Result<Option<String>, CheckerError> {
    let words = shell_words::split(command).map_err(|e| {
        CheckerError::new(ErrorKind::MalformedCommand,
            format!("cannot parse command `{}`: {}", command, e))
    })?;
    Ok(words
        .into_iter()
        .find(|w| !is_assignment(w) && w != "exec" && w != "command"))
}

/// Utilities the shell runs itself; they are neither looked up nor exec'd.
const SHELL_BUILTINS: &[&str] = &[
    ":", ".", "[", "break", "cd", "continue", "echo", "eval", "exit", "export",
    "false", "kill", "printf", "pwd", "read", "readonly", "return", "set",
    "shift", "test", "times", "trap", "true", "ulimit", "umask", "unset", "wait",
];

fn starts_with_program(command: &str, program: &str) -> bool {
    shell_words::split(command)
        .ok()
        .and_then(|words| words.into_iter().next())
        .map_or(false, |first| first == program)
}

/// True when `command` has no unquoted list, pipeline, or subshell
/// operators. Redirections such as `2>&1` are allowed.
fn is_simple_command(command: &str) -> bool {
    let chars: Vec<char> = command.chars().collect();
    let mut in_single = false;
    let mut in_double = false;
    let mut substitution_depth = 0usize;
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if in_single {
            if c == '\'' {
                in_single = false;
            }
        } else if c == '\\' {
            i += 1;
        } else if in_double {
            if c == '"' {
                in_double = false;
            }
        } else {
            match c {
                '\'' => in_single = true,
                '"' => in_double = true,
                ';' | '|' | '\n' => return false,
                '(' if i > 0 && chars[i - 1] == '$' => substitution_depth += 1,
                '(' => return false,
                ')' if substitution_depth > 0 => substitution_depth -= 1,
                ')' => return false,
                '&' => {
                    let redirect = (i > 0 && matches!(chars[i - 1], '>' | '<'))
                        || chars.get(i + 1) == Some(&'>');
                    if !redirect {
                        return false;
                    }
                }
                _ => {}
            }
        }
        i += 1;
    }
    true
}

fn is_assignment(word: &str) -> bool {
    match word.split_once('=') {
        Some((name, _)) => {
            !name.is_empty()
                && !name.starts_with(|c: char| c.is_ascii_digit())
                && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    }
}

/// Run `command` to completion or until the configured timeout.
pub fn run(command: &str, state: &mut CheckState, config: &Config) -> Result<RunOutcome, CheckerError> {
    let program = program_of(command)?.ok_or_else(|| {
        CheckerError::new(ErrorKind::MalformedCommand, "command is empty after substitution")
    })?;

    let builtin = SHELL_BUILTINS.contains(&program.as_str());
    if !builtin {
        match look_path(&program, config, &state.workdir) {
            Ok(resolved) => state.logf(&format!("[resolved {} -> {}]", program, resolved.display())),
            Err(e) => {
                state.logf(&format!("[{}]", e));
                return Ok(RunOutcome::Failed(TestFailure::new(e)));
            }
        }
    }

    // A simple command is exec'd so the shell does not sit between us and
    // the program; otherwise a signal would surface as exit status 128+n.
    let script = if !builtin && starts_with_program(command, &program) && is_simple_command(command) {
        format!("exec {}", command)
    } else {
        command.to_string()
    };

    state.logf(&format!("> {}", command));

    let mut cmd = Command::new(SHELL);
    cmd.arg("-c").arg(&script);
    cmd.current_dir(&state.workdir);
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    for (k, v) in &config.env {
        cmd.env(k, v);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    let mut child = cmd.spawn().map_err(|e| {
        CheckerError::new(ErrorKind::Spawn, format!("failed to start {}: {}", SHELL, e))
    })?;

    let stdout_reader = Reader::spawn(child.stdout.take());
    let stderr_reader = Reader::spawn(child.stderr.take());

    let waited = wait_bounded(&mut child, config.timeout);

    // A grandchild that left the process group may still hold the pipes;
    // take what has arrived once the grace period is over.
    let deadline = Instant::now() + DRAIN_GRACE;
    let stdout = stdout_reader.finish(deadline);
    let stderr = stderr_reader.finish(deadline);
    if !(stdout.complete && stderr.complete) {
        state.logf("[output pipes still open after exit; using partial output]");
    }

    let status = match waited {
        Ok(Some(status)) => status,
        Ok(None) => {
            state.logf(&format!("[timed out after {}s, killed]", config.timeout.as_secs_f64()));
            return Ok(RunOutcome::Failed(TestFailure::new(format!(
                "timed out after {}s; process was killed",
                config.timeout.as_secs_f64()
            ))));
        }
        Err(e) => {
            return Err(CheckerError::new(ErrorKind::Spawn,
                format!("failed to wait for child: {}", e)));
        }
    };

    let result = ExecutionResult {
        stdout: String::from_utf8_lossy(&stdout.bytes).into_owned(),
        stderr: String::from_utf8_lossy(&stderr.bytes).into_owned(),
        termination: Termination::from_status(status),
    };

    if !result.stdout.is_empty() {
        state.logf(&format!("[stdout]\n{}", result.stdout));
    }
    if !result.stderr.is_empty() {
        state.logf(&format!("[stderr]\n{}", result.stderr));
    }
    state.logf(&format!("[{}]", result.termination));

    Ok(RunOutcome::Finished(result))
}

/// Captured bytes of one stream
struct Captured {
    bytes: Vec<u8>,
    /// False when the pipe was still open at the deadline
    complete: bool,
}

/// Reads one pipe on a background thread into a shared buffer.
struct Reader {
    buf: Arc<Mutex<Vec<u8>>>,
    done: mpsc::Receiver<()>,
}

impl Reader {
    fn spawn<R: Read + Send + 'static>(pipe: Option<R>) -> Self {
        let buf = Arc::new(Mutex::new(Vec::new()));
        let (tx, done) = mpsc::channel();
        let sink = Arc::clone(&buf);
        std::thread::spawn(move || {
            if let Some(mut pipe) = pipe {
                let mut chunk = [0u8; 8192];
                loop {
                    match pipe.read(&mut chunk) {
                        Ok(0) => break,
                        Ok(n) => match sink.lock() {
                            Ok(mut b) => b.extend_from_slice(&chunk[..n]),
                            Err(_) => break,
                        },
                        Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                        Err(_) => break,
                    }
                }
            }
            let _ = tx.send(());
        });
        Self { buf, done }
    }

    /// Wait for EOF until `deadline`, then take whatever was read.
    /// The thread is left behind if the pipe is still open.
    fn finish(self, deadline: Instant) -> Captured {
        let wait = deadline.saturating_duration_since(Instant::now());
        let complete = self.done.recv_timeout(wait).is_ok();
        let bytes = match self.buf.lock() {
            Ok(mut b) => std::mem::take(&mut *b),
            Err(_) => Vec::new(),
        };
        Captured { bytes, complete }
    }
}

/// Poll until the child exits or `timeout` passes. `Ok(None)` means the
/// child was killed and reaped after the timeout.
///
/// Either way the rest of the process group is killed so that leftover
/// background jobs do not hold the output pipes open.
fn wait_bounded(child: &mut Child, timeout: Duration) -> std::io::Result<Option<ExitStatus>> {
    let start = Instant::now();
    loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                kill_group(child);
                return Ok(Some(status));
            }
            Ok(None) => {
                if start.elapsed() >= timeout {
                    kill_group(child);
                    let _ = child.kill();
                    child.wait()?;
                    return Ok(None);
                }
                std::thread::sleep(POLL_INTERVAL);
            }
            Err(e) => {
                kill_group(child);
                let _ = child.kill();
                let _ = child.wait();
                return Err(e);
            }
        }
    }
}

#[cfg(unix)]
fn kill_group(child: &Child) {
    if let Ok(pgid) = libc::pid_t::try_from(child.id()) {
        // SAFETY: kill(2) with a negative pid signals the process group;
        // ESRCH when the group is already gone is expected and ignored.
        unsafe {
            libc::kill(-pgid, libc::SIGKILL);
        }
    }
}

#[cfg(not(unix))]
fn kill_group(_child: &Child) {}
