//! External command execution
//!
//! The policy driver only ever talks to the kernel through `ip` and
//! `iptables`/`ip6tables`. Those invocations go through [`CommandRunner`] so
//! tests can substitute [`RecordingRunner`] and never touch real system state.
//!
//! Execution is synchronous: a command that hangs blocks the caller.

use std::io;
use std::process::Command;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::error::TableError;

/// Runs an argument vector and reports its exit status
pub trait CommandRunner: Send {
    /// Run `argv` to completion and return its exit status (zero is success)
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the program could not be started.
    fn execute(&self, argv: &[String]) -> io::Result<i32>;
}

/// Run `argv` and turn a spawn failure or non-zero status into a `TableError`
///
/// # Errors
///
/// Returns `TableError::CommandExecution` on any failure.
pub fn run_checked(runner: &dyn CommandRunner, argv: &[String]) -> Result<(), TableError> {
    debug!("Running: {}", argv.join(" "));
    match runner.execute(argv) {
        Ok(0) => Ok(()),
        Ok(status) => Err(TableError::command(argv, format!("exit status {status}"))),
        Err(e) => Err(TableError::command(argv, e.to_string())),
    }
}

/// Forks and execs real programs
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn execute(&self, argv: &[String]) -> io::Result<i32> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "empty command"))?;

        let output = Command::new(program).args(args).output()?;

        if !output.stderr.is_empty() {
            debug!(
                "{} stderr: {}",
                program,
                String::from_utf8_lossy(&output.stderr).trim_end()
            );
        }

        // Killed by a signal
        Ok(output.status.code().unwrap_or(-1))
    }
}

#[derive(Debug, Default)]
struct RecordingState {
    commands: Vec<Vec<String>>,
    failing: Vec<String>,
}

/// Records commands instead of running them
///
/// Every command succeeds unless its rendered command line contains one of
/// the patterns registered with [`fail_matching`](Self::fail_matching).
/// Clones share the same record, so a test can keep a handle after giving
/// the runner to a controller.
///
/// # Example
///
/// ```
/// use st_router::exec::{CommandRunner, RecordingRunner};
///
/// let runner = RecordingRunner::new();
/// runner.fail_matching("fwmark");
///
/// let ok = vec!["ip".to_string(), "route".to_string()];
/// let bad = vec!["ip".to_string(), "rule".to_string(), "fwmark".to_string()];
/// assert_eq!(runner.execute(&ok).unwrap(), 0);
/// assert_ne!(runner.execute(&bad).unwrap(), 0);
/// assert_eq!(runner.command_lines(), vec!["ip route", "ip rule fwmark"]);
/// ```
#[derive(Debug, Clone, Default)]
pub struct RecordingRunner {
    state: Arc<Mutex<RecordingState>>,
}

impl RecordingRunner {
    /// Create a runner where every command succeeds
    pub fn new() -> Self {
        Self::default()
    }

    /// Make commands whose command line contains `pattern` exit with status 1
    pub fn fail_matching(&self, pattern: impl Into<String>) {
        self.state.lock().failing.push(pattern.into());
    }

    /// Let every command succeed again
    pub fn clear_failures(&self) {
        self.state.lock().failing.clear();
    }

    /// All recorded argument vectors in execution order
    pub fn commands(&self) -> Vec<Vec<String>> {
        self.state.lock().commands.clone()
    }

    /// All recorded commands joined with spaces
    pub fn command_lines(&self) -> Vec<String> {
        self.state
            .lock()
            .commands
            .iter()
            .map(|argv| argv.join(" "))
            .collect()
    }

    /// Forget recorded commands, keeping failure patterns
    pub fn clear(&self) {
        self.state.lock().commands.clear();
    }
}

impl CommandRunner for RecordingRunner {
    fn execute(&self, argv: &[String]) -> io::Result<i32> {
        let mut state = self.state.lock();
        let line = argv.join(" ");
        state.commands.push(argv.to_vec());
        if state.failing.iter().any(|p| line.contains(p.as_str())) {
            Ok(1)
        } else {
            Ok(0)
        }
    }
}
