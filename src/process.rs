//! Centralized command execution with consistent error handling.
//!
//! Every external tool (xorriso, docker, openssl, tar, mount, systemctl) goes
//! through [`Cmd`], so failures always carry the tool's stderr and every
//! invocation shows up in the debug log with secrets redacted.

use anyhow::{bail, Context, Result};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

/// Placeholder shown in logs instead of a redacted argument.
const REDACTED: &str = "<redacted>";

/// Result of a command execution.
#[derive(Debug, Clone)]
pub struct CommandResult {
    /// Exit status of the command.
    pub status: ExitStatus,
    /// Captured stdout as a string.
    pub stdout: String,
    /// Captured stderr as a string.
    pub stderr: String,
}

impl CommandResult {
    /// Returns true if the command exited successfully.
    pub fn success(&self) -> bool {
        self.status.success()
    }

    /// Get the exit code, or -1 if terminated by signal.
    pub fn code(&self) -> i32 {
        self.status.code().unwrap_or(-1)
    }

    pub fn stdout_trimmed(&self) -> &str {
        self.stdout.trim()
    }

    pub fn stderr_trimmed(&self) -> &str {
        self.stderr.trim()
    }
}

/// Builder for configuring command execution.
pub struct Cmd {
    program: String,
    args: Vec<String>,
    /// Indices into `args` that must never be logged.
    secret_args: Vec<usize>,
    current_dir: Option<PathBuf>,
    envs: Vec<(String, String)>,
    stdin: Option<Vec<u8>>,
    /// If true, don't fail on non-zero exit.
    allow_fail: bool,
    error_prefix: Option<String>,
}

impl Cmd {
    pub fn new(program: impl AsRef<str>) -> Self {
        Self {
            program: program.as_ref().to_string(),
            args: Vec::new(),
            secret_args: Vec::new(),
            current_dir: None,
            envs: Vec::new(),
            stdin: None,
            allow_fail: false,
            error_prefix: None,
        }
    }

    /// Add a single argument.
    pub fn arg(mut self, arg: impl AsRef<str>) -> Self {
        self.args.push(arg.as_ref().to_string());
        self
    }

    /// Add multiple arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for arg in args {
            self.args.push(arg.as_ref().to_string());
        }
        self
    }

    /// Add a path as an argument.
    pub fn arg_path(mut self, path: &Path) -> Self {
        self.args.push(path.to_string_lossy().into_owned());
        self
    }

    /// Add an argument that is replaced by a placeholder in logs and errors.
    pub fn secret_arg(mut self, arg: impl AsRef<str>) -> Self {
        self.secret_args.push(self.args.len());
        self.args.push(arg.as_ref().to_string());
        self
    }

    /// Set the working directory.
    pub fn dir(mut self, dir: &Path) -> Self {
        self.current_dir = Some(dir.to_path_buf());
        self
    }

    /// Set an environment variable for the child only.
    ///
    /// Values are never logged, which makes this the way to hand passphrases
    /// to tools that accept `env:VAR` references (openssl).
    pub fn env(mut self, key: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        self.envs
            .push((key.as_ref().to_string(), value.as_ref().to_string()));
        self
    }

    /// Feed bytes to the child's stdin.
    pub fn stdin(mut self, input: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    /// Allow non-zero exit codes without failing.
    pub fn allow_fail(mut self) -> Self {
        self.allow_fail = true;
        self
    }

    /// Set a custom error message prefix.
    pub fn error_msg(mut self, msg: impl AsRef<str>) -> Self {
        self.error_prefix = Some(msg.as_ref().to_string());
        self
    }

    /// Command line as it may appear in logs.
    pub fn display(&self) -> String {
        let mut parts = vec![self.program.clone()];
        for (i, arg) in self.args.iter().enumerate() {
            if self.secret_args.contains(&i) {
                parts.push(REDACTED.to_string());
            } else {
                parts.push(arg.clone());
            }
        }
        parts.join(" ")
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        if let Some(ref dir) = self.current_dir {
            cmd.current_dir(dir);
        }
        for (key, value) in &self.envs {
            cmd.env(key, value);
        }
        cmd
    }

    fn failure_prefix(&self) -> String {
        self.error_prefix
            .clone()
            .unwrap_or_else(|| format!("'{}' failed", self.program))
    }

    /// Run the command and capture output.
    pub fn run(self) -> Result<CommandResult> {
        let shown = self.display();
        tracing::debug!(command = %shown, "executing");
        let started = Instant::now();

        let mut cmd = self.command();
        let output = match self.stdin {
            Some(ref input) => {
                cmd.stdin(Stdio::piped())
                    .stdout(Stdio::piped())
                    .stderr(Stdio::piped());
                let mut child = cmd.spawn().with_context(|| {
                    format!("Failed to execute '{}'. Is it installed?", self.program)
                })?;
                if let Some(mut pipe) = child.stdin.take() {
                    pipe.write_all(input)
                        .with_context(|| format!("Failed to write stdin of '{}'", self.program))?;
                }
                child.wait_with_output()?
            }
            None => cmd.output().with_context(|| {
                format!("Failed to execute '{}'. Is it installed?", self.program)
            })?,
        };

        let result = CommandResult {
            status: output.status,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        tracing::debug!(
            command = %shown,
            code = result.code(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "finished"
        );

        if !self.allow_fail && !result.success() {
            let prefix = self.failure_prefix();
            let stderr = result.stderr_trimmed();
            if stderr.is_empty() {
                bail!("{} (exit code {})", prefix, result.code());
            } else {
                bail!("{} (exit code {}):\n{}", prefix, result.code(), stderr);
            }
        }

        Ok(result)
    }

    /// Run the command with inherited stdio (interactive/streaming).
    ///
    /// Output goes directly to the terminal. Used for docker compose, whose
    /// progress output the user should see.
    pub fn run_interactive(self) -> Result<ExitStatus> {
        tracing::debug!(command = %self.display(), "executing (interactive)");

        let mut cmd = self.command();
        cmd.stdin(Stdio::inherit());
        cmd.stdout(Stdio::inherit());
        cmd.stderr(Stdio::inherit());

        let status = cmd.status().with_context(|| {
            format!("Failed to execute '{}'. Is it installed?", self.program)
        })?;

        if !self.allow_fail && !status.success() {
            bail!(
                "{} (exit code {})",
                self.failure_prefix(),
                status.code().unwrap_or(-1)
            );
        }

        Ok(status)
    }
}

// =============================================================================
// Convenience functions
// =============================================================================

/// Run a command with arguments. Fails with stderr on error.
pub fn run<I, S>(program: &str, args: I) -> Result<CommandResult>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    Cmd::new(program).args(args).run()
}

/// Run a command in a specific directory.
pub fn run_in<I, S>(program: &str, args: I, dir: &Path) -> Result<CommandResult>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    Cmd::new(program).dir(dir).args(args).run()
}

/// Run a shell command via `sh -c`.
pub fn shell(command: &str) -> Result<CommandResult> {
    run("sh", ["-c", command])
}

/// Check if a program exists in PATH.
///
/// Returns the full path if found, None otherwise.
pub fn which(program: &str) -> Option<String> {
    which::which(program)
        .ok()
        .map(|path| path.to_string_lossy().into_owned())
}

/// Check if a program exists in PATH (bool version).
pub fn exists(program: &str) -> bool {
    which(program).is_some()
}

/// Run `f` up to `attempts` times, sleeping `delay` between failures.
///
/// `f` receives the 1-based attempt number. The last error is returned with
/// the attempt count attached.
pub fn retry<T, F>(attempts: u32, delay: Duration, what: &str, mut f: F) -> Result<T>
where
    F: FnMut(u32) -> Result<T>,
{
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match f(attempt) {
            Ok(value) => return Ok(value),
            Err(e) if attempt < attempts => {
                tracing::warn!(attempt, attempts, error = %e, "{} failed, retrying", what);
                thread::sleep(delay);
                attempt += 1;
            }
            Err(e) => {
                return Err(e.context(format!("{} failed after {} attempts", what, attempts)))
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_success() {
        let result = run("echo", ["hello"]).unwrap();
        assert!(result.success());
        assert_eq!(result.stdout_trimmed(), "hello");
    }

    #[test]
    fn test_run_failure_includes_stderr() {
        let err = run("ls", ["/nonexistent_path_12345"]).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("No such file") || msg.contains("cannot access"));
    }

    #[test]
    fn test_shell_command() {
        let result = shell("echo hello && echo world").unwrap();
        assert!(result.stdout.contains("hello"));
        assert!(result.stdout.contains("world"));
    }

    #[test]
    fn test_which() {
        assert!(which("sh").is_some());
        assert!(!exists("nonexistent_program_12345"));
    }

    #[test]
    fn test_custom_error_message() {
        let err = Cmd::new("false")
            .error_msg("Repacking ISO failed")
            .run()
            .unwrap_err();
        assert!(err.to_string().contains("Repacking ISO failed"));
    }

    #[test]
    fn test_allow_fail() {
        let result = Cmd::new("false").allow_fail().run().unwrap();
        assert!(!result.success());
        assert_eq!(result.code(), 1);
    }

    #[test]
    fn test_stdin_is_forwarded() {
        let result = Cmd::new("cat").stdin("piped input").run().unwrap();
        assert_eq!(result.stdout, "piped input");
    }

    #[test]
    fn test_env_reaches_child() {
        let result = Cmd::new("sh")
            .args(["-c", "printf %s \"$HOMELAB_TEST_VALUE\""])
            .env("HOMELAB_TEST_VALUE", "s3cret")
            .run()
            .unwrap();
        assert_eq!(result.stdout, "s3cret");
    }

    #[test]
    fn test_secret_args_are_redacted() {
        let cmd = Cmd::new("openssl")
            .args(["passwd", "-6"])
            .secret_arg("hunter2");
        let shown = cmd.display();
        assert_eq!(shown, "openssl passwd -6 <redacted>");
        assert!(!shown.contains("hunter2"));
    }

    #[test]
    fn test_run_in_directory() {
        let result = run_in("pwd", [] as [&str; 0], Path::new("/tmp")).unwrap();
        assert!(result.stdout_trimmed().contains("tmp"));
    }

    #[test]
    fn test_retry_succeeds_after_failures() {
        let mut calls = 0;
        let value = retry(5, Duration::ZERO, "copy", |attempt| {
            calls += 1;
            if attempt < 3 {
                bail!("not yet");
            }
            Ok(attempt)
        })
        .unwrap();
        assert_eq!(value, 3);
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_retry_gives_up() {
        let mut calls = 0;
        let err = retry(5, Duration::ZERO, "copy acme.json", |_| -> Result<()> {
            calls += 1;
            bail!("container not running")
        })
        .unwrap_err();
        assert_eq!(calls, 5);
        assert!(err.to_string().contains("after 5 attempts"));
    }
}
