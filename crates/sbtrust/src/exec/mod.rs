//! External tool execution.
//!
//! Every tool the subsystem orchestrates (`mokutil`, `openssl`, `sign-file`,
//! `sbsign`, compressors, initrd generators, package databases) is run
//! through the [`CommandRunner`] trait, so probing and signing logic never
//! spawns processes directly.

use async_trait::async_trait;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tracing::{debug, trace};

use sbtrust_core::{Result, TrustError};

pub mod tools;

#[cfg(test)]
pub(crate) mod testing;

/// Directories searched in addition to `PATH`; admin tools often live in
/// sbin directories that are missing from an unprivileged user's `PATH`.
const EXTRA_SEARCH_DIRS: &[&str] = &["/usr/local/sbin", "/usr/sbin", "/sbin"];

/// Text that must never reach a log line or a process list.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The wrapped text.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(<redacted>)")
    }
}

/// A single external command: program, arguments and working directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Program name or absolute path
    pub program: String,
    /// Arguments, passed verbatim (no shell)
    pub args: Vec<String>,
    /// Working directory, if not inherited
    pub cwd: Option<PathBuf>,
    /// Written to the program's stdin, then closed
    pub stdin: Option<Secret>,
}

impl Invocation {
    /// Start an invocation of `program`.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            stdin: None,
        }
    }

    /// Append one argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append a path argument.
    #[must_use]
    pub fn path_arg(self, path: &Path) -> Self {
        self.arg(path.display().to_string())
    }

    /// Append several arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Run in `dir` instead of the current directory.
    #[must_use]
    pub fn current_dir(mut self, dir: &Path) -> Self {
        self.cwd = Some(dir.to_path_buf());
        self
    }

    /// Feed `input` on stdin. It is kept out of the argument list, so other
    /// users cannot read it from `/proc`, and out of `Display`.
    #[must_use]
    pub fn stdin_secret(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(Secret::new(input));
        self
    }

    /// Base name of the program, for error messages.
    #[must_use]
    pub fn tool_name(&self) -> &str {
        Path::new(&self.program)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(&self.program)
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Captured result of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code; `None` if terminated by a signal
    pub status: Option<i32>,
    /// Standard output, lossily decoded
    pub stdout: String,
    /// Standard error, lossily decoded
    pub stderr: String,
}

impl CommandOutput {
    /// Successful output with the given stdout.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            status: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Failed output with the given exit code and stderr.
    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            status: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// Whether the command exited with status 0.
    #[must_use]
    pub const fn success(&self) -> bool {
        matches!(self.status, Some(0))
    }

    /// Human-readable exit status.
    #[must_use]
    pub fn status_text(&self) -> String {
        self.status
            .map_or_else(|| "killed by signal".to_string(), |c| format!("exit {c}"))
    }

    /// Convert a non-zero exit into `TrustError::ToolFailed`.
    ///
    /// # Errors
    ///
    /// Returns `TrustError::ToolFailed` carrying the trimmed stderr.
    pub fn into_result(self, tool: &str) -> Result<Self> {
        if self.success() {
            Ok(self)
        } else {
            Err(TrustError::ToolFailed {
                tool: tool.to_string(),
                status: self.status_text(),
                stderr: self.stderr.trim().to_string(),
            })
        }
    }
}

/// Runs external commands.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run to completion and capture output. A non-zero exit is NOT an error
    /// here; a program that cannot be started is.
    async fn run(&self, invocation: &Invocation) -> Result<CommandOutput>;

    /// Resolve a program name to an executable path.
    fn locate(&self, program: &str) -> Option<PathBuf>;

    /// Whether `program` can be run.
    fn is_available(&self, program: &str) -> bool {
        self.locate(program).is_some()
    }

    /// Run and require exit status 0.
    async fn run_checked(&self, invocation: &Invocation) -> Result<CommandOutput> {
        let tool = invocation.tool_name().to_string();
        self.run(invocation).await?.into_result(&tool)
    }
}

/// Runs commands on the host with `tokio::process`.
#[derive(Debug, Clone)]
pub struct SystemRunner {
    search_dirs: Vec<PathBuf>,
}

impl Default for SystemRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemRunner {
    /// Runner searching `PATH` plus the sbin directories.
    #[must_use]
    pub fn new() -> Self {
        let mut search_dirs: Vec<PathBuf> = std::env::var_os("PATH")
            .map(|p| std::env::split_paths(&p).collect())
            .unwrap_or_default();
        for extra in EXTRA_SEARCH_DIRS {
            let extra = PathBuf::from(extra);
            if !search_dirs.contains(&extra) {
                search_dirs.push(extra);
            }
        }
        Self { search_dirs }
    }
}

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, invocation: &Invocation) -> Result<CommandOutput> {
        let program = self
            .locate(&invocation.program)
            .ok_or_else(|| TrustError::tool_missing(invocation.tool_name()))?;

        debug!(command = %invocation, "running external tool");
        let mut cmd = tokio::process::Command::new(&program);
        cmd.args(&invocation.args).kill_on_drop(true);
        if let Some(dir) = &invocation.cwd {
            cmd.current_dir(dir);
        }
        let spawn_error = |e: std::io::Error| {
            if e.kind() == std::io::ErrorKind::NotFound {
                TrustError::tool_missing(invocation.tool_name())
            } else {
                TrustError::io(&program, e)
            }
        };

        let output = match &invocation.stdin {
            None => cmd.output().await.map_err(spawn_error)?,
            Some(input) => {
                cmd.stdin(Stdio::piped())
                    .stdout(Stdio::piped())
                    .stderr(Stdio::piped());
                let mut child = cmd.spawn().map_err(spawn_error)?;
                if let Some(mut pipe) = child.stdin.take() {
                    // a program that exits without reading closes the pipe; its
                    // exit status tells the real story
                    if let Err(e) = pipe.write_all(input.expose().as_bytes()).await {
                        debug!(error = %e, "stdin closed early");
                    }
                }
                child
                    .wait_with_output()
                    .await
                    .map_err(|e| TrustError::io(&program, e))?
            }
        };

        let result = CommandOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        trace!(
            command = %invocation,
            status = %result.status_text(),
            stderr = %result.stderr.trim(),
            "external tool finished"
        );
        Ok(result)
    }

    fn locate(&self, program: &str) -> Option<PathBuf> {
        if program.contains('/') {
            let path = PathBuf::from(program);
            return path.is_file().then_some(path);
        }
        self.search_dirs
            .iter()
            .map(|dir| dir.join(program))
            .find(|candidate| candidate.is_file())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invocation_builder_and_display() {
        let inv = Invocation::new("/usr/src/linux-headers-6.9.1/scripts/sign-file")
            .args(["sha256", "k.priv"])
            .path_arg(Path::new("/m/a.ko"));
        assert_eq!(inv.tool_name(), "sign-file");
        assert_eq!(
            inv.to_string(),
            "/usr/src/linux-headers-6.9.1/scripts/sign-file sha256 k.priv /m/a.ko"
        );
    }

    #[test]
    fn stdin_secret_stays_out_of_display_and_debug() {
        let inv = Invocation::new("mokutil")
            .arg("--generate-hash")
            .stdin_secret("hunter22\nhunter22\n");
        assert_eq!(inv.to_string(), "mokutil --generate-hash");
        assert!(!format!("{inv:?}").contains("hunter22"));
        assert_eq!(inv.stdin.as_ref().map(Secret::expose), Some("hunter22\nhunter22\n"));
    }

    #[test]
    fn non_zero_exit_becomes_tool_failed() {
        let err = CommandOutput::failed(2, "bad key\n")
            .into_result("sign-file")
            .unwrap_err();
        match err {
            TrustError::ToolFailed { tool, status, stderr } => {
                assert_eq!(tool, "sign-file");
                assert_eq!(status, "exit 2");
                assert_eq!(stderr, "bad key");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn missing_program_is_tool_missing() {
        let runner = SystemRunner::new();
        let err = runner
            .run(&Invocation::new("sbtrust-definitely-not-installed"))
            .await
            .unwrap_err();
        assert!(matches!(err, TrustError::ToolMissing { .. }));
    }

    #[tokio::test]
    async fn runs_real_program() {
        let runner = SystemRunner::new();
        if !runner.is_available("echo") {
            return;
        }
        let out = runner
            .run_checked(&Invocation::new("echo").arg("hello"))
            .await
            .unwrap();
        assert_eq!(out.stdout.trim(), "hello");
    }

    #[tokio::test]
    async fn feeds_stdin_to_real_program() {
        let runner = SystemRunner::new();
        if !runner.is_available("cat") {
            return;
        }
        let out = runner
            .run_checked(&Invocation::new("cat").stdin_secret("piped\n"))
            .await
            .unwrap();
        assert_eq!(out.stdout, "piped\n");
    }
}
