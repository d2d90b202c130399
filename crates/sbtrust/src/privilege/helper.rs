//! Privileged helper process: the parent-side broker and the helper loop.

use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, info, warn};

use sbtrust_core::{Result, TrustError};

use super::ops::OpExecutor;
use super::protocol::{decode_line, encode_line, HelperRequest, HelperResponse, PROTOCOL_VERSION};
use super::{ElevatedSession, PrivilegeBroker};

/// Exit codes `pkexec` uses when authorization is refused or dismissed.
const AUTH_REFUSED_CODES: &[i32] = &[126, 127];

/// Elevates by re-running this binary as `<launcher> <exe> helper`.
#[derive(Debug, Clone)]
pub struct HelperBroker {
    launcher: String,
    exe: PathBuf,
}

impl HelperBroker {
    /// Broker launching `exe` through `launcher` (`pkexec` by default).
    pub fn new(launcher: impl Into<String>, exe: impl Into<PathBuf>) -> Self {
        Self {
            launcher: launcher.into(),
            exe: exe.into(),
        }
    }

    /// Broker for the currently running executable.
    ///
    /// # Errors
    ///
    /// `Io` if the current executable cannot be determined.
    pub fn for_current_exe(launcher: impl Into<String>) -> Result<Self> {
        let exe = std::env::current_exe().map_err(|e| TrustError::io("current executable", e))?;
        Ok(Self::new(launcher, exe))
    }
}

#[async_trait]
impl PrivilegeBroker for HelperBroker {
    async fn open(&self) -> Result<Box<dyn ElevatedSession>> {
        info!(launcher = %self.launcher, exe = %self.exe.display(), "starting privileged helper");
        let mut child = Command::new(&self.launcher)
            .arg(&self.exe)
            .arg("helper")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    TrustError::tool_missing(&self.launcher)
                } else {
                    TrustError::io(&self.launcher, e)
                }
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| TrustError::Protocol("helper stdin unavailable".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| TrustError::Protocol("helper stdout unavailable".into()))?;

        let mut session = HelperSession {
            child,
            stdin,
            lines: BufReader::new(stdout).lines(),
        };

        // the helper only speaks after authentication succeeded
        match session.read_response().await? {
            HelperResponse::Ready { version, pid } if version == PROTOCOL_VERSION => {
                debug!(pid, "privileged helper ready");
                Ok(Box::new(session))
            }
            HelperResponse::Ready { version, .. } => Err(TrustError::Protocol(format!(
                "helper speaks protocol {version}, expected {PROTOCOL_VERSION}"
            ))),
            other => Err(TrustError::Protocol(format!(
                "expected ready from helper, got {other:?}"
            ))),
        }
    }
}

struct HelperSession {
    child: Child,
    stdin: ChildStdin,
    lines: Lines<BufReader<ChildStdout>>,
}

impl HelperSession {
    async fn read_response(&mut self) -> Result<HelperResponse> {
        let line = self
            .lines
            .next_line()
            .await
            .map_err(|e| TrustError::io("privileged helper stdout", e))?;
        match line {
            Some(line) => decode_line(&line),
            None => Err(self.exit_error().await),
        }
    }

    /// Classify an unexpected helper exit.
    async fn exit_error(&mut self) -> TrustError {
        match self.child.wait().await {
            Ok(status) => match status.code() {
                Some(code) if AUTH_REFUSED_CODES.contains(&code) => TrustError::AuthDenied(format!(
                    "privilege launcher exited with status {code}"
                )),
                Some(code) => TrustError::Protocol(format!("helper exited with status {code}")),
                None => TrustError::Protocol("helper killed by signal".into()),
            },
            Err(e) => TrustError::io("privileged helper", e),
        }
    }
}

#[async_trait]
impl ElevatedSession for HelperSession {
    async fn call(&mut self, request: HelperRequest) -> Result<HelperResponse> {
        let line = encode_line(&request)?;
        if let Err(e) = self.stdin.write_all(line.as_bytes()).await {
            warn!(op = request.name(), error = %e, "helper stdin closed");
            return Err(self.exit_error().await);
        }
        self.stdin
            .flush()
            .await
            .map_err(|e| TrustError::io("privileged helper stdin", e))?;
        self.read_response().await
    }

    async fn close(self: Box<Self>) -> Result<()> {
        let Self {
            mut child, stdin, ..
        } = *self;
        // closing stdin ends the helper loop
        drop(stdin);
        let status = child
            .wait()
            .await
            .map_err(|e| TrustError::io("privileged helper", e))?;
        debug!(status = %status, "privileged helper exited");
        Ok(())
    }
}

/// Helper side: announce readiness, then answer requests until EOF.
///
/// # Errors
///
/// `Io` if the streams fail, `Json` if a response cannot be encoded.
pub async fn serve<R, W>(executor: &OpExecutor, reader: R, mut writer: W) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let ready = HelperResponse::Ready {
        version: PROTOCOL_VERSION,
        pid: std::process::id(),
    };
    write_message(&mut writer, &ready).await?;

    let mut lines = reader.lines();
    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| TrustError::io("helper stdin", e))?
    {
        if line.trim().is_empty() {
            continue;
        }
        let response = match decode_line::<HelperRequest>(&line) {
            Ok(request) => {
                debug!(op = request.name(), "helper request");
                executor.execute(request).await
            }
            Err(e) => HelperResponse::failed(e),
        };
        write_message(&mut writer, &response).await?;
    }
    Ok(())
}

/// Run the helper loop on this process's stdin/stdout.
///
/// # Errors
///
/// See [`serve`].
pub async fn serve_stdio(executor: &OpExecutor) -> Result<()> {
    serve(executor, BufReader::new(tokio::io::stdin()), tokio::io::stdout()).await
}

async fn write_message<W: AsyncWrite + Unpin>(writer: &mut W, message: &HelperResponse) -> Result<()> {
    let line = encode_line(message)?;
    writer
        .write_all(line.as_bytes())
        .await
        .map_err(|e| TrustError::io("helper stdout", e))?;
    writer
        .flush()
        .await
        .map_err(|e| TrustError::io("helper stdout", e))
}
