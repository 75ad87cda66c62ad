use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::cgi::{CgiError, CgiInvocation, CgiOutput, parse_cgi_output};

/// Upper bound on what a script may print before it is cut off.
const MAX_CGI_OUTPUT: u64 = 16 * 1024 * 1024;

/// Runs CGI children.
///
/// The lifecycle of one run is spawn, write stdin, read stdout, parse. The
/// body is written and stdin closed while stdout is drained concurrently,
/// so neither pipe can fill up and stall the other. Whatever happens the
/// child has exited and been waited for when [`execute`](Self::execute)
/// returns.
#[derive(Debug, Clone)]
pub struct CgiExecutor {
    timeout: Duration,
}

impl CgiExecutor {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub async fn execute(&self, inv: &CgiInvocation, body: &[u8]) -> Result<CgiOutput, CgiError> {
        let mut command = match &inv.interpreter {
            Some(interpreter) => {
                let mut c = Command::new(interpreter);
                c.arg(&inv.script);
                c
            }
            None => Command::new(&inv.script),
        };
        command
            .env_clear()
            .envs(&inv.env)
            .current_dir(&inv.working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(CgiError::Spawn)?;
        debug!(script = %inv.script.display(), pid = ?child.id(), "CGI spawned");

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| CgiError::Io(std::io::Error::other("child stdin not captured")))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| CgiError::Io(std::io::Error::other("child stdout not captured")))?;

        let run = async {
            let write = async move {
                let res = stdin.write_all(body).await;
                drop(stdin);
                match res {
                    // the script is free to exit without reading its input
                    Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => Ok(()),
                    other => other,
                }
            };
            let read = async {
                let mut out = Vec::new();
                stdout.take(MAX_CGI_OUTPUT + 1).read_to_end(&mut out).await?;
                Ok::<_, std::io::Error>(out)
            };

            let (written, output) = tokio::join!(write, read);
            written?;
            let output = output?;
            if output.len() as u64 > MAX_CGI_OUTPUT {
                return Err(CgiError::Protocol("output too large".to_string()));
            }

            let status = child.wait().await?;
            Ok((status, output))
        };

        let result = timeout(self.timeout, run).await;
        let (status, output) = match result {
            Ok(Ok(done)) => done,
            Ok(Err(e)) => {
                reap(&mut child).await;
                return Err(e);
            }
            Err(_) => {
                warn!(script = %inv.script.display(), "CGI timed out, killing");
                reap(&mut child).await;
                return Err(CgiError::Timeout);
            }
        };

        if !status.success() {
            debug!(script = %inv.script.display(), %status, "CGI exited unsuccessfully");
        }
        parse_cgi_output(&output)
    }
}

/// Kills the child and collects its exit status.
async fn reap(child: &mut tokio::process::Child) {
    // kill() waits after signalling
    if let Err(e) = child.kill().await {
        debug!(error = %e, "CGI child already gone");
    }
}
