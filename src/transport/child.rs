//! Editor child process.
//!
//! The editor runs with `--embed` and speaks msgpack-RPC over its stdin and
//! stdout. Its stderr is not part of the protocol; lines written there are
//! forwarded to the log.

use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};

use crate::config::SessionConfig;
use crate::error::{Result, VimwireError};

/// A spawned editor with its protocol pipes split off.
#[derive(Debug)]
pub struct ChildTransport {
    pub child: Child,
    pub stdin: ChildStdin,
    pub stdout: ChildStdout,
}

impl ChildTransport {
    /// Spawn the editor described by `config`.
    ///
    /// The process is killed if the returned [`Child`] is dropped.
    pub fn spawn(config: &SessionConfig) -> Result<Self> {
        let args = config.command_args();
        tracing::info!("Spawning editor {:?} {:?}", config.program, args);

        let mut child = Command::new(&config.program)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stdin = child.stdin.take().ok_or_else(|| missing_pipe("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| missing_pipe("stdout"))?;

        if let Some(stderr) = child.stderr.take() {
            let pid = child.id();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                loop {
                    match lines.next_line().await {
                        Ok(Some(line)) => {
                            let trimmed = line.trim();
                            if !trimmed.is_empty() {
                                tracing::warn!("editor [{:?}] stderr: {}", pid, trimmed);
                            }
                        }
                        Ok(None) => break,
                        Err(e) => {
                            tracing::debug!("Stopped reading editor stderr: {}", e);
                            break;
                        }
                    }
                }
            });
        }

        Ok(Self {
            child,
            stdin,
            stdout,
        })
    }
}

fn missing_pipe(name: &str) -> VimwireError {
    VimwireError::Io(std::io::Error::other(format!(
        "failed to capture editor {}",
        name
    )))
}
