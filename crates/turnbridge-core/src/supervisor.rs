// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Agent supervisor (`spec.md` §4.2).
//!
//! Locates, spawns, and owns the child agent subprocess: three pipes
//! (stdin for commands, stdout for events/responses, stderr for
//! diagnostics), a whitelisted credential environment, and signal
//! forwarding with a grace period before force-kill.
//!
//! Grounded on `sven_tools::builtin::shell::ShellTool::execute`'s
//! `tokio::process::Command` setup (`Stdio` wiring, `kill_on_drop(true)`,
//! unix `pre_exec`/`setsid`), adapted from a one-shot timed command to a
//! long-lived piped child whose stdout/stderr are read continuously.

use crate::error::BridgeError;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{info, warn};

/// A line read from the agent subprocess, or notice that its output pipes
/// closed. Forwarded from two background reader tasks into one channel so
/// the run loop never borrows the same handle from two futures at once —
/// the reader tasks "only route, they never block" (`spec.md` §9).
#[derive(Debug, Clone)]
pub enum AgentIoEvent {
    Stdout(String),
    Stderr(String),
    Closed,
}

/// Environment variables forwarded unchanged to the child. The bridge
/// itself never reads these; the agent consumes them for provider auth.
const CREDENTIAL_ENV_WHITELIST: &[&str] = &[
    "ANTHROPIC_API_KEY",
    "OPENAI_API_KEY",
    "GOOGLE_API_KEY",
    "GEMINI_API_KEY",
    "MISTRAL_API_KEY",
];

const BINARY_OVERRIDE_ENV: &str = "TURNBRIDGE_AGENT_BIN";
const MONOREPO_BUILD_ENV: &str = "TURNBRIDGE_AGENT_MONOREPO_BUILD";
const DEFAULT_BINARY_NAME: &str = "agent";

pub struct AgentSupervisor {
    cwd: PathBuf,
}

impl AgentSupervisor {
    pub fn new(cwd: PathBuf) -> Self {
        Self { cwd }
    }

    pub fn set_cwd(&mut self, cwd: PathBuf) {
        self.cwd = cwd;
    }

    /// Locates the agent executable: explicit override, then a discovered
    /// monorepo build artifact, then a name on `PATH` (§4.2).
    pub fn locate_binary(&self) -> Result<PathBuf, BridgeError> {
        if let Ok(explicit) = std::env::var(BINARY_OVERRIDE_ENV) {
            let path = PathBuf::from(explicit);
            if path.is_file() {
                return Ok(path);
            }
            return Err(BridgeError::AgentUnavailable(format!(
                "{BINARY_OVERRIDE_ENV} points at a nonexistent file: {}",
                path.display()
            )));
        }

        if let Ok(monorepo) = std::env::var(MONOREPO_BUILD_ENV) {
            let candidate = Path::new(&monorepo)
                .join("target")
                .join("release")
                .join(DEFAULT_BINARY_NAME);
            if candidate.is_file() {
                return Ok(candidate);
            }
        }

        if let Some(found) = search_path(DEFAULT_BINARY_NAME) {
            return Ok(found);
        }

        Err(BridgeError::AgentUnavailable(format!(
            "no agent binary found (checked {BINARY_OVERRIDE_ENV}, {MONOREPO_BUILD_ENV}, PATH)"
        )))
    }

    /// Spawns the agent, wiring three pipes and a whitelisted credential
    /// environment, with the bridge's current working directory. Stdout and
    /// stderr are drained by two background tasks that forward each line
    /// through `io_tx`.
    pub async fn spawn(&self, io_tx: UnboundedSender<AgentIoEvent>) -> Result<AgentHandle, BridgeError> {
        let binary = self.locate_binary()?;
        let mut cmd = Command::new(&binary);
        cmd.current_dir(&self.cwd);
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);
        for key in CREDENTIAL_ENV_WHITELIST {
            if let Ok(val) = std::env::var(key) {
                cmd.env(key, val);
            }
        }

        #[cfg(unix)]
        unsafe {
            cmd.pre_exec(|| {
                libc::setsid();
                Ok(())
            });
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| BridgeError::AgentUnavailable(format!("failed to spawn {}: {e}", binary.display())))?;

        let stdin = child.stdin.take().expect("child spawned with piped stdin");
        let stdout = child.stdout.take().expect("child spawned with piped stdout");
        let stderr = child.stderr.take().expect("child spawned with piped stderr");

        info!(binary = %binary.display(), "spawned agent subprocess");

        let stdout_tx = io_tx.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if stdout_tx.send(AgentIoEvent::Stdout(line)).is_err() {
                            break;
                        }
                    }
                    Ok(None) => {
                        let _ = stdout_tx.send(AgentIoEvent::Closed);
                        break;
                    }
                    Err(e) => {
                        warn!(error = %e, "error reading agent stdout");
                        let _ = stdout_tx.send(AgentIoEvent::Closed);
                        break;
                    }
                }
            }
        });

        let stderr_tx = io_tx;
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if stderr_tx.send(AgentIoEvent::Stderr(line)).is_err() {
                    break;
                }
            }
        });

        Ok(AgentHandle { child, stdin })
    }
}

#[cfg(unix)]
use std::os::unix::process::CommandExt;

fn search_path(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var).find_map(|dir| {
        let candidate = dir.join(name);
        candidate.is_file().then_some(candidate)
    })
}

/// An owned, live agent subprocess. Command writes go through `stdin`
/// here; stdout/stderr are drained by the background tasks spawned
/// alongside this handle and arrive as `AgentIoEvent`s instead.
pub struct AgentHandle {
    child: Child,
    stdin: ChildStdin,
}

impl AgentHandle {
    pub async fn write_line(&mut self, line: &str) -> std::io::Result<()> {
        self.stdin.write_all(line.as_bytes()).await?;
        self.stdin.flush().await
    }

    /// Non-blocking liveness check; `Ok(Some(_))` means the child has
    /// already exited.
    pub fn try_wait(&mut self) -> std::io::Result<Option<std::process::ExitStatus>> {
        self.child.try_wait()
    }

    /// Forwards a termination signal, waits `grace` for clean exit, then
    /// force-kills (§4.2, §5 "Process-level SIGINT/SIGTERM terminate the
    /// child and exit").
    pub async fn terminate(&mut self, grace: Duration) {
        #[cfg(unix)]
        {
            if let Some(pid) = self.child.id() {
                unsafe {
                    libc::kill(pid as i32, libc::SIGTERM);
                }
            }
        }
        #[cfg(not(unix))]
        {
            let _ = self.child.start_kill();
        }

        if tokio::time::timeout(grace, self.child.wait()).await.is_err() {
            warn!("agent did not exit within grace period, force-killing");
            let _ = self.child.start_kill();
            let _ = self.child.wait().await;
        }
    }
}
