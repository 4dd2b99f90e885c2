// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! The bridge session (`spec.md` §3 "Bridge session", §5, §9).
//!
//! A single owning value holding the agent handle, the correlator, the
//! model registry, turn/thread state, and the diff accumulator — no
//! implicit process-wide globals, per the §9 design note. Also hosts the
//! run loop that drives the three concurrent readers (parent stdin,
//! agent stdout, agent stderr) plus process-level signal handling with
//! `tokio::select!`.
//!
//! Grounded on `sven_node::control::service::ControlService`'s
//! single-struct-owns-everything shape and its `tokio::select!`-based
//! event loop over command/event channels, adapted from an mpsc/broadcast
//! pair to direct line readers over child process pipes.

use crate::correlator::Correlator;
use crate::diff::DiffAccumulator;
use crate::error::BridgeError;
use crate::inner::{InnerCommand, InnerLine};
use crate::registry::ModelRegistry;
use crate::router;
use crate::supervisor::{AgentIoEvent, AgentSupervisor};
use crate::translator::translate;
use crate::turn::TurnState;
use crate::wire::{self, InboundMessage, OuterError, WireWriter};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, error, info, warn};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(3);
const DEFAULT_MODEL_COMPOSITE: &str = "anthropic/claude-sonnet-4-20250514";
const DEFAULT_PROVIDER: &str = "anthropic";

pub struct BridgeSession {
    pub supervisor: AgentSupervisor,
    pub agent: Option<crate::supervisor::AgentHandle>,
    pub correlator: Correlator,
    pub registry: ModelRegistry,
    pub turn: TurnState,
    pub diffs: DiffAccumulator,
    pub http: reqwest::Client,
    agent_io_tx: UnboundedSender<AgentIoEvent>,
}

impl BridgeSession {
    /// Builds a session along with the receiving end of its agent I/O
    /// channel — the caller (the run loop) owns the receiver directly so it
    /// can `select!` over it without borrowing through `self` (§9).
    pub fn new(cwd: std::path::PathBuf) -> (Self, UnboundedReceiver<AgentIoEvent>) {
        let (agent_io_tx, agent_io_rx) = mpsc::unbounded_channel();
        let session = Self {
            supervisor: AgentSupervisor::new(cwd.clone()),
            agent: None,
            correlator: Correlator::new(),
            registry: ModelRegistry::new(),
            turn: TurnState::new(cwd, DEFAULT_MODEL_COMPOSITE, DEFAULT_PROVIDER),
            diffs: DiffAccumulator::new(),
            http: reqwest::Client::new(),
            agent_io_tx,
        };
        (session, agent_io_rx)
    }

    /// Ensures a live agent handle, respawning once on failure before
    /// giving up (§4.2, §7 "Agent unavailable").
    pub async fn ensure_agent(&mut self) -> Result<(), BridgeError> {
        if let Some(handle) = self.agent.as_mut() {
            if matches!(handle.try_wait(), Ok(Some(_))) {
                warn!("agent subprocess exited, clearing handle");
                self.correlator.reject_all("agent exited");
                self.agent = None;
            }
        }
        if self.agent.is_some() {
            return Ok(());
        }

        match self.supervisor.spawn(self.agent_io_tx.clone()).await {
            Ok(handle) => {
                self.agent = Some(handle);
                Ok(())
            }
            Err(first_err) => {
                warn!(error = %first_err, "agent spawn failed, retrying once");
                match self.supervisor.spawn(self.agent_io_tx.clone()).await {
                    Ok(handle) => {
                        self.agent = Some(handle);
                        Ok(())
                    }
                    Err(second_err) => Err(BridgeError::AgentUnavailable(second_err.to_string())),
                }
            }
        }
    }

    /// Sends a command and awaits its correlated response.
    pub async fn send_command(&mut self, cmd: InnerCommand) -> Result<serde_json::Value, BridgeError> {
        self.ensure_agent().await?;
        let (id, rx) = self.correlator.register(cmd.tag());
        let line = cmd.to_wire_line(&id);
        self.agent
            .as_mut()
            .expect("ensure_agent guarantees a handle")
            .write_line(&line)
            .await?;
        match rx.await {
            Ok(Ok(data)) => Ok(data),
            Ok(Err(message)) => Err(BridgeError::AgentProtocol(message)),
            Err(_) => Err(BridgeError::AgentUnavailable("agent closed before responding".to_string())),
        }
    }

    /// Sends a command without awaiting its completion — used for `prompt`
    /// (translator events carry the turn to completion, not a correlated
    /// response) and `new_session` (best-effort, errors swallowed by the
    /// caller per §9).
    pub async fn send_command_fire_and_forget(&mut self, cmd: InnerCommand) -> Result<(), BridgeError> {
        self.ensure_agent().await?;
        let (id, _rx) = self.correlator.register(cmd.tag());
        let line = cmd.to_wire_line(&id);
        self.agent
            .as_mut()
            .expect("ensure_agent guarantees a handle")
            .write_line(&line)
            .await?;
        Ok(())
    }
}

/// Runs the bridge to completion: reads outer requests from stdin, writes
/// responses/notifications to stdout, and drives the agent subprocess.
/// Returns the process exit code (§6 "Exit code 0 on clean stdin-close;
/// non-zero on unrecoverable I/O failure").
pub async fn run_stdio() -> anyhow::Result<i32> {
    let cwd = std::env::current_dir()?;
    let (mut session, mut agent_io_rx) = BridgeSession::new(cwd);
    let mut writer = WireWriter::new(tokio::io::stdout());
    let mut stdin_lines = BufReader::new(tokio::io::stdin()).lines();

    info!("turnbridge starting");

    loop {
        tokio::select! {
            biased;

            _ = tokio::signal::ctrl_c() => {
                info!("received interrupt signal, shutting down");
                break;
            }

            _ = wait_for_terminate_signal() => {
                info!("received terminate signal, shutting down");
                break;
            }

            stdin_line = stdin_lines.next_line() => {
                match stdin_line {
                    Ok(Some(line)) => {
                        if let Err(e) = handle_stdin_line(&line, &mut session, &mut writer).await {
                            error!(error = %e, "fatal I/O error handling stdin line");
                            break;
                        }
                    }
                    Ok(None) => {
                        info!("stdin closed, shutting down");
                        break;
                    }
                    Err(e) => {
                        error!(error = %e, "fatal error reading stdin");
                        break;
                    }
                }
            }

            io_event = agent_io_rx.recv() => {
                match io_event {
                    Some(AgentIoEvent::Stdout(line)) => handle_agent_line(&line, &mut session, &mut writer).await,
                    Some(AgentIoEvent::Stderr(line)) => debug!(target: "agent", "{line}"),
                    Some(AgentIoEvent::Closed) => {
                        warn!("agent stdout closed");
                        session.correlator.reject_all("agent exited");
                        session.agent = None;
                        session.turn.error_turn();
                    }
                    None => {
                        // Sender side only drops with the session itself.
                        std::future::pending::<()>().await;
                    }
                }
            }
        }
    }

    if let Some(handle) = session.agent.as_mut() {
        handle.terminate(SHUTDOWN_GRACE).await;
    }
    info!("turnbridge exiting");
    Ok(0)
}

/// Awaits SIGTERM on unix; never resolves on platforms without it, so the
/// `ctrl_c` branch remains the only signal-driven shutdown path there
/// (§5 "Process-level SIGINT/SIGTERM terminate the child and exit").
#[cfg(unix)]
async fn wait_for_terminate_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut sig) => {
            sig.recv().await;
        }
        Err(e) => {
            warn!(error = %e, "failed to install SIGTERM handler");
            std::future::pending::<()>().await
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_terminate_signal() {
    std::future::pending::<()>().await
}

async fn handle_stdin_line(line: &str, session: &mut BridgeSession, writer: &mut WireWriter<tokio::io::Stdout>) -> std::io::Result<()> {
    let parsed = match wire::decode_line(line) {
        Ok(Some(msg)) => msg,
        Ok(None) => return Ok(()),
        Err(e) => {
            wire::log_decode_failure(line, &e);
            return Ok(());
        }
    };

    match parsed {
        InboundMessage::Request { id, method, params } => {
            match router::dispatch(&method, params, session).await {
                Ok(result) => writer.write_response_ok(id, result).await,
                Err(e) => {
                    writer
                        .write_response_err(
                            id,
                            OuterError {
                                code: e.code(),
                                message: e.to_string(),
                            },
                        )
                        .await
                }
            }
        }
        InboundMessage::Response { .. } => {
            debug!("ignoring unexpected outer-shaped response on stdin");
            Ok(())
        }
        InboundMessage::Notification { method, .. } => {
            debug!(method, "ignoring inbound notification on stdin");
            Ok(())
        }
    }
}

async fn handle_agent_line(line: &str, session: &mut BridgeSession, writer: &mut WireWriter<tokio::io::Stdout>) {
    let parsed = match crate::inner::decode_line(line) {
        Ok(Some(p)) => p,
        Ok(None) => return,
        Err(e) => {
            debug!(line, error = %e, "dropping malformed inner line");
            return;
        }
    };

    match parsed {
        InnerLine::Response(resp) => {
            if !session.correlator.fulfil(&resp.id, resp.success, resp.data, resp.error) {
                debug!(id = %resp.id, "unmatched inner response");
            }
        }
        InnerLine::Event(event) => {
            let notifications = translate(event, &mut session.turn, &mut session.diffs);
            for n in notifications {
                if let Err(e) = writer.write_notification(&n.method, n.params).await {
                    error!(error = %e, "failed writing outer notification");
                }
            }
        }
    }
}
