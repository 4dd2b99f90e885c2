// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Process entry point for `turnbridge`.
//!
//! The bridge has no CLI surface beyond its stdio wire (see `spec.md` §6):
//! it reads outer requests from stdin, writes outer responses and
//! notifications to stdout, and spawns/supervises the inner agent
//! subprocess. Logging therefore never touches stdout — only stderr, and
//! only when `RUST_LOG` is set — so it can never be mistaken for wire
//! traffic by whatever parses our stdout.

use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();

    let exit_code = turnbridge_core::run_stdio().await?;
    std::process::exit(exit_code);
}

/// Stderr-only tracing setup. Silent unless `RUST_LOG` is set, matching
/// `sven`'s rule that a machine-readable output channel must never be
/// polluted by log lines.
fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("off"));
    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_ansi(false).with_writer(std::io::stderr))
        .with(filter)
        .try_init();
}
