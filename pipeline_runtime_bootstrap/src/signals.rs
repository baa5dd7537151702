// /////////////////////////////////////////////////////////////////////////////
// Pipeline Runtime
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Signal Handling
//!
//! Listens for `SIGINT`/`SIGTERM` (and `SIGHUP` on Unix) and initiates
//! graceful shutdown through a [`ShutdownCoordinator`]. `SIGHUP` has no
//! configuration-reload semantics here (no process stays up long enough to
//! reload), so it's treated the same as `SIGTERM`.

use crate::shutdown::ShutdownCoordinator;

/// Spawns a task that waits for a termination signal, then calls
/// [`ShutdownCoordinator::initiate_shutdown`]. Returns immediately; the
/// listener runs for the lifetime of the process.
pub fn install(coordinator: ShutdownCoordinator) {
    tokio::spawn(wait_for_signal(coordinator));
}

#[cfg(unix)]
async fn wait_for_signal(coordinator: ShutdownCoordinator) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    let mut sighup = signal(SignalKind::hangup()).expect("failed to install SIGHUP handler");

    let name = tokio::select! {
        _ = sigint.recv() => "SIGINT",
        _ = sigterm.recv() => "SIGTERM",
        _ = sighup.recv() => "SIGHUP",
    };

    tracing::info!(signal = name, "received shutdown signal");
    coordinator.initiate_shutdown();
}

#[cfg(not(unix))]
async fn wait_for_signal(coordinator: ShutdownCoordinator) {
    if tokio::signal::ctrl_c().await.is_ok() {
        tracing::info!(signal = "CTRL_C", "received shutdown signal");
        coordinator.initiate_shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn install_does_not_initiate_shutdown_without_a_signal() {
        let coordinator = ShutdownCoordinator::new(Duration::from_secs(1));
        install(coordinator.clone());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!coordinator.is_shutting_down());
    }
}
