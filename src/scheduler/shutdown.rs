//! Graceful shutdown.
//!
//! ```text
//! Running ──request──▶ ShuttingDown ──active set empty──▶ Drained ──▶ Terminated
//! ```
//!
//! Once `ShuttingDown` begins the scheduler claims nothing new but keeps
//! heartbeating and reaping its jobs until none remain.

use std::fmt;

use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Lifecycle of one scheduler instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ShutdownState {
    /// Claiming and processing normally.
    Running,
    /// Drain requested; no new claims.
    ShuttingDown,
    /// No active jobs remain.
    Drained,
    /// Leftover tasks cancelled; the loop has exited.
    Terminated,
}

impl ShutdownState {
    /// Whether new claims are allowed.
    pub fn accepts_new_jobs(self) -> bool {
        self == ShutdownState::Running
    }

    /// Whether a drain has been requested.
    pub fn is_draining(self) -> bool {
        self >= ShutdownState::ShuttingDown
    }

    /// Next state after a shutdown request. Later states are sticky.
    pub fn on_request(self) -> Self {
        match self {
            ShutdownState::Running => ShutdownState::ShuttingDown,
            other => other,
        }
    }

    /// Next state after observing `active` running jobs.
    pub fn on_active_count(self, active: usize) -> Self {
        match self {
            ShutdownState::ShuttingDown if active == 0 => ShutdownState::Drained,
            other => other,
        }
    }
}

impl fmt::Display for ShutdownState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownState::Running => write!(f, "running"),
            ShutdownState::ShuttingDown => write!(f, "shutting_down"),
            ShutdownState::Drained => write!(f, "drained"),
            ShutdownState::Terminated => write!(f, "terminated"),
        }
    }
}

/// Cancels `token` on the first SIGTERM or SIGINT.
pub fn install_shutdown_handler(token: CancellationToken) {
    tokio::spawn(async move {
        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(term), Ok(int)) => (term, int),
                (Err(e), _) | (_, Err(e)) => {
                    warn!(error = %e, "Failed to install signal handlers");
                    return;
                }
            };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM, initiating graceful shutdown");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT, initiating graceful shutdown");
            }
            _ = token.cancelled() => return,
        }

        token.cancel();
    });
}
