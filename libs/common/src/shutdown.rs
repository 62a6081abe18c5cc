//! Process signal handling

use std::fmt;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Signal that ended the process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    Interrupt,
    Terminate,
}

impl fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Interrupt => f.write_str("SIGINT"),
            Self::Terminate => f.write_str("SIGTERM"),
        }
    }
}

/// Resolve on Ctrl+C, or on SIGTERM where the platform has it
pub async fn wait_for_shutdown() -> ShutdownSignal {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => tokio::select! {
                _ = tokio::signal::ctrl_c() => ShutdownSignal::Interrupt,
                _ = term.recv() => ShutdownSignal::Terminate,
            },
            Err(e) => {
                warn!("SIGTERM handler unavailable ({}), Ctrl+C only", e);
                interrupt().await
            },
        }
    }
    #[cfg(not(unix))]
    {
        interrupt().await
    }
}

async fn interrupt() -> ShutdownSignal {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Ctrl+C handler unavailable: {}", e);
        std::future::pending::<()>().await;
    }
    ShutdownSignal::Interrupt
}

/// Cancel `token` on the first shutdown signal
///
/// The listener exits quietly if the token is cancelled elsewhere first. The
/// handle yields the signal that fired, or `None` in that case.
pub fn cancel_on_shutdown(token: CancellationToken) -> JoinHandle<Option<ShutdownSignal>> {
    tokio::spawn(async move {
        tokio::select! {
            signal = wait_for_shutdown() => {
                info!("{} received, stopping", signal);
                token.cancel();
                Some(signal)
            }
            _ = token.cancelled() => None,
        }
    })
}
