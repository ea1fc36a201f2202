//! TCP listener: accepts connections and runs each one on its own task.
//!
//! Connections share nothing but the receive directories. Each task returns
//! its outcome to the accept loop, which keeps running totals. On shutdown the
//! loop stops accepting, gives in-flight connections a grace period, and
//! aborts whatever is still running.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::transfer::{Receiver, Verdict};

/// Per-connection outcomes since the listener started.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ServerStats {
    pub verified: u64,
    pub rejected: u64,
    /// Connections that ended without a verdict.
    pub aborted: u64,
}

impl ServerStats {
    fn record(&mut self, outcome: Option<Verdict>) {
        match outcome {
            Some(Verdict::Verified) => self.verified += 1,
            Some(Verdict::NotVerified) => self.rejected += 1,
            None => self.aborted += 1,
        }
    }
}

/// Accept connections on `listener` until `shutdown` resolves.
pub async fn run<F>(
    listener: TcpListener,
    receiver: Arc<Receiver>,
    shutdown: F,
    grace: Duration,
) -> ServerStats
where
    F: Future<Output = ()>,
{
    let mut stats = ServerStats::default();
    let mut tasks: JoinSet<Option<Verdict>> = JoinSet::new();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            () = &mut shutdown => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    info!(%peer, "Client connected");
                    let receiver = Arc::clone(&receiver);
                    tasks.spawn(async move { serve_connection(stream, peer, &receiver).await });
                }
                Err(e) => error!("Failed to accept connection: {e}"),
            },
            Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                stats.record(joined.unwrap_or(None));
            }
        }
    }

    info!(in_flight = tasks.len(), "Listener stopped");
    let drain = async {
        while let Some(joined) = tasks.join_next().await {
            stats.record(joined.unwrap_or(None));
        }
    };
    if tokio::time::timeout(grace, drain).await.is_err() {
        warn!(remaining = tasks.len(), "Aborting connections still in progress");
        tasks.abort_all();
        // Cancelled tasks join with an error and count as aborted.
        while let Some(joined) = tasks.join_next().await {
            stats.record(joined.unwrap_or(None));
        }
    }

    info!(
        verified = stats.verified,
        rejected = stats.rejected,
        aborted = stats.aborted,
        "Server stopped"
    );
    stats
}

async fn serve_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    receiver: &Receiver,
) -> Option<Verdict> {
    let outcome = receiver
        .handle(&mut stream)
        .await
        .ok()
        .map(|result| result.verdict());
    match outcome {
        Some(verdict) => info!(%peer, %verdict, "Client disconnected"),
        None => info!(%peer, "Client disconnected without verdict"),
    }
    outcome
}
