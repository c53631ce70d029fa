//! Process supervision: how the ingestion task, the HTTP server and the
//! shutdown signal end the process.

use crate::errors::Result;
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
    /// Shutdown was requested and ingestion had not failed.
    Clean,
    /// Ingestion stopped with an error, for example a halt on a log write failure.
    IngestFailed,
    /// The HTTP server ended on its own.
    ServerFailed,
}

impl Exit {
    pub fn code(self) -> u8 {
        match self {
            Exit::Clean => 0,
            Exit::IngestFailed | Exit::ServerFailed => 1,
        }
    }
}

/// Waits for `shutdown` or for the server to end. Ingestion stopping on its
/// own does not end the process, so `/download` and `/health` stay up; its
/// result decides the exit status. A still running ingestion task is
/// cancelled and given `grace` to reach `Stopped`.
pub async fn supervise<S>(
    mut ingest: JoinHandle<Result<()>>,
    mut server: JoinHandle<()>,
    shutdown: S,
    token: CancellationToken,
    grace: Duration,
) -> Exit
where
    S: Future<Output = ()>,
{
    tokio::pin!(shutdown);
    let mut ingest_failed = None;

    let server_ended = loop {
        tokio::select! {
            joined = &mut ingest, if ingest_failed.is_none() => {
                let failed = match joined {
                    Ok(Ok(())) => false,
                    Ok(Err(e)) => {
                        error!("Ingestion stopped: {}. HTTP stays up", e);
                        true
                    }
                    Err(e) => {
                        error!("Ingestion task panicked: {}", e);
                        true
                    }
                };
                ingest_failed = Some(failed);
            }
            _ = &mut server => {
                error!("HTTP server terminated");
                break true;
            }
            _ = &mut shutdown => {
                info!("Received shutdown signal");
                break false;
            }
        }
    };

    let ingest_failed = match ingest_failed {
        Some(failed) => failed,
        None => {
            token.cancel();
            match tokio::time::timeout(grace, ingest).await {
                Ok(Ok(Ok(()))) => false,
                Ok(Ok(Err(e))) => {
                    error!("Ingestion stopped: {}", e);
                    true
                }
                Ok(Err(e)) => {
                    error!("Ingestion task panicked: {}", e);
                    true
                }
                Err(_) => {
                    warn!("Ingestion did not stop within {:?}", grace);
                    false
                }
            }
        }
    };

    server.abort();

    if server_ended {
        Exit::ServerFailed
    } else if ingest_failed {
        Exit::IngestFailed
    } else {
        Exit::Clean
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::Error;
    use tokio::sync::oneshot;

    const GRACE: Duration = Duration::from_secs(1);

    fn idle_server() -> JoinHandle<()> {
        tokio::spawn(std::future::pending())
    }

    fn signal() -> (oneshot::Sender<()>, impl Future<Output = ()>) {
        let (tx, rx) = oneshot::channel::<()>();
        (tx, async move {
            let _ = rx.await;
        })
    }

    #[tokio::test]
    async fn test_halted_ingestion_keeps_serving_then_exits_nonzero() {
        let token = CancellationToken::new();
        let ingest = tokio::spawn(async {
            Err::<(), _>(Error::PersistenceFailed(std::io::Error::other("disk full")))
        });
        let (stop, shutdown) = signal();

        let supervisor = tokio::spawn(supervise(ingest, idle_server(), shutdown, token, GRACE));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!supervisor.is_finished());

        stop.send(()).unwrap();
        let exit = supervisor.await.unwrap();
        assert_eq!(exit, Exit::IngestFailed);
        assert_eq!(exit.code(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_cancels_running_ingestion() {
        let token = CancellationToken::new();
        let child = token.clone();
        let ingest = tokio::spawn(async move {
            child.cancelled().await;
            Ok::<(), Error>(())
        });
        let (stop, shutdown) = signal();
        stop.send(()).unwrap();

        let exit = supervise(ingest, idle_server(), shutdown, token.clone(), GRACE).await;
        assert_eq!(exit, Exit::Clean);
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn test_server_ending_is_a_failure() {
        let token = CancellationToken::new();
        let child = token.clone();
        let ingest = tokio::spawn(async move {
            child.cancelled().await;
            Ok::<(), Error>(())
        });
        let server = tokio::spawn(async {});

        let exit = supervise(ingest, server, std::future::pending(), token.clone(), GRACE).await;
        assert_eq!(exit, Exit::ServerFailed);
        assert!(token.is_cancelled());
    }
}
