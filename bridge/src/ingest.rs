use crate::broadcast::{BroadcastReport, Broadcaster};
use crate::decode::{decode, DecodeFailure};
use crate::errors::{Error, Result};
use crate::metrics::{
    DECODE_FAILURES_TOTAL, LINES_TOTAL, PERSIST_FAILURES_TOTAL, PORT_RETRIES_TOTAL, RECORDS_TOTAL,
};
use crate::model::TelemetryRecord;
use crate::port::resolve_port;
use crate::registry::Payload;
use crate::serial::{LineSource, ReadOutcome, SourceOpener};
use crate::storage::CsvLog;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestState {
    SelectingPort,
    Opening,
    Running,
    RetryWait,
    Closing,
    Stopped,
}

/// What to do when a record cannot be appended to the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum PersistPolicy {
    /// Report the failure and keep ingesting and broadcasting.
    #[default]
    Continue,
    /// Broadcast the record in flight, then stop ingestion.
    Halt,
}

#[derive(Debug)]
pub enum LineOutcome {
    Rejected(DecodeFailure),
    Published {
        record: TelemetryRecord,
        persisted: bool,
        report: BroadcastReport,
    },
}

/// Decode, persist and broadcast, in that order, for one line at a time.
#[derive(Debug, Clone)]
pub struct Pipeline {
    log: CsvLog,
    broadcaster: Broadcaster,
    policy: PersistPolicy,
}

impl Pipeline {
    pub fn new(log: CsvLog, broadcaster: Broadcaster, policy: PersistPolicy) -> Self {
        Self {
            log,
            broadcaster,
            policy,
        }
    }

    pub fn log(&self) -> &CsvLog {
        &self.log
    }

    /// Handles one raw line. Only a persistence failure under
    /// [`PersistPolicy::Halt`] is returned as an error.
    pub async fn process_line(&self, line: &[u8]) -> Result<LineOutcome> {
        LINES_TOTAL.inc();

        match decode(line) {
            Ok(record) => {
                RECORDS_TOTAL.inc();
                self.publish(record).await
            }
            Err(failure) => {
                DECODE_FAILURES_TOTAL.inc();
                warn!("[PARSE] {}", failure);
                Ok(LineOutcome::Rejected(failure))
            }
        }
    }

    pub async fn publish(&self, record: TelemetryRecord) -> Result<LineOutcome> {
        let persist_error = self.append(&record).await.err();
        if let Some(e) = &persist_error {
            PERSIST_FAILURES_TOTAL.inc();
            error!("Failed to append to {}: {}", self.log.path().display(), e);
        }

        let payload: Payload = Arc::from(serde_json::to_string(&record)?);
        let report = self.broadcaster.broadcast(payload);
        debug!(
            "Broadcast to {}/{} subscriber(s), {} removed",
            report.delivered, report.attempted, report.removed
        );

        match persist_error {
            Some(e) if self.policy == PersistPolicy::Halt => Err(e),
            persist_error => Ok(LineOutcome::Published {
                record,
                persisted: persist_error.is_none(),
                report,
            }),
        }
    }

    /// File writes run on the blocking pool, like serial reads.
    async fn append(&self, record: &TelemetryRecord) -> Result<()> {
        let log = self.log.clone();
        let record = record.clone();
        tokio::task::spawn_blocking(move || log.append(&record))
            .await
            .map_err(|e| Error::PersistenceFailed(std::io::Error::other(e)))?
    }
}

#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Explicit device; `None` or empty means auto-select.
    pub port: Option<String>,
    pub retry_delay: Duration,
    pub idle_delay: Duration,
}

/// The long-running task: select a port, open it, pump lines through the
/// pipeline until cancelled, retrying after recoverable device failures.
pub struct Ingestor<O: SourceOpener> {
    opener: O,
    config: IngestConfig,
    pipeline: Pipeline,
    state: watch::Sender<IngestState>,
}

impl<O: SourceOpener> Ingestor<O> {
    pub fn new(opener: O, config: IngestConfig, pipeline: Pipeline) -> Self {
        let (state, _) = watch::channel(IngestState::SelectingPort);
        Self {
            opener,
            config,
            pipeline,
            state,
        }
    }

    pub fn state(&self) -> watch::Receiver<IngestState> {
        self.state.subscribe()
    }

    /// Runs until `token` is cancelled (returns `Ok`) or a non-recoverable
    /// error occurs. Always ends in [`IngestState::Stopped`].
    pub async fn run(self, token: CancellationToken) -> Result<()> {
        let log = self.pipeline.log().clone();
        let prepared = tokio::task::spawn_blocking(move || log.ensure_header())
            .await
            .map_err(|e| Error::PersistenceFailed(std::io::Error::other(e)))
            .and_then(|result| result);
        if let Err(e) = prepared {
            error!("Cannot prepare {}: {}", self.pipeline.log().path().display(), e);
        }

        let result = self.run_until_cancelled(&token).await;
        self.set_state(IngestState::Stopped);
        match &result {
            Ok(()) => info!("Ingestion stopped"),
            Err(e) => error!("Ingestion halted: {}", e),
        }
        result
    }

    async fn run_until_cancelled(&self, token: &CancellationToken) -> Result<()> {
        while !token.is_cancelled() {
            self.set_state(IngestState::SelectingPort);
            let port = match resolve_port(self.config.port.as_deref(), || {
                self.opener.available_ports()
            }) {
                Ok(port) => port,
                Err(e) if e.is_recoverable() => {
                    warn!("{}. Set SERIAL_PORT or attach a device", e);
                    self.retry_wait(token).await;
                    continue;
                }
                Err(e) => return Err(e),
            };

            self.set_state(IngestState::Opening);
            let source = match self.opener.open(&port) {
                Ok(source) => source,
                Err(e) if e.is_recoverable() => {
                    warn!("{}", e);
                    self.retry_wait(token).await;
                    continue;
                }
                Err(e) => return Err(e),
            };

            self.set_state(IngestState::Running);
            match self.run_session(source, token).await {
                Ok(()) => {}
                Err(e) if e.is_recoverable() => {
                    warn!("Lost serial {}: {}", port, e);
                    self.retry_wait(token).await;
                }
                Err(e) => return Err(e),
            }
        }

        Ok(())
    }

    /// Pumps lines until cancellation or a read error. The source is dropped,
    /// and so closed, on every exit path.
    async fn run_session(&self, mut source: O::Source, token: &CancellationToken) -> Result<()> {
        while !token.is_cancelled() {
            let (returned, outcome) = tokio::task::spawn_blocking(move || {
                let outcome = source.next_line();
                (source, outcome)
            })
            .await
            .map_err(|e| Error::SerialRead(std::io::Error::other(e)))?;
            source = returned;

            match outcome? {
                ReadOutcome::Idle => {
                    tokio::select! {
                        _ = tokio::time::sleep(self.config.idle_delay) => {}
                        _ = token.cancelled() => {}
                    }
                }
                ReadOutcome::Line(line) => {
                    self.pipeline.process_line(&line).await?;
                }
            }
        }

        self.set_state(IngestState::Closing);
        info!("Closing serial {}", source.name());
        drop(source);
        Ok(())
    }

    async fn retry_wait(&self, token: &CancellationToken) {
        self.set_state(IngestState::RetryWait);
        PORT_RETRIES_TOTAL.inc();
        debug!("Retrying in {:?}", self.config.retry_delay);

        tokio::select! {
            _ = tokio::time::sleep(self.config.retry_delay) => {}
            _ = token.cancelled() => {}
        }
    }

    fn set_state(&self, next: IngestState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            info!("Ingestion {:?} -> {:?}", previous, next);
        }
    }
}
