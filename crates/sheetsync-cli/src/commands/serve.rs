//! Serve command implementation.

use crate::dispatch::{execute, parse, Reply};
use crate::server::{start_server, ServerState};
use anyhow::Result;
use sheetsync_core::store::create_store;
use sheetsync_core::{Config, DrainReport, TableSync};
use std::future::Future;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader, Lines, Stdout};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Replies buffered ahead of the stdout writer.
const REPLY_BUFFER: usize = 256;

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

/// Command-line overrides applied on top of the config file.
#[derive(Debug, Default)]
pub struct Overrides {
    pub table_name: Option<String>,
    pub key_spec: Option<String>,
    pub header_row: Option<u32>,
}

impl Overrides {
    fn apply(self, config: &mut Config) {
        if let Some(name) = self.table_name {
            config.store.table_name = name;
        }
        if let Some(spec) = self.key_spec {
            config.table.key_spec = Some(spec);
        }
        if let Some(row) = self.header_row {
            config.table.header_row = row;
        }
    }
}

/// Run the dispatcher until stdin closes or a termination signal arrives,
/// then drain pending writes.
pub async fn run(mut config: Config, overrides: Overrides) -> Result<()> {
    overrides.apply(&mut config);
    config.validate()?;

    info!(
        table_id = %config.store.table_id,
        table = %config.store.table_name,
        backend = ?config.store.backend,
        "Starting sheetsync server"
    );

    let health_port = config.monitoring.health_port;
    let store = create_store(&config.store)?;
    let sync = TableSync::start(config, store).await?;

    if health_port != 0 {
        let server_state = Arc::new(ServerState {
            sync: Arc::clone(&sync),
        });
        tokio::spawn(start_server(
            server_state,
            health_port,
            sync.subscribe_shutdown(),
        ));
    }

    let (reply_tx, reply_rx) = mpsc::channel(REPLY_BUFFER);
    let writer = tokio::spawn(write_replies(reply_rx));

    let lines = BufReader::new(tokio::io::stdin()).lines();
    serve_lines(&sync, lines, reply_tx, shutdown_signal()).await;

    if let Err(e) = writer.await {
        error!(error = %e, "Reply writer failed");
    }

    let report = sync.shutdown().await;
    finish(report)
}

/// Dispatch request lines until input ends or `stop` resolves, then wait
/// for in-flight requests. Store-bound requests run on their own tasks;
/// the rest run inline in arrival order.
async fn serve_lines<R, S>(
    sync: &Arc<TableSync>,
    mut lines: Lines<R>,
    replies: mpsc::Sender<Reply>,
    stop: S,
) where
    R: AsyncBufRead + Unpin,
    S: Future<Output = ()>,
{
    tokio::pin!(stop);
    let mut in_flight = JoinSet::new();

    loop {
        tokio::select! {
            _ = &mut stop => break,
            Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                if let Err(e) = joined {
                    error!(error = %e, "Request task failed");
                }
            }
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    let envelope = match parse(&line) {
                        Ok(envelope) => envelope,
                        Err(reply) => {
                            if replies.send(reply).await.is_err() {
                                break;
                            }
                            continue;
                        }
                    };
                    if envelope.request.is_concurrent() {
                        let sync = Arc::clone(sync);
                        let replies = replies.clone();
                        in_flight.spawn(async move {
                            let reply = execute(&sync, envelope).await;
                            let _ = replies.send(reply).await;
                        });
                    } else {
                        let reply = execute(sync, envelope).await;
                        if replies.send(reply).await.is_err() {
                            break;
                        }
                    }
                }
                Ok(None) => {
                    info!("Input closed, initiating graceful shutdown");
                    break;
                }
                Err(e) => {
                    error!(error = %e, "Failed to read request");
                    break;
                }
            },
        }
    }

    if !in_flight.is_empty() {
        debug!(requests = in_flight.len(), "Waiting for in-flight requests");
    }
    while let Some(joined) = in_flight.join_next().await {
        if let Err(e) = joined {
            error!(error = %e, "Request task failed");
        }
    }
}

/// Write replies to stdout, one JSON object per line. Stops when every
/// sender is gone or stdout fails.
async fn write_replies(mut replies: mpsc::Receiver<Reply>) {
    let mut stdout = tokio::io::stdout();
    while let Some(reply) = replies.recv().await {
        if let Err(e) = write_reply(&mut stdout, &reply).await {
            error!(error = %e, "Failed to write response");
            break;
        }
    }
}

fn finish(report: DrainReport) -> Result<()> {
    if report.is_clean() {
        info!(applied = report.flushed.applied, "Sheetsync server stopped");
        return Ok(());
    }

    anyhow::bail!(
        "{} writes undelivered at shutdown: {}",
        report.undelivered.len(),
        report.error.as_deref().unwrap_or("arrived after the final flush")
    )
}

async fn write_reply(stdout: &mut Stdout, reply: &Reply) -> Result<()> {
    let mut line = serde_json::to_vec(reply)?;
    line.push(b'\n');
    stdout.write_all(&line).await?;
    stdout.flush().await?;
    Ok(())
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {
                        info!("Received SIGINT (Ctrl+C), initiating graceful shutdown");
                    }
                    _ = sigterm.recv() => {
                        info!("Received SIGTERM, initiating graceful shutdown");
                    }
                }
                return;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler, listening for Ctrl+C only");
            }
        }
    }

    let _ = tokio::signal::ctrl_c().await;
    info!("Received Ctrl+C, initiating graceful shutdown");
}

#[cfg(test)]
mod tests {
    use super::*;
    use sheetsync_core::config::{StoreBackend, StoreConfig};
    use sheetsync_core::store::MemoryTableStore;
    use sheetsync_core::writer::PendingWrite;
    use std::time::Duration;

    async fn setup() -> (Arc<MemoryTableStore>, Arc<TableSync>) {
        let store = Arc::new(MemoryTableStore::new(
            "Sheet1",
            vec![vec!["id", "status"], vec!["item001", "open"]],
        ));
        let mut config = Config::new(StoreConfig::new(StoreBackend::Memory, "doc", "Sheet1"));
        config.sync.read_interval_ms = 0;
        let sync = TableSync::start(config, store.clone()).await.unwrap();
        (store, sync)
    }

    async fn serve(sync: &Arc<TableSync>, input: &'static str) -> Vec<serde_json::Value> {
        let (tx, mut rx) = mpsc::channel(REPLY_BUFFER);
        let lines = BufReader::new(input.as_bytes()).lines();
        serve_lines(sync, lines, tx, std::future::pending()).await;

        let mut replies = Vec::new();
        while let Some(reply) = rx.recv().await {
            replies.push(serde_json::to_value(&reply).unwrap());
        }
        replies
    }

    #[test]
    fn test_overrides_apply() {
        let mut config = Config::new(StoreConfig::new(StoreBackend::Memory, "doc", "Sheet1"));
        Overrides {
            table_name: Some("Tasks".into()),
            key_spec: Some("B".into()),
            header_row: None,
        }
        .apply(&mut config);

        assert_eq!(config.store.table_name, "Tasks");
        assert_eq!(config.table.key_spec.as_deref(), Some("B"));
        assert_eq!(config.table.header_row, 1);
    }

    #[test]
    fn test_finish_reports_undelivered() {
        assert!(finish(DrainReport::default()).is_ok());

        let report = DrainReport {
            undelivered: vec![PendingWrite::new("item001", "status", "done")],
            error: Some("apply_cell_writes failed after 3 attempts".into()),
            ..DrainReport::default()
        };
        let err = finish(report).unwrap_err();
        assert!(err.to_string().contains("1 writes undelivered"));
    }

    #[tokio::test]
    async fn test_serve_lines_replies_to_every_request() {
        let (store, sync) = setup().await;
        let input = "{\"id\":1,\"op\":\"update\",\"key\":\"item001\",\"column\":\"status\",\"value\":\"done\"}\n\
                     \n\
                     not json\n\
                     {\"id\":2,\"op\":\"flush\",\"key\":\"item001\",\"column\":\"status\",\"value\":\"closed\"}\n";

        let replies = serve(&sync, input).await;

        assert_eq!(replies.len(), 3);
        assert_eq!(replies[0], serde_json::json!({"id": 1, "ok": true}));
        assert!(replies[1]["error"]
            .as_str()
            .unwrap()
            .starts_with("Invalid request"));
        assert_eq!(replies[2], serde_json::json!({"id": 2, "ok": true}));
        assert_eq!(store.cell(2, 1).as_deref(), Some("closed"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_flush_does_not_block_reads() {
        let (store, sync) = setup().await;
        store.set_apply_latency(Duration::from_secs(2));
        let input = "{\"id\":\"slow\",\"op\":\"flush\",\"key\":\"item001\",\"column\":\"status\",\"value\":\"done\"}\n\
                     {\"id\":\"fast\",\"op\":\"get\",\"key\":\"item001\"}\n";

        let replies = serve(&sync, input).await;

        // Input ends while the flush is still applying; it is awaited.
        assert_eq!(replies.len(), 2);
        assert_eq!(replies[0]["id"], "fast");
        assert_eq!(replies[0]["status"], "open");
        assert_eq!(replies[1], serde_json::json!({"id": "slow", "ok": true}));
    }
}
