//! Stdout/stdin plumbing for events and reports.
//!
//! Inconsistency events are JSON lines on stdout so that `validate` can be
//! piped straight into `repair`. Logs go to stderr.

use std::io::Write;

use async_trait::async_trait;
use live_migrate::{
    ChannelProducer, ConsumeStats, InconsistentEvent, MigrateError, Producer, Result,
    ValidateStats,
};
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, Stdout};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Publishes each event as one JSON line on stdout.
///
/// Lines from concurrent scans never interleave.
pub struct StdoutProducer<W = Stdout> {
    out: Mutex<W>,
}

impl StdoutProducer {
    pub fn new() -> Self {
        Self::with_writer(tokio::io::stdout())
    }
}

impl Default for StdoutProducer {
    fn default() -> Self {
        Self::new()
    }
}

impl<W> StdoutProducer<W> {
    pub fn with_writer(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    #[cfg(test)]
    fn into_inner(self) -> W {
        self.out.into_inner()
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> Producer for StdoutProducer<W> {
    async fn produce_inconsistent_event(&self, event: &InconsistentEvent) -> Result<()> {
        let mut line = event.encode()?;
        line.push(b'\n');
        let mut out = self.out.lock().await;
        out.write_all(&line)
            .await
            .map_err(|e| MigrateError::Publish(e.to_string()))?;
        out.flush()
            .await
            .map_err(|e| MigrateError::Publish(e.to_string()))
    }
}

/// Forward stdin lines to `producer` until EOF or cancellation.
///
/// Blank lines are ignored; anything else is handed over verbatim and
/// decoded by the consumer.
pub async fn forward_stdin(producer: ChannelProducer, cancel: &CancellationToken) -> Result<u64> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut forwarded = 0;
    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => break,
            line = lines.next_line() => line?,
        };
        let Some(line) = line else { break };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        producer.publish_raw(line.as_bytes().to_vec()).await?;
        forwarded += 1;
    }
    debug!(forwarded, "Finished reading events from stdin");
    Ok(forwarded)
}

#[derive(Serialize)]
struct Report<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    validation: Option<&'a ValidateStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    repair: Option<&'a ConsumeStats>,
}

/// Print a run summary as text, or as one JSON object when `json` is set.
pub fn print_report(
    to: &mut dyn Write,
    json: bool,
    validation: Option<&ValidateStats>,
    repair: Option<&ConsumeStats>,
) -> Result<()> {
    if json {
        let report = Report { validation, repair };
        writeln!(to, "{}", serde_json::to_string(&report)?)?;
        return Ok(());
    }

    if let Some(stats) = validation {
        writeln!(to, "Validation:")?;
        writeln!(to, "  Rows checked: {}", stats.rows_checked)?;
        writeln!(to, "  Target ids checked: {}", stats.ids_checked)?;
        writeln!(to, "  Target missing: {}", stats.target_missing)?;
        writeln!(to, "  Base missing: {}", stats.base_missing)?;
        writeln!(to, "  Not equal: {}", stats.not_equal)?;
        writeln!(to, "  Read errors: {}", stats.read_errors)?;
        writeln!(to, "  Publish failures: {}", stats.publish_failures)?;
    }
    if let Some(stats) = repair {
        writeln!(to, "Repair:")?;
        writeln!(to, "  Events received: {}", stats.received)?;
        writeln!(to, "  Repaired: {}", stats.handled)?;
        writeln!(to, "  Redelivered: {}", stats.redelivered)?;
        writeln!(to, "  Dropped: {}", stats.dropped)?;
        writeln!(to, "  Undecodable: {}", stats.undecodable)?;
    }
    Ok(())
}
