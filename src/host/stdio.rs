//! Newline-delimited JSON bridge between the menu-bar shell and the host.
//!
//! Reads [`RequestEnvelope`]s from the input, answers each with a
//! [`ResponseEnvelope`], and pushes [`EventEnvelope`]s for every published
//! status snapshot. The output is reserved for the protocol; diagnostics go
//! to tracing (stderr).
//!
//! The bridge owns the session: it starts polling and the startup sequence
//! when it begins, and runs the full shutdown sequence when the input
//! reaches EOF, a `quit` request arrives, or the `quit` future resolves
//! (SIGTERM/Ctrl+C in the binary).

use crate::error::MonitorError;
use crate::host::HostCore;
use crate::host::contract::{
    EventEnvelope, HostCommand, PARSE_ERROR_ID, RequestEnvelope, ResponseEnvelope,
};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::sync::Mutex;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

type SharedWriter<W> = Arc<Mutex<BufWriter<W>>>;

/// Why the reader loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExitReason {
    Eof,
    QuitRequest,
    QuitSignal,
}

/// Run the bridge until the session ends, then tear everything down.
///
/// Requests are handled concurrently, so a toggle that arrives while the
/// same service is still in flight is answered with `busy` right away.
/// Returns only after shutdown has completed and the final `shutdown`
/// event has been written.
pub async fn run_bridge<R, W, Q>(
    host: Arc<HostCore>,
    input: R,
    output: W,
    quit: Q,
) -> crate::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
    Q: Future<Output = ()>,
{
    let writer: SharedWriter<W> = Arc::new(Mutex::new(BufWriter::new(output)));

    let mut updates = host.aggregator().subscribe();
    let ready = EventEnvelope::new(
        "ready",
        serde_json::json!({ "version": env!("CARGO_PKG_VERSION") }),
    );
    let mut result = write_message(&writer, &ready).await;

    let status_writer = Arc::clone(&writer);
    let forwarder = tokio::spawn(async move {
        while updates.changed().await.is_ok() {
            let snapshot = updates.borrow_and_update().clone();
            let payload = match serde_json::to_value(&snapshot) {
                Ok(payload) => payload,
                Err(e) => {
                    warn!(error = %e, "cannot serialize snapshot, skipping");
                    continue;
                }
            };
            let event = EventEnvelope::new("status", payload);
            if let Err(e) = write_message(&status_writer, &event).await {
                warn!(error = %e, "cannot write status event, stopping forwarder");
                break;
            }
        }
    });

    host.aggregator().start();
    let startup = {
        let host = Arc::clone(&host);
        tokio::spawn(async move { host.lifecycle().startup().await })
    };

    let requests = TaskTracker::new();
    if result.is_ok() {
        match run_reader(&host, input, &writer, &requests, quit).await {
            Ok(reason) => info!(?reason, "bridge input finished, shutting down"),
            Err(e) => {
                warn!(error = %e, "bridge input failed, shutting down");
                result = Err(e);
            }
        }
    }

    host.lifecycle().shutdown().await;
    match startup.await {
        Ok(report) => debug!(?report, "startup task finished"),
        Err(e) => warn!(error = %e, "startup task failed"),
    }
    requests.close();
    requests.wait().await;

    forwarder.abort();
    let _ = forwarder.await;
    let farewell = EventEnvelope::new("shutdown", serde_json::Value::Null);
    if let Err(e) = write_message(&writer, &farewell).await {
        debug!(error = %e, "cannot write shutdown event");
    }
    result
}

async fn run_reader<R, W, Q>(
    host: &Arc<HostCore>,
    mut input: R,
    writer: &SharedWriter<W>,
    requests: &TaskTracker,
    quit: Q,
) -> crate::Result<ExitReason>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
    Q: Future<Output = ()>,
{
    tokio::pin!(quit);
    let mut line = String::new();

    loop {
        line.clear();
        let bytes_read = tokio::select! {
            biased;
            () = &mut quit => return Ok(ExitReason::QuitSignal),
            read = input.read_line(&mut line) => read
                .map_err(|e| MonitorError::Bridge(format!("cannot read request: {e}")))?,
        };
        if bytes_read == 0 {
            return Ok(ExitReason::Eof);
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let request: RequestEnvelope = match serde_json::from_str(trimmed) {
            Ok(request) => request,
            Err(e) => {
                warn!(error = %e, raw_line = %trimmed, "cannot parse request");
                let response = ResponseEnvelope::error(
                    request_id_of(trimmed),
                    format!("cannot parse request: {e}"),
                );
                write_message(writer, &response).await?;
                continue;
            }
        };

        if request.command == HostCommand::Quit {
            let response = ResponseEnvelope::ok(request.request_id, serde_json::Value::Null);
            write_message(writer, &response).await?;
            return Ok(ExitReason::QuitRequest);
        }

        debug!(request_id = %request.request_id, command = ?request.command, "request");
        let host = Arc::clone(host);
        let writer = Arc::clone(writer);
        requests.spawn(async move {
            let payload = host.dispatch(&request.command).await;
            let response = ResponseEnvelope::ok(request.request_id, payload);
            if let Err(e) = write_message(&writer, &response).await {
                warn!(error = %e, "cannot write response");
            }
        });
    }
}

/// Best-effort `request_id` from a line that failed to parse as a request.
fn request_id_of(raw: &str) -> String {
    serde_json::from_str::<serde_json::Value>(raw)
        .ok()
        .and_then(|value| value.get("request_id")?.as_str().map(str::to_owned))
        .unwrap_or_else(|| PARSE_ERROR_ID.to_owned())
}

/// Serialize `message` as one line and flush it.
async fn write_message<W, T>(writer: &SharedWriter<W>, message: &T) -> crate::Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let json = serde_json::to_string(message)
        .map_err(|e| MonitorError::Bridge(format!("cannot serialize message: {e}")))?;
    let mut w = writer.lock().await;
    w.write_all(json.as_bytes())
        .await
        .map_err(|e| MonitorError::Bridge(format!("cannot write message: {e}")))?;
    w.write_all(b"\n")
        .await
        .map_err(|e| MonitorError::Bridge(format!("cannot write newline: {e}")))?;
    w.flush()
        .await
        .map_err(|e| MonitorError::Bridge(format!("cannot flush output: {e}")))?;
    Ok(())
}
