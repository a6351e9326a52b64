//! The one task that drains the server's stdout.
//!
//! Each iteration waits for the running gate, decodes exactly one frame and
//! routes it: replies to the pending table, server requests to an immediate
//! "method not found", notifications by method name. The loop never waits on
//! the write side. A stream failure clears the gate and the loop goes back to
//! waiting; it never exits on its own.

use std::sync::Arc;

use tokio::sync::watch;

use crate::diagnostics::DiagnosticsSink;
use crate::protocol::{self, Incoming, LogMessageParams, NotificationKind, PublishDiagnosticsParams};
use crate::rpc::Connection;

pub(crate) async fn run(conn: Arc<Connection>) {
    let mut gate = conn.running.subscribe();

    loop {
        if !attached(&mut gate).await {
            return;
        }

        let mut inbound = conn.inbound.lock().await;
        let Some(reader) = inbound.as_mut() else {
            tracing::warn!("Session marked running without a stream to read");
            conn.set_running(false);
            continue;
        };

        let outcome = tokio::select! {
            read = reader.read_frame() => read,
            // A restart or shutdown detaches the stream under us.
            () = detached(&mut gate) => {
                tracing::debug!("Reader detached from stream");
                continue;
            }
        };

        match outcome {
            Ok(Some(frame)) => {
                drop(inbound);
                dispatch(&conn, frame).await;
            }
            Ok(None) => {
                tracing::warn!("Server closed its output stream");
                *inbound = None;
                stream_lost(&conn);
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read from server; marking it not running");
                *inbound = None;
                stream_lost(&conn);
            }
        }
    }
}

/// Resolves once the gate is open; `false` if the session is gone.
async fn attached(gate: &mut watch::Receiver<bool>) -> bool {
    gate.wait_for(|running| *running).await.is_ok()
}

async fn detached(gate: &mut watch::Receiver<bool>) {
    let _ = gate.wait_for(|running| !*running).await;
}

/// Called with the inbound slot still locked, so a restart cannot install a
/// new stream pair until this returns.
fn stream_lost(conn: &Connection) {
    conn.set_running(false);
    // A writer blocked mid-frame keeps the lock; it fails on the dead pipe.
    if let Ok(mut outbound) = conn.outbound.try_lock() {
        *outbound = None;
    }
    let abandoned = conn.pending.fail_all();
    if abandoned > 0 {
        tracing::debug!(abandoned, "Abandoned in-flight requests");
    }
}

pub(crate) async fn dispatch(conn: &Arc<Connection>, frame: serde_json::Value) {
    let Some(incoming) = protocol::classify(&frame) else {
        tracing::trace!("Ignoring unclassifiable JSON-RPC frame");
        return;
    };

    match incoming {
        Incoming::Response { id, body } => {
            conn.pending.resolve(id, body);
        }
        Incoming::ServerRequest { id, method } => {
            // Servers wait on these (e.g. workspace/configuration); answer so
            // they do not stall. The write may queue behind a large frame.
            tracing::debug!(%method, "Server sent request; replying method not found");
            let reply = protocol::method_not_found(id, &method);
            let conn = Arc::clone(conn);
            tokio::spawn(async move {
                if let Err(e) = conn.write(&reply).await {
                    tracing::warn!(%method, error = %e, "Failed to answer server request");
                }
            });
        }
        Incoming::Notification { method, params } => {
            handle_notification(&conn.diagnostics, &method, params);
        }
    }
}

fn handle_notification(
    diagnostics: &DiagnosticsSink,
    method: &str,
    params: Option<serde_json::Value>,
) {
    match NotificationKind::from_method(method) {
        NotificationKind::PublishDiagnostics => {
            let Some(params) = params else {
                tracing::debug!("publishDiagnostics without params");
                return;
            };
            match serde_json::from_value::<PublishDiagnosticsParams>(params) {
                Ok(doc) => {
                    tracing::debug!(uri = %doc.uri, count = doc.diagnostics.len(), "Diagnostics pushed");
                    diagnostics.publish(doc);
                }
                Err(e) => tracing::debug!("Failed to parse publishDiagnostics: {e}"),
            }
        }
        NotificationKind::LogMessage | NotificationKind::ShowMessage => {
            let Some(Ok(log)) = params.map(serde_json::from_value::<LogMessageParams>) else {
                tracing::trace!(method, "Malformed log notification");
                return;
            };
            match log.kind {
                1 => tracing::error!(target: "relay_lsp::server", "{}", log.message),
                2 => tracing::warn!(target: "relay_lsp::server", "{}", log.message),
                3 => tracing::info!(target: "relay_lsp::server", "{}", log.message),
                _ => tracing::debug!(target: "relay_lsp::server", "{}", log.message),
            }
        }
        NotificationKind::Unhandled => {
            tracing::trace!(method, "Ignoring notification");
        }
    }
}
