//! Single-slot holder for the latest diagnostics push.
//!
//! The slot is lossy: a push overwrites anything not yet taken, so a
//! consumer only ever sees the most recent diagnostics. `Some` in the slot is
//! the "unread" flag.

use std::time::Duration;

use tokio::sync::watch;

use crate::error::{RpcError, RpcResult};
use crate::protocol::PublishDiagnosticsParams;

#[derive(Debug)]
pub struct DiagnosticsSink {
    slot: watch::Sender<Option<PublishDiagnosticsParams>>,
}

impl DiagnosticsSink {
    #[must_use]
    pub fn new() -> Self {
        let (slot, _) = watch::channel(None);
        Self { slot }
    }

    /// Store `doc`, replacing any unread value.
    pub fn publish(&self, doc: PublishDiagnosticsParams) {
        if let Some(dropped) = self.slot.send_replace(Some(doc)) {
            tracing::trace!(uri = %dropped.uri, "Unread diagnostics overwritten");
        }
    }

    /// Wait up to `timeout` for unread diagnostics, then take them.
    ///
    /// Single consumer: two concurrent callers race for the same slot and the
    /// loser keeps waiting for the next push.
    pub async fn take(&self, timeout: Duration) -> RpcResult<PublishDiagnosticsParams> {
        let mut rx = self.slot.subscribe();
        let wait = async {
            loop {
                // `wait_for` also inspects the current value, so an unread push
                // that predates this call is seen immediately.
                if rx.wait_for(Option::is_some).await.is_err() {
                    return None;
                }
                if let Some(doc) = self.slot.send_replace(None) {
                    return Some(doc);
                }
            }
        };

        match tokio::time::timeout(timeout, wait).await {
            Ok(Some(doc)) => Ok(doc),
            Ok(None) | Err(_) => Err(RpcError::DiagnosticsTimeout { timeout }),
        }
    }

    /// Take unread diagnostics without waiting.
    pub fn try_take(&self) -> Option<PublishDiagnosticsParams> {
        self.slot.send_replace(None)
    }

    #[must_use]
    pub fn has_unread(&self) -> bool {
        self.slot.borrow().is_some()
    }
}

impl Default for DiagnosticsSink {
    fn default() -> Self {
        Self::new()
    }
}
