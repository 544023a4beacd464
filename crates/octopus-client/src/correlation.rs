//! Pending request table.
//!
//! Each entry is keyed by the `clientMessageId` the request went out with
//! and settles exactly once: by a response, an error response, its timer or
//! a connection close. Whatever comes first removes the entry, so later
//! arrivals for the same id find nothing and are dropped.

use std::collections::HashMap;

use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tracing::debug;

use crate::error::{ClientError, ClientResult};
use crate::stream::Received;

/// Completion side of a pending request.
pub(crate) type Completion = oneshot::Sender<ClientResult<Received>>;

#[derive(Debug)]
struct PendingEntry {
    respond: Completion,
    timer: Option<AbortHandle>,
}

impl PendingEntry {
    fn settle(self, outcome: ClientResult<Received>) {
        if let Some(timer) = self.timer {
            timer.abort();
        }
        // The caller may have stopped waiting.
        let _ = self.respond.send(outcome);
    }
}

/// Pending requests of one connection, keyed by client message id.
#[derive(Debug, Default)]
pub(crate) struct CorrelationTable {
    entries: HashMap<u64, PendingEntry>,
}

impl CorrelationTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Registers a pending request.
    ///
    /// Ids come from a counter that never repeats, so a live entry is never
    /// replaced; if it were, the older caller is failed rather than leaked.
    pub(crate) fn register(&mut self, id: u64, respond: Completion, timer: Option<AbortHandle>) {
        let entry = PendingEntry { respond, timer };
        if let Some(previous) = self.entries.insert(id, entry) {
            previous.settle(Err(ClientError::ConnectionClosed));
        }
    }

    /// Resolves the entry for `id` with a response payload.
    ///
    /// Returns false if nothing was pending under that id.
    pub(crate) fn resolve(&mut self, id: u64, data: Received) -> bool {
        match self.entries.remove(&id) {
            Some(entry) => {
                debug!(client_message_id = id, "request resolved");
                entry.settle(Ok(data));
                true
            }
            None => {
                debug!(client_message_id = id, "response for unknown request dropped");
                false
            }
        }
    }

    /// Fails the entry for `id`.
    ///
    /// Returns false if nothing was pending under that id.
    pub(crate) fn reject(&mut self, id: u64, error: ClientError) -> bool {
        match self.entries.remove(&id) {
            Some(entry) => {
                debug!(client_message_id = id, error = %error, "request rejected");
                entry.settle(Err(error));
                true
            }
            None => {
                debug!(client_message_id = id, "error response for unknown request dropped");
                false
            }
        }
    }

    /// Fails the entry for `id` with a timeout.
    pub(crate) fn expire(&mut self, id: u64) -> bool {
        self.reject(id, ClientError::Timeout)
    }

    /// Drops the entry for `id` without settling it; its timer stops.
    pub(crate) fn cancel(&mut self, id: u64) -> bool {
        match self.entries.remove(&id) {
            Some(entry) => {
                if let Some(timer) = entry.timer {
                    timer.abort();
                }
                debug!(client_message_id = id, "request cancelled");
                true
            }
            None => false,
        }
    }

    /// Fails every entry with [`ClientError::ConnectionClosed`] except those
    /// for which `keep` returns true.
    pub(crate) fn reject_all_except(&mut self, keep: impl Fn(u64) -> bool) -> usize {
        let doomed: Vec<u64> = self
            .entries
            .keys()
            .copied()
            .filter(|id| !keep(*id))
            .collect();
        for id in &doomed {
            if let Some(entry) = self.entries.remove(id) {
                entry.settle(Err(ClientError::ConnectionClosed));
            }
        }
        doomed.len()
    }

    /// Fails every entry with [`ClientError::ConnectionClosed`].
    pub(crate) fn reject_all(&mut self) -> usize {
        self.reject_all_except(|_| false)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    #[cfg(test)]
    fn contains(&self, id: u64) -> bool {
        self.entries.contains_key(&id)
    }
}
