//! Request/response correlation.

use crate::error::{ClientError, Result};
use std::collections::{HashMap, HashSet};
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use swarmforge_core::codec;
use swarmforge_core::{Envelope, Inbound};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::trace;

struct PendingEntry {
    expected: &'static str,
    tx: mpsc::UnboundedSender<String>,
}

/// Request ids awaiting a response, keyed to the expected inbound tag.
#[derive(Default)]
pub(crate) struct PendingRequests {
    entries: Mutex<HashMap<String, PendingEntry>>,
}

impl PendingRequests {
    fn entries(&self) -> MutexGuard<'_, HashMap<String, PendingEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn register(
        &self,
        request_id: String,
        expected: &'static str,
    ) -> mpsc::UnboundedReceiver<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.entries()
            .insert(request_id, PendingEntry { expected, tx });
        rx
    }

    pub(crate) fn remove(&self, request_id: &str) {
        self.entries().remove(request_id);
    }

    /// Forward a frame to the waiter for `request_id` if the tag matches.
    pub(crate) fn deliver(&self, request_id: &str, kind: &str, text: &str) -> bool {
        let entries = self.entries();
        match entries.get(request_id) {
            Some(entry) if entry.expected == kind => {
                trace!(request_id, message_type = kind, "correlated response");
                entry.tx.send(text.to_string()).is_ok()
            }
            _ => false,
        }
    }

    /// Drop every waiter; their receivers observe a closed channel.
    pub(crate) fn close_all(&self) {
        self.entries().clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.entries().len()
    }
}

/// Ids handed out by a tagger and not yet settled, retired or torn down.
#[derive(Default)]
pub(crate) struct InFlight {
    ids: Mutex<HashSet<String>>,
}

impl InFlight {
    fn ids(&self) -> MutexGuard<'_, HashSet<String>> {
        self.ids.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn insert(&self, request_id: String) {
        self.ids().insert(request_id);
    }

    pub(crate) fn retire(&self, request_id: &str) -> bool {
        self.ids().remove(request_id)
    }

    pub(crate) fn clear(&self) {
        self.ids().clear();
    }

    pub(crate) fn contains(&self, request_id: &str) -> bool {
        self.ids().contains(request_id)
    }

    pub(crate) fn snapshot(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.ids().iter().cloned().collect();
        ids.sort();
        ids
    }
}

/// Handle on the responses to one request.
///
/// Yields every inbound `T` envelope whose `request_id` matches. Dropping
/// the handle stops correlation and retires the id.
pub struct PendingResponse<T> {
    request_id: String,
    rx: mpsc::UnboundedReceiver<String>,
    table: Arc<PendingRequests>,
    in_flight: Arc<InFlight>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Inbound> PendingResponse<T> {
    pub(crate) fn new(
        request_id: String,
        rx: mpsc::UnboundedReceiver<String>,
        table: Arc<PendingRequests>,
        in_flight: Arc<InFlight>,
    ) -> Self {
        Self {
            request_id,
            rx,
            table,
            in_flight,
            _marker: PhantomData,
        }
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Wait up to `wait` for the next correlated envelope.
    pub async fn next(&mut self, wait: Duration) -> Result<Envelope<T>> {
        match timeout(wait, self.rx.recv()).await {
            Err(_) => Err(ClientError::Timeout(format!(
                "no `{}` response for request {} within {:?}",
                T::TYPE,
                self.request_id,
                wait
            ))),
            Ok(None) => Err(ClientError::Closed),
            Ok(Some(text)) => Ok(codec::decode::<T>(&text)?),
        }
    }
}

impl<T> Drop for PendingResponse<T> {
    fn drop(&mut self) {
        self.table.remove(&self.request_id);
        self.in_flight.retire(&self.request_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use swarmforge_core::TaskUpdate;

    const FRAME: &str = r#"{"type":"task_update","timestamp":"t","data":{"task_id":"1","status":"completed"},"request_id":"r1"}"#;

    fn handle(
        table: &Arc<PendingRequests>,
        in_flight: &Arc<InFlight>,
    ) -> PendingResponse<TaskUpdate> {
        let rx = table.register("r1".to_string(), "task_update");
        in_flight.insert("r1".to_string());
        PendingResponse::new(
            "r1".to_string(),
            rx,
            Arc::clone(table),
            Arc::clone(in_flight),
        )
    }

    #[tokio::test]
    async fn delivers_only_matching_type() {
        let table = Arc::new(PendingRequests::default());
        let in_flight = Arc::new(InFlight::default());
        let mut pending = handle(&table, &in_flight);

        assert!(!table.deliver("r1", "error", FRAME));
        assert!(!table.deliver("other", "task_update", FRAME));
        assert!(table.deliver("r1", "task_update", FRAME));

        let envelope = pending.next(Duration::from_secs(1)).await.unwrap();
        assert_eq!(envelope.data().status, "completed");
    }

    #[tokio::test]
    async fn times_out_without_response() {
        let table = Arc::new(PendingRequests::default());
        let in_flight = Arc::new(InFlight::default());
        let mut pending = handle(&table, &in_flight);

        let err = pending.next(Duration::from_millis(20)).await.unwrap_err();
        assert!(matches!(err, ClientError::Timeout(_)));
    }

    #[tokio::test]
    async fn close_all_fails_waiters() {
        let table = Arc::new(PendingRequests::default());
        let in_flight = Arc::new(InFlight::default());
        let mut pending = handle(&table, &in_flight);

        table.close_all();
        let err = pending.next(Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, ClientError::Closed));
    }

    #[test]
    fn drop_cleans_up() {
        let table = Arc::new(PendingRequests::default());
        let in_flight = Arc::new(InFlight::default());
        let pending = handle(&table, &in_flight);
        assert_eq!(table.len(), 1);
        assert!(in_flight.contains("r1"));

        drop(pending);
        assert_eq!(table.len(), 0);
        assert!(!in_flight.contains("r1"));
    }
}
