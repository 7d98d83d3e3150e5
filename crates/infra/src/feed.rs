//! Snapshot feeds: push-style list subscriptions.
//!
//! A feed yields the current result set first, then a fresh full result set
//! each time the bus delivers a change. Every item replaces the previous one.

use std::sync::Arc;
use std::sync::mpsc::{RecvTimeoutError, TryRecvError};
use std::time::Duration;

use serde_json::Value as JsonValue;

use sitedesk_events::{EventEnvelope, Subscription};
use sitedesk_expenses::DeclarationId;

use crate::projections::{DeclarationView, ExpenseDeclarationsProjection, ListFilter, ListQuery};
use crate::read_model::RecordStore;

pub type Snapshot = Vec<DeclarationView>;

/// Lazy snapshot stream over one list query.
///
/// Blocking `Iterator::next` ends once the bus is dropped. Subscribing again
/// starts a new feed with a fresh initial snapshot.
pub struct SnapshotFeed<R>
where
    R: RecordStore<DeclarationId, DeclarationView>,
{
    projection: Arc<ExpenseDeclarationsProjection<R>>,
    subscription: Subscription<EventEnvelope<JsonValue>>,
    query: ListQuery,
    filter: ListFilter,
    primed: bool,
}

impl<R> SnapshotFeed<R>
where
    R: RecordStore<DeclarationId, DeclarationView>,
{
    /// The subscription must be taken before the feed is built so that no
    /// change between subscribing and the first snapshot is lost.
    pub fn new(
        projection: Arc<ExpenseDeclarationsProjection<R>>,
        subscription: Subscription<EventEnvelope<JsonValue>>,
        query: ListQuery,
        filter: ListFilter,
    ) -> Self {
        Self {
            projection,
            subscription,
            query,
            filter,
            primed: false,
        }
    }

    pub fn query(&self) -> &ListQuery {
        &self.query
    }

    /// Non-blocking variant of `next`: `None` when nothing changed.
    pub fn try_next(&mut self) -> Option<Snapshot> {
        if !self.primed {
            return self.next();
        }
        match self.subscription.try_recv() {
            Ok(envelope) => Some(self.deliver(envelope)),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Wait up to `timeout` for the next snapshot.
    pub fn next_timeout(&mut self, timeout: Duration) -> Option<Snapshot> {
        if !self.primed {
            return self.next();
        }
        match self.subscription.recv_timeout(timeout) {
            Ok(envelope) => Some(self.deliver(envelope)),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    fn snapshot(&self) -> Snapshot {
        self.projection.query(&self.query, &self.filter)
    }

    /// Apply the received change plus anything already queued behind it, then
    /// take one snapshot for the whole batch.
    fn deliver(&mut self, first: EventEnvelope<JsonValue>) -> Snapshot {
        self.apply(&first);
        while let Ok(envelope) = self.subscription.try_recv() {
            self.apply(&envelope);
        }
        self.snapshot()
    }

    fn apply(&self, envelope: &EventEnvelope<JsonValue>) {
        if let Err(err) = self.projection.apply_envelope(envelope) {
            tracing::warn!(
                aggregate_id = %envelope.aggregate_id(),
                sequence_number = envelope.sequence_number(),
                "feed could not apply change: {err}"
            );
        }
    }
}

impl<R> Iterator for SnapshotFeed<R>
where
    R: RecordStore<DeclarationId, DeclarationView>,
{
    type Item = Snapshot;

    fn next(&mut self) -> Option<Self::Item> {
        if !self.primed {
            self.primed = true;
            return Some(self.snapshot());
        }
        let envelope = self.subscription.recv().ok()?;
        Some(self.deliver(envelope))
    }
}
