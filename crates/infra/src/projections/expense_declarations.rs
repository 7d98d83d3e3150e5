//! Expense declaration read model and the list queries over it.

use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

use sitedesk_core::{AggregateId, SiteId, UserId};
use sitedesk_events::EventEnvelope;
use sitedesk_expenses::line_item;
use sitedesk_expenses::{
    AGGREGATE_TYPE, Currency, DeclarationId, ExpenseDeclarationEvent, ExpenseStatus,
    ExpenseSummary, LineItem, Summarizable,
};

use crate::read_model::RecordStore;

/// Flattened declaration as list views consume it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeclarationView {
    pub declaration_id: DeclarationId,
    pub creator_id: UserId,
    pub creator_name: String,
    pub site_id: SiteId,
    pub site_name: String,
    pub date: NaiveDate,
    pub note: Option<String>,
    pub line_items: Vec<LineItem>,
    pub status: ExpenseStatus,
    pub rejection_reason: Option<String>,
    pub approver_id: Option<UserId>,
    pub approver_name: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
    pub paid: bool,
    pub payer_id: Option<UserId>,
    pub payer_name: Option<String>,
    pub payment_note: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Stream revision; pass it back as the expected version on mutations.
    pub version: u64,
}

impl DeclarationView {
    /// Headline total (TL lines only).
    pub fn total_amount(&self) -> Decimal {
        line_item::total_amount(&self.line_items)
    }

    pub fn totals_by_currency(&self) -> BTreeMap<Currency, Decimal> {
        line_item::totals_by_currency(&self.line_items)
    }

    pub fn nominal_total(&self) -> Decimal {
        line_item::nominal_total(&self.line_items)
    }
}

impl Summarizable for DeclarationView {
    fn status(&self) -> ExpenseStatus {
        self.status
    }

    fn is_paid(&self) -> bool {
        self.paid
    }

    fn line_items(&self) -> &[LineItem] {
        &self.line_items
    }
}

/// The fixed list views, each with its own predicate and ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListQuery {
    /// Declarations submitted by one user, newest business date first.
    ByCreator(UserId),
    /// Awaiting approval, newest submission first.
    PendingApproval,
    /// Approved but not yet paid, most recent decision first.
    ApprovedUnpaid,
    /// Everything, newest submission first.
    All,
}

impl ListQuery {
    pub fn matches(&self, view: &DeclarationView) -> bool {
        match self {
            ListQuery::ByCreator(user_id) => view.creator_id == *user_id,
            ListQuery::PendingApproval => view.status == ExpenseStatus::Pending,
            ListQuery::ApprovedUnpaid => view.status == ExpenseStatus::Approved && !view.paid,
            ListQuery::All => true,
        }
    }

    fn sort(&self, views: &mut [DeclarationView]) {
        match self {
            ListQuery::ByCreator(_) => views.sort_by_key(|v| {
                Reverse((v.date, v.created_at, v.declaration_id))
            }),
            ListQuery::PendingApproval | ListQuery::All => {
                views.sort_by_key(|v| Reverse((v.created_at, v.declaration_id)))
            }
            ListQuery::ApprovedUnpaid => {
                views.sort_by_key(|v| Reverse((v.approved_at, v.declaration_id)))
            }
        }
    }
}

/// Optional narrowing applied on top of a [`ListQuery`] (the list filter bar).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListFilter {
    pub site_id: Option<SiteId>,
    pub status: Option<ExpenseStatus>,
    pub paid: Option<bool>,
}

impl ListFilter {
    pub fn site(site_id: SiteId) -> Self {
        Self {
            site_id: Some(site_id),
            ..Self::default()
        }
    }

    pub fn matches(&self, view: &DeclarationView) -> bool {
        self.site_id.is_none_or(|s| s == view.site_id)
            && self.status.is_none_or(|s| s == view.status)
            && self.paid.is_none_or(|p| p == view.paid)
    }
}

#[derive(Debug, Error)]
pub enum DeclarationProjectionError {
    #[error("failed to deserialize declaration event: {0}")]
    Deserialize(String),
    #[error("event declaration_id does not match envelope aggregate_id")]
    StreamMismatch,
    #[error("sequence gap (last={last}, found={found})")]
    SequenceGap { last: u64, found: u64 },
    #[error("event for unknown declaration {0}")]
    UnknownDeclaration(DeclarationId),
    #[error("projection lock poisoned")]
    Poisoned,
}

/// Builds [`DeclarationView`]s from declaration events.
///
/// Idempotent per stream: envelopes at or below the last applied sequence
/// number are skipped, so the workflow and any number of bus subscribers
/// may feed the same projection. Writers are serialized: the cursor check,
/// the view update and the cursor advance happen under one lock.
#[derive(Debug)]
pub struct ExpenseDeclarationsProjection<S>
where
    S: RecordStore<DeclarationId, DeclarationView>,
{
    store: S,
    cursors: Mutex<HashMap<AggregateId, u64>>,
}

impl<S> ExpenseDeclarationsProjection<S>
where
    S: RecordStore<DeclarationId, DeclarationView>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: Mutex::new(HashMap::new()),
        }
    }

    fn lock_cursors(
        &self,
    ) -> Result<MutexGuard<'_, HashMap<AggregateId, u64>>, DeclarationProjectionError> {
        self.cursors
            .lock()
            .map_err(|_| DeclarationProjectionError::Poisoned)
    }

    /// Last applied sequence number of a stream (0 if none).
    pub fn cursor(&self, aggregate_id: AggregateId) -> u64 {
        match self.cursors.lock() {
            Ok(cursors) => cursors.get(&aggregate_id).copied().unwrap_or(0),
            Err(_) => 0,
        }
    }

    pub fn get(&self, declaration_id: &DeclarationId) -> Option<DeclarationView> {
        self.store.get(declaration_id)
    }

    /// Run a list query; the result is a full, ordered snapshot.
    pub fn query(&self, query: &ListQuery, filter: &ListFilter) -> Vec<DeclarationView> {
        let mut views: Vec<DeclarationView> = self
            .store
            .list()
            .into_iter()
            .filter(|v| query.matches(v) && filter.matches(v))
            .collect();
        query.sort(&mut views);
        views
    }

    pub fn list_by_creator(&self, user_id: UserId) -> Vec<DeclarationView> {
        self.query(&ListQuery::ByCreator(user_id), &ListFilter::default())
    }

    pub fn list_pending_approval(&self) -> Vec<DeclarationView> {
        self.query(&ListQuery::PendingApproval, &ListFilter::default())
    }

    pub fn list_approved_unpaid(&self) -> Vec<DeclarationView> {
        self.query(&ListQuery::ApprovedUnpaid, &ListFilter::default())
    }

    pub fn summary(&self, query: &ListQuery, filter: &ListFilter) -> ExpenseSummary {
        ExpenseSummary::collect(&self.query(query, filter))
    }

    /// Apply one published envelope. Other aggregate types are ignored.
    pub fn apply_envelope(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), DeclarationProjectionError> {
        let mut cursors = self.lock_cursors()?;
        self.apply_locked(&mut cursors, envelope)
    }

    /// Apply a stream's full history; already applied events are skipped.
    /// Used to close a gap left by out-of-order delivery.
    pub fn catch_up(
        &self,
        envelopes: impl IntoIterator<Item = EventEnvelope<JsonValue>>,
    ) -> Result<(), DeclarationProjectionError> {
        let mut envs: Vec<_> = envelopes.into_iter().collect();
        envs.sort_by_key(|e| (e.aggregate_id(), e.sequence_number()));

        let mut cursors = self.lock_cursors()?;
        for env in &envs {
            self.apply_locked(&mut cursors, env)?;
        }
        Ok(())
    }

    /// Drop every view and replay the given envelopes.
    pub fn rebuild_from_scratch(
        &self,
        envelopes: impl IntoIterator<Item = EventEnvelope<JsonValue>>,
    ) -> Result<(), DeclarationProjectionError> {
        let mut envs: Vec<_> = envelopes.into_iter().collect();
        envs.sort_by_key(|e| (e.aggregate_id(), e.sequence_number()));

        let mut cursors = self.lock_cursors()?;
        self.store.clear();
        cursors.clear();
        for env in &envs {
            self.apply_locked(&mut cursors, env)?;
        }
        Ok(())
    }

    fn apply_locked(
        &self,
        cursors: &mut HashMap<AggregateId, u64>,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), DeclarationProjectionError> {
        if envelope.aggregate_type() != AGGREGATE_TYPE {
            return Ok(());
        }

        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();
        let last = cursors.get(&aggregate_id).copied().unwrap_or(0);
        if seq <= last {
            return Ok(());
        }
        if seq != last + 1 {
            return Err(DeclarationProjectionError::SequenceGap { last, found: seq });
        }

        let ev: ExpenseDeclarationEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| DeclarationProjectionError::Deserialize(e.to_string()))?;
        let declaration_id = ev.declaration_id();
        if declaration_id.0 != aggregate_id {
            return Err(DeclarationProjectionError::StreamMismatch);
        }

        match ev {
            ExpenseDeclarationEvent::Submitted(e) => {
                self.store.upsert(
                    declaration_id,
                    DeclarationView {
                        declaration_id,
                        creator_id: e.creator.id,
                        creator_name: e.creator.name,
                        site_id: e.site.id,
                        site_name: e.site.name,
                        date: e.date,
                        note: e.note,
                        line_items: e.line_items,
                        status: ExpenseStatus::Pending,
                        rejection_reason: None,
                        approver_id: None,
                        approver_name: None,
                        approved_at: None,
                        paid: false,
                        payer_id: None,
                        payer_name: None,
                        payment_note: None,
                        paid_at: None,
                        created_at: e.occurred_at,
                        updated_at: e.occurred_at,
                        version: seq,
                    },
                );
            }
            ExpenseDeclarationEvent::Deleted(_) => {
                self.store.remove(&declaration_id);
            }
            other => {
                let mut view = self
                    .store
                    .get(&declaration_id)
                    .ok_or(DeclarationProjectionError::UnknownDeclaration(declaration_id))?;
                apply_change(&mut view, other);
                view.version = seq;
                self.store.upsert(declaration_id, view);
            }
        }

        cursors.insert(aggregate_id, seq);
        Ok(())
    }
}

fn apply_change(view: &mut DeclarationView, event: ExpenseDeclarationEvent) {
    match event {
        ExpenseDeclarationEvent::Revised(e) => {
            view.date = e.date;
            view.note = e.note;
            view.line_items = e.line_items;
            view.updated_at = e.occurred_at;
        }
        ExpenseDeclarationEvent::Approved(e) => {
            view.status = ExpenseStatus::Approved;
            view.approver_id = Some(e.approver_id);
            view.approver_name = Some(e.approver_name);
            view.approved_at = Some(e.occurred_at);
            view.updated_at = e.occurred_at;
        }
        ExpenseDeclarationEvent::Rejected(e) => {
            view.status = ExpenseStatus::Rejected;
            view.rejection_reason = Some(e.reason);
            view.approver_id = Some(e.approver_id);
            view.approver_name = Some(e.approver_name);
            view.approved_at = Some(e.occurred_at);
            view.updated_at = e.occurred_at;
        }
        ExpenseDeclarationEvent::Paid(e) => {
            view.paid = true;
            view.payer_id = Some(e.payer_id);
            view.payer_name = Some(e.payer_name);
            view.payment_note = Some(e.note);
            view.paid_at = Some(e.occurred_at);
            view.updated_at = e.occurred_at;
        }
        ExpenseDeclarationEvent::Submitted(_) | ExpenseDeclarationEvent::Deleted(_) => {}
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Duration;
    use uuid::Uuid;

    use sitedesk_events::Event;
    use sitedesk_expenses::{
        DeclarationApproved, DeclarationDeleted, DeclarationPaid, DeclarationSubmitted,
        SiteRef, Submitter,
    };

    use super::*;
    use crate::read_model::InMemoryRecordStore;

    type Projection =
        ExpenseDeclarationsProjection<Arc<InMemoryRecordStore<DeclarationId, DeclarationView>>>;

    fn projection() -> Projection {
        ExpenseDeclarationsProjection::new(Arc::new(InMemoryRecordStore::new()))
    }

    fn envelope(seq: u64, ev: &ExpenseDeclarationEvent) -> EventEnvelope<JsonValue> {
        EventEnvelope::new(
            Uuid::now_v7(),
            ev.declaration_id().0,
            AGGREGATE_TYPE,
            seq,
            serde_json::to_value(ev).unwrap(),
        )
    }

    fn base_time() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-04-01T08:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn submitted(
        id: DeclarationId,
        creator: UserId,
        site: SiteId,
        date: NaiveDate,
        at: DateTime<Utc>,
    ) -> ExpenseDeclarationEvent {
        ExpenseDeclarationEvent::Submitted(DeclarationSubmitted {
            declaration_id: id,
            creator: Submitter {
                id: creator,
                name: "Ali".to_string(),
            },
            site: SiteRef {
                id: site,
                name: "Şantiye".to_string(),
            },
            date,
            note: None,
            line_items: vec![
                LineItem {
                    date,
                    description: "Taxi".to_string(),
                    amount: Decimal::from(100),
                    currency: Currency::Tl,
                    amount_parsed: true,
                },
                LineItem {
                    date,
                    description: "Hotel".to_string(),
                    amount: Decimal::from(50),
                    currency: Currency::Usd,
                    amount_parsed: true,
                },
            ],
            occurred_at: at,
        })
    }

    fn approved(id: DeclarationId, at: DateTime<Utc>) -> ExpenseDeclarationEvent {
        ExpenseDeclarationEvent::Approved(DeclarationApproved {
            declaration_id: id,
            approver_id: UserId::new(),
            approver_name: "PM".to_string(),
            occurred_at: at,
        })
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 4, d).unwrap()
    }

    #[test]
    fn submitted_event_creates_pending_view() {
        let p = projection();
        let id = DeclarationId::generate();
        let ev = submitted(id, UserId::new(), SiteId::new(), day(1), base_time());
        p.apply_envelope(&envelope(1, &ev)).unwrap();

        let view = p.get(&id).unwrap();
        assert_eq!(view.status, ExpenseStatus::Pending);
        assert!(!view.paid);
        assert_eq!(view.version, 1);
        assert_eq!(view.total_amount(), Decimal::from(100));
        assert_eq!(view.nominal_total(), Decimal::from(150));
    }

    #[test]
    fn duplicates_are_skipped_and_gaps_rejected() {
        let p = projection();
        let id = DeclarationId::generate();
        let sub = envelope(1, &submitted(id, UserId::new(), SiteId::new(), day(1), base_time()));
        p.apply_envelope(&sub).unwrap();
        p.apply_envelope(&sub).unwrap();

        let gap = envelope(3, &approved(id, base_time()));
        let err = p.apply_envelope(&gap).unwrap_err();
        assert!(matches!(
            err,
            DeclarationProjectionError::SequenceGap { last: 1, found: 3 }
        ));
        assert_eq!(p.get(&id).unwrap().status, ExpenseStatus::Pending);
    }

    #[test]
    fn paid_and_deleted_events_update_views() {
        let p = projection();
        let id = DeclarationId::generate();
        let t = base_time();
        p.apply_envelope(&envelope(1, &submitted(id, UserId::new(), SiteId::new(), day(1), t)))
            .unwrap();
        p.apply_envelope(&envelope(2, &approved(id, t + Duration::hours(1))))
            .unwrap();

        let payer = UserId::new();
        let paid = ExpenseDeclarationEvent::Paid(DeclarationPaid {
            declaration_id: id,
            payer_id: payer,
            payer_name: "Muhasebe".to_string(),
            note: "Bank transfer".to_string(),
            occurred_at: t + Duration::hours(2),
        });
        p.apply_envelope(&envelope(3, &paid)).unwrap();
        let view = p.get(&id).unwrap();
        assert!(view.paid);
        assert_eq!(view.payer_id, Some(payer));
        assert_eq!(view.updated_at, paid.occurred_at());

        let other = DeclarationId::generate();
        p.apply_envelope(&envelope(1, &submitted(other, UserId::new(), SiteId::new(), day(2), t)))
            .unwrap();
        let deleted = ExpenseDeclarationEvent::Deleted(DeclarationDeleted {
            declaration_id: other,
            deleted_by: UserId::new(),
            occurred_at: t,
        });
        p.apply_envelope(&envelope(2, &deleted)).unwrap();
        assert!(p.get(&other).is_none());
    }

    #[test]
    fn queries_filter_and_order() {
        let p = projection();
        let me = UserId::new();
        let site = SiteId::new();
        let t = base_time();

        let older = DeclarationId::generate();
        let newer = DeclarationId::generate();
        let foreign = DeclarationId::generate();

        p.apply_envelope(&envelope(1, &submitted(older, me, site, day(3), t)))
            .unwrap();
        p.apply_envelope(&envelope(
            1,
            &submitted(newer, me, SiteId::new(), day(1), t + Duration::minutes(5)),
        ))
        .unwrap();
        p.apply_envelope(&envelope(
            1,
            &submitted(foreign, UserId::new(), site, day(2), t + Duration::minutes(10)),
        ))
        .unwrap();

        let mine: Vec<_> = p.list_by_creator(me).iter().map(|v| v.declaration_id).collect();
        assert_eq!(mine, vec![older, newer], "ordered by business date desc");

        let pending: Vec<_> = p
            .list_pending_approval()
            .iter()
            .map(|v| v.declaration_id)
            .collect();
        assert_eq!(pending, vec![foreign, newer, older], "ordered by creation desc");

        p.apply_envelope(&envelope(2, &approved(older, t + Duration::hours(2))))
            .unwrap();
        p.apply_envelope(&envelope(2, &approved(foreign, t + Duration::hours(1))))
            .unwrap();
        let unpaid: Vec<_> = p
            .list_approved_unpaid()
            .iter()
            .map(|v| v.declaration_id)
            .collect();
        assert_eq!(unpaid, vec![older, foreign], "ordered by decision desc");

        let on_site = p.query(&ListQuery::All, &ListFilter::site(site));
        assert_eq!(on_site.len(), 2);

        let summary = p.summary(&ListQuery::All, &ListFilter::default());
        assert_eq!(summary.count, 3);
        assert_eq!(summary.total_amount, Decimal::from(300));
        assert_eq!(summary.totals_by_currency[&Currency::Usd], Decimal::from(150));
        assert_eq!(summary.approved_unpaid, 2);
    }

    #[test]
    fn rebuild_replays_from_scratch() {
        let p = projection();
        let id = DeclarationId::generate();
        let t = base_time();
        let envs = vec![
            envelope(2, &approved(id, t)),
            envelope(1, &submitted(id, UserId::new(), SiteId::new(), day(1), t)),
        ];

        p.rebuild_from_scratch(envs.clone()).unwrap();
        assert_eq!(p.get(&id).unwrap().status, ExpenseStatus::Approved);

        p.rebuild_from_scratch(envs).unwrap();
        assert_eq!(p.get(&id).unwrap().version, 2);
    }

    #[test]
    fn other_aggregate_types_are_ignored() {
        let p = projection();
        let env = EventEnvelope::new(
            Uuid::now_v7(),
            AggregateId::new(),
            "payroll.run",
            1,
            serde_json::json!({}),
        );
        assert!(p.apply_envelope(&env).is_ok());
    }

    #[test]
    fn catch_up_closes_a_gap() {
        let p = projection();
        let id = DeclarationId::generate();
        let t = base_time();
        let history = vec![
            envelope(1, &submitted(id, UserId::new(), SiteId::new(), day(1), t)),
            envelope(2, &approved(id, t)),
        ];
        p.apply_envelope(&history[0]).unwrap();

        p.catch_up(history.clone()).unwrap();
        assert_eq!(p.cursor(id.0), 2);
        assert_eq!(p.get(&id).unwrap().status, ExpenseStatus::Approved);

        p.catch_up(history).unwrap();
        assert_eq!(p.get(&id).unwrap().version, 2);
    }

    #[test]
    fn concurrent_writers_apply_each_event_exactly_once() {
        let p = Arc::new(projection());
        let t = base_time();
        let streams: Vec<Vec<EventEnvelope<JsonValue>>> = (0..20)
            .map(|_| {
                let id = DeclarationId::generate();
                let payer = ExpenseDeclarationEvent::Paid(DeclarationPaid {
                    declaration_id: id,
                    payer_id: UserId::new(),
                    payer_name: "Muhasebe".to_string(),
                    note: String::new(),
                    occurred_at: t,
                });
                vec![
                    envelope(1, &submitted(id, UserId::new(), SiteId::new(), day(1), t)),
                    envelope(2, &approved(id, t)),
                    envelope(3, &payer),
                ]
            })
            .collect();
        let streams = Arc::new(streams);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let p = p.clone();
                let streams = streams.clone();
                std::thread::spawn(move || {
                    for stream in streams.iter() {
                        for env in stream {
                            p.apply_envelope(env).unwrap();
                        }
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        for stream in streams.iter() {
            let view = p.get(&DeclarationId::new(stream[0].aggregate_id())).unwrap();
            assert!(view.paid);
            assert_eq!(view.version, 3);
        }
        assert!(p.list_approved_unpaid().is_empty());
    }
}
