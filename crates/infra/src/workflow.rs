//! Expense declaration workflow: the entry point callers use.
//!
//! ```text
//! Actor + request
//!   ↓
//! 1. Capability check
//!   ↓
//! 2. Input validation (no store access yet)
//!   ↓
//! 3. Dispatch (load → version check → decide → append → publish)
//!   ↓
//! 4. Apply committed events to the read model
//!   ↓
//! 5. Log + notify
//! ```

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use serde_json::Value as JsonValue;
use thiserror::Error;

use sitedesk_auth::{Actor, AuthzError, authorize, authorize_any, capabilities};
use sitedesk_core::{ExpectedVersion, UserId};
use sitedesk_events::{EventBus, EventEnvelope, InMemoryEventBus};
use sitedesk_expenses::{
    AGGREGATE_TYPE, ApproveDeclaration, DeclarationId, DeleteDeclaration, ExpenseDeclaration,
    ExpenseDeclarationCommand, ExpenseSummary, LineItemInput, MAX_LINE_AMOUNT, MarkPaid,
    RejectDeclaration, ReviseDeclaration, SiteRef, SubmitDeclaration, Submitter, parse_amount,
};

use crate::command_dispatcher::{CommandDispatcher, DispatchError};
use crate::config::WorkflowConfig;
use crate::event_store::{EventStore, InMemoryEventStore, StoredEvent};
use crate::feed::SnapshotFeed;
use crate::notify::{Notice, Notifier, TracingNotifier};
use crate::projections::{
    DeclarationProjectionError, DeclarationView, ExpenseDeclarationsProjection, ListFilter,
    ListQuery,
};
use crate::read_model::{InMemoryRecordStore, RecordStore};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WorkflowError {
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("validation failed: {0}")]
    Validation(String),
    /// The declaration is in the wrong state for the operation.
    #[error("precondition failed: {0}")]
    Precondition(String),
    /// The caller's version is stale.
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("declaration not found")]
    NotFound,
    #[error("store failure: {0}")]
    Store(String),
}

impl From<AuthzError> for WorkflowError {
    fn from(value: AuthzError) -> Self {
        match value {
            AuthzError::Forbidden(permission) => {
                WorkflowError::Forbidden(format!("missing permission '{permission}'"))
            }
        }
    }
}

impl From<DispatchError> for WorkflowError {
    fn from(value: DispatchError) -> Self {
        match value {
            DispatchError::Concurrency(msg) => WorkflowError::Conflict(msg),
            DispatchError::Validation(msg) => WorkflowError::Validation(msg),
            DispatchError::Precondition(msg) => WorkflowError::Precondition(msg),
            DispatchError::Unauthorized => WorkflowError::Forbidden("unauthorized".to_string()),
            DispatchError::NotFound => WorkflowError::NotFound,
            other => WorkflowError::Store(other.to_string()),
        }
    }
}

pub type InMemoryBus = Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>;
pub type InMemoryDeclarationStore = Arc<InMemoryRecordStore<DeclarationId, DeclarationView>>;

/// Fully in-memory workflow (tests/dev).
pub type InMemoryExpenseWorkflow<N = TracingNotifier> =
    ExpenseWorkflow<Arc<InMemoryEventStore>, InMemoryBus, InMemoryDeclarationStore, N>;

/// Role-gated expense declaration operations over an event-sourced store.
pub struct ExpenseWorkflow<S, B, R, N>
where
    R: RecordStore<DeclarationId, DeclarationView>,
{
    dispatcher: CommandDispatcher<S, B>,
    declarations: Arc<ExpenseDeclarationsProjection<R>>,
    notifier: N,
    config: WorkflowConfig,
}

impl<N> InMemoryExpenseWorkflow<N>
where
    N: Notifier,
{
    pub fn in_memory(config: WorkflowConfig, notifier: N) -> Self {
        let dispatcher = CommandDispatcher::new(
            Arc::new(InMemoryEventStore::new()),
            Arc::new(InMemoryEventBus::new()),
        );
        let declarations = Arc::new(ExpenseDeclarationsProjection::new(Arc::new(
            InMemoryRecordStore::new(),
        )));
        Self::new(dispatcher, declarations, notifier, config)
    }
}

impl<S, B, R, N> ExpenseWorkflow<S, B, R, N>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
    R: RecordStore<DeclarationId, DeclarationView>,
    N: Notifier,
{
    pub fn new(
        dispatcher: CommandDispatcher<S, B>,
        declarations: Arc<ExpenseDeclarationsProjection<R>>,
        notifier: N,
        config: WorkflowConfig,
    ) -> Self {
        Self {
            dispatcher,
            declarations,
            notifier,
            config,
        }
    }

    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> &CommandDispatcher<S, B> {
        &self.dispatcher
    }

    pub fn declarations(&self) -> &Arc<ExpenseDeclarationsProjection<R>> {
        &self.declarations
    }

    // ---- mutations ----------------------------------------------------------

    /// Submit a new declaration in PENDING state.
    pub fn create(
        &self,
        actor: &Actor,
        site: SiteRef,
        date: NaiveDate,
        line_items: Vec<LineItemInput>,
        note: Option<String>,
    ) -> Result<DeclarationId, WorkflowError> {
        let declaration_id = DeclarationId::generate();
        let result = self.try_create(actor, declaration_id, site, date, line_items, note);
        self.report("create", actor, declaration_id, result, "Expense declaration submitted")
    }

    /// Replace date, note and line items of a pending declaration.
    ///
    /// Allowed for the creator (with `expense.create`) or `expense.manage`.
    pub fn update(
        &self,
        actor: &Actor,
        declaration_id: DeclarationId,
        expected: ExpectedVersion,
        date: NaiveDate,
        line_items: Vec<LineItemInput>,
        note: Option<String>,
    ) -> Result<u64, WorkflowError> {
        let result = self.try_update(actor, declaration_id, expected, date, line_items, note);
        self.report("update", actor, declaration_id, result, "Expense declaration updated")
    }

    /// Permanently remove a pending or rejected declaration.
    pub fn delete(
        &self,
        actor: &Actor,
        declaration_id: DeclarationId,
        expected: ExpectedVersion,
    ) -> Result<(), WorkflowError> {
        let result = self.try_delete(actor, declaration_id, expected);
        self.report("delete", actor, declaration_id, result, "Expense declaration deleted")
    }

    pub fn approve(
        &self,
        actor: &Actor,
        declaration_id: DeclarationId,
        expected: ExpectedVersion,
    ) -> Result<u64, WorkflowError> {
        let result = self.try_approve(actor, declaration_id, expected);
        self.report("approve", actor, declaration_id, result, "Expense declaration approved")
    }

    /// Reject a pending declaration. A blank reason fails before the store is
    /// touched.
    pub fn reject(
        &self,
        actor: &Actor,
        declaration_id: DeclarationId,
        expected: ExpectedVersion,
        reason: &str,
    ) -> Result<u64, WorkflowError> {
        let result = self.try_reject(actor, declaration_id, expected, reason);
        self.report("reject", actor, declaration_id, result, "Expense declaration rejected")
    }

    /// Record payment of an approved declaration.
    pub fn mark_paid(
        &self,
        actor: &Actor,
        declaration_id: DeclarationId,
        expected: ExpectedVersion,
        note: &str,
    ) -> Result<u64, WorkflowError> {
        let result = self.try_mark_paid(actor, declaration_id, expected, note);
        self.report("mark_paid", actor, declaration_id, result, "Payment recorded")
    }

    fn try_create(
        &self,
        actor: &Actor,
        declaration_id: DeclarationId,
        site: SiteRef,
        date: NaiveDate,
        line_items: Vec<LineItemInput>,
        note: Option<String>,
    ) -> Result<DeclarationId, WorkflowError> {
        authorize(actor, &capabilities::EXPENSE_CREATE)?;
        self.validate_line_items(&line_items)?;

        let cmd = ExpenseDeclarationCommand::Submit(SubmitDeclaration {
            declaration_id,
            creator: Submitter {
                id: actor.user_id,
                name: actor.display_name.clone(),
            },
            site,
            date,
            note,
            line_items,
            occurred_at: Utc::now(),
        });
        self.execute(declaration_id, ExpectedVersion::Exact(0), cmd)?;
        Ok(declaration_id)
    }

    fn try_update(
        &self,
        actor: &Actor,
        declaration_id: DeclarationId,
        expected: ExpectedVersion,
        date: NaiveDate,
        line_items: Vec<LineItemInput>,
        note: Option<String>,
    ) -> Result<u64, WorkflowError> {
        self.validate_line_items(&line_items)?;
        self.authorize_owner_or_manager(actor, declaration_id)?;

        let cmd = ExpenseDeclarationCommand::Revise(ReviseDeclaration {
            declaration_id,
            date,
            note,
            line_items,
            occurred_at: Utc::now(),
        });
        self.execute(declaration_id, expected, cmd)
    }

    fn try_delete(
        &self,
        actor: &Actor,
        declaration_id: DeclarationId,
        expected: ExpectedVersion,
    ) -> Result<(), WorkflowError> {
        self.authorize_owner_or_manager(actor, declaration_id)?;

        let cmd = ExpenseDeclarationCommand::Delete(DeleteDeclaration {
            declaration_id,
            deleted_by: actor.user_id,
            occurred_at: Utc::now(),
        });
        self.execute(declaration_id, expected, cmd)?;
        Ok(())
    }

    fn try_approve(
        &self,
        actor: &Actor,
        declaration_id: DeclarationId,
        expected: ExpectedVersion,
    ) -> Result<u64, WorkflowError> {
        authorize(actor, &capabilities::EXPENSE_APPROVE)?;

        let cmd = ExpenseDeclarationCommand::Approve(ApproveDeclaration {
            declaration_id,
            approver_id: actor.user_id,
            approver_name: actor.display_name.clone(),
            occurred_at: Utc::now(),
        });
        self.execute(declaration_id, expected, cmd)
    }

    fn try_reject(
        &self,
        actor: &Actor,
        declaration_id: DeclarationId,
        expected: ExpectedVersion,
        reason: &str,
    ) -> Result<u64, WorkflowError> {
        authorize(actor, &capabilities::EXPENSE_APPROVE)?;
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(WorkflowError::Validation(
                "a rejection reason is required".to_string(),
            ));
        }

        let cmd = ExpenseDeclarationCommand::Reject(RejectDeclaration {
            declaration_id,
            approver_id: actor.user_id,
            approver_name: actor.display_name.clone(),
            reason: reason.to_string(),
            occurred_at: Utc::now(),
        });
        self.execute(declaration_id, expected, cmd)
    }

    fn try_mark_paid(
        &self,
        actor: &Actor,
        declaration_id: DeclarationId,
        expected: ExpectedVersion,
        note: &str,
    ) -> Result<u64, WorkflowError> {
        authorize(actor, &capabilities::EXPENSE_MANAGE)?;

        let cmd = ExpenseDeclarationCommand::MarkPaid(MarkPaid {
            declaration_id,
            payer_id: actor.user_id,
            payer_name: actor.display_name.clone(),
            note: note.trim().to_string(),
            occurred_at: Utc::now(),
        });
        self.execute(declaration_id, expected, cmd)
    }

    // ---- queries ------------------------------------------------------------

    /// Single declaration, visible if any list the actor may run would show it.
    pub fn get(
        &self,
        actor: &Actor,
        declaration_id: DeclarationId,
    ) -> Result<DeclarationView, WorkflowError> {
        let result = self
            .declarations
            .get(&declaration_id)
            .ok_or(WorkflowError::NotFound)
            .and_then(|view| {
                let visible = [
                    ListQuery::All,
                    ListQuery::ByCreator(actor.user_id),
                    ListQuery::PendingApproval,
                    ListQuery::ApprovedUnpaid,
                ]
                .iter()
                .any(|q| q.matches(&view) && authorize_query(actor, q).is_ok());
                if visible {
                    Ok(view)
                } else {
                    Err(WorkflowError::Forbidden(format!(
                        "declaration {declaration_id} is not visible to this user"
                    )))
                }
            });
        self.report_read("get", actor, result)
    }

    /// Run a list query with an optional filter. Each result is a full snapshot.
    pub fn list(
        &self,
        actor: &Actor,
        query: ListQuery,
        filter: &ListFilter,
    ) -> Result<Vec<DeclarationView>, WorkflowError> {
        let result = authorize_query(actor, &query)
            .map(|_| self.declarations.query(&query, filter))
            .map_err(WorkflowError::from);
        self.report_read("list", actor, result)
    }

    pub fn list_by_creator(
        &self,
        actor: &Actor,
        creator_id: UserId,
    ) -> Result<Vec<DeclarationView>, WorkflowError> {
        self.list(actor, ListQuery::ByCreator(creator_id), &ListFilter::default())
    }

    pub fn list_pending_approval(
        &self,
        actor: &Actor,
    ) -> Result<Vec<DeclarationView>, WorkflowError> {
        self.list(actor, ListQuery::PendingApproval, &ListFilter::default())
    }

    pub fn list_approved_unpaid(
        &self,
        actor: &Actor,
    ) -> Result<Vec<DeclarationView>, WorkflowError> {
        self.list(actor, ListQuery::ApprovedUnpaid, &ListFilter::default())
    }

    pub fn list_all(
        &self,
        actor: &Actor,
        filter: &ListFilter,
    ) -> Result<Vec<DeclarationView>, WorkflowError> {
        self.list(actor, ListQuery::All, filter)
    }

    /// Count, totals and per-status counts over a list query.
    pub fn summary(
        &self,
        actor: &Actor,
        query: ListQuery,
        filter: &ListFilter,
    ) -> Result<ExpenseSummary, WorkflowError> {
        let result = authorize_query(actor, &query)
            .map(|_| self.declarations.summary(&query, filter))
            .map_err(WorkflowError::from);
        self.report_read("summary", actor, result)
    }

    /// Open a snapshot feed for a list query.
    pub fn subscribe(
        &self,
        actor: &Actor,
        query: ListQuery,
        filter: ListFilter,
    ) -> Result<SnapshotFeed<R>, WorkflowError> {
        let result = authorize_query(actor, &query)
            .map(|_| {
                let subscription = self.dispatcher.bus().subscribe();
                SnapshotFeed::new(self.declarations.clone(), subscription, query, filter)
            })
            .map_err(WorkflowError::from);
        self.report_read("subscribe", actor, result)
    }

    /// Drop the read model and replay every stored event.
    pub fn rebuild_read_model(&self) -> Result<(), WorkflowError> {
        let events = self
            .dispatcher
            .store()
            .load_all()
            .map_err(|e| WorkflowError::Store(e.to_string()))?;
        let count = events.len();
        self.declarations
            .rebuild_from_scratch(events.iter().map(StoredEvent::to_envelope))
            .map_err(|e| WorkflowError::Store(e.to_string()))?;
        tracing::info!(events = count, "declaration read model rebuilt");
        Ok(())
    }

    // ---- internals ----------------------------------------------------------

    fn validate_line_items(&self, line_items: &[LineItemInput]) -> Result<(), WorkflowError> {
        if line_items.is_empty() {
            return Err(WorkflowError::Validation(
                "at least one line item is required".to_string(),
            ));
        }
        if line_items.len() > self.config.max_line_items {
            return Err(WorkflowError::Validation(format!(
                "too many line items ({} > {})",
                line_items.len(),
                self.config.max_line_items
            )));
        }
        if let Some(line) = line_items
            .iter()
            .find(|l| parse_amount(&l.amount).is_some_and(|a| a > MAX_LINE_AMOUNT))
        {
            return Err(WorkflowError::Validation(format!(
                "line amount '{}' exceeds the limit of {MAX_LINE_AMOUNT}",
                line.amount.trim()
            )));
        }
        if !line_items.iter().any(|l| !l.description.trim().is_empty()) {
            return Err(WorkflowError::Validation(
                "at least one line item needs a description".to_string(),
            ));
        }
        Ok(())
    }

    fn authorize_owner_or_manager(
        &self,
        actor: &Actor,
        declaration_id: DeclarationId,
    ) -> Result<(), WorkflowError> {
        if actor.has_capability(&capabilities::EXPENSE_MANAGE) {
            return Ok(());
        }
        authorize(actor, &capabilities::EXPENSE_CREATE)?;

        let current: ExpenseDeclaration = self
            .dispatcher
            .load(declaration_id.0, |aid| ExpenseDeclaration::empty(DeclarationId::new(aid)))?;
        if !current.is_created() || current.is_deleted() {
            return Err(WorkflowError::NotFound);
        }
        match current.creator() {
            Some(creator) if creator.id == actor.user_id => Ok(()),
            _ => Err(WorkflowError::Forbidden(
                "only the creator or an expense manager may change this declaration".to_string(),
            )),
        }
    }

    fn expected(&self, expected: ExpectedVersion) -> ExpectedVersion {
        if self.config.enforce_versions {
            expected
        } else {
            ExpectedVersion::Any
        }
    }

    /// Dispatch and project; returns the new record version.
    fn execute(
        &self,
        declaration_id: DeclarationId,
        expected: ExpectedVersion,
        command: ExpenseDeclarationCommand,
    ) -> Result<u64, WorkflowError> {
        let committed = self.dispatcher.dispatch(
            declaration_id.0,
            AGGREGATE_TYPE,
            self.expected(expected),
            command,
            |aid| ExpenseDeclaration::empty(DeclarationId::new(aid)),
        )?;

        for stored in &committed {
            match self.declarations.apply_envelope(&stored.to_envelope()) {
                Ok(()) => {}
                // A concurrent commit on this stream has not been applied yet.
                Err(DeclarationProjectionError::SequenceGap { .. }) => {
                    self.catch_up(declaration_id);
                    break;
                }
                Err(err) => {
                    // The append stands; a rebuild repairs the read model.
                    tracing::error!(
                        %declaration_id,
                        sequence_number = stored.sequence_number,
                        "read model update failed: {err}"
                    );
                }
            }
        }

        Ok(committed.last().map(|e| e.sequence_number).unwrap_or(0))
    }

    /// Re-apply a stream from the store so the view reflects every commit.
    fn catch_up(&self, declaration_id: DeclarationId) {
        let result = self
            .dispatcher
            .store()
            .load_stream(declaration_id.0)
            .map_err(|e| e.to_string())
            .and_then(|history| {
                self.declarations
                    .catch_up(history.iter().map(StoredEvent::to_envelope))
                    .map_err(|e| e.to_string())
            });
        match result {
            Ok(()) => tracing::debug!(%declaration_id, "read model caught up from the store"),
            Err(err) => tracing::error!(%declaration_id, "read model catch-up failed: {err}"),
        }
    }

    fn report<T>(
        &self,
        operation: &'static str,
        actor: &Actor,
        declaration_id: DeclarationId,
        result: Result<T, WorkflowError>,
        success: &str,
    ) -> Result<T, WorkflowError> {
        match &result {
            Ok(_) => {
                tracing::info!(operation, %declaration_id, actor = %actor.user_id, "expense declaration updated");
                self.notifier.notify(Notice::success(success));
            }
            Err(err) => {
                tracing::warn!(operation, %declaration_id, actor = %actor.user_id, "expense declaration operation failed: {err}");
                self.notifier.notify(Notice::error(err.to_string()));
            }
        }
        result
    }

    fn report_read<T>(
        &self,
        operation: &'static str,
        actor: &Actor,
        result: Result<T, WorkflowError>,
    ) -> Result<T, WorkflowError> {
        if let Err(err) = &result {
            tracing::warn!(operation, actor = %actor.user_id, "expense declaration query failed: {err}");
            self.notifier.notify(Notice::error(err.to_string()));
        }
        result
    }
}

/// Who may run which list.
fn authorize_query(actor: &Actor, query: &ListQuery) -> Result<(), AuthzError> {
    match query {
        ListQuery::ByCreator(user_id) if *user_id == actor.user_id => authorize_any(
            actor,
            &[capabilities::EXPENSE_VIEW_OWN, capabilities::EXPENSE_VIEW_ALL],
        ),
        ListQuery::ByCreator(_) | ListQuery::All => {
            authorize(actor, &capabilities::EXPENSE_VIEW_ALL)
        }
        ListQuery::PendingApproval => authorize_any(
            actor,
            &[capabilities::EXPENSE_APPROVE, capabilities::EXPENSE_VIEW_ALL],
        ),
        ListQuery::ApprovedUnpaid => authorize_any(
            actor,
            &[capabilities::EXPENSE_MANAGE, capabilities::EXPENSE_VIEW_ALL],
        ),
    }
}
