use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use sitedesk_core::{Aggregate, AggregateId, AggregateRoot, DomainError, SiteId, UserId};
use sitedesk_events::Event;

use crate::line_item::{self, Currency, LineItem, LineItemInput};

/// Stream type name for declaration event streams.
pub const AGGREGATE_TYPE: &str = "expenses.declaration";

/// Expense declaration identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeclarationId(pub AggregateId);

impl DeclarationId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }

    pub fn generate() -> Self {
        Self(AggregateId::new())
    }
}

impl core::fmt::Display for DeclarationId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Approval status. Payment is tracked separately (`paid`), only on Approved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExpenseStatus {
    Pending,
    Approved,
    Rejected,
}

impl core::fmt::Display for ExpenseStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(match self {
            ExpenseStatus::Pending => "pending",
            ExpenseStatus::Approved => "approved",
            ExpenseStatus::Rejected => "rejected",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submitter {
    pub id: UserId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteRef {
    pub id: SiteId,
    pub name: String,
}

/// Who approved or rejected the declaration, and when.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub actor_id: UserId,
    pub actor_name: String,
    pub decided_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub payer_id: UserId,
    pub payer_name: String,
    pub note: String,
    pub paid_at: DateTime<Utc>,
}

/// Aggregate root: ExpenseDeclaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpenseDeclaration {
    id: DeclarationId,
    creator: Option<Submitter>,
    site: Option<SiteRef>,
    date: Option<NaiveDate>,
    note: Option<String>,
    line_items: Vec<LineItem>,
    status: ExpenseStatus,
    rejection_reason: Option<String>,
    decision: Option<Decision>,
    payment: Option<Payment>,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
    version: u64,
    created: bool,
    deleted: bool,
}

impl ExpenseDeclaration {
    /// Create an empty, not-yet-submitted aggregate instance for rehydration.
    pub fn empty(id: DeclarationId) -> Self {
        Self {
            id,
            creator: None,
            site: None,
            date: None,
            note: None,
            line_items: Vec::new(),
            status: ExpenseStatus::Pending,
            rejection_reason: None,
            decision: None,
            payment: None,
            created_at: None,
            updated_at: None,
            version: 0,
            created: false,
            deleted: false,
        }
    }

    pub fn id_typed(&self) -> DeclarationId {
        self.id
    }

    pub fn creator(&self) -> Option<&Submitter> {
        self.creator.as_ref()
    }

    pub fn site(&self) -> Option<&SiteRef> {
        self.site.as_ref()
    }

    pub fn date(&self) -> Option<NaiveDate> {
        self.date
    }

    pub fn note(&self) -> Option<&str> {
        self.note.as_deref()
    }

    pub fn line_items(&self) -> &[LineItem] {
        &self.line_items
    }

    pub fn status(&self) -> ExpenseStatus {
        self.status
    }

    pub fn is_paid(&self) -> bool {
        self.payment.is_some()
    }

    pub fn rejection_reason(&self) -> Option<&str> {
        self.rejection_reason.as_deref()
    }

    pub fn decision(&self) -> Option<&Decision> {
        self.decision.as_ref()
    }

    pub fn payment(&self) -> Option<&Payment> {
        self.payment.as_ref()
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

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

impl AggregateRoot for ExpenseDeclaration {
    type Id = DeclarationId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: SubmitDeclaration (create, lands in Pending).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitDeclaration {
    pub declaration_id: DeclarationId,
    pub creator: Submitter,
    pub site: SiteRef,
    pub date: NaiveDate,
    pub note: Option<String>,
    pub line_items: Vec<LineItemInput>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ReviseDeclaration (edit while Pending).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviseDeclaration {
    pub declaration_id: DeclarationId,
    pub date: NaiveDate,
    pub note: Option<String>,
    pub line_items: Vec<LineItemInput>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApproveDeclaration {
    pub declaration_id: DeclarationId,
    pub approver_id: UserId,
    pub approver_name: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectDeclaration {
    pub declaration_id: DeclarationId,
    pub approver_id: UserId,
    pub approver_name: String,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkPaid {
    pub declaration_id: DeclarationId,
    pub payer_id: UserId,
    pub payer_name: String,
    pub note: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteDeclaration {
    pub declaration_id: DeclarationId,
    pub deleted_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExpenseDeclarationCommand {
    Submit(SubmitDeclaration),
    Revise(ReviseDeclaration),
    Approve(ApproveDeclaration),
    Reject(RejectDeclaration),
    MarkPaid(MarkPaid),
    Delete(DeleteDeclaration),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeclarationSubmitted {
    pub declaration_id: DeclarationId,
    pub creator: Submitter,
    pub site: SiteRef,
    pub date: NaiveDate,
    pub note: Option<String>,
    pub line_items: Vec<LineItem>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeclarationRevised {
    pub declaration_id: DeclarationId,
    pub date: NaiveDate,
    pub note: Option<String>,
    pub line_items: Vec<LineItem>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeclarationApproved {
    pub declaration_id: DeclarationId,
    pub approver_id: UserId,
    pub approver_name: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeclarationRejected {
    pub declaration_id: DeclarationId,
    pub approver_id: UserId,
    pub approver_name: String,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeclarationPaid {
    pub declaration_id: DeclarationId,
    pub payer_id: UserId,
    pub payer_name: String,
    pub note: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeclarationDeleted {
    pub declaration_id: DeclarationId,
    pub deleted_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExpenseDeclarationEvent {
    Submitted(DeclarationSubmitted),
    Revised(DeclarationRevised),
    Approved(DeclarationApproved),
    Rejected(DeclarationRejected),
    Paid(DeclarationPaid),
    Deleted(DeclarationDeleted),
}

impl ExpenseDeclarationEvent {
    pub fn declaration_id(&self) -> DeclarationId {
        match self {
            ExpenseDeclarationEvent::Submitted(e) => e.declaration_id,
            ExpenseDeclarationEvent::Revised(e) => e.declaration_id,
            ExpenseDeclarationEvent::Approved(e) => e.declaration_id,
            ExpenseDeclarationEvent::Rejected(e) => e.declaration_id,
            ExpenseDeclarationEvent::Paid(e) => e.declaration_id,
            ExpenseDeclarationEvent::Deleted(e) => e.declaration_id,
        }
    }
}

impl Event for ExpenseDeclarationEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ExpenseDeclarationEvent::Submitted(_) => "expenses.declaration.submitted",
            ExpenseDeclarationEvent::Revised(_) => "expenses.declaration.revised",
            ExpenseDeclarationEvent::Approved(_) => "expenses.declaration.approved",
            ExpenseDeclarationEvent::Rejected(_) => "expenses.declaration.rejected",
            ExpenseDeclarationEvent::Paid(_) => "expenses.declaration.paid",
            ExpenseDeclarationEvent::Deleted(_) => "expenses.declaration.deleted",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            ExpenseDeclarationEvent::Submitted(e) => e.occurred_at,
            ExpenseDeclarationEvent::Revised(e) => e.occurred_at,
            ExpenseDeclarationEvent::Approved(e) => e.occurred_at,
            ExpenseDeclarationEvent::Rejected(e) => e.occurred_at,
            ExpenseDeclarationEvent::Paid(e) => e.occurred_at,
            ExpenseDeclarationEvent::Deleted(e) => e.occurred_at,
        }
    }
}

impl Aggregate for ExpenseDeclaration {
    type Command = ExpenseDeclarationCommand;
    type Event = ExpenseDeclarationEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            ExpenseDeclarationEvent::Submitted(e) => {
                self.id = e.declaration_id;
                self.creator = Some(e.creator.clone());
                self.site = Some(e.site.clone());
                self.date = Some(e.date);
                self.note = e.note.clone();
                self.line_items = e.line_items.clone();
                self.status = ExpenseStatus::Pending;
                self.created_at = Some(e.occurred_at);
                self.created = true;
            }
            ExpenseDeclarationEvent::Revised(e) => {
                self.date = Some(e.date);
                self.note = e.note.clone();
                self.line_items = e.line_items.clone();
            }
            ExpenseDeclarationEvent::Approved(e) => {
                self.status = ExpenseStatus::Approved;
                self.decision = Some(Decision {
                    actor_id: e.approver_id,
                    actor_name: e.approver_name.clone(),
                    decided_at: e.occurred_at,
                });
            }
            ExpenseDeclarationEvent::Rejected(e) => {
                self.status = ExpenseStatus::Rejected;
                self.rejection_reason = Some(e.reason.clone());
                self.decision = Some(Decision {
                    actor_id: e.approver_id,
                    actor_name: e.approver_name.clone(),
                    decided_at: e.occurred_at,
                });
            }
            ExpenseDeclarationEvent::Paid(e) => {
                self.payment = Some(Payment {
                    payer_id: e.payer_id,
                    payer_name: e.payer_name.clone(),
                    note: e.note.clone(),
                    paid_at: e.occurred_at,
                });
            }
            ExpenseDeclarationEvent::Deleted(_) => {
                self.deleted = true;
            }
        }

        self.updated_at = Some(event.occurred_at());
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            ExpenseDeclarationCommand::Submit(cmd) => self.handle_submit(cmd),
            ExpenseDeclarationCommand::Revise(cmd) => self.handle_revise(cmd),
            ExpenseDeclarationCommand::Approve(cmd) => self.handle_approve(cmd),
            ExpenseDeclarationCommand::Reject(cmd) => self.handle_reject(cmd),
            ExpenseDeclarationCommand::MarkPaid(cmd) => self.handle_mark_paid(cmd),
            ExpenseDeclarationCommand::Delete(cmd) => self.handle_delete(cmd),
        }
    }
}

/// Normalize and validate submitted lines.
///
/// At least one line is required and at least one must carry a description.
/// Unusable amounts are kept as zero; oversized ones are refused.
fn normalize_lines(inputs: &[LineItemInput]) -> Result<Vec<LineItem>, DomainError> {
    if inputs.is_empty() {
        return Err(DomainError::validation(
            "a declaration needs at least one line item",
        ));
    }
    let lines = inputs
        .iter()
        .map(LineItem::from_input)
        .collect::<Result<Vec<_>, _>>()?;
    if !lines.iter().any(LineItem::is_described) {
        return Err(DomainError::validation(
            "at least one line item must have a description",
        ));
    }
    Ok(lines)
}

fn normalize_note(note: &Option<String>) -> Option<String> {
    note.as_ref()
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
}

impl ExpenseDeclaration {
    fn ensure_live(&self, declaration_id: DeclarationId) -> Result<(), DomainError> {
        if !self.created || self.deleted {
            return Err(DomainError::not_found());
        }
        if self.id != declaration_id {
            return Err(DomainError::invariant("declaration_id mismatch"));
        }
        Ok(())
    }

    fn ensure_pending(&self, action: &str) -> Result<(), DomainError> {
        if self.status != ExpenseStatus::Pending {
            return Err(DomainError::precondition(format!(
                "only pending declarations can be {action} (current: {})",
                self.status
            )));
        }
        Ok(())
    }

    /// A declaration leaves PENDING only with a described line whose amount
    /// was actually parsed.
    fn ensure_has_complete_line(&self) -> Result<(), DomainError> {
        if !self.line_items.iter().any(LineItem::is_complete) {
            return Err(DomainError::precondition(
                "declaration needs a described line item with a valid amount",
            ));
        }
        Ok(())
    }

    fn handle_submit(
        &self,
        cmd: &SubmitDeclaration,
    ) -> Result<Vec<ExpenseDeclarationEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("declaration already exists"));
        }
        let line_items = normalize_lines(&cmd.line_items)?;

        Ok(vec![ExpenseDeclarationEvent::Submitted(DeclarationSubmitted {
            declaration_id: cmd.declaration_id,
            creator: cmd.creator.clone(),
            site: cmd.site.clone(),
            date: cmd.date,
            note: normalize_note(&cmd.note),
            line_items,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_revise(
        &self,
        cmd: &ReviseDeclaration,
    ) -> Result<Vec<ExpenseDeclarationEvent>, DomainError> {
        self.ensure_live(cmd.declaration_id)?;
        self.ensure_pending("edited")?;
        let line_items = normalize_lines(&cmd.line_items)?;

        Ok(vec![ExpenseDeclarationEvent::Revised(DeclarationRevised {
            declaration_id: cmd.declaration_id,
            date: cmd.date,
            note: normalize_note(&cmd.note),
            line_items,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_approve(
        &self,
        cmd: &ApproveDeclaration,
    ) -> Result<Vec<ExpenseDeclarationEvent>, DomainError> {
        self.ensure_live(cmd.declaration_id)?;
        self.ensure_pending("approved")?;
        self.ensure_has_complete_line()?;

        Ok(vec![ExpenseDeclarationEvent::Approved(DeclarationApproved {
            declaration_id: cmd.declaration_id,
            approver_id: cmd.approver_id,
            approver_name: cmd.approver_name.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_reject(
        &self,
        cmd: &RejectDeclaration,
    ) -> Result<Vec<ExpenseDeclarationEvent>, DomainError> {
        let reason = cmd.reason.trim();
        if reason.is_empty() {
            return Err(DomainError::validation("rejection reason must not be empty"));
        }
        self.ensure_live(cmd.declaration_id)?;
        self.ensure_pending("rejected")?;
        self.ensure_has_complete_line()?;

        Ok(vec![ExpenseDeclarationEvent::Rejected(DeclarationRejected {
            declaration_id: cmd.declaration_id,
            approver_id: cmd.approver_id,
            approver_name: cmd.approver_name.clone(),
            reason: reason.to_string(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_mark_paid(
        &self,
        cmd: &MarkPaid,
    ) -> Result<Vec<ExpenseDeclarationEvent>, DomainError> {
        self.ensure_live(cmd.declaration_id)?;

        if self.status != ExpenseStatus::Approved {
            return Err(DomainError::precondition(format!(
                "only approved declarations can be paid (current: {})",
                self.status
            )));
        }
        if self.payment.is_some() {
            return Err(DomainError::precondition("declaration is already paid"));
        }

        Ok(vec![ExpenseDeclarationEvent::Paid(DeclarationPaid {
            declaration_id: cmd.declaration_id,
            payer_id: cmd.payer_id,
            payer_name: cmd.payer_name.clone(),
            note: cmd.note.trim().to_string(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_delete(
        &self,
        cmd: &DeleteDeclaration,
    ) -> Result<Vec<ExpenseDeclarationEvent>, DomainError> {
        self.ensure_live(cmd.declaration_id)?;

        if self.status == ExpenseStatus::Approved {
            return Err(DomainError::precondition(
                "approved declarations cannot be deleted",
            ));
        }

        Ok(vec![ExpenseDeclarationEvent::Deleted(DeclarationDeleted {
            declaration_id: cmd.declaration_id,
            deleted_by: cmd.deleted_by,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, 2).unwrap()
    }

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn taxi() -> LineItemInput {
        LineItemInput::new(day(), "Taxi", "120", Currency::Tl)
    }

    fn submit_cmd(id: DeclarationId, lines: Vec<LineItemInput>) -> ExpenseDeclarationCommand {
        ExpenseDeclarationCommand::Submit(SubmitDeclaration {
            declaration_id: id,
            creator: Submitter {
                id: UserId::new(),
                name: "Ali Yılmaz".to_string(),
            },
            site: SiteRef {
                id: SiteId::new(),
                name: "Ataşehir Blok A".to_string(),
            },
            date: day(),
            note: None,
            line_items: lines,
            occurred_at: test_time(),
        })
    }

    fn execute(d: &mut ExpenseDeclaration, cmd: ExpenseDeclarationCommand) -> Result<(), DomainError> {
        let events = d.handle(&cmd)?;
        for e in &events {
            d.apply(e);
        }
        Ok(())
    }

    fn submitted() -> ExpenseDeclaration {
        let id = DeclarationId::generate();
        let mut d = ExpenseDeclaration::empty(id);
        execute(&mut d, submit_cmd(id, vec![taxi()])).unwrap();
        d
    }

    fn approve_cmd(id: DeclarationId, approver: UserId) -> ExpenseDeclarationCommand {
        ExpenseDeclarationCommand::Approve(ApproveDeclaration {
            declaration_id: id,
            approver_id: approver,
            approver_name: "Proje Müdürü".to_string(),
            occurred_at: test_time(),
        })
    }

    fn reject_cmd(id: DeclarationId, reason: &str) -> ExpenseDeclarationCommand {
        ExpenseDeclarationCommand::Reject(RejectDeclaration {
            declaration_id: id,
            approver_id: UserId::new(),
            approver_name: "Proje Müdürü".to_string(),
            reason: reason.to_string(),
            occurred_at: test_time(),
        })
    }

    fn pay_cmd(id: DeclarationId, payer: UserId) -> ExpenseDeclarationCommand {
        ExpenseDeclarationCommand::MarkPaid(MarkPaid {
            declaration_id: id,
            payer_id: payer,
            payer_name: "Muhasebe".to_string(),
            note: "Bank transfer".to_string(),
            occurred_at: test_time(),
        })
    }

    fn delete_cmd(id: DeclarationId) -> ExpenseDeclarationCommand {
        ExpenseDeclarationCommand::Delete(DeleteDeclaration {
            declaration_id: id,
            deleted_by: UserId::new(),
            occurred_at: test_time(),
        })
    }

    #[test]
    fn unparseable_amounts_cannot_leave_pending() {
        let id = DeclarationId::generate();
        let mut d = ExpenseDeclaration::empty(id);
        let junk = LineItemInput::new(day(), "Taxi", "abc", Currency::Tl);
        execute(&mut d, submit_cmd(id, vec![junk])).unwrap();
        assert_eq!(d.total_amount(), Decimal::ZERO);

        let err = execute(&mut d, approve_cmd(id, UserId::new())).unwrap_err();
        assert!(matches!(err, DomainError::Precondition(_)));
        let err = execute(&mut d, reject_cmd(id, "no receipt")).unwrap_err();
        assert!(matches!(err, DomainError::Precondition(_)));
        assert_eq!(d.status(), ExpenseStatus::Pending);
        assert_eq!(d.version(), 1);

        let fixed = ExpenseDeclarationCommand::Revise(ReviseDeclaration {
            declaration_id: id,
            date: day(),
            note: None,
            line_items: vec![LineItemInput::new(day(), "Taxi", "abc", Currency::Tl), taxi()],
            occurred_at: test_time(),
        });
        execute(&mut d, fixed).unwrap();
        execute(&mut d, approve_cmd(id, UserId::new())).unwrap();
        assert_eq!(d.status(), ExpenseStatus::Approved);
    }

    #[test]
    fn oversized_line_amount_fails_submission() {
        let id = DeclarationId::generate();
        let d = ExpenseDeclaration::empty(id);
        let huge = LineItemInput::new(day(), "Taxi", "79228162514264337593543950335", Currency::Tl);
        let err = d.handle(&submit_cmd(id, vec![taxi(), huge])).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn submit_lands_in_pending_and_unpaid() {
        let d = submitted();
        assert_eq!(d.status(), ExpenseStatus::Pending);
        assert!(!d.is_paid());
        assert_eq!(d.total_amount(), Decimal::from(120));
        assert_eq!(d.version(), 1);
        assert_eq!(d.created_at(), d.updated_at());
    }

    #[test]
    fn submit_without_lines_is_rejected() {
        let id = DeclarationId::generate();
        let d = ExpenseDeclaration::empty(id);
        let err = d.handle(&submit_cmd(id, vec![])).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn submit_without_any_description_is_rejected() {
        let id = DeclarationId::generate();
        let d = ExpenseDeclaration::empty(id);
        let blank = LineItemInput::new(day(), "   ", "50", Currency::Tl);
        let err = d.handle(&submit_cmd(id, vec![blank])).unwrap_err();
        match err {
            DomainError::Validation(msg) if msg.contains("description") => {}
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn submit_coerces_bad_amounts_to_zero() {
        let id = DeclarationId::generate();
        let mut d = ExpenseDeclaration::empty(id);
        let lines = vec![
            taxi(),
            LineItemInput::new(day(), "Otopark", "on beş", Currency::Tl),
        ];
        execute(&mut d, submit_cmd(id, lines)).unwrap();
        assert_eq!(d.line_items()[1].amount, Decimal::ZERO);
        assert_eq!(d.total_amount(), Decimal::from(120));
    }

    #[test]
    fn resubmitting_an_existing_declaration_conflicts() {
        let d = submitted();
        let err = d.handle(&submit_cmd(d.id_typed(), vec![taxi()])).unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
    }

    #[test]
    fn approve_records_approver() {
        let mut d = submitted();
        let approver = UserId::new();
        { let id = d.id_typed(); execute(&mut d, approve_cmd(id, approver)).unwrap(); }

        assert_eq!(d.status(), ExpenseStatus::Approved);
        let decision = d.decision().unwrap();
        assert_eq!(decision.actor_id, approver);
        assert_eq!(d.version(), 2);
    }

    #[test]
    fn second_approval_is_refused_and_keeps_first_approver() {
        let mut d = submitted();
        let first = UserId::new();
        { let id = d.id_typed(); execute(&mut d, approve_cmd(id, first)).unwrap(); }

        let err = d.handle(&approve_cmd(d.id_typed(), UserId::new())).unwrap_err();
        assert!(matches!(err, DomainError::Precondition(_)));
        assert_eq!(d.decision().unwrap().actor_id, first);
    }

    #[test]
    fn rejecting_an_approved_declaration_is_refused() {
        let mut d = submitted();
        { let id = d.id_typed(); execute(&mut d, approve_cmd(id, UserId::new())).unwrap(); }
        let err = d.handle(&reject_cmd(d.id_typed(), "late receipt")).unwrap_err();
        assert!(matches!(err, DomainError::Precondition(_)));
        assert_eq!(d.status(), ExpenseStatus::Approved);
    }

    #[test]
    fn approving_a_rejected_declaration_is_refused() {
        let mut d = submitted();
        { let id = d.id_typed(); execute(&mut d, reject_cmd(id, "missing receipt")).unwrap(); }
        let err = d.handle(&approve_cmd(d.id_typed(), UserId::new())).unwrap_err();
        assert!(matches!(err, DomainError::Precondition(_)));
        assert_eq!(d.rejection_reason(), Some("missing receipt"));
    }

    #[test]
    fn empty_rejection_reason_is_a_validation_error() {
        let d = submitted();
        let err = d.handle(&reject_cmd(d.id_typed(), "  ")).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn mark_paid_requires_approval() {
        let d = submitted();
        let err = d.handle(&pay_cmd(d.id_typed(), UserId::new())).unwrap_err();
        assert!(matches!(err, DomainError::Precondition(_)));
        assert!(!d.is_paid());
    }

    #[test]
    fn mark_paid_sets_payer_once() {
        let mut d = submitted();
        { let id = d.id_typed(); execute(&mut d, approve_cmd(id, UserId::new())).unwrap(); }
        let payer = UserId::new();
        { let id = d.id_typed(); execute(&mut d, pay_cmd(id, payer)).unwrap(); }

        assert!(d.is_paid());
        let payment = d.payment().unwrap();
        assert_eq!(payment.payer_id, payer);
        assert_eq!(payment.note, "Bank transfer");
        assert_eq!(d.status(), ExpenseStatus::Approved);

        let err = d.handle(&pay_cmd(d.id_typed(), UserId::new())).unwrap_err();
        assert!(matches!(err, DomainError::Precondition(_)));
    }

    #[test]
    fn revise_replaces_lines_while_pending() {
        let mut d = submitted();
        let cmd = ExpenseDeclarationCommand::Revise(ReviseDeclaration {
            declaration_id: d.id_typed(),
            date: day(),
            note: Some(" taşeron ödemesi ".to_string()),
            line_items: vec![
                LineItemInput::new(day(), "Taxi", "120", Currency::Tl),
                LineItemInput::new(day(), "Hotel", "80", Currency::Eur),
            ],
            occurred_at: test_time(),
        });
        execute(&mut d, cmd).unwrap();

        assert_eq!(d.line_items().len(), 2);
        assert_eq!(d.note(), Some("taşeron ödemesi"));
        assert_eq!(d.nominal_total(), Decimal::from(200));
        assert_eq!(d.total_amount(), Decimal::from(120));
    }

    #[test]
    fn revise_after_approval_is_refused() {
        let mut d = submitted();
        { let id = d.id_typed(); execute(&mut d, approve_cmd(id, UserId::new())).unwrap(); }
        let cmd = ExpenseDeclarationCommand::Revise(ReviseDeclaration {
            declaration_id: d.id_typed(),
            date: day(),
            note: None,
            line_items: vec![taxi()],
            occurred_at: test_time(),
        });
        assert!(matches!(d.handle(&cmd).unwrap_err(), DomainError::Precondition(_)));
    }

    #[test]
    fn delete_is_allowed_for_pending_and_rejected() {
        let mut pending = submitted();
        { let id = pending.id_typed(); execute(&mut pending, delete_cmd(id)).unwrap(); }
        assert!(pending.is_deleted());

        let mut rejected = submitted();
        { let id = rejected.id_typed(); execute(&mut rejected, reject_cmd(id, "duplicate")).unwrap(); }
        { let id = rejected.id_typed(); execute(&mut rejected, delete_cmd(id)).unwrap(); }
        assert!(rejected.is_deleted());
    }

    #[test]
    fn delete_of_approved_is_refused() {
        let mut d = submitted();
        { let id = d.id_typed(); execute(&mut d, approve_cmd(id, UserId::new())).unwrap(); }
        let err = d.handle(&delete_cmd(d.id_typed())).unwrap_err();
        assert!(matches!(err, DomainError::Precondition(_)));

        { let id = d.id_typed(); execute(&mut d, pay_cmd(id, UserId::new())).unwrap(); }
        let err = d.handle(&delete_cmd(d.id_typed())).unwrap_err();
        assert!(matches!(err, DomainError::Precondition(_)));
    }

    #[test]
    fn deleted_declarations_behave_as_missing() {
        let mut d = submitted();
        { let id = d.id_typed(); execute(&mut d, delete_cmd(id)).unwrap(); }
        let err = d.handle(&approve_cmd(d.id_typed(), UserId::new())).unwrap_err();
        assert_eq!(err, DomainError::NotFound);
    }

    #[test]
    fn commands_for_unknown_declarations_are_not_found() {
        let id = DeclarationId::generate();
        let d = ExpenseDeclaration::empty(id);
        assert_eq!(
            d.handle(&approve_cmd(id, UserId::new())).unwrap_err(),
            DomainError::NotFound
        );
    }

    #[test]
    fn events_survive_a_json_round_trip() {
        let id = DeclarationId::generate();
        let d = ExpenseDeclaration::empty(id);
        let events = d.handle(&submit_cmd(id, vec![taxi()])).unwrap();

        let json = serde_json::to_value(&events[0]).unwrap();
        let back: ExpenseDeclarationEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, events[0]);
        assert_eq!(back.event_type(), "expenses.declaration.submitted");
    }
}
