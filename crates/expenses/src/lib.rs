//! Expense declaration domain module (masraf beyanı, event-sourced).
//!
//! Business rules for site expense declarations, implemented as
//! deterministic domain logic (no IO, no storage, no auth lookups).

pub mod declaration;
pub mod line_item;
pub mod summary;

pub use declaration::{
    ApproveDeclaration, DeclarationApproved, DeclarationDeleted, DeclarationId,
    DeclarationPaid, DeclarationRejected, DeclarationRevised, DeclarationSubmitted, Decision,
    DeleteDeclaration, ExpenseDeclaration, ExpenseDeclarationCommand, ExpenseDeclarationEvent,
    ExpenseStatus, MarkPaid, Payment, RejectDeclaration, ReviseDeclaration, SiteRef,
    SubmitDeclaration, Submitter, AGGREGATE_TYPE,
};
pub use line_item::{
    Currency, LineItem, LineItemInput, MAX_LINE_AMOUNT, normalize_amount, parse_amount,
};
pub use summary::{ExpenseSummary, Summarizable};
