//! Projections (read model builders).
//!
//! Projections consume published events and keep query-optimized views.
//! They are rebuildable from the event store and idempotent under
//! at-least-once delivery.

pub mod expense_declarations;

pub use expense_declarations::{
    DeclarationProjectionError, DeclarationView, ExpenseDeclarationsProjection, ListFilter,
    ListQuery,
};
