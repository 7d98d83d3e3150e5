//! Infrastructure layer: event store, dispatch, read models, feeds and the
//! expense declaration workflow service.

pub mod command_dispatcher;
pub mod config;
pub mod event_store;
pub mod feed;
pub mod notify;
pub mod projections;
pub mod read_model;
pub mod workflow;

pub use config::WorkflowConfig;
pub use feed::SnapshotFeed;
pub use notify::{Notice, NoticeLevel, Notifier, RecordingNotifier, TracingNotifier};
pub use workflow::{ExpenseWorkflow, InMemoryExpenseWorkflow, WorkflowError};
