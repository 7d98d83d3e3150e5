//! Tracing and logging (shared setup).
//!
//! The workspace ships libraries only; the embedding binary calls [`init`]
//! once at startup, before building the workflow:
//!
//! ```no_run
//! let format = sitedesk_observability::LogFormat::from_env()?;
//! sitedesk_observability::init(format);
//! # Ok::<(), anyhow::Error>(())
//! ```

/// Initialize process-wide logging in the given format.
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init(format: LogFormat) {
    tracing::init(format);
}

/// Tracing configuration (filters, output format).
pub mod tracing;

pub use self::tracing::LogFormat;
