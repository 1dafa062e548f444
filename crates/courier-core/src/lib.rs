//! Core of the scheduled-email subsystem: the job data model, the durable
//! job store queries, recipient normalization, and the dispatch engine that
//! turns due jobs into sent email.
//!
//! The concurrency story lives entirely in the store: every status mutation
//! is a conditional update (`WHERE status = ?`), which gives the `pending →
//! processing` claim compare-and-swap semantics without row locks. The
//! dispatcher, the HTTP lifecycle handlers, and the stale-job sweep all go
//! through those same conditional updates.

pub mod dispatch;
pub mod model;
pub mod recipients;
pub mod store;

pub use dispatch::{render_and_send, CycleStats, Dispatcher, DispatcherConfig, DispatcherHandle};
pub use model::{
    EmailHistoryRecord, EmailSendOutcome, JobStatus, NewHistoryRecord, NewScheduledEmail,
    ScheduledEmailJob,
};
pub use store::JobEdit;
