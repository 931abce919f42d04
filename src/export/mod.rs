//! Incremental export pipeline
//!
//! # Modules
//!
//! - [`fetch`]: Per-action pagination state machine with bounded retries
//! - [`delivery`]: Batching of conversion records and the webhook sink
//! - [`session`]: Cycle driver tying fetch, extraction, delivery and the
//!   watermark together
//! - [`metrics`]: Cycle-level counters and histograms

pub mod delivery;
pub mod fetch;
pub mod metrics;
pub mod session;

pub use delivery::{ConversionSink, DeliveryBatcher, WebhookSink};
pub use fetch::{ActionOutcome, ActionPhase, FetchController, RetryPolicy};
pub use session::{CycleReport, ExportSession, TickOutcome};
