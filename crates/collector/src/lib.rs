//! Experiment event collection
//!
//! The recorder sits on the user-facing request path: recording an event
//! is a non-blocking enqueue that never fails the caller. A background
//! task batches events per experiment and flushes them to the event log.

pub mod recorder;

pub use recorder::{CollectorError, EventRecorder, RecorderStats};
