//! Session diagnostics for the recorder.
//!
//! Counts what happened to every sample (appended, dropped at capacity, or
//! discarded on reconnect) and every flush, so data loss is always visible.

pub mod counters;

// Re-export commonly used types
pub use counters::{
    create_shared_diagnostics, create_shared_diagnostics_with_persistence, Diagnostics,
    DiagnosticsStats, SharedDiagnostics,
};
