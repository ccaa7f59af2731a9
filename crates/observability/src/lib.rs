//! Tracing/logging setup shared by every binary embedding the saga log.

/// Tracing configuration (filters, output format).
pub mod tracing;

pub use crate::tracing::TracingConfig;

/// Initialize process-wide observability (tracing/logging).
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init(config: &TracingConfig) {
    crate::tracing::init(config);
}
