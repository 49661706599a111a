//! Tracing and logging setup shared by every binary.

/// Initialize process-wide tracing with the format named by `LOG_FORMAT`
/// (JSON unless it says `pretty`).
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init_with(tracing::LogFormat::from_env());
}

/// Tracing configuration (filters, formats).
pub mod tracing;

pub use self::tracing::{init_with, LogFormat};
