pub mod config;
pub mod core;
pub mod error;
pub mod render;
pub mod store;
pub mod sync;

use std::sync::atomic::{AtomicBool, Ordering};

pub use error::{Result, TodoError};

/// Whether debug logging is active, shared between the logger filter and `--verbose`.
static DEBUG_LOGGING: AtomicBool = AtomicBool::new(false);

pub fn set_debug_logging(enabled: bool) {
    DEBUG_LOGGING.store(enabled, Ordering::Relaxed);
}

pub fn debug_logging() -> bool {
    DEBUG_LOGGING.load(Ordering::Relaxed)
}
