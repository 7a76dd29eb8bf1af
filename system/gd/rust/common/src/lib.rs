//! Bluetooth common library

/// Provides keyed one-shot timers delivered as messages
pub mod time;

mod logging;
pub use logging::*;
