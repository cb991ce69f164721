//! Kulfi Ops - operations engine for a street-vendor kulfi business.
//!
//! Tracks warehouse stock, moves stock into mobile carts (Day In), runs the
//! end-of-day cash reconciliation per cart (Day Out), and keeps a nested
//! per-day/per-month ledger behind the monthly reports. The UI shell is
//! external: every workflow here is a plain async function over a
//! [`store::DocumentStore`] implementation, with time injected through
//! [`Clock`] so day-boundary logic stays deterministic under test.

use std::path::Path;

use chrono::{DateTime, Utc};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub mod carts;
pub mod db;
pub mod dayout;
pub mod error;
pub mod intents;
pub mod inventory;
pub mod lifecycle;
pub mod store;
pub mod summary;
pub mod types;

pub use db::SqliteStore;
pub use error::{OpsError, StoreError};
pub use store::{Document, DocumentStore, MemoryStore};

// ---------------------------------------------------------------------------
// Clock
// ---------------------------------------------------------------------------

/// Injected time source. The effective-date scan, day lifecycle, and cart
/// timestamps all read time through this seam.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Frozen clock for tests.
#[cfg(test)]
pub(crate) struct FixedClock(DateTime<Utc>);

#[cfg(test)]
impl FixedClock {
    pub fn from_str(timestamp: &str) -> Self {
        Self(
            DateTime::parse_from_rfc3339(timestamp)
                .expect("rfc3339 literal")
                .with_timezone(&Utc),
        )
    }
}

#[cfg(test)]
impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

/// Initialize structured logging: console output plus, when a directory is
/// given, a non-blocking daily-rolling file.
///
/// Returns the appender guard; dropping it flushes buffered log lines, so
/// the caller should hold it for the life of the process. Calling this
/// again after a subscriber is installed leaves the existing one in place.
pub fn init_logging(log_dir: Option<&Path>) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,kulfi_ops=debug"));

    let console_layer = fmt::layer().with_target(true);

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir).ok();
            let file_appender = tracing_appender::rolling::daily(dir, "kulfi");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            let layer = fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(true);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init();

    guard
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_fixed_clock_is_deterministic() {
        let clock = FixedClock::from_str("2025-04-28T08:00:00Z");
        assert_eq!(clock.now(), clock.now());
        assert_eq!(clock.now().to_rfc3339(), "2025-04-28T08:00:00+00:00");
    }

    #[test]
    #[serial]
    fn test_init_logging_console_only_is_reentrant() {
        let first = init_logging(None);
        assert!(first.is_none(), "no file guard without a log dir");
        // A second call must not panic even though a subscriber exists.
        let second = init_logging(None);
        assert!(second.is_none());
    }

    #[test]
    #[serial]
    fn test_init_logging_creates_log_dir() {
        let dir = std::env::temp_dir().join("kulfi_ops_test_logs");
        let _ = std::fs::remove_dir_all(&dir);

        let guard = init_logging(Some(&dir));
        assert!(dir.is_dir(), "log dir should be created");
        // The guard only exists when a file layer was built.
        assert!(guard.is_some());

        drop(guard);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
