//! Day lifecycle: Start-Day / Close-Day sequencing around the
//! reconciliation engine.
//!
//! A date moves `NOT_STARTED -> STARTED -> CLOSED` and never back. At most
//! one date is STARTED at a time; the *effective date* is that date, found
//! by scanning month ledgers backward from the current month, so a vendor
//! can finish yesterday's half-closed day after midnight before starting a
//! new one.

use chrono::{Datelike, NaiveDate};
use serde_json::json;
use tracing::{info, warn};

use crate::carts::load_carts;
use crate::error::OpsError;
use crate::intents::{commit_write_set, WriteOp};
use crate::inventory::load_warehouse;
use crate::store::DocumentStore;
use crate::summary::{
    date_string, ensure_month, finalize_patch, load_month, load_summary, write_summary,
};
use crate::types::{DailySummary, CARTS_COLLECTION};
use crate::Clock;

// ---------------------------------------------------------------------------
// Derived day state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DayState {
    NotStarted,
    Started,
    Closed,
}

/// Derive the lifecycle state of a date from its summary entry.
pub fn day_state(summary: Option<&DailySummary>) -> DayState {
    match summary {
        None => DayState::NotStarted,
        Some(s) if s.day_closed => DayState::Closed,
        Some(_) => DayState::Started,
    }
}

/// The business date currently open for operations.
///
/// Scans month ledgers backward from the current month within the current
/// year; the first month holding unclosed dates yields its earliest one.
/// Falls back to today when every recorded day is closed.
pub async fn effective_date<S: DocumentStore, C: Clock>(
    clock: &C,
    store: &S,
) -> Result<NaiveDate, OpsError> {
    let today = clock.now().date_naive();
    let year = format!("{:04}", today.year());

    for month_num in (1..=today.month()).rev() {
        let month = format!("{month_num:02}");
        let Some(doc) = load_month(store, &year, &month).await? else {
            continue;
        };
        let unclosed = doc
            .daily_summaries
            .iter()
            .filter(|(_, s)| !s.day_closed)
            .map(|(date, _)| date)
            .min();
        if let Some(date_str) = unclosed {
            match NaiveDate::parse_from_str(date_str, "%Y-%m-%d") {
                Ok(date) => return Ok(date),
                Err(e) => warn!(date = %date_str, "unparseable summary date: {e}"),
            }
        }
    }

    Ok(today)
}

/// What the operations screen needs on focus: the working date plus the
/// started/closed flags for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayOverview {
    pub effective_date: NaiveDate,
    pub day_started: bool,
    pub day_closed: bool,
}

pub async fn day_overview<S: DocumentStore, C: Clock>(
    clock: &C,
    store: &S,
) -> Result<DayOverview, OpsError> {
    let date = effective_date(clock, store).await?;
    let year = format!("{:04}", date.year());
    let month = format!("{:02}", date.month());

    let mut overview = DayOverview {
        effective_date: date,
        day_started: false,
        day_closed: false,
    };

    if let Some(doc) = load_month(store, &year, &month).await? {
        let has_unclosed = doc.daily_summaries.values().any(|s| !s.day_closed);
        if has_unclosed {
            overview.day_started = true;
        } else if let Some(summary) = doc.daily_summaries.get(&date_string(date)) {
            overview.day_started = true;
            overview.day_closed = summary.day_closed;
        }
    }

    Ok(overview)
}

// ---------------------------------------------------------------------------
// Start day
// ---------------------------------------------------------------------------

/// Open today's ledger entry with the current warehouse as opening stock.
///
/// Fails with `PriorDayUnclosed` while yesterday's entry is still open, and
/// rejects a restart of an already-started day (state transitions are
/// monotonic).
pub async fn start_day<S: DocumentStore, C: Clock>(
    clock: &C,
    store: &S,
) -> Result<DailySummary, OpsError> {
    let today = clock.now().date_naive();

    if let Some(yesterday) = today.pred_opt() {
        if let Some(previous) = load_summary(store, yesterday).await? {
            if !previous.day_closed {
                return Err(OpsError::PriorDayUnclosed {
                    date: date_string(yesterday),
                });
            }
        }
    }

    if load_summary(store, today).await?.is_some() {
        return Err(OpsError::validation(format!(
            "day {} already started",
            date_string(today)
        )));
    }

    ensure_month(store, today).await?;
    let warehouse = load_warehouse(store).await?;

    let summary = DailySummary {
        date: date_string(today),
        opening_stock: Some(warehouse),
        closing_stock: None,
        day_started: true,
        day_closed: false,
        remarks: String::new(),
        ..DailySummary::default()
    };
    write_summary(store, today, &summary).await?;

    info!(date = %summary.date, "day started, opening stock saved");
    Ok(summary)
}

// ---------------------------------------------------------------------------
// Close day
// ---------------------------------------------------------------------------

/// Close the effective date: snapshot closing stock, mark the entry closed,
/// and stamp every cart's `closedAt` with the business day's end of day.
///
/// Fails with `CartsStillOpen` while any cart still holds stock out.
pub async fn close_day<S: DocumentStore, C: Clock>(clock: &C, store: &S) -> Result<(), OpsError> {
    let date = effective_date(clock, store).await?;
    let summary = load_summary(store, date)
        .await?
        .ok_or_else(|| OpsError::validation(format!("no day started for {}", date_string(date))))?;
    if summary.day_closed {
        return Err(OpsError::validation(format!(
            "day {} already closed",
            summary.date
        )));
    }

    let carts = load_carts(store).await?;
    let open = carts.iter().filter(|c| c.is_open()).count();
    if open > 0 {
        return Err(OpsError::CartsStillOpen { open });
    }

    let warehouse = load_warehouse(store).await?;

    // End-of-day stamp belongs to the business date, not the wall clock,
    // which may already be past midnight.
    let closing_time = format!("{}T23:59:00.000Z", summary.date);

    let mut ops = vec![finalize_patch(date, &warehouse)?];
    for cart in &carts {
        ops.push(WriteOp::new(
            CARTS_COLLECTION,
            &cart.id,
            json!({ "closedAt": closing_time }),
        ));
    }
    commit_write_set(store, "close_day", ops).await?;

    info!(date = %summary.date, carts = carts.len(), "day closed, closing stock saved");
    Ok(())
}

// ===========================================================================
// Tests
// ===========================================================================
