//! Daily summary ledger: a year → month → day nested document layout.
//!
//! Month documents live in a per-year subcollection
//! (`dailyStockSummary/{YYYY}/months`, ids `"01".."12"`), each holding a
//! `dailySummaries` map keyed by date. All incremental mutations are issued
//! as dotted-path patches carrying absolute values, so a replayed patch
//! (see `intents`) changes nothing.

use chrono::{Datelike, NaiveDate};
use serde_json::{Map, Value};
use tracing::info;

use crate::error::{OpsError, StoreError};
use crate::intents::WriteOp;
use crate::store::DocumentStore;
use crate::types::{
    month_collection, DailySummary, MonthDocument, ProductType, StockSnapshot,
    DAILY_SUMMARY_COLLECTION,
};

// ---------------------------------------------------------------------------
// Date keys
// ---------------------------------------------------------------------------

pub fn date_string(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

pub fn year_id(date: NaiveDate) -> String {
    format!("{:04}", date.year())
}

pub fn month_id(date: NaiveDate) -> String {
    format!("{:02}", date.month())
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Load one month document, if it exists.
pub async fn load_month<S: DocumentStore>(
    store: &S,
    year: &str,
    month: &str,
) -> Result<Option<MonthDocument>, OpsError> {
    let doc = store.read(&month_collection(year), month).await?;
    match doc {
        Some(doc) => Ok(Some(doc.parse()?)),
        None => Ok(None),
    }
}

/// Load the summary for one date, if its month document and entry exist.
pub async fn load_summary<S: DocumentStore>(
    store: &S,
    date: NaiveDate,
) -> Result<Option<DailySummary>, OpsError> {
    let month = load_month(store, &year_id(date), &month_id(date)).await?;
    Ok(month.and_then(|m| m.daily_summaries.get(&date_string(date)).cloned()))
}

/// Create the month document (and the parent year index document) if absent.
pub async fn ensure_month<S: DocumentStore>(store: &S, date: NaiveDate) -> Result<(), OpsError> {
    let year = year_id(date);
    let month = month_id(date);
    if load_month(store, &year, &month).await?.is_none() {
        // Year index first so readAll("dailyStockSummary") can enumerate years.
        store
            .update(DAILY_SUMMARY_COLLECTION, &year, Value::Object(Map::new()))
            .await?;
        store
            .update(
                &month_collection(&year),
                &month,
                serde_json::json!({"dailySummaries": {}}),
            )
            .await?;
        info!(year = %year, month = %month, "month ledger created");
    }
    Ok(())
}

/// Write a full day entry under its month document.
pub async fn write_summary<S: DocumentStore>(
    store: &S,
    date: NaiveDate,
    summary: &DailySummary,
) -> Result<(), OpsError> {
    let body = serde_json::to_value(summary)
        .map_err(|e| StoreError::Backend(format!("encode summary: {e}")))?;
    let mut patch = Map::new();
    patch.insert(format!("dailySummaries.{}", date_string(date)), body);
    store
        .update(
            &month_collection(&year_id(date)),
            &month_id(date),
            Value::Object(patch),
        )
        .await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Incremental patches
// ---------------------------------------------------------------------------

/// What one cart close contributes to its business day.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CartCloseDelta {
    pub stick_sold: i64,
    pub plate_sold: i64,
    pub cash: f64,
    pub qr: f64,
    pub credit: f64,
    pub swiggy: f64,
    pub zomato: f64,
    pub samples: f64,
    pub wastage: f64,
    pub municipality: f64,
    pub bata: f64,
    pub shortage: f64,
}

/// Build the summary patch for one cart close against the current entry.
///
/// The session's `others` input has no summary bucket; the `other` field is
/// rewritten unchanged.
pub fn cart_close_patch(date: NaiveDate, current: &DailySummary, delta: &CartCloseDelta) -> WriteOp {
    let day = date_string(date);
    let mut patch = Map::new();
    let mut put = |field: &str, value: Value| {
        patch.insert(format!("dailySummaries.{day}.{field}"), value);
    };

    put("stickSold", (current.stick_sold + delta.stick_sold).into());
    put("plateSold", (current.plate_sold + delta.plate_sold).into());
    put("receipts.cash", (current.receipts.cash + delta.cash).into());
    put("receipts.qr", (current.receipts.qr + delta.qr).into());
    put(
        "receivables.credit",
        (current.receivables.credit + delta.credit).into(),
    );
    put(
        "receivables.swiggy",
        (current.receivables.swiggy + delta.swiggy).into(),
    );
    put(
        "receivables.zomato",
        (current.receivables.zomato + delta.zomato).into(),
    );
    put(
        "expenses.samples",
        (current.expenses.samples + delta.samples).into(),
    );
    put(
        "expenses.wastage",
        (current.expenses.wastage + delta.wastage).into(),
    );
    put("expenses.other", current.expenses.other.into());
    put(
        "expenses.municipality",
        (current.expenses.municipality + delta.municipality).into(),
    );
    put("expenses.bata", (current.expenses.bata + delta.bata).into());
    put(
        "expenses.shortage",
        (current.expenses.shortage + delta.shortage).into(),
    );

    WriteOp::new(
        month_collection(&year_id(date)),
        month_id(date),
        Value::Object(patch),
    )
}

/// Record a warehouse replenishment against the day's entry.
pub async fn record_replenishment<S: DocumentStore>(
    store: &S,
    date: NaiveDate,
    current: &DailySummary,
    stick_qty: i64,
    plate_qty: i64,
) -> Result<(), OpsError> {
    let day = date_string(date);
    let mut patch = Map::new();
    patch.insert(
        format!("dailySummaries.{day}.receivedStick"),
        (current.received_stick + stick_qty).into(),
    );
    patch.insert(
        format!("dailySummaries.{day}.receivedPlate"),
        (current.received_plate + plate_qty).into(),
    );
    store
        .update(
            &month_collection(&year_id(date)),
            &month_id(date),
            Value::Object(patch),
        )
        .await?;
    Ok(())
}

/// Build the Close-Day patch: closing snapshot, closed flag, remarks.
pub fn finalize_patch(date: NaiveDate, closing: &StockSnapshot) -> Result<WriteOp, OpsError> {
    let day = date_string(date);
    let snapshot = serde_json::to_value(closing)
        .map_err(|e| StoreError::Backend(format!("encode snapshot: {e}")))?;
    let mut patch = Map::new();
    patch.insert(format!("dailySummaries.{day}.closingStock"), snapshot);
    patch.insert(format!("dailySummaries.{day}.dayClosed"), true.into());
    patch.insert(
        format!("dailySummaries.{day}.remarks"),
        "Day closed successfully".into(),
    );
    Ok(WriteOp::new(
        month_collection(&year_id(date)),
        month_id(date),
        Value::Object(patch),
    ))
}

// ---------------------------------------------------------------------------
// Monthly report aggregation
// ---------------------------------------------------------------------------

/// One calendar day in a monthly report. Days with no ledger entry are
/// holidays (the business did not operate).
#[derive(Debug, Clone, PartialEq)]
pub struct DayRow {
    pub date: String,
    pub holiday: bool,
    pub summary: Option<DailySummary>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReportTotals {
    pub opening: i64,
    pub sold: i64,
    pub closing: i64,
    pub received: i64,
}

/// Aggregated month view for one product type.
#[derive(Debug, Clone, PartialEq)]
pub struct MonthlyReport {
    pub rows: Vec<DayRow>,
    /// Opening quantity of the first operating day.
    pub opening_stock: i64,
    /// Closing quantity of the last operating day (0 while it is still open).
    pub closing_stock: i64,
    pub totals: ReportTotals,
}

fn days_in_month(year: i32, month: u32) -> u32 {
    let next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    };
    match next.and_then(|d| d.pred_opt()) {
        Some(last) => last.day(),
        None => 31,
    }
}

fn snapshot_quantity(snapshot: &Option<StockSnapshot>, kind: ProductType) -> i64 {
    snapshot
        .as_ref()
        .map(|s| s.record(kind).quantity)
        .unwrap_or(0)
}

fn sold_quantity(summary: &DailySummary, kind: ProductType) -> i64 {
    match kind {
        ProductType::Stick => summary.stick_sold,
        ProductType::Plate => summary.plate_sold,
    }
}

fn received_quantity(summary: &DailySummary, kind: ProductType) -> i64 {
    match kind {
        ProductType::Stick => summary.received_stick,
        ProductType::Plate => summary.received_plate,
    }
}

/// Build the monthly report for one product type.
///
/// Rows cover every calendar day of the month up to `today`, with leading
/// holidays (before the first operating day) trimmed off, exactly like the
/// reports table.
pub fn monthly_report(
    month: &MonthDocument,
    year: i32,
    month_num: u32,
    kind: ProductType,
    today: NaiveDate,
) -> MonthlyReport {
    let mut rows = Vec::new();
    for day in 1..=days_in_month(year, month_num) {
        let Some(date) = NaiveDate::from_ymd_opt(year, month_num, day) else {
            continue;
        };
        if date > today {
            break;
        }
        let key = date_string(date);
        match month.daily_summaries.get(&key) {
            Some(summary) => rows.push(DayRow {
                date: key,
                holiday: false,
                summary: Some(summary.clone()),
            }),
            None => rows.push(DayRow {
                date: key,
                holiday: true,
                summary: None,
            }),
        }
    }

    // Trim leading holidays before the first operating day.
    if let Some(first) = rows.iter().position(|r| !r.holiday) {
        rows.drain(..first);
    } else {
        rows.clear();
    }

    let mut totals = ReportTotals::default();
    for row in rows.iter().filter_map(|r| r.summary.as_ref()) {
        totals.opening += snapshot_quantity(&row.opening_stock, kind);
        totals.sold += sold_quantity(row, kind);
        totals.closing += snapshot_quantity(&row.closing_stock, kind);
        totals.received += received_quantity(row, kind);
    }

    let opening_stock = rows
        .iter()
        .find_map(|r| r.summary.as_ref())
        .map(|s| snapshot_quantity(&s.opening_stock, kind))
        .unwrap_or(0);
    let closing_stock = rows
        .iter()
        .rev()
        .find_map(|r| r.summary.as_ref())
        .map(|s| snapshot_quantity(&s.closing_stock, kind))
        .unwrap_or(0);

    MonthlyReport {
        rows,
        opening_stock,
        closing_stock,
        totals,
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::types::{InventoryRecord, Warehouse};

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").expect("date literal")
    }

    fn snapshot(stick: i64, plate: i64) -> StockSnapshot {
        Warehouse {
            stick: InventoryRecord {
                quantity: stick,
                ..InventoryRecord::default()
            },
            plate: InventoryRecord {
                quantity: plate,
                ..InventoryRecord::default()
            },
        }
    }

    fn day(date: &str, stick_sold: i64, opening: i64, closing: Option<i64>) -> DailySummary {
        DailySummary {
            date: date.to_string(),
            opening_stock: Some(snapshot(opening, 0)),
            closing_stock: closing.map(|q| snapshot(q, 0)),
            stick_sold,
            day_started: true,
            day_closed: closing.is_some(),
            ..DailySummary::default()
        }
    }

    #[tokio::test]
    async fn test_ensure_month_creates_year_index_and_month() {
        let store = MemoryStore::new();
        ensure_month(&store, date("2025-04-28")).await.expect("ensure");

        let years = store
            .read_all(DAILY_SUMMARY_COLLECTION)
            .await
            .expect("read years");
        assert_eq!(years.len(), 1);
        assert_eq!(years[0].id, "2025");

        let month = load_month(&store, "2025", "04")
            .await
            .expect("load")
            .expect("month exists");
        assert!(month.daily_summaries.is_empty());

        // Second call is a no-op.
        ensure_month(&store, date("2025-04-30")).await.expect("ensure");
        assert_eq!(
            store
                .read_all(DAILY_SUMMARY_COLLECTION)
                .await
                .expect("read years")
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn test_write_and_load_summary_round_trip() {
        let store = MemoryStore::new();
        let d = date("2025-04-28");
        ensure_month(&store, d).await.expect("ensure");

        let summary = day("2025-04-28", 0, 112, None);
        write_summary(&store, d, &summary).await.expect("write");

        let loaded = load_summary(&store, d)
            .await
            .expect("load")
            .expect("summary exists");
        assert_eq!(loaded, summary);
        assert!(load_summary(&store, date("2025-04-29"))
            .await
            .expect("load")
            .is_none());
    }

    #[tokio::test]
    async fn test_cart_close_patch_increments_without_touching_other() {
        let store = MemoryStore::new();
        let d = date("2025-04-28");
        ensure_month(&store, d).await.expect("ensure");

        let mut current = day("2025-04-28", 10, 112, None);
        current.receipts.cash = 150.0;
        current.expenses.other = 12.0;
        write_summary(&store, d, &current).await.expect("write");

        let delta = CartCloseDelta {
            stick_sold: 25,
            cash: 200.0,
            credit: 30.0,
            shortage: 20.0,
            ..CartCloseDelta::default()
        };
        let op = cart_close_patch(d, &current, &delta);
        store
            .update(&op.collection, &op.id, op.patch)
            .await
            .expect("apply");

        let updated = load_summary(&store, d)
            .await
            .expect("load")
            .expect("summary exists");
        assert_eq!(updated.stick_sold, 35);
        assert_eq!(updated.receipts.cash, 350.0);
        assert_eq!(updated.receivables.credit, 30.0);
        assert_eq!(updated.expenses.shortage, 20.0);
        // The summary-only bucket is rewritten unchanged.
        assert_eq!(updated.expenses.other, 12.0);
        // Untouched ledger fields survive the dotted-path merge.
        assert_eq!(updated.opening_stock, current.opening_stock);
        assert!(updated.day_started);
    }

    #[tokio::test]
    async fn test_record_replenishment_accumulates() {
        let store = MemoryStore::new();
        let d = date("2025-04-28");
        ensure_month(&store, d).await.expect("ensure");
        let current = day("2025-04-28", 0, 112, None);
        write_summary(&store, d, &current).await.expect("write");

        record_replenishment(&store, d, &current, 50, 20)
            .await
            .expect("replenish");
        let after_first = load_summary(&store, d)
            .await
            .expect("load")
            .expect("exists");
        assert_eq!(after_first.received_stick, 50);
        assert_eq!(after_first.received_plate, 20);

        record_replenishment(&store, d, &after_first, 10, 0)
            .await
            .expect("replenish again");
        let after_second = load_summary(&store, d)
            .await
            .expect("load")
            .expect("exists");
        assert_eq!(after_second.received_stick, 60);
        assert_eq!(after_second.received_plate, 20);
    }

    #[test]
    fn test_monthly_report_trims_leading_holidays_and_totals() {
        let mut month = MonthDocument::default();
        month
            .daily_summaries
            .insert("2025-04-03".into(), day("2025-04-03", 25, 100, Some(75)));
        month
            .daily_summaries
            .insert("2025-04-05".into(), day("2025-04-05", 40, 75, None));

        let report = monthly_report(
            &month,
            2025,
            4,
            ProductType::Stick,
            date("2025-04-06"),
        );

        // Days 1-2 trimmed, rows cover 03..=06.
        assert_eq!(report.rows.len(), 4);
        assert_eq!(report.rows[0].date, "2025-04-03");
        assert!(!report.rows[0].holiday);
        assert!(report.rows[1].holiday, "04-04 is a holiday");
        assert!(report.rows[3].holiday, "04-06 has no entry yet");

        assert_eq!(report.opening_stock, 100);
        // Last operating day is still open, so its closing counts as 0.
        assert_eq!(report.closing_stock, 0);
        assert_eq!(
            report.totals,
            ReportTotals {
                opening: 175,
                sold: 65,
                closing: 75,
                received: 0
            }
        );
    }

    #[test]
    fn test_monthly_report_empty_month() {
        let report = monthly_report(
            &MonthDocument::default(),
            2025,
            4,
            ProductType::Plate,
            date("2025-04-10"),
        );
        assert!(report.rows.is_empty());
        assert_eq!(report.totals, ReportTotals::default());
    }

    #[test]
    fn test_days_in_month() {
        assert_eq!(days_in_month(2025, 4), 30);
        assert_eq!(days_in_month(2025, 12), 31);
        assert_eq!(days_in_month(2024, 2), 29);
    }
}
