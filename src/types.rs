//! Shared domain types and the persisted document layout.
//!
//! Field names follow the wire layout of the document store exactly
//! (camelCase, `stickKulfi`/`plateKulfi` document ids, nested
//! `dailySummaries.<date>` maps), so every struct round-trips through
//! `serde_json` against documents written by earlier versions of the app.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Collections
// ---------------------------------------------------------------------------

/// Warehouse stock, one document per product type (`stickKulfi`, `plateKulfi`).
pub const WAREHOUSE_COLLECTION: &str = "warehouseInventory";

/// Mobile cart entities.
pub const CARTS_COLLECTION: &str = "kulfiCarts";

/// Year index documents (id = `"YYYY"`); month documents live in the
/// per-year subcollection returned by [`month_collection`].
pub const DAILY_SUMMARY_COLLECTION: &str = "dailyStockSummary";

/// Pending multi-document write sets (see `intents`).
pub const INTENTS_COLLECTION: &str = "writeIntents";

/// Subcollection holding one document per month (id = `"01"`..`"12"`) for
/// the given year.
pub fn month_collection(year: &str) -> String {
    format!("{DAILY_SUMMARY_COLLECTION}/{year}/months")
}

// ---------------------------------------------------------------------------
// Products
// ---------------------------------------------------------------------------

/// The two kulfi product types the business sells.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ProductType {
    Stick,
    Plate,
}

impl ProductType {
    /// Document id in the warehouse collection.
    pub fn doc_id(self) -> &'static str {
        match self {
            ProductType::Stick => "stickKulfi",
            ProductType::Plate => "plateKulfi",
        }
    }

    /// Reverse of [`ProductType::doc_id`].
    pub fn from_doc_id(id: &str) -> Option<Self> {
        match id {
            "stickKulfi" => Some(ProductType::Stick),
            "plateKulfi" => Some(ProductType::Plate),
            _ => None,
        }
    }
}

impl fmt::Display for ProductType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProductType::Stick => write!(f, "stick"),
            ProductType::Plate => write!(f, "plate"),
        }
    }
}

// ---------------------------------------------------------------------------
// Warehouse inventory
// ---------------------------------------------------------------------------

/// Per-product warehouse record. Never deleted, only updated.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct InventoryRecord {
    pub quantity: i64,
    pub cost_price: f64,
    pub selling_price: f64,
}

/// In-memory view of the whole warehouse, keyed by product type.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Warehouse {
    pub stick: InventoryRecord,
    pub plate: InventoryRecord,
}

impl Warehouse {
    pub fn record(&self, kind: ProductType) -> &InventoryRecord {
        match kind {
            ProductType::Stick => &self.stick,
            ProductType::Plate => &self.plate,
        }
    }

    pub fn record_mut(&mut self, kind: ProductType) -> &mut InventoryRecord {
        match kind {
            ProductType::Stick => &mut self.stick,
            ProductType::Plate => &mut self.plate,
        }
    }
}

/// Point-in-time copy of both warehouse records, embedded in daily
/// summaries as opening/closing stock.
pub type StockSnapshot = Warehouse;

// ---------------------------------------------------------------------------
// Carts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CartStatus {
    Open,
    #[default]
    Closed,
}

/// Quantities held by a cart while it is out selling.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CartInventory {
    pub stick: i64,
    pub plate: i64,
}

impl CartInventory {
    pub fn total(&self) -> i64 {
        self.stick + self.plate
    }
}

/// A mobile selling point. `status == open` iff it holds stock — a
/// soft-healing invariant re-asserted by `carts::load_and_heal`, not
/// guaranteed instantaneously.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Cart {
    #[serde(skip_serializing)]
    pub id: String,
    pub address: String,
    pub status: CartStatus,
    pub inventory: CartInventory,
    pub opened_at: Option<String>,
    pub closed_at: Option<String>,
}

impl Cart {
    pub fn is_open(&self) -> bool {
        self.status == CartStatus::Open
    }
}

// ---------------------------------------------------------------------------
// Daily summaries
// ---------------------------------------------------------------------------

/// Cash and QR receipts accumulated over a day.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Receipts {
    pub cash: f64,
    pub qr: f64,
}

/// Amounts owed to the business (udhaar and aggregator settlements).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Receivables {
    pub credit: f64,
    pub swiggy: f64,
    pub zomato: f64,
}

/// Expense buckets tracked per day. `other` is a summary-only bucket
/// distinct from the day-out session's `others` input, which stays
/// session-local (see `dayout`).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SummaryExpenses {
    pub samples: f64,
    pub wastage: f64,
    pub other: f64,
    pub municipality: f64,
    pub bata: f64,
    pub shortage: f64,
}

/// One ledger entry per calendar date, nested under its month document.
///
/// Created by Start-Day with an opening snapshot, mutated incrementally by
/// every cart close and stock replenishment during the day, finalized by
/// Close-Day. Never deleted.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct DailySummary {
    pub date: String,
    pub opening_stock: Option<StockSnapshot>,
    pub closing_stock: Option<StockSnapshot>,
    pub stick_sold: i64,
    pub plate_sold: i64,
    /// Warehouse replenishment received during the day, in pieces.
    pub received_stick: i64,
    pub received_plate: i64,
    pub receipts: Receipts,
    pub receivables: Receivables,
    pub expenses: SummaryExpenses,
    pub day_started: bool,
    pub day_closed: bool,
    pub remarks: String,
}

/// A month document: `dailySummaries` keyed by `"YYYY-MM-DD"`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct MonthDocument {
    pub daily_summaries: BTreeMap<String, DailySummary>,
}

// ---------------------------------------------------------------------------
// Money
// ---------------------------------------------------------------------------

/// Round to two decimals, the resolution every money figure is compared at.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Two-decimal money equality.
pub fn money_eq(a: f64, b: f64) -> bool {
    round2(a) == round2(b)
}
