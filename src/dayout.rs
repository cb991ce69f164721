//! Day-Out reconciliation: the end-of-day cart close workflow.
//!
//! A `DayOutSession` walks one open cart through five steps — stick count,
//! plate count, receipts, expenses, finalize — converting inventory
//! depletion into sales figures, reconciling collected cash against the
//! gross sales value, apportioning any shortfall across expense and
//! receivable categories, and tallying the physical cash by denomination.
//!
//! Every input setter rejects out-of-range values and leaves the session
//! unchanged; the advancing controls stay disabled until the step's
//! invariant holds. Close-Cart only becomes reachable once the counted
//! denominations equal the cash in hand and the shortfall is fully
//! explained, which is the primary error-prevention mechanism here: an
//! inconsistent close simply cannot be reached.

use serde::Serialize;
use tracing::{info, warn};

use crate::error::OpsError;
use crate::intents::commit_write_set;
use crate::inventory::{load_warehouse, return_from_cart_patch};
use crate::store::DocumentStore;
use crate::summary::{cart_close_patch, load_summary, CartCloseDelta};
use crate::types::{
    money_eq, round2, Cart, ProductType, Receivables, Warehouse, CARTS_COLLECTION,
};
use chrono::NaiveDate;

// ---------------------------------------------------------------------------
// Steps
// ---------------------------------------------------------------------------

/// The five reconciliation steps, walked forward and backward in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DayOutStep {
    Stick,
    Plate,
    Receipts,
    Expenses,
    Finalize,
}

impl DayOutStep {
    fn next(self) -> Option<Self> {
        match self {
            DayOutStep::Stick => Some(DayOutStep::Plate),
            DayOutStep::Plate => Some(DayOutStep::Receipts),
            DayOutStep::Receipts => Some(DayOutStep::Expenses),
            DayOutStep::Expenses => Some(DayOutStep::Finalize),
            DayOutStep::Finalize => None,
        }
    }

    fn prev(self) -> Option<Self> {
        match self {
            DayOutStep::Stick => None,
            DayOutStep::Plate => Some(DayOutStep::Stick),
            DayOutStep::Receipts => Some(DayOutStep::Plate),
            DayOutStep::Expenses => Some(DayOutStep::Receipts),
            DayOutStep::Finalize => Some(DayOutStep::Expenses),
        }
    }
}

// ---------------------------------------------------------------------------
// Expense inputs
// ---------------------------------------------------------------------------

/// The nine shortfall categories. The allocable group explains where unsold
/// value went; the daily group covers routine cash outflows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExpenseCategory {
    Samples,
    Wastage,
    Credit,
    Swiggy,
    Zomato,
    Municipality,
    Bata,
    Shortage,
    Others,
}

impl ExpenseCategory {
    pub const ALLOCABLE: [ExpenseCategory; 5] = [
        ExpenseCategory::Samples,
        ExpenseCategory::Wastage,
        ExpenseCategory::Credit,
        ExpenseCategory::Swiggy,
        ExpenseCategory::Zomato,
    ];

    pub const DAILY: [ExpenseCategory; 4] = [
        ExpenseCategory::Municipality,
        ExpenseCategory::Bata,
        ExpenseCategory::Shortage,
        ExpenseCategory::Others,
    ];
}

/// Per-category amounts; `None` is a blank input, distinct from an
/// explicit zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ExpenseSheet {
    samples: Option<f64>,
    wastage: Option<f64>,
    credit: Option<f64>,
    swiggy: Option<f64>,
    zomato: Option<f64>,
    municipality: Option<f64>,
    bata: Option<f64>,
    shortage: Option<f64>,
    others: Option<f64>,
}

impl ExpenseSheet {
    pub fn get(&self, category: ExpenseCategory) -> Option<f64> {
        match category {
            ExpenseCategory::Samples => self.samples,
            ExpenseCategory::Wastage => self.wastage,
            ExpenseCategory::Credit => self.credit,
            ExpenseCategory::Swiggy => self.swiggy,
            ExpenseCategory::Zomato => self.zomato,
            ExpenseCategory::Municipality => self.municipality,
            ExpenseCategory::Bata => self.bata,
            ExpenseCategory::Shortage => self.shortage,
            ExpenseCategory::Others => self.others,
        }
    }

    pub fn amount(&self, category: ExpenseCategory) -> f64 {
        self.get(category).unwrap_or(0.0)
    }

    fn put(&mut self, category: ExpenseCategory, value: f64) {
        let slot = match category {
            ExpenseCategory::Samples => &mut self.samples,
            ExpenseCategory::Wastage => &mut self.wastage,
            ExpenseCategory::Credit => &mut self.credit,
            ExpenseCategory::Swiggy => &mut self.swiggy,
            ExpenseCategory::Zomato => &mut self.zomato,
            ExpenseCategory::Municipality => &mut self.municipality,
            ExpenseCategory::Bata => &mut self.bata,
            ExpenseCategory::Shortage => &mut self.shortage,
            ExpenseCategory::Others => &mut self.others,
        };
        *slot = Some(value);
    }

    fn clear(&mut self) {
        *self = ExpenseSheet::default();
    }
}

// ---------------------------------------------------------------------------
// Denominations
// ---------------------------------------------------------------------------

/// Note denominations counted at finalize, plus loose coins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Denomination {
    Note500,
    Note200,
    Note100,
    Note50,
    Note20,
    Note10,
    /// Entered as a rupee amount, not a count.
    Coins,
}

impl Denomination {
    fn note_value(self) -> i64 {
        match self {
            Denomination::Note500 => 500,
            Denomination::Note200 => 200,
            Denomination::Note100 => 100,
            Denomination::Note50 => 50,
            Denomination::Note20 => 20,
            Denomination::Note10 => 10,
            Denomination::Coins => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DenominationSheet {
    n500: Option<i64>,
    n200: Option<i64>,
    n100: Option<i64>,
    n50: Option<i64>,
    n20: Option<i64>,
    n10: Option<i64>,
    coins: Option<i64>,
}

impl DenominationSheet {
    pub fn get(&self, denomination: Denomination) -> Option<i64> {
        match denomination {
            Denomination::Note500 => self.n500,
            Denomination::Note200 => self.n200,
            Denomination::Note100 => self.n100,
            Denomination::Note50 => self.n50,
            Denomination::Note20 => self.n20,
            Denomination::Note10 => self.n10,
            Denomination::Coins => self.coins,
        }
    }

    fn put(&mut self, denomination: Denomination, count: i64) {
        let slot = match denomination {
            Denomination::Note500 => &mut self.n500,
            Denomination::Note200 => &mut self.n200,
            Denomination::Note100 => &mut self.n100,
            Denomination::Note50 => &mut self.n50,
            Denomination::Note20 => &mut self.n20,
            Denomination::Note10 => &mut self.n10,
            Denomination::Coins => &mut self.coins,
        };
        *slot = Some(count);
    }

    pub fn total(&self) -> f64 {
        let mut total = 0_i64;
        for denomination in [
            Denomination::Note500,
            Denomination::Note200,
            Denomination::Note100,
            Denomination::Note50,
            Denomination::Note20,
            Denomination::Note10,
            Denomination::Coins,
        ] {
            total += self.get(denomination).unwrap_or(0) * denomination.note_value();
        }
        total as f64
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Ephemeral reconciliation state for one selected open cart.
///
/// Created when the cart is picked in Day-Out mode, discarded on Clear or
/// after a successful Close-Cart. The taken-out quantities and selling
/// prices are frozen at selection time, like the screen that drives it.
#[derive(Debug, Clone, Serialize)]
pub struct DayOutSession {
    cart_id: String,
    cart_address: String,
    cart_opened_at: Option<String>,
    taken_stick: i64,
    taken_plate: i64,
    stick_price: f64,
    plate_price: f64,
    kept_stick: Option<i64>,
    kept_plate: Option<i64>,
    cash: Option<f64>,
    qr: Option<f64>,
    expenses: ExpenseSheet,
    denomination: DenominationSheet,
    original_balance_short: f64,
    step: DayOutStep,
}

impl DayOutSession {
    /// Start a session for an open cart against the current price list.
    pub fn begin(cart: &Cart, warehouse: &Warehouse) -> Result<Self, OpsError> {
        if !cart.is_open() {
            return Err(OpsError::validation(format!(
                "cart {} is not open",
                cart.id
            )));
        }
        Ok(Self {
            cart_id: cart.id.clone(),
            cart_address: cart.address.clone(),
            cart_opened_at: cart.opened_at.clone(),
            taken_stick: cart.inventory.stick,
            taken_plate: cart.inventory.plate,
            stick_price: warehouse.stick.selling_price,
            plate_price: warehouse.plate.selling_price,
            kept_stick: None,
            kept_plate: None,
            cash: None,
            qr: None,
            expenses: ExpenseSheet::default(),
            denomination: DenominationSheet::default(),
            original_balance_short: 0.0,
            step: DayOutStep::Stick,
        })
    }

    pub fn cart_id(&self) -> &str {
        &self.cart_id
    }

    pub fn step(&self) -> DayOutStep {
        self.step
    }

    pub fn taken(&self, kind: ProductType) -> i64 {
        match kind {
            ProductType::Stick => self.taken_stick,
            ProductType::Plate => self.taken_plate,
        }
    }

    pub fn kept(&self, kind: ProductType) -> Option<i64> {
        match kind {
            ProductType::Stick => self.kept_stick,
            ProductType::Plate => self.kept_plate,
        }
    }

    pub fn cash(&self) -> Option<f64> {
        self.cash
    }

    pub fn qr(&self) -> Option<f64> {
        self.qr
    }

    pub fn expenses(&self) -> &ExpenseSheet {
        &self.expenses
    }

    pub fn denomination(&self) -> &DenominationSheet {
        &self.denomination
    }

    /// The shortfall frozen when leaving the receipts step; expense edits
    /// are capped against this, not the live value.
    pub fn original_balance_short(&self) -> f64 {
        self.original_balance_short
    }

    // -- derived figures ---------------------------------------------------

    pub fn sold(&self, kind: ProductType) -> i64 {
        (self.taken(kind) - self.kept(kind).unwrap_or(0)).max(0)
    }

    pub fn sales_value(&self, kind: ProductType) -> f64 {
        let price = match kind {
            ProductType::Stick => self.stick_price,
            ProductType::Plate => self.plate_price,
        };
        round2(self.sold(kind) as f64 * price)
    }

    pub fn gross_sales_value(&self) -> f64 {
        round2(self.sales_value(ProductType::Stick) + self.sales_value(ProductType::Plate))
    }

    pub fn total_received(&self) -> f64 {
        round2(self.cash.unwrap_or(0.0) + self.qr.unwrap_or(0.0))
    }

    pub fn balance_short(&self) -> f64 {
        round2((self.gross_sales_value() - self.total_received()).max(0.0))
    }

    pub fn allocable_expenses_total(&self) -> f64 {
        round2(
            ExpenseCategory::ALLOCABLE
                .iter()
                .map(|&c| self.expenses.amount(c))
                .sum(),
        )
    }

    pub fn daily_expenses_total(&self) -> f64 {
        round2(
            ExpenseCategory::DAILY
                .iter()
                .map(|&c| self.expenses.amount(c))
                .sum(),
        )
    }

    pub fn tally_total(&self) -> f64 {
        round2(self.allocable_expenses_total() + self.daily_expenses_total())
    }

    pub fn updated_balance_short(&self) -> f64 {
        round2(self.balance_short() - self.tally_total())
    }

    pub fn receivables_total(&self) -> f64 {
        round2(
            self.expenses.amount(ExpenseCategory::Credit)
                + self.expenses.amount(ExpenseCategory::Swiggy)
                + self.expenses.amount(ExpenseCategory::Zomato),
        )
    }

    pub fn actual_expenses_total(&self) -> f64 {
        round2(
            self.expenses.amount(ExpenseCategory::Samples)
                + self.expenses.amount(ExpenseCategory::Wastage)
                + self.expenses.amount(ExpenseCategory::Municipality)
                + self.expenses.amount(ExpenseCategory::Bata)
                + self.expenses.amount(ExpenseCategory::Shortage)
                + self.expenses.amount(ExpenseCategory::Others),
        )
    }

    pub fn net_sales_value(&self) -> f64 {
        round2(self.gross_sales_value() - self.receivables_total() - self.actual_expenses_total())
    }

    pub fn denomination_total(&self) -> f64 {
        round2(self.denomination.total())
    }

    pub fn is_cash_tallied(&self) -> bool {
        money_eq(self.denomination_total(), self.cash.unwrap_or(0.0))
    }

    // -- inputs ------------------------------------------------------------

    /// Record the unsold quantity kept in the cart after sale. Must stay
    /// within the quantity taken out; out-of-range values are rejected, not
    /// clamped.
    pub fn set_kept(&mut self, kind: ProductType, qty: i64) -> Result<(), OpsError> {
        let taken = self.taken(kind);
        if qty < 0 || qty > taken {
            return Err(OpsError::validation(format!(
                "kept {kind} quantity must be between 0 and {taken}"
            )));
        }
        match kind {
            ProductType::Stick => self.kept_stick = Some(qty),
            ProductType::Plate => self.kept_plate = Some(qty),
        }
        Ok(())
    }

    /// Record cash collected; cash + QR may not exceed the gross sales value.
    pub fn set_cash(&mut self, amount: f64) -> Result<(), OpsError> {
        self.check_receipt(amount, self.qr.unwrap_or(0.0))?;
        self.cash = Some(amount);
        Ok(())
    }

    /// Record QR collection; cash + QR may not exceed the gross sales value.
    pub fn set_qr(&mut self, amount: f64) -> Result<(), OpsError> {
        self.check_receipt(amount, self.cash.unwrap_or(0.0))?;
        self.qr = Some(amount);
        Ok(())
    }

    fn check_receipt(&self, amount: f64, other: f64) -> Result<(), OpsError> {
        if !amount.is_finite() || amount < 0.0 {
            return Err(OpsError::validation("receipt amount must be non-negative"));
        }
        if round2(amount + other) > self.gross_sales_value() {
            return Err(OpsError::validation(
                "receipts cannot exceed the gross sales value",
            ));
        }
        Ok(())
    }

    /// Record one expense category. Rejected (left unchanged) whenever the
    /// resulting tally would exceed the frozen balance short; re-entering
    /// the current value is a no-op.
    pub fn set_expense(&mut self, category: ExpenseCategory, amount: f64) -> Result<(), OpsError> {
        if !amount.is_finite() || amount < 0.0 {
            return Err(OpsError::validation("expense amount must be non-negative"));
        }
        let old = self.expenses.amount(category);
        let new_tally = round2(self.tally_total() - old + amount);
        if new_tally > self.original_balance_short {
            return Err(OpsError::validation(
                "tally cannot exceed the balance short",
            ));
        }
        self.expenses.put(category, amount);
        Ok(())
    }

    /// Record a denomination count (or, for coins, a rupee amount).
    pub fn set_denomination(
        &mut self,
        denomination: Denomination,
        count: i64,
    ) -> Result<(), OpsError> {
        if count < 0 {
            return Err(OpsError::validation("denomination count must be non-negative"));
        }
        self.denomination.put(denomination, count);
        Ok(())
    }

    // -- navigation --------------------------------------------------------

    /// Whether the current step's invariant holds and Next is enabled.
    pub fn can_advance(&self) -> bool {
        match self.step {
            DayOutStep::Stick => self.kept_stick.is_some(),
            DayOutStep::Plate => self.kept_plate.is_some(),
            DayOutStep::Receipts => self.cash.is_some() && self.qr.is_some(),
            DayOutStep::Expenses => self.updated_balance_short() == 0.0,
            DayOutStep::Finalize => false,
        }
    }

    /// Move forward one step. Leaving the receipts step freezes the balance
    /// short that expense edits are capped against; a zero shortfall clears
    /// any stale expense inputs, so the expenses step passes straight
    /// through.
    pub fn advance(&mut self) -> Result<(), OpsError> {
        if !self.can_advance() {
            return Err(OpsError::validation("current step is incomplete"));
        }
        match self.step {
            DayOutStep::Receipts => {
                self.original_balance_short = self.balance_short();
                if self.balance_short() == 0.0 {
                    self.expenses.clear();
                }
            }
            DayOutStep::Expenses => {
                if self.balance_short() == 0.0 {
                    self.expenses.clear();
                }
            }
            _ => {}
        }
        if let Some(next) = self.step.next() {
            self.step = next;
        }
        Ok(())
    }

    /// Move back one step (no-op at the first step).
    pub fn retreat(&mut self) {
        if let Some(prev) = self.step.prev() {
            self.step = prev;
        }
    }

    /// The Clear action: discard every input and return to the first step.
    /// No persisted state is touched.
    pub fn reset(&mut self) {
        self.kept_stick = None;
        self.kept_plate = None;
        self.cash = None;
        self.qr = None;
        self.expenses.clear();
        self.denomination = DenominationSheet::default();
        self.original_balance_short = 0.0;
        self.step = DayOutStep::Stick;
    }

    /// Close-Cart is reachable only at finalize with the denominations
    /// matching the cash in hand exactly and the shortfall fully explained.
    pub fn can_close_cart(&self) -> bool {
        self.step == DayOutStep::Finalize
            && self.is_cash_tallied()
            && self.updated_balance_short() == 0.0
    }
}

// ---------------------------------------------------------------------------
// Close-Cart commit
// ---------------------------------------------------------------------------

/// Read-only snapshot retained for display after a successful close.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FinalDashboard {
    pub cart_id: String,
    pub cart_address: String,
    pub stick_sold: i64,
    pub stick_sales_value: f64,
    pub plate_sold: i64,
    pub plate_sales_value: f64,
    pub cash_collected: f64,
    pub qr_collected: f64,
    pub receivables: Receivables,
    pub expenses: DashboardExpenses,
    pub gross_sales: f64,
    pub net_sales: f64,
}

/// Expense breakdown shown on the final dashboard. Includes the
/// session-local `others` bucket, which is never persisted to the summary.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq)]
pub struct DashboardExpenses {
    pub samples: f64,
    pub wastage: f64,
    pub municipality: f64,
    pub bata: f64,
    pub shortage: f64,
    pub others: f64,
}

/// Commit the reconciled session as one logical transaction: close the
/// cart, return the kept stock to the warehouse, and increment the business
/// day's summary. The write set is dispatched under an intent record; a
/// partial failure leaves the intent pending for recovery, with no rollback
/// of writes that already landed.
///
/// The cart's `closedAt` is stamped with its own `openedAt`, pinning the
/// close to the business day it was opened on; Close-Day later stamps the
/// end-of-day time.
pub async fn close_cart<S: DocumentStore>(
    store: &S,
    session: &DayOutSession,
) -> Result<FinalDashboard, OpsError> {
    if !session.can_close_cart() {
        return Err(OpsError::validation(
            "close cart unavailable until the cash tally matches",
        ));
    }

    let opened_at = session
        .cart_opened_at
        .clone()
        .ok_or_else(|| OpsError::validation("cart has no opening time"))?;

    let stored = store
        .read(CARTS_COLLECTION, &session.cart_id)
        .await?
        .ok_or_else(|| OpsError::validation(format!("cart {} not found", session.cart_id)))?;
    let cart: Cart = stored.parse()?;
    if !cart.is_open() {
        return Err(OpsError::validation(format!(
            "cart {} is already closed",
            session.cart_id
        )));
    }

    let business_date = opened_at
        .get(..10)
        .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
        .ok_or_else(|| OpsError::validation("cart opening time has no valid date"))?;

    let warehouse = load_warehouse(store).await?;
    let kept_stick = session.kept(ProductType::Stick).unwrap_or(0);
    let kept_plate = session.kept(ProductType::Plate).unwrap_or(0);

    let mut ops = vec![
        crate::carts::close_patch(&session.cart_id, &opened_at),
        return_from_cart_patch(ProductType::Stick, &warehouse.stick, kept_stick),
        return_from_cart_patch(ProductType::Plate, &warehouse.plate, kept_plate),
    ];

    match load_summary(store, business_date).await? {
        Some(current) => {
            let expenses = session.expenses();
            let delta = CartCloseDelta {
                stick_sold: session.sold(ProductType::Stick),
                plate_sold: session.sold(ProductType::Plate),
                cash: session.cash().unwrap_or(0.0),
                qr: session.qr().unwrap_or(0.0),
                credit: expenses.amount(ExpenseCategory::Credit),
                swiggy: expenses.amount(ExpenseCategory::Swiggy),
                zomato: expenses.amount(ExpenseCategory::Zomato),
                samples: expenses.amount(ExpenseCategory::Samples),
                wastage: expenses.amount(ExpenseCategory::Wastage),
                municipality: expenses.amount(ExpenseCategory::Municipality),
                bata: expenses.amount(ExpenseCategory::Bata),
                shortage: expenses.amount(ExpenseCategory::Shortage),
            };
            ops.push(cart_close_patch(business_date, &current, &delta));
        }
        None => warn!(
            cart_id = %session.cart_id,
            date = %business_date,
            "no summary entry for the business day; sales not recorded in the ledger"
        ),
    }

    commit_write_set(store, "close_cart", ops).await?;

    info!(
        cart_id = %session.cart_id,
        stick_sold = session.sold(ProductType::Stick),
        plate_sold = session.sold(ProductType::Plate),
        gross = session.gross_sales_value(),
        "cart closed and reconciled"
    );

    Ok(FinalDashboard {
        cart_id: session.cart_id.clone(),
        cart_address: session.cart_address.clone(),
        stick_sold: session.sold(ProductType::Stick),
        stick_sales_value: session.sales_value(ProductType::Stick),
        plate_sold: session.sold(ProductType::Plate),
        plate_sales_value: session.sales_value(ProductType::Plate),
        cash_collected: session.cash().unwrap_or(0.0),
        qr_collected: session.qr().unwrap_or(0.0),
        receivables: Receivables {
            credit: session.expenses().amount(ExpenseCategory::Credit),
            swiggy: session.expenses().amount(ExpenseCategory::Swiggy),
            zomato: session.expenses().amount(ExpenseCategory::Zomato),
        },
        expenses: DashboardExpenses {
            samples: session.expenses().amount(ExpenseCategory::Samples),
            wastage: session.expenses().amount(ExpenseCategory::Wastage),
            municipality: session.expenses().amount(ExpenseCategory::Municipality),
            bata: session.expenses().amount(ExpenseCategory::Bata),
            shortage: session.expenses().amount(ExpenseCategory::Shortage),
            others: session.expenses().amount(ExpenseCategory::Others),
        },
        gross_sales: session.gross_sales_value(),
        net_sales: session.net_sales_value(),
    })
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::transfer_to_cart;
    use crate::lifecycle::start_day;
    use crate::store::MemoryStore;
    use crate::summary;
    use crate::types::WAREHOUSE_COLLECTION;
    use crate::FixedClock;
    use serde_json::json;

    async fn seed_warehouse(store: &MemoryStore, stick: i64, plate: i64) {
        store
            .update(
                WAREHOUSE_COLLECTION,
                "stickKulfi",
                json!({"quantity": stick, "costPrice": 7.5, "sellingPrice": 10.0}),
            )
            .await
            .expect("seed stick");
        store
            .update(
                WAREHOUSE_COLLECTION,
                "plateKulfi",
                json!({"quantity": plate, "costPrice": 18.0, "sellingPrice": 25.0}),
            )
            .await
            .expect("seed plate");
    }

    /// Start the day, create a cart, and move stock into it.
    async fn open_cart_with_stock(
        store: &MemoryStore,
        clock: &FixedClock,
        stick: i64,
        plate: i64,
    ) -> (Cart, Warehouse) {
        start_day(clock, store).await.expect("start day");
        let created = crate::carts::create_cart(store, "MG Road")
            .await
            .expect("create cart");
        let outcome = transfer_to_cart(store, clock, &created.id, stick, plate)
            .await
            .expect("transfer");
        (outcome.cart, outcome.warehouse)
    }

    fn session_through_receipts(
        cart: &Cart,
        warehouse: &Warehouse,
        kept_stick: i64,
        kept_plate: i64,
        cash: f64,
        qr: f64,
    ) -> DayOutSession {
        let mut session = DayOutSession::begin(cart, warehouse).expect("begin");
        session.set_kept(ProductType::Stick, kept_stick).expect("kept stick");
        session.advance().expect("to plate");
        session.set_kept(ProductType::Plate, kept_plate).expect("kept plate");
        session.advance().expect("to receipts");
        session.set_cash(cash).expect("cash");
        session.set_qr(qr).expect("qr");
        session.advance().expect("to expenses");
        session
    }

    #[tokio::test]
    async fn test_full_day_out_scenario_without_shortfall() {
        let store = MemoryStore::new();
        let clock = FixedClock::from_str("2025-04-28T08:00:00Z");
        seed_warehouse(&store, 100, 0).await;
        let (cart, warehouse) = open_cart_with_stock(&store, &clock, 30, 0).await;

        // kept 5 of 30 -> sold 25 at 10 -> 250 gross; 200 cash + 50 QR.
        let mut session = session_through_receipts(&cart, &warehouse, 5, 0, 200.0, 50.0);
        assert_eq!(session.sold(ProductType::Stick), 25);
        assert_eq!(session.gross_sales_value(), 250.0);
        assert_eq!(session.balance_short(), 0.0);

        // No shortfall: the expenses step passes straight through.
        assert_eq!(session.step(), DayOutStep::Expenses);
        assert!(session.can_advance());
        session.advance().expect("to finalize");

        // Denominations must equal the cash in hand exactly.
        assert!(!session.can_close_cart());
        session
            .set_denomination(Denomination::Note200, 1)
            .expect("one 200 note");
        assert_eq!(session.denomination_total(), 200.0);
        assert!(session.can_close_cart());

        let dashboard = close_cart(&store, &session).await.expect("close cart");
        assert_eq!(dashboard.stick_sold, 25);
        assert_eq!(dashboard.gross_sales, 250.0);
        assert_eq!(dashboard.net_sales, 250.0);

        // Warehouse got the kept stock back: 70 + 5.
        let stick = store
            .read(WAREHOUSE_COLLECTION, "stickKulfi")
            .await
            .expect("read")
            .expect("exists");
        assert_eq!(stick.data["quantity"], 75);

        // Cart is closed, emptied, and closedAt copies openedAt.
        let stored = store
            .read(CARTS_COLLECTION, &cart.id)
            .await
            .expect("read")
            .expect("exists");
        assert_eq!(stored.data["status"], "closed");
        assert_eq!(stored.data["inventory"]["stick"], 0);
        assert_eq!(stored.data["closedAt"], stored.data["openedAt"]);

        // The business day's ledger absorbed the sales.
        let entry = summary::load_summary(
            &store,
            NaiveDate::from_ymd_opt(2025, 4, 28).expect("date"),
        )
        .await
        .expect("load")
        .expect("exists");
        assert_eq!(entry.stick_sold, 25);
        assert_eq!(entry.receipts.cash, 200.0);
        assert_eq!(entry.receipts.qr, 50.0);
    }

    #[tokio::test]
    async fn test_shortfall_allocated_across_expenses() {
        let store = MemoryStore::new();
        let clock = FixedClock::from_str("2025-04-28T08:00:00Z");
        seed_warehouse(&store, 100, 40).await;
        let (cart, warehouse) = open_cart_with_stock(&store, &clock, 30, 10).await;

        // sold 25 sticks (250) + 8 plates (200) = 450 gross; received 400.
        let mut session = session_through_receipts(&cart, &warehouse, 5, 2, 350.0, 50.0);
        assert_eq!(session.gross_sales_value(), 450.0);
        assert_eq!(session.balance_short(), 50.0);
        assert_eq!(session.original_balance_short(), 50.0);

        // Cannot advance until the tally explains the whole shortfall.
        assert!(!session.can_advance());
        session
            .set_expense(ExpenseCategory::Samples, 30.0)
            .expect("samples");
        // 30 + 30 would overshoot the frozen 50: rejected, unchanged.
        let err = session
            .set_expense(ExpenseCategory::Wastage, 30.0)
            .expect_err("over tally");
        assert!(matches!(err, OpsError::Validation(_)));
        assert_eq!(session.expenses().get(ExpenseCategory::Wastage), None);

        // Re-entering the same value is a no-op.
        session
            .set_expense(ExpenseCategory::Samples, 30.0)
            .expect("same value again");
        assert_eq!(session.tally_total(), 30.0);

        session
            .set_expense(ExpenseCategory::Shortage, 20.0)
            .expect("shortage");
        assert_eq!(session.updated_balance_short(), 0.0);
        assert!(session.can_advance());
        session.advance().expect("to finalize");

        // Balance closure: gross == received + tally.
        assert_eq!(
            session.gross_sales_value(),
            round2(session.total_received() + session.tally_total())
        );

        session
            .set_denomination(Denomination::Note200, 1)
            .expect("200");
        session
            .set_denomination(Denomination::Note100, 1)
            .expect("100");
        session
            .set_denomination(Denomination::Note50, 1)
            .expect("50");
        assert_eq!(session.denomination_total(), 350.0);
        assert!(session.can_close_cart());

        let dashboard = close_cart(&store, &session).await.expect("close");
        // net = gross - receivables(0) - actual expenses (samples + shortage)
        assert_eq!(dashboard.net_sales, 400.0);
        assert_eq!(dashboard.expenses.samples, 30.0);
        assert_eq!(dashboard.expenses.shortage, 20.0);

        let entry = summary::load_summary(
            &store,
            NaiveDate::from_ymd_opt(2025, 4, 28).expect("date"),
        )
        .await
        .expect("load")
        .expect("exists");
        assert_eq!(entry.expenses.samples, 30.0);
        assert_eq!(entry.expenses.shortage, 20.0);
        assert_eq!(entry.expenses.other, 0.0);
        assert_eq!(entry.plate_sold, 8);
    }

    #[tokio::test]
    async fn test_kept_quantity_rejected_not_clamped() {
        let store = MemoryStore::new();
        let clock = FixedClock::from_str("2025-04-28T08:00:00Z");
        seed_warehouse(&store, 100, 40).await;
        let (cart, warehouse) = open_cart_with_stock(&store, &clock, 30, 10).await;

        let mut session = DayOutSession::begin(&cart, &warehouse).expect("begin");
        let err = session
            .set_kept(ProductType::Stick, 31)
            .expect_err("kept > taken");
        assert!(matches!(err, OpsError::Validation(_)));
        assert_eq!(session.kept(ProductType::Stick), None);
        assert!(session.set_kept(ProductType::Stick, -1).is_err());

        session.set_kept(ProductType::Stick, 30).expect("kept == taken");
        assert_eq!(session.sold(ProductType::Stick), 0);
    }

    #[tokio::test]
    async fn test_receipts_capped_at_gross() {
        let store = MemoryStore::new();
        let clock = FixedClock::from_str("2025-04-28T08:00:00Z");
        seed_warehouse(&store, 100, 40).await;
        let (cart, warehouse) = open_cart_with_stock(&store, &clock, 30, 0).await;

        let mut session = DayOutSession::begin(&cart, &warehouse).expect("begin");
        session.set_kept(ProductType::Stick, 5).expect("kept");
        session.advance().expect("to plate");
        session.set_kept(ProductType::Plate, 0).expect("kept");
        session.advance().expect("to receipts");

        // gross = 250
        session.set_cash(200.0).expect("cash");
        let err = session.set_qr(60.0).expect_err("cash + qr > gross");
        assert!(matches!(err, OpsError::Validation(_)));
        assert_eq!(session.qr(), None);
        session.set_qr(50.0).expect("qr at the cap");
    }

    #[tokio::test]
    async fn test_expense_cap_uses_frozen_balance_short() {
        let store = MemoryStore::new();
        let clock = FixedClock::from_str("2025-04-28T08:00:00Z");
        seed_warehouse(&store, 100, 40).await;
        let (cart, warehouse) = open_cart_with_stock(&store, &clock, 30, 0).await;

        // gross 250, received 200 -> short 50, frozen on advance.
        let mut session = session_through_receipts(&cart, &warehouse, 5, 0, 150.0, 50.0);
        session
            .set_expense(ExpenseCategory::Wastage, 50.0)
            .expect("wastage");

        // Going back and raising the receipts does not retroactively
        // invalidate the entered expenses: the cap stays at the frozen 50.
        session.retreat();
        assert_eq!(session.step(), DayOutStep::Receipts);
        session.set_cash(180.0).expect("raise cash");
        assert_eq!(session.original_balance_short(), 50.0);
        session
            .set_expense(ExpenseCategory::Wastage, 50.0)
            .expect("still within the frozen cap");

        // The live shortfall moved, so the step guard now blocks until the
        // tally matches again.
        session.advance().expect("back to expenses, refreezing");
        assert_eq!(session.original_balance_short(), 20.0);
        assert_eq!(session.updated_balance_short(), -30.0);
        assert!(!session.can_advance());
    }

    #[tokio::test]
    async fn test_close_cart_blocked_until_tally_matches() {
        let store = MemoryStore::new();
        let clock = FixedClock::from_str("2025-04-28T08:00:00Z");
        seed_warehouse(&store, 100, 40).await;
        let (cart, warehouse) = open_cart_with_stock(&store, &clock, 30, 0).await;

        let mut session = session_through_receipts(&cart, &warehouse, 5, 0, 200.0, 50.0);
        session.advance().expect("to finalize");
        session
            .set_denomination(Denomination::Note100, 1)
            .expect("100");
        assert!(!session.can_close_cart(), "100 != 200 cash in hand");

        let err = close_cart(&store, &session).await.expect_err("not tallied");
        assert!(matches!(err, OpsError::Validation(_)));

        // Nothing was written.
        let stored = store
            .read(CARTS_COLLECTION, session.cart_id())
            .await
            .expect("read")
            .expect("exists");
        assert_eq!(stored.data["status"], "open");
    }

    #[tokio::test]
    async fn test_close_cart_twice_rejected() {
        let store = MemoryStore::new();
        let clock = FixedClock::from_str("2025-04-28T08:00:00Z");
        seed_warehouse(&store, 100, 0).await;
        let (cart, warehouse) = open_cart_with_stock(&store, &clock, 30, 0).await;

        let mut session = session_through_receipts(&cart, &warehouse, 5, 0, 200.0, 50.0);
        session.advance().expect("to finalize");
        session
            .set_denomination(Denomination::Note200, 1)
            .expect("200");

        close_cart(&store, &session).await.expect("first close");
        let err = close_cart(&store, &session).await.expect_err("second close");
        assert!(matches!(err, OpsError::Validation(_)));

        // The ledger was not double-counted.
        let entry = summary::load_summary(
            &store,
            NaiveDate::from_ymd_opt(2025, 4, 28).expect("date"),
        )
        .await
        .expect("load")
        .expect("exists");
        assert_eq!(entry.stick_sold, 25);
    }

    #[tokio::test]
    async fn test_close_cart_without_summary_still_closes() {
        let store = MemoryStore::new();
        let clock = FixedClock::from_str("2025-04-28T08:00:00Z");
        seed_warehouse(&store, 100, 0).await;
        // No start_day: the business date has no ledger entry.
        let created = crate::carts::create_cart(&store, "MG Road")
            .await
            .expect("create cart");
        let outcome = transfer_to_cart(&store, &clock, &created.id, 30, 0)
            .await
            .expect("transfer");

        let mut session =
            session_through_receipts(&outcome.cart, &outcome.warehouse, 5, 0, 200.0, 50.0);
        session.advance().expect("to finalize");
        session
            .set_denomination(Denomination::Note200, 1)
            .expect("200");

        close_cart(&store, &session).await.expect("close");

        let stored = store
            .read(CARTS_COLLECTION, &created.id)
            .await
            .expect("read")
            .expect("exists");
        assert_eq!(stored.data["status"], "closed");
        let stick = store
            .read(WAREHOUSE_COLLECTION, "stickKulfi")
            .await
            .expect("read")
            .expect("exists");
        assert_eq!(stick.data["quantity"], 75);
    }

    #[tokio::test]
    async fn test_begin_requires_open_cart() {
        let cart = Cart::default();
        let warehouse = Warehouse::default();
        let err = DayOutSession::begin(&cart, &warehouse).expect_err("closed cart");
        assert!(matches!(err, OpsError::Validation(_)));
    }

    #[tokio::test]
    async fn test_reset_discards_all_inputs() {
        let store = MemoryStore::new();
        let clock = FixedClock::from_str("2025-04-28T08:00:00Z");
        seed_warehouse(&store, 100, 40).await;
        let (cart, warehouse) = open_cart_with_stock(&store, &clock, 30, 0).await;

        let mut session = session_through_receipts(&cart, &warehouse, 5, 0, 150.0, 50.0);
        session
            .set_expense(ExpenseCategory::Wastage, 50.0)
            .expect("wastage");

        session.reset();
        assert_eq!(session.step(), DayOutStep::Stick);
        assert_eq!(session.kept(ProductType::Stick), None);
        assert_eq!(session.cash(), None);
        assert_eq!(session.tally_total(), 0.0);
        assert_eq!(session.original_balance_short(), 0.0);
        // The cart binding survives a clear.
        assert_eq!(session.cart_id(), cart.id);
    }

    #[test]
    fn test_denomination_totals_count_notes_and_coins() {
        let mut sheet = DenominationSheet::default();
        sheet.put(Denomination::Note500, 2);
        sheet.put(Denomination::Note20, 3);
        sheet.put(Denomination::Coins, 17);
        assert_eq!(sheet.total(), 1077.0);
    }
}
