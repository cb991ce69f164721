//! Warehouse inventory ledger.
//!
//! The warehouse is the source of truth for on-hand stock before
//! distribution to carts: one document per product type, mutated by
//! replenishment, Day-In transfers, and the kept-stock return at cart
//! close. Transfers are all-or-nothing: a request exceeding the available
//! quantity of either type is rejected before any write is issued.

use serde_json::json;
use tracing::{info, warn};

use crate::carts::load_carts;
use crate::error::OpsError;
use crate::intents::{commit_write_set, WriteOp};
use crate::store::DocumentStore;
use crate::summary::{load_summary, record_replenishment};
use crate::types::{
    Cart, CartStatus, InventoryRecord, ProductType, Warehouse, CARTS_COLLECTION,
    WAREHOUSE_COLLECTION,
};
use crate::Clock;

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Read both warehouse records. Missing or unknown documents fall back to
/// zeroed records, matching what a fresh installation starts from.
pub async fn load_warehouse<S: DocumentStore>(store: &S) -> Result<Warehouse, OpsError> {
    let docs = store.read_all(WAREHOUSE_COLLECTION).await?;
    let mut warehouse = Warehouse::default();
    for doc in docs {
        match ProductType::from_doc_id(&doc.id) {
            Some(kind) => *warehouse.record_mut(kind) = doc.parse()?,
            None => warn!(id = %doc.id, "unknown warehouse document"),
        }
    }
    Ok(warehouse)
}

fn record_patch(record: &InventoryRecord) -> serde_json::Value {
    json!({
        "quantity": record.quantity,
        "costPrice": record.cost_price,
        "sellingPrice": record.selling_price,
    })
}

/// Patch returning kept stock to the warehouse at cart close.
pub fn return_from_cart_patch(
    kind: ProductType,
    record: &InventoryRecord,
    returned: i64,
) -> WriteOp {
    let restocked = InventoryRecord {
        quantity: record.quantity + returned,
        ..record.clone()
    };
    WriteOp::new(WAREHOUSE_COLLECTION, kind.doc_id(), record_patch(&restocked))
}

// ---------------------------------------------------------------------------
// Replenishment
// ---------------------------------------------------------------------------

/// Add freshly produced stock to the warehouse and record it against
/// today's summary entry (when the day has been started).
pub async fn replenish<S: DocumentStore, C: Clock>(
    store: &S,
    clock: &C,
    stick_qty: i64,
    plate_qty: i64,
) -> Result<Warehouse, OpsError> {
    if stick_qty < 0 || plate_qty < 0 {
        return Err(OpsError::validation("replenish quantities cannot be negative"));
    }
    if stick_qty == 0 && plate_qty == 0 {
        return Err(OpsError::validation("enter some quantity to replenish"));
    }

    let mut warehouse = load_warehouse(store).await?;
    warehouse.stick.quantity += stick_qty;
    warehouse.plate.quantity += plate_qty;

    store
        .update(
            WAREHOUSE_COLLECTION,
            ProductType::Stick.doc_id(),
            json!({ "quantity": warehouse.stick.quantity }),
        )
        .await?;
    store
        .update(
            WAREHOUSE_COLLECTION,
            ProductType::Plate.doc_id(),
            json!({ "quantity": warehouse.plate.quantity }),
        )
        .await?;

    let today = clock.now().date_naive();
    match load_summary(store, today).await? {
        Some(summary) => {
            record_replenishment(store, today, &summary, stick_qty, plate_qty).await?;
        }
        None => warn!(
            date = %today,
            "no summary entry for today; replenishment not recorded in the day ledger"
        ),
    }

    info!(stick = stick_qty, plate = plate_qty, "warehouse replenished");
    Ok(warehouse)
}

// ---------------------------------------------------------------------------
// Day-In transfer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct TransferOutcome {
    pub warehouse: Warehouse,
    pub cart: Cart,
}

/// Move stock from the warehouse into a cart (the Day-In phase).
///
/// Both writes belong to one write set: the warehouse decrement and the cart
/// increment either both land or the whole request is rejected up front.
/// A cart receiving its first stock is opened and stamped `openedAt`.
pub async fn transfer_to_cart<S: DocumentStore, C: Clock>(
    store: &S,
    clock: &C,
    cart_id: &str,
    stick_qty: i64,
    plate_qty: i64,
) -> Result<TransferOutcome, OpsError> {
    if cart_id.trim().is_empty() {
        return Err(OpsError::validation("select a cart"));
    }
    if stick_qty < 0 || plate_qty < 0 {
        return Err(OpsError::validation("transfer quantities cannot be negative"));
    }
    if stick_qty == 0 && plate_qty == 0 {
        return Err(OpsError::validation("enter quantities to transfer"));
    }

    let mut warehouse = load_warehouse(store).await?;
    for (kind, qty) in [
        (ProductType::Stick, stick_qty),
        (ProductType::Plate, plate_qty),
    ] {
        let available = warehouse.record(kind).quantity;
        if qty > available {
            return Err(OpsError::InsufficientStock {
                kind,
                requested: qty,
                available,
            });
        }
    }

    let carts = load_carts(store).await?;
    let Some(cart) = carts.into_iter().find(|c| c.id == cart_id) else {
        return Err(OpsError::validation(format!("cart {cart_id} not found")));
    };

    let mut updated = cart.clone();
    updated.inventory.stick += stick_qty;
    updated.inventory.plate += plate_qty;
    updated.status = CartStatus::Open;
    if !cart.is_open() {
        updated.opened_at = Some(clock.now().to_rfc3339());
    }

    warehouse.stick.quantity -= stick_qty;
    warehouse.plate.quantity -= plate_qty;

    let mut cart_patch = json!({
        "inventory": {
            "stick": updated.inventory.stick,
            "plate": updated.inventory.plate,
        },
        "status": CartStatus::Open,
    });
    if let Some(opened_at) = &updated.opened_at {
        cart_patch["openedAt"] = json!(opened_at);
    }

    commit_write_set(
        store,
        "transfer_to_cart",
        vec![
            WriteOp::new(CARTS_COLLECTION, &updated.id, cart_patch),
            WriteOp::new(
                WAREHOUSE_COLLECTION,
                ProductType::Stick.doc_id(),
                record_patch(&warehouse.stick),
            ),
            WriteOp::new(
                WAREHOUSE_COLLECTION,
                ProductType::Plate.doc_id(),
                record_patch(&warehouse.plate),
            ),
        ],
    )
    .await?;

    info!(
        cart_id = %updated.id,
        stick = stick_qty,
        plate = plate_qty,
        "stock transferred to cart"
    );

    Ok(TransferOutcome {
        warehouse,
        cart: updated,
    })
}

// ---------------------------------------------------------------------------
// Valuation
// ---------------------------------------------------------------------------

/// Stock position across the warehouse and all carts, valued at cost price.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StockValuation {
    pub warehouse_qty: i64,
    pub warehouse_value: f64,
    pub cart_qty: i64,
    pub cart_value: f64,
    pub total_qty: i64,
    pub total_value: f64,
}

pub fn stock_valuation(warehouse: &Warehouse, carts: &[Cart]) -> StockValuation {
    let cart_stick: i64 = carts.iter().map(|c| c.inventory.stick).sum();
    let cart_plate: i64 = carts.iter().map(|c| c.inventory.plate).sum();

    let warehouse_qty = warehouse.stick.quantity + warehouse.plate.quantity;
    let warehouse_value = warehouse.stick.quantity as f64 * warehouse.stick.cost_price
        + warehouse.plate.quantity as f64 * warehouse.plate.cost_price;
    let cart_value = cart_stick as f64 * warehouse.stick.cost_price
        + cart_plate as f64 * warehouse.plate.cost_price;
    let cart_qty = cart_stick + cart_plate;

    StockValuation {
        warehouse_qty,
        warehouse_value,
        cart_qty,
        cart_value,
        total_qty: warehouse_qty + cart_qty,
        total_value: warehouse_value + cart_value,
    }
}

// ===========================================================================
// Tests
// ===========================================================================
