//! Cart ledger: mobile selling points holding a slice of warehouse stock.
//!
//! A cart should be open exactly while it holds stock. Because transfers and
//! closes are independent document writes, a crash can leave status and
//! inventory out of step; every bulk load therefore runs a self-heal pass
//! that corrects stored statuses to match the held quantities.

use futures::future::join_all;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::error::{OpsError, StoreError};
use crate::store::DocumentStore;
use crate::types::{Cart, CartStatus, CARTS_COLLECTION};
use crate::Clock;

// ---------------------------------------------------------------------------
// Loading + self-heal
// ---------------------------------------------------------------------------

/// A corrective write produced by the self-heal pass.
#[derive(Debug, Clone, PartialEq)]
pub struct CartCorrection {
    pub cart_id: String,
    pub patch: Value,
}

/// Read every cart, skipping documents that fail to decode.
pub async fn load_carts<S: DocumentStore>(store: &S) -> Result<Vec<Cart>, OpsError> {
    let docs = store.read_all(CARTS_COLLECTION).await?;
    let mut carts = Vec::with_capacity(docs.len());
    for doc in docs {
        match doc.parse::<Cart>() {
            Ok(mut cart) => {
                cart.id = doc.id;
                carts.push(cart);
            }
            Err(e) => warn!(id = %doc.id, "skipping malformed cart: {e}"),
        }
    }
    Ok(carts)
}

/// Pure self-heal pass: for each cart whose status disagrees with its held
/// quantities, produce the corrected cart and the patch that fixes the
/// stored record. A cart healed open without an opening time gets one.
///
/// Running the pass twice yields the same carts and no further corrections.
pub fn reconcile(carts: &[Cart], now: &str) -> (Vec<Cart>, Vec<CartCorrection>) {
    let mut healed = Vec::with_capacity(carts.len());
    let mut corrections = Vec::new();

    for cart in carts {
        let should_be_open = cart.inventory.total() > 0;
        if should_be_open == cart.is_open() {
            healed.push(cart.clone());
            continue;
        }

        let mut corrected = cart.clone();
        let status = if should_be_open {
            CartStatus::Open
        } else {
            CartStatus::Closed
        };
        corrected.status = status;

        let mut patch = json!({ "status": status });
        if should_be_open && corrected.opened_at.is_none() {
            corrected.opened_at = Some(now.to_string());
            patch["openedAt"] = json!(now);
        }

        corrections.push(CartCorrection {
            cart_id: cart.id.clone(),
            patch,
        });
        healed.push(corrected);
    }

    (healed, corrections)
}

/// Load all carts and persist any status corrections (dispatched
/// concurrently, like every other multi-document write here).
pub async fn load_and_heal<S: DocumentStore, C: Clock>(
    store: &S,
    clock: &C,
) -> Result<Vec<Cart>, OpsError> {
    let carts = load_carts(store).await?;
    let now = clock.now().to_rfc3339();
    let (healed, corrections) = reconcile(&carts, &now);

    if !corrections.is_empty() {
        let writes: Vec<_> = corrections
            .iter()
            .map(|c| store.update(CARTS_COLLECTION, &c.cart_id, c.patch.clone()))
            .collect();
        for (correction, result) in corrections.iter().zip(join_all(writes).await) {
            result.map_err(|e| {
                warn!(cart_id = %correction.cart_id, "cart status correction failed: {e}");
                OpsError::Persistence(e)
            })?;
        }
        info!(count = corrections.len(), "cart statuses self-healed");
    }

    Ok(healed)
}

/// Patch closing a cart: status closed, inventory zeroed, `closedAt`
/// stamped with the given time.
pub fn close_patch(cart_id: &str, closed_at: &str) -> crate::intents::WriteOp {
    crate::intents::WriteOp::new(
        CARTS_COLLECTION,
        cart_id,
        json!({
            "status": CartStatus::Closed,
            "inventory": { "stick": 0, "plate": 0 },
            "closedAt": closed_at,
        }),
    )
}

// ---------------------------------------------------------------------------
// CRUD
// ---------------------------------------------------------------------------

/// Create a cart: closed, empty, at the given address.
pub async fn create_cart<S: DocumentStore>(store: &S, address: &str) -> Result<Cart, OpsError> {
    let address = address.trim();
    if address.is_empty() {
        return Err(OpsError::validation("cart address is required"));
    }

    let cart = Cart {
        address: address.to_string(),
        ..Cart::default()
    };
    let body = serde_json::to_value(&cart)
        .map_err(|e| StoreError::Backend(format!("encode cart: {e}")))?;
    let doc = store.create(CARTS_COLLECTION, body).await?;
    info!(cart_id = %doc.id, address, "cart created");

    Ok(Cart {
        id: doc.id,
        ..cart
    })
}

/// Update a cart's address.
pub async fn update_address<S: DocumentStore>(
    store: &S,
    cart_id: &str,
    address: &str,
) -> Result<(), OpsError> {
    let address = address.trim();
    if address.is_empty() {
        return Err(OpsError::validation("cart address is required"));
    }
    store
        .update(CARTS_COLLECTION, cart_id, json!({ "address": address }))
        .await?;
    Ok(())
}

/// Delete a cart. Open carts cannot be deleted.
pub async fn delete_cart<S: DocumentStore>(store: &S, cart_id: &str) -> Result<(), OpsError> {
    if let Some(doc) = store.read(CARTS_COLLECTION, cart_id).await? {
        let cart: Cart = doc.parse()?;
        if cart.is_open() {
            return Err(OpsError::CartOpen {
                id: cart_id.to_string(),
            });
        }
    }
    store.delete(CARTS_COLLECTION, cart_id).await?;
    info!(cart_id, "cart deleted");
    Ok(())
}

// ===========================================================================
// Tests
// ===========================================================================
