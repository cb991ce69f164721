//! Multi-document write sets with a persisted intent record.
//!
//! The store has no multi-document atomic commit: a stock transfer or cart
//! close is a set of independent writes dispatched concurrently. A crash or
//! network failure mid-set can leave the warehouse, cart, and daily-summary
//! documents mutually inconsistent. To bound that window, every write set is
//! recorded as an intent document before dispatch and deleted once all
//! writes land; `recover_pending_intents` re-applies whatever survived.
//!
//! Every patch in a write set carries absolute values (never deltas), so
//! re-applying a set is idempotent.

use chrono::Utc;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::error::{OpsError, StoreError};
use crate::store::DocumentStore;
use crate::types::INTENTS_COLLECTION;

/// One merge patch against one document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WriteOp {
    pub collection: String,
    pub id: String,
    pub patch: Value,
}

impl WriteOp {
    pub fn new(collection: impl Into<String>, id: impl Into<String>, patch: Value) -> Self {
        Self {
            collection: collection.into(),
            id: id.into(),
            patch,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IntentRecord {
    label: String,
    created_at: String,
    ops: Vec<WriteOp>,
}

/// Commit a write set: persist the intent, dispatch all patches
/// concurrently, wait for all, then delete the intent.
///
/// On any write failure the intent document is left in place for
/// `recover_pending_intents` and the first error is returned; writes that
/// already landed are NOT rolled back.
pub async fn commit_write_set<S: DocumentStore>(
    store: &S,
    label: &str,
    ops: Vec<WriteOp>,
) -> Result<(), OpsError> {
    if ops.is_empty() {
        return Ok(());
    }

    let record = IntentRecord {
        label: label.to_string(),
        created_at: Utc::now().to_rfc3339(),
        ops: ops.clone(),
    };
    let body = serde_json::to_value(&record)
        .map_err(|e| StoreError::Backend(format!("encode intent: {e}")))?;
    let intent = store.create(INTENTS_COLLECTION, body).await?;

    // Parallel dispatch, wait for all.
    let pending: Vec<_> = ops
        .iter()
        .map(|op| store.update(&op.collection, &op.id, op.patch.clone()))
        .collect();
    let results = join_all(pending).await;

    let mut first_err = None;
    for (op, result) in ops.iter().zip(results) {
        if let Err(e) = result {
            warn!(
                collection = %op.collection,
                id = %op.id,
                label,
                "write failed: {e}"
            );
            first_err.get_or_insert(e);
        }
    }

    if let Some(e) = first_err {
        warn!(intent = %intent.id, label, "write set left pending for recovery");
        return Err(OpsError::Persistence(e));
    }

    store.delete(INTENTS_COLLECTION, &intent.id).await?;
    Ok(())
}

/// Re-apply every pending write set left behind by an interrupted commit.
///
/// Returns the number of intents fully recovered. Intents whose writes
/// still fail stay pending for the next pass.
pub async fn recover_pending_intents<S: DocumentStore>(store: &S) -> Result<usize, OpsError> {
    let pending = store.read_all(INTENTS_COLLECTION).await?;
    let mut recovered = 0;

    for doc in pending {
        let record: IntentRecord = match doc.parse() {
            Ok(record) => record,
            Err(e) => {
                warn!(intent = %doc.id, "skipping malformed intent: {e}");
                continue;
            }
        };

        let writes: Vec<_> = record
            .ops
            .iter()
            .map(|op| store.update(&op.collection, &op.id, op.patch.clone()))
            .collect();
        let results = join_all(writes).await;

        if results.iter().any(Result::is_err) {
            warn!(intent = %doc.id, label = %record.label, "intent still failing, left pending");
            continue;
        }

        store.delete(INTENTS_COLLECTION, &doc.id).await?;
        recovered += 1;
        info!(intent = %doc.id, label = %record.label, "pending write set recovered");
    }

    Ok(recovered)
}

// ===========================================================================
// Tests
// ===========================================================================
