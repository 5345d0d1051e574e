use std::{fmt, sync::Arc};

use chrono::{Local, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{
    Batch, BatchKey, BatchPhase, BatchState, NewScan,
    pairing::ImagePairing,
    store::{BatchStore, CasOutcome},
    validator::ScanValidator,
};
use crate::api_types::{ParsedFinalizeScan, ParsedScan};
use crate::error::{FinalizeError, ScanRejection, StoreError};

/// Display format for server-side capture times.
pub const CAPTURE_DISPLAY_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Response to an accepted scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanReceipt {
    pub accepted: bool,
    pub key: BatchKey,
    pub count: usize,
    pub capacity: u32,
    pub capacity_reached: bool,
    pub sequence_number: u32,
    pub has_image: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchStatus {
    pub key: BatchKey,
    pub count: usize,
    pub capacity: u32,
    pub state: BatchPhase,
    pub capacity_reached: bool,
}

/// Owns the per-key batch state machine.
///
/// Submits, resets and state transitions for one key are serialised by a
/// per-key mutex; the hand-off into `Finalizing` is additionally guarded by
/// the store's compare-and-swap so a batch is never delivered twice.
pub struct BatchAccumulator {
    store: Arc<dyn BatchStore>,
    validator: ScanValidator,
    pairing: Arc<ImagePairing>,
    key_locks: DashMap<BatchKey, Arc<Mutex<()>>>,
}

impl fmt::Debug for BatchAccumulator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchAccumulator")
            .field("validator", &self.validator)
            .field("locked_keys", &self.key_locks.len())
            .finish()
    }
}

impl BatchAccumulator {
    pub fn new(
        store: Arc<dyn BatchStore>,
        validator: ScanValidator,
        pairing: Arc<ImagePairing>,
    ) -> Self {
        Self {
            store,
            validator,
            pairing,
            key_locks: DashMap::new(),
        }
    }

    pub fn capacity(&self) -> u32 {
        self.validator.capacity()
    }

    pub fn pairing(&self) -> &Arc<ImagePairing> {
        &self.pairing
    }

    pub fn validator(&self) -> &ScanValidator {
        &self.validator
    }

    fn lock_for(&self, key: &BatchKey) -> Arc<Mutex<()>> {
        self.key_locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn forget_lock(&self, key: &BatchKey) {
        self.key_locks
            .remove_if(key, |_, lock| Arc::strong_count(lock) == 1);
    }

    /// Accepts one scan for the batch keyed by the operator id.
    pub async fn submit(
        &self,
        scan: ParsedScan,
    ) -> Result<ScanReceipt, ScanRejection> {
        self.validator.check_operator(&scan.operator_id)?;
        let key = BatchKey::new(&scan.operator_id)?;

        let lock = self.lock_for(&key);
        let _guard = lock.lock().await;

        let existing = self.store.get(&key).await?;
        self.validator.validate(
            existing.as_ref(),
            &scan.operator_id,
            &scan.code_value,
        )?;

        if let Some(inline) = scan.image {
            self.pairing.capture(&scan.operator_id, inline);
        }
        let image = self.pairing.consume_for_next_scan(&scan.operator_id);

        let now = Utc::now();
        let captured_at = scan.captured_at.unwrap_or_else(|| {
            now.with_timezone(&Local)
                .format(CAPTURE_DISPLAY_FORMAT)
                .to_string()
        });

        let mut batch = existing.unwrap_or_else(|| {
            Batch::new(key.clone(), self.validator.capacity())
        });
        if batch.operator_name.is_none() {
            batch.operator_name =
                self.validator.registry().display_name(&scan.operator_id);
        }

        let restore = image.clone();
        let (sequence_number, has_image) = {
            let accepted = batch.push(NewScan {
                operator_id: scan.operator_id.clone(),
                code_value: scan.code_value,
                captured_at,
                epoch_millis: Some(now.timestamp_millis()),
                image,
            });
            (accepted.sequence_number, accepted.image.is_some())
        };
        let receipt = ScanReceipt {
            accepted: true,
            key: key.clone(),
            count: batch.len(),
            capacity: batch.capacity,
            capacity_reached: batch.is_full(),
            sequence_number,
            has_image,
        };

        if let Err(err) = self.store.put(batch).await {
            if let Some(image) = restore {
                self.pairing.capture(&scan.operator_id, image);
            }
            return Err(err.into());
        }

        debug!(
            key = %key,
            sequence = receipt.sequence_number,
            has_image = receipt.has_image,
            "scan accepted"
        );
        if receipt.capacity_reached {
            info!(key = %key, count = receipt.count, "batch reached capacity");
        }

        Ok(receipt)
    }

    pub async fn status(
        &self,
        key: &BatchKey,
    ) -> Result<BatchStatus, StoreError> {
        let batch = self.store.get(key).await?;
        Ok(match batch {
            Some(batch) => BatchStatus {
                key: key.clone(),
                count: batch.len(),
                capacity: batch.capacity,
                state: Some(batch.state).into(),
                capacity_reached: batch.is_full(),
            },
            None => BatchStatus {
                key: key.clone(),
                count: 0,
                capacity: self.validator.capacity(),
                state: BatchPhase::Empty,
                capacity_reached: false,
            },
        })
    }

    pub async fn get(&self, key: &BatchKey) -> Result<Option<Batch>, StoreError> {
        self.store.get(key).await
    }

    /// Operator reset: drops the batch and any pending image. Returns whether
    /// a batch existed.
    pub async fn reset(&self, key: &BatchKey) -> Result<bool, ScanRejection> {
        let lock = self.lock_for(key);
        let removed = {
            let _guard = lock.lock().await;

            if let Some(batch) = self.store.get(key).await?
                && batch.state == BatchState::Finalizing
            {
                return Err(ScanRejection::AlreadyProcessing {
                    key: key.to_string(),
                });
            }

            let removed = self.store.delete(key).await?;
            self.pairing.discard(key.as_str());
            removed
        };
        drop(lock);
        self.forget_lock(key);

        info!(key = %key, existed = removed.is_some(), "batch reset");
        Ok(removed.is_some())
    }

    /// Moves a full (or previously failed) batch into `Finalizing`.
    pub async fn begin_finalize(
        &self,
        key: &BatchKey,
    ) -> Result<Batch, FinalizeError> {
        let lock = self.lock_for(key);
        let _guard = lock.lock().await;

        let outcome = self
            .store
            .compare_and_swap_state(
                key,
                &[BatchState::Full, BatchState::Failed],
                BatchState::Finalizing,
            )
            .await?;

        match outcome {
            CasOutcome::Swapped(batch) => Ok(batch),
            CasOutcome::Missing => Err(FinalizeError::NotFound {
                key: key.to_string(),
            }),
            CasOutcome::Mismatch(batch) => match batch.state {
                BatchState::Finalizing => {
                    Err(FinalizeError::AlreadyProcessing {
                        key: key.to_string(),
                    })
                }
                _ => Err(FinalizeError::Incomplete {
                    key: key.to_string(),
                    count: batch.len(),
                    capacity: batch.capacity,
                }),
            },
        }
    }

    /// Successful delivery: the batch is removed.
    pub async fn complete(&self, key: &BatchKey) -> Result<(), StoreError> {
        let lock = self.lock_for(key);
        {
            let _guard = lock.lock().await;
            self.store.delete(key).await?;
        }
        drop(lock);
        self.forget_lock(key);
        Ok(())
    }

    /// Failed finalize: the batch is kept, full and intact, for a retry.
    pub async fn fail(&self, key: &BatchKey) -> Result<(), StoreError> {
        let lock = self.lock_for(key);
        let _guard = lock.lock().await;

        match self
            .store
            .compare_and_swap_state(
                key,
                &[BatchState::Finalizing],
                BatchState::Failed,
            )
            .await?
        {
            CasOutcome::Swapped(_) => {}
            CasOutcome::Mismatch(batch) => warn!(
                key = %key,
                state = ?batch.state,
                "batch left finalizing before it could be marked failed"
            ),
            CasOutcome::Missing => {
                warn!(key = %key, "batch vanished before it could be marked failed")
            }
        }
        Ok(())
    }

    /// Installs a client-held scan list as a `Full` batch when the store has
    /// nothing for `key`. Each scan passes the same checks as a live submit.
    /// An existing batch is returned untouched.
    pub async fn adopt(
        &self,
        key: &BatchKey,
        operator_name: Option<String>,
        scans: Vec<ParsedFinalizeScan>,
    ) -> Result<Batch, FinalizeError> {
        let lock = self.lock_for(key);
        let _guard = lock.lock().await;

        if let Some(existing) = self.store.get(key).await? {
            return Ok(existing);
        }

        let operator_id = key.as_str();
        let mut batch = Batch::new(key.clone(), self.validator.capacity());
        batch.operator_name = operator_name.or_else(|| {
            self.validator.registry().display_name(operator_id)
        });

        for scan in scans {
            self.validator.validate(
                Some(&batch),
                operator_id,
                &scan.code_value,
            )?;
            batch.push(NewScan {
                operator_id: operator_id.to_string(),
                code_value: scan.code_value,
                captured_at: scan.captured_at,
                epoch_millis: scan.epoch_millis,
                image: scan.image,
            });
        }

        if !batch.is_full() {
            return Err(FinalizeError::Incomplete {
                key: key.to_string(),
                count: batch.len(),
                capacity: batch.capacity,
            });
        }

        self.store.put(batch.clone()).await?;
        info!(key = %key, count = batch.len(), "adopted client-held batch");
        Ok(batch)
    }
}
