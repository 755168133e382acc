use std::sync::Arc;

use async_trait::async_trait;

use super::{AmountSource, CursorCell, Indexer, StopSignal, SyncOptimizer};
use crate::{
    dao::RecordStore,
    error::Error,
    helpers::{hours_between, next_hour},
    model::RA_Amount,
    types::AssetPosition,
};

/// Measures one asset position, one hour boundary at a time, never
/// ahead of its chain's block-time cursor. The cursor only advances
/// after the raw-amount record is durably written, so crash-resume
/// re-processes at most one already-written hour (idempotent upsert).
pub struct DataIndexer {
    id: String,
    position: AssetPosition,
    parent: CursorCell,
    cursor: CursorCell,
    store: Arc<dyn RecordStore>,
    amounts: Arc<dyn AmountSource>,
    optimizer: Arc<SyncOptimizer>,
}

impl DataIndexer {
    pub fn new(
        position: AssetPosition,
        parent: CursorCell,
        cursor: CursorCell,
        store: Arc<dyn RecordStore>,
        amounts: Arc<dyn AmountSource>,
        optimizer: Arc<SyncOptimizer>,
    ) -> DataIndexer {
        DataIndexer {
            id: position.data_identity(),
            position,
            parent,
            cursor,
            store,
            amounts,
            optimizer,
        }
    }
}

#[async_trait]
impl Indexer for DataIndexer {
    fn identity(&self) -> &str {
        &self.id
    }

    fn cursor(&self) -> &CursorCell {
        &self.cursor
    }

    async fn run_cycle(&self, stop: &StopSignal) -> Result<u32, Error> {
        let mut cursor = self.cursor.get();

        // Safe bound: a start-of-cycle snapshot of the parent, clipped
        // by the position's validity window.
        let mut bound = self.parent.get();
        if let Some(end) = self.position.end_hour {
            bound = bound.min(end);
        }

        if cursor >= bound {
            return Ok(0);
        }

        let width = self.optimizer.batch_width(hours_between(cursor, bound));
        let mut processed: u32 = 0;

        for _ in 0..width {
            if stop.is_stopped() || cursor >= bound {
                break;
            }

            let hour = next_hour(cursor);

            let quantity =
                match self.amounts.resolve_amount(&self.position, hour).await {
                    Ok(quantity) => quantity,
                    // Upstream has not reached this hour; retry later.
                    Err(Error::NotYetAvailable) => break,
                    // Stop without advancing: no gap is silently skipped.
                    Err(e) => return Err(e),
                };

            self.store
                .put_raw_amount(RA_Amount {
                    RA_identity: self.id.clone(),
                    RA_hour: hour,
                    RA_quantity: quantity,
                })
                .await?;
            self.store.put_cursor(&self.id, hour).await?;
            self.cursor.publish(hour);

            cursor = hour;
            processed += 1;
        }

        Ok(processed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::testing::{hour, ConstantAmounts, MemoryStore};
    use crate::handler::OptimizerSettings;
    use crate::types::PositionKind;
    use bigdecimal::BigDecimal;
    use std::time::Duration;

    fn position(end_hour: Option<i64>) -> AssetPosition {
        AssetPosition {
            project: "rollup-one".to_owned(),
            chain: "mainnet".to_owned(),
            kind: PositionKind::TokenBalance {
                token: "0xt".to_owned(),
                holder: "0xbridge".to_owned(),
            },
            decimals: 6,
            reference: "ethereum".to_owned(),
            start_hour: hour(100),
            end_hour: end_hour.map(hour),
        }
    }

    fn optimizer(max_batch: u32) -> Arc<SyncOptimizer> {
        Arc::new(SyncOptimizer::new(OptimizerSettings {
            min_batch: 1,
            max_batch,
            near_tip_hours: 0,
            target_cycle: Duration::from_secs(60),
        }))
    }

    fn indexer(
        store: Arc<MemoryStore>,
        position: AssetPosition,
        parent_at: i64,
        cursor_at: i64,
        amounts: ConstantAmounts,
        max_batch: u32,
    ) -> DataIndexer {
        DataIndexer::new(
            position,
            CursorCell::new(hour(parent_at)),
            CursorCell::new(hour(cursor_at)),
            store,
            Arc::new(amounts),
            optimizer(max_batch),
        )
    }

    #[tokio::test]
    async fn test_catch_up_cycle_processes_one_batch() {
        let store = Arc::new(MemoryStore::default());
        let indexer = indexer(
            store.clone(),
            position(None),
            150,
            100,
            ConstantAmounts {
                quantity: BigDecimal::from(1000),
                available_until: None,
            },
            10,
        );

        let stop = crate::handler::StopHandle::new().subscribe();
        let processed = indexer.run_cycle(&stop).await.unwrap();

        assert_eq!(processed, 10);
        assert_eq!(indexer.cursor().get(), hour(110));

        let amounts = store.raw_amounts.lock().unwrap();
        assert_eq!(amounts.len(), 10);
        for n in 101..=110 {
            let key = ("mainnet:token:0xbridge".to_owned(), hour(n));
            assert_eq!(amounts.get(&key), Some(&BigDecimal::from(1000)));
        }
    }

    #[tokio::test]
    async fn test_reprocessing_is_idempotent() {
        let store = Arc::new(MemoryStore::default());
        let indexer = indexer(
            store.clone(),
            position(None),
            110,
            100,
            ConstantAmounts {
                quantity: BigDecimal::from(1000),
                available_until: None,
            },
            20,
        );

        let stop = crate::handler::StopHandle::new().subscribe();
        indexer.run_cycle(&stop).await.unwrap();
        let first = store.raw_amounts.lock().unwrap().clone();

        // Reset the cursor behind already-processed hours and re-run.
        indexer.cursor().publish(hour(100));
        indexer.run_cycle(&stop).await.unwrap();
        let second = store.raw_amounts.lock().unwrap().clone();

        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_cursor_never_exceeds_parent() {
        let store = Arc::new(MemoryStore::default());
        let indexer = indexer(
            store.clone(),
            position(None),
            103,
            100,
            ConstantAmounts {
                quantity: BigDecimal::from(7),
                available_until: None,
            },
            50,
        );

        let stop = crate::handler::StopHandle::new().subscribe();
        let processed = indexer.run_cycle(&stop).await.unwrap();

        assert_eq!(processed, 3);
        assert_eq!(indexer.cursor().get(), hour(103));
    }

    #[tokio::test]
    async fn test_end_hour_halts_progress() {
        let store = Arc::new(MemoryStore::default());
        let indexer = indexer(
            store.clone(),
            position(Some(75)),
            150,
            75,
            ConstantAmounts {
                quantity: BigDecimal::from(1),
                available_until: None,
            },
            50,
        );

        let stop = crate::handler::StopHandle::new().subscribe();
        let processed = indexer.run_cycle(&stop).await.unwrap();

        assert_eq!(processed, 0);
        assert_eq!(indexer.cursor().get(), hour(75));
        assert!(store.raw_amounts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_not_yet_available_stops_cleanly() {
        let store = Arc::new(MemoryStore::default());
        let indexer = indexer(
            store.clone(),
            position(None),
            150,
            100,
            ConstantAmounts {
                quantity: BigDecimal::from(5),
                available_until: Some(hour(103)),
            },
            10,
        );

        let stop = crate::handler::StopHandle::new().subscribe();
        let processed = indexer.run_cycle(&stop).await.unwrap();

        assert_eq!(processed, 3);
        assert_eq!(indexer.cursor().get(), hour(103));
    }

    #[tokio::test]
    async fn test_stop_signal_checked_between_hours() {
        let store = Arc::new(MemoryStore::default());
        let indexer = indexer(
            store.clone(),
            position(None),
            150,
            100,
            ConstantAmounts {
                quantity: BigDecimal::from(5),
                available_until: None,
            },
            10,
        );

        let handle = crate::handler::StopHandle::new();
        let stop = handle.subscribe();
        handle.stop();

        let processed = indexer.run_cycle(&stop).await.unwrap();
        assert_eq!(processed, 0);
        assert_eq!(indexer.cursor().get(), hour(100));
    }
}
