use std::sync::Arc;

use async_trait::async_trait;

use super::{CursorCell, Indexer, StopSignal, SyncOptimizer};
use crate::{
    dao::RecordStore,
    error::Error,
    helpers::{hours_between, next_hour, scale_down},
    model::PV_Value,
    types::AssetPosition,
};

/// Joins one position's raw amounts with the applicable price points
/// and publishes priced values. Never advances past either parent; a
/// record missing inside the parents' claimed range is a consistency
/// fault and fails the cycle loudly, never a silent skip.
pub struct ValueIndexer {
    id: String,
    data_identity: String,
    position: AssetPosition,
    data_parent: CursorCell,
    price_parent: CursorCell,
    cursor: CursorCell,
    store: Arc<dyn RecordStore>,
    optimizer: Arc<SyncOptimizer>,
}

impl ValueIndexer {
    pub fn new(
        position: AssetPosition,
        data_parent: CursorCell,
        price_parent: CursorCell,
        cursor: CursorCell,
        store: Arc<dyn RecordStore>,
        optimizer: Arc<SyncOptimizer>,
    ) -> ValueIndexer {
        ValueIndexer {
            id: position.value_identity(),
            data_identity: position.data_identity(),
            position,
            data_parent,
            price_parent,
            cursor,
            store,
            optimizer,
        }
    }
}

#[async_trait]
impl Indexer for ValueIndexer {
    fn identity(&self) -> &str {
        &self.id
    }

    fn cursor(&self) -> &CursorCell {
        &self.cursor
    }

    async fn run_cycle(&self, stop: &StopSignal) -> Result<u32, Error> {
        let mut cursor = self.cursor.get();

        let mut bound = self.data_parent.get().min(self.price_parent.get());
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

            let quantity = self
                .store
                .raw_amount(&self.data_identity, hour)
                .await?
                .ok_or_else(|| {
                    Error::MissingUpstreamRecord(format!(
                        "raw amount {} at {}",
                        self.data_identity, hour
                    ))
                })?;

            let factor = self
                .store
                .price_point(&self.position.reference, hour)
                .await?
                .ok_or_else(|| {
                    Error::MissingUpstreamRecord(format!(
                        "price point {} at {}",
                        self.position.reference, hour
                    ))
                })?;

            let value = scale_down(quantity * factor, self.position.decimals);

            self.store
                .put_priced_value(PV_Value {
                    PV_project: self.position.project.clone(),
                    PV_identity: self.data_identity.clone(),
                    PV_hour: hour,
                    PV_value: value,
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
    use crate::handler::testing::{hour, MemoryStore};
    use crate::handler::{OptimizerSettings, StopHandle};
    use crate::types::PositionKind;
    use bigdecimal::BigDecimal;
    use std::str::FromStr;
    use std::time::Duration;

    fn position() -> AssetPosition {
        AssetPosition {
            project: "rollup-one".to_owned(),
            chain: "mainnet".to_owned(),
            kind: PositionKind::TokenBalance {
                token: "0xt".to_owned(),
                holder: "0xbridge".to_owned(),
            },
            decimals: 6,
            reference: "ethereum".to_owned(),
            start_hour: hour(0),
            end_hour: None,
        }
    }

    fn optimizer() -> Arc<SyncOptimizer> {
        Arc::new(SyncOptimizer::new(OptimizerSettings {
            min_batch: 1,
            max_batch: 100,
            near_tip_hours: 0,
            target_cycle: Duration::from_secs(60),
        }))
    }

    async fn seed(
        store: &MemoryStore,
        identity: &str,
        amounts_through: i64,
        prices_through: i64,
    ) {
        for n in 1..=amounts_through {
            store
                .raw_amounts
                .lock()
                .unwrap()
                .insert((identity.to_owned(), hour(n)), BigDecimal::from(1_500_000));
        }
        for n in 1..=prices_through {
            store
                .price_points
                .lock()
                .unwrap()
                .insert(("ethereum".to_owned(), hour(n)), BigDecimal::from(2000));
        }
    }

    #[tokio::test]
    async fn test_bounded_by_slower_parent() {
        let store = Arc::new(MemoryStore::default());
        let identity = position().data_identity();
        seed(&store, &identity, 50, 40).await;

        let indexer = ValueIndexer::new(
            position(),
            CursorCell::new(hour(50)),
            CursorCell::new(hour(40)),
            CursorCell::new(hour(0)),
            store.clone(),
            optimizer(),
        );

        let stop = StopHandle::new().subscribe();
        let processed = indexer.run_cycle(&stop).await.unwrap();

        assert_eq!(processed, 40);
        assert_eq!(indexer.cursor().get(), hour(40));

        // No silent gaps: every hour up to the cursor has a value.
        let values = store.priced_values.lock().unwrap();
        for n in 1..=40 {
            let (project, value) =
                values.get(&(identity.clone(), hour(n))).unwrap();
            assert_eq!(project, "rollup-one");
            // 1_500_000 base units at 6 decimals, priced at 2000.
            assert_eq!(*value, BigDecimal::from_str("3000").unwrap());
        }
        assert!(!values.contains_key(&(identity.clone(), hour(41))));
    }

    #[tokio::test]
    async fn test_missing_upstream_record_fails_loudly() {
        let store = Arc::new(MemoryStore::default());
        let identity = position().data_identity();
        seed(&store, &identity, 5, 5).await;
        store
            .price_points
            .lock()
            .unwrap()
            .remove(&("ethereum".to_owned(), hour(3)));

        let indexer = ValueIndexer::new(
            position(),
            CursorCell::new(hour(5)),
            CursorCell::new(hour(5)),
            CursorCell::new(hour(0)),
            store.clone(),
            optimizer(),
        );

        let stop = StopHandle::new().subscribe();
        let result = indexer.run_cycle(&stop).await;

        assert!(matches!(result, Err(Error::MissingUpstreamRecord(_))));
        // Progress stops just before the hole; nothing was skipped.
        assert_eq!(indexer.cursor().get(), hour(2));
        assert_eq!(store.priced_values.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_end_hour_clips_the_bound() {
        let store = Arc::new(MemoryStore::default());
        let identity = position().data_identity();
        seed(&store, &identity, 20, 20).await;

        let mut clipped = position();
        clipped.end_hour = Some(hour(10));

        let indexer = ValueIndexer::new(
            clipped,
            CursorCell::new(hour(20)),
            CursorCell::new(hour(20)),
            CursorCell::new(hour(0)),
            store.clone(),
            optimizer(),
        );

        let stop = StopHandle::new().subscribe();
        let processed = indexer.run_cycle(&stop).await.unwrap();

        assert_eq!(processed, 10);
        assert_eq!(indexer.cursor().get(), hour(10));
    }
}
