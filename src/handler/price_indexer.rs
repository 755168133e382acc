use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use super::{CursorCell, Indexer, StopSignal, SyncOptimizer};
use crate::{
    dao::RecordStore,
    error::Error,
    helpers::{floor_hour, hours_between, next_hour},
    provider::PriceSource,
    types::price_identity,
};

/// Descendant of the upstream price reference: advances its cursor
/// over hours for which a price point is in the store, backfilling
/// from the ranged source when the store runs dry. Value indexers read
/// this cursor as "latest hour safe to price".
pub struct PriceIndexer {
    id: String,
    reference: String,
    source: Arc<dyn PriceSource>,
    store: Arc<dyn RecordStore>,
    cursor: CursorCell,
    optimizer: Arc<SyncOptimizer>,
    safety_margin: Duration,
}

impl PriceIndexer {
    pub fn new(
        reference: &str,
        source: Arc<dyn PriceSource>,
        store: Arc<dyn RecordStore>,
        cursor: CursorCell,
        optimizer: Arc<SyncOptimizer>,
        safety_margin: Duration,
    ) -> PriceIndexer {
        PriceIndexer {
            id: price_identity(reference),
            reference: reference.to_owned(),
            source,
            store,
            cursor,
            optimizer,
            safety_margin,
        }
    }
}

#[async_trait]
impl Indexer for PriceIndexer {
    fn identity(&self) -> &str {
        &self.id
    }

    fn cursor(&self) -> &CursorCell {
        &self.cursor
    }

    async fn run_cycle(&self, stop: &StopSignal) -> Result<u32, Error> {
        let margin = chrono::Duration::from_std(self.safety_margin)
            .unwrap_or_else(|_| chrono::Duration::zero());
        let bound = floor_hour(Utc::now() - margin);
        let mut cursor = self.cursor.get();

        if cursor >= bound {
            return Ok(0);
        }

        let width = self.optimizer.batch_width(hours_between(cursor, bound));
        let mut processed: u32 = 0;
        let mut fetched = false;

        for _ in 0..width {
            if stop.is_stopped() || cursor >= bound {
                break;
            }

            let hour = next_hour(cursor);
            let mut point =
                self.store.price_point(&self.reference, hour).await?;

            // One ranged backfill per cycle covers the whole batch.
            if point.is_none() && !fetched {
                fetched = true;
                let points = self
                    .source
                    .fetch_range(&self.reference, hour, bound)
                    .await?;
                self.store.put_price_points(&points).await?;
                point = self.store.price_point(&self.reference, hour).await?;
            }

            if point.is_none() {
                // Upstream has not published this hour yet.
                break;
            }

            self.store.put_cursor(&self.id, hour).await?;
            self.cursor.publish(hour);

            cursor = hour;
            processed += 1;
        }

        Ok(processed)
    }
}
