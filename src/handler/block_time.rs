use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use moka::future::Cache;
use serde_json::json;

use super::{CursorCell, Indexer, StopSignal, SyncOptimizer};
use crate::{
    dao::RecordStore,
    error::Error,
    helpers::{floor_hour, hours_between, next_hour},
    model::BT_Mapping,
    provider::Rpc,
    types::block_time_identity,
};

#[derive(Debug, Clone)]
pub struct BlockTimeSettings {
    /// Kept behind the chain head to avoid indexing not-yet-finalized
    /// blocks.
    pub safety_margin: Duration,
    /// Bound on probe calls for one binary search.
    pub max_probes: u32,
}

/// Probe one block's timestamp. The binary search runs against this
/// seam so it can be exercised without a provider.
#[async_trait]
pub trait BlockProbe: Send + Sync {
    async fn block_timestamp(&self, height: i64) -> Result<i64, Error>;
}

/// Nearest block at or before `target_unix`, by binary search over
/// block timestamps. The budget bounds provider calls; an exhausted
/// budget is retryable since the probe cache warms across cycles.
pub async fn find_height_at_or_before(
    probe: &dyn BlockProbe,
    head: i64,
    target_unix: i64,
    max_probes: u32,
) -> Result<i64, Error> {
    let mut lo: i64 = 0;
    let mut hi = head;
    let mut best: i64 = 0;
    let mut probes: u32 = 0;

    while lo <= hi {
        if probes >= max_probes {
            return Err(Error::ProviderUnavailable(format!(
                "probe budget of {} exhausted searching for {}",
                max_probes, target_unix
            )));
        }

        let mid = lo + (hi - lo) / 2;
        let at = probe.block_timestamp(mid).await?;
        probes += 1;

        if at <= target_unix {
            best = mid;
            lo = mid + 1;
        } else {
            hi = mid - 1;
        }
    }

    Ok(best)
}

/// Root dependency of every indexer on its chain: a monotone mapping
/// from hour boundary to block height, advanced one hour at a time.
pub struct BlockTimeIndexer {
    id: String,
    chain: String,
    rpc: Arc<Rpc>,
    store: Arc<dyn RecordStore>,
    cursor: CursorCell,
    optimizer: Arc<SyncOptimizer>,
    settings: BlockTimeSettings,
    probe_cache: Cache<i64, i64>,
}

impl BlockTimeIndexer {
    pub fn new(
        chain: &str,
        rpc: Arc<Rpc>,
        store: Arc<dyn RecordStore>,
        cursor: CursorCell,
        optimizer: Arc<SyncOptimizer>,
        settings: BlockTimeSettings,
    ) -> BlockTimeIndexer {
        BlockTimeIndexer {
            id: block_time_identity(chain),
            chain: chain.to_owned(),
            rpc,
            store,
            cursor,
            optimizer,
            settings,
            probe_cache: Cache::new(8192),
        }
    }

    async fn head(&self) -> Result<i64, Error> {
        let result = self.rpc.call("eth_blockNumber", json!([])).await?;
        hex_quantity(&result)
    }

    async fn probe(&self, height: i64) -> Result<i64, Error> {
        self.probe_cache
            .try_get_with(height, async {
                let result = self
                    .rpc
                    .call(
                        "eth_getBlockByNumber",
                        json!([format!("{:#x}", height), false]),
                    )
                    .await?;
                hex_quantity(&result["timestamp"])
            })
            .await
            .map_err(|e: Arc<Error>| match e.as_ref() {
                Error::ProviderProtocolError(m) => {
                    Error::ProviderProtocolError(m.clone())
                },
                other => Error::ProviderUnavailable(other.to_string()),
            })
    }
}

#[async_trait]
impl BlockProbe for BlockTimeIndexer {
    async fn block_timestamp(&self, height: i64) -> Result<i64, Error> {
        self.probe(height).await
    }
}

#[async_trait]
impl Indexer for BlockTimeIndexer {
    fn identity(&self) -> &str {
        &self.id
    }

    fn cursor(&self) -> &CursorCell {
        &self.cursor
    }

    async fn run_cycle(&self, stop: &StopSignal) -> Result<u32, Error> {
        let margin = chrono::Duration::from_std(self.settings.safety_margin)
            .unwrap_or_else(|_| chrono::Duration::zero());
        let bound = floor_hour(Utc::now() - margin);
        let mut cursor = self.cursor.get();

        if cursor >= bound {
            return Ok(0);
        }

        let width = self
            .optimizer
            .batch_width(hours_between(cursor, bound));

        let head = self.head().await?;
        let head_at = self.probe(head).await?;
        let mut processed: u32 = 0;

        for _ in 0..width {
            if stop.is_stopped() || cursor >= bound {
                break;
            }

            let target = next_hour(cursor);
            if target.timestamp() > head_at {
                // Chain has not produced this hour yet.
                break;
            }

            let height = find_height_at_or_before(
                self,
                head,
                target.timestamp(),
                self.settings.max_probes,
            )
            .await?;

            self.store
                .put_block_time(BT_Mapping {
                    BT_chain: self.chain.clone(),
                    BT_hour: target,
                    BT_height: height,
                })
                .await?;
            self.store.put_cursor(&self.id, target).await?;
            self.cursor.publish(target);

            cursor = target;
            processed += 1;
        }

        Ok(processed)
    }
}

fn hex_quantity(value: &serde_json::Value) -> Result<i64, Error> {
    let raw = value.as_str().ok_or_else(|| {
        Error::ProviderProtocolError(format!(
            "expected hex quantity, got {:?}",
            value
        ))
    })?;

    i64::from_str_radix(raw.trim_start_matches("0x"), 16).map_err(|e| {
        Error::ProviderProtocolError(format!(
            "invalid hex quantity {}: {}",
            raw, e
        ))
    })
}
