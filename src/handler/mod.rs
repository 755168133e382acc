use async_trait::async_trait;

use crate::error::Error;

mod amount;
mod block_time;
mod cursor;
mod data_indexer;
mod orchestrator;
mod price_indexer;
mod sync_optimizer;
mod value_indexer;

pub use amount::{AmountService, AmountSource};
pub use block_time::{BlockTimeIndexer, BlockTimeSettings};
pub use cursor::{CursorCell, StopHandle, StopSignal};
pub use data_indexer::DataIndexer;
pub use orchestrator::{
    build_graph, validate_graph, Orchestrator, OrchestratorSettings,
};
pub use price_indexer::PriceIndexer;
pub use sync_optimizer::{OptimizerSettings, SyncOptimizer};
pub use value_indexer::ValueIndexer;

/// One repeating processing loop in the graph. A cycle processes at
/// most one optimizer-sized batch of hour boundaries and returns how
/// many it durably completed.
#[async_trait]
pub trait Indexer: Send + Sync {
    fn identity(&self) -> &str;

    fn cursor(&self) -> &CursorCell;

    async fn run_cycle(&self, stop: &StopSignal) -> Result<u32, Error>;
}
