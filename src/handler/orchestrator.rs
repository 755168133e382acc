use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant};
use tracing::{error, info};

use super::{
    AmountService, BlockTimeIndexer, BlockTimeSettings, CursorCell,
    DataIndexer, Indexer, PriceIndexer, StopHandle, SyncOptimizer,
    ValueIndexer,
};
use crate::{
    configuration::Config,
    dao::RecordStore,
    error::Error,
    helpers::floor_hour,
    provider::{Multicall, PriceSource, Rpc},
    types::{block_time_identity, price_identity},
};

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub cycle_interval: Duration,
}

/// Starts and stops the full indexer graph. Dependency order is a
/// monotone constraint re-checked by every loop each cycle, so the
/// orchestrator only guarantees parents exist before children start,
/// not that they are caught up.
pub struct Orchestrator {
    nodes: Vec<Arc<dyn Indexer>>,
    stop: StopHandle,
    optimizer: Arc<SyncOptimizer>,
    settings: OrchestratorSettings,
}

impl Orchestrator {
    pub fn new(
        nodes: Vec<Arc<dyn Indexer>>,
        edges: Vec<(String, String)>,
        optimizer: Arc<SyncOptimizer>,
        settings: OrchestratorSettings,
    ) -> Result<Orchestrator, Error> {
        let ids: Vec<String> =
            nodes.iter().map(|n| n.identity().to_owned()).collect();
        validate_graph(&ids, &edges)?;

        Ok(Orchestrator {
            nodes,
            stop: StopHandle::new(),
            optimizer,
            settings,
        })
    }

    pub fn stop(&self) {
        self.stop.stop();
    }

    /// Runs every indexer loop to completion of a cooperative stop.
    /// Per-indexer failures are isolated: a failing cycle is logged
    /// and retried on the next tick, siblings keep running.
    pub async fn run(&self) -> Result<(), Error> {
        let mut joins: Vec<JoinHandle<()>> = Vec::new();

        for node in &self.nodes {
            let node = node.clone();
            let stop = self.stop.subscribe();
            let mut waiter = self.stop.subscribe();
            let optimizer = self.optimizer.clone();
            let cycle_interval = self.settings.cycle_interval;

            joins.push(tokio::spawn(async move {
                let mut ticker = interval(cycle_interval);
                info!(indexer = node.identity(), "indexer loop started");

                loop {
                    tokio::select! {
                        _ = ticker.tick() => {},
                        _ = waiter.wait() => break,
                    }

                    if stop.is_stopped() {
                        break;
                    }

                    let started = Instant::now();
                    match node.run_cycle(&stop).await {
                        Ok(0) => {},
                        Ok(processed) => {
                            optimizer.observe(started.elapsed(), processed);
                            info!(
                                indexer = node.identity(),
                                processed,
                                cursor = %node.cursor().get(),
                                "cycle complete"
                            );
                        },
                        Err(e) if e.is_not_yet_available() => {},
                        Err(e) => {
                            error!(
                                indexer = node.identity(),
                                "cycle failed: {}",
                                e
                            );
                        },
                    }
                }

                info!(indexer = node.identity(), "indexer loop stopped");
            }));
        }

        for joined in join_all(joins).await {
            joined?;
        }

        Ok(())
    }
}

/// Startup validation: identities unique, every edge endpoint known,
/// no cycles. A bad graph never starts.
pub fn validate_graph(
    ids: &[String],
    edges: &[(String, String)],
) -> Result<(), Error> {
    let mut known: HashSet<&str> = HashSet::new();
    for id in ids {
        if !known.insert(id) {
            return Err(Error::ConfigurationError(format!(
                "Duplicate indexer identity: {}",
                id
            )));
        }
    }

    for (child, parent) in edges {
        for end in [child, parent] {
            if !known.contains(end.as_str()) {
                return Err(Error::ConfigurationError(format!(
                    "Dependency edge references unknown indexer: {}",
                    end
                )));
            }
        }
    }

    // Kahn's algorithm over child -> parent edges.
    let mut incoming: HashMap<&str, usize> =
        ids.iter().map(|id| (id.as_str(), 0)).collect();
    let mut children: HashMap<&str, Vec<&str>> = HashMap::new();

    for (child, parent) in edges {
        *incoming.get_mut(child.as_str()).unwrap() += 1;
        children
            .entry(parent.as_str())
            .or_default()
            .push(child.as_str());
    }

    let mut queue: VecDeque<&str> = incoming
        .iter()
        .filter(|(_, count)| **count == 0)
        .map(|(id, _)| *id)
        .collect();
    let mut visited = 0usize;

    while let Some(id) = queue.pop_front() {
        visited += 1;
        if let Some(kids) = children.get(id) {
            for kid in kids {
                let count = incoming.get_mut(kid).unwrap();
                *count -= 1;
                if *count == 0 {
                    queue.push_back(kid);
                }
            }
        }
    }

    if visited != ids.len() {
        return Err(Error::ConfigurationError(
            "Dependency graph contains a cycle".to_owned(),
        ));
    }

    Ok(())
}

/// Builds the whole graph from static configuration: one block-time
/// indexer per chain in use, one price indexer per distinct reference,
/// and a data/value indexer pair per asset position. Cursors are
/// restored from the store; a missing cursor starts at the configured
/// minimum.
pub async fn build_graph(
    config: &Config,
    store: Arc<dyn RecordStore>,
    clients: &HashMap<String, Arc<Rpc>>,
    multicalls: &HashMap<String, Arc<Multicall>>,
    price_source: Arc<dyn PriceSource>,
    optimizer: Arc<SyncOptimizer>,
) -> Result<Orchestrator, Error> {
    let safety_margin = Duration::from_secs(config.safety_margin_secs);
    let hour_before =
        |at: chrono::DateTime<chrono::Utc>| floor_hour(at) - chrono::Duration::hours(1);

    let mut nodes: Vec<Arc<dyn Indexer>> = Vec::new();
    let mut edges: Vec<(String, String)> = Vec::new();

    // Earliest start per chain and per price reference.
    let mut chain_min: HashMap<&str, chrono::DateTime<chrono::Utc>> =
        HashMap::new();
    let mut reference_min: HashMap<&str, chrono::DateTime<chrono::Utc>> =
        HashMap::new();

    for position in &config.positions {
        let min = hour_before(position.start_hour);
        chain_min
            .entry(position.chain.as_str())
            .and_modify(|current| *current = (*current).min(min))
            .or_insert(min);
        reference_min
            .entry(position.reference.as_str())
            .and_modify(|current| *current = (*current).min(min))
            .or_insert(min);
    }

    let mut bt_cells: HashMap<String, CursorCell> = HashMap::new();
    for (chain, min) in &chain_min {
        let rpc = clients.get(*chain).ok_or_else(|| {
            Error::ConfigurationError(format!(
                "No endpoint configured for chain: {}",
                chain
            ))
        })?;

        let id = block_time_identity(chain);
        let initial = store.get_cursor(&id).await?.unwrap_or(*min);
        let cell = CursorCell::new(initial);
        bt_cells.insert((*chain).to_owned(), cell.clone());

        nodes.push(Arc::new(BlockTimeIndexer::new(
            chain,
            rpc.clone(),
            store.clone(),
            cell,
            optimizer.clone(),
            BlockTimeSettings {
                safety_margin,
                max_probes: config.max_probes,
            },
        )));
    }

    let mut price_cells: HashMap<String, CursorCell> = HashMap::new();
    for (reference, min) in &reference_min {
        let id = price_identity(reference);
        let initial = store.get_cursor(&id).await?.unwrap_or(*min);
        let cell = CursorCell::new(initial);
        price_cells.insert((*reference).to_owned(), cell.clone());

        nodes.push(Arc::new(PriceIndexer::new(
            reference,
            price_source.clone(),
            store.clone(),
            cell,
            optimizer.clone(),
            safety_margin,
        )));
    }

    for position in &config.positions {
        let multicall = multicalls.get(&position.chain).ok_or_else(|| {
            Error::ConfigurationError(format!(
                "No endpoint configured for chain: {}",
                position.chain
            ))
        })?;

        // Parents exist by construction; the edges are still validated
        // with the rest of the graph below.
        let bt_cell = bt_cells[&position.chain].clone();
        let price_cell = price_cells[&position.reference].clone();

        let amounts = Arc::new(AmountService::new(
            store.clone(),
            multicall.clone(),
        ));

        let data_id = position.data_identity();
        let data_min = hour_before(position.start_hour);
        let data_initial =
            store.get_cursor(&data_id).await?.unwrap_or(data_min);
        let data_cell = CursorCell::new(data_initial);

        nodes.push(Arc::new(DataIndexer::new(
            position.clone(),
            bt_cell,
            data_cell.clone(),
            store.clone(),
            amounts,
            optimizer.clone(),
        )));
        edges.push((data_id.clone(), block_time_identity(&position.chain)));

        let value_id = position.value_identity();
        let value_initial =
            store.get_cursor(&value_id).await?.unwrap_or(data_min);
        let value_cell = CursorCell::new(value_initial);

        nodes.push(Arc::new(ValueIndexer::new(
            position.clone(),
            data_cell,
            price_cell,
            value_cell,
            store.clone(),
            optimizer.clone(),
        )));
        edges.push((value_id.clone(), data_id));
        edges.push((value_id, price_identity(&position.reference)));
    }

    Orchestrator::new(
        nodes,
        edges,
        optimizer,
        OrchestratorSettings {
            cycle_interval: Duration::from_secs(config.cycle_interval_secs),
        },
    )
}
