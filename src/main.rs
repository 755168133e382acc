use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, Level};

use tvl_etl::{
    configuration::{
        get_configuration, set_configuration, AppState, Config, State,
    },
    dao::RecordStore,
    error::Error,
    handler::{
        build_graph, OptimizerSettings, Orchestrator, SyncOptimizer,
    },
    provider::{DatabasePool, PriceSource},
};

#[tokio::main]
async fn main() -> Result<(), Error> {
    let result = app_main().await;

    if let Err(err) = &result {
        error!("{}", err);
    }

    result
}

async fn app_main() -> Result<(), Error> {
    let subscriber = tracing_subscriber::fmt()
        .compact()
        .with_level(true)
        .with_max_level(Level::INFO)
        .with_file(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    let (config, database) = match init().await {
        Ok((config, database)) => (config, database),
        Err(e) => return Err(Error::ConfigurationError(e.to_string())),
    };

    let state = State::new(config, database).await?;
    let app_state = AppState::new(state);

    if !app_state.config.enable_sync {
        info!("sync disabled, exiting");
        return Ok(());
    }

    let store: Arc<dyn RecordStore> =
        Arc::new(app_state.database.clone());
    let price_source: Arc<dyn PriceSource> = app_state.http.clone();
    let optimizer = Arc::new(SyncOptimizer::new(OptimizerSettings {
        min_batch: app_state.config.min_batch,
        max_batch: app_state.config.max_batch,
        near_tip_hours: app_state.config.near_tip_hours,
        target_cycle: Duration::from_secs(app_state.config.target_cycle_secs),
    }));

    let orchestrator = Arc::new(
        build_graph(
            &app_state.config,
            store,
            &app_state.clients,
            &app_state.multicalls,
            price_source,
            optimizer,
        )
        .await?,
    );

    spawn_shutdown_handler(orchestrator.clone());

    info!(
        positions = app_state.config.positions.len(),
        chains = app_state.config.chains.len(),
        "starting indexer graph"
    );

    orchestrator.run().await?;
    info!("indexer graph stopped");

    Ok(())
}

async fn init() -> Result<(Config, DatabasePool), Error> {
    set_configuration()?;
    let config = get_configuration()?;
    let database = DatabasePool::new(&config).await?;
    Ok((config, database))
}

fn spawn_shutdown_handler(orchestrator: Arc<Orchestrator>) {
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("unable to listen for shutdown signal: {}", e);
            return;
        }
        info!("shutdown signal received, stopping after in-flight cycles");
        orchestrator.stop();
    });
}
