use std::{
    collections::{HashMap, HashSet},
    env, fs,
    ops::Deref,
    sync::Arc,
    time::Duration,
};

use anyhow::Context;
use chrono::DateTime;
use url::Url;

use crate::{
    dao::get_path,
    error::Error,
    helpers::{floor_hour, parse_tuple_string},
    provider::{DatabasePool, Http, Multicall, Rpc, RpcSettings},
    types::{AssetPosition, ChainEndpoint, PositionKind},
};

#[derive(Debug)]
pub struct AppState<T>(Arc<T>);

impl<T> AppState<T> {
    pub fn new(state: T) -> AppState<T> {
        AppState(Arc::new(state))
    }
}

impl<T> Clone for AppState<T> {
    fn clone(&self) -> AppState<T> {
        AppState(Arc::clone(&self.0))
    }
}

impl<T> Deref for AppState<T> {
    type Target = Arc<T>;

    fn deref(&self) -> &Arc<T> {
        &self.0
    }
}

#[derive(Debug)]
pub struct State {
    pub config: Config,
    pub database: DatabasePool,
    pub clients: HashMap<String, Arc<Rpc>>,
    pub multicalls: HashMap<String, Arc<Multicall>>,
    pub http: Arc<Http>,
}

impl State {
    pub async fn new(
        config: Config,
        database: DatabasePool,
    ) -> Result<State, Error> {
        Self::init_migrations(&database).await?;

        let http = Arc::new(
            Http::new(
                config.price_base_url.clone(),
                Duration::from_secs(config.timeout),
            )
            .context("unable to build price source client")?,
        );

        let settings = RpcSettings {
            timeout: Duration::from_secs(config.timeout),
            retry_attempts: config.retry_attempts,
            backoff: Duration::from_millis(config.backoff_ms),
        };

        let mut clients = HashMap::new();
        let mut multicalls = HashMap::new();

        for endpoint in &config.chains {
            let rpc = Arc::new(
                Rpc::new(endpoint.clone(), settings.clone())
                    .context("unable to build chain client")?,
            );
            clients.insert(endpoint.name.clone(), rpc.clone());
            multicalls.insert(
                endpoint.name.clone(),
                Arc::new(Multicall::new(rpc, endpoint.max_batch_size)),
            );
        }

        Ok(Self {
            config,
            database,
            clients,
            multicalls,
            http,
        })
    }

    async fn init_migrations(database: &DatabasePool) -> Result<(), Error> {
        let files = vec![
            "idx_state.sql",
            "bt_mapping.sql",
            "ra_amount.sql",
            "mp_price.sql",
            "pv_value.sql",
        ];

        let dir = env!("CARGO_MANIFEST_DIR");

        for file in files {
            let path = get_path(dir, file);
            let data = fs::read_to_string(path)?;
            sqlx::query(data.as_str()).execute(&database.pool).await?;
        }

        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub chains: Vec<ChainEndpoint>,
    pub positions: Vec<AssetPosition>,
    pub price_base_url: String,
    pub timeout: u64,
    pub retry_attempts: u32,
    pub backoff_ms: u64,
    pub safety_margin_secs: u64,
    pub max_probes: u32,
    pub min_batch: u32,
    pub max_batch: u32,
    pub near_tip_hours: i64,
    pub target_cycle_secs: u64,
    pub cycle_interval_secs: u64,
    pub enable_sync: bool,
}

pub fn get_configuration() -> Result<Config, Error> {
    let database_url = env::var("DATABASE_URL")?;
    let price_base_url = env::var("PRICE_BASE_URL")?;
    let timeout = env::var("TIMEOUT")?.parse()?;
    let retry_attempts = env::var("RETRY_ATTEMPTS")?.parse()?;
    let backoff_ms = env::var("BACKOFF_MS")?.parse()?;
    let safety_margin_secs = env::var("SAFETY_MARGIN_IN_SEC")?.parse()?;
    let max_probes = env::var("MAX_PROBES")?.parse()?;
    let min_batch = env::var("MIN_BATCH")?.parse()?;
    let max_batch = env::var("MAX_BATCH")?.parse()?;
    let near_tip_hours = env::var("NEAR_TIP_HOURS")?.parse()?;
    let target_cycle_secs = env::var("TARGET_CYCLE_IN_SEC")?.parse()?;
    let cycle_interval_secs = env::var("CYCLE_INTERVAL_IN_SEC")?.parse()?;
    let enable_sync = env::var("ENABLE_SYNC")?.parse()?;

    let chains = get_chains()?;
    let positions = get_positions()?;

    let known_chains: HashSet<&str> =
        chains.iter().map(|chain| chain.name.as_str()).collect();

    for position in &positions {
        if !known_chains.contains(position.chain.as_str()) {
            return Err(Error::ConfigurationError(format!(
                "Position {} references unknown chain: {}",
                position.data_identity(),
                position.chain
            )));
        }
    }

    Ok(Config {
        database_url,
        chains,
        positions,
        price_base_url,
        timeout,
        retry_attempts,
        backoff_ms,
        safety_margin_secs,
        max_probes,
        min_batch,
        max_batch,
        near_tip_hours,
        target_cycle_secs,
        cycle_interval_secs,
        enable_sync,
    })
}

pub fn set_configuration() -> Result<(), Error> {
    let config_file: &str = ".env";
    let etl_config_file: &str = "tvl.conf";

    let directory = env!("CARGO_MANIFEST_DIR");
    let path = format!("{}/{}", directory, config_file);
    let etl_config_path = format!("{}/{}", directory, etl_config_file);

    let config_string = fs::read_to_string(path)?;
    let etl_config_string = fs::read_to_string(etl_config_path)?;

    parse_config_string(config_string)?;
    parse_config_string(etl_config_string)?;

    Ok(())
}

fn parse_config_string(config: String) -> Result<(), Error> {
    let params: Vec<Option<(&str, &str)>> = config
        .split('\n')
        .map(|s| {
            let element = s.find('=');
            if let Some(e) = element {
                return Some(s.split_at(e));
            }
            None
        })
        .map(|value| {
            if let Some((k, v)) = value {
                return Some((k, &v[1..]));
            }
            None
        })
        .collect();

    for (key, value) in params.into_iter().flatten() {
        env::set_var(key, value);
    }

    Ok(())
}

/// CHAINS="(name,url,calls_per_minute,max_batch_size),(...)"
fn get_chains() -> Result<Vec<ChainEndpoint>, Error> {
    let mut data: Vec<ChainEndpoint> = Vec::new();
    let chains = parse_tuple_string(env::var("CHAINS")?);

    for c in chains {
        let items: Vec<&str> = c.split(',').collect();
        if items.len() != 4 {
            return Err(Error::ConfigurationError(format!(
                "Invalid chain entry: {}",
                c
            )));
        }
        let url = Url::parse(items[1])?;
        data.push(ChainEndpoint {
            name: items[0].to_owned(),
            url: url.to_string(),
            calls_per_minute: items[2].parse()?,
            max_batch_size: items[3].parse()?,
        });
    }

    Ok(data)
}

/// POSITIONS="(project,chain,kind_spec,decimals,reference,start_unix,end_unix),(...)"
/// with `-` for an open end. Kind specs are parsed by
/// `PositionKind::from_spec`.
fn get_positions() -> Result<Vec<AssetPosition>, Error> {
    let mut data: Vec<AssetPosition> = Vec::new();
    let positions = parse_tuple_string(env::var("POSITIONS")?);

    for p in positions {
        let items: Vec<&str> = p.split(',').collect();
        if items.len() != 7 {
            return Err(Error::ConfigurationError(format!(
                "Invalid position entry: {}",
                p
            )));
        }

        let kind = PositionKind::from_spec(items[2])?;
        let start_hour = parse_hour(items[5])?;
        let end_hour = match items[6] {
            "-" => None,
            raw => Some(parse_hour(raw)?),
        };

        data.push(AssetPosition {
            project: items[0].to_owned(),
            chain: items[1].to_owned(),
            kind,
            decimals: items[3].parse()?,
            reference: items[4].to_owned(),
            start_hour,
            end_hour,
        });
    }

    Ok(data)
}

fn parse_hour(raw: &str) -> Result<chrono::DateTime<chrono::Utc>, Error> {
    let secs: i64 = raw.parse()?;
    let at = DateTime::from_timestamp(secs, 0).ok_or_else(|| {
        Error::ConfigurationError(format!("Invalid timestamp: {}", raw))
    })?;
    Ok(floor_hour(at))
}
