use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Error;

/// Closed set of measurable position kinds. Dispatch happens once,
/// inside the amount service; the indexer state machines stay
/// kind-agnostic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PositionKind {
    NativeBalance {
        holder: String,
    },
    TokenBalance {
        token: String,
        holder: String,
    },
    /// Issued supply minus everything still held in escrow.
    PremintedSupply {
        token: String,
        escrows: Vec<String>,
    },
}

impl PositionKind {
    pub fn tag(&self) -> &'static str {
        match self {
            PositionKind::NativeBalance { .. } => "native",
            PositionKind::TokenBalance { .. } => "token",
            PositionKind::PremintedSupply { .. } => "preminted",
        }
    }

    pub fn primary_address(&self) -> &str {
        match self {
            PositionKind::NativeBalance { holder } => holder,
            PositionKind::TokenBalance { token: _, holder } => holder,
            PositionKind::PremintedSupply { token, .. } => token,
        }
    }

    /// Parses the kind spec of a POSITIONS tuple:
    /// `native:<holder>`, `token:<token>:<holder>`,
    /// `preminted:<token>:<escrow|escrow|..>` (escrow list optional).
    pub fn from_spec(spec: &str) -> Result<PositionKind, Error> {
        let mut parts = spec.split(':');
        let tag = parts.next().unwrap_or_default();

        match tag {
            "native" => {
                let holder = require(parts.next(), spec)?;
                Ok(PositionKind::NativeBalance { holder })
            },
            "token" => {
                let token = require(parts.next(), spec)?;
                let holder = require(parts.next(), spec)?;
                Ok(PositionKind::TokenBalance { token, holder })
            },
            "preminted" => {
                let token = require(parts.next(), spec)?;
                let escrows = parts
                    .next()
                    .map(|list| {
                        list.split('|')
                            .filter(|e| !e.is_empty())
                            .map(|e| e.to_owned())
                            .collect()
                    })
                    .unwrap_or_default();
                Ok(PositionKind::PremintedSupply { token, escrows })
            },
            other => Err(Error::ConfigurationError(format!(
                "Unknown position kind: {}",
                other
            ))),
        }
    }
}

fn require(part: Option<&str>, spec: &str) -> Result<String, Error> {
    match part {
        Some(value) if !value.is_empty() => Ok(value.to_owned()),
        _ => Err(Error::ConfigurationError(format!(
            "Incomplete position kind spec: {}",
            spec
        ))),
    }
}

/// One configured, trackable quantity of value belonging to a project
/// on a specific chain. Immutable once loaded for a run.
#[derive(Debug, Clone)]
pub struct AssetPosition {
    pub project: String,
    pub chain: String,
    pub kind: PositionKind,
    pub decimals: i64,
    /// Price reference id this position is priced against.
    pub reference: String,
    /// First hour boundary this position is measured at (inclusive).
    pub start_hour: DateTime<Utc>,
    /// Hour boundary past which the position stops advancing.
    pub end_hour: Option<DateTime<Utc>>,
}

impl AssetPosition {
    pub fn data_identity(&self) -> String {
        format!(
            "{}:{}:{}",
            self.chain,
            self.kind.tag(),
            self.kind.primary_address()
        )
    }

    pub fn value_identity(&self) -> String {
        format!("value:{}", self.data_identity())
    }
}

pub fn block_time_identity(chain: &str) -> String {
    format!("bt:{}", chain)
}

pub fn price_identity(reference: &str) -> String {
    format!("price:{}", reference)
}

/// One configured provider endpoint with its call budget.
#[derive(Debug, Clone)]
pub struct ChainEndpoint {
    pub name: String,
    pub url: String,
    pub calls_per_minute: u32,
    pub max_batch_size: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RpcRequest {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: String,
    pub params: Value,
}

impl RpcRequest {
    pub fn new(id: u64, method: &str, params: Value) -> RpcRequest {
        RpcRequest {
            jsonrpc: "2.0",
            id,
            method: method.to_owned(),
            params,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcResponse {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<RpcErrorBody>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcErrorBody {
    pub code: i64,
    pub message: String,
}

/// Ranged market-data body of the price reference API:
/// `{"prices": [[unix_millis, price], ..]}`.
#[derive(Debug, Deserialize)]
pub struct MarketDataRange {
    pub prices: Vec<(i64, f64)>,
}
