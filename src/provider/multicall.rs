use std::collections::HashMap;
use std::sync::Arc;

use bigdecimal::{num_bigint::BigInt, BigDecimal};
use serde_json::json;

use super::Rpc;
use crate::{
    error::Error,
    types::{RpcRequest, RpcResponse},
};

const BALANCE_OF_SELECTOR: &str = "0x70a08231";
const TOTAL_SUPPLY_SELECTOR: &str = "0x18160ddd";

/// One independent contract-state read scoped to a chain and block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateRead {
    NativeBalance { holder: String },
    ContractCall { to: String, data: String },
}

impl StateRead {
    pub fn token_balance(token: &str, holder: &str) -> StateRead {
        StateRead::ContractCall {
            to: token.to_owned(),
            data: balance_of_data(holder),
        }
    }

    pub fn total_supply(token: &str) -> StateRead {
        StateRead::ContractCall {
            to: token.to_owned(),
            data: TOTAL_SUPPLY_SELECTOR.to_owned(),
        }
    }

    fn to_request(&self, id: u64, block_tag: &str) -> RpcRequest {
        match self {
            StateRead::NativeBalance { holder } => RpcRequest::new(
                id,
                "eth_getBalance",
                json!([holder, block_tag]),
            ),
            StateRead::ContractCall { to, data } => RpcRequest::new(
                id,
                "eth_call",
                json!([{"to": to, "data": data}, block_tag]),
            ),
        }
    }
}

/// Groups independent reads for one chain and block into as few
/// underlying batch calls as the configured batch size allows. One
/// failing sub-call never fails the whole batch.
#[derive(Debug)]
pub struct Multicall {
    rpc: Arc<Rpc>,
    max_batch_size: usize,
}

impl Multicall {
    pub fn new(rpc: Arc<Rpc>, max_batch_size: usize) -> Multicall {
        Multicall {
            rpc,
            max_batch_size: max_batch_size.max(1),
        }
    }

    pub async fn read_at_block(
        &self,
        height: i64,
        reads: &[StateRead],
    ) -> Result<Vec<Result<BigDecimal, Error>>, Error> {
        let block_tag = format!("{:#x}", height);
        let mut out = Vec::with_capacity(reads.len());

        for chunk in reads.chunks(self.max_batch_size) {
            let requests: Vec<RpcRequest> = chunk
                .iter()
                .enumerate()
                .map(|(i, read)| read.to_request(i as u64, &block_tag))
                .collect();

            let responses = self.rpc.call_batch(&requests).await?;
            let mut by_id: HashMap<u64, RpcResponse> = responses
                .into_iter()
                .filter_map(|r| r.id.map(|id| (id, r)))
                .collect();

            for i in 0..chunk.len() {
                out.push(unpack_read(by_id.remove(&(i as u64))));
            }
        }

        Ok(out)
    }
}

fn unpack_read(response: Option<RpcResponse>) -> Result<BigDecimal, Error> {
    let response = response.ok_or_else(|| {
        Error::ProviderProtocolError(
            "batch response missing request id".to_owned(),
        )
    })?;

    if let Some(error) = response.error {
        return Err(Error::ProviderProtocolError(format!(
            "rpc error {}: {}",
            error.code, error.message
        )));
    }

    match response.result {
        Some(serde_json::Value::String(raw)) => hex_to_decimal(&raw),
        other => Err(Error::ProviderProtocolError(format!(
            "unexpected read result: {:?}",
            other
        ))),
    }
}

pub fn balance_of_data(holder: &str) -> String {
    let address = holder.trim_start_matches("0x").to_lowercase();
    format!("{}{:0>64}", BALANCE_OF_SELECTOR, address)
}

pub fn hex_to_decimal(raw: &str) -> Result<BigDecimal, Error> {
    let digits = raw.trim_start_matches("0x");
    let digits = if digits.is_empty() { "0" } else { digits };

    BigInt::parse_bytes(digits.as_bytes(), 16)
        .map(BigDecimal::from)
        .ok_or_else(|| {
            Error::ProviderProtocolError(format!(
                "invalid hex quantity: {}",
                raw
            ))
        })
}
