use std::sync::Arc;

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};

use crate::{
    dao::RecordStore,
    error::Error,
    provider::{Multicall, StateRead},
    types::{AssetPosition, PositionKind},
};

/// Resolves the raw quantity of an asset position at an hour boundary.
#[async_trait]
pub trait AmountSource: Send + Sync {
    async fn resolve_amount(
        &self,
        position: &AssetPosition,
        hour: DateTime<Utc>,
    ) -> Result<BigDecimal, Error>;
}

/// Kind dispatch happens here, once; the indexer state machines stay
/// kind-agnostic. Each kind expands to a signed list of state reads
/// combined into one quantity.
pub struct AmountService {
    store: Arc<dyn RecordStore>,
    multicall: Arc<Multicall>,
}

impl AmountService {
    pub fn new(
        store: Arc<dyn RecordStore>,
        multicall: Arc<Multicall>,
    ) -> AmountService {
        AmountService { store, multicall }
    }
}

#[async_trait]
impl AmountSource for AmountService {
    async fn resolve_amount(
        &self,
        position: &AssetPosition,
        hour: DateTime<Utc>,
    ) -> Result<BigDecimal, Error> {
        let height = self
            .store
            .block_height_at(&position.chain, hour)
            .await?
            .ok_or(Error::NotYetAvailable)?;

        let formula = reads_for(&position.kind);
        let reads: Vec<StateRead> =
            formula.iter().map(|(read, _)| read.clone()).collect();

        let results = self.multicall.read_at_block(height, &reads).await?;

        let mut total = BigDecimal::from(0);
        for ((_, sign), result) in formula.iter().zip(results) {
            let quantity = result?;
            if *sign < 0 {
                total -= quantity;
            } else {
                total += quantity;
            }
        }

        Ok(total)
    }
}

/// The pluggable position formula: reads and the sign each one
/// contributes with. Preminted supply is issued supply minus whatever
/// still sits in escrow.
fn reads_for(kind: &PositionKind) -> Vec<(StateRead, i8)> {
    match kind {
        PositionKind::NativeBalance { holder } => vec![(
            StateRead::NativeBalance {
                holder: holder.clone(),
            },
            1,
        )],
        PositionKind::TokenBalance { token, holder } => {
            vec![(StateRead::token_balance(token, holder), 1)]
        },
        PositionKind::PremintedSupply { token, escrows } => {
            let mut reads = vec![(StateRead::total_supply(token), 1)];
            for escrow in escrows {
                reads.push((StateRead::token_balance(token, escrow), -1));
            }
            reads
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::testing::{hour, MemoryStore};
    use crate::model::BT_Mapping;
    use crate::provider::{Rpc, RpcSettings};
    use crate::types::ChainEndpoint;
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn position(kind: PositionKind) -> AssetPosition {
        AssetPosition {
            project: "rollup-one".to_owned(),
            chain: "mainnet".to_owned(),
            kind,
            decimals: 18,
            reference: "ethereum".to_owned(),
            start_hour: hour(0),
            end_hour: None,
        }
    }

    #[test]
    fn test_preminted_formula_shape() {
        let reads = reads_for(&PositionKind::PremintedSupply {
            token: "0xt".to_owned(),
            escrows: vec!["0xe1".to_owned(), "0xe2".to_owned()],
        });
        assert_eq!(reads.len(), 3);
        assert_eq!(reads[0].1, 1);
        assert_eq!(reads[1].1, -1);
        assert_eq!(reads[2].1, -1);
    }

    #[tokio::test]
    async fn test_missing_block_mapping_is_not_yet_available() {
        let store = Arc::new(MemoryStore::default());
        let server = MockServer::start().await;
        let rpc = Rpc::new(
            ChainEndpoint {
                name: "mainnet".to_owned(),
                url: server.uri(),
                calls_per_minute: 600,
                max_batch_size: 10,
            },
            RpcSettings {
                timeout: Duration::from_secs(5),
                retry_attempts: 2,
                backoff: Duration::from_millis(1),
            },
        )
        .unwrap();
        let service =
            AmountService::new(store, Arc::new(Multicall::new(Arc::new(rpc), 10)));

        let result = service
            .resolve_amount(
                &position(PositionKind::NativeBalance {
                    holder: "0xaa".to_owned(),
                }),
                hour(100),
            )
            .await;

        assert!(matches!(result, Err(Error::NotYetAvailable)));
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_preminted_supply_combines_signed_reads() {
        let store = Arc::new(MemoryStore::default());
        store
            .put_block_time(BT_Mapping {
                BT_chain: "mainnet".to_owned(),
                BT_hour: hour(100),
                BT_height: 0x10,
            })
            .await
            .unwrap();

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"jsonrpc": "2.0", "id": 0, "result": "0x7d0"},
                {"jsonrpc": "2.0", "id": 1, "result": "0x3e8"}
            ])))
            .mount(&server)
            .await;

        let rpc = Rpc::new(
            ChainEndpoint {
                name: "mainnet".to_owned(),
                url: server.uri(),
                calls_per_minute: 600,
                max_batch_size: 10,
            },
            RpcSettings {
                timeout: Duration::from_secs(5),
                retry_attempts: 2,
                backoff: Duration::from_millis(1),
            },
        )
        .unwrap();
        let service = AmountService::new(
            store,
            Arc::new(Multicall::new(Arc::new(rpc), 10)),
        );

        let quantity = service
            .resolve_amount(
                &position(PositionKind::PremintedSupply {
                    token: "0xt".to_owned(),
                    escrows: vec!["0xe1".to_owned()],
                }),
                hour(100),
            )
            .await
            .unwrap();

        // 2000 issued minus 1000 escrowed.
        assert_eq!(quantity, BigDecimal::from(1000));
    }
}
