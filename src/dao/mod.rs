use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::BigDecimal;

use crate::{
    error::Error,
    model::{BT_Mapping, MP_Price, PV_Value, RA_Amount},
};

mod postgre;

pub use postgre::{get_path, DataBase, PoolOption, PoolType};

/// Keyed persistence contract the indexer graph runs against. Each
/// indexer exclusively writes its own identity's rows; parents' rows
/// are only ever read.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn get_cursor(
        &self,
        identity: &str,
    ) -> Result<Option<DateTime<Utc>>, Error>;

    async fn put_cursor(
        &self,
        identity: &str,
        cursor: DateTime<Utc>,
    ) -> Result<(), Error>;

    async fn put_block_time(&self, mapping: BT_Mapping) -> Result<(), Error>;

    async fn block_height_at(
        &self,
        chain: &str,
        hour: DateTime<Utc>,
    ) -> Result<Option<i64>, Error>;

    async fn put_raw_amount(&self, record: RA_Amount) -> Result<(), Error>;

    async fn raw_amount(
        &self,
        identity: &str,
        hour: DateTime<Utc>,
    ) -> Result<Option<BigDecimal>, Error>;

    async fn put_price_points(&self, points: &[MP_Price])
        -> Result<(), Error>;

    async fn price_point(
        &self,
        reference: &str,
        hour: DateTime<Utc>,
    ) -> Result<Option<BigDecimal>, Error>;

    async fn put_priced_value(&self, record: PV_Value) -> Result<(), Error>;
}
