use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::BigDecimal;

use crate::{
    configuration::Config,
    dao::{PoolOption, PoolType, RecordStore},
    error::Error,
    model::{BT_Mapping, IDX_State, MP_Price, PV_Value, RA_Amount, Table},
};

#[derive(Debug, Clone)]
pub struct DatabasePool {
    pub idx_state: Table<IDX_State>,
    pub bt_mapping: Table<BT_Mapping>,
    pub ra_amount: Table<RA_Amount>,
    pub mp_price: Table<MP_Price>,
    pub pv_value: Table<PV_Value>,
    pub pool: PoolType,
}

impl DatabasePool {
    pub async fn new(config: &Config) -> Result<DatabasePool, Error> {
        let pool = PoolOption::new()
            .max_connections(20)
            .connect(config.database_url.as_str())
            .await?;

        Ok(DatabasePool {
            idx_state: Table::new(pool.clone()),
            bt_mapping: Table::new(pool.clone()),
            ra_amount: Table::new(pool.clone()),
            mp_price: Table::new(pool.clone()),
            pv_value: Table::new(pool.clone()),
            pool,
        })
    }
}

#[async_trait]
impl RecordStore for DatabasePool {
    async fn get_cursor(
        &self,
        identity: &str,
    ) -> Result<Option<DateTime<Utc>>, Error> {
        let row = self.idx_state.get_cursor(identity).await?;
        Ok(row.map(|(cursor,)| cursor))
    }

    async fn put_cursor(
        &self,
        identity: &str,
        cursor: DateTime<Utc>,
    ) -> Result<(), Error> {
        self.idx_state.upsert_cursor(identity, cursor).await?;
        Ok(())
    }

    async fn put_block_time(&self, mapping: BT_Mapping) -> Result<(), Error> {
        self.bt_mapping.upsert(mapping).await?;
        Ok(())
    }

    async fn block_height_at(
        &self,
        chain: &str,
        hour: DateTime<Utc>,
    ) -> Result<Option<i64>, Error> {
        let row = self.bt_mapping.get_height(chain, hour).await?;
        Ok(row.map(|(height,)| height))
    }

    async fn put_raw_amount(&self, record: RA_Amount) -> Result<(), Error> {
        self.ra_amount.upsert(record).await?;
        Ok(())
    }

    async fn raw_amount(
        &self,
        identity: &str,
        hour: DateTime<Utc>,
    ) -> Result<Option<BigDecimal>, Error> {
        let row = self.ra_amount.get_quantity(identity, hour).await?;
        Ok(row.map(|(quantity,)| quantity))
    }

    async fn put_price_points(
        &self,
        points: &[MP_Price],
    ) -> Result<(), Error> {
        self.mp_price.insert_many(points).await?;
        Ok(())
    }

    async fn price_point(
        &self,
        reference: &str,
        hour: DateTime<Utc>,
    ) -> Result<Option<BigDecimal>, Error> {
        let row = self.mp_price.get_factor(reference, hour).await?;
        Ok(row.map(|(factor,)| factor))
    }

    async fn put_priced_value(&self, record: PV_Value) -> Result<(), Error> {
        self.pv_value.upsert(record).await?;
        Ok(())
    }
}
