use chrono::{DateTime, Utc};
use sqlx::error::Error;

use crate::model::{BT_Mapping, Table};

impl Table<BT_Mapping> {
    pub async fn upsert(&self, data: BT_Mapping) -> Result<(), Error> {
        sqlx::query(
            r#"
            INSERT INTO "BT_Mapping" ("BT_chain", "BT_hour", "BT_height")
            VALUES($1, $2, $3)
            ON CONFLICT ("BT_chain", "BT_hour")
            DO UPDATE SET "BT_height" = EXCLUDED."BT_height"
            "#,
        )
        .bind(&data.BT_chain)
        .bind(data.BT_hour)
        .bind(data.BT_height)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_height(
        &self,
        chain: &str,
        hour: DateTime<Utc>,
    ) -> Result<Option<(i64,)>, Error> {
        sqlx::query_as(
            r#"
            SELECT "BT_height"
            FROM "BT_Mapping"
            WHERE "BT_chain" = $1 AND "BT_hour" = $2
            "#,
        )
        .bind(chain)
        .bind(hour)
        .fetch_optional(&self.pool)
        .await
    }
}
