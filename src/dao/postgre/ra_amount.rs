use chrono::{DateTime, Utc};
use sqlx::{error::Error, types::BigDecimal};

use crate::model::{RA_Amount, Table};

impl Table<RA_Amount> {
    pub async fn upsert(&self, data: RA_Amount) -> Result<(), Error> {
        sqlx::query(
            r#"
            INSERT INTO "RA_Amount" ("RA_identity", "RA_hour", "RA_quantity")
            VALUES($1, $2, $3)
            ON CONFLICT ("RA_identity", "RA_hour")
            DO UPDATE SET "RA_quantity" = EXCLUDED."RA_quantity"
            "#,
        )
        .bind(&data.RA_identity)
        .bind(data.RA_hour)
        .bind(&data.RA_quantity)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_quantity(
        &self,
        identity: &str,
        hour: DateTime<Utc>,
    ) -> Result<Option<(BigDecimal,)>, Error> {
        sqlx::query_as(
            r#"
            SELECT "RA_quantity"
            FROM "RA_Amount"
            WHERE "RA_identity" = $1 AND "RA_hour" = $2
            "#,
        )
        .bind(identity)
        .bind(hour)
        .fetch_optional(&self.pool)
        .await
    }
}
