use chrono::{DateTime, Utc};
use sqlx::{error::Error, types::BigDecimal, QueryBuilder};

use super::DataBase;
use crate::model::{MP_Price, Table};

impl Table<MP_Price> {
    pub async fn insert_many(&self, data: &[MP_Price]) -> Result<(), Error> {
        if data.is_empty() {
            return Ok(());
        }

        let mut query_builder: QueryBuilder<DataBase> = QueryBuilder::new(
            r#"
            INSERT INTO "MP_Price" (
                "MP_reference",
                "MP_hour",
                "MP_factor"
            )"#,
        );

        query_builder.push_values(data, |mut b, mp| {
            b.push_bind(&mp.MP_reference)
                .push_bind(mp.MP_hour)
                .push_bind(&mp.MP_factor);
        });
        query_builder.push(
            r#" ON CONFLICT ("MP_reference", "MP_hour")
            DO UPDATE SET "MP_factor" = EXCLUDED."MP_factor""#,
        );

        let query = query_builder.build();
        query.execute(&self.pool).await?;

        Ok(())
    }

    pub async fn get_factor(
        &self,
        reference: &str,
        hour: DateTime<Utc>,
    ) -> Result<Option<(BigDecimal,)>, Error> {
        sqlx::query_as(
            r#"
            SELECT "MP_factor"
            FROM "MP_Price"
            WHERE "MP_reference" = $1 AND "MP_hour" = $2
            "#,
        )
        .bind(reference)
        .bind(hour)
        .fetch_optional(&self.pool)
        .await
    }
}
