use chrono::{DateTime, Utc};
use sqlx::error::Error;

use crate::model::{IDX_State, Table};

impl Table<IDX_State> {
    pub async fn get_cursor(
        &self,
        identity: &str,
    ) -> Result<Option<(DateTime<Utc>,)>, Error> {
        sqlx::query_as(
            r#"
            SELECT "IDX_cursor"
            FROM "IDX_State"
            WHERE "IDX_id" = $1
            "#,
        )
        .bind(identity)
        .fetch_optional(&self.pool)
        .await
    }

    pub async fn upsert_cursor(
        &self,
        identity: &str,
        cursor: DateTime<Utc>,
    ) -> Result<(), Error> {
        sqlx::query(
            r#"
            INSERT INTO "IDX_State" ("IDX_id", "IDX_cursor")
            VALUES($1, $2)
            ON CONFLICT ("IDX_id")
            DO UPDATE SET "IDX_cursor" = EXCLUDED."IDX_cursor"
            "#,
        )
        .bind(identity)
        .bind(cursor)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
