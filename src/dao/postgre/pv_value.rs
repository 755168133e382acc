use sqlx::error::Error;

use crate::model::{PV_Value, Table};

impl Table<PV_Value> {
    pub async fn upsert(&self, data: PV_Value) -> Result<(), Error> {
        sqlx::query(
            r#"
            INSERT INTO "PV_Value" ("PV_project", "PV_identity", "PV_hour", "PV_value")
            VALUES($1, $2, $3, $4)
            ON CONFLICT ("PV_identity", "PV_hour")
            DO UPDATE SET "PV_value" = EXCLUDED."PV_value", "PV_project" = EXCLUDED."PV_project"
            "#,
        )
        .bind(&data.PV_project)
        .bind(&data.PV_identity)
        .bind(data.PV_hour)
        .bind(&data.PV_value)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
