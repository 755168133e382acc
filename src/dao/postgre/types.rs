use sqlx::{postgres::PgPoolOptions, PgPool, Postgres};

pub type PoolType = PgPool;
pub type PoolOption = PgPoolOptions;
pub type DataBase = Postgres;
