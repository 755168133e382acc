use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{types::BigDecimal, FromRow};

/// Progress cursor row: the highest hour boundary the indexer has
/// fully and durably processed.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct IDX_State {
    pub IDX_id: String,
    pub IDX_cursor: DateTime<Utc>,
}

/// Per-chain mapping from an hour boundary to the nearest block at or
/// before it.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct BT_Mapping {
    pub BT_chain: String,
    pub BT_hour: DateTime<Utc>,
    pub BT_height: i64,
}

/// Raw measured quantity of an asset position, in base units.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct RA_Amount {
    pub RA_identity: String,
    pub RA_hour: DateTime<Utc>,
    pub RA_quantity: BigDecimal,
}

/// Conversion factor of a price reference at an hour boundary.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct MP_Price {
    pub MP_reference: String,
    pub MP_hour: DateTime<Utc>,
    pub MP_factor: BigDecimal,
}

/// Priced value of one data source at an hour boundary, attributed to
/// a project.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct PV_Value {
    pub PV_project: String,
    pub PV_identity: String,
    pub PV_hour: DateTime<Utc>,
    pub PV_value: BigDecimal,
}
