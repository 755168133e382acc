//! Database models module
//!
//! All persisted row structs plus the phantom-typed `Table` handle.

mod models;
mod table;

pub use models::{BT_Mapping, IDX_State, MP_Price, PV_Value, RA_Amount};
pub use table::Table;
