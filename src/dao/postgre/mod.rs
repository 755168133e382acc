pub use self::{
    path::get_path,
    types::{DataBase, PoolOption, PoolType},
};
mod bt_mapping;
mod idx_state;
mod mp_price;
mod path;
mod pv_value;
mod ra_amount;
mod types;
