mod database;
mod http;
mod multicall;
mod rpc;

pub use database::DatabasePool;
pub use http::{Http, PriceSource};
pub use multicall::{Multicall, StateRead};
pub use rpc::{Rpc, RpcSettings};
