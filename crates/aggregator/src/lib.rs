mod aggregation;
mod breaker;
mod clock;
mod config;
mod coordinator;
mod derived;
mod engine;
mod extremes;
mod gateway;
mod models;
mod outage;
mod staleness;
mod store;
mod utils;
mod validator;

pub use aggregation::*;
pub use breaker::*;
pub use clock::*;
pub use config::*;
pub use coordinator::*;
pub use derived::*;
pub use engine::*;
pub use extremes::*;
pub use gateway::*;
pub use models::*;
pub use outage::*;
pub use staleness::*;
pub use store::*;
pub use utils::*;
pub use validator::*;
