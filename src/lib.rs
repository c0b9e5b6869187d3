pub mod condition;
pub mod config;
pub mod error;
pub mod fetch;
pub mod mqtt;
pub mod normalize;
pub mod notify;
pub mod observation;
pub mod rolling;
pub mod scheduler;
pub mod sink;
pub mod units;
pub mod wind;
