pub mod config;
pub mod observability;
pub mod trade_api;
pub mod types;
