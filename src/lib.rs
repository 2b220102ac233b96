pub mod aggregator;
pub mod apis;
pub mod cancel;
pub mod config;
pub mod constants;
pub mod dataset;
pub mod enrich;
pub mod error;
pub mod feed;
pub mod logging;
pub mod metrics;
pub mod pipeline;
pub mod quota;
pub mod types;
