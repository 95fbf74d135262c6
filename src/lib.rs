pub mod config;
pub mod error;
pub mod exchange;
pub mod identity;
pub mod logging;
pub mod metrics;
pub mod proxy;
pub mod transport;
pub mod web;
