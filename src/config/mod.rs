mod loader;
mod schema;

pub use loader::{load, validate, CliOverrides};
pub use schema::{Config, ExchangeConfig, SourceKind, UpstreamConfig};
