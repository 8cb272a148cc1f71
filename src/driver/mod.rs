//! Driver layer: URL resolution, pooling, query execution, streaming and
//! reactive result delivery, and retry.

pub mod config;
pub mod connection;
pub mod cursor;
#[allow(clippy::module_inception)]
pub mod driver;
pub mod error;
pub mod operators;
pub mod pool;
pub mod reactive;
pub mod record;
pub mod retry;
pub mod summary;
pub mod url;

pub use config::{DriverConfig, DriverConfigBuilder, PoolConfig, TlsOptions};
pub use connection::BoltConnection;
pub use cursor::StreamingCursor;
pub use driver::{Driver, QueryResult};
pub use error::{DriverError, DriverResult};
pub use operators::Operator;
pub use pool::{ConnectionPool, PoolMetrics, PooledConnection};
pub use reactive::{
    BackpressureStrategy, FuncSubscriber, PipelineHandle, ReactiveConfig, ReactiveResult,
    RecordEvent, Subscriber,
};
pub use record::{Record, RecordKeys};
pub use retry::{retry, RetryContext, RetryPolicy};
pub use summary::{Counters, Notification, Position, QueryType, ResultSummary};
pub use url::{ConnectionConfig, SslConnectionParams, TlsMode};

/// User agent announced in HELLO: `product::Bolt/version (language/version)`.
pub const USER_AGENT: &str = concat!(
    "cyq::Bolt/",
    env!("CARGO_PKG_VERSION"),
    " (rust/",
    env!("CARGO_PKG_RUST_VERSION"),
    ")"
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_agent_format() {
        assert!(USER_AGENT.starts_with("cyq::Bolt/"));
        assert!(USER_AGENT.contains("(rust/"));
    }
}
