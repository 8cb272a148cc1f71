//! Driver façade.
//!
//! Resolves the connection URL, owns the pool, and runs queries: blocking
//! (`run` drains everything), streaming (`run_stream` hands out a cursor),
//! or reactive (`run_reactive` wraps the cursor in an operator pipeline).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error, info, warn};

use super::config::DriverConfig;
use super::connection::TlsContext;
use super::cursor::StreamingCursor;
use super::error::{DriverError, DriverResult};
use super::pool::{ConnectionPool, PooledConnection};
use super::reactive::{ReactiveConfig, ReactiveResult};
use super::record::{Record, RecordKeys};
use super::summary::ResultSummary;
use super::url::ConnectionConfig;
use super::USER_AGENT;
use crate::bolt::{BoltRequest, BoltResponse, PullMessage, RunMessage, SuccessMessage};

/// Fully materialized result of a blocking [`Driver::run`].
#[derive(Debug)]
pub struct QueryResult {
    /// Column names in server order
    pub columns: Vec<String>,
    /// All result rows
    pub records: Vec<Record>,
    /// Execution metadata
    pub summary: ResultSummary,
}

/// Top-level driver for a single Bolt endpoint.
pub struct Driver {
    config: ConnectionConfig,
    driver_config: DriverConfig,
    pool: Arc<ConnectionPool>,
}

impl Driver {
    /// Create a driver from a connection URL with default configuration.
    pub fn new(url: &str) -> DriverResult<Self> {
        Self::with_config(url, DriverConfig::default())
    }

    /// Create a driver from a connection URL and custom configuration.
    ///
    /// The URL is resolved eagerly: a malformed URL or unsupported adapter
    /// fails here, before any socket is opened.
    pub fn with_config(url: &str, driver_config: DriverConfig) -> DriverResult<Self> {
        let config = ConnectionConfig::resolve(url)?;
        info!(
            address = %config.address(),
            adapter = config.adapter.as_str(),
            secure = config.tls.secure(),
            "initializing driver"
        );

        let tls = if config.tls.secure() {
            let client_config = driver_config
                .tls
                .build_client_config(config.tls.verify_cert())?;
            if !config.tls.verify_cert() {
                warn!(address = %config.address(), "TLS certificate verification disabled");
            }
            let server_name = driver_config
                .tls
                .server_name
                .clone()
                .unwrap_or_else(|| config.host.clone());
            Some(TlsContext::new(Arc::new(client_config), &server_name)?)
        } else {
            None
        };

        let pool = Arc::new(ConnectionPool::new(
            config.address(),
            driver_config.pool.clone(),
            tls,
        ));

        Ok(Self {
            config,
            driver_config,
            pool,
        })
    }

    /// The resolved connection configuration.
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Verify the server is reachable and credentials work.
    pub async fn ping(&self) -> DriverResult<()> {
        debug!("pinging server");
        let conn = self.acquire_ready().await?;
        self.pool.put(conn, None);
        debug!("ping successful");
        Ok(())
    }

    /// Execute a query and drain all records.
    pub async fn run(
        &self,
        query: &str,
        params: HashMap<String, crate::bolt::Value>,
        metadata: HashMap<String, crate::bolt::Value>,
    ) -> DriverResult<QueryResult> {
        let started = Instant::now();
        let mut summary = ResultSummary::new(query, params.clone(), self.pool.address());
        debug!(query, query_type = summary.query_type.as_str(), "executing query");

        let mut conn = self.acquire_ready().await?;

        let run = RunMessage::new(query, params, metadata);
        let columns = match self.exchange_run(&mut conn, run).await {
            Ok(success) => {
                summary.apply_run_success(&success);
                success.fields().unwrap_or_default()
            }
            Err(err) => {
                error!(query, %err, "query failed");
                conn.mark_dirty();
                self.pool.put(conn, Some(&err));
                return Err(err);
            }
        };

        let keys = RecordKeys::new(columns.clone());
        let mut records = Vec::new();

        // Drain with PULL(-1): the blocking path has no reason to batch.
        if let Err(err) = self
            .drain_records(&mut conn, &keys, &mut records, &mut summary)
            .await
        {
            error!(query, %err, "query failed during PULL");
            conn.mark_dirty();
            self.pool.put(conn, Some(&err));
            return Err(err);
        }

        summary.execution_time = started.elapsed();
        conn.touch();
        self.pool.put(conn, None);

        debug!(
            query,
            records = records.len(),
            duration = ?summary.execution_time,
            "query completed"
        );

        Ok(QueryResult {
            columns,
            records,
            summary,
        })
    }

    /// Execute a query and return a streaming cursor.
    ///
    /// The cursor holds the connection until the stream is exhausted or
    /// closed; records are fetched in PULL batches of the configured fetch
    /// size.
    pub async fn run_stream(
        &self,
        query: &str,
        params: HashMap<String, crate::bolt::Value>,
        metadata: HashMap<String, crate::bolt::Value>,
    ) -> DriverResult<StreamingCursor> {
        let started = Instant::now();
        let mut summary = ResultSummary::new(query, params.clone(), self.pool.address());
        debug!(query, "executing streaming query");

        let mut conn = self.acquire_ready().await?;

        let run = RunMessage::new(query, params, metadata);
        let columns = match self.exchange_run(&mut conn, run).await {
            Ok(success) => {
                summary.apply_run_success(&success);
                success.fields().unwrap_or_default()
            }
            Err(err) => {
                error!(query, %err, "streaming query failed");
                conn.mark_dirty();
                self.pool.put(conn, Some(&err));
                return Err(err);
            }
        };

        Ok(StreamingCursor::new(
            conn,
            self.pool.clone(),
            RecordKeys::new(columns),
            summary,
            self.driver_config.fetch_size,
            started,
        ))
    }

    /// Execute a query and return a reactive pipeline over its records.
    pub async fn run_reactive(
        &self,
        query: &str,
        params: HashMap<String, crate::bolt::Value>,
        metadata: HashMap<String, crate::bolt::Value>,
    ) -> DriverResult<ReactiveResult> {
        let cursor = self.run_stream(query, params, metadata).await?;
        Ok(ReactiveResult::new(cursor, ReactiveConfig::default()))
    }

    /// Close the pool; idle connections say GOODBYE.
    pub async fn close(&self) {
        info!("closing driver");
        self.pool.close().await;
    }

    /// Pool usage snapshot.
    pub fn pool_metrics(&self) -> super::pool::PoolMetrics {
        self.pool.metrics()
    }

    /// Acquire a connection that is live and authenticated.
    ///
    /// Previously authenticated connections get a liveness probe (when
    /// enabled); dead ones are discarded and replaced. Connections needing
    /// re-auth go through the full handshake + HELLO + LOGON.
    async fn acquire_ready(&self) -> DriverResult<PooledConnection> {
        let mut conn = self.pool.get().await?;

        if self.driver_config.pool.liveness_check && conn.is_authenticated() {
            if !conn.is_alive().await {
                warn!(id = conn.id(), "pooled connection dead, discarding");
                let err = DriverError::connection("connection dead");
                self.pool.put(conn, Some(&err));
                conn = self.pool.get().await?;
            }
        }

        if !conn.needs_reauth(self.driver_config.pool.max_idle_time) {
            debug!(id = conn.id(), idle = ?conn.idle_time(), "reusing authenticated connection");
            conn.touch();
            return Ok(conn);
        }

        match self.authenticate(&mut conn).await {
            Ok(()) => Ok(conn),
            Err(err) => {
                self.pool.put(conn, Some(&err));
                Err(err)
            }
        }
    }

    /// Full handshake + HELLO + LOGON on a fresh (or idle-expired) socket.
    async fn authenticate(&self, conn: &mut PooledConnection) -> DriverResult<()> {
        debug!(id = conn.id(), "performing Bolt handshake");
        let (major, minor) = conn.connection().handshake().await?;

        conn.connection().hello(USER_AGENT).await?;
        conn.connection()
            .logon(&self.config.username, &self.config.password)
            .await?;

        conn.mark_authenticated(major, minor);
        debug!(id = conn.id(), major, minor, "authentication successful");
        Ok(())
    }

    /// Send RUN and interpret its reply.
    async fn exchange_run(
        &self,
        conn: &mut PooledConnection,
        run: RunMessage,
    ) -> DriverResult<SuccessMessage> {
        match conn.connection().request(BoltRequest::Run(run)).await? {
            BoltResponse::Success(success) => Ok(success),
            BoltResponse::Failure(failure) => {
                Err(DriverError::database(failure.code, failure.message))
            }
            BoltResponse::Ignored => Err(DriverError::protocol("Server ignored RUN request")),
            other => Err(DriverError::protocol(format!(
                "Unexpected response to RUN: {}",
                other.name()
            ))),
        }
    }

    /// PULL everything, collecting RECORDs until the terminal reply.
    async fn drain_records(
        &self,
        conn: &mut PooledConnection,
        keys: &Arc<RecordKeys>,
        records: &mut Vec<Record>,
        summary: &mut ResultSummary,
    ) -> DriverResult<()> {
        conn.connection()
            .send(BoltRequest::Pull(PullMessage::all()))
            .await?;

        loop {
            match conn.connection().recv().await? {
                BoltResponse::Record(record) => {
                    records.push(Record::new(keys.clone(), record.values));
                }
                BoltResponse::Success(success) => {
                    if success.has_more() {
                        conn.connection()
                            .send(BoltRequest::Pull(PullMessage::all()))
                            .await?;
                        continue;
                    }
                    summary.apply_final_success(&success);
                    return Ok(());
                }
                BoltResponse::Failure(failure) => {
                    return Err(DriverError::database(failure.code, failure.message));
                }
                BoltResponse::Ignored => {
                    return Err(DriverError::protocol("Server ignored PULL request"));
                }
                other => {
                    return Err(DriverError::protocol(format!(
                        "Unexpected response during PULL: {}",
                        other.name()
                    )));
                }
            }
        }
    }
}

impl std::fmt::Debug for Driver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Driver")
            .field("address", &self.config.address())
            .field("adapter", &self.config.adapter)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_url_refused() {
        assert!(matches!(
            Driver::new("bogus://localhost"),
            Err(DriverError::Config(_))
        ));
        assert!(matches!(
            Driver::new("not a url"),
            Err(DriverError::Config(_))
        ));
    }

    #[test]
    fn test_driver_construction_is_lazy() {
        // No server is listening; construction must still succeed.
        let driver = Driver::new("neo4j://127.0.0.1:1").unwrap();
        assert_eq!(driver.config().database, "neo4j");
        assert_eq!(driver.pool_metrics().total_created, 0);
    }

    #[tokio::test]
    async fn test_ping_fails_without_server() {
        let driver = Driver::new("neo4j://127.0.0.1:1").unwrap();
        let err = driver.ping().await.unwrap_err();
        assert!(matches!(err, DriverError::Connection(_)));
    }
}
