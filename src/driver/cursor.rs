//! Streaming result cursor.
//!
//! A cursor is the exclusive holder of a pooled connection from the RUN
//! acknowledgement until the stream ends. Records are fetched with
//! demand-driven PULL batches; only a terminal SUCCESS (`has_more == false`)
//! ends the stream and finalizes the summary. Closing earlier returns the
//! connection dirty, so the pool never reuses the socket without a fresh
//! handshake.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use tracing::debug;

use super::error::{DriverError, DriverResult};
use super::pool::{ConnectionPool, PooledConnection};
use super::record::{Record, RecordKeys};
use super::summary::ResultSummary;
use crate::bolt::{BoltRequest, BoltResponse, PullMessage};

/// Cursor lifecycle.
///
/// `Streaming` owns the connection. The transition to `Exhausted` happens
/// only on the terminal SUCCESS and returns the connection clean; every
/// other terminal transition goes to `Closed` and returns it dirty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CursorState {
    Streaming,
    Exhausted,
    Closed,
}

/// Demand-driven record iterator over a persistent connection.
pub struct StreamingCursor {
    conn: Option<PooledConnection>,
    pool: Arc<ConnectionPool>,
    keys: Arc<RecordKeys>,
    fetch_size: i64,
    state: CursorState,
    pending: VecDeque<Record>,
    current: Option<Record>,
    peeked: Option<Record>,
    has_peeked: bool,
    last_err: Option<DriverError>,
    summary: ResultSummary,
    started: Instant,
}

impl StreamingCursor {
    pub(crate) fn new(
        conn: PooledConnection,
        pool: Arc<ConnectionPool>,
        keys: Arc<RecordKeys>,
        summary: ResultSummary,
        fetch_size: i64,
        started: Instant,
    ) -> Self {
        Self {
            conn: Some(conn),
            pool,
            keys,
            fetch_size,
            state: CursorState::Streaming,
            pending: VecDeque::new(),
            current: None,
            peeked: None,
            has_peeked: false,
            last_err: None,
            summary,
            started,
        }
    }

    /// Column names, in server order.
    pub fn keys(&self) -> DriverResult<&[String]> {
        if self.state == CursorState::Closed {
            if let Some(err) = &self.last_err {
                return Err(err.clone());
            }
        }
        Ok(self.keys.names())
    }

    /// Advance to the next record. Returns true iff a record is now
    /// current; after false, [`err`](Self::err) reports any error.
    pub async fn next(&mut self) -> bool {
        if self.last_err.is_some() {
            return false;
        }

        // A prior peek is consumed before another pull is issued.
        if self.has_peeked {
            self.current = self.peeked.take();
            self.has_peeked = false;
            return self.current.is_some();
        }

        self.current = self.fetch_one().await;
        self.current.is_some()
    }

    /// The current record, if [`next`](Self::next) returned true.
    pub fn record(&self) -> Option<&Record> {
        self.current.as_ref()
    }

    /// Look one record ahead without consuming it.
    pub async fn peek(&mut self) -> bool {
        if self.last_err.is_some() {
            return false;
        }

        if !self.has_peeked {
            self.peeked = self.fetch_one().await;
            self.has_peeked = true;
        }

        self.peeked.is_some()
    }

    /// Look one record ahead, copying it out.
    pub async fn peek_record(&mut self) -> Option<Record> {
        if self.peek().await {
            self.peeked.clone()
        } else {
            None
        }
    }

    /// Exactly one remaining record.
    ///
    /// Errors if the stream holds zero or more than one record; in the
    /// more-than-one case the rest of the stream is drained so the
    /// connection comes back in a known state.
    pub async fn single(&mut self) -> DriverResult<Record> {
        if !self.next().await {
            if let Some(err) = &self.last_err {
                return Err(err.clone());
            }
            return Err(DriverError::usage("Result contains no records"));
        }

        let single = self.current.take();

        if self.next().await {
            let _ = self.consume_inner().await;
            return Err(DriverError::usage("Result contains more than one record"));
        }
        if let Some(err) = &self.last_err {
            return Err(err.clone());
        }

        single.ok_or_else(|| DriverError::usage("Result contains no records"))
    }

    /// Materialize the rest of the stream.
    ///
    /// Each record is copied out so the returned rows are decoupled from
    /// codec buffers.
    pub async fn collect(&mut self) -> DriverResult<Vec<Record>> {
        let mut records = Vec::new();
        while self.next().await {
            if let Some(record) = self.current.take() {
                records.push(record);
            }
        }

        match &self.last_err {
            Some(err) => Err(err.clone()),
            None => Ok(records),
        }
    }

    /// Drain the rest of the stream and close, returning the summary.
    /// Safe to call multiple times.
    pub async fn consume(&mut self) -> DriverResult<ResultSummary> {
        if let Some(err) = &self.last_err {
            return Err(err.clone());
        }
        self.consume_inner().await?;
        Ok(self.summary.clone())
    }

    /// Whether the stream is still open for reading.
    pub fn is_open(&self) -> bool {
        self.state == CursorState::Streaming
    }

    /// The error that ended iteration, if any.
    pub fn err(&self) -> Option<&DriverError> {
        self.last_err.as_ref()
    }

    /// The summary as known so far. Complete only after the terminal
    /// SUCCESS has been received.
    pub fn summary(&self) -> &ResultSummary {
        &self.summary
    }

    /// Close the cursor.
    ///
    /// Closing before exhaustion returns the connection dirty; the pool
    /// will not reuse the socket without a full handshake.
    pub fn close(&mut self) {
        match self.state {
            CursorState::Streaming => {
                let err = DriverError::usage("Stream closed before being fully consumed");
                self.return_connection_dirty(&err);
                self.state = CursorState::Closed;
            }
            CursorState::Exhausted => {
                self.state = CursorState::Closed;
            }
            CursorState::Closed => {}
        }
    }

    async fn consume_inner(&mut self) -> DriverResult<()> {
        while self.next().await {}

        if let Some(err) = &self.last_err {
            return Err(err.clone());
        }

        self.close();
        Ok(())
    }

    /// Pop a buffered record or pull the next batch from the server.
    async fn fetch_one(&mut self) -> Option<Record> {
        loop {
            if let Some(record) = self.pending.pop_front() {
                return Some(record);
            }

            if self.state != CursorState::Streaming {
                return None;
            }

            if let Err(err) = self.pull_batch().await {
                self.fail(err);
                return None;
            }
        }
    }

    /// Send one PULL and buffer everything up to its terminating reply.
    async fn pull_batch(&mut self) -> DriverResult<()> {
        let mut conn = self
            .conn
            .take()
            .ok_or_else(|| DriverError::usage("Cursor has no connection"))?;
        conn.touch();

        match self.pump(&mut conn).await {
            Ok(exhausted) => {
                if exhausted {
                    // Terminal SUCCESS seen: the socket is in a known state
                    // and goes back clean.
                    self.pool.put(conn, None);
                } else {
                    self.conn = Some(conn);
                }
                Ok(())
            }
            Err(err) => {
                // fail() returns it dirty.
                self.conn = Some(conn);
                Err(err)
            }
        }
    }

    /// Read replies for one PULL. Returns true when the stream is done.
    async fn pump(&mut self, conn: &mut PooledConnection) -> DriverResult<bool> {
        let fetch_size = self.fetch_size;
        conn.connection()
            .send(BoltRequest::Pull(PullMessage::with_n(fetch_size)))
            .await?;

        loop {
            match conn.connection().recv().await? {
                BoltResponse::Record(record) => {
                    self.pending
                        .push_back(Record::new(self.keys.clone(), record.values));
                }
                BoltResponse::Success(success) => {
                    if success.has_more() {
                        if self.pending.is_empty() {
                            // Nothing buffered from this batch; ask again.
                            conn.connection()
                                .send(BoltRequest::Pull(PullMessage::with_n(fetch_size)))
                                .await?;
                            continue;
                        }
                        return Ok(false);
                    }

                    self.summary.apply_final_success(&success);
                    self.summary.execution_time = self.started.elapsed();
                    self.state = CursorState::Exhausted;
                    debug!(
                        query_type = self.summary.query_type.as_str(),
                        duration = ?self.summary.execution_time,
                        "streaming query completed"
                    );
                    return Ok(true);
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

    fn fail(&mut self, err: DriverError) {
        self.return_connection_dirty(&err);
        self.state = CursorState::Closed;
        self.last_err = Some(err);
    }

    fn return_connection_dirty(&mut self, err: &DriverError) {
        if let Some(mut conn) = self.conn.take() {
            conn.mark_dirty();
            self.pool.put(conn, Some(err));
        }
    }
}

impl Drop for StreamingCursor {
    fn drop(&mut self) {
        // An unconsumed cursor behaves like an early close: the connection
        // goes back dirty and is never reused without a handshake.
        if self.conn.is_some() {
            let err = DriverError::usage("Stream dropped before being fully consumed");
            self.return_connection_dirty(&err);
        }
    }
}

impl std::fmt::Debug for StreamingCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingCursor")
            .field("state", &self.state)
            .field("keys", &self.keys.names())
            .field("pending", &self.pending.len())
            .finish()
    }
}
