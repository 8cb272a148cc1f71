//! Reactive result pipelines.
//!
//! A [`ReactiveResult`] is an immutable description of an operator chain
//! over a streaming cursor. Chaining an operator never mutates an existing
//! pipeline; materialization happens at [`subscribe`](ReactiveResult::subscribe)
//! or at a terminal collector.
//!
//! On subscribe, every operator becomes its own tokio task; adjacent tasks
//! are connected by bounded channels sized by the configured buffer. One
//! upstream task pumps the cursor, one downstream task invokes the
//! subscriber serially. A shared cancellation token makes every task exit
//! and drain its input, so predecessors never park forever.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::cursor::StreamingCursor;
use super::error::{DriverError, DriverResult};
use super::operators::{run_operator, Operator, Outbound};
use super::record::Record;
use super::summary::ResultSummary;

/// An event in the reactive stream.
#[derive(Debug, Clone)]
pub enum RecordEvent {
    /// A record
    Next(Record),
    /// The stream failed; no further events follow
    Error(DriverError),
    /// The stream completed; no further events follow. The summary is
    /// absent for synthetic completions (e.g. Take).
    Complete(Option<ResultSummary>),
}

impl RecordEvent {
    /// Whether this is a terminal event.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RecordEvent::Next(_))
    }
}

/// Consumer of a reactive stream.
///
/// After zero or more `on_next` calls, exactly one of `on_error` or
/// `on_complete` is delivered; nothing fires after the terminal call.
pub trait Subscriber: Send {
    /// A new record arrived.
    fn on_next(&mut self, record: Record);
    /// The stream failed.
    fn on_error(&mut self, err: DriverError);
    /// The stream completed.
    fn on_complete(&mut self, summary: Option<ResultSummary>);
}

/// Behavior when the next channel in the pipeline is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackpressureStrategy {
    /// Park until space (default)
    #[default]
    Buffer,
    /// Discard the record and count it
    Drop,
    /// Identical to Buffer, under its explicit name
    Block,
    /// Keep only the newest record in a one-slot side buffer
    Latest,
}

/// Reactive pipeline configuration.
#[derive(Debug, Clone)]
pub struct ReactiveConfig {
    /// Capacity of each inter-operator channel
    pub buffer_size: usize,
    /// Strategy when a downstream channel is full
    pub backpressure: BackpressureStrategy,
}

impl Default for ReactiveConfig {
    fn default() -> Self {
        Self {
            buffer_size: 1000,
            backpressure: BackpressureStrategy::Buffer,
        }
    }
}

/// Handle to a running pipeline.
pub struct PipelineHandle {
    token: CancellationToken,
    join: JoinHandle<()>,
    dropped: Arc<AtomicU64>,
}

impl PipelineHandle {
    /// Cancel the pipeline: all tasks exit and drain.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Records discarded by Drop/Latest backpressure.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Wait until the subscriber received its terminal event.
    pub async fn join(&mut self) {
        let _ = (&mut self.join).await;
    }
}

/// What feeds the pipeline: a live cursor, or an in-memory record set.
enum Source {
    Cursor(StreamingCursor),
    Records(Vec<Record>),
}

/// Immutable operator chain over a record source.
///
/// The source is consumed by whichever derived pipeline subscribes first;
/// subscribing twice is a usage error.
pub struct ReactiveResult {
    source: Arc<Mutex<Option<Source>>>,
    config: ReactiveConfig,
    operators: Vec<Operator>,
    keys: Vec<String>,
}

impl ReactiveResult {
    /// Wrap a cursor in an empty pipeline.
    pub fn new(cursor: StreamingCursor, config: ReactiveConfig) -> Self {
        let keys = cursor.keys().map(<[String]>::to_vec).unwrap_or_default();
        Self {
            source: Arc::new(Mutex::new(Some(Source::Cursor(cursor)))),
            config,
            operators: Vec::new(),
            keys,
        }
    }

    /// Build a pipeline over an in-memory record set. The completion event
    /// carries a default summary.
    pub fn from_records(records: Vec<Record>, config: ReactiveConfig) -> Self {
        let keys = records
            .first()
            .map(|r| r.keys().to_vec())
            .unwrap_or_default();
        Self {
            source: Arc::new(Mutex::new(Some(Source::Records(records)))),
            config,
            operators: Vec::new(),
            keys,
        }
    }

    /// Column names of the underlying result.
    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    fn derive(&self, op: Operator) -> Self {
        let mut operators = self.operators.clone();
        operators.push(op);
        Self {
            source: self.source.clone(),
            config: self.config.clone(),
            operators,
            keys: self.keys.clone(),
        }
    }

    /// Replace each record with `f(record)`.
    pub fn transform(
        &self,
        f: impl Fn(Record) -> Record + Send + Sync + 'static,
    ) -> Self {
        self.derive(Operator::Transform(Arc::new(f)))
    }

    /// Drop records for which the predicate is false.
    pub fn filter(&self, p: impl Fn(&Record) -> bool + Send + Sync + 'static) -> Self {
        self.derive(Operator::Filter(Arc::new(p)))
    }

    /// Replace each record with `f(record)`, coerced to a record.
    pub fn map(&self, f: impl Fn(Record) -> Record + Send + Sync + 'static) -> Self {
        self.derive(Operator::Map(Arc::new(f)))
    }

    /// Group records into batches of `size`; the final partial batch is
    /// emitted at completion.
    pub fn batch(&self, size: usize) -> Self {
        self.derive(Operator::Batch(size.max(1)))
    }

    /// Emit the current batch every `period`, and at completion.
    pub fn batch_by_time(&self, period: std::time::Duration) -> Self {
        self.derive(Operator::BatchByTime(period))
    }

    /// Forward the first `n` records, then complete.
    pub fn take(&self, n: u64) -> Self {
        self.derive(Operator::Take(n))
    }

    /// Drop the first `n` records.
    pub fn skip(&self, n: u64) -> Self {
        self.derive(Operator::Skip(n))
    }

    /// Drop records whose key was already seen.
    pub fn distinct(&self, key: impl Fn(&Record) -> String + Send + Sync + 'static) -> Self {
        self.derive(Operator::Distinct(Arc::new(key)))
    }

    /// Emit at most one record per `period`.
    pub fn throttle(&self, period: std::time::Duration) -> Self {
        self.derive(Operator::Throttle(period))
    }

    /// Replace the stream error via the handler; returning `None`
    /// suppresses it and the stream continues.
    pub fn on_error(
        &self,
        handler: impl Fn(DriverError) -> Option<DriverError> + Send + Sync + 'static,
    ) -> Self {
        self.derive(Operator::OnError(Arc::new(handler)))
    }

    /// Side effect for each record, without mutation.
    pub fn do_on_next(&self, action: impl Fn(&Record) + Send + Sync + 'static) -> Self {
        self.derive(Operator::DoOnNext(Arc::new(action)))
    }

    /// Side effect at stream completion.
    pub fn do_on_complete(
        &self,
        action: impl Fn(Option<&ResultSummary>) + Send + Sync + 'static,
    ) -> Self {
        self.derive(Operator::DoOnComplete(Arc::new(action)))
    }

    /// Side effect when the stream errors.
    pub fn do_on_error(&self, action: impl Fn(&DriverError) + Send + Sync + 'static) -> Self {
        self.derive(Operator::DoOnError(Arc::new(action)))
    }

    /// Materialize the pipeline and feed events to the subscriber.
    ///
    /// Returns immediately; processing runs until cursor exhaustion, an
    /// error, or cancellation via the returned handle.
    pub fn subscribe(
        &self,
        subscriber: impl Subscriber + 'static,
    ) -> DriverResult<PipelineHandle> {
        let source = self
            .source
            .try_lock()
            .ok()
            .and_then(|mut guard| guard.take())
            .ok_or_else(|| DriverError::usage("Reactive source already consumed"))?;

        let token = CancellationToken::new();
        let dropped = Arc::new(AtomicU64::new(0));
        let buffer_size = self.config.buffer_size.max(1);
        let strategy = self.config.backpressure;

        debug!(
            operators = self.operators.len(),
            buffer_size, "subscribing reactive pipeline"
        );

        // Source pump.
        let (tx, mut rx) = mpsc::channel::<RecordEvent>(buffer_size);
        {
            let token = token.clone();
            let out = Outbound::new(tx, strategy, dropped.clone());
            match source {
                Source::Cursor(cursor) => {
                    tokio::spawn(pump_cursor(cursor, out, token));
                }
                Source::Records(records) => {
                    tokio::spawn(pump_records(records, out, token));
                }
            }
        }

        // One task per operator.
        for op in self.operators.clone() {
            let (next_tx, next_rx) = mpsc::channel::<RecordEvent>(buffer_size);
            let out = Outbound::new(next_tx, strategy, dropped.clone());
            tokio::spawn(run_operator(op, rx, out, token.clone()));
            rx = next_rx;
        }

        // Subscriber forwarder: the single place subscriber methods are
        // invoked, so delivery is serial and the terminal fires once.
        let join = {
            let token = token.clone();
            let mut subscriber = subscriber;
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        biased;
                        _ = token.cancelled() => {
                            subscriber.on_error(DriverError::cancelled(
                                "Pipeline cancelled",
                            ));
                            break;
                        }
                        event = rx.recv() => match event {
                            Some(RecordEvent::Next(record)) => subscriber.on_next(record),
                            Some(RecordEvent::Error(err)) => {
                                subscriber.on_error(err);
                                break;
                            }
                            Some(RecordEvent::Complete(summary)) => {
                                subscriber.on_complete(summary);
                                break;
                            }
                            // Channel closed without a terminal event: the
                            // pipeline was torn down.
                            None => {
                                subscriber.on_error(DriverError::cancelled(
                                    "Pipeline terminated without completion",
                                ));
                                break;
                            }
                        }
                    }
                }

                // Unblock any predecessor still parked on a full channel.
                while rx.recv().await.is_some() {}
            })
        };

        Ok(PipelineHandle {
            token,
            join,
            dropped,
        })
    }

    /// Materialize the pipeline as a stream of events.
    pub fn into_event_stream(self) -> DriverResult<UnboundedReceiverStream<RecordEvent>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribe(ChannelSubscriber { tx })?;
        Ok(UnboundedReceiverStream::new(rx))
    }

    /// Collect all records. Blocking terminal.
    pub async fn to_slice(&self) -> DriverResult<Vec<Record>> {
        let (done_tx, done_rx) = oneshot::channel();
        let mut handle = self.subscribe(SliceSubscriber {
            records: Vec::new(),
            done: Some(done_tx),
        })?;

        let result = done_rx
            .await
            .map_err(|_| DriverError::cancelled("Pipeline terminated"))?;
        handle.join().await;
        result
    }

    /// First record, or a usage error when the stream is empty. Blocking
    /// terminal; internally applies `take(1)`.
    pub async fn first(&self) -> DriverResult<Record> {
        let records = self.take(1).to_slice().await?;
        records
            .into_iter()
            .next()
            .ok_or_else(|| DriverError::usage("Result contains no records"))
    }

    /// Count records. Blocking terminal.
    pub async fn count(&self) -> DriverResult<u64> {
        let (done_tx, done_rx) = oneshot::channel();
        let mut handle = self.subscribe(CountSubscriber {
            count: 0,
            done: Some(done_tx),
        })?;

        let result = done_rx
            .await
            .map_err(|_| DriverError::cancelled("Pipeline terminated"))?;
        handle.join().await;
        result
    }
}

impl std::fmt::Debug for ReactiveResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReactiveResult")
            .field("operators", &self.operators.len())
            .field("keys", &self.keys)
            .finish()
    }
}

/// Pump an in-memory record set into the first channel.
async fn pump_records(records: Vec<Record>, mut out: Outbound, token: CancellationToken) {
    for record in records {
        if token.is_cancelled() {
            return;
        }
        if out
            .send_record(RecordEvent::Next(record), &token)
            .await
            .is_err()
        {
            return;
        }
    }
    let _ = out
        .finish(RecordEvent::Complete(Some(ResultSummary::default())), &token)
        .await;
}

/// Pump the cursor into the first channel, then emit the terminal event.
async fn pump_cursor(
    mut cursor: StreamingCursor,
    mut out: Outbound,
    token: CancellationToken,
) {
    loop {
        let advanced = tokio::select! {
            biased;
            _ = token.cancelled() => None,
            advanced = cursor.next() => Some(advanced),
        };

        let advanced = match advanced {
            Some(advanced) => advanced,
            None => {
                // Early teardown: the cursor returns its connection dirty.
                cursor.close();
                return;
            }
        };

        if !advanced {
            break;
        }

        let record = match cursor.record() {
            Some(record) => record.clone(),
            None => continue,
        };

        if out
            .send_record(RecordEvent::Next(record), &token)
            .await
            .is_err()
        {
            cursor.close();
            return;
        }
    }

    let terminal = if let Some(err) = cursor.err() {
        RecordEvent::Error(err.clone())
    } else {
        match cursor.consume().await {
            Ok(summary) => RecordEvent::Complete(Some(summary)),
            Err(err) => RecordEvent::Error(err),
        }
    };

    let _ = out.finish(terminal, &token).await;
}

/// Subscriber feeding events into a channel.
struct ChannelSubscriber {
    tx: mpsc::UnboundedSender<RecordEvent>,
}

impl Subscriber for ChannelSubscriber {
    fn on_next(&mut self, record: Record) {
        let _ = self.tx.send(RecordEvent::Next(record));
    }

    fn on_error(&mut self, err: DriverError) {
        let _ = self.tx.send(RecordEvent::Error(err));
    }

    fn on_complete(&mut self, summary: Option<ResultSummary>) {
        let _ = self.tx.send(RecordEvent::Complete(summary));
    }
}

struct SliceSubscriber {
    records: Vec<Record>,
    done: Option<oneshot::Sender<DriverResult<Vec<Record>>>>,
}

impl Subscriber for SliceSubscriber {
    fn on_next(&mut self, record: Record) {
        self.records.push(record);
    }

    fn on_error(&mut self, err: DriverError) {
        if let Some(done) = self.done.take() {
            let _ = done.send(Err(err));
        }
    }

    fn on_complete(&mut self, _summary: Option<ResultSummary>) {
        if let Some(done) = self.done.take() {
            let _ = done.send(Ok(std::mem::take(&mut self.records)));
        }
    }
}

struct CountSubscriber {
    count: u64,
    done: Option<oneshot::Sender<DriverResult<u64>>>,
}

impl Subscriber for CountSubscriber {
    fn on_next(&mut self, _record: Record) {
        self.count += 1;
    }

    fn on_error(&mut self, err: DriverError) {
        if let Some(done) = self.done.take() {
            let _ = done.send(Err(err));
        }
    }

    fn on_complete(&mut self, _summary: Option<ResultSummary>) {
        if let Some(done) = self.done.take() {
            let _ = done.send(Ok(self.count));
        }
    }
}

/// Subscriber built from closures.
pub struct FuncSubscriber {
    /// Called per record
    pub on_next: Box<dyn FnMut(Record) + Send>,
    /// Called on stream failure
    pub on_error: Box<dyn FnMut(DriverError) + Send>,
    /// Called on stream completion
    pub on_complete: Box<dyn FnMut(Option<ResultSummary>) + Send>,
}

impl Subscriber for FuncSubscriber {
    fn on_next(&mut self, record: Record) {
        (self.on_next)(record)
    }

    fn on_error(&mut self, err: DriverError) {
        (self.on_error)(err)
    }

    fn on_complete(&mut self, summary: Option<ResultSummary>) {
        (self.on_complete)(summary)
    }
}
