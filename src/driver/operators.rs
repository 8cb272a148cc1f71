//! Reactive pipeline operators.
//!
//! Each operator is a pure description; [`run_operator`] is the worker body
//! a pipeline spawns per operator at subscribe time. Workers read from the
//! upstream channel, apply their semantics, and forward through an
//! [`Outbound`] that applies the configured backpressure strategy.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;

use super::error::DriverError;
use super::reactive::{BackpressureStrategy, RecordEvent};
use super::record::Record;
use super::summary::ResultSummary;
use crate::bolt::Value;

/// A pure operator description. Closures are shared so deriving a pipeline
/// clones cheaply.
#[derive(Clone)]
pub enum Operator {
    /// Replace the record
    Transform(Arc<dyn Fn(Record) -> Record + Send + Sync>),
    /// Keep records matching the predicate
    Filter(Arc<dyn Fn(&Record) -> bool + Send + Sync>),
    /// Replace the record (coercing variant of Transform)
    Map(Arc<dyn Fn(Record) -> Record + Send + Sync>),
    /// Group records into fixed-size batches
    Batch(usize),
    /// Group records into time-based batches
    BatchByTime(Duration),
    /// Forward the first n records, then complete
    Take(u64),
    /// Drop the first n records
    Skip(u64),
    /// Drop records whose key was seen before
    Distinct(Arc<dyn Fn(&Record) -> String + Send + Sync>),
    /// At most one record per period
    Throttle(Duration),
    /// Replace or suppress the stream error
    OnError(Arc<dyn Fn(DriverError) -> Option<DriverError> + Send + Sync>),
    /// Side effect per record
    DoOnNext(Arc<dyn Fn(&Record) + Send + Sync>),
    /// Side effect at completion
    DoOnComplete(Arc<dyn Fn(Option<&ResultSummary>) + Send + Sync>),
    /// Side effect on error
    DoOnError(Arc<dyn Fn(&DriverError) + Send + Sync>),
}

impl std::fmt::Debug for Operator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Operator::Transform(_) => "Transform",
            Operator::Filter(_) => "Filter",
            Operator::Map(_) => "Map",
            Operator::Batch(_) => "Batch",
            Operator::BatchByTime(_) => "BatchByTime",
            Operator::Take(_) => "Take",
            Operator::Skip(_) => "Skip",
            Operator::Distinct(_) => "Distinct",
            Operator::Throttle(_) => "Throttle",
            Operator::OnError(_) => "OnError",
            Operator::DoOnNext(_) => "DoOnNext",
            Operator::DoOnComplete(_) => "DoOnComplete",
            Operator::DoOnError(_) => "DoOnError",
        };
        f.write_str(name)
    }
}

/// Build the record a batch travels as: a single `batch` column holding
/// the grouped records as a list of maps.
pub(crate) fn batch_record(records: Vec<Record>) -> Record {
    let values: Vec<Value> = records.iter().map(Record::to_value).collect();
    Record::from_pairs(vec![("batch", Value::List(values))])
}

/// The downstream side of an operator, with backpressure applied.
pub(crate) struct Outbound {
    tx: mpsc::Sender<RecordEvent>,
    strategy: BackpressureStrategy,
    latest: Option<RecordEvent>,
    dropped: Arc<AtomicU64>,
}

/// Sending failed: the channel closed or the pipeline was cancelled.
pub(crate) struct SendAborted;

impl Outbound {
    pub(crate) fn new(
        tx: mpsc::Sender<RecordEvent>,
        strategy: BackpressureStrategy,
        dropped: Arc<AtomicU64>,
    ) -> Self {
        Self {
            tx,
            strategy,
            latest: None,
            dropped,
        }
    }

    /// Send a record event under the configured strategy.
    pub(crate) async fn send_record(
        &mut self,
        event: RecordEvent,
        token: &CancellationToken,
    ) -> Result<(), SendAborted> {
        match self.strategy {
            BackpressureStrategy::Buffer | BackpressureStrategy::Block => {
                self.send_parking(event, token).await
            }
            BackpressureStrategy::Drop => match self.tx.try_send(event) {
                Ok(()) => Ok(()),
                Err(TrySendError::Full(_)) => {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    Ok(())
                }
                Err(TrySendError::Closed(_)) => Err(SendAborted),
            },
            BackpressureStrategy::Latest => {
                // Flush the side slot first so ordering survives when the
                // channel has drained in the meantime.
                if let Some(held) = self.latest.take() {
                    match self.tx.try_send(held) {
                        Ok(()) => {}
                        Err(TrySendError::Full(held)) => {
                            // Still no room: the new event replaces the held
                            // one, which is discarded.
                            let _ = held;
                            self.dropped.fetch_add(1, Ordering::Relaxed);
                            self.latest = Some(event);
                            return Ok(());
                        }
                        Err(TrySendError::Closed(_)) => return Err(SendAborted),
                    }
                }
                match self.tx.try_send(event) {
                    Ok(()) => Ok(()),
                    Err(TrySendError::Full(event)) => {
                        self.latest = Some(event);
                        Ok(())
                    }
                    Err(TrySendError::Closed(_)) => Err(SendAborted),
                }
            }
        }
    }

    /// Flush anything held back, then deliver a terminal event. Terminal
    /// events always park; they are never dropped.
    pub(crate) async fn finish(
        &mut self,
        terminal: RecordEvent,
        token: &CancellationToken,
    ) -> Result<(), SendAborted> {
        if let Some(held) = self.latest.take() {
            self.send_parking(held, token).await?;
        }
        self.send_parking(terminal, token).await
    }

    async fn send_parking(
        &self,
        event: RecordEvent,
        token: &CancellationToken,
    ) -> Result<(), SendAborted> {
        tokio::select! {
            biased;
            _ = token.cancelled() => Err(SendAborted),
            sent = self.tx.send(event) => sent.map_err(|_| SendAborted),
        }
    }
}

/// Receive the next event, or None on upstream close / cancellation.
async fn next_event(
    input: &mut mpsc::Receiver<RecordEvent>,
    token: &CancellationToken,
) -> Option<RecordEvent> {
    tokio::select! {
        biased;
        _ = token.cancelled() => None,
        event = input.recv() => event,
    }
}

/// Drain the upstream channel so parked predecessors can exit.
async fn drain(input: &mut mpsc::Receiver<RecordEvent>) {
    while input.recv().await.is_some() {}
}

/// Worker body for one operator.
pub(crate) async fn run_operator(
    op: Operator,
    mut input: mpsc::Receiver<RecordEvent>,
    mut out: Outbound,
    token: CancellationToken,
) {
    match op {
        Operator::Transform(f) | Operator::Map(f) => {
            while let Some(event) = next_event(&mut input, &token).await {
                let done = event.is_terminal();
                let result = match event {
                    RecordEvent::Next(record) => {
                        out.send_record(RecordEvent::Next(f(record)), &token).await
                    }
                    terminal => out.finish(terminal, &token).await,
                };
                if result.is_err() || done {
                    break;
                }
            }
        }

        Operator::Filter(p) => {
            while let Some(event) = next_event(&mut input, &token).await {
                match event {
                    RecordEvent::Next(record) => {
                        if p(&record) {
                            if out.send_record(RecordEvent::Next(record), &token).await.is_err() {
                                break;
                            }
                        }
                    }
                    terminal => {
                        let _ = out.finish(terminal, &token).await;
                        break;
                    }
                }
            }
        }

        Operator::Batch(size) => {
            let mut batch: Vec<Record> = Vec::with_capacity(size);
            while let Some(event) = next_event(&mut input, &token).await {
                match event {
                    RecordEvent::Next(record) => {
                        batch.push(record);
                        if batch.len() >= size {
                            let full = std::mem::take(&mut batch);
                            if out
                                .send_record(RecordEvent::Next(batch_record(full)), &token)
                                .await
                                .is_err()
                            {
                                break;
                            }
                        }
                    }
                    terminal => {
                        // Final partial batch travels before the terminal.
                        if !batch.is_empty() {
                            let partial = std::mem::take(&mut batch);
                            if out
                                .send_record(RecordEvent::Next(batch_record(partial)), &token)
                                .await
                                .is_err()
                            {
                                break;
                            }
                        }
                        let _ = out.finish(terminal, &token).await;
                        break;
                    }
                }
            }
        }

        Operator::BatchByTime(period) => {
            let mut batch: Vec<Record> = Vec::new();
            let mut ticker = tokio::time::interval(period.max(Duration::from_millis(1)));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.reset();

            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        if !batch.is_empty() {
                            let due = std::mem::take(&mut batch);
                            if out
                                .send_record(RecordEvent::Next(batch_record(due)), &token)
                                .await
                                .is_err()
                            {
                                break;
                            }
                        }
                    }
                    event = input.recv() => match event {
                        Some(RecordEvent::Next(record)) => batch.push(record),
                        Some(terminal) => {
                            if !batch.is_empty() {
                                let due = std::mem::take(&mut batch);
                                if out
                                    .send_record(RecordEvent::Next(batch_record(due)), &token)
                                    .await
                                    .is_err()
                                {
                                    break;
                                }
                            }
                            let _ = out.finish(terminal, &token).await;
                            break;
                        }
                        None => break,
                    },
                }
            }
        }

        Operator::Take(n) => {
            let mut count: u64 = 0;
            while let Some(event) = next_event(&mut input, &token).await {
                match event {
                    RecordEvent::Next(record) => {
                        if count >= n {
                            // Budget spent: synthesize completion.
                            let _ = out.finish(RecordEvent::Complete(None), &token).await;
                            break;
                        }
                        count += 1;
                        if out.send_record(RecordEvent::Next(record), &token).await.is_err() {
                            break;
                        }
                    }
                    terminal => {
                        let _ = out.finish(terminal, &token).await;
                        break;
                    }
                }
            }
        }

        Operator::Skip(n) => {
            let mut skipped: u64 = 0;
            while let Some(event) = next_event(&mut input, &token).await {
                match event {
                    RecordEvent::Next(record) => {
                        if skipped < n {
                            skipped += 1;
                            continue;
                        }
                        if out.send_record(RecordEvent::Next(record), &token).await.is_err() {
                            break;
                        }
                    }
                    terminal => {
                        let _ = out.finish(terminal, &token).await;
                        break;
                    }
                }
            }
        }

        Operator::Distinct(key) => {
            let mut seen: HashSet<String> = HashSet::new();
            while let Some(event) = next_event(&mut input, &token).await {
                match event {
                    RecordEvent::Next(record) => {
                        if !seen.insert(key(&record)) {
                            continue;
                        }
                        if out.send_record(RecordEvent::Next(record), &token).await.is_err() {
                            break;
                        }
                    }
                    terminal => {
                        let _ = out.finish(terminal, &token).await;
                        break;
                    }
                }
            }
        }

        Operator::Throttle(period) => {
            let mut ticker = tokio::time::interval(period.max(Duration::from_millis(1)));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            while let Some(event) = next_event(&mut input, &token).await {
                match event {
                    RecordEvent::Next(record) => {
                        tokio::select! {
                            biased;
                            _ = token.cancelled() => break,
                            _ = ticker.tick() => {}
                        }
                        if out.send_record(RecordEvent::Next(record), &token).await.is_err() {
                            break;
                        }
                    }
                    terminal => {
                        let _ = out.finish(terminal, &token).await;
                        break;
                    }
                }
            }
        }

        Operator::OnError(handler) => {
            while let Some(event) = next_event(&mut input, &token).await {
                match event {
                    RecordEvent::Error(err) => match handler(err) {
                        Some(replacement) => {
                            let _ = out.finish(RecordEvent::Error(replacement), &token).await;
                            break;
                        }
                        // Suppressed: the stream continues.
                        None => continue,
                    },
                    RecordEvent::Next(record) => {
                        if out.send_record(RecordEvent::Next(record), &token).await.is_err() {
                            break;
                        }
                    }
                    terminal => {
                        let _ = out.finish(terminal, &token).await;
                        break;
                    }
                }
            }
        }

        Operator::DoOnNext(action) => {
            while let Some(event) = next_event(&mut input, &token).await {
                match event {
                    RecordEvent::Next(record) => {
                        action(&record);
                        if out.send_record(RecordEvent::Next(record), &token).await.is_err() {
                            break;
                        }
                    }
                    terminal => {
                        let _ = out.finish(terminal, &token).await;
                        break;
                    }
                }
            }
        }

        Operator::DoOnComplete(action) => {
            while let Some(event) = next_event(&mut input, &token).await {
                match event {
                    RecordEvent::Complete(summary) => {
                        action(summary.as_ref());
                        let _ = out.finish(RecordEvent::Complete(summary), &token).await;
                        break;
                    }
                    RecordEvent::Next(record) => {
                        if out.send_record(RecordEvent::Next(record), &token).await.is_err() {
                            break;
                        }
                    }
                    terminal => {
                        let _ = out.finish(terminal, &token).await;
                        break;
                    }
                }
            }
        }

        Operator::DoOnError(action) => {
            while let Some(event) = next_event(&mut input, &token).await {
                match event {
                    RecordEvent::Error(err) => {
                        action(&err);
                        let _ = out.finish(RecordEvent::Error(err), &token).await;
                        break;
                    }
                    RecordEvent::Next(record) => {
                        if out.send_record(RecordEvent::Next(record), &token).await.is_err() {
                            break;
                        }
                    }
                    terminal => {
                        let _ = out.finish(terminal, &token).await;
                        break;
                    }
                }
            }
        }
    }

    drain(&mut input).await;
}
