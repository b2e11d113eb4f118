// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2025 Rust Nostr Developers
// Distributed under the MIT software license

//! Event processor
//!
//! A fixed pool of workers draining bounded queues. Jobs are routed by
//! connection id, so events from one connection always land on the same
//! worker and commit in arrival order.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::FutureExt;
use nostrd_protocol::{Event, Kind};
use nostrd_store::{EventStore, SaveEventStatus, StoreError};
use thiserror::Error;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::dispatcher::{ConnectionId, Dispatcher};
use crate::validator::EventClass;

/// Submission failure
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SubmitError {
    /// The worker queue is full
    #[error("relay busy")]
    Busy,
    /// The processor no longer accepts jobs
    #[error("relay shutting down")]
    Closed,
}

/// Processing failure
#[derive(Debug, Error)]
pub enum ProcessError {
    /// Store error
    #[error(transparent)]
    Store(#[from] StoreError),
    /// The job panicked or its reply was lost
    #[error("internal error")]
    Internal,
}

/// Result delivered on the job reply channel
pub type ProcessResult = Result<SaveEventStatus, ProcessError>;

#[derive(Debug)]
struct Job {
    event: Event,
    class: EventClass,
    reply: oneshot::Sender<ProcessResult>,
}

/// Event processor handle
#[derive(Debug, Clone)]
pub struct EventProcessor {
    queues: Vec<mpsc::Sender<Job>>,
    closed: Arc<AtomicBool>,
    gift_wrap_kind: Kind,
}

impl EventProcessor {
    /// Spawn the worker pool
    ///
    /// Returns the handle plus the worker join handles for shutdown drain.
    pub fn start(
        store: Arc<dyn EventStore>,
        dispatcher: Dispatcher,
        workers: usize,
        queue_size: usize,
        gift_wrap_kind: Kind,
    ) -> (Self, Vec<JoinHandle<()>>) {
        let workers: usize = workers.max(1);
        let mut queues: Vec<mpsc::Sender<Job>> = Vec::with_capacity(workers);
        let mut handles: Vec<JoinHandle<()>> = Vec::with_capacity(workers);

        for worker_id in 0..workers {
            let (tx, rx) = mpsc::channel::<Job>(queue_size);
            queues.push(tx);
            handles.push(tokio::spawn(worker_loop(
                worker_id,
                store.clone(),
                dispatcher.clone(),
                gift_wrap_kind,
                rx,
            )));
        }

        (
            Self {
                queues,
                closed: Arc::new(AtomicBool::new(false)),
                gift_wrap_kind,
            },
            handles,
        )
    }

    /// Stop accepting new jobs; in-flight jobs still complete
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    /// Enqueue an event for its connection-sticky worker
    ///
    /// Returns the reply channel, or an error when the queue is full
    /// (back-pressure) or the processor is shutting down.
    pub fn submit(
        &self,
        conn: ConnectionId,
        event: Event,
        class: EventClass,
    ) -> Result<oneshot::Receiver<ProcessResult>, SubmitError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SubmitError::Closed);
        }

        let (reply, rx) = oneshot::channel();
        let queue: &mpsc::Sender<Job> = &self.queues[(conn as usize) % self.queues.len()];
        queue
            .try_send(Job {
                event,
                class,
                reply,
            })
            .map_err(|e| match e {
                TrySendError::Full(..) => SubmitError::Busy,
                TrySendError::Closed(..) => SubmitError::Closed,
            })?;

        Ok(rx)
    }

    /// Kind purged alongside a vanishing pubkey
    #[inline]
    pub fn gift_wrap_kind(&self) -> Kind {
        self.gift_wrap_kind
    }
}

async fn worker_loop(
    worker_id: usize,
    store: Arc<dyn EventStore>,
    dispatcher: Dispatcher,
    gift_wrap_kind: Kind,
    mut rx: mpsc::Receiver<Job>,
) {
    while let Some(job) = rx.recv().await {
        let Job {
            event,
            class,
            reply,
        } = job;

        let fut = process_job(&store, &dispatcher, gift_wrap_kind, &event, class);
        let result: ProcessResult = match AssertUnwindSafe(fut).catch_unwind().await {
            Ok(result) => result,
            Err(..) => {
                tracing::error!(id = %event.id, "Event processing panicked.");
                Err(ProcessError::Internal)
            }
        };

        // The submitter may be gone; its loss, not ours
        let _ = reply.send(result);
    }

    tracing::debug!(worker_id, "Processor worker terminated.");
}

/// Apply exactly one storage branch, selected by classification
///
/// Transient store failures are retried once within the operation.
async fn process_job(
    store: &Arc<dyn EventStore>,
    dispatcher: &Dispatcher,
    gift_wrap_kind: Kind,
    event: &Event,
    class: EventClass,
) -> ProcessResult {
    let mut retried: bool = false;
    loop {
        let result: Result<SaveEventStatus, StoreError> = match class {
            EventClass::Ephemeral => {
                // Fan-out only; skips the store entirely
                dispatcher.dispatch(event, None).await;
                return Ok(SaveEventStatus::Success);
            }
            EventClass::Vanish => store.vanish(event, gift_wrap_kind).await,
            EventClass::Deletion => store.delete(event).await,
            EventClass::Replaceable => store.upsert_replaceable(event).await,
            EventClass::Addressable => store.upsert_addressable(event).await,
            EventClass::Regular => store.insert(event).await,
        };

        match result {
            Err(e) if e.is_transient() && !retried => {
                tracing::warn!(id = %event.id, error = %e, "Retrying transient store error.");
                retried = true;
            }
            other => return other.map_err(ProcessError::from),
        }
    }
}

#[cfg(test)]
mod tests {
    use nostrd_protocol::{EventBuilder, Filter, Keys, RelayMessage, SubscriptionId, Timestamp};
    use nostrd_store::MemoryStore;
    use tokio::sync::{mpsc as tokio_mpsc, Notify};

    use super::*;

    fn processor(workers: usize, queue_size: usize) -> (EventProcessor, Dispatcher) {
        let store: Arc<dyn EventStore> = Arc::new(MemoryStore::new());
        let dispatcher = Dispatcher::new(8);
        let (processor, ..) = EventProcessor::start(
            store,
            dispatcher.clone(),
            workers,
            queue_size,
            Kind::GIFT_WRAP,
        );
        (processor, dispatcher)
    }

    #[tokio::test]
    async fn test_submit_and_commit() {
        let (processor, ..) = processor(2, 16);
        let keys = Keys::generate();
        let event = EventBuilder::text_note("hello")
            .sign_with_keys(&keys)
            .unwrap();

        let rx = processor
            .submit(1, event, EventClass::Regular)
            .unwrap();
        let result = rx.await.unwrap();
        assert!(result.unwrap().is_success());
    }

    #[tokio::test]
    async fn test_per_connection_ordering() {
        let (processor, ..) = processor(4, 64);
        let keys = Keys::generate();

        let mut replies = Vec::new();
        for i in 0..16u64 {
            let event = EventBuilder::text_note(format!("n{i}"))
                .custom_created_at(Timestamp::from_secs(1_000 + i))
                .sign_with_keys(&keys)
                .unwrap();
            // Same connection id: same worker, arrival order preserved
            replies.push((event.id, processor.submit(7, event, EventClass::Regular).unwrap()));
        }
        for (.., rx) in replies {
            assert!(rx.await.unwrap().unwrap().is_success());
        }
    }

    #[tokio::test]
    async fn test_back_pressure() {
        // One worker wedged behind a queue of size 1
        let (processor, ..) = processor(1, 1);
        let keys = Keys::generate();

        let mut accepted = 0usize;
        let mut busy = 0usize;
        for i in 0..64u64 {
            let event = EventBuilder::text_note(format!("n{i}"))
                .sign_with_keys(&keys)
                .unwrap();
            match processor.submit(1, event, EventClass::Regular) {
                Ok(..) => accepted += 1,
                Err(SubmitError::Busy) => busy += 1,
                Err(e) => panic!("unexpected: {e}"),
            }
        }
        assert!(accepted >= 1);
        assert!(busy >= 1);
    }

    #[tokio::test]
    async fn test_closed_processor_rejects() {
        let (processor, ..) = processor(1, 8);
        processor.close();
        let keys = Keys::generate();
        let event = EventBuilder::text_note("late")
            .sign_with_keys(&keys)
            .unwrap();
        assert_eq!(
            processor.submit(1, event, EventClass::Regular).unwrap_err(),
            SubmitError::Closed
        );
    }

    #[tokio::test]
    async fn test_ephemeral_fans_out_without_store() {
        let store: Arc<dyn EventStore> = Arc::new(MemoryStore::new());
        let dispatcher = Dispatcher::new(8);
        let (processor, ..) = EventProcessor::start(
            store.clone(),
            dispatcher.clone(),
            1,
            8,
            Kind::GIFT_WRAP,
        );

        let (tx, mut rx) = tokio_mpsc::channel(8);
        dispatcher
            .register_connection(1, tx, Arc::new(Notify::new()))
            .await;
        let sub = SubscriptionId::new("s1");
        dispatcher
            .register_subscription(1, sub.clone(), vec![Filter::new()])
            .await;
        dispatcher.activate_subscription(1, &sub, 0).await;

        let keys = Keys::generate();
        let event = EventBuilder::new(Kind::from_u16(20_001), "now you see me")
            .sign_with_keys(&keys)
            .unwrap();

        let reply = processor
            .submit(1, event.clone(), EventClass::Ephemeral)
            .unwrap();
        assert!(reply.await.unwrap().unwrap().is_success());

        // Fanned out...
        match rx.recv().await {
            Some(RelayMessage::Event { event: got, .. }) => assert_eq!(got.id, event.id),
            other => panic!("unexpected: {other:?}"),
        }
        // ...but never stored
        assert_eq!(store.count(Filter::new()).await.unwrap(), 0);
    }
}
