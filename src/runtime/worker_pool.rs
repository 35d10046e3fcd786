use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::sync::Semaphore;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::task::LocalSet;
use tracing::debug;
use tracing::warn;

use crate::config::ConsumerConfig;
use crate::core::Clock;
use crate::core::Delivery;
use crate::core::Handler;
use crate::core::Store;
use crate::message::Message;
use crate::process::ProcessingContext;

/// Fixed worker set draining a bounded delivery channel and driving the
/// processing state machine for one queue and one handler registration.
#[derive(Debug)]
pub struct WorkerPool<D, S, C, H> {
    context: ProcessingContext<S, C>,
    handler: Arc<H>,
    queue: Arc<str>,
    worker_count: usize,
    in_flight_limit: usize,
    input_rx: Arc<Mutex<mpsc::Receiver<D>>>,
}

impl<D, S, C, H> Clone for WorkerPool<D, S, C, H>
where
    S: Store,
    C: Clock,
{
    fn clone(&self) -> Self {
        Self {
            context: self.context.clone(),
            handler: self.handler.clone(),
            queue: self.queue.clone(),
            worker_count: self.worker_count,
            in_flight_limit: self.in_flight_limit,
            input_rx: self.input_rx.clone(),
        }
    }
}

#[derive(Debug)]
pub enum WorkerPoolError {
    WorkerJoin(tokio::task::JoinError),
}

impl std::fmt::Display for WorkerPoolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::WorkerJoin(error) => write!(f, "worker task join failed: {error}"),
        }
    }
}

impl std::error::Error for WorkerPoolError {}

impl<D, S, C, H> WorkerPool<D, S, C, H>
where
    D: Delivery,
    S: Store,
    C: Clock,
    H: Handler,
{
    pub fn new(
        handler: H, context: ProcessingContext<S, C>, queue: impl Into<Arc<str>>, config: &ConsumerConfig,
    ) -> (mpsc::Sender<D>, Self) {
        let (input_tx, input_rx) = mpsc::channel(config.queue_capacity.max(1));
        let pool = Self {
            context,
            handler: Arc::new(handler),
            queue: queue.into(),
            worker_count: config.worker_count.max(1),
            in_flight_limit: config.max_in_flight.max(1),
            input_rx: Arc::new(Mutex::new(input_rx)),
        };
        (input_tx, pool)
    }

    pub async fn run(&self) -> Result<(), WorkerPoolError> {
        let shared_rx = self.input_rx.clone();
        let semaphore = Arc::new(Semaphore::new(self.in_flight_limit));
        let local_set = LocalSet::new();

        local_set
            .run_until(async move {
                let mut workers = JoinSet::new();

                for _ in 0..self.worker_count {
                    let context = self.context.clone();
                    let handler = self.handler.clone();
                    let queue = self.queue.clone();
                    let shared_rx = shared_rx.clone();
                    let semaphore = semaphore.clone();
                    workers.spawn_local(worker_loop(context, handler, queue, shared_rx, semaphore));
                }

                while let Some(join_result) = workers.join_next().await {
                    join_result.map_err(WorkerPoolError::WorkerJoin)?;
                }

                Ok(())
            })
            .await
    }
}

async fn worker_loop<D, S, C, H>(
    context: ProcessingContext<S, C>, handler: Arc<H>, queue: Arc<str>, shared_rx: Arc<Mutex<mpsc::Receiver<D>>>,
    semaphore: Arc<Semaphore>,
) where
    D: Delivery,
    S: Store,
    C: Clock,
    H: Handler,
{
    loop {
        let next_delivery = {
            let mut input_rx = shared_rx.lock().await;
            input_rx.recv().await
        };

        let Some(delivery) = next_delivery else {
            return;
        };

        let Ok(permit) = semaphore.clone().acquire_owned().await else {
            return;
        };

        process_delivery(&context, &handler, queue.clone(), delivery).await;

        drop(permit);
    }
}

async fn process_delivery<D, S, C, H>(
    context: &ProcessingContext<S, C>, handler: &Arc<H>, queue: Arc<str>, delivery: D,
) where
    D: Delivery,
    S: Store,
    C: Clock,
    H: Handler,
{
    let mut message = Message::new(queue, delivery, handler.policy());
    let result = context.process(&mut message, handler).await;
    debug!(msg_id = %message.msg_id(), result = %result, "processed delivery");

    if result.reject() {
        if let Err(error) = message.delivery().reject(true).await {
            warn!(msg_id = %message.msg_id(), error = %error, "requeueing reject failed; broker redelivery applies");
        }
    }
}
