//! Worker pool draining a `WorkQueue`, plus the pump feeding it from watch triggers.

use std::fmt::Display;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use metrics::{counter, gauge, histogram};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::WorkQueue;

/// What the queue should do with a key after a successful pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requeue {
    After(Duration),
    Done,
}

/// Errors tell the pool whether retrying can help.
pub trait ErrorClass {
    /// Terminal errors drop the key instead of backing off.
    fn is_terminal(&self) -> bool;
}

#[async_trait::async_trait]
pub trait Handler<K>: Send + Sync {
    type Error: ErrorClass + Display + Send;

    async fn handle(&self, key: &K, cancel: CancellationToken) -> Result<Requeue, Self::Error>;
}

/// Spawn `n` workers. They exit when `cancel` fires or the queue shuts down.
pub fn spawn_workers<K, H>(queue: Arc<WorkQueue<K>>, n: usize, handler: Arc<H>, cancel: CancellationToken) -> Vec<JoinHandle<()>>
where
    K: Eq + Hash + Clone + Display + Send + Sync + 'static,
    H: Handler<K> + 'static,
{
    (0..n.max(1))
        .map(|id| tokio::spawn(run_worker(id, Arc::clone(&queue), Arc::clone(&handler), cancel.clone())))
        .collect()
}

async fn run_worker<K, H>(id: usize, queue: Arc<WorkQueue<K>>, handler: Arc<H>, cancel: CancellationToken)
where
    K: Eq + Hash + Clone + Display + Send + Sync + 'static,
    H: Handler<K> + 'static,
{
    debug!(worker = id, "worker started");
    loop {
        let key = tokio::select! {
            _ = cancel.cancelled() => break,
            next = queue.next() => match next {
                Some(k) => k,
                None => break,
            },
        };
        let t0 = Instant::now();
        let res = handler.handle(&key, cancel.child_token()).await;
        histogram!("handler_latency_ms", t0.elapsed().as_secs_f64() * 1000.0);
        match res {
            Ok(Requeue::After(delay)) => {
                queue.forget(&key);
                queue.add_after(key.clone(), delay);
            }
            Ok(Requeue::Done) => queue.forget(&key),
            Err(e) if e.is_terminal() => {
                queue.forget(&key);
                info!(worker = id, key = %key, error = %e, "dropping key");
            }
            Err(e) => {
                counter!("handler_retries_total", 1u64);
                let delay = queue.backoff(key.clone());
                warn!(worker = id, key = %key, error = %e, retry_in_ms = delay.as_millis() as u64, "pass failed; backing off");
            }
        }
        queue.done(&key);
        gauge!("queue_depth", queue.len() as f64);
    }
    debug!(worker = id, "worker stopped");
}

/// Forward watch triggers into the queue until the sender side closes.
pub fn spawn_trigger_pump<K>(mut rx: mpsc::Receiver<K>, queue: Arc<WorkQueue<K>>) -> JoinHandle<()>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    tokio::spawn(async move {
        while let Some(key) = rx.recv().await {
            queue.add(key);
            gauge!("queue_depth", queue.len() as f64);
        }
        debug!("trigger channel closed; pump exiting");
    })
}
