//! Classifier Pool - partitioned workers behind the `Transport` seam.
//!
//! Each entity id hashes to exactly one worker, and each worker drains its
//! queue one job at a time. That serializes classification per entity while
//! different entities proceed in parallel, without any global lock. Events
//! for one entity are classified in the order their sends were enqueued.
//!
//! ```text
//!                    ┌──────────► worker 0 ──┐
//! send(id, bytes) ── hash(id) ──► worker 1 ──┼──► RecordStore
//!                    └──────────► worker k ──┘
//! ```

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use geotrack_env::{EntityId, EnvError, Transport};
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::classifier::AlertClassifier;
use crate::error::ClassificationError;
use crate::record::UpdateDirective;
use crate::store::RecordStore;

/// Configuration for the worker pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Number of worker tasks (partitions)
    pub workers: usize,

    /// Bounded queue depth per worker
    pub queue_depth: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: 8,
            queue_depth: 256,
        }
    }
}

struct Job {
    target: EntityId,
    payload: Vec<u8>,
    reply: oneshot::Sender<()>,
}

/// Counters shared by all workers.
#[derive(Debug, Default)]
pub struct PoolStats {
    /// Events whose classification was committed
    pub committed: AtomicU64,

    /// Events isolated as classification failures
    pub failed: AtomicU64,
}

/// A fixed set of classifier workers, one queue each.
pub struct ClassifierPool<S: RecordStore> {
    senders: Vec<mpsc::Sender<Job>>,
    store: Arc<S>,
    stats: Arc<PoolStats>,
}

impl<S: RecordStore> ClassifierPool<S> {
    /// Spawns the workers on the current tokio runtime.
    pub fn spawn(store: Arc<S>, classifier: AlertClassifier, config: PoolConfig) -> Self {
        let stats = Arc::new(PoolStats::default());
        let senders = (0..config.workers.max(1))
            .map(|worker| {
                let (tx, rx) = mpsc::channel(config.queue_depth.max(1));
                tokio::spawn(worker_loop(
                    worker,
                    rx,
                    Arc::clone(&store),
                    classifier.clone(),
                    Arc::clone(&stats),
                ));
                tx
            })
            .collect();

        Self { senders, store, stats }
    }

    /// The store the workers commit to.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn stats(&self) -> &PoolStats {
        &self.stats
    }

    pub fn worker_count(&self) -> usize {
        self.senders.len()
    }

    /// Partition that owns an entity id.
    pub fn worker_for(&self, id: &EntityId) -> usize {
        let mut hasher = DefaultHasher::new();
        id.hash(&mut hasher);
        (hasher.finish() % self.senders.len() as u64) as usize
    }
}

async fn worker_loop<S: RecordStore>(
    worker: usize,
    mut rx: mpsc::Receiver<Job>,
    store: Arc<S>,
    classifier: AlertClassifier,
    stats: Arc<PoolStats>,
) {
    while let Some(job) = rx.recv().await {
        match classify(store.as_ref(), &classifier, &job.target, &job.payload) {
            Ok(UpdateDirective::NoUpdate) => {
                stats.failed.fetch_add(1, Ordering::Relaxed);
            }
            Ok(_) => {
                stats.committed.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                classifier.report(&job.target, &e);
                stats.failed.fetch_add(1, Ordering::Relaxed);
            }
        }
        let _ = job.reply.send(());
    }
    debug!("classifier worker {} stopped", worker);
}

fn classify<S: RecordStore>(
    store: &S,
    classifier: &AlertClassifier,
    target: &EntityId,
    payload: &[u8],
) -> Result<UpdateDirective, ClassificationError> {
    let record = store.load_or_create(target)?;
    let (updated, directive) = classifier.apply_payload(target, &record, payload);
    store.commit(target, updated, directive)?;
    Ok(directive)
}

#[async_trait]
impl<S: RecordStore> Transport for ClassifierPool<S> {
    async fn send(&self, target: EntityId, payload: Vec<u8>, timeout: Duration) -> Result<(), EnvError> {
        let worker = &self.senders[self.worker_for(&target)];
        let (reply, done) = oneshot::channel();
        let job = Job { target, payload, reply };

        let delivery = async {
            worker
                .send(job)
                .await
                .map_err(|_| EnvError::lost("classifier worker stopped"))?;
            done.await
                .map_err(|_| EnvError::lost("classifier worker dropped the event"))
        };

        tokio::time::timeout(timeout, delivery)
            .await
            .map_err(|_| EnvError::timeout(timeout))?
    }
}
