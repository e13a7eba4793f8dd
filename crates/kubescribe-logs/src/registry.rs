use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use kubescribe_k8s::PodSource;
use kubescribe_types::{QueuedTarget, Target, TargetId};

use crate::mask::Masker;
use crate::tail::{Tail, TailHandle, TailOptions};

/// The single owner of the target -> tail mapping.
///
/// All mutation happens on the task driving [`TailRegistry::run`], which
/// consumes the added and removed queues in one loop, so no locking is needed.
pub struct TailRegistry<S> {
    source: Arc<S>,
    masker: Arc<Masker>,
    base_dir: PathBuf,
    options: Arc<TailOptions>,
    tails: HashMap<TargetId, TailHandle>,
    /// Tails that were told to stop but may still be flushing
    closing: Vec<JoinHandle<()>>,
}

impl<S: PodSource> TailRegistry<S> {
    pub fn new(
        source: Arc<S>,
        masker: Arc<Masker>,
        base_dir: impl Into<PathBuf>,
        options: TailOptions,
    ) -> Self {
        Self {
            source,
            masker,
            base_dir: base_dir.into(),
            options: Arc::new(options),
            tails: HashMap::new(),
            closing: Vec::new(),
        }
    }

    /// Reconcile until cancelled or both queues close, then stop every tail
    /// and wait for their files to be flushed.
    ///
    /// The two queues are merged by sequence number, so events for a target
    /// are applied in the order the watch produced them: a Remove followed by
    /// an Add for a recreated pod leaves a fresh tail running.
    pub async fn run(
        &mut self,
        mut added: mpsc::Receiver<QueuedTarget>,
        mut removed: mpsc::Receiver<QueuedTarget>,
        cancel: CancellationToken,
    ) {
        info!("tail registry started");
        let mut added_open = true;
        let mut removed_open = true;
        let mut next_added: Option<QueuedTarget> = None;
        let mut next_removed: Option<QueuedTarget> = None;

        loop {
            if cancel.is_cancelled() {
                break;
            }

            // Events are sent in sequence order, so once one queue yields an
            // event every earlier event is already waiting in the other.
            fill(&mut next_added, &mut added, &mut added_open);
            fill(&mut next_removed, &mut removed, &mut removed_open);

            let heads = (
                next_added.as_ref().map(|q| q.seq),
                next_removed.as_ref().map(|q| q.seq),
            );
            let take_added = match heads {
                (Some(a), Some(r)) => a < r,
                (Some(_), None) => true,
                (None, Some(_)) => false,
                (None, None) => {
                    if !added_open && !removed_open {
                        break;
                    }
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break,
                        next = added.recv(), if added_open => match next {
                            Some(queued) => next_added = Some(queued),
                            None => added_open = false,
                        },
                        next = removed.recv(), if removed_open => match next {
                            Some(queued) => next_removed = Some(queued),
                            None => removed_open = false,
                        },
                    }
                    continue;
                }
            };

            if take_added {
                if let Some(queued) = next_added.take() {
                    self.add(queued.target, &cancel).await;
                }
            } else if let Some(queued) = next_removed.take() {
                self.remove(&queued.target);
            }
        }

        self.shutdown().await;
    }

    /// Start tailing a target unless it already has a tail.
    /// Returns true if a new tail was started.
    pub async fn add(&mut self, target: Target, cancel: &CancellationToken) -> bool {
        self.reap();

        let id = target.id();
        if cancel.is_cancelled() {
            debug!(tail = %id, "shutting down, not starting tail");
            return false;
        }
        if self.tails.contains_key(&id) {
            debug!(tail = %id, "already tailing");
            return false;
        }

        match Tail::new(
            Arc::clone(&self.masker),
            &self.base_dir,
            target,
            Arc::clone(&self.options),
        )
        .await
        {
            Ok(tail) => {
                info!(tail = %id, path = %tail.output_path().display(), "tailing container");
                let handle = tail.start(cancel, Arc::clone(&self.source));
                self.tails.insert(id, handle);
                true
            }
            Err(err) => {
                error!(tail = %id, error = %err, "failed to create tail");
                false
            }
        }
    }

    /// Stop tailing a target. Returns false if it was not being tailed.
    pub fn remove(&mut self, target: &Target) -> bool {
        self.reap();

        let id = target.id();
        match self.tails.remove(&id) {
            Some(handle) => {
                info!(tail = %id, "stopping tail");
                self.closing.push(handle.close());
                true
            }
            None => {
                debug!(tail = %id, "no tail to stop");
                false
            }
        }
    }

    /// Stop every tail and wait until all of them have flushed and closed
    pub async fn shutdown(&mut self) {
        let live = self.tails.drain().map(|(_, handle)| handle.close());
        let tasks: Vec<_> = self.closing.drain(..).chain(live).collect();
        let count = tasks.len();

        for result in join_all(tasks).await {
            if let Err(err) = result {
                warn!(error = %err, "tail task failed");
            }
        }
        info!(count, "all tails closed");
    }

    pub fn contains(&self, id: &TargetId) -> bool {
        self.tails.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.tails.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tails.is_empty()
    }

    fn reap(&mut self) {
        self.closing.retain(|task| !task.is_finished());
    }
}

/// Take the next waiting event into an empty slot without blocking
fn fill(
    slot: &mut Option<QueuedTarget>,
    queue: &mut mpsc::Receiver<QueuedTarget>,
    open: &mut bool,
) {
    if slot.is_some() || !*open {
        return;
    }
    match queue.try_recv() {
        Ok(queued) => *slot = Some(queued),
        Err(TryRecvError::Empty) => {}
        Err(TryRecvError::Disconnected) => *open = false,
    }
}
