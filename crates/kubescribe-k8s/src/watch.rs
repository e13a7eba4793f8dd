use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use k8s_openapi::api::core::v1::{Container, ContainerStatus, Pod};
use kube::api::WatchEvent;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use kubescribe_types::{QueuedTarget, Target, TargetEvent, derive_app_path};

use crate::source::{PodEventStream, PodSource};

/// Default capacity of the added/removed queues
pub const DEFAULT_EVENT_BUFFER: usize = 64;

/// Pause before re-establishing a watch that ended or failed
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("failed to set up watch")]
    Setup(#[from] kube::Error),
}

/// Decides which pods and containers get tailed
pub trait PodMatcher: Send + Sync + 'static {
    fn matches_pod(&self, _pod: &Pod) -> bool {
        true
    }

    /// Checked against container statuses on Added/Modified
    fn matches_container_status(&self, _pod: &Pod, _status: &ContainerStatus) -> bool {
        true
    }

    /// Checked against pod spec containers on Deleted
    fn matches_container(&self, _pod: &Pod, _container: &Container) -> bool {
        true
    }
}

/// Tails every container of every pod
pub struct MatchAll;

impl PodMatcher for MatchAll {}

/// Translates pod watch notifications into added/removed tail targets
pub struct PodWatcher<S> {
    source: Arc<S>,
    matcher: Arc<dyn PodMatcher>,
    buffer: usize,
    retry_delay: Duration,
}

impl<S: PodSource> PodWatcher<S> {
    pub fn new(source: Arc<S>) -> Self {
        Self {
            source,
            matcher: Arc::new(MatchAll),
            buffer: DEFAULT_EVENT_BUFFER,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }

    pub fn with_matcher(mut self, matcher: Arc<dyn PodMatcher>) -> Self {
        self.matcher = matcher;
        self
    }

    /// Bound on each queue; a full queue blocks the watcher
    pub fn with_buffer(mut self, buffer: usize) -> Self {
        self.buffer = buffer.max(1);
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Start watching pods.
    ///
    /// Returns the added and removed queues. Every queued target carries a
    /// sequence number that increases across both queues in event order.
    /// Only a failure to establish the initial watch is reported; later stream
    /// failures re-establish the watch. Cancelling the token stops the watch
    /// and closes both queues.
    pub async fn watch(
        &self,
        label_selector: &str,
        cancel: CancellationToken,
    ) -> Result<(mpsc::Receiver<QueuedTarget>, mpsc::Receiver<QueuedTarget>), WatchError> {
        let stream = self.source.watch_pods(label_selector).await?;

        let (added_tx, added_rx) = mpsc::channel(self.buffer);
        let (removed_tx, removed_rx) = mpsc::channel(self.buffer);

        let task = WatchTask {
            source: Arc::clone(&self.source),
            matcher: Arc::clone(&self.matcher),
            label_selector: label_selector.to_string(),
            added: added_tx,
            removed: removed_tx,
            cancel,
            retry_delay: self.retry_delay,
            next_seq: 0,
        };
        tokio::spawn(task.run(stream));

        Ok((added_rx, removed_rx))
    }
}

/// Classify one watch notification into target events.
///
/// Added/Modified pods yield one Added per container status, since only
/// containers with a status have logs. Deleted pods carry no useful statuses,
/// so Removed events come from the pod spec containers.
pub fn classify(matcher: &dyn PodMatcher, event: &WatchEvent<Pod>) -> Vec<TargetEvent> {
    let pod = match event {
        WatchEvent::Added(pod) | WatchEvent::Modified(pod) | WatchEvent::Deleted(pod) => pod,
        WatchEvent::Bookmark(_) | WatchEvent::Error(_) => return Vec::new(),
    };

    let Some(pod_name) = pod.metadata.name.as_deref() else {
        return Vec::new();
    };
    if !matcher.matches_pod(pod) {
        return Vec::new();
    }

    let namespace = pod.metadata.namespace.as_deref().unwrap_or_default();
    let app = pod.metadata.labels.as_ref().and_then(derive_app_path);
    let target = |container: &str| Target::new(namespace, pod_name, container, app.clone());

    match event {
        WatchEvent::Deleted(_) => {
            let Some(spec) = &pod.spec else {
                return Vec::new();
            };
            spec.containers
                .iter()
                .chain(spec.init_containers.iter().flatten())
                .filter(|c| matcher.matches_container(pod, c))
                .map(|c| TargetEvent::Removed(target(&c.name)))
                .collect()
        }
        _ => {
            let Some(status) = &pod.status else {
                return Vec::new();
            };
            status
                .init_container_statuses
                .iter()
                .flatten()
                .chain(status.container_statuses.iter().flatten())
                .filter(|cs| matcher.matches_container_status(pod, cs))
                .map(|cs| TargetEvent::Added(target(&cs.name)))
                .collect()
        }
    }
}

struct WatchTask<S> {
    source: Arc<S>,
    matcher: Arc<dyn PodMatcher>,
    label_selector: String,
    added: mpsc::Sender<QueuedTarget>,
    removed: mpsc::Sender<QueuedTarget>,
    cancel: CancellationToken,
    retry_delay: Duration,
    next_seq: u64,
}

impl<S: PodSource> WatchTask<S> {
    async fn run(mut self, mut stream: PodEventStream) {
        'watch: loop {
            let next = tokio::select! {
                _ = self.cancel.cancelled() => break,
                next = stream.next() => next,
            };

            match next {
                Some(Ok(WatchEvent::Error(err))) => {
                    warn!(error = %err, "pod watch returned an error, restarting");
                }
                Some(Ok(event)) => {
                    for classified in classify(self.matcher.as_ref(), &event) {
                        if !self.emit(classified).await {
                            break 'watch;
                        }
                    }
                    continue;
                }
                Some(Err(err)) => {
                    warn!(error = %err, "pod watch stream failed, restarting");
                }
                None => {
                    debug!("pod watch stream ended, restarting");
                }
            }

            match self.rewatch().await {
                Some(next_stream) => stream = next_stream,
                None => break,
            }
        }

        // Dropping the senders closes both queues
        info!("pod watch stopped");
    }

    /// Send one event, blocking on a full queue. False once cancelled or
    /// nobody is listening any more.
    async fn emit(&mut self, event: TargetEvent) -> bool {
        let seq = self.next_seq;
        self.next_seq += 1;

        let (queue, target) = match event {
            TargetEvent::Added(t) => (&self.added, t),
            TargetEvent::Removed(t) => (&self.removed, t),
        };
        let target = QueuedTarget::new(seq, target);

        tokio::select! {
            _ = self.cancel.cancelled() => false,
            sent = queue.send(target) => sent.is_ok(),
        }
    }

    async fn rewatch(&self) -> Option<PodEventStream> {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return None,
                _ = tokio::time::sleep(self.retry_delay) => {}
            }

            let result = tokio::select! {
                _ = self.cancel.cancelled() => return None,
                result = self.source.watch_pods(&self.label_selector) => result,
            };

            match result {
                Ok(stream) => {
                    info!("re-established pod watch");
                    return Some(stream);
                }
                Err(err) => warn!(error = %err, "failed to re-establish pod watch"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::LogReader;
    use async_trait::async_trait;
    use futures::channel::mpsc as fmpsc;
    use k8s_openapi::api::core::v1::{PodSpec, PodStatus};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use kube::api::LogParams;
    use kube::core::ErrorResponse;
    use std::collections::{BTreeMap, VecDeque};
    use std::sync::Mutex;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(5);

    fn pod(name: &str, labels: &[(&str, &str)], spec: &[&str], statuses: &[&str]) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("jx".to_string()),
                labels: Some(
                    labels
                        .iter()
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect::<BTreeMap<_, _>>(),
                ),
                ..Default::default()
            },
            spec: Some(PodSpec {
                containers: spec
                    .iter()
                    .map(|c| Container {
                        name: c.to_string(),
                        ..Default::default()
                    })
                    .collect(),
                init_containers: Some(vec![Container {
                    name: "init".to_string(),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            status: Some(PodStatus {
                container_statuses: Some(
                    statuses
                        .iter()
                        .map(|c| ContainerStatus {
                            name: c.to_string(),
                            ..Default::default()
                        })
                        .collect(),
                ),
                ..Default::default()
            }),
        }
    }

    fn forbidden() -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: "pods is forbidden".to_string(),
            reason: "Forbidden".to_string(),
            code: 403,
        })
    }

    type EventSender = fmpsc::UnboundedSender<kube::Result<WatchEvent<Pod>>>;

    /// Hands out pre-arranged watch results in order
    #[derive(Default)]
    struct FakeSource {
        watches: Mutex<VecDeque<kube::Result<PodEventStream>>>,
    }

    impl FakeSource {
        fn push_live(&self) -> EventSender {
            let (tx, rx) = fmpsc::unbounded();
            self.watches.lock().unwrap().push_back(Ok(rx.boxed()));
            tx
        }

        fn push_error(&self) {
            self.watches.lock().unwrap().push_back(Err(forbidden()));
        }
    }

    #[async_trait]
    impl PodSource for FakeSource {
        async fn watch_pods(&self, _label_selector: &str) -> kube::Result<PodEventStream> {
            self.watches
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(forbidden()))
        }

        async fn container_logs(
            &self,
            _namespace: &str,
            _pod: &str,
            _params: &LogParams,
        ) -> kube::Result<LogReader> {
            Err(forbidden())
        }
    }

    #[test]
    fn test_added_uses_statuses() {
        let p = pod("p1", &[("app", "web")], &["c1", "c2"], &["c1"]);
        let events = classify(&MatchAll, &WatchEvent::Added(p));
        assert_eq!(
            events,
            vec![TargetEvent::Added(Target::new(
                "jx",
                "p1",
                "c1",
                Some("web".to_string())
            ))]
        );
    }

    #[test]
    fn test_deleted_uses_pod_spec() {
        let p = pod("p1", &[], &["c1", "c2"], &[]);
        let events = classify(&MatchAll, &WatchEvent::Deleted(p));
        let containers: Vec<_> = events
            .iter()
            .map(|e| {
                assert!(matches!(e, TargetEvent::Removed(_)));
                e.target().container.as_str()
            })
            .collect();
        assert_eq!(containers, vec!["c1", "c2", "init"]);
    }

    #[test]
    fn test_matcher_filters_containers() {
        struct SkipSidecars;
        impl PodMatcher for SkipSidecars {
            fn matches_container_status(&self, _pod: &Pod, status: &ContainerStatus) -> bool {
                status.name != "istio-proxy"
            }
        }

        let p = pod("p1", &[], &[], &["app", "istio-proxy"]);
        let events = classify(&SkipSidecars, &WatchEvent::Modified(p));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].target().container, "app");
    }

    #[tokio::test]
    async fn test_watch_setup_failure() {
        let source = Arc::new(FakeSource::default());
        source.push_error();

        let result = PodWatcher::new(source)
            .watch("", CancellationToken::new())
            .await;
        assert!(matches!(result, Err(WatchError::Setup(_))));
    }

    #[tokio::test]
    async fn test_watch_emits_and_closes_on_cancel() {
        let source = Arc::new(FakeSource::default());
        let events = source.push_live();
        let cancel = CancellationToken::new();

        let (mut added, mut removed) = PodWatcher::new(source)
            .watch("", cancel.clone())
            .await
            .unwrap();

        events
            .unbounded_send(Ok(WatchEvent::Added(pod("p1", &[], &["c1"], &["c1"]))))
            .unwrap();
        events
            .unbounded_send(Ok(WatchEvent::Deleted(pod("p1", &[], &["c1"], &[]))))
            .unwrap();

        let a = timeout(WAIT, added.recv()).await.unwrap().unwrap();
        assert_eq!(a.target.id().to_string(), "jx/p1/c1");

        let mut gone = Vec::new();
        for _ in 0..2 {
            let r = timeout(WAIT, removed.recv()).await.unwrap().unwrap();
            assert!(r.seq > a.seq);
            gone.push(r.target.container);
        }
        assert_eq!(gone, vec!["c1", "init"]);

        cancel.cancel();
        assert!(timeout(WAIT, added.recv()).await.unwrap().is_none());
        assert!(timeout(WAIT, removed.recv()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_watch_restarts_after_stream_end() {
        let source = Arc::new(FakeSource::default());
        let first = source.push_live();
        let second = source.push_live();
        let cancel = CancellationToken::new();

        let (mut added, _removed) = PodWatcher::new(source)
            .with_retry_delay(Duration::from_millis(10))
            .watch("", cancel.clone())
            .await
            .unwrap();

        first
            .unbounded_send(Ok(WatchEvent::Added(pod("p1", &[], &[], &["c1"]))))
            .unwrap();
        drop(first);
        second
            .unbounded_send(Ok(WatchEvent::Added(pod("p2", &[], &[], &["c1"]))))
            .unwrap();

        let first = timeout(WAIT, added.recv()).await.unwrap().unwrap();
        let second = timeout(WAIT, added.recv()).await.unwrap().unwrap();
        assert_eq!(first.target.pod, "p1");
        assert_eq!(second.target.pod, "p2");
        assert!(second.seq > first.seq);
        cancel.cancel();
    }
}
