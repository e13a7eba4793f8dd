//! In-memory cluster fakes shared by the unit tests

use std::collections::HashMap;
use std::io;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use futures::TryStreamExt;
use futures::channel::mpsc;
use k8s_openapi::api::core::v1::{Container, ContainerStatus, Pod, PodSpec, PodStatus};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{LogParams, WatchEvent};
use kube::core::ErrorResponse;

use kubescribe_k8s::{LogReader, PodEventStream, PodSource};

pub(crate) type LineSender = mpsc::UnboundedSender<io::Result<Vec<u8>>>;
pub(crate) type EventSender = mpsc::UnboundedSender<kube::Result<WatchEvent<Pod>>>;

enum FakeLog {
    Static(Vec<u8>),
    Live(mpsc::UnboundedReceiver<io::Result<Vec<u8>>>),
}

/// Serves scripted log streams, each at most once
#[derive(Default)]
pub(crate) struct FakeSource {
    logs: Mutex<HashMap<String, FakeLog>>,
    opened: Mutex<HashMap<String, usize>>,
    watch: Mutex<Option<PodEventStream>>,
}

fn key(namespace: &str, pod: &str, container: &str) -> String {
    format!("{namespace}/{pod}/{container}")
}

impl FakeSource {
    /// A log that yields these lines then ends
    pub fn with_lines(&self, namespace: &str, pod: &str, container: &str, lines: &[&str]) {
        self.logs.lock().unwrap().insert(
            key(namespace, pod, container),
            FakeLog::Static(lines.concat().into_bytes()),
        );
    }

    /// A log that stays open until the sender is dropped
    pub fn live(&self, namespace: &str, pod: &str, container: &str) -> LineSender {
        let (tx, rx) = mpsc::unbounded();
        self.logs
            .lock()
            .unwrap()
            .insert(key(namespace, pod, container), FakeLog::Live(rx));
        tx
    }

    /// The next `watch_pods` call returns a stream fed by the sender
    pub fn live_watch(&self) -> EventSender {
        let (tx, rx) = mpsc::unbounded();
        *self.watch.lock().unwrap() = Some(rx.boxed());
        tx
    }

    /// How many times a container's log stream was requested
    pub fn opened(&self, namespace: &str, pod: &str, container: &str) -> usize {
        self.opened
            .lock()
            .unwrap()
            .get(&key(namespace, pod, container))
            .copied()
            .unwrap_or(0)
    }
}

fn not_found(what: &str) -> kube::Error {
    kube::Error::Api(ErrorResponse {
        status: "Failure".to_string(),
        message: format!("{what} not found"),
        reason: "NotFound".to_string(),
        code: 404,
    })
}

#[async_trait]
impl PodSource for FakeSource {
    async fn watch_pods(&self, _label_selector: &str) -> kube::Result<PodEventStream> {
        self.watch
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| not_found("watch"))
    }

    async fn container_logs(
        &self,
        namespace: &str,
        pod: &str,
        params: &LogParams,
    ) -> kube::Result<LogReader> {
        let container = params.container.as_deref().unwrap_or_default();
        let key = key(namespace, pod, container);
        *self.opened.lock().unwrap().entry(key.clone()).or_default() += 1;

        match self.logs.lock().unwrap().remove(&key) {
            Some(FakeLog::Static(bytes)) => Ok(Box::pin(futures::io::Cursor::new(bytes))),
            Some(FakeLog::Live(rx)) => Ok(Box::pin(rx.into_async_read())),
            None => Err(not_found(&key)),
        }
    }
}

/// A running pod in namespace `jx` with a status for each pod spec container
pub(crate) fn pod(name: &str, containers: &[&str]) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some("jx".to_string()),
            ..Default::default()
        },
        spec: Some(PodSpec {
            containers: containers
                .iter()
                .map(|c| Container {
                    name: c.to_string(),
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        }),
        status: Some(PodStatus {
            container_statuses: Some(
                containers
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

/// Read a log file as newline-terminated lines; empty if it does not exist
pub(crate) fn read_lines(path: &Path) -> Vec<String> {
    std::fs::read_to_string(path)
        .map(|s| s.split_inclusive('\n').map(str::to_string).collect())
        .unwrap_or_default()
}

/// Poll a condition until it holds, failing the test after five seconds
pub(crate) async fn wait_for(mut cond: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met in time"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
