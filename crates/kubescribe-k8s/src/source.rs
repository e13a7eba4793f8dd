use std::pin::Pin;

use async_trait::async_trait;
use futures::io::AsyncBufRead;
use futures::stream::{BoxStream, StreamExt};
use k8s_openapi::api::core::v1::Pod;
use kube::Api;
use kube::api::{LogParams, WatchEvent, WatchParams};

/// Stream of raw pod lifecycle notifications
pub type PodEventStream = BoxStream<'static, kube::Result<WatchEvent<Pod>>>;

/// Follow-mode byte stream of one container's log output
pub type LogReader = Pin<Box<dyn AsyncBufRead + Send>>;

/// The two cluster capabilities the tailing engine needs
#[async_trait]
pub trait PodSource: Send + Sync + 'static {
    /// Establish a watch over pods matching a label selector
    async fn watch_pods(&self, label_selector: &str) -> kube::Result<PodEventStream>;

    /// Open a log stream for a container
    async fn container_logs(
        &self,
        namespace: &str,
        pod: &str,
        params: &LogParams,
    ) -> kube::Result<LogReader>;
}

/// [`PodSource`] backed by the Kubernetes API
#[derive(Clone)]
pub struct KubePodSource {
    client: kube::Client,
    /// `None` watches every namespace
    namespace: Option<String>,
}

impl KubePodSource {
    pub fn new(client: kube::Client, namespace: Option<String>) -> Self {
        Self { client, namespace }
    }

    fn pods(&self) -> Api<Pod> {
        match &self.namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        }
    }
}

#[async_trait]
impl PodSource for KubePodSource {
    async fn watch_pods(&self, label_selector: &str) -> kube::Result<PodEventStream> {
        let mut params = WatchParams::default();
        if !label_selector.is_empty() {
            params = params.labels(label_selector);
        }

        // "0" starts from any cached version, so existing pods arrive as Added
        let stream = self.pods().watch(&params, "0").await?;
        Ok(stream.boxed())
    }

    async fn container_logs(
        &self,
        namespace: &str,
        pod: &str,
        params: &LogParams,
    ) -> kube::Result<LogReader> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let stream = pods.log_stream(pod, params).await?;
        Ok(Box::pin(stream))
    }
}
