//! Wires the watcher, tail registry, git store and HTTP surface together

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use kubescribe_k8s::{KubeClient, KubePodSource, PodWatcher};
use kubescribe_logs::{Masker, TailRegistry};
use kubescribe_store::{CliGitRunner, GitStore, ResourceDumper, SyncTrigger, Syncer};

use crate::config::Settings;
use crate::web;

/// Run until `cancel` fires, then flush every tail and stop the server
pub async fn run(settings: Settings, cancel: CancellationToken) -> Result<()> {
    let kube = KubeClient::new(settings.context.as_deref()).await?;
    let namespace = settings.watch_namespace(kube.default_namespace());
    info!(
        namespace = namespace.as_deref().unwrap_or("*"),
        selector = %settings.selector,
        "tailing logs of pods"
    );

    let work_dir = settings.ensure_work_dir()?;
    info!(dir = %work_dir.display(), "writing files to dir");

    let runner = Arc::new(CliGitRunner::new(settings.git_binary.as_str()));
    let mut git = GitStore::new(settings.git.clone(), &work_dir, runner);
    git.validate(&kube).await.context("Invalid git configuration")?;
    git.setup().await.context("Failed to set up git work directory")?;

    let dumper = ResourceDumper::new(
        kube.client(),
        namespace.clone(),
        work_dir.join(&settings.resource_path),
    );
    let syncer: Arc<dyn SyncTrigger> = Arc::new(Syncer::new(dumper, git));

    let port = settings.port;
    let server = tokio::spawn({
        let syncer = Arc::clone(&syncer);
        let cancel = cancel.clone();
        async move {
            let result = web::serve(port, syncer, cancel.clone()).await;
            if result.is_err() {
                cancel.cancel();
            }
            result
        }
    });

    let masker = Arc::new(load_masker(&kube, namespace.as_deref()).await?);

    let source = Arc::new(KubePodSource::new(kube.client(), namespace));
    let (added, removed) = match PodWatcher::new(Arc::clone(&source))
        .with_buffer(settings.event_buffer)
        .watch(&settings.selector, cancel.clone())
        .await
    {
        Ok(queues) => queues,
        Err(err) => {
            cancel.cancel();
            return Err(err).context("Failed to watch pods");
        }
    };

    let mut registry = TailRegistry::new(
        source,
        masker,
        work_dir.join(&settings.log_path),
        settings.tail,
    );
    let reconciler = tokio::spawn({
        let cancel = cancel.clone();
        async move { registry.run(added, removed, cancel).await }
    });

    if settings.no_loop {
        info!("periodic sync disabled");
    } else {
        tokio::spawn(sync_periodically(
            Arc::clone(&syncer),
            settings.poll_duration,
            cancel.clone(),
        ));
    }

    cancel.cancelled().await;
    info!("shutting down");

    if let Err(err) = reconciler.await {
        warn!(error = %err, "tail registry task failed");
    }
    server.await.context("HTTP server task failed")??;

    info!("all tails flushed");
    Ok(())
}

/// Log every word that would be masked
pub async fn mask_words(settings: &Settings) -> Result<()> {
    let kube = KubeClient::new(settings.context.as_deref()).await?;
    let namespace = settings.watch_namespace(kube.default_namespace());
    let masker = load_masker(&kube, namespace.as_deref()).await?;

    info!(
        "replacing secret words:\n{}",
        masker.words().join("\n")
    );
    Ok(())
}

async fn load_masker(kube: &KubeClient, namespace: Option<&str>) -> Result<Masker> {
    let secrets = kube.list_secrets(namespace).await?;
    let masker = Masker::from_secrets(&secrets).context("Failed to build secret masker")?;
    info!(
        secrets = secrets.len(),
        words = masker.words().len(),
        "loaded secret masks"
    );
    Ok(masker)
}

async fn sync_periodically(syncer: Arc<dyn SyncTrigger>, every: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // the first tick completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        match syncer.sync().await {
            Ok(outcome) => info!(outcome = %outcome, "periodic sync"),
            Err(err) => error!(error = %err, "periodic sync failed"),
        }
    }
}
