use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crossterm::style::{Color, Stylize};
use futures::io::{AsyncBufRead, AsyncBufReadExt};
use kube::api::LogParams;
use thiserror::Error;
use tokio::fs::File;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};

use kubescribe_k8s::PodSource;
use kubescribe_types::{Target, determine_color};

use crate::filter::LineFilter;
use crate::mask::Masker;

/// Per-tail settings shared by every session
#[derive(Clone, Debug, Default)]
pub struct TailOptions {
    /// Ask the API server to prefix each line with its timestamp
    pub timestamps: bool,
    /// Only fetch lines newer than this
    pub since: Option<Duration>,
    /// Number of historical lines to start from
    pub tail_lines: Option<i64>,
    pub filter: LineFilter,
    /// Also print surviving lines to stdout with a coloured prefix
    pub echo: bool,
    /// Include the namespace in the echoed prefix
    pub show_namespace: bool,
}

impl TailOptions {
    fn log_params(&self, container: &str) -> LogParams {
        let since_seconds = self.since.map(|d| d.as_secs() as i64).filter(|s| *s > 0);
        LogParams {
            follow: true,
            container: Some(container.to_string()),
            // The API rejects tail_lines combined with since_seconds
            tail_lines: if since_seconds.is_some() {
                None
            } else {
                self.tail_lines
            },
            since_seconds,
            timestamps: self.timestamps,
            ..Default::default()
        }
    }
}

#[derive(Debug, Error)]
pub enum TailError {
    #[error("failed to create dir {}: {source}", path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to create output {}: {source}", path.display())]
    CreateFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to open log stream: {0}")]
    OpenStream(#[from] kube::Error),

    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Directory holding a target's log file: `base/namespace[/app]/pod`
pub fn output_dir(base: &Path, target: &Target) -> PathBuf {
    let mut dir = base.join(&target.namespace);
    if let Some(app) = &target.app {
        dir.extend(app.split('/').filter(|s| !s.is_empty()));
    }
    dir.push(&target.pod);
    dir
}

/// Streams one container's logs into `<container>.log`
pub struct Tail {
    target: Target,
    dir: PathBuf,
    options: Arc<TailOptions>,
    masker: Arc<Masker>,
    colors: (Color, Color),
}

impl Tail {
    /// Prepare a tail, creating its output directory
    pub async fn new(
        masker: Arc<Masker>,
        base_dir: &Path,
        target: Target,
        options: Arc<TailOptions>,
    ) -> Result<Self, TailError> {
        let dir = output_dir(base_dir, &target);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| TailError::CreateDir {
                path: dir.clone(),
                source,
            })?;

        let colors = determine_color(&target.pod);
        Ok(Self {
            target,
            dir,
            options,
            masker,
            colors,
        })
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn output_path(&self) -> PathBuf {
        self.dir.join(format!("{}.log", self.target.container))
    }

    /// Spawn the tail. It stops when the returned handle is closed, when
    /// `parent` is cancelled, or when the log stream ends.
    pub fn start<S: PodSource>(self, parent: &CancellationToken, source: Arc<S>) -> TailHandle {
        let token = parent.child_token();
        let span = info_span!(
            "tail",
            namespace = %self.target.namespace,
            pod = %self.target.pod,
            container = %self.target.container,
        );

        let task = tokio::spawn({
            let token = token.clone();
            async move {
                match self.run(source.as_ref(), &token).await {
                    Ok(lines) => info!(lines, "tail finished"),
                    Err(err) => warn!(error = %err, "tail failed"),
                }
            }
            .instrument(span)
        });

        TailHandle { token, task }
    }

    async fn run<S: PodSource>(
        &self,
        source: &S,
        token: &CancellationToken,
    ) -> Result<u64, TailError> {
        let params = self.options.log_params(&self.target.container);
        let reader = tokio::select! {
            _ = token.cancelled() => return Ok(0),
            reader = source.container_logs(&self.target.namespace, &self.target.pod, &params) => reader?,
        };

        let path = self.output_path();
        let file = File::create(&path)
            .await
            .map_err(|source| TailError::CreateFile {
                path: path.clone(),
                source,
            })?;
        let mut writer = BufWriter::new(file);

        let copied = self.copy_lines(reader, &mut writer, token).await;
        let closed = writer.shutdown().await;

        let lines = copied.map_err(|source| TailError::Write {
            path: path.clone(),
            source,
        })?;
        closed.map_err(|source| TailError::Write { path, source })?;
        Ok(lines)
    }

    /// Copy surviving lines until the stream ends or the token fires.
    ///
    /// A read error ends the copy just like a clean end of stream. An
    /// unterminated fragment at the end of the stream is dropped.
    async fn copy_lines<R, W>(
        &self,
        mut reader: R,
        writer: &mut W,
        token: &CancellationToken,
    ) -> io::Result<u64>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut buf = Vec::new();
        let mut written = 0;

        loop {
            buf.clear();
            let read = tokio::select! {
                _ = token.cancelled() => break,
                read = reader.read_until(b'\n', &mut buf) => read,
            };

            match read {
                Ok(_) if buf.last() == Some(&b'\n') => {}
                Ok(_) => {
                    debug!("log stream ended");
                    break;
                }
                Err(err) => {
                    debug!(error = %err, "log stream closed");
                    break;
                }
            }

            let line = String::from_utf8_lossy(&buf);
            let Some(masked) = self.render(&line) else {
                continue;
            };

            writer.write_all(masked.as_bytes()).await?;
            writer.flush().await?;
            written += 1;

            if self.options.echo {
                self.echo(&masked);
            }
        }

        Ok(written)
    }

    /// Filter then mask a raw line; `None` if it is filtered out
    fn render(&self, line: &str) -> Option<String> {
        if !self.options.filter.accepts(line) {
            return None;
        }
        Some(self.masker.mask(line))
    }

    fn echo(&self, line: &str) {
        let (pod_color, container_color) = self.colors;
        let namespace = if self.options.show_namespace {
            format!("{} ", self.target.namespace)
        } else {
            String::new()
        };
        print!(
            "{}{} {} {}",
            namespace,
            self.target.pod.as_str().with(pod_color),
            self.target.container.as_str().with(container_color),
            line
        );
    }
}

/// Termination handle for a running tail
#[derive(Debug)]
pub struct TailHandle {
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl TailHandle {
    /// Signal the tail to stop. Consumes the handle, so a tail is closed at
    /// most once; await the returned task to know the file is flushed.
    pub fn close(self) -> JoinHandle<()> {
        self.token.cancel();
        self.task
    }

    /// True once the tail has stopped, for whatever reason
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
