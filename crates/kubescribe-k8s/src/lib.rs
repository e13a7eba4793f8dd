//! Kubernetes integration for kubescribe
//!
//! This crate provides cluster access: client construction, the [`PodSource`]
//! abstraction over pod watches and container log streams, and the
//! [`PodWatcher`] that classifies pod lifecycle events into tail targets.

mod client;
mod source;
mod watch;

pub use client::KubeClient;
pub use source::{KubePodSource, LogReader, PodEventStream, PodSource};
pub use watch::{DEFAULT_EVENT_BUFFER, MatchAll, PodMatcher, PodWatcher, WatchError, classify};

// Re-export types that are used in our public API
pub use kube::api::{LogParams, WatchEvent};
pub use kubescribe_types::{QueuedTarget, Target, TargetEvent, TargetId};
