//! Persistence for kubescribe
//!
//! Collected logs live in a git worktree. This crate bootstraps that
//! worktree, snapshots cluster resources into it, and commits and pushes the
//! result on every sync.

mod error;
mod git;
mod resources;

pub use error::StoreError;
pub use git::{CliGitRunner, GitOptions, GitRunner, GitStore};
pub use resources::{DEFAULT_RESOURCES, ResourceDumper, ResourceKind, object_path, write_object};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::info;

/// Something that can persist the current state on demand
#[async_trait]
pub trait SyncTrigger: Send + Sync + 'static {
    /// Run one sync, returning a short human-readable outcome
    async fn sync(&self) -> Result<String, StoreError>;
}

/// Dumps resources then commits and pushes the work directory
pub struct Syncer {
    dumper: ResourceDumper,
    git: GitStore,
    /// Periodic and HTTP-triggered syncs must not interleave git commands
    lock: Mutex<()>,
}

impl Syncer {
    pub fn new(dumper: ResourceDumper, git: GitStore) -> Self {
        Self {
            dumper,
            git,
            lock: Mutex::new(()),
        }
    }
}

#[async_trait]
impl SyncTrigger for Syncer {
    async fn sync(&self) -> Result<String, StoreError> {
        let _guard = self.lock.lock().await;

        self.dumper.dump().await?;
        let outcome = self.git.sync().await?;
        info!(outcome = %outcome, dir = %self.git.dir().display(), "sync finished");
        Ok(outcome)
    }
}
