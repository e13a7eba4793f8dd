use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use tokio::process::Command;
use tracing::{debug, info};
use url::Url;

use kubescribe_k8s::KubeClient;

use crate::error::StoreError;

pub const DEFAULT_BRANCH: &str = "gh-pages";
pub const DEFAULT_JX_NAMESPACE: &str = "jx";
pub const DEFAULT_SECRET_NAME: &str = "jx-boot";
pub const COMMIT_MESSAGE: &str = "chore: latest logs";

/// Runs git commands; swapped out in tests
#[async_trait]
pub trait GitRunner: Send + Sync {
    /// Run `git <args>` in `dir`, returning trimmed stdout
    async fn run(&self, dir: &Path, args: &[&str]) -> Result<String, StoreError>;
}

/// [`GitRunner`] that shells out to the git binary
pub struct CliGitRunner {
    binary: String,
}

impl CliGitRunner {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

#[async_trait]
impl GitRunner for CliGitRunner {
    async fn run(&self, dir: &Path, args: &[&str]) -> Result<String, StoreError> {
        debug!(dir = %dir.display(), args = %redact_credentials(&args.join(" ")), "running git");

        let output = Command::new(&self.binary)
            .args(args)
            .current_dir(dir)
            .output()
            .await
            .map_err(|source| StoreError::Spawn {
                binary: self.binary.clone(),
                source,
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(StoreError::Git {
                args: redact_credentials(&args.join(" ")),
                output: redact_credentials(format!("{} {}", stdout, stderr.trim()).trim()),
            });
        }
        Ok(stdout)
    }
}

/// Replace the userinfo of any URL in `text` with `***`
fn redact_credentials(text: &str) -> String {
    text.split(' ')
        .map(|word| {
            let Some((scheme, rest)) = word.split_once("://") else {
                return word.to_string();
            };
            let host_end = rest.find('/').unwrap_or(rest.len());
            match rest[..host_end].rfind('@') {
                Some(at) => format!("{scheme}://***@{}", &rest[at + 1..]),
                None => word.to_string(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Where and how logs are stored in git
#[derive(Clone)]
pub struct GitOptions {
    /// Repository URL; read from the boot secret when unset
    pub url: Option<String>,
    pub username: Option<String>,
    pub token: Option<String>,
    /// Branch holding logs and resources
    pub branch: String,
    /// Namespace of the boot secret
    pub jx_namespace: String,
    /// Boot secret providing url/username/password when not set explicitly
    pub secret_name: String,
}

impl Default for GitOptions {
    fn default() -> Self {
        Self {
            url: None,
            username: None,
            token: None,
            branch: DEFAULT_BRANCH.to_string(),
            jx_namespace: DEFAULT_JX_NAMESPACE.to_string(),
            secret_name: DEFAULT_SECRET_NAME.to_string(),
        }
    }
}

impl fmt::Debug for GitOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GitOptions")
            .field("url", &self.url)
            .field("username", &self.username)
            .field("token", &self.token.as_ref().map(|_| "***"))
            .field("branch", &self.branch)
            .field("jx_namespace", &self.jx_namespace)
            .field("secret_name", &self.secret_name)
            .finish()
    }
}

/// A git clone whose worktree is the kubescribe work directory
pub struct GitStore {
    options: GitOptions,
    dir: PathBuf,
    runner: Arc<dyn GitRunner>,
}

impl GitStore {
    pub fn new(options: GitOptions, dir: impl Into<PathBuf>, runner: Arc<dyn GitRunner>) -> Self {
        Self {
            options,
            dir: dir.into(),
            runner,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn options(&self) -> &GitOptions {
        &self.options
    }

    /// Fill in any missing url/username/token from the boot secret
    pub async fn validate(&mut self, kube: &KubeClient) -> Result<(), StoreError> {
        if self.is_configured() {
            return Ok(());
        }

        let name = self.options.secret_name.clone();
        let namespace = self.options.jx_namespace.clone();
        let secret = kube
            .get_secret(&namespace, &name)
            .await
            .map_err(|source| StoreError::SecretLoad {
                name: name.clone(),
                namespace: namespace.clone(),
                source,
            })?
            .ok_or(StoreError::SecretNotFound { name, namespace })?;

        self.apply_secret(&secret)?;
        info!(
            url = %redact_credentials(self.options.url.as_deref().unwrap_or_default()),
            username = self.options.username.as_deref().unwrap_or_default(),
            branch = %self.options.branch,
            "set up git store"
        );
        Ok(())
    }

    fn is_configured(&self) -> bool {
        [&self.options.url, &self.options.username, &self.options.token]
            .iter()
            .all(|v| v.as_deref().is_some_and(|s| !s.is_empty()))
    }

    /// Take url, username and token from the secret's `url`, `username` and
    /// `password` keys, keeping any value that is already set
    pub fn apply_secret(&mut self, secret: &Secret) -> Result<(), StoreError> {
        let lookup = |key: &str| {
            secret
                .data
                .as_ref()
                .and_then(|d| d.get(key))
                .map(|v| String::from_utf8_lossy(&v.0).trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let name = self.options.secret_name.clone();
        let namespace = self.options.jx_namespace.clone();
        let missing = |key: &'static str| StoreError::MissingSecretKey {
            name: name.clone(),
            namespace: namespace.clone(),
            key,
        };

        let fields = [
            (&mut self.options.url, "url"),
            (&mut self.options.username, "username"),
            (&mut self.options.token, "password"),
        ];
        for (field, key) in fields {
            if field.as_deref().is_some_and(|s| !s.is_empty()) {
                continue;
            }
            *field = Some(lookup(key).ok_or_else(|| missing(key))?);
        }
        Ok(())
    }

    /// The repository URL with username and token embedded, percent-encoded
    pub fn clone_url(&self) -> Result<String, StoreError> {
        let raw = self
            .options
            .url
            .as_deref()
            .ok_or(StoreError::MissingOption("url"))?;
        let username = self
            .options
            .username
            .as_deref()
            .ok_or(StoreError::MissingOption("username"))?;
        let token = self
            .options
            .token
            .as_deref()
            .ok_or(StoreError::MissingOption("token"))?;

        let invalid = || StoreError::InvalidUrl(redact_credentials(raw));
        let mut url = Url::parse(raw).map_err(|_| invalid())?;
        url.set_username(username).map_err(|_| invalid())?;
        url.set_password(Some(token)).map_err(|_| invalid())?;
        Ok(url.into())
    }

    /// Clone the storage branch into the work directory, creating it as an
    /// empty orphan branch if the remote does not have it yet
    pub async fn setup(&self) -> Result<(), StoreError> {
        let url = self.clone_url()?;
        let dir = self.dir.to_string_lossy().to_string();
        let parent = self.dir.parent().unwrap_or_else(|| Path::new("."));
        let branch = self.options.branch.as_str();

        let cloned = self
            .runner
            .run(
                parent,
                &["clone", &url, "--branch", branch, "--single-branch", &dir],
            )
            .await;
        if cloned.is_ok() {
            info!(branch, dir = %self.dir.display(), "cloned git store");
            return Ok(());
        }

        info!(branch, "assuming the remote branch does not exist so creating it");
        self.runner.run(parent, &["clone", &url, &dir]).await?;
        self.runner
            .run(&self.dir, &["checkout", "--orphan", branch])
            .await?;
        self.runner
            .run(&self.dir, &["rm", "--cached", "-r", "."])
            .await?;
        self.clear_worktree().await
    }

    /// Remove everything in the work directory except `.git`
    async fn clear_worktree(&self) -> Result<(), StoreError> {
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|e| StoreError::io(&self.dir, e))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StoreError::io(&self.dir, e))?
        {
            if entry.file_name() == ".git" {
                continue;
            }
            let path = entry.path();
            let file_type = entry
                .file_type()
                .await
                .map_err(|e| StoreError::io(&path, e))?;
            let removed = if file_type.is_dir() {
                tokio::fs::remove_dir_all(&path).await
            } else {
                tokio::fs::remove_file(&path).await
            };
            removed.map_err(|e| StoreError::io(&path, e))?;
        }
        Ok(())
    }

    /// Commit and push whatever is in the work directory
    pub async fn sync(&self) -> Result<String, StoreError> {
        self.runner.run(&self.dir, &["add", "*"]).await?;

        if !self.has_changes().await? {
            return Ok("no changes".to_string());
        }

        self.runner
            .run(&self.dir, &["commit", "-a", "-m", COMMIT_MESSAGE])
            .await?;
        self.runner
            .run(&self.dir, &["push", "origin", &self.options.branch])
            .await?;
        Ok("sync completed".to_string())
    }

    async fn has_changes(&self) -> Result<bool, StoreError> {
        let status = self
            .runner
            .run(&self.dir, &["status", "--porcelain"])
            .await?;
        Ok(!status.is_empty())
    }
}
