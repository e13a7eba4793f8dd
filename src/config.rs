//! Command line, environment and config file settings

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Deserialize;

use kubescribe_k8s::DEFAULT_EVENT_BUFFER;
use kubescribe_logs::{LineFilter, TailOptions};
use kubescribe_store::GitOptions;

/// Kubescribe - tails Kubernetes pod logs to disk, masks secrets and syncs them to git
#[derive(Parser, Debug)]
#[command(name = "kubescribe")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Kubernetes context name (defaults to in-cluster config, then the current context)
    #[arg(long, env = "KUBE_CONTEXT", global = true)]
    pub context: Option<String>,

    /// Namespace to watch (defaults to the context's namespace)
    #[arg(short, long, env = "NAMESPACE", global = true)]
    pub namespace: Option<String>,

    /// Watch pods in every namespace
    #[arg(short = 'A', long, global = true)]
    pub all_namespaces: bool,

    /// Label selector for the pods to tail
    #[arg(short = 'l', long, default_value = "")]
    pub selector: String,

    /// Work directory; a temporary directory is created if not set
    #[arg(long, env = "WORK_DIR")]
    pub work_dir: Option<PathBuf>,

    /// Path within the work directory where pod logs are stored
    #[arg(long, env = "LOG_PATH", default_value = "logs")]
    pub log_path: String,

    /// Path within the work directory where resources are stored
    #[arg(long, env = "RESOURCE_PATH", default_value = "resources")]
    pub resource_path: String,

    /// Time between periodic syncs
    #[arg(long, env = "POLL_DURATION", default_value = "30s")]
    pub poll_duration: humantime::Duration,

    /// Disable periodic syncs; only the HTTP endpoint triggers them
    #[arg(long, env = "NO_LOOP")]
    pub no_loop: bool,

    /// Port of the HTTP control surface
    #[arg(long, env = "PORT", default_value_t = 8080)]
    pub port: u16,

    /// Git repository URL (defaults to the boot secret's url)
    #[arg(long, env = "GIT_URL")]
    pub git_url: Option<String>,

    /// Git username (defaults to the boot secret's username)
    #[arg(long, env = "GIT_USERNAME")]
    pub git_username: Option<String>,

    /// Git token (defaults to the boot secret's password)
    #[arg(long, env = "GIT_TOKEN", hide_env_values = true)]
    pub git_token: Option<String>,

    /// Branch used to store logs and resources
    #[arg(long, env = "GIT_BRANCH", default_value = "gh-pages")]
    pub git_branch: String,

    /// Name of the git binary
    #[arg(long, env = "GIT_BINARY", default_value = "git")]
    pub git_binary: String,

    /// Namespace holding the boot secret
    #[arg(long, env = "JX_NAMESPACE", default_value = "jx")]
    pub jx_namespace: String,

    /// Boot secret providing git url/username/password
    #[arg(long, env = "SECRET_NAME", default_value = "jx-boot")]
    pub secret_name: String,

    /// Only keep lines matching one of these regexes (repeatable)
    #[arg(long = "include", short = 'i')]
    pub include: Vec<String>,

    /// Drop lines matching any of these regexes (repeatable)
    #[arg(long = "exclude", short = 'e')]
    pub exclude: Vec<String>,

    /// Prefix lines with the API server timestamp
    #[arg(long)]
    pub timestamps: bool,

    /// Number of historical log lines to fetch per container
    #[arg(long)]
    pub tail_lines: Option<i64>,

    /// Only fetch logs newer than this (e.g. 5m)
    #[arg(long)]
    pub since: Option<humantime::Duration>,

    /// Also print tailed lines to stdout
    #[arg(long)]
    pub echo: bool,

    /// Capacity of the pod event queues
    #[arg(long, default_value_t = DEFAULT_EVENT_BUFFER)]
    pub event_buffer: usize,

    /// TOML file with a [tail] table of defaults
    #[arg(long, env = "KUBESCRIBE_CONFIG")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Tail logs and sync them to git (the default)
    Run,
    /// Log the secret values that would be masked, then exit
    MaskWords,
}

/// Config file contents
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    #[serde(default)]
    pub tail: TailConfig,
}

/// Tail defaults; command line values take priority
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct TailConfig {
    #[serde(default)]
    pub include: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
    pub timestamps: Option<bool>,
    pub tail_lines: Option<i64>,
    #[serde(default, with = "humantime_serde")]
    pub since: Option<Duration>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;

        toml::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
    }
}

/// Fully resolved settings
#[derive(Debug)]
pub struct Settings {
    pub context: Option<String>,
    pub namespace: Option<String>,
    pub all_namespaces: bool,
    pub selector: String,
    pub work_dir: Option<PathBuf>,
    pub log_path: String,
    pub resource_path: String,
    pub poll_duration: Duration,
    pub no_loop: bool,
    pub port: u16,
    pub git: GitOptions,
    pub git_binary: String,
    pub tail: TailOptions,
    pub event_buffer: usize,
}

impl Settings {
    /// Merge command line arguments with the optional config file
    pub fn resolve(args: &Args) -> Result<Self> {
        let file = match &args.config {
            Some(path) => FileConfig::load(path)?,
            None => FileConfig::default(),
        };
        let tail = file.tail;

        let include = if args.include.is_empty() {
            tail.include
        } else {
            args.include.clone()
        };
        let exclude = if args.exclude.is_empty() {
            tail.exclude
        } else {
            args.exclude.clone()
        };
        let filter = LineFilter::new(&include, &exclude).context("Invalid include/exclude pattern")?;

        let tail = TailOptions {
            timestamps: args.timestamps || tail.timestamps.unwrap_or(false),
            since: args.since.map(Into::into).or(tail.since),
            tail_lines: args.tail_lines.or(tail.tail_lines),
            filter,
            echo: args.echo,
            show_namespace: args.all_namespaces,
        };

        let non_empty = |v: &Option<String>| v.clone().filter(|s| !s.is_empty());

        Ok(Self {
            context: args.context.clone(),
            namespace: non_empty(&args.namespace),
            all_namespaces: args.all_namespaces,
            selector: args.selector.clone(),
            work_dir: args.work_dir.clone(),
            log_path: args.log_path.clone(),
            resource_path: args.resource_path.clone(),
            poll_duration: args.poll_duration.into(),
            no_loop: args.no_loop,
            port: args.port,
            git: GitOptions {
                url: non_empty(&args.git_url),
                username: non_empty(&args.git_username),
                token: non_empty(&args.git_token),
                branch: args.git_branch.clone(),
                jx_namespace: args.jx_namespace.clone(),
                secret_name: args.secret_name.clone(),
            },
            git_binary: args.git_binary.clone(),
            tail,
            event_buffer: args.event_buffer,
        })
    }

    /// Namespace to watch given the client's default; `None` means all
    pub fn watch_namespace(&self, default_namespace: &str) -> Option<String> {
        if self.all_namespaces {
            return None;
        }
        Some(
            self.namespace
                .clone()
                .unwrap_or_else(|| default_namespace.to_string()),
        )
    }

    /// The configured work directory, or a fresh temporary one that outlives the process
    pub fn ensure_work_dir(&self) -> Result<PathBuf> {
        match &self.work_dir {
            Some(dir) => {
                std::fs::create_dir_all(dir)
                    .with_context(|| format!("Failed to create {}", dir.display()))?;
                Ok(dir.clone())
            }
            None => Ok(tempfile::Builder::new()
                .prefix("kubescribe-")
                .tempdir()
                .context("Failed to create temp dir")?
                .into_path()),
        }
    }
}
