use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("git {args} failed: {output}")]
    Git { args: String, output: String },

    #[error("failed to run {binary}: {source}")]
    Spawn {
        binary: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no Secret {name} in namespace {namespace}")]
    SecretNotFound { name: String, namespace: String },

    #[error("failed to load Secret {name} in namespace {namespace}: {source}")]
    SecretLoad {
        name: String,
        namespace: String,
        #[source]
        source: kube::Error,
    },

    #[error("secret {name} in namespace {namespace} does not have a {key} entry")]
    MissingSecretKey {
        name: String,
        namespace: String,
        key: &'static str,
    },

    #[error("invalid git URL {0}")]
    InvalidUrl(String),

    #[error("git {0} is not configured")]
    MissingOption(&'static str),

    #[error("failed to marshal resource to YAML for file {}: {source}", path.display())]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
