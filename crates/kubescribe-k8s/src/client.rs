use anyhow::{Context, Result};
use k8s_openapi::api::core::v1::Secret;
use kube::Api;
use kube::api::ListParams;
use kube::config::{KubeConfigOptions, Kubeconfig};

/// Kubernetes client wrapper
#[derive(Clone)]
pub struct KubeClient {
    client: kube::Client,
}

impl KubeClient {
    /// Create a client.
    ///
    /// With a context name the kubeconfig is read and that context used;
    /// otherwise the configuration is inferred (in-cluster service account,
    /// then the current kubeconfig context).
    pub async fn new(context: Option<&str>) -> Result<Self> {
        let config = match context {
            Some(context_name) => {
                let kubeconfig = Kubeconfig::read()
                    .context("Failed to read kubeconfig. Is kubectl configured?")?;
                kube::Config::from_custom_kubeconfig(
                    kubeconfig,
                    &KubeConfigOptions {
                        context: Some(context_name.to_string()),
                        ..Default::default()
                    },
                )
                .await
                .context(format!(
                    "Failed to create config for context: {}",
                    context_name
                ))?
            }
            None => kube::Config::infer()
                .await
                .context("Failed to infer kubernetes configuration")?,
        };

        let client = kube::Client::try_from(config).context("Failed to create kube client")?;

        Ok(Self { client })
    }

    /// Wrap an existing client
    pub fn from_client(client: kube::Client) -> Self {
        Self { client }
    }

    /// The underlying kube client
    pub fn client(&self) -> kube::Client {
        self.client.clone()
    }

    /// Namespace of the active context (or the pod's own namespace in-cluster)
    pub fn default_namespace(&self) -> &str {
        self.client.default_namespace()
    }

    /// Fetch all secrets in a namespace, or across the cluster when `None`
    pub async fn list_secrets(&self, namespace: Option<&str>) -> Result<Vec<Secret>> {
        let secrets: Api<Secret> = match namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        };
        let list = secrets
            .list(&ListParams::default())
            .await
            .context(format!(
                "Failed to list secrets in {}",
                namespace.unwrap_or("all namespaces")
            ))?;

        Ok(list.items)
    }

    /// Fetch a single secret, `None` if it does not exist
    pub async fn get_secret(&self, namespace: &str, name: &str) -> kube::Result<Option<Secret>> {
        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        secrets.get_opt(name).await
    }
}
