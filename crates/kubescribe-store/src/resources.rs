use std::path::{Path, PathBuf};

use kube::Api;
use kube::api::{ApiResource, DynamicObject, GroupVersionKind, ListParams, TypeMeta};
use tracing::{debug, error, info};

use crate::error::StoreError;

/// A resource type included in snapshots
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResourceKind {
    /// Empty for the core API group
    pub group: &'static str,
    pub version: &'static str,
    pub kind: &'static str,
    pub plural: &'static str,
}

impl ResourceKind {
    pub const fn new(
        group: &'static str,
        version: &'static str,
        kind: &'static str,
        plural: &'static str,
    ) -> Self {
        Self {
            group,
            version,
            kind,
            plural,
        }
    }

    fn api_resource(&self) -> ApiResource {
        let gvk = GroupVersionKind::gvk(self.group, self.version, self.kind);
        ApiResource::from_gvk_with_plural(&gvk, self.plural)
    }

    /// Directory name for the group; the core group is written as `core`
    fn group_dir(&self) -> &'static str {
        if self.group.is_empty() {
            "core"
        } else {
            self.group
        }
    }
}

/// Pods plus the Jenkins X and Tekton pipeline resources
pub const DEFAULT_RESOURCES: &[ResourceKind] = &[
    ResourceKind::new("", "v1", "Pod", "pods"),
    ResourceKind::new("jenkins.io", "v1", "PipelineActivity", "pipelineactivities"),
    ResourceKind::new("tekton.dev", "v1alpha1", "Pipeline", "pipelines"),
    ResourceKind::new("tekton.dev", "v1alpha1", "PipelineRun", "pipelineruns"),
    ResourceKind::new("tekton.dev", "v1alpha1", "TaskRun", "taskruns"),
    ResourceKind::new("tekton.dev", "v1alpha1", "Task", "tasks"),
];

/// File an object is written to:
/// `<dir>/<group>/<version>/<resource>[/<namespace>]/<name>.yaml`
pub fn object_path(dir: &Path, kind: &ResourceKind, object: &DynamicObject) -> PathBuf {
    let mut path = dir
        .join(kind.group_dir())
        .join(kind.version)
        .join(kind.plural);
    if let Some(ns) = object.metadata.namespace.as_deref().filter(|ns| !ns.is_empty()) {
        path.push(ns);
    }
    let name = object.metadata.name.as_deref().unwrap_or_default();
    path.push(format!("{name}.yaml"));
    path
}

/// Serialise one object to YAML under `dir`, returning the file written
pub async fn write_object(
    dir: &Path,
    kind: &ResourceKind,
    object: &DynamicObject,
) -> Result<PathBuf, StoreError> {
    let path = object_path(dir, kind, object);

    // List responses omit apiVersion/kind on their items
    let mut object = object.clone();
    if object.types.is_none() {
        let resource = kind.api_resource();
        object.types = Some(TypeMeta {
            api_version: resource.api_version,
            kind: resource.kind,
        });
    }

    let yaml = serde_yaml::to_string(&object).map_err(|source| StoreError::Yaml {
        path: path.clone(),
        source,
    })?;

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| StoreError::io(parent, e))?;
    }
    tokio::fs::write(&path, yaml)
        .await
        .map_err(|e| StoreError::io(&path, e))?;
    Ok(path)
}

/// Dumps a snapshot of cluster resources to YAML files
pub struct ResourceDumper {
    client: kube::Client,
    /// `None` dumps every namespace
    namespace: Option<String>,
    dir: PathBuf,
    resources: Vec<ResourceKind>,
}

impl ResourceDumper {
    pub fn new(client: kube::Client, namespace: Option<String>, dir: impl Into<PathBuf>) -> Self {
        Self {
            client,
            namespace,
            dir: dir.into(),
            resources: DEFAULT_RESOURCES.to_vec(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write every object of every configured kind. Kinds the cluster does not
    /// serve, or that we may not list, are skipped.
    pub async fn dump(&self) -> Result<usize, StoreError> {
        let mut written = 0;

        for kind in &self.resources {
            let resource = kind.api_resource();
            let api: Api<DynamicObject> = match &self.namespace {
                Some(ns) => Api::namespaced_with(self.client.clone(), ns, &resource),
                None => Api::all_with(self.client.clone(), &resource),
            };

            let list = match api.list(&ListParams::default()).await {
                Ok(list) => list,
                Err(kube::Error::Api(response)) if response.code == 404 => {
                    debug!(group = kind.group, resource = kind.plural, "resource not served");
                    continue;
                }
                Err(err) => {
                    // probably RBAC related
                    error!(group = kind.group, resource = kind.plural, error = %err, "cannot list resources");
                    continue;
                }
            };

            for object in &list.items {
                write_object(&self.dir, kind, object).await?;
                written += 1;
            }
        }

        info!(count = written, dir = %self.dir.display(), "dumped resources");
        Ok(written)
    }
}
