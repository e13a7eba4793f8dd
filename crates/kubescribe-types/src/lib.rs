//! Shared types for kubescribe
//!
//! This crate contains the tail target model used across the kubescribe crates.

use crossterm::style::Color;
use std::collections::BTreeMap;
use std::fmt;

// ============================================================================
// Targets
// ============================================================================

/// Label value that marks pods created by Tekton pipelines
pub const TEKTON_MANAGER: &str = "tekton-pipelines";

/// Identity of a tailable log stream: one container inside one pod
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TargetId {
    pub namespace: String,
    pub pod: String,
    pub container: String,
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.namespace, self.pod, self.container)
    }
}

/// A container to tail, plus the logical app path its logs are filed under
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Target {
    pub namespace: String,
    pub pod: String,
    pub container: String,
    /// Derived from pod labels; only affects the output layout
    pub app: Option<String>,
}

impl Target {
    pub fn new(
        namespace: impl Into<String>,
        pod: impl Into<String>,
        container: impl Into<String>,
        app: Option<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            pod: pod.into(),
            container: container.into(),
            app,
        }
    }

    /// The identity key; `app` is not part of it
    pub fn id(&self) -> TargetId {
        TargetId {
            namespace: self.namespace.clone(),
            pod: self.pod.clone(),
            container: self.container.clone(),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.namespace, self.pod, self.container)
    }
}

/// A classified pod lifecycle change
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TargetEvent {
    Added(Target),
    Removed(Target),
}

impl TargetEvent {
    pub fn target(&self) -> &Target {
        match self {
            Self::Added(t) | Self::Removed(t) => t,
        }
    }
}

/// A target tagged with its position in the watch's event order.
///
/// Added and Removed targets travel on separate queues; `seq` restores their
/// relative order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueuedTarget {
    pub seq: u64,
    pub target: Target,
}

impl QueuedTarget {
    pub fn new(seq: u64, target: Target) -> Self {
        Self { seq, target }
    }
}

/// Derive the logical app path for a pod from its labels.
///
/// Uses `app`, falling back to `app.kubernetes.io/managed-by`. Tekton pipeline
/// pods are further qualified by their `owner`, `repository` and `branch`
/// labels, so each pipeline gets its own subtree.
pub fn derive_app_path(labels: &BTreeMap<String, String>) -> Option<String> {
    let non_empty = |key: &str| labels.get(key).map(String::as_str).filter(|v| !v.is_empty());

    let app = non_empty("app").or_else(|| non_empty("app.kubernetes.io/managed-by"))?;
    if app != TEKTON_MANAGER {
        return Some(app.to_string());
    }

    let mut segments = vec![app];
    segments.extend(["owner", "repository", "branch"].into_iter().filter_map(non_empty));
    Some(segments.join("/"))
}

// ============================================================================
// Colours
// ============================================================================

const COLOR_PAIRS: [(Color, Color); 6] = [
    (Color::Cyan, Color::DarkCyan),
    (Color::Green, Color::DarkGreen),
    (Color::Magenta, Color::DarkMagenta),
    (Color::Yellow, Color::DarkYellow),
    (Color::Blue, Color::DarkBlue),
    (Color::Red, Color::DarkRed),
];

/// Pick the (pod, container) colour pair for a pod.
///
/// Stable across runs: the pod name is hashed with 32-bit FNV-1.
pub fn determine_color(pod_name: &str) -> (Color, Color) {
    let idx = fnv1_32(pod_name.as_bytes()) as usize % COLOR_PAIRS.len();
    COLOR_PAIRS[idx]
}

fn fnv1_32(bytes: &[u8]) -> u32 {
    const OFFSET_BASIS: u32 = 0x811c_9dc5;
    const PRIME: u32 = 0x0100_0193;

    bytes.iter().fold(OFFSET_BASIS, |hash, b| {
        hash.wrapping_mul(PRIME) ^ u32::from(*b)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_app_label_wins() {
        let l = labels(&[("app", "web"), ("app.kubernetes.io/managed-by", "helm")]);
        assert_eq!(derive_app_path(&l).as_deref(), Some("web"));
    }

    #[test]
    fn test_managed_by_fallback() {
        let l = labels(&[("app.kubernetes.io/managed-by", "helm")]);
        assert_eq!(derive_app_path(&l).as_deref(), Some("helm"));
    }

    #[test]
    fn test_no_app_labels() {
        assert_eq!(derive_app_path(&labels(&[("tier", "db")])), None);
        assert_eq!(derive_app_path(&labels(&[("app", "")])), None);
    }

    #[test]
    fn test_tekton_pipeline_path() {
        let l = labels(&[
            ("app.kubernetes.io/managed-by", "tekton-pipelines"),
            ("owner", "myorg"),
            ("repository", "myrepo"),
            ("branch", "PR-12"),
        ]);
        assert_eq!(
            derive_app_path(&l).as_deref(),
            Some("tekton-pipelines/myorg/myrepo/PR-12")
        );
    }

    #[test]
    fn test_tekton_partial_labels() {
        let l = labels(&[("app", "tekton-pipelines"), ("repository", "myrepo")]);
        assert_eq!(
            derive_app_path(&l).as_deref(),
            Some("tekton-pipelines/myrepo")
        );
    }

    #[test]
    fn test_identity_ignores_app() {
        let a = Target::new("jx", "p1", "c1", Some("web".to_string()));
        let b = Target::new("jx", "p1", "c1", None);
        let c = Target::new("jx", "p1", "c2", None);
        assert_eq!(a.id(), b.id());
        assert_ne!(a.id(), c.id());
        assert_eq!(a.id().to_string(), "jx/p1/c1");
    }

    #[test]
    fn test_color_is_stable() {
        assert_eq!(determine_color("my-pod-abc"), determine_color("my-pod-abc"));
        // FNV-1 of the empty input is the offset basis
        assert_eq!(fnv1_32(b""), 0x811c_9dc5);
        assert_eq!(determine_color(""), COLOR_PAIRS[0x811c_9dc5_u32 as usize % 6]);
    }
}
