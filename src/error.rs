use std::time::Duration;

use crate::fetcher::ResourceKind;

/// Failure to read one resource kind (or one object) from the cluster.
///
/// Always absorbed below the normalizer: the kind contributes an empty listing.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("unknown resource kind: {0}")]
    UnknownKind(String),
    #[error("failed to connect to the cluster while fetching {kind}: {reason}")]
    Connect { kind: ResourceKind, reason: String },
    #[error("failed to list {kind}: {source}")]
    List {
        kind: ResourceKind,
        #[source]
        source: kube::Error,
    },
    #[error("failed to list {kind} in namespace {namespace}: {source}")]
    ListNamespace {
        kind: ResourceKind,
        namespace: String,
        #[source]
        source: kube::Error,
    },
    #[error("failed to read {kind} {namespace}/{name}: {source}")]
    Get {
        kind: ResourceKind,
        namespace: String,
        name: String,
        #[source]
        source: kube::Error,
    },
    #[error("{kind} unavailable: {reason}")]
    Unavailable { kind: ResourceKind, reason: String },
}

impl FetchError {
    pub fn kind(&self) -> Option<ResourceKind> {
        match self {
            FetchError::UnknownKind(_) => None,
            FetchError::Connect { kind, .. }
            | FetchError::List { kind, .. }
            | FetchError::ListNamespace { kind, .. }
            | FetchError::Get { kind, .. }
            | FetchError::Unavailable { kind, .. } => Some(*kind),
        }
    }

    pub fn namespace(&self) -> Option<&str> {
        match self {
            FetchError::ListNamespace { namespace, .. } | FetchError::Get { namespace, .. } => Some(namespace),
            _ => None,
        }
    }

    /// The cluster-wide list was rejected by RBAC (HTTP 403).
    pub fn is_forbidden(&self) -> bool {
        matches!(self, FetchError::List { source: kube::Error::Api(resp), .. } if resp.code == 403)
    }
}

/// A single environment variable or mount that could not be resolved.
#[derive(Debug, thiserror::Error)]
pub enum ResolutionError {
    #[error("{pod}/{container}: env {var} references missing configmap {namespace}/{name}")]
    MissingConfigMap { pod: String, container: String, var: String, namespace: String, name: String },
    #[error("{pod}/{container}: env {var} references missing key {key} in configmap {namespace}/{name}")]
    MissingConfigMapKey { pod: String, container: String, var: String, namespace: String, name: String, key: String },
    #[error("{pod}/{container}: env {var} references missing secret {namespace}/{name}")]
    MissingSecret { pod: String, container: String, var: String, namespace: String, name: String },
    #[error("{pod}/{container}: env {var} references missing key {key} in secret {namespace}/{name}")]
    MissingSecretKey { pod: String, container: String, var: String, namespace: String, name: String, key: String },
    #[error("{pod}/{container}: env {var} secret value is not valid UTF-8")]
    NotUtf8 { pod: String, container: String, var: String },
    #[error("{pod}/{container}: env {var} uses unsupported source {source_kind}")]
    Unsupported { pod: String, container: String, var: String, source_kind: String },
    #[error("{pod}/{container}: lookup failed: {source}")]
    Lookup {
        pod: String,
        container: String,
        #[source]
        source: FetchError,
    },
    #[error("{pod}/{container}: mount {mount_path} references undeclared volume {volume}")]
    UndeclaredVolume { pod: String, container: String, volume: String, mount_path: String },
}

/// The refresh as a whole did not publish a snapshot.
#[derive(Debug, thiserror::Error)]
pub enum RefreshError {
    #[error("a refresh is already in progress")]
    InProgress,
    #[error("refresh exceeded its {0:?} budget and was abandoned")]
    TimedOut(Duration),
    #[error("cluster unreachable: all {failed} resource kinds failed ({cause})")]
    ClusterUnreachable { failed: usize, cause: String },
}

#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("Query is required")]
    EmptyQuery,
    #[error("No cluster data available. Please refresh first.")]
    NotInitialized,
    #[error("Failed to serialize snapshot: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("Answering failed: {0}")]
    Answer(String),
}
