use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use futures::future::join_all;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{
    ConfigMap, Event, Namespace, Node, PersistentVolumeClaim, Pod, Secret, Service,
};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::client::ClusterClient;
use crate::error::FetchError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ResourceKind {
    Namespaces,
    Pods,
    Services,
    Deployments,
    Secrets,
    ConfigMaps,
    Nodes,
    PersistentVolumeClaims,
    Events,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 9] = [
        ResourceKind::Namespaces,
        ResourceKind::Pods,
        ResourceKind::Services,
        ResourceKind::Deployments,
        ResourceKind::Secrets,
        ResourceKind::ConfigMaps,
        ResourceKind::Nodes,
        ResourceKind::PersistentVolumeClaims,
        ResourceKind::Events,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Namespaces => "namespaces",
            ResourceKind::Pods => "pods",
            ResourceKind::Services => "services",
            ResourceKind::Deployments => "deployments",
            ResourceKind::Secrets => "secrets",
            ResourceKind::ConfigMaps => "configmaps",
            ResourceKind::Nodes => "nodes",
            ResourceKind::PersistentVolumeClaims => "persistentvolumeclaims",
            ResourceKind::Events => "events",
        }
    }

    pub fn is_namespaced(&self) -> bool {
        !matches!(self, ResourceKind::Namespaces | ResourceKind::Nodes)
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = FetchError;

    /// Accepts the spellings kubectl accepts for the same resources.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "namespaces" | "namespace" | "ns" => Ok(ResourceKind::Namespaces),
            "pods" | "pod" | "po" => Ok(ResourceKind::Pods),
            "services" | "service" | "svc" => Ok(ResourceKind::Services),
            "deployments" | "deployment" | "deploy" => Ok(ResourceKind::Deployments),
            "secrets" | "secret" => Ok(ResourceKind::Secrets),
            "configmaps" | "configmap" | "cm" => Ok(ResourceKind::ConfigMaps),
            "nodes" | "node" | "no" => Ok(ResourceKind::Nodes),
            "persistentvolumeclaims" | "persistentvolumeclaim" | "pvc" | "pvcs" => {
                Ok(ResourceKind::PersistentVolumeClaims)
            }
            "events" | "event" | "ev" => Ok(ResourceKind::Events),
            _ => Err(FetchError::UnknownKind(s.to_string())),
        }
    }
}

impl TryFrom<String> for ResourceKind {
    type Error = FetchError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ResourceKind> for String {
    fn from(kind: ResourceKind) -> Self {
        kind.as_str().to_string()
    }
}

/// One typed listing, as returned by a single list call.
#[derive(Debug, Clone)]
pub enum ResourceList {
    Namespaces(Vec<Namespace>),
    Pods(Vec<Pod>),
    Services(Vec<Service>),
    Deployments(Vec<Deployment>),
    Secrets(Vec<Secret>),
    ConfigMaps(Vec<ConfigMap>),
    Nodes(Vec<Node>),
    PersistentVolumeClaims(Vec<PersistentVolumeClaim>),
    Events(Vec<Event>),
}

impl ResourceList {
    pub fn kind(&self) -> ResourceKind {
        match self {
            ResourceList::Namespaces(_) => ResourceKind::Namespaces,
            ResourceList::Pods(_) => ResourceKind::Pods,
            ResourceList::Services(_) => ResourceKind::Services,
            ResourceList::Deployments(_) => ResourceKind::Deployments,
            ResourceList::Secrets(_) => ResourceKind::Secrets,
            ResourceList::ConfigMaps(_) => ResourceKind::ConfigMaps,
            ResourceList::Nodes(_) => ResourceKind::Nodes,
            ResourceList::PersistentVolumeClaims(_) => ResourceKind::PersistentVolumeClaims,
            ResourceList::Events(_) => ResourceKind::Events,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ResourceList::Namespaces(items) => items.len(),
            ResourceList::Pods(items) => items.len(),
            ResourceList::Services(items) => items.len(),
            ResourceList::Deployments(items) => items.len(),
            ResourceList::Secrets(items) => items.len(),
            ResourceList::ConfigMaps(items) => items.len(),
            ResourceList::Nodes(items) => items.len(),
            ResourceList::PersistentVolumeClaims(items) => items.len(),
            ResourceList::Events(items) => items.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Raw listings for every kind. A kind that failed or was not requested stays
/// empty and is not marked as listed. A kind recovered namespace by namespace
/// records the namespaces it covers in `namespace_coverage`.
#[derive(Debug, Clone, Default)]
pub struct RawCluster {
    pub namespaces: Vec<Namespace>,
    pub pods: Vec<Pod>,
    pub services: Vec<Service>,
    pub deployments: Vec<Deployment>,
    pub secrets: Vec<Secret>,
    pub config_maps: Vec<ConfigMap>,
    pub nodes: Vec<Node>,
    pub persistent_volume_claims: Vec<PersistentVolumeClaim>,
    pub events: Vec<Event>,
    pub listed: Vec<ResourceKind>,
    pub namespace_coverage: BTreeMap<ResourceKind, BTreeSet<String>>,
}

impl RawCluster {
    pub fn insert(&mut self, list: ResourceList) {
        self.listed.push(list.kind());
        match list {
            ResourceList::Namespaces(items) => self.namespaces = items,
            ResourceList::Pods(items) => self.pods = items,
            ResourceList::Services(items) => self.services = items,
            ResourceList::Deployments(items) => self.deployments = items,
            ResourceList::Secrets(items) => self.secrets = items,
            ResourceList::ConfigMaps(items) => self.config_maps = items,
            ResourceList::Nodes(items) => self.nodes = items,
            ResourceList::PersistentVolumeClaims(items) => self.persistent_volume_claims = items,
            ResourceList::Events(items) => self.events = items,
        }
    }

    /// Append one namespace's listing of `list.kind()`.
    pub fn insert_namespace(&mut self, namespace: &str, list: ResourceList) {
        self.namespace_coverage
            .entry(list.kind())
            .or_default()
            .insert(namespace.to_string());
        match list {
            ResourceList::Namespaces(items) => self.namespaces.extend(items),
            ResourceList::Pods(items) => self.pods.extend(items),
            ResourceList::Services(items) => self.services.extend(items),
            ResourceList::Deployments(items) => self.deployments.extend(items),
            ResourceList::Secrets(items) => self.secrets.extend(items),
            ResourceList::ConfigMaps(items) => self.config_maps.extend(items),
            ResourceList::Nodes(items) => self.nodes.extend(items),
            ResourceList::PersistentVolumeClaims(items) => self.persistent_volume_claims.extend(items),
            ResourceList::Events(items) => self.events.extend(items),
        }
    }

    /// Listed cluster-wide.
    pub fn was_listed(&self, kind: ResourceKind) -> bool {
        self.listed.contains(&kind)
    }

    /// Listed cluster-wide or for at least one namespace.
    pub fn has_any(&self, kind: ResourceKind) -> bool {
        self.was_listed(kind) || self.namespace_coverage.contains_key(&kind)
    }

    /// Whether the listing of `kind` is complete for `namespace`.
    pub fn covers(&self, kind: ResourceKind, namespace: &str) -> bool {
        self.was_listed(kind)
            || self
                .namespace_coverage
                .get(&kind)
                .map_or(false, |namespaces| namespaces.contains(namespace))
    }

    /// Namespaces in which `kind` was listed one namespace at a time.
    pub fn covered_namespaces(&self, kind: ResourceKind) -> BTreeSet<String> {
        self.namespace_coverage.get(&kind).cloned().unwrap_or_default()
    }

    fn namespace_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.namespaces.iter().filter_map(|ns| ns.metadata.name.clone()).collect();
        names.sort();
        names.dedup();
        names
    }
}

pub struct FetchOutcome {
    pub raw: RawCluster,
    pub failures: Vec<FetchError>,
}

impl FetchOutcome {
    pub fn all_failed(&self) -> bool {
        self.raw.listed.is_empty() && self.raw.namespace_coverage.is_empty() && !self.failures.is_empty()
    }
}

/// List every requested kind concurrently. Each kind is an independent unit of
/// work: a failure is logged and collected, the remaining kinds still land.
///
/// A namespaced kind whose cluster-wide list is forbidden is retried one
/// namespace at a time over the namespaces listed in this pass; each namespace
/// is again its own unit of work.
pub async fn fetch_all(client: &dyn ClusterClient, kinds: &[ResourceKind]) -> FetchOutcome {
    let mut unique: Vec<ResourceKind> = kinds.to_vec();
    unique.sort();
    unique.dedup();

    let results = join_all(unique.iter().map(|kind| async move {
        (*kind, client.list(*kind).await)
    }))
    .await;

    let mut raw = RawCluster::default();
    let mut failures = Vec::new();
    let mut forbidden = Vec::new();

    for (kind, result) in results {
        match result {
            Ok(list) if list.kind() == kind => {
                info!("Fetched {} {}", list.len(), kind);
                raw.insert(list);
            }
            Ok(list) => {
                let err = FetchError::Unavailable {
                    kind,
                    reason: format!("client returned a {} listing", list.kind()),
                };
                warn!("Skipping {}: {}", kind, err);
                failures.push(err);
            }
            Err(err) if kind.is_namespaced() && err.is_forbidden() => {
                info!("Listing {} cluster-wide is forbidden, trying each namespace", kind);
                forbidden.push((kind, err));
            }
            Err(err) => {
                warn!("Failed to fetch {}: {}", kind, err);
                failures.push(err);
            }
        }
    }

    if !forbidden.is_empty() {
        let namespaces = raw.namespace_names();
        let units: Vec<(ResourceKind, &str)> = forbidden
            .iter()
            .flat_map(|(kind, _)| namespaces.iter().map(move |ns| (*kind, ns.as_str())))
            .collect();

        let results = join_all(units.into_iter().map(|(kind, ns)| async move {
            (kind, ns, client.list_namespaced(kind, ns).await)
        }))
        .await;

        for (kind, ns, result) in results {
            match result {
                Ok(list) if list.kind() == kind => {
                    debug!("Fetched {} {} in {}", list.len(), kind, ns);
                    raw.insert_namespace(ns, list);
                }
                Ok(list) => failures.push(FetchError::Unavailable {
                    kind,
                    reason: format!("client returned a {} listing for namespace {}", list.kind(), ns),
                }),
                Err(err) => {
                    warn!("Failed to fetch {} in {}: {}", kind, ns, err);
                    failures.push(err);
                }
            }
        }

        // a kind no namespace could recover stays a whole-kind failure
        for (kind, err) in forbidden {
            if !raw.has_any(kind) {
                warn!("Failed to fetch {}: {}", kind, err);
                failures.push(err);
            }
        }
    }

    FetchOutcome { raw, failures }
}
