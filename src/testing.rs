//! In-memory cluster used by the unit tests.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{
    ConfigMap, Event, Namespace, Node, PersistentVolumeClaim, Pod, Secret, Service,
};

use crate::answer::Answerer;
use crate::assembler::AnswerRequest;
use crate::client::ClusterClient;
use crate::error::{FetchError, QueryError};
use crate::fetcher::{RawCluster, ResourceKind, ResourceList};

#[derive(Default)]
pub struct FakeClusterClient {
    objects: Mutex<RawCluster>,
    failing: Mutex<BTreeSet<ResourceKind>>,
    forbidden: BTreeSet<ResourceKind>,
    failing_namespaces: BTreeSet<(ResourceKind, String)>,
    failing_gets: bool,
    delay: Option<Duration>,
    list_calls: AtomicUsize,
    get_calls: AtomicUsize,
}

impl FakeClusterClient {
    pub fn new() -> Self {
        Self::default()
    }

    fn update(self, f: impl FnOnce(&mut RawCluster)) -> Self {
        f(&mut self.objects.lock().unwrap());
        self
    }

    pub fn with_namespaces(self, items: Vec<Namespace>) -> Self {
        self.update(|raw| raw.namespaces = items)
    }

    pub fn with_pods(self, items: Vec<Pod>) -> Self {
        self.update(|raw| raw.pods = items)
    }

    pub fn with_services(self, items: Vec<Service>) -> Self {
        self.update(|raw| raw.services = items)
    }

    pub fn with_deployments(self, items: Vec<Deployment>) -> Self {
        self.update(|raw| raw.deployments = items)
    }

    pub fn with_secrets(self, items: Vec<Secret>) -> Self {
        self.update(|raw| raw.secrets = items)
    }

    pub fn with_config_maps(self, items: Vec<ConfigMap>) -> Self {
        self.update(|raw| raw.config_maps = items)
    }

    pub fn with_nodes(self, items: Vec<Node>) -> Self {
        self.update(|raw| raw.nodes = items)
    }

    pub fn with_pvcs(self, items: Vec<PersistentVolumeClaim>) -> Self {
        self.update(|raw| raw.persistent_volume_claims = items)
    }

    pub fn with_events(self, items: Vec<Event>) -> Self {
        self.update(|raw| raw.events = items)
    }

    /// Listing `kind` fails. Single-object reads still succeed.
    pub fn failing(self, kind: ResourceKind) -> Self {
        self.failing.lock().unwrap().insert(kind);
        self
    }

    /// The cluster-wide list of `kind` is rejected with a 403. Listing it one
    /// namespace at a time still works.
    pub fn forbidding_cluster_list(mut self, kind: ResourceKind) -> Self {
        self.forbidden.insert(kind);
        self
    }

    /// Listing `kind` in `namespace` fails.
    pub fn failing_namespace(mut self, kind: ResourceKind, namespace: &str) -> Self {
        self.failing_namespaces.insert((kind, namespace.to_string()));
        self
    }

    pub fn failing_gets(mut self) -> Self {
        self.failing_gets = true;
        self
    }

    /// Every list call sleeps this long before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn fail_everything(&self) {
        self.failing.lock().unwrap().extend(ResourceKind::ALL);
    }

    pub fn set_pods(&self, items: Vec<Pod>) {
        self.objects.lock().unwrap().pods = items;
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn get_calls(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }

    fn count_get(&self, kind: ResourceKind) -> Result<(), FetchError> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing_gets {
            return Err(FetchError::Unavailable { kind, reason: "injected get failure".to_string() });
        }
        Ok(())
    }
}

fn api_error(code: u16, reason: &str, message: &str) -> kube::Error {
    kube::Error::Api(kube::error::ErrorResponse {
        status: "Failure".to_string(),
        message: message.to_string(),
        reason: reason.to_string(),
        code,
    })
}

fn forbidden(kind: ResourceKind) -> FetchError {
    FetchError::List {
        kind,
        source: api_error(403, "Forbidden", &format!("{} is forbidden at the cluster scope", kind)),
    }
}

fn in_namespace<K: kube::Resource + Clone>(items: &[K], namespace: &str) -> Vec<K> {
    items
        .iter()
        .filter(|item| item.meta().namespace.as_deref() == Some(namespace))
        .cloned()
        .collect()
}

fn matches(meta: &k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta, namespace: &str, name: &str) -> bool {
    meta.namespace.as_deref() == Some(namespace) && meta.name.as_deref() == Some(name)
}

#[async_trait]
impl ClusterClient for FakeClusterClient {
    async fn list(&self, kind: ResourceKind) -> Result<ResourceList, FetchError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.lock().unwrap().contains(&kind) {
            return Err(FetchError::Unavailable { kind, reason: "injected list failure".to_string() });
        }
        if self.forbidden.contains(&kind) {
            return Err(forbidden(kind));
        }

        let raw = self.objects.lock().unwrap();
        let list = match kind {
            ResourceKind::Namespaces => ResourceList::Namespaces(raw.namespaces.clone()),
            ResourceKind::Pods => ResourceList::Pods(raw.pods.clone()),
            ResourceKind::Services => ResourceList::Services(raw.services.clone()),
            ResourceKind::Deployments => ResourceList::Deployments(raw.deployments.clone()),
            ResourceKind::Secrets => ResourceList::Secrets(raw.secrets.clone()),
            ResourceKind::ConfigMaps => ResourceList::ConfigMaps(raw.config_maps.clone()),
            ResourceKind::Nodes => ResourceList::Nodes(raw.nodes.clone()),
            ResourceKind::PersistentVolumeClaims => {
                ResourceList::PersistentVolumeClaims(raw.persistent_volume_claims.clone())
            }
            ResourceKind::Events => ResourceList::Events(raw.events.clone()),
        };
        Ok(list)
    }

    async fn list_namespaced(&self, kind: ResourceKind, namespace: &str) -> Result<ResourceList, FetchError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing_namespaces.contains(&(kind, namespace.to_string())) {
            return Err(FetchError::ListNamespace {
                kind,
                namespace: namespace.to_string(),
                source: api_error(500, "InternalError", "injected list failure"),
            });
        }

        let raw = self.objects.lock().unwrap();
        let list = match kind {
            ResourceKind::Pods => ResourceList::Pods(in_namespace(&raw.pods, namespace)),
            ResourceKind::Services => ResourceList::Services(in_namespace(&raw.services, namespace)),
            ResourceKind::Deployments => ResourceList::Deployments(in_namespace(&raw.deployments, namespace)),
            ResourceKind::Secrets => ResourceList::Secrets(in_namespace(&raw.secrets, namespace)),
            ResourceKind::ConfigMaps => ResourceList::ConfigMaps(in_namespace(&raw.config_maps, namespace)),
            ResourceKind::PersistentVolumeClaims => {
                ResourceList::PersistentVolumeClaims(in_namespace(&raw.persistent_volume_claims, namespace))
            }
            ResourceKind::Events => ResourceList::Events(in_namespace(&raw.events, namespace)),
            ResourceKind::Namespaces | ResourceKind::Nodes => {
                return Err(FetchError::Unavailable { kind, reason: "cluster-scoped".to_string() })
            }
        };
        Ok(list)
    }

    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<Option<ConfigMap>, FetchError> {
        self.count_get(ResourceKind::ConfigMaps)?;
        let raw = self.objects.lock().unwrap();
        Ok(raw.config_maps.iter().find(|cm| matches(&cm.metadata, namespace, name)).cloned())
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, FetchError> {
        self.count_get(ResourceKind::Secrets)?;
        let raw = self.objects.lock().unwrap();
        Ok(raw.secrets.iter().find(|s| matches(&s.metadata, namespace, name)).cloned())
    }
}

/// Answerer that replies with a fixed string and remembers every request.
#[derive(Default)]
pub struct CannedAnswerer {
    reply: Option<String>,
    requests: Mutex<Vec<AnswerRequest>>,
}

impl CannedAnswerer {
    pub fn replying(reply: &str) -> Self {
        Self { reply: Some(reply.to_string()), requests: Mutex::new(Vec::new()) }
    }

    /// Every call fails with `QueryError::Answer`.
    pub fn failing() -> Self {
        Self::default()
    }

    pub fn requests(&self) -> Vec<AnswerRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Answerer for CannedAnswerer {
    async fn answer(&self, request: &AnswerRequest) -> Result<String, QueryError> {
        self.requests.lock().unwrap().push(request.clone());
        self.reply
            .clone()
            .ok_or_else(|| QueryError::Answer("model unavailable".to_string()))
    }
}

pub mod fixtures {
    use base64::{engine::general_purpose, Engine as _};
    use chrono::Utc;
    use k8s_openapi::api::apps::v1::Deployment;
    use k8s_openapi::api::core::v1::{
        ConfigMap, Event, Namespace, Node, PersistentVolumeClaim, Pod, Secret, Service,
    };
    use serde_json::{json, Map, Value};

    use crate::fetcher::RawCluster;
    use crate::models::{PodPhase, Snapshot};
    use crate::naming::NamingRules;
    use crate::normalizer::build_snapshot;
    use crate::resolver::ResolvedPod;

    pub fn pod_from(value: Value) -> Pod {
        serde_json::from_value(value).unwrap()
    }

    pub fn pod(namespace: &str, name: &str, phase: &str, containers: Vec<&str>) -> Pod {
        let containers: Vec<Value> = containers.iter().map(|c| json!({"name": c, "image": format!("{}:latest", c)})).collect();
        pod_from(json!({
            "metadata": {"name": name, "namespace": namespace},
            "spec": {"containers": containers},
            "status": {"phase": phase}
        }))
    }

    pub fn namespace(name: &str) -> Namespace {
        serde_json::from_value(json!({"metadata": {"name": name, "labels": {"kubernetes.io/metadata.name": name}}})).unwrap()
    }

    pub fn config_map(namespace: &str, name: &str, data: &[(&str, &str)]) -> ConfigMap {
        let data: Map<String, Value> = data.iter().map(|(k, v)| (k.to_string(), json!(v))).collect();
        serde_json::from_value(json!({
            "metadata": {"name": name, "namespace": namespace},
            "data": data
        }))
        .unwrap()
    }

    /// `data` is given in plain text and stored base64-encoded, as the API returns it.
    pub fn secret(namespace: &str, name: &str, data: &[(&str, &str)]) -> Secret {
        let data: Map<String, Value> = data
            .iter()
            .map(|(k, v)| (k.to_string(), json!(general_purpose::STANDARD.encode(v))))
            .collect();
        serde_json::from_value(json!({
            "metadata": {"name": name, "namespace": namespace},
            "type": "Opaque",
            "data": data
        }))
        .unwrap()
    }

    pub fn service(namespace: &str, name: &str, ports: &[(i32, i32)]) -> Service {
        let ports: Vec<Value> = ports.iter().map(|(port, target)| json!({"port": port, "targetPort": target})).collect();
        serde_json::from_value(json!({
            "metadata": {"name": name, "namespace": namespace},
            "spec": {"type": "ClusterIP", "clusterIP": "10.96.0.10", "ports": ports}
        }))
        .unwrap()
    }

    pub fn node(name: &str, ready: bool) -> Node {
        serde_json::from_value(json!({
            "metadata": {"name": name, "labels": {"node-role.kubernetes.io/worker": ""}},
            "status": {
                "conditions": [{"type": "Ready", "status": if ready { "True" } else { "False" }}],
                "nodeInfo": {
                    "architecture": "amd64", "bootID": "", "containerRuntimeVersion": "containerd://1.7.0",
                    "kernelVersion": "6.1.0", "kubeProxyVersion": "v1.30.0", "kubeletVersion": "v1.30.0",
                    "machineID": "", "operatingSystem": "linux", "osImage": "Debian", "systemUUID": ""
                }
            }
        }))
        .unwrap()
    }

    pub fn deployment(name: &str, namespace: &str, replicas: i32, available: i32, claim: Option<&str>) -> Deployment {
        let volumes: Vec<Value> = claim
            .map(|c| vec![json!({"name": "data", "persistentVolumeClaim": {"claimName": c}})])
            .unwrap_or_default();
        serde_json::from_value(json!({
            "metadata": {"name": name, "namespace": namespace},
            "spec": {
                "replicas": replicas,
                "selector": {"matchLabels": {"app": name}},
                "template": {
                    "metadata": {"labels": {"app": name}},
                    "spec": {"containers": [{"name": name, "image": format!("{}:latest", name)}], "volumes": volumes}
                }
            },
            "status": {"availableReplicas": available, "readyReplicas": available}
        }))
        .unwrap()
    }

    pub fn pvc(namespace: &str, name: &str, phase: &str, capacity: &str) -> PersistentVolumeClaim {
        serde_json::from_value(json!({
            "metadata": {"name": name, "namespace": namespace},
            "spec": {"storageClassName": "standard", "volumeName": format!("pv-{}", name)},
            "status": {"phase": phase, "capacity": {"storage": capacity}}
        }))
        .unwrap()
    }

    pub fn event(namespace: &str, object: &str, type_: &str, reason: &str, last_seen: &str) -> Event {
        serde_json::from_value(json!({
            "metadata": {"name": format!("{}.{}", object, reason.to_lowercase()), "namespace": namespace},
            "involvedObject": {"kind": "Pod", "name": object, "namespace": namespace},
            "type": type_,
            "reason": reason,
            "message": format!("{} on {}", reason, object),
            "count": 1,
            "lastTimestamp": last_seen
        }))
        .unwrap()
    }

    /// Snapshot with `count` running pods, all in `default`.
    pub fn snapshot_with_pods(count: usize) -> Snapshot {
        let resolved: Vec<ResolvedPod> = (0..count)
            .map(|i| ResolvedPod {
                name: format!("web-{}", i),
                namespace: "default".to_string(),
                phase: PodPhase::Running,
                node: None,
                restart_count: 0,
                containers: vec![],
            })
            .collect();
        build_snapshot(&RawCluster::default(), &resolved, &NamingRules::default(), Utc::now())
    }
}
