//! Resolution of the indirect values embedded in pod specs: env vars sourced
//! from config maps, secrets and the downward API, plus volume mounts backed by
//! persistent volume claims.
//!
//! Nothing here fails a pod. A reference that cannot be resolved is logged,
//! recorded as a [`ResolutionError`] and left out of the container's env.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use k8s_openapi::api::core::v1::{ConfigMap, Container, EnvVar, Pod, Probe, Secret, Volume};
use log::{debug, warn};

use crate::client::ClusterClient;
use crate::error::{FetchError, ResolutionError};
use crate::fetcher::{RawCluster, ResourceKind};
use crate::models::{ContainerDetail, MountDetail, PodPhase, PortInfo, ProbeInfo};
use crate::utils::{container_status, derive_pod_phase, int_or_string, is_database_container, pod_restart_count};

/// A pod with every container's references resolved to plain values.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedPod {
    pub name: String,
    pub namespace: String,
    pub phase: PodPhase,
    pub node: Option<String>,
    pub restart_count: i64,
    pub containers: Vec<ContainerDetail>,
}

type ObjectKey = (String, String);

pub struct ReferenceResolver<'a> {
    client: &'a dyn ClusterClient,
    config_maps: HashMap<ObjectKey, Option<BTreeMap<String, String>>>,
    secrets: HashMap<ObjectKey, Option<BTreeMap<String, Vec<u8>>>>,
    // When the listing succeeded the seed is authoritative: a seed miss is "not found".
    config_maps_complete: bool,
    secrets_complete: bool,
    // Same, per namespace, for kinds recovered one namespace at a time.
    config_map_namespaces: BTreeSet<String>,
    secret_namespaces: BTreeSet<String>,
    failures: Vec<ResolutionError>,
}

fn object_key(namespace: &str, name: &str) -> ObjectKey {
    (namespace.to_string(), name.to_string())
}

fn config_map_data(cm: &ConfigMap) -> BTreeMap<String, String> {
    let mut data = cm.data.clone().unwrap_or_default();
    if let Some(binary) = &cm.binary_data {
        for (k, v) in binary {
            if let Ok(text) = String::from_utf8(v.0.clone()) {
                data.entry(k.clone()).or_insert(text);
            }
        }
    }
    data
}

/// Secret payloads travel base64-encoded; `ByteString` has already decoded them.
fn secret_data(secret: &Secret) -> BTreeMap<String, Vec<u8>> {
    let mut data: BTreeMap<String, Vec<u8>> = secret
        .data
        .as_ref()
        .map(|d| d.iter().map(|(k, v)| (k.clone(), v.0.clone())).collect())
        .unwrap_or_default();
    if let Some(string_data) = &secret.string_data {
        for (k, v) in string_data {
            data.insert(k.clone(), v.clone().into_bytes());
        }
    }
    data
}

enum Lookup<T> {
    Found(T),
    MissingObject,
    MissingKey,
}

impl<'a> ReferenceResolver<'a> {
    /// Seed the lookup caches from the listings fetched in this refresh.
    pub fn new(client: &'a dyn ClusterClient, raw: &RawCluster) -> Self {
        let config_maps = raw
            .config_maps
            .iter()
            .filter_map(|cm| {
                let ns = cm.metadata.namespace.as_deref()?;
                let name = cm.metadata.name.as_deref()?;
                Some((object_key(ns, name), Some(config_map_data(cm))))
            })
            .collect();
        let secrets = raw
            .secrets
            .iter()
            .filter_map(|s| {
                let ns = s.metadata.namespace.as_deref()?;
                let name = s.metadata.name.as_deref()?;
                Some((object_key(ns, name), Some(secret_data(s))))
            })
            .collect();

        Self {
            client,
            config_maps,
            secrets,
            config_maps_complete: raw.was_listed(ResourceKind::ConfigMaps),
            secrets_complete: raw.was_listed(ResourceKind::Secrets),
            config_map_namespaces: raw.covered_namespaces(ResourceKind::ConfigMaps),
            secret_namespaces: raw.covered_namespaces(ResourceKind::Secrets),
            failures: Vec::new(),
        }
    }

    pub fn failures(&self) -> &[ResolutionError] {
        &self.failures
    }

    pub fn into_failures(self) -> Vec<ResolutionError> {
        self.failures
    }

    async fn load_config_map(&mut self, namespace: &str, name: &str) -> Result<Option<&BTreeMap<String, String>>, FetchError> {
        let key = object_key(namespace, name);
        if !self.config_maps.contains_key(&key) {
            if self.config_maps_complete || self.config_map_namespaces.contains(namespace) {
                self.config_maps.insert(key.clone(), None);
            } else {
                match self.client.get_config_map(namespace, name).await {
                    Ok(cm) => {
                        self.config_maps.insert(key.clone(), cm.as_ref().map(config_map_data));
                    }
                    Err(e) => {
                        // cache the miss so one denied read is not retried per env var
                        self.config_maps.insert(key, None);
                        return Err(e);
                    }
                }
            }
        }
        Ok(self.config_maps.get(&key).and_then(|v| v.as_ref()))
    }

    async fn load_secret(&mut self, namespace: &str, name: &str) -> Result<Option<&BTreeMap<String, Vec<u8>>>, FetchError> {
        let key = object_key(namespace, name);
        if !self.secrets.contains_key(&key) {
            if self.secrets_complete || self.secret_namespaces.contains(namespace) {
                self.secrets.insert(key.clone(), None);
            } else {
                match self.client.get_secret(namespace, name).await {
                    Ok(secret) => {
                        self.secrets.insert(key.clone(), secret.as_ref().map(secret_data));
                    }
                    Err(e) => {
                        self.secrets.insert(key, None);
                        return Err(e);
                    }
                }
            }
        }
        Ok(self.secrets.get(&key).and_then(|v| v.as_ref()))
    }

    async fn config_map_value(&mut self, namespace: &str, name: &str, key: &str) -> Result<Lookup<String>, FetchError> {
        if name.is_empty() {
            return Ok(Lookup::MissingObject);
        }
        Ok(match self.load_config_map(namespace, name).await? {
            None => Lookup::MissingObject,
            Some(data) => match data.get(key) {
                Some(v) => Lookup::Found(v.clone()),
                None => Lookup::MissingKey,
            },
        })
    }

    async fn secret_value(&mut self, namespace: &str, name: &str, key: &str) -> Result<Lookup<Vec<u8>>, FetchError> {
        if name.is_empty() {
            return Ok(Lookup::MissingObject);
        }
        Ok(match self.load_secret(namespace, name).await? {
            None => Lookup::MissingObject,
            Some(data) => match data.get(key) {
                Some(v) => Lookup::Found(v.clone()),
                None => Lookup::MissingKey,
            },
        })
    }

    fn record(&mut self, optional: bool, err: ResolutionError) {
        if optional {
            debug!("Optional reference not resolved: {}", err);
        } else {
            warn!("Unresolved reference: {}", err);
            self.failures.push(err);
        }
    }

    pub async fn resolve_pod(&mut self, pod: &Pod) -> ResolvedPod {
        let name = pod.metadata.name.clone().unwrap_or_default();
        let namespace = pod.metadata.namespace.clone().unwrap_or_else(|| "default".to_string());
        let spec = pod.spec.as_ref();
        let volumes: &[Volume] = spec.and_then(|s| s.volumes.as_deref()).unwrap_or(&[]);

        let mut containers = Vec::new();
        if let Some(spec) = spec {
            for container in &spec.containers {
                containers.push(self.resolve_container(pod, &name, &namespace, container, volumes).await);
            }
        }

        ResolvedPod {
            phase: derive_pod_phase(pod),
            node: spec.and_then(|s| s.node_name.clone()),
            restart_count: pod_restart_count(pod),
            name,
            namespace,
            containers,
        }
    }

    async fn resolve_container(
        &mut self,
        pod: &Pod,
        pod_name: &str,
        namespace: &str,
        container: &Container,
        volumes: &[Volume],
    ) -> ContainerDetail {
        let env = self.resolve_env(pod, pod_name, namespace, container).await;
        let volume_mounts = self.resolve_mounts(pod_name, container, volumes);
        let (restart_count, ready) = container_status(pod, &container.name);

        ContainerDetail {
            name: container.name.clone(),
            image: container.image.clone(),
            ports: container
                .ports
                .as_ref()
                .map(|ports| {
                    ports
                        .iter()
                        .map(|p| PortInfo {
                            container_port: p.container_port,
                            protocol: p.protocol.clone().unwrap_or_else(|| "TCP".to_string()),
                            host_port: p.host_port,
                            name: p.name.clone(),
                        })
                        .collect()
                })
                .unwrap_or_default(),
            env,
            readiness_probe: container.readiness_probe.as_ref().map(probe_info),
            volume_mounts,
            restart_count,
            ready,
        }
    }

    async fn resolve_env(&mut self, pod: &Pod, pod_name: &str, namespace: &str, container: &Container) -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();

        // envFrom first so explicit env entries override imported keys
        for source in container.env_from.iter().flatten() {
            let prefix = source.prefix.clone().unwrap_or_default();
            if let Some(cm_ref) = &source.config_map_ref {
                let optional = cm_ref.optional.unwrap_or(false);
                match self.load_config_map(namespace, &cm_ref.name).await {
                    Ok(Some(data)) => {
                        for (k, v) in data {
                            env.insert(format!("{}{}", prefix, k), v.clone());
                        }
                    }
                    Ok(None) => self.record(
                        optional,
                        ResolutionError::MissingConfigMap {
                            pod: pod_name.to_string(),
                            container: container.name.clone(),
                            var: format!("{}*", prefix),
                            namespace: namespace.to_string(),
                            name: cm_ref.name.clone(),
                        },
                    ),
                    Err(source) => self.record(
                        optional,
                        ResolutionError::Lookup { pod: pod_name.to_string(), container: container.name.clone(), source },
                    ),
                }
            }
            if let Some(secret_ref) = &source.secret_ref {
                let optional = secret_ref.optional.unwrap_or(false);
                match self.load_secret(namespace, &secret_ref.name).await {
                    Ok(Some(data)) => {
                        let decoded: Vec<(String, Option<String>)> = data
                            .iter()
                            .map(|(k, v)| (k.clone(), String::from_utf8(v.clone()).ok()))
                            .collect();
                        for (k, v) in decoded {
                            match v {
                                Some(text) => {
                                    env.insert(format!("{}{}", prefix, k), text);
                                }
                                None => self.record(
                                    optional,
                                    ResolutionError::NotUtf8 {
                                        pod: pod_name.to_string(),
                                        container: container.name.clone(),
                                        var: format!("{}{}", prefix, k),
                                    },
                                ),
                            }
                        }
                    }
                    Ok(None) => self.record(
                        optional,
                        ResolutionError::MissingSecret {
                            pod: pod_name.to_string(),
                            container: container.name.clone(),
                            var: format!("{}*", prefix),
                            namespace: namespace.to_string(),
                            name: secret_ref.name.clone(),
                        },
                    ),
                    Err(source) => self.record(
                        optional,
                        ResolutionError::Lookup { pod: pod_name.to_string(), container: container.name.clone(), source },
                    ),
                }
            }
        }

        for var in container.env.iter().flatten() {
            match self.resolve_var(pod, pod_name, namespace, &container.name, var).await {
                Some(value) => {
                    env.insert(var.name.clone(), value);
                }
                None => {
                    // an unresolved explicit entry must not leak an envFrom value under the same name
                    env.remove(&var.name);
                }
            }
        }

        env
    }

    async fn resolve_var(&mut self, pod: &Pod, pod_name: &str, namespace: &str, container: &str, var: &EnvVar) -> Option<String> {
        let Some(source) = &var.value_from else {
            return Some(var.value.clone().unwrap_or_default());
        };
        if let Some(value) = &var.value {
            return Some(value.clone());
        }

        let ctx = |var: &EnvVar| (pod_name.to_string(), container.to_string(), var.name.clone());

        if let Some(selector) = &source.config_map_key_ref {
            let optional = selector.optional.unwrap_or(false);
            let (pod, container, var_name) = ctx(var);
            return match self.config_map_value(namespace, &selector.name, &selector.key).await {
                Ok(Lookup::Found(v)) => Some(v),
                Ok(Lookup::MissingObject) => {
                    self.record(
                        optional,
                        ResolutionError::MissingConfigMap {
                            pod,
                            container,
                            var: var_name,
                            namespace: namespace.to_string(),
                            name: selector.name.clone(),
                        },
                    );
                    None
                }
                Ok(Lookup::MissingKey) => {
                    self.record(
                        optional,
                        ResolutionError::MissingConfigMapKey {
                            pod,
                            container,
                            var: var_name,
                            namespace: namespace.to_string(),
                            name: selector.name.clone(),
                            key: selector.key.clone(),
                        },
                    );
                    None
                }
                Err(source) => {
                    self.record(optional, ResolutionError::Lookup { pod, container, source });
                    None
                }
            };
        }

        if let Some(selector) = &source.secret_key_ref {
            let optional = selector.optional.unwrap_or(false);
            let (pod, container, var_name) = ctx(var);
            return match self.secret_value(namespace, &selector.name, &selector.key).await {
                Ok(Lookup::Found(bytes)) => match String::from_utf8(bytes) {
                    Ok(text) => Some(text),
                    Err(_) => {
                        self.record(optional, ResolutionError::NotUtf8 { pod, container, var: var_name });
                        None
                    }
                },
                Ok(Lookup::MissingObject) => {
                    self.record(
                        optional,
                        ResolutionError::MissingSecret {
                            pod,
                            container,
                            var: var_name,
                            namespace: namespace.to_string(),
                            name: selector.name.clone(),
                        },
                    );
                    None
                }
                Ok(Lookup::MissingKey) => {
                    self.record(
                        optional,
                        ResolutionError::MissingSecretKey {
                            pod,
                            container,
                            var: var_name,
                            namespace: namespace.to_string(),
                            name: selector.name.clone(),
                            key: selector.key.clone(),
                        },
                    );
                    None
                }
                Err(source) => {
                    self.record(optional, ResolutionError::Lookup { pod, container, source });
                    None
                }
            };
        }

        if let Some(field) = &source.field_ref {
            let value = downward_field(pod, &field.field_path);
            if value.is_none() {
                let (pod, container, var_name) = ctx(var);
                self.record(
                    false,
                    ResolutionError::Unsupported {
                        pod,
                        container,
                        var: var_name,
                        source_kind: format!("fieldRef {}", field.field_path),
                    },
                );
            }
            return value;
        }

        let (pod, container, var_name) = ctx(var);
        let source_kind = if source.resource_field_ref.is_some() { "resourceFieldRef" } else { "unknown" };
        self.record(
            false,
            ResolutionError::Unsupported { pod, container, var: var_name, source_kind: source_kind.to_string() },
        );
        None
    }

    fn resolve_mounts(&mut self, pod_name: &str, container: &Container, volumes: &[Volume]) -> Vec<MountDetail> {
        let mut mounts = Vec::new();
        for mount in container.volume_mounts.iter().flatten() {
            let volume = volumes.iter().find(|v| v.name == mount.name);
            if volume.is_none() {
                self.record(
                    false,
                    ResolutionError::UndeclaredVolume {
                        pod: pod_name.to_string(),
                        container: container.name.clone(),
                        volume: mount.name.clone(),
                        mount_path: mount.mount_path.clone(),
                    },
                );
            }
            mounts.push(MountDetail {
                volume: mount.name.clone(),
                mount_path: mount.mount_path.clone(),
                sub_path: mount.sub_path.clone().filter(|s| !s.is_empty()),
                read_only: mount.read_only.unwrap_or(false),
                claim_name: volume
                    .and_then(|v| v.persistent_volume_claim.as_ref())
                    .map(|pvc| pvc.claim_name.clone()),
            });
        }
        mounts
    }
}

fn probe_info(probe: &Probe) -> ProbeInfo {
    if let Some(http) = &probe.http_get {
        return ProbeInfo {
            kind: "http".to_string(),
            path: http.path.clone(),
            port: Some(int_or_string(&http.port)),
            scheme: Some(http.scheme.clone().unwrap_or_else(|| "HTTP".to_string())),
        };
    }
    if let Some(tcp) = &probe.tcp_socket {
        return ProbeInfo { kind: "tcp".to_string(), path: None, port: Some(int_or_string(&tcp.port)), scheme: None };
    }
    if let Some(grpc) = &probe.grpc {
        return ProbeInfo { kind: "grpc".to_string(), path: None, port: Some(grpc.port.to_string()), scheme: None };
    }
    ProbeInfo { kind: "exec".to_string(), path: None, port: None, scheme: None }
}

/// Downward API fields available through `fieldRef`.
fn downward_field(pod: &Pod, path: &str) -> Option<String> {
    let meta = &pod.metadata;
    let spec = pod.spec.as_ref();
    let status = pod.status.as_ref();

    if let Some(key) = bracketed(path, "metadata.labels") {
        return meta.labels.as_ref().and_then(|l| l.get(key)).cloned();
    }
    if let Some(key) = bracketed(path, "metadata.annotations") {
        return meta.annotations.as_ref().and_then(|a| a.get(key)).cloned();
    }

    match path {
        "metadata.name" => meta.name.clone(),
        "metadata.namespace" => meta.namespace.clone(),
        "metadata.uid" => meta.uid.clone(),
        "spec.nodeName" => spec.and_then(|s| s.node_name.clone()),
        "spec.serviceAccountName" => spec.and_then(|s| s.service_account_name.clone()),
        "status.podIP" => status.and_then(|s| s.pod_ip.clone()),
        "status.hostIP" => status.and_then(|s| s.host_ip.clone()),
        _ => None,
    }
}

// "metadata.labels['app']" -> Some("app")
fn bracketed<'p>(path: &'p str, field: &str) -> Option<&'p str> {
    path.strip_prefix(field)?
        .strip_prefix("['")?
        .strip_suffix("']")
}

/// PVC-backed mounts keyed `"{base}/{container}/{volume}"`.
pub fn pvc_mount_entries(base_name: &str, containers: &[ContainerDetail]) -> Vec<(String, MountDetail)> {
    containers
        .iter()
        .flat_map(|c| {
            c.volume_mounts
                .iter()
                .filter(|m| m.claim_name.is_some())
                .map(move |m| (format!("{}/{}/{}", base_name, c.name, m.volume), m.clone()))
        })
        .collect()
}

/// The `"{base}_db"` convenience entry: first PVC mount of the first container
/// whose name looks like a database.
pub fn database_mount(base_name: &str, containers: &[ContainerDetail]) -> Option<(String, MountDetail)> {
    containers
        .iter()
        .filter(|c| is_database_container(&c.name))
        .find_map(|c| c.volume_mounts.iter().find(|m| m.claim_name.is_some()))
        .map(|m| (format!("{}_db", base_name), m.clone()))
}
