use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum PodPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl PodPhase {
    pub fn from_phase(phase: Option<&str>) -> Self {
        match phase {
            Some("Pending") => PodPhase::Pending,
            Some("Running") => PodPhase::Running,
            Some("Succeeded") => PodPhase::Succeeded,
            Some("Failed") => PodPhase::Failed,
            _ => PodPhase::Unknown,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct NamespaceInfo {
    pub name: String,
    pub labels: BTreeMap<String, String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct NodeInfo {
    pub name: String,
    pub status: String,
    pub roles: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kubelet_version: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct PodInfo {
    pub name: String,
    pub base_name: String,
    pub namespace: String,
    pub phase: PodPhase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node: Option<String>,
    pub restart_count: i64,
    /// Containers in declaration order. `Snapshot::pod_details` indexes the
    /// same data by base name.
    pub containers: Vec<ContainerDetail>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct PortInfo {
    pub container_port: i32,
    pub protocol: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_port: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ProbeInfo {
    pub kind: String, // "http", "tcp", "grpc", "exec"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheme: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct MountDetail {
    pub volume: String,
    pub mount_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub_path: Option<String>,
    pub read_only: bool,
    /// Set when the volume is backed by a persistent volume claim
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claim_name: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ContainerDetail {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    pub ports: Vec<PortInfo>,
    pub env: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub readiness_probe: Option<ProbeInfo>,
    pub volume_mounts: Vec<MountDetail>,
    pub restart_count: i32,
    pub ready: bool,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ServicePortInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub port: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_port: Option<String>,
    pub protocol: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ServiceInfo {
    pub name: String,
    pub namespace: String,
    pub service_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster_ip: Option<String>,
    pub ports: Vec<ServicePortInfo>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VolumeKind {
    PersistentVolumeClaim { claim_name: String },
    ConfigMap { name: String },
    Secret { secret_name: String },
    EmptyDir,
    Other,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct DeclaredVolume {
    pub name: String,
    #[serde(flatten)]
    pub kind: VolumeKind,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct DeploymentInfo {
    pub name: String,
    pub namespace: String,
    pub replicas: i32,
    pub available_replicas: i32,
    pub ready_replicas: i32,
    pub volumes: Vec<DeclaredVolume>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct SecretInfo {
    pub name: String,
    pub namespace: String,
    #[serde(rename = "type")]
    pub type_: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ConfigMapInfo {
    pub name: String,
    pub namespace: String,
    pub keys: Vec<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct PvcInfo {
    pub name: String,
    pub namespace: String,
    pub phase: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_class: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capacity: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume_name: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct EventInfo {
    pub namespace: String,
    pub kind: String,
    pub name: String,
    pub reason: String,
    pub message: String,
    pub count: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<String>,
}

/// Immutable, fully-resolved view of the cluster plus the derived indices the
/// answering prompt refers to by key shape.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Snapshot {
    pub generated_at: DateTime<Utc>,

    pub namespaces: Vec<NamespaceInfo>,
    pub nodes: Vec<NodeInfo>,
    pub pods: Vec<PodInfo>,
    pub services: Vec<ServiceInfo>,
    pub deployments: Vec<DeploymentInfo>,
    pub secrets: Vec<SecretInfo>,
    pub config_maps: Vec<ConfigMapInfo>,
    pub persistent_volume_claims: Vec<PvcInfo>,
    pub warning_events: Vec<EventInfo>,

    pub total_pod_count: usize,
    pub running_pod_count: usize,
    pub namespace_pod_counts: BTreeMap<String, usize>,
    pub namespace_restart_counts: BTreeMap<String, i64>,

    /// base name -> phase
    pub pod_status: BTreeMap<String, PodPhase>,
    /// "{base}/{container}"
    pub pod_details: BTreeMap<String, ContainerDetail>,
    /// "{base}/{container}/{env}"
    pub env_vars: BTreeMap<String, String>,
    /// "{base}/{container}/{volume}" and "{base}_db"
    pub volume_mounts: BTreeMap<String, MountDetail>,
    pub service_to_namespace: BTreeMap<String, String>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct QueryRequest {
    pub query: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct QueryResponse {
    pub query: String,
    pub answer: String,
}

#[derive(Serialize, Clone, Debug)]
pub struct KindFailure {
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub error: String,
}

#[derive(Serialize, Clone, Debug)]
pub struct RefreshReport {
    pub generated_at: DateTime<Utc>,
    pub namespaces: usize,
    pub pods: usize,
    pub running_pods: usize,
    pub services: usize,
    pub deployments: usize,
    pub fetch_failures: Vec<KindFailure>,
    pub resolution_failures: usize,
}
