use k8s_openapi::api::core::v1 as k8s_core;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use crate::models::PodPhase;

pub mod logging;

pub fn derive_pod_phase(pod: &k8s_core::Pod) -> PodPhase {
    PodPhase::from_phase(pod.status.as_ref().and_then(|s| s.phase.as_deref()))
}

/// Sum of restart counts over every container status of the pod.
pub fn pod_restart_count(pod: &k8s_core::Pod) -> i64 {
    pod.status
        .as_ref()
        .and_then(|s| s.container_statuses.as_ref())
        .map(|statuses| statuses.iter().map(|c| c.restart_count as i64).sum())
        .unwrap_or(0)
}

/// (restart count, ready) for one container; (0, false) when no status was reported yet.
pub fn container_status(pod: &k8s_core::Pod, container: &str) -> (i32, bool) {
    pod.status
        .as_ref()
        .and_then(|s| s.container_statuses.as_ref())
        .and_then(|statuses| statuses.iter().find(|c| c.name == container))
        .map(|c| (c.restart_count, c.ready))
        .unwrap_or((0, false))
}

pub fn derive_node_status(node: &k8s_core::Node) -> String {
    let mut status = "Unknown".to_string();
    if let Some(conds) = node.status.as_ref().and_then(|s| s.conditions.as_ref()) {
        for c in conds {
            if c.type_ == "Ready" {
                status = if c.status == "True" { "Ready".to_string() } else { "NotReady".to_string() };
            }
        }
    }
    status
}

pub fn node_roles(node: &k8s_core::Node) -> Vec<String> {
    let mut roles: Vec<String> = node
        .metadata
        .labels
        .as_ref()
        .map(|labels| {
            labels
                .keys()
                .filter_map(|k| k.strip_prefix("node-role.kubernetes.io/"))
                .filter(|role| !role.is_empty())
                .map(|role| role.to_string())
                .collect()
        })
        .unwrap_or_default();
    roles.sort();
    roles
}

pub fn is_database_container(name: &str) -> bool {
    let name = name.to_lowercase();
    name.contains("database") || name.contains("db")
}

pub fn int_or_string(value: &IntOrString) -> String {
    match value {
        IntOrString::Int(i) => i.to_string(),
        IntOrString::String(s) => s.clone(),
    }
}
