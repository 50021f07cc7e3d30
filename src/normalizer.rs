use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::{Event, Volume};
use log::{debug, warn};

use crate::fetcher::{RawCluster, ResourceKind};
use crate::models::{
    ConfigMapInfo, DeclaredVolume, DeploymentInfo, EventInfo, NamespaceInfo, NodeInfo, PodInfo, PodPhase, PvcInfo,
    SecretInfo, ServiceInfo, ServicePortInfo, Snapshot, VolumeKind,
};
use crate::naming::NamingRules;
use crate::resolver::{database_mount, pvc_mount_entries, ResolvedPod};
use crate::utils::{derive_node_status, int_or_string, node_roles};

/// Most recent warning events kept in the snapshot.
pub const MAX_WARNING_EVENTS: usize = 50;

/// Assemble one snapshot from the fetched listings and the resolved pods.
///
/// Never fails. Kinds missing from `raw` contribute nothing. Pods and services
/// are visited in (namespace, name) order so every overwrite tie-break is
/// reproducible regardless of API response order.
pub fn build_snapshot(
    raw: &RawCluster,
    resolved: &[ResolvedPod],
    naming: &NamingRules,
    generated_at: DateTime<Utc>,
) -> Snapshot {
    for kind in ResourceKind::ALL {
        if !raw.has_any(kind) {
            warn!("Snapshot built without {}", kind);
        } else if !raw.was_listed(kind) {
            warn!("Snapshot built with {} from some namespaces only", kind);
        }
    }

    let mut pods_sorted: Vec<&ResolvedPod> = resolved.iter().collect();
    pods_sorted.sort_by(|a, b| (&a.namespace, &a.name).cmp(&(&b.namespace, &b.name)));

    let mut namespaces: Vec<NamespaceInfo> = raw
        .namespaces
        .iter()
        .filter_map(|ns| {
            Some(NamespaceInfo {
                name: ns.metadata.name.clone()?,
                labels: ns.metadata.labels.clone().unwrap_or_default(),
            })
        })
        .collect();
    namespaces.sort_by(|a, b| a.name.cmp(&b.name));

    // Aggregates
    let mut namespace_pod_counts: BTreeMap<String, usize> =
        namespaces.iter().map(|ns| (ns.name.clone(), 0)).collect();
    let mut namespace_restart_counts: BTreeMap<String, i64> =
        namespaces.iter().map(|ns| (ns.name.clone(), 0)).collect();
    let mut running_pod_count = 0;

    // Indices
    let mut pods = Vec::with_capacity(pods_sorted.len());
    let mut pod_status = BTreeMap::new();
    let mut pod_details = BTreeMap::new();
    let mut env_vars = BTreeMap::new();
    let mut volume_mounts = BTreeMap::new();

    for pod in &pods_sorted {
        let base = naming.base_name(&pod.name);

        if pod.phase == PodPhase::Running {
            running_pod_count += 1;
        }
        *namespace_pod_counts.entry(pod.namespace.clone()).or_insert(0) += 1;
        *namespace_restart_counts.entry(pod.namespace.clone()).or_insert(0) += pod.restart_count;

        pod_status.insert(base.clone(), pod.phase);

        for container in &pod.containers {
            for (env_name, value) in &container.env {
                env_vars.insert(format!("{}/{}/{}", base, container.name, env_name), value.clone());
            }
            pod_details.insert(format!("{}/{}", base, container.name), container.clone());
        }

        for (key, mount) in pvc_mount_entries(&base, &pod.containers) {
            volume_mounts.insert(key, mount);
        }
        if let Some((key, mount)) = database_mount(&base, &pod.containers) {
            if volume_mounts.contains_key(&key) {
                debug!("Keeping existing {} entry, ignoring {}/{}", key, pod.namespace, pod.name);
            } else {
                volume_mounts.insert(key, mount);
            }
        }

        pods.push(PodInfo {
            name: pod.name.clone(),
            base_name: base,
            namespace: pod.namespace.clone(),
            phase: pod.phase,
            node: pod.node.clone(),
            restart_count: pod.restart_count,
            containers: pod.containers.clone(),
        });
    }

    let services = services(raw);
    let mut service_to_namespace = BTreeMap::new();
    for svc in &services {
        service_to_namespace.insert(svc.name.clone(), svc.namespace.clone());
        service_to_namespace.insert(svc.name.to_lowercase(), svc.namespace.clone());
    }

    Snapshot {
        generated_at,
        total_pod_count: pods.len(),
        running_pod_count,
        namespaces,
        nodes: nodes(raw),
        pods,
        services,
        deployments: deployments(raw),
        secrets: secrets(raw),
        config_maps: config_maps(raw),
        persistent_volume_claims: persistent_volume_claims(raw),
        warning_events: warning_events(&raw.events),
        namespace_pod_counts,
        namespace_restart_counts,
        pod_status,
        pod_details,
        env_vars,
        volume_mounts,
        service_to_namespace,
    }
}

fn namespace_of(meta: &k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta) -> String {
    meta.namespace.clone().unwrap_or_else(|| "default".to_string())
}

fn services(raw: &RawCluster) -> Vec<ServiceInfo> {
    let mut services: Vec<ServiceInfo> = raw
        .services
        .iter()
        .filter_map(|s| {
            let spec = s.spec.as_ref();
            Some(ServiceInfo {
                name: s.metadata.name.clone()?,
                namespace: namespace_of(&s.metadata),
                service_type: spec.and_then(|sp| sp.type_.clone()).unwrap_or_else(|| "ClusterIP".to_string()),
                cluster_ip: spec.and_then(|sp| sp.cluster_ip.clone()),
                ports: spec
                    .and_then(|sp| sp.ports.as_ref())
                    .map(|ports| {
                        ports
                            .iter()
                            .map(|p| ServicePortInfo {
                                name: p.name.clone(),
                                port: p.port,
                                target_port: p.target_port.as_ref().map(int_or_string),
                                protocol: p.protocol.clone().unwrap_or_else(|| "TCP".to_string()),
                            })
                            .collect()
                    })
                    .unwrap_or_default(),
            })
        })
        .collect();
    services.sort_by(|a, b| (&a.namespace, &a.name).cmp(&(&b.namespace, &b.name)));
    services
}

fn declared_volume(volume: &Volume) -> DeclaredVolume {
    let kind = if let Some(pvc) = &volume.persistent_volume_claim {
        VolumeKind::PersistentVolumeClaim { claim_name: pvc.claim_name.clone() }
    } else if let Some(cm) = &volume.config_map {
        VolumeKind::ConfigMap { name: cm.name.clone() }
    } else if let Some(secret) = &volume.secret {
        VolumeKind::Secret { secret_name: secret.secret_name.clone().unwrap_or_default() }
    } else if volume.empty_dir.is_some() {
        VolumeKind::EmptyDir
    } else {
        VolumeKind::Other
    };
    DeclaredVolume { name: volume.name.clone(), kind }
}

fn deployments(raw: &RawCluster) -> Vec<DeploymentInfo> {
    let mut deployments: Vec<DeploymentInfo> = raw
        .deployments
        .iter()
        .filter_map(|d| {
            let status = d.status.as_ref();
            Some(DeploymentInfo {
                name: d.metadata.name.clone()?,
                namespace: namespace_of(&d.metadata),
                replicas: d.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1),
                available_replicas: status.and_then(|s| s.available_replicas).unwrap_or(0),
                ready_replicas: status.and_then(|s| s.ready_replicas).unwrap_or(0),
                volumes: d
                    .spec
                    .as_ref()
                    .and_then(|s| s.template.spec.as_ref())
                    .and_then(|s| s.volumes.as_ref())
                    .map(|vols| vols.iter().map(declared_volume).collect())
                    .unwrap_or_default(),
            })
        })
        .collect();
    deployments.sort_by(|a, b| (&a.namespace, &a.name).cmp(&(&b.namespace, &b.name)));
    deployments
}

fn secrets(raw: &RawCluster) -> Vec<SecretInfo> {
    let mut secrets: Vec<SecretInfo> = raw
        .secrets
        .iter()
        .filter_map(|s| {
            Some(SecretInfo {
                name: s.metadata.name.clone()?,
                namespace: namespace_of(&s.metadata),
                type_: s.type_.clone().unwrap_or_else(|| "Opaque".to_string()),
            })
        })
        .collect();
    secrets.sort_by(|a, b| (&a.namespace, &a.name).cmp(&(&b.namespace, &b.name)));
    secrets
}

fn config_maps(raw: &RawCluster) -> Vec<ConfigMapInfo> {
    let mut config_maps: Vec<ConfigMapInfo> = raw
        .config_maps
        .iter()
        .filter_map(|cm| {
            let mut keys: Vec<String> = cm.data.iter().flat_map(|d| d.keys().cloned()).collect();
            keys.extend(cm.binary_data.iter().flat_map(|d| d.keys().cloned()));
            keys.sort();
            Some(ConfigMapInfo {
                name: cm.metadata.name.clone()?,
                namespace: namespace_of(&cm.metadata),
                keys,
            })
        })
        .collect();
    config_maps.sort_by(|a, b| (&a.namespace, &a.name).cmp(&(&b.namespace, &b.name)));
    config_maps
}

fn nodes(raw: &RawCluster) -> Vec<NodeInfo> {
    let mut nodes: Vec<NodeInfo> = raw
        .nodes
        .iter()
        .filter_map(|n| {
            Some(NodeInfo {
                name: n.metadata.name.clone()?,
                status: derive_node_status(n),
                roles: node_roles(n),
                kubelet_version: n
                    .status
                    .as_ref()
                    .and_then(|s| s.node_info.as_ref())
                    .map(|info| info.kubelet_version.clone()),
            })
        })
        .collect();
    nodes.sort_by(|a, b| a.name.cmp(&b.name));
    nodes
}

fn persistent_volume_claims(raw: &RawCluster) -> Vec<PvcInfo> {
    let mut pvcs: Vec<PvcInfo> = raw
        .persistent_volume_claims
        .iter()
        .filter_map(|pvc| {
            let spec = pvc.spec.as_ref();
            let status = pvc.status.as_ref();
            Some(PvcInfo {
                name: pvc.metadata.name.clone()?,
                namespace: namespace_of(&pvc.metadata),
                phase: status.and_then(|s| s.phase.clone()).unwrap_or_else(|| "Unknown".to_string()),
                storage_class: spec.and_then(|s| s.storage_class_name.clone()),
                capacity: status
                    .and_then(|s| s.capacity.as_ref())
                    .and_then(|c| c.get("storage"))
                    .map(|q| q.0.clone()),
                volume_name: spec.and_then(|s| s.volume_name.clone()),
            })
        })
        .collect();
    pvcs.sort_by(|a, b| (&a.namespace, &a.name).cmp(&(&b.namespace, &b.name)));
    pvcs
}

fn event_last_seen(event: &Event) -> Option<DateTime<Utc>> {
    event
        .last_timestamp
        .as_ref()
        .map(|t| t.0)
        .or_else(|| event.event_time.as_ref().map(|t| t.0))
        .or_else(|| event.metadata.creation_timestamp.as_ref().map(|t| t.0))
}

fn warning_events(events: &[Event]) -> Vec<EventInfo> {
    let mut warnings: Vec<(Option<DateTime<Utc>>, EventInfo)> = events
        .iter()
        .filter(|e| e.type_.as_deref() == Some("Warning"))
        .map(|e| {
            let last_seen = event_last_seen(e);
            (
                last_seen,
                EventInfo {
                    namespace: e
                        .involved_object
                        .namespace
                        .clone()
                        .unwrap_or_else(|| namespace_of(&e.metadata)),
                    kind: e.involved_object.kind.clone().unwrap_or_default(),
                    name: e.involved_object.name.clone().unwrap_or_default(),
                    reason: e.reason.clone().unwrap_or_default(),
                    message: e.message.clone().unwrap_or_default(),
                    count: e.count.unwrap_or(1),
                    last_seen: last_seen.map(|t| t.to_rfc3339()),
                },
            )
        })
        .collect();

    // newest first, ties broken by object so the order is stable
    warnings.sort_by(|(ta, a), (tb, b)| {
        tb.cmp(ta)
            .then_with(|| (&a.namespace, &a.kind, &a.name, &a.reason).cmp(&(&b.namespace, &b.kind, &b.name, &b.reason)))
    });
    warnings.truncate(MAX_WARNING_EVENTS);
    warnings.into_iter().map(|(_, e)| e).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::fetch_all;
    use crate::resolver::ReferenceResolver;
    use crate::testing::{fixtures, FakeClusterClient};
    use serde_json::json;

    async fn build(client: &FakeClusterClient) -> Snapshot {
        let outcome = fetch_all(client, &ResourceKind::ALL).await;
        let mut resolver = ReferenceResolver::new(client, &outcome.raw);
        let mut resolved = Vec::new();
        for pod in &outcome.raw.pods {
            resolved.push(resolver.resolve_pod(pod).await);
        }
        build_snapshot(&outcome.raw, &resolved, &NamingRules::default(), Utc::now())
    }

    #[tokio::test]
    async fn snowflake_scenario() {
        let client = FakeClusterClient::new()
            .with_namespaces(vec![fixtures::namespace("production")])
            .with_pods(vec![
                fixtures::pod("production", "snowflake-76b5665475-jzmwq", "Running", vec![]),
                fixtures::pod("production", "snowflake-76b5665475-abcde", "Failed", vec![]),
            ]);

        let snapshot = build(&client).await;

        assert_eq!(snapshot.running_pod_count, 1);
        assert_eq!(snapshot.total_pod_count, 2);
        assert_eq!(snapshot.namespace_pod_counts.get("production"), Some(&2));
        // sorted by name: "...-abcde" (Failed) then "...-jzmwq" (Running), last write wins
        assert_eq!(snapshot.pod_status.get("snowflake"), Some(&PodPhase::Running));
        assert_eq!(snapshot.pod_status.len(), 1);
    }

    #[tokio::test]
    async fn collapsed_replicas_keep_their_own_containers() {
        let replica = |name: &str, phase: &str, image: &str| {
            fixtures::pod_from(json!({
                "metadata": {"name": name, "namespace": "production"},
                "spec": {"containers": [{"name": "app", "image": image, "env": [{"name": "BUILD", "value": image}]}]},
                "status": {"phase": phase}
            }))
        };
        let client = FakeClusterClient::new().with_pods(vec![
            replica("snowflake-76b5665475-jzmwq", "Running", "snowflake:2"),
            replica("snowflake-76b5665475-abcde", "Failed", "snowflake:1"),
        ]);

        let snapshot = build(&client).await;

        let failed = snapshot.pods.iter().find(|p| p.phase == PodPhase::Failed).unwrap();
        assert_eq!(failed.name, "snowflake-76b5665475-abcde");
        assert_eq!(failed.containers[0].image.as_deref(), Some("snowflake:1"));
        assert_eq!(failed.containers[0].env.get("BUILD").map(String::as_str), Some("snowflake:1"));
        // the base-name index holds whichever replica sorted last
        assert_eq!(snapshot.pod_details.get("snowflake/app").and_then(|c| c.image.as_deref()), Some("snowflake:2"));
    }

    #[tokio::test]
    async fn counts_are_consistent_with_pod_list() {
        let client = FakeClusterClient::new()
            .with_namespaces(vec![fixtures::namespace("a"), fixtures::namespace("b"), fixtures::namespace("empty")])
            .with_pods(vec![
                fixtures::pod("a", "web-5d8f7c9b6-x2x9z", "Running", vec![]),
                fixtures::pod("a", "web-5d8f7c9b6-q8w7e", "Pending", vec![]),
                fixtures::pod("b", "job-x7k2p", "Succeeded", vec![]),
                fixtures::pod("b", "db-0", "Running", vec![]),
                // namespace not present in the namespace listing
                fixtures::pod("stray", "agent-k2j4l", "Unknown", vec![]),
            ]);

        let snapshot = build(&client).await;

        let running = snapshot.pods.iter().filter(|p| p.phase == PodPhase::Running).count();
        assert_eq!(snapshot.running_pod_count, running);
        assert_eq!(snapshot.total_pod_count, snapshot.pods.len());
        assert_eq!(snapshot.namespace_pod_counts.values().sum::<usize>(), snapshot.total_pod_count);
        assert_eq!(snapshot.namespace_pod_counts.get("empty"), Some(&0));
        assert_eq!(snapshot.namespace_pod_counts.get("stray"), Some(&1));
    }

    #[tokio::test]
    async fn restart_counts_are_summed_per_namespace() {
        let restarting = |ns: &str, name: &str, restarts: i32| {
            fixtures::pod_from(json!({
                "metadata": {"name": name, "namespace": ns},
                "spec": {"containers": [{"name": "app"}]},
                "status": {"phase": "Running", "containerStatuses": [
                    {"name": "app", "image": "app", "imageID": "", "ready": true, "restartCount": restarts}
                ]}
            }))
        };
        let client = FakeClusterClient::new()
            .with_namespaces(vec![fixtures::namespace("ops")])
            .with_pods(vec![restarting("ops", "a-0", 2), restarting("ops", "b-0", 5), restarting("dev", "c-0", 1)]);

        let snapshot = build(&client).await;

        assert_eq!(snapshot.namespace_restart_counts.get("ops"), Some(&7));
        assert_eq!(snapshot.namespace_restart_counts.get("dev"), Some(&1));
        assert_eq!(snapshot.pod_details.get("a/app").map(|c| c.restart_count), Some(2));
    }

    #[tokio::test]
    async fn service_index_covers_both_cases() {
        let client = FakeClusterClient::new().with_services(vec![
            fixtures::service("harbor-system", "Harbor", &[(80, 8080)]),
            fixtures::service("default", "api", &[(443, 8443)]),
        ]);

        let snapshot = build(&client).await;

        assert_eq!(snapshot.service_to_namespace.get("harbor").map(String::as_str), Some("harbor-system"));
        assert_eq!(snapshot.service_to_namespace.get("Harbor").map(String::as_str), Some("harbor-system"));
        let harbor = snapshot.services.iter().find(|s| s.name == "Harbor").unwrap();
        assert_eq!(harbor.ports[0].port, 80);
        assert_eq!(harbor.ports[0].target_port.as_deref(), Some("8080"));
        assert_eq!(harbor.ports[0].protocol, "TCP");
    }

    #[tokio::test]
    async fn service_name_collision_last_namespace_wins() {
        // listing order deliberately reversed
        let client = FakeClusterClient::new().with_services(vec![
            fixtures::service("zeta", "redis", &[(6379, 6379)]),
            fixtures::service("alpha", "redis", &[(6379, 6379)]),
        ]);

        let snapshot = build(&client).await;

        assert_eq!(snapshot.service_to_namespace.get("redis").map(String::as_str), Some("zeta"));
    }

    #[tokio::test]
    async fn missing_configmap_leaves_env_key_absent() {
        let client = FakeClusterClient::new().with_pods(vec![fixtures::pod_from(json!({
            "metadata": {"name": "app-6b7c8d9f5-abc12", "namespace": "default"},
            "spec": {"containers": [{
                "name": "web",
                "env": [
                    {"name": "GREETING", "value": "hello"},
                    {"name": "FROM_CM", "valueFrom": {"configMapKeyRef": {"name": "absent", "key": "k"}}}
                ]
            }]},
            "status": {"phase": "Running"}
        }))]);

        let snapshot = build(&client).await;

        let web = snapshot.pod_details.get("app/web").unwrap();
        assert!(!web.env.contains_key("FROM_CM"));
        assert_eq!(web.env.get("GREETING").map(String::as_str), Some("hello"));
        assert_eq!(snapshot.env_vars.get("app/web/GREETING").map(String::as_str), Some("hello"));
        assert!(!snapshot.env_vars.contains_key("app/web/FROM_CM"));
    }

    #[tokio::test]
    async fn volume_and_database_keys() {
        let db_pod = |name: &str, claim: &str| {
            fixtures::pod_from(json!({
                "metadata": {"name": name, "namespace": "data"},
                "spec": {
                    "containers": [
                        {"name": "exporter"},
                        {"name": "postgres-db", "volumeMounts": [{"name": "pgdata", "mountPath": "/var/lib/postgresql/data", "subPath": "pg"}]}
                    ],
                    "volumes": [{"name": "pgdata", "persistentVolumeClaim": {"claimName": claim}}]
                },
                "status": {"phase": "Running"}
            }))
        };
        let client = FakeClusterClient::new().with_pods(vec![
            db_pod("orders-1", "orders-data-1"),
            db_pod("orders-0", "orders-data-0"),
        ]);

        let snapshot = build(&client).await;

        let db = snapshot.volume_mounts.get("orders_db").unwrap();
        // orders-0 sorts first and owns the convenience key
        assert_eq!(db.claim_name.as_deref(), Some("orders-data-0"));
        assert_eq!(db.mount_path, "/var/lib/postgresql/data");
        assert_eq!(db.sub_path.as_deref(), Some("pg"));
        // the hierarchical key is last-write-wins
        let hier = snapshot.volume_mounts.get("orders/postgres-db/pgdata").unwrap();
        assert_eq!(hier.claim_name.as_deref(), Some("orders-data-1"));
    }

    #[tokio::test]
    async fn supplementary_kinds_are_summarised() {
        let client = FakeClusterClient::new()
            .with_nodes(vec![fixtures::node("worker-1", true)])
            .with_deployments(vec![fixtures::deployment("web", "shop", 3, 2, Some("web-data"))])
            .with_secrets(vec![fixtures::secret("shop", "tls", &[("tls.key", "key")])])
            .with_config_maps(vec![fixtures::config_map("shop", "settings", &[("b", "2"), ("a", "1")])])
            .with_pvcs(vec![fixtures::pvc("shop", "web-data", "Bound", "10Gi")])
            .with_events(vec![
                fixtures::event("shop", "web-1", "Warning", "BackOff", "2024-05-01T10:00:00Z"),
                fixtures::event("shop", "web-2", "Normal", "Pulled", "2024-05-01T11:00:00Z"),
                fixtures::event("shop", "web-3", "Warning", "FailedMount", "2024-05-01T12:00:00Z"),
            ]);

        let snapshot = build(&client).await;

        assert_eq!(snapshot.nodes[0].status, "Ready");
        assert_eq!(snapshot.deployments[0].replicas, 3);
        assert_eq!(snapshot.deployments[0].available_replicas, 2);
        assert_eq!(
            snapshot.deployments[0].volumes[0].kind,
            VolumeKind::PersistentVolumeClaim { claim_name: "web-data".to_string() }
        );
        assert_eq!(snapshot.secrets[0].type_, "Opaque");
        assert_eq!(snapshot.config_maps[0].keys, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(snapshot.persistent_volume_claims[0].capacity.as_deref(), Some("10Gi"));
        assert_eq!(snapshot.warning_events.len(), 2);
        assert_eq!(snapshot.warning_events[0].reason, "FailedMount");
    }

    #[test]
    fn missing_kinds_degrade_to_empty() {
        let snapshot = build_snapshot(&RawCluster::default(), &[], &NamingRules::default(), Utc::now());
        assert_eq!(snapshot.total_pod_count, 0);
        assert_eq!(snapshot.running_pod_count, 0);
        assert!(snapshot.namespaces.is_empty());
        assert!(snapshot.service_to_namespace.is_empty());
    }

    #[test]
    fn warning_events_are_capped() {
        let events: Vec<Event> = (0..MAX_WARNING_EVENTS + 10)
            .map(|i| fixtures::event("ns", &format!("pod-{}", i), "Warning", "BackOff", "2024-05-01T10:00:00Z"))
            .collect();
        assert_eq!(warning_events(&events).len(), MAX_WARNING_EVENTS);
    }
}
