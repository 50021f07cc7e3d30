use std::time::{Duration, Instant};

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{
    ConfigMap, Event, Namespace, Node, PersistentVolumeClaim, Pod, Secret, Service,
};
use kube::api::{Api, ListParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::Client;
use log::debug;
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;

use crate::error::FetchError;
use crate::fetcher::{ResourceKind, ResourceList};

/// Read-only access to the cluster. Injected into the fetcher and the resolver
/// so tests can substitute an in-memory cluster.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// List every object of `kind` across all namespaces.
    async fn list(&self, kind: ResourceKind) -> Result<ResourceList, FetchError>;

    /// List every object of a namespaced `kind` in one namespace. Used when the
    /// cluster-wide list is forbidden.
    async fn list_namespaced(&self, kind: ResourceKind, namespace: &str) -> Result<ResourceList, FetchError>;

    /// `Ok(None)` when the config map does not exist.
    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<Option<ConfigMap>, FetchError>;

    /// `Ok(None)` when the secret does not exist.
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, FetchError>;
}

// Cached clients are rebuilt after this long so rotated credentials get picked up.
const CLIENT_TTL: Duration = Duration::from_secs(120);

/// kube-rs backed client. The underlying `kube::Client` is created lazily and
/// reused for `CLIENT_TTL`.
pub struct KubeClusterClient {
    kubeconfig_path: Option<String>,
    context: Option<String>,
    cache: Mutex<Option<(Instant, Client)>>,
}

impl KubeClusterClient {
    pub fn new(kubeconfig_path: Option<String>, context: Option<String>) -> Self {
        Self {
            kubeconfig_path,
            context,
            cache: Mutex::new(None),
        }
    }

    async fn client(&self) -> Result<Client, String> {
        let mut cache = self.cache.lock().await;
        if let Some((created_at, client)) = cache.as_ref() {
            if created_at.elapsed() < CLIENT_TTL {
                return Ok(client.clone());
            }
        }

        let client = self.create_client().await?;
        *cache = Some((Instant::now(), client.clone()));
        Ok(client)
    }

    async fn create_client(&self) -> Result<Client, String> {
        match &self.context {
            Some(ctx) => debug!("Creating cluster client for context {}", ctx),
            None => debug!("Creating cluster client for the default context"),
        }

        let mut config = match (&self.kubeconfig_path, &self.context) {
            (None, None) => kube::Config::infer()
                .await
                .map_err(|e| format!("Failed to infer cluster config: {}", e))?,
            (path, context) => {
                let kubeconfig = if let Some(p) = path {
                    Kubeconfig::read_from(p).map_err(|e| format!("Failed to read kubeconfig from {}: {}", p, e))?
                } else {
                    Kubeconfig::read().map_err(|e| format!("Failed to read default kubeconfig: {}", e))?
                };
                kube::Config::from_custom_kubeconfig(
                    kubeconfig,
                    &KubeConfigOptions {
                        context: context.clone(),
                        ..Default::default()
                    },
                )
                .await
                .map_err(|e| format!("Failed to create config for context {:?}: {}", context, e))?
            }
        };

        config.connect_timeout = Some(Duration::from_secs(10));
        config.read_timeout = Some(Duration::from_secs(30));
        config.write_timeout = Some(Duration::from_secs(30));

        Client::try_from(config).map_err(|e| format!("Failed to create Kubernetes client: {}", e))
    }

    async fn list_all<K>(&self, kind: ResourceKind) -> Result<Vec<K>, FetchError>
    where
        K: kube::Resource<DynamicType = ()> + Clone + DeserializeOwned + std::fmt::Debug,
    {
        let client = self
            .client()
            .await
            .map_err(|reason| FetchError::Connect { kind, reason })?;
        let api: Api<K> = Api::all(client);
        let list = api
            .list(&ListParams::default())
            .await
            .map_err(|source| FetchError::List { kind, source })?;
        Ok(list.items)
    }

    async fn list_in<K>(&self, kind: ResourceKind, namespace: &str) -> Result<Vec<K>, FetchError>
    where
        K: kube::Resource<DynamicType = (), Scope = k8s_openapi::NamespaceResourceScope>
            + Clone
            + DeserializeOwned
            + std::fmt::Debug,
    {
        let client = self
            .client()
            .await
            .map_err(|reason| FetchError::Connect { kind, reason })?;
        let api: Api<K> = Api::namespaced(client, namespace);
        let list = api
            .list(&ListParams::default())
            .await
            .map_err(|source| FetchError::ListNamespace {
                kind,
                namespace: namespace.to_string(),
                source,
            })?;
        Ok(list.items)
    }

    async fn get_namespaced<K>(&self, kind: ResourceKind, namespace: &str, name: &str) -> Result<Option<K>, FetchError>
    where
        K: kube::Resource<DynamicType = (), Scope = k8s_openapi::NamespaceResourceScope>
            + Clone
            + DeserializeOwned
            + std::fmt::Debug,
    {
        let client = self
            .client()
            .await
            .map_err(|reason| FetchError::Connect { kind, reason })?;
        let api: Api<K> = Api::namespaced(client, namespace);
        api.get_opt(name).await.map_err(|source| FetchError::Get {
            kind,
            namespace: namespace.to_string(),
            name: name.to_string(),
            source,
        })
    }
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    async fn list(&self, kind: ResourceKind) -> Result<ResourceList, FetchError> {
        let list = match kind {
            ResourceKind::Namespaces => ResourceList::Namespaces(self.list_all::<Namespace>(kind).await?),
            ResourceKind::Pods => ResourceList::Pods(self.list_all::<Pod>(kind).await?),
            ResourceKind::Services => ResourceList::Services(self.list_all::<Service>(kind).await?),
            ResourceKind::Deployments => ResourceList::Deployments(self.list_all::<Deployment>(kind).await?),
            ResourceKind::Secrets => ResourceList::Secrets(self.list_all::<Secret>(kind).await?),
            ResourceKind::ConfigMaps => ResourceList::ConfigMaps(self.list_all::<ConfigMap>(kind).await?),
            ResourceKind::Nodes => ResourceList::Nodes(self.list_all::<Node>(kind).await?),
            ResourceKind::PersistentVolumeClaims => {
                ResourceList::PersistentVolumeClaims(self.list_all::<PersistentVolumeClaim>(kind).await?)
            }
            ResourceKind::Events => ResourceList::Events(self.list_all::<Event>(kind).await?),
        };
        Ok(list)
    }

    async fn list_namespaced(&self, kind: ResourceKind, namespace: &str) -> Result<ResourceList, FetchError> {
        let list = match kind {
            ResourceKind::Pods => ResourceList::Pods(self.list_in::<Pod>(kind, namespace).await?),
            ResourceKind::Services => ResourceList::Services(self.list_in::<Service>(kind, namespace).await?),
            ResourceKind::Deployments => ResourceList::Deployments(self.list_in::<Deployment>(kind, namespace).await?),
            ResourceKind::Secrets => ResourceList::Secrets(self.list_in::<Secret>(kind, namespace).await?),
            ResourceKind::ConfigMaps => ResourceList::ConfigMaps(self.list_in::<ConfigMap>(kind, namespace).await?),
            ResourceKind::PersistentVolumeClaims => {
                ResourceList::PersistentVolumeClaims(self.list_in::<PersistentVolumeClaim>(kind, namespace).await?)
            }
            ResourceKind::Events => ResourceList::Events(self.list_in::<Event>(kind, namespace).await?),
            ResourceKind::Namespaces | ResourceKind::Nodes => {
                return Err(FetchError::Unavailable {
                    kind,
                    reason: "cluster-scoped kinds cannot be listed per namespace".to_string(),
                })
            }
        };
        Ok(list)
    }

    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<Option<ConfigMap>, FetchError> {
        self.get_namespaced(ResourceKind::ConfigMaps, namespace, name).await
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, FetchError> {
        self.get_namespaced(ResourceKind::Secrets, namespace, name).await
    }
}
