use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use log::{error, info, warn};
use tokio::sync::Mutex;

use crate::client::ClusterClient;
use crate::error::RefreshError;
use crate::fetcher::{fetch_all, ResourceKind};
use crate::models::{KindFailure, RefreshReport, Snapshot};
use crate::naming::NamingRules;
use crate::normalizer::build_snapshot;
use crate::resolver::ReferenceResolver;
use crate::store::SnapshotStore;

/// Runs fetch -> resolve -> normalize -> publish. At most one refresh runs at a
/// time; a concurrent call is rejected rather than queued.
pub struct Refresher {
    client: Arc<dyn ClusterClient>,
    store: SnapshotStore,
    naming: NamingRules,
    kinds: Vec<ResourceKind>,
    budget: Duration,
    running: Mutex<()>,
}

impl Refresher {
    pub fn new(
        client: Arc<dyn ClusterClient>,
        store: SnapshotStore,
        naming: NamingRules,
        kinds: Vec<ResourceKind>,
        budget: Duration,
    ) -> Self {
        Self {
            client,
            store,
            naming,
            kinds,
            budget,
            running: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    /// Build and publish a new snapshot. On any error nothing is published and
    /// the previous snapshot stays current.
    pub async fn refresh(&self) -> Result<RefreshReport, RefreshError> {
        let _running = self.running.try_lock().map_err(|_| {
            warn!("Refresh requested while another is running");
            RefreshError::InProgress
        })?;

        info!("Starting cluster data refresh...");
        let (snapshot, report) = match tokio::time::timeout(self.budget, self.build()).await {
            Ok(result) => result?,
            Err(_) => {
                error!("Refresh exceeded {:?}, abandoning without publishing", self.budget);
                return Err(RefreshError::TimedOut(self.budget));
            }
        };

        self.store.publish(Arc::new(snapshot));
        info!(
            "Published snapshot: {} pods ({} running) across {} namespaces",
            report.pods, report.running_pods, report.namespaces
        );
        Ok(report)
    }

    async fn build(&self) -> Result<(Snapshot, RefreshReport), RefreshError> {
        let outcome = fetch_all(self.client.as_ref(), &self.kinds).await;
        if outcome.all_failed() {
            let cause = outcome
                .failures
                .first()
                .map(|e| e.to_string())
                .unwrap_or_default();
            return Err(RefreshError::ClusterUnreachable { failed: outcome.failures.len(), cause });
        }

        let mut resolver = ReferenceResolver::new(self.client.as_ref(), &outcome.raw);
        let mut resolved = Vec::with_capacity(outcome.raw.pods.len());
        for pod in &outcome.raw.pods {
            resolved.push(resolver.resolve_pod(pod).await);
        }
        let resolution_failures = resolver.into_failures().len();
        if resolution_failures > 0 {
            warn!("{} references could not be resolved", resolution_failures);
        }

        let snapshot = build_snapshot(&outcome.raw, &resolved, &self.naming, Utc::now());

        let report = RefreshReport {
            generated_at: snapshot.generated_at,
            namespaces: snapshot.namespaces.len(),
            pods: snapshot.total_pod_count,
            running_pods: snapshot.running_pod_count,
            services: snapshot.services.len(),
            deployments: snapshot.deployments.len(),
            fetch_failures: outcome
                .failures
                .iter()
                .map(|e| KindFailure {
                    kind: e.kind().map(|k| k.to_string()).unwrap_or_default(),
                    namespace: e.namespace().map(str::to_string),
                    error: e.to_string(),
                })
                .collect(),
            resolution_failures,
        };

        Ok((snapshot, report))
    }
}

/// Refresh every `period` until the task is aborted. The first refresh happens
/// one period after spawning; failures are logged and the loop continues.
pub fn spawn_periodic_refresh(refresher: Arc<Refresher>, period: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // interval fires immediately once
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match refresher.refresh().await {
                Ok(_) => {}
                Err(RefreshError::InProgress) => info!("Skipping scheduled refresh, one is already running"),
                Err(e) => warn!("Scheduled refresh failed: {}", e),
            }
        }
    })
}
