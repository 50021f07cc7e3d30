//! Builds the context handed to the answering model: fixed instructions, the
//! serialized snapshot and the question.

use serde::Serialize;

use crate::error::QueryError;
use crate::models::Snapshot;

pub const INSTRUCTIONS: &str = r#"You are a Kubernetes cluster information assistant. Answer using ONLY the cluster snapshot provided. Follow these rules strictly:
1. Answer with a single word, number or short comma-separated list. Never explain.
2. For counts, return only the number. "How many pods are running" means pods whose phase is Running (see running_pod_count).
3. For status queries, return only the status word (e.g. Running, Pending, Failed).
4. For pod names, strip generated suffixes (e.g. 'snowflake-76b5665475-jzmwq' -> 'snowflake'). Use the base names that key pod_status.
5. For namespace queries, list only the namespace names separated by commas.
6. If the snapshot does not contain the answer, reply "Not found" (or 0 for counts, None for empty lists).
7. Never use quotes, brackets or markdown in the response.

Snapshot keys:
- pod_status: base name -> phase
- pod_details: "<base>/<container>" -> image, ports, env, readiness probe, mounts
- env_vars: "<base>/<container>/<VAR>" -> value
- volume_mounts: "<base>/<container>/<volume>" -> PVC mount; "<base>_db" -> the database container's PVC mount
- service_to_namespace: service name (original and lower-case) -> namespace
- namespace_pod_counts / namespace_restart_counts: namespace -> count"#;

/// Everything the answering collaborator needs for one query.
#[derive(Debug, Clone, Serialize)]
pub struct AnswerRequest {
    pub instructions: String,
    pub snapshot_json: String,
    pub query: String,
}

impl AnswerRequest {
    /// User turn sent to the model: the snapshot followed by the question.
    pub fn prompt(&self) -> String {
        format!("Cluster snapshot (JSON):\n{}\n\nQuestion: {}", self.snapshot_json, self.query)
    }
}

pub fn assemble(query: &str, snapshot: &Snapshot) -> Result<AnswerRequest, QueryError> {
    let query = query.trim();
    if query.is_empty() {
        return Err(QueryError::EmptyQuery);
    }

    Ok(AnswerRequest {
        instructions: INSTRUCTIONS.to_string(),
        snapshot_json: serde_json::to_string(snapshot)?,
        query: query.to_string(),
    })
}

const RUNNING_POD_QUESTIONS: [&str; 2] = ["how many pods are running?", "how many pods are running in the cluster?"];

/// Questions answered straight from the snapshot without a model round-trip.
pub fn direct_answer(query: &str, snapshot: &Snapshot) -> Option<String> {
    let normalized = query.trim().to_lowercase();
    if RUNNING_POD_QUESTIONS.contains(&normalized.as_str()) {
        return Some(snapshot.running_pod_count.to_string());
    }
    None
}
