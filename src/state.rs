use std::sync::Arc;

use log::info;

use crate::answer::Answerer;
use crate::assembler::{assemble, direct_answer};
use crate::error::QueryError;
use crate::models::QueryResponse;
use crate::refresh::Refresher;
use crate::store::SnapshotStore;

/// Shared by every request handler and the background refresh task.
#[derive(Clone)]
pub struct AppState {
    pub store: SnapshotStore,
    pub refresher: Arc<Refresher>,
    pub answerer: Arc<dyn Answerer>,
}

impl AppState {
    pub fn new(refresher: Arc<Refresher>, answerer: Arc<dyn Answerer>) -> Self {
        Self {
            store: refresher.store().clone(),
            refresher,
            answerer,
        }
    }

    /// Answer one question against the current snapshot. The snapshot is
    /// pinned for the whole call, so a concurrent refresh cannot change it
    /// halfway through.
    pub async fn answer(&self, query: &str) -> Result<QueryResponse, QueryError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(QueryError::EmptyQuery);
        }
        info!("Received query: {}", query);

        let snapshot = self.store.current()?;

        let answer = match direct_answer(query, &snapshot) {
            Some(answer) => answer,
            None => {
                let request = assemble(query, &snapshot)?;
                self.answerer.answer(&request).await?
            }
        };

        Ok(QueryResponse { query: query.to_string(), answer })
    }
}
