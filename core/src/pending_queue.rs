//! Ordered view over pairs awaiting synchronization.

use std::sync::Arc;

use crate::errors::CoreError;
use crate::models::LastKnownState;
use crate::store::StateStore;

#[derive(Debug, Clone, Default)]
pub struct PendingQuery {
    pub local_folder: Option<String>,
    /// Skip pairs that last errored within this many seconds.
    pub ignore_in_error: Option<i64>,
    pub limit: Option<i64>,
}

pub struct PendingQueue {
    store: Arc<StateStore>,
}

impl PendingQueue {
    pub fn new(store: Arc<StateStore>) -> Self {
        PendingQueue { store }
    }

    pub fn list_pending(&self, query: &PendingQuery) -> Result<Vec<LastKnownState>, CoreError> {
        let session = self.store.session()?;
        self.store.query_pending(
            &session,
            query.local_folder.as_deref(),
            query.ignore_in_error,
            query.limit,
        )
    }

    pub fn next_pending(&self, query: &PendingQuery) -> Result<Option<LastKnownState>, CoreError> {
        let mut one_at_a_time = query.clone();
        one_at_a_time.limit = Some(1);
        Ok(self.list_pending(&one_at_a_time)?.into_iter().next())
    }
}
