use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use kiln_core::{BuildId, BuildRequest, BuildSubmission, BuildUpdate};
use tokio::sync::RwLock;

use crate::{RequestStore, StoreError};

/// Process-local store. Contents are lost on exit.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    next_id: i64,
    requests: BTreeMap<BuildId, BuildRequest>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RequestStore for MemoryStore {
    async fn create(&self, submission: &BuildSubmission) -> Result<BuildRequest, StoreError> {
        let mut inner = self.inner.write().await;
        inner.next_id += 1;
        let id = BuildId::new(inner.next_id);
        let request = BuildRequest::queued(id, Utc::now(), submission);
        inner.requests.insert(id, request.clone());
        tracing::debug!(build_id = %id, "build request created");
        Ok(request)
    }

    async fn get(&self, id: BuildId) -> Result<Option<BuildRequest>, StoreError> {
        Ok(self.inner.read().await.requests.get(&id).cloned())
    }

    async fn update(&self, id: BuildId, update: BuildUpdate) -> Result<BuildRequest, StoreError> {
        let mut inner = self.inner.write().await;
        let request = inner.requests.get_mut(&id).ok_or(StoreError::NotFound(id))?;

        if !request.status.can_transition_to(update.status) {
            return Err(StoreError::InvalidTransition {
                id,
                from: request.status,
                to: update.status,
            });
        }

        request.status = update.status;
        if let Some(output) = update.packer_output {
            request.packer_output = output;
        }
        Ok(request.clone())
    }

    async fn list_all(&self) -> Result<Vec<BuildRequest>, StoreError> {
        let inner = self.inner.read().await;
        let mut all: Vec<BuildRequest> = inner.requests.values().cloned().collect();
        all.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        Ok(all)
    }
}
