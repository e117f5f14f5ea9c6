use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{StepState, WorkflowError};

/// State snapshot taken after a step completes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(bound = "S: StepState")]
pub struct Checkpoint<S: StepState> {
    pub request_id: String,
    /// Step to run on resume; `None` once the run reached a terminal step.
    pub next_step: Option<String>,
    pub state: S,
    pub saved_at: DateTime<Utc>,
}

impl<S: StepState> Checkpoint<S> {
    pub fn new(request_id: String, next_step: Option<String>, state: S) -> Self {
        Self {
            request_id,
            next_step,
            state,
            saved_at: Utc::now(),
        }
    }
}

#[async_trait::async_trait]
pub trait Checkpointer<S: StepState>: Send + Sync {
    async fn save(&self, checkpoint: &Checkpoint<S>) -> Result<(), WorkflowError>;
    async fn load(&self, request_id: &str) -> Result<Option<Checkpoint<S>>, WorkflowError>;
    async fn clear(&self, request_id: &str) -> Result<(), WorkflowError>;
}

#[derive(Clone)]
pub struct InMemoryCheckpointer<S: StepState> {
    inner: Arc<RwLock<HashMap<String, Checkpoint<S>>>>,
}

impl<S: StepState> Default for InMemoryCheckpointer<S> {
    fn default() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl<S: StepState> InMemoryCheckpointer<S> {
    pub fn len(&self) -> usize {
        self.inner.read().map(|g| g.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait::async_trait]
impl<S: StepState> Checkpointer<S> for InMemoryCheckpointer<S> {
    async fn save(&self, checkpoint: &Checkpoint<S>) -> Result<(), WorkflowError> {
        let mut guard = self
            .inner
            .write()
            .map_err(|_| WorkflowError::Checkpoint("lock".into()))?;
        guard.insert(checkpoint.request_id.clone(), checkpoint.clone());
        Ok(())
    }

    async fn load(&self, request_id: &str) -> Result<Option<Checkpoint<S>>, WorkflowError> {
        let guard = self
            .inner
            .read()
            .map_err(|_| WorkflowError::Checkpoint("lock".into()))?;
        Ok(guard.get(request_id).cloned())
    }

    async fn clear(&self, request_id: &str) -> Result<(), WorkflowError> {
        let mut guard = self
            .inner
            .write()
            .map_err(|_| WorkflowError::Checkpoint("lock".into()))?;
        guard.remove(request_id);
        Ok(())
    }
}
