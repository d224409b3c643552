// ABOUTME: Registry of listeners told about every finished update.
// ABOUTME: Each terminal operation is published once; listener failures are only logged.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::Arc;

use crate::store::{Status, UpdateOperation};

pub type ListenerError = Box<dyn std::error::Error + Send + Sync>;

/// Receives terminal operations, e.g. to send notifications.
#[async_trait]
pub trait OutcomeListener: Send + Sync {
    /// Name used in log lines.
    fn name(&self) -> &str;

    async fn on_outcome(&self, operation: &UpdateOperation) -> Result<(), ListenerError>;
}

/// Explicit set of outcome listeners, shared by reference.
#[derive(Clone, Default)]
pub struct OutcomeRegistry {
    listeners: Arc<RwLock<Vec<Arc<dyn OutcomeListener>>>>,
}

impl std::fmt::Debug for OutcomeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutcomeRegistry")
            .field("listeners", &self.listeners.read().len())
            .finish()
    }
}

impl OutcomeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, listener: Arc<dyn OutcomeListener>) {
        self.listeners.write().push(listener);
    }

    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Hand `operation` to every listener in registration order.
    pub async fn publish(&self, operation: &UpdateOperation) {
        // Snapshot so no lock is held across an await.
        let listeners: Vec<Arc<dyn OutcomeListener>> = self.listeners.read().clone();
        for listener in listeners {
            if let Err(e) = listener.on_outcome(operation).await {
                tracing::warn!(
                    listener = listener.name(),
                    operation = %operation.id,
                    error = %e,
                    "outcome listener failed"
                );
            }
        }
    }
}

/// Writes each outcome to the log.
#[derive(Debug, Default)]
pub struct LogOutcome;

#[async_trait]
impl OutcomeListener for LogOutcome {
    fn name(&self) -> &str {
        "log"
    }

    async fn on_outcome(&self, op: &UpdateOperation) -> Result<(), ListenerError> {
        let reason = op.reason.as_deref().unwrap_or("");
        match op.status {
            Status::Success => tracing::info!(
                container = %op.container_name,
                image = %op.target_image,
                operation = %op.id,
                "update succeeded"
            ),
            status => tracing::warn!(
                container = %op.container_name,
                image = %op.target_image,
                operation = %op.id,
                %status,
                reason,
                "update did not succeed"
            ),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{NewOperation, OperationStore};
    use crate::types::ContainerName;
    use parking_lot::Mutex;

    struct Recorder {
        seen: Mutex<Vec<String>>,
        fail: bool,
    }

    #[async_trait]
    impl OutcomeListener for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }

        async fn on_outcome(&self, op: &UpdateOperation) -> Result<(), ListenerError> {
            self.seen.lock().push(op.id.to_string());
            if self.fail {
                return Err("downstream unavailable".into());
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn failing_listener_does_not_stop_others() {
        let store = OperationStore::in_memory();
        let op = store
            .insert(NewOperation::new(
                ContainerName::new("web").unwrap(),
                "nginx:1.27",
                "manual",
            ))
            .unwrap();

        let failing = Arc::new(Recorder {
            seen: Mutex::new(Vec::new()),
            fail: true,
        });
        let healthy = Arc::new(Recorder {
            seen: Mutex::new(Vec::new()),
            fail: false,
        });
        let registry = OutcomeRegistry::new();
        registry.register(failing.clone());
        registry.register(healthy.clone());

        registry.publish(&op).await;

        assert_eq!(failing.seen.lock().len(), 1);
        assert_eq!(healthy.seen.lock().as_slice(), &[op.id.to_string()]);
    }
}
