// Trigger claims: one-shot reservations of scheduled instants
//
// A claim behaves like SET NX EX: the first caller wins and the key stays
// reserved until its TTL passes. Claims are never released early, so a
// scheduled instant can start at most one run.

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, instrument};

/// Claim interface for ensuring a resource is acted on only once
#[async_trait]
pub trait TriggerLock: Send + Sync {
    /// Try to claim `resource` for `ttl`. Returns false if already claimed.
    async fn claim(&self, resource: &str, ttl: Duration) -> bool;
}

/// In-process claim table
#[derive(Default)]
pub struct InMemoryTriggerLock {
    claims: Mutex<HashMap<String, Instant>>,
}

impl InMemoryTriggerLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of unexpired claims
    pub async fn active_claims(&self) -> usize {
        let now = Instant::now();
        self.claims
            .lock()
            .await
            .values()
            .filter(|expires_at| **expires_at > now)
            .count()
    }
}

#[async_trait]
impl TriggerLock for InMemoryTriggerLock {
    #[instrument(skip(self), fields(resource = %resource, ttl_seconds = ttl.as_secs()))]
    async fn claim(&self, resource: &str, ttl: Duration) -> bool {
        let now = Instant::now();
        let mut claims = self.claims.lock().await;

        // Drop expired claims so the table stays small
        claims.retain(|_, expires_at| *expires_at > now);

        if claims.contains_key(resource) {
            debug!("Resource already claimed");
            return false;
        }

        claims.insert(resource.to_string(), now + ttl);
        debug!("Resource claimed");
        true
    }
}

/// Resource name for a scheduled instant of a pipeline
pub fn schedule_resource(pipeline: &str, instant: chrono::DateTime<chrono::Utc>) -> String {
    format!("schedule:{}:{}", pipeline, instant.timestamp())
}
