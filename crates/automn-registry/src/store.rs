// SPDX-License-Identifier: MIT OR Apache-2.0
use async_trait::async_trait;
use automn_core::RunnerIdentity;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Storage seam for [`RunnerIdentity`] records. The registry on the host is
/// single-writer per runner id; this trait lets that guarantee be backed by
/// an in-memory map today and a persistent store later without touching
/// `RunnerRegistry`'s logic.
#[async_trait]
pub trait RunnerStore: Send + Sync {
    async fn get(&self, id: &str) -> Option<RunnerIdentity>;
    async fn list(&self) -> Vec<RunnerIdentity>;
    async fn put(&self, identity: RunnerIdentity);
    async fn remove(&self, id: &str) -> Option<RunnerIdentity>;
}

#[derive(Default)]
pub struct InMemoryRunnerStore {
    runners: RwLock<HashMap<String, RunnerIdentity>>,
}

#[async_trait]
impl RunnerStore for InMemoryRunnerStore {
    async fn get(&self, id: &str) -> Option<RunnerIdentity> {
        self.runners.read().await.get(id).cloned()
    }

    async fn list(&self) -> Vec<RunnerIdentity> {
        self.runners.read().await.values().cloned().collect()
    }

    async fn put(&self, identity: RunnerIdentity) {
        self.runners.write().await.insert(identity.id.clone(), identity);
    }

    async fn remove(&self, id: &str) -> Option<RunnerIdentity> {
        self.runners.write().await.remove(id)
    }
}
