use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;

use crate::error::Result;
use crate::session::AssessmentSession;

/// Trait for storing and retrieving assessment sessions. Persistence
/// backends live behind this seam; the engine itself only ever sees a
/// loaded session.
#[async_trait]
pub trait SessionStorage: Send + Sync {
    async fn save(&self, session: AssessmentSession) -> Result<()>;
    async fn get(&self, id: &str) -> Result<Option<AssessmentSession>>;
    async fn delete(&self, id: &str) -> Result<()>;
}

/// In-memory implementation of SessionStorage.
pub struct InMemorySessionStorage {
    sessions: Arc<DashMap<String, AssessmentSession>>,
}

impl InMemorySessionStorage {
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
        }
    }
}

impl Default for InMemorySessionStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionStorage for InMemorySessionStorage {
    async fn save(&self, session: AssessmentSession) -> Result<()> {
        self.sessions.insert(session.id.clone(), session);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<AssessmentSession>> {
        Ok(self.sessions.get(id).map(|entry| entry.clone()))
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.sessions.remove(id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_sessions() {
        let storage = InMemorySessionStorage::new();
        let session = AssessmentSession::new();
        let id = session.id.clone();

        storage.save(session).await.unwrap();
        let loaded = storage.get(&id).await.unwrap();
        assert!(loaded.is_some());
        assert_eq!(loaded.unwrap().id, id);

        storage.delete(&id).await.unwrap();
        assert!(storage.get(&id).await.unwrap().is_none());
    }
}
