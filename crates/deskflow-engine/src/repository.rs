use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};

use crate::entity::Entity;

/// Shared handle to one entity. Holding its lock serializes advances.
pub type EntityHandle = Arc<Mutex<Entity>>;

/// Keyed store of in-flight entities.
#[async_trait]
pub trait EntityRepository: Send + Sync {
    async fn get(&self, id: &str) -> Option<EntityHandle>;

    /// Insert or replace; returns the handle now stored under the entity's id.
    async fn put(&self, entity: Entity) -> EntityHandle;

    /// Ids of every stored entity, sorted.
    async fn list(&self) -> Vec<String>;
}

/// Process-lifetime store: a map of ids to individually locked entries.
#[derive(Default)]
pub struct InMemoryRepository {
    entries: RwLock<HashMap<String, EntityHandle>>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EntityRepository for InMemoryRepository {
    async fn get(&self, id: &str) -> Option<EntityHandle> {
        self.entries.read().await.get(id).cloned()
    }

    async fn put(&self, entity: Entity) -> EntityHandle {
        let id = entity.id.clone();
        let handle = Arc::new(Mutex::new(entity));
        self.entries.write().await.insert(id, handle.clone());
        handle
    }

    async fn list(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.entries.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{Profile, StatusMap};
    use crate::graph::{StageDefinition, StageGraph};

    fn entity(id: &str) -> Entity {
        let graph = StageGraph::new(
            "g",
            vec![
                StageDefinition::new("a", "p").with_next_prompt("?").with_successors(["b"]),
                StageDefinition::new("b", "p"),
            ],
        )
        .unwrap();
        Entity::create(id, Profile::new("p"), None, &graph, StatusMap::new())
    }

    #[tokio::test]
    async fn put_then_get() {
        let repo = InMemoryRepository::new();
        repo.put(entity("E1")).await;
        let handle = repo.get("E1").await.unwrap();
        assert_eq!(handle.lock().await.id, "E1");
        assert!(repo.get("E2").await.is_none());
    }

    #[tokio::test]
    async fn list_is_sorted() {
        let repo = InMemoryRepository::new();
        repo.put(entity("B")).await;
        repo.put(entity("A")).await;
        assert_eq!(repo.list().await, vec!["A".to_string(), "B".to_string()]);
    }

    #[tokio::test]
    async fn mutations_through_handle_are_visible() {
        let repo = InMemoryRepository::new();
        let handle = repo.put(entity("E1")).await;
        handle.lock().await.advance_stage("b");
        let again = repo.get("E1").await.unwrap();
        assert_eq!(again.lock().await.current_stage(), "b");
    }
}
