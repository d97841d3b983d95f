//! In-flight entities (accounts, leads) and the pools they are drawn from.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use deskflow_types::{DeskflowError, Result};

use crate::graph::StageGraph;

/// Domain facts about an entity, keyed by fact name.
pub type StatusMap = BTreeMap<String, serde_json::Value>;

// ---------------------------------------------------------------------------
// Pools
// ---------------------------------------------------------------------------

/// A candidate the entity represents (a client company, an account holder).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub name: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl Profile {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaffMember {
    pub name: String,
    #[serde(default)]
    pub expertise: Vec<String>,
}

/// Pick a profile by exact name, or uniformly at random when no selector is given.
pub fn select_profile<R: Rng + ?Sized>(
    pool: &[Profile],
    selector: Option<&str>,
    rng: &mut R,
) -> Result<Profile> {
    match selector {
        Some(name) => pool.iter().find(|p| p.name == name).cloned().ok_or_else(|| {
            DeskflowError::ProfileNotFound {
                selector: name.to_string(),
            }
        }),
        None => pool
            .choose(rng)
            .cloned()
            .ok_or_else(|| DeskflowError::ProfileNotFound {
                selector: "<random>".to_string(),
            }),
    }
}

// ---------------------------------------------------------------------------
// History
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    /// Desk narration produced by the model.
    Agent,
    /// Engine bookkeeping such as committed transitions.
    System,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub speaker: Speaker,
    /// Stage the entity was at when the entry was written.
    pub stage: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Entity
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    pub profile: Profile,
    /// Acquisition channel, when the workflow has one.
    pub channel: Option<String>,
    current_stage: String,
    pub status: StatusMap,
    history: Vec<HistoryEntry>,
    pub created_at: DateTime<Utc>,
}

impl Entity {
    /// Create an entity positioned at the graph's initial stage.
    pub fn create(
        id: impl Into<String>,
        profile: Profile,
        channel: Option<String>,
        graph: &StageGraph,
        initial_status: StatusMap,
    ) -> Self {
        Self {
            id: id.into(),
            profile,
            channel,
            current_stage: graph.initial_stage().id.clone(),
            status: initial_status,
            history: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn current_stage(&self) -> &str {
        &self.current_stage
    }

    /// Overwrite the current stage. The caller has already checked `stage`
    /// against the graph.
    pub fn advance_stage(&mut self, stage: impl Into<String>) {
        self.current_stage = stage.into();
    }

    pub fn append_history(&mut self, speaker: Speaker, content: impl Into<String>) {
        self.history.push(HistoryEntry {
            speaker,
            stage: self.current_stage.clone(),
            content: content.into(),
            timestamp: Utc::now(),
        });
    }

    pub fn history(&self) -> &[HistoryEntry] {
        &self.history
    }

    pub fn apply_status(&mut self, updates: StatusMap) {
        self.status.extend(updates);
    }
}

/// Entity id of the form `<PREFIX>_<YYYYmmdd_HHMMSS>_<8 hex>`.
pub fn generate_entity_id(prefix: &str) -> String {
    let stamp = Utc::now().format("%Y%m%d_%H%M%S");
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{prefix}_{stamp}_{}", &suffix[..8])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::StageDefinition;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn graph() -> StageGraph {
        StageGraph::new(
            "g",
            vec![
                StageDefinition::new("Begun Desk", "p")
                    .with_next_prompt("?")
                    .with_successors(["Ended Desk"]),
                StageDefinition::new("Ended Desk", "p"),
            ],
        )
        .unwrap()
    }

    fn pool() -> Vec<Profile> {
        vec![
            Profile::new("TechCloud Solutions").with_attribute("product", "Cloud Storage Service"),
            Profile::new("SecureNet").with_attribute("product", "Cybersecurity Suite"),
        ]
    }

    #[test]
    fn select_profile_by_name() {
        let mut rng = StdRng::seed_from_u64(1);
        let p = select_profile(&pool(), Some("SecureNet"), &mut rng).unwrap();
        assert_eq!(p.attributes["product"], "Cybersecurity Suite");
    }

    #[test]
    fn select_profile_unknown_name_fails() {
        let mut rng = StdRng::seed_from_u64(1);
        let err = select_profile(&pool(), Some("Initech"), &mut rng).unwrap_err();
        assert!(matches!(err, DeskflowError::ProfileNotFound { selector } if selector == "Initech"));
    }

    #[test]
    fn select_profile_random_comes_from_pool() {
        let mut rng = StdRng::seed_from_u64(7);
        let names: Vec<String> = pool().into_iter().map(|p| p.name).collect();
        for _ in 0..20 {
            let p = select_profile(&pool(), None, &mut rng).unwrap();
            assert!(names.contains(&p.name));
        }
    }

    #[test]
    fn select_profile_empty_pool_fails() {
        let mut rng = StdRng::seed_from_u64(1);
        assert!(select_profile(&[], None, &mut rng).is_err());
    }

    #[test]
    fn create_starts_at_initial_stage() {
        let entity = Entity::create("LEAD_1", Profile::new("SecureNet"), None, &graph(), StatusMap::new());
        assert_eq!(entity.current_stage(), "Begun Desk");
        assert!(entity.history().is_empty());
    }

    #[test]
    fn history_is_append_only_and_stamped_with_stage() {
        let mut entity = Entity::create("LEAD_1", Profile::new("SecureNet"), None, &graph(), StatusMap::new());
        entity.append_history(Speaker::Agent, "Welcome aboard.");
        entity.advance_stage("Ended Desk");
        entity.append_history(Speaker::System, "Closed.");

        let history = entity.history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].stage, "Begun Desk");
        assert_eq!(history[1].stage, "Ended Desk");
        assert_eq!(history[1].speaker, Speaker::System);
    }

    #[test]
    fn apply_status_overwrites_keys() {
        let mut status = StatusMap::new();
        status.insert("deal_status".into(), serde_json::Value::Null);
        let mut entity = Entity::create("LEAD_1", Profile::new("SecureNet"), None, &graph(), status);

        let mut updates = StatusMap::new();
        updates.insert("deal_status".into(), serde_json::json!("closed"));
        entity.apply_status(updates);
        assert_eq!(entity.status["deal_status"], "closed");
    }

    #[test]
    fn generated_ids_have_prefix_and_differ() {
        let a = generate_entity_id("LEAD");
        let b = generate_entity_id("LEAD");
        assert!(a.starts_with("LEAD_"));
        // LEAD_ + 15-char timestamp + _ + 8 hex
        assert_eq!(a.len(), "LEAD_".len() + 15 + 1 + 8);
        assert_ne!(a, b);
    }
}
