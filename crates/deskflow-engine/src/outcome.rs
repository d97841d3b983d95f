//! Simulated business outcomes applied to an entity's status on entry to a stage.
//!
//! The resolver never consults randomness itself. Status facts such as the
//! assigned employee or the deal outcome come from an [`OutcomeGenerator`]
//! the service runs before asking the oracle where to go next.

use std::collections::HashMap;
use std::sync::Mutex;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use deskflow_types::{DeskflowError, Result};

use crate::config::{EffectSource, Pool, StatusRule, WorkflowConfig};
use crate::entity::{Entity, StatusMap};
use crate::graph::StageGraph;

pub trait OutcomeGenerator: Send + Sync {
    /// Status facts to merge into `entity` while it sits at `stage_id`.
    fn decide(&self, stage_id: &str, entity: &Entity) -> StatusMap;
}

// ---------------------------------------------------------------------------
// RuleTableGenerator
// ---------------------------------------------------------------------------

/// Applies the workflow's `rules` table, in table order.
///
/// A rule fires when the entity is at the rule's stage and every `when` fact
/// equals the current value (a missing fact counts as `null`). Later rules see
/// the updates made by earlier ones.
pub struct RuleTableGenerator {
    rules: Vec<StatusRule>,
    pools: HashMap<Pool, Vec<serde_json::Value>>,
    rng: Mutex<StdRng>,
}

impl RuleTableGenerator {
    pub fn from_config(config: &WorkflowConfig, graph: &StageGraph, seed: Option<u64>) -> Result<Self> {
        let mut pools: HashMap<Pool, Vec<serde_json::Value>> = HashMap::new();
        pools.insert(
            Pool::Staff,
            config.staff.iter().map(|s| s.name.clone().into()).collect(),
        );
        pools.insert(
            Pool::Profiles,
            config.profiles.iter().map(|p| p.name.clone().into()).collect(),
        );
        pools.insert(
            Pool::Channels,
            config.channels.iter().cloned().map(Into::into).collect(),
        );

        for rule in &config.rules {
            if !graph.contains(&rule.stage) {
                return Err(DeskflowError::Config(format!(
                    "rule refers to unknown stage '{}'",
                    rule.stage
                )));
            }
            for effect in &rule.effects {
                let empty = match &effect.source {
                    EffectSource::Choose { choose } => choose.is_empty(),
                    EffectSource::PickFrom { pick_from } => {
                        pools.get(pick_from).map_or(true, Vec::is_empty)
                    }
                    EffectSource::Value { .. } => false,
                };
                if empty {
                    return Err(DeskflowError::Config(format!(
                        "effect on '{}' at stage '{}' has nothing to choose from",
                        effect.key, rule.stage
                    )));
                }
            }
        }

        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Ok(Self {
            rules: config.rules.clone(),
            pools,
            rng: Mutex::new(rng),
        })
    }

    fn resolve(&self, source: &EffectSource, rng: &mut StdRng) -> serde_json::Value {
        let options = match source {
            EffectSource::Value { value } => return value.clone(),
            EffectSource::Choose { choose } => choose.as_slice(),
            EffectSource::PickFrom { pick_from } => {
                self.pools.get(pick_from).map(Vec::as_slice).unwrap_or(&[])
            }
        };
        options.choose(rng).cloned().unwrap_or(serde_json::Value::Null)
    }
}

impl OutcomeGenerator for RuleTableGenerator {
    fn decide(&self, stage_id: &str, entity: &Entity) -> StatusMap {
        let mut updates = StatusMap::new();
        let mut rng = match self.rng.lock() {
            Ok(rng) => rng,
            Err(poisoned) => poisoned.into_inner(),
        };

        for rule in self.rules.iter().filter(|r| r.stage == stage_id) {
            let matches = rule.when.iter().all(|(key, expected)| {
                let current = updates
                    .get(key)
                    .or_else(|| entity.status.get(key))
                    .unwrap_or(&serde_json::Value::Null);
                current == expected
            });
            if !matches {
                continue;
            }
            for effect in &rule.effects {
                let value = self.resolve(&effect.source, &mut rng);
                updates.insert(effect.key.clone(), value);
            }
        }

        if !updates.is_empty() {
            tracing::debug!(stage = stage_id, entity = %entity.id, keys = ?updates.keys().collect::<Vec<_>>(), "status rules fired");
        }
        updates
    }
}

// ---------------------------------------------------------------------------
// FixedOutcomes
// ---------------------------------------------------------------------------

/// Returns the same facts for a stage every time. Stages without an entry
/// produce no updates.
#[derive(Debug, Default, Clone)]
pub struct FixedOutcomes {
    by_stage: HashMap<String, StatusMap>,
}

impl FixedOutcomes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, stage_id: impl Into<String>, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.by_stage
            .entry(stage_id.into())
            .or_default()
            .insert(key.into(), value);
        self
    }
}

impl OutcomeGenerator for FixedOutcomes {
    fn decide(&self, stage_id: &str, _entity: &Entity) -> StatusMap {
        self.by_stage.get(stage_id).cloned().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Profile;
    use serde_json::{json, Value};

    fn lead_setup(seed: u64) -> (RuleTableGenerator, StageGraph, WorkflowConfig) {
        let config = WorkflowConfig::load("lead-management").unwrap();
        let graph = StageGraph::from_config(&config).unwrap();
        let generator = RuleTableGenerator::from_config(&config, &graph, Some(seed)).unwrap();
        (generator, graph, config)
    }

    fn lead(graph: &StageGraph, config: &WorkflowConfig) -> Entity {
        Entity::create(
            "LEAD_1",
            Profile::new("SecureNet"),
            Some("LinkedIn".into()),
            graph,
            config.initial_status.clone(),
        )
    }

    #[test]
    fn assign_desk_picks_staff_member_once() {
        let (generator, graph, config) = lead_setup(3);
        let mut entity = lead(&graph, &config);
        entity.advance_stage("Assign Desk");

        let updates = generator.decide("Assign Desk", &entity);
        let staff: Vec<Value> = config.staff.iter().map(|s| json!(s.name)).collect();
        assert!(staff.contains(&updates["assigned_employee"]));

        entity.apply_status(updates);
        assert!(generator.decide("Assign Desk", &entity).is_empty());
    }

    #[test]
    fn meeting_desk_completes_meeting_with_outcome() {
        let (generator, graph, config) = lead_setup(11);
        let entity = lead(&graph, &config);
        let updates = generator.decide("Meeting Desk", &entity);
        assert_eq!(updates["meeting_completed"], json!(true));
        assert_eq!(updates["meeting_scheduled"], json!(true));
        let deal = updates["deal_status"].as_str().unwrap();
        assert!(deal == "closed" || deal == "lost");
    }

    #[test]
    fn onboarding_only_for_closed_deals() {
        let (generator, graph, config) = lead_setup(5);
        let mut entity = lead(&graph, &config);
        assert!(generator.decide("Onboarding Desk", &entity).is_empty());

        entity.status.insert("deal_status".into(), json!("closed"));
        let updates = generator.decide("Onboarding Desk", &entity);
        let onboarding = updates["onboarding_status"].as_str().unwrap();
        assert!(onboarding == "complete" || onboarding == "failed");
    }

    #[test]
    fn stages_without_rules_produce_nothing() {
        let (generator, graph, config) = lead_setup(1);
        let entity = lead(&graph, &config);
        assert!(generator.decide("Calling Desk", &entity).is_empty());
        assert!(generator.decide("Ended Desk", &entity).is_empty());
    }

    #[test]
    fn same_seed_same_outcomes() {
        let picks = |seed| {
            let (generator, graph, config) = lead_setup(seed);
            let entity = lead(&graph, &config);
            (0..8)
                .map(|_| generator.decide("Meeting Desk", &entity)["deal_status"].clone())
                .collect::<Vec<_>>()
        };
        assert_eq!(picks(42), picks(42));
    }

    #[test]
    fn later_rules_see_earlier_updates() {
        let config = WorkflowConfig::from_json(
            r#"{
                "name": "chain",
                "stages": [
                    {"id": "a", "prompt": "p", "next_prompt": "?", "allowed_successors": ["b"]},
                    {"id": "b", "prompt": "p"}
                ],
                "rules": [
                    {"stage": "a", "when": {}, "effects": [{"key": "x", "value": 1}]},
                    {"stage": "a", "when": {"x": 1}, "effects": [{"key": "y", "value": "chained"}]}
                ]
            }"#,
        )
        .unwrap();
        let graph = StageGraph::from_config(&config).unwrap();
        let generator = RuleTableGenerator::from_config(&config, &graph, Some(0)).unwrap();
        let entity = Entity::create("E", Profile::new("p"), None, &graph, StatusMap::new());
        let updates = generator.decide("a", &entity);
        assert_eq!(updates["y"], json!("chained"));
    }

    #[test]
    fn unknown_rule_stage_is_config_error() {
        let mut config = WorkflowConfig::load("lead-management").unwrap();
        config.rules[0].stage = "Nowhere Desk".into();
        let graph = StageGraph::from_config(&config).unwrap();
        let err = RuleTableGenerator::from_config(&config, &graph, None).err().unwrap();
        assert!(matches!(err, DeskflowError::Config(msg) if msg.contains("Nowhere Desk")));
    }

    #[test]
    fn empty_pool_is_config_error() {
        let mut config = WorkflowConfig::load("lead-management").unwrap();
        config.staff.clear();
        let graph = StageGraph::from_config(&config).unwrap();
        assert!(RuleTableGenerator::from_config(&config, &graph, None).is_err());
    }

    #[test]
    fn fixed_outcomes_are_stable() {
        let (_, graph, config) = lead_setup(0);
        let entity = lead(&graph, &config);
        let fixed = FixedOutcomes::new().with("Meeting Desk", "deal_status", json!("closed"));
        assert_eq!(fixed.decide("Meeting Desk", &entity)["deal_status"], json!("closed"));
        assert!(fixed.decide("Assign Desk", &entity).is_empty());
    }
}
