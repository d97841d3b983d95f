//! The workflow service: entity creation and the advance loop.
//!
//! Each advance holds the entity's lock from start to finish, so concurrent
//! advances of the same entity queue up instead of racing. Advances of
//! different entities run independently.

use std::sync::{Arc, Mutex};

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::Serialize;

use deskflow_types::{DeskflowError, Result};

use crate::config::WorkflowConfig;
use crate::entity::{generate_entity_id, select_profile, Entity, HistoryEntry, Profile, Speaker, StatusMap};
use crate::events::{EventEmitter, WorkflowEvent};
use crate::graph::StageGraph;
use crate::oracle::TransitionOracle;
use crate::outcome::{OutcomeGenerator, RuleTableGenerator};
use crate::prompt::OracleAdapter;
use crate::repository::{EntityRepository, InMemoryRepository};
use crate::resolver::{DecisionKind, TransitionDecision, TransitionResolver};

// ---------------------------------------------------------------------------
// Views
// ---------------------------------------------------------------------------

/// Transition decision as reported to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DecisionView {
    /// Position of the target stage in the graph.
    pub next_stage: Option<usize>,
    pub stage_id: Option<String>,
    pub stage_name: Option<String>,
    pub reason: String,
    pub sentiment: String,
    /// Narrative sentence describing the decision.
    pub decision: String,
    pub fallback: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DecisionView {
    pub fn from_decision(decision: &TransitionDecision, graph: &StageGraph) -> Self {
        let target = decision.target.as_deref().and_then(|id| graph.get(id));
        Self {
            next_stage: decision.target.as_deref().and_then(|id| graph.position(id)),
            stage_id: target.map(|s| s.id.clone()),
            stage_name: target.map(|s| s.name.clone()),
            reason: decision.reason.clone(),
            sentiment: decision.sentiment.clone(),
            decision: decision.narrative.clone(),
            fallback: decision.fallback,
            error: decision.error.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EntityView {
    pub id: String,
    pub profile: Profile,
    pub channel: Option<String>,
    pub current_stage: String,
    pub stage_name: String,
    pub stage_index: usize,
    pub color: Option<String>,
    pub terminal: bool,
    pub status: StatusMap,
    pub history: Vec<HistoryEntry>,
}

impl EntityView {
    pub fn new(entity: &Entity, graph: &StageGraph) -> Self {
        let stage = graph.get(entity.current_stage());
        Self {
            id: entity.id.clone(),
            profile: entity.profile.clone(),
            channel: entity.channel.clone(),
            current_stage: entity.current_stage().to_string(),
            stage_name: stage.map_or_else(|| entity.current_stage().to_string(), |s| s.name.clone()),
            stage_index: graph.position(entity.current_stage()).unwrap_or_default(),
            color: stage.and_then(|s| s.color.clone()),
            terminal: graph.is_terminal(entity.current_stage()),
            status: entity.status.clone(),
            history: entity.history().to_vec(),
        }
    }
}

/// Result of one advance call.
#[derive(Debug, Clone, Serialize)]
pub struct AdvanceView {
    pub entity_id: String,
    pub from_stage: String,
    /// Status facts written by the stage's rules before routing.
    pub status_updates: StatusMap,
    /// Desk narration produced before routing, if any.
    pub narration: Option<String>,
    pub decision: DecisionView,
    pub entity: EntityView,
}

/// Parameters for a new entity. Unset fields are drawn at random from the
/// workflow's pools.
#[derive(Debug, Clone, Default)]
pub struct CreateEntity {
    pub profile: Option<String>,
    pub channel: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ServiceOptions {
    /// Seeds profile, channel and outcome draws for reproducible runs.
    pub seed: Option<u64>,
    pub event_capacity: usize,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            seed: None,
            event_capacity: 256,
        }
    }
}

// ---------------------------------------------------------------------------
// WorkflowService
// ---------------------------------------------------------------------------

pub struct WorkflowService {
    config: WorkflowConfig,
    graph: Arc<StageGraph>,
    resolver: TransitionResolver,
    outcomes: Arc<dyn OutcomeGenerator>,
    repository: Arc<dyn EntityRepository>,
    events: EventEmitter,
    rng: Mutex<StdRng>,
}

impl WorkflowService {
    pub fn new(config: WorkflowConfig, oracle: Arc<dyn TransitionOracle>) -> Result<Self> {
        Self::with_options(config, oracle, ServiceOptions::default())
    }

    /// Validate the workflow and assemble the service. Fails on any
    /// integrity or configuration problem.
    pub fn with_options(
        config: WorkflowConfig,
        oracle: Arc<dyn TransitionOracle>,
        options: ServiceOptions,
    ) -> Result<Self> {
        let graph = Arc::new(StageGraph::from_config(&config)?);
        if config.profiles.is_empty() {
            return Err(DeskflowError::Config(format!(
                "workflow '{}' defines no profiles",
                config.name
            )));
        }
        let outcomes = Arc::new(RuleTableGenerator::from_config(&config, &graph, options.seed)?);

        let adapter = OracleAdapter::new(oracle, config.advisor_role.clone())
            .with_agent_role(config.agent_role.clone());
        let resolver = TransitionResolver::new(graph.clone(), adapter, config.decision_basis.clone());

        let rng = match options.seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(1)),
            None => StdRng::from_entropy(),
        };

        tracing::info!(
            workflow = %config.name,
            stages = graph.len(),
            rules = config.rules.len(),
            narration = config.agent_role.is_some(),
            "Workflow service ready"
        );

        Ok(Self {
            config,
            graph,
            resolver,
            outcomes,
            repository: Arc::new(InMemoryRepository::new()),
            events: EventEmitter::new(options.event_capacity),
            rng: Mutex::new(rng),
        })
    }

    pub fn with_repository(mut self, repository: Arc<dyn EntityRepository>) -> Self {
        self.repository = repository;
        self
    }

    pub fn with_outcomes(mut self, outcomes: Arc<dyn OutcomeGenerator>) -> Self {
        self.outcomes = outcomes;
        self
    }

    pub fn graph(&self) -> &StageGraph {
        &self.graph
    }

    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    pub fn events(&self) -> &EventEmitter {
        &self.events
    }

    pub async fn create_entity(&self, request: CreateEntity) -> Result<EntityView> {
        let (profile, channel) = {
            let mut rng = match self.rng.lock() {
                Ok(rng) => rng,
                Err(poisoned) => poisoned.into_inner(),
            };
            let profile = select_profile(&self.config.profiles, request.profile.as_deref(), &mut *rng)?;
            let channel = request
                .channel
                .or_else(|| self.config.channels.choose(&mut *rng).cloned());
            (profile, channel)
        };

        let entity = Entity::create(
            generate_entity_id(&self.config.entity_prefix),
            profile,
            channel,
            &self.graph,
            self.config.initial_status.clone(),
        );
        let view = EntityView::new(&entity, &self.graph);

        tracing::info!(entity = %entity.id, profile = %entity.profile.name, stage = %entity.current_stage(), "Entity created");
        self.events.emit(WorkflowEvent::EntityCreated {
            entity_id: entity.id.clone(),
            profile: entity.profile.name.clone(),
            stage: entity.current_stage().to_string(),
        });
        self.repository.put(entity).await;
        Ok(view)
    }

    /// Apply the current stage's rules, narrate, then route the entity.
    ///
    /// Only an unknown id is an error; every routing failure is reported
    /// inside the returned decision.
    pub async fn advance(&self, id: &str) -> Result<AdvanceView> {
        let handle = self
            .repository
            .get(id)
            .await
            .ok_or_else(|| DeskflowError::EntityNotFound { id: id.to_string() })?;
        let mut entity = handle.lock().await;
        let from = entity.current_stage().to_string();

        let mut status_updates = StatusMap::new();
        let mut narration = None;
        if !self.graph.is_terminal(&from) {
            status_updates = self.outcomes.decide(&from, &entity);
            if !status_updates.is_empty() {
                self.events.emit(WorkflowEvent::StatusUpdated {
                    entity_id: entity.id.clone(),
                    stage: from.clone(),
                    keys: status_updates.keys().cloned().collect(),
                });
                entity.apply_status(status_updates.clone());
            }
            narration = self.narrate(&mut entity, &from).await;
        }

        let decision = self.resolver.resolve(&mut entity).await;
        self.record(&mut entity, &decision);

        Ok(AdvanceView {
            entity_id: entity.id.clone(),
            from_stage: from,
            status_updates,
            narration,
            decision: DecisionView::from_decision(&decision, &self.graph),
            entity: EntityView::new(&entity, &self.graph),
        })
    }

    /// Route from the stage at `index` without an entity. Nothing is stored.
    pub async fn decide_from_index(&self, index: usize) -> DecisionView {
        let decision = match self.graph.at(index) {
            Some(stage) => self.resolver.decide(&stage.id, None).await,
            None => {
                tracing::debug!(index, stages = self.graph.len(), "Stage index past the end; nothing to route");
                TransitionDecision::terminal(&index.to_string())
            }
        };
        DecisionView::from_decision(&decision, &self.graph)
    }

    pub async fn entity(&self, id: &str) -> Result<EntityView> {
        let handle = self
            .repository
            .get(id)
            .await
            .ok_or_else(|| DeskflowError::EntityNotFound { id: id.to_string() })?;
        let entity = handle.lock().await;
        Ok(EntityView::new(&entity, &self.graph))
    }

    pub async fn list_entities(&self) -> Vec<EntityView> {
        let mut views = Vec::new();
        for id in self.repository.list().await {
            if let Some(handle) = self.repository.get(&id).await {
                views.push(EntityView::new(&*handle.lock().await, &self.graph));
            }
        }
        views
    }

    async fn narrate(&self, entity: &mut Entity, stage_id: &str) -> Option<String> {
        let stage = self.graph.get(stage_id)?;
        match self.resolver.adapter().narrate(stage, entity).await? {
            Ok(text) => {
                let text = text.trim().to_string();
                entity.append_history(Speaker::Agent, text.clone());
                Some(text)
            }
            Err(e) => {
                tracing::warn!(entity = %entity.id, stage = stage_id, error = %e, "Narration skipped");
                None
            }
        }
    }

    fn record(&self, entity: &mut Entity, decision: &TransitionDecision) {
        match decision.kind {
            DecisionKind::Accepted | DecisionKind::Fallback => {
                let Some(to) = decision.target.as_deref() else {
                    return;
                };
                let from_name = self.stage_name(&decision.from_stage);
                let to_name = self.stage_name(to);
                entity.append_history(
                    Speaker::System,
                    format!("Moved from {from_name} to {to_name}: {}", decision.reason),
                );
                let event = if decision.fallback {
                    WorkflowEvent::FallbackApplied {
                        entity_id: entity.id.clone(),
                        from_stage: decision.from_stage.clone(),
                        to_stage: to.to_string(),
                        reason: decision.reason.clone(),
                    }
                } else {
                    WorkflowEvent::StageAdvanced {
                        entity_id: entity.id.clone(),
                        from_stage: decision.from_stage.clone(),
                        to_stage: to.to_string(),
                        sentiment: decision.sentiment.clone(),
                    }
                };
                self.events.emit(event);
            }
            DecisionKind::Error => {
                self.events.emit(WorkflowEvent::DecisionFailed {
                    entity_id: entity.id.clone(),
                    stage: decision.from_stage.clone(),
                    error: decision.error.clone().unwrap_or_default(),
                });
            }
            DecisionKind::Terminal => {}
        }
    }

    fn stage_name(&self, id: &str) -> String {
        self.graph.get(id).map_or_else(|| id.to_string(), |s| s.name.clone())
    }
}
