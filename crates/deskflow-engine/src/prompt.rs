//! Prompt construction for routing and narration calls.

use std::collections::HashMap;
use std::sync::Arc;

use deskflow_types::{DeskflowError, Result};

use crate::entity::Entity;
use crate::graph::{StageDefinition, StageGraph};
use crate::oracle::TransitionOracle;
use crate::reply::ReplyContract;

/// The two strings sent to the oracle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptPair {
    pub system: String,
    pub user: String,
}

/// Builds prompts from the graph and entity, and calls the oracle with them.
#[derive(Clone)]
pub struct OracleAdapter {
    oracle: Arc<dyn TransitionOracle>,
    contract: ReplyContract,
    advisor_role: String,
    agent_role: Option<String>,
}

impl OracleAdapter {
    pub fn new(oracle: Arc<dyn TransitionOracle>, advisor_role: impl Into<String>) -> Self {
        Self {
            oracle,
            contract: ReplyContract::V1,
            advisor_role: advisor_role.into(),
            agent_role: None,
        }
    }

    pub fn with_agent_role(mut self, agent_role: Option<String>) -> Self {
        self.agent_role = agent_role;
        self
    }

    pub fn with_contract(mut self, contract: ReplyContract) -> Self {
        self.contract = contract;
        self
    }

    pub fn contract(&self) -> &ReplyContract {
        &self.contract
    }

    pub fn narrates(&self) -> bool {
        self.agent_role.is_some()
    }

    /// Routing prompts for leaving `stage`. Terminal stages have none.
    pub fn routing_prompts(
        &self,
        graph: &StageGraph,
        stage: &StageDefinition,
        entity: Option<&Entity>,
    ) -> Result<PromptPair> {
        let user = stage.next_prompt.clone().ok_or_else(|| {
            DeskflowError::Other(format!("stage '{}' is terminal and has no routing prompt", stage.id))
        })?;

        let successors = graph.successor_names(stage);
        let mut system = format!(
            "{}\nCurrent stage: {}\nPossible next stages: {}\n",
            self.advisor_role,
            stage.name,
            successors.join(", ")
        );
        if let Some(entity) = entity {
            system.push_str(&describe_entity(entity));
        }
        system.push_str("Answer with one of the possible next stages, spelled exactly as listed.\n");
        system.push_str(&self.contract.directive());
        if let Some(first) = successors.first() {
            system.push_str("\nExample: ");
            system.push_str(&self.contract.example(
                first,
                "The entity meets the requirements for this step",
                "Positive",
            ));
        }

        Ok(PromptPair { system, user })
    }

    /// Ask the oracle where to go from `stage`. Returns its raw text.
    pub async fn propose_next(
        &self,
        graph: &StageGraph,
        stage: &StageDefinition,
        entity: Option<&Entity>,
    ) -> Result<String> {
        let prompts = self.routing_prompts(graph, stage, entity)?;
        tracing::debug!(stage = %stage.id, "requesting transition proposal");
        self.oracle.complete(&prompts.system, &prompts.user).await
    }

    /// Narration prompts for the desk at `stage`, when narration is enabled.
    pub fn narration_prompts(&self, stage: &StageDefinition, entity: &Entity) -> Option<PromptPair> {
        let template = self.agent_role.as_ref()?;
        let system = expand_variables(template, &entity_variables(stage, entity));
        Some(PromptPair {
            system,
            user: stage.prompt.clone(),
        })
    }

    /// Desk narration for `entity` at `stage`. `None` when narration is off.
    pub async fn narrate(&self, stage: &StageDefinition, entity: &Entity) -> Option<Result<String>> {
        let prompts = self.narration_prompts(stage, entity)?;
        Some(self.oracle.complete(&prompts.system, &prompts.user).await)
    }
}

fn describe_entity(entity: &Entity) -> String {
    let mut out = format!("Entity: {} ({})\n", entity.id, entity.profile.name);
    if !entity.profile.attributes.is_empty() {
        let attrs: Vec<String> = entity
            .profile
            .attributes
            .iter()
            .map(|(k, v)| format!("{k}: {v}"))
            .collect();
        out.push_str(&format!("Profile: {}\n", attrs.join(", ")));
    }
    if let Some(channel) = &entity.channel {
        out.push_str(&format!("Channel: {channel}\n"));
    }
    if !entity.status.is_empty() {
        out.push_str(&format!("Status: {}\n", status_json(entity)));
    }
    out
}

fn status_json(entity: &Entity) -> String {
    serde_json::to_string(&entity.status).unwrap_or_default()
}

fn entity_variables(stage: &StageDefinition, entity: &Entity) -> HashMap<String, String> {
    let mut vars = HashMap::new();
    vars.insert("stage".to_string(), stage.name.clone());
    vars.insert("entity_id".to_string(), entity.id.clone());
    vars.insert("profile".to_string(), entity.profile.name.clone());
    vars.insert("profile.name".to_string(), entity.profile.name.clone());
    for (key, value) in &entity.profile.attributes {
        vars.insert(format!("profile.{key}"), value.clone());
    }
    vars.insert(
        "channel".to_string(),
        entity.channel.clone().unwrap_or_else(|| "an unknown channel".to_string()),
    );
    vars.insert("status".to_string(), status_json(entity));
    vars
}

/// Expand `${variable}` patterns in a string.
///
/// Variables that do not appear in `vars` are left as-is.
pub fn expand_variables(template: &str, vars: &HashMap<String, String>) -> String {
    let mut result = template.to_string();
    for (key, value) in vars {
        let pattern = format!("${{{}}}", key);
        result = result.replace(&pattern, value);
    }
    result
}
