use std::collections::HashMap;

use serde::Serialize;

use deskflow_types::{DeskflowError, Result};

use crate::config::{StageRecord, WorkflowConfig};
use crate::validation::{validate_or_raise, Diagnostic};

/// A named step of a workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageDefinition {
    pub id: String,
    /// Name shown to the oracle and matched against its replies.
    pub name: String,
    /// Narration question asked while the entity sits at this stage.
    pub prompt: String,
    /// Routing question; absent exactly when the stage is terminal.
    pub next_prompt: Option<String>,
    pub color: Option<String>,
    /// Ordered; the first entry is the fallback target.
    pub allowed_successors: Vec<String>,
}

impl StageDefinition {
    pub fn new(id: impl Into<String>, prompt: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            prompt: prompt.into(),
            next_prompt: None,
            color: None,
            allowed_successors: Vec::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_next_prompt(mut self, next_prompt: impl Into<String>) -> Self {
        self.next_prompt = Some(next_prompt.into());
        self
    }

    pub fn with_successors<I, S>(mut self, successors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_successors = successors.into_iter().map(Into::into).collect();
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.allowed_successors.is_empty()
    }

    /// Successor the resolver falls back to when the oracle gives no usable answer.
    pub fn fallback_successor(&self) -> Option<&str> {
        self.allowed_successors.first().map(String::as_str)
    }
}

impl From<StageRecord> for StageDefinition {
    fn from(record: StageRecord) -> Self {
        Self {
            name: record.name.unwrap_or_else(|| record.id.clone()),
            id: record.id,
            prompt: record.prompt,
            next_prompt: record.next_prompt,
            color: record.color,
            allowed_successors: record.allowed_successors,
        }
    }
}

/// Immutable stage table, validated once at construction.
#[derive(Debug, Clone)]
pub struct StageGraph {
    pub name: String,
    stages: Vec<StageDefinition>,
    /// Maps stage id to its position in `stages`.
    index: HashMap<String, usize>,
    initial: usize,
    terminal: usize,
    diagnostics: Vec<Diagnostic>,
}

impl StageGraph {
    /// Build and validate a graph. Any error-severity diagnostic aborts with
    /// [`DeskflowError::GraphIntegrity`].
    pub fn new(name: impl Into<String>, stages: Vec<StageDefinition>) -> Result<Self> {
        let mut graph = Self::unchecked(name.into(), stages);
        graph.diagnostics = validate_or_raise(&graph)?;
        graph.terminal = graph
            .stages
            .iter()
            .position(StageDefinition::is_terminal)
            .ok_or_else(|| DeskflowError::GraphIntegrity("no terminal stage".into()))?;
        Ok(graph)
    }

    pub fn from_config(config: &WorkflowConfig) -> Result<Self> {
        let stages = config
            .stages
            .iter()
            .cloned()
            .map(StageDefinition::from)
            .collect();
        Self::new(config.name.clone(), stages)
    }

    /// Build without validating. Used by the linter, which must be able to
    /// inspect broken tables.
    pub(crate) fn unchecked(name: String, stages: Vec<StageDefinition>) -> Self {
        let mut index = HashMap::with_capacity(stages.len());
        for (i, stage) in stages.iter().enumerate() {
            // First definition wins; the duplicate is reported by the linter.
            index.entry(stage.id.clone()).or_insert(i);
        }
        Self {
            name,
            stages,
            index,
            initial: 0,
            terminal: 0,
            diagnostics: Vec::new(),
        }
    }

    pub fn get(&self, id: &str) -> Option<&StageDefinition> {
        self.index.get(id).map(|&i| &self.stages[i])
    }

    pub fn lookup(&self, id: &str) -> Result<&StageDefinition> {
        self.get(id).ok_or_else(|| DeskflowError::StageNotFound {
            stage: id.to_string(),
        })
    }

    /// Unknown ids are not terminal.
    pub fn is_terminal(&self, id: &str) -> bool {
        self.get(id).is_some_and(StageDefinition::is_terminal)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn position(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    pub fn at(&self, position: usize) -> Option<&StageDefinition> {
        self.stages.get(position)
    }

    pub fn initial_stage(&self) -> &StageDefinition {
        &self.stages[self.initial]
    }

    pub fn terminal_stage(&self) -> &StageDefinition {
        &self.stages[self.terminal]
    }

    /// Stages in definition order.
    pub fn stages(&self) -> &[StageDefinition] {
        &self.stages
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Warnings collected while validating the table.
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// Resolve a display name against the successors of `from`.
    ///
    /// Matching is exact. When several stages share the display name the
    /// first one in definition order that is an allowed successor wins.
    pub fn successor_named(&self, from: &StageDefinition, name: &str) -> Option<&StageDefinition> {
        self.stages
            .iter()
            .filter(|s| s.name == name)
            .find(|s| from.allowed_successors.iter().any(|id| *id == s.id))
    }

    /// Display names of the successors of `from`, in successor order.
    pub fn successor_names<'a>(&'a self, from: &'a StageDefinition) -> Vec<&'a str> {
        from.allowed_successors
            .iter()
            .map(|id| self.get(id).map_or(id.as_str(), |s| s.name.as_str()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn three_stage_graph() -> StageGraph {
        StageGraph::new(
            "triage",
            vec![
                StageDefinition::new("Intake", "Describe the intake.")
                    .with_next_prompt("Where next?")
                    .with_successors(["Review", "Closed"]),
                StageDefinition::new("Review", "Describe the review.")
                    .with_next_prompt("Approve or close?")
                    .with_successors(["Closed", "Intake"]),
                StageDefinition::new("Closed", "Wrap up."),
            ],
        )
        .unwrap()
    }

    #[test]
    fn lookup_and_terminal() {
        let graph = three_stage_graph();
        assert_eq!(graph.lookup("Review").unwrap().prompt, "Describe the review.");
        assert!(graph.is_terminal("Closed"));
        assert!(!graph.is_terminal("Intake"));
        assert!(!graph.is_terminal("Nowhere"));
        assert!(matches!(
            graph.lookup("Nowhere"),
            Err(DeskflowError::StageNotFound { stage }) if stage == "Nowhere"
        ));
    }

    #[test]
    fn initial_and_terminal_stage() {
        let graph = three_stage_graph();
        assert_eq!(graph.initial_stage().id, "Intake");
        assert_eq!(graph.terminal_stage().id, "Closed");
        assert_eq!(graph.position("Review"), Some(1));
        assert_eq!(graph.at(2).map(|s| s.id.as_str()), Some("Closed"));
        assert!(graph.at(3).is_none());
    }

    #[test]
    fn fallback_is_first_successor() {
        let graph = three_stage_graph();
        assert_eq!(graph.lookup("Intake").unwrap().fallback_successor(), Some("Review"));
        assert_eq!(graph.lookup("Closed").unwrap().fallback_successor(), None);
    }

    #[test]
    fn successor_named_respects_allowed_set() {
        let graph = three_stage_graph();
        let intake = graph.lookup("Intake").unwrap();
        assert_eq!(graph.successor_named(intake, "Closed").map(|s| s.id.as_str()), Some("Closed"));
        assert!(graph.successor_named(intake, "Intake").is_none());
        assert!(graph.successor_named(intake, "closed").is_none());
    }

    #[test]
    fn display_name_collision_resolves_to_first_allowed() {
        let graph = StageGraph::new(
            "dupes",
            vec![
                StageDefinition::new("a", "A")
                    .with_next_prompt("?")
                    .with_successors(["c", "b"]),
                StageDefinition::new("b", "B")
                    .with_name("Review")
                    .with_next_prompt("?")
                    .with_successors(["d"]),
                StageDefinition::new("c", "C")
                    .with_name("Review")
                    .with_next_prompt("?")
                    .with_successors(["d"]),
                StageDefinition::new("d", "D"),
            ],
        )
        .unwrap();

        let a = graph.lookup("a").unwrap();
        assert_eq!(graph.successor_named(a, "Review").unwrap().id, "b");
        assert!(graph
            .diagnostics()
            .iter()
            .any(|d| d.rule == "display_name_unique"));
    }

    #[test]
    fn display_name_defaults_to_id() {
        let config = WorkflowConfig::load("account-verification").unwrap();
        let graph = StageGraph::from_config(&config).unwrap();
        assert_eq!(graph.len(), 9);
        assert_eq!(graph.initial_stage().name, "1. Account Created");
        assert_eq!(graph.terminal_stage().id, "9. Closed");
        let created = graph.initial_stage();
        assert_eq!(
            graph.successor_names(created),
            vec!["2. Email Verification", "3. Phone Verification", "5. Review Process"]
        );
    }

    #[test]
    fn integrity_violation_aborts_construction() {
        let err = StageGraph::new(
            "broken",
            vec![
                StageDefinition::new("a", "A")
                    .with_next_prompt("?")
                    .with_successors(["ghost"]),
                StageDefinition::new("b", "B"),
            ],
        )
        .unwrap_err();
        assert!(matches!(err, DeskflowError::GraphIntegrity(msg) if msg.contains("ghost")));
    }

    #[test]
    fn lead_workflow_graph_is_valid() {
        let config = WorkflowConfig::load("lead-management").unwrap();
        let graph = StageGraph::from_config(&config).unwrap();
        assert_eq!(graph.initial_stage().id, "Begun Desk");
        assert_eq!(graph.terminal_stage().id, "Ended Desk");
        assert!(graph.diagnostics().is_empty(), "{:?}", graph.diagnostics());
    }
}
