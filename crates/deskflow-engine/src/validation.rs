//! Stage table validation: lint rules and diagnostics.
//!
//! Error-severity rules cover the integrity invariants every workflow must
//! satisfy (unique ids, resolvable successors, a single terminal stage).
//! Warning-severity rules flag tables that load but route oddly. Call
//! [`validate`] for the full report or [`validate_or_raise`] to fail on the
//! first error.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;

use serde::Serialize;

use deskflow_types::DeskflowError;

use crate::config::{EffectSource, Pool, WorkflowConfig};
use crate::graph::StageGraph;

// ---------------------------------------------------------------------------
// Diagnostic types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct Diagnostic {
    pub rule: String,
    pub severity: Severity,
    pub message: String,
    pub stage_id: Option<String>,
    pub fix: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "error"),
            Severity::Warning => write!(f, "warning"),
        }
    }
}

impl Diagnostic {
    fn error(rule: &str, message: String) -> Self {
        Self {
            rule: rule.into(),
            severity: Severity::Error,
            message,
            stage_id: None,
            fix: None,
        }
    }

    fn warning(rule: &str, message: String) -> Self {
        Self {
            severity: Severity::Warning,
            ..Self::error(rule, message)
        }
    }

    fn at(mut self, stage_id: &str) -> Self {
        self.stage_id = Some(stage_id.to_string());
        self
    }

    fn fix(mut self, fix: impl Into<String>) -> Self {
        self.fix = Some(fix.into());
        self
    }
}

// ---------------------------------------------------------------------------
// LintRule trait
// ---------------------------------------------------------------------------

pub trait LintRule: Send + Sync {
    fn name(&self) -> &str;
    fn apply(&self, graph: &StageGraph) -> Vec<Diagnostic>;
}

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

struct NonEmptyRule;
impl LintRule for NonEmptyRule {
    fn name(&self) -> &str { "non_empty" }
    fn apply(&self, graph: &StageGraph) -> Vec<Diagnostic> {
        if graph.is_empty() {
            vec![Diagnostic::error(self.name(), "Workflow defines no stages".into())]
        } else {
            vec![]
        }
    }
}

struct UniqueIdRule;
impl LintRule for UniqueIdRule {
    fn name(&self) -> &str { "unique_id" }
    fn apply(&self, graph: &StageGraph) -> Vec<Diagnostic> {
        let mut seen = HashSet::new();
        graph
            .stages()
            .iter()
            .filter(|s| !seen.insert(s.id.as_str()))
            .map(|s| {
                Diagnostic::error(self.name(), format!("duplicate stage id '{}'", s.id))
                    .at(&s.id)
                    .fix("Rename or remove the second definition")
            })
            .collect()
    }
}

struct SuccessorExistsRule;
impl LintRule for SuccessorExistsRule {
    fn name(&self) -> &str { "successor_exists" }
    fn apply(&self, graph: &StageGraph) -> Vec<Diagnostic> {
        let mut diags = Vec::new();
        for stage in graph.stages() {
            for target in &stage.allowed_successors {
                if !graph.contains(target) {
                    diags.push(
                        Diagnostic::error(
                            self.name(),
                            format!(
                                "stage '{}' lists unknown successor '{}'",
                                stage.id, target
                            ),
                        )
                        .at(&stage.id),
                    );
                }
            }
        }
        diags
    }
}

struct SingleTerminalRule;
impl LintRule for SingleTerminalRule {
    fn name(&self) -> &str { "single_terminal" }
    fn apply(&self, graph: &StageGraph) -> Vec<Diagnostic> {
        if graph.is_empty() {
            return vec![];
        }
        let terminals: Vec<&str> = graph
            .stages()
            .iter()
            .filter(|s| s.is_terminal())
            .map(|s| s.id.as_str())
            .collect();
        match terminals.len() {
            1 => vec![],
            0 => vec![Diagnostic::error(
                self.name(),
                "no terminal stage (a stage with no allowed successors)".into(),
            )
            .fix("Add a closing stage with an empty successor list")],
            n => vec![Diagnostic::error(
                self.name(),
                format!(
                    "{n} terminal stages: {}; expected exactly one",
                    terminals.join(", ")
                ),
            )],
        }
    }
}

struct NextPromptRule;
impl LintRule for NextPromptRule {
    fn name(&self) -> &str { "next_prompt_consistent" }
    fn apply(&self, graph: &StageGraph) -> Vec<Diagnostic> {
        graph
            .stages()
            .iter()
            .filter_map(|s| match (s.is_terminal(), s.next_prompt.is_some()) {
                (true, true) => Some(
                    Diagnostic::error(
                        self.name(),
                        format!("terminal stage '{}' has a next-stage prompt", s.id),
                    )
                    .at(&s.id)
                    .fix("Set next_prompt to null"),
                ),
                (false, false) => Some(
                    Diagnostic::error(
                        self.name(),
                        format!("stage '{}' has successors but no next-stage prompt", s.id),
                    )
                    .at(&s.id),
                ),
                _ => None,
            })
            .collect()
    }
}

struct SuccessorUniqueRule;
impl LintRule for SuccessorUniqueRule {
    fn name(&self) -> &str { "successor_unique" }
    fn apply(&self, graph: &StageGraph) -> Vec<Diagnostic> {
        let mut diags = Vec::new();
        for stage in graph.stages() {
            let mut seen = HashSet::new();
            for target in &stage.allowed_successors {
                if !seen.insert(target.as_str()) {
                    diags.push(
                        Diagnostic::warning(
                            self.name(),
                            format!("stage '{}' lists successor '{}' twice", stage.id, target),
                        )
                        .at(&stage.id),
                    );
                }
            }
        }
        diags
    }
}

struct ReachabilityRule;
impl LintRule for ReachabilityRule {
    fn name(&self) -> &str { "reachability" }
    fn apply(&self, graph: &StageGraph) -> Vec<Diagnostic> {
        let Some(initial) = graph.at(0) else {
            return vec![];
        };
        let mut visited = HashSet::new();
        let mut queue = VecDeque::from([initial.id.as_str()]);
        while let Some(id) = queue.pop_front() {
            if !visited.insert(id) {
                continue;
            }
            if let Some(stage) = graph.get(id) {
                queue.extend(stage.allowed_successors.iter().map(String::as_str));
            }
        }
        graph
            .stages()
            .iter()
            .filter(|s| !visited.contains(s.id.as_str()))
            .map(|s| {
                Diagnostic::warning(
                    self.name(),
                    format!("stage '{}' is unreachable from '{}'", s.id, initial.id),
                )
                .at(&s.id)
            })
            .collect()
    }
}

struct TerminalReachableRule;
impl LintRule for TerminalReachableRule {
    fn name(&self) -> &str { "terminal_reachable" }
    fn apply(&self, graph: &StageGraph) -> Vec<Diagnostic> {
        // Walk predecessors backwards from every terminal stage.
        let mut predecessors: HashMap<&str, Vec<&str>> = HashMap::new();
        for stage in graph.stages() {
            for target in &stage.allowed_successors {
                predecessors.entry(target.as_str()).or_default().push(stage.id.as_str());
            }
        }
        let mut can_finish = HashSet::new();
        let mut queue: VecDeque<&str> = graph
            .stages()
            .iter()
            .filter(|s| s.is_terminal())
            .map(|s| s.id.as_str())
            .collect();
        while let Some(id) = queue.pop_front() {
            if !can_finish.insert(id) {
                continue;
            }
            if let Some(preds) = predecessors.get(id) {
                queue.extend(preds.iter().copied());
            }
        }
        if can_finish.is_empty() {
            // Reported by single_terminal.
            return vec![];
        }
        graph
            .stages()
            .iter()
            .filter(|s| !can_finish.contains(s.id.as_str()))
            .map(|s| {
                Diagnostic::warning(
                    self.name(),
                    format!("stage '{}' can never reach the terminal stage", s.id),
                )
                .at(&s.id)
            })
            .collect()
    }
}

struct DisplayNameUniqueRule;
impl LintRule for DisplayNameUniqueRule {
    fn name(&self) -> &str { "display_name_unique" }
    fn apply(&self, graph: &StageGraph) -> Vec<Diagnostic> {
        let mut first_by_name: HashMap<&str, &str> = HashMap::new();
        let mut diags = Vec::new();
        for stage in graph.stages() {
            match first_by_name.get(stage.name.as_str()) {
                Some(first) if *first != stage.id => diags.push(
                    Diagnostic::warning(
                        self.name(),
                        format!(
                            "stages '{}' and '{}' share the display name '{}'; replies naming it resolve to the earlier stage",
                            first, stage.id, stage.name
                        ),
                    )
                    .at(&stage.id),
                ),
                Some(_) => {}
                None => {
                    first_by_name.insert(stage.name.as_str(), stage.id.as_str());
                }
            }
        }
        diags
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Run all lint rules against a graph and return collected diagnostics.
pub fn validate(graph: &StageGraph) -> Vec<Diagnostic> {
    let rules: Vec<Box<dyn LintRule>> = vec![
        Box::new(NonEmptyRule),
        Box::new(UniqueIdRule),
        Box::new(SuccessorExistsRule),
        Box::new(SingleTerminalRule),
        Box::new(NextPromptRule),
        Box::new(SuccessorUniqueRule),
        Box::new(ReachabilityRule),
        Box::new(TerminalReachableRule),
        Box::new(DisplayNameUniqueRule),
    ];

    let mut diagnostics = Vec::new();
    for rule in &rules {
        diagnostics.extend(rule.apply(graph));
    }
    diagnostics
}

/// Run all lint rules; return `Err` if any `Error`-severity diagnostic found.
pub fn validate_or_raise(graph: &StageGraph) -> deskflow_types::Result<Vec<Diagnostic>> {
    let diagnostics = validate(graph);
    let errors: Vec<_> = diagnostics
        .iter()
        .filter(|d| d.severity == Severity::Error)
        .map(|d| d.message.clone())
        .collect();
    if !errors.is_empty() {
        return Err(DeskflowError::GraphIntegrity(errors.join("; ")));
    }
    for d in &diagnostics {
        tracing::warn!(rule = %d.rule, stage = ?d.stage_id, "{}", d.message);
    }
    Ok(diagnostics)
}

/// Lint a whole workflow document without requiring it to be valid: the
/// stage table plus the status rules.
pub fn lint_config(config: &WorkflowConfig) -> Vec<Diagnostic> {
    let stages = config
        .stages
        .iter()
        .cloned()
        .map(crate::StageDefinition::from)
        .collect();
    let mut diagnostics = validate(&StageGraph::unchecked(config.name.clone(), stages));
    diagnostics.extend(lint_rules(config));
    diagnostics
}

fn lint_rules(config: &WorkflowConfig) -> Vec<Diagnostic> {
    let known: HashSet<&str> = config.stages.iter().map(|s| s.id.as_str()).collect();
    let mut diags = Vec::new();
    for rule in &config.rules {
        if !known.contains(rule.stage.as_str()) {
            diags.push(
                Diagnostic::error(
                    "rule_stage_exists",
                    format!("status rule targets unknown stage '{}'", rule.stage),
                )
                .at(&rule.stage),
            );
        }
        for effect in &rule.effects {
            let empty = match &effect.source {
                EffectSource::Choose { choose } => choose.is_empty(),
                EffectSource::PickFrom { pick_from } => match pick_from {
                    Pool::Staff => config.staff.is_empty(),
                    Pool::Profiles => config.profiles.is_empty(),
                    Pool::Channels => config.channels.is_empty(),
                },
                EffectSource::Value { .. } => false,
            };
            if empty {
                diags.push(
                    Diagnostic::error(
                        "rule_effect_source",
                        format!("effect '{}' at '{}' has nothing to draw from", effect.key, rule.stage),
                    )
                    .at(&rule.stage)
                    .fix("add values to the choice list or entries to the pool"),
                );
            }
        }
    }
    diags
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
