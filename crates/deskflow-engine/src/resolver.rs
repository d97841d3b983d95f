//! Turning an oracle proposal into a committed transition.
//!
//! Resolution never fails from the caller's point of view. A terminal stage
//! is a no-op; an accepted reply moves the entity where the oracle asked; a
//! malformed reply, a disallowed stage or a failed oracle call moves it to the
//! first allowed successor; anything else becomes an error decision that
//! leaves the entity where it was.

use std::sync::Arc;

use serde::Serialize;

use deskflow_types::Result;

use crate::entity::Entity;
use crate::graph::{StageDefinition, StageGraph};
use crate::prompt::OracleAdapter;
use crate::reply::{validate_reply, Verdict};

pub const TERMINAL_REASON: &str = "No possible next stage.";
pub const ERROR_REASON: &str = "An error occurred during decision-making. Please try again.";
pub const FALLBACK_NARRATIVE: &str = "Routing to fallback stage.";
pub const NEUTRAL: &str = "neutral";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DecisionKind {
    Accepted,
    Fallback,
    Terminal,
    Error,
}

/// Outcome of one resolution attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransitionDecision {
    pub kind: DecisionKind,
    pub from_stage: String,
    /// Committed target; `None` for terminal and error decisions.
    pub target: Option<String>,
    pub reason: String,
    pub sentiment: String,
    pub fallback: bool,
    pub narrative: String,
    pub error: Option<String>,
    /// Oracle text as received, when there was any.
    pub raw_reply: Option<String>,
}

impl TransitionDecision {
    /// No-op result for a stage with nowhere to go.
    pub(crate) fn terminal(from: &str) -> Self {
        Self {
            kind: DecisionKind::Terminal,
            from_stage: from.to_string(),
            target: None,
            reason: TERMINAL_REASON.to_string(),
            sentiment: NEUTRAL.to_string(),
            fallback: false,
            narrative: "Workflow complete.".to_string(),
            error: None,
            raw_reply: None,
        }
    }

    fn failed(from: &str, error: String) -> Self {
        Self {
            kind: DecisionKind::Error,
            from_stage: from.to_string(),
            target: None,
            reason: ERROR_REASON.to_string(),
            sentiment: NEUTRAL.to_string(),
            fallback: false,
            narrative: "No transition was made.".to_string(),
            error: Some(error),
            raw_reply: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.kind == DecisionKind::Terminal
    }
}

/// Why the oracle's proposal could not be used.
enum FallbackCause {
    Unusable { raw: String, detail: String },
    OracleFailed(String),
}

impl FallbackCause {
    fn describe(&self) -> &str {
        match self {
            FallbackCause::Unusable { raw, .. } => raw,
            FallbackCause::OracleFailed(error) => error,
        }
    }
}

// ---------------------------------------------------------------------------
// TransitionResolver
// ---------------------------------------------------------------------------

pub struct TransitionResolver {
    graph: Arc<StageGraph>,
    adapter: OracleAdapter,
    decision_basis: String,
}

impl TransitionResolver {
    pub fn new(graph: Arc<StageGraph>, adapter: OracleAdapter, decision_basis: impl Into<String>) -> Self {
        Self {
            graph,
            adapter,
            decision_basis: decision_basis.into(),
        }
    }

    pub fn graph(&self) -> &StageGraph {
        &self.graph
    }

    pub fn adapter(&self) -> &OracleAdapter {
        &self.adapter
    }

    /// Decide where an entity at `stage_id` should go, without committing.
    pub async fn decide(&self, stage_id: &str, entity: Option<&Entity>) -> TransitionDecision {
        match self.try_decide(stage_id, entity).await {
            Ok(decision) => decision,
            Err(e) => {
                tracing::error!(stage = stage_id, error = %e, "transition resolution failed");
                TransitionDecision::failed(stage_id, e.to_string())
            }
        }
    }

    /// Decide for `entity` and commit the target, if any.
    pub async fn resolve(&self, entity: &mut Entity) -> TransitionDecision {
        let from = entity.current_stage().to_string();
        let decision = self.decide(&from, Some(&*entity)).await;
        if let Some(target) = &decision.target {
            entity.advance_stage(target.clone());
        }
        decision
    }

    async fn try_decide(&self, stage_id: &str, entity: Option<&Entity>) -> Result<TransitionDecision> {
        let stage = self.graph.lookup(stage_id)?;
        if stage.is_terminal() {
            return Ok(TransitionDecision::terminal(stage_id));
        }

        let raw = match self.adapter.propose_next(&self.graph, stage, entity).await {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(stage = stage_id, error = %e, "oracle call failed");
                return self.fallback(stage, FallbackCause::OracleFailed(e.to_string()));
            }
        };

        let parsed = match self.adapter.contract().parse(&raw) {
            Ok(parsed) => parsed,
            Err(e) => {
                return self.fallback(
                    stage,
                    FallbackCause::Unusable {
                        detail: e.to_string(),
                        raw,
                    },
                );
            }
        };

        match validate_reply(&parsed, stage, &self.graph) {
            Verdict::Accepted(target) => {
                let target_def = self.graph.lookup(&target)?;
                tracing::info!(from = stage_id, to = %target, sentiment = %parsed.sentiment, "transition accepted");
                Ok(TransitionDecision {
                    kind: DecisionKind::Accepted,
                    from_stage: stage_id.to_string(),
                    narrative: format!(
                        "Moving to {} based on {} analysis.",
                        target_def.name, self.decision_basis
                    ),
                    target: Some(target),
                    reason: parsed.reason,
                    sentiment: parsed.sentiment,
                    fallback: false,
                    error: None,
                    raw_reply: Some(raw),
                })
            }
            Verdict::Rejected(detail) => self.fallback(stage, FallbackCause::Unusable { raw, detail }),
        }
    }

    fn fallback(&self, stage: &StageDefinition, cause: FallbackCause) -> Result<TransitionDecision> {
        let target_id = stage.fallback_successor().ok_or_else(|| {
            deskflow_types::DeskflowError::GraphIntegrity(format!(
                "stage '{}' has no fallback successor",
                stage.id
            ))
        })?;
        let target = self.graph.lookup(target_id)?;

        let (raw_reply, detail) = match &cause {
            FallbackCause::Unusable { raw, detail } => (Some(raw.clone()), detail.as_str()),
            FallbackCause::OracleFailed(error) => (None, error.as_str()),
        };
        tracing::warn!(from = %stage.id, to = %target.id, detail, "applying fallback transition");

        Ok(TransitionDecision {
            kind: DecisionKind::Fallback,
            from_stage: stage.id.clone(),
            target: Some(target.id.clone()),
            reason: format!("Fallback to {} due to: {}.", target.name, cause.describe()),
            sentiment: NEUTRAL.to_string(),
            fallback: true,
            narrative: FALLBACK_NARRATIVE.to_string(),
            error: None,
            raw_reply,
        })
    }
}
