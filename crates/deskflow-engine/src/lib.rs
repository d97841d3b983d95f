//! Stage-transition decision engine.
//!
//! This crate implements the deskflow core: validated stage graphs loaded from
//! workflow documents, in-flight entity state, the prompt/reply contract with a
//! generative model, and the resolver that turns a model proposal into a
//! committed transition, falling back to a deterministic default whenever the
//! proposal is unusable.

pub mod config;
pub mod entity;
pub mod events;
pub mod graph;
pub mod oracle;
pub mod outcome;
pub mod prompt;
pub mod reply;
pub mod repository;
pub mod resolver;
pub mod service;
pub mod validation;

pub use config::{
    builtin, builtin_names, Effect, EffectSource, OracleSettings, Pool, StageRecord, StatusRule,
    WorkflowConfig,
};
pub use entity::{
    generate_entity_id, select_profile, Entity, HistoryEntry, Profile, Speaker, StaffMember,
    StatusMap,
};
pub use events::{EventEmitter, WorkflowEvent};
pub use graph::{StageDefinition, StageGraph};
pub use oracle::{LlmOracle, OfflineOracle, TransitionOracle};
pub use outcome::{FixedOutcomes, OutcomeGenerator, RuleTableGenerator};
pub use prompt::{expand_variables, OracleAdapter, PromptPair};
pub use reply::{parse_reply, validate_reply, ParsedReply, ReplyContract, ReplyError, Verdict};
pub use repository::{EntityHandle, EntityRepository, InMemoryRepository};
pub use resolver::{DecisionKind, TransitionDecision, TransitionResolver};
pub use service::{
    AdvanceView, CreateEntity, DecisionView, EntityView, ServiceOptions, WorkflowService,
};
pub use validation::{lint_config, validate, validate_or_raise, Diagnostic, LintRule, Severity};
