//! Workflow documents.
//!
//! A workflow is a JSON document describing the stage table, the profile,
//! channel and staff pools, the initial status facts of a new entity and the
//! status rules applied on entry to a stage. Two workflows ship with the
//! crate and can be loaded by name; anything else is read from disk.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use deskflow_types::{DeskflowError, Result};

use crate::entity::{Profile, StaffMember};

// ---------------------------------------------------------------------------
// Built-in workflows
// ---------------------------------------------------------------------------

const BUILTIN_WORKFLOWS: &[(&str, &str)] = &[
    (
        "account-verification",
        include_str!("../workflows/account-verification.json"),
    ),
    (
        "lead-management",
        include_str!("../workflows/lead-management.json"),
    ),
];

/// Names of the workflows compiled into the crate.
pub fn builtin_names() -> impl Iterator<Item = &'static str> {
    BUILTIN_WORKFLOWS.iter().map(|(name, _)| *name)
}

/// Raw JSON of a built-in workflow.
pub fn builtin(name: &str) -> Option<&'static str> {
    BUILTIN_WORKFLOWS
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, json)| *json)
}

// ---------------------------------------------------------------------------
// Document model
// ---------------------------------------------------------------------------

fn default_prefix() -> String {
    "ENTITY".to_string()
}

fn default_advisor_role() -> String {
    "You are a workflow routing AI deciding which stage an entity should move to next.".to_string()
}

fn default_decision_basis() -> String {
    "workflow".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    pub name: String,
    #[serde(default = "default_prefix")]
    pub entity_prefix: String,
    /// Persona placed at the top of every routing prompt.
    #[serde(default = "default_advisor_role")]
    pub advisor_role: String,
    /// Word used in accepted-decision narratives ("based on <basis> analysis").
    #[serde(default = "default_decision_basis")]
    pub decision_basis: String,
    /// Persona for desk narration; narration is off when absent.
    #[serde(default)]
    pub agent_role: Option<String>,
    pub stages: Vec<StageRecord>,
    #[serde(default)]
    pub profiles: Vec<Profile>,
    #[serde(default)]
    pub channels: Vec<String>,
    #[serde(default)]
    pub staff: Vec<StaffMember>,
    #[serde(default)]
    pub initial_status: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub rules: Vec<StatusRule>,
}

/// One row of the stage table as written in the document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageRecord {
    pub id: String,
    /// Display name; defaults to the id.
    #[serde(default)]
    pub name: Option<String>,
    pub prompt: String,
    #[serde(default)]
    pub next_prompt: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub allowed_successors: Vec<String>,
}

/// Status facts written when an entity is at `stage` and every `when` fact
/// matches its current status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusRule {
    pub stage: String,
    #[serde(default)]
    pub when: BTreeMap<String, serde_json::Value>,
    pub effects: Vec<Effect>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Effect {
    pub key: String,
    #[serde(flatten)]
    pub source: EffectSource,
}

/// Where an effect's value comes from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EffectSource {
    PickFrom { pick_from: Pool },
    Choose { choose: Vec<serde_json::Value> },
    Value { value: serde_json::Value },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pool {
    Staff,
    Profiles,
    Channels,
}

impl WorkflowConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| DeskflowError::Config(e.to_string()))
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path).map_err(|e| {
            DeskflowError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_json(&json)
    }

    /// Load a built-in workflow by name, or a workflow file by path.
    pub fn load(source: &str) -> Result<Self> {
        match builtin(source) {
            Some(json) => Self::from_json(json),
            None => Self::from_path(Path::new(source)),
        }
    }
}

// ---------------------------------------------------------------------------
// Oracle settings
// ---------------------------------------------------------------------------

/// Model parameters for routing and narration calls.
#[derive(Debug, Clone)]
pub struct OracleSettings {
    pub model: String,
    /// Forces a provider instead of inferring it from the model name.
    pub provider: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub timeout: Duration,
}

impl Default for OracleSettings {
    fn default() -> Self {
        Self {
            model: "gpt-4o".to_string(),
            provider: None,
            temperature: None,
            max_tokens: Some(512),
            timeout: Duration::from_secs(30),
        }
    }
}
