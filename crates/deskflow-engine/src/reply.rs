//! The oracle's reply grammar and its validation against the stage graph.
//!
//! A reply is exactly three fields separated by a literal delimiter:
//! `Stage Name || Reason for decision || Sentiment`. Anything else is
//! malformed. A well-formed reply is then checked against the allowed
//! successors of the stage being left.

use serde::Serialize;

use crate::graph::{StageDefinition, StageGraph};

// ---------------------------------------------------------------------------
// Contract
// ---------------------------------------------------------------------------

/// Versioned description of the reply format the prompt asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplyContract {
    pub version: u32,
    pub delimiter: &'static str,
    pub fields: [&'static str; 3],
}

impl ReplyContract {
    pub const V1: ReplyContract = ReplyContract {
        version: 1,
        delimiter: "||",
        fields: ["Stage Name", "Reason for decision", "Sentiment"],
    };

    /// Format line placed in the system prompt.
    pub fn directive(&self) -> String {
        format!(
            "Respond strictly in the format: {}.",
            self.fields.join(&format!(" {} ", self.delimiter))
        )
    }

    /// Render a sample reply for the prompt.
    pub fn example(&self, stage_name: &str, reason: &str, sentiment: &str) -> String {
        let sep = format!(" {} ", self.delimiter);
        [stage_name, reason, sentiment].join(&sep)
    }

    pub fn parse(&self, raw: &str) -> Result<ParsedReply, ReplyError> {
        let fields: Vec<&str> = raw.trim().split(self.delimiter).map(str::trim).collect();
        match fields.as_slice() {
            [stage_name, reason, sentiment] => Ok(ParsedReply {
                stage_name: stage_name.to_string(),
                reason: reason.to_string(),
                sentiment: sentiment.to_lowercase(),
            }),
            _ => Err(ReplyError::Malformed {
                expected: self.fields.len(),
                found: fields.len(),
            }),
        }
    }
}

impl Default for ReplyContract {
    fn default() -> Self {
        Self::V1
    }
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParsedReply {
    pub stage_name: String,
    pub reason: String,
    /// Lower-cased.
    pub sentiment: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReplyError {
    #[error("malformed reply: expected {expected} fields, found {found}")]
    Malformed { expected: usize, found: usize },
}

/// Parse with the current contract.
pub fn parse_reply(raw: &str) -> Result<ParsedReply, ReplyError> {
    ReplyContract::V1.parse(raw)
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Carries the id of the accepted successor.
    Accepted(String),
    Rejected(String),
}

/// Check a parsed reply against the successors of `from`.
pub fn validate_reply(parsed: &ParsedReply, from: &StageDefinition, graph: &StageGraph) -> Verdict {
    match graph.successor_named(from, &parsed.stage_name) {
        Some(target) => Verdict::Accepted(target.id.clone()),
        None => Verdict::Rejected(format!(
            "'{}' is not an allowed successor of '{}'",
            parsed.stage_name, from.name
        )),
    }
}
