//! Append-only step trace for one analysis run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of entry in the step trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepKind {
    /// Reasoning about what to do next.
    Thought,
    /// A tool invocation.
    Action,
    /// What a tool invocation produced.
    Observation,
    /// The rendered recommendation.
    FinalAnswer,
    /// The failure that aborted the run.
    Error,
}

impl std::fmt::Display for StepKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepKind::Thought => write!(f, "Thought"),
            StepKind::Action => write!(f, "Action"),
            StepKind::Observation => write!(f, "Observation"),
            StepKind::FinalAnswer => write!(f, "FinalAnswer"),
            StepKind::Error => write!(f, "Error"),
        }
    }
}

/// One entry in the step trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    #[serde(rename = "type")]
    pub kind: StepKind,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_args: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

impl Step {
    /// Build a step stamped with the current time.
    pub fn new(
        kind: StepKind,
        content: impl Into<String>,
        tool_args: Option<serde_json::Value>,
    ) -> Self {
        Self {
            kind,
            content: content.into(),
            tool_args,
            timestamp: Utc::now(),
        }
    }
}

/// Ordered trace of a single run. Steps can be appended but never edited
/// or removed.
#[derive(Debug, Clone, Default)]
pub struct StepLog {
    steps: Vec<Step>,
}

impl StepLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, kind: StepKind, content: impl Into<String>, tool_args: Option<serde_json::Value>) {
        self.steps.push(Step::new(kind, content, tool_args));
    }

    pub fn thought(&mut self, content: impl Into<String>) {
        self.push(StepKind::Thought, content, None);
    }

    /// Record a tool call with its arguments.
    pub fn action(&mut self, content: impl Into<String>, tool_args: serde_json::Value) {
        self.push(StepKind::Action, content, Some(tool_args));
    }

    pub fn observation(&mut self, content: impl Into<String>) {
        self.push(StepKind::Observation, content, None);
    }

    pub fn final_answer(&mut self, content: impl Into<String>) {
        self.push(StepKind::FinalAnswer, content, None);
    }

    pub fn error(&mut self, content: impl Into<String>) {
        self.push(StepKind::Error, content, None);
    }

    /// Append steps built elsewhere, keeping their order and timestamps.
    pub fn extend(&mut self, steps: impl IntoIterator<Item = Step>) {
        self.steps.extend(steps);
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn into_steps(self) -> Vec<Step> {
        self.steps
    }
}
