//! Error taxonomy for the automation engine.

use thiserror::Error;

use crate::pipeline::RunState;

#[derive(Debug, Error)]
pub enum AgentError {
    /// A page-touching operation ran before `open_browser`.
    #[error("Browser not initialized")]
    BrowserNotInitialized,

    /// Planner output that is not JSON, or not an action array.
    #[error("Malformed plan: {0}")]
    MalformedPlan(String),

    /// The planning service failed or returned nothing usable.
    #[error("Planner failure: {0}")]
    PlannerFailure(String),

    #[error("Navigation to {url} failed: {reason}")]
    NavigationFailure { url: String, reason: String },

    #[error("Turn budget of {max} exceeded")]
    TurnBudgetExceeded { max: u32 },

    /// Any other driver-level failure (script, input, page creation).
    #[error("Driver error: {0}")]
    Driver(String),

    #[error("Step {step} ({action}) failed: {source}")]
    StepFailed {
        step: usize,
        action: String,
        #[source]
        source: Box<AgentError>,
    },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl AgentError {
    /// Short machine-friendly name, used in failure reports.
    pub fn kind(&self) -> &'static str {
        match self {
            AgentError::BrowserNotInitialized => "BrowserNotInitialized",
            AgentError::MalformedPlan(_) => "MalformedPlan",
            AgentError::PlannerFailure(_) => "PlannerFailure",
            AgentError::NavigationFailure { .. } => "NavigationFailure",
            AgentError::TurnBudgetExceeded { .. } => "TurnBudgetExceeded",
            AgentError::Driver(_) => "Driver",
            AgentError::StepFailed { .. } => "StepFailed",
            AgentError::Config(_) => "Config",
        }
    }
}

impl From<serde_json::Error> for AgentError {
    fn from(e: serde_json::Error) -> Self {
        AgentError::Driver(format!("Unexpected script result: {}", e))
    }
}

/// A run that ended in [`RunState::Aborted`].
#[derive(Debug, Error)]
#[error("Run aborted after {state:?} for task '{task}' ({elapsed_ms}ms): {source}")]
pub struct RunFailure {
    /// Last state reached before the error.
    pub state: RunState,
    /// Task excerpt for diagnostics.
    pub task: String,
    pub elapsed_ms: u64,
    #[source]
    pub source: AgentError,
}

pub type Result<T, E = AgentError> = std::result::Result<T, E>;
