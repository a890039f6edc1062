use thiserror::Error;

#[derive(Debug, Error)]
pub enum AxiomError {
    // Workflow document errors
    #[error("Workflow syntax error: {0}")]
    Syntax(String),

    #[error("Workflow validation failed: {0}")]
    Validation(#[from] ValidationError),

    // Execution errors
    #[error("No implementation registered for step '{step}'")]
    MissingImplementation { step: String },

    #[error("Step '{step}' failed after {attempts} attempt(s): {source}")]
    StepFailed {
        step: String,
        attempts: usize,
        #[source]
        source: Box<AxiomError>,
    },

    #[error("Execution failed: {0}")]
    Execution(String),

    #[error("Workflow exceeded timeout ({timeout_secs}s)")]
    WorkflowTimeout { timeout_secs: u64 },

    #[error("Execution graph inconsistent: ordered {ordered} of {total} steps")]
    GraphInconsistency { ordered: usize, total: usize },

    #[error("Operation cancelled")]
    Cancelled,

    // Routing errors
    #[error("No agents meet the task requirements")]
    NoAgentsAvailable,

    #[error("Agent '{agent}' carries disallowed policies: {}", .policies.join(", "))]
    PolicyViolation { agent: String, policies: Vec<String> },

    #[error("Scoring failed: {0}")]
    Scoring(String),

    // Handoff errors
    #[error("Invalid handoff recipient: {0}")]
    InvalidRecipient(String),

    #[error("Handoff to '{recipient}' timed out after {timeout_ms}ms")]
    HandoffTimeout { recipient: String, timeout_ms: u64 },

    #[error("Context corruption during handoff to '{recipient}': {reason}")]
    ContextCorruption { recipient: String, reason: String },

    #[error("Context fidelity failure during handoff to '{recipient}'")]
    ContextFidelity { recipient: String },

    #[error("Context hash mismatch: expected {expected}, got {actual}")]
    HashMismatch { expected: String, actual: String },

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AxiomError {
    /// The workflow document was not well-formed YAML/JSON.
    pub fn is_syntax(&self) -> bool {
        matches!(self, AxiomError::Syntax(_))
    }

    /// The workflow document was well-formed but semantically invalid.
    pub fn is_validation(&self) -> bool {
        matches!(self, AxiomError::Validation(_))
    }

    /// The validation rule that rejected the workflow, if any.
    pub fn validation(&self) -> Option<&ValidationError> {
        match self {
            AxiomError::Validation(v) => Some(v),
            _ => None,
        }
    }

    /// Strip `StepFailed` wrappers down to the error the step itself raised.
    pub fn root_cause(&self) -> &AxiomError {
        match self {
            AxiomError::StepFailed { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

/// Semantic rule violations found while validating a workflow document.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Missing workflow section")]
    MissingWorkflowSection,

    #[error("Missing fields: {}", .0.join(", "))]
    MissingFields(Vec<String>),

    #[error("Malformed workflow: {0}")]
    Schema(String),

    #[error("Duplicate step id: {0}")]
    DuplicateStep(String),

    #[error("Unknown persona '{persona}' in step '{step}'")]
    UnknownPersona { step: String, persona: String },

    #[error("Unknown gate '{gate}' in step '{step}'")]
    UnknownGate { step: String, gate: String },

    #[error("Edge references unknown step '{0}'")]
    UnknownEdgeEndpoint(String),

    #[error("Invalid backoff strategy '{strategy}' in step '{step}'")]
    InvalidBackoffStrategy { step: String, strategy: String },

    #[error("Unsatisfied input reference '{reference}' in step '{step}'")]
    UnsatisfiedInput { step: String, reference: String },

    #[error("Circular dependency detected at step '{0}'")]
    CircularDependency(String),
}

pub type Result<T> = std::result::Result<T, AxiomError>;
