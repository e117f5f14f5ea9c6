use thiserror::Error;

/// Engine-level failures. Compile-time variants come from graph
/// validation; run-time variants abort a run.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum WorkflowError {
    #[error("workflow '{0}' has no entry step")]
    MissingEntry(String),

    #[error("missing step: {0}")]
    MissingStep(String),

    #[error("step registered twice: {0}")]
    DuplicateStep(String),

    #[error("step '{0}' has more than one outgoing transition")]
    DuplicateTransition(String),

    #[error("edge from '{from}' targets unknown step '{to}'")]
    InvalidEdge { from: String, to: String },

    #[error("conditional step '{0}' has an empty route map")]
    EmptyRouteMap(String),

    #[error("step '{0}' is unreachable from the entry step")]
    UnreachableStep(String),

    #[error("cycle through '{0}' without an explicit loop edge")]
    CycleDetected(String),

    #[error("routing error in '{step}': label '{label}' has no mapped target")]
    Routing { step: String, label: String },

    #[error("step '{0}' re-entered without a loop edge")]
    Reentry(String),

    #[error("Max steps exceeded: reached {reached}, limit {max}")]
    MaxStepsExceeded { max: usize, reached: usize },

    #[error("checkpoint failed: {0}")]
    Checkpoint(String),

    #[error("no checkpoint for request {0}")]
    CheckpointNotFound(String),
}
