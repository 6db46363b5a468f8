use thiserror::Error;

/// Errors raised while running a task graph.
#[derive(Debug, Error)]
pub enum FlowError {
    #[error("task not found: {0}")]
    TaskNotFound(String),

    #[error("task execution failed: {0}")]
    TaskExecutionFailed(String),

    #[error("context error: {0}")]
    ContextError(String),

    #[error("graph {0} has no start task")]
    NoStartTask(String),

    #[error("graph {graph} exceeded {limit} steps")]
    StepLimitExceeded { graph: String, limit: usize },
}

pub type Result<T> = std::result::Result<T, FlowError>;
