pub mod context;
pub mod error;
pub mod graph;
pub mod task;

// Re-export commonly used types
pub use context::{Context, MessageRole, SerializableMessage};
pub use error::{FlowError, Result};
pub use graph::{ExecutionResult, Graph, GraphBuilder};
pub use task::{NextAction, Task, TaskResult};
