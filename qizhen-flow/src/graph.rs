use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::{
    context::Context,
    error::{FlowError, Result},
    task::{NextAction, Task},
};

/// Type alias for edge condition functions
pub type EdgeCondition = Arc<dyn Fn(&Context) -> bool + Send + Sync>;

const DEFAULT_MAX_STEPS: usize = 32;

/// Edge between tasks in the graph
#[derive(Clone)]
pub struct Edge {
    pub from: String,
    pub to: String,
    pub condition: Option<EdgeCondition>,
}

/// Outcome of running a graph to completion.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    /// Response of the last task that produced one
    pub response: Option<String>,
    /// Task that ended the run
    pub last_task_id: String,
    /// Status message of the last task that set one
    pub status_message: Option<String>,
    pub steps: usize,
}

/// An immutable graph of tasks. Build it with [`GraphBuilder`].
pub struct Graph {
    pub id: String,
    tasks: HashMap<String, Arc<dyn Task>>,
    edges: Vec<Edge>,
    start_task_id: Option<String>,
    max_steps: usize,
}

impl Graph {
    /// Run the graph from its start task until a task ends it or no edge applies.
    pub async fn execute(&self, context: Context) -> Result<ExecutionResult> {
        let mut current = self
            .start_task_id
            .clone()
            .ok_or_else(|| FlowError::NoStartTask(self.id.clone()))?;
        let mut response = None;
        let mut status_message = None;
        let mut steps = 0;

        loop {
            if steps >= self.max_steps {
                return Err(FlowError::StepLimitExceeded {
                    graph: self.id.clone(),
                    limit: self.max_steps,
                });
            }
            steps += 1;

            let task = self
                .tasks
                .get(&current)
                .ok_or_else(|| FlowError::TaskNotFound(current.clone()))?;
            debug!(graph = %self.id, task = %current, "running task");

            let result = task.run(context.clone()).await?;
            if result.response.is_some() {
                response = result.response;
            }
            if result.status_message.is_some() {
                status_message = result.status_message;
            }

            let next = match result.next_action {
                NextAction::End => None,
                NextAction::Continue => self.find_next_task(&current, &context),
                NextAction::GoTo(target) => {
                    if !self.tasks.contains_key(&target) {
                        return Err(FlowError::TaskNotFound(target));
                    }
                    Some(target)
                }
            };

            match next {
                Some(next) => current = next,
                None => {
                    return Ok(ExecutionResult {
                        response,
                        last_task_id: current,
                        status_message,
                        steps,
                    });
                }
            }
        }
    }

    /// Find the next task: the first outgoing edge whose condition holds (or that has none).
    fn find_next_task(&self, current_task_id: &str, context: &Context) -> Option<String> {
        self.edges
            .iter()
            .filter(|edge| edge.from == current_task_id)
            .find(|edge| edge.condition.as_ref().is_none_or(|condition| condition(context)))
            .map(|edge| edge.to.clone())
    }
}

/// Builder for creating graphs
pub struct GraphBuilder {
    graph: Graph,
}

impl GraphBuilder {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            graph: Graph {
                id: id.into(),
                tasks: HashMap::new(),
                edges: Vec::new(),
                start_task_id: None,
                max_steps: DEFAULT_MAX_STEPS,
            },
        }
    }

    /// Add a task. The first task added becomes the start task.
    pub fn add_task(mut self, task: Arc<dyn Task>) -> Self {
        let task_id = task.id().to_string();
        if self.graph.start_task_id.is_none() {
            self.graph.start_task_id = Some(task_id.clone());
        }
        self.graph.tasks.insert(task_id, task);
        self
    }

    pub fn add_edge(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.graph.edges.push(Edge {
            from: from.into(),
            to: to.into(),
            condition: None,
        });
        self
    }

    /// Route from `from` to `yes` when `condition` holds, otherwise to `no`.
    pub fn add_conditional_edge<F>(
        mut self,
        from: impl Into<String>,
        condition: F,
        yes: impl Into<String>,
        no: impl Into<String>,
    ) -> Self
    where
        F: Fn(&Context) -> bool + Send + Sync + 'static,
    {
        let from = from.into();
        self.graph.edges.push(Edge {
            from: from.clone(),
            to: yes.into(),
            condition: Some(Arc::new(condition)),
        });
        self.graph.edges.push(Edge {
            from,
            to: no.into(),
            condition: None,
        });
        self
    }

    pub fn max_steps(mut self, max_steps: usize) -> Self {
        self.graph.max_steps = max_steps;
        self
    }

    pub fn build(self) -> Graph {
        self.graph
    }
}
