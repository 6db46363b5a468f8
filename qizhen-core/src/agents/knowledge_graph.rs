use qizhen_flow::{Context, Graph};
use tracing::error;

use super::SubjectServices;
use crate::models::GenerationParams;
use crate::tasks::types::keys;
use crate::workflow::build_knowledge_graph_workflow;

pub const GRAPH_FAILURE: &str = "抱歉，生成知识图谱时出现问题，请稍后再试。";

/// Text-only: the dispatcher answers image requests with a notice instead.
pub struct KnowledgeGraphAgent {
    services: SubjectServices,
    graph: Graph,
}

impl KnowledgeGraphAgent {
    pub fn new(services: SubjectServices) -> Self {
        let graph = build_knowledge_graph_workflow(
            services.subject,
            services.llm.clone(),
            services.retriever.clone(),
        );
        Self { services, graph }
    }

    pub async fn process(&self, text: &str, params: GenerationParams) -> String {
        let context = Context::new();
        context.set(keys::USER_INPUT, text).await;
        context.set(keys::GENERATION_PARAMS, params).await;

        match self.graph.execute(context).await {
            Ok(result) => result
                .response
                .unwrap_or_else(|| GRAPH_FAILURE.to_string()),
            Err(e) => {
                error!(subject = self.services.subject.slug, "knowledge graph workflow failed: {}", e);
                GRAPH_FAILURE.to_string()
            }
        }
    }
}
