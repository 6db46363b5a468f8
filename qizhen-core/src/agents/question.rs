use qizhen_flow::{Context, Graph};
use tracing::{error, info, warn};

use super::{AgentRequest, SubjectServices};
use crate::error::LlmError;
use crate::filter::strip_explanations;
use crate::intent::IntentParser;
use crate::llm::{ChatMessage, ChatOptions};
use crate::models::GeneratedOutput;
use crate::prompts;
use crate::session::Session;
use crate::tasks::question::{NO_CACHED_QUESTIONS, wants_reveal};
use crate::tasks::types::{QUESTION_TEMPERATURE, keys};
use crate::upload::StagedImage;
use crate::workflow::build_question_workflow;

pub const QUESTION_FAILURE: &str = "抱歉，生成题目时出现问题，请稍后再试。";

/// With an image, these words mean the caller wants questions rather than an analysis.
const IMAGE_EXAM_KEYWORDS: &[&str] = &[
    "出题", "生成题目", "题目", "选择题", "判断题", "简答题", "试题", "练习",
];

/// Generates practice questions and reveals their answers on request. The
/// generated output is cached on the caller's session, never on the agent.
pub struct QuestionAgent {
    services: SubjectServices,
    graph: Graph,
}

impl QuestionAgent {
    pub fn new(services: SubjectServices, parser: IntentParser) -> Self {
        let graph = build_question_workflow(
            services.subject,
            parser,
            services.llm.clone(),
            services.retriever.clone(),
        );
        Self { services, graph }
    }

    pub async fn process(&self, request: AgentRequest<'_>, session: &mut Session) -> String {
        if let Some(image) = request.image {
            if wants_reveal(request.text) {
                return reveal(session);
            }
            match self.from_image(request, image).await {
                Ok(full_text) => {
                    let output = GeneratedOutput {
                        question_only_text: strip_explanations(&full_text),
                        full_text,
                    };
                    let wants_questions = IMAGE_EXAM_KEYWORDS
                        .iter()
                        .any(|kw| request.text.contains(kw));
                    let reply = if wants_questions {
                        output.question_only_text.clone()
                    } else {
                        output.full_text.clone()
                    };
                    session.last_output = Some(output);
                    return reply;
                }
                Err(e) => {
                    warn!(subject = self.services.subject.slug, "image question request failed, using text pipeline: {}", e);
                }
            }
        }

        self.from_text(request, session).await
    }

    async fn from_image(&self, request: AgentRequest<'_>, image: &StagedImage) -> Result<String, LlmError> {
        let messages = vec![
            ChatMessage::system(prompts::multimodal_system(self.services.subject)),
            ChatMessage::user(request.text),
        ];
        let reply = self
            .services
            .llm
            .vision(
                messages,
                image.bytes(),
                ChatOptions::new(QUESTION_TEMPERATURE, &request.params),
            )
            .await?;
        Ok(reply.trim().to_string())
    }

    async fn from_text(&self, request: AgentRequest<'_>, session: &mut Session) -> String {
        let context = Context::new();
        context.set(keys::USER_INPUT, request.text).await;
        context.set(keys::GENERATION_PARAMS, request.params).await;
        if let Some(cached) = &session.last_output {
            context.set(keys::CACHED_OUTPUT, cached).await;
        }

        match self.graph.execute(context.clone()).await {
            Ok(result) => {
                if let Some(output) = context.get::<GeneratedOutput>(keys::GENERATED_OUTPUT).await {
                    session.last_output = Some(output);
                }
                info!(
                    subject = self.services.subject.slug,
                    last_task = %result.last_task_id,
                    status = ?result.status_message,
                    "question workflow finished"
                );
                result
                    .response
                    .unwrap_or_else(|| QUESTION_FAILURE.to_string())
            }
            Err(e) => {
                error!(subject = self.services.subject.slug, "question workflow failed: {}", e);
                QUESTION_FAILURE.to_string()
            }
        }
    }
}

fn reveal(session: &Session) -> String {
    session
        .last_output
        .as_ref()
        .map(|output| output.full_text.clone())
        .unwrap_or_else(|| NO_CACHED_QUESTIONS.to_string())
}
