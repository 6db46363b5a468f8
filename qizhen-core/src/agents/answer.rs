use qizhen_flow::{Context, Graph};
use tracing::{debug, error, warn};

use super::{AgentRequest, SubjectServices};
use crate::llm::{ChatMessage, ChatOptions};
use crate::models::GenerationParams;
use crate::prompts;
use crate::tasks::answer::strip_fences;
use crate::tasks::types::{ANSWER_TEMPERATURE, keys};
use crate::upload::StagedImage;
use crate::workflow::build_answer_workflow;

pub const ANSWER_FAILURE: &str = "抱歉，回答过程中出现问题，请稍后再试。";

const OCR_HEADER: &str = "\n\n以下是 OCR 自动识别的图片文字，请据此解答：\n";
const OCR_MAX_CHARS: usize = 1500;

/// Retrieval-augmented Q&A. Image questions also get the OCR text of the image.
pub struct AnswerAgent {
    services: SubjectServices,
    graph: Graph,
}

impl AnswerAgent {
    pub fn new(services: SubjectServices) -> Self {
        let graph = build_answer_workflow(
            services.subject,
            services.llm.clone(),
            services.retriever.clone(),
        );
        Self { services, graph }
    }

    pub async fn process(&self, request: AgentRequest<'_>) -> String {
        match request.image {
            Some(image) => self.from_image(request, image).await,
            None => self.answer(request.text, request.params).await,
        }
    }

    async fn from_image(&self, request: AgentRequest<'_>, image: &StagedImage) -> String {
        let recognized = self.services.ocr.extract_text(image.path()).await;
        debug!(chars = recognized.chars().count(), "OCR text for answer");

        let mut combined = request.text.to_string();
        if !recognized.is_empty() {
            combined.push_str(OCR_HEADER);
            combined.extend(recognized.chars().take(OCR_MAX_CHARS));
        }

        let messages = vec![
            ChatMessage::system(prompts::multimodal_system(self.services.subject)),
            ChatMessage::user(combined),
        ];
        match self
            .services
            .llm
            .vision(
                messages,
                image.bytes(),
                ChatOptions::new(ANSWER_TEMPERATURE, &request.params),
            )
            .await
        {
            Ok(reply) => reply.trim().to_string(),
            Err(e) => {
                warn!(subject = self.services.subject.slug, "image answer failed, using text pipeline: {}", e);
                let question = if recognized.is_empty() {
                    request.text
                } else {
                    recognized.as_str()
                };
                self.answer(question, request.params).await
            }
        }
    }

    async fn answer(&self, question: &str, params: GenerationParams) -> String {
        let context = Context::new();
        context.set(keys::USER_INPUT, question).await;
        context.set(keys::GENERATION_PARAMS, params).await;

        match self.graph.execute(context).await {
            Ok(result) => result
                .response
                .map(|r| strip_fences(&r))
                .unwrap_or_else(|| ANSWER_FAILURE.to_string()),
            Err(e) => {
                error!(subject = self.services.subject.slug, "answer workflow failed: {}", e);
                ANSWER_FAILURE.to_string()
            }
        }
    }
}
