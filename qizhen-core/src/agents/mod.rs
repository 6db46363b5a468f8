//! One agent per capability of a subject. Agents turn every remote failure into
//! a user-facing string, so nothing below the HTTP layer surfaces a raw error.

pub mod answer;
pub mod dialogue;
pub mod knowledge_graph;
pub mod question;

use std::sync::Arc;

use crate::llm::LlmInvoker;
use crate::models::GenerationParams;
use crate::ocr::TextRecognizer;
use crate::retrieval::Retriever;
use crate::subjects::SubjectProfile;
use crate::upload::StagedImage;

pub use answer::AnswerAgent;
pub use dialogue::{DialogueAgent, DialogueTurn};
pub use knowledge_graph::KnowledgeGraphAgent;
pub use question::QuestionAgent;

/// Everything the agents of one subject share.
#[derive(Clone)]
pub struct SubjectServices {
    pub subject: &'static SubjectProfile,
    pub llm: LlmInvoker,
    pub retriever: Retriever,
    pub ocr: Arc<dyn TextRecognizer>,
}

/// One request as an agent sees it.
#[derive(Clone, Copy)]
pub struct AgentRequest<'a> {
    pub text: &'a str,
    pub image: Option<&'a StagedImage>,
    pub params: GenerationParams,
}

impl<'a> AgentRequest<'a> {
    pub fn text(text: &'a str, params: GenerationParams) -> Self {
        Self {
            text,
            image: None,
            params,
        }
    }
}
