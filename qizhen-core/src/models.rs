use serde::{Deserialize, Serialize};
use std::time::Duration;

use qizhen_flow::SerializableMessage;

/// Response-shaping level chosen by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseMode {
    Fast,
    #[default]
    Balanced,
    Detailed,
}

impl ResponseMode {
    /// Lenient parse: case-insensitive, anything unknown is `Balanced`.
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(|s| s.trim().to_lowercase()).as_deref() {
            Some("fast") => ResponseMode::Fast,
            Some("detailed") => ResponseMode::Detailed,
            _ => ResponseMode::Balanced,
        }
    }

    pub fn params(self) -> GenerationParams {
        match self {
            ResponseMode::Fast => GenerationParams {
                max_tokens: 400,
                timeout: Duration::from_secs(15),
                retrieval_k: 3,
            },
            ResponseMode::Balanced => GenerationParams {
                max_tokens: 1000,
                timeout: Duration::from_secs(30),
                retrieval_k: 5,
            },
            ResponseMode::Detailed => GenerationParams {
                max_tokens: 1600,
                timeout: Duration::from_secs(45),
                retrieval_k: 7,
            },
        }
    }
}

/// Per-request generation controls. Passed down explicitly, never stored on an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationParams {
    pub max_tokens: u32,
    pub timeout: Duration,
    pub retrieval_k: usize,
}

impl Default for GenerationParams {
    fn default() -> Self {
        ResponseMode::Balanced.params()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QuestionKind {
    Choice,
    TrueFalse,
    ShortAnswer,
}

impl QuestionKind {
    pub const ALL: [QuestionKind; 3] = [
        QuestionKind::Choice,
        QuestionKind::TrueFalse,
        QuestionKind::ShortAnswer,
    ];

    pub fn label(self) -> &'static str {
        match self {
            QuestionKind::Choice => "选择题",
            QuestionKind::TrueFalse => "判断题",
            QuestionKind::ShortAnswer => "简答题",
        }
    }

    /// Map a matched type word onto a kind. Material-analysis is a short answer.
    pub fn from_label(raw: &str) -> Option<Self> {
        let compact: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
        match compact.as_str() {
            "选择题" => Some(QuestionKind::Choice),
            "判断题" => Some(QuestionKind::TrueFalse),
            "简答题" | "材料分析" | "材料分析题" => Some(QuestionKind::ShortAnswer),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QuestionType {
    Single(QuestionKind),
    Mixed,
}

impl QuestionType {
    pub fn label(self) -> &'static str {
        match self {
            QuestionType::Single(kind) => kind.label(),
            QuestionType::Mixed => "混合",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Difficulty {
    Easy,
    #[default]
    Medium,
    Hard,
}

impl Difficulty {
    pub fn label(self) -> &'static str {
        match self {
            Difficulty::Easy => "简单",
            Difficulty::Medium => "中等",
            Difficulty::Hard => "困难",
        }
    }
}

/// Structured reading of a question-generation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedIntent {
    /// Detection order, no duplicates
    pub topics: Vec<String>,
    pub num_questions: u32,
    pub difficulty: Difficulty,
    pub question_type: QuestionType,
    /// Insertion order is the order types were found; counts sum to `num_questions`
    pub type_counts: Vec<(QuestionKind, u32)>,
}

impl ParsedIntent {
    /// Topics joined for prompt rendering.
    pub fn topic_line(&self) -> String {
        self.topics.join("; ")
    }

    pub fn count_for(&self, kind: QuestionKind) -> Option<u32> {
        self.type_counts
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, n)| *n)
    }
}

/// Which agent a chat request goes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    KnowledgeGraph,
    Answer,
    QuestionGeneration,
}

/// Generated questions with and without their answers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedOutput {
    pub full_text: String,
    pub question_only_text: String,
}

/// State of one persona dialogue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DialogueState {
    pub topic: String,
    pub persona_character: String,
    pub turn_count: u32,
    pub history: Vec<SerializableMessage>,
}

/// What a dialogue turn hands back to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DialogueReply {
    pub response: String,
    pub character: String,
    pub topic: String,
    pub turn_count: u32,
}
