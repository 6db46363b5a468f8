//! Request classification and per-subject dispatch.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::{Arc, LazyLock};
use tracing::{info, instrument, warn};

use crate::agents::{
    AgentRequest, AnswerAgent, DialogueAgent, KnowledgeGraphAgent, QuestionAgent, SubjectServices,
};
use crate::error::{ChatError, DialogueError, SessionError};
use crate::intent::IntentParser;
use crate::models::{DialogueReply, ResponseMode, Route};
use crate::session::{Session, SessionLocks, SessionStore};
use crate::subjects::SubjectProfile;
use crate::upload::{ImageLimits, StagedImage, stage_image};

pub const GRAPH_IMAGE_NOTICE: &str =
    "知识图谱生成功能暂时不支持图片输入，请使用纯文本描述您需要的知识图谱主题。";
pub const IMAGE_ONLY_PROMPT: &str = "请结合图片进行分析并回答问题。";
pub const DIALOGUE_START_IMAGE_PROMPT: &str = "请结合这张图片开始对话并提出苏格拉底式问题。";
pub const DIALOGUE_CONTINUE_IMAGE_PROMPT: &str = "请结合这张图片继续对话并提出苏格拉底式问题。";
pub const DIALOGUE_ENDED: &str = "对话已结束";
pub const DIALOGUE_NOT_FOUND: &str = "会话未找到或已结束";

static MCQ_OPTION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-DＡ-Ｄ][\.．、]\s?").expect("mcq option regex is valid"));

/// Keyword sets the router checks, in priority order.
#[derive(Debug, Clone)]
pub struct RouteKeywords {
    pub graph: Vec<String>,
    pub answer: Vec<String>,
    pub exam: Vec<String>,
}

impl Default for RouteKeywords {
    fn default() -> Self {
        let words = |list: &[&str]| list.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        Self {
            graph: words(&["知识图谱", "思维导图", "mindmap", "图谱"]),
            answer: words(&["解答", "答案", "解析", "请回答", "帮我回答", "帮我解答"]),
            exam: words(&["出题", "生成题目", "选择题", "判断题", "简答题", "试题", "练习"]),
        }
    }
}

/// Graph words win, then answer words or option-shaped text, then exam words.
/// Everything else is a question to answer.
pub fn classify(text: &str, keywords: &RouteKeywords) -> Route {
    let contains_any = |words: &[String]| words.iter().any(|w| text.contains(w.as_str()));
    if contains_any(&keywords.graph) {
        Route::KnowledgeGraph
    } else if contains_any(&keywords.answer) || MCQ_OPTION_RE.is_match(text) {
        Route::Answer
    } else if contains_any(&keywords.exam) {
        Route::QuestionGeneration
    } else {
        Route::Answer
    }
}

/// A `/chat` call.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub response_mode: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatReply {
    pub response: String,
    pub session_id: String,
    pub route: Route,
}

/// A `/start_dialogue` or `/continue_dialogue` call.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DialogueRequest {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub response_mode: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DialogueResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(flatten)]
    pub reply: DialogueReply,
}

/// Routes requests for one subject to its agents and keeps their session state
/// in the injected store. Turns on the same session run one at a time.
pub struct Dispatcher {
    subject: &'static SubjectProfile,
    question: QuestionAgent,
    answer: AnswerAgent,
    knowledge_graph: KnowledgeGraphAgent,
    dialogue: Option<DialogueAgent>,
    store: Arc<dyn SessionStore>,
    locks: SessionLocks,
    keywords: RouteKeywords,
    upload_dir: PathBuf,
    limits: ImageLimits,
}

impl Dispatcher {
    pub fn new(
        services: SubjectServices,
        store: Arc<dyn SessionStore>,
        upload_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            subject: services.subject,
            question: QuestionAgent::new(services.clone(), IntentParser::default()),
            answer: AnswerAgent::new(services.clone()),
            knowledge_graph: KnowledgeGraphAgent::new(services.clone()),
            dialogue: DialogueAgent::new(services),
            store,
            locks: SessionLocks::new(),
            keywords: RouteKeywords::default(),
            upload_dir: upload_dir.into(),
            limits: ImageLimits::default(),
        }
    }

    pub fn with_keywords(mut self, keywords: RouteKeywords) -> Self {
        self.keywords = keywords;
        self
    }

    pub fn with_image_limits(mut self, limits: ImageLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn subject(&self) -> &'static SubjectProfile {
        self.subject
    }

    pub fn has_dialogue(&self) -> bool {
        self.dialogue.is_some()
    }

    #[instrument(skip_all, fields(subject = self.subject.slug))]
    pub async fn handle_chat(&self, request: ChatRequest) -> Result<ChatReply, ChatError> {
        let mut text = request.message.as_deref().unwrap_or("").trim().to_string();
        if text.is_empty() && request.image.is_none() {
            return Err(ChatError::EmptyInput);
        }
        let image = self.stage(request.image).await?;
        if text.is_empty() {
            text = IMAGE_ONLY_PROMPT.to_string();
        }
        let params = ResponseMode::parse(request.response_mode.as_deref()).params();

        let guard = match &request.session_id {
            Some(id) => Some(self.locks.lock(id).await),
            None => None,
        };
        let loaded = match &request.session_id {
            Some(id) => self.load(id).await?,
            None => None,
        };
        let existed = loaded.is_some();
        let mut session = loaded.unwrap_or_else(|| Session::new(self.subject.slug));

        let route = classify(&text, &self.keywords);
        info!(route = ?route, has_image = image.is_some(), session = %session.id, "dispatching chat");

        let agent_request = AgentRequest {
            text: &text,
            image: image.as_ref(),
            params,
        };
        let response = match route {
            Route::KnowledgeGraph if image.is_some() => GRAPH_IMAGE_NOTICE.to_string(),
            Route::KnowledgeGraph => self.knowledge_graph.process(&text, params).await,
            Route::Answer => self.answer.process(agent_request).await,
            Route::QuestionGeneration => self.question.process(agent_request, &mut session).await,
        };

        // A new session is stored only once it caches generated questions.
        let session_id = session.id.clone();
        if existed || session.last_output.is_some() {
            session.touch();
            self.store.put(session).await?;
        }
        if let (Some(id), Some(guard), false) = (request.session_id.as_deref(), guard, existed) {
            self.locks.release(id, guard);
        }

        Ok(ChatReply {
            response,
            session_id,
            route,
        })
    }

    #[instrument(skip_all, fields(subject = self.subject.slug))]
    pub async fn start_dialogue(&self, request: DialogueRequest) -> Result<DialogueResponse, DialogueError> {
        let agent = self.dialogue.as_ref().ok_or(DialogueError::Unavailable)?;

        let mut text = request.message.as_deref().unwrap_or("").trim().to_string();
        if text.is_empty() && request.image.is_none() {
            return Err(DialogueError::MissingTopic);
        }
        let image = self.stage(request.image).await?;
        if text.is_empty() {
            text = DIALOGUE_START_IMAGE_PROMPT.to_string();
        }
        let params = ResponseMode::parse(request.response_mode.as_deref()).params();

        let turn = agent
            .respond(
                AgentRequest {
                    text: &text,
                    image: image.as_ref(),
                    params,
                },
                None,
            )
            .await?;

        let mut session = Session::new(self.subject.slug);
        session.dialogue = Some(turn.state);
        let session_id = session.id.clone();
        self.store.put(session).await?;
        info!(session = %session_id, character = %turn.reply.character, "dialogue started");

        Ok(DialogueResponse {
            session_id: Some(session_id),
            reply: turn.reply,
        })
    }

    #[instrument(skip_all, fields(subject = self.subject.slug))]
    pub async fn continue_dialogue(&self, request: DialogueRequest) -> Result<DialogueResponse, DialogueError> {
        let agent = self.dialogue.as_ref().ok_or(DialogueError::Unavailable)?;
        let session_id = request
            .session_id
            .as_deref()
            .ok_or(DialogueError::SessionExpired)?;

        let guard = self.locks.lock(session_id).await;
        let Some(mut session) = self.load(session_id).await?.filter(|s| s.dialogue.is_some()) else {
            self.locks.release(session_id, guard);
            return Err(DialogueError::SessionExpired);
        };

        let mut text = request.message.as_deref().unwrap_or("").trim().to_string();
        if text.is_empty() && request.image.is_none() {
            return Err(DialogueError::MissingReply);
        }
        let image = self.stage(request.image).await?;
        if text.is_empty() {
            text = DIALOGUE_CONTINUE_IMAGE_PROMPT.to_string();
        }
        let params = ResponseMode::parse(request.response_mode.as_deref()).params();

        let turn = agent
            .respond(
                AgentRequest {
                    text: &text,
                    image: image.as_ref(),
                    params,
                },
                session.dialogue.take(),
            )
            .await?;

        session.dialogue = Some(turn.state);
        session.touch();
        self.store.put(session).await?;

        Ok(DialogueResponse {
            session_id: None,
            reply: turn.reply,
        })
    }

    /// Remove a dialogue session. Returns the message to show the caller.
    pub async fn end_dialogue(&self, session_id: Option<&str>) -> Result<&'static str, SessionError> {
        let Some(id) = session_id else {
            return Ok(DIALOGUE_NOT_FOUND);
        };
        let guard = self.locks.lock(id).await;
        let is_dialogue = self
            .load(id)
            .await?
            .is_some_and(|s| s.dialogue.is_some());
        if is_dialogue {
            self.store.delete(id).await?;
        }
        self.locks.release(id, guard);
        if !is_dialogue {
            return Ok(DIALOGUE_NOT_FOUND);
        }
        info!(session = %id, "dialogue ended");
        Ok(DIALOGUE_ENDED)
    }

    /// Sessions of other subjects are invisible here.
    async fn load(&self, id: &str) -> Result<Option<Session>, SessionError> {
        Ok(self
            .store
            .get(id)
            .await?
            .filter(|s| s.subject == self.subject.slug))
    }

    async fn stage(&self, raw: Option<String>) -> Result<Option<StagedImage>, crate::error::ImageError> {
        let Some(raw) = raw else {
            return Ok(None);
        };
        let upload_dir = self.upload_dir.clone();
        let limits = self.limits;
        let staged = tokio::task::spawn_blocking(move || stage_image(&raw, &upload_dir, limits))
            .await
            .map_err(|e| crate::error::ImageError::Unreadable(e.to_string()))?;
        match staged {
            Ok(image) => Ok(Some(image)),
            Err(e) => {
                warn!(subject = self.subject.slug, "rejected uploaded image: {}", e);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::testing::services;
    use crate::error::ImageError;
    use crate::llm::testing::ScriptedChat;
    use crate::session::InMemorySessionStore;
    use crate::tasks::question::NO_CACHED_QUESTIONS;
    use crate::upload::testing::png_base64;

    async fn dispatcher(
        slug: &str,
        replies: Vec<Result<String, crate::error::LlmError>>,
    ) -> (Dispatcher, Arc<ScriptedChat>, Arc<InMemorySessionStore>, tempfile::TempDir) {
        let backend = ScriptedChat::new(replies);
        let store = Arc::new(InMemorySessionStore::new());
        let dir = tempfile::tempdir().unwrap();
        let dispatcher = Dispatcher::new(
            services(slug, backend.clone(), &[], "").await,
            store.clone(),
            dir.path(),
        );
        (dispatcher, backend, store, dir)
    }

    fn chat(message: &str) -> ChatRequest {
        ChatRequest {
            message: Some(message.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn classification_priority() {
        let keywords = RouteKeywords::default();
        assert_eq!(classify("帮我画一个知识图谱", &keywords), Route::KnowledgeGraph);
        assert_eq!(classify("选择题的答案是什么", &keywords), Route::Answer);
        assert_eq!(classify("以下哪项正确 A.实践 B.认识", &keywords), Route::Answer);
        assert_eq!(classify("出5道判断题", &keywords), Route::QuestionGeneration);
        assert_eq!(classify("什么是唯物辩证法", &keywords), Route::Answer);
        assert_eq!(classify("出一道关于图谱的选择题", &keywords), Route::KnowledgeGraph);
    }

    #[test]
    fn keyword_table_is_replaceable() {
        let keywords = RouteKeywords {
            graph: vec!["concept map".into()],
            answer: vec!["solve".into()],
            exam: vec!["quiz".into()],
        };
        assert_eq!(classify("draw a concept map", &keywords), Route::KnowledgeGraph);
        assert_eq!(classify("make a quiz", &keywords), Route::QuestionGeneration);
        assert_eq!(classify("知识图谱", &keywords), Route::Answer);
    }

    #[tokio::test]
    async fn empty_request_is_rejected() {
        let (dispatcher, _, _, _dir) = dispatcher("mayuan", vec![]).await;
        let err = dispatcher.handle_chat(chat("   ")).await.unwrap_err();
        assert!(matches!(err, ChatError::EmptyInput));
        assert_eq!(err.to_string(), "请输入文本或上传图片");
    }

    #[tokio::test]
    async fn oversized_image_is_rejected() {
        let (dispatcher, backend, _, _dir) = dispatcher("mayuan", vec![]).await;
        let request = ChatRequest {
            image: Some(png_base64(5000, 5000)),
            ..Default::default()
        };
        let err = dispatcher.handle_chat(request).await.unwrap_err();
        assert!(matches!(err, ChatError::Image(ImageError::TooManyPixels { .. })));
        assert!(backend.requests().is_empty());
    }

    #[tokio::test]
    async fn graph_request_with_image_gets_notice() {
        let (dispatcher, backend, _, _dir) = dispatcher("mayuan", vec![]).await;
        let request = ChatRequest {
            message: Some("帮我画一个知识图谱".into()),
            image: Some(png_base64(8, 8)),
            ..Default::default()
        };
        let reply = dispatcher.handle_chat(request).await.unwrap();
        assert_eq!(reply.route, Route::KnowledgeGraph);
        assert_eq!(reply.response, GRAPH_IMAGE_NOTICE);
        assert!(backend.requests().is_empty());
    }

    #[tokio::test]
    async fn response_mode_reaches_the_model() {
        let (dispatcher, backend, _, _dir) =
            dispatcher("mayuan", vec![Ok("回答".into())]).await;
        let request = ChatRequest {
            message: Some("什么是矛盾？".into()),
            response_mode: Some("fast".into()),
            ..Default::default()
        };
        dispatcher.handle_chat(request).await.unwrap();
        let options = backend.requests()[0].options;
        assert_eq!(options.max_tokens, 400);
        assert_eq!(options.timeout, std::time::Duration::from_secs(15));
    }

    #[tokio::test]
    async fn reveal_is_scoped_to_the_session() {
        let generated = "题目1：\n题干：长征开始于哪一年？\nA. 1934年\nB. 1935年\n正确答案：A\n解析：1934年10月。";
        let (dispatcher, _, store, _dir) =
            dispatcher("jindaishi", vec![Ok(generated.into())]).await;

        let first = dispatcher.handle_chat(chat("出1道长征选择题")).await.unwrap();
        assert_eq!(first.route, Route::QuestionGeneration);
        assert!(!first.response.contains("正确答案"));

        let other = dispatcher.handle_chat(chat("讲解选择题")).await.unwrap();
        assert_eq!(other.response, NO_CACHED_QUESTIONS);
        assert_ne!(other.session_id, first.session_id);

        let mut same = chat("讲解选择题");
        same.session_id = Some(first.session_id.clone());
        let revealed = dispatcher.handle_chat(same).await.unwrap();
        assert_eq!(revealed.response, generated);
        assert_eq!(revealed.session_id, first.session_id);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn stateless_chats_leave_no_sessions_or_locks() {
        let (dispatcher, _, store, _dir) = dispatcher(
            "mayuan",
            vec![Ok("回答一".into()), Ok("回答二".into()), Ok("回答三".into())],
        )
        .await;

        for question in ["什么是矛盾？", "什么是实践？"] {
            let reply = dispatcher.handle_chat(chat(question)).await.unwrap();
            assert_eq!(reply.route, Route::Answer);
        }
        let mut unknown = chat("什么是认识？");
        unknown.session_id = Some("never-issued".into());
        let reply = dispatcher.handle_chat(unknown).await.unwrap();
        assert_ne!(reply.session_id, "never-issued");

        assert!(store.is_empty());
        assert_eq!(dispatcher.locks.tracked(), 0);
    }

    #[tokio::test]
    async fn dialogue_lifecycle() {
        let (dispatcher, _, store, _dir) = dispatcher(
            "maogai",
            vec![
                Ok(r#"{"topic": "实事求是", "character": "毛泽东"}"#.into()),
                Ok("你认为实事求是的要义是什么？".into()),
                Ok("很好，再想一想。".into()),
            ],
        )
        .await;

        let started = dispatcher
            .start_dialogue(DialogueRequest {
                message: Some("聊聊实事求是".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        let session_id = started.session_id.clone().unwrap();
        assert_eq!(started.reply.topic, "实事求是");
        assert_eq!(started.reply.turn_count, 1);

        let continued = dispatcher
            .continue_dialogue(DialogueRequest {
                session_id: Some(session_id.clone()),
                message: Some("从实际出发".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(continued.reply.turn_count, 2);
        assert!(continued.session_id.is_none());

        assert_eq!(dispatcher.end_dialogue(Some(&session_id)).await.unwrap(), DIALOGUE_ENDED);
        assert!(store.is_empty());
        assert_eq!(dispatcher.locks.tracked(), 0);
        assert_eq!(
            dispatcher.end_dialogue(Some(&session_id)).await.unwrap(),
            DIALOGUE_NOT_FOUND
        );

        let err = dispatcher
            .continue_dialogue(DialogueRequest {
                session_id: Some(session_id),
                message: Some("还在吗".into()),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, DialogueError::SessionExpired));
    }

    #[tokio::test]
    async fn dialogue_input_checks() {
        let (dispatcher, _, _, _dir) = dispatcher("xigai", vec![]).await;

        let err = dispatcher
            .start_dialogue(DialogueRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, DialogueError::MissingTopic));

        let err = dispatcher
            .continue_dialogue(DialogueRequest {
                session_id: Some("unknown".into()),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, DialogueError::SessionExpired));

        assert_eq!(dispatcher.end_dialogue(Some("unknown")).await.unwrap(), DIALOGUE_NOT_FOUND);
        assert_eq!(dispatcher.end_dialogue(None).await.unwrap(), DIALOGUE_NOT_FOUND);
        assert_eq!(dispatcher.locks.tracked(), 0);
    }

    #[tokio::test]
    async fn failed_dialogue_start_stores_nothing() {
        let (dispatcher, _, store, _dir) = dispatcher(
            "xigai",
            vec![Ok(r#"{"topic": "矛盾论"}"#.into()), Err(crate::error::LlmError::Transport("down".into()))],
        )
        .await;
        let err = dispatcher
            .start_dialogue(DialogueRequest {
                message: Some("谈谈矛盾".into()),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(!err.is_client_error());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn subjects_without_persona_refuse_dialogue() {
        let (dispatcher, _, _, _dir) = dispatcher("sdfz", vec![]).await;
        assert!(!dispatcher.has_dialogue());
        let err = dispatcher
            .start_dialogue(DialogueRequest {
                message: Some("你好".into()),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, DialogueError::Unavailable));
    }
}
