use std::time::Duration;
use thiserror::Error;

/// Fatal problems found while building the agents. The service must not start.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("DASHSCOPE_API_KEY environment variable not set")]
    MissingApiKey,

    #[error("invalid value for {name}: {reason}")]
    InvalidValue { name: &'static str, reason: String },

    #[error("unknown subject: {0}")]
    UnknownSubject(String),

    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

/// Failures of the hosted chat/vision endpoint.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("LLM request timed out after {0:?}")]
    Timeout(Duration),

    #[error("LLM request failed: {0}")]
    Transport(String),

    #[error("LLM API returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid response format from LLM: {0}")]
    InvalidResponse(String),

    #[error("failed to prepare image for the vision model: {0}")]
    Image(String),
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            LlmError::InvalidResponse(err.to_string())
        } else {
            LlmError::Transport(err.to_string())
        }
    }
}

/// Failures of the embedding endpoint or the on-disk vector index.
#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("vector index not loaded")]
    IndexUnavailable,

    #[error("vector index I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("vector index is malformed: {0}")]
    Malformed(String),

    #[error("embedding request failed: {0}")]
    Embedding(String),

    #[error("embedding dimension mismatch: index has {expected}, query has {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// Rejections of an uploaded image. All of them map to HTTP 400.
#[derive(Debug, Error)]
pub enum ImageError {
    #[error("image is not valid base64: {0}")]
    Encoding(String),

    #[error("image exceeds {limit} bytes ({actual} bytes)")]
    TooLarge { limit: usize, actual: usize },

    #[error("image resolution {width}x{height} exceeds {limit}x{limit}")]
    TooManyPixels { width: u32, height: u32, limit: u32 },

    #[error("not a recognised raster image: {0}")]
    Unreadable(String),

    #[error("unsupported image format: {0}")]
    UnsupportedFormat(String),

    #[error("failed to stage image on disk: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures of a session store backend.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session store error: {0}")]
    Backend(String),

    #[error("failed to serialize session: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Rejections of a `/chat` request. Display strings are shown to the user.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("请输入文本或上传图片")]
    EmptyInput,

    #[error("图片处理失败")]
    Image(#[from] ImageError),

    #[error("会话存储不可用")]
    Session(#[from] SessionError),
}

/// Failures of a persona dialogue turn. Display strings are shown to the user.
#[derive(Debug, Error)]
pub enum DialogueError {
    #[error("当前课程不支持角色对话")]
    Unavailable,

    #[error("会话已过期，请重新开始对话")]
    SessionExpired,

    #[error("请输入您想探讨的话题或上传图片")]
    MissingTopic,

    #[error("请输入您的回应或上传图片")]
    MissingReply,

    #[error("图片处理失败")]
    Image(#[from] ImageError),

    #[error("抱歉，生成回应时出现问题。请稍后再试。")]
    Generation(String),

    #[error("会话存储不可用")]
    Session(#[from] SessionError),
}

impl DialogueError {
    /// Whether the caller sent something unusable, as opposed to a server-side failure.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            DialogueError::SessionExpired
                | DialogueError::MissingTopic
                | DialogueError::MissingReply
                | DialogueError::Image(_)
        )
    }
}
