use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use image::{ImageFormat, imageops::FilterType};
use reqwest::Client;
use serde_json::{Value, json};
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use qizhen_flow::{MessageRole, SerializableMessage};

use crate::config::Config;
use crate::error::{ConfigError, LlmError};
use crate::models::GenerationParams;

pub const VISION_FALLBACK_NOTICE: &str = "[注意：图片分析功能暂时不可用，以下是基于文本的回复]\n\n";

const MAX_IMAGE_SIDE: u32 = 1024;

#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }
}

impl From<&SerializableMessage> for ChatMessage {
    fn from(message: &SerializableMessage) -> Self {
        Self {
            role: message.role,
            content: message.content.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChatOptions {
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout: Duration,
}

impl Default for ChatOptions {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 1200,
            timeout: Duration::from_secs(30),
        }
    }
}

impl ChatOptions {
    pub fn new(temperature: f32, params: &GenerationParams) -> Self {
        Self {
            temperature,
            max_tokens: params.max_tokens,
            timeout: params.timeout,
        }
    }
}

/// Image ready to be sent inline.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageAttachment {
    pub mime_type: String,
    pub data: String,
}

impl ImageAttachment {
    pub fn data_uri(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.data)
    }
}

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    /// Attached to the last user message
    pub image: Option<ImageAttachment>,
    pub options: ChatOptions,
}

/// A hosted chat-completions endpoint.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<String, LlmError>;
}

/// OpenAI-compatible DashScope endpoint.
pub struct DashScopeChat {
    client: Client,
    base_url: String,
    api_key: String,
}

impl DashScopeChat {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self, ConfigError> {
        let client = Client::builder().build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        Self::new(config.base_url.clone(), config.api_key.clone())
    }
}

#[async_trait]
impl ChatBackend for DashScopeChat {
    async fn complete(&self, request: CompletionRequest) -> Result<String, LlmError> {
        let payload = build_payload(&request);
        let timeout = request.options.timeout;

        debug!(model = %request.model, messages = request.messages.len(), "calling chat completions");

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .timeout(timeout)
            .json(&payload)
            .send()
            .await
            .map_err(|e| timeout_aware(e, timeout))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let response_json: Value = response.json().await.map_err(|e| timeout_aware(e, timeout))?;
        extract_content(&response_json)
    }
}

fn timeout_aware(err: reqwest::Error, timeout: Duration) -> LlmError {
    if err.is_timeout() {
        LlmError::Timeout(timeout)
    } else {
        err.into()
    }
}

fn role_name(role: &MessageRole) -> &'static str {
    match role {
        MessageRole::System => "system",
        MessageRole::User => "user",
        MessageRole::Assistant => "assistant",
    }
}

fn build_payload(request: &CompletionRequest) -> Value {
    let image_target = request
        .image
        .as_ref()
        .and_then(|_| request.messages.iter().rposition(|m| m.role == MessageRole::User));

    let messages: Vec<Value> = request
        .messages
        .iter()
        .enumerate()
        .map(|(i, message)| match (&request.image, image_target) {
            (Some(image), Some(target)) if target == i => json!({
                "role": "user",
                "content": [
                    { "type": "text", "text": message.content },
                    { "type": "image_url", "image_url": { "url": image.data_uri() } }
                ]
            }),
            _ => json!({
                "role": role_name(&message.role),
                "content": message.content
            }),
        })
        .collect();

    json!({
        "model": request.model,
        "messages": messages,
        "temperature": request.options.temperature,
        "max_tokens": request.options.max_tokens,
        "stream": false
    })
}

/// Pull the reply text out of a chat-completions response. Part lists are joined with spaces.
pub fn extract_content(response: &Value) -> Result<String, LlmError> {
    let content = &response["choices"][0]["message"]["content"];
    match content {
        Value::String(text) => Ok(text.clone()),
        Value::Array(parts) => {
            let texts: Vec<String> = parts
                .iter()
                .map(|part| match part.get("text").and_then(Value::as_str) {
                    Some(text) => text.to_string(),
                    None => match part {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    },
                })
                .filter(|t| !t.is_empty())
                .collect();
            Ok(texts.join(" "))
        }
        _ => Err(LlmError::InvalidResponse(
            "missing choices[0].message.content".to_string(),
        )),
    }
}

/// Scale the image so its longest side fits the vision limit and base64 it.
pub fn prepare_image(bytes: &[u8]) -> Result<ImageAttachment, LlmError> {
    let format = image::guess_format(bytes).map_err(|e| LlmError::Image(e.to_string()))?;
    let img = image::load_from_memory_with_format(bytes, format)
        .map_err(|e| LlmError::Image(e.to_string()))?;

    if img.width().max(img.height()) <= MAX_IMAGE_SIDE {
        return Ok(ImageAttachment {
            mime_type: format.to_mime_type().to_string(),
            data: STANDARD.encode(bytes),
        });
    }

    let ratio = MAX_IMAGE_SIDE as f64 / img.width().max(img.height()) as f64;
    let width = ((img.width() as f64 * ratio) as u32).max(1);
    let height = ((img.height() as f64 * ratio) as u32).max(1);
    let resized = img.resize(width, height, FilterType::Lanczos3);

    let mut buffer = Vec::new();
    let encoded = resized.write_to(&mut Cursor::new(&mut buffer), format);
    let mime_type = match encoded {
        Ok(()) => format.to_mime_type(),
        Err(e) => {
            debug!("re-encoding resized image as JPEG: {}", e);
            buffer.clear();
            resized
                .to_rgb8()
                .write_to(&mut Cursor::new(&mut buffer), ImageFormat::Jpeg)
                .map_err(|e| LlmError::Image(e.to_string()))?;
            ImageFormat::Jpeg.to_mime_type()
        }
    };

    Ok(ImageAttachment {
        mime_type: mime_type.to_string(),
        data: STANDARD.encode(&buffer),
    })
}

/// Chat and vision calls with the configured models.
#[derive(Clone)]
pub struct LlmInvoker {
    backend: Arc<dyn ChatBackend>,
    chat_model: String,
    vision_model: String,
    fallback_model: String,
}

impl LlmInvoker {
    pub fn new(
        backend: Arc<dyn ChatBackend>,
        chat_model: impl Into<String>,
        vision_model: impl Into<String>,
        fallback_model: impl Into<String>,
    ) -> Self {
        Self {
            backend,
            chat_model: chat_model.into(),
            vision_model: vision_model.into(),
            fallback_model: fallback_model.into(),
        }
    }

    pub fn from_config(backend: Arc<dyn ChatBackend>, config: &Config) -> Self {
        Self::new(
            backend,
            config.chat_model.clone(),
            config.vision_model.clone(),
            config.fallback_model.clone(),
        )
    }

    pub async fn chat(
        &self,
        messages: Vec<ChatMessage>,
        options: ChatOptions,
    ) -> Result<String, LlmError> {
        self.backend
            .complete(CompletionRequest {
                model: self.chat_model.clone(),
                messages,
                image: None,
                options,
            })
            .await
    }

    /// Ask the vision model about an image. If that fails the fallback text model
    /// answers instead and the reply carries a notice saying so.
    pub async fn vision(
        &self,
        messages: Vec<ChatMessage>,
        image: Arc<Vec<u8>>,
        options: ChatOptions,
    ) -> Result<String, LlmError> {
        let prepared = tokio::task::spawn_blocking(move || prepare_image(&image))
            .await
            .map_err(|e| LlmError::Image(e.to_string()))
            .and_then(|r| r);

        let vision_result = match prepared {
            Ok(attachment) => {
                self.backend
                    .complete(CompletionRequest {
                        model: self.vision_model.clone(),
                        messages: messages.clone(),
                        image: Some(attachment),
                        options,
                    })
                    .await
            }
            Err(e) => Err(e),
        };

        match vision_result {
            Ok(text) => Ok(text),
            Err(e) => {
                warn!(model = %self.vision_model, "vision call failed, falling back to text: {}", e);
                let text = self
                    .backend
                    .complete(CompletionRequest {
                        model: self.fallback_model.clone(),
                        messages,
                        image: None,
                        options,
                    })
                    .await?;
                info!(model = %self.fallback_model, "text fallback succeeded");
                Ok(format!("{VISION_FALLBACK_NOTICE}{text}"))
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Scripted backend: pops one reply per call and records every request.
    #[derive(Default)]
    pub struct ScriptedChat {
        replies: Mutex<VecDeque<Result<String, LlmError>>>,
        pub requests: Mutex<Vec<CompletionRequest>>,
    }

    impl ScriptedChat {
        pub fn new(replies: Vec<Result<String, LlmError>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                requests: Mutex::new(Vec::new()),
            })
        }

        pub fn requests(&self) -> Vec<CompletionRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ChatBackend for ScriptedChat {
        async fn complete(&self, request: CompletionRequest) -> Result<String, LlmError> {
            self.requests.lock().unwrap().push(request);
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(LlmError::Transport("no scripted reply".into())))
        }
    }

    pub fn invoker(backend: Arc<ScriptedChat>) -> LlmInvoker {
        LlmInvoker::new(backend, "qwen-max", "qwen-vl-max", "qwen-turbo")
    }

    pub fn png(width: u32, height: u32) -> Vec<u8> {
        let img = image::GrayImage::new(width, height);
        let mut buffer = Vec::new();
        img.write_to(&mut Cursor::new(&mut buffer), ImageFormat::Png)
            .unwrap();
        buffer
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    #[test]
    fn content_may_be_string_or_parts() {
        let plain = json!({ "choices": [{ "message": { "content": "你好" } }] });
        assert_eq!(extract_content(&plain).unwrap(), "你好");

        let parts = json!({ "choices": [{ "message": { "content": [
            { "text": "第一段" }, { "type": "text", "text": "第二段" }, { "text": "" }
        ] } }] });
        assert_eq!(extract_content(&parts).unwrap(), "第一段 第二段");

        let broken = json!({ "error": "quota" });
        assert!(matches!(extract_content(&broken), Err(LlmError::InvalidResponse(_))));
    }

    #[test]
    fn image_goes_on_last_user_message() {
        let request = CompletionRequest {
            model: "qwen-vl-max".into(),
            messages: vec![
                ChatMessage::system("sys"),
                ChatMessage::user("first"),
                ChatMessage::assistant("reply"),
                ChatMessage::user("look at this"),
            ],
            image: Some(ImageAttachment {
                mime_type: "image/png".into(),
                data: "AAAA".into(),
            }),
            options: ChatOptions::default(),
        };
        let payload = build_payload(&request);
        assert_eq!(payload["messages"][1]["content"], "first");
        assert_eq!(payload["messages"][3]["content"][0]["text"], "look at this");
        assert_eq!(
            payload["messages"][3]["content"][1]["image_url"]["url"],
            "data:image/png;base64,AAAA"
        );
        assert_eq!(payload["max_tokens"], 1200);
    }

    #[test]
    fn large_images_are_scaled_down() {
        let small = prepare_image(&png(200, 100)).unwrap();
        assert_eq!(small.mime_type, "image/png");

        let large = prepare_image(&png(2048, 512)).unwrap();
        let decoded = STANDARD.decode(&large.data).unwrap();
        let img = image::load_from_memory(&decoded).unwrap();
        assert_eq!((img.width(), img.height()), (1024, 256));
    }

    #[tokio::test]
    async fn vision_failure_falls_back_to_text_with_notice() {
        let backend = ScriptedChat::new(vec![
            Err(LlmError::Status {
                status: 500,
                body: "boom".into(),
            }),
            Ok("文本回复".into()),
        ]);
        let llm = invoker(backend.clone());
        let reply = llm
            .vision(
                vec![ChatMessage::user("这是什么")],
                Arc::new(png(10, 10)),
                ChatOptions::default(),
            )
            .await
            .unwrap();
        assert_eq!(reply, format!("{VISION_FALLBACK_NOTICE}文本回复"));

        let requests = backend.requests();
        assert_eq!(requests[0].model, "qwen-vl-max");
        assert!(requests[0].image.is_some());
        assert_eq!(requests[1].model, "qwen-turbo");
        assert!(requests[1].image.is_none());
    }

    #[tokio::test]
    async fn both_failures_surface_an_error() {
        let backend = ScriptedChat::new(vec![
            Err(LlmError::Timeout(Duration::from_secs(1))),
            Err(LlmError::Transport("down".into())),
        ]);
        let llm = invoker(backend);
        let err = llm
            .vision(vec![ChatMessage::user("x")], Arc::new(png(4, 4)), ChatOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::Transport(_)));
    }
}
