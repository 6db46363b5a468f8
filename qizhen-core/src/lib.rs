pub mod agents;
pub mod config;
pub mod error;
pub mod filter;
pub mod intent;
pub mod llm;
pub mod models;
pub mod ocr;
pub mod prompts;
pub mod retrieval;
pub mod router;
pub mod session;
pub mod subjects;
pub mod tasks;
pub mod upload;
pub mod workflow;

// Re-export commonly used types
pub use agents::{AgentRequest, SubjectServices};
pub use config::Config;
pub use error::{ChatError, ConfigError, DialogueError, ImageError, LlmError, RetrievalError, SessionError};
pub use filter::strip_explanations;
pub use intent::{IntentKeywords, IntentParser, parse_intent};
pub use llm::{ChatBackend, DashScopeChat, LlmInvoker};
pub use models::{GenerationParams, ParsedIntent, ResponseMode, Route};
pub use ocr::{TesseractOcr, TextRecognizer};
pub use retrieval::{DashScopeEmbedder, Embedder, Retriever, VectorIndex};
pub use rig::embeddings::Embedding;
pub use router::{ChatReply, ChatRequest, DialogueRequest, DialogueResponse, Dispatcher, RouteKeywords, classify};
pub use session::{InMemorySessionStore, Session, SessionStore};
pub use subjects::SubjectProfile;
