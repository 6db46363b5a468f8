use async_trait::async_trait;
use rig::OneOrMany;
use rig::embeddings::{Embedding, EmbeddingModel as _, EmbeddingsBuilder, distance::VectorDistance};
use rig::prelude::*;
use rig::providers::openai;
use rig::vector_store::in_memory_store::InMemoryVectorStore;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{ConfigError, RetrievalError};

/// Maximum snippets any agent puts in front of the model.
pub const MAX_SNIPPETS: usize = 5;

/// DashScope accepts at most 25 inputs per embeddings call.
const EMBED_BATCH: usize = 20;

/// Turns a query into a vector. Must be the same model the index was built with.
#[async_trait]
pub trait Embedder: Send + Sync {
    fn model(&self) -> &str;

    async fn embed_query(&self, text: &str) -> Result<Embedding, RetrievalError>;
}

/// DashScope embeddings through rig's OpenAI-compatible provider.
pub struct DashScopeEmbedder {
    model_name: String,
    model: openai::EmbeddingModel,
}

impl DashScopeEmbedder {
    pub fn new(base_url: &str, api_key: &str, model: &str) -> Result<Self, ConfigError> {
        let client = openai::Client::builder(api_key)
            .base_url(base_url)
            .build()
            .map_err(|e| ConfigError::InvalidValue {
                name: "DASHSCOPE_BASE_URL",
                reason: e.to_string(),
            })?;
        Ok(Self {
            model_name: model.to_string(),
            model: client.embedding_model(model),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        Self::new(&config.base_url, &config.api_key, &config.embedding_model)
    }

    /// Embed index documents, a batch at a time.
    pub async fn embed_documents(
        &self,
        documents: Vec<String>,
    ) -> Result<Vec<(String, OneOrMany<Embedding>)>, RetrievalError> {
        let mut embedded = Vec::with_capacity(documents.len());
        for batch in documents.chunks(EMBED_BATCH) {
            let rows = EmbeddingsBuilder::new(self.model.clone())
                .documents(batch.to_vec())
                .map_err(|e| RetrievalError::Embedding(e.to_string()))?
                .build()
                .await
                .map_err(|e| RetrievalError::Embedding(e.to_string()))?;
            debug!(batch = batch.len(), "embedded document batch");
            embedded.extend(rows);
        }
        Ok(embedded)
    }
}

#[async_trait]
impl Embedder for DashScopeEmbedder {
    fn model(&self) -> &str {
        &self.model_name
    }

    async fn embed_query(&self, text: &str) -> Result<Embedding, RetrievalError> {
        self.model
            .embed_text(text)
            .await
            .map_err(|e| RetrievalError::Embedding(e.to_string()))
    }
}

/// rig in-memory vector store persisted as `index.json`, tagged with the
/// embedding model and dimension it was built with.
#[derive(Serialize, Deserialize)]
pub struct VectorIndex {
    pub model: String,
    pub dimension: usize,
    store: InMemoryVectorStore<String>,
}

impl VectorIndex {
    pub const FILE_NAME: &'static str = "index.json";

    /// Every embedding must have the dimension of the first one.
    pub fn from_documents(
        model: impl Into<String>,
        documents: Vec<(String, OneOrMany<Embedding>)>,
    ) -> Result<Self, RetrievalError> {
        let dimension = documents
            .first()
            .and_then(|(_, embeddings)| embeddings.iter().next())
            .map(|e| e.vec.len())
            .unwrap_or_default();
        let index = Self {
            model: model.into(),
            dimension,
            store: InMemoryVectorStore::from_documents(documents),
        };
        index.check_dimensions()?;
        Ok(index)
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    fn check_dimensions(&self) -> Result<(), RetrievalError> {
        let mismatch = self
            .store
            .iter()
            .flat_map(|(_, (_, embeddings))| embeddings.iter())
            .find(|e| e.vec.len() != self.dimension);
        match mismatch {
            Some(e) => Err(RetrievalError::DimensionMismatch {
                expected: self.dimension,
                actual: e.vec.len(),
            }),
            None => Ok(()),
        }
    }

    pub async fn load(dir: &Path) -> Result<Self, RetrievalError> {
        let raw = tokio::fs::read(dir.join(Self::FILE_NAME)).await?;
        let index: VectorIndex =
            serde_json::from_slice(&raw).map_err(|e| RetrievalError::Malformed(e.to_string()))?;
        index.check_dimensions()?;
        Ok(index)
    }

    pub async fn save(&self, dir: &Path) -> Result<PathBuf, RetrievalError> {
        tokio::fs::create_dir_all(dir).await?;
        let path = dir.join(Self::FILE_NAME);
        let raw = serde_json::to_vec(self).map_err(|e| RetrievalError::Malformed(e.to_string()))?;
        tokio::fs::write(&path, raw).await?;
        Ok(path)
    }

    /// The `k` documents closest to `query` by cosine similarity, best first.
    pub fn search(&self, query: &Embedding, k: usize) -> Result<Vec<(&str, f64)>, RetrievalError> {
        if query.vec.len() != self.dimension {
            return Err(RetrievalError::DimensionMismatch {
                expected: self.dimension,
                actual: query.vec.len(),
            });
        }
        let mut scored: Vec<(&str, f64)> = self
            .store
            .iter()
            .map(|(_, (document, embeddings))| {
                let score = embeddings
                    .iter()
                    .map(|e| e.cosine_similarity(query, false))
                    .fold(f64::NEG_INFINITY, f64::max);
                (document.as_str(), score)
            })
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        scored.truncate(k);
        Ok(scored)
    }
}

/// Similarity search over one subject's index. Never fails: without an index,
/// or when a search errors, it returns no snippets.
#[derive(Clone)]
pub struct Retriever {
    index: Option<Arc<VectorIndex>>,
    embedder: Arc<dyn Embedder>,
}

impl Retriever {
    pub fn new(index: Option<VectorIndex>, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            index: index.map(Arc::new),
            embedder,
        }
    }

    /// Load the index in `dir`, degrading to no retrieval when it cannot be read.
    pub async fn load(dir: &Path, embedder: Arc<dyn Embedder>) -> Self {
        match VectorIndex::load(dir).await {
            Ok(index) => {
                if index.model != embedder.model() {
                    warn!(
                        index_model = %index.model,
                        embedder_model = %embedder.model(),
                        "vector index was built with a different embedding model"
                    );
                }
                info!(dir = %dir.display(), documents = index.len(), "vector index loaded");
                Self::new(Some(index), embedder)
            }
            Err(e) => {
                warn!(dir = %dir.display(), "failed to load vector index, running without retrieval: {}", e);
                Self::new(None, embedder)
            }
        }
    }

    pub fn is_available(&self) -> bool {
        self.index.is_some()
    }

    /// Up to `k` distinct snippets for `query`, most relevant first.
    pub async fn search(&self, query: &str, k: usize) -> Vec<String> {
        match self.try_search(query, k).await {
            Ok(snippets) => snippets,
            Err(e) => {
                warn!(query, "retrieval failed, continuing without context: {}", e);
                Vec::new()
            }
        }
    }

    async fn try_search(&self, query: &str, k: usize) -> Result<Vec<String>, RetrievalError> {
        let index = self.index.as_ref().ok_or(RetrievalError::IndexUnavailable)?;
        let embedding = self.embedder.embed_query(query).await?;
        let hits = index.search(&embedding, k)?;
        debug!(query, hits = hits.len(), "similarity search");
        Ok(dedupe(hits.into_iter().map(|(content, _)| content.to_string())))
    }
}

/// Keep the first occurrence of each string.
pub fn dedupe(items: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(item.clone()))
        .collect()
}

/// Split text into overlapping chunks of at most `chunk_size` characters,
/// preferring paragraph, then line, then sentence boundaries.
pub fn chunk_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let chunk_size = chunk_size.max(1);
    let mut chunks = Vec::new();
    let mut start = 0;

    while start < chars.len() {
        let mut end = (start + chunk_size).min(chars.len());
        if end < chars.len() {
            end = start + break_point(&chars[start..end]);
        }

        let chunk: String = chars[start..end].iter().collect();
        let chunk = chunk.trim();
        if !chunk.is_empty() {
            chunks.push(chunk.to_string());
        }

        if end >= chars.len() {
            break;
        }
        start = end.saturating_sub(overlap).max(start + 1);
    }
    chunks
}

/// Length of the window up to its last good break, searched in the back half.
fn break_point(window: &[char]) -> usize {
    let floor = window.len() / 2;
    let last_at = |pred: &dyn Fn(usize) -> bool| (floor..window.len()).rev().find(|&i| pred(i));

    if let Some(i) = last_at(&|i: usize| i > 0 && window[i] == '\n' && window[i - 1] == '\n') {
        return i + 1;
    }
    if let Some(i) = last_at(&|i: usize| window[i] == '\n') {
        return i + 1;
    }
    if let Some(i) = last_at(&|i: usize| matches!(window[i], '。' | '！' | '？' | '；' | '.' | '!' | '?')) {
        return i + 1;
    }
    window.len()
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    #[tokio::test]
    async fn search_ranks_and_dedupes() {
        let retriever = retriever_over(&[
            "辛亥革命推翻了清朝统治",
            "鸦片战争是中国近代史的开端",
            "鸦片战争是中国近代史的开端",
            "长征是伟大的战略转移",
        ])
        .await;

        let hits = retriever.search("鸦片战争 中国近现代史纲要", 3).await;
        assert_eq!(hits[0], "鸦片战争是中国近代史的开端");
        assert_eq!(hits.iter().filter(|h| h.contains("鸦片战争")).count(), 1);
        assert!(hits.len() <= 3);
    }

    #[test]
    fn zero_vectors_rank_last() {
        let index = index_of(&["无关内容", "长征是伟大的战略转移"]);
        let query = embedder().vector("长征");
        let hits = index.search(&query, 2).unwrap();
        assert_eq!(hits[0].0, "长征是伟大的战略转移");
        assert!((hits[0].1 - 1.0).abs() < 1e-9);
        assert_eq!(hits[1].0, "无关内容");
    }

    #[tokio::test]
    async fn missing_index_degrades_to_empty() {
        let dir = tempfile::tempdir().unwrap();
        let retriever = Retriever::load(dir.path(), embedder()).await;
        assert!(!retriever.is_available());
        assert!(retriever.search("鸦片战争", 5).await.is_empty());
    }

    #[tokio::test]
    async fn malformed_index_degrades_to_empty() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join(VectorIndex::FILE_NAME), b"{not json")
            .await
            .unwrap();
        let retriever = Retriever::load(dir.path(), embedder()).await;
        assert!(!retriever.is_available());
    }

    #[tokio::test]
    async fn saved_index_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let index = index_of(&["戊戌变法", "长征"]);
        let path = index.save(&dir.path().join("database_agent_test")).await.unwrap();
        assert!(path.ends_with("database_agent_test/index.json"));

        let retriever = Retriever::load(&dir.path().join("database_agent_test"), embedder()).await;
        assert!(retriever.is_available());
        assert_eq!(retriever.search("长征", 1).await, vec!["长征"]);
    }

    #[tokio::test]
    async fn query_dimension_mismatch_is_swallowed() {
        let short = |text: &str| Embedding {
            document: text.to_string(),
            vec: vec![1.0, 0.0],
        };
        let index =
            VectorIndex::from_documents("other", vec![("doc".to_string(), OneOrMany::one(short("doc")))]).unwrap();
        let retriever = Retriever::new(Some(index), embedder());
        assert!(retriever.search("长征", 5).await.is_empty());

        let mixed = vec![
            ("doc".to_string(), OneOrMany::one(short("doc"))),
            ("long".to_string(), OneOrMany::one(embedder().vector("long"))),
        ];
        assert!(matches!(
            VectorIndex::from_documents("other", mixed),
            Err(RetrievalError::DimensionMismatch { expected: 2, actual: 4 })
        ));
    }

    #[test]
    fn chunks_prefer_paragraph_breaks_and_overlap() {
        let para_a = "甲".repeat(60);
        let para_b = "乙".repeat(60);
        let text = format!("{para_a}\n\n{para_b}");
        let chunks = chunk_text(&text, 100, 10);
        assert_eq!(chunks[0], para_a);
        assert!(chunks[1].ends_with(&para_b));
        assert!(chunks.iter().all(|c| c.chars().count() <= 100));

        let sentences = "第一句话。".repeat(30);
        let chunks = chunk_text(&sentences, 42, 5);
        assert!(chunks.iter().all(|c| c.ends_with('。') || c.ends_with("第一句话")));
        assert!(chunk_text("   ", 10, 2).is_empty());
        assert_eq!(chunk_text("短文本", 1000, 100), vec!["短文本"]);
    }
}
