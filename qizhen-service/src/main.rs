use anyhow::Context as _;
use qizhen_core::{
    Config, DashScopeChat, DashScopeEmbedder, Dispatcher, InMemorySessionStore, LlmInvoker,
    Retriever, SessionStore, SubjectProfile, SubjectServices, TesseractOcr,
};
use qizhen_service::{AppState, create_app, init_tracing};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = Config::from_env().context("invalid configuration")?;
    let state = build_state(&config).await?;

    let app = create_app(state);
    let listener = TcpListener::bind(format!("0.0.0.0:{}", config.port))
        .await
        .with_context(|| format!("failed to bind port {}", config.port))?;
    info!(port = config.port, subjects = ?config.subjects, "qizhen service listening");

    axum::serve(listener, app).await?;
    Ok(())
}

async fn build_state(config: &Config) -> anyhow::Result<AppState> {
    let chat = Arc::new(DashScopeChat::from_config(config)?);
    let embedder = Arc::new(DashScopeEmbedder::from_config(config)?);
    let ocr = Arc::new(TesseractOcr::from_config(config));
    let store: Arc<dyn SessionStore> = Arc::new(InMemorySessionStore::new());
    let llm = LlmInvoker::from_config(chat, config);

    let mut dispatchers = Vec::with_capacity(config.subjects.len());
    for slug in &config.subjects {
        let subject = SubjectProfile::by_slug(slug)
            .with_context(|| format!("unknown subject {slug}"))?;
        let retriever = Retriever::load(&config.index_dir(subject), embedder.clone()).await;
        info!(
            subject = subject.slug,
            retrieval = retriever.is_available(),
            dialogue = subject.has_dialogue(),
            "subject assistant ready"
        );

        let services = SubjectServices {
            subject,
            llm: llm.clone(),
            retriever,
            ocr: ocr.clone(),
        };
        dispatchers.push(Arc::new(Dispatcher::new(
            services,
            store.clone(),
            config.upload_dir.clone(),
        )));
    }

    Ok(AppState { dispatchers })
}
