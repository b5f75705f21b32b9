//! Spacemania command-line front end.
//!
//! `spacemania build` turns documents into a persisted index and
//! `spacemania ask` answers a question from it.

mod cli;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use spacemania_rag::{
    AskRequest, EmbeddingProvider, GeminiEmbeddingProvider, GeminiGenerationModel,
    GenerationModel, JsonlInteractionLog, MockEmbeddingProvider, MockGenerationModel,
    OpenAIEmbeddingProvider, OpenAIGenerationModel, RagConfig, RagError, RagPipeline,
    UploadedDocument,
};

use crate::cli::{Cli, Command, Provider};

/// Embedding width of the offline provider.
const MOCK_DIMENSIONS: usize = 256;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    if let Err(e) = spacemania_telemetry::init_telemetry("spacemania") {
        eprintln!("warning: logging disabled: {e}");
    }

    if let Err(err) = run(cli).await {
        match err.downcast_ref::<RagError>() {
            Some(rag) if rag.is_user_actionable() => {
                eprintln!("Error: {rag}");
                eprintln!("Hint: {}", rag.remediation());
            }
            _ => eprintln!("Error: {err:#}"),
        }
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = RagConfig::from_env()?;

    match cli.command {
        Command::Build { index, files } => {
            let pipeline = pipeline(cli.provider, config, cli.log)?;

            let mut documents = Vec::with_capacity(files.len());
            for file in &files {
                documents.push(UploadedDocument::from_path(file).await?);
            }

            let report = pipeline.build(&documents, &index).await?;
            println!(
                "Indexed {} document(s): {} chunk(s), {} page(s) read, {} skipped",
                report.documents, report.chunk_count, report.pages_read, report.pages_skipped
            );
            println!(
                "Index written to {} ({}, {} dimensions)",
                report.location.display(),
                report.embedding_model,
                report.dimension
            );
        }
        Command::Ask { index, user, top_k, question } => {
            let pipeline = pipeline(cli.provider, config, cli.log)?;

            let mut request = AskRequest::new(user, question, &index);
            if let Some(k) = top_k {
                request = request.with_top_k(k);
            }

            let result = pipeline.ask(request).await;
            pipeline.flush_interactions().await;
            let response = result?;

            println!("Reply: {}", response.answer_text);
        }
    }

    Ok(())
}

fn pipeline(provider: Provider, config: RagConfig, log: PathBuf) -> anyhow::Result<RagPipeline> {
    let (embedder, generator): (Arc<dyn EmbeddingProvider>, Arc<dyn GenerationModel>) =
        match provider {
            Provider::Gemini => {
                let key = api_key("GOOGLE_API_KEY")?;
                (
                    Arc::new(GeminiEmbeddingProvider::new(key.clone())?),
                    Arc::new(GeminiGenerationModel::new(key)?),
                )
            }
            Provider::Openai => {
                let key = api_key("OPENAI_API_KEY")?;
                (
                    Arc::new(OpenAIEmbeddingProvider::new(key.clone())?),
                    Arc::new(OpenAIGenerationModel::new(key)?),
                )
            }
            Provider::Mock => (
                Arc::new(MockEmbeddingProvider::new(MOCK_DIMENSIONS)),
                Arc::new(MockGenerationModel::new()),
            ),
        };

    tracing::debug!(?provider, log = %log.display(), "building pipeline");

    Ok(RagPipeline::builder()
        .config(config)
        .embedding_provider(embedder)
        .generation_model(generator)
        .interaction_log(Arc::new(JsonlInteractionLog::new(log)))
        .build()?)
}

fn api_key(var: &str) -> anyhow::Result<String> {
    std::env::var(var).with_context(|| format!("{var} must be set (in the environment or .env)"))
}
