use std::net::Ipv4Addr;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio::net::TcpListener;

use docflow::api::{self, ApiState};
use docflow::config::Config;
use docflow::consumer::QueueConsumer;
use docflow::embedding::{EmbeddingClient, OpenAiEmbeddingClient};
use docflow::logging;
use docflow::notifier::StatusNotifier;
use docflow::processing::{IngestionPipeline, PersistenceService};
use docflow::search::SearchService;
use docflow::storage::{DocumentStore, StorageGateway};

#[derive(Parser)]
#[command(name = "docflow")]
#[command(about = "Asynchronous document ingestion and vector search service")]
#[command(version)]
struct Cli {
    /// Which surfaces this process runs. Extra consumer processes against the
    /// same queue are how ingestion throughput scales.
    #[arg(long, value_enum, default_value_t = Role::All)]
    role: Role,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Role {
    /// Search API and queue consumer in one process.
    All,
    /// Search API only.
    Api,
    /// Queue consumer only.
    Consumer,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    logging::init_tracing();
    let cli = Cli::parse();
    let config = Config::from_env()?;

    let gateway = Arc::new(StorageGateway::connect(&config).await?);
    gateway.verify_schema().await;
    let store: Arc<dyn DocumentStore> = gateway.clone();
    let embedding: Arc<dyn EmbeddingClient> = Arc::new(OpenAiEmbeddingClient::new(&config)?);

    if cli.role != Role::Consumer {
        let search = Arc::new(SearchService::new(store.clone(), embedding.clone()));
        let state = Arc::new(ApiState {
            search,
            store: store.clone(),
        });
        let router = api::create_router(state);
        let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, config.server_port)).await?;
        tracing::info!(port = config.server_port, "Search API listening");
        tokio::spawn(async move {
            if let Err(err) = axum::serve(listener, router).await {
                tracing::error!(error = %err, "Search API server exited");
            }
        });
    }

    if cli.role == Role::Api {
        tokio::signal::ctrl_c().await?;
        tracing::info!("Shutdown requested");
        gateway.close().await;
        return Ok(());
    }

    let notifier = Arc::new(StatusNotifier::new(&config)?);
    let persistence = PersistenceService::new(store.clone(), embedding);
    let pipeline = Arc::new(IngestionPipeline::new(&config, persistence, notifier));
    let consumer = QueueConsumer::new(&config, pipeline);

    tokio::select! {
        result = consumer.run() => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown requested");
        }
    }

    gateway.close().await;
    Ok(())
}
