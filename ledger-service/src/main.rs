use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use ledger_service::api;
use ledger_service::catalog::{Catalog, MemoryCatalog};
use ledger_service::config::Args;
use ledger_service::handlers::CommandHandler;
use ledger_service::service::InventoryService;
use ledger_service::store::{MemoryStore, ProcessedCommandStore};
use ledger_service::sweeper::ReservationSweeper;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let args = Args::parse();

    let (service, processed) = build_service(&args).await?;

    if let Some(every) = args.sweep_interval() {
        let sweeper = ReservationSweeper::new(service.clone(), every);
        tokio::spawn(async move {
            sweeper.run().await;
        });
    }

    let command_handler = Arc::new(CommandHandler::new(service.clone(), processed));
    spawn_command_loop(&args, command_handler)?;

    let app = api::create_router(api::AppState { service });
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", args.port)).await?;

    info!("Ledger service web server started on port {}", args.port);

    axum::serve(listener, app).await?;

    Ok(())
}

/// The service plus the store that remembers command replies across restarts.
type Backend = (InventoryService, Arc<dyn ProcessedCommandStore>);

async fn build_service(args: &Args) -> Result<Backend> {
    match &args.database_url {
        Some(database_url) => postgres_service(database_url, args).await,
        None => memory_service(args),
    }
}

#[cfg(feature = "postgres")]
async fn postgres_service(database_url: &str, args: &Args) -> Result<Backend> {
    use ledger_service::store::postgres::run_migrations;
    use ledger_service::store::PgStore;

    info!("Running database migrations...");
    run_migrations(database_url).await?;
    info!("Migrations completed successfully");

    let store = Arc::new(PgStore::connect(database_url, args.lock_timeout()).await?);
    let service = InventoryService::new(
        store.clone(),
        store.clone(),
        store.clone(),
        store.clone(),
        args.service_config(),
    );
    let processed: Arc<dyn ProcessedCommandStore> = store;
    Ok((service, processed))
}

#[cfg(not(feature = "postgres"))]
async fn postgres_service(_database_url: &str, _args: &Args) -> Result<Backend> {
    anyhow::bail!("DATABASE_URL is set but this build has no postgres support")
}

fn memory_service(args: &Args) -> Result<Backend> {
    let catalog: Arc<dyn Catalog> = match &args.catalog_file {
        Some(path) => Arc::new(MemoryCatalog::from_file(path)?),
        None => Arc::new(MemoryCatalog::new()),
    };
    info!("Using in-memory ledger");
    let store = Arc::new(MemoryStore::with_lock_timeout(args.lock_timeout()));
    let processed: Arc<dyn ProcessedCommandStore> = store.clone();
    Ok((InventoryService::in_memory(store, catalog, args.service_config()), processed))
}

#[cfg(feature = "kafka")]
fn spawn_command_loop(args: &Args, handler: Arc<CommandHandler>) -> Result<()> {
    use ledger_service::kafka::{create_consumer, create_producer, KafkaCommandLoop};

    let Some(brokers) = &args.kafka_brokers else {
        return Ok(());
    };
    let producer = create_producer(brokers)?;
    let consumer = create_consumer(brokers, "ledger-service", &args.command_topic)?;
    let command_loop = KafkaCommandLoop::new(handler, producer, args.reply_topic.clone());

    tokio::spawn(async move {
        command_loop.run(consumer).await;
    });
    info!("Consuming commands from {}", args.command_topic);
    Ok(())
}

#[cfg(not(feature = "kafka"))]
fn spawn_command_loop(args: &Args, _handler: Arc<CommandHandler>) -> Result<()> {
    if args.kafka_brokers.is_some() {
        tracing::warn!("KAFKA_BROKERS is set but this build has no kafka support");
    }
    Ok(())
}
