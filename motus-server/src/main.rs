use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use motus_core::agents::{
    AcknowledgingToolExecutor, FitnessHandler, GeneralHandler, NutritionHandler, ToolExecutor,
};
use motus_core::llm::CompletionBackend;
use motus_core::{
    ClaudeClient, ContextCompressor, ConversationStore, Coordinator, MotusConfig,
    OutboundChannel, PgConversationStore, SessionManager, WhatsAppClient,
};
use tokio::sync::broadcast;
use tracing_subscriber::{fmt, EnvFilter};

use motus_server::http::{self, AppState};
use motus_server::sweeper;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "motus.toml")]
    config: String,

    #[arg(long)]
    health: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (dev convenience — production uses real env vars)
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Load config
    let config = match MotusConfig::load(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", args.config, e);
            std::process::exit(1);
        }
    };

    // Init logging — RUST_LOG overrides the configured level
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.service.log_level)),
        )
        .init();

    // Connect to DB
    let pool = match motus_core::db::create_pool(&config.database).await {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Failed to connect to database: {}", e);
            std::process::exit(1);
        }
    };

    if args.health {
        match motus_core::db::health_check(&pool).await {
            Ok(v) => println!("✅ PostgreSQL connected: {}", v),
            Err(e) => {
                println!("❌ PostgreSQL connection failed: {}", e);
                std::process::exit(1);
            }
        }

        println!("✅ Motus DB health check passed");
        return Ok(());
    }

    // Wire the pipeline
    let store: Arc<dyn ConversationStore> = Arc::new(PgConversationStore::new(pool.clone()));
    let sessions = Arc::new(SessionManager::new(store.clone(), &config.memory));
    let compressor = ContextCompressor::new(store.clone(), &config.memory);

    let llm: Arc<dyn CompletionBackend> = Arc::new(ClaudeClient::new(config.llm.clone())?);
    let tools: Arc<dyn ToolExecutor> = Arc::new(AcknowledgingToolExecutor);
    let channel: Arc<dyn OutboundChannel> = Arc::new(WhatsAppClient::new(&config.whatsapp)?);

    // Handlers get the LLM timeout plus headroom so the client's own retry
    // budget expires first.
    let handler_timeout = Duration::from_secs(
        config.llm.timeout_seconds * (config.llm.max_retries as u64 + 1) + 5,
    );

    let coordinator = Arc::new(Coordinator::new(
        store,
        sessions.clone(),
        compressor,
        Arc::new(FitnessHandler::new(llm.clone(), tools.clone())),
        Arc::new(NutritionHandler::new(llm.clone(), tools)),
        Arc::new(GeneralHandler::new(llm)),
        channel,
        handler_timeout,
    ));

    // Shutdown signal
    let (tx, _rx) = broadcast::channel(1);
    let shutdown_tx = tx.clone();

    tokio::spawn(async move {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to listen for Ctrl+C");
        tracing::info!("Shutdown signal received");
        let _ = shutdown_tx.send(());
    });

    // Spawn the idle-session sweeper
    tokio::spawn(sweeper::run_sweeper_loop(
        sessions,
        config.sweeper.interval_minutes,
        tx.subscribe(),
    ));

    // HTTP server carries the webhook; without it there is nothing to serve.
    if !config.http.enabled {
        anyhow::bail!("http.enabled = false leaves no inbound surface; enable it in motus.toml");
    }

    let state = Arc::new(AppState {
        coordinator,
        verify_token: config.http.verify_token.clone(),
        pool: Some(pool),
    });

    http::start_http_server(state, &config.http.host, config.http.port, tx.subscribe()).await?;

    Ok(())
}
