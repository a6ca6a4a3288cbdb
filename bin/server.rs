// Chat Ledger - Web Server
// REST API with Axum

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use chat_ledger::server::{create_router, AppState};
use chat_ledger::{ChatLedger, Settings, SqliteStore, SystemClock};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("chat_ledger=info,tower_http=info")),
        )
        .init();

    let settings = Settings::from_env();

    println!("🚀 Starting Chat Ledger Server...");
    println!("📂 Database: {}", settings.db_path.display());

    let lexicon = settings.load_lexicon()?;
    let store = Arc::new(SqliteStore::open(&settings.db_path)?);
    info!("Ledger holds {} entries", store.entry_count()?);

    let engine = ChatLedger::new(
        Arc::new(lexicon),
        settings.load_engine_config()?,
        store.clone(),
        store.clone(),
        store,
        Arc::new(SystemClock),
    );

    let state = AppState {
        engine: Arc::new(engine),
        default_conversation: settings.conversation_id.clone(),
    };
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&settings.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", settings.bind_addr))?;

    println!("✅ Server running on http://{}", settings.bind_addr);
    println!("   POST /api/chat      - Chat turn");
    println!("   POST /api/report    - Report");
    println!("   GET  /api/export    - CSV export");
    println!("   GET  /api/merchants - Merchant memory");
    println!("   GET  /api/health    - Health check");

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .await
        .context("Server error")?;

    Ok(())
}
