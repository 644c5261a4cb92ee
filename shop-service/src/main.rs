use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use diesel::{Connection, PgConnection};
use diesel_async::{pooled_connection::bb8::Pool, AsyncPgConnection};
use diesel_migrations::MigrationHarness;
use shared::{MemoryShop, Shop};
use shop_service::api;
use shop_service::config::{Args, Storage};
use shop_service::handlers::PgShop;
use shop_service::MIGRATIONS;
use tracing::info;
use tracing_subscriber::EnvFilter;

async fn connect(args: &Args) -> Result<Arc<dyn Shop>> {
    // Run migrations first
    info!("Running database migrations...");
    let mut conn = PgConnection::establish(&args.database_url)?;
    conn.run_pending_migrations(MIGRATIONS).map_err(|e| anyhow::anyhow!("Migration error: {}", e))?;
    info!("Migrations completed successfully");

    let config = diesel_async::pooled_connection::AsyncDieselConnectionManager::<AsyncPgConnection>::new(&args.database_url);
    let pool = Pool::builder()
        .max_size(args.max_connections)
        .build(config)
        .await?;

    Ok(Arc::new(PgShop::new(pool)))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(args.log_filter())),
        )
        .init();

    let shop: Arc<dyn Shop> = match args.storage {
        Storage::Postgres => connect(&args).await?,
        Storage::Memory => {
            info!("Using in-memory storage, nothing will be persisted");
            Arc::new(MemoryShop::new())
        }
    };

    let app_state = api::AppState {
        shop,
        app_name: args.app_name.clone(),
    };
    let cors = api::cors_layer(&args.cors_origins)?;
    let app = api::create_router(app_state, cors);

    let listener = tokio::net::TcpListener::bind(format!("{}:{}", args.host, args.port)).await?;

    info!("{} started on {}:{}", args.app_name, args.host, args.port);

    axum::serve(listener, app).await?;

    Ok(())
}
