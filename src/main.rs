// =============================================================================
// Aurora Confluence — Main Entry Point
// =============================================================================
//
// Boots the frozen Config Registry (C1), the Market Context Builder's three
// provider clients (C6) behind a shared cache + rate limiter (C5), the
// Ledger backend (C9, in-memory or Postgres depending on `DATABASE_URL`),
// and the Orchestrator (C10) tying C1-C9 together. Then serves the webhook
// + admin HTTP surface over Axum. The pipeline itself lives in the library
// crate (`src/lib.rs`) so integration tests can drive it directly.
// =============================================================================

use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use aurora_confluence::app_state::AppState;
use aurora_confluence::config::{self, Config};
use aurora_confluence::context_store::ContextStore;
use aurora_confluence::ledger::{InMemoryLedger, LedgerStore, SqlLedger};
use aurora_confluence::market::providers::{AnalyticsProvider, LiquidityProvider, OptionsProvider};
use aurora_confluence::market::{MarketCache, MarketContextBuilder, RateLimiter};
use aurora_confluence::orchestrator::{spawn_outbound_sink, Orchestrator};
use aurora_confluence::types::MillisTimestamp;
use aurora_confluence::api;

/// CLI flags layered over environment variables, teacher's `dotenv` +
/// `std::env::var` style with an optional `clap` override.
#[derive(Debug, clap::Parser)]
#[command(name = "aurora-confluence", version)]
struct Cli {
    /// Address to bind the HTTP server to.
    #[arg(long, env = "AURORA_BIND_ADDR", default_value = "0.0.0.0:3001")]
    bind_addr: String,

    /// Path to the JSON config file for the Config Registry.
    #[arg(long, env = "AURORA_CONFIG_PATH", default_value = "config.json")]
    config_path: String,
}

fn now_ms() -> MillisTimestamp {
    chrono::Utc::now().timestamp_millis()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenv::dotenv();
    let cli: Cli = clap::Parser::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Aurora Confluence — signal confluence engine starting up");

    // ── 1. Config Registry (C1): load once, freeze forever ──────────────
    let loaded = Config::load(&cli.config_path);
    let cfg: &'static Config = config::freeze(loaded);
    info!(content_hash = %cfg.content_hash(), "config registry frozen");

    let now_fn: Arc<dyn Fn() -> MillisTimestamp + Send + Sync> = Arc::new(now_ms);

    // ── 2. Market providers (C6) behind cache + rate limiter (C5) ────────
    let options_key = std::env::var("OPTIONS_PROVIDER_API_KEY").unwrap_or_default();
    let analytics_key = std::env::var("ANALYTICS_PROVIDER_API_KEY").unwrap_or_default();
    let liquidity_key = std::env::var("LIQUIDITY_PROVIDER_API_KEY").unwrap_or_default();

    let options_url = std::env::var("OPTIONS_PROVIDER_URL")
        .unwrap_or_else(|_| "https://options-provider.invalid".to_string());
    let analytics_url = std::env::var("ANALYTICS_PROVIDER_URL")
        .unwrap_or_else(|_| "https://analytics-provider.invalid".to_string());
    let liquidity_url = std::env::var("LIQUIDITY_PROVIDER_URL")
        .unwrap_or_else(|_| "https://liquidity-provider.invalid".to_string());

    let market_builder = Arc::new(MarketContextBuilder::new(
        OptionsProvider::new(options_url, options_key),
        AnalyticsProvider::new(analytics_url, analytics_key),
        LiquidityProvider::new(liquidity_url, liquidity_key),
        MarketCache::new(now_fn.clone()),
        RateLimiter::new(now_fn.clone()),
        now_fn.clone(),
    ));

    // ── 3. Ledger (C9): durable Postgres if DATABASE_URL is set, else
    //    in-memory (local development / tests). ─────────────────────────
    let ledger: Arc<dyn LedgerStore> = match std::env::var("DATABASE_URL") {
        Ok(url) => match SqlLedger::connect(&url).await {
            Ok(sql) => {
                info!("ledger backend: Postgres (DATABASE_URL set)");
                Arc::new(sql)
            }
            Err(e) => {
                error!(error = %e, "failed to connect to DATABASE_URL, falling back to in-memory ledger");
                Arc::new(InMemoryLedger::new())
            }
        },
        Err(_) => {
            warn!("DATABASE_URL not set; ledger backend: in-memory (not durable across restarts)");
            Arc::new(InMemoryLedger::new())
        }
    };

    // ── 4. Outbound intent sink (fire-and-forget paper-trading handoff) ──
    let outbound = spawn_outbound_sink(256);

    // ── 5. Orchestrator (C10) ─────────────────────────────────────────────
    let orchestrator = Arc::new(Orchestrator {
        config: cfg,
        context_store: ContextStore::new(now_fn.clone()),
        market_builder,
        ledger,
        now_fn,
        outbound,
    });

    // ── 6. Webhook HMAC secret (optional; disables verification if unset) ─
    let webhook_secret = std::env::var("WEBHOOK_HMAC_SECRET").ok().filter(|s| !s.is_empty());
    if webhook_secret.is_none() {
        warn!("WEBHOOK_HMAC_SECRET not set; inbound signature verification is disabled");
    }

    let state = Arc::new(AppState::new(orchestrator, webhook_secret));

    // ── 7. Serve ──────────────────────────────────────────────────────────
    let app = api::rest::router(state);
    let listener = tokio::net::TcpListener::bind(&cli.bind_addr).await?;
    info!(addr = %cli.bind_addr, "API server listening");

    axum::serve(listener, app).await?;

    Ok(())
}
