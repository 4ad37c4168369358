use agent_core::AgentConfig;
use market_store::MarketStore;
use std::path::PathBuf;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let json_logging = std::env::var("RUST_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    if json_logging {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .init();
    }

    tracing::info!("Starting autonomous research & paper-trading agent");

    // Fatal init path: bad config or an unopenable store exits with code 1.
    let config_dir = std::env::var("CONFIG_DIR").unwrap_or_else(|_| "config".to_string());
    let config = AgentConfig::load(&PathBuf::from(&config_dir))
        .map_err(|e| anyhow::anyhow!("config load failed: {e}"))?;
    tracing::info!("Configuration loaded from {config_dir}/");
    tracing::info!("  LLM: {} @ {}", config.llm.model, config.llm.base_url);
    tracing::info!(
        "  Risk: balance {:.0}, buy >= {:.2}, sell <= {:.2}",
        config.risk.starting_balance,
        config.risk.buy_threshold,
        config.risk.sell_threshold
    );
    tracing::info!(
        "  Pipeline: {} collection / {} analysis workers, queues {}/{}/{}",
        config.pipeline.collection_workers,
        config.pipeline.analysis_workers,
        config.pipeline.collect_queue_bound,
        config.pipeline.analyze_queue_bound,
        config.pipeline.trade_queue_bound
    );

    let store = MarketStore::open(&config.database_url)
        .await
        .map_err(|e| anyhow::anyhow!("store open failed: {e}"))?;
    tracing::info!("Store ready at {}", config.database_url);

    let bind_addr = config.bind_addr.clone();
    let state = api_server::build_state(config, store).await?;

    // The scheduler loop starts immediately; /scheduler/stop is the kill
    // switch, Ctrl+C maps to the same path.
    let scheduler = state.scheduler.clone();
    tokio::spawn(async move {
        scheduler.run_forever().await;
    });

    let shutdown_scheduler = state.scheduler.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("SIGINT received, shutting down");
            shutdown_scheduler.shutdown().await;
        }
    });

    api_server::serve(state, &bind_addr).await?;
    tracing::info!("Agent shut down cleanly");
    Ok(())
}
