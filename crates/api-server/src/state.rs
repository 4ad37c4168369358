use agent_core::{AgentConfig, AgentError, ChatModel, DiscoverySource, TickerCollector};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use collectors::{DataCollector, TickerValidator};
use deep_analysis::DeepAnalysisEngine;
use llm_client::LlmClient;
use market_data::{MarketDataClient, TranscriptClient};
use market_store::{EventLog, MarketStore};
use paper_trader::{PaperTrader, SignalRouter};
use price_monitor::PriceMonitor;
use scheduler::{MarketCalendar, Scheduler};
use serde::Serialize;
use social_discovery::{DiscoveryEngine, ForumSource, TranscriptSource};
use std::sync::Arc;
use streaming_pipeline::StreamingPipeline;
use tokio::sync::Mutex;
use watchlist_manager::WatchlistManager;

/// Background-task bookkeeping for the discovery and bot-loop endpoints.
#[derive(Debug, Default, Clone, Serialize)]
pub struct TaskStatus {
    pub running: bool,
    pub last_run_id: Option<String>,
    pub last_error: Option<String>,
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AgentConfig>,
    pub store: MarketStore,
    pub events: EventLog,
    pub market: Arc<MarketDataClient>,
    pub collector: Arc<dyn TickerCollector>,
    pub discovery: Arc<DiscoveryEngine>,
    pub watchlist: Arc<WatchlistManager>,
    pub analysis: Arc<DeepAnalysisEngine>,
    pub trader: Arc<PaperTrader>,
    pub router: Arc<SignalRouter>,
    pub pipeline: Arc<StreamingPipeline>,
    pub scheduler: Arc<Scheduler>,
    pub discovery_status: Arc<Mutex<TaskStatus>>,
    pub loop_status: Arc<Mutex<TaskStatus>>,
}

/// Wire every component from config + an opened store.
pub async fn build_state(config: AgentConfig, store: MarketStore) -> anyhow::Result<AppState> {
    let config = Arc::new(config);
    let events = EventLog::new(store.clone());

    let llm: Arc<dyn ChatModel> = Arc::new(LlmClient::new(config.llm.clone()));
    let market = Arc::new(MarketDataClient::new(config.pipeline.http_timeout_secs));
    let transcripts = Arc::new(TranscriptClient::new(config.pipeline.http_timeout_secs));

    let validator = Arc::new(TickerValidator::new(
        config.sources.denylist.clone(),
        Arc::clone(&market),
        Arc::clone(&llm),
    ));
    let collector: Arc<dyn TickerCollector> = Arc::new(DataCollector::new(
        store.clone(),
        Arc::clone(&market),
        Arc::clone(&transcripts),
        validator,
        config.sources.clone(),
        0.045,
        config.risk.kelly_fraction,
    ));

    let forum_source: Arc<dyn DiscoverySource> = Arc::new(ForumSource::new(
        Arc::clone(&llm),
        Arc::clone(&collector),
        config.sources.clone(),
        config.pipeline.http_timeout_secs,
    ));
    let transcript_source: Arc<dyn DiscoverySource> = Arc::new(TranscriptSource::new(
        Arc::clone(&transcripts),
        Arc::clone(&llm),
        Arc::clone(&collector),
        config.sources.clone(),
    ));
    let discovery = Arc::new(DiscoveryEngine::new(
        vec![forum_source, transcript_source],
        store.clone(),
    ));

    let watchlist = Arc::new(WatchlistManager::new(store.clone(), config.watchlist.clone()));
    let analysis = Arc::new(DeepAnalysisEngine::new(
        store.clone(),
        Arc::clone(&llm),
        0.045,
        config.risk.kelly_fraction,
        &config.strategist_mode,
        &config.strategy_text,
        config.pipeline.synthesis_token_budget,
    ));

    let trader = Arc::new(PaperTrader::new(store.clone()));
    trader.init(config.risk.starting_balance).await?;
    let router = Arc::new(SignalRouter::new(store.clone(), config.risk.clone()));

    let pipeline = Arc::new(StreamingPipeline::new(
        config.pipeline.clone(),
        Arc::clone(&collector),
        Arc::clone(&analysis),
        Arc::clone(&router),
        Arc::clone(&trader),
        Arc::clone(&watchlist),
    ));

    let calendar = MarketCalendar::new(&config.pipeline.market_timezone);
    let monitor = Arc::new(PriceMonitor::new(
        store.clone(),
        Arc::clone(&trader),
        Arc::clone(&market) as Arc<dyn agent_core::QuoteProvider>,
    ));

    let scheduler = Arc::new(Scheduler::new(
        store.clone(),
        events.clone(),
        Arc::clone(&discovery),
        Arc::clone(&watchlist),
        Arc::clone(&pipeline),
        Arc::clone(&trader),
        Arc::clone(&monitor),
        calendar,
        config.pipeline.monitor_interval_secs,
    ));

    Ok(AppState {
        config,
        store,
        events,
        market,
        collector,
        discovery,
        watchlist,
        analysis,
        trader,
        router,
        pipeline,
        scheduler,
        discovery_status: Arc::new(Mutex::new(TaskStatus::default())),
        loop_status: Arc::new(Mutex::new(TaskStatus::default())),
    })
}

/// Uniform success envelope.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    pub data: T,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data,
        })
    }
}

/// Error envelope with a stable machine-readable kind.
#[derive(Debug)]
pub struct ApiError(pub AgentError);

impl From<AgentError> for ApiError {
    fn from(e: AgentError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            AgentError::Validation(_) => StatusCode::BAD_REQUEST,
            AgentError::NotFound(_) => StatusCode::NOT_FOUND,
            AgentError::RiskBlocked(_) => StatusCode::CONFLICT,
            AgentError::InsufficientCash { .. } | AgentError::PositionNotFound(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            AgentError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = serde_json::json!({
            "success": false,
            "error": self.0.to_string(),
            "error_kind": self.0.error_kind(),
        });
        (status, Json(body)).into_response()
    }
}
