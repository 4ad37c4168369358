use crate::{AgentError, AgentResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// LLM backend configuration (`llm.json`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// "openai" (chat-completions compatible) or "ollama"
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Context-window hint in tokens, used for the overflow guard
    #[serde(default = "default_context_size")]
    pub context_size: usize,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
}

fn default_provider() -> String {
    "ollama".to_string()
}
fn default_llm_base_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_model() -> String {
    "qwen2.5:14b".to_string()
}
fn default_context_size() -> usize {
    16_384
}
fn default_temperature() -> f64 {
    0.3
}
fn default_llm_timeout() -> u64 {
    60
}

impl Default for LlmConfig {
    fn default() -> Self {
        serde_json::from_str("{}").expect("defaults")
    }
}

/// Risk parameters for the signal router and paper trader (`risk.json`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    #[serde(default = "default_starting_balance")]
    pub starting_balance: f64,
    /// Max fraction of portfolio value per position
    #[serde(default = "default_max_position_pct")]
    pub max_position_pct: f64,
    /// Max fraction of portfolio value allocated across all positions
    #[serde(default = "default_max_allocation_pct")]
    pub max_portfolio_allocation_pct: f64,
    #[serde(default = "default_max_orders_per_day")]
    pub max_orders_per_day: i64,
    /// Daily realized+unrealized loss limit as a fraction of total value
    #[serde(default = "default_daily_loss_limit")]
    pub daily_loss_limit_pct: f64,
    #[serde(default = "default_buy_threshold")]
    pub buy_threshold: f64,
    #[serde(default = "default_sell_threshold")]
    pub sell_threshold: f64,
    #[serde(default = "default_rebuy_cooldown")]
    pub rebuy_cooldown_days: i64,
    #[serde(default = "default_trailing_stop_pct")]
    pub trailing_stop_pct_default: f64,
    #[serde(default = "default_stop_loss_pct")]
    pub stop_loss_pct_default: f64,
    #[serde(default = "default_take_profit_pct")]
    pub take_profit_pct_default: f64,
    /// Fraction of full Kelly used for the scorecard sizing hint
    #[serde(default = "default_kelly_fraction")]
    pub kelly_fraction: f64,
    #[serde(default = "default_min_conviction")]
    pub min_conviction: f64,
    #[serde(default = "default_max_position_shares")]
    pub max_position_shares: i64,
}

fn default_starting_balance() -> f64 {
    10_000.0
}
fn default_max_position_pct() -> f64 {
    0.10
}
fn default_max_allocation_pct() -> f64 {
    0.80
}
fn default_max_orders_per_day() -> i64 {
    10
}
fn default_daily_loss_limit() -> f64 {
    0.05
}
fn default_buy_threshold() -> f64 {
    0.70
}
fn default_sell_threshold() -> f64 {
    0.30
}
fn default_rebuy_cooldown() -> i64 {
    7
}
fn default_trailing_stop_pct() -> f64 {
    0.08
}
fn default_stop_loss_pct() -> f64 {
    0.08
}
fn default_take_profit_pct() -> f64 {
    0.20
}
fn default_kelly_fraction() -> f64 {
    0.5
}
fn default_min_conviction() -> f64 {
    0.55
}
fn default_max_position_shares() -> i64 {
    1_000
}

impl Default for RiskConfig {
    fn default() -> Self {
        serde_json::from_str("{}").expect("defaults")
    }
}

/// A transcript channel with its trust weight
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub channel_id: String,
    pub name: String,
    #[serde(default = "default_trust")]
    pub trust: f64,
}

fn default_trust() -> f64 {
    1.0
}

/// Discovery source lists (`sources.json`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourcesConfig {
    #[serde(default = "default_priority_forums")]
    pub priority_forums: Vec<String>,
    #[serde(default = "default_trending_forums")]
    pub trending_forums: Vec<String>,
    #[serde(default)]
    pub transcript_channels: Vec<ChannelConfig>,
    /// Uppercase tokens that regex extraction must never treat as tickers
    #[serde(default = "default_denylist")]
    pub denylist: Vec<String>,
    /// Recency window for transcript search
    #[serde(default = "default_transcript_window")]
    pub transcript_window_hours: i64,
}

fn default_priority_forums() -> Vec<String> {
    vec!["stocks".to_string(), "investing".to_string()]
}
fn default_trending_forums() -> Vec<String> {
    vec!["wallstreetbets".to_string(), "stockmarket".to_string()]
}
fn default_transcript_window() -> i64 {
    24
}
fn default_denylist() -> Vec<String> {
    [
        "YOLO", "DD", "CEO", "CFO", "CTO", "AI", "USA", "USD", "GDP", "SEC", "FDA", "ETF", "IPO",
        "ATH", "PE", "EPS", "EV", "IMO", "TLDR", "FOMO", "WSB", "API", "NYSE", "OTC", "LLC",
        "EDIT", "HOLD", "BUY", "SELL", "MOON", "PUMP", "CALL", "PUTS", "GAIN", "LOSS", "NEWS",
        "TODAY", "IT", "ALL", "ARE", "FOR", "NOT", "THE", "THIS", "WITH", "YOU",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl Default for SourcesConfig {
    fn default() -> Self {
        serde_json::from_str("{}").expect("defaults")
    }
}

/// Watchlist lifecycle policies (`watchlist.json`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchlistConfig {
    #[serde(default = "default_max_active")]
    pub max_active: usize,
    #[serde(default = "default_cooldown_days")]
    pub cooldown_days: i64,
    #[serde(default = "default_min_discovery_score")]
    pub min_discovery_score: f64,
    #[serde(default = "default_consecutive_low")]
    pub consecutive_low_to_remove: i64,
    #[serde(default = "default_low_conviction")]
    pub low_conviction_threshold: f64,
    #[serde(default = "default_stale_days")]
    pub stale_days: i64,
}

fn default_max_active() -> usize {
    20
}
fn default_cooldown_days() -> i64 {
    7
}
fn default_min_discovery_score() -> f64 {
    3.0
}
fn default_consecutive_low() -> i64 {
    2
}
fn default_low_conviction() -> f64 {
    0.3
}
fn default_stale_days() -> i64 {
    5
}

impl Default for WatchlistConfig {
    fn default() -> Self {
        serde_json::from_str("{}").expect("defaults")
    }
}

impl WatchlistConfig {
    /// Smaller cap while debugging so runs stay cheap.
    pub fn debug() -> Self {
        Self {
            max_active: 5,
            ..Default::default()
        }
    }
}

/// Pipeline and scheduler tuning (`pipeline.json`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_collect_bound")]
    pub collect_queue_bound: usize,
    #[serde(default = "default_analyze_bound")]
    pub analyze_queue_bound: usize,
    #[serde(default = "default_trade_bound")]
    pub trade_queue_bound: usize,
    #[serde(default = "default_collection_workers")]
    pub collection_workers: usize,
    #[serde(default = "default_analysis_workers")]
    pub analysis_workers: usize,
    #[serde(default = "default_stage_timeout")]
    pub stage_timeout_secs: u64,
    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,
    #[serde(default = "default_monitor_interval")]
    pub monitor_interval_secs: u64,
    #[serde(default = "default_market_timezone")]
    pub market_timezone: String,
    /// Estimated-token ceiling for the dossier synthesis prompt
    #[serde(default = "default_synthesis_budget")]
    pub synthesis_token_budget: usize,
}

fn default_collect_bound() -> usize {
    20
}
fn default_analyze_bound() -> usize {
    5
}
fn default_trade_bound() -> usize {
    10
}
fn default_collection_workers() -> usize {
    4
}
fn default_analysis_workers() -> usize {
    2
}
fn default_stage_timeout() -> u64 {
    120
}
fn default_http_timeout() -> u64 {
    30
}
fn default_monitor_interval() -> u64 {
    60
}
fn default_market_timezone() -> String {
    "US/Eastern".to_string()
}
fn default_synthesis_budget() -> usize {
    12_000
}

impl Default for PipelineConfig {
    fn default() -> Self {
        serde_json::from_str("{}").expect("defaults")
    }
}

/// Full agent configuration, assembled from the config directory.
#[derive(Debug, Clone, Default)]
pub struct AgentConfig {
    pub llm: LlmConfig,
    pub risk: RiskConfig,
    pub sources: SourcesConfig,
    pub watchlist: WatchlistConfig,
    pub pipeline: PipelineConfig,
    /// "research_driven" (default) or "aggressive"; selects the strategist
    /// framing injected into synthesis prompts
    pub strategist_mode: String,
    /// Free-form strategy markdown consumed only by prompts
    pub strategy_text: String,
    pub database_url: String,
    pub bind_addr: String,
}

fn read_json_file<T: for<'de> Deserialize<'de> + Default>(path: &Path) -> AgentResult<T> {
    if !path.exists() {
        return Ok(T::default());
    }
    let raw = std::fs::read_to_string(path)
        .map_err(|e| AgentError::Validation(format!("cannot read {}: {e}", path.display())))?;
    serde_json::from_str(&raw)
        .map_err(|e| AgentError::Validation(format!("invalid JSON in {}: {e}", path.display())))
}

impl AgentConfig {
    /// Load configuration from a directory of JSON files plus `strategy.md`.
    /// Missing files fall back to defaults; malformed files are fatal.
    pub fn load(config_dir: &Path) -> AgentResult<Self> {
        let llm: LlmConfig = read_json_file(&config_dir.join("llm.json"))?;
        let risk: RiskConfig = read_json_file(&config_dir.join("risk.json"))?;
        let sources: SourcesConfig = read_json_file(&config_dir.join("sources.json"))?;
        let watchlist: WatchlistConfig = read_json_file(&config_dir.join("watchlist.json"))?;
        let pipeline: PipelineConfig = read_json_file(&config_dir.join("pipeline.json"))?;

        let strategy_text = std::fs::read_to_string(config_dir.join("strategy.md"))
            .unwrap_or_else(|_| "Research-driven: only act on well-supported theses.".to_string());

        let strategist_mode = std::env::var("STRATEGIST_MODE")
            .unwrap_or_else(|_| "research_driven".to_string());

        let database_url =
            std::env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite:agent.db".to_string());
        let bind_addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:8090".to_string());

        let config = Self {
            llm,
            risk,
            sources,
            watchlist,
            pipeline,
            strategist_mode,
            strategy_text,
            database_url,
            bind_addr,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> AgentResult<()> {
        if !(0.0..=1.0).contains(&self.risk.buy_threshold)
            || !(0.0..=1.0).contains(&self.risk.sell_threshold)
        {
            return Err(AgentError::Validation(
                "buy/sell thresholds must be within [0,1]".to_string(),
            ));
        }
        if self.risk.sell_threshold >= self.risk.buy_threshold {
            return Err(AgentError::Validation(
                "sell_threshold must be below buy_threshold".to_string(),
            ));
        }
        if self.risk.starting_balance <= 0.0 {
            return Err(AgentError::Validation(
                "starting_balance must be positive".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.risk.max_position_pct) {
            return Err(AgentError::Validation(
                "max_position_pct must be within [0,1]".to_string(),
            ));
        }
        if self.pipeline.analysis_workers == 0 || self.pipeline.collection_workers == 0 {
            return Err(AgentError::Validation(
                "worker counts must be at least 1".to_string(),
            ));
        }
        if matches!(self.strategist_mode.as_str(), "research_driven" | "aggressive") {
            Ok(())
        } else {
            Err(AgentError::Validation(format!(
                "unknown strategist_mode '{}'",
                self.strategist_mode
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = AgentConfig {
            strategist_mode: "research_driven".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_ok());
        assert_eq!(config.watchlist.max_active, 20);
        assert_eq!(config.risk.rebuy_cooldown_days, 7);
        assert!((config.risk.buy_threshold - 0.70).abs() < 1e-9);
    }

    #[test]
    fn inverted_thresholds_rejected() {
        let mut config = AgentConfig {
            strategist_mode: "research_driven".to_string(),
            ..Default::default()
        };
        config.risk.buy_threshold = 0.2;
        config.risk.sell_threshold = 0.8;
        assert!(config.validate().is_err());
    }

    #[test]
    fn debug_watchlist_cap() {
        assert_eq!(WatchlistConfig::debug().max_active, 5);
    }

    #[test]
    fn denylist_contains_common_noise() {
        let sources = SourcesConfig::default();
        for token in ["YOLO", "DD", "CEO", "AI", "USA"] {
            assert!(sources.denylist.iter().any(|t| t == token), "{token}");
        }
    }
}
