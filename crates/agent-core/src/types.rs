use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Sentiment hint attached to a discovered ticker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SentimentHint {
    Bullish,
    Bearish,
    Neutral,
}

impl SentimentHint {
    pub fn as_str(&self) -> &'static str {
        match self {
            SentimentHint::Bullish => "bullish",
            SentimentHint::Bearish => "bearish",
            SentimentHint::Neutral => "neutral",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "bullish" => SentimentHint::Bullish,
            "bearish" => SentimentHint::Bearish,
            _ => SentimentHint::Neutral,
        }
    }
}

/// Candidate ticker produced by a discovery run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredTicker {
    pub symbol: String,
    pub total_score: f64,
    /// Per-source score contributions (source name -> score)
    pub source_scores: HashMap<String, f64>,
    pub mention_count: u32,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub sentiment: SentimentHint,
    /// Short text snippets around the mentions
    pub contexts: Vec<String>,
    pub sources: BTreeSet<String>,
}

impl ScoredTicker {
    pub fn new(symbol: impl Into<String>, source: &str, score: f64) -> Self {
        let now = Utc::now();
        let mut source_scores = HashMap::new();
        source_scores.insert(source.to_string(), score);
        let mut sources = BTreeSet::new();
        sources.insert(source.to_string());
        Self {
            symbol: symbol.into(),
            total_score: score,
            source_scores,
            mention_count: 1,
            first_seen: now,
            last_seen: now,
            sentiment: SentimentHint::Neutral,
            contexts: Vec::new(),
            sources,
        }
    }

    /// Merge another hit for the same symbol into this one.
    pub fn merge(&mut self, other: &ScoredTicker) {
        self.total_score += other.total_score;
        for (src, score) in &other.source_scores {
            *self.source_scores.entry(src.clone()).or_insert(0.0) += score;
        }
        self.mention_count += other.mention_count;
        self.first_seen = self.first_seen.min(other.first_seen);
        self.last_seen = self.last_seen.max(other.last_seen);
        self.sources.extend(other.sources.iter().cloned());
        self.contexts.extend(other.contexts.iter().cloned());
        // Higher-scoring side decides the sentiment hint
        if other.total_score > self.total_score / 2.0 && other.sentiment != SentimentHint::Neutral {
            self.sentiment = other.sentiment;
        }
    }
}

/// How a symbol got onto the watchlist
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchlistSource {
    Manual,
    AutoDiscovery,
}

impl WatchlistSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            WatchlistSource::Manual => "manual",
            WatchlistSource::AutoDiscovery => "auto_discovery",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "manual" => WatchlistSource::Manual,
            _ => WatchlistSource::AutoDiscovery,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchlistStatus {
    Active,
    PendingAnalysis,
    Cooldown,
    Removed,
}

impl WatchlistStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WatchlistStatus::Active => "active",
            WatchlistStatus::PendingAnalysis => "pending_analysis",
            WatchlistStatus::Cooldown => "cooldown",
            WatchlistStatus::Removed => "removed",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "active" => WatchlistStatus::Active,
            "pending_analysis" => WatchlistStatus::PendingAnalysis,
            "cooldown" => WatchlistStatus::Cooldown,
            _ => WatchlistStatus::Removed,
        }
    }
}

/// Trading signal label derived from conviction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Signal {
    Buy,
    Hold,
    Sell,
}

impl Signal {
    pub fn as_str(&self) -> &'static str {
        match self {
            Signal::Buy => "BUY",
            Signal::Hold => "HOLD",
            Signal::Sell => "SELL",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "BUY" => Signal::Buy,
            "SELL" => Signal::Sell,
            _ => Signal::Hold,
        }
    }
}

/// Conviction band boundaries: [0,0.25) strong sell, [0.25,0.40) lean sell,
/// [0.40,0.60] hold, (0.60,0.75] lean buy, (0.75,1.0] strong buy.
pub fn signal_for_conviction(conviction: f64) -> Signal {
    if conviction < 0.40 {
        Signal::Sell
    } else if conviction <= 0.60 {
        Signal::Hold
    } else {
        Signal::Buy
    }
}

/// Human-readable band label for a conviction score.
pub fn conviction_band(conviction: f64) -> &'static str {
    if conviction < 0.25 {
        "strong_sell"
    } else if conviction < 0.40 {
        "lean_sell"
    } else if conviction <= 0.60 {
        "hold"
    } else if conviction <= 0.75 {
        "lean_buy"
    } else {
        "strong_buy"
    }
}

/// A symbol the agent actively tracks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchlistEntry {
    pub symbol: String,
    pub source: WatchlistSource,
    pub added_at: DateTime<Utc>,
    pub discovery_score: f64,
    /// [0,1]
    pub conviction_score: f64,
    pub last_analyzed: Option<DateTime<Utc>>,
    pub times_analyzed: i64,
    pub status: WatchlistStatus,
    pub position_held: bool,
    pub last_signal: Option<Signal>,
    pub consecutive_low: i64,
    pub removed_at: Option<DateTime<Utc>>,
}

impl WatchlistEntry {
    pub fn new(symbol: impl Into<String>, source: WatchlistSource, discovery_score: f64) -> Self {
        Self {
            symbol: symbol.into(),
            source,
            added_at: Utc::now(),
            discovery_score,
            conviction_score: 0.5,
            last_analyzed: None,
            times_analyzed: 0,
            status: WatchlistStatus::PendingAnalysis,
            position_held: false,
            last_signal: None,
            consecutive_low: 0,
            removed_at: None,
        }
    }
}

/// Daily OHLCV candle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyCandle {
    pub symbol: String,
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Point-in-time valuation/profitability snapshot (~24 metrics)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FundamentalsSnapshot {
    pub symbol: String,
    pub snapshot_date: NaiveDate,
    pub market_cap: Option<f64>,
    pub enterprise_value: Option<f64>,
    pub pe_ratio: Option<f64>,
    pub forward_pe: Option<f64>,
    pub peg_ratio: Option<f64>,
    pub price_to_book: Option<f64>,
    pub price_to_sales: Option<f64>,
    pub ev_to_ebitda: Option<f64>,
    pub gross_margin: Option<f64>,
    pub operating_margin: Option<f64>,
    pub profit_margin: Option<f64>,
    pub return_on_equity: Option<f64>,
    pub return_on_assets: Option<f64>,
    pub revenue: Option<f64>,
    pub revenue_growth_yoy: Option<f64>,
    pub earnings_growth_yoy: Option<f64>,
    pub eps_ttm: Option<f64>,
    pub forward_eps: Option<f64>,
    pub free_cash_flow: Option<f64>,
    pub dividend_yield: Option<f64>,
    pub payout_ratio: Option<f64>,
    pub beta: Option<f64>,
    pub shares_outstanding: Option<f64>,
    pub short_percent_of_float: Option<f64>,
}

/// One fiscal year of income-statement data
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinancialRow {
    pub symbol: String,
    pub fiscal_year: i32,
    pub revenue: Option<f64>,
    pub gross_profit: Option<f64>,
    pub operating_income: Option<f64>,
    pub net_income: Option<f64>,
    pub eps: Option<f64>,
}

/// One fiscal year of balance-sheet data
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceRow {
    pub symbol: String,
    pub fiscal_year: i32,
    pub total_assets: Option<f64>,
    pub total_liabilities: Option<f64>,
    pub current_assets: Option<f64>,
    pub current_liabilities: Option<f64>,
    pub total_equity: Option<f64>,
    pub cash_and_equivalents: Option<f64>,
    pub long_term_debt: Option<f64>,
    pub retained_earnings: Option<f64>,
}

/// One fiscal year of cash-flow data
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CashFlowRow {
    pub symbol: String,
    pub fiscal_year: i32,
    pub operating_cash_flow: Option<f64>,
    pub capital_expenditures: Option<f64>,
    pub free_cash_flow: Option<f64>,
    pub dividends_paid: Option<f64>,
    pub net_borrowings: Option<f64>,
}

/// Dated analyst-consensus snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalystSnapshot {
    pub symbol: String,
    pub snapshot_date: NaiveDate,
    /// 1.0 (strong buy) .. 5.0 (sell)
    pub rating_mean: Option<f64>,
    pub target_mean: Option<f64>,
    pub target_high: Option<f64>,
    pub target_low: Option<f64>,
    pub buy_count: Option<i64>,
    pub hold_count: Option<i64>,
    pub sell_count: Option<i64>,
}

/// Rolling 90-day insider activity summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsiderSummary {
    pub symbol: String,
    pub snapshot_date: NaiveDate,
    pub net_shares_90d: f64,
    pub net_value_90d: f64,
    pub buy_count_90d: i64,
    pub sell_count_90d: i64,
}

/// Upcoming or past earnings date
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EarningsEvent {
    pub symbol: String,
    pub event_date: NaiveDate,
    pub period: String,
    pub eps_estimate: Option<f64>,
    pub confirmed: bool,
}

/// Dated row of standard technical indicators
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TechnicalRow {
    pub symbol: String,
    pub date: NaiveDate,
    pub sma_20: Option<f64>,
    pub sma_50: Option<f64>,
    pub sma_200: Option<f64>,
    pub ema_12: Option<f64>,
    pub ema_26: Option<f64>,
    pub rsi_14: Option<f64>,
    pub macd: Option<f64>,
    pub macd_signal: Option<f64>,
    pub macd_histogram: Option<f64>,
    pub bollinger_upper: Option<f64>,
    pub bollinger_middle: Option<f64>,
    pub bollinger_lower: Option<f64>,
    pub atr_14: Option<f64>,
    pub adx_14: Option<f64>,
    pub stochastic_k: Option<f64>,
    pub stochastic_d: Option<f64>,
    pub obv: Option<f64>,
    pub vwap_20: Option<f64>,
}

/// Dated row of portfolio-grade risk metrics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RiskRow {
    pub symbol: String,
    pub date: NaiveDate,
    pub sharpe: Option<f64>,
    pub sortino: Option<f64>,
    pub calmar: Option<f64>,
    pub omega: Option<f64>,
    pub kelly: Option<f64>,
    pub var_95: Option<f64>,
    pub cvar_95: Option<f64>,
    pub max_drawdown: Option<f64>,
    pub percentile_rank_price: Option<f64>,
    pub percentile_rank_volume: Option<f64>,
    pub hurst: Option<f64>,
    pub momentum_12m: Option<f64>,
    pub altman_z: Option<f64>,
    pub piotroski_f: Option<i64>,
}

/// News article, unique by content hash
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewsArticle {
    /// Hex SHA-256 of title + url
    pub id: String,
    pub symbol: String,
    pub title: String,
    pub source: String,
    pub url: String,
    pub published_at: DateTime<Utc>,
    pub summary: String,
}

/// Video transcript, unique by video id
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transcript {
    pub video_id: String,
    pub symbol: String,
    pub title: String,
    pub channel: String,
    pub published_at: DateTime<Utc>,
    pub duration_secs: i64,
    pub text: String,
}

/// Quantitative scorecard (the first, LLM-free analysis stage)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuantScorecard {
    pub symbol: String,
    pub as_of: DateTime<Utc>,
    pub last_close: Option<f64>,
    pub z_score_20d: Option<f64>,
    pub z_score_20d_robust: Option<f64>,
    pub bollinger_pct_b: Option<f64>,
    pub percentile_rank_price: Option<f64>,
    pub percentile_rank_volume: Option<f64>,
    pub sharpe: Option<f64>,
    pub sortino: Option<f64>,
    pub calmar: Option<f64>,
    pub omega: Option<f64>,
    pub kelly: Option<f64>,
    pub var_95: Option<f64>,
    pub cvar_95: Option<f64>,
    pub max_drawdown: Option<f64>,
    pub momentum_12m: Option<f64>,
    pub hurst: Option<f64>,
    pub mean_reversion_z: Option<f64>,
    pub vwap_deviation: Option<f64>,
    pub earnings_yield_gap: Option<f64>,
    pub altman_z: Option<f64>,
    pub piotroski_f: Option<i64>,
    /// Deterministic anomaly flags, e.g. "volume_spike_95th"
    pub flags: Vec<String>,
}

/// Which store-backed corpus a follow-up question should be answered from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuestionSource {
    News,
    Transcripts,
    Fundamentals,
    Technicals,
    Insider,
}

impl QuestionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuestionSource::News => "news",
            QuestionSource::Transcripts => "transcripts",
            QuestionSource::Fundamentals => "fundamentals",
            QuestionSource::Technicals => "technicals",
            QuestionSource::Insider => "insider",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "news" => Some(QuestionSource::News),
            "transcripts" | "transcript" | "youtube" => Some(QuestionSource::Transcripts),
            "fundamentals" | "fundamental" | "financials" => Some(QuestionSource::Fundamentals),
            "technicals" | "technical" => Some(QuestionSource::Technicals),
            "insider" | "insiders" => Some(QuestionSource::Insider),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "high" => Priority::High,
            "low" => Priority::Low,
            _ => Priority::Medium,
        }
    }
}

/// Typed follow-up question produced by the question-generation stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    pub text: String,
    pub target_source: QuestionSource,
    pub priority: Priority,
}

/// Self-rated answer confidence
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnswerConfidence {
    Low,
    Medium,
    High,
}

impl AnswerConfidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnswerConfidence::High => "high",
            AnswerConfidence::Medium => "medium",
            AnswerConfidence::Low => "low",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "high" => AnswerConfidence::High,
            "medium" => AnswerConfidence::Medium,
            _ => AnswerConfidence::Low,
        }
    }
}

/// Question answered against retrieved text
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QAPair {
    pub question: String,
    pub answer: String,
    pub source: QuestionSource,
    pub confidence: AnswerConfidence,
}

/// Per-ticker decision dossier, the consumable unit for trading decisions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickerDossier {
    pub symbol: String,
    pub generated_at: DateTime<Utc>,
    pub version: i64,
    pub scorecard: QuantScorecard,
    pub qa_pairs: Vec<QAPair>,
    pub executive_summary: String,
    pub bull_case: String,
    pub bear_case: String,
    pub key_catalysts: Vec<String>,
    /// [0,1]
    pub conviction_score: f64,
    pub signal_summary: String,
    pub total_tokens: i64,
}

/// Open paper position
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub qty: i64,
    pub avg_entry_price: f64,
    pub current_price: f64,
    pub unrealized_pnl: f64,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub trailing_stop_pct: Option<f64>,
    pub opened_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "buy",
            OrderSide::Sell => "sell",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "buy" => OrderSide::Buy,
            _ => OrderSide::Sell,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Filled,
    Cancelled,
    Failed,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Filled => "filled",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "pending" => OrderStatus::Pending,
            "filled" => OrderStatus::Filled,
            "cancelled" => OrderStatus::Cancelled,
            _ => OrderStatus::Failed,
        }
    }
}

/// Immutable simulated order record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub qty: i64,
    pub price: f64,
    pub order_type: String,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub filled_at: Option<DateTime<Utc>>,
    pub conviction_score: Option<f64>,
    pub signal_label: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    StopLoss,
    TakeProfit,
    TrailingStop,
}

impl TriggerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerKind::StopLoss => "stop_loss",
            TriggerKind::TakeProfit => "take_profit",
            TriggerKind::TrailingStop => "trailing_stop",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "stop_loss" => TriggerKind::StopLoss,
            "take_profit" => TriggerKind::TakeProfit,
            _ => TriggerKind::TrailingStop,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerStatus {
    Active,
    Triggered,
    Cancelled,
}

impl TriggerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerStatus::Active => "active",
            TriggerStatus::Triggered => "triggered",
            TriggerStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "active" => TriggerStatus::Active,
            "triggered" => TriggerStatus::Triggered,
            _ => TriggerStatus::Cancelled,
        }
    }
}

/// Standing sell condition evaluated by the price monitor.
///
/// A trigger fires at most once: firing atomically moves it
/// `active -> triggered` together with the sell order it produces.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceTrigger {
    pub id: String,
    pub symbol: String,
    pub kind: TriggerKind,
    pub trigger_price: f64,
    /// Trailing only: highest price observed since creation
    pub high_water_mark: Option<f64>,
    pub trailing_pct: Option<f64>,
    pub qty: i64,
    pub status: TriggerStatus,
    pub created_at: DateTime<Utc>,
}

/// Timestamped portfolio totals
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioSnapshot {
    pub taken_at: DateTime<Utc>,
    pub cash: f64,
    pub positions_value: f64,
    pub total_value: f64,
    pub realized_pnl: f64,
    pub unrealized_pnl: f64,
}

/// Portfolio state plus open positions, for API responses and LLM context
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioSummary {
    pub cash: f64,
    pub positions_value: f64,
    pub total_value: f64,
    pub realized_pnl: f64,
    pub unrealized_pnl: f64,
    pub positions: Vec<Position>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Success,
    Warning,
    Error,
    Skipped,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Success => "success",
            EventStatus::Warning => "warning",
            EventStatus::Error => "error",
            EventStatus::Skipped => "skipped",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "warning" => EventStatus::Warning,
            "error" => EventStatus::Error,
            "skipped" => EventStatus::Skipped,
            _ => EventStatus::Success,
        }
    }
}

/// One row of the pipeline audit trail
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineEvent {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub phase: String,
    pub event_type: String,
    pub symbol: Option<String>,
    pub detail: String,
    pub metadata: serde_json::Value,
    pub run_id: String,
    pub status: EventStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Ok,
    Error,
    Skipped,
}

/// Outcome of a single collection step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepOutcome {
    pub status: StepStatus,
    pub rows: i64,
    pub elapsed_ms: i64,
    pub message: Option<String>,
}

impl StepOutcome {
    pub fn ok(rows: i64, elapsed_ms: i64) -> Self {
        Self {
            status: StepStatus::Ok,
            rows,
            elapsed_ms,
            message: None,
        }
    }

    pub fn error(message: impl Into<String>, elapsed_ms: i64) -> Self {
        Self {
            status: StepStatus::Error,
            rows: 0,
            elapsed_ms,
            message: Some(message.into()),
        }
    }

    pub fn skipped(message: impl Into<String>) -> Self {
        Self {
            status: StepStatus::Skipped,
            rows: 0,
            elapsed_ms: 0,
            message: Some(message.into()),
        }
    }
}

/// Steps whose success is required before a ticker may enter analysis
pub const CRITICAL_STEPS: &[&str] = &["price_history", "fundamentals"];

/// Per-ticker collection report: one outcome per step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepReport {
    pub symbol: String,
    pub started_at: DateTime<Utc>,
    pub steps: BTreeMap<String, StepOutcome>,
}

impl StepReport {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            started_at: Utc::now(),
            steps: BTreeMap::new(),
        }
    }

    /// True iff every critical step completed ok.
    pub fn ready_for_analysis(&self) -> bool {
        CRITICAL_STEPS.iter().all(|step| {
            self.steps
                .get(*step)
                .map(|o| o.status == StepStatus::Ok)
                .unwrap_or(false)
        })
    }

    pub fn total_rows(&self) -> i64 {
        self.steps.values().map(|o| o.rows).sum()
    }
}

/// Live quote used by the monitor and validation probe
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    pub symbol: String,
    pub price: f64,
    pub prev_close: Option<f64>,
    pub volume: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

/// Router output: the action to take plus why (or why not)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeDecision {
    pub symbol: String,
    pub action: Signal,
    pub qty: i64,
    pub rationale: String,
    /// Names of risk guards that blocked a would-be order (empty if none)
    pub blocked_by: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conviction_bands_map_to_signals() {
        assert_eq!(signal_for_conviction(0.0), Signal::Sell);
        assert_eq!(signal_for_conviction(0.24), Signal::Sell);
        assert_eq!(signal_for_conviction(0.39), Signal::Sell);
        assert_eq!(signal_for_conviction(0.40), Signal::Hold);
        assert_eq!(signal_for_conviction(0.60), Signal::Hold);
        assert_eq!(signal_for_conviction(0.61), Signal::Buy);
        assert_eq!(signal_for_conviction(0.82), Signal::Buy);
    }

    #[test]
    fn band_labels() {
        assert_eq!(conviction_band(0.1), "strong_sell");
        assert_eq!(conviction_band(0.3), "lean_sell");
        assert_eq!(conviction_band(0.5), "hold");
        assert_eq!(conviction_band(0.7), "lean_buy");
        assert_eq!(conviction_band(0.9), "strong_buy");
    }

    #[test]
    fn scored_ticker_merge_sums_scores_and_unions_sources() {
        let mut a = ScoredTicker::new("NVDA", "forum:stocks", 5.0);
        let b = ScoredTicker::new("NVDA", "transcripts", 3.5);
        a.merge(&b);
        assert!((a.total_score - 8.5).abs() < 1e-9);
        assert_eq!(a.mention_count, 2);
        assert!(a.sources.contains("forum:stocks"));
        assert!(a.sources.contains("transcripts"));
    }

    #[test]
    fn step_report_requires_critical_steps() {
        let mut report = StepReport::new("AAPL");
        report
            .steps
            .insert("price_history".to_string(), StepOutcome::ok(250, 10));
        assert!(!report.ready_for_analysis());
        report
            .steps
            .insert("fundamentals".to_string(), StepOutcome::ok(1, 5));
        assert!(report.ready_for_analysis());
        report
            .steps
            .insert("fundamentals".to_string(), StepOutcome::error("upstream 500", 5));
        assert!(!report.ready_for_analysis());
    }
}
