use thiserror::Error;

/// Error taxonomy shared across the whole agent.
///
/// Per-ticker stage failures are non-fatal to a pipeline run; global failures
/// (store unreachable, invalid config) abort startup with exit code 1.
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("LLM transient error: {0}")]
    LlmTransient(String),

    #[error("LLM fatal error: {0}")]
    LlmFatal(String),

    #[error("Collector step {step} failed: {message}")]
    Collector { step: String, message: String },

    #[error("Scorecard computation failed: {0}")]
    ScorecardFailed(String),

    #[error("Question generation failed: {0}")]
    QuestionGenFailed(String),

    #[error("Answer extraction failed: {0}")]
    AnswerExtractionFailed(String),

    #[error("Dossier synthesis failed: {0}")]
    SynthesisFailed(String),

    #[error("Order blocked by risk guard: {0}")]
    RiskBlocked(String),

    #[error("Insufficient cash: need ${needed:.2}, have ${available:.2}")]
    InsufficientCash { needed: f64, available: f64 },

    #[error("No open position for {0}")]
    PositionNotFound(String),

    #[error("Operation cancelled")]
    Cancelled,
}

impl AgentError {
    /// Stable machine-readable kind, surfaced in HTTP error envelopes and
    /// event metadata.
    pub fn error_kind(&self) -> &'static str {
        match self {
            AgentError::Validation(_) => "validation_error",
            AgentError::NotFound(_) => "not_found",
            AgentError::Store(_) => "store_error",
            AgentError::LlmTransient(_) => "llm_transient",
            AgentError::LlmFatal(_) => "llm_fatal",
            AgentError::Collector { .. } => "collector_error",
            AgentError::ScorecardFailed(_) => "scorecard_failed",
            AgentError::QuestionGenFailed(_) => "question_gen_failed",
            AgentError::AnswerExtractionFailed(_) => "answer_extraction_failed",
            AgentError::SynthesisFailed(_) => "synthesis_failed",
            AgentError::RiskBlocked(_) => "risk_blocked",
            AgentError::InsufficientCash { .. } => "insufficient_cash",
            AgentError::PositionNotFound(_) => "position_not_found",
            AgentError::Cancelled => "cancelled",
        }
    }

    /// True for errors a caller may retry once (LLM hiccups, upstream 5xx).
    pub fn is_transient(&self) -> bool {
        matches!(self, AgentError::LlmTransient(_))
    }
}

impl From<sqlx::Error> for AgentError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => AgentError::NotFound("row not found".to_string()),
            other => AgentError::Store(other.to_string()),
        }
    }
}

pub type AgentResult<T> = Result<T, AgentError>;
