use crate::extract::sentiment_of;
use agent_core::{
    AgentResult, ChatModel, ChatOptions, DiscoverySource, ScoredTicker, SentimentHint,
    SourcesConfig, TickerCollector,
};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use market_data::TranscriptClient;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;

/// A symbol the LLM pulled out of a transcript, by ticker or company name.
#[derive(Debug, Deserialize)]
struct ExtractedMention {
    symbol: String,
    #[serde(default)]
    mentions: u32,
    #[serde(default)]
    sentiment: Option<String>,
}

/// Transcript discovery: recent videos from trusted channels, transcript
/// download, LLM symbol extraction, trust-weighted scoring.
pub struct TranscriptSource {
    transcripts: Arc<TranscriptClient>,
    llm: Arc<dyn ChatModel>,
    collector: Arc<dyn TickerCollector>,
    sources: SourcesConfig,
}

impl TranscriptSource {
    pub fn new(
        transcripts: Arc<TranscriptClient>,
        llm: Arc<dyn ChatModel>,
        collector: Arc<dyn TickerCollector>,
        sources: SourcesConfig,
    ) -> Self {
        Self {
            transcripts,
            llm,
            collector,
            sources,
        }
    }

    async fn extract_mentions(&self, transcript: &str) -> AgentResult<Vec<ExtractedMention>> {
        let system = "You extract stock mentions from finance video transcripts. Companies may \
                      be referenced by ticker or by name; resolve names to tickers. Reply with a \
                      JSON array of {\"symbol\", \"mentions\", \"sentiment\"} objects where \
                      sentiment is bullish, bearish, or neutral.";
        // Transcripts can be very long; the head carries the thesis.
        let excerpt: String = transcript.chars().take(12_000).collect();
        let user = format!("Transcript:\n{excerpt}");

        let response = self.llm.chat(system, &user, &ChatOptions::json()).await?;
        let mentions: Vec<ExtractedMention> = serde_json::from_str(&response.content)
            .map_err(|e| agent_core::AgentError::LlmFatal(format!("bad extraction payload: {e}")))?;
        Ok(mentions)
    }
}

#[async_trait]
impl DiscoverySource for TranscriptSource {
    fn name(&self) -> &'static str {
        "transcripts"
    }

    async fn scan(&self) -> AgentResult<Vec<ScoredTicker>> {
        let window_start = Utc::now() - Duration::hours(self.sources.transcript_window_hours);
        let mut accumulator: HashMap<String, ScoredTicker> = HashMap::new();
        let source_name = self.name();

        for channel in &self.sources.transcript_channels {
            let videos = match self
                .transcripts
                .channel_videos(&channel.channel_id, window_start)
                .await
            {
                Ok(videos) => videos,
                Err(e) => {
                    tracing::warn!("channel {} unavailable: {e}", channel.name);
                    continue;
                }
            };

            for video in videos {
                let transcript = match self.transcripts.fetch_transcript(&video.video_id).await {
                    Ok(text) if !text.trim().is_empty() => text,
                    Ok(_) => continue,
                    Err(e) => {
                        tracing::debug!("transcript {} unavailable: {e}", video.video_id);
                        continue;
                    }
                };

                let mentions = match self.extract_mentions(&transcript).await {
                    Ok(mentions) => mentions,
                    Err(e) => {
                        tracing::warn!("extraction failed for {}: {e}", video.video_id);
                        continue;
                    }
                };

                for mention in mentions {
                    let symbol = mention.symbol.to_uppercase();
                    let count = mention.mentions.max(1);
                    let score = channel.trust * count as f64;
                    let sentiment = mention
                        .sentiment
                        .as_deref()
                        .map(SentimentHint::parse)
                        .unwrap_or_else(|| sentiment_of(&transcript));

                    let entry = accumulator.entry(symbol.clone()).or_insert_with(|| {
                        let mut t = ScoredTicker::new(symbol.clone(), source_name, 0.0);
                        t.mention_count = 0;
                        t
                    });
                    entry.total_score += score;
                    *entry
                        .source_scores
                        .entry(source_name.to_string())
                        .or_insert(0.0) += score;
                    entry.mention_count += count;
                    if sentiment != SentimentHint::Neutral {
                        entry.sentiment = sentiment;
                    }
                    if entry.contexts.len() < 5 {
                        entry.contexts.push(format!("{} ({})", video.title, channel.name));
                    }
                }
            }
        }

        let mut validated = Vec::new();
        for (symbol, ticker) in accumulator {
            match self.collector.validate_ticker(&symbol).await {
                Ok(true) => validated.push(ticker),
                Ok(false) => tracing::debug!("transcript source dropped invalid symbol {symbol}"),
                Err(e) => tracing::warn!("validation error for {symbol}: {e}"),
            }
        }
        validated.sort_by(|a, b| {
            b.total_score
                .partial_cmp(&a.total_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.symbol.cmp(&b.symbol))
        });
        Ok(validated)
    }
}
