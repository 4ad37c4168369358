use crate::extract::{context_snippet, extract_candidates, mention_count, sentiment_of};
use agent_core::{
    AgentError, AgentResult, ChatModel, ChatOptions, DiscoverySource, ScoredTicker, SourcesConfig,
    TickerCollector,
};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

const TITLE_WEIGHT: f64 = 3.0;
const BODY_WEIGHT: f64 = 2.0;
const COMMENT_WEIGHT: f64 = 1.0;
const TOP_COMMENTS: usize = 15;

#[derive(Debug, Clone)]
struct Thread {
    id: String,
    forum: String,
    title: String,
    stickied: bool,
}

/// Discussion-forum discovery: priority (stickied) and trending threads from
/// public JSON endpoints, LLM-filtered titles, weighted mention scoring.
pub struct ForumSource {
    client: Client,
    base_url: String,
    llm: Arc<dyn ChatModel>,
    collector: Arc<dyn TickerCollector>,
    sources: SourcesConfig,
    denylist: HashSet<String>,
}

impl ForumSource {
    pub fn new(
        llm: Arc<dyn ChatModel>,
        collector: Arc<dyn TickerCollector>,
        sources: SourcesConfig,
        http_timeout_secs: u64,
    ) -> Self {
        let base_url = std::env::var("FORUM_BASE_URL")
            .unwrap_or_else(|_| "https://www.reddit.com".to_string());
        let client = Client::builder()
            .timeout(Duration::from_secs(http_timeout_secs))
            .user_agent("research-agent/0.1")
            .build()
            .unwrap_or_else(|_| Client::new());
        let denylist = sources.denylist.iter().map(|t| t.to_uppercase()).collect();
        Self {
            client,
            base_url,
            llm,
            collector,
            sources,
            denylist,
        }
    }

    async fn fetch_json(&self, url: &str) -> AgentResult<Value> {
        let response = self.client.get(url).send().await.map_err(|e| {
            AgentError::Collector {
                step: "forum_fetch".to_string(),
                message: e.to_string(),
            }
        })?;
        if !response.status().is_success() {
            return Err(AgentError::Collector {
                step: "forum_fetch".to_string(),
                message: format!("HTTP {} from {url}", response.status()),
            });
        }
        response.json().await.map_err(|e| AgentError::Collector {
            step: "forum_fetch".to_string(),
            message: e.to_string(),
        })
    }

    async fn list_threads(&self, forum: &str, listing: &str) -> AgentResult<Vec<Thread>> {
        let url = format!("{}/r/{}/{}.json?limit=25", self.base_url, forum, listing);
        let value = self.fetch_json(&url).await?;
        let children = value
            .pointer("/data/children")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        Ok(children
            .iter()
            .filter_map(|child| {
                let data = child.get("data")?;
                Some(Thread {
                    id: data.get("id").and_then(Value::as_str)?.to_string(),
                    forum: forum.to_string(),
                    title: data.get("title").and_then(Value::as_str)?.to_string(),
                    stickied: data.get("stickied").and_then(Value::as_bool).unwrap_or(false),
                })
            })
            .collect())
    }

    /// Thread body plus top-level comment bodies.
    async fn fetch_thread(&self, thread: &Thread) -> AgentResult<(String, Vec<String>)> {
        let url = format!(
            "{}/r/{}/comments/{}.json?limit={}",
            self.base_url, thread.forum, thread.id, TOP_COMMENTS
        );
        let value = self.fetch_json(&url).await?;
        let listing = value.as_array().cloned().unwrap_or_default();

        let body = listing
            .first()
            .and_then(|l| l.pointer("/data/children/0/data/selftext"))
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();

        let comments = listing
            .get(1)
            .and_then(|l| l.pointer("/data/children"))
            .and_then(Value::as_array)
            .map(|children| {
                children
                    .iter()
                    .filter_map(|c| c.pointer("/data/body").and_then(Value::as_str))
                    .take(TOP_COMMENTS)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Ok((body, comments))
    }

    /// Ask the LLM which thread titles are worth reading. Falls back to
    /// keeping every title when the backend is unavailable.
    async fn filter_relevant(&self, threads: &[Thread]) -> Vec<usize> {
        if threads.is_empty() {
            return Vec::new();
        }
        let titles: Vec<String> = threads
            .iter()
            .enumerate()
            .map(|(i, t)| format!("{i}: {}", t.title))
            .collect();
        let system = "You screen stock-forum thread titles. Reply with a JSON array of the \
                      indices of titles that discuss specific stocks or actionable market news.";
        let user = format!("Titles:\n{}", titles.join("\n"));

        match self.llm.chat(system, &user, &ChatOptions::json()).await {
            Ok(response) => match serde_json::from_str::<Vec<usize>>(&response.content) {
                Ok(indices) => indices.into_iter().filter(|&i| i < threads.len()).collect(),
                Err(e) => {
                    tracing::warn!("unparseable title filter response: {e}");
                    (0..threads.len()).collect()
                }
            },
            Err(e) => {
                tracing::warn!("title filter LLM unavailable: {e}");
                (0..threads.len()).collect()
            }
        }
    }

    fn score_text(
        &self,
        accumulator: &mut HashMap<String, ScoredTicker>,
        text: &str,
        weight: f64,
        source_name: &str,
    ) {
        for symbol in extract_candidates(text, &self.denylist) {
            let hits = mention_count(text, &symbol).max(1);
            let score = weight * hits as f64;
            let entry = accumulator
                .entry(symbol.clone())
                .or_insert_with(|| {
                    let mut t = ScoredTicker::new(symbol.clone(), source_name, 0.0);
                    t.mention_count = 0;
                    t
                });
            entry.total_score += score;
            *entry.source_scores.entry(source_name.to_string()).or_insert(0.0) += score;
            entry.mention_count += hits;
            if entry.sentiment == agent_core::SentimentHint::Neutral {
                entry.sentiment = sentiment_of(text);
            }
            if entry.contexts.len() < 5 {
                if let Some(snippet) = context_snippet(text, &symbol, 80) {
                    entry.contexts.push(snippet);
                }
            }
        }
    }
}

#[async_trait]
impl DiscoverySource for ForumSource {
    fn name(&self) -> &'static str {
        "forums"
    }

    async fn scan(&self) -> AgentResult<Vec<ScoredTicker>> {
        let mut threads: Vec<Thread> = Vec::new();

        // Priority forums contribute their stickied threads; trending forums
        // contribute the hot listing.
        for forum in &self.sources.priority_forums {
            match self.list_threads(forum, "hot").await {
                Ok(list) => threads.extend(list.into_iter().filter(|t| t.stickied)),
                Err(e) => tracing::warn!("priority forum {forum} unavailable: {e}"),
            }
        }
        for forum in &self.sources.trending_forums {
            match self.list_threads(forum, "hot").await {
                Ok(list) => threads.extend(list.into_iter().filter(|t| !t.stickied)),
                Err(e) => tracing::warn!("trending forum {forum} unavailable: {e}"),
            }
        }

        let relevant = self.filter_relevant(&threads).await;
        let mut accumulator: HashMap<String, ScoredTicker> = HashMap::new();
        let source_name = self.name();

        for index in relevant {
            let thread = &threads[index];
            self.score_text(&mut accumulator, &thread.title, TITLE_WEIGHT, source_name);

            match self.fetch_thread(thread).await {
                Ok((body, comments)) => {
                    self.score_text(&mut accumulator, &body, BODY_WEIGHT, source_name);
                    for comment in &comments {
                        self.score_text(&mut accumulator, comment, COMMENT_WEIGHT, source_name);
                    }
                }
                Err(e) => tracing::debug!("thread {} fetch failed: {e}", thread.id),
            }
        }

        // Validation is the expensive tail; only keep symbols that pass.
        let mut validated = Vec::new();
        for (symbol, ticker) in accumulator {
            match self.collector.validate_ticker(&symbol).await {
                Ok(true) => validated.push(ticker),
                Ok(false) => tracing::debug!("discovery dropped invalid symbol {symbol}"),
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
