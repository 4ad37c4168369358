use agent_core::{AgentError, AgentResult};
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;

/// Video metadata from a channel search, before transcript download.
#[derive(Debug, Clone)]
pub struct VideoMeta {
    pub video_id: String,
    pub title: String,
    pub channel: String,
    pub published_at: DateTime<Utc>,
}

/// Two-tier transcript adapter: the fast public timedtext API first, then a
/// configurable fallback extractor sidecar for videos it cannot serve.
#[derive(Clone)]
pub struct TranscriptClient {
    client: Client,
    api_key: Option<String>,
    fallback_url: Option<String>,
}

impl TranscriptClient {
    pub fn new(timeout_secs: u64) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            api_key: std::env::var("YOUTUBE_API_KEY").ok(),
            fallback_url: std::env::var("TRANSCRIPT_EXTRACTOR_URL").ok(),
        }
    }

    /// Videos published by a channel after `published_after`.
    pub async fn channel_videos(
        &self,
        channel_id: &str,
        published_after: DateTime<Utc>,
    ) -> AgentResult<Vec<VideoMeta>> {
        let api_key = self.api_key.as_deref().ok_or_else(|| AgentError::Collector {
            step: "transcripts".to_string(),
            message: "YOUTUBE_API_KEY not configured".to_string(),
        })?;
        let url = format!(
            "https://www.googleapis.com/youtube/v3/search?part=snippet&channelId={}&order=date\
             &type=video&maxResults=10&publishedAfter={}&key={}",
            channel_id,
            published_after.to_rfc3339(),
            api_key
        );
        let value: Value = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| collector_err(e.to_string()))?
            .json()
            .await
            .map_err(|e| collector_err(e.to_string()))?;

        let items = value
            .get("items")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        Ok(items
            .iter()
            .filter_map(|item| {
                let video_id = item
                    .pointer("/id/videoId")
                    .and_then(Value::as_str)?
                    .to_string();
                let snippet = item.get("snippet")?;
                Some(VideoMeta {
                    video_id,
                    title: snippet.get("title").and_then(Value::as_str)?.to_string(),
                    channel: snippet
                        .get("channelTitle")
                        .and_then(Value::as_str)
                        .unwrap_or("")
                        .to_string(),
                    published_at: snippet
                        .get("publishedAt")
                        .and_then(Value::as_str)
                        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                        .map(|dt| dt.with_timezone(&Utc))
                        .unwrap_or_else(Utc::now),
                })
            })
            .collect())
    }

    /// Full transcript text for a video. Tier 1 is the public timedtext API;
    /// tier 2 is the extractor sidecar, when configured.
    pub async fn fetch_transcript(&self, video_id: &str) -> AgentResult<String> {
        match self.fetch_timedtext(video_id).await {
            Ok(text) if !text.trim().is_empty() => return Ok(text),
            Ok(_) => tracing::debug!("timedtext empty for {video_id}, trying fallback"),
            Err(e) => tracing::debug!("timedtext failed for {video_id}: {e}"),
        }
        self.fetch_via_extractor(video_id).await
    }

    async fn fetch_timedtext(&self, video_id: &str) -> AgentResult<String> {
        let url = format!(
            "https://video.google.com/timedtext?lang=en&v={video_id}&fmt=json3"
        );
        let value: Value = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| collector_err(e.to_string()))?
            .json()
            .await
            .map_err(|e| collector_err(e.to_string()))?;

        let events = value
            .get("events")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let mut text = String::new();
        for event in &events {
            if let Some(segs) = event.get("segs").and_then(Value::as_array) {
                for seg in segs {
                    if let Some(fragment) = seg.get("utf8").and_then(Value::as_str) {
                        text.push_str(fragment);
                    }
                }
                text.push(' ');
            }
        }
        Ok(text)
    }

    async fn fetch_via_extractor(&self, video_id: &str) -> AgentResult<String> {
        let base = self.fallback_url.as_deref().ok_or_else(|| {
            collector_err(format!("no captions for {video_id} and no fallback extractor"))
        })?;
        let url = format!("{}/transcript/{}", base.trim_end_matches('/'), video_id);
        let value: Value = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| collector_err(e.to_string()))?
            .json()
            .await
            .map_err(|e| collector_err(e.to_string()))?;

        value
            .get("text")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| collector_err(format!("extractor returned no text for {video_id}")))
    }
}

fn collector_err(message: String) -> AgentError {
    AgentError::Collector {
        step: "transcripts".to_string(),
        message,
    }
}
