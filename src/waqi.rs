use std::time::Duration;

use anyhow::{Context as _, Result, anyhow, bail};
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;

use crate::ranking::RankEntry;

pub const WAQI_SOURCE: &str = "WAQI";

pub const DEFAULT_WAQI_URL: &str = "https://api.waqi.info/feed/here/";

/// Client for the World Air Quality Index "feed" endpoint, used as the
/// reference reading in the ranking.
#[derive(Debug, Clone)]
pub struct WaqiClient {
    client: Client,
    url: String,
    token: String,
}

#[derive(Debug, Deserialize)]
pub struct FeedResponse {
    pub status: String,

    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Deserialize)]
struct FeedData {
    aqi: Value,

    #[serde(default)]
    city: Option<FeedCity>,

    #[serde(default)]
    time: Option<FeedTime>,
}

#[derive(Debug, Deserialize)]
struct FeedCity {
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FeedTime {
    iso: Option<String>,
}

impl WaqiClient {
    pub fn new(url: impl Into<String>, token: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build WAQI HTTP client")?;

        Ok(Self {
            client,
            url: url.into(),
            token: token.into(),
        })
    }

    pub async fn fetch_reference(&self) -> Result<RankEntry> {
        let response = self
            .client
            .get(&self.url)
            .query(&[("token", self.token.as_str())])
            .send()
            .await
            .context("WAQI request failed")?;

        let status = response.status();
        if !status.is_success() {
            bail!("WAQI returned {status}");
        }

        let feed = response
            .json::<FeedResponse>()
            .await
            .context("failed to decode WAQI response")?;

        parse_feed(feed, Utc::now())
    }
}

/// Turns a WAQI feed document into a ranking entry. `fetched_at` stands in
/// when the feed carries no observation time.
pub fn parse_feed(feed: FeedResponse, fetched_at: DateTime<Utc>) -> Result<RankEntry> {
    if feed.status != "ok" {
        let message = match &feed.data {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        bail!("WAQI status {}: {message}", feed.status);
    }

    let data: FeedData =
        serde_json::from_value(feed.data).context("unexpected WAQI data payload")?;

    let value = data
        .aqi
        .as_f64()
        .ok_or_else(|| anyhow!("WAQI aqi is not a number: {}", data.aqi))?;

    let timestamp = data
        .time
        .and_then(|t| t.iso)
        .unwrap_or_else(|| fetched_at.to_rfc3339_opts(SecondsFormat::Secs, true));

    Ok(RankEntry {
        source: WAQI_SOURCE.to_string(),
        timestamp,
        value,
        location: data.city.and_then(|c| c.name),
    })
}
