//! GDELT GEO 2.0 client

use anyhow::{bail, Context, Result};
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tracing::{info, warn};

use super::RawArticle;
use crate::config::IngestConfig;

pub struct GdeltClient {
    client: Client,
    config: IngestConfig,
}

impl GdeltClient {
    pub fn new(config: IngestConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { client, config })
    }

    /// Run the configured query and return its point features
    pub async fn fetch(&self) -> Result<Vec<RawArticle>> {
        info!("Querying GDELT for '{}' ({})", self.config.query, self.config.timespan);
        let max_records = self.config.max_records.to_string();
        let response = self
            .client
            .get(&self.config.endpoint)
            .query(&[
                ("query", self.config.query.as_str()),
                ("mode", self.config.mode.as_str()),
                ("timespan", self.config.timespan.as_str()),
                ("format", "geojson"),
                ("maxrecords", max_records.as_str()),
            ])
            .send()
            .await
            .context("Failed to reach GDELT")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("GDELT error ({}): {}", status, crate::truncate_safe(&body, 300));
        }

        let data: Value = response.json().await.context("GDELT returned invalid JSON")?;
        let articles = parse_features(&data, self.config.max_records);
        info!("GDELT returned {} articles", articles.len());
        Ok(articles)
    }
}

/// Map GeoJSON features to raw entries, keeping at most `limit`
pub fn parse_features(data: &Value, limit: usize) -> Vec<RawArticle> {
    let Some(features) = data.get("features").and_then(|f| f.as_array()) else {
        warn!("GDELT response has no features");
        return Vec::new();
    };

    features
        .iter()
        .take(limit)
        .map(|feature| {
            let props = feature.get("properties").cloned().unwrap_or(Value::Null);
            let text = |key: &str| props.get(key).and_then(|v| v.as_str()).map(str::to_string);
            RawArticle {
                url: text("url"),
                title: text("title"),
                name: text("name"),
                count: props.get("count").cloned(),
                shareimage: text("shareimage"),
                html: text("html").unwrap_or_default(),
                geometry: feature.get("geometry").cloned(),
            }
        })
        .collect()
}
