//! HTTP ownership feed.
//!
//! Expects `GET {base_url}/contests/{contest_id}/ownership` to return:
//!
//! ```json
//! { "total_entries": 150000, "players": { "p1": 23.4, "p2": 4.1 } }
//! ```
//!
//! Auth (optional): `Authorization: Bearer {key}`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

use super::{OwnershipFetch, OwnershipSource};
use crate::types::{clamp_percent, ContestId, TrackerError, TrackerResult};

const SOURCE_NAME: &str = "http";

// ---------------------------------------------------------------------------
// API response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct OwnershipResponse {
    #[serde(default)]
    total_entries: u64,
    #[serde(default)]
    players: HashMap<String, f64>,
}

impl OwnershipResponse {
    fn into_fetch(self) -> OwnershipFetch {
        let ownership = self
            .players
            .into_iter()
            .filter(|(_, pct)| pct.is_finite())
            .map(|(player, pct)| (player, clamp_percent(pct)))
            .collect();
        OwnershipFetch {
            ownership,
            total_entries: self.total_entries,
        }
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct HttpOwnershipSource {
    http: Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpOwnershipSource {
    pub fn new(base_url: &str, api_key: Option<String>, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent("ownership-tracker/0.1.0")
            .build()
            .context("Failed to build HTTP client for ownership source")?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    fn ownership_url(&self, contest_id: &str) -> String {
        format!(
            "{}/contests/{}/ownership",
            self.base_url,
            urlencoding::encode(contest_id)
        )
    }
}

#[async_trait]
impl OwnershipSource for HttpOwnershipSource {
    async fn fetch_ownership(&self, contest_id: &ContestId) -> TrackerResult<OwnershipFetch> {
        let url = self.ownership_url(contest_id);
        let fetch_err = |message: String| TrackerError::SourceFetch {
            contest_id: contest_id.clone(),
            message,
        };

        debug!(url = %url, "Fetching contest ownership");

        let mut req = self.http.get(&url);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| fetch_err(format!("request failed: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(fetch_err(format!("HTTP {status}: {body}")));
        }

        let parsed: OwnershipResponse = resp
            .json()
            .await
            .map_err(|e| fetch_err(format!("invalid response body: {e}")))?;

        Ok(parsed.into_fetch())
    }

    fn name(&self) -> &str {
        SOURCE_NAME
    }
}
