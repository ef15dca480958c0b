//! Catalog polling source: replays documents of newly recorded runs.
//!
//! Where no live stream is available, documents are recovered from a catalog
//! service after the fact. The poller asks the catalog for its run count at a
//! fixed period, diffs it against the previous poll, and fetches + enqueues
//! the documents of every newly observed run, in catalog order.
//!
//! The first successful poll only baselines the count: runs recorded before
//! the relay came up are not replayed. A failed poll is logged and retried on
//! the next tick; the adapter owns this retry policy, the relay never sees
//! it.

use serde::Deserialize;
use serde_json::Value;
use std::ops::Range;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::document::{Document, DocumentKind};
use crate::error::{RelayError, RelayResult};
use crate::relay::DocumentSender;

#[derive(Debug, Deserialize)]
struct RunCountResponse {
    count: usize,
}

/// Pull-delivery adapter over a catalog service's HTTP API.
#[derive(Debug, Clone)]
pub struct CatalogSource {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    poll_period: Duration,
}

impl CatalogSource {
    /// Create a poller for the given catalog URL and API key.
    pub fn new(
        base_url: &str,
        api_key: &str,
        poll_period: Duration,
        timeout: Duration,
    ) -> RelayResult<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            poll_period,
        })
    }

    /// Poll until the relay's queue closes.
    pub async fn run(self, sender: DocumentSender) -> RelayResult<()> {
        let mut seen: Option<usize> = None;
        let mut ticker = tokio::time::interval(self.poll_period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            url = %self.base_url,
            period = ?self.poll_period,
            "polling catalog for new runs"
        );

        loop {
            ticker.tick().await;
            match self.poll(&mut seen, &sender).await {
                Ok(true) => {}
                Ok(false) => {
                    info!("relay queue closed, ending catalog polling");
                    return Ok(());
                }
                Err(error) => {
                    warn!(%error, "catalog poll failed, retrying on the next tick");
                }
            }
        }
    }

    /// One poll cycle. Returns `Ok(false)` once the relay's queue is closed.
    async fn poll(&self, seen: &mut Option<usize>, sender: &DocumentSender) -> RelayResult<bool> {
        let total = self.run_count().await?;
        let fresh = newly_observed(*seen, total);
        if seen.is_none() {
            info!(total, "connected to catalog, baselined run count");
        }
        *seen = Some(total);

        for index in fresh {
            debug!(index, "replaying documents of newly observed run");
            for document in self.run_documents(index).await? {
                if sender.send(document).is_err() {
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    /// `GET {base}/runs`: number of runs the catalog currently holds.
    async fn run_count(&self) -> RelayResult<usize> {
        let response = self
            .http
            .get(format!("{}/runs", self.base_url))
            .header(reqwest::header::AUTHORIZATION, format!("Apikey {}", self.api_key))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RelayError::Api { status, body });
        }
        let body: RunCountResponse = response.json().await?;
        Ok(body.count)
    }

    /// `GET {base}/runs/{index}/documents`: the `[kind, payload]` pairs of
    /// one run, in emission order.
    async fn run_documents(&self, index: usize) -> RelayResult<Vec<Document>> {
        let response = self
            .http
            .get(format!("{}/runs/{}/documents", self.base_url, index))
            .header(reqwest::header::AUTHORIZATION, format!("Apikey {}", self.api_key))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RelayError::Api { status, body });
        }
        let pairs: Vec<(String, Value)> = response.json().await?;
        decode_run(pairs)
    }
}

/// The range of run indexes that appeared since the previous poll.
///
/// With no previous poll the current count is the baseline and nothing is
/// replayed. A shrinking catalog (runs deleted) also replays nothing; the
/// lower count becomes the new baseline.
fn newly_observed(previous: Option<usize>, total: usize) -> Range<usize> {
    match previous {
        Some(count) if count <= total => count..total,
        _ => total..total,
    }
}

fn decode_run(pairs: Vec<(String, Value)>) -> RelayResult<Vec<Document>> {
    pairs
        .into_iter()
        .map(|(name, payload)| {
            let kind = DocumentKind::parse(&name).ok_or(RelayError::UnknownKind(name))?;
            Ok(Document::from_parts(kind, payload)?)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_first_poll_baselines() {
        assert_eq!(newly_observed(None, 7), 7..7);
    }

    #[test]
    fn test_growth_is_replayed() {
        assert_eq!(newly_observed(Some(7), 9), 7..9);
    }

    #[test]
    fn test_shrinking_catalog_rebaselines() {
        assert!(newly_observed(Some(9), 4).is_empty());
    }

    #[test]
    fn test_decode_run_preserves_order() {
        let pairs = vec![
            ("start".to_string(), json!({"uid": "a1", "time": 1.0})),
            (
                "descriptor".to_string(),
                json!({"uid": "d1", "time": 2.0, "run_start": "a1"}),
            ),
            (
                "stop".to_string(),
                json!({"uid": "s1", "time": 3.0, "run_start": "a1"}),
            ),
        ];
        let documents = decode_run(pairs).expect("decode");
        let kinds: Vec<DocumentKind> = documents.iter().map(Document::kind).collect();
        assert_eq!(
            kinds,
            vec![
                DocumentKind::RunStart,
                DocumentKind::EventDescriptor,
                DocumentKind::RunStop,
            ]
        );
    }

    #[test]
    fn test_decode_run_rejects_unknown_kind() {
        let pairs = vec![("telemetry".to_string(), json!({}))];
        assert!(matches!(
            decode_run(pairs),
            Err(RelayError::UnknownKind(_))
        ));
    }
}
