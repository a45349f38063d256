//! Elasticsearch search index over its REST API
//!
//! Documents go through `/<index>/_bulk` as NDJSON `index` actions keyed by
//! film work id, so a write is a full replacement and replays are harmless.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::config::ElasticsearchConfig;
use crate::domain::{BulkFailure, BulkReport, FilmWork, SearchIndex};
use crate::error::{Result, SyncError};

/// Settings (`ru_en` analyzer) and strict mappings for the movies index
pub const MOVIES_INDEX_DEFINITION: &str = include_str!("../../resources/movies_index.json");

pub struct ElasticsearchIndex {
    client: Client,
    base_url: String,
    index: String,
}

impl ElasticsearchIndex {
    pub fn new(config: &ElasticsearchConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url(),
            index: config.index.clone(),
        })
    }

    fn index_url(&self) -> String {
        format!("{}/{}", self.base_url, self.index)
    }

    /// Create the index with the bundled definition if it does not exist
    ///
    /// Returns whether the index was created by this call.
    pub async fn ensure_index(&self) -> Result<bool> {
        let response = self.client.head(self.index_url()).send().await?;
        match response.status() {
            StatusCode::OK => {
                debug!("Index {} already exists", self.index);
                return Ok(false);
            }
            StatusCode::NOT_FOUND => {}
            status => {
                return Err(SyncError::index(
                    Some(status.as_u16()),
                    format!("unexpected status checking index {}", self.index),
                ))
            }
        }

        info!("Creating index {}", self.index);
        let response = self
            .client
            .put(self.index_url())
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(MOVIES_INDEX_DEFINITION)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            info!("Index {} created", self.index);
            return Ok(true);
        }

        let body = response.text().await.unwrap_or_default();
        if status == StatusCode::BAD_REQUEST && body.contains("resource_already_exists_exception") {
            warn!("Index {} was created concurrently", self.index);
            return Ok(false);
        }
        Err(SyncError::index(Some(status.as_u16()), body))
    }
}

/// NDJSON body: one `index` action line plus one source line per document
pub(crate) fn bulk_body(docs: &[FilmWork]) -> Result<String> {
    let mut body = String::new();
    for doc in docs {
        let action = serde_json::json!({ "index": { "_id": doc.id.to_string() } });
        body.push_str(&serde_json::to_string(&action)?);
        body.push('\n');
        body.push_str(&serde_json::to_string(doc)?);
        body.push('\n');
    }
    Ok(body)
}

#[derive(Debug, Deserialize)]
struct BulkResponse {
    errors: bool,
    #[serde(default)]
    items: Vec<HashMap<String, BulkItem>>,
}

#[derive(Debug, Deserialize)]
struct BulkItem {
    #[serde(rename = "_id", default)]
    id: Option<String>,
    status: u16,
    #[serde(default)]
    error: Option<BulkItemError>,
}

#[derive(Debug, Deserialize)]
struct BulkItemError {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    reason: Option<String>,
}

pub(crate) fn parse_bulk_response(raw: &str) -> Result<BulkReport> {
    let response: BulkResponse = serde_json::from_str(raw)?;
    let mut report = BulkReport::default();

    for item in response.items.into_iter().flat_map(|m| m.into_values()) {
        match (&item.error, item.status) {
            (None, 200..=299) => report.indexed += 1,
            (error, status) => report.failures.push(BulkFailure {
                id: item.id.clone().unwrap_or_default(),
                status,
                reason: match error {
                    Some(e) => match &e.reason {
                        Some(reason) => format!("{}: {}", e.kind, reason),
                        None => e.kind.clone(),
                    },
                    None => format!("status {}", status),
                },
            }),
        }
    }

    if response.errors && report.failures.is_empty() {
        report.failures.push(BulkFailure {
            id: String::new(),
            status: 0,
            reason: "bulk response flagged errors without failed items".to_string(),
        });
    }
    Ok(report)
}

#[async_trait]
impl SearchIndex for ElasticsearchIndex {
    async fn bulk_upsert(&self, docs: &[FilmWork]) -> Result<BulkReport> {
        if docs.is_empty() {
            return Ok(BulkReport::default());
        }

        let response = self
            .client
            .post(format!("{}/_bulk", self.index_url()))
            .header(reqwest::header::CONTENT_TYPE, "application/x-ndjson")
            .body(bulk_body(docs)?)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(SyncError::index(Some(status.as_u16()), body));
        }

        let report = parse_bulk_response(&body)?;
        if !report.is_complete() {
            warn!(
                "Bulk upsert into {}: {} indexed, {} failed",
                self.index,
                report.indexed,
                report.failures.len()
            );
        }
        Ok(report)
    }
}
