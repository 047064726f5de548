// Copyright Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Attribution cannot be removed

// Feed fetch phase. Every (operator, kind) pair is an independent source; a
// source that fails contributes nothing and the run carries on.

use crate::station::StationKind;
use futures::StreamExt;
use serde_json::Value;
use std::future::Future;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{info, warn};

/// Raw records of one operator and kind, as fetched.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct FeedBatch {
    pub operator: String,
    pub kind: StationKind,
    pub records: Vec<Value>,
}

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("could not read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid json in {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("expected a json array of records in {0}")]
    NotAnArray(String),
    #[error("fetch of {0} timed out")]
    Timeout(String),
}

pub trait FeedSource {
    fn operator(&self) -> &str;

    fn kind(&self) -> StationKind;

    fn fetch(&self) -> impl Future<Output = Result<Vec<Value>, SourceError>> + Send;
}

#[derive(Debug, Default)]
pub struct FetchResult {
    pub batches: Vec<FeedBatch>,
    pub failed_sources: usize,
}

/// Fetches all sources with at most `parallelism` requests in flight.
/// Batches come back sorted by (operator, kind) regardless of completion order.
pub async fn fetch_all<S>(sources: &[S], parallelism: usize) -> FetchResult
where
    S: FeedSource + Sync,
{
    let results: Vec<(String, StationKind, Result<Vec<Value>, SourceError>)> =
        futures::stream::iter(sources.iter().map(|source| async move {
            let result = source.fetch().await;
            (source.operator().to_string(), source.kind(), result)
        }))
        .buffer_unordered(parallelism.max(1))
        .collect()
        .await;

    let mut fetch_result = FetchResult::default();

    for (operator, kind, result) in results {
        match result {
            Ok(records) => {
                info!("fetched {} {} records for {}", records.len(), kind, operator);
                fetch_result.batches.push(FeedBatch {
                    operator,
                    kind,
                    records,
                });
            }
            Err(e) => {
                warn!("source {} ({}) failed: {}", operator, kind, e);
                fetch_result.failed_sources += 1;
            }
        }
    }

    fetch_result
        .batches
        .sort_by(|a, b| a.operator.cmp(&b.operator).then(a.kind.cmp(&b.kind)));

    fetch_result
}

/// Reads `{dir}/{operator}__{kind}.json`, a json array of raw records.
#[derive(Clone, Debug)]
pub struct FileFeedSource {
    pub dir: PathBuf,
    pub operator: String,
    pub kind: StationKind,
    pub timeout: Option<std::time::Duration>,
}

impl FileFeedSource {
    pub fn path(&self) -> PathBuf {
        self.dir
            .join(format!("{}__{}.json", self.operator, self.kind.as_str()))
    }

    async fn read(&self) -> Result<Vec<Value>, SourceError> {
        let path = self.path();
        let display = path.display().to_string();

        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|source| SourceError::Io {
                path: display.clone(),
                source,
            })?;

        let value: Value = serde_json::from_slice(&bytes).map_err(|source| SourceError::Json {
            path: display.clone(),
            source,
        })?;

        match value {
            Value::Array(records) => Ok(records),
            _ => Err(SourceError::NotAnArray(display)),
        }
    }
}

impl FeedSource for FileFeedSource {
    fn operator(&self) -> &str {
        &self.operator
    }

    fn kind(&self) -> StationKind {
        self.kind
    }

    async fn fetch(&self) -> Result<Vec<Value>, SourceError> {
        match self.timeout {
            Some(timeout) => tokio::time::timeout(timeout, self.read())
                .await
                .map_err(|_| SourceError::Timeout(self.path().display().to_string()))?,
            None => self.read().await,
        }
    }
}
