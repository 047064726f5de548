// Copyright Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Attribution cannot be removed

// Full-scope resynchronisation of the canonical node set.
//
// Spokes reference hubs by id, so the order is fixed: stale spokes go first,
// then stale hubs, then hubs are upserted before spokes. Stores that can run
// the whole sequence in one transaction should (see `pg_store`); the ordering
// alone keeps dangling references from appearing between steps otherwise.

use crate::station::{StationKind, StationRecord};
use serde_json::Value;
use std::future::Future;
use thiserror::Error;
use tracing::{info, warn};

pub const DEFAULT_SPOKE_CHUNK_SIZE: usize = 500;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct NodeRow {
    pub id: String,
    pub city_id: String,
    pub name: Value,
    pub kind: StationKind,
    pub lon: f64,
    pub lat: f64,
    pub is_hub: bool,
    pub parent_hub_id: Option<String>,
    pub line_ids: Vec<String>,
    pub metadata: Value,
    pub source_tag: String,
}

impl NodeRow {
    /// None for records that never got a city; those are not persisted.
    pub fn from_record(record: &StationRecord, source_tag: &str) -> Option<NodeRow> {
        Some(NodeRow {
            id: record.id.clone(),
            city_id: record.city_id.clone()?,
            name: serde_json::to_value(&record.name).unwrap_or(Value::Null),
            kind: record.kind,
            lon: record.lon,
            lat: record.lat,
            is_hub: record.is_hub,
            parent_hub_id: record.parent_hub_id.clone(),
            line_ids: record.line_ids.iter().cloned().collect(),
            metadata: Value::Object(record.metadata.clone()),
            source_tag: source_tag.to_string(),
        })
    }

    pub fn is_spoke(&self) -> bool {
        self.parent_hub_id.is_some()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct FacilityRow {
    pub node_id: String,
    pub city_id: String,
    pub kind: StationKind,
    pub name: Value,
    pub has_elevator: Option<bool>,
    pub has_escalator: Option<bool>,
    pub has_toilet: Option<bool>,
    pub wheelchair_accessible: Option<bool>,
    pub source_tag: String,
}

/// What a reconciliation run deletes and replaces.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Scope {
    /// None replaces every city for this kind and source
    pub city_id: Option<String>,
    pub kind: StationKind,
    pub source_tag: String,
}

impl Scope {
    pub fn matches(&self, city_id: &str, kind: StationKind, source_tag: &str) -> bool {
        self.kind == kind
            && self.source_tag == source_tag
            && self.city_id.as_deref().is_none_or(|c| c == city_id)
    }

    pub fn matches_node(&self, row: &NodeRow) -> bool {
        self.matches(&row.city_id, row.kind, &row.source_tag)
    }

    pub fn matches_facility(&self, row: &FacilityRow) -> bool {
        self.matches(&row.city_id, row.kind, &row.source_tag)
    }
}

#[derive(Error, Debug)]
pub enum WriteError {
    /// The destination table or schema does not exist yet.
    #[error("destination not provisioned: {0}")]
    NotProvisioned(String),
    #[error("store error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum WriteOutcome {
    Applied {
        deleted: usize,
        nodes: usize,
        facilities: usize,
    },
    NotApplied {
        reason: String,
    },
}

impl WriteOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, WriteOutcome::Applied { .. })
    }
}

/// Destination of the canonical node graph. Implementations know the storage
/// engine; nothing upstream of this trait does.
pub trait NodeStore {
    /// Removes the persisted rows of `scope`, in this order: facilities of the
    /// scope, spokes whose hub is a persisted hub of the scope or one of
    /// `incoming_hub_ids`, then the hub/root rows of the scope.
    /// Returns the number of node rows deleted.
    fn delete_stale(
        &mut self,
        scope: &Scope,
        incoming_hub_ids: &[String],
    ) -> impl Future<Output = Result<usize, WriteError>> + Send;

    /// Insert-or-replace keyed by node id.
    fn upsert_nodes(
        &mut self,
        rows: &[NodeRow],
    ) -> impl Future<Output = Result<usize, WriteError>> + Send;

    /// Insert-or-replace keyed by node id.
    fn upsert_facilities(
        &mut self,
        rows: &[FacilityRow],
    ) -> impl Future<Output = Result<usize, WriteError>> + Send;
}

/// Rows ready for one write scope.
#[derive(Clone, Debug, PartialEq)]
pub struct ScopedRows {
    pub scope: Scope,
    pub nodes: Vec<NodeRow>,
    pub facilities: Vec<FacilityRow>,
}

#[derive(Clone, Copy, Debug)]
pub struct ReconciliationWriter {
    chunk_size: usize,
}

impl Default for ReconciliationWriter {
    fn default() -> Self {
        Self::new(DEFAULT_SPOKE_CHUNK_SIZE)
    }
}

impl ReconciliationWriter {
    /// `chunk_size` bounds the rows of every upsert statement.
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
        }
    }

    /// Runs the full sequence and propagates every error, including
    /// `NotProvisioned`. Transactional stores call this inside their
    /// transaction so that any error rolls the whole scope back.
    pub async fn apply<S: NodeStore>(
        &self,
        store: &mut S,
        scope: &Scope,
        nodes: &[NodeRow],
        facilities: &[FacilityRow],
    ) -> Result<WriteOutcome, WriteError> {
        let (hubs, spokes): (Vec<NodeRow>, Vec<NodeRow>) =
            nodes.iter().cloned().partition(|row| !row.is_spoke());

        let hub_ids: Vec<String> = hubs.iter().map(|row| row.id.clone()).collect();

        let deleted = store.delete_stale(scope, &hub_ids).await?;

        // every hub batch lands before the first spoke batch
        let mut written = 0;
        for chunk in hubs.chunks(self.chunk_size) {
            written += store.upsert_nodes(chunk).await?;
        }

        for chunk in spokes.chunks(self.chunk_size) {
            written += store.upsert_nodes(chunk).await?;
        }

        let mut facilities_written = 0;
        for chunk in facilities.chunks(self.chunk_size) {
            facilities_written += store.upsert_facilities(chunk).await?;
        }

        info!(
            "reconciled scope {:?}: deleted {}, wrote {} nodes ({} hubs/roots, {} spokes), {} facilities",
            scope,
            deleted,
            written,
            hubs.len(),
            spokes.len(),
            facilities_written
        );

        Ok(WriteOutcome::Applied {
            deleted,
            nodes: written,
            facilities: facilities_written,
        })
    }

    /// `apply` for each scope in turn, stopping at the first error. Run inside
    /// one transaction this makes a multi-kind run all or nothing.
    pub async fn apply_all<S: NodeStore>(
        &self,
        store: &mut S,
        scopes: &[ScopedRows],
    ) -> Result<Vec<WriteOutcome>, WriteError> {
        let mut outcomes = Vec::with_capacity(scopes.len());

        for rows in scopes {
            outcomes.push(
                self.apply(store, &rows.scope, &rows.nodes, &rows.facilities)
                    .await?,
            );
        }

        Ok(outcomes)
    }

    /// `apply` with the not-provisioned case turned into a soft no-op.
    pub async fn write<S: NodeStore>(
        &self,
        store: &mut S,
        scope: &Scope,
        nodes: &[NodeRow],
        facilities: &[FacilityRow],
    ) -> Result<WriteOutcome, WriteError> {
        soften(self.apply(store, scope, nodes, facilities).await)
    }

    /// `apply_all` with the not-provisioned case turned into a single
    /// `NotApplied` outcome.
    pub async fn write_all<S: NodeStore>(
        &self,
        store: &mut S,
        scopes: &[ScopedRows],
    ) -> Result<Vec<WriteOutcome>, WriteError> {
        soften_all(self.apply_all(store, scopes).await)
    }
}

pub fn soften(result: Result<WriteOutcome, WriteError>) -> Result<WriteOutcome, WriteError> {
    match result {
        Err(WriteError::NotProvisioned(reason)) => {
            warn!("destination not provisioned, skipping write: {}", reason);
            Ok(WriteOutcome::NotApplied { reason })
        }
        other => other,
    }
}

pub fn soften_all(
    result: Result<Vec<WriteOutcome>, WriteError>,
) -> Result<Vec<WriteOutcome>, WriteError> {
    match result {
        Err(WriteError::NotProvisioned(reason)) => {
            warn!("destination not provisioned, skipping write: {}", reason);
            Ok(vec![WriteOutcome::NotApplied { reason }])
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_store::InMemoryNodeStore;
    use serde_json::json;

    fn row(id: &str, city: &str, parent: Option<&str>) -> NodeRow {
        NodeRow {
            id: id.to_string(),
            city_id: city.to_string(),
            name: json!({ "en": id }),
            kind: StationKind::Station,
            lon: 139.7,
            lat: 35.69,
            is_hub: false,
            parent_hub_id: parent.map(|p| p.to_string()),
            line_ids: vec![],
            metadata: json!({}),
            source_tag: "odpt".to_string(),
        }
    }

    fn hub(id: &str, city: &str) -> NodeRow {
        NodeRow {
            is_hub: true,
            ..row(id, city, None)
        }
    }

    fn scope(city: Option<&str>) -> Scope {
        Scope {
            city_id: city.map(|c| c.to_string()),
            kind: StationKind::Station,
            source_tag: "odpt".to_string(),
        }
    }

    #[test]
    fn test_scope_matching() {
        let tokyo = scope(Some("tokyo"));
        assert!(tokyo.matches("tokyo", StationKind::Station, "odpt"));
        assert!(!tokyo.matches("yokohama", StationKind::Station, "odpt"));
        assert!(!tokyo.matches("tokyo", StationKind::BusStop, "odpt"));
        assert!(!tokyo.matches("tokyo", StationKind::Station, "gtfs"));
        assert!(scope(None).matches("yokohama", StationKind::Station, "odpt"));
    }

    #[tokio::test]
    async fn test_hubs_are_written_before_spokes_in_chunks() {
        let mut store = InMemoryNodeStore::default();
        let nodes = vec![
            row("s1", "tokyo", Some("h1")),
            row("s2", "tokyo", Some("h1")),
            row("s3", "tokyo", Some("h1")),
            hub("h1", "tokyo"),
            row("lonely", "tokyo", None),
        ];

        let outcome = ReconciliationWriter::new(2)
            .write(&mut store, &scope(Some("tokyo")), &nodes, &[])
            .await
            .unwrap();

        assert_eq!(
            outcome,
            WriteOutcome::Applied {
                deleted: 0,
                nodes: 5,
                facilities: 0
            }
        );
        assert_eq!(
            store.operations(),
            &[
                "delete_stale".to_string(),
                "upsert_nodes:h1,lonely".to_string(),
                "upsert_nodes:s1,s2".to_string(),
                "upsert_nodes:s3".to_string(),
            ]
        );

        let mut store = InMemoryNodeStore::default();
        let mut nodes = nodes;
        nodes.push(row("lonely2", "tokyo", None));
        ReconciliationWriter::new(2)
            .write(&mut store, &scope(Some("tokyo")), &nodes, &[])
            .await
            .unwrap();
        assert_eq!(
            store.operations(),
            &[
                "delete_stale".to_string(),
                "upsert_nodes:h1,lonely".to_string(),
                "upsert_nodes:lonely2".to_string(),
                "upsert_nodes:s1,s2".to_string(),
                "upsert_nodes:s3".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_large_root_scope_is_written_in_bounded_batches() {
        let mut store = InMemoryNodeStore::default();
        let nodes: Vec<NodeRow> = (0..10_000)
            .map(|i| NodeRow {
                kind: StationKind::BusStop,
                ..row(&format!("odpt.BusstopPole:Toei.Stop.{:05}", i), "tokyo", None)
            })
            .collect();
        let bus_scope = Scope {
            kind: StationKind::BusStop,
            ..scope(Some("tokyo"))
        };

        let outcome = ReconciliationWriter::new(500)
            .write(&mut store, &bus_scope, &nodes, &[])
            .await
            .unwrap();

        let batch_sizes: Vec<usize> = store
            .operations()
            .iter()
            .filter_map(|op| op.strip_prefix("upsert_nodes:"))
            .map(|ids| ids.split(',').count())
            .collect();

        assert_eq!(batch_sizes.len(), 20);
        assert!(batch_sizes.iter().all(|&n| n <= 500), "{:?}", batch_sizes);
        assert_eq!(
            outcome,
            WriteOutcome::Applied {
                deleted: 0,
                nodes: 10_000,
                facilities: 0
            }
        );
        assert_eq!(store.nodes().len(), 10_000);
    }

    #[tokio::test]
    async fn test_write_all_covers_every_scope() {
        let mut store = InMemoryNodeStore::default();
        let bus_stop = NodeRow {
            kind: StationKind::BusStop,
            ..row("stop", "tokyo", None)
        };
        let scopes = vec![
            ScopedRows {
                scope: scope(None),
                nodes: vec![hub("h", "tokyo"), row("s", "tokyo", Some("h"))],
                facilities: vec![],
            },
            ScopedRows {
                scope: Scope {
                    kind: StationKind::BusStop,
                    ..scope(None)
                },
                nodes: vec![bus_stop],
                facilities: vec![],
            },
        ];

        let outcomes = ReconciliationWriter::default()
            .write_all(&mut store, &scopes)
            .await
            .unwrap();

        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.iter().all(|o| o.is_applied()));
        assert_eq!(store.nodes().len(), 3);

        let outcomes = ReconciliationWriter::default()
            .write_all(&mut InMemoryNodeStore::unprovisioned(), &scopes)
            .await
            .unwrap();
        assert_eq!(outcomes.len(), 1);
        assert!(!outcomes[0].is_applied());
    }

    #[tokio::test]
    async fn test_apply_all_stops_at_first_failure() {
        let mut store = InMemoryNodeStore::default().failing_upserts();
        let scopes = vec![ScopedRows {
            scope: scope(None),
            nodes: vec![hub("h", "tokyo")],
            facilities: vec![],
        }];
        let result = ReconciliationWriter::default()
            .apply_all(&mut store, &scopes)
            .await;
        assert!(matches!(result, Err(WriteError::Backend(_))));
    }

    #[tokio::test]
    async fn test_stale_rows_in_scope_are_replaced() {
        let mut store = InMemoryNodeStore::default();
        let writer = ReconciliationWriter::default();

        let first = vec![
            hub("old_hub", "tokyo"),
            row("old_spoke", "tokyo", Some("old_hub")),
            row("yokohama_stop", "yokohama", None),
        ];
        writer
            .write(&mut store, &scope(None), &first, &[])
            .await
            .unwrap();
        assert_eq!(store.nodes().len(), 3);

        let second = vec![hub("new_hub", "tokyo"), row("new_spoke", "tokyo", Some("new_hub"))];
        let outcome = writer
            .write(&mut store, &scope(Some("tokyo")), &second, &[])
            .await
            .unwrap();

        assert_eq!(
            outcome,
            WriteOutcome::Applied {
                deleted: 2,
                nodes: 2,
                facilities: 0
            }
        );
        let ids: Vec<&str> = store.nodes().keys().map(|s| s.as_str()).collect();
        assert_eq!(ids, vec!["new_hub", "new_spoke", "yokohama_stop"]);
    }

    #[tokio::test]
    async fn test_not_provisioned_is_soft() {
        let mut store = InMemoryNodeStore::unprovisioned();
        let outcome = ReconciliationWriter::default()
            .write(&mut store, &scope(None), &[hub("h", "tokyo")], &[])
            .await
            .unwrap();
        assert!(!outcome.is_applied());
    }

    #[tokio::test]
    async fn test_other_errors_propagate() {
        let mut store = InMemoryNodeStore::default().failing_upserts();
        let result = ReconciliationWriter::default()
            .write(&mut store, &scope(None), &[hub("h", "tokyo")], &[])
            .await;
        assert!(matches!(result, Err(WriteError::Backend(_))));
    }
}
