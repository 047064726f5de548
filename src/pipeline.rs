// Copyright Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Attribution cannot be removed

// normalize -> dedupe -> first city pass -> group by (kind, name key) ->
// cluster -> hub selection -> final city pass -> filter -> rows

use crate::city::{CityAssigner, RegionDefinition};
use crate::clustering::{ClusterStrategy, SpatialClusterer};
use crate::facilities::facility_row;
use crate::geo_utils::BoundingBox;
use crate::hub_selection::HubSelector;
use crate::name_key::{DEFAULT_PREFIX_TOKENS, DEFAULT_SUFFIX_TOKENS, NameKeyGenerator};
use crate::normalize::{FeedNormalizer, Rejection};
use crate::reconcile::{
    FacilityRow, NodeRow, NodeStore, ReconciliationWriter, Scope, ScopedRows, WriteError,
    WriteOutcome,
};
use crate::source::FeedBatch;
use crate::station::{StationKind, StationRecord};
use ahash::{AHashMap, AHashSet};
use itertools::Itertools;
use serde_json::Value;
use std::collections::BTreeSet;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info, warn};

pub const DEFAULT_MERGE_RADIUS_M: f64 = 300.0;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Records with known coordinates outside this box are rejected.
    pub bbox: Option<BoundingBox>,
    /// Keep only records assigned to this city. Also narrows the write scope.
    pub target_city: Option<String>,
    pub merge: bool,
    pub merge_radius_m: f64,
    pub include_spokes: bool,
    /// Operator ids, highest priority first.
    pub operator_priority: Vec<String>,
    /// Tested in order; the first containing region wins.
    pub regions: Vec<RegionDefinition>,
    pub cluster_strategy: ClusterStrategy,
    pub locale_order: Vec<String>,
    pub secondary_locale: String,
    pub suffix_tokens: Vec<String>,
    pub prefix_tokens: Vec<String>,
    pub spoke_chunk_size: usize,
    pub source_tag: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            bbox: None,
            target_city: None,
            merge: true,
            merge_radius_m: DEFAULT_MERGE_RADIUS_M,
            include_spokes: true,
            operator_priority: vec![],
            regions: vec![],
            cluster_strategy: ClusterStrategy::Greedy,
            locale_order: vec!["ja".to_string(), "en".to_string()],
            secondary_locale: "ja".to_string(),
            suffix_tokens: DEFAULT_SUFFIX_TOKENS.iter().map(|s| s.to_string()).collect(),
            prefix_tokens: DEFAULT_PREFIX_TOKENS.iter().map(|s| s.to_string()).collect(),
            spoke_chunk_size: crate::reconcile::DEFAULT_SPOKE_CHUNK_SIZE,
            source_tag: "odpt".to_string(),
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("could not read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

impl PipelineConfig {
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let config: PipelineConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.merge_radius_m.is_finite() || self.merge_radius_m <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "merge_radius_m must be a positive number, got {}",
                self.merge_radius_m
            )));
        }

        if self.spoke_chunk_size == 0 {
            return Err(ConfigError::Invalid(
                "spoke_chunk_size must be at least 1".to_string(),
            ));
        }

        if let Some(bbox) = &self.bbox {
            if bbox.west > bbox.east || bbox.south > bbox.north {
                return Err(ConfigError::Invalid(format!("inverted bbox {:?}", bbox)));
            }
        }

        for region in &self.regions {
            if region.exterior.len() < 3 {
                return Err(ConfigError::Invalid(format!(
                    "region {} needs at least three exterior points",
                    region.city_id
                )));
            }
        }

        if self.source_tag.is_empty() {
            return Err(ConfigError::Invalid("source_tag is empty".to_string()));
        }

        Ok(())
    }

    /// Write scope for one kind of node.
    pub fn scope(&self, kind: StationKind) -> Scope {
        Scope {
            city_id: self.target_city.clone(),
            kind,
            source_tag: self.source_tag.clone(),
        }
    }
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("spoke {spoke} references {hub}, which is not a hub in this batch")]
    DanglingHubReference { spoke: String, hub: String },
    #[error(transparent)]
    Write(#[from] WriteError),
}

#[derive(Clone, Debug, Default, Serialize, PartialEq, Eq)]
pub struct DroppedCounts {
    pub missing_id: usize,
    pub missing_coordinates: usize,
    pub outside_bbox: usize,
    pub duplicate_id: usize,
    pub no_city: usize,
    pub unresolved_location: usize,
    pub outside_target_city: usize,
}

impl DroppedCounts {
    pub fn total(&self) -> usize {
        self.missing_id
            + self.missing_coordinates
            + self.outside_bbox
            + self.duplicate_id
            + self.no_city
            + self.unresolved_location
            + self.outside_target_city
    }

    fn reject(&mut self, rejection: Rejection) {
        match rejection {
            Rejection::MissingId => self.missing_id += 1,
            Rejection::MissingCoordinates => self.missing_coordinates += 1,
            Rejection::OutsideBoundingBox => self.outside_bbox += 1,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, PartialEq, Eq)]
pub struct RunSummary {
    pub fetched: usize,
    /// records that survived normalisation and the bounding box
    pub within_region: usize,
    /// spokes in the kept output
    pub merged_into_hubs: usize,
    pub hubs: usize,
    pub omitted_spokes: usize,
    pub dropped: DroppedCounts,
    pub persisted_nodes: usize,
    pub persisted_facilities: usize,
    pub deleted_nodes: usize,
    pub failed_sources: usize,
    pub applied: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub not_applied_reason: Option<String>,
}

impl RunSummary {
    /// Folds one scope's write result in. The run counts as applied only if
    /// every scope was.
    pub fn record_write(&mut self, outcome: &WriteOutcome) {
        match outcome {
            WriteOutcome::Applied {
                deleted,
                nodes,
                facilities,
            } => {
                self.deleted_nodes += deleted;
                self.persisted_nodes += nodes;
                self.persisted_facilities += facilities;
                if self.not_applied_reason.is_none() {
                    self.applied = true;
                }
            }
            WriteOutcome::NotApplied { reason } => {
                self.applied = false;
                self.not_applied_reason = Some(reason.clone());
            }
        }
    }
}

#[derive(Clone, Debug)]
pub struct PipelineOutput {
    pub records: Vec<StationRecord>,
    pub nodes: Vec<NodeRow>,
    pub facilities: Vec<FacilityRow>,
    /// kinds that had at least one fetched record; each is resynchronised
    pub kinds: BTreeSet<StationKind>,
    pub summary: RunSummary,
}

impl PipelineOutput {
    pub fn scoped_rows(&self, config: &PipelineConfig) -> Vec<ScopedRows> {
        self.kinds
            .iter()
            .map(|&kind| ScopedRows {
                scope: config.scope(kind),
                nodes: self
                    .nodes
                    .iter()
                    .filter(|row| row.kind == kind)
                    .cloned()
                    .collect(),
                facilities: self
                    .facilities
                    .iter()
                    .filter(|row| row.kind == kind)
                    .cloned()
                    .collect(),
            })
            .collect()
    }
}

/// Every spoke must point at a hub of the same batch.
pub fn validate_hub_references(records: &[StationRecord]) -> Result<(), PipelineError> {
    let hubs: AHashSet<&str> = records
        .iter()
        .filter(|r| r.is_hub)
        .map(|r| r.id.as_str())
        .collect();

    for record in records {
        if let Some(parent) = &record.parent_hub_id {
            if !hubs.contains(parent.as_str()) {
                return Err(PipelineError::DanglingHubReference {
                    spoke: record.id.clone(),
                    hub: parent.clone(),
                });
            }
        }
    }

    Ok(())
}

pub struct Pipeline {
    config: PipelineConfig,
    normalizer: FeedNormalizer,
    keys: NameKeyGenerator,
    cities: CityAssigner,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        Ok(Self {
            normalizer: FeedNormalizer::new(config.bbox, config.secondary_locale.clone()),
            keys: NameKeyGenerator::new(
                config.locale_order.clone(),
                config.suffix_tokens.clone(),
                config.prefix_tokens.clone(),
            ),
            cities: CityAssigner::from_definitions(&config.regions),
            config,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn writer(&self) -> ReconciliationWriter {
        ReconciliationWriter::new(self.config.spoke_chunk_size)
    }

    pub fn run(&self, batches: &[FeedBatch]) -> Result<PipelineOutput, PipelineError> {
        let mut summary = RunSummary::default();
        let mut kinds = BTreeSet::new();

        let mut records = self.normalize_batches(batches, &mut summary, &mut kinds);
        summary.within_region = records.len();

        for record in records.iter_mut().filter(|r| r.has_known_location()) {
            record.city_id = self.cities.assign(record.lon, record.lat).map(String::from);
        }

        if self.config.merge {
            self.merge(&mut records);
        }

        for record in records
            .iter_mut()
            .filter(|r| r.city_id.is_none() && r.has_known_location())
        {
            record.city_id = self.cities.assign(record.lon, record.lat).map(String::from);
        }

        let mut kept = Vec::with_capacity(records.len());

        for record in records {
            if !record.has_known_location() {
                summary.dropped.unresolved_location += 1;
                continue;
            }

            let Some(city_id) = record.city_id.as_deref() else {
                summary.dropped.no_city += 1;
                continue;
            };

            if let Some(target) = &self.config.target_city {
                if city_id != target {
                    summary.dropped.outside_target_city += 1;
                    continue;
                }
            }

            if record.is_spoke() && !self.config.include_spokes {
                summary.omitted_spokes += 1;
                continue;
            }

            kept.push(record);
        }

        validate_hub_references(&kept)?;

        summary.hubs = kept.iter().filter(|r| r.is_hub).count();
        summary.merged_into_hubs = kept.iter().filter(|r| r.is_spoke()).count();

        let nodes: Vec<NodeRow> = kept
            .iter()
            .filter_map(|r| NodeRow::from_record(r, &self.config.source_tag))
            .collect();

        let facilities: Vec<FacilityRow> = kept
            .iter()
            .filter_map(|r| facility_row(r, &self.config.source_tag))
            .collect();

        info!(
            "pipeline kept {} of {} fetched records ({} hubs, {} spokes, {} dropped)",
            kept.len(),
            summary.fetched,
            summary.hubs,
            summary.merged_into_hubs,
            summary.dropped.total()
        );

        Ok(PipelineOutput {
            records: kept,
            nodes,
            facilities,
            kinds,
            summary,
        })
    }

    fn normalize_batches(
        &self,
        batches: &[FeedBatch],
        summary: &mut RunSummary,
        kinds: &mut BTreeSet<StationKind>,
    ) -> Vec<StationRecord> {
        let mut records = Vec::new();
        let mut seen: AHashSet<String> = AHashSet::new();

        for batch in batches {
            summary.fetched += batch.records.len();
            if !batch.records.is_empty() {
                kinds.insert(batch.kind);
            }

            for raw in &batch.records {
                match self
                    .normalizer
                    .normalize(raw, batch.kind, Some(&batch.operator))
                {
                    Ok(mut record) => {
                        // a multi-row upsert cannot touch the same id twice
                        if !seen.insert(record.id.clone()) {
                            debug!("duplicate id {} from {}", record.id, batch.operator);
                            summary.dropped.duplicate_id += 1;
                            continue;
                        }

                        record.metadata.insert(
                            "source_tag".to_string(),
                            Value::String(self.config.source_tag.clone()),
                        );
                        records.push(record);
                    }
                    Err(rejection) => summary.dropped.reject(rejection),
                }
            }
        }

        records
    }

    fn merge(&self, records: &mut [StationRecord]) {
        let mut groups: AHashMap<(StationKind, String), Vec<usize>> = AHashMap::new();

        for (idx, record) in records.iter().enumerate() {
            match self.keys.key_for(&record.name) {
                Some(key) => groups.entry((record.kind, key)).or_default().push(idx),
                None => warn!("{} has no usable name, it will not be merged", record.id),
            }
        }

        let clusterer = SpatialClusterer::new(
            self.config.merge_radius_m,
            self.config.cluster_strategy,
            &self.cities,
        );
        let selector = HubSelector::new(&self.config.operator_priority, &self.cities);

        let mut hub_count = 0;

        for (_, group) in groups.into_iter().sorted_by(|a, b| a.0.cmp(&b.0)) {
            for cluster in clusterer.cluster_group(records, &group) {
                if selector.assign(records, &cluster).is_some() {
                    hub_count += 1;
                }
            }
        }

        debug!("selected {} hubs", hub_count);
    }

    /// Writes every scope through `store` and folds the outcomes into
    /// `summary`.
    pub async fn write_to_store<S: NodeStore>(
        &self,
        store: &mut S,
        output: &PipelineOutput,
        summary: &mut RunSummary,
    ) -> Result<(), WriteError> {
        let outcomes = self
            .writer()
            .write_all(store, &output.scoped_rows(&self.config))
            .await?;

        for outcome in &outcomes {
            summary.record_write(outcome);
        }

        Ok(())
    }
}

/// One-shot convenience over `Pipeline::new` + `Pipeline::run`.
pub fn run_pipeline(
    batches: &[FeedBatch],
    config: &PipelineConfig,
) -> Result<PipelineOutput, PipelineError> {
    Pipeline::new(config.clone())?.run(batches)
}
