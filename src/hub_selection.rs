// Copyright Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Attribution cannot be removed

use crate::city::CityAssigner;
use crate::clustering::Cluster;
use crate::station::StationRecord;
use std::cmp::Ordering;
use std::collections::BTreeSet;

/// Picks the canonical hub of a cluster and demotes everyone else to spokes.
#[derive(Clone, Debug)]
pub struct HubSelector<'a> {
    operator_priority: &'a [String],
    cities: &'a CityAssigner,
}

impl<'a> HubSelector<'a> {
    pub fn new(operator_priority: &'a [String], cities: &'a CityAssigner) -> Self {
        Self {
            operator_priority,
            cities,
        }
    }

    /// Position in the priority list; unlisted operators rank after all listed ones.
    /// Entries match either the full operator id ("odpt.Operator:JR-East") or
    /// its short form ("JR-East").
    pub fn operator_rank(&self, operator: Option<&str>) -> usize {
        let Some(operator) = operator else {
            return self.operator_priority.len();
        };
        let short = operator.rsplit(':').next().unwrap_or(operator);

        self.operator_priority
            .iter()
            .position(|entry| entry == operator || entry == short)
            .unwrap_or(self.operator_priority.len())
    }

    fn compare(&self, a: &StationRecord, b: &StationRecord) -> Ordering {
        self.operator_rank(a.operator())
            .cmp(&self.operator_rank(b.operator()))
            .then_with(|| a.id.cmp(&b.id))
    }

    /// Mutates the cluster members in place and returns the arena index of the
    /// hub. Singletons are left alone and yield None.
    pub fn assign(&self, records: &mut [StationRecord], cluster: &Cluster) -> Option<usize> {
        if cluster.members.len() < 2 {
            return None;
        }

        let hub_idx = *cluster
            .members
            .iter()
            .min_by(|&&a, &&b| self.compare(&records[a], &records[b]))?;

        let hub_id = records[hub_idx].id.clone();

        let line_ids: BTreeSet<String> = cluster
            .members
            .iter()
            .flat_map(|&idx| records[idx].line_ids.iter().cloned())
            .collect();

        let city_id = self
            .cities
            .assign(cluster.centroid.lon, cluster.centroid.lat)
            .map(|c| c.to_string())
            .or_else(|| records[hub_idx].city_id.clone());

        for &idx in &cluster.members {
            let record = &mut records[idx];
            record.lon = cluster.centroid.lon;
            record.lat = cluster.centroid.lat;
            record.city_id = city_id.clone();

            if idx == hub_idx {
                record.is_hub = true;
                record.parent_hub_id = None;
                record.line_ids = line_ids.clone();
            } else {
                record.is_hub = false;
                record.parent_hub_id = Some(hub_id.clone());
            }
        }

        Some(hub_idx)
    }
}
