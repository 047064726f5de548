// Copyright Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Attribution cannot be removed

// Spatial clustering inside one name group.
//
// Records are addressed by their index in the caller's record arena; clusters
// hold indices, never references, so hub assignment can mutate the arena
// afterwards without fighting the borrow checker.
//
// Greedy is the default and is an approximation: each record joins the first
// cluster whose running centroid is within the radius, so the result depends on
// iteration order and a drifting centroid can chain records whose endpoints are
// further apart than the radius. ConnectedComponents is a union-find over all
// pairwise distances and gives an order-independent single-linkage partition.

use crate::city::CityAssigner;
use crate::geo_utils::haversine_distance;
use crate::station::StationRecord;
use tracing::debug;

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ClusterStrategy {
    #[default]
    Greedy,
    ConnectedComponents,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct Centroid {
    pub lon: f64,
    pub lat: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Cluster {
    /// indices into the record arena
    pub members: Vec<usize>,
    pub centroid: Centroid,
}

#[derive(Clone, Debug)]
pub struct SpatialClusterer<'a> {
    radius_m: f64,
    strategy: ClusterStrategy,
    cities: &'a CityAssigner,
}

impl<'a> SpatialClusterer<'a> {
    pub fn new(radius_m: f64, strategy: ClusterStrategy, cities: &'a CityAssigner) -> Self {
        Self {
            radius_m,
            strategy,
            cities,
        }
    }

    /// Clusters the records at `group` (indices into `records`).
    ///
    /// Members without a location receive the group centroid and its city before
    /// clustering. If nobody in the group has a location, nothing is clustered and
    /// the members are left at the sentinel for the pipeline to drop.
    pub fn cluster_group(&self, records: &mut [StationRecord], group: &[usize]) -> Vec<Cluster> {
        if let Some(centroid) = group_centroid(records, group) {
            let city = self.cities.assign(centroid.lon, centroid.lat);

            for &idx in group {
                let record = &mut records[idx];
                if !record.has_known_location() {
                    record.lon = centroid.lon;
                    record.lat = centroid.lat;
                    record.city_id = city.map(|c| c.to_string());
                }
            }
        }

        let mut order: Vec<usize> = group
            .iter()
            .copied()
            .filter(|&idx| records[idx].has_known_location())
            .collect();

        order.sort_by(|&a, &b| {
            let (ra, rb) = (&records[a], &records[b]);
            ra.lon
                .total_cmp(&rb.lon)
                .then(ra.lat.total_cmp(&rb.lat))
                .then_with(|| ra.id.cmp(&rb.id))
        });

        let clusters = match self.strategy {
            ClusterStrategy::Greedy => self.greedy(records, &order),
            ClusterStrategy::ConnectedComponents => self.connected_components(records, &order),
        };

        debug!(
            "clustered {} records into {} clusters",
            order.len(),
            clusters.len()
        );

        clusters
    }

    fn greedy(&self, records: &[StationRecord], order: &[usize]) -> Vec<Cluster> {
        let mut clusters: Vec<Cluster> = Vec::new();

        for &idx in order {
            let (lon, lat) = (records[idx].lon, records[idx].lat);

            let target = clusters.iter().position(|cluster| {
                haversine_distance(cluster.centroid.lon, cluster.centroid.lat, lon, lat)
                    <= self.radius_m
            });

            match target {
                Some(pos) => {
                    let cluster = &mut clusters[pos];
                    cluster.members.push(idx);
                    let n = cluster.members.len() as f64;
                    cluster.centroid.lon = (cluster.centroid.lon * (n - 1.0) + lon) / n;
                    cluster.centroid.lat = (cluster.centroid.lat * (n - 1.0) + lat) / n;
                }
                None => clusters.push(Cluster {
                    members: vec![idx],
                    centroid: Centroid { lon, lat },
                }),
            }
        }

        clusters
    }

    fn connected_components(&self, records: &[StationRecord], order: &[usize]) -> Vec<Cluster> {
        let mut sets = DisjointSet::new(order.len());

        for i in 0..order.len() {
            for j in (i + 1)..order.len() {
                let (a, b) = (&records[order[i]], &records[order[j]]);
                if haversine_distance(a.lon, a.lat, b.lon, b.lat) <= self.radius_m {
                    sets.union(i, j);
                }
            }
        }

        // components come out in order of their first member, which keeps the
        // output stable for a given input
        let mut root_to_cluster: Vec<Option<usize>> = vec![None; order.len()];
        let mut clusters: Vec<Cluster> = Vec::new();

        for (i, &idx) in order.iter().enumerate() {
            let root = sets.find(i);
            match root_to_cluster[root] {
                Some(pos) => clusters[pos].members.push(idx),
                None => {
                    root_to_cluster[root] = Some(clusters.len());
                    clusters.push(Cluster {
                        members: vec![idx],
                        centroid: Centroid { lon: 0.0, lat: 0.0 },
                    });
                }
            }
        }

        for cluster in &mut clusters {
            let n = cluster.members.len() as f64;
            cluster.centroid = Centroid {
                lon: cluster.members.iter().map(|&i| records[i].lon).sum::<f64>() / n,
                lat: cluster.members.iter().map(|&i| records[i].lat).sum::<f64>() / n,
            };
        }

        clusters
    }
}

/// Arithmetic mean of the members that already have a location.
pub fn group_centroid(records: &[StationRecord], group: &[usize]) -> Option<Centroid> {
    let known: Vec<&StationRecord> = group
        .iter()
        .map(|&idx| &records[idx])
        .filter(|r| r.has_known_location())
        .collect();

    if known.is_empty() {
        return None;
    }

    let n = known.len() as f64;
    Some(Centroid {
        lon: known.iter().map(|r| r.lon).sum::<f64>() / n,
        lat: known.iter().map(|r| r.lat).sum::<f64>() / n,
    })
}

struct DisjointSet {
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl DisjointSet {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
            rank: vec![0; n],
        }
    }

    fn find(&mut self, x: usize) -> usize {
        let mut root = x;
        while self.parent[root] != root {
            root = self.parent[root];
        }

        let mut current = x;
        while self.parent[current] != root {
            let next = self.parent[current];
            self.parent[current] = root;
            current = next;
        }

        root
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra == rb {
            return;
        }

        match self.rank[ra].cmp(&self.rank[rb]) {
            std::cmp::Ordering::Less => self.parent[ra] = rb,
            std::cmp::Ordering::Greater => self.parent[rb] = ra,
            std::cmp::Ordering::Equal => {
                self.parent[rb] = ra;
                self.rank[ra] += 1;
            }
        }
    }
}
