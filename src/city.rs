// Copyright Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Attribution cannot be removed

// City assignment by point-in-polygon lookup.
//
// Regions are tested in list order and the first polygon containing the point
// wins. Overlapping regions are therefore resolved by list order, which is the
// intended tie-break rather than an accident of iteration.

use geo::{LineString, Polygon};

/// Region as it appears in configuration files: rings of `[lon, lat]` pairs.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RegionDefinition {
    pub city_id: String,
    pub exterior: Vec<[f64; 2]>,
    #[serde(default)]
    pub holes: Vec<Vec<[f64; 2]>>,
}

#[derive(Clone, Debug)]
pub struct CityRegion {
    pub city_id: String,
    pub polygon: Polygon<f64>,
}

impl From<&RegionDefinition> for CityRegion {
    fn from(def: &RegionDefinition) -> Self {
        let ring = |points: &Vec<[f64; 2]>| {
            LineString::from(points.iter().map(|p| (p[0], p[1])).collect::<Vec<_>>())
        };

        CityRegion {
            city_id: def.city_id.clone(),
            polygon: Polygon::new(ring(&def.exterior), def.holes.iter().map(ring).collect()),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct CityAssigner {
    regions: Vec<CityRegion>,
}

impl CityAssigner {
    pub fn new(regions: Vec<CityRegion>) -> Self {
        Self { regions }
    }

    pub fn from_definitions(definitions: &[RegionDefinition]) -> Self {
        Self::new(definitions.iter().map(CityRegion::from).collect())
    }

    pub fn assign(&self, lon: f64, lat: f64) -> Option<&str> {
        self.regions
            .iter()
            .find(|region| polygon_contains(&region.polygon, lon, lat))
            .map(|region| region.city_id.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }
}

/// Even-odd ray casting across the exterior and every hole, so a point inside a
/// hole crosses an even number of edges and counts as outside.
fn polygon_contains(polygon: &Polygon<f64>, lon: f64, lat: f64) -> bool {
    let mut inside = false;

    for ring in std::iter::once(polygon.exterior()).chain(polygon.interiors().iter()) {
        if ray_crossings(ring, lon, lat) % 2 == 1 {
            inside = !inside;
        }
    }

    inside
}

fn ray_crossings(ring: &LineString<f64>, x: f64, y: f64) -> usize {
    let points = &ring.0;
    if points.len() < 3 {
        return 0;
    }

    let mut crossings = 0;
    let mut j = points.len() - 1;

    for i in 0..points.len() {
        let (xi, yi) = (points[i].x, points[i].y);
        let (xj, yj) = (points[j].x, points[j].y);

        if (yi > y) != (yj > y) && x < (xj - xi) * (y - yi) / (yj - yi) + xi {
            crossings += 1;
        }

        j = i;
    }

    crossings
}
