// Copyright Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Attribution cannot be removed

use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum StationKind {
    Station,
    BusStop,
}

impl StationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StationKind::Station => "station",
            StationKind::BusStop => "bus_stop",
        }
    }
}

impl fmt::Display for StationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for StationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "station" => Ok(StationKind::Station),
            "bus_stop" | "busstop" | "bus-stop" => Ok(StationKind::BusStop),
            _ => Err(format!(
                "Unknown station kind: '{}'. Valid options: station, bus_stop",
                s
            )),
        }
    }
}

/// One station or stop as published by a single operator, after normalisation.
///
/// `(0.0, 0.0)` in `lon`/`lat` means the location is not known yet and has to be
/// inferred from same-named records during merging.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct StationRecord {
    pub id: String,
    /// locale -> display name
    pub name: BTreeMap<String, String>,
    pub kind: StationKind,
    pub city_id: Option<String>,
    pub lon: f64,
    pub lat: f64,
    pub line_ids: BTreeSet<String>,
    pub metadata: Map<String, Value>,
    pub is_hub: bool,
    pub parent_hub_id: Option<String>,
}

impl StationRecord {
    pub fn has_known_location(&self) -> bool {
        !is_sentinel(self.lon, self.lat)
    }

    pub fn operator(&self) -> Option<&str> {
        self.metadata.get("operator").and_then(|v| v.as_str())
    }

    pub fn is_spoke(&self) -> bool {
        self.parent_hub_id.is_some()
    }
}

pub fn is_sentinel(lon: f64, lat: f64) -> bool {
    lon == 0.0 && lat == 0.0
}
