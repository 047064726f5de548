// Copyright Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Attribution cannot be removed

// Raw feed record -> StationRecord.
//
// Attribute names differ between operators and feed variants, so every field is
// resolved through an ordered alias list and the first hit wins.

use crate::facilities;
use crate::geo_utils::BoundingBox;
use crate::station::{StationKind, StationRecord, is_sentinel};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};

const ID_ALIASES: &[&str] = &["owl:sameAs", "@id", "id", "stationId", "stopId"];

const COORDINATE_ALIASES: &[(&str, &str)] = &[
    ("geo:long", "geo:lat"),
    ("lon", "lat"),
    ("longitude", "latitude"),
    ("lng", "lat"),
];

const NESTED_LOCATION_KEYS: &[&str] = &["location", "position", "coordinates", "geometry"];

const LOCALISED_NAME_ALIASES: &[&str] = &[
    "odpt:stationTitle",
    "odpt:busstopPoleTitle",
    "title",
    "name",
];

const PLAIN_NAME_ALIASES: &[&str] = &["dc:title", "title", "name"];

const LINE_ALIASES: &[&str] = &[
    "odpt:railway",
    "odpt:busroutePattern",
    "lines",
    "lineIds",
    "line_ids",
];

const OPERATOR_ALIASES: &[&str] = &["odpt:operator", "operator"];

const STATION_CODE_ALIASES: &[&str] = &["odpt:stationCode", "stationCode", "code"];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Rejection {
    MissingId,
    /// Only bus stops are rejected for this; stations get the sentinel instead.
    MissingCoordinates,
    OutsideBoundingBox,
}

#[derive(Clone, Debug)]
pub struct FeedNormalizer {
    bbox: Option<BoundingBox>,
    secondary_locale: String,
}

impl FeedNormalizer {
    pub fn new(bbox: Option<BoundingBox>, secondary_locale: impl Into<String>) -> Self {
        Self {
            bbox,
            secondary_locale: secondary_locale.into(),
        }
    }

    /// `batch_operator` is used when the record does not name its own operator.
    pub fn normalize(
        &self,
        raw: &Value,
        kind: StationKind,
        batch_operator: Option<&str>,
    ) -> Result<StationRecord, Rejection> {
        let obj = raw.as_object().ok_or(Rejection::MissingId)?;

        let id = first_string(obj, ID_ALIASES).ok_or(Rejection::MissingId)?;

        let (lon, lat) = match resolve_coordinates(obj, 0) {
            Some((lon, lat)) if !is_sentinel(lon, lat) => {
                if let Some(bbox) = &self.bbox {
                    if !bbox.contains_point(lon, lat) {
                        return Err(Rejection::OutsideBoundingBox);
                    }
                }
                (lon, lat)
            }
            _ => match kind {
                StationKind::BusStop => return Err(Rejection::MissingCoordinates),
                StationKind::Station => (0.0, 0.0),
            },
        };

        let name = self.resolve_names(obj, &id);

        let mut line_ids = BTreeSet::new();
        for alias in LINE_ALIASES {
            match obj.get(*alias) {
                Some(Value::String(s)) if !s.is_empty() => {
                    line_ids.insert(s.clone());
                }
                Some(Value::Array(items)) => {
                    line_ids.extend(
                        items
                            .iter()
                            .filter_map(|v| v.as_str())
                            .filter(|s| !s.is_empty())
                            .map(|s| s.to_string()),
                    );
                }
                _ => {}
            }
        }

        let mut metadata = Map::new();

        let operator = first_string_or_first_in_array(obj, OPERATOR_ALIASES)
            .or_else(|| batch_operator.map(|s| s.to_string()));
        if let Some(operator) = operator {
            metadata.insert("operator".to_string(), Value::String(operator));
        }

        if let Some(code) = first_string(obj, STATION_CODE_ALIASES) {
            metadata.insert("station_code".to_string(), Value::String(code));
        }

        if let Some(flags) = facilities::extract_flags(obj) {
            if let Ok(value) = serde_json::to_value(flags) {
                metadata.insert(facilities::METADATA_KEY.to_string(), value);
            }
        }

        Ok(StationRecord {
            id,
            name,
            kind,
            city_id: None,
            lon,
            lat,
            line_ids,
            metadata,
            is_hub: false,
            parent_hub_id: None,
        })
    }

    fn resolve_names(&self, obj: &Map<String, Value>, id: &str) -> BTreeMap<String, String> {
        let mut names: BTreeMap<String, String> = BTreeMap::new();

        if let Some(localised) = LOCALISED_NAME_ALIASES
            .iter()
            .find_map(|alias| obj.get(*alias).and_then(|v| v.as_object()))
        {
            for (locale, value) in localised {
                if let Some(s) = value.as_str().map(str::trim).filter(|s| !s.is_empty()) {
                    names.insert(locale.clone(), s.to_string());
                }
            }
        }

        let plain = first_string(obj, PLAIN_NAME_ALIASES);

        if !names.contains_key(&self.secondary_locale) {
            let fallback = plain.or_else(|| names.values().next().cloned());
            if let Some(fallback) = fallback {
                names.insert(self.secondary_locale.clone(), fallback);
            }
        }

        if !names.contains_key("en") {
            if let Some(segment) = id.rsplit('.').next().filter(|s| !s.is_empty()) {
                names.insert("en".to_string(), segment.to_string());
            }
        }

        if !names.contains_key(&self.secondary_locale) {
            if let Some(en) = names.get("en").cloned() {
                names.insert(self.secondary_locale.clone(), en);
            }
        }

        names
    }
}

fn first_string(obj: &Map<String, Value>, aliases: &[&str]) -> Option<String> {
    aliases.iter().find_map(|alias| {
        obj.get(*alias)
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string())
    })
}

fn first_string_or_first_in_array(obj: &Map<String, Value>, aliases: &[&str]) -> Option<String> {
    first_string(obj, aliases).or_else(|| {
        aliases.iter().find_map(|alias| {
            obj.get(*alias)
                .and_then(|v| v.as_array())
                .and_then(|items| items.iter().find_map(|v| v.as_str()))
                .map(|s| s.to_string())
        })
    })
}

fn coerce_f64(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;

    n.is_finite().then_some(n)
}

/// Flat aliases first, then nested location-style objects. GeoJSON style
/// `[lon, lat]` arrays are accepted inside the nested keys.
fn resolve_coordinates(obj: &Map<String, Value>, depth: usize) -> Option<(f64, f64)> {
    for (lon_key, lat_key) in COORDINATE_ALIASES {
        if let (Some(lon), Some(lat)) = (
            obj.get(*lon_key).and_then(coerce_f64),
            obj.get(*lat_key).and_then(coerce_f64),
        ) {
            return Some((lon, lat));
        }
    }

    if depth >= 2 {
        return None;
    }

    for key in NESTED_LOCATION_KEYS {
        match obj.get(*key) {
            Some(Value::Object(nested)) => {
                if let Some(found) = resolve_coordinates(nested, depth + 1) {
                    return Some(found);
                }
            }
            Some(Value::Array(pair)) if pair.len() >= 2 => {
                if let (Some(lon), Some(lat)) = (coerce_f64(&pair[0]), coerce_f64(&pair[1])) {
                    return Some((lon, lat));
                }
            }
            _ => {}
        }
    }

    None
}
