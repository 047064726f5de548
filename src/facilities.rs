// Copyright Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Attribution cannot be removed

// Facility flags published alongside station records. Flags are lifted out of
// the raw record during normalisation and parked under `metadata.facilities`,
// so they follow the record through merging and only become facility rows once
// the record is known to be kept.

use crate::reconcile::FacilityRow;
use crate::station::StationRecord;
use serde_json::{Map, Value};

const ELEVATOR_ALIASES: &[&str] = &["hasElevator", "has_elevator", "elevator"];
const ESCALATOR_ALIASES: &[&str] = &["hasEscalator", "has_escalator", "escalator"];
const TOILET_ALIASES: &[&str] = &["hasToilet", "has_toilet", "toilet", "toilets"];
const WHEELCHAIR_ALIASES: &[&str] = &[
    "wheelchairAccessible",
    "wheelchair_accessible",
    "barrierFree",
    "barrier_free",
    "wheelchair",
];

pub const METADATA_KEY: &str = "facilities";

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FacilityFlags {
    pub has_elevator: Option<bool>,
    pub has_escalator: Option<bool>,
    pub has_toilet: Option<bool>,
    pub wheelchair_accessible: Option<bool>,
}

impl FacilityFlags {
    pub fn is_empty(&self) -> bool {
        self.has_elevator.is_none()
            && self.has_escalator.is_none()
            && self.has_toilet.is_none()
            && self.wheelchair_accessible.is_none()
    }
}

/// Reads whatever facility flags the raw record carries, either at the top
/// level or inside a nested `facilities` object.
pub fn extract_flags(raw: &Map<String, Value>) -> Option<FacilityFlags> {
    let nested = raw.get(METADATA_KEY).and_then(|v| v.as_object());

    let lookup = |aliases: &[&str]| {
        aliases
            .iter()
            .find_map(|alias| raw.get(*alias).and_then(coerce_flag))
            .or_else(|| {
                nested.and_then(|n| aliases.iter().find_map(|alias| n.get(*alias).and_then(coerce_flag)))
            })
    };

    let flags = FacilityFlags {
        has_elevator: lookup(ELEVATOR_ALIASES),
        has_escalator: lookup(ESCALATOR_ALIASES),
        has_toilet: lookup(TOILET_ALIASES),
        wheelchair_accessible: lookup(WHEELCHAIR_ALIASES),
    };

    match flags.is_empty() {
        true => None,
        false => Some(flags),
    }
}

fn coerce_flag(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_i64().map(|n| n != 0),
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "yes" | "1" | "available" => Some(true),
            "false" | "no" | "0" | "unavailable" => Some(false),
            _ => None,
        },
        // a non-empty list of elevator/toilet descriptions means the facility exists
        Value::Array(items) => Some(!items.is_empty()),
        _ => None,
    }
}

/// Builds the facility row for a kept record, if it carried any flags.
pub fn facility_row(record: &StationRecord, source_tag: &str) -> Option<FacilityRow> {
    let flags: FacilityFlags = record
        .metadata
        .get(METADATA_KEY)
        .and_then(|v| serde_json::from_value(v.clone()).ok())?;

    if flags.is_empty() {
        return None;
    }

    Some(FacilityRow {
        node_id: record.id.clone(),
        city_id: record.city_id.clone()?,
        kind: record.kind,
        name: serde_json::to_value(&record.name).unwrap_or(Value::Null),
        has_elevator: flags.has_elevator,
        has_escalator: flags.has_escalator,
        has_toilet: flags.has_toilet,
        wheelchair_accessible: flags.wheelchair_accessible,
        source_tag: source_tag.to_string(),
    })
}
