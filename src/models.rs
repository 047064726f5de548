// Copyright Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Attribution cannot be removed

use crate::WGS_84_SRID;
use crate::reconcile::{FacilityRow, NodeRow};
use diesel::prelude::*;
use serde_json::Value;

#[derive(Queryable, Selectable, Insertable, Debug, Clone)]
#[diesel(table_name = crate::schema::interchange::nodes)]
pub struct Node {
    pub id: String,
    pub city_id: String,
    pub name: Value,
    pub kind: String,
    pub point: postgis_diesel::types::Point,
    pub is_hub: bool,
    pub parent_hub_id: Option<String>,
    pub line_ids: Vec<Option<String>>,
    pub metadata: Value,
    pub source_tag: String,
}

impl From<&NodeRow> for Node {
    fn from(row: &NodeRow) -> Self {
        Node {
            id: row.id.clone(),
            city_id: row.city_id.clone(),
            name: row.name.clone(),
            kind: row.kind.as_str().to_string(),
            point: postgis_diesel::types::Point::new(row.lon, row.lat, Some(WGS_84_SRID)),
            is_hub: row.is_hub,
            parent_hub_id: row.parent_hub_id.clone(),
            line_ids: row.line_ids.iter().map(|x| Some(x.clone())).collect(),
            metadata: row.metadata.clone(),
            source_tag: row.source_tag.clone(),
        }
    }
}

#[derive(Queryable, Selectable, Insertable, Debug, Clone)]
#[diesel(table_name = crate::schema::interchange::facilities)]
pub struct Facility {
    pub node_id: String,
    pub city_id: String,
    pub kind: String,
    pub name: Value,
    pub has_elevator: Option<bool>,
    pub has_escalator: Option<bool>,
    pub has_toilet: Option<bool>,
    pub wheelchair_accessible: Option<bool>,
    pub source_tag: String,
}

impl From<&FacilityRow> for Facility {
    fn from(row: &FacilityRow) -> Self {
        Facility {
            node_id: row.node_id.clone(),
            city_id: row.city_id.clone(),
            kind: row.kind.as_str().to_string(),
            name: row.name.clone(),
            has_elevator: row.has_elevator,
            has_escalator: row.has_escalator,
            has_toilet: row.has_toilet,
            wheelchair_accessible: row.wheelchair_accessible,
            source_tag: row.source_tag.clone(),
        }
    }
}
