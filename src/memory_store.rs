// Copyright Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Attribution cannot be removed

// In-process NodeStore. Backs `juniper --dry-run` and the reconciliation tests.

use crate::reconcile::{FacilityRow, NodeRow, NodeStore, Scope, WriteError};
use ahash::AHashSet;
use std::collections::BTreeMap;

#[derive(Clone, Debug)]
pub struct InMemoryNodeStore {
    nodes: BTreeMap<String, NodeRow>,
    facilities: BTreeMap<String, FacilityRow>,
    provisioned: bool,
    fail_upserts: bool,
    operations: Vec<String>,
}

impl Default for InMemoryNodeStore {
    fn default() -> Self {
        Self {
            nodes: BTreeMap::new(),
            facilities: BTreeMap::new(),
            provisioned: true,
            fail_upserts: false,
            operations: Vec::new(),
        }
    }
}

impl InMemoryNodeStore {
    /// Behaves like a database whose tables were never created.
    pub fn unprovisioned() -> Self {
        Self {
            provisioned: false,
            ..Self::default()
        }
    }

    /// Every upsert fails with a backend error.
    pub fn failing_upserts(mut self) -> Self {
        self.fail_upserts = true;
        self
    }

    pub fn nodes(&self) -> &BTreeMap<String, NodeRow> {
        &self.nodes
    }

    pub fn facilities(&self) -> &BTreeMap<String, FacilityRow> {
        &self.facilities
    }

    /// Log of store calls in the order they happened.
    pub fn operations(&self) -> &[String] {
        &self.operations
    }

    fn check_provisioned(&self, table: &str) -> Result<(), WriteError> {
        match self.provisioned {
            true => Ok(()),
            false => Err(WriteError::NotProvisioned(format!(
                "relation \"{}\" does not exist",
                table
            ))),
        }
    }
}

impl NodeStore for InMemoryNodeStore {
    async fn delete_stale(
        &mut self,
        scope: &Scope,
        incoming_hub_ids: &[String],
    ) -> Result<usize, WriteError> {
        self.check_provisioned("nodes")?;
        self.operations.push("delete_stale".to_string());

        let mut hub_ids: AHashSet<String> = self
            .nodes
            .values()
            .filter(|row| scope.matches_node(row) && !row.is_spoke())
            .map(|row| row.id.clone())
            .collect();
        hub_ids.extend(incoming_hub_ids.iter().cloned());

        self.facilities.retain(|_, row| !scope.matches_facility(row));

        let before = self.nodes.len();

        self.nodes.retain(|_, row| match &row.parent_hub_id {
            Some(parent) => !hub_ids.contains(parent),
            None => true,
        });

        self.nodes
            .retain(|_, row| !(scope.matches_node(row) && !row.is_spoke()));

        let nodes = &self.nodes;
        self.facilities.retain(|node_id, _| nodes.contains_key(node_id));

        Ok(before - self.nodes.len())
    }

    async fn upsert_nodes(&mut self, rows: &[NodeRow]) -> Result<usize, WriteError> {
        self.check_provisioned("nodes")?;
        if self.fail_upserts {
            return Err(WriteError::Backend("simulated upsert failure".into()));
        }

        self.operations.push(format!(
            "upsert_nodes:{}",
            rows.iter().map(|r| r.id.as_str()).collect::<Vec<_>>().join(",")
        ));

        for row in rows {
            self.nodes.insert(row.id.clone(), row.clone());
        }

        Ok(rows.len())
    }

    async fn upsert_facilities(&mut self, rows: &[FacilityRow]) -> Result<usize, WriteError> {
        self.check_provisioned("facilities")?;
        if self.fail_upserts {
            return Err(WriteError::Backend("simulated upsert failure".into()));
        }

        self.operations.push(format!("upsert_facilities:{}", rows.len()));

        for row in rows {
            self.facilities.insert(row.node_id.clone(), row.clone());
        }

        Ok(rows.len())
    }
}
