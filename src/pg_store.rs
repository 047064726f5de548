// Copyright Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Attribution cannot be removed

use crate::models::{Facility, Node};
use crate::postgres_tools::CatenaryPostgresPool;
use crate::reconcile::{
    FacilityRow, NodeRow, NodeStore, ReconciliationWriter, Scope, ScopedRows, WriteError,
    WriteOutcome, soften_all,
};
use diesel::BoolExpressionMethods;
use diesel::ExpressionMethods;
use diesel::QueryDsl;
use diesel::upsert::excluded;
use diesel_async::AsyncConnection;
use diesel_async::AsyncPgConnection;
use diesel_async::RunQueryDsl;
use diesel_async::scoped_futures::ScopedFutureExt;

/// Bound on the number of ids in one `IN (...)` list.
const DELETE_ID_CHUNK: usize = 1000;

impl From<diesel::result::Error> for WriteError {
    fn from(e: diesel::result::Error) -> Self {
        match &e {
            diesel::result::Error::DatabaseError(_, info) if is_undefined_relation(info.message()) => {
                WriteError::NotProvisioned(info.message().to_string())
            }
            _ => WriteError::Backend(Box::new(e)),
        }
    }
}

// postgres reports 42P01 / 3F000 as `relation "x" does not exist` and
// `schema "x" does not exist`; diesel folds both into DatabaseErrorKind::Unknown
fn is_undefined_relation(message: &str) -> bool {
    (message.starts_with("relation ") || message.starts_with("schema "))
        && message.ends_with("does not exist")
}

pub struct PgNodeStore<'c> {
    conn: &'c mut AsyncPgConnection,
}

impl<'c> PgNodeStore<'c> {
    pub fn new(conn: &'c mut AsyncPgConnection) -> Self {
        Self { conn }
    }
}

impl NodeStore for PgNodeStore<'_> {
    async fn delete_stale(
        &mut self,
        scope: &Scope,
        incoming_hub_ids: &[String],
    ) -> Result<usize, WriteError> {
        use crate::schema::interchange::facilities::dsl as facilities_dsl;
        use crate::schema::interchange::nodes::dsl as nodes_dsl;

        let conn = &mut *self.conn;

        let mut persisted_hubs = nodes_dsl::nodes
            .filter(nodes_dsl::kind.eq(scope.kind.as_str()))
            .filter(nodes_dsl::source_tag.eq(&scope.source_tag))
            .filter(nodes_dsl::parent_hub_id.is_null())
            .select(nodes_dsl::id)
            .into_boxed();

        if let Some(city) = &scope.city_id {
            persisted_hubs = persisted_hubs.filter(nodes_dsl::city_id.eq(city));
        }

        let mut hub_ids: Vec<String> = persisted_hubs.load::<String>(conn).await?;
        hub_ids.extend(incoming_hub_ids.iter().cloned());
        hub_ids.sort();
        hub_ids.dedup();

        let facility_filter = facilities_dsl::kind
            .eq(scope.kind.as_str())
            .and(facilities_dsl::source_tag.eq(&scope.source_tag));

        match &scope.city_id {
            Some(city) => {
                diesel::delete(
                    facilities_dsl::facilities
                        .filter(facility_filter)
                        .filter(facilities_dsl::city_id.eq(city)),
                )
                .execute(conn)
                .await?
            }
            None => {
                diesel::delete(facilities_dsl::facilities.filter(facility_filter))
                    .execute(conn)
                    .await?
            }
        };

        let mut deleted = 0;

        for chunk in hub_ids.chunks(DELETE_ID_CHUNK) {
            deleted += diesel::delete(
                nodes_dsl::nodes.filter(nodes_dsl::parent_hub_id.eq_any(chunk.to_vec())),
            )
            .execute(conn)
            .await?;
        }

        let root_filter = nodes_dsl::kind
            .eq(scope.kind.as_str())
            .and(nodes_dsl::source_tag.eq(&scope.source_tag))
            .and(nodes_dsl::parent_hub_id.is_null());

        deleted += match &scope.city_id {
            Some(city) => {
                diesel::delete(
                    nodes_dsl::nodes
                        .filter(root_filter)
                        .filter(nodes_dsl::city_id.eq(city)),
                )
                .execute(conn)
                .await?
            }
            None => {
                diesel::delete(nodes_dsl::nodes.filter(root_filter))
                    .execute(conn)
                    .await?
            }
        };

        Ok(deleted)
    }

    async fn upsert_nodes(&mut self, rows: &[NodeRow]) -> Result<usize, WriteError> {
        use crate::schema::interchange::nodes::dsl::*;

        if rows.is_empty() {
            return Ok(0);
        }

        let insertable: Vec<Node> = rows.iter().map(Node::from).collect();

        let written = diesel::insert_into(nodes)
            .values(&insertable)
            .on_conflict(id)
            .do_update()
            .set((
                city_id.eq(excluded(city_id)),
                name.eq(excluded(name)),
                kind.eq(excluded(kind)),
                point.eq(excluded(point)),
                is_hub.eq(excluded(is_hub)),
                parent_hub_id.eq(excluded(parent_hub_id)),
                line_ids.eq(excluded(line_ids)),
                metadata.eq(excluded(metadata)),
                source_tag.eq(excluded(source_tag)),
            ))
            .execute(&mut *self.conn)
            .await?;

        Ok(written)
    }

    async fn upsert_facilities(&mut self, rows: &[FacilityRow]) -> Result<usize, WriteError> {
        use crate::schema::interchange::facilities::dsl::*;

        if rows.is_empty() {
            return Ok(0);
        }

        let insertable: Vec<Facility> = rows.iter().map(Facility::from).collect();

        let written = diesel::insert_into(facilities)
            .values(&insertable)
            .on_conflict(node_id)
            .do_update()
            .set((
                city_id.eq(excluded(city_id)),
                kind.eq(excluded(kind)),
                name.eq(excluded(name)),
                has_elevator.eq(excluded(has_elevator)),
                has_escalator.eq(excluded(has_escalator)),
                has_toilet.eq(excluded(has_toilet)),
                wheelchair_accessible.eq(excluded(wheelchair_accessible)),
                source_tag.eq(excluded(source_tag)),
            ))
            .execute(&mut *self.conn)
            .await?;

        Ok(written)
    }
}

/// Runs every scope in one transaction, so a multi-kind run is applied
/// entirely or not at all. A missing table rolls back and comes out as a
/// single `WriteOutcome::NotApplied`.
pub async fn reconcile_postgres(
    pool: &CatenaryPostgresPool,
    writer: ReconciliationWriter,
    scopes: &[ScopedRows],
) -> Result<Vec<WriteOutcome>, WriteError> {
    let mut conn = pool
        .get()
        .await
        .map_err(|e| WriteError::Backend(Box::new(e)))?;

    let result = conn
        .transaction::<_, WriteError, _>(|conn| {
            async move {
                let mut store = PgNodeStore::new(conn);
                writer.apply_all(&mut store, scopes).await
            }
            .scope_boxed()
        })
        .await;

    soften_all(result)
}
