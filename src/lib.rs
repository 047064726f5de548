// Copyright Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Attribution cannot be removed

#![deny(
    clippy::mutable_key_type,
    clippy::map_entry,
    clippy::boxed_local,
    clippy::let_unit_value,
    clippy::redundant_allocation,
    clippy::bool_comparison,
    clippy::bind_instead_of_map,
    clippy::vec_box,
    clippy::while_let_loop,
    clippy::useless_asref,
    clippy::repeat_once,
    clippy::deref_addrof,
    clippy::suspicious_map,
    clippy::arc_with_non_send_sync,
    clippy::single_char_pattern,
    clippy::for_kv_map,
    clippy::let_and_return,
    clippy::iter_nth,
    clippy::iter_cloned_collect,
    clippy::bytes_nth,
    clippy::match_result_ok,
    clippy::cmp_owned,
    clippy::cmp_null,
    clippy::op_ref
)]

#[macro_use]
extern crate serde;

pub mod city;
pub mod clustering;
pub mod facilities;
pub mod geo_utils;
pub mod hub_selection;
pub mod memory_store;
pub mod models;
pub mod name_key;
pub mod normalize;
pub mod pg_store;
pub mod pipeline;
pub mod postgres_tools;
pub mod reconcile;
pub mod schema;
pub mod source;
pub mod station;

#[cfg(test)]
mod test_pipeline;

pub const WGS_84_SRID: u32 = 4326;
