// Copyright Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Attribution cannot be removed

#[cfg(test)]
mod tests {
    use crate::city::RegionDefinition;
    use crate::geo_utils::offset_east;
    use crate::memory_store::InMemoryNodeStore;
    use crate::pipeline::{Pipeline, PipelineConfig, run_pipeline};
    use crate::reconcile::NodeRow;
    use crate::source::FeedBatch;
    use crate::station::StationKind;
    use serde_json::{Value, json};

    const LON: f64 = 139.70;
    const LAT: f64 = 35.69;

    fn square(city_id: &str, west: f64, south: f64, east: f64, north: f64) -> RegionDefinition {
        RegionDefinition {
            city_id: city_id.to_string(),
            exterior: vec![
                [west, south],
                [east, south],
                [east, north],
                [west, north],
                [west, south],
            ],
            holes: vec![],
        }
    }

    fn config() -> PipelineConfig {
        PipelineConfig {
            operator_priority: vec![
                "odpt.Operator:Yamate".to_string(),
                "odpt.Operator:Aoba".to_string(),
            ],
            regions: vec![
                square("tokyo", 139.6, 35.6, 139.9, 35.75),
                square("saitama", 139.6, 35.75, 139.9, 36.0),
            ],
            ..PipelineConfig::default()
        }
    }

    fn station(operator: &str, line: &str, ja: &str, lon: Option<f64>, lat: f64) -> Value {
        let mut raw = json!({
            "owl:sameAs": format!("odpt.Station:{}.{}.Central", operator, line),
            "odpt:operator": format!("odpt.Operator:{}", operator),
            "odpt:railway": format!("odpt.Railway:{}.{}", operator, line),
            "odpt:stationTitle": { "ja": ja, "en": "Central" },
        });
        if let Some(lon) = lon {
            raw["geo:long"] = json!(lon);
            raw["geo:lat"] = json!(lat);
        }
        raw
    }

    fn batch(operator: &str, kind: StationKind, records: Vec<Value>) -> FeedBatch {
        FeedBatch {
            operator: format!("odpt.Operator:{}", operator),
            kind,
            records,
        }
    }

    fn central_batches() -> Vec<FeedBatch> {
        vec![
            batch(
                "Aoba",
                StationKind::Station,
                vec![station("Aoba", "Line1", "中央", Some(LON), LAT)],
            ),
            batch(
                "Yamate",
                StationKind::Station,
                vec![station(
                    "Yamate",
                    "Loop",
                    "中央駅",
                    Some(offset_east(LON, LAT, 150.0)),
                    LAT,
                )],
            ),
        ]
    }

    fn node<'a>(rows: &'a [NodeRow], id: &str) -> &'a NodeRow {
        rows.iter().find(|r| r.id == id).unwrap()
    }

    #[test]
    fn test_central_interchange_becomes_one_hub() {
        let output = run_pipeline(&central_batches(), &config()).unwrap();

        assert_eq!(output.nodes.len(), 2);
        assert_eq!(output.summary.hubs, 1);
        assert_eq!(output.summary.merged_into_hubs, 1);

        // Yamate outranks Aoba even though its id sorts later
        let hub = node(&output.nodes, "odpt.Station:Yamate.Loop.Central");
        let spoke = node(&output.nodes, "odpt.Station:Aoba.Line1.Central");

        assert!(hub.is_hub);
        assert_eq!(hub.parent_hub_id, None);
        assert_eq!(
            spoke.parent_hub_id.as_deref(),
            Some("odpt.Station:Yamate.Loop.Central")
        );
        assert_eq!(
            hub.line_ids,
            vec![
                "odpt.Railway:Aoba.Line1".to_string(),
                "odpt.Railway:Yamate.Loop".to_string(),
            ]
        );
        assert_eq!(spoke.line_ids, vec!["odpt.Railway:Aoba.Line1".to_string()]);

        assert_eq!(hub.lon, spoke.lon);
        assert_eq!(hub.lat, spoke.lat);
        assert_eq!(hub.city_id, "tokyo");
        assert_eq!(spoke.city_id, "tokyo");
        assert_eq!(hub.source_tag, "odpt");
    }

    #[test]
    fn test_merge_disabled_keeps_every_record_a_root() {
        let config = PipelineConfig {
            merge: false,
            ..config()
        };
        let output = run_pipeline(&central_batches(), &config).unwrap();

        assert_eq!(output.nodes.len(), 2);
        assert!(output.nodes.iter().all(|r| !r.is_hub && r.parent_hub_id.is_none()));
    }

    #[test]
    fn test_stations_further_than_radius_stay_apart() {
        let batches = vec![
            batch(
                "Aoba",
                StationKind::Station,
                vec![station("Aoba", "Line1", "中央", Some(LON), LAT)],
            ),
            batch(
                "Yamate",
                StationKind::Station,
                vec![station(
                    "Yamate",
                    "Loop",
                    "中央",
                    Some(offset_east(LON, LAT, 900.0)),
                    LAT,
                )],
            ),
        ];

        let output = run_pipeline(&batches, &config()).unwrap();
        assert_eq!(output.summary.hubs, 0);
        assert!(output.nodes.iter().all(|r| r.parent_hub_id.is_none()));
    }

    #[test]
    fn test_bus_stop_without_coordinates_is_rejected() {
        let batches = vec![batch(
            "Aoba",
            StationKind::BusStop,
            vec![
                json!({
                    "owl:sameAs": "odpt.BusstopPole:Aoba.Central.1",
                    "odpt:busstopPoleTitle": { "ja": "中央", "en": "Central" },
                }),
                json!({
                    "owl:sameAs": "odpt.BusstopPole:Aoba.Central.2",
                    "odpt:busstopPoleTitle": { "ja": "中央", "en": "Central" },
                    "geo:long": LON,
                    "geo:lat": LAT,
                }),
            ],
        )];

        let output = run_pipeline(&batches, &config()).unwrap();

        assert_eq!(output.summary.fetched, 2);
        assert_eq!(output.summary.dropped.missing_coordinates, 1);
        assert_eq!(output.nodes.len(), 1);
        assert_eq!(output.nodes[0].id, "odpt.BusstopPole:Aoba.Central.2");
        assert_eq!(output.nodes[0].kind, StationKind::BusStop);
    }

    #[test]
    fn test_sentinel_station_takes_group_centroid() {
        let known_lon = offset_east(LON, LAT, 40.0);
        let batches = vec![
            batch(
                "Aoba",
                StationKind::Station,
                vec![station("Aoba", "Line1", "中央", Some(known_lon), LAT)],
            ),
            batch(
                "Yamate",
                StationKind::Station,
                vec![station("Yamate", "Loop", "中央", None, 0.0)],
            ),
        ];

        let output = run_pipeline(&batches, &config()).unwrap();

        let located = node(&output.nodes, "odpt.Station:Yamate.Loop.Central");
        assert_eq!(located.lon, known_lon);
        assert_eq!(located.lat, LAT);
        assert_eq!(located.city_id, "tokyo");
        assert_eq!(output.summary.dropped.unresolved_location, 0);
    }

    #[test]
    fn test_sentinel_without_located_peers_is_dropped() {
        let batches = vec![batch(
            "Yamate",
            StationKind::Station,
            vec![station("Yamate", "Loop", "中央", None, 0.0)],
        )];

        let output = run_pipeline(&batches, &config()).unwrap();

        assert!(output.nodes.is_empty());
        assert_eq!(output.summary.dropped.unresolved_location, 1);
    }

    #[test]
    fn test_no_kept_row_lacks_city_or_location() {
        let mut batches = central_batches();
        batches.push(batch(
            "Aoba",
            StationKind::Station,
            vec![
                // inside no region
                json!({
                    "owl:sameAs": "odpt.Station:Aoba.Line1.Faraway",
                    "dc:title": "Faraway",
                    "geo:long": 141.0,
                    "geo:lat": 38.0,
                }),
                json!({
                    "owl:sameAs": "odpt.Station:Aoba.Line1.Nowhere",
                    "dc:title": "Nowhere",
                }),
                json!({ "dc:title": "No id" }),
            ],
        ));

        let output = run_pipeline(&batches, &config()).unwrap();

        assert_eq!(output.summary.dropped.no_city, 1);
        assert_eq!(output.summary.dropped.unresolved_location, 1);
        assert_eq!(output.summary.dropped.missing_id, 1);
        assert_eq!(output.nodes.len(), 2);
        for row in &output.nodes {
            assert!(!row.city_id.is_empty());
            assert!(!(row.lon == 0.0 && row.lat == 0.0));
        }
    }

    #[test]
    fn test_equal_priority_smaller_id_is_hub() {
        let batches = vec![batch(
            "Toei",
            StationKind::Station,
            vec![
                station("Toei", "Shinjuku", "中央", Some(LON), LAT),
                station("Toei", "Oedo", "中央", Some(offset_east(LON, LAT, 60.0)), LAT),
            ],
        )];

        let output = run_pipeline(&batches, &config()).unwrap();

        let hub = node(&output.nodes, "odpt.Station:Toei.Oedo.Central");
        assert!(hub.is_hub);
        assert_eq!(
            node(&output.nodes, "odpt.Station:Toei.Shinjuku.Central")
                .parent_hub_id
                .as_deref(),
            Some("odpt.Station:Toei.Oedo.Central")
        );
    }

    #[test]
    fn test_duplicate_ids_keep_first() {
        let mut batches = central_batches();
        batches.push(batch(
            "Aoba",
            StationKind::Station,
            vec![station("Aoba", "Line1", "中央", Some(LON + 0.5), LAT)],
        ));

        let output = run_pipeline(&batches, &config()).unwrap();
        assert_eq!(output.summary.dropped.duplicate_id, 1);
        assert_eq!(output.nodes.len(), 2);
    }

    #[test]
    fn test_target_city_and_spoke_filters() {
        let mut batches = central_batches();
        batches.push(batch(
            "Aoba",
            StationKind::Station,
            vec![json!({
                "owl:sameAs": "odpt.Station:Aoba.Line1.Omiya",
                "dc:title": "Omiya",
                "geo:long": 139.62,
                "geo:lat": 35.90,
            })],
        ));

        let config = PipelineConfig {
            target_city: Some("tokyo".to_string()),
            include_spokes: false,
            ..config()
        };
        let output = run_pipeline(&batches, &config).unwrap();

        assert_eq!(output.summary.dropped.outside_target_city, 1);
        assert_eq!(output.summary.omitted_spokes, 1);
        assert_eq!(output.nodes.len(), 1);
        assert!(output.nodes[0].is_hub);
    }

    #[test]
    fn test_facility_rows_follow_kept_nodes() {
        let mut raw = station("Yamate", "Loop", "中央", Some(LON), LAT);
        raw["hasElevator"] = json!(true);
        raw["toilet"] = json!(["1F concourse"]);

        let output = run_pipeline(
            &[batch("Yamate", StationKind::Station, vec![raw])],
            &config(),
        )
        .unwrap();

        assert_eq!(output.facilities.len(), 1);
        let facility = &output.facilities[0];
        assert_eq!(facility.node_id, "odpt.Station:Yamate.Loop.Central");
        assert_eq!(facility.has_elevator, Some(true));
        assert_eq!(facility.has_toilet, Some(true));
        assert_eq!(facility.has_escalator, None);
        assert_eq!(facility.city_id, "tokyo");
    }

    #[tokio::test]
    async fn test_two_identical_runs_leave_identical_store() {
        let pipeline = Pipeline::new(config()).unwrap();
        let mut store = InMemoryNodeStore::default();

        let first = pipeline.run(&central_batches()).unwrap();
        let mut first_summary = first.summary.clone();
        pipeline
            .write_to_store(&mut store, &first, &mut first_summary)
            .await
            .unwrap();
        let after_first = store.nodes().clone();

        let second = pipeline.run(&central_batches()).unwrap();
        let mut second_summary = second.summary.clone();
        pipeline
            .write_to_store(&mut store, &second, &mut second_summary)
            .await
            .unwrap();

        assert_eq!(store.nodes(), &after_first);
        assert!(second_summary.applied);
        assert_eq!(second_summary.persisted_nodes, 2);
        assert_eq!(second_summary.deleted_nodes, 2);
    }

    #[tokio::test]
    async fn test_unprovisioned_store_reports_not_applied() {
        let pipeline = Pipeline::new(config()).unwrap();
        let mut store = InMemoryNodeStore::unprovisioned();

        let output = pipeline.run(&central_batches()).unwrap();
        let mut summary = output.summary.clone();
        pipeline
            .write_to_store(&mut store, &output, &mut summary)
            .await
            .unwrap();

        assert!(!summary.applied);
        assert!(summary.not_applied_reason.is_some());
        assert_eq!(summary.persisted_nodes, 0);
        assert!(store.operations().is_empty());
    }
}
