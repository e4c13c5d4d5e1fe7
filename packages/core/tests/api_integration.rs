//! Integration tests for the operator API.
//!
//! Each test boots the full Axum router (same assembly as `main.rs`) over an
//! in-memory SQLite pool and drives it with `tower::ServiceExt::oneshot`.

use std::sync::Arc;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use wids_aggregator::{
    api::{create_router, ApiState},
    cursor::CursorStore,
    db,
    directory::SensorDirectory,
    metrics::AppMetrics,
    repository::AggregatorRepository,
    retention::PcapArchive,
    types::{
        AlertCandidate, MetricKind, NetworkRow, ObservationSet, PairRow, ShortAddressRow,
        TimeseriesRow, TopologyRow, TopologyTable, UtilizationSample,
    },
};

// ---- Helpers ----------------------------------------------------------------

async fn build_test_app() -> (Router, ApiState) {
    build_app_with_archive(None).await
}

async fn build_app_with_archive(archive: Option<PcapArchive>) -> (Router, ApiState) {
    let pool = db::create_pool("sqlite::memory:").await.unwrap();
    let state = ApiState {
        repository: Arc::new(AggregatorRepository::new(pool)),
        directory: SensorDirectory::new(),
        cursors: CursorStore::shared(),
        metrics: Arc::new(AppMetrics::new().unwrap()),
        archive,
    };
    (create_router(state.clone(), None), state)
}

fn now() -> f64 {
    chrono::Utc::now().timestamp() as f64
}

async fn json_body(body: Body) -> Value {
    let bytes = body.collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn register(app: &Router, id: &str, api: &str) -> StatusCode {
    app.clone()
        .oneshot(json_request(
            "POST",
            "/api/registry",
            json!({ "wids_sensor_id": id, "wids_sensor_api": api }),
        ))
        .await
        .unwrap()
        .status()
}

// ---- GET /health ------------------------------------------------------------

#[tokio::test]
async fn health_returns_200_with_ok_body() {
    let (app, _) = build_test_app().await;
    let resp = app.oneshot(get("/health")).await.unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&bytes[..], b"ok");
}

// ---- GET /metrics -----------------------------------------------------------

#[tokio::test]
async fn metrics_exposes_prometheus_text() {
    let (app, _) = build_test_app().await;
    app.clone().oneshot(get("/health")).await.unwrap();

    let resp = app.oneshot(get("/metrics")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(resp.headers()[header::CONTENT_TYPE]
        .to_str()
        .unwrap()
        .starts_with("text/plain"));

    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("wids_aggregator_http_requests_total"));
    assert!(text.contains("path=\"/health\""));
}

// ---- /api/registry ----------------------------------------------------------

#[tokio::test]
async fn register_then_list_sensors() {
    let (app, state) = build_test_app().await;

    assert_eq!(register(&app, "sensor-01", "http://10.0.0.5:8000/api").await, StatusCode::OK);

    let resp = app.clone().oneshot(get("/api/wids-sensors")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let json = json_body(resp.into_body()).await;
    assert_eq!(
        json,
        json!([{ "wids_sensor_id": "sensor-01", "wids_sensor_api": "http://10.0.0.5:8000/api" }])
    );

    // The poll loops read the directory, not the table.
    assert_eq!(state.directory.len().await, 1);
    assert_eq!(state.metrics.registered_sensors.get(), 1.0);
}

#[tokio::test]
async fn register_seeds_cursors_from_stored_rows() {
    let (app, state) = build_test_app().await;
    state
        .repository
        .insert_timeseries_row(
            MetricKind::MacSeqnums,
            &TimeseriesRow {
                sensor_id: "sensor-01".into(),
                timestamp: 1_700_000_100.0,
                src_pan_id: "0x1234".into(),
                src_short_addr: Some("0x0001".into()),
                value: 7.0,
            },
        )
        .await
        .unwrap();

    assert_eq!(register(&app, "sensor-01", "http://10.0.0.5:8000/api").await, StatusCode::OK);

    let cursors = state.cursors.read().await;
    assert_eq!(cursors.get("sensor-01", MetricKind::MacSeqnums), Some(1_700_000_100.0));
}

#[tokio::test]
async fn register_rejects_invalid_fields() {
    let (app, _) = build_test_app().await;

    assert_eq!(register(&app, "1sensor", "http://10.0.0.5:8000").await, StatusCode::BAD_REQUEST);
    assert_eq!(register(&app, "sensor-01", "https://10.0.0.5").await, StatusCode::BAD_REQUEST);
    assert_eq!(register(&app, "sensor-01", "http://10.0.0.5/").await, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn register_rejects_duplicate_id_or_api() {
    let (app, _) = build_test_app().await;
    assert_eq!(register(&app, "sensor-01", "http://10.0.0.5:8000").await, StatusCode::OK);

    assert_eq!(register(&app, "sensor-01", "http://10.0.0.6:8000").await, StatusCode::BAD_REQUEST);
    assert_eq!(register(&app, "sensor-02", "http://10.0.0.5:8000").await, StatusCode::BAD_REQUEST);

    let resp = app.oneshot(get("/api/wids-sensors")).await.unwrap();
    let json = json_body(resp.into_body()).await;
    assert_eq!(json.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn deregister_removes_sensor() {
    let (app, state) = build_test_app().await;
    register(&app, "sensor-01", "http://10.0.0.5:8000").await;

    let resp = app
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri("/api/registry/sensor-01")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(state.directory.is_empty().await);

    let resp = app
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri("/api/registry/sensor-01")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert!(json_body(resp.into_body()).await["error"].is_string());
}

#[tokio::test]
async fn deregister_rejects_invalid_id() {
    let (app, _) = build_test_app().await;
    let resp = app
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri("/api/registry/9bad")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

// ---- /api/alerts ------------------------------------------------------------

async fn seed_alerts(state: &ApiState) {
    for (id, ts) in [("HG100E0", 100.0), ("HG200E0", 200.0)] {
        state
            .repository
            .insert_alert(&AlertCandidate {
                alert_id: id.into(),
                message: format!("sensor s1 detected: event {}", id),
                timestamp: ts,
            })
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn alerts_require_archived_flag() {
    let (app, _) = build_test_app().await;

    for uri in ["/api/alerts", "/api/alerts?archived=yes", "/api/alerts?archived=1"] {
        let resp = app.clone().oneshot(get(uri)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "{}", uri);
    }
}

#[tokio::test]
async fn archiving_moves_alert_between_lists() {
    let (app, state) = build_test_app().await;
    seed_alerts(&state).await;

    let resp = app.clone().oneshot(get("/api/alerts?archived=false")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let json = json_body(resp.into_body()).await;
    let ids: Vec<&str> = json
        .as_array()
        .unwrap()
        .iter()
        .map(|alert| alert["alert_id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["HG200E0", "HG100E0"]);
    assert_eq!(json[0]["message"], "sensor s1 detected: event HG200E0");

    let resp = app
        .clone()
        .oneshot(json_request("PUT", "/api/alerts/HG100E0", json!({ "archived": true })))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let archived = json_body(
        app.clone()
            .oneshot(get("/api/alerts?archived=true"))
            .await
            .unwrap()
            .into_body(),
    )
    .await;
    assert_eq!(archived, json!([{ "alert_id": "HG100E0", "message": "sensor s1 detected: event HG100E0" }]));

    let active = json_body(app.oneshot(get("/api/alerts?archived=false")).await.unwrap().into_body()).await;
    assert_eq!(active.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn update_alert_validates_id_and_existence() {
    let (app, _) = build_test_app().await;

    let resp = app
        .clone()
        .oneshot(json_request("PUT", "/api/alerts/not-an-id", json!({ "archived": true })))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = app
        .oneshot(json_request("PUT", "/api/alerts/HG1E0", json!({ "archived": true })))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn malformed_bodies_are_bad_requests() {
    let (app, _) = build_test_app().await;

    let resp = app
        .clone()
        .oneshot(json_request("POST", "/api/registry", json!({ "wids_sensor_id": "s1" })))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = app
        .oneshot(json_request("PUT", "/api/alerts/HG1E0", json!({ "archived": "yes" })))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

// ---- /api/wids-sensors/:id/{cpu,memory,disk} --------------------------------

#[tokio::test]
async fn utilization_returns_points_inside_window() {
    let (app, state) = build_test_app().await;
    let recent = now() - 60.0;
    for (ts, cpu) in [(now() - 10.0 * 3600.0, 90.0), (recent, 12.5)] {
        state
            .repository
            .insert_utilization(
                "sensor-01",
                &UtilizationSample {
                    epoch_timestamp: ts,
                    cpu_percent: cpu,
                    memory_percent: 40.0,
                    disk_percent: 70.0,
                },
            )
            .await
            .unwrap();
    }

    let resp = app
        .clone()
        .oneshot(get("/api/wids-sensors/sensor-01/cpu?hours=1"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(json_body(resp.into_body()).await, json!([{ "x": recent * 1000.0, "y": 12.5 }]));

    let resp = app
        .clone()
        .oneshot(get("/api/wids-sensors/sensor-01/disk?hours=24"))
        .await
        .unwrap();
    let json = json_body(resp.into_body()).await;
    assert_eq!(json.as_array().unwrap().len(), 2);
    assert_eq!(json[0]["y"], 70.0);
}

#[tokio::test]
async fn utilization_rejects_bad_hours_and_ids() {
    let (app, _) = build_test_app().await;

    for uri in [
        "/api/wids-sensors/sensor-01/memory",
        "/api/wids-sensors/sensor-01/memory?hours=0",
        "/api/wids-sensors/sensor-01/memory?hours=soon",
        "/api/wids-sensors/1sensor/memory?hours=1",
    ] {
        let resp = app.clone().oneshot(get(uri)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "{}", uri);
    }
}

// ---- time series ------------------------------------------------------------

async fn seed_series(state: &ApiState, kind: MetricKind, short_addr: Option<&str>, ts: f64, value: f64) {
    state
        .repository
        .insert_timeseries_row(
            kind,
            &TimeseriesRow {
                sensor_id: "sensor-01".into(),
                timestamp: ts,
                src_pan_id: "0x1234".into(),
                src_short_addr: short_addr.map(str::to_string),
                value,
            },
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn counters_without_device_read_network_totals() {
    let (app, state) = build_test_app().await;
    let ts = now() - 30.0;
    seed_series(&state, MetricKind::PacketCounters, None, ts, 500.0).await;
    seed_series(&state, MetricKind::PacketCounters, Some("0x0001"), ts, 20.0).await;

    let resp = app
        .clone()
        .oneshot(get("/api/packet-counters?sensor=sensor-01&hours=1&srcpanid=0x1234"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(json_body(resp.into_body()).await, json!([{ "x": ts * 1000.0, "y": 500.0 }]));

    let resp = app
        .clone()
        .oneshot(get(
            "/api/packet-counters?sensor=sensor-01&hours=1&srcpanid=0x1234&srcshortaddr=0x0001",
        ))
        .await
        .unwrap();
    assert_eq!(json_body(resp.into_body()).await, json!([{ "x": ts * 1000.0, "y": 20.0 }]));
}

#[tokio::test]
async fn seqnum_series_need_a_device_and_honour_the_window() {
    let (app, state) = build_test_app().await;
    seed_series(&state, MetricKind::MacSeqnums, Some("0x0001"), now() - 7200.0, 3.0).await;
    seed_series(&state, MetricKind::MacSeqnums, Some("0x0001"), now() - 10.0, 4.0).await;

    let resp = app
        .clone()
        .oneshot(get("/api/mac-seqnum?sensor=sensor-01&hours=1&srcpanid=0x1234"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = app
        .clone()
        .oneshot(get(
            "/api/mac-seqnum?sensor=sensor-01&hours=1&srcpanid=0x1234&srcshortaddr=0x0001",
        ))
        .await
        .unwrap();
    let json = json_body(resp.into_body()).await;
    assert_eq!(json.as_array().unwrap().len(), 1);
    assert_eq!(json[0]["y"], 4.0);
}

#[tokio::test]
async fn series_routes_validate_query() {
    let (app, _) = build_test_app().await;

    for uri in [
        "/api/byte-counters?hours=1&srcpanid=0x1234",
        "/api/byte-counters?sensor=sensor-01&srcpanid=0x1234",
        "/api/byte-counters?sensor=sensor-01&hours=-2&srcpanid=0x1234",
        "/api/byte-counters?sensor=sensor-01&hours=1",
        "/api/battery-percentages?sensor=sensor-01&hours=1&srcpanid=0x1234",
        "/api/nwkaux-seqnum?sensor=sensor-01&hours=abc&srcpanid=0x1234&srcshortaddr=0x0001",
    ] {
        let resp = app.clone().oneshot(get(uri)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "{}", uri);
    }

    for uri in [
        "/api/beacon-seqnum?sensor=sensor-01&hours=1&srcpanid=0x1234&srcshortaddr=0x0001",
        "/api/nwk-seqnum?sensor=sensor-01&hours=1&srcpanid=0x1234&srcshortaddr=0x0001",
    ] {
        let resp = app.clone().oneshot(get(uri)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK, "{}", uri);
        assert_eq!(json_body(resp.into_body()).await, json!([]));
    }
}

// ---- topology ---------------------------------------------------------------

fn network(panid: &str, epids: &str) -> TopologyRow {
    TopologyRow::Network(NetworkRow {
        panid: panid.into(),
        epidset: ObservationSet::from_column(epids),
        earliest: None,
        latest: None,
    })
}

fn device(shortaddr: &str, altset: &str, nwkset: &str) -> TopologyRow {
    TopologyRow::ShortAddress(ShortAddressRow {
        panid: "0x1234".into(),
        shortaddr: shortaddr.into(),
        altset: ObservationSet::from_column(altset),
        macset: ObservationSet::Unknown,
        nwkset: ObservationSet::from_column(nwkset),
        earliest: None,
        latest: None,
    })
}

fn pair(src: &str, dst: &str, latest: f64) -> TopologyRow {
    TopologyRow::Pair(PairRow {
        panid: "0x1234".into(),
        srcaddr: src.into(),
        dstaddr: dst.into(),
        earliest: latest - 60.0,
        latest,
    })
}

async fn seed_topology(state: &ApiState, sensor: &str, table: TopologyTable, rows: Vec<TopologyRow>) {
    state
        .repository
        .replace_snapshot(table, sensor, &rows)
        .await
        .unwrap();
}

#[tokio::test]
async fn nearby_networks_merge_sensors() {
    let (app, state) = build_test_app().await;
    seed_topology(
        &state,
        "sensor-01",
        TopologyTable::Networks,
        vec![network("0x1234", "facefeedbeefcafe"), network("0x9999", "")],
    )
    .await;
    seed_topology(
        &state,
        "sensor-02",
        TopologyTable::Networks,
        vec![network("0x1234", "facefeedbeefcafe"), network("0x5678", "aa;bb")],
    )
    .await;

    let resp = app.clone().oneshot(get("/api/nearby-networks")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        json_body(resp.into_body()).await,
        json!([
            { "panid": "0x1234", "epid": "facefeedbeefcafe" },
            { "panid": "0x5678", "epid": "Conflicting Data" },
            { "panid": "0x9999", "epid": "Unknown" },
        ])
    );

    let resp = app.oneshot(get("/api/pan-identifiers")).await.unwrap();
    assert_eq!(json_body(resp.into_body()).await, json!(["0x1234", "0x5678", "0x9999"]));
}

#[tokio::test]
async fn short_addresses_require_panid() {
    let (app, state) = build_test_app().await;
    seed_topology(
        &state,
        "sensor-01",
        TopologyTable::ShortAddresses,
        vec![device("0x0002", "", ""), device("0x0001", "", "")],
    )
    .await;
    seed_topology(&state, "sensor-02", TopologyTable::ShortAddresses, vec![device("0x0001", "", "")]).await;

    let resp = app.clone().oneshot(get("/api/short-addresses")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = app
        .clone()
        .oneshot(get("/api/short-addresses?panid=0x1234"))
        .await
        .unwrap();
    assert_eq!(json_body(resp.into_body()).await, json!(["0x0001", "0x0002"]));

    let resp = app.oneshot(get("/api/short-addresses?panid=0xffff")).await.unwrap();
    assert_eq!(json_body(resp.into_body()).await, json!([]));
}

#[tokio::test]
async fn topology_reports_devices_and_recent_pairs() {
    let (app, state) = build_test_app().await;
    seed_topology(
        &state,
        "sensor-01",
        TopologyTable::ShortAddresses,
        vec![
            device("0x0000", "0011223344556677", "Zigbee Coordinator"),
            device("0x0001", "", "Zigbee Router"),
        ],
    )
    .await;
    seed_topology(
        &state,
        "sensor-02",
        TopologyTable::ShortAddresses,
        vec![device("0x0001", "8899aabbccddeeff", "Zigbee End Device")],
    )
    .await;
    seed_topology(
        &state,
        "sensor-01",
        TopologyTable::Pairs,
        vec![pair("0x0001", "0x0000", now() - 60.0), pair("0x0000", "0x0001", now() - 5.0 * 3600.0)],
    )
    .await;
    seed_topology(&state, "sensor-02", TopologyTable::Pairs, vec![pair("0x0001", "0x0000", now() - 30.0)]).await;

    let resp = app.clone().oneshot(get("/api/topology/0x1234?hours=1")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let json = json_body(resp.into_body()).await;
    assert_eq!(
        json["table"],
        json!([
            { "shortaddr": "0x0000", "extendedaddr": "0011223344556677", "nwkdevtype": "Zigbee Coordinator" },
            { "shortaddr": "0x0001", "extendedaddr": "8899aabbccddeeff", "nwkdevtype": "Conflicting Data" },
        ])
    );
    let graph = json["graph"].as_str().unwrap();
    assert!(graph.starts_with("digraph {\n"));
    assert!(graph.contains("\"0x0000\" [color=black fillcolor=\"#FF0000\""));
    assert!(graph.contains("\"0x0001\" [color=black fillcolor=\"#FFFFFF\""));
    assert_eq!(graph.matches("->").count(), 1);
    assert!(graph.contains("\t\"0x0001\" -> \"0x0000\"\n"));

    let resp = app.oneshot(get("/api/topology/0x1234?hours=none")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

// ---- /api/archived-files ----------------------------------------------------

#[tokio::test]
async fn archived_files_empty_without_archive() {
    let (app, _) = build_test_app().await;

    let resp = app.clone().oneshot(get("/api/archived-files")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(json_body(resp.into_body()).await, json!([]));

    let resp = app.oneshot(get("/api/archived-files/sensor-01/a.pcap")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn archived_files_list_and_download() {
    let root = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(root.path().join("sensor-01")).unwrap();
    std::fs::write(root.path().join("sensor-01").join("capture-1.pcap"), b"\xd4\xc3\xb2\xa1").unwrap();
    std::fs::write(root.path().join("sensor-01").join("capture-2.pcap"), b"second").unwrap();
    let (app, _) = build_app_with_archive(Some(PcapArchive::new(root.path()))).await;

    let resp = app.clone().oneshot(get("/api/archived-files")).await.unwrap();
    assert_eq!(
        json_body(resp.into_body()).await,
        json!([
            { "folderName": "sensor-01", "fileName": "capture-2.pcap" },
            { "folderName": "sensor-01", "fileName": "capture-1.pcap" },
        ])
    );

    let resp = app
        .clone()
        .oneshot(get("/api/archived-files/sensor-01/capture-1.pcap"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers()[header::CONTENT_DISPOSITION],
        "attachment; filename=\"capture-1.pcap\""
    );
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&bytes[..], b"\xd4\xc3\xb2\xa1");

    let resp = app
        .clone()
        .oneshot(get("/api/archived-files/sensor-01/missing.pcap"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let resp = app
        .oneshot(get("/api/archived-files/sensor-01/..%2Fsecret"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

