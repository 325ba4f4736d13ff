//! Integration tests for probed API endpoints
//!
//! Requests go straight to the router with `oneshot`; each test gets its
//! own database in a temporary directory.

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use probedb::config::StoreConfig;
use probedb::db::{
    AggregateAttestationFilter, AttestationSummaryFilter, DelayFilter, Selection,
};
use probedb::ProbeDb;
use probed::{build_router, AppState};
use serde_json::Value;
use tempfile::TempDir;
use tower::util::ServiceExt; // for `oneshot` method

async fn setup_db() -> (TempDir, ProbeDb) {
    let dir = TempDir::new().unwrap();
    let db = probedb::init_database(&StoreConfig::new(dir.path().join("probe.db")))
        .await
        .expect("Should initialize test database");
    (dir, db)
}

fn setup_app(db: &ProbeDb) -> axum::Router {
    build_router(AppState::new(db.clone()))
}

fn post_json(uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .header("x-real-ip", "198.51.100.7")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn extract_json(body: Body) -> Value {
    let bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .expect("Should read body");
    serde_json::from_slice(&bytes).expect("Should parse JSON")
}

const SUMMARY: &str = r#"{
    "method": "gossip",
    "slot": "100",
    "attestations": [
        {
            "committee_index": "4",
            "beacon_block_root": "0x0101",
            "source_root": "0x0202",
            "target_root": "0x0303",
            "buckets": {"alpha": ["0x01", "", "0x07"], "beta": ["0xff"]}
        },
        {
            "committee_index": "5",
            "beacon_block_root": "0x0101",
            "source_root": "0x0202",
            "target_root": "0x0303",
            "buckets": {"alpha": ["0x03"]}
        }
    ]
}"#;

#[tokio::test]
async fn test_health_endpoint() {
    let (_dir, db) = setup_db().await;
    let app = setup_app(&db);

    let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = extract_json(response.into_body()).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["database"], "ok");
    assert!(body["version"].is_string());
}

#[tokio::test]
async fn test_health_reports_unreachable_database() {
    let (_dir, db) = setup_db().await;
    db.pool().close().await;

    let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let response = setup_app(&db).oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = extract_json(response.into_body()).await;
    assert_eq!(body["status"], "degraded");
    assert_eq!(body["database"], "unavailable");
}

#[tokio::test]
async fn test_head_delay_is_stored_and_replaced() {
    let (_dir, db) = setup_db().await;

    for delay in ["12345", "99999"] {
        let body = format!(
            r#"{{"source":"client","method":"head event","slot":"123","delay_ms":"{}"}}"#,
            delay
        );
        let response = setup_app(&db)
            .oneshot(post_json("/v1/headdelay", &body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    let filter = DelayFilter {
        selection: Selection::All,
        ..Default::default()
    };
    let values = db.head_delays(None, &filter).await.unwrap();
    assert_eq!(values.len(), 1);
    assert_eq!(values[0].delay_ms, 99999);
    assert_eq!(values[0].ip_addr, Some("198.51.100.7".parse().unwrap()));
    assert!(db.block_delays(None, &filter).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_block_delay_missing_field_is_bad_request() {
    let (_dir, db) = setup_db().await;

    let response = setup_app(&db)
        .oneshot(post_json(
            "/v1/blockdelay",
            r#"{"source":"client","method":"block event","slot":"1"}"#,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = extract_json(response.into_body()).await;
    assert_eq!(body["error"]["code"], "BAD_REQUEST");
    assert!(body["error"]["message"].as_str().unwrap().contains("delay_ms missing"));
}

#[tokio::test]
async fn test_malformed_json_is_bad_request() {
    let (_dir, db) = setup_db().await;

    let response = setup_app(&db)
        .oneshot(post_json("/v1/aggregateattestation", "{not json"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_aggregate_attestation_is_stored_once() {
    let (_dir, db) = setup_db().await;
    let body = r#"{"source":"client","method":"gossip","slot":"7","committee_index":"2",
        "aggregation_bits":"0xff01","beacon_block_root":"0x01","source_root":"0x02",
        "target_root":"0x03","delay_ms":"450"}"#;

    for _ in 0..2 {
        let response = setup_app(&db)
            .oneshot(post_json("/v1/aggregateattestation", body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    let stored = db
        .aggregate_attestations(None, &AggregateAttestationFilter::default())
        .await
        .unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].aggregation_bits, vec![0xff, 0x01]);
    assert_eq!(stored[0].committee_index, 2);
    assert_eq!(stored[0].delay_ms, 450);
}

#[tokio::test]
async fn test_attestation_summary_stores_one_row_per_source() {
    let (_dir, db) = setup_db().await;

    let response = setup_app(&db)
        .oneshot(post_json("/v1/attestationsummary", SUMMARY))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let stored = db
        .attestation_summaries(None, &AttestationSummaryFilter::default())
        .await
        .unwrap();
    let keys: Vec<(String, u16)> = stored
        .iter()
        .map(|s| (s.source.clone(), s.committee_index))
        .collect();
    assert_eq!(
        keys,
        vec![
            ("alpha".to_string(), 4),
            ("alpha".to_string(), 5),
            ("beta".to_string(), 4),
        ]
    );
    assert_eq!(stored[0].attester_buckets.get(2), Some(&[0x07u8][..]));
    assert_eq!(stored[0].attester_buckets.populated(), 2);
}

#[tokio::test]
async fn test_attestation_summary_is_all_or_nothing() {
    let (_dir, db) = setup_db().await;
    sqlx::query(
        "CREATE TRIGGER reject_beta BEFORE INSERT ON t_attestation_summaries \
         WHEN NEW.f_source = 'beta' BEGIN SELECT RAISE(ABORT, 'rejected'); END",
    )
    .execute(db.pool())
    .await
    .unwrap();

    let response = setup_app(&db)
        .oneshot(post_json("/v1/attestationsummary", SUMMARY))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = extract_json(response.into_body()).await;
    assert_eq!(body["error"]["code"], "STORE_ERROR");
    // alpha was written before beta failed, and was rolled back with it
    assert!(db
        .attestation_summaries(None, &AttestationSummaryFilter::default())
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_attestation_summary_without_attestations_is_bad_request() {
    let (_dir, db) = setup_db().await;

    let response = setup_app(&db)
        .oneshot(post_json("/v1/attestationsummary", r#"{"method":"m","slot":"1"}"#))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
