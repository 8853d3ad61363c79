//! Property-Based and Scenario Tests for the Storage Accessor
//!
//! Drives the storage tier router end to end over a fault-injecting store:
//! - Records without a partition key are skipped, not failed
//! - A partial write names exactly the failed ids
//! - Identical reads carry a stable `ETag` and honor `If-None-Match`
//! - Writes change the `ETag`; late or fully rejected street batches leave
//!   the cache alone
//! - Upserting any set of localities reads back the same set

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use axum::http::{header, StatusCode};
use chrono::{Duration, Utc};
use georef_api::GeorefConfig;
use georef_test_utils::generators::{
    arb_localities, arb_streets_with_missing_keys, arb_timestamp,
};
use georef_test_utils::{Fault, FlakyStore, StreetBatch};
use proptest::prelude::*;
use serde_json::{json, Value};
use tokio::runtime::Runtime;

#[path = "support/tiers.rs"]
mod tiers;
use tiers::{
    body_json, get, get_if_none_match, header_of, post_json, send, status_and_json,
    storage_tier,
};

fn storage(store: Arc<FlakyStore>) -> axum::Router {
    storage_tier(store, &GeorefConfig::default())
}

fn street(locality: &str, code: &str, name: &str) -> Value {
    json!({ "id": code, "localityId": locality, "streetId": code, "streetName": name })
}

fn batch(streets: Vec<Value>, age_minutes: i64) -> Value {
    json!({
        "streets": streets,
        "updateTimestamp": Utc::now() - Duration::minutes(age_minutes),
    })
}

fn street_ids(body: &Value) -> BTreeSet<String> {
    body.as_array()
        .map(|streets| {
            streets
                .iter()
                .filter_map(|s| s["streetId"].as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

// ============================================================================
// SCENARIOS
// ============================================================================

#[tokio::test]
async fn empty_partition_keys_are_skipped_without_failing() {
    let store = Arc::new(FlakyStore::new());
    let router = storage(store.clone());

    let body = batch(
        vec![
            street("70", "101", "Herzl"),
            street("", "102", "Nowhere"),
            street("70", "103", "Weizmann"),
        ],
        0,
    );
    let response = send(&router, post_json("/streets", &body)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(store.attempts("102"), 0);

    let (status, streets) = status_and_json(send(&router, get("/localities/70/streets")).await).await;
    assert_eq!(status, StatusCode::OK);
    let expected: BTreeSet<String> = ["101", "103"].iter().map(|s| s.to_string()).collect();
    assert_eq!(street_ids(&streets), expected);
}

#[tokio::test]
async fn partial_write_names_exactly_the_failed_ids() {
    let store = Arc::new(
        FlakyStore::new()
            .with_fault("102", Fault::Rejected)
            .with_fault("103", Fault::Transient(2)),
    );
    let router = storage(store.clone());

    let body = batch(
        vec![
            street("70", "101", "Herzl"),
            street("70", "102", "Weizmann"),
            street("70", "103", "Rothschild"),
        ],
        0,
    );
    let (status, error) = status_and_json(send(&router, post_json("/streets", &body)).await).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error["code"], "UPSERT_FAILED");
    assert_eq!(error["failedStreetIds"], json!(["102"]));

    // Transient failures within the retry budget end up committed.
    let (_, streets) = status_and_json(send(&router, get("/localities/70/streets")).await).await;
    let expected: BTreeSet<String> = ["101", "103"].iter().map(|s| s.to_string()).collect();
    assert_eq!(street_ids(&streets), expected);
}

#[tokio::test]
async fn partial_locality_write_uses_locality_field() {
    let store = Arc::new(FlakyStore::new().with_fault("5000", Fault::AlwaysTransient));
    let router = storage(store.clone());

    let body = json!([
        { "localityId": "3000", "localityName": "Jerusalem" },
        { "localityId": "5000", "localityName": "Tel Aviv - Yafo" }
    ]);
    let (status, error) =
        status_and_json(send(&router, post_json("/localities", &body)).await).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error["failedLocalityIds"], json!(["5000"]));
    assert_eq!(store.attempts("5000"), tiers::fast_policy().max_retries + 1);
}

#[tokio::test]
async fn identical_reads_share_an_etag_and_revalidate() {
    let router = storage(Arc::new(FlakyStore::new()));
    let body = json!([{ "localityId": "70", "localityName": "Ashdod" }]);
    assert_eq!(
        send(&router, post_json("/localities", &body)).await.status(),
        StatusCode::OK
    );

    let first = send(&router, get("/localities")).await;
    let second = send(&router, get("/localities")).await;
    let etag = header_of(&first, "etag");
    assert!(etag.is_some());
    assert_eq!(etag, header_of(&second, "etag"));
    assert_eq!(body_json(first).await, body_json(second).await);

    let Some(etag) = etag else {
        return;
    };
    let revalidated = send(&router, get_if_none_match("/localities", &etag)).await;
    assert_eq!(revalidated.status(), StatusCode::NOT_MODIFIED);
    assert_eq!(header_of(&revalidated, "etag"), Some(etag));

    let stale = send(&router, get_if_none_match("/localities", "\"stale\"")).await;
    assert_eq!(stale.status(), StatusCode::OK);
}

#[tokio::test]
async fn write_changes_the_etag() {
    let router = storage(Arc::new(FlakyStore::new()));
    let first_body = json!([{ "localityId": "70", "localityName": "Ashdod" }]);
    send(&router, post_json("/localities", &first_body)).await;
    let before = header_of(&send(&router, get("/localities")).await, "etag");

    let second_body = json!([{ "localityId": "3000", "localityName": "Jerusalem" }]);
    send(&router, post_json("/localities", &second_body)).await;
    let after = send(&router, get("/localities")).await;

    assert_eq!(header_of(&after, "x-cache").as_deref(), Some("miss"));
    assert_ne!(before, header_of(&after, "etag"));
    assert_eq!(body_json(after).await.as_array().map(Vec::len), Some(2));
}

#[tokio::test]
async fn late_street_batch_does_not_evict() {
    let router = storage(Arc::new(FlakyStore::new()));

    let fresh = batch(vec![street("70", "101", "Herzl")], 0);
    send(&router, post_json("/streets", &fresh)).await;
    let warm = send(&router, get("/localities/70/streets")).await;
    let etag = header_of(&warm, "etag");

    let late = batch(vec![street("70", "102", "Weizmann")], 10);
    assert_eq!(
        send(&router, post_json("/streets", &late)).await.status(),
        StatusCode::OK
    );

    let cached = send(&router, get("/localities/70/streets")).await;
    assert_eq!(header_of(&cached, "x-cache").as_deref(), Some("hit"));
    assert_eq!(header_of(&cached, "etag"), etag);
    let expected: BTreeSet<String> = ["101"].iter().map(|s| s.to_string()).collect();
    assert_eq!(street_ids(&body_json(cached).await), expected);
}

#[tokio::test]
async fn fully_rejected_batch_keeps_the_cache_warm() {
    let router = storage(Arc::new(FlakyStore::new().with_fault("102", Fault::Rejected)));

    send(&router, post_json("/streets", &batch(vec![street("70", "101", "Herzl")], 30))).await;
    let etag = header_of(&send(&router, get("/localities/70/streets")).await, "etag");

    let rejected = batch(vec![street("70", "102", "Weizmann")], 0);
    let (status, error) =
        status_and_json(send(&router, post_json("/streets", &rejected)).await).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error["failedStreetIds"], json!(["102"]));

    let cached = send(&router, get("/localities/70/streets")).await;
    assert_eq!(header_of(&cached, "x-cache").as_deref(), Some("hit"));
    assert_eq!(header_of(&cached, "etag"), etag);

    // A batch with an older timestamp than the rejected one still evicts.
    let older = batch(vec![street("70", "103", "Rothschild")], 10);
    assert_eq!(
        send(&router, post_json("/streets", &older)).await.status(),
        StatusCode::OK
    );
    let refreshed = send(&router, get("/localities/70/streets")).await;
    assert_eq!(header_of(&refreshed, "x-cache").as_deref(), Some("miss"));
}

#[tokio::test]
async fn unknown_locality_is_not_found() {
    let router = storage(Arc::new(FlakyStore::new()));
    let (status, error) = status_and_json(send(&router, get("/localities/42")).await).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(error["code"], "ENTITY_NOT_FOUND");
}

#[tokio::test]
async fn reads_advertise_json() {
    let router = storage(Arc::new(FlakyStore::new()));
    let body = json!([{ "localityId": "70", "localityName": "Ashdod" }]);
    send(&router, post_json("/localities", &body)).await;
    let response = send(&router, get("/localities/70")).await;
    assert_eq!(
        header_of(&response, header::CONTENT_TYPE.as_str()).as_deref(),
        Some("application/json")
    );
    assert_eq!(body_json(response).await["localityName"], "Ashdod");
}

// ============================================================================
// PROPERTIES
// ============================================================================

fn test_runtime() -> Result<Runtime, TestCaseError> {
    Runtime::new().map_err(|e| TestCaseError::fail(format!("Failed to create runtime: {}", e)))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Every upserted locality reads back, and re-upserting is idempotent.
    #[test]
    fn prop_localities_read_back(localities in arb_localities(20)) {
        prop_assume!(!localities.is_empty());
        let rt = test_runtime()?;
        let (first, second) = rt.block_on(async {
            let router = storage(Arc::new(FlakyStore::new()));
            let body = serde_json::to_value(&localities).unwrap_or(Value::Null);
            send(&router, post_json("/localities", &body)).await;
            let first = body_json(send(&router, get("/localities")).await).await;
            send(&router, post_json("/localities", &body)).await;
            let second = body_json(send(&router, get("/localities")).await).await;
            (first, second)
        });

        let read: BTreeSet<String> = first
            .as_array()
            .map(|all| all.iter().filter_map(|l| l["localityId"].as_str().map(str::to_string)).collect())
            .unwrap_or_default();
        let written: BTreeSet<String> = localities.iter().map(|l| l.locality_id.clone()).collect();
        prop_assert_eq!(read, written);
        prop_assert_eq!(first, second);
    }

    /// Keyed streets land under their locality; unkeyed ones are never written.
    #[test]
    fn prop_only_keyed_streets_are_stored(
        streets in arb_streets_with_missing_keys(24),
        update_timestamp in arb_timestamp(),
    ) {
        prop_assume!(!streets.is_empty());
        let mut expected: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for s in streets.iter().filter(|s| !s.locality_id.is_empty()) {
            expected.entry(s.locality_id.clone()).or_default().insert(s.street_id.clone());
        }

        let rt = test_runtime()?;
        let (status, stored) = rt.block_on(async {
            let router = storage(Arc::new(FlakyStore::new()));
            let body = serde_json::to_value(StreetBatch { streets, update_timestamp })
                .unwrap_or(Value::Null);
            let status = send(&router, post_json("/streets", &body)).await.status();
            let mut stored = BTreeMap::new();
            for locality in expected.keys() {
                let path = format!("/localities/{}/streets", locality);
                let read = body_json(send(&router, get(&path)).await).await;
                stored.insert(locality.clone(), street_ids(&read));
            }
            (status, stored)
        });

        prop_assert_eq!(status, StatusCode::OK);
        prop_assert_eq!(stored, expected);
    }
}
