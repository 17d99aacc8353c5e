use crate::helpers::{hourly_rows, spawn_app, MockMaps, MockStore};
use axum::http::StatusCode;
use time::OffsetDateTime;
use wxgrid::Attribute;

/// 12 degC overnight rising to 25 degC at 15:00 UTC, 0.5 mm every hour.
fn summer_day(attribute: Attribute, at: OffsetDateTime) -> Option<f64> {
    match attribute {
        Attribute::AirTemperature => Some(if at.hour() == 15 {
            25.0
        } else if at.hour() < 6 {
            12.0
        } else {
            18.0
        }),
        Attribute::Precipitation => Some(0.5),
        _ => None,
    }
}

#[tokio::test]
async fn daily_buckets_carry_sums_and_degree_days() {
    let mut store = MockStore::new();
    store
        .expect_series()
        .withf(|request| {
            request.attributes.contains(&Attribute::AirTemperature)
                && request.attributes.contains(&Attribute::Precipitation)
        })
        .times(1)
        .returning(|request| Ok(hourly_rows(request, summer_day)));

    let test_app = spawn_app(store, MockMaps::new()).await;
    let (status, body) = test_app
        .get_json(
            "/daily?lat=33.95&lon=-83.38&start=2020-07-01&end=2020-07-01&attributes=precipitation&options=utc,noradar&gddbase=10&gddmin=5&gddmax=20",
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    let rows = body["rows"].as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["date"], "2020-07-01");
    assert_eq!(rows[0]["precipitation"], 12.0);
    assert_eq!(rows[0]["gdd"], 6.0);
    assert!(rows[0].get("min_air_temperature").is_none());
}

#[tokio::test]
async fn state_attributes_get_min_max_avg_per_month() {
    let mut store = MockStore::new();
    store
        .expect_series()
        .times(1)
        .returning(|request| Ok(hourly_rows(request, summer_day)));

    let test_app = spawn_app(store, MockMaps::new()).await;
    let (status, body) = test_app
        .get_json(
            "/daily?lat=33.95&lon=-83.38&start=2020-06-30&end=2020-07-02&attributes=tmp&options=utc&group=month",
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    let rows = body["rows"].as_array().unwrap();
    let months: Vec<i64> = rows.iter().map(|r| r["month"].as_i64().unwrap()).collect();
    assert_eq!(months, vec![6, 7]);
    assert_eq!(rows[1]["min_air_temperature"], 12.0);
    assert_eq!(rows[1]["max_air_temperature"], 25.0);
    assert!(rows[1].get("date").is_none());
}

#[tokio::test]
async fn stats_run_over_daily_buckets() {
    let mut store = MockStore::new();
    store
        .expect_series()
        .times(1)
        .returning(|request| Ok(hourly_rows(request, summer_day)));

    let test_app = spawn_app(store, MockMaps::new()).await;
    let (status, body) = test_app
        .get_json(
            "/daily?lat=33.95&lon=-83.38&start=2020-07-01&end=2020-07-03&attributes=precipitation&options=utc,noradar&group=year&stats=sum(precipitation),count(precipitation)",
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    let rows = body["rows"].as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["year"], 2020);
    assert_eq!(rows[0]["sum_precipitation"], 36.0);
    assert_eq!(rows[0]["count_precipitation"], 3.0);
}

#[tokio::test]
async fn unknown_stats_columns_are_rejected() {
    let test_app = spawn_app(MockStore::new(), MockMaps::new()).await;
    let (status, body) = test_app
        .get("/daily?lat=33.95&lon=-83.38&stats=sum(min_precipitation)")
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, b"ERROR");
}
