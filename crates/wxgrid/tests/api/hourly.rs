use crate::helpers::{hourly_rows, spawn_app, MockMaps, MockStore};
use axum::http::StatusCode;
use time::{
    macros::{datetime, format_description},
    Duration, OffsetDateTime,
};
use wxgrid::{Attribute, Family, SeriesSource};

#[tokio::test]
async fn point_rows_are_reported_on_the_local_clock() {
    let mut store = MockStore::new();
    store
        .expect_series()
        .withf(|request| {
            request.source == SeriesSource::Live(Family::Model)
                && request.start == datetime!(2020-07-01 5:00 UTC)
                && request.end == datetime!(2020-07-02 4:59:59 UTC)
                && request.attributes == vec![Attribute::AirTemperature]
        })
        .times(1)
        .returning(|request| Ok(hourly_rows(request, |_, _| Some(21.5))));
    let mut maps = MockMaps::new();
    maps.expect_utc_offset()
        .times(1)
        .returning(|_| Ok(Some(-18_000)));

    let test_app = spawn_app(store, maps).await;
    let (status, body) = test_app
        .get_json("/hourly?lat=33.95&lon=-83.38&start=2020-07-01&end=2020-07-01&attr=tmp")
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    let rows = body["rows"].as_array().unwrap();
    assert_eq!(rows.len(), 24);
    assert_eq!(rows[0]["date"], "2020-07-01T00:00:00-05:00");
    assert_eq!(rows[0]["air_temperature"], 21.5);
    assert!(rows[0].get("lat").is_none());
    assert_eq!(rows[0]["predicted"], false);
}

#[tokio::test]
async fn radar_precipitation_wins_where_present() {
    let mut store = MockStore::new();
    store.expect_series().times(2).returning(|request| {
        let rows = match request.source {
            SeriesSource::Live(Family::Model) => hourly_rows(request, |_, _| Some(1.0)),
            _ => hourly_rows(request, |_, _| Some(2.0))
                .into_iter()
                .filter(|row| row.timestamp == datetime!(2020-07-01 1:00 UTC))
                .collect(),
        };
        Ok(rows)
    });

    let test_app = spawn_app(store, MockMaps::new()).await;
    let (status, body) = test_app
        .get_json(
            "/hourly?lat=33.95&lon=-83.38&start=2020-07-01T00:00&end=2020-07-01T02:00&attributes=precipitation&options=utc",
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    let rows = body["rows"].as_array().unwrap();
    let values: Vec<f64> = rows
        .iter()
        .map(|row| row["precipitation"].as_f64().unwrap())
        .collect();
    assert_eq!(values, vec![1.0, 2.0, 1.0]);
    let sources: Vec<&str> = rows
        .iter()
        .map(|row| row["precipitation_source"].as_str().unwrap())
        .collect();
    assert_eq!(sources, vec!["model", "radar", "model"]);
}

#[tokio::test]
async fn filters_see_reconciled_precipitation() {
    let mut store = MockStore::new();
    store
        .expect_series()
        .withf(|request| request.filter.is_none())
        .times(2)
        .returning(|request| {
            let rows = match request.source {
                SeriesSource::Live(Family::Model) => hourly_rows(request, |_, _| Some(0.5)),
                _ => hourly_rows(request, |_, _| Some(3.0))
                    .into_iter()
                    .filter(|row| row.timestamp == datetime!(2020-07-01 1:00 UTC))
                    .collect(),
            };
            Ok(rows)
        });

    let test_app = spawn_app(store, MockMaps::new()).await;
    let (status, body) = test_app
        .get_json(
            "/hourly?lat=33.95&lon=-83.38&start=2020-07-01T00:00&end=2020-07-01T02:00&attributes=precipitation&options=utc&where=precipitation%20%3E%201",
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    let rows = body["rows"].as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["date"], "2020-07-01T01:00:00Z");
    assert_eq!(rows[0]["precipitation"], 3.0);
    assert_eq!(rows[0]["precipitation_source"], "radar");
}

#[tokio::test]
async fn flagged_radar_hours_fall_back_to_the_model() {
    let mut store = MockStore::new();
    store.expect_series().times(2).returning(|request| {
        let value = match request.source {
            SeriesSource::Live(Family::Model) => 0.75,
            _ => 6.0,
        };
        Ok(hourly_rows(request, move |_, _| Some(value)))
    });

    let test_app = spawn_app(store, MockMaps::new()).await;
    test_app
        .db
        .add_missing_radar_hours(vec![datetime!(2020-07-01 1:00 UTC)])
        .await
        .unwrap();
    let (status, body) = test_app
        .get_json(
            "/hourly?lat=33.95&lon=-83.38&start=2020-07-01T00:00&end=2020-07-01T02:00&attributes=precipitation&options=utc",
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    let rows: Vec<(f64, &str)> = body["rows"]
        .as_array()
        .unwrap()
        .iter()
        .map(|row| {
            (
                row["precipitation"].as_f64().unwrap(),
                row["precipitation_source"].as_str().unwrap(),
            )
        })
        .collect();
    assert_eq!(
        rows,
        vec![(6.0, "radar"), (0.75, "missing_radar"), (6.0, "radar")]
    );
}

#[tokio::test]
async fn recent_windows_are_extrapolated_up_to_now() {
    let hour = format_description!("[year]-[month]-[day]T[hour]:00");
    let now = OffsetDateTime::now_utc();
    let start = now - Duration::hours(2);
    let uri = format!(
        "/hourly?lat=33.95&lon=-83.38&start={}&end={}&attributes=precipitation&options=utc",
        start.format(&hour).unwrap(),
        now.format(&hour).unwrap()
    );

    let mut store = MockStore::new();
    store.expect_series().times(2).returning(|request| {
        let rows = match request.source {
            SeriesSource::Live(Family::Model) => hourly_rows(request, |_, _| Some(1.0))
                .into_iter()
                .take(1)
                .collect(),
            _ => vec![],
        };
        Ok(rows)
    });

    let test_app = spawn_app(store, MockMaps::new()).await;
    let (status, body) = test_app.get_json(&uri).await;

    assert_eq!(status, StatusCode::OK);
    let rows: Vec<(f64, &str)> = body["rows"]
        .as_array()
        .unwrap()
        .iter()
        .map(|row| {
            (
                row["precipitation"].as_f64().unwrap(),
                row["precipitation_source"].as_str().unwrap(),
            )
        })
        .collect();
    assert_eq!(
        rows,
        vec![(1.0, "model"), (0.0, "extrapolated"), (0.0, "extrapolated")]
    );
}

#[tokio::test]
async fn several_points_are_labelled_and_interleaved_by_date() {
    let mut store = MockStore::new();
    store
        .expect_series()
        .times(2)
        .returning(|request| Ok(hourly_rows(request, |_, _| Some(0.25))));

    let test_app = spawn_app(store, MockMaps::new()).await;
    let (_, body) = test_app
        .get_json(
            "/hourly?lat=33.95,34.5&lon=-83.38,-84.0&start=2020-07-01T00:00&end=2020-07-01T01:00&attributes=rh&options=utc",
        )
        .await;

    let rows = body["rows"].as_array().unwrap();
    let labels: Vec<(f64, &str)> = rows
        .iter()
        .map(|row| (row["lat"].as_f64().unwrap(), row["date"].as_str().unwrap()))
        .collect();
    assert_eq!(
        labels,
        vec![
            (33.95, "2020-07-01T00:00:00Z"),
            (34.5, "2020-07-01T00:00:00Z"),
            (33.95, "2020-07-01T01:00:00Z"),
            (34.5, "2020-07-01T01:00:00Z"),
        ]
    );
}

#[tokio::test]
async fn empty_coverage_is_no_data_not_an_error() {
    let mut store = MockStore::new();
    store.expect_series().returning(|_| Ok(vec![]));

    let test_app = spawn_app(store, MockMaps::new()).await;
    let (status, body) = test_app
        .get_json("/hourly?lat=30.0&lon=-90.0&start=2019-01-01&end=2019-01-02&options=utc")
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, serde_json::json!({"status": "no data", "rows": []}));
}

#[tokio::test]
async fn rejected_filters_never_reach_the_store() {
    let test_app = spawn_app(MockStore::new(), MockMaps::new()).await;
    let (status, body) = test_app
        .get("/hourly?lat=33.95&lon=-83.38&where=1%3D1%3B%20drop%20table%20cells")
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, b"ERROR");
}

#[tokio::test]
async fn mistyped_filters_are_rejected_before_the_store() {
    let test_app = spawn_app(MockStore::new(), MockMaps::new()).await;
    for filter in ["month(tmp)%20%3D%206", "date%20%3D%205", "abs(date)%20%3E%201"] {
        let (status, body) = test_app
            .get(&format!("/hourly?lat=33.95&lon=-83.38&where={}", filter))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, b"ERROR");
    }
}

#[tokio::test]
async fn input_errors_are_reported_before_any_lookup() {
    let test_app = spawn_app(MockStore::new(), MockMaps::new()).await;

    let (status, body) = test_app.get("/hourly?lat=33.9,34.0&lon=-83.3").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        String::from_utf8(body).unwrap(),
        "lat has 2 values but lon has 1"
    );

    let (status, _) = test_app
        .get("/hourly?lat=33.9&lon=-83.3&attributes=snowfall")
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = test_app.get("/hourly?lat=33.9&lon=-83.3&options=fast").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = test_app.get("/hourly?lat=10.0&lon=-83.3").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = test_app.get("/hourly?lat=33.9&lon=-83.3&group=month").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
