use crate::helpers::{hourly_rows, spawn_app, MockMaps, MockStore};
use axum::http::StatusCode;
use time::{
    macros::{datetime, format_description},
    Duration, OffsetDateTime,
};
use wxgrid::{
    location::{self, Place, PlaceQuery},
    Coordinate, Family, SeriesSource,
};

const WINDOW: &str = "start=2020-07-01T00:00&end=2020-07-01T03:00&attributes=tmp";

#[tokio::test]
async fn identical_requests_are_served_from_cache() {
    let mut store = MockStore::new();
    store
        .expect_series()
        .times(1)
        .returning(|request| Ok(hourly_rows(request, |_, _| Some(19.25))));

    let test_app = spawn_app(store, MockMaps::new()).await;
    let uri = format!("/hourly?lat=33.95&lon=-83.38&{}&options=utc", WINDOW);
    let (status, first) = test_app.get(&uri).await;
    assert_eq!(status, StatusCode::OK);
    test_app.db.flush().await.unwrap();

    let (status, second) = test_app.get(&uri).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first, second);
}

#[tokio::test]
async fn places_are_geocoded_once() {
    let mut store = MockStore::new();
    store
        .expect_series()
        .times(2)
        .returning(|request| Ok(hourly_rows(request, |_, _| Some(19.25))));
    let mut maps = MockMaps::new();
    maps.expect_geocode()
        .withf(|query| *query == PlaceQuery::Name("athens ga".to_string()))
        .times(1)
        .returning(|_| {
            Ok(Some(Place {
                coordinate: Coordinate::new(33.95, -83.38).unwrap(),
                viewport: None,
            }))
        });

    let test_app = spawn_app(store, maps).await;
    let (status, _) = test_app
        .get(&format!("/hourly?location=Athens,%20GA&{}&options=utc", WINDOW))
        .await;
    assert_eq!(status, StatusCode::OK);
    test_app.db.flush().await.unwrap();

    let (status, _) = test_app
        .get(&format!("/hourly?location=athens%20ga&{}&options=utc,nocache", WINDOW))
        .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn unknown_places_are_client_errors() {
    let mut maps = MockMaps::new();
    maps.expect_geocode().times(1).returning(|_| Ok(None));

    let test_app = spawn_app(MockStore::new(), maps).await;
    let (status, _) = test_app
        .get(&format!("/hourly?location=nowhere%20at%20all&{}", WINDOW))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn geocoder_outages_are_bad_gateway() {
    let mut maps = MockMaps::new();
    maps.expect_geocode()
        .times(1)
        .returning(|_| Err(location::Error::Service("OVER_QUERY_LIMIT".to_string())));

    let test_app = spawn_app(MockStore::new(), maps).await;
    let (status, _) = test_app
        .get(&format!("/hourly?location=athens&{}", WINDOW))
        .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn failed_offset_lookups_fall_back_to_utc_uncached() {
    let mut store = MockStore::new();
    store
        .expect_series()
        .withf(|request| request.start == datetime!(2020-07-01 0:00 UTC))
        .times(2)
        .returning(|request| Ok(hourly_rows(request, |_, _| Some(19.25))));
    let mut maps = MockMaps::new();
    maps.expect_utc_offset()
        .times(2)
        .returning(|_| Err(location::Error::Service("UNKNOWN_ERROR".to_string())));

    let test_app = spawn_app(store, maps).await;
    let (status, body) = test_app
        .get_json(&format!("/hourly?lat=33.95&lon=-83.38&{}", WINDOW))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["rows"][0]["date"], "2020-07-01T00:00:00Z");
    test_app.db.flush().await.unwrap();

    let (status, _) = test_app
        .get(&format!("/hourly?lat=33.95&lon=-83.38&{}&options=nocache", WINDOW))
        .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn predicted_mode_switches_to_climatology_after_newest_live_hour() {
    let mut store = MockStore::new();
    store
        .expect_live_extent()
        .withf(|family, cells| *family == Family::Model && cells.len() == 1)
        .times(1)
        .returning(|_, _| Ok(Some(datetime!(2020-07-01 1:00 UTC))));
    store.expect_series().times(2).returning(|request| {
        let mut rows = hourly_rows(request, |_, _| Some(19.25));
        if request.source == SeriesSource::Climatology {
            rows.iter_mut().for_each(|row| row.predicted = true);
        }
        Ok(rows)
    });

    let test_app = spawn_app(store, MockMaps::new()).await;
    let (status, body) = test_app
        .get_json(&format!(
            "/hourly?lat=33.95&lon=-83.38&{}&options=utc,predicted",
            WINDOW
        ))
        .await;

    assert_eq!(status, StatusCode::OK);
    let predicted: Vec<bool> = body["rows"]
        .as_array()
        .unwrap()
        .iter()
        .map(|row| row["predicted"].as_bool().unwrap())
        .collect();
    assert_eq!(predicted, vec![false, false, true, true]);
}

#[tokio::test]
async fn windows_reaching_past_now_continue_from_climatology() {
    let hour = format_description!("[year]-[month]-[day]T[hour]:00");
    let now = OffsetDateTime::now_utc();
    let uri = format!(
        "/hourly?lat=33.95&lon=-83.38&start={}&end={}&attributes=tmp&options=utc",
        (now - Duration::hours(1)).format(&hour).unwrap(),
        (now + Duration::hours(2)).format(&hour).unwrap()
    );

    let mut store = MockStore::new();
    store.expect_series().times(2).returning(|request| {
        if request.source != SeriesSource::Climatology {
            return Ok(hourly_rows(request, |_, _| Some(24.0)));
        }
        // calendar hours start at the first whole hour of the segment
        let mut aligned = request.clone();
        aligned.start = aligned
            .start
            .replace_minute(0)
            .and_then(|t| t.replace_second(0))
            .and_then(|t| t.replace_nanosecond(0))
            .unwrap()
            + Duration::hours(1);
        let mut rows = hourly_rows(&aligned, |_, _| Some(22.0));
        rows.iter_mut().for_each(|row| row.predicted = true);
        Ok(rows)
    });

    let test_app = spawn_app(store, MockMaps::new()).await;
    let (status, body) = test_app.get_json(&uri).await;

    assert_eq!(status, StatusCode::OK);
    let predicted: Vec<bool> = body["rows"]
        .as_array()
        .unwrap()
        .iter()
        .map(|row| row["predicted"].as_bool().unwrap())
        .collect();
    assert_eq!(predicted.len(), 4);
    assert!(!predicted[0]);
    assert!(predicted[3]);
    assert!(predicted.windows(2).all(|pair| pair[0] <= pair[1]));
}

#[tokio::test]
async fn rectangles_read_every_model_cell_they_cover() {
    let mut store = MockStore::new();
    store
        .expect_series()
        .withf(|request| request.cells.len() == 6 && request.label.is_none())
        .times(1)
        .returning(|_| Ok(vec![]));

    let test_app = spawn_app(store, MockMaps::new()).await;
    let (status, body) = test_app
        .get_json(&format!(
            "/hourly?lat=33.9,34.1&lon=-83.5,-83.3&{}&options=rect,utc",
            WINDOW
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "no data");
}

#[tokio::test]
async fn health_checks_both_stores() {
    let mut store = MockStore::new();
    store.expect_health().times(1).returning(|| Ok(()));

    let test_app = spawn_app(store, MockMaps::new()).await;
    let (status, body) = test_app.get("/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"ok");
}
