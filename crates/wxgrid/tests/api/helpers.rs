use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use mockall::mock;
use std::{collections::BTreeMap, sync::Arc};
use time::{Duration, OffsetDateTime};
use tower::ServiceExt;
use uuid::Uuid;
use wxgrid::{
    app,
    db::grid_data,
    location::{self, Place, PlaceQuery},
    AppState, Attribute, Coordinate, Database, Family, Geocoder, GridCell, GridData, ResultRow,
    SeriesRequest, WeatherService,
};

mock! {
    pub Store {}
    #[async_trait]
    impl GridData for Store {
        async fn series(&self, request: &SeriesRequest) -> Result<Vec<ResultRow>, grid_data::Error>;
        async fn live_extent(
            &self,
            family: Family,
            cells: &[GridCell],
        ) -> Result<Option<OffsetDateTime>, grid_data::Error>;
        async fn health(&self) -> Result<(), grid_data::Error>;
    }
}

mock! {
    pub Maps {}
    #[async_trait]
    impl Geocoder for Maps {
        async fn geocode(&self, query: &PlaceQuery) -> Result<Option<Place>, location::Error>;
        async fn utc_offset(&self, coordinate: Coordinate) -> Result<Option<i32>, location::Error>;
    }
}

pub struct TestApp {
    pub app: Router,
    pub db: Arc<Database>,
}

impl TestApp {
    pub async fn get(&self, uri: &str) -> (StatusCode, Vec<u8>) {
        let response = self
            .app
            .clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, body.to_vec())
    }

    pub async fn get_json(&self, uri: &str) -> (StatusCode, serde_json::Value) {
        let (status, body) = self.get(uri).await;
        let json = serde_json::from_slice(&body)
            .unwrap_or_else(|_| panic!("not json: {}", String::from_utf8_lossy(&body)));
        (status, json)
    }
}

pub async fn spawn_app(store: MockStore, maps: MockMaps) -> TestApp {
    let state_dir = std::env::temp_dir().join(format!("wxgrid-api-{}", Uuid::now_v7()));
    let db = Arc::new(
        Database::new(&state_dir.display().to_string())
            .await
            .unwrap(),
    );
    let store: Arc<dyn GridData> = Arc::new(store);
    let maps: Arc<dyn Geocoder> = Arc::new(maps);
    let weather = Arc::new(WeatherService::new(
        store,
        db.clone(),
        maps,
        Duration::hours(3),
    ));
    TestApp {
        app: app(AppState { weather }),
        db,
    }
}

/// Hourly rows for every hour of `request`'s window, shaped the way the
/// store would report them.
pub fn hourly_rows(
    request: &SeriesRequest,
    value: impl Fn(Attribute, OffsetDateTime) -> Option<f64>,
) -> Vec<ResultRow> {
    let coordinate = request
        .label
        .unwrap_or_else(|| request.cells[0].center());
    let mut rows = vec![];
    let mut at = request.start;
    while at <= request.end {
        let values: BTreeMap<Attribute, Option<f64>> = request
            .attributes
            .iter()
            .map(|attribute| (*attribute, value(*attribute, at)))
            .collect();
        rows.push(ResultRow {
            timestamp: at.to_offset(request.offset),
            coordinate,
            values,
            source: None,
            predicted: false,
        });
        at += Duration::hours(1);
    }
    rows
}
