//! Dashboard routes
//!
//! Every map request carries the full selection and re-runs the pipeline
//! against the shared, read-only dataset:
//! - GET /map, GET /            (HTML page)
//! - GET /api/v1/map            (map document JSON)
//! - GET /api/v1/map/bubbles    (bubble layer GeoJSON)
//! - GET /api/v1/options        (selector choices)

use axum::{
    extract::{rejection::QueryRejection, Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use climate_map::filter::{
    DemographicFilters, EDUCATION_OPTIONS, GENDER_OPTIONS, INCOME_OPTIONS, PERCEIVED_SES_OPTIONS,
};
use climate_map::{
    build_map, render, risk_selection_label, FilterSelection, MapDocument, MapError, MapSelection,
    OutcomeVariable, RiskFactor, INTERVENTIONS,
};

use crate::AppState;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    BadSelection(#[from] MapError),
    #[error("{0}")]
    BadQuery(#[from] QueryRejection),
    #[error("render failed: {0}")]
    Render(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self {
            ApiError::BadSelection(_) | ApiError::BadQuery(_) => StatusCode::BAD_REQUEST,
            ApiError::Render(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

/// Query string of a map request; list facets are comma-separated
#[derive(Debug, Default, Deserialize)]
pub struct MapQuery {
    pub regions: Option<String>,
    pub income_groups: Option<String>,
    pub risk_factor: Option<String>,
    pub outcome: Option<String>,
    // Demographics (collected, not applied)
    pub age_min: Option<u8>,
    pub age_max: Option<u8>,
    pub genders: Option<String>,
    pub education: Option<String>,
    pub personal_income: Option<String>,
    pub perceived_ses: Option<String>,
    pub sp_ideology_min: Option<u8>,
    pub sp_ideology_max: Option<u8>,
    pub econ_ideology_min: Option<u8>,
    pub econ_ideology_max: Option<u8>,
}

fn split_list(value: Option<&str>) -> Vec<String> {
    value
        .map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}

impl MapQuery {
    pub fn selection(&self) -> Result<MapSelection, ApiError> {
        let defaults = DemographicFilters::default();
        let demographics = DemographicFilters {
            age: (
                self.age_min.unwrap_or(defaults.age.0),
                self.age_max.unwrap_or(defaults.age.1),
            ),
            genders: split_list(self.genders.as_deref()),
            education: split_list(self.education.as_deref()),
            personal_income: split_list(self.personal_income.as_deref()),
            perceived_ses: split_list(self.perceived_ses.as_deref()),
            sociopolitical_ideology: (
                self.sp_ideology_min.unwrap_or(defaults.sociopolitical_ideology.0),
                self.sp_ideology_max.unwrap_or(defaults.sociopolitical_ideology.1),
            ),
            economic_ideology: (
                self.econ_ideology_min.unwrap_or(defaults.economic_ideology.0),
                self.econ_ideology_max.unwrap_or(defaults.economic_ideology.1),
            ),
        };

        let outcome = match self.outcome.as_deref() {
            Some(o) => o.parse::<OutcomeVariable>()?,
            None => OutcomeVariable::default(),
        };

        Ok(MapSelection {
            filter: FilterSelection::new(
                split_list(self.regions.as_deref()),
                split_list(self.income_groups.as_deref()),
            ),
            risk_factor: RiskFactor::parse_selection(self.risk_factor.as_deref().unwrap_or("none"))?,
            outcome,
            demographics,
        })
    }
}

#[derive(Serialize)]
pub struct OptionItem {
    pub value: Option<String>,
    pub label: String,
}

#[derive(Serialize)]
pub struct DemographicOptions {
    pub age_range: (u8, u8),
    pub genders: Vec<&'static str>,
    pub education: Vec<&'static str>,
    pub personal_income: Vec<&'static str>,
    pub perceived_ses: Vec<&'static str>,
    pub ideology_range: (u8, u8),
}

#[derive(Serialize)]
pub struct OptionsResponse {
    pub regions: Vec<String>,
    pub income_groups: Vec<String>,
    pub risk_factors: Vec<OptionItem>,
    pub outcomes: Vec<OptionItem>,
    pub interventions: Vec<OptionItem>,
    pub demographics: DemographicOptions,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/", get(map_page))
        .route("/map", get(map_page))
        .route("/api/v1/options", get(options))
        .route("/api/v1/map", get(map_document))
        .route("/api/v1/map/bubbles", get(map_bubbles))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "climate-map-gateway",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

fn build(state: &AppState, query: &MapQuery) -> Result<MapDocument, ApiError> {
    let selection = query.selection()?;
    tracing::debug!("Map request: {:?}", selection);
    Ok(build_map(&state.data, &selection))
}

async fn map_document(
    State(state): State<AppState>,
    query: Result<Query<MapQuery>, QueryRejection>,
) -> Result<Json<MapDocument>, ApiError> {
    let Query(query) = query?;
    Ok(Json(build(&state, &query)?))
}

async fn map_bubbles(
    State(state): State<AppState>,
    query: Result<Query<MapQuery>, QueryRejection>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let Query(query) = query?;
    let doc = build(&state, &query)?;
    Ok(Json(render::bubbles_to_geojson(&doc)))
}

async fn map_page(
    State(state): State<AppState>,
    query: Result<Query<MapQuery>, QueryRejection>,
) -> Result<Html<String>, ApiError> {
    let Query(query) = query?;
    let doc = build(&state, &query)?;
    let html = render::to_html(&doc).map_err(|e| ApiError::Render(e.to_string()))?;
    Ok(Html(html))
}

async fn options(State(state): State<AppState>) -> Json<OptionsResponse> {
    let risk_factors = std::iter::once(None)
        .chain(RiskFactor::ALL.into_iter().map(Some))
        .map(|r| OptionItem {
            value: r.map(|r| r.column().to_string()),
            label: risk_selection_label(r).to_string(),
        })
        .collect();

    let outcomes = OutcomeVariable::ALL
        .into_iter()
        .map(|o| OptionItem {
            value: Some(o.column().to_string()),
            label: o.label().to_string(),
        })
        .collect();

    let interventions = INTERVENTIONS
        .iter()
        .map(|(id, label)| OptionItem {
            value: Some(id.to_string()),
            label: label.to_string(),
        })
        .collect();

    let defaults = DemographicFilters::default();

    Json(OptionsResponse {
        regions: state.options.regions.clone(),
        income_groups: state.options.income_groups.clone(),
        risk_factors,
        outcomes,
        interventions,
        demographics: DemographicOptions {
            age_range: defaults.age,
            genders: GENDER_OPTIONS.to_vec(),
            education: EDUCATION_OPTIONS.to_vec(),
            personal_income: INCOME_OPTIONS.to_vec(),
            perceived_ses: PERCEIVED_SES_OPTIONS.to_vec(),
            ideology_range: defaults.sociopolitical_ideology,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use climate_map::{DataCache, DataPaths, Dataset};
    use std::io::Write;
    use tempfile::TempDir;
    use tower::ServiceExt;

    fn write_file(dir: &TempDir, name: &str, contents: &str) {
        let mut file = std::fs::File::create(dir.path().join(name)).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
    }

    fn test_state() -> (TempDir, AppState) {
        let dir = TempDir::new().unwrap();
        write_file(
            &dir,
            climate_map::loader::BOUNDARIES_FILE,
            r#"{"type": "FeatureCollection", "features": [
                {"type": "Feature", "id": "URY", "properties": {},
                 "geometry": {"type": "Point", "coordinates": [-55.8, -32.5]}},
                {"type": "Feature", "id": "DEU", "properties": {},
                 "geometry": {"type": "Point", "coordinates": [10.4, 51.2]}}
            ]}"#,
        );
        write_file(
            &dir,
            climate_map::loader::SURVEY_FILE,
            "country_code,intervention,belief_cc,policy_support,share_social_media,wept\n\
             URY,control,80,70,0.5,3\n\
             DEU,control,60,50,0.3,2\n\
             DEU,negative_emotions,90,75,0.6,4\n",
        );
        write_file(
            &dir,
            climate_map::loader::COUNTRIES_FILE,
            "country_code,country,region,income_group,risk_factor_1,risk_factor_2,lat,lon\n\
             URY,Uruguay,Latin America & Caribbean,High income,0.8,0.3,-32.5,-55.8\n\
             DEU,Germany,Europe & Central Asia,High income,0.4,,51.2,10.4\n",
        );
        write_file(
            &dir,
            climate_map::loader::BEST_INTERVENTIONS_FILE,
            "country_code,outcome,intervention,mean_value,ci_low,ci_high,p_value\n\
             URY,belief_cc,letter_future_gen,85.0,80.1,89.9,0.021\n",
        );

        let mut cache = DataCache::new();
        let data = Dataset::load(&DataPaths::in_dir(dir.path()), &mut cache).unwrap();
        (dir, AppState::new(data))
    }

    async fn get(app: Router, uri: &str) -> (StatusCode, String) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[test]
    fn test_query_selection_defaults() {
        let selection = MapQuery::default().selection().unwrap();
        assert_eq!(selection, MapSelection::default());
    }

    #[test]
    fn test_query_lists_split_on_commas() {
        let query = MapQuery {
            regions: Some("Europe & Central Asia, Latin America & Caribbean".to_string()),
            risk_factor: Some("risk_factor_2".to_string()),
            age_min: Some(30),
            ..MapQuery::default()
        };
        let selection = query.selection().unwrap();
        assert_eq!(
            selection.filter.regions,
            vec!["Europe & Central Asia", "Latin America & Caribbean"]
        );
        assert!(selection.filter.income_groups.is_empty());
        assert_eq!(selection.risk_factor, Some(RiskFactor::RiskFactor2));
        assert_eq!(selection.demographics.age, (30, 70));
    }

    #[tokio::test]
    async fn test_map_document_filters_by_region() {
        let (_dir, state) = test_state();
        let (status, body) = get(
            router(state),
            "/api/v1/map?regions=Latin%20America%20%26%20Caribbean&risk_factor=risk_factor_1",
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        let doc: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(doc["choropleth"]["values"]["URY"], 80.0);
        assert!(doc["choropleth"]["values"].get("DEU").is_none());
        assert_eq!(doc["layer_control"], true);
        assert_eq!(doc["bubbles"]["markers"][0]["radius"], 11.0);
        assert_eq!(
            doc["bubbles"]["markers"][0]["popup"]["best_label"],
            "Letter Future Gen"
        );
    }

    #[tokio::test]
    async fn test_map_without_risk_factor() {
        let (_dir, state) = test_state();
        let (status, body) = get(router(state), "/api/v1/map?outcome=wept").await;

        assert_eq!(status, StatusCode::OK);
        let doc: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert!(doc["bubbles"].is_null());
        assert_eq!(doc["layer_control"], false);
        assert_eq!(doc["choropleth"]["name"], "Work for Environmental Protection Task");
        assert_eq!(doc["choropleth"]["values"]["DEU"], 2.0);
    }

    #[tokio::test]
    async fn test_bad_outcome_is_400() {
        let (_dir, state) = test_state();
        let (status, body) = get(router(state), "/api/v1/map?outcome=happiness").await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.contains("Unknown outcome variable"));
    }

    #[tokio::test]
    async fn test_malformed_number_is_json_400() {
        let (_dir, state) = test_state();
        let (status, body) = get(router(state), "/api/v1/map?age_min=abc").await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        let err: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert!(err["error"].as_str().is_some_and(|e| e.contains("query string")));
    }

    #[tokio::test]
    async fn test_bubbles_geojson() {
        let (_dir, state) = test_state();
        let (status, body) = get(router(state), "/api/v1/map/bubbles?risk_factor=1").await;

        assert_eq!(status, StatusCode::OK);
        let geojson: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(geojson["type"], "FeatureCollection");
        assert_eq!(geojson["features"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_map_page_html() {
        let (_dir, state) = test_state();
        let (status, body) = get(router(state), "/map?risk_factor=risk_factor_1").await;

        assert_eq!(status, StatusCode::OK);
        assert!(body.starts_with("<!doctype html>"));
        assert!(body.contains("leaflet@1.9.4"));
    }

    #[tokio::test]
    async fn test_options() {
        let (_dir, state) = test_state();
        let (status, body) = get(router(state), "/api/v1/options").await;

        assert_eq!(status, StatusCode::OK);
        let options: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(
            options["regions"],
            serde_json::json!(["Europe & Central Asia", "Latin America & Caribbean"])
        );
        assert_eq!(options["income_groups"], serde_json::json!(["High income"]));
        assert_eq!(options["risk_factors"][0]["label"], "None");
        assert!(options["risk_factors"][0]["value"].is_null());
        assert_eq!(options["outcomes"].as_array().unwrap().len(), 4);
        assert_eq!(options["interventions"].as_array().unwrap().len(), 11);
    }

    #[tokio::test]
    async fn test_health() {
        let (_dir, state) = test_state();
        let (status, body) = get(router(state), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("healthy"));
    }
}
