//! Map building: outcome choropleth, risk-factor bubbles and viewport
//!
//! A [`MapDocument`] is rebuilt from scratch for every selection. It is a
//! plain serializable description; [`crate::render`] turns it into a page.

use crate::filter::{filter_aggregates, filter_countries, DemographicFilters, FilterSelection};
use crate::loader::{feature_key, Dataset};
use crate::popup::{BestInterventionIndex, PopupSummary};
use crate::{
    BestInterventionStat, CountryAggregate, CountryMetadata, OutcomeVariable, RiskFactor,
    BASE_TILES, DEFAULT_CENTER, DEFAULT_ZOOM, RADIUS_MAX, RADIUS_MIN,
};
use geojson::FeatureCollection;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Number of equal-width colour bins
pub const CHOROPLETH_BINS: usize = 8;
pub const CHOROPLETH_FILL_OPACITY: f64 = 0.8;
pub const CHOROPLETH_LINE_OPACITY: f64 = 0.0;
/// Fill for boundary features without a value
pub const NAN_FILL_COLOR: &str = "black";

/// ColorBrewer sequential YlGn, 8 classes
pub const YLGN_8: [&str; CHOROPLETH_BINS] = [
    "#ffffe5", "#f7fcb9", "#d9f0a3", "#addd8e", "#78c679", "#41ab5d", "#238443", "#005a32",
];

pub const BUBBLE_FILL_COLOR: &str = "orangered";
pub const BUBBLE_FILL_OPACITY: f64 = 0.68;
pub const POPUP_MAX_WIDTH: u32 = 280;

/// Everything the user picked in the interface
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MapSelection {
    #[serde(default)]
    pub filter: FilterSelection,
    /// `None` suppresses the bubble layer and the layer control
    #[serde(default)]
    pub risk_factor: Option<RiskFactor>,
    #[serde(default)]
    pub outcome: OutcomeVariable,
    #[serde(default)]
    pub demographics: DemographicFilters,
}

/// Initial map view
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Viewport {
    /// `[[min_lat, min_lon], [max_lat, max_lon]]`
    Fit { bounds: [[f64; 2]; 2] },
    Default { center: [f64; 2], zoom: f64 },
}

impl Viewport {
    pub fn default_view() -> Self {
        Viewport::Default {
            center: DEFAULT_CENTER,
            zoom: DEFAULT_ZOOM,
        }
    }

    /// Bounding box of the given coordinates, or the default view if none
    pub fn fit<I>(coordinates: I) -> Self
    where
        I: IntoIterator<Item = (f64, f64)>,
    {
        let mut bounds: Option<[[f64; 2]; 2]> = None;
        for (lat, lon) in coordinates {
            let b = bounds.get_or_insert([[lat, lon], [lat, lon]]);
            b[0][0] = b[0][0].min(lat);
            b[0][1] = b[0][1].min(lon);
            b[1][0] = b[1][0].max(lat);
            b[1][1] = b[1][1].max(lon);
        }
        match bounds {
            Some(bounds) => Viewport::Fit { bounds },
            None => Self::default_view(),
        }
    }
}

/// Equal-width binned colour scale
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColorScale {
    /// `colors.len() + 1` ascending bin edges
    pub edges: Vec<f64>,
    pub colors: Vec<String>,
}

impl ColorScale {
    /// Bins spanning the observed range; a single distinct value is widened
    /// by 0.5 on each side. `None` when there is nothing to scale.
    pub fn from_values(values: impl IntoIterator<Item = f64>, palette: &[&str]) -> Option<Self> {
        let mut range: Option<(f64, f64)> = None;
        for v in values.into_iter().filter(|v| v.is_finite()) {
            let r = range.get_or_insert((v, v));
            r.0 = r.0.min(v);
            r.1 = r.1.max(v);
        }
        let (mut lo, mut hi) = range?;
        if palette.is_empty() {
            return None;
        }
        if lo == hi {
            lo -= 0.5;
            hi += 0.5;
        }

        let bins = palette.len();
        let width = (hi - lo) / bins as f64;
        let mut edges: Vec<f64> = (0..bins).map(|i| lo + width * i as f64).collect();
        edges.push(hi);

        Some(Self {
            edges,
            colors: palette.iter().map(|c| c.to_string()).collect(),
        })
    }

    /// Colour of the bin containing `value`; the top edge belongs to the last bin
    pub fn color_for(&self, value: f64) -> Option<&str> {
        let (first, last) = (*self.edges.first()?, *self.edges.last()?);
        if !value.is_finite() || value < first || value > last {
            return None;
        }
        let bin = self.edges[1..]
            .iter()
            .position(|&edge| value < edge)
            .unwrap_or(self.colors.len() - 1);
        self.colors.get(bin).map(String::as_str)
    }
}

/// Outcome choropleth bound to boundary features by country code
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChoroplethLayer {
    pub name: String,
    pub legend_name: String,
    pub outcome: OutcomeVariable,
    /// `None` when no filtered country has a value
    pub scale: Option<ColorScale>,
    pub fill_opacity: f64,
    pub line_opacity: f64,
    pub highlight: bool,
    pub nan_fill_color: String,
    /// Country code → outcome mean for the filtered aggregates
    pub values: BTreeMap<String, f64>,
    /// Boundary features with `value` and `fill_color` properties set
    pub features: FeatureCollection,
}

/// Linear min-max rescale of risk values onto the bubble radius range
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RadiusScale {
    pub vmin: f64,
    pub vmax: f64,
}

impl RadiusScale {
    pub fn from_values(values: impl IntoIterator<Item = f64>) -> Option<Self> {
        values
            .into_iter()
            .filter(|v| v.is_finite())
            .fold(None, |acc, v| match acc {
                None => Some(Self { vmin: v, vmax: v }),
                Some(s) => Some(Self {
                    vmin: s.vmin.min(v),
                    vmax: s.vmax.max(v),
                }),
            })
    }

    /// Midpoint radius for missing values or a zero-variance set
    pub fn radius(&self, value: Option<f64>) -> f64 {
        match value {
            Some(v) if v.is_finite() && self.vmax != self.vmin => {
                let t = (v - self.vmin) / (self.vmax - self.vmin);
                RADIUS_MIN + t * (RADIUS_MAX - RADIUS_MIN)
            }
            _ => (RADIUS_MIN + RADIUS_MAX) / 2.0,
        }
    }
}

/// One circle marker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BubbleMarker {
    pub country_code: String,
    /// `[lat, lon]`
    pub location: [f64; 2],
    pub radius: f64,
    pub value: Option<f64>,
    pub popup: PopupSummary,
    pub popup_html: String,
}

/// Risk-factor bubble overlay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BubbleLayer {
    pub name: String,
    pub risk_factor: RiskFactor,
    pub scale: RadiusScale,
    pub fill_color: String,
    pub fill_opacity: f64,
    pub popup_max_width: u32,
    pub markers: Vec<BubbleMarker>,
}

/// Complete description of one rendered map
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapDocument {
    pub tiles: String,
    pub viewport: Viewport,
    pub choropleth: ChoroplethLayer,
    pub bubbles: Option<BubbleLayer>,
    /// Shown only when the bubble layer is present
    pub layer_control: bool,
    pub selection: MapSelection,
    pub generated_at: String,
}

/// Build the choropleth for the filtered aggregates
pub fn build_choropleth(
    boundaries: &FeatureCollection,
    aggregates: &[&CountryAggregate],
    outcome: OutcomeVariable,
) -> ChoroplethLayer {
    let values: BTreeMap<String, f64> = aggregates
        .iter()
        .filter_map(|a| {
            a.value(outcome)
                .filter(|v| v.is_finite())
                .map(|v| (a.country_code.clone(), v))
        })
        .collect();

    let scale = ColorScale::from_values(values.values().copied(), &YLGN_8);

    let mut features = boundaries.clone();
    let mut coloured = 0;
    for feature in features.features.iter_mut() {
        let value = feature_key(feature).and_then(|k| values.get(&k).copied());
        let fill = value
            .and_then(|v| scale.as_ref().and_then(|s| s.color_for(v)))
            .map(str::to_string);
        if fill.is_some() {
            coloured += 1;
        }
        feature.set_property("value", serde_json::json!(value));
        feature.set_property(
            "fill_color",
            serde_json::json!(fill.unwrap_or_else(|| NAN_FILL_COLOR.to_string())),
        );
    }

    debug!(
        "Choropleth {}: {} values, {} of {} features coloured",
        outcome,
        values.len(),
        coloured,
        features.features.len()
    );

    ChoroplethLayer {
        name: outcome.label().to_string(),
        legend_name: format!("Scale for {}", outcome.label()),
        outcome,
        scale,
        fill_opacity: CHOROPLETH_FILL_OPACITY,
        line_opacity: CHOROPLETH_LINE_OPACITY,
        highlight: false,
        nan_fill_color: NAN_FILL_COLOR.to_string(),
        values,
        features,
    }
}

/// Build the bubble layer for the filtered countries
///
/// Countries without coordinates or without a value for the risk factor are
/// dropped. Returns `None` when nothing is left to draw.
pub fn build_bubbles(
    countries: &[&CountryMetadata],
    risk: RiskFactor,
    outcome: OutcomeVariable,
    best_interventions: &[BestInterventionStat],
) -> Option<BubbleLayer> {
    let drawable: Vec<(&CountryMetadata, (f64, f64), f64)> = countries
        .iter()
        .filter_map(|c| {
            let coords = c.coordinates()?;
            let value = c.risk_value(risk).filter(|v| v.is_finite())?;
            Some((*c, coords, value))
        })
        .collect();

    if drawable.is_empty() {
        info!("No countries with {} and coordinates; bubble layer omitted", risk.column());
        return None;
    }

    let scale = RadiusScale::from_values(drawable.iter().map(|(_, _, v)| *v))?;
    let index = BestInterventionIndex::new(best_interventions);

    let markers: Vec<BubbleMarker> = drawable
        .into_iter()
        .map(|(country, (lat, lon), value)| {
            let popup = PopupSummary::build(country, risk, outcome, &index);
            let radius = scale.radius(Some(value));
            debug!("Bubble {} value={:.3} radius={:.2}", country.country_code, value, radius);
            BubbleMarker {
                country_code: country.country_code.clone(),
                location: [lat, lon],
                radius,
                value: Some(value),
                popup_html: popup.to_html(),
                popup,
            }
        })
        .collect();

    info!(
        "Bubble layer {}: {} markers (range {:.3}..{:.3})",
        risk.column(),
        markers.len(),
        scale.vmin,
        scale.vmax
    );

    Some(BubbleLayer {
        name: format!("Risk factor: {}", risk.label()),
        risk_factor: risk,
        scale,
        fill_color: BUBBLE_FILL_COLOR.to_string(),
        fill_opacity: BUBBLE_FILL_OPACITY,
        popup_max_width: POPUP_MAX_WIDTH,
        markers,
    })
}

/// Viewport over the selected regions (income selection not applied), or
/// over every country when no region is selected
pub fn fit_viewport(countries: &[CountryMetadata], selection: &FilterSelection) -> Viewport {
    Viewport::fit(
        countries
            .iter()
            .filter(|c| selection.region_matches(c.region.as_deref()))
            .filter_map(CountryMetadata::coordinates),
    )
}

/// Run the full pipeline for one selection
pub fn build_map(data: &Dataset, selection: &MapSelection) -> MapDocument {
    selection.demographics.log_inert();

    let countries = filter_countries(&data.countries, &selection.filter);
    let aggregates = filter_aggregates(&data.aggregates, &countries);

    let choropleth = build_choropleth(&data.boundaries, &aggregates, selection.outcome);
    let bubbles = selection.risk_factor.and_then(|risk| {
        build_bubbles(&countries, risk, selection.outcome, &data.best_interventions)
    });
    let viewport = fit_viewport(&data.countries, &selection.filter);

    info!(
        "Built map: outcome={}, {} aggregates, bubbles={}, viewport={:?}",
        selection.outcome,
        aggregates.len(),
        bubbles.as_ref().map(|b| b.markers.len()).unwrap_or(0),
        viewport
    );

    MapDocument {
        tiles: BASE_TILES.to_string(),
        viewport,
        choropleth,
        layer_control: bubbles.is_some(),
        bubbles,
        selection: selection.clone(),
        generated_at: chrono::Utc::now().to_rfc3339(),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::{SurveyRecord, CONTROL_INTERVENTION};
    use geojson::{feature::Id, Feature, Geometry, Value};
    use proptest::prelude::*;
    use std::sync::Arc;

    pub(crate) fn country(
        code: &str,
        region: &str,
        income: &str,
        risk: Option<f64>,
        coords: Option<(f64, f64)>,
    ) -> CountryMetadata {
        CountryMetadata {
            country_code: code.to_string(),
            country: Some(code.to_lowercase()),
            region: Some(region.to_string()),
            income_group: Some(income.to_string()),
            risk_factor_1: risk,
            risk_factor_2: None,
            lat: coords.map(|c| c.0),
            lon: coords.map(|c| c.1),
        }
    }

    fn feature(code: &str) -> Feature {
        Feature {
            bbox: None,
            geometry: Some(Geometry::new(Value::Point(vec![0.0, 0.0]))),
            id: Some(Id::String(code.to_string())),
            properties: None,
            foreign_members: None,
        }
    }

    fn survey_row(code: &str, belief: f64) -> SurveyRecord {
        SurveyRecord {
            country_code: code.to_string(),
            intervention: CONTROL_INTERVENTION.to_string(),
            belief_cc: Some(belief),
            policy_support: Some(belief / 2.0),
            share_social_media: None,
            wept: None,
            age: None,
            gender: None,
            education: None,
            income: None,
            perceived_ses: None,
            sp_ideology: None,
            econ_ideology: None,
        }
    }

    pub(crate) fn sample_dataset() -> Dataset {
        let countries = vec![
            country("URY", "Latin America & Caribbean", "High income", Some(0.8), Some((-32.5, -55.8))),
            country("BOL", "Latin America & Caribbean", "Lower-middle income", Some(0.2), Some((-16.3, -63.6))),
            country("DEU", "Europe & Central Asia", "High income", Some(0.5), Some((51.2, 10.4))),
            country("AUS", "East Asia & Pacific", "High income", None, Some((-25.3, 133.8))),
            country("XKX", "Europe & Central Asia", "Upper-middle income", Some(0.9), None),
        ];
        let survey: Vec<SurveyRecord> = ["URY", "BOL", "DEU", "AUS"]
            .iter()
            .enumerate()
            .map(|(i, code)| survey_row(code, 10.0 * (i + 1) as f64))
            .collect();
        let best = vec![BestInterventionStat {
            country_code: "URY".to_string(),
            outcome: "belief_cc".to_string(),
            intervention: "dynamic_social_norms".to_string(),
            mean_value: 6.1,
            ci_low: 5.5,
            ci_high: 6.7,
            p_value: 0.004,
        }];
        let boundaries = FeatureCollection {
            bbox: None,
            features: ["URY", "BOL", "DEU", "AUS", "FRA"].iter().map(|c| feature(c)).collect(),
            foreign_members: None,
        };

        Dataset {
            boundaries: Arc::new(boundaries),
            aggregates: Arc::new(crate::aggregate_control(&survey)),
            survey: Arc::new(survey),
            countries: Arc::new(countries),
            best_interventions: Arc::new(best),
        }
    }

    fn latam() -> FilterSelection {
        FilterSelection::new(vec!["Latin America & Caribbean".to_string()], vec![])
    }

    #[test]
    fn test_radius_extremes_and_midpoint() {
        let scale = RadiusScale::from_values([0.2, 0.5, 0.8]).unwrap();
        assert_eq!(scale.radius(Some(0.2)), RADIUS_MIN);
        assert_eq!(scale.radius(Some(0.8)), RADIUS_MAX);
        assert_eq!(scale.radius(None), 11.0);

        let flat = RadiusScale::from_values([0.4, 0.4]).unwrap();
        assert_eq!(flat.radius(Some(0.4)), 11.0);
        assert!(RadiusScale::from_values(std::iter::empty::<f64>()).is_none());
    }

    #[test]
    fn test_single_value_bubbles_get_midpoint() {
        let rows = [
            country("AAA", "R", "I", Some(3.0), Some((1.0, 1.0))),
            country("BBB", "R", "I", Some(3.0), Some((2.0, 2.0))),
        ];
        let refs: Vec<&CountryMetadata> = rows.iter().collect();
        let layer =
            build_bubbles(&refs, RiskFactor::RiskFactor1, OutcomeVariable::BeliefCc, &[]).unwrap();
        assert!(layer.markers.iter().all(|m| m.radius == 11.0));
    }

    #[test]
    fn test_color_scale_bins() {
        let scale = ColorScale::from_values([0.0, 8.0], &YLGN_8).unwrap();
        assert_eq!(scale.edges.len(), 9);
        assert_eq!(scale.edges[1], 1.0);
        assert_eq!(scale.color_for(0.0), Some(YLGN_8[0]));
        assert_eq!(scale.color_for(1.0), Some(YLGN_8[1]));
        assert_eq!(scale.color_for(8.0), Some(YLGN_8[7]));
        assert_eq!(scale.color_for(8.5), None);

        let single = ColorScale::from_values([5.0], &YLGN_8).unwrap();
        assert_eq!(single.edges[0], 4.5);
        assert_eq!(single.edges[8], 5.5);
        assert!(single.color_for(5.0).is_some());

        assert!(ColorScale::from_values(std::iter::empty::<f64>(), &YLGN_8).is_none());
    }

    #[test]
    fn test_viewport_fit_and_default() {
        assert_eq!(
            Viewport::fit([(-32.5, -55.8), (-16.3, -63.6)]),
            Viewport::Fit {
                bounds: [[-32.5, -63.6], [-16.3, -55.8]]
            }
        );
        assert_eq!(Viewport::fit(std::iter::empty::<(f64, f64)>()), Viewport::default_view());
    }

    #[test]
    fn test_uruguay_scenario() {
        let data = sample_dataset();
        let selection = MapSelection {
            filter: FilterSelection::new(
                vec!["Latin America & Caribbean".to_string()],
                vec!["High income".to_string()],
            ),
            risk_factor: Some(RiskFactor::RiskFactor1),
            outcome: OutcomeVariable::BeliefCc,
            demographics: DemographicFilters::default(),
        };

        let doc = build_map(&data, &selection);
        assert_eq!(doc.choropleth.values.keys().collect::<Vec<_>>(), vec!["URY"]);

        // Bounds use the region selection: Uruguay and Bolivia
        match doc.viewport {
            Viewport::Fit { bounds } => {
                assert_eq!(bounds[0], [-32.5, -63.6]);
                assert_eq!(bounds[1], [-16.3, -55.8]);
            }
            other => panic!("expected fitted bounds, got {:?}", other),
        }

        let bubbles = doc.bubbles.expect("bubble layer");
        assert!(doc.layer_control);
        assert_eq!(bubbles.markers.len(), 1);
        let ury = &bubbles.markers[0];
        assert_eq!(ury.location, [-32.5, -55.8]);
        assert_eq!(ury.radius, 11.0);
        assert_eq!(ury.popup.risk_text, "0.80");
        assert_eq!(ury.popup.best_label, "Dynamic Social Norms");
    }

    #[test]
    fn test_no_risk_factor_suppresses_bubbles() {
        let data = sample_dataset();
        let selection = MapSelection {
            outcome: OutcomeVariable::PolicySupport,
            ..MapSelection::default()
        };

        let doc = build_map(&data, &selection);
        assert!(doc.bubbles.is_none());
        assert!(!doc.layer_control);
        assert_eq!(doc.choropleth.outcome, OutcomeVariable::PolicySupport);
        assert_eq!(doc.choropleth.values.len(), 4);
        assert_eq!(doc.choropleth.legend_name, "Scale for Policy Support");
    }

    #[test]
    fn test_bubble_radii_follow_filtered_range() {
        let data = sample_dataset();
        let selection = MapSelection {
            filter: latam(),
            risk_factor: Some(RiskFactor::RiskFactor1),
            ..MapSelection::default()
        };

        let bubbles = build_map(&data, &selection).bubbles.unwrap();
        let radius = |code: &str| {
            bubbles
                .markers
                .iter()
                .find(|m| m.country_code == code)
                .map(|m| m.radius)
                .unwrap()
        };
        assert_eq!(radius("BOL"), 4.0);
        assert_eq!(radius("URY"), 18.0);
        assert_eq!(bubbles.name, "Risk factor: Risk Factor 1");
    }

    #[test]
    fn test_empty_risk_subset_keeps_choropleth() {
        let data = sample_dataset();
        let selection = MapSelection {
            filter: FilterSelection::new(vec!["East Asia & Pacific".to_string()], vec![]),
            risk_factor: Some(RiskFactor::RiskFactor1),
            ..MapSelection::default()
        };

        let doc = build_map(&data, &selection);
        assert!(doc.bubbles.is_none());
        assert!(!doc.layer_control);
        assert_eq!(doc.choropleth.values.len(), 1);
        assert!(doc.choropleth.values.contains_key("AUS"));
    }

    #[test]
    fn test_unmatched_features_use_nan_fill() {
        let data = sample_dataset();
        let doc = build_map(&data, &MapSelection::default());

        let fill_of = |code: &str| {
            doc.choropleth
                .features
                .features
                .iter()
                .find(|f| feature_key(f).as_deref() == Some(code))
                .and_then(|f| f.property("fill_color").cloned())
                .unwrap()
        };
        assert_eq!(fill_of("FRA"), serde_json::json!(NAN_FILL_COLOR));
        assert_eq!(fill_of("AUS"), serde_json::json!(YLGN_8[7]));
    }

    #[test]
    fn test_no_coordinates_anywhere_uses_default_view() {
        let countries = vec![country("XKX", "Europe", "High income", Some(1.0), None)];
        let view = fit_viewport(&countries, &FilterSelection::default());
        assert_eq!(view, Viewport::default_view());
    }

    proptest! {
        #[test]
        fn prop_radius_within_range(values in prop::collection::vec(-1e6f64..1e6, 1..30)) {
            let scale = RadiusScale::from_values(values.iter().copied()).unwrap();
            for v in values {
                let r = scale.radius(Some(v));
                prop_assert!(r >= RADIUS_MIN - 1e-9 && r <= RADIUS_MAX + 1e-9, "radius {}", r);
            }
        }
    }
}
