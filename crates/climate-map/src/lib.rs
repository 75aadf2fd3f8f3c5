//! Climate Psychology Intervention Map
//!
//! Loads survey microdata, country metadata and precomputed best-intervention
//! statistics, reduces the survey to per-country control-condition means, and
//! builds a two-layer interactive map:
//!
//! - a choropleth colouring each country by the selected outcome mean
//! - an optional bubble layer sizing each country by a risk factor, with a
//!   popup naming the best-performing intervention for the selected outcome
//!
//! # Pipeline
//!
//! ```text
//! files ──► loader ──► aggregate ──┐
//!                                  ├──► filter ──► map (+ popup) ──► render
//! selection (regions, income, …) ──┘
//! ```
//!
//! Every interaction re-runs the pipeline from the cached tables; nothing
//! downstream of the loader is mutated in place.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

pub mod aggregate;
pub mod filter;
pub mod loader;
pub mod map;
pub mod popup;
pub mod render;

pub use aggregate::{aggregate_control, AggregateCache};
pub use filter::{DemographicFilters, FilterOptions, FilterSelection};
pub use loader::{DataCache, DataPaths, Dataset};
pub use map::{build_map, MapDocument, MapSelection};
pub use popup::PopupSummary;

/// Intervention identifier of the baseline (no intervention) condition
pub const CONTROL_INTERVENTION: &str = "control";

/// Bubble radius range in pixels
pub const RADIUS_MIN: f64 = 4.0;
pub const RADIUS_MAX: f64 = 18.0;

/// Base map defaults used when no bounds can be fitted
pub const DEFAULT_CENTER: [f64; 2] = [20.0, 0.0];
pub const DEFAULT_ZOOM: f64 = 2.5;
pub const BASE_TILES: &str = "CartoDB positron";

#[derive(Error, Debug)]
pub enum MapError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error in {}: {source}", path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("GeoJSON error in {}: {source}", path.display())]
    GeoJson {
        path: PathBuf,
        #[source]
        source: geojson::Error,
    },
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{} is not a GeoJSON FeatureCollection", .0.display())]
    NotFeatureCollection(PathBuf),
    #[error("Unknown outcome variable: {0}")]
    UnknownOutcome(String),
    #[error("Unknown risk factor: {0}")]
    UnknownRiskFactor(String),
}

pub type Result<T> = std::result::Result<T, MapError>;

/// Measured psychological / behavioural response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeVariable {
    #[default]
    BeliefCc,
    PolicySupport,
    ShareSocialMedia,
    Wept,
}

impl OutcomeVariable {
    pub const ALL: [OutcomeVariable; 4] = [
        OutcomeVariable::BeliefCc,
        OutcomeVariable::PolicySupport,
        OutcomeVariable::ShareSocialMedia,
        OutcomeVariable::Wept,
    ];

    /// Column name in the survey and best-intervention tables
    pub fn column(&self) -> &'static str {
        match self {
            Self::BeliefCc => "belief_cc",
            Self::PolicySupport => "policy_support",
            Self::ShareSocialMedia => "share_social_media",
            Self::Wept => "wept",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::BeliefCc => "Belief in Climate Change",
            Self::PolicySupport => "Policy Support",
            Self::ShareSocialMedia => "Sharing information on Social Media",
            Self::Wept => "Work for Environmental Protection Task",
        }
    }
}

impl fmt::Display for OutcomeVariable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.column())
    }
}

impl FromStr for OutcomeVariable {
    type Err = MapError;

    fn from_str(s: &str) -> Result<Self> {
        let needle = s.trim();
        Self::ALL
            .into_iter()
            .find(|o| o.column().eq_ignore_ascii_case(needle))
            .ok_or_else(|| MapError::UnknownOutcome(s.to_string()))
    }
}

/// Country-level covariate encoded as bubble size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RiskFactor {
    #[serde(rename = "risk_factor_1")]
    RiskFactor1,
    #[serde(rename = "risk_factor_2")]
    RiskFactor2,
}

impl RiskFactor {
    pub const ALL: [RiskFactor; 2] = [RiskFactor::RiskFactor1, RiskFactor::RiskFactor2];

    pub fn column(&self) -> &'static str {
        match self {
            Self::RiskFactor1 => "risk_factor_1",
            Self::RiskFactor2 => "risk_factor_2",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::RiskFactor1 => "Risk Factor 1",
            Self::RiskFactor2 => "Risk Factor 2",
        }
    }

    /// Parse a user selection where `none` (or an empty string) means no
    /// risk factor layer.
    pub fn parse_selection(s: &str) -> Result<Option<RiskFactor>> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "none" => Ok(None),
            "1" | "risk_factor_1" => Ok(Some(Self::RiskFactor1)),
            "2" | "risk_factor_2" => Ok(Some(Self::RiskFactor2)),
            _ => Err(MapError::UnknownRiskFactor(s.to_string())),
        }
    }
}

/// Display label for an optional risk factor selection
pub fn risk_selection_label(selection: Option<RiskFactor>) -> &'static str {
    selection.map(|r| r.label()).unwrap_or("None")
}

/// Known intervention identifiers and their display names
pub const INTERVENTIONS: [(&str, &str); 11] = [
    ("psychological_distance", "Psychological Distance"),
    ("letter_future_gen", "Letter to Future Generations"),
    ("effective_collective_action", "Effective Collective Action"),
    ("future_self_continuity", "Future Self Continuity"),
    ("system_justification", "System Justification"),
    ("scientific_consensus", "Scientific Consensus"),
    ("binding_moral_foundations", "Binding Moral Foundations"),
    ("dynamic_social_norms", "Dynamic Social Norms"),
    ("pluralistic_ignorance", "Pluralistic Ignorance"),
    ("negative_emotions", "Negative Emotions"),
    ("working_together_normative_appeal", "Working Together Normative Appeal"),
];

/// One respondent under one intervention condition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurveyRecord {
    pub country_code: String,
    pub intervention: String,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    pub belief_cc: Option<f64>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    pub policy_support: Option<f64>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    pub share_social_media: Option<f64>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    pub wept: Option<f64>,

    // Demographics (collected, not used for filtering)
    #[serde(default, deserialize_with = "csv::invalid_option")]
    pub age: Option<f64>,
    #[serde(default)]
    pub gender: Option<String>,
    #[serde(default)]
    pub education: Option<String>,
    #[serde(default)]
    pub income: Option<String>,
    #[serde(default)]
    pub perceived_ses: Option<String>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    pub sp_ideology: Option<f64>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    pub econ_ideology: Option<f64>,
}

impl SurveyRecord {
    pub fn outcome(&self, outcome: OutcomeVariable) -> Option<f64> {
        match outcome {
            OutcomeVariable::BeliefCc => self.belief_cc,
            OutcomeVariable::PolicySupport => self.policy_support,
            OutcomeVariable::ShareSocialMedia => self.share_social_media,
            OutcomeVariable::Wept => self.wept,
        }
    }

    pub fn is_control(&self) -> bool {
        self.intervention == CONTROL_INTERVENTION
    }
}

/// Control-condition outcome means for one country
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountryAggregate {
    pub country_code: String,
    pub belief_cc: Option<f64>,
    pub policy_support: Option<f64>,
    pub share_social_media: Option<f64>,
    pub wept: Option<f64>,
}

impl CountryAggregate {
    pub fn value(&self, outcome: OutcomeVariable) -> Option<f64> {
        match outcome {
            OutcomeVariable::BeliefCc => self.belief_cc,
            OutcomeVariable::PolicySupport => self.policy_support,
            OutcomeVariable::ShareSocialMedia => self.share_social_media,
            OutcomeVariable::Wept => self.wept,
        }
    }
}

/// Country reference row joined from centroid, region and income tables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountryMetadata {
    pub country_code: String,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub income_group: Option<String>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    pub risk_factor_1: Option<f64>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    pub risk_factor_2: Option<f64>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    pub lat: Option<f64>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    pub lon: Option<f64>,
}

impl CountryMetadata {
    pub fn risk_value(&self, risk: RiskFactor) -> Option<f64> {
        match risk {
            RiskFactor::RiskFactor1 => self.risk_factor_1,
            RiskFactor::RiskFactor2 => self.risk_factor_2,
        }
    }

    /// (lat, lon) when both are present
    pub fn coordinates(&self) -> Option<(f64, f64)> {
        match (self.lat, self.lon) {
            (Some(lat), Some(lon)) if lat.is_finite() && lon.is_finite() => Some((lat, lon)),
            _ => None,
        }
    }

    /// Display name, falling back to the country code
    pub fn display_name(&self) -> &str {
        self.country.as_deref().unwrap_or(&self.country_code)
    }
}

/// Winning intervention for one (country, outcome) pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BestInterventionStat {
    pub country_code: String,
    pub outcome: String,
    pub intervention: String,
    pub mean_value: f64,
    pub ci_low: f64,
    pub ci_high: f64,
    pub p_value: f64,
}

/// Title-case a string the way Python's `str.title` does: the first cased
/// character after any non-letter is upper-cased, the rest lower-cased.
pub fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut prev_cased = false;
    for c in s.chars() {
        if c.is_alphabetic() {
            if prev_cased {
                out.extend(c.to_lowercase());
            } else {
                out.extend(c.to_uppercase());
            }
            prev_cased = true;
        } else {
            out.push(c);
            prev_cased = false;
        }
    }
    out
}

/// Human-readable intervention label: underscores to spaces, then title case
pub fn intervention_label(identifier: &str) -> String {
    title_case(&identifier.replace('_', " "))
}
