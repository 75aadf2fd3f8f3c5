//! Data loading from CSV and GeoJSON files, memoized by path

use crate::aggregate::AggregateCache;
use crate::{BestInterventionStat, CountryAggregate, CountryMetadata, MapError, Result, SurveyRecord};
use geojson::{feature::Id, Feature, FeatureCollection, GeoJson};
use serde::de::DeserializeOwned;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const BOUNDARIES_FILE: &str = "countries_filtered.geo.json";
pub const SURVEY_FILE: &str = "mock_survey_data.csv";
pub const COUNTRIES_FILE: &str = "mock_country_data_new.csv";
pub const BEST_INTERVENTIONS_FILE: &str = "best_interventions_with_stats.csv";

/// Locations of the four input files
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPaths {
    pub boundaries: PathBuf,
    pub survey: PathBuf,
    pub countries: PathBuf,
    pub best_interventions: PathBuf,
}

impl DataPaths {
    /// Standard file names inside a data directory
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            boundaries: dir.join(BOUNDARIES_FILE),
            survey: dir.join(SURVEY_FILE),
            countries: dir.join(COUNTRIES_FILE),
            best_interventions: dir.join(BEST_INTERVENTIONS_FILE),
        }
    }
}

impl Default for DataPaths {
    fn default() -> Self {
        Self::in_dir("data")
    }
}

/// Deserialize every row of a headed CSV file
fn read_table<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let csv_err = |source| MapError::Csv {
        path: path.to_path_buf(),
        source,
    };
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(csv_err)?;
    rdr.deserialize()
        .collect::<std::result::Result<Vec<T>, _>>()
        .map_err(csv_err)
}

/// Load survey microdata (one row per respondent × intervention)
pub fn load_survey(path: impl AsRef<Path>) -> Result<Vec<SurveyRecord>> {
    let path = path.as_ref();
    info!("Loading survey data from {:?}", path);

    let rows: Vec<SurveyRecord> = read_table(path)?;
    let control = rows.iter().filter(|r| r.is_control()).count();

    info!("Loaded {} survey rows ({} control)", rows.len(), control);
    Ok(rows)
}

/// Load country metadata (one row per country code)
pub fn load_countries(path: impl AsRef<Path>) -> Result<Vec<CountryMetadata>> {
    let path = path.as_ref();
    info!("Loading country metadata from {:?}", path);

    let rows: Vec<CountryMetadata> = read_table(path)?;
    let no_coords = rows.iter().filter(|c| c.coordinates().is_none()).count();

    info!(
        "Loaded {} countries ({} without coordinates, excluded from bubbles and bounds)",
        rows.len(),
        no_coords
    );
    Ok(rows)
}

/// Load precomputed best-intervention statistics
///
/// Rows are kept in file order; lookups take the first row for a
/// (country, outcome) key, so later duplicates are reported and ignored.
pub fn load_best_interventions(path: impl AsRef<Path>) -> Result<Vec<BestInterventionStat>> {
    let path = path.as_ref();
    info!("Loading best-intervention stats from {:?}", path);

    let rows: Vec<BestInterventionStat> = read_table(path)?;

    let mut seen = HashSet::new();
    for row in &rows {
        if !seen.insert((row.country_code.as_str(), row.outcome.as_str())) {
            warn!(
                "Duplicate best-intervention row for ({}, {}); first row wins",
                row.country_code, row.outcome
            );
        }
    }

    info!("Loaded {} best-intervention rows", rows.len());
    Ok(rows)
}

/// Load the country boundary FeatureCollection
pub fn load_boundaries(path: impl AsRef<Path>) -> Result<FeatureCollection> {
    let path = path.as_ref();
    info!("Loading boundaries from {:?}", path);

    let text = std::fs::read_to_string(path)?;
    let geojson: GeoJson = text.parse().map_err(|source| MapError::GeoJson {
        path: path.to_path_buf(),
        source,
    })?;

    let collection = match geojson {
        GeoJson::FeatureCollection(fc) => fc,
        _ => return Err(MapError::NotFeatureCollection(path.to_path_buf())),
    };

    let unkeyed = collection
        .features
        .iter()
        .filter(|f| feature_key(f).is_none())
        .count();
    if unkeyed > 0 {
        warn!("{} boundary features have no id and cannot be coloured", unkeyed);
    }

    info!("Loaded {} boundary features", collection.features.len());
    Ok(collection)
}

/// Country code a boundary feature is keyed by (`feature.id`)
pub fn feature_key(feature: &Feature) -> Option<String> {
    match feature.id.as_ref()? {
        Id::String(s) => Some(s.clone()),
        Id::Number(n) => Some(n.to_string()),
    }
}

/// Process-lifetime cache of parsed inputs keyed by file path
///
/// Requests for the same file hand back the same `Arc`. Paths are keyed in
/// canonical form, so `data/x.csv` and `./data/x.csv` share one entry.
/// There is no invalidation apart from [`clear`].
///
/// [`clear`]: DataCache::clear
#[derive(Debug, Default)]
pub struct DataCache {
    surveys: HashMap<PathBuf, Arc<Vec<SurveyRecord>>>,
    countries: HashMap<PathBuf, Arc<Vec<CountryMetadata>>>,
    best: HashMap<PathBuf, Arc<Vec<BestInterventionStat>>>,
    boundaries: HashMap<PathBuf, Arc<FeatureCollection>>,
    pub aggregates: AggregateCache,
}

fn cached<T>(
    map: &mut HashMap<PathBuf, Arc<T>>,
    path: &Path,
    load: impl FnOnce(&Path) -> Result<T>,
) -> Result<Arc<T>> {
    if let Some(hit) = map.get(path) {
        debug!("Cache hit for {:?}", path);
        return Ok(Arc::clone(hit));
    }
    let key = cache_key(path);
    let value = match map.get(&key) {
        Some(hit) => {
            debug!("Cache hit for {:?} via {:?}", path, key);
            Arc::clone(hit)
        }
        None => {
            let value = Arc::new(load(path)?);
            map.insert(key, Arc::clone(&value));
            value
        }
    };
    // Remember the spelling too so the next lookup skips the filesystem
    map.insert(path.to_path_buf(), Arc::clone(&value));
    Ok(value)
}

/// Canonical form of `path`, or the path as given when it cannot be resolved
fn cache_key(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

impl DataCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn survey(&mut self, path: impl AsRef<Path>) -> Result<Arc<Vec<SurveyRecord>>> {
        cached(&mut self.surveys, path.as_ref(), |p| load_survey(p))
    }

    pub fn countries(&mut self, path: impl AsRef<Path>) -> Result<Arc<Vec<CountryMetadata>>> {
        cached(&mut self.countries, path.as_ref(), |p| load_countries(p))
    }

    pub fn best_interventions(
        &mut self,
        path: impl AsRef<Path>,
    ) -> Result<Arc<Vec<BestInterventionStat>>> {
        cached(&mut self.best, path.as_ref(), |p| load_best_interventions(p))
    }

    pub fn boundaries(&mut self, path: impl AsRef<Path>) -> Result<Arc<FeatureCollection>> {
        cached(&mut self.boundaries, path.as_ref(), |p| load_boundaries(p))
    }

    /// Drop every cached table
    pub fn clear(&mut self) {
        self.surveys.clear();
        self.countries.clear();
        self.best.clear();
        self.boundaries.clear();
        self.aggregates.clear();
    }
}

/// Every table the map pipeline reads, loaded once per session
#[derive(Debug, Clone)]
pub struct Dataset {
    pub boundaries: Arc<FeatureCollection>,
    pub survey: Arc<Vec<SurveyRecord>>,
    pub countries: Arc<Vec<CountryMetadata>>,
    pub best_interventions: Arc<Vec<BestInterventionStat>>,
    pub aggregates: Arc<Vec<CountryAggregate>>,
}

impl Dataset {
    /// Load all inputs through the cache and derive the control aggregates
    pub fn load(paths: &DataPaths, cache: &mut DataCache) -> Result<Self> {
        let boundaries = cache.boundaries(&paths.boundaries)?;
        let survey = cache.survey(&paths.survey)?;
        let countries = cache.countries(&paths.countries)?;
        let best_interventions = cache.best_interventions(&paths.best_interventions)?;
        let aggregates = cache.aggregates.get(&survey);

        Ok(Self {
            boundaries,
            survey,
            countries,
            best_interventions,
            aggregates,
        })
    }
}
