//! Region / income-group filtering and the (inert) demographic filters

use crate::{CountryAggregate, CountryMetadata};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use tracing::{debug, info};

/// Region and income-group membership selection
///
/// An empty list means "no filter" for that facet, never "nothing".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterSelection {
    #[serde(default)]
    pub regions: Vec<String>,
    #[serde(default)]
    pub income_groups: Vec<String>,
}

impl FilterSelection {
    pub fn new(regions: Vec<String>, income_groups: Vec<String>) -> Self {
        Self {
            regions,
            income_groups,
        }
    }

    pub fn has_region_filter(&self) -> bool {
        !self.regions.is_empty()
    }

    /// True when the region passes the region facet
    pub fn region_matches(&self, region: Option<&str>) -> bool {
        facet_matches(&self.regions, region)
    }

    /// True when the country passes both facets
    pub fn matches(&self, country: &CountryMetadata) -> bool {
        self.region_matches(country.region.as_deref())
            && facet_matches(&self.income_groups, country.income_group.as_deref())
    }
}

/// Missing values never match a non-empty selection
fn facet_matches(selected: &[String], value: Option<&str>) -> bool {
    if selected.is_empty() {
        return true;
    }
    value.is_some_and(|v| selected.iter().any(|s| s == v))
}

/// Countries passing the region and income-group selection, in input order
pub fn filter_countries<'a>(
    countries: &'a [CountryMetadata],
    selection: &FilterSelection,
) -> Vec<&'a CountryMetadata> {
    let filtered: Vec<&CountryMetadata> =
        countries.iter().filter(|c| selection.matches(c)).collect();

    info!(
        "Filtered countries: {} of {} (regions={:?}, income_groups={:?})",
        filtered.len(),
        countries.len(),
        selection.regions,
        selection.income_groups
    );

    filtered
}

/// Aggregates whose country code is in the filtered country set
pub fn filter_aggregates<'a>(
    aggregates: &'a [CountryAggregate],
    countries: &[&CountryMetadata],
) -> Vec<&'a CountryAggregate> {
    let codes: HashSet<&str> = countries.iter().map(|c| c.country_code.as_str()).collect();
    aggregates
        .iter()
        .filter(|a| codes.contains(a.country_code.as_str()))
        .collect()
}

/// Choices offered by the region and income-group selectors
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterOptions {
    pub regions: Vec<String>,
    pub income_groups: Vec<String>,
}

impl FilterOptions {
    /// Sorted distinct non-missing values from the metadata table
    pub fn from_countries(countries: &[CountryMetadata]) -> Self {
        let regions: BTreeSet<&str> = countries.iter().filter_map(|c| c.region.as_deref()).collect();
        let income_groups: BTreeSet<&str> = countries
            .iter()
            .filter_map(|c| c.income_group.as_deref())
            .collect();

        Self {
            regions: regions.into_iter().map(String::from).collect(),
            income_groups: income_groups.into_iter().map(String::from).collect(),
        }
    }

    /// Selection with every option ticked
    pub fn select_all(&self) -> FilterSelection {
        FilterSelection::new(self.regions.clone(), self.income_groups.clone())
    }
}

pub const AGE_RANGE: (u8, u8) = (18, 70);
pub const IDEOLOGY_RANGE: (u8, u8) = (0, 100);

pub const GENDER_OPTIONS: [&str; 3] = ["male", "female", "nonbinary or other"];
pub const EDUCATION_OPTIONS: [&str; 4] = [
    "0 to 6 years",
    "7 to 12 years",
    "13 to 16 years",
    "17 or more years",
];
pub const INCOME_OPTIONS: [&str; 8] = [
    "less than 10K",
    "10K to 15K",
    "15K to 25K",
    "25K to 50K",
    "50K to 100K",
    "100K to 150K",
    "150K to 200K",
    "more than 200K",
];
pub const PERCEIVED_SES_OPTIONS: [&str; 10] = [
    "0-10%", "10-20%", "20-30%", "30-40%", "40-50%", "50-60%", "60-70%", "70-80%", "80-90%",
    "90-100%",
];

/// Demographic selection collected from the interface
///
/// Not applied to any table yet; it rides along with the map selection so
/// the interface state is complete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DemographicFilters {
    pub age: (u8, u8),
    pub genders: Vec<String>,
    pub education: Vec<String>,
    pub personal_income: Vec<String>,
    pub perceived_ses: Vec<String>,
    pub sociopolitical_ideology: (u8, u8),
    pub economic_ideology: (u8, u8),
}

impl Default for DemographicFilters {
    fn default() -> Self {
        Self {
            age: AGE_RANGE,
            genders: Vec::new(),
            education: Vec::new(),
            personal_income: Vec::new(),
            perceived_ses: Vec::new(),
            sociopolitical_ideology: IDEOLOGY_RANGE,
            economic_ideology: IDEOLOGY_RANGE,
        }
    }
}

impl DemographicFilters {
    pub fn is_default(&self) -> bool {
        *self == Self::default()
    }

    /// Record that a non-default demographic selection was ignored
    pub fn log_inert(&self) {
        if !self.is_default() {
            debug!("Demographic filters are not applied to the map: {:?}", self);
        }
    }
}
