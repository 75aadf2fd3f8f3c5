//! Per-country control-condition means

use crate::{CountryAggregate, OutcomeVariable, SurveyRecord};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Running sum and count for one outcome column
#[derive(Debug, Clone, Copy, Default)]
struct Mean {
    sum: f64,
    count: usize,
}

impl Mean {
    fn push(&mut self, value: Option<f64>) {
        if let Some(v) = value.filter(|v| v.is_finite()) {
            self.sum += v;
            self.count += 1;
        }
    }

    fn value(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }
}

/// Reduce survey rows to one aggregate per country, control condition only
///
/// Missing cells are skipped per column. Countries without any control row
/// do not appear in the output. Rows come back sorted by country code.
pub fn aggregate_control(survey: &[SurveyRecord]) -> Vec<CountryAggregate> {
    let mut groups: BTreeMap<&str, [Mean; 4]> = BTreeMap::new();

    for row in survey.iter().filter(|r| r.is_control()) {
        let means = groups.entry(row.country_code.as_str()).or_default();
        for (mean, outcome) in means.iter_mut().zip(OutcomeVariable::ALL) {
            mean.push(row.outcome(outcome));
        }
    }

    let aggregates: Vec<CountryAggregate> = groups
        .into_iter()
        .map(|(code, [belief, policy, share, wept])| CountryAggregate {
            country_code: code.to_string(),
            belief_cc: belief.value(),
            policy_support: policy.value(),
            share_social_media: share.value(),
            wept: wept.value(),
        })
        .collect();

    info!(
        "Aggregated {} survey rows into {} country control means",
        survey.len(),
        aggregates.len()
    );

    aggregates
}

/// Memoizes [`aggregate_control`] by the identity of the survey table
///
/// The cache holds on to each input `Arc`, so a pointer match always refers
/// to the same live table.
#[derive(Debug, Default)]
pub struct AggregateCache {
    entries: Vec<(Arc<Vec<SurveyRecord>>, Arc<Vec<CountryAggregate>>)>,
}

impl AggregateCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&mut self, survey: &Arc<Vec<SurveyRecord>>) -> Arc<Vec<CountryAggregate>> {
        if let Some((_, hit)) = self.entries.iter().find(|(k, _)| Arc::ptr_eq(k, survey)) {
            debug!("Aggregate cache hit");
            return Arc::clone(hit);
        }
        let aggregates = Arc::new(aggregate_control(survey));
        self.entries.push((Arc::clone(survey), Arc::clone(&aggregates)));
        aggregates
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
