//! Per-country bubble popup content

use crate::{
    intervention_label, BestInterventionStat, CountryMetadata, OutcomeVariable, RiskFactor,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Label shown when no best-intervention row exists for the country/outcome
pub const NO_DATA_LABEL: &str = "No data";
/// Value shown for mean, CI and p-value when no row exists
pub const NO_DATA_VALUE: &str = "–";

/// Lookup of best-intervention rows by (country code, outcome column)
///
/// The first row for a key wins.
#[derive(Debug, Default)]
pub struct BestInterventionIndex<'a> {
    rows: HashMap<(&'a str, &'a str), &'a BestInterventionStat>,
}

impl<'a> BestInterventionIndex<'a> {
    pub fn new(stats: &'a [BestInterventionStat]) -> Self {
        let mut rows = HashMap::with_capacity(stats.len());
        for stat in stats {
            rows.entry((stat.country_code.as_str(), stat.outcome.as_str()))
                .or_insert(stat);
        }
        Self { rows }
    }

    pub fn get(&self, country_code: &str, outcome: OutcomeVariable) -> Option<&'a BestInterventionStat> {
        self.rows.get(&(country_code, outcome.column())).copied()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Formatted popup fields for one country bubble
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PopupSummary {
    pub country_code: String,
    pub country_label: String,
    pub risk_label: String,
    /// Two decimals, or empty when the risk value is missing
    pub risk_text: String,
    pub outcome_label: String,
    pub mean_text: String,
    pub ci_text: String,
    pub p_text: String,
    pub best_label: String,
    /// Whether a best-intervention row was found
    pub has_stats: bool,
}

impl PopupSummary {
    pub fn build(
        country: &CountryMetadata,
        risk: RiskFactor,
        outcome: OutcomeVariable,
        index: &BestInterventionIndex<'_>,
    ) -> Self {
        let risk_text = country
            .risk_value(risk)
            .filter(|v| v.is_finite())
            .map(|v| format!("{:.2}", v))
            .unwrap_or_default();

        let stats = index.get(&country.country_code, outcome);
        let (mean_text, ci_text, p_text, best_label) = match stats {
            Some(s) => (
                format!("{:.2}", s.mean_value),
                format!("[{:.2}, {:.2}]", s.ci_low, s.ci_high),
                format!("{:.3}", s.p_value),
                intervention_label(&s.intervention),
            ),
            None => (
                NO_DATA_VALUE.to_string(),
                NO_DATA_VALUE.to_string(),
                NO_DATA_VALUE.to_string(),
                NO_DATA_LABEL.to_string(),
            ),
        };

        Self {
            country_code: country.country_code.clone(),
            country_label: country.display_name().to_string(),
            risk_label: risk.label().to_string(),
            risk_text,
            outcome_label: outcome.label().to_string(),
            mean_text,
            ci_text,
            p_text,
            best_label,
            has_stats: stats.is_some(),
        }
    }

    /// Styled HTML fragment for a Leaflet popup
    pub fn to_html(&self) -> String {
        format!(
            r#"<div style="font-family: system-ui, -apple-system, BlinkMacSystemFont, 'Segoe UI', sans-serif; font-size: 12px; line-height: 1.4; max-width: 260px;">
    <div style="font-weight: 700; font-size: 14px; margin-bottom: 4px;">{country} ({code})</div>
    <hr style="border: none; border-top: 1px solid #ddd; margin: 4px 0 6px 0;" />
    <div style="margin-bottom: 4px;"><span style="font-weight: 600;">{risk_label}:</span> <span>{risk}</span></div>
    <div style="margin-bottom: 4px;"><span style="font-weight: 600;">{outcome_label} (mean):</span><br/><span>{mean}</span></div>
    <div style="margin-bottom: 4px;"><span style="font-weight: 600;">95% CI:</span><br/><span>{ci}</span></div>
    <div style="margin-bottom: 4px;"><span style="font-weight: 600;">p-value:</span> <span>{p}</span></div>
    <div style="margin-top: 6px;"><span style="font-weight: 600;">Most effective intervention:</span><br/><span>{best}</span></div>
</div>"#,
            country = html_escape(&self.country_label),
            code = html_escape(&self.country_code),
            risk_label = html_escape(&self.risk_label),
            risk = html_escape(&self.risk_text),
            outcome_label = html_escape(&self.outcome_label),
            mean = html_escape(&self.mean_text),
            ci = html_escape(&self.ci_text),
            p = html_escape(&self.p_text),
            best = html_escape(&self.best_label),
        )
    }
}

pub(crate) fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}
