//! Climate Intervention Map CLI
//!
//! Builds the choropleth + bubble map for one selection and writes it as a
//! standalone HTML page.
//!
//! Usage:
//!   render-map --region "Latin America & Caribbean" \
//!              --risk-factor risk_factor_1 \
//!              --outcome policy_support \
//!              --output map.html --json --geojson

use anyhow::Result;
use clap::Parser;
use climate_map::filter::DemographicFilters;
use climate_map::{
    build_map, render, DataCache, DataPaths, Dataset, FilterOptions, FilterSelection,
    MapSelection, OutcomeVariable, RiskFactor,
};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(
    name = "render-map",
    about = "Render the climate-psychology intervention map for a selection"
)]
struct Args {
    /// Country boundary GeoJSON (feature id = country code)
    #[arg(long, default_value = "data/countries_filtered.geo.json")]
    boundaries: PathBuf,

    /// Survey microdata CSV
    #[arg(long, default_value = "data/mock_survey_data.csv")]
    survey: PathBuf,

    /// Country metadata CSV
    #[arg(long, default_value = "data/mock_country_data_new.csv")]
    countries: PathBuf,

    /// Best-intervention statistics CSV
    #[arg(long, default_value = "data/best_interventions_with_stats.csv")]
    best_interventions: PathBuf,

    /// Region to include (repeatable; none = all)
    #[arg(short, long = "region")]
    regions: Vec<String>,

    /// Income group to include (repeatable; none = all)
    #[arg(short, long = "income-group")]
    income_groups: Vec<String>,

    /// Risk factor for bubble size: none, risk_factor_1, risk_factor_2
    #[arg(long, default_value = "none")]
    risk_factor: String,

    /// Outcome for the choropleth: belief_cc, policy_support, share_social_media, wept
    #[arg(long, default_value = "belief_cc")]
    outcome: String,

    /// Age range (collected, not applied)
    #[arg(long, num_args = 2, value_names = ["MIN", "MAX"])]
    age: Option<Vec<u8>>,

    /// Gender (repeatable; collected, not applied)
    #[arg(long = "gender")]
    genders: Vec<String>,

    /// Education level (repeatable; collected, not applied)
    #[arg(long)]
    education: Vec<String>,

    /// Personal income bracket (repeatable; collected, not applied)
    #[arg(long = "personal-income")]
    personal_income: Vec<String>,

    /// Perceived socioeconomic status (repeatable; collected, not applied)
    #[arg(long = "perceived-ses")]
    perceived_ses: Vec<String>,

    /// Sociopolitical ideology range, 0-100 (collected, not applied)
    #[arg(long, num_args = 2, value_names = ["MIN", "MAX"])]
    sp_ideology: Option<Vec<u8>>,

    /// Economic ideology range, 0-100 (collected, not applied)
    #[arg(long, num_args = 2, value_names = ["MIN", "MAX"])]
    econ_ideology: Option<Vec<u8>>,

    /// Output HTML file
    #[arg(short, long, default_value = "map.html")]
    output: PathBuf,

    /// Also write the map document as JSON
    #[arg(long)]
    json: bool,

    /// Also write the bubble layer as GeoJSON
    #[arg(long)]
    geojson: bool,

    /// Print the available regions and income groups, then exit
    #[arg(long)]
    list_options: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn data_paths(&self) -> DataPaths {
        DataPaths {
            boundaries: self.boundaries.clone(),
            survey: self.survey.clone(),
            countries: self.countries.clone(),
            best_interventions: self.best_interventions.clone(),
        }
    }

    fn selection(&self) -> Result<MapSelection> {
        let mut demographics = DemographicFilters {
            genders: self.genders.clone(),
            education: self.education.clone(),
            personal_income: self.personal_income.clone(),
            perceived_ses: self.perceived_ses.clone(),
            ..DemographicFilters::default()
        };
        if let Some([min, max]) = self.age.as_deref() {
            demographics.age = (*min, *max);
        }
        if let Some([min, max]) = self.sp_ideology.as_deref() {
            demographics.sociopolitical_ideology = (*min, *max);
        }
        if let Some([min, max]) = self.econ_ideology.as_deref() {
            demographics.economic_ideology = (*min, *max);
        }

        Ok(MapSelection {
            filter: FilterSelection::new(self.regions.clone(), self.income_groups.clone()),
            risk_factor: RiskFactor::parse_selection(&self.risk_factor)?,
            outcome: self.outcome.parse::<OutcomeVariable>()?,
            demographics,
        })
    }
}

fn write_json(path: &Path, value: &impl serde::Serialize) -> Result<()> {
    let file = File::create(path)?;
    let writer = BufWriter::new(file);
    serde_json::to_writer_pretty(writer, value)?;
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let selection = args.selection()?;

    let mut cache = DataCache::new();
    let data = Dataset::load(&args.data_paths(), &mut cache)?;

    if args.list_options {
        let options = FilterOptions::from_countries(&data.countries);
        println!("{}", serde_json::to_string_pretty(&options)?);
        return Ok(());
    }

    let doc = build_map(&data, &selection);

    info!("Writing map to {:?}", args.output);
    std::fs::write(&args.output, render::to_html(&doc)?)?;

    if args.json {
        let path = args.output.with_extension("json");
        info!("Writing map document to {:?}", path);
        write_json(&path, &doc)?;
    }

    if args.geojson {
        let path = args.output.with_extension("geojson");
        info!("Writing bubble GeoJSON to {:?}", path);
        write_json(&path, &render::bubbles_to_geojson(&doc))?;
    }

    info!(
        "Done: {} choropleth values, {} bubbles",
        doc.choropleth.values.len(),
        doc.bubbles.as_ref().map(|b| b.markers.len()).unwrap_or(0)
    );

    Ok(())
}
