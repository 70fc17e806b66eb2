use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use vehicle_advisor::{
    catalog::eligibility_reports,
    config::AdvisorConfig,
    eligibility::{
        normalize_city_slug,
        store::{build_rule_store, refresh_city_rules},
        RuleSet,
    },
    models::{EligibilityRuleRow, Vehicle},
    AdvisorError, Result,
};

#[derive(Parser)]
#[command(name = "admin", about = "Vehicle advisor maintenance tasks")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Replace a city's scraped eligibility rules with the rows in a JSON file
    RefreshRules {
        city: String,
        file: PathBuf,
    },
    /// Print the eligibility of every vehicle in a JSON catalog file
    RecomputeEligibility {
        vehicles: PathBuf,
        #[arg(long)]
        city: Option<String>,
        #[arg(long)]
        year: Option<i32>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match run(cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Command) -> Result<()> {
    let config = AdvisorConfig::from_env()?;

    match command {
        Command::RefreshRules { city, file } => {
            let rows: Vec<EligibilityRuleRow> = read_json(&file)?;
            refresh_city_rules(config.database_url.as_deref(), &city, rows).await?;
            Ok(())
        }

        Command::RecomputeEligibility {
            vehicles,
            city,
            year,
        } => {
            let vehicles: Vec<Vehicle> = read_json(&vehicles)?;
            let city = normalize_city_slug(city.as_deref().unwrap_or(&config.default_city));
            let year = year.unwrap_or_else(|| config.reference_year());

            let store = build_rule_store(config.database_url.as_deref());
            let rules = RuleSet::from_rows(&store.rules_for_city(&city).await?);
            info!(city = %city, year, rules = rules.len(), "Recomputing eligibility");

            let reports = eligibility_reports(&vehicles, &city, year, &rules, &config.eligibility);
            println!("{}", serde_json::to_string_pretty(&reports)?);
            Ok(())
        }
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = std::fs::read_to_string(path).map_err(|e| {
        AdvisorError::UserInput(format!("cannot read {}: {}", path.display(), e))
    })?;
    Ok(serde_json::from_str(&raw)?)
}
