//! Run the country template under a range of income tax rates
//!
//! Usage:
//!   reform_sweep --rates 0.1,0.2,0.3 --period 2020-01
//!   reform_sweep --dataset data/ --year 2020 --period 2020-01 --rates 0.15,0.25

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use microsim_engine::country_template;
use microsim_engine::simulation::{CsvDataset, Dataset, DatasetColumns, SimulationBuilder};
use microsim_engine::system::ParameterReform;
use rayon::prelude::*;

#[derive(Parser)]
#[command(name = "reform_sweep", about = "Aggregate outcomes of income tax rate reforms")]
struct Cli {
    /// Directory of entity CSV files; a synthetic population is used when omitted
    #[arg(long)]
    dataset: Option<PathBuf>,

    /// Year the dataset describes
    #[arg(long, default_value_t = 2020)]
    year: i32,

    /// Month to aggregate
    #[arg(long, default_value = "2020-01")]
    period: String,

    /// Income tax rates to try
    #[arg(long, value_delimiter = ',', default_values_t = vec![0.1, 0.15, 0.2, 0.25, 0.3])]
    rates: Vec<f64>,

    /// Households in the synthetic population
    #[arg(long, default_value_t = 1000)]
    households: usize,
}

/// Totals of one reform run
#[derive(Debug, Clone, Default)]
struct SweepRow {
    rate: f64,
    income_tax: f64,
    basic_income: f64,
    housing_allowance: f64,
    disposable_income: f64,
}

/// Two adults per household with a spread of salaries and rents
fn synthetic_population(households: usize, year: i32) -> DatasetColumns {
    let mut columns = DatasetColumns::new();
    let month = format!("{}-01", year);
    let mut push = |name: String, value: String| columns.entry(name).or_default().push(value);
    for h in 0..households {
        push("household_id".into(), h.to_string());
        push(format!("rent__{}", month), (400 + (h % 7) * 100).to_string());
        for p in 0..2 {
            let id = 2 * h + p;
            push("person_id".into(), id.to_string());
            push("person_household_id".into(), h.to_string());
            push("person_household_role".into(), "parent".into());
            push(format!("age__{}", month), (25 + id % 40).to_string());
            push(format!("salary__{}", month), (((id * 7919) % 6000) as f64).to_string());
        }
    }
    columns
}

fn run(dataset: &dyn Dataset, cli: &Cli, rate: f64) -> Result<SweepRow> {
    let baseline = country_template::tax_benefit_system()?;
    let reform = ParameterReform::new(format!("income_tax_rate_{}", rate)).set(
        "gov.tax.income_tax_rate",
        &cli.year.to_string(),
        rate,
    )?;
    let system = Arc::new(baseline.apply_reform(&reform)?);
    let mut simulation = SimulationBuilder::new(system).build_from_dataset(dataset, cli.year)?;
    let mut total = |name: &str| -> Result<f64> {
        Ok(simulation.calculate(name, cli.period.as_str())?.to_f64().iter().sum())
    };
    Ok(SweepRow {
        rate,
        income_tax: total("income_tax")?,
        basic_income: total("basic_income")?,
        housing_allowance: total("housing_allowance")?,
        disposable_income: total("disposable_income")?,
    })
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    let start = Instant::now();

    let columns = match &cli.dataset {
        Some(dir) => CsvDataset::new(dir)
            .load()
            .with_context(|| format!("loading dataset {}", dir.display()))?,
        None => synthetic_population(cli.households, cli.year),
    };
    log::info!("loaded {} columns in {:?}", columns.len(), start.elapsed());

    let rows: Vec<SweepRow> = cli
        .rates
        .par_iter()
        .map(|&rate| run(&columns, &cli, rate))
        .collect::<Result<_>>()?;

    println!(
        "{:>6} {:>16} {:>16} {:>18} {:>18}",
        "Rate", "Income tax", "Basic income", "Housing allowance", "Disposable income"
    );
    println!("{}", "-".repeat(78));
    for row in &rows {
        println!(
            "{:>6.3} {:>16.2} {:>16.2} {:>18.2} {:>18.2}",
            row.rate, row.income_tax, row.basic_income, row.housing_allowance, row.disposable_income
        );
    }
    println!("\n{} reforms in {:?}", rows.len(), start.elapsed());
    Ok(())
}
