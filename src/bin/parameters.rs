//! Inspect a parameter tree at an instant
//!
//! Usage:
//!   parameters --file params.json --at 2020-01-01 --path gov.tax.income_tax_rate
//!   parameters --template --at 2020 (whole snapshot as JSON)

use std::fs;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use microsim_engine::country_template;
use microsim_engine::parameters::{uprate_parameters, AtInstantValue, ParameterNode};
use microsim_engine::periods::instant;

#[derive(Parser)]
#[command(name = "parameters", about = "Print parameter values at an instant")]
struct Cli {
    /// JSON parameter tree to load
    #[arg(long, conflicts_with = "template")]
    file: Option<PathBuf>,

    /// Use the country template's parameters
    #[arg(long)]
    template: bool,

    /// Instant to resolve at (YYYY, YYYY-MM or YYYY-MM-DD)
    #[arg(long)]
    at: String,

    /// Dotted parameter path; the whole snapshot is printed when omitted
    #[arg(long)]
    path: Option<String>,

    /// Skip the uprating pass on loaded files
    #[arg(long)]
    no_uprating: bool,
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let mut root = match (&cli.file, cli.template) {
        (Some(file), _) => {
            let text = fs::read_to_string(file).with_context(|| format!("reading {}", file.display()))?;
            let data: serde_json::Value =
                serde_json::from_str(&text).with_context(|| format!("parsing {}", file.display()))?;
            ParameterNode::from_json("", &data)?
        }
        (None, true) => country_template::parameters()?,
        (None, false) => bail!("either --file or --template is required"),
    };
    if !cli.no_uprating {
        uprate_parameters(&mut root)?;
    }

    let at = instant(cli.at.as_str())?;
    let snapshot = root.get_at_instant(at);
    log::info!("resolved {} parameters at {}", root.parameter_paths().len(), at);

    let output = match &cli.path {
        None => snapshot.to_json(),
        Some(path) => match snapshot.get(path)? {
            AtInstantValue::Node(node) => node.to_json(),
            AtInstantValue::Scale(scale) => scale.to_json(),
            AtInstantValue::Value(value) => serde_json::to_value(value)?,
        },
    };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
