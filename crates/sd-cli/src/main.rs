//! sovdml CLI

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sd_inference::{SyntheticConfig, synthetic_panel};
use sd_panel::{
    AssemblyConfig, DEFAULT_COUNTRY_PREFIX, DEFAULT_TIME_PREFIX, FeatureConfig, expand_features,
    missing_report, read_panel_csv, select_countries, write_panel_csv, write_report_csv,
};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

mod bundle;
mod config;
mod pipeline;

use bundle::InputFile;
use config::{EstimationConfig, RunConfig, config_dir, read_config};

#[derive(Parser)]
#[command(name = "sovdml")]
#[command(about = "sovdml - Sovereign-spread panels and double machine learning")]
#[command(version)]
struct Cli {
    /// Log verbosity level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "warn")]
    log_level: tracing::Level,

    /// Threads (0 = rayon default).
    #[arg(long, global = true, default_value = "0")]
    threads: usize,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Merge source tables into one country × month panel
    Assemble {
        /// Assembly config (YAML or JSON)
        #[arg(short, long)]
        config: PathBuf,

        /// Output panel CSV
        #[arg(short, long)]
        output: PathBuf,

        /// Also write the per-source completeness report (JSON)
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// Add country / year-month indicators and lagged columns
    Expand {
        /// Input panel CSV
        #[arg(short, long)]
        input: PathBuf,

        /// Outcome column to lag
        #[arg(long)]
        outcome: String,

        /// Lag orders in months
        #[arg(long, value_delimiter = ',', default_value = "1,2")]
        lags: Vec<u32>,

        /// Additional columns to lag
        #[arg(long, value_delimiter = ',')]
        lag_variables: Vec<String>,

        /// Skip country indicators
        #[arg(long)]
        no_country_indicators: bool,

        /// Skip year-month indicators
        #[arg(long)]
        no_time_indicators: bool,

        /// Output panel CSV
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Per-variable and per-country completeness reports
    Missing {
        /// Input panel CSV
        #[arg(short, long)]
        input: PathBuf,

        /// Output directory for the report CSVs
        #[arg(long)]
        out_dir: PathBuf,

        /// Select countries with completeness strictly above this
        #[arg(long)]
        threshold: Option<f64>,

        /// Variables scored (default: every value and lag column)
        #[arg(long, value_delimiter = ',')]
        variables: Vec<String>,
    },

    /// Summary statistics, correlation matrix and VIF table of panel columns
    Describe {
        /// Input panel CSV
        #[arg(short, long)]
        input: PathBuf,

        /// Output directory for the tables
        #[arg(long)]
        out_dir: PathBuf,

        /// Variables summarized and correlated
        #[arg(long, value_delimiter = ',', required = true)]
        variables: Vec<String>,

        /// VIF regressors (default: --variables)
        #[arg(long, value_delimiter = ',')]
        vif_variables: Vec<String>,
    },

    /// Estimate the effect with cross-fitted DML and write a result bundle
    Dml {
        /// Input panel CSV
        #[arg(short, long)]
        input: PathBuf,

        /// Estimation config (YAML or JSON)
        #[arg(short, long)]
        config: PathBuf,

        /// Output directory for the bundle
        #[arg(long)]
        out_dir: PathBuf,

        /// Allow writing into a non-empty output directory
        #[arg(long)]
        overwrite: bool,
    },

    /// Full pipeline: assemble → expand → missing → select → describe → dml → diagnostics → bundle
    Run {
        /// Run config (YAML or JSON)
        #[arg(short, long)]
        config: PathBuf,
    },

    /// Write a synthetic panel with a known effect (columns y, d, x)
    Simulate {
        /// Output panel CSV
        #[arg(short, long)]
        output: PathBuf,

        /// Number of countries
        #[arg(long, default_value = "10")]
        countries: usize,

        /// Months per country
        #[arg(long, default_value = "24")]
        months: usize,

        /// True effect of d on y
        #[arg(long, default_value = "2.0")]
        theta: f64,

        /// Random seed
        #[arg(long, default_value = "0")]
        seed: u64,
    },

    /// Print version information
    Version,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(cli.log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
    setup_threads(cli.threads);

    match cli.command {
        Commands::Assemble { config, output, report } => cmd_assemble(&config, &output, report.as_deref()),
        Commands::Expand {
            input,
            outcome,
            lags,
            lag_variables,
            no_country_indicators,
            no_time_indicators,
            output,
        } => {
            let cfg = FeatureConfig {
                lags,
                lag_variables,
                country_indicators: !no_country_indicators,
                time_indicators: !no_time_indicators,
                ..FeatureConfig::new(outcome)
            };
            cmd_expand(&input, &cfg, &output)
        }
        Commands::Missing { input, out_dir, threshold, variables } => {
            cmd_missing(&input, &out_dir, threshold, &variables)
        }
        Commands::Describe { input, out_dir, variables, vif_variables } => {
            cmd_describe(&input, &out_dir, &variables, &vif_variables)
        }
        Commands::Dml { input, config, out_dir, overwrite } => cmd_dml(&input, &config, &out_dir, overwrite),
        Commands::Run { config } => cmd_run(&config),
        Commands::Simulate { output, countries, months, theta, seed } => {
            let cfg = SyntheticConfig { n_countries: countries, n_months: months, theta, seed, ..Default::default() };
            let panel = synthetic_panel(&cfg)?;
            write_panel_csv(&panel, &output)?;
            tracing::info!(rows = panel.n_rows(), path = %output.display(), "synthetic panel written");
            Ok(())
        }
        Commands::Version => {
            println!("sovdml {}", sd_core::VERSION);
            Ok(())
        }
    }
}

fn setup_threads(threads: usize) {
    if threads > 0 {
        // Best-effort; if a global pool already exists, keep going.
        let _ = rayon::ThreadPoolBuilder::new().num_threads(threads).build_global();
    }
}

fn load_panel(path: &Path) -> Result<sd_panel::Panel> {
    tracing::info!(path = %path.display(), "loading panel");
    read_panel_csv(path, DEFAULT_COUNTRY_PREFIX, DEFAULT_TIME_PREFIX)
        .with_context(|| format!("reading panel {}", path.display()))
}

fn print_json(value: &serde_json::Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn cmd_assemble(config: &Path, output: &Path, report: Option<&Path>) -> Result<()> {
    let mut cfg: AssemblyConfig = read_config(config)?;
    cfg.resolve_paths(&config_dir(config));
    let (panel, rep) = sd_panel::assemble(&cfg)?;
    write_panel_csv(&panel, output)?;
    if let Some(path) = report {
        bundle::write_json(path, &rep)?;
    }
    print_json(&serde_json::json!({
        "rows": rep.n_rows,
        "countries": rep.n_countries,
        "months": rep.n_months,
        "columns": panel.column_names(),
    }))
}

fn cmd_expand(input: &Path, cfg: &FeatureConfig, output: &Path) -> Result<()> {
    let panel = load_panel(input)?;
    let (expanded, summary) = expand_features(&panel, cfg)?;
    write_panel_csv(&expanded, output)?;
    print_json(&serde_json::to_value(&summary)?)
}

fn cmd_missing(input: &Path, out_dir: &Path, threshold: Option<f64>, variables: &[String]) -> Result<()> {
    let panel = load_panel(input)?;
    let vars = (!variables.is_empty()).then_some(variables);
    let report = missing_report(&panel, vars, &BTreeMap::new())?;
    let written = write_report_csv(&report, out_dir)?;
    let selected = select_countries(&report, threshold, vars)?;
    let selected: Vec<String> = selected.iter().map(|c| c.to_string()).collect();
    bundle::write_json(
        &out_dir.join("selection.json"),
        &serde_json::json!({ "threshold": threshold, "countries": selected }),
    )?;
    print_json(&serde_json::json!({
        "files": written.iter().map(|p| p.display().to_string()).collect::<Vec<_>>(),
        "selected_countries": selected,
    }))
}

fn cmd_describe(input: &Path, out_dir: &Path, variables: &[String], vif_variables: &[String]) -> Result<()> {
    let panel = load_panel(input)?;
    std::fs::create_dir_all(out_dir).with_context(|| format!("creating {}", out_dir.display()))?;
    let vif = (!vif_variables.is_empty()).then_some(vif_variables);
    let written = pipeline::write_descriptives(out_dir, &panel, variables, vif)?;
    print_json(&serde_json::json!({
        "files": written.iter().map(|p| p.display().to_string()).collect::<Vec<_>>(),
    }))
}

fn cmd_dml(input: &Path, config: &Path, out_dir: &Path, overwrite: bool) -> Result<()> {
    let cfg: EstimationConfig = read_config(config)?;
    let panel = load_panel(input)?;
    bundle::prepare_out_dir(out_dir, overwrite)?;
    let est = pipeline::estimate(&panel, &cfg)?;
    let inputs = vec![InputFile::record("config", config)?, InputFile::record("panel", input)?];
    let summary = pipeline::write_estimation(out_dir, &cfg, &est, "dml", inputs)?;
    bundle::write_manifest(out_dir)?;
    print_json(&serde_json::to_value(&summary.estimate)?)
}

fn cmd_run(config: &Path) -> Result<()> {
    let cfg = RunConfig::load(config)?;
    let summary = pipeline::run(&cfg, config)?;
    for w in &summary.warnings {
        tracing::warn!("{w}");
    }
    print_json(&serde_json::to_value(&summary.estimate)?)
}
