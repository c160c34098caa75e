//! lcx - language complexity analysis CLI

use clap::{Parser, Subcommand, ValueEnum};
use lingcomplex::data::{Dataset, Table, Variant};
use lingcomplex::error::Result;
use lingcomplex::influence::{
    cooks_distance, flag_outliers, leave_one_out, InfluenceMethod, LooOutcome, DEFAULT_ALPHA,
};
use lingcomplex::model::{fit, Family, FitConfig, FittedModel, ModelSpec};
use lingcomplex::pipeline::{prepare_dataset, Analysis, AnalysisConfig};
use lingcomplex::transform::derive_features;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliFamily {
    /// Linear mixed model with one random intercept
    Lmm,
    /// Binomial logistic regression
    Glm,
}

impl From<CliFamily> for Family {
    fn from(f: CliFamily) -> Self {
        match f {
            CliFamily::Lmm => Family::Lmm,
            CliFamily::Glm => Family::BinomialGlm,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliInfluenceMethod {
    /// Hold variance components at the full-fit values
    Fixed,
    /// Refit REML for every deletion
    Refit,
}

impl From<CliInfluenceMethod> for InfluenceMethod {
    fn from(m: CliInfluenceMethod) -> Self {
        match m {
            CliInfluenceMethod::Fixed => InfluenceMethod::FixedVariance,
            CliInfluenceMethod::Refit => InfluenceMethod::Refit,
        }
    }
}

/// Morphological complexity analysis with subfamily random effects
#[derive(Parser)]
#[command(name = "lcx")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full analysis
    Run {
        /// Raw language TSV
        #[arg(short, long)]
        input: PathBuf,

        /// Analysis configuration YAML (defaults if omitted)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Directory for TSV and JSON outputs
        #[arg(short, long, default_value = "lcx-out")]
        output_dir: PathBuf,
    },

    /// Normalize and clean a raw TSV
    Clean {
        #[arg(short, long)]
        input: PathBuf,

        #[arg(short, long)]
        output: PathBuf,
    },

    /// Fit one model and print its coefficients
    Fit {
        #[arg(short, long)]
        input: PathBuf,

        /// e.g. "scaled_form_complexity ~ L2 + (1 | subfamily)"
        #[arg(short, long)]
        formula: String,

        #[arg(long, value_enum, default_value = "lmm")]
        family: CliFamily,

        /// Coefficient to report as focal
        #[arg(long)]
        focal: Option<String>,

        /// Languages to exclude before deriving features
        #[arg(short, long, value_delimiter = ',')]
        exclude: Vec<String>,
    },

    /// Cook's distance and 4/n flags for one model
    Influence {
        #[arg(short, long)]
        input: PathBuf,

        #[arg(short, long)]
        formula: String,

        #[arg(long, value_enum, default_value = "lmm")]
        family: CliFamily,

        #[arg(long, value_enum, default_value = "fixed")]
        method: CliInfluenceMethod,
    },

    /// Leave-one-language-out sweep for one model
    Loo {
        #[arg(short, long)]
        input: PathBuf,

        #[arg(short, long)]
        formula: String,

        #[arg(long, value_enum, default_value = "lmm")]
        family: CliFamily,

        #[arg(long)]
        focal: Option<String>,

        #[arg(long, default_value_t = DEFAULT_ALPHA)]
        alpha: f64,
    },

    /// Write an example configuration YAML
    Example {
        #[arg(short, long, default_value = "analysis.yaml")]
        output: PathBuf,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run {
            input,
            config,
            output_dir,
        } => cmd_run(&input, config.as_deref(), &output_dir),
        Commands::Clean { input, output } => cmd_clean(&input, &output),
        Commands::Fit {
            input,
            formula,
            family,
            focal,
            exclude,
        } => cmd_fit(&input, &formula, family.into(), focal.as_deref(), &exclude),
        Commands::Influence {
            input,
            formula,
            family,
            method,
        } => cmd_influence(&input, &formula, family.into(), method.into()),
        Commands::Loo {
            input,
            formula,
            family,
            focal,
            alpha,
        } => cmd_loo(&input, &formula, family.into(), focal.as_deref(), alpha),
        Commands::Example { output } => cmd_example(&output),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn load_base(input: &Path) -> Result<Dataset> {
    let (dataset, _) = prepare_dataset(&Table::from_tsv(input)?)?;
    info!(n = dataset.n_rows(), "loaded {}", input.display());
    Ok(dataset)
}

fn print_model(model: &FittedModel) {
    println!("{}  [{}]  n = {}", model.formula, model.variant, model.n_obs);
    println!(
        "{:<32} {:>10} {:>10} {:>8} {:>10}",
        "coefficient", "estimate", "std_error", "stat", "p_value"
    );
    for c in &model.coefficients {
        let marker = if c.name == model.focal_coefficient { " *" } else { "" };
        println!(
            "{:<32} {:>10.4} {:>10.4} {:>8.3} {:>10.2e}{}",
            c.name, c.estimate, c.std_error, c.statistic, c.p_value, marker
        );
    }
    for (variable, level) in &model.reference_levels {
        println!("reference: {} = {}", variable, level);
    }
    if let Some(vc) = model.variance_components {
        println!("tau2 = {:.4}, sigma2 = {:.4}, ICC = {:.3}", vc.tau2, vc.sigma2, vc.icc());
    }
    println!(
        "R2 marginal = {:.3}, conditional = {:.3}",
        model.r2_marginal, model.r2_conditional
    );
    for w in &model.warnings {
        println!("warning: {}", w);
    }
}

fn cmd_run(input: &Path, config: Option<&Path>, output_dir: &Path) -> Result<()> {
    let config = match config {
        Some(path) => AnalysisConfig::from_file(path)?,
        None => AnalysisConfig::default(),
    };
    info!(name = %config.name, "running analysis");
    let report = Analysis::new(config).run_tsv(input)?;
    report.write_outputs(output_dir)?;

    eprintln!(
        "Done! {} + {} models fitted, sensitivity excluded [{}]",
        report.full.n_fitted(),
        report.sensitivity.n_fitted(),
        report.sensitivity_excluded.join(", ")
    );
    if !report.flagged_kept.is_empty() {
        eprintln!("  flagged but kept: {}", report.flagged_kept.join(", "));
    }
    Ok(())
}

fn cmd_clean(input: &Path, output: &Path) -> Result<()> {
    let dataset = load_base(input)?;
    dataset.to_table().to_tsv(output)?;
    eprintln!("Wrote {} languages to {}", dataset.n_rows(), output.display());
    Ok(())
}

fn cmd_fit(
    input: &Path,
    formula: &str,
    family: Family,
    focal: Option<&str>,
    exclude: &[String],
) -> Result<()> {
    let mut base = load_base(input)?;
    if !exclude.is_empty() {
        base = base.exclude_languages(
            exclude,
            Variant::Sensitivity {
                excluded: exclude.to_vec(),
            },
        )?;
    }
    let dataset = derive_features(&base)?;
    let spec = ModelSpec::parse("cli", formula, family, focal)?;
    let model = fit(&spec, &dataset, &FitConfig::default())?;
    print_model(&model);
    Ok(())
}

fn cmd_influence(input: &Path, formula: &str, family: Family, method: InfluenceMethod) -> Result<()> {
    let dataset = derive_features(&load_base(input)?)?;
    let spec = ModelSpec::parse("cli", formula, family, None)?;
    let config = FitConfig::default();
    let model = fit(&spec, &dataset, &config)?;
    let table = cooks_distance(&model, &spec, &dataset, &config, method)?;

    println!("threshold 4/n = {:.4}", table.threshold);
    for row in &table.rows {
        println!(
            "{:<20} {:>10.4}{}",
            row.language,
            row.cooks_distance,
            if row.flagged { "  flagged" } else { "" }
        );
    }
    let flagged = flag_outliers(&table);
    eprintln!("{} of {} languages flagged", flagged.len(), table.n_obs);
    Ok(())
}

fn cmd_loo(
    input: &Path,
    formula: &str,
    family: Family,
    focal: Option<&str>,
    alpha: f64,
) -> Result<()> {
    let base = load_base(input)?;
    let spec = ModelSpec::parse("cli", formula, family, focal)?;
    let result = leave_one_out(&spec, &base, &FitConfig::default(), alpha)?;

    for rec in &result.records {
        match &rec.outcome {
            LooOutcome::Ok {
                estimate,
                p_value,
                significant,
                ..
            } => println!(
                "-{:<20} {:>10.4} {:>10.2e}{}",
                rec.dropped,
                estimate,
                p_value,
                if *significant { " *" } else { "" }
            ),
            LooOutcome::Failed { reason } => println!("-{:<20} failed: {}", rec.dropped, reason),
        }
    }
    let s = &result.summary;
    eprintln!(
        "{} iterations, {} significant at {} ({:.0}%), {} failed",
        s.n_iterations,
        s.n_significant,
        alpha,
        100.0 * s.significant_fraction(),
        s.n_failed
    );
    Ok(())
}

fn cmd_example(output: &Path) -> Result<()> {
    let config = AnalysisConfig {
        name: "example".to_string(),
        loo_specs: vec![
            "case_marking_complexity~hill_valley".to_string(),
            "form_complexity~L2".to_string(),
        ],
        ..AnalysisConfig::default()
    };
    std::fs::write(output, config.to_yaml()?)?;
    eprintln!("Example configuration written to {}", output.display());
    Ok(())
}
