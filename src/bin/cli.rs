//! racerank CLI - build feature tables and evaluate race rankings

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use racerank::config::{HistoryMode, PipelineConfig};
use racerank::data::features::FeatureRow;
use racerank::pipeline::{evaluate_predictions_file, write_json, Pipeline, RunReport};
use racerank::scorer::FormScorer;
use racerank::{DataQualityReport, RankingReport};

#[derive(Parser)]
#[command(name = "racerank")]
#[command(author, version, about = "Horse racing feature table and ranking evaluation", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory holding races.csv, results.csv and tracking.csv
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Output directory
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Split seed
    #[arg(long)]
    seed: Option<u64>,

    /// Fraction of races held out for evaluation
    #[arg(long)]
    eval_fraction: Option<f64>,

    /// Which races feed the historical features
    #[arg(long, value_enum)]
    history: Option<HistoryArg>,

    /// Drop rows without a complete tracking sample
    #[arg(long)]
    require_tracking: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum HistoryArg {
    PointInTime,
    FullHistory,
}

impl From<HistoryArg> for HistoryMode {
    fn from(arg: HistoryArg) -> Self {
        match arg {
            HistoryArg::PointInTime => HistoryMode::PointInTime,
            HistoryArg::FullHistory => HistoryMode::FullHistory,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Build the feature table
    Build,

    /// Build the feature table and write the train/eval partitions
    Split,

    /// Evaluate an external predictions CSV (race_id,label,score)
    Evaluate {
        /// Predictions file
        #[arg(short, long)]
        predictions: PathBuf,

        /// Number of misranked races to list
        #[arg(long, default_value = "10")]
        top: usize,
    },

    /// Run the whole pipeline with the form-based baseline scorer
    Baseline {
        /// Number of misranked races to list
        #[arg(long, default_value = "10")]
        top: usize,
    },
}

fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    let cli = Cli::parse();

    println!("{}", format!("racerank v{}", env!("CARGO_PKG_VERSION")).cyan().bold());
    println!();

    let config = resolve_config(&cli)?;

    match cli.command {
        Commands::Build => run_build(config),
        Commands::Split => run_split(config),
        Commands::Evaluate { predictions, top } => run_evaluate(&config, &predictions, top),
        Commands::Baseline { top } => run_baseline(config, top),
    }
}

/// Config file (or defaults) with command-line overrides applied
fn resolve_config(cli: &Cli) -> Result<PipelineConfig> {
    let mut config = match &cli.config {
        Some(path) => PipelineConfig::load(path)
            .with_context(|| format!("Failed to load config {:?}", path))?,
        None => PipelineConfig::default(),
    };

    if let Some(dir) = &cli.data_dir {
        let with_tracking = dir.join("tracking.csv").exists();
        config.sources = racerank::config::SourcePaths::in_dir(dir, with_tracking);
    }
    if let Some(output) = &cli.output {
        config.output.dir = output.clone();
    }
    if let Some(seed) = cli.seed {
        config.split.seed = seed;
    }
    if let Some(fraction) = cli.eval_fraction {
        config.split.eval_fraction = fraction;
    }
    if let Some(history) = cli.history {
        config.history.mode = history.into();
    }
    if cli.require_tracking {
        config.filter.require_tracking = true;
    }

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn spinner(message: &'static str) -> Result<ProgressBar> {
    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::default_spinner().template("{spinner:.green} {msg}")?);
    pb.set_message(message);
    Ok(pb)
}

fn build_table(pipeline: &Pipeline) -> Result<(Vec<FeatureRow>, DataQualityReport)> {
    let sources = &pipeline.config().sources;
    println!("Races:    {:?}", sources.races);
    println!("Results:  {:?}", sources.results);
    match &sources.tracking {
        Some(path) => println!("Tracking: {:?}", path),
        None => println!("Tracking: {}", "none".dimmed()),
    }
    println!("History:  {:?}", pipeline.config().history.mode);
    println!();

    let pb = spinner("Loading sources and building features...")?;
    let table = pipeline
        .build_features()
        .with_context(|| "Failed to build feature table")?;
    pb.finish_and_clear();

    Ok((table.rows, table.quality))
}

fn run_build(config: PipelineConfig) -> Result<()> {
    let pipeline = Pipeline::new(config)?;
    let (rows, quality) = build_table(&pipeline)?;

    let path = pipeline.config().output.features_path();
    pipeline
        .write_features(&rows, &path)
        .with_context(|| format!("Failed to write {:?}", path))?;

    print_quality(&quality);
    println!("\n{} {} rows -> {:?}", "Feature table:".green().bold(), rows.len(), path);
    Ok(())
}

fn run_split(config: PipelineConfig) -> Result<()> {
    let pipeline = Pipeline::new(config)?;
    let (rows, quality) = build_table(&pipeline)?;
    print_quality(&quality);

    let split = pipeline.split(&rows).context("Grouped split failed")?;
    let output = &pipeline.config().output;
    for (rows, path) in [
        (&rows, output.features_path()),
        (&split.train, output.train_path()),
        (&split.eval, output.eval_path()),
    ] {
        pipeline
            .write_features(rows, &path)
            .with_context(|| format!("Failed to write {:?}", path))?;
    }

    let train_sizes = split.train_group_sizes();
    let eval_sizes = split.eval_group_sizes();
    println!("\n{}", "Split:".yellow().bold());
    println!("{:>8} {:>8} {:>8} {:>14}", "Part", "Races", "Rows", "Entrants/race");
    println!("{}", "-".repeat(42));
    for (name, sizes) in [("train", &train_sizes), ("eval", &eval_sizes)] {
        let rows: usize = sizes.iter().sum();
        println!(
            "{:>8} {:>8} {:>8} {:>14.2}",
            name,
            sizes.len(),
            rows,
            rows as f64 / sizes.len().max(1) as f64
        );
    }
    let split_config = &pipeline.config().split;
    println!(
        "\nSeed {} / eval fraction {}",
        split_config.seed, split_config.eval_fraction
    );
    Ok(())
}

fn run_evaluate(config: &PipelineConfig, predictions: &Path, top: usize) -> Result<()> {
    let (report, stats) = evaluate_predictions_file(predictions)
        .with_context(|| format!("Failed to evaluate {:?}", predictions))?;

    if stats.unusable_predictions > 0 {
        println!(
            "{}",
            format!("Skipped {} unusable prediction rows", stats.unusable_predictions).yellow()
        );
    }
    print_ranking(&report, top);

    let path = config.output.report_path();
    write_json(&report, &path).with_context(|| format!("Failed to write {:?}", path))?;
    println!("\nReport written to {:?}", path);
    Ok(())
}

fn run_baseline(config: PipelineConfig, top: usize) -> Result<()> {
    println!("{}", "Running baseline evaluation...".green());
    let pipeline = Pipeline::new(config)?;

    let pb = spinner("Building features, splitting and scoring...")?;
    let report: RunReport = pipeline
        .run(&FormScorer::new())
        .with_context(|| "Baseline run failed")?;
    pb.finish_and_clear();

    print_quality(&report.quality);
    println!(
        "\nTrain: {} races / {} rows   Eval: {} races / {} rows",
        report.train_races, report.train_rows, report.eval_races, report.eval_rows
    );
    print_ranking(&report.ranking, top);
    println!("\nArtifacts written to {:?}", pipeline.config().output.dir);
    Ok(())
}

fn print_quality(quality: &DataQualityReport) {
    println!("{}", "Data quality:".yellow().bold());
    println!("{}", "-".repeat(50));
    println!("{:<36} {:>10}", "Rows read", quality.normalize.rows_read);
    println!("{:<36} {:>10}", "Malformed fields", quality.normalize.malformed_fields);
    println!("{:<36} {:>10}", "Duplicate races", quality.join.duplicate_races);
    println!("{:<36} {:>10}", "Orphan results", quality.join.orphan_results);
    println!("{:<36} {:>10}", "Results without keys", quality.join.results_without_keys);
    println!("{:<36} {:>10}", "Conflicting ranks", quality.join.rank_conflicts);
    println!("{:<36} {:>10}", "Orphan tracking", quality.join.orphan_tracking);
    println!("{:<36} {:>10}", "Incomplete tracking", quality.join.incomplete_tracking);
    println!("{:<36} {:>10}", "Joined rows", quality.join.rows_out);
    println!("{:<36} {:>10}", "Rows with tracking", quality.join.rows_with_tracking);
    for (field, count) in &quality.filter.missing_by_field {
        println!("{:<36} {:>10}", format!("Dropped, missing {}", field), count);
    }
    println!("{:<36} {:>10}", "Feature rows", quality.filter.rows_out);
    println!("{:<36} {:>10}", "Imputed history values", quality.imputation.imputed_values);
}

fn print_ranking(report: &RankingReport, top: usize) {
    println!("\n{}", "Ranking evaluation:".yellow().bold());
    println!("{}", "-".repeat(50));
    if report.races == 0 {
        println!("{}", "No races to evaluate.".red());
        return;
    }

    let accuracy = format!("{:.2}%", report.top1_accuracy * 100.0);
    println!(
        "Top-1 accuracy: {} ({}/{} races)",
        if report.top1_accuracy > 0.0 { accuracy.green() } else { accuracy.red() },
        report.correct_races,
        report.races
    );
    if let Some(auc) = report.roc_auc {
        println!("ROC AUC:        {:.4}", auc);
    }
    if let (Some(w), Some(n)) = (report.mean_winner_score, report.mean_non_winner_score) {
        println!("Mean score:     winners {:.4} / others {:.4}", w, n);
    }

    let summary = &report.gap_summary;
    println!(
        "Error gaps:     {} defined, {} undefined",
        summary.count, report.undefined_gaps
    );
    if let (Some(mean), Some(median), Some(max)) = (summary.mean, summary.median, summary.max) {
        println!("                mean {:.4} / median {:.4} / max {:.4}", mean, median, max);
    }

    let mut misranked: Vec<_> = report.outcomes.iter().filter(|o| o.gap.is_some()).collect();
    if misranked.is_empty() || top == 0 {
        return;
    }
    misranked.sort_by(|a, b| b.gap.unwrap_or(0.0).total_cmp(&a.gap.unwrap_or(0.0)));

    println!("\n{}", "Largest misses:".yellow().bold());
    println!("{:>14} {:>9} {:>10} {:>10} {:>8}", "Race", "Entrants", "Top", "Winner", "Gap");
    println!("{}", "-".repeat(55));
    for o in misranked.iter().take(top) {
        println!(
            "{:>14} {:>9} {:>10.4} {:>10.4} {:>8.4}",
            o.race_id,
            o.entrants,
            o.top_score,
            o.winner_score.unwrap_or(f64::NAN),
            o.gap.unwrap_or(f64::NAN)
        );
    }
}
