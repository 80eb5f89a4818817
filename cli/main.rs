#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]

use clap::{Args, CommandFactory, Parser, Subcommand};
use std::error::Error;
use std::path::{Path, PathBuf};
use std::process;

use lassosum::blocks::{BlockSource, LdBreakpoints};
use lassosum::config::LassosumConfig;
use lassosum::io::{
    IoError, read_id_list, read_ld_blocks, read_summary_statistics, read_text_panel,
    write_best_coefficients, write_best_scores, write_coefficients, write_scores,
    write_validation,
};
use lassosum::pipeline::{PanelSpec, PipelineResult, run_pipeline};
use lassosum::select::ParticipantFilter;
use lassosum::validate::pseudovalidate;

#[derive(Args)]
pub struct PipelineArgs {
    /// Summary statistics (chr, pos, a1, [a2], cor | p + beta/or/z [+ n]); may be gzipped
    #[arg(long, value_name = "FILE")]
    pub sumstats: PathBuf,

    /// Reference panel prefix (PREFIX.markers and PREFIX.dosages)
    #[arg(long = "ref", value_name = "PREFIX")]
    pub reference: PathBuf,

    /// Test panel prefix; without it coefficients are produced but nothing is scored
    #[arg(long, value_name = "PREFIX")]
    pub test: Option<PathBuf>,

    /// LD block regions (chr start stop); every chromosome is one block when omitted
    #[arg(long, value_name = "FILE")]
    pub ld_blocks: Option<PathBuf>,

    /// TOML run configuration (grids, solver settings, policies)
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// IDs of reference participants to keep
    #[arg(long, value_name = "FILE")]
    pub keep_ref: Option<PathBuf>,

    /// IDs of reference participants to remove
    #[arg(long, value_name = "FILE")]
    pub remove_ref: Option<PathBuf>,

    /// IDs of test participants to keep
    #[arg(long, value_name = "FILE")]
    pub keep_test: Option<PathBuf>,

    /// IDs of test participants to remove
    #[arg(long, value_name = "FILE")]
    pub remove_test: Option<PathBuf>,

    /// GWAS sample size, for p-value statistics without an n column
    #[arg(long, value_name = "N")]
    pub sample_size: Option<f64>,

    /// Output prefix
    #[arg(long, value_name = "PREFIX")]
    pub out: PathBuf,
}

#[derive(Args)]
pub struct ValidateArgs {
    /// Pipeline result written by `lassosum pipeline`
    #[arg(long, value_name = "FILE")]
    pub result: PathBuf,

    /// Validation panel prefix
    #[arg(long, value_name = "PREFIX")]
    pub panel: PathBuf,

    /// IDs of participants to keep
    #[arg(long, value_name = "FILE")]
    pub keep: Option<PathBuf>,

    /// IDs of participants to remove
    #[arg(long, value_name = "FILE")]
    pub remove: Option<PathBuf>,

    /// Use the raw correlations instead of shrinking them by their local FDR
    #[arg(long)]
    pub no_fdr: bool,

    /// Output prefix
    #[arg(long, value_name = "PREFIX")]
    pub out: PathBuf,
}

#[derive(Parser)]
#[command(name = "lassosum", about = "Polygenic scores from summary statistics with LD-aware penalized regression")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Fit coefficient paths over the hyperparameter grid and score the test panel
    #[command(about = "Fit lassosum coefficients and compute polygenic scores")]
    Pipeline(PipelineArgs),

    /// Choose the best hyperparameters without phenotype data
    #[command(about = "Pseudovalidate a pipeline result against a panel")]
    Validate(ValidateArgs),

    /// Show version information
    Version,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let Cli { command } = cli;

    let result = match command {
        Some(Commands::Pipeline(args)) => run_pipeline_command(args),
        Some(Commands::Validate(args)) => run_validate_command(args),
        Some(Commands::Version) => {
            println!("lassosum {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        None => {
            let _ = Cli::command().print_help();
            println!();
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn output_path(prefix: &Path, suffix: &str) -> PathBuf {
    let mut name = prefix.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

fn participant_filter(
    keep: Option<&Path>,
    remove: Option<&Path>,
) -> Result<ParticipantFilter, IoError> {
    Ok(ParticipantFilter {
        keep: keep.map(read_id_list).transpose()?,
        remove: remove.map(read_id_list).transpose()?,
    })
}

fn run_pipeline_command(args: PipelineArgs) -> Result<(), Box<dyn Error>> {
    let config = match &args.config {
        Some(path) => LassosumConfig::load(path)?,
        None => LassosumConfig::default(),
    };
    let sumstats = read_summary_statistics(&args.sumstats, args.sample_size)?;
    let reference = read_text_panel(&args.reference)?;
    let test = args.test.as_deref().map(read_text_panel).transpose()?;
    let blocks = match &args.ld_blocks {
        Some(path) => BlockSource::Breakpoints(read_ld_blocks(path)?),
        None => BlockSource::Breakpoints(LdBreakpoints::default()),
    };
    let reference_filter =
        participant_filter(args.keep_ref.as_deref(), args.remove_ref.as_deref())?;
    let test_filter = participant_filter(args.keep_test.as_deref(), args.remove_test.as_deref())?;

    let result = run_pipeline(
        &sumstats,
        PanelSpec::new(&reference, &reference_filter),
        test.as_ref()
            .map(|panel| PanelSpec::new(panel, &test_filter)),
        &blocks,
        &config,
    )?;

    let result_path = output_path(&args.out, ".result.toml");
    result.save(&result_path)?;
    let coefficient_path = output_path(&args.out, ".coefficients.tsv");
    write_coefficients(&coefficient_path, &result)?;
    println!("Pipeline result saved to: {}", result_path.display());
    println!("Coefficients written to: {}", coefficient_path.display());

    if let Some(scores) = result.scores() {
        let score_path = output_path(&args.out, ".scores.tsv");
        write_scores(
            &score_path,
            result.participant_ids(),
            result.shrinkage(),
            result.lambda(),
            scores,
        )?;
        println!("Scores written to: {}", score_path.display());
    }
    Ok(())
}

fn run_validate_command(args: ValidateArgs) -> Result<(), Box<dyn Error>> {
    let result = PipelineResult::load(&args.result)?;
    let panel = read_text_panel(&args.panel)?;
    let filter = participant_filter(args.keep.as_deref(), args.remove.as_deref())?;

    let validation = pseudovalidate(&result, PanelSpec::new(&panel, &filter), !args.no_fdr)?;
    println!(
        "Best combination: shrinkage = {}, lambda = {} (value {:.6})",
        validation.best.shrinkage, validation.best.lambda, validation.best.value
    );

    let table_path = output_path(&args.out, ".validation.tsv");
    write_validation(&table_path, &validation)?;
    write_best_coefficients(&output_path(&args.out, ".best_coefficients.tsv"), &validation)?;
    write_best_scores(&output_path(&args.out, ".best_scores.tsv"), &validation)?;
    println!("Validation table written to: {}", table_path.display());
    Ok(())
}
