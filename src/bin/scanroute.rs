//! CLI binary for scanroute.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `PipelineConfig`, picks the scoring/binarization backends and prints a
//! summary.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use scanroute::{
    binarize, prepare, BatchReport, CommandBackend, CommandBinarizer, Device, ImageError,
    PipelineConfig, PipelineConfigBuilder, PipelineProgressCallback, ProgressCallback,
    QualityBackend, SharpnessBackend, Stage, Treatment,
};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// One progress bar, reset at the start of every stage.
struct CliProgressCallback {
    bar: ProgressBar,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::hidden();
        Arc::new(Self {
            bar,
            errors: AtomicUsize::new(0),
        })
    }
}

impl PipelineProgressCallback for CliProgressCallback {
    fn on_stage_start(&self, stage: Stage, total: usize) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>4}/{len} images  \
             ⏱ {elapsed_precise}  ETA {eta_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);

        self.bar.set_draw_target(indicatif::ProgressDrawTarget::stderr());
        self.bar.set_style(style);
        self.bar.set_length(total as u64);
        self.bar.set_position(0);
        self.bar.set_prefix(stage.to_string());
        self.bar.reset_eta();
        self.bar.reset_elapsed();
        self.bar.enable_steady_tick(Duration::from_millis(80));
    }

    fn on_image_start(&self, _stage: Stage, _index: usize, _total: usize, path: &Path) {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.bar.set_message(dim(&name));
    }

    fn on_image_complete(&self, _stage: Stage, _index: usize, _total: usize, _path: &Path) {
        self.bar.inc(1);
    }

    fn on_image_error(&self, _stage: Stage, _index: usize, _total: usize, error: &ImageError) {
        self.errors.fetch_add(1, Ordering::SeqCst);
        let msg = error.to_string();
        // Truncate very long error messages to keep output tidy.
        let msg = if msg.chars().count() > 100 {
            format!("{}\u{2026}", msg.chars().take(99).collect::<String>())
        } else {
            msg
        };
        self.bar.println(format!("  {} {}", red("✗"), red(&msg)));
        self.bar.inc(1);
    }

    fn on_stage_complete(&self, stage: Stage, total: usize, success_count: usize) {
        self.bar.finish_and_clear();
        let failed = total.saturating_sub(success_count);
        if failed == 0 {
            eprintln!("{} {}: {} image(s)", green("✔"), stage, bold(&success_count.to_string()));
        } else {
            eprintln!(
                "{} {}: {}/{} image(s)  ({} failed)",
                if failed == total { red("✘") } else { yellow("⚠") },
                stage,
                bold(&success_count.to_string()),
                total,
                red(&failed.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Stage 1: normalize, score, route and treat every scan
  scanroute prepare ./scans ./upload

  # Only score pages whose file name starts with "page_"
  scanroute prepare ./scans ./upload --regex '^page_'

  # Score with a learned metric through a pyiqa helper script
  scanroute prepare ./scans ./upload --metric maniqa-koniq \
      --scorer-program ./score_image.py --device cuda

  # Stage 2: binarize the "good" images with the SBB model
  scanroute binarize --model-dir ./saved_model_2020_01_16

ENVIRONMENT VARIABLES:
  RUST_LOG                     Log filter (overrides --verbose/--quiet)
  SCANROUTE_MANIFEST           Hand-off manifest path
  SCANROUTE_MODEL_DIR          Binarization model directory
  SCANROUTE_SCORER_PROGRAM     External quality scorer
"#;

/// Route document scans to Sauvola or model binarization by image quality.
#[derive(Parser, Debug)]
#[command(
    name = "scanroute",
    version,
    about = "Route document scans to Sauvola or model binarization by image quality",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "SCANROUTE_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "SCANROUTE_QUIET")]
    quiet: bool,

    /// Disable progress bars.
    #[arg(long, global = true, env = "SCANROUTE_NO_PROGRESS")]
    no_progress: bool,

    /// Print the full report as JSON on stdout.
    #[arg(long, global = true)]
    json: bool,

    /// Hand-off manifest between `prepare` and `binarize`.
    #[arg(long, global = true, env = "SCANROUTE_MANIFEST", default_value = "model_manifest.json")]
    manifest: PathBuf,

    /// Upload size ceiling in MiB.
    #[arg(long, global = true, env = "SCANROUTE_SIZE_CEILING_MB", default_value_t = 10.0)]
    size_ceiling_mb: f64,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Stage 1: normalize, score, classify, Sauvola-binarize "bad" images and
    /// prepare "good" ones for the model.
    Prepare(PrepareArgs),
    /// Stage 2: binarize the images listed in the manifest with the model.
    Binarize(BinarizeArgs),
}

#[derive(Args, Debug)]
struct PrepareArgs {
    /// Folder of original scans.
    source: PathBuf,

    /// Folder the treated images are written to (mirrors SOURCE).
    destination: PathBuf,

    /// Sauvola k.
    #[arg(short = 'k', long, env = "SCANROUTE_SAUVOLA_K", default_value_t = 0.24)]
    sauvola_k: f64,

    /// Sauvola window size (odd, >= 3).
    #[arg(short = 'w', long, env = "SCANROUTE_SAUVOLA_WINDOW", default_value_t = 11)]
    sauvola_window: u32,

    /// Stretch contrast and apply CLAHE before binarizing.
    #[arg(short, long, env = "SCANROUTE_CONTRAST_ENHANCE")]
    contrast_enhance: bool,

    /// Only score files whose name matches this regex; the rest are
    /// treated as unscored.
    #[arg(short, long, env = "SCANROUTE_REGEX")]
    regex: Option<String>,

    /// Score boundary between "good" and "bad".
    #[arg(short = 't', long, env = "SCANROUTE_THRESHOLD", default_value_t = 0.335)]
    goodbad_threshold: f64,

    /// Quality metric. `laplacian-sharpness` runs in-process; anything else
    /// needs --scorer-program.
    #[arg(long, env = "SCANROUTE_METRIC", default_value = SharpnessBackend::NAME)]
    metric: String,

    /// External scorer printing one score per call.
    #[arg(long, env = "SCANROUTE_SCORER_PROGRAM")]
    scorer_program: Option<PathBuf>,

    /// Scorer argument template ({metric}, {device}, {image}); repeatable.
    #[arg(long = "scorer-arg", allow_hyphen_values = true)]
    scorer_args: Vec<String>,

    /// Compute device for the external scorer: auto, cpu, cuda, mps.
    #[arg(long, env = "SCANROUTE_DEVICE", default_value = "auto")]
    device: Device,

    /// Treat lower scores as better (overrides the metric catalogue).
    #[arg(long, conflicts_with = "higher_better")]
    lower_better: bool,

    /// Treat higher scores as better (overrides the metric catalogue).
    #[arg(long)]
    higher_better: bool,

    /// Treatment for "good" images.
    #[arg(long, value_enum, default_value = "model")]
    good_treatment: TreatmentArg,

    /// Treatment for "bad" images.
    #[arg(long, value_enum, default_value = "sauvola")]
    bad_treatment: TreatmentArg,

    /// Score store location (default: SOURCE/image_scores.jsonl).
    #[arg(long, env = "SCANROUTE_STORE")]
    store: Option<PathBuf>,

    /// Per-image scoring timeout in seconds.
    #[arg(long, env = "SCANROUTE_SCORE_TIMEOUT", default_value_t = 300)]
    score_timeout: u64,
}

#[derive(Args, Debug)]
struct BinarizeArgs {
    /// Directory holding the binarization model.
    #[arg(long, env = "SCANROUTE_MODEL_DIR")]
    model_dir: PathBuf,

    /// Binarization program.
    #[arg(long, env = "SCANROUTE_BINARIZER_PROGRAM", default_value = "sbb_binarize")]
    binarizer_program: PathBuf,

    /// Binarizer argument template ({model}, {input}, {output}); repeatable.
    #[arg(long = "binarizer-arg", allow_hyphen_values = true)]
    binarizer_args: Vec<String>,

    /// Per-image model timeout in seconds.
    #[arg(long, env = "SCANROUTE_MODEL_TIMEOUT", default_value_t = 900)]
    model_timeout: u64,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum TreatmentArg {
    Sauvola,
    Model,
}

impl From<TreatmentArg> for Treatment {
    fn from(v: TreatmentArg) -> Self {
        match v {
            TreatmentArg::Sauvola => Treatment::Algorithmic,
            TreatmentArg::Model => Treatment::ModelBased,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // Suppress INFO-level library logs when progress bars are active.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "warn"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let progress: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as ProgressCallback)
    } else {
        None
    };

    let mut builder = PipelineConfig::builder()
        .manifest_path(&cli.manifest)
        .size_ceiling_bytes(mib_to_bytes(cli.size_ceiling_mb)?);
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    match &cli.command {
        Command::Prepare(args) => run_prepare(&cli, args, builder).await,
        Command::Binarize(args) => run_binarize(&cli, args, builder).await,
    }
}

async fn run_prepare(cli: &Cli, args: &PrepareArgs, builder: PipelineConfigBuilder) -> Result<()> {
    let polarity = if args.lower_better {
        Some(true)
    } else if args.higher_better {
        Some(false)
    } else {
        None
    };

    let mut builder = builder
        .source_dir(&args.source)
        .dest_dir(&args.destination)
        .sauvola_k(args.sauvola_k)
        .sauvola_window_size(args.sauvola_window)
        .contrast_enhance(args.contrast_enhance)
        .threshold(args.goodbad_threshold)
        .good_treatment(args.good_treatment.into())
        .bad_treatment(args.bad_treatment.into())
        .score_timeout_secs(args.score_timeout);
    if let Some(ref re) = args.regex {
        builder = builder.name_filter(re);
    }
    if let Some(ref store) = args.store {
        builder = builder.score_store_path(store);
    }
    if let Some(lower) = polarity {
        builder = builder.lower_better(lower);
    }
    let config = builder.build().context("Invalid configuration")?;

    let backend: Arc<dyn QualityBackend> = match (&args.scorer_program, args.metric.as_str()) {
        (None, SharpnessBackend::NAME) => Arc::new(SharpnessBackend::default()),
        (None, other) => anyhow::bail!(
            "Metric '{other}' needs an external scorer: pass --scorer-program"
        ),
        (Some(program), metric) => {
            let mut b = CommandBackend::new(program, metric, args.device, polarity)
                .context("Invalid scorer configuration")?
                .with_timeout(config.score_timeout());
            if !args.scorer_args.is_empty() {
                b = b.with_args(args.scorer_args.clone());
            }
            Arc::new(b)
        }
    };

    let output = prepare(&config, backend).await.context("Prepare failed")?;

    if cli.json {
        let json = serde_json::to_string_pretty(&output).context("Failed to serialise output")?;
        println!("{json}");
        return Ok(());
    }
    if cli.quiet {
        return Ok(());
    }

    let model_count = output
        .routes
        .values()
        .filter(|t| **t == Treatment::ModelBased)
        .count();
    eprintln!(
        "{}  {} normalized, {} scored ({} unscored), {} → Sauvola, {} → model  {}ms",
        green("✔"),
        output.normalize.succeeded(),
        output.scoring.scored(),
        output.scoring.failed() + output.scoring.filtered.len(),
        output.routes.len() - model_count,
        model_count,
        output.total_duration_ms,
    );
    print_failures(&output.normalize);
    print_failures(&output.algorithmic);
    print_failures(&output.model_prepare);
    print_over_ceiling(&output.algorithmic);
    eprintln!(
        "   manifest: {}  {}",
        bold(&output.manifest_path.display().to_string()),
        dim("(run `scanroute binarize` next)")
    );
    Ok(())
}

async fn run_binarize(cli: &Cli, args: &BinarizeArgs, builder: PipelineConfigBuilder) -> Result<()> {
    let config = builder
        .model_timeout_secs(args.model_timeout)
        .build()
        .context("Invalid configuration")?;

    let mut binarizer =
        CommandBinarizer::new(&args.binarizer_program, &args.model_dir, config.model_timeout())
            .context("Cannot set up the binarization model")?;
    if !args.binarizer_args.is_empty() {
        binarizer = binarizer.with_args(args.binarizer_args.clone());
    }

    let output = binarize(&config, Arc::new(binarizer))
        .await
        .context("Binarize failed")?;

    if cli.json {
        let json = serde_json::to_string_pretty(&output).context("Failed to serialise output")?;
        println!("{json}");
        return Ok(());
    }
    if cli.quiet {
        return Ok(());
    }

    let report = &output.report;
    eprintln!(
        "{}  {}/{} image(s) binarized  {}ms",
        if report.failed() == 0 { green("✔") } else { yellow("⚠") },
        report.succeeded(),
        report.results.len(),
        output.total_duration_ms,
    );
    print_failures(report);
    print_over_ceiling(report);
    Ok(())
}

fn print_failures(report: &BatchReport) {
    for error in report.errors() {
        eprintln!("   {} {}", red("✗"), error);
    }
}

fn print_over_ceiling(report: &BatchReport) {
    for result in report.over_ceiling() {
        if let Some(c) = result.compression {
            eprintln!(
                "   {} {} still {} bytes after compression",
                yellow("⚠"),
                result.final_path().display(),
                c.final_bytes
            );
        }
    }
}

fn mib_to_bytes(mib: f64) -> Result<u64> {
    if !mib.is_finite() || mib <= 0.0 {
        anyhow::bail!("Size ceiling must be a positive number of MiB (got {mib})");
    }
    Ok((mib * 1024.0 * 1024.0) as u64)
}
