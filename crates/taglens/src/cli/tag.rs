//! The `taglens tag` command.

use std::path::PathBuf;

use clap::{Args, ValueEnum};
use taglens_core::inference::ExecutionProvider;
use taglens_core::output::to_json;
use taglens_core::pipeline::video::SamplingPolicy;
use taglens_core::pipeline::Progress;
use taglens_core::tagging::AggregationPolicy;
use taglens_core::{Config, RunConfig, RunSummary, Tagger};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Failures listed individually before the rest are summarized.
const MAX_LISTED_FAILURES: usize = 20;

/// Arguments for the `tag` command.
#[derive(Args, Debug)]
pub struct TagArgs {
    /// Directories or files to tag
    #[arg(required = true)]
    pub inputs: Vec<PathBuf>,

    /// Minimum score for a label to be kept (0.0 - 1.0)
    #[arg(short, long)]
    pub threshold: Option<f32>,

    /// Frames per inference call
    #[arg(short, long)]
    pub batch_size: Option<usize>,

    /// Number of parallel decode/preprocess workers
    #[arg(short, long)]
    pub parallel: Option<usize>,

    /// Re-tag media that already has results for this model
    #[arg(long)]
    pub force: bool,

    /// Model identity (selects the preprocessing preset and is stored with every tag)
    #[arg(long)]
    pub model: Option<String>,

    /// ONNX model file
    #[arg(long)]
    pub model_path: Option<PathBuf>,

    /// Label file (selected_tags.csv or one label per line)
    #[arg(long)]
    pub labels: Option<PathBuf>,

    /// ONNX Runtime execution provider
    #[arg(long, value_enum)]
    pub provider: Option<Provider>,

    /// Result store file
    #[arg(long)]
    pub store: Option<PathBuf>,

    /// Sample this many frames per video
    #[arg(long, conflicts_with = "every")]
    pub frames: Option<u32>,

    /// Sample one frame every N seconds instead (capped by --max-frames)
    #[arg(long)]
    pub every: Option<f64>,

    /// Frame cap for --every
    #[arg(long, default_value = "32", requires = "every")]
    pub max_frames: u32,

    /// How per-frame tags merge into one tag set per video
    #[arg(long, value_enum)]
    pub aggregation: Option<Aggregation>,

    /// Print the run summary as JSON on stdout
    #[arg(long)]
    pub summary_json: bool,

    /// Disable the progress bar
    #[arg(long)]
    pub no_progress: bool,
}

/// Aggregation policies selectable from the command line.
#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum Aggregation {
    /// Highest score of each label across frames
    Max,
    /// Highest score scaled by how many frames showed the label
    Frequency,
}

impl From<Aggregation> for AggregationPolicy {
    fn from(value: Aggregation) -> Self {
        match value {
            Aggregation::Max => AggregationPolicy::MaxPool,
            Aggregation::Frequency => AggregationPolicy::FrequencyWeighted,
        }
    }
}

/// Execution providers selectable from the command line.
#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum Provider {
    Cpu,
    Cuda,
    Tensorrt,
    Coreml,
}

impl From<Provider> for ExecutionProvider {
    fn from(value: Provider) -> Self {
        match value {
            Provider::Cpu => ExecutionProvider::Cpu,
            Provider::Cuda => ExecutionProvider::Cuda,
            Provider::Tensorrt => ExecutionProvider::Tensorrt,
            Provider::Coreml => ExecutionProvider::Coreml,
        }
    }
}

/// Execute the tag command.
pub async fn execute(args: TagArgs, mut config: Config) -> anyhow::Result<()> {
    apply_overrides(&mut config, &args);
    config.validate()?;
    let run = RunConfig::from_config(&config, args.inputs.clone(), args.force)?;

    tracing::info!(
        "Model {} ({:?}), store {:?}",
        run.model_identity,
        config.model_path(),
        config.store_path()
    );
    let tagger = tokio::task::spawn_blocking(move || Tagger::load(&config, run)).await??;

    let cancel = CancellationToken::new();
    let interrupt = spawn_interrupt_handler(cancel.clone());
    let progress = (!args.no_progress).then(|| spawn_progress(tagger.subscribe()));

    let result = tagger.run(cancel).await;

    interrupt.abort();
    // Dropping the tagger closes the progress channel.
    drop(tagger);
    if let Some(handle) = progress {
        let _ = handle.await;
    }

    let summary = result?;
    print_summary(&summary);
    if args.summary_json {
        println!("{}", to_json(&summary, true)?);
    }
    Ok(())
}

fn apply_overrides(config: &mut Config, args: &TagArgs) {
    if let Some(threshold) = args.threshold {
        config.tagging.threshold = threshold;
    }
    if let Some(batch_size) = args.batch_size {
        config.tagging.batch_size = batch_size;
    }
    if let Some(parallel) = args.parallel {
        config.processing.parallel_workers = parallel;
    }
    if let Some(model) = &args.model {
        config.model.identity = model.clone();
    }
    if let Some(path) = &args.model_path {
        config.model.path = Some(path.clone());
    }
    if let Some(path) = &args.labels {
        config.model.labels = Some(path.clone());
    }
    if let Some(provider) = args.provider {
        config.model.execution_provider = provider.into();
    }
    if let Some(path) = &args.store {
        config.general.store_path = path.clone();
    }
    if let Some(frames) = args.frames {
        config.tagging.sampling = SamplingPolicy::FixedCount { frames };
    }
    if let Some(seconds) = args.every {
        config.tagging.sampling = SamplingPolicy::Stride {
            seconds,
            max_frames: args.max_frames,
        };
    }
    if let Some(aggregation) = args.aggregation {
        config.tagging.aggregation = aggregation.into();
    }
}

/// First Ctrl-C cancels the run gracefully; a second one exits immediately.
fn spawn_interrupt_handler(cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        tracing::warn!("Interrupted, finishing in-flight batches (Ctrl-C again to abort)");
        cancel.cancel();
        if tokio::signal::ctrl_c().await.is_ok() {
            std::process::exit(130);
        }
    })
}

/// Render progress until the run reports done or the channel closes.
fn spawn_progress(mut rx: watch::Receiver<Progress>) -> JoinHandle<()> {
    let pb = create_progress_bar();
    tokio::spawn(async move {
        while rx.changed().await.is_ok() {
            let p = rx.borrow_and_update().clone();
            pb.set_length(p.discovered as u64);
            pb.set_position(p.processed() as u64);
            pb.set_message(format!(
                "{} tagged, {} skipped, {} failed, {} batches",
                p.tagged, p.skipped, p.failed, p.batches
            ));
            if p.done {
                break;
            }
        }
        pb.finish_and_clear();
    })
}

fn create_progress_bar() -> indicatif::ProgressBar {
    use indicatif::{ProgressBar, ProgressStyle};

    let pb = ProgressBar::new(0);
    if let Ok(style) = ProgressStyle::default_bar().template(
        "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}",
    ) {
        pb.set_style(style.progress_chars("##-"));
    }
    pb.set_message("discovering...");
    pb
}

/// Print a formatted summary table after a run.
fn print_summary(summary: &RunSummary) {
    eprintln!();
    eprintln!("  ====================================");
    if summary.cancelled {
        eprintln!("          Summary (cancelled)");
    } else {
        eprintln!("               Summary");
    }
    eprintln!("  ====================================");
    eprintln!("    Tagged:       {:>8}", summary.tagged);
    if summary.skipped > 0 {
        eprintln!("    Skipped:      {:>8}", summary.skipped);
    }
    if summary.failed > 0 {
        eprintln!("    Failed:       {:>8}", summary.failed);
    }
    eprintln!("  ------------------------------------");
    eprintln!("    Batches:      {:>8}", summary.batches);
    eprintln!("    Duration:     {:>7.1}s", summary.total_seconds);
    eprintln!("    Rate:         {:>7.1} items/sec", summary.items_per_second());
    eprintln!("  ====================================");

    if !summary.failures.is_empty() {
        eprintln!();
        eprintln!("  Failed:");
        for failure in summary.failures.iter().take(MAX_LISTED_FAILURES) {
            eprintln!("    {}: {}", failure.path.display(), failure.reason);
        }
        if summary.failures.len() > MAX_LISTED_FAILURES {
            eprintln!(
                "    ... and {} more",
                summary.failures.len() - MAX_LISTED_FAILURES
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        args: TagArgs,
    }

    fn parse(argv: &[&str]) -> TagArgs {
        Harness::try_parse_from(std::iter::once("taglens").chain(argv.iter().copied()))
            .unwrap()
            .args
    }

    #[test]
    fn test_overrides_apply_to_config() {
        let args = parse(&["./media", "-t", "0.6", "-b", "4", "--frames", "3", "--aggregation", "frequency"]);
        let mut config = Config::default();
        apply_overrides(&mut config, &args);
        assert_eq!(config.tagging.threshold, 0.6);
        assert_eq!(config.tagging.batch_size, 4);
        assert_eq!(config.tagging.sampling, SamplingPolicy::FixedCount { frames: 3 });
        assert_eq!(config.tagging.aggregation, AggregationPolicy::FrequencyWeighted);
    }

    #[test]
    fn test_stride_sampling_from_every() {
        let args = parse(&["./media", "--every", "3", "--max-frames", "10"]);
        let mut config = Config::default();
        apply_overrides(&mut config, &args);
        assert_eq!(
            config.tagging.sampling,
            SamplingPolicy::Stride {
                seconds: 3.0,
                max_frames: 10
            }
        );
    }

    #[test]
    fn test_provider_override() {
        let args = parse(&["./media", "--provider", "coreml"]);
        let mut config = Config::default();
        apply_overrides(&mut config, &args);
        assert_eq!(config.model.execution_provider, ExecutionProvider::Coreml);
    }

    #[test]
    fn test_frames_and_every_conflict() {
        let result = Harness::try_parse_from(["taglens", "./media", "--frames", "3", "--every", "2"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_requires_an_input() {
        assert!(Harness::try_parse_from(["taglens"]).is_err());
    }
}
