//! The `taglens query` and `taglens stats` commands.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use clap::{Args, ValueEnum};
use taglens_core::output::{to_json, OutputFormat as CoreOutputFormat};
use taglens_core::{Config, Fingerprint, OutputWriter, TagFilter, TagStore, TaglensError};

/// Arguments for the `query` command.
#[derive(Args, Debug)]
pub struct QueryArgs {
    /// Only rows with this label
    #[arg(short, long)]
    pub label: Option<String>,

    /// Only rows scoring at least this much
    #[arg(long)]
    pub min_score: Option<f32>,

    /// Only rows from this model (defaults to every model)
    #[arg(long)]
    pub model: Option<String>,

    /// Only rows for this media fingerprint
    #[arg(long)]
    pub fingerprint: Option<String>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "jsonl")]
    pub format: OutputFormat,

    /// Pretty-print JSON output
    #[arg(long)]
    pub pretty: bool,

    /// Output file (defaults to stdout)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Result store file
    #[arg(long)]
    pub store: Option<PathBuf>,
}

/// Arguments for the `stats` command.
#[derive(Args, Debug)]
pub struct StatsArgs {
    /// Print as JSON
    #[arg(long)]
    pub json: bool,

    /// Result store file
    #[arg(long)]
    pub store: Option<PathBuf>,
}

/// Supported output formats.
#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum OutputFormat {
    Json,
    Jsonl,
    Csv,
}

impl From<OutputFormat> for CoreOutputFormat {
    fn from(value: OutputFormat) -> Self {
        match value {
            OutputFormat::Json => CoreOutputFormat::Json,
            OutputFormat::Jsonl => CoreOutputFormat::JsonLines,
            OutputFormat::Csv => CoreOutputFormat::Csv,
        }
    }
}

impl QueryArgs {
    fn filter(&self) -> TagFilter {
        let mut filter = TagFilter::default();
        if let Some(model) = &self.model {
            filter = filter.model(model.clone());
        }
        if let Some(label) = &self.label {
            filter = filter.label(label.clone());
        }
        if let Some(score) = self.min_score {
            filter = filter.min_score(score);
        }
        if let Some(fingerprint) = &self.fingerprint {
            filter = filter.fingerprint(Fingerprint::new(fingerprint.clone()));
        }
        filter
    }
}

fn store_path(explicit: Option<PathBuf>, config: &Config) -> PathBuf {
    explicit.unwrap_or_else(|| config.store_path())
}

/// Execute the query command.
pub async fn execute(args: QueryArgs, config: Config) -> anyhow::Result<()> {
    if let Some(score) = args.min_score {
        if !(0.0..=1.0).contains(&score) {
            anyhow::bail!("--min-score must be between 0.0 and 1.0, got {score}");
        }
    }
    let path = store_path(args.store.clone(), &config);
    let filter = args.filter();
    tracing::debug!("Querying {:?} with {:?}", path, filter);

    // Paging through SQLite blocks; keep it off the runtime threads.
    let written = tokio::task::spawn_blocking(move || -> anyhow::Result<usize> {
        let store = TagStore::open_read_only(&path)?;
        let rows = store.query(filter)?.map(|row| row.map_err(TaglensError::from));

        let sink: Box<dyn Write> = match &args.output {
            Some(output) => Box::new(BufWriter::new(File::create(output)?)),
            None => Box::new(BufWriter::new(std::io::stdout().lock())),
        };
        let mut writer = OutputWriter::new(sink, args.format.into(), args.pretty);
        let count = writer.write_iter(rows)?;
        writer.finish()?;
        Ok(count)
    })
    .await??;

    tracing::info!("Wrote {} rows", written);
    Ok(())
}

/// Execute the stats command.
pub async fn stats(args: StatsArgs, config: Config) -> anyhow::Result<()> {
    let path = store_path(args.store, &config);
    let stats = tokio::task::spawn_blocking(move || TagStore::open_read_only(&path)?.stats())
        .await??;

    if args.json {
        println!("{}", to_json(&stats, true)?);
        return Ok(());
    }

    if stats.is_empty() {
        eprintln!("No results stored yet.");
        return Ok(());
    }
    println!("{:<40} {:>10} {:>10}", "MODEL", "MEDIA", "TAGS");
    for row in &stats {
        println!("{:<40} {:>10} {:>10}", row.model_identity, row.media, row.tags);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        args: QueryArgs,
    }

    #[test]
    fn test_filter_from_args() {
        let args = Harness::try_parse_from([
            "taglens", "--label", "cat", "--min-score", "0.5", "--model", "wd-vit-tagger-v3",
        ])
        .unwrap()
        .args;
        let filter = args.filter();
        assert_eq!(filter.label.as_deref(), Some("cat"));
        assert_eq!(filter.min_score, Some(0.5));
        assert_eq!(filter.model_identity.as_deref(), Some("wd-vit-tagger-v3"));
        assert!(filter.fingerprint.is_none());
    }

    #[test]
    fn test_default_format_is_jsonl() {
        let args = Harness::try_parse_from(["taglens"]).unwrap().args;
        assert!(matches!(args.format, OutputFormat::Jsonl));
    }
}
