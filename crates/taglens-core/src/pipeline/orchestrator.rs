//! Run orchestration.
//!
//! ```text
//! locator (blocking thread) -> bounded channel
//!   -> prepare: fingerprint, skip check, decode/extract, preprocess
//!      (parallel_workers, in order)
//!   -> batcher (single consumer)
//!   -> engine (inference_concurrency in flight, isolation on failure)
//!   -> thresholder / aggregator
//!   -> store writer (single task, per-item transactions)
//! ```
//!
//! The consumer only pulls prepared media while fewer than
//! `inference_concurrency` batches are in flight, so a slow engine holds
//! back preprocessing and, through the bounded channel, the locator.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures_util::stream::{self, FuturesOrdered, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::config::{Config, RunConfig};
use crate::error::{ConfigError, PipelineError, StoreError, TaglensError};
use crate::inference::{BatchOutcome, BatchRunner, InferenceEngine, OnnxEngine};
use crate::retry::{backoff_duration, is_retryable};
use crate::store::TagStore;
use crate::tagging::{Aggregator, LabelVocabulary, Thresholder};
use crate::types::{
    Fingerprint, FrameUnit, ItemOutcome, MediaDescriptor, MediaKind, Origin, PreparedTensor,
    RunSummary, Tag,
};

use super::batcher::{Batch, Batcher};
use super::decode::ImageDecoder;
use super::discovery::{Candidate, MediaLocator};
use super::frames::{prepare_all, MediaFrames};
use super::preprocess::Preprocessor;
use super::progress::{Progress, ProgressReporter};
use super::video::{FfmpegDecoder, FrameExtractor, VideoDecoder};

/// Outcome of preparing one media item.
enum Prepared {
    Skipped(ItemOutcome),
    Ready {
        media: Arc<MediaDescriptor>,
        tensors: Vec<PreparedTensor>,
    },
}

/// A media item whose frames are somewhere between the batcher and the engine.
struct PendingMedia {
    media: Arc<MediaDescriptor>,
    remaining: usize,
    frames: Vec<(u32, Vec<Tag>)>,
    failure: Option<String>,
}

struct CommitJob {
    media: Arc<MediaDescriptor>,
    tags: Vec<Tag>,
}

#[derive(Default)]
struct WriterReport {
    tagged: usize,
    failures: Vec<ItemOutcome>,
    fatal: Option<StoreError>,
}

/// Tags media under a run's roots and records the results.
pub struct Tagger {
    config: Arc<RunConfig>,
    engine: Arc<dyn InferenceEngine>,
    decoder: Arc<dyn VideoDecoder>,
    vocabulary: Arc<LabelVocabulary>,
    store: Arc<TagStore>,
    progress: ProgressReporter,
}

impl Tagger {
    pub fn new(
        config: Arc<RunConfig>,
        engine: Arc<dyn InferenceEngine>,
        decoder: Arc<dyn VideoDecoder>,
        vocabulary: Arc<LabelVocabulary>,
        store: Arc<TagStore>,
    ) -> Self {
        Self {
            config,
            engine,
            decoder,
            vocabulary,
            store,
            progress: ProgressReporter::new(),
        }
    }

    /// Build a tagger with the ONNX engine, the ffmpeg decoder and the
    /// configured store and label file.
    pub fn load(config: &Config, run: RunConfig) -> Result<Self, TaglensError> {
        let vocabulary = LabelVocabulary::load(
            &config.labels_path(),
            config.tagging.normalize_labels,
            &config.tagging.exclude_categories,
        )?;

        tracing::info!("Loading model {} from {:?}", run.model_identity, config.model_path());
        let engine = OnnxEngine::load(
            &config.model_path(),
            run.model_identity.clone(),
            run.profile.shape(),
            config.model.execution_provider,
            config.model.device_id,
        )?;
        let store = TagStore::open(&config.store_path())?;

        Ok(Self::new(
            Arc::new(run),
            Arc::new(engine),
            Arc::new(FfmpegDecoder::new()),
            Arc::new(vocabulary),
            Arc::new(store),
        ))
    }

    /// Progress of the current or last run.
    pub fn subscribe(&self) -> watch::Receiver<Progress> {
        self.progress.subscribe()
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn store(&self) -> &TagStore {
        &self.store
    }

    /// Run to completion or until `cancel` fires.
    ///
    /// Per-file problems end up in the summary. Only a configuration error,
    /// `max_failed_batches` consecutive batches failing in every unit, or as
    /// many consecutive store commit failures end the run with an error.
    pub async fn run(&self, cancel: CancellationToken) -> Result<RunSummary, TaglensError> {
        let config = Arc::clone(&self.config);
        config.validate()?;
        if self.engine.model_identity() != config.model_identity {
            return Err(ConfigError::ValidationError(format!(
                "engine model {:?} does not match run model {:?}",
                self.engine.model_identity(),
                config.model_identity
            ))
            .into());
        }

        let start = Instant::now();
        self.progress.reset();
        tracing::info!(
            "Tagging {} root(s) with {} (threshold {}, batch size {})",
            config.roots.len(),
            config.model_identity,
            config.threshold,
            config.batch_size
        );

        // Locator on a blocking thread, feeding a bounded channel. It only
        // classifies; fingerprinting happens in the prepare stage.
        let (located_tx, located_rx) =
            mpsc::channel::<Result<Candidate, ItemOutcome>>(config.buffer_size);
        let locator = MediaLocator::new(Arc::clone(&config));
        let walk_cancel = cancel.clone();
        let walker = tokio::task::spawn_blocking(move || {
            for item in locator.walk().candidates() {
                if walk_cancel.is_cancelled() || located_tx.blocking_send(item).is_err() {
                    break;
                }
            }
        });

        let ctx = Arc::new(PrepareContext::new(
            Arc::clone(&config),
            Arc::clone(&self.store),
            Arc::clone(&self.decoder),
        ));
        let progress = self.progress.clone();
        let prepared = stream::unfold(located_rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        })
        .map(move |item| {
            progress.update(|p| p.discovered += 1);
            let ctx = Arc::clone(&ctx);
            async move {
                match item {
                    Ok(candidate) => ctx.prepare(candidate).await,
                    Err(skip) => Prepared::Skipped(skip),
                }
            }
        })
        .buffered(config.parallel_workers);
        let mut prepared = Box::pin(prepared);

        let (commit_tx, commit_rx) = mpsc::channel::<CommitJob>(config.buffer_size);
        let writer = tokio::spawn(store_writer(
            Arc::clone(&self.store),
            Arc::clone(&config),
            commit_rx,
            self.progress.clone(),
        ));

        let runner = BatchRunner::new(
            Arc::clone(&self.engine),
            config.limits.inference_timeout_ms,
            self.vocabulary.len(),
            config.inference_concurrency,
        );
        let thresholder = Thresholder::new(Arc::clone(&self.vocabulary), config.threshold);
        let mut batcher = Batcher::new(config.batch_size, config.profile.shape());
        let mut in_flight = FuturesOrdered::new();
        let mut pending: HashMap<Fingerprint, PendingMedia> = HashMap::new();
        let mut seen: HashSet<Fingerprint> = HashSet::new();
        let mut summary = RunSummary::default();
        let mut consecutive_failed = 0usize;
        let mut input_done = false;
        let mut cancelled = false;
        let mut abort: Option<TaglensError> = None;

        loop {
            let can_pull = !input_done && !cancelled && in_flight.len() < runner.concurrency();
            if !can_pull && in_flight.is_empty() {
                break;
            }

            tokio::select! {
                biased;

                _ = cancel.cancelled(), if !cancelled => {
                    tracing::info!(
                        "Cancellation requested, draining {} in-flight batch(es)",
                        in_flight.len()
                    );
                    cancelled = true;
                }

                Some(outcome) = in_flight.next(), if !in_flight.is_empty() => {
                    let outcome: BatchOutcome = outcome;
                    summary.batches += outcome.calls;
                    self.progress.update(|p| p.batches += outcome.calls);

                    if outcome.all_failed() {
                        consecutive_failed += 1;
                        if consecutive_failed >= config.max_failed_batches {
                            if let Some((_, e)) = outcome.failed.last() {
                                tracing::error!(
                                    "{} consecutive batches failed entirely, aborting run",
                                    consecutive_failed
                                );
                                abort = Some(e.clone().into());
                            }
                        }
                    } else {
                        consecutive_failed = 0;
                    }

                    let mut finished = Vec::new();
                    for (origin, scores) in &outcome.scored {
                        let result = thresholder.apply(scores).map_err(|e| e.to_string());
                        finished.extend(resolve_unit(&mut pending, origin, result));
                    }
                    for (origin, e) in &outcome.failed {
                        finished.extend(resolve_unit(&mut pending, origin, Err(e.to_string())));
                    }

                    if !self.finalize(finished, &commit_tx, &mut summary).await {
                        tracing::error!("Store writer stopped, aborting run");
                        break;
                    }
                    if abort.is_some() {
                        break;
                    }
                }

                item = prepared.next(), if can_pull => {
                    match item {
                        Some(Prepared::Skipped(skip)) => self.record_skip(skip, &mut summary),
                        // Identical content under two paths is tagged once per run.
                        Some(Prepared::Ready { media, .. }) if seen.contains(&media.fingerprint) => {
                            let skip = ItemOutcome::new(
                                &media.path,
                                "duplicate of an earlier file in this run",
                            );
                            self.record_skip(skip, &mut summary);
                        }
                        Some(Prepared::Ready { media, tensors }) => {
                            seen.insert(media.fingerprint.clone());
                            tracing::debug!("Prepared {:?} ({} frame(s))", media.path, tensors.len());
                            let mut entry = PendingMedia {
                                media: Arc::clone(&media),
                                remaining: tensors.len(),
                                frames: Vec::with_capacity(tensors.len()),
                                failure: None,
                            };
                            let mut batches = Vec::new();
                            for tensor in tensors {
                                match batcher.push(tensor) {
                                    Ok(Some(batch)) => batches.push(batch),
                                    Ok(None) => {}
                                    Err(e) => {
                                        tracing::warn!("Excluded unit: {}", e);
                                        entry.failure.get_or_insert_with(|| e.to_string());
                                        entry.remaining -= 1;
                                    }
                                }
                            }

                            if entry.remaining == 0 {
                                if !self.finalize(vec![entry], &commit_tx, &mut summary).await {
                                    break;
                                }
                            } else {
                                pending.insert(media.fingerprint.clone(), entry);
                            }
                            for batch in batches {
                                in_flight.push_back(dispatch(&runner, batch));
                            }
                        }
                        None => {
                            input_done = true;
                            if let Some(batch) = batcher.finish() {
                                in_flight.push_back(dispatch(&runner, batch));
                            }
                        }
                    }
                }
            }
        }

        if !pending.is_empty() || batcher.pending() > 0 {
            tracing::warn!(
                "{} media item(s) were in flight and not committed",
                pending.len()
            );
        }

        drop(in_flight);
        drop(prepared);
        drop(commit_tx);
        if let Err(e) = walker.await {
            tracing::warn!("Locator task ended abnormally: {}", e);
        }
        let report = match writer.await {
            Ok(report) => report,
            Err(e) => {
                tracing::error!("Store writer task failed: {}", e);
                WriterReport::default()
            }
        };

        summary.tagged = report.tagged;
        summary.failed += report.failures.len();
        summary.failures.extend(report.failures);
        summary.total_seconds = start.elapsed().as_secs_f64();
        summary.cancelled = cancelled;
        self.progress.update(|p| p.done = true);

        if let Some(e) = report.fatal {
            return Err(e.into());
        }
        if let Some(e) = abort {
            return Err(e);
        }

        tracing::info!(
            "Run finished: {} tagged, {} skipped, {} failed in {:.1}s{}",
            summary.tagged,
            summary.skipped,
            summary.failed,
            summary.total_seconds,
            if summary.cancelled { " (cancelled)" } else { "" }
        );
        Ok(summary)
    }

    fn record_skip(&self, skip: ItemOutcome, summary: &mut RunSummary) {
        tracing::warn!("Skipped {:?}: {}", skip.path, skip.reason);
        self.progress.update(|p| p.skipped += 1);
        summary.skipped += 1;
        summary.skips.push(skip);
    }

    /// Record failures or queue commits for media whose frames are all
    /// resolved. Returns false once the store writer has stopped.
    async fn finalize(
        &self,
        finished: Vec<PendingMedia>,
        commit_tx: &mpsc::Sender<CommitJob>,
        summary: &mut RunSummary,
    ) -> bool {
        for mut item in finished {
            if let Some(reason) = item.failure {
                tracing::error!("Failed {:?}: {}", item.media.path, reason);
                self.progress.update(|p| p.failed += 1);
                summary.failed += 1;
                summary.failures.push(ItemOutcome::new(&item.media.path, reason));
                continue;
            }

            item.frames.sort_by_key(|(index, _)| *index);
            let frames: Vec<Vec<Tag>> = item.frames.into_iter().map(|(_, tags)| tags).collect();
            let tags = Aggregator::aggregate(self.config.aggregation, &frames);
            let job = CommitJob {
                media: item.media,
                tags,
            };
            if commit_tx.send(job).await.is_err() {
                return false;
            }
        }
        true
    }
}

fn dispatch(runner: &BatchRunner, batch: Batch) -> impl std::future::Future<Output = BatchOutcome> + '_ {
    tracing::trace!("Dispatching batch {} ({} units)", batch.id, batch.len());
    runner.run(batch)
}

/// Attribute one unit's result to its media item. Returns the item once all
/// of its units are resolved.
fn resolve_unit(
    pending: &mut HashMap<Fingerprint, PendingMedia>,
    origin: &Origin,
    result: Result<Vec<Tag>, String>,
) -> Option<PendingMedia> {
    let entry = pending.get_mut(origin.fingerprint())?;
    match result {
        Ok(tags) => entry.frames.push((origin.frame_index, tags)),
        Err(reason) => {
            entry.failure.get_or_insert(reason);
        }
    }
    entry.remaining = entry.remaining.saturating_sub(1);
    if entry.remaining == 0 {
        pending.remove(origin.fingerprint())
    } else {
        None
    }
}

/// Everything the concurrent prepare stage needs.
struct PrepareContext {
    config: Arc<RunConfig>,
    store: Arc<TagStore>,
    images: ImageDecoder,
    extractor: FrameExtractor,
    preprocessor: Preprocessor,
}

impl PrepareContext {
    fn new(config: Arc<RunConfig>, store: Arc<TagStore>, decoder: Arc<dyn VideoDecoder>) -> Self {
        Self {
            images: ImageDecoder::new(config.limits.clone()),
            extractor: FrameExtractor::new(
                decoder,
                config.sampling.clone(),
                config.min_video_span_secs,
                config.limits.clone(),
            ),
            preprocessor: Preprocessor::new(config.profile.clone()),
            config,
            store,
        }
    }

    async fn prepare(&self, candidate: Candidate) -> Prepared {
        let media = match self.describe(candidate).await {
            Ok(media) => Arc::new(media),
            Err(skip) => return Prepared::Skipped(skip),
        };
        match self.try_prepare(&media).await {
            Ok(Some(tensors)) => Prepared::Ready { media, tensors },
            Ok(None) => Prepared::Skipped(ItemOutcome::new(&media.path, "already tagged")),
            Err(reason) => Prepared::Skipped(ItemOutcome::new(&media.path, reason)),
        }
    }

    /// Fingerprint on the blocking pool.
    async fn describe(&self, candidate: Candidate) -> Result<MediaDescriptor, ItemOutcome> {
        let mode = self.config.fingerprint;
        let path = candidate.path.clone();
        tokio::task::spawn_blocking(move || candidate.describe(mode))
            .await
            .unwrap_or_else(|e| Err(ItemOutcome::new(path, format!("fingerprint task failed: {e}"))))
    }

    /// Whether a committed result exists. Store read errors count as "not tagged".
    async fn already_tagged(&self, media: &MediaDescriptor) -> bool {
        if self.config.force_retag {
            return false;
        }
        let store = Arc::clone(&self.store);
        let fingerprint = media.fingerprint.clone();
        let model = self.config.model_identity.clone();
        match tokio::task::spawn_blocking(move || store.has_result(&fingerprint, &model)).await {
            Ok(Ok(found)) => found,
            Ok(Err(e)) => {
                tracing::warn!("Skip check failed for {:?}: {}", media.path, e);
                false
            }
            Err(e) => {
                tracing::warn!("Skip check task failed for {:?}: {}", media.path, e);
                false
            }
        }
    }

    async fn try_prepare(
        &self,
        media: &Arc<MediaDescriptor>,
    ) -> Result<Option<Vec<PreparedTensor>>, String> {
        if self.already_tagged(media).await {
            tracing::debug!("Already tagged: {:?}", media.path);
            return Ok(None);
        }

        let frames = match media.kind {
            MediaKind::Image => {
                let decoded = self
                    .images
                    .decode(&media.path)
                    .await
                    .map_err(|e| e.to_string())?;
                MediaFrames::image(FrameUnit {
                    media: Arc::clone(media),
                    frame_index: 0,
                    timestamp_secs: None,
                    image: decoded.image,
                })
                .collect_frames()
                .await
            }
            MediaKind::Video => {
                // Dropping the extraction on timeout kills any running decoder child.
                let timeout_ms = self.config.limits.video_timeout_ms;
                let extract = async {
                    let sequence = self.extractor.open(Arc::clone(media)).await?;
                    Ok::<_, PipelineError>(MediaFrames::Video(sequence).collect_frames().await)
                };
                match timeout(Duration::from_millis(timeout_ms), extract).await {
                    Ok(Ok(frames)) => frames,
                    Ok(Err(e)) => return Err(e.to_string()),
                    Err(_) => {
                        return Err(PipelineError::Timeout {
                            path: media.path.clone(),
                            stage: "video".to_string(),
                            timeout_ms,
                        }
                        .to_string())
                    }
                }
            }
        };

        let preprocessor = self.preprocessor.clone();
        let (tensors, rejected) =
            tokio::task::spawn_blocking(move || prepare_all(frames, &preprocessor))
                .await
                .map_err(|e| format!("preprocess task failed: {e}"))?;

        for e in &rejected {
            tracing::warn!("Excluded frame: {}", e);
        }
        if tensors.is_empty() {
            return Err(rejected
                .first()
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no decodable frames".to_string()));
        }
        Ok(Some(tensors))
    }
}

/// Single writer: commits each media item in its own transaction, with
/// retries. Stops after `max_failed_batches` consecutive failed commits.
async fn store_writer(
    store: Arc<TagStore>,
    config: Arc<RunConfig>,
    mut rx: mpsc::Receiver<CommitJob>,
    progress: ProgressReporter,
) -> WriterReport {
    let mut report = WriterReport::default();
    let mut consecutive = 0usize;

    while let Some(job) = rx.recv().await {
        match commit_with_retry(&store, &config, &job).await {
            Ok(()) => {
                tracing::debug!("Tagged {:?} ({} tags)", job.media.path, job.tags.len());
                consecutive = 0;
                report.tagged += 1;
                progress.update(|p| p.tagged += 1);
            }
            Err(e) => {
                tracing::error!("Failed to commit {:?}: {}", job.media.path, e);
                progress.update(|p| p.failed += 1);
                report.failures.push(ItemOutcome::new(
                    &job.media.path,
                    format!("store commit failed: {e}"),
                ));
                consecutive += 1;
                if consecutive >= config.max_failed_batches {
                    report.fatal = Some(e);
                    break;
                }
            }
        }
    }
    report
}

async fn commit_with_retry(
    store: &Arc<TagStore>,
    config: &RunConfig,
    job: &CommitJob,
) -> Result<(), StoreError> {
    let attempts = config.store_retry_attempts.max(1);
    let mut attempt = 0;
    loop {
        let store = Arc::clone(store);
        let media = Arc::clone(&job.media);
        let tags = job.tags.clone();
        let model = config.model_identity.clone();
        let result = tokio::task::spawn_blocking(move || {
            store.upsert(&media, &model, &tags, Utc::now())
        })
        .await
        // A panic inside upsert poisons the writer lock.
        .unwrap_or(Err(StoreError::Poisoned));

        match result {
            Ok(()) => return Ok(()),
            Err(e) if attempt + 1 < attempts && is_retryable(&e) => {
                let delay = backoff_duration(attempt, config.retry_delay_ms);
                tracing::warn!(
                    "Commit of {:?} failed (attempt {}/{}), retrying in {:?}: {}",
                    job.media.path,
                    attempt + 1,
                    attempts,
                    delay,
                    e
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
