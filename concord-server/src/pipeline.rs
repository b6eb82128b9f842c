//! The per-run processing pipeline.
//!
//! One run flows through fixed stages: persist the submission, extract
//! reference regions from the strokes, collect candidate masks from both
//! proposers, match candidates against references, score cross-model
//! agreement, render artifacts, then append to the run history and refresh
//! the trend chart. Any stage failing marks the job as errored; result
//! artifacts are only written after every model stage succeeded.

use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use concord_core::{
    agreement, match_and_combine, MatchOutcome, Region, RegionMatch, RunLog, RunRecord,
};
use concord_vision::{
    label_proposals, rasterize_strokes, render_cutout, render_overlay, render_trend,
    RegionProposer, Stroke,
};
use image::{ImageOutputFormat, RgbImage};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{error, info};
use uuid::Uuid;

use crate::jobs::JobRegistry;

/// Shared pieces the pipeline needs across runs.
pub struct PipelineContext {
    pub auto: Arc<dyn RegionProposer>,
    pub instance: Arc<dyn RegionProposer>,
    pub history: Arc<RunLog>,
    /// Root data directory; the trend chart lives directly under it.
    pub data_dir: PathBuf,
}

/// Everything captured from one submission.
pub struct RunInput {
    pub job_id: Uuid,
    pub image_bytes: Vec<u8>,
    pub strokes: Vec<Stroke>,
    pub artifact_dir: PathBuf,
}

/// Metric bundle persisted as metrics.json and surfaced by the results
/// endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMetrics {
    pub auto_mean: f32,
    pub instance_mean: f32,
    pub agreement: f32,
    pub reference_regions: usize,
    pub unmatched_references: usize,
    pub auto_matches: Vec<RegionMatch>,
    pub instance_matches: Vec<RegionMatch>,
}

/// Runs the full pipeline for one submission. Blocking; callers move this
/// onto a blocking thread.
pub fn run_pipeline(ctx: &PipelineContext, input: RunInput) -> anyhow::Result<RunMetrics> {
    let job_id = input.job_id;
    std::fs::create_dir_all(&input.artifact_dir)
        .with_context(|| format!("cannot create artifact dir {}", input.artifact_dir.display()))?;

    let image = image::load_from_memory(&input.image_bytes)
        .context("uploaded image could not be decoded")?
        .to_rgb8();
    let (width, height) = image.dimensions();
    info!(%job_id, width, height, strokes = input.strokes.len(), "run started");

    // The raw submission is persisted up front so failed runs stay
    // reproducible. Result artifacts come later, after the models ran.
    let strokes_json =
        serde_json::to_vec_pretty(&input.strokes).context("strokes are not serializable")?;
    write_atomic(&input.artifact_dir.join("strokes.json"), &strokes_json, job_id)?;
    write_atomic(
        &input.artifact_dir.join("input.png"),
        &encode_png(&image)?,
        job_id,
    )?;

    let references = rasterize_strokes(&input.strokes, width, height);
    info!(%job_id, regions = references.len(), "reference regions extracted");

    let auto_outcome = run_proposer(ctx.auto.as_ref(), &image, &references, width, height)?;
    let instance_outcome = run_proposer(ctx.instance.as_ref(), &image, &references, width, height)?;
    let agreement_score = agreement(&auto_outcome, &instance_outcome);

    let metrics = RunMetrics {
        auto_mean: auto_outcome.mean_score,
        instance_mean: instance_outcome.mean_score,
        agreement: agreement_score,
        reference_regions: references.len(),
        unmatched_references: auto_outcome.unmatched_references
            + instance_outcome.unmatched_references,
        auto_matches: auto_outcome.matches.clone(),
        instance_matches: instance_outcome.matches.clone(),
    };
    info!(
        %job_id,
        auto_mean = metrics.auto_mean,
        instance_mean = metrics.instance_mean,
        agreement = metrics.agreement,
        "run scored"
    );

    write_outcome_artifacts(&input.artifact_dir, "auto", &image, &auto_outcome, job_id)?;
    write_outcome_artifacts(
        &input.artifact_dir,
        "instance",
        &image,
        &instance_outcome,
        job_id,
    )?;
    let metrics_json = serde_json::to_vec_pretty(&metrics).context("metrics serialization")?;
    write_atomic(&input.artifact_dir.join("metrics.json"), &metrics_json, job_id)?;

    let record = RunRecord::new(
        job_id,
        metrics.auto_mean,
        metrics.instance_mean,
        metrics.agreement,
        metrics.reference_regions,
        metrics.unmatched_references,
    );
    ctx.history.append(&record).context("history append")?;

    // The trend is always rebuilt from the full log, so a crash between the
    // append and this point costs nothing but one stale chart.
    let trend = ctx.history.recompute_trend().context("trend recompute")?;
    let chart = render_trend(&trend);
    write_atomic(&ctx.data_dir.join("trend.png"), &encode_png(&chart)?, job_id)?;

    info!(%job_id, runs = trend.runs, "run complete");
    Ok(metrics)
}

/// Spawns one run onto the blocking pool and settles the job entry when it
/// finishes. Panics inside the pipeline land as job errors, not poison.
pub fn spawn_run(
    ctx: Arc<PipelineContext>,
    registry: Arc<JobRegistry>,
    input: RunInput,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let job_id = input.job_id;
        let outcome = tokio::task::spawn_blocking(move || run_pipeline(&ctx, input)).await;
        match outcome {
            Ok(Ok(_)) => registry.mark_done(&job_id),
            Ok(Err(err)) => {
                error!(%job_id, error = %err, "run failed");
                registry.mark_error(&job_id, format!("{:#}", err));
            }
            Err(join_err) => {
                error!(%job_id, error = %join_err, "run task aborted");
                registry.mark_error(&job_id, format!("pipeline task aborted: {}", join_err));
            }
        }
    })
}

fn run_proposer(
    proposer: &dyn RegionProposer,
    image: &RgbImage,
    references: &[Region],
    width: u32,
    height: u32,
) -> anyhow::Result<MatchOutcome> {
    let proposals = proposer
        .propose(image)
        .with_context(|| format!("{} proposer failed", proposer.name()))?;
    info!(
        proposer = proposer.name(),
        proposals = proposals.len(),
        "candidates proposed"
    );
    let candidates = label_proposals(proposals);
    Ok(match_and_combine(references, &candidates, width, height))
}

fn write_outcome_artifacts(
    dir: &Path,
    prefix: &str,
    image: &RgbImage,
    outcome: &MatchOutcome,
    job_id: Uuid,
) -> anyhow::Result<()> {
    let overlay = render_overlay(image, &outcome.combined_reference, &outcome.combined_candidates);
    write_atomic(
        &dir.join(format!("{}_overlay.png", prefix)),
        &encode_png(&overlay)?,
        job_id,
    )?;
    let cutout = render_cutout(image, &outcome.combined_candidates);
    write_atomic(
        &dir.join(format!("{}_cutout.png", prefix)),
        &encode_png(&cutout)?,
        job_id,
    )?;
    Ok(())
}

fn encode_png(image: &RgbImage) -> anyhow::Result<Vec<u8>> {
    let mut bytes = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut bytes), ImageOutputFormat::Png)
        .context("png encoding")?;
    Ok(bytes)
}

/// Writes through a job-scoped temp file and rename, so a concurrent reader
/// or a second run refreshing the shared trend chart never sees a partial
/// file.
fn write_atomic(path: &Path, bytes: &[u8], job_id: Uuid) -> anyhow::Result<()> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "artifact".to_string());
    let tmp = path.with_file_name(format!(".{}.{}.tmp", name, job_id));
    std::fs::write(&tmp, bytes).with_context(|| format!("write {}", tmp.display()))?;
    std::fs::rename(&tmp, path).with_context(|| format!("publish {}", path.display()))?;
    Ok(())
}
