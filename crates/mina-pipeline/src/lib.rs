//! mina-pipeline: Mitochondrial network morphology analysis (sans-IO).
//!
//! Quantifies a filamentous network in a microscopy image through:
//! optional pre-processing script -> threshold segmentation -> footprint
//! -> skeleton (from the mask, or from ridge detection on 2D images) ->
//! graph analysis -> branch statistics -> result row -> optional overlay
//! -> optional post-processing script.
//!
//! This crate has **no I/O dependencies** -- it operates on in-memory
//! images held in an [`AnalysisContext`] and returns structured data.
//! Image loading and script execution live behind the [`batch::ImageSource`]
//! and [`ScriptRunner`] traits, implemented in `mina-io`.

pub mod batch;
pub mod comment;
pub mod config;
pub mod context;
pub mod diagnostics;
pub mod graph;
pub mod histogram;
pub mod pipeline;
pub mod results;
pub mod ridge;
pub mod script;
pub mod segment;
pub mod skeletonize;
pub mod stats;
pub mod threshold;
pub mod types;

pub use batch::{
    BatchError, BatchJob, BatchManifest, BatchReport, BatchTable, FailurePolicy, ImageSource,
    run_batch,
};
pub use config::AnalysisParams;
pub use context::AnalysisContext;
pub use diagnostics::{Clock, RunDiagnostics};
pub use graph::{NetworkGraph, NetworkStatistics, SkeletonAnalysis, SkeletonAnalyzer};
pub use pipeline::{Collaborators, Pending, RunOutcome, SkeletonRoute};
pub use results::{OutputRow, RESULTS_TABLE_NAME, ResultTable, RunOutputs, Value};
pub use ridge::{RidgeDetector, RidgeParams};
pub use script::{ScriptError, ScriptRunner};
pub use segment::Mask;
pub use skeletonize::{Skeleton, Skeletonizer, SkeletonizerKind};
pub use stats::{EmptyInputError, Summary};
pub use threshold::{ThresholdMethod, Thresholder};
pub use types::{Calibration, Hyperstack, Overlay, PipelineError};

use diagnostics::{RunSummary, StageDiagnostics, StageMetrics};

/// Run one analysis on the active image of `context`.
///
/// On success the output row has been appended to the context's
/// [`RESULTS_TABLE_NAME`] table and, for single-slice images, an overlay
/// is attached to the active image.
///
/// # Steps
///
/// 1. Validate parameters and run the pre-processing script
/// 2. Threshold the current channel and measure the footprint
/// 3. Skeletonize the mask, or run ridge detection on 2D images
/// 4. Analyze the skeleton into networks
/// 5. Summarize branch lengths, network lengths, and branch counts
/// 6. Assemble the row and its comment columns
/// 7. Attach the overlay (2D only)
/// 8. Run the post-processing script and append the row
///
/// # Errors
///
/// Returns [`PipelineError::NoActiveImage`] without an active image,
/// [`PipelineError::InvalidRidgeParams`] for unusable ridge parameters,
/// [`PipelineError::MissingCollaboratorOutput`] if a collaborator
/// produces nothing to measure, and [`PipelineError::Script`] if a
/// script fails. No row is appended unless every step succeeds.
pub fn analyze(
    context: &mut AnalysisContext,
    params: &AnalysisParams,
    collaborators: Collaborators<'_>,
) -> Result<RunOutcome, PipelineError> {
    Ok(Pending::new(context, params, collaborators)
        .preprocess()?
        .segment()?
        .skeletonize()?
        .analyze()?
        .aggregate()?
        .assemble()?
        .overlay()?
        .postprocess()?
        .into_outcome())
}

/// Run one analysis and collect per-stage timing and metrics.
///
/// Produces the same outcome as [`analyze`], plus a [`RunDiagnostics`]
/// record timed with `clock`.
///
/// # Errors
///
/// Same as [`analyze`].
pub fn analyze_with_diagnostics<C: Clock>(
    context: &mut AnalysisContext,
    params: &AnalysisParams,
    collaborators: Collaborators<'_>,
    clock: &C,
) -> Result<(RunOutcome, RunDiagnostics), PipelineError> {
    let total_start = clock.now();

    // Preprocess.
    let start = clock.now();
    let preprocessed = Pending::new(context, params, collaborators).preprocess()?;
    let preprocess = preprocessed.preprocessor().map(|path| StageDiagnostics {
        duration: clock.elapsed(&start),
        metrics: StageMetrics::Script {
            path: path.display().to_string(),
        },
    });
    let image = preprocessed.image().ok_or(PipelineError::NoActiveImage)?;
    let mut summary = RunSummary {
        image_title: image.title().to_owned(),
        width: image.width(),
        height: image.height(),
        slices: image.slices(),
        graph_count: 0,
    };

    // Segment.
    let start = clock.now();
    let segmented = preprocessed.segment()?;
    let mask = segmented.mask();
    let segment = StageDiagnostics {
        duration: clock.elapsed(&start),
        metrics: StageMetrics::Segment {
            method: params.threshold_method.name().to_owned(),
            planes: mask.slices(),
            foreground_voxels: mask.foreground_voxels(),
            total_voxels: mask
                .planes()
                .iter()
                .map(|p| u64::from(p.width()) * u64::from(p.height()))
                .sum(),
            footprint: mask.footprint(),
        },
    };

    // Skeletonize.
    let start = clock.now();
    let skeletonized = segmented.skeletonize()?;
    let skeletonize = StageDiagnostics {
        duration: clock.elapsed(&start),
        metrics: StageMetrics::Skeletonize {
            route: skeletonized.route().name().to_owned(),
            skeleton_voxels: skeletonized.skeleton().voxel_count(),
        },
    };

    // Analyze.
    let start = clock.now();
    let analyzed = skeletonized.analyze()?;
    let analysis = analyzed.analysis();
    summary.graph_count = analysis.graphs().len();
    let analyze = StageDiagnostics {
        duration: clock.elapsed(&start),
        metrics: StageMetrics::Analyze {
            graph_count: analysis.graphs().len(),
            edge_count: analysis.graphs().iter().map(NetworkGraph::edge_count).sum(),
            reported_branches: analysis.branches().iter().sum(),
        },
    };

    // Aggregate.
    let start = clock.now();
    let aggregated = analyzed.aggregate()?;
    let statistics = aggregated.statistics();
    let aggregate = StageDiagnostics {
        duration: clock.elapsed(&start),
        metrics: StageMetrics::Aggregate {
            branch_length_mean: statistics.branch_length.mean,
            network_branches_mean: statistics.network_branches.mean,
        },
    };

    // Assemble.
    let start = clock.now();
    let assembled = aggregated.assemble()?;
    let assemble = StageDiagnostics {
        duration: clock.elapsed(&start),
        metrics: StageMetrics::Assemble {
            table_rows: assembled.table_rows(),
            comment_columns: assembled.comments().len(),
        },
    };

    // Overlay.
    let start = clock.now();
    let overlaid = assembled.overlay()?;
    let overlay = overlaid.overlay().map(|o| StageDiagnostics {
        duration: clock.elapsed(&start),
        metrics: StageMetrics::Overlay {
            layers: o.layers().len(),
        },
    });

    // Postprocess.
    let start = clock.now();
    let done = overlaid.postprocess()?;
    let postprocess = done.postprocessor().map(|path| StageDiagnostics {
        duration: clock.elapsed(&start),
        metrics: StageMetrics::Script {
            path: path.display().to_string(),
        },
    });

    let diagnostics = RunDiagnostics {
        preprocess,
        segment,
        skeletonize,
        analyze,
        aggregate,
        assemble,
        overlay,
        postprocess,
        total_duration: clock.elapsed(&total_start),
        summary,
    };
    Ok((done.into_outcome(), diagnostics))
}
