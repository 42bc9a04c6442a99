//! Incremental analysis run: advance stage by stage, inspecting each
//! intermediate result before continuing.
//!
//! [`crate::analyze`] runs every stage in one call. [`Pending`] lets the
//! caller drive the same sequence one step at a time:
//!
//! ```rust
//! # use mina_pipeline::{AnalysisContext, AnalysisParams, Collaborators, Pending, PipelineError};
//! # fn run(context: &mut AnalysisContext) -> Result<(), PipelineError> {
//! let params = AnalysisParams::default();
//! let outcome = Pending::new(context, &params, Collaborators::builtin())
//!     .preprocess()?
//!     .segment()?
//!     .skeletonize()?
//!     .analyze()?
//!     .aggregate()?
//!     .assemble()?
//!     .overlay()?
//!     .postprocess()?
//!     .into_outcome();
//! # Ok(())
//! # }
//! ```
//!
//! Each stage method consumes `self` and returns the next state, carrying
//! everything computed so far. The row is stored in the context's result
//! table only once the post-processing script has succeeded, so a run
//! that fails at any stage emits no row.

use std::path::{Path, PathBuf};

use crate::comment::parse_comment;
use crate::config::AnalysisParams;
use crate::context::AnalysisContext;
use crate::graph::{NetworkStatistics, SkeletonAnalysis, SkeletonAnalyzer, VoxelGraphAnalyzer};
use crate::results::{OutputParameters, OutputRow, RESULTS_TABLE_NAME, RunOutputs, Value};
use crate::ridge::{HessianRidgeDetector, RidgeDetector, ridge_skeleton};
use crate::script::{self, NoScripts, ScriptRunner};
use crate::segment::{self, Mask};
use crate::skeletonize::{Skeleton, Skeletonizer, SkeletonizerKind};
use crate::threshold::{HistogramThresholder, Thresholder};
use crate::types::{Hyperstack, Overlay, OverlayLayer, PipelineError};

/// Mask overlay opacity.
const MASK_OPACITY: f32 = 0.25;
/// Skeleton overlay opacity.
const SKELETON_OPACITY: f32 = 1.0;

/// The services a run delegates to.
#[derive(Clone, Copy)]
pub struct Collaborators<'a> {
    /// Binarizes the analyzed channel.
    pub thresholder: &'a dyn Thresholder,
    /// Thins masks to skeletons.
    pub skeletonizer: &'a dyn Skeletonizer,
    /// Detects lines for the ridge route.
    pub ridge_detector: &'a dyn RidgeDetector,
    /// Decomposes skeletons into networks.
    pub analyzer: &'a dyn SkeletonAnalyzer,
    /// Runs pre- and post-processing scripts.
    pub scripts: &'a dyn ScriptRunner,
}

impl Collaborators<'static> {
    /// The built-in implementations, with scripts disabled.
    #[must_use]
    pub fn builtin() -> Self {
        Self {
            thresholder: &HistogramThresholder,
            skeletonizer: &SkeletonizerKind::GuoHall,
            ridge_detector: &HessianRidgeDetector,
            analyzer: &VoxelGraphAnalyzer,
            scripts: &NoScripts,
        }
    }
}

impl Default for Collaborators<'static> {
    fn default() -> Self {
        Self::builtin()
    }
}

impl<'a> Collaborators<'a> {
    /// Replace the script runner.
    #[must_use]
    pub fn with_scripts(self, scripts: &'a dyn ScriptRunner) -> Self {
        Self { scripts, ..self }
    }
}

/// How the skeleton of a run was built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkeletonRoute {
    /// The mask was thinned directly.
    Mask,
    /// Ridge detection on the image, then thinning.
    RidgeDetection,
    /// Ridge detection was requested on a multi-slice image and the mask
    /// was thinned instead.
    MaskRidgeBypassed,
}

impl SkeletonRoute {
    /// Human-readable name, used in diagnostics.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Mask => "mask",
            Self::RidgeDetection => "ridge detection",
            Self::MaskRidgeBypassed => "mask (ridge detection bypassed)",
        }
    }
}

/// Everything a completed run produced.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// The row appended to the results table.
    pub row: OutputRow,
    /// The row under its snake-case output names.
    pub outputs: RunOutputs,
    /// Comment columns appended with the row.
    pub comments: Vec<(String, String)>,
    /// The binary mask.
    pub mask: Mask,
    /// The skeleton that was analyzed.
    pub skeleton: Skeleton,
    /// How the skeleton was built.
    pub route: SkeletonRoute,
    /// Networks and branch counts.
    pub analysis: SkeletonAnalysis,
    /// Summaries of the analysis.
    pub statistics: NetworkStatistics,
    /// Overlay attached to the active image, for single-slice images.
    pub overlay: Option<Overlay>,
    /// Pre-processing script that ran.
    pub preprocessor: Option<PathBuf>,
    /// Post-processing script that ran.
    pub postprocessor: Option<PathBuf>,
}

/// State shared by every stage.
struct Run<'r> {
    context: &'r mut AnalysisContext,
    params: &'r AnalysisParams,
    collaborators: Collaborators<'r>,
    parameters: OutputParameters,
}

impl Run<'_> {
    fn record(&mut self, label: &'static str, value: impl Into<Value>) {
        self.parameters.insert(label, value.into());
    }
}

/// The path to report for a configured script: its resolved location when
/// it exists, the configured path otherwise, or empty when unset.
fn script_path_text(runner: &dyn ScriptRunner, path: Option<&Path>) -> String {
    path.map(|p| {
        runner
            .resolve(p)
            .unwrap_or_else(|| p.to_path_buf())
            .display()
            .to_string()
    })
    .unwrap_or_default()
}

// ───────────────────────── Stage 0: Pending ──────────────────────────

/// A run that has not started.
///
/// Call [`preprocess`](Self::preprocess) to advance.
#[must_use = "pipeline stages are consumed by advancing; call .preprocess() to continue"]
pub struct Pending<'r> {
    run: Run<'r>,
}

impl<'r> Pending<'r> {
    /// Prepare a run of `params` on the active image of `context`.
    pub fn new(
        context: &'r mut AnalysisContext,
        params: &'r AnalysisParams,
        collaborators: Collaborators<'r>,
    ) -> Self {
        Self {
            run: Run {
                context,
                params,
                collaborators,
                parameters: OutputParameters::new(),
            },
        }
    }

    /// Validate parameters, run the pre-processing script if one resolves,
    /// and re-acquire the active image.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidRidgeParams`] for unusable ridge
    /// parameters when ridge detection is requested,
    /// [`PipelineError::Script`] if the script fails, and
    /// [`PipelineError::NoActiveImage`] if no image is active afterwards.
    pub fn preprocess(self) -> Result<Preprocessed<'r>, PipelineError> {
        let mut run = self.run;
        let params = run.params;
        params.validate()?;

        let preprocessor = script::run_hook(
            run.collaborators.scripts,
            "preprocessor",
            params.preprocessor.as_deref(),
            run.context,
        )?;

        let title = run.context.require_active()?.title().to_owned();
        let scripts = run.collaborators.scripts;
        run.record("image title", title);
        run.record(
            "preprocessor path",
            script_path_text(scripts, params.preprocessor.as_deref()),
        );
        run.record(
            "post processor path",
            script_path_text(scripts, params.postprocessor.as_deref()),
        );
        run.record("thresholding op", params.threshold_method.name());
        run.record("use ridge detection", params.use_ridge_detection);
        run.record("high contrast", params.ridge.high_contrast);
        run.record("low contrast", params.ridge.low_contrast);
        run.record("line width", params.ridge.line_width);
        run.record("minimum line length", params.ridge.min_line_length);

        Ok(Preprocessed { run, preprocessor })
    }
}

// ───────────────────────── Stage 1: Preprocessed ─────────────────────

/// The active image is final; nothing has been measured yet.
#[must_use = "pipeline stages are consumed by advancing; call .segment() to continue"]
pub struct Preprocessed<'r> {
    run: Run<'r>,
    preprocessor: Option<PathBuf>,
}

impl<'r> Preprocessed<'r> {
    /// The image the run analyzes.
    #[must_use]
    pub fn image(&self) -> Option<&Hyperstack> {
        self.run.context.active()
    }

    /// Pre-processing script that ran, if any.
    #[must_use]
    pub fn preprocessor(&self) -> Option<&Path> {
        self.preprocessor.as_deref()
    }

    /// Threshold the current channel and measure the footprint.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::NoActiveImage`] if the image was removed,
    /// or the thresholder's error.
    pub fn segment(self) -> Result<Segmented<'r>, PipelineError> {
        let mut run = self.run;
        log::info!("Determining threshold level...");

        let image = run.context.require_active()?;
        let channel = image.duplicate_channel(image.current_channel())?;
        let mask = segment::segment(
            &channel,
            run.params.threshold_method,
            run.collaborators.thresholder,
        )?;
        let footprint = mask.footprint();
        log::debug!(
            "{} foreground voxels over {} plane(s), footprint {footprint}",
            mask.foreground_voxels(),
            mask.slices(),
        );
        run.record("mitochondrial footprint", footprint);

        Ok(Segmented {
            run,
            preprocessor: self.preprocessor,
            mask,
        })
    }
}

// ───────────────────────── Stage 2: Segmented ────────────────────────

/// The binary mask and footprint are known.
#[must_use = "pipeline stages are consumed by advancing; call .skeletonize() to continue"]
pub struct Segmented<'r> {
    run: Run<'r>,
    preprocessor: Option<PathBuf>,
    mask: Mask,
}

impl<'r> Segmented<'r> {
    /// The binary mask.
    #[must_use]
    pub const fn mask(&self) -> &Mask {
        &self.mask
    }

    /// Build the skeleton.
    ///
    /// Ridge detection is used only when requested and the image has a
    /// single slice. On a multi-slice image the request is ignored with a
    /// warning and the mask is thinned instead.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::NoActiveImage`] if the image was removed,
    /// or the ridge route's error.
    pub fn skeletonize(self) -> Result<Skeletonized<'r>, PipelineError> {
        let run = self.run;
        let skeletonizer = run.collaborators.skeletonizer;
        let slices = run.context.require_active()?.slices();

        let (skeleton, route) = if !run.params.use_ridge_detection {
            (skeletonizer.skeletonize(&self.mask), SkeletonRoute::Mask)
        } else if slices == 1 {
            let skeleton = ridge_skeleton(
                run.context,
                &run.params.ridge,
                run.collaborators.ridge_detector,
                skeletonizer,
            )?;
            (skeleton, SkeletonRoute::RidgeDetection)
        } else {
            log::warn!(
                "ridge detection needs a single-slice image, this one has {slices} slices; \
                 skeletonizing the mask instead"
            );
            (
                skeletonizer.skeletonize(&self.mask),
                SkeletonRoute::MaskRidgeBypassed,
            )
        };
        log::debug!(
            "skeleton via {}: {} voxels",
            route.name(),
            skeleton.voxel_count()
        );

        Ok(Skeletonized {
            run,
            preprocessor: self.preprocessor,
            mask: self.mask,
            skeleton,
            route,
        })
    }
}

// ───────────────────────── Stage 3: Skeletonized ─────────────────────

/// The skeleton is built.
#[must_use = "pipeline stages are consumed by advancing; call .analyze() to continue"]
pub struct Skeletonized<'r> {
    run: Run<'r>,
    preprocessor: Option<PathBuf>,
    mask: Mask,
    skeleton: Skeleton,
    route: SkeletonRoute,
}

impl<'r> Skeletonized<'r> {
    /// The skeleton.
    #[must_use]
    pub const fn skeleton(&self) -> &Skeleton {
        &self.skeleton
    }

    /// How the skeleton was built.
    #[must_use]
    pub const fn route(&self) -> SkeletonRoute {
        self.route
    }

    /// Decompose the skeleton into networks.
    ///
    /// # Errors
    ///
    /// Propagates the analyzer's error.
    pub fn analyze(self) -> Result<Analyzed<'r>, PipelineError> {
        log::info!("Setting up skeleton analysis...");
        log::info!("Analyzing skeleton...");
        let analysis = self.run.collaborators.analyzer.analyze(&self.skeleton)?;
        log::debug!(
            "{} network(s), {} branch(es) reported",
            analysis.graphs().len(),
            analysis.branches().iter().sum::<usize>(),
        );

        Ok(Analyzed {
            run: self.run,
            preprocessor: self.preprocessor,
            mask: self.mask,
            skeleton: self.skeleton,
            route: self.route,
            analysis,
        })
    }
}

// ───────────────────────── Stage 4: Analyzed ─────────────────────────

/// Networks and branch counts are known.
#[must_use = "pipeline stages are consumed by advancing; call .aggregate() to continue"]
pub struct Analyzed<'r> {
    run: Run<'r>,
    preprocessor: Option<PathBuf>,
    mask: Mask,
    skeleton: Skeleton,
    route: SkeletonRoute,
    analysis: SkeletonAnalysis,
}

impl<'r> Analyzed<'r> {
    /// The skeleton analysis.
    #[must_use]
    pub const fn analysis(&self) -> &SkeletonAnalysis {
        &self.analysis
    }

    /// Reduce the analysis to its nine summary statistics.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::MissingCollaboratorOutput`] if the
    /// analysis has no networks or no branches.
    pub fn aggregate(self) -> Result<Aggregated<'r>, PipelineError> {
        let mut run = self.run;
        log::info!("Computing graph based parameters...");
        let statistics = NetworkStatistics::from_analysis(&self.analysis)?;

        let NetworkStatistics {
            branch_length,
            summed_branch_length,
            network_branches,
        } = statistics;
        run.record("branch length mean", branch_length.mean);
        run.record("branch length median", branch_length.median);
        run.record("branch length stdevp", branch_length.stdevp);
        run.record("summed branch lengths mean", summed_branch_length.mean);
        run.record("summed branch lengths median", summed_branch_length.median);
        run.record("summed branch lengths stdevp", summed_branch_length.stdevp);
        run.record("network branches mean", network_branches.mean);
        run.record("network branches median", network_branches.median);
        run.record("network branches stdevp", network_branches.stdevp);

        Ok(Aggregated {
            run,
            preprocessor: self.preprocessor,
            mask: self.mask,
            skeleton: self.skeleton,
            route: self.route,
            analysis: self.analysis,
            statistics,
        })
    }
}

// ───────────────────────── Stage 5: Aggregated ───────────────────────

/// Every output parameter is computed.
#[must_use = "pipeline stages are consumed by advancing; call .assemble() to continue"]
pub struct Aggregated<'r> {
    run: Run<'r>,
    preprocessor: Option<PathBuf>,
    mask: Mask,
    skeleton: Skeleton,
    route: SkeletonRoute,
    analysis: SkeletonAnalysis,
    statistics: NetworkStatistics,
}

impl<'r> Aggregated<'r> {
    /// The summary statistics.
    #[must_use]
    pub const fn statistics(&self) -> &NetworkStatistics {
        &self.statistics
    }

    /// Assemble the output row and its comment columns.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::MissingOutputParameter`] if an earlier
    /// stage left a field uncomputed.
    pub fn assemble(self) -> Result<Assembled<'r>, PipelineError> {
        let mut run = self.run;
        log::info!("Display results...");
        let row = OutputRow::assemble(std::mem::take(&mut run.parameters))?;
        let comments = parse_comment(&run.params.comment);

        Ok(Assembled {
            run,
            preprocessor: self.preprocessor,
            mask: self.mask,
            skeleton: self.skeleton,
            route: self.route,
            analysis: self.analysis,
            statistics: self.statistics,
            row,
            comments,
        })
    }
}

// ───────────────────────── Stage 6: Assembled ────────────────────────

/// The row is assembled but not yet stored.
#[must_use = "pipeline stages are consumed by advancing; call .overlay() to continue"]
pub struct Assembled<'r> {
    run: Run<'r>,
    preprocessor: Option<PathBuf>,
    mask: Mask,
    skeleton: Skeleton,
    route: SkeletonRoute,
    analysis: SkeletonAnalysis,
    statistics: NetworkStatistics,
    row: OutputRow,
    comments: Vec<(String, String)>,
}

impl<'r> Assembled<'r> {
    /// The assembled row.
    #[must_use]
    pub const fn row(&self) -> &OutputRow {
        &self.row
    }

    /// Comment columns appended with the row.
    #[must_use]
    pub fn comments(&self) -> &[(String, String)] {
        &self.comments
    }

    /// Rows the results table will hold once this run's row is stored.
    #[must_use]
    pub fn table_rows(&self) -> usize {
        self.run
            .context
            .table(RESULTS_TABLE_NAME)
            .map_or(0, crate::results::ResultTable::len)
            + 1
    }

    /// Attach the mask and skeleton overlay to a single-slice active
    /// image. Volumetric images are left without an overlay.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::NoActiveImage`] if the image was removed.
    pub fn overlay(self) -> Result<Overlaid<'r>, PipelineError> {
        let run = self.run;
        let image = run.context.require_active_mut()?;

        let first_planes = (
            image.slices(),
            self.mask.planes().first(),
            self.skeleton.planes().first(),
        );
        let overlay = match first_planes {
            (1, Some(mask), Some(skeleton)) => {
                log::info!("Generate overlays...");
                let mut overlay = Overlay::default();
                overlay.add(OverlayLayer {
                    image: mask.clone(),
                    color: Overlay::MAGENTA,
                    opacity: MASK_OPACITY,
                });
                overlay.add(OverlayLayer {
                    image: skeleton.clone(),
                    color: Overlay::GREEN,
                    opacity: SKELETON_OPACITY,
                });
                image.set_overlay(overlay.clone());
                Some(overlay)
            }
            (slices, ..) => {
                log::debug!("no overlay for an image with {slices} slices");
                None
            }
        };

        Ok(Overlaid {
            run,
            preprocessor: self.preprocessor,
            mask: self.mask,
            skeleton: self.skeleton,
            route: self.route,
            analysis: self.analysis,
            statistics: self.statistics,
            row: self.row,
            comments: self.comments,
            overlay,
        })
    }
}

// ───────────────────────── Stage 7: Overlaid ─────────────────────────

/// Visualization is attached where applicable.
#[must_use = "pipeline stages are consumed by advancing; call .postprocess() to continue"]
pub struct Overlaid<'r> {
    run: Run<'r>,
    preprocessor: Option<PathBuf>,
    mask: Mask,
    skeleton: Skeleton,
    route: SkeletonRoute,
    analysis: SkeletonAnalysis,
    statistics: NetworkStatistics,
    row: OutputRow,
    comments: Vec<(String, String)>,
    overlay: Option<Overlay>,
}

impl Overlaid<'_> {
    /// The overlay, if one was attached.
    #[must_use]
    pub const fn overlay(&self) -> Option<&Overlay> {
        self.overlay.as_ref()
    }

    /// Run the post-processing script if one resolves, then append the
    /// row and its comment columns to the context's results table.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Script`] if the script fails. Nothing is
    /// appended in that case.
    pub fn postprocess(self) -> Result<Done, PipelineError> {
        let run = self.run;
        let postprocessor = script::run_hook(
            run.collaborators.scripts,
            "postprocessor",
            run.params.postprocessor.as_deref(),
            run.context,
        )?;
        run.context
            .table_mut(RESULTS_TABLE_NAME)
            .append(&self.row, &self.comments);
        log::info!("Done analysis!");

        let outputs = self.row.to_outputs();
        Ok(Done {
            outcome: RunOutcome {
                row: self.row,
                outputs,
                comments: self.comments,
                mask: self.mask,
                skeleton: self.skeleton,
                route: self.route,
                analysis: self.analysis,
                statistics: self.statistics,
                overlay: self.overlay,
                preprocessor: self.preprocessor,
                postprocessor,
            },
        })
    }
}

// ───────────────────────── Stage 8: Done ─────────────────────────────

/// The run completed.
#[must_use = "call .into_outcome() to extract the RunOutcome"]
pub struct Done {
    outcome: RunOutcome,
}

impl Done {
    /// Post-processing script that ran, if any.
    #[must_use]
    pub fn postprocessor(&self) -> Option<&Path> {
        self.outcome.postprocessor.as_deref()
    }

    /// Consume the run and return everything it produced.
    #[must_use]
    pub fn into_outcome(self) -> RunOutcome {
        self.outcome
    }
}
