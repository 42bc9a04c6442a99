//! Run diagnostics: timing and counts for each analysis stage.
//!
//! These diagnostics are permanent instrumentation for parameter
//! experimentation. [`analyze_with_diagnostics`](crate::analyze_with_diagnostics)
//! collects them alongside the run outcome.
//!
//! Timestamps come from a caller-supplied [`Clock`], keeping the core
//! free of any particular time source. Durations are serialized as
//! fractional seconds (`f64`) for JSON compatibility, since
//! `std::time::Duration` does not implement serde traits.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Source of timestamps for stage timing.
pub trait Clock {
    /// An opaque point in time.
    type Instant;

    /// The current time.
    fn now(&self) -> Self::Instant;

    /// Time elapsed since `since`.
    fn elapsed(&self, since: &Self::Instant) -> Duration;
}

/// Serde support for `std::time::Duration` as fractional seconds.
mod duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    /// Serialize a `Duration` as fractional seconds (`f64`).
    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        duration.as_secs_f64().serialize(serializer)
    }

    /// Deserialize a `Duration` from fractional seconds (`f64`).
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(|_| {
            serde::de::Error::custom(
                "duration seconds must be finite, non-negative, and representable as a Duration",
            )
        })
    }
}

/// Diagnostics collected from a single analysis run.
///
/// Hook stages are `None` when no script was configured or found; the
/// overlay stage is `None` for volumetric images.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunDiagnostics {
    /// Optional pre-processing script.
    pub preprocess: Option<StageDiagnostics>,
    /// Thresholding and footprint measurement.
    pub segment: StageDiagnostics,
    /// Skeleton construction.
    pub skeletonize: StageDiagnostics,
    /// Skeleton graph analysis.
    pub analyze: StageDiagnostics,
    /// Statistics reduction.
    pub aggregate: StageDiagnostics,
    /// Row assembly and table append.
    pub assemble: StageDiagnostics,
    /// 2D overlay generation.
    pub overlay: Option<StageDiagnostics>,
    /// Optional post-processing script.
    pub postprocess: Option<StageDiagnostics>,
    /// Total wall-clock duration of the run (seconds).
    #[serde(with = "duration_serde")]
    pub total_duration: Duration,
    /// Summary of the analyzed image.
    pub summary: RunSummary,
}

/// Diagnostics for a single stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageDiagnostics {
    /// Wall-clock duration of this stage (seconds).
    #[serde(with = "duration_serde")]
    pub duration: Duration,
    /// Stage-specific metrics.
    pub metrics: StageMetrics,
}

/// Stage-specific metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StageMetrics {
    /// A pre- or post-processing script ran.
    Script {
        /// Resolved script path.
        path: String,
    },
    /// Segmentation metrics.
    Segment {
        /// Threshold method name.
        method: String,
        /// Mask planes.
        planes: usize,
        /// Foreground voxels over all planes.
        foreground_voxels: u64,
        /// Total voxels over all planes.
        total_voxels: u64,
        /// Measured footprint.
        footprint: f64,
    },
    /// Skeletonization metrics.
    Skeletonize {
        /// How the skeleton was built.
        route: String,
        /// Skeleton voxels.
        skeleton_voxels: u64,
    },
    /// Graph analysis metrics.
    Analyze {
        /// Networks found.
        graph_count: usize,
        /// Branches in the edge lists.
        edge_count: usize,
        /// Sum of the reported branch counts.
        reported_branches: usize,
    },
    /// Statistics metrics.
    Aggregate {
        /// Mean branch length.
        branch_length_mean: f64,
        /// Mean branch count per network.
        network_branches_mean: f64,
    },
    /// Row assembly metrics.
    Assemble {
        /// Rows in the results table after the append.
        table_rows: usize,
        /// Comment columns parsed from the annotation.
        comment_columns: usize,
    },
    /// Overlay metrics.
    Overlay {
        /// Layers attached to the image.
        layers: usize,
    },
}

/// Summary of the analyzed image.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    /// Image title.
    pub image_title: String,
    /// Plane width in pixels.
    pub width: u32,
    /// Plane height in pixels.
    pub height: u32,
    /// Number of Z slices.
    pub slices: usize,
    /// Networks found.
    pub graph_count: usize,
}

impl RunDiagnostics {
    /// Format diagnostics as a human-readable report.
    #[must_use]
    pub fn report(&self) -> String {
        let mut lines = Vec::new();

        lines.push(format!("Analysis Diagnostics Report\n{}", "=".repeat(60)));
        lines.push(format!(
            "Image: {:?} {}x{} ({} slice(s))",
            self.summary.image_title, self.summary.width, self.summary.height, self.summary.slices,
        ));
        lines.push(format!(
            "Total duration: {:.3}ms",
            duration_ms(self.total_duration),
        ));
        lines.push(String::new());

        lines.push(format!(
            "{:<24} {:>10} {:>10}  {}",
            "Stage", "Duration", "% Total", "Details"
        ));
        lines.push("-".repeat(80));

        let total_ms = duration_ms(self.total_duration);
        for (name, diag) in self.stages() {
            let ms = duration_ms(diag.duration);
            let pct = if total_ms > 0.0 {
                ms / total_ms * 100.0
            } else {
                0.0
            };
            let details = format_metrics(&diag.metrics);
            lines.push(format!("{name:<24} {ms:>8.3}ms {pct:>9.1}%  {details}"));
        }

        lines.push(String::new());
        lines.push(format!("Networks: {}", self.summary.graph_count));

        lines.join("\n")
    }

    /// Executed stages in run order.
    fn stages(&self) -> Vec<(&'static str, &StageDiagnostics)> {
        let mut s = Vec::new();
        if let Some(ref pre) = self.preprocess {
            s.push(("Preprocess", pre));
        }
        s.push(("Segment", &self.segment));
        s.push(("Skeletonize", &self.skeletonize));
        s.push(("Analyze Skeleton", &self.analyze));
        s.push(("Aggregate", &self.aggregate));
        s.push(("Assemble", &self.assemble));
        if let Some(ref overlay) = self.overlay {
            s.push(("Overlay", overlay));
        }
        if let Some(ref post) = self.postprocess {
            s.push(("Postprocess", post));
        }
        s
    }
}

/// Convert a `Duration` to milliseconds as `f64`.
fn duration_ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

/// Format stage metrics into a compact detail string.
fn format_metrics(metrics: &StageMetrics) -> String {
    match metrics {
        StageMetrics::Script { path } => path.clone(),
        StageMetrics::Segment {
            method,
            planes,
            foreground_voxels,
            total_voxels,
            footprint,
        } => {
            #[allow(clippy::cast_precision_loss)]
            let density = if *total_voxels > 0 {
                *foreground_voxels as f64 / *total_voxels as f64 * 100.0
            } else {
                0.0
            };
            format!(
                "{method} planes={planes} fg={foreground_voxels} ({density:.1}%) footprint={footprint:.3}",
            )
        }
        StageMetrics::Skeletonize {
            route,
            skeleton_voxels,
        } => format!("{route} voxels={skeleton_voxels}"),
        StageMetrics::Analyze {
            graph_count,
            edge_count,
            reported_branches,
        } => format!("{graph_count} networks, {edge_count} edges, {reported_branches} branches"),
        StageMetrics::Aggregate {
            branch_length_mean,
            network_branches_mean,
        } => format!("branch len mean={branch_length_mean:.3} branches/network={network_branches_mean:.2}"),
        StageMetrics::Assemble {
            table_rows,
            comment_columns,
        } => format!("rows={table_rows} comment columns={comment_columns}"),
        StageMetrics::Overlay { layers } => format!("layers={layers}"),
    }
}
