//! Batch driver: many images, one parameter set, one table.
//!
//! Every job runs in a fresh [`AnalysisContext`], so jobs never see each
//! other's images or tables. Jobs run one at a time in manifest order.
//! What happens when a job fails is an explicit [`FailurePolicy`] choice;
//! rows collected before a failure are always kept.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::AnalysisParams;
use crate::context::AnalysisContext;
use crate::pipeline::Collaborators;
use crate::results::Value;
use crate::types::{Hyperstack, PipelineError};

/// Output names recorded per job, in column order.
///
/// The minimum line length is a run parameter but not a batch column.
pub const BATCH_COLUMN_ORDER: [&str; 18] = [
    "image_title",
    "preprocessor_path",
    "postprocessor_path",
    "thresholding_op",
    "use_ridge_detection",
    "high_contrast",
    "low_contrast",
    "line_width",
    "mitochondrial_footprint",
    "branch_len_mean",
    "branch_len_med",
    "branch_len_stdevp",
    "summed_branch_lens_mean",
    "summed_branch_lens_med",
    "summed_branch_lens_stdevp",
    "network_branches_mean",
    "network_branches_med",
    "network_branches_stdevp",
];

/// Loads the image a batch job names.
pub trait ImageSource {
    /// Load `path` as a calibrated stack.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::ImageLoad`] if the image cannot be read.
    fn load(&self, path: &Path) -> Result<Hyperstack, PipelineError>;
}

/// One image to analyze with a fixed parameter set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchJob {
    /// Image to load.
    pub image_path: PathBuf,
    /// Parameters of the run.
    pub params: AnalysisParams,
}

/// A batch described as data: shared parameters and a list of images.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchManifest {
    /// Parameters applied to every image.
    #[serde(default)]
    pub params: AnalysisParams,
    /// Images, in processing order.
    pub images: Vec<PathBuf>,
}

impl BatchManifest {
    /// One job per image, each with the shared parameters.
    #[must_use]
    pub fn jobs(&self) -> Vec<BatchJob> {
        self.images
            .iter()
            .map(|image_path| BatchJob {
                image_path: image_path.clone(),
                params: self.params.clone(),
            })
            .collect()
    }
}

/// What to do when a job fails.
///
/// Has no default; callers choose one explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Stop at the first failure.
    Abort,
    /// Record the failure and move on to the next job.
    Continue,
}

/// The batch result table: one row per successful job, columns in
/// [`BATCH_COLUMN_ORDER`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchTable {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl BatchTable {
    /// An empty table with the batch columns.
    #[must_use]
    pub fn new() -> Self {
        Self {
            columns: BATCH_COLUMN_ORDER.iter().map(|&c| c.to_owned()).collect(),
            rows: Vec::new(),
        }
    }

    /// Column names.
    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Rows, in job order.
    #[must_use]
    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the table has no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Value of `column` in row `row`.
    #[must_use]
    pub fn cell(&self, row: usize, column: &str) -> Option<&Value> {
        let col = self.columns.iter().position(|c| c == column)?;
        self.rows.get(row)?.get(col)
    }
}

impl Default for BatchTable {
    fn default() -> Self {
        Self::new()
    }
}

/// A job that failed under [`FailurePolicy::Continue`].
#[derive(Debug)]
pub struct JobFailure {
    /// Position of the job in the batch.
    pub index: usize,
    /// The job's image.
    pub path: PathBuf,
    /// Why it failed.
    pub error: PipelineError,
}

/// Everything a batch produced.
#[derive(Debug, Default)]
pub struct BatchReport {
    /// Rows of the successful jobs.
    pub table: BatchTable,
    /// Jobs that failed and were skipped.
    pub failures: Vec<JobFailure>,
}

/// A batch stopped early.
#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    /// A job failed under [`FailurePolicy::Abort`].
    #[error("batch job {} ({}) failed: {source}", index + 1, path.display())]
    JobFailed {
        /// Position of the failed job.
        index: usize,
        /// The failed job's image.
        path: PathBuf,
        /// Why it failed.
        source: PipelineError,
        /// Rows and failures collected before the failing job.
        report: Box<BatchReport>,
    },
}

/// Run `jobs` in order.
///
/// # Errors
///
/// Under [`FailurePolicy::Abort`], returns [`BatchError::JobFailed`] at the
/// first failing job, carrying the rows collected so far. Under
/// [`FailurePolicy::Continue`] this never fails; failures are listed in
/// the report.
pub fn run_batch(
    jobs: &[BatchJob],
    source: &dyn ImageSource,
    collaborators: Collaborators<'_>,
    policy: FailurePolicy,
) -> Result<BatchReport, BatchError> {
    let total = jobs.len();
    let mut report = BatchReport::default();

    for (index, job) in jobs.iter().enumerate() {
        match run_job(job, source, collaborators) {
            Ok(row) => {
                log::info!(
                    "[{}/{total}] {}: done",
                    index + 1,
                    job.image_path.display()
                );
                report.table.rows.push(row);
            }
            Err(error) => {
                log::error!(
                    "[{}/{total}] {}: {error}",
                    index + 1,
                    job.image_path.display()
                );
                match policy {
                    FailurePolicy::Abort => {
                        return Err(BatchError::JobFailed {
                            index,
                            path: job.image_path.clone(),
                            source: error,
                            report: Box::new(report),
                        });
                    }
                    FailurePolicy::Continue => report.failures.push(JobFailure {
                        index,
                        path: job.image_path.clone(),
                        error,
                    }),
                }
            }
        }
    }

    log::info!(
        "batch finished: {} of {total} job(s) succeeded, {} failed",
        report.table.len(),
        report.failures.len(),
    );
    Ok(report)
}

/// Run one job in a fresh context and read its batch columns.
///
/// The row is built completely before it is returned, so a failed lookup
/// leaves nothing behind.
fn run_job(
    job: &BatchJob,
    source: &dyn ImageSource,
    collaborators: Collaborators<'_>,
) -> Result<Vec<Value>, PipelineError> {
    let image = source.load(&job.image_path)?;
    let mut context = AnalysisContext::with_image(image);
    let outcome = crate::analyze(&mut context, &job.params, collaborators)?;
    BATCH_COLUMN_ORDER
        .iter()
        .map(|&name| {
            outcome
                .outputs
                .get(name)
                .cloned()
                .ok_or_else(|| PipelineError::MissingOutputColumn(name.to_owned()))
        })
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use image::{GrayImage, Luma};

    use super::*;
    use crate::results::OUTPUT_ORDER;
    use crate::types::Calibration;

    /// Serves a horizontal line of the length encoded in the file stem;
    /// any other name fails to load.
    struct LineSource;

    impl ImageSource for LineSource {
        fn load(&self, path: &Path) -> Result<Hyperstack, PipelineError> {
            let length: u32 = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| PipelineError::ImageLoad {
                    path: path.to_path_buf(),
                    reason: "not a line".to_owned(),
                })?;
            let mut img = GrayImage::new(length + 4, 7);
            for x in 2..length + 2 {
                img.put_pixel(x, 3, Luma([220]));
            }
            Ok(Hyperstack::from_gray(
                path.display().to_string(),
                &img,
                Calibration::default(),
            ))
        }
    }

    fn jobs(names: &[&str]) -> Vec<BatchJob> {
        BatchManifest {
            params: AnalysisParams::default(),
            images: names.iter().map(PathBuf::from).collect(),
        }
        .jobs()
    }

    #[test]
    fn batch_columns_are_run_outputs_without_min_line_length() {
        for name in BATCH_COLUMN_ORDER {
            assert!(OUTPUT_ORDER.iter().any(|f| f.name == name), "{name}");
        }
        assert!(!BATCH_COLUMN_ORDER.contains(&"min_line_length"));
        assert_eq!(BATCH_COLUMN_ORDER.len(), OUTPUT_ORDER.len() - 1);
    }

    #[test]
    fn rows_follow_job_order() {
        let report = run_batch(
            &jobs(&["10.png", "6.png"]),
            &LineSource,
            Collaborators::builtin(),
            FailurePolicy::Abort,
        )
        .unwrap();
        assert_eq!(report.table.len(), 2);
        assert_eq!(
            report.table.cell(0, "image_title"),
            Some(&Value::from("10.png"))
        );
        assert_eq!(
            report.table.cell(1, "image_title"),
            Some(&Value::from("6.png"))
        );
        assert!(report.failures.is_empty());
    }

    #[test]
    fn abort_keeps_rows_collected_before_the_failure() {
        let result = run_batch(
            &jobs(&["10.png", "broken.png", "6.png"]),
            &LineSource,
            Collaborators::builtin(),
            FailurePolicy::Abort,
        );
        let Err(BatchError::JobFailed {
            index,
            source,
            report,
            ..
        }) = result
        else {
            unreachable!("batch should abort");
        };
        assert_eq!(index, 1);
        assert!(matches!(source, PipelineError::ImageLoad { .. }));
        assert_eq!(report.table.len(), 1);
    }

    #[test]
    fn continue_skips_failed_jobs() {
        let report = run_batch(
            &jobs(&["10.png", "broken.png", "6.png"]),
            &LineSource,
            Collaborators::builtin(),
            FailurePolicy::Continue,
        )
        .unwrap();
        assert_eq!(report.table.len(), 2);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].index, 1);
        assert_eq!(
            report.table.cell(1, "image_title"),
            Some(&Value::from("6.png"))
        );
    }

    #[test]
    fn manifest_parses_with_default_params() {
        let manifest: BatchManifest =
            serde_json::from_str(r#"{"images": ["a.tif", "b.tif"]}"#).unwrap();
        let jobs = manifest.jobs();
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[1].image_path, PathBuf::from("b.tif"));
        assert_eq!(jobs[0].params, AnalysisParams::default());
    }

    #[test]
    fn failure_policy_names() {
        let policy: FailurePolicy = serde_json::from_str(r#""continue""#).unwrap();
        assert_eq!(policy, FailurePolicy::Continue);
    }
}
