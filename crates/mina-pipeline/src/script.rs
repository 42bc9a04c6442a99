//! Pre- and post-processing script hooks.
//!
//! A run may name a script to execute before segmentation and another to
//! execute after the result row is stored. Running a script is an I/O
//! concern, so the core only defines the [`ScriptRunner`] seam; the
//! process-backed implementation lives in `mina-io`.
//!
//! The contract is run-to-completion: [`ScriptRunner::run`] blocks until
//! the script has finished and reports failure through [`ScriptError`].
//! There is no cancellation and no timeout.

use std::path::{Path, PathBuf};

use crate::context::AnalysisContext;

/// A script that was found but could not be run successfully.
#[derive(Debug, thiserror::Error)]
pub enum ScriptError {
    /// The script could not be started.
    #[error("failed to launch script {}: {reason}", path.display())]
    Launch {
        /// Script path.
        path: PathBuf,
        /// Why the launch failed.
        reason: String,
    },

    /// The script ran and reported failure.
    #[error("script {} failed: {reason}", path.display())]
    Failed {
        /// Script path.
        path: PathBuf,
        /// Exit status or other failure description.
        reason: String,
    },

    /// The script finished but its output could not be taken back into
    /// the analysis context.
    #[error("could not read output of script {}: {reason}", path.display())]
    Output {
        /// Script path.
        path: PathBuf,
        /// What went wrong.
        reason: String,
    },
}

/// Executes user-supplied scripts against an [`AnalysisContext`].
pub trait ScriptRunner {
    /// Resolve `path` to a runnable script, or `None` if it does not
    /// exist. A script that does not resolve is skipped without error.
    fn resolve(&self, path: &Path) -> Option<PathBuf>;

    /// Run a resolved script to completion.
    ///
    /// The script may replace or transform the context's active image.
    ///
    /// # Errors
    ///
    /// Returns [`ScriptError`] if the script cannot be launched, reports
    /// failure, or leaves output that cannot be read back.
    fn run(&self, script: &Path, context: &mut AnalysisContext) -> Result<(), ScriptError>;
}

/// A runner for hosts without script support: no path ever resolves, so
/// every hook is skipped.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoScripts;

impl ScriptRunner for NoScripts {
    fn resolve(&self, _path: &Path) -> Option<PathBuf> {
        None
    }

    fn run(&self, _script: &Path, _context: &mut AnalysisContext) -> Result<(), ScriptError> {
        Ok(())
    }
}

/// Run the `hook` script at `path` if one is configured and it resolves.
///
/// Returns the resolved path when a script was run.
///
/// # Errors
///
/// Propagates the runner's [`ScriptError`].
pub fn run_hook(
    runner: &dyn ScriptRunner,
    hook: &str,
    path: Option<&Path>,
    context: &mut AnalysisContext,
) -> Result<Option<PathBuf>, ScriptError> {
    let Some(script) = path.and_then(|p| runner.resolve(p)) else {
        if let Some(p) = path {
            log::debug!("{hook} {} not found, skipping", p.display());
        }
        return Ok(None);
    };
    log::info!("{hook} found, running {}", script.display());
    runner.run(&script, context)?;
    Ok(Some(script))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::cell::RefCell;

    use super::*;

    /// Resolves every path and records what it ran.
    #[derive(Default)]
    struct Recording {
        ran: RefCell<Vec<PathBuf>>,
        fail: bool,
    }

    impl ScriptRunner for Recording {
        fn resolve(&self, path: &Path) -> Option<PathBuf> {
            Some(path.to_path_buf())
        }

        fn run(&self, script: &Path, _context: &mut AnalysisContext) -> Result<(), ScriptError> {
            self.ran.borrow_mut().push(script.to_path_buf());
            if self.fail {
                return Err(ScriptError::Failed {
                    path: script.to_path_buf(),
                    reason: "exit status 1".to_owned(),
                });
            }
            Ok(())
        }
    }

    #[test]
    fn absent_path_is_skipped() {
        let runner = Recording::default();
        let mut context = AnalysisContext::new();
        let ran = run_hook(&runner, "preprocessor", None, &mut context).unwrap();
        assert_eq!(ran, None);
        assert!(runner.ran.borrow().is_empty());
    }

    #[test]
    fn unresolved_path_is_skipped() {
        let mut context = AnalysisContext::new();
        let missing = Some(Path::new("missing.sh"));
        let ran = run_hook(&NoScripts, "preprocessor", missing, &mut context).unwrap();
        assert_eq!(ran, None);
    }

    #[test]
    fn resolved_script_runs() {
        let runner = Recording::default();
        let mut context = AnalysisContext::new();
        let pre = Some(Path::new("pre.sh"));
        let ran = run_hook(&runner, "preprocessor", pre, &mut context).unwrap();
        assert_eq!(ran, Some(PathBuf::from("pre.sh")));
        assert_eq!(*runner.ran.borrow(), vec![PathBuf::from("pre.sh")]);
    }

    #[test]
    fn failing_script_is_an_error() {
        let runner = Recording {
            fail: true,
            ..Recording::default()
        };
        let mut context = AnalysisContext::new();
        let post = Some(Path::new("post.sh"));
        let result = run_hook(&runner, "postprocessor", post, &mut context);
        assert!(matches!(result, Err(ScriptError::Failed { .. })));
    }
}
