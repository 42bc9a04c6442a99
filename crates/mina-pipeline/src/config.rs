//! Run parameters.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::ridge::RidgeParams;
use crate::threshold::ThresholdMethod;
use crate::types::PipelineError;

/// Parameters of one analysis run.
///
/// Missing fields take their defaults when deserialized, so a JSON
/// document only needs to name what it changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisParams {
    /// Script run before segmentation. Skipped when unset or missing.
    pub preprocessor: Option<PathBuf>,

    /// Script run after the result row is stored. Skipped when unset or
    /// missing.
    pub postprocessor: Option<PathBuf>,

    /// Global threshold algorithm used to segment the analyzed channel.
    pub threshold_method: ThresholdMethod,

    /// Build the skeleton from ridge detection instead of the mask.
    /// Only honoured on single-plane images.
    pub use_ridge_detection: bool,

    /// Ridge detector settings, also reported in every output row.
    pub ridge: RidgeParams,

    /// Free-text annotation. `key=value` pairs separated by commas become
    /// their own columns.
    pub comment: String,
}

impl AnalysisParams {
    /// Default threshold algorithm.
    pub const DEFAULT_THRESHOLD_METHOD: ThresholdMethod = ThresholdMethod::Otsu;
    /// Ridge detection is off by default.
    pub const DEFAULT_USE_RIDGE_DETECTION: bool = false;

    /// Check parameters that can be rejected before any work is done.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidRidgeParams`] if ridge detection is
    /// requested with unusable ridge parameters.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.use_ridge_detection {
            self.ridge.validate()?;
        }
        Ok(())
    }
}

impl Default for AnalysisParams {
    fn default() -> Self {
        Self {
            preprocessor: None,
            postprocessor: None,
            threshold_method: Self::DEFAULT_THRESHOLD_METHOD,
            use_ridge_detection: Self::DEFAULT_USE_RIDGE_DETECTION,
            ridge: RidgeParams::default(),
            comment: String::new(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let p = AnalysisParams::default();
        assert_eq!(p.threshold_method, ThresholdMethod::Otsu);
        assert!(!p.use_ridge_detection);
        assert_eq!(p.ridge, RidgeParams::default());
        assert!(p.preprocessor.is_none());
        assert!(p.comment.is_empty());
    }

    #[test]
    fn serde_round_trip() {
        let p = AnalysisParams {
            preprocessor: Some(PathBuf::from("/scripts/pre.sh")),
            threshold_method: ThresholdMethod::MaxEntropy,
            use_ridge_detection: true,
            comment: "batch=3".to_owned(),
            ..AnalysisParams::default()
        };
        let json = serde_json::to_string(&p).unwrap();
        let back: AnalysisParams = serde_json::from_str(&json).unwrap();
        assert_eq!(back, p);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let p: AnalysisParams =
            serde_json::from_str(r#"{"threshold_method": "li", "ridge": {"line_width": 3}}"#)
                .unwrap();
        assert_eq!(p.threshold_method, ThresholdMethod::Li);
        assert_eq!(p.ridge.line_width, 3);
        assert_eq!(p.ridge.high_contrast, RidgeParams::DEFAULT_HIGH_CONTRAST);
        assert!(!p.use_ridge_detection);
    }

    #[test]
    fn unknown_method_is_rejected() {
        let result: Result<AnalysisParams, _> =
            serde_json::from_str(r#"{"threshold_method": "magic"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn ridge_params_only_checked_when_used() {
        let mut p = AnalysisParams {
            ridge: RidgeParams {
                line_width: 0,
                ..RidgeParams::default()
            },
            ..AnalysisParams::default()
        };
        assert!(p.validate().is_ok());
        p.use_ridge_detection = true;
        assert!(matches!(
            p.validate(),
            Err(PipelineError::InvalidRidgeParams(_))
        ));
    }
}
