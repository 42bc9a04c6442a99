//! Global thresholding: binarize a single-channel stack.
//!
//! This module defines the [`Thresholder`] trait for pluggable
//! thresholding backends and the [`ThresholdMethod`] enum naming the
//! automatic threshold algorithms a run may select.
//!
//! The built-in [`HistogramThresholder`] computes one 256-bin histogram
//! over every plane of the stack, selects a bin with the chosen algorithm
//! (see [`crate::histogram`]), and marks voxels whose bin lies strictly
//! above it as foreground.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::histogram;
use crate::types::{BitDepth, FOREGROUND, GrayImage, Hyperstack, PipelineError};

/// Number of histogram bins used for every bit depth.
pub const BINS: usize = 256;

/// Automatic threshold algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ThresholdMethod {
    /// Huang's fuzzy thresholding.
    Huang,
    /// Legacy ImageJ variant of iterative intermeans.
    Ij1,
    /// Mean of the two peaks of the smoothed bimodal histogram.
    Intermodes,
    /// Iterative intermeans (Ridler & Calvard).
    IsoData,
    /// Li's minimum cross entropy.
    Li,
    /// Kapur's maximum entropy.
    MaxEntropy,
    /// Maximum likelihood mixture of two Gaussians.
    MaxLikelihood,
    /// Mean grey level.
    Mean,
    /// Kittler & Illingworth minimum error.
    MinError,
    /// Minimum between the two peaks of the smoothed histogram.
    Minimum,
    /// Tsai's moment preserving.
    Moments,
    /// Otsu's between-class variance.
    #[default]
    Otsu,
    /// Half of the pixels in the foreground.
    Percentile,
    /// Renyi entropy.
    RenyiEntropy,
    /// Rosin's unimodal corner.
    Rosin,
    /// Shanbhag's fuzzy entropy.
    Shanbhag,
    /// Zack's triangle.
    Triangle,
    /// Yen's maximum correlation.
    Yen,
}

impl ThresholdMethod {
    /// Every method, in alphabetical order of their names.
    pub const ALL: [Self; 18] = [
        Self::Huang,
        Self::Ij1,
        Self::Intermodes,
        Self::IsoData,
        Self::Li,
        Self::MaxEntropy,
        Self::MaxLikelihood,
        Self::Mean,
        Self::MinError,
        Self::Minimum,
        Self::Moments,
        Self::Otsu,
        Self::Percentile,
        Self::RenyiEntropy,
        Self::Rosin,
        Self::Shanbhag,
        Self::Triangle,
        Self::Yen,
    ];

    /// The method's name as used in parameters and result tables.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Huang => "huang",
            Self::Ij1 => "ij1",
            Self::Intermodes => "intermodes",
            Self::IsoData => "isoData",
            Self::Li => "li",
            Self::MaxEntropy => "maxEntropy",
            Self::MaxLikelihood => "maxLikelihood",
            Self::Mean => "mean",
            Self::MinError => "minError",
            Self::Minimum => "minimum",
            Self::Moments => "moments",
            Self::Otsu => "otsu",
            Self::Percentile => "percentile",
            Self::RenyiEntropy => "renyiEntropy",
            Self::Rosin => "rosin",
            Self::Shanbhag => "shanbhag",
            Self::Triangle => "triangle",
            Self::Yen => "yen",
        }
    }

    /// Select a threshold bin from a histogram.
    ///
    /// Returns `None` when the algorithm cannot find a level (for example
    /// a histogram that never becomes bimodal).
    #[must_use]
    pub fn select(self, hist: &[u64]) -> Option<usize> {
        match self {
            Self::Huang => histogram::huang(hist),
            Self::Ij1 => histogram::ij1(hist),
            Self::Intermodes => histogram::intermodes(hist),
            Self::IsoData => histogram::iso_data(hist),
            Self::Li => histogram::li(hist),
            Self::MaxEntropy => histogram::max_entropy(hist),
            Self::MaxLikelihood => histogram::max_likelihood(hist),
            Self::Mean => histogram::mean(hist),
            Self::MinError => histogram::min_error(hist),
            Self::Minimum => histogram::minimum(hist),
            Self::Moments => histogram::moments(hist),
            Self::Otsu => histogram::otsu(hist),
            Self::Percentile => histogram::percentile(hist),
            Self::RenyiEntropy => histogram::renyi_entropy(hist),
            Self::Rosin => histogram::rosin(hist),
            Self::Shanbhag => histogram::shanbhag(hist),
            Self::Triangle => histogram::triangle(hist),
            Self::Yen => histogram::yen(hist),
        }
    }
}

impl fmt::Display for ThresholdMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ThresholdMethod {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|m| m.name() == s)
            .ok_or_else(|| PipelineError::UnknownThresholdMethod(s.to_owned()))
    }
}

/// Trait for thresholding backends.
///
/// Input: a single-channel stack and a method. Output: one binary plane
/// per input plane, in the same order, with foreground pixels set to
/// [`FOREGROUND`] and background to 0.
pub trait Thresholder {
    /// Binarize every plane of `stack` with one global level.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::MissingCollaboratorOutput`] if the method
    /// cannot determine a level for this image.
    fn threshold(
        &self,
        stack: &Hyperstack,
        method: ThresholdMethod,
    ) -> Result<Vec<GrayImage>, PipelineError>;
}

/// Built-in thresholder working on a stack-wide 256-bin histogram.
#[derive(Debug, Clone, Copy, Default)]
pub struct HistogramThresholder;

impl Thresholder for HistogramThresholder {
    fn threshold(
        &self,
        stack: &Hyperstack,
        method: ThresholdMethod,
    ) -> Result<Vec<GrayImage>, PipelineError> {
        let binning = Binning::for_stack(stack);
        let hist = binning.histogram(stack);
        let level = method.select(&hist).ok_or_else(|| {
            PipelineError::MissingCollaboratorOutput(format!(
                "threshold method {method} found no level for {:?}",
                stack.title(),
            ))
        })?;
        log::debug!("threshold {method}: bin {level} of {BINS}");

        Ok(stack
            .planes()
            .iter()
            .map(|plane| {
                GrayImage::from_fn(plane.width(), plane.height(), |x, y| {
                    let bin = binning.bin(plane.get_pixel(x, y).0[0]);
                    image::Luma([if bin > level { FOREGROUND } else { 0 }])
                })
            })
            .collect())
    }
}

/// Maps sample values onto histogram bins.
///
/// 8-bit data maps one value per bin. 16-bit data is binned linearly over
/// the stack's own value range.
#[derive(Debug, Clone, Copy)]
struct Binning {
    min: u16,
    span: u32,
}

impl Binning {
    fn for_stack(stack: &Hyperstack) -> Self {
        match stack.bit_depth() {
            BitDepth::Eight => Self { min: 0, span: 256 },
            BitDepth::Sixteen => {
                let (min, max) = stack.value_range();
                Self {
                    min,
                    span: u32::from(max - min) + 1,
                }
            }
        }
    }

    fn bin(self, value: u16) -> usize {
        let offset = u64::from(value.saturating_sub(self.min));
        let bin = offset * BINS as u64 / u64::from(self.span);
        usize::try_from(bin).map_or(BINS - 1, |b| b.min(BINS - 1))
    }

    fn histogram(self, stack: &Hyperstack) -> Vec<u64> {
        let mut hist = vec![0_u64; BINS];
        for p in stack.planes().iter().flat_map(|plane| plane.pixels()) {
            hist[self.bin(p.0[0])] += 1;
        }
        hist
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::{Calibration, Gray16Image, StackDimensions};

    #[test]
    fn names_round_trip_through_from_str() {
        for method in ThresholdMethod::ALL {
            assert_eq!(method.name().parse::<ThresholdMethod>().unwrap(), method);
        }
    }

    #[test]
    fn unknown_name_is_rejected() {
        let result = "kmeans".parse::<ThresholdMethod>();
        assert!(matches!(
            result,
            Err(PipelineError::UnknownThresholdMethod(ref name)) if name == "kmeans"
        ));
    }

    #[test]
    fn names_are_case_sensitive() {
        assert!("Otsu".parse::<ThresholdMethod>().is_err());
        assert!("isodata".parse::<ThresholdMethod>().is_err());
    }

    #[test]
    fn serde_uses_method_names() {
        let json = serde_json::to_string(&ThresholdMethod::RenyiEntropy).unwrap();
        assert_eq!(json, "\"renyiEntropy\"");
        let back: ThresholdMethod = serde_json::from_str("\"ij1\"").unwrap();
        assert_eq!(back, ThresholdMethod::Ij1);
    }

    #[test]
    fn default_is_otsu() {
        assert_eq!(ThresholdMethod::default(), ThresholdMethod::Otsu);
    }

    /// Left half dark (20), right half bright (200).
    fn two_level_stack() -> Hyperstack {
        let plane = GrayImage::from_fn(20, 10, |x, _| {
            image::Luma([if x < 10 { 20 } else { 200 }])
        });
        Hyperstack::from_gray("two-level", &plane, Calibration::default())
    }

    #[test]
    fn otsu_separates_two_levels() {
        let planes = HistogramThresholder
            .threshold(&two_level_stack(), ThresholdMethod::Otsu)
            .unwrap();
        assert_eq!(planes.len(), 1);
        assert_eq!(planes[0].get_pixel(2, 2).0[0], 0);
        assert_eq!(planes[0].get_pixel(15, 2).0[0], FOREGROUND);
    }

    #[test]
    fn every_method_handles_two_levels() {
        // Two-valued data is degenerate for some methods; they must
        // either produce a binary plane or report a missing level.
        for method in ThresholdMethod::ALL {
            match HistogramThresholder.threshold(&two_level_stack(), method) {
                Ok(planes) => {
                    assert!(
                        planes[0].pixels().all(|p| p.0[0] == 0 || p.0[0] == FOREGROUND),
                        "{method} produced a non-binary plane",
                    );
                }
                Err(e) => {
                    assert!(
                        matches!(e, PipelineError::MissingCollaboratorOutput(_)),
                        "{method}: unexpected error {e}",
                    );
                }
            }
        }
    }

    #[test]
    fn sixteen_bit_data_is_binned_over_its_range() {
        let plane = Gray16Image::from_fn(20, 10, |x, _| {
            image::Luma([if x < 10 { 1000 } else { 40_000 }])
        });
        let stack = Hyperstack::new(
            "deep",
            StackDimensions::PLANE,
            BitDepth::Sixteen,
            Calibration::default(),
            vec![plane],
        )
        .unwrap();
        let planes = HistogramThresholder
            .threshold(&stack, ThresholdMethod::Otsu)
            .unwrap();
        assert_eq!(planes[0].get_pixel(0, 0).0[0], 0);
        assert_eq!(planes[0].get_pixel(19, 9).0[0], FOREGROUND);
    }

    #[test]
    fn one_level_covers_all_planes() {
        // Slice 0 is uniformly dim, slice 1 holds the bright structure.
        // A stack-wide level keeps slice 0 entirely background.
        let dim = GrayImage::from_pixel(8, 8, image::Luma([10]));
        let bright = GrayImage::from_fn(8, 8, |x, _| image::Luma([if x < 4 { 10 } else { 240 }]));
        let stack =
            Hyperstack::from_gray_slices("stack", vec![dim, bright], Calibration::default())
                .unwrap();
        let planes = HistogramThresholder
            .threshold(&stack, ThresholdMethod::Otsu)
            .unwrap();
        assert_eq!(planes.len(), 2);
        assert!(planes[0].pixels().all(|p| p.0[0] == 0));
        assert_eq!(planes[1].get_pixel(6, 0).0[0], FOREGROUND);
    }
}
