//! Segmentation: binarize the analyzed channel and measure its footprint.
//!
//! The [`Thresholder`] produces raw binary planes; this stage re-attaches
//! the source calibration and plane geometry so no voxel size is lost,
//! then measures the footprint.
//!
//! # Footprint
//!
//! For a single plane the footprint is `area * area_fraction / 100`. For
//! more than one plane the per-plane products are summed and the sum is
//! multiplied by the slice thickness, turning a stack of planar areas
//! into a volume. The single-plane case is deliberately not scaled by
//! depth.

use serde::{Deserialize, Serialize};

use crate::threshold::{ThresholdMethod, Thresholder};
use crate::types::{
    Calibration, FOREGROUND, GrayImage, Hyperstack, PipelineError, count_foreground,
};

/// Area and foreground percentage of one binary plane.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlaneMeasurement {
    /// Physical area of the whole plane.
    pub area: f64,
    /// Percentage (`0.0..=100.0`) of the plane's pixels that are foreground.
    pub area_fraction: f64,
}

impl PlaneMeasurement {
    /// Foreground area of this plane.
    #[must_use]
    pub fn foreground_area(self) -> f64 {
        self.area * self.area_fraction / 100.0
    }
}

/// Combine per-plane measurements into the footprint.
///
/// Returns 0.0 for an empty slice.
#[must_use]
pub fn footprint(planes: &[PlaneMeasurement], pixel_depth: f64) -> f64 {
    match planes {
        [] => 0.0,
        [single] => single.foreground_area(),
        many => many.iter().map(|m| m.foreground_area()).sum::<f64>() * pixel_depth,
    }
}

/// A binary segmentation of the analyzed channel.
///
/// Foreground pixels are [`FOREGROUND`], background pixels are 0. The
/// planes keep the order of the source channel (slices, then frames).
#[derive(Debug, Clone, PartialEq)]
pub struct Mask {
    planes: Vec<GrayImage>,
    calibration: Calibration,
}

impl Mask {
    /// Wrap binary planes with their calibration.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidImage`] if there are no planes or
    /// the planes differ in size.
    pub fn new(planes: Vec<GrayImage>, calibration: Calibration) -> Result<Self, PipelineError> {
        let Some(first) = planes.first() else {
            return Err(PipelineError::InvalidImage("mask has no planes".to_owned()));
        };
        let size = first.dimensions();
        if planes.iter().any(|p| p.dimensions() != size) {
            return Err(PipelineError::InvalidImage(
                "mask planes must have the same width and height".to_owned(),
            ));
        }
        Ok(Self {
            planes,
            calibration,
        })
    }

    /// The binary planes.
    #[must_use]
    pub fn planes(&self) -> &[GrayImage] {
        &self.planes
    }

    /// Number of planes.
    #[must_use]
    pub fn slices(&self) -> usize {
        self.planes.len()
    }

    /// Voxel calibration, copied from the source image.
    #[must_use]
    pub const fn calibration(&self) -> &Calibration {
        &self.calibration
    }

    /// Total foreground voxels across all planes.
    #[must_use]
    pub fn foreground_voxels(&self) -> u64 {
        count_foreground(&self.planes)
    }

    /// Area and area fraction of every plane.
    #[must_use]
    pub fn measure_planes(&self) -> Vec<PlaneMeasurement> {
        self.planes
            .iter()
            .map(|plane| {
                let pixels = u64::from(plane.width()) * u64::from(plane.height());
                let foreground: u64 = plane.pixels().map(|p| u64::from(p.0[0] != 0)).sum();
                #[allow(clippy::cast_precision_loss)]
                let (pixels, foreground) = (pixels as f64, foreground as f64);
                PlaneMeasurement {
                    area: pixels * self.calibration.pixel_area(),
                    area_fraction: if pixels > 0.0 {
                        foreground / pixels * 100.0
                    } else {
                        0.0
                    },
                }
            })
            .collect()
    }

    /// The occupied area (one plane) or volume (several planes).
    #[must_use]
    pub fn footprint(&self) -> f64 {
        footprint(&self.measure_planes(), self.calibration.pixel_depth)
    }
}

/// Binarize a single-channel stack with the chosen method.
///
/// # Errors
///
/// Propagates the thresholder's error. Returns
/// [`PipelineError::MissingCollaboratorOutput`] if the thresholder
/// returns a different number of planes than it was given.
pub fn segment(
    channel: &Hyperstack,
    method: ThresholdMethod,
    thresholder: &dyn Thresholder,
) -> Result<Mask, PipelineError> {
    let planes = thresholder.threshold(channel, method)?;
    if planes.len() != channel.planes().len() {
        return Err(PipelineError::MissingCollaboratorOutput(format!(
            "thresholder returned {} planes for {} input planes",
            planes.len(),
            channel.planes().len(),
        )));
    }
    let planes = planes
        .into_iter()
        .map(|plane| {
            GrayImage::from_fn(plane.width(), plane.height(), |x, y| {
                image::Luma([if plane.get_pixel(x, y).0[0] == 0 { 0 } else { FOREGROUND }])
            })
        })
        .collect();
    Mask::new(planes, channel.calibration().clone())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::threshold::HistogramThresholder;

    #[test]
    fn single_plane_footprint_is_area_times_fraction() {
        let planes = [PlaneMeasurement {
            area: 100.0,
            area_fraction: 50.0,
        }];
        assert!((footprint(&planes, 0.2) - 50.0).abs() < 1e-12);
    }

    #[test]
    fn multi_plane_footprint_is_scaled_by_depth() {
        let plane = PlaneMeasurement {
            area: 100.0,
            area_fraction: 50.0,
        };
        assert!((footprint(&[plane, plane], 0.2) - 20.0).abs() < 1e-12);
    }

    #[test]
    fn empty_footprint_is_zero() {
        assert!(footprint(&[], 3.0).abs() < f64::EPSILON);
    }

    fn calibration(pw: f64, ph: f64, pd: f64) -> Calibration {
        Calibration {
            pixel_width: pw,
            pixel_height: ph,
            pixel_depth: pd,
            unit: "micron".to_owned(),
        }
    }

    #[test]
    fn mask_measures_calibrated_area() {
        // 10x10 plane, 25 foreground pixels, 0.5 x 0.5 pixels.
        let plane = GrayImage::from_fn(10, 10, |x, y| {
            image::Luma([if x < 5 && y < 5 { FOREGROUND } else { 0 }])
        });
        let mask = Mask::new(vec![plane], calibration(0.5, 0.5, 1.0)).unwrap();
        let m = mask.measure_planes();
        assert_eq!(m.len(), 1);
        assert!((m[0].area - 25.0).abs() < 1e-12);
        assert!((m[0].area_fraction - 25.0).abs() < 1e-12);
        assert!((mask.footprint() - 6.25).abs() < 1e-12);
        assert_eq!(mask.foreground_voxels(), 25);
    }

    #[test]
    fn stacked_mask_footprint_is_a_volume() {
        let full = GrayImage::from_pixel(4, 4, image::Luma([FOREGROUND]));
        let half = GrayImage::from_fn(4, 4, |x, _| {
            image::Luma([if x < 2 { FOREGROUND } else { 0 }])
        });
        let mask = Mask::new(vec![full, half], calibration(1.0, 1.0, 0.5)).unwrap();
        // (16 + 8) pixels * 0.5 depth.
        assert!((mask.footprint() - 12.0).abs() < 1e-12);
    }

    #[test]
    fn mask_rejects_empty_planes() {
        assert!(matches!(
            Mask::new(Vec::new(), Calibration::default()),
            Err(PipelineError::InvalidImage(_))
        ));
    }

    #[test]
    fn segment_keeps_calibration() {
        let cal = calibration(0.1, 0.2, 0.3);
        let plane = GrayImage::from_fn(8, 8, |x, _| image::Luma([if x < 4 { 0 } else { 200 }]));
        let channel = Hyperstack::from_gray("cells", &plane, cal.clone());
        let mask = segment(&channel, ThresholdMethod::Otsu, &HistogramThresholder).unwrap();
        assert_eq!(mask.calibration(), &cal);
        assert_eq!(mask.slices(), 1);
        assert_eq!(mask.foreground_voxels(), 32);
    }

    struct DroppingThresholder;

    impl Thresholder for DroppingThresholder {
        fn threshold(
            &self,
            _stack: &Hyperstack,
            _method: ThresholdMethod,
        ) -> Result<Vec<GrayImage>, PipelineError> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn segment_rejects_missing_planes() {
        let channel = Hyperstack::from_gray("x", &GrayImage::new(2, 2), Calibration::default());
        let result = segment(&channel, ThresholdMethod::Otsu, &DroppingThresholder);
        assert!(matches!(
            result,
            Err(PipelineError::MissingCollaboratorOutput(_))
        ));
    }
}
