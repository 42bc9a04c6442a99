//! Ridge (line) detection as an alternative route from image to skeleton.
//!
//! The [`RidgeDetector`] trait is the collaborator contract: given the
//! active image of an [`AnalysisContext`], publish a binary image named
//! `"<title> Detected segments"` and optionally attach an overlay of the
//! detected lines to the input. [`ridge_skeleton`] drives it the way the
//! analysis expects: convert the input to 8-bit, detect, discard the
//! overlay, locate the output by name, and thin it.
//!
//! The built-in [`HessianRidgeDetector`] is a simplified Steger detector:
//!
//! 1. Gaussian smoothing with `sigma = line_width / (2 * sqrt(3)) + 0.5`.
//! 2. Per pixel, the Hessian's most negative eigenvalue as line strength
//!    (bright lines on a dark background).
//! 3. Non-maximum suppression across the line direction.
//! 4. Hysteresis between thresholds derived from the two contrasts.
//! 5. Removal of segments shorter than the minimum line length.

use std::collections::VecDeque;
use std::f64::consts::PI;

use image::{ImageBuffer, Luma};
use imageproc::filter::{filter_clamped, gaussian_blur_f32};
use imageproc::kernel::Kernel;
use serde::{Deserialize, Serialize};

use crate::context::AnalysisContext;
use crate::segment::Mask;
use crate::skeletonize::{Skeleton, Skeletonizer};
use crate::types::{FOREGROUND, GrayImage, Hyperstack, Overlay, OverlayLayer, PipelineError};

/// Suffix the detector appends to the input title to name its output.
pub const DETECTED_SEGMENTS_SUFFIX: &str = " Detected segments";

/// Title of the detector output for an input titled `title`.
#[must_use]
pub fn detected_segments_title(title: &str) -> String {
    format!("{title}{DETECTED_SEGMENTS_SUFFIX}")
}

/// Ridge detection parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RidgeParams {
    /// Contrast of the lines to seed detection from.
    pub high_contrast: i64,
    /// Contrast down to which detected lines are followed.
    pub low_contrast: i64,
    /// Expected line width in pixels.
    pub line_width: i64,
    /// Segments shorter than this many pixels are discarded.
    pub min_line_length: i64,
}

impl RidgeParams {
    /// Default high contrast.
    pub const DEFAULT_HIGH_CONTRAST: i64 = 75;
    /// Default low contrast.
    pub const DEFAULT_LOW_CONTRAST: i64 = 5;
    /// Default line width.
    pub const DEFAULT_LINE_WIDTH: i64 = 1;
    /// Default minimum line length.
    pub const DEFAULT_MIN_LINE_LENGTH: i64 = 3;

    /// Check that the parameters describe a usable detector.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidRidgeParams`] if the line width is
    /// not positive, a contrast or the length is negative, or the low
    /// contrast exceeds the high contrast.
    pub fn validate(&self) -> Result<(), PipelineError> {
        let fail = |msg: String| Err(PipelineError::InvalidRidgeParams(msg));
        if self.line_width <= 0 {
            return fail(format!("line width must be positive, got {}", self.line_width));
        }
        if self.high_contrast < 0 || self.low_contrast < 0 {
            return fail(format!(
                "contrasts must not be negative, got high={} low={}",
                self.high_contrast, self.low_contrast,
            ));
        }
        if self.low_contrast > self.high_contrast {
            return fail(format!(
                "low contrast {} exceeds high contrast {}",
                self.low_contrast, self.high_contrast,
            ));
        }
        if self.min_line_length < 0 {
            return fail(format!(
                "minimum line length must not be negative, got {}",
                self.min_line_length,
            ));
        }
        Ok(())
    }

    /// Smoothing scale for the configured line width.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn sigma(&self) -> f64 {
        self.line_width as f64 / (2.0 * 3.0_f64.sqrt()) + 0.5
    }

    /// Line-strength thresholds `(lower, upper)` for the two contrasts.
    ///
    /// A contrast `c` maps to the magnitude of the second derivative at
    /// the centre of a bar of height `c` and width `line_width` after
    /// smoothing, rounded down.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn thresholds(&self) -> (f64, f64) {
        let sigma = self.sigma();
        let half = self.line_width as f64 / 2.0;
        let scale = 2.0 * half / ((2.0 * PI).sqrt() * sigma.powi(3))
            * (-(half * half) / (2.0 * sigma * sigma)).exp();
        let lower = (self.low_contrast as f64 * scale).abs().floor();
        let upper = (self.high_contrast as f64 * scale).abs().floor();
        (lower, upper)
    }
}

impl Default for RidgeParams {
    fn default() -> Self {
        Self {
            high_contrast: Self::DEFAULT_HIGH_CONTRAST,
            low_contrast: Self::DEFAULT_LOW_CONTRAST,
            line_width: Self::DEFAULT_LINE_WIDTH,
            min_line_length: Self::DEFAULT_MIN_LINE_LENGTH,
        }
    }
}

/// Line detection collaborator.
pub trait RidgeDetector {
    /// Detect lines in the context's active image.
    ///
    /// Must publish a binary image titled
    /// [`detected_segments_title`]`(active title)` in `context`, with
    /// foreground on the detected lines.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::NoActiveImage`] without an active image,
    /// or any detector-specific failure.
    fn detect(
        &self,
        context: &mut AnalysisContext,
        params: &RidgeParams,
    ) -> Result<(), PipelineError>;
}

/// Build a skeleton from ridge detection on the active image.
///
/// The active image is converted to 8-bit in place before detection. Any
/// overlay the detector attaches is removed.
///
/// # Errors
///
/// Returns [`PipelineError::InvalidRidgeParams`] for unusable parameters,
/// [`PipelineError::NoActiveImage`] without an active image, and
/// [`PipelineError::MissingCollaboratorOutput`] if the detector did not
/// publish its output under the expected name.
pub fn ridge_skeleton(
    context: &mut AnalysisContext,
    params: &RidgeParams,
    detector: &dyn RidgeDetector,
    skeletonizer: &dyn Skeletonizer,
) -> Result<Skeleton, PipelineError> {
    params.validate()?;
    let image = context.require_active_mut()?;
    image.to_8bit();
    let title = image.title().to_owned();

    detector.detect(context, params)?;
    context.require_active_mut()?.remove_overlay();

    let name = detected_segments_title(&title);
    let segments = context.take_image(&name).ok_or_else(|| {
        PipelineError::MissingCollaboratorOutput(format!(
            "ridge detector published no image named {name:?}"
        ))
    })?;
    let planes = segments
        .gray_planes()
        .into_iter()
        .map(|p| binarize(&p))
        .collect();
    let mask = Mask::new(planes, segments.calibration().clone())?;
    Ok(skeletonizer.skeletonize(&mask))
}

fn binarize(plane: &GrayImage) -> GrayImage {
    GrayImage::from_fn(plane.width(), plane.height(), |x, y| {
        Luma([if plane.get_pixel(x, y).0[0] == 0 { 0 } else { FOREGROUND }])
    })
}

/// Built-in Hessian line detector for bright lines on a dark background.
#[derive(Debug, Clone, Copy, Default)]
pub struct HessianRidgeDetector;

impl RidgeDetector for HessianRidgeDetector {
    fn detect(
        &self,
        context: &mut AnalysisContext,
        params: &RidgeParams,
    ) -> Result<(), PipelineError> {
        let image = context.require_active()?;
        let channel = image.current_channel();
        let plane = image
            .duplicate_channel(channel)?
            .gray_planes()
            .into_iter()
            .next()
            .ok_or_else(|| PipelineError::InvalidImage("image has no planes".to_owned()))?;

        let lines = detect_lines(&plane, params);
        log::debug!(
            "ridge detection found {} line pixels",
            lines.pixels().filter(|p| p.0[0] != 0).count()
        );

        let output = Hyperstack::from_gray(
            detected_segments_title(image.title()),
            &lines,
            image.calibration().clone(),
        );
        let mut overlay = Overlay::default();
        overlay.add(OverlayLayer {
            image: lines,
            color: [255, 0, 0],
            opacity: 1.0,
        });

        context.publish(output);
        context.require_active_mut()?.set_overlay(overlay);
        Ok(())
    }
}

/// A single-channel `f32` plane.
type FloatImage = ImageBuffer<Luma<f32>, Vec<f32>>;

/// Second derivative along x.
const DXX_3X3: [f32; 9] = [0.0, 0.0, 0.0, 1.0, -2.0, 1.0, 0.0, 0.0, 0.0];
/// Second derivative along y.
const DYY_3X3: [f32; 9] = [0.0, 1.0, 0.0, 0.0, -2.0, 0.0, 0.0, 1.0, 0.0];
/// Mixed second derivative.
const DXY_3X3: [f32; 9] = [0.25, 0.0, -0.25, 0.0, 0.0, 0.0, -0.25, 0.0, 0.25];

/// Run the detector on one 8-bit plane, returning a binary line image.
#[must_use]
pub fn detect_lines(plane: &GrayImage, params: &RidgeParams) -> GrayImage {
    let (w, h) = plane.dimensions();
    if w == 0 || h == 0 {
        return GrayImage::new(w, h);
    }
    let float: FloatImage =
        ImageBuffer::from_fn(w, h, |x, y| Luma([f32::from(plane.get_pixel(x, y).0[0])]));
    #[allow(clippy::cast_possible_truncation)]
    let smoothed = gaussian_blur_f32(&float, params.sigma() as f32);
    let (lower, upper) = params.thresholds();

    let (strength, normals) = line_strength(&smoothed);
    let suppressed = suppress_non_maxima(&strength, &normals, w, h);
    let lines = hysteresis(&suppressed, w, h, lower, upper.max(lower));
    let min_len = u64::try_from(params.min_line_length).unwrap_or(0);
    remove_short_segments(&lines, min_len)
}

/// Line strength (negated smallest Hessian eigenvalue, clamped at 0) and
/// unit normal across the line at every pixel, in row-major order.
fn line_strength(smoothed: &FloatImage) -> (Vec<f64>, Vec<(f64, f64)>) {
    let rxx: FloatImage = filter_clamped(smoothed, Kernel::new(&DXX_3X3, 3, 3));
    let ryy: FloatImage = filter_clamped(smoothed, Kernel::new(&DYY_3X3, 3, 3));
    let rxy: FloatImage = filter_clamped(smoothed, Kernel::new(&DXY_3X3, 3, 3));

    rxx.pixels()
        .zip(ryy.pixels())
        .zip(rxy.pixels())
        .map(|((xx, yy), xy)| {
            let (rxx, ryy, rxy) = (f64::from(xx.0[0]), f64::from(yy.0[0]), f64::from(xy.0[0]));
            let mean = f64::midpoint(rxx, ryy);
            let diff = ((rxx - ryy) / 2.0).hypot(rxy);
            let lambda = mean - diff;
            // Eigenvector of `lambda` from the longer row of H - lambda I.
            let row_x = (lambda - ryy, rxy);
            let row_y = (rxy, lambda - rxx);
            let (vx, vy) = if row_x.0.hypot(row_x.1) >= row_y.0.hypot(row_y.1) {
                row_x
            } else {
                row_y
            };
            let norm = vx.hypot(vy);
            let normal = if norm > 0.0 {
                (vx / norm, vy / norm)
            } else {
                (1.0, 0.0)
            };
            ((-lambda).max(0.0), normal)
        })
        .unzip()
}

/// Keep only pixels whose strength is a maximum across the line.
fn suppress_non_maxima(strength: &[f64], normals: &[(f64, f64)], w: u32, h: u32) -> Vec<f64> {
    let (w, h) = (i64::from(w), i64::from(h));
    let get = |x: i64, y: i64| -> f64 {
        if x < 0 || y < 0 || x >= w || y >= h {
            0.0
        } else {
            usize::try_from(y * w + x).map_or(0.0, |i| strength[i])
        }
    };
    strength
        .iter()
        .zip(normals)
        .enumerate()
        .map(|(i, (&s, &(nx, ny)))| {
            let i = i64::try_from(i).unwrap_or(i64::MAX);
            let (x, y) = (i % w, i / w);
            #[allow(clippy::cast_possible_truncation)]
            let (dx, dy) = (nx.round() as i64, ny.round() as i64);
            if s > 0.0 && s >= get(x + dx, y + dy) && s >= get(x - dx, y - dy) {
                s
            } else {
                0.0
            }
        })
        .collect()
}

/// 8-connected hysteresis: seeds at or above `upper`, grown through
/// pixels at or above `lower`.
fn hysteresis(strength: &[f64], w: u32, h: u32, lower: f64, upper: f64) -> GrayImage {
    let mut out = GrayImage::new(w, h);
    let mut queue = VecDeque::new();
    for y in 0..h {
        for x in 0..w {
            let i = (y as usize) * (w as usize) + x as usize;
            if strength[i] <= 0.0 || strength[i] < upper || out.get_pixel(x, y).0[0] != 0 {
                continue;
            }
            out.put_pixel(x, y, Luma([FOREGROUND]));
            queue.push_back((x, y));
            while let Some((cx, cy)) = queue.pop_front() {
                for ny in cy.saturating_sub(1)..=(cy + 1).min(h - 1) {
                    for nx in cx.saturating_sub(1)..=(cx + 1).min(w - 1) {
                        let j = (ny as usize) * (w as usize) + nx as usize;
                        if strength[j] > 0.0
                            && strength[j] >= lower
                            && out.get_pixel(nx, ny).0[0] == 0
                        {
                            out.put_pixel(nx, ny, Luma([FOREGROUND]));
                            queue.push_back((nx, ny));
                        }
                    }
                }
            }
        }
    }
    out
}

/// Drop 8-connected segments with fewer than `min_len` pixels.
fn remove_short_segments(lines: &GrayImage, min_len: u64) -> GrayImage {
    use imageproc::region_labelling::{Connectivity, connected_components};

    let labels = connected_components(lines, Connectivity::Eight, Luma([0u8]));
    let mut sizes: Vec<u64> = Vec::new();
    for p in labels.pixels() {
        let label = p.0[0] as usize;
        if label >= sizes.len() {
            sizes.resize(label + 1, 0);
        }
        sizes[label] += 1;
    }
    GrayImage::from_fn(lines.width(), lines.height(), |x, y| {
        let label = labels.get_pixel(x, y).0[0] as usize;
        let keep = label != 0 && sizes.get(label).is_some_and(|&n| n >= min_len);
        Luma([if keep { FOREGROUND } else { 0 }])
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::skeletonize::SkeletonizerKind;
    use crate::types::Calibration;

    /// A dark image with a bright horizontal line `width` pixels wide.
    fn line_image(width: u32) -> GrayImage {
        GrayImage::from_fn(60, 31, |x, y| {
            let on = (10..50).contains(&x) && (15..15 + width).contains(&y);
            Luma([if on { 200 } else { 10 }])
        })
    }

    #[test]
    fn defaults_match_documented_values() {
        let p = RidgeParams::default();
        assert_eq!(
            (p.high_contrast, p.low_contrast, p.line_width, p.min_line_length),
            (75, 5, 1, 3)
        );
        assert!(p.validate().is_ok());
    }

    #[test]
    fn validate_rejects_bad_parameters() {
        let bad = [
            RidgeParams {
                line_width: 0,
                ..RidgeParams::default()
            },
            RidgeParams {
                low_contrast: -1,
                ..RidgeParams::default()
            },
            RidgeParams {
                low_contrast: 80,
                ..RidgeParams::default()
            },
            RidgeParams {
                min_line_length: -2,
                ..RidgeParams::default()
            },
        ];
        for p in bad {
            assert!(
                matches!(p.validate(), Err(PipelineError::InvalidRidgeParams(_))),
                "{p:?}"
            );
        }
    }

    #[test]
    fn sigma_follows_line_width() {
        let p = RidgeParams {
            line_width: 4,
            ..RidgeParams::default()
        };
        assert!((p.sigma() - (4.0 / (2.0 * 3.0_f64.sqrt()) + 0.5)).abs() < 1e-12);
    }

    #[test]
    fn thresholds_are_ordered() {
        let (lower, upper) = RidgeParams::default().thresholds();
        assert!(lower <= upper);
        assert!(upper > 0.0);
    }

    #[test]
    fn detects_a_bright_line() {
        let lines = detect_lines(&line_image(1), &RidgeParams::default());
        let on_line = (15..45).filter(|&x| lines.get_pixel(x, 15).0[0] != 0).count();
        assert!(on_line > 20, "only {on_line} line pixels found");
        // Far from the line nothing is detected.
        assert!((0..60).all(|x| lines.get_pixel(x, 2).0[0] == 0));
    }

    #[test]
    fn line_strength_peaks_across_the_line() {
        let plane = line_image(1);
        let float: FloatImage =
            ImageBuffer::from_fn(60, 31, |x, y| Luma([f32::from(plane.get_pixel(x, y).0[0])]));
        let smoothed = gaussian_blur_f32(&float, 1.0);
        let (strength, normals) = line_strength(&smoothed);
        let at = |x: usize, y: usize| y * 60 + x;

        assert!(strength[at(30, 15)] > strength[at(30, 13)]);
        assert!(strength[at(30, 15)] > 0.0);
        let (nx, ny) = normals[at(30, 15)];
        assert!(nx.abs() < 1e-3 && (ny.abs() - 1.0).abs() < 1e-3);
        assert!(strength[at(30, 2)] < 1e-3);
    }

    #[test]
    fn flat_image_has_no_lines() {
        let flat = GrayImage::from_pixel(20, 20, Luma([90]));
        let lines = detect_lines(&flat, &RidgeParams::default());
        assert!(lines.pixels().all(|p| p.0[0] == 0));
    }

    #[test]
    fn short_segments_are_removed() {
        let mut lines = GrayImage::new(20, 5);
        lines.put_pixel(1, 1, Luma([FOREGROUND]));
        lines.put_pixel(2, 1, Luma([FOREGROUND]));
        for x in 5..15 {
            lines.put_pixel(x, 3, Luma([FOREGROUND]));
        }
        let kept = remove_short_segments(&lines, 3);
        assert_eq!(kept.get_pixel(1, 1).0[0], 0);
        assert_eq!(kept.get_pixel(10, 3).0[0], FOREGROUND);
    }

    #[test]
    fn ridge_skeleton_removes_overlay_and_finds_output() {
        let image = Hyperstack::from_gray("cells", &line_image(1), Calibration::default());
        let mut context = AnalysisContext::with_image(image);
        let skeleton = ridge_skeleton(
            &mut context,
            &RidgeParams::default(),
            &HessianRidgeDetector,
            &SkeletonizerKind::GuoHall,
        )
        .unwrap();
        assert!(skeleton.voxel_count() > 0);
        assert!(context.require_active().unwrap().overlay().is_none());
        assert!(context.image("cells Detected segments").is_none());
    }

    struct SilentDetector;

    impl RidgeDetector for SilentDetector {
        fn detect(
            &self,
            _context: &mut AnalysisContext,
            _params: &RidgeParams,
        ) -> Result<(), PipelineError> {
            Ok(())
        }
    }

    #[test]
    fn missing_detector_output_is_reported() {
        let image = Hyperstack::from_gray("cells", &line_image(1), Calibration::default());
        let mut context = AnalysisContext::with_image(image);
        let result = ridge_skeleton(
            &mut context,
            &RidgeParams::default(),
            &SilentDetector,
            &SkeletonizerKind::GuoHall,
        );
        assert!(matches!(
            result,
            Err(PipelineError::MissingCollaboratorOutput(_))
        ));
    }
}
