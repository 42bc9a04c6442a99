//! Shared types for the mina analysis pipeline.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::script::ScriptError;

/// Re-export `GrayImage` so downstream crates can reference binary
/// planes without depending on `image` directly.
pub use image::GrayImage;

/// Re-export `RgbaImage` for composited overlays.
pub use image::RgbaImage;

/// A single 16-bit grayscale plane. 8-bit stacks use the same storage
/// with values limited to `0..=255`.
pub type Gray16Image = image::ImageBuffer<image::Luma<u16>, Vec<u16>>;

/// Pixel value used for foreground in binary planes.
pub const FOREGROUND: u8 = 255;

/// Physical size of one voxel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    /// Width of one pixel in `unit`s.
    pub pixel_width: f64,
    /// Height of one pixel in `unit`s.
    pub pixel_height: f64,
    /// Slice thickness in `unit`s.
    pub pixel_depth: f64,
    /// Name of the physical unit (e.g. `"micron"`).
    pub unit: String,
}

impl Calibration {
    /// Physical area covered by one pixel.
    #[must_use]
    pub fn pixel_area(&self) -> f64 {
        self.pixel_width * self.pixel_height
    }
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            pixel_width: 1.0,
            pixel_height: 1.0,
            pixel_depth: 1.0,
            unit: "pixel".to_owned(),
        }
    }
}

/// Sample bit depth of a [`Hyperstack`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BitDepth {
    /// Values in `0..=255`.
    Eight,
    /// Values in `0..=65535`.
    Sixteen,
}

/// Channel, slice, and frame counts of a [`Hyperstack`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackDimensions {
    /// Number of channels.
    pub channels: usize,
    /// Number of Z slices.
    pub slices: usize,
    /// Number of time frames.
    pub frames: usize,
}

impl StackDimensions {
    /// A single plane: one channel, one slice, one frame.
    pub const PLANE: Self = Self {
        channels: 1,
        slices: 1,
        frames: 1,
    };

    /// Total number of planes.
    #[must_use]
    pub const fn plane_count(self) -> usize {
        self.channels * self.slices * self.frames
    }
}

/// A calibrated multi-dimensional image: the input of one analysis run.
///
/// Planes are stored channel-fastest, then slice, then frame. All planes
/// share the same width and height.
#[derive(Debug, Clone)]
pub struct Hyperstack {
    title: String,
    width: u32,
    height: u32,
    dimensions: StackDimensions,
    current_channel: usize,
    bit_depth: BitDepth,
    calibration: Calibration,
    planes: Vec<Gray16Image>,
    overlay: Option<Overlay>,
}

impl Hyperstack {
    /// Assemble a hyperstack from its planes.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidImage`] if there are no planes, the
    /// plane count does not match `dimensions`, or the planes differ in
    /// size.
    pub fn new(
        title: impl Into<String>,
        dimensions: StackDimensions,
        bit_depth: BitDepth,
        calibration: Calibration,
        planes: Vec<Gray16Image>,
    ) -> Result<Self, PipelineError> {
        let Some(first) = planes.first() else {
            return Err(PipelineError::InvalidImage("image has no planes".to_owned()));
        };
        if planes.len() != dimensions.plane_count() {
            return Err(PipelineError::InvalidImage(format!(
                "expected {} planes for {} channel(s) x {} slice(s) x {} frame(s), got {}",
                dimensions.plane_count(),
                dimensions.channels,
                dimensions.slices,
                dimensions.frames,
                planes.len(),
            )));
        }
        let (width, height) = first.dimensions();
        if planes.iter().any(|p| p.dimensions() != (width, height)) {
            return Err(PipelineError::InvalidImage(
                "all planes must have the same width and height".to_owned(),
            ));
        }
        Ok(Self {
            title: title.into(),
            width,
            height,
            dimensions,
            current_channel: 0,
            bit_depth,
            calibration,
            planes,
            overlay: None,
        })
    }

    /// Build a single-channel 8-bit stack from grayscale slices.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidImage`] if `slices` is empty or the
    /// slices differ in size.
    pub fn from_gray_slices(
        title: impl Into<String>,
        slices: Vec<GrayImage>,
        calibration: Calibration,
    ) -> Result<Self, PipelineError> {
        let dimensions = StackDimensions {
            channels: 1,
            slices: slices.len(),
            frames: 1,
        };
        let planes = slices.iter().map(widen).collect();
        Self::new(title, dimensions, BitDepth::Eight, calibration, planes)
    }

    /// Build a single-plane 8-bit image.
    #[must_use]
    pub fn from_gray(title: impl Into<String>, plane: &GrayImage, calibration: Calibration) -> Self {
        let (width, height) = plane.dimensions();
        Self {
            title: title.into(),
            width,
            height,
            dimensions: StackDimensions::PLANE,
            current_channel: 0,
            bit_depth: BitDepth::Eight,
            calibration,
            planes: vec![widen(plane)],
            overlay: None,
        }
    }

    /// Image title.
    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    /// Replace the image title.
    pub fn set_title(&mut self, title: impl Into<String>) {
        self.title = title.into();
    }

    /// Plane width in pixels.
    #[must_use]
    pub const fn width(&self) -> u32 {
        self.width
    }

    /// Plane height in pixels.
    #[must_use]
    pub const fn height(&self) -> u32 {
        self.height
    }

    /// Channel, slice, and frame counts.
    #[must_use]
    pub const fn dimensions(&self) -> StackDimensions {
        self.dimensions
    }

    /// Number of Z slices.
    #[must_use]
    pub const fn slices(&self) -> usize {
        self.dimensions.slices
    }

    /// Number of time frames.
    #[must_use]
    pub const fn frames(&self) -> usize {
        self.dimensions.frames
    }

    /// Zero-based index of the channel being analyzed.
    #[must_use]
    pub const fn current_channel(&self) -> usize {
        self.current_channel
    }

    /// Select the channel to analyze.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidImage`] if `channel` is out of range.
    pub fn set_current_channel(&mut self, channel: usize) -> Result<(), PipelineError> {
        if channel >= self.dimensions.channels {
            return Err(PipelineError::InvalidImage(format!(
                "channel {} out of range (image has {})",
                channel + 1,
                self.dimensions.channels,
            )));
        }
        self.current_channel = channel;
        Ok(())
    }

    /// Sample bit depth.
    #[must_use]
    pub const fn bit_depth(&self) -> BitDepth {
        self.bit_depth
    }

    /// Voxel calibration.
    #[must_use]
    pub const fn calibration(&self) -> &Calibration {
        &self.calibration
    }

    /// All planes in storage order.
    #[must_use]
    pub fn planes(&self) -> &[Gray16Image] {
        &self.planes
    }

    /// The plane at (channel, slice, frame), all zero-based.
    #[must_use]
    pub fn plane(&self, channel: usize, slice: usize, frame: usize) -> Option<&Gray16Image> {
        let d = self.dimensions;
        if channel >= d.channels || slice >= d.slices || frame >= d.frames {
            return None;
        }
        self.planes
            .get(channel + d.channels * (slice + d.slices * frame))
    }

    /// The overlay currently attached to this image, if any.
    #[must_use]
    pub const fn overlay(&self) -> Option<&Overlay> {
        self.overlay.as_ref()
    }

    /// Attach an overlay, replacing any existing one.
    pub fn set_overlay(&mut self, overlay: Overlay) {
        self.overlay = Some(overlay);
    }

    /// Detach the overlay, returning it.
    pub const fn remove_overlay(&mut self) -> Option<Overlay> {
        self.overlay.take()
    }

    /// Copy one channel across every slice and frame into a new
    /// single-channel stack with the same calibration.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidImage`] if `channel` is out of range.
    pub fn duplicate_channel(&self, channel: usize) -> Result<Self, PipelineError> {
        let d = self.dimensions;
        if channel >= d.channels {
            return Err(PipelineError::InvalidImage(format!(
                "channel {} out of range (image has {})",
                channel + 1,
                d.channels,
            )));
        }
        let planes: Vec<Gray16Image> = self
            .planes
            .iter()
            .skip(channel)
            .step_by(d.channels)
            .cloned()
            .collect();
        Self::new(
            self.title.clone(),
            StackDimensions {
                channels: 1,
                slices: d.slices,
                frames: d.frames,
            },
            self.bit_depth,
            self.calibration.clone(),
            planes,
        )
    }

    /// Convert to 8-bit in place.
    ///
    /// 16-bit data is scaled linearly from the stack's minimum and maximum
    /// to `0..=255`. 8-bit data is left untouched.
    pub fn to_8bit(&mut self) {
        if self.bit_depth == BitDepth::Eight {
            return;
        }
        let (min, max) = self.value_range();
        let span = u32::from(max - min) + 1;
        for plane in &mut self.planes {
            for p in plane.pixels_mut() {
                let scaled = (u32::from(p.0[0] - min) * 256) / span;
                p.0[0] = u16::try_from(scaled.min(255)).unwrap_or(255);
            }
        }
        self.bit_depth = BitDepth::Eight;
    }

    /// Minimum and maximum sample values over all planes.
    #[must_use]
    pub fn value_range(&self) -> (u16, u16) {
        let mut min = u16::MAX;
        let mut max = u16::MIN;
        for p in self.planes.iter().flat_map(|plane| plane.pixels()) {
            min = min.min(p.0[0]);
            max = max.max(p.0[0]);
        }
        if min > max { (0, 0) } else { (min, max) }
    }

    /// The planes as 8-bit images, converting a copy when the data is
    /// 16-bit.
    #[must_use]
    pub fn gray_planes(&self) -> Vec<GrayImage> {
        if self.bit_depth == BitDepth::Eight {
            return self.planes.iter().map(narrow).collect();
        }
        let mut copy = self.clone();
        copy.to_8bit();
        copy.planes.iter().map(narrow).collect()
    }
}

/// Non-zero pixels over a set of binary planes.
pub(crate) fn count_foreground(planes: &[GrayImage]) -> u64 {
    planes
        .iter()
        .flat_map(|p| p.pixels())
        .map(|p| u64::from(p.0[0] != 0))
        .sum()
}

/// Widen an 8-bit plane into 16-bit storage without rescaling.
#[must_use]
pub fn widen(plane: &GrayImage) -> Gray16Image {
    Gray16Image::from_fn(plane.width(), plane.height(), |x, y| {
        image::Luma([u16::from(plane.get_pixel(x, y).0[0])])
    })
}

/// Narrow 16-bit storage holding 8-bit values back to an 8-bit plane.
fn narrow(plane: &Gray16Image) -> GrayImage {
    GrayImage::from_fn(plane.width(), plane.height(), |x, y| {
        image::Luma([u8::try_from(plane.get_pixel(x, y).0[0]).unwrap_or(u8::MAX)])
    })
}

/// One overlay layer: a binary plane drawn in a single colour.
///
/// Zero pixels are transparent; non-zero pixels are drawn in `color` at
/// `opacity`.
#[derive(Debug, Clone, PartialEq)]
pub struct OverlayLayer {
    /// Binary plane, same size as the image it overlays.
    pub image: GrayImage,
    /// RGB colour of non-zero pixels.
    pub color: [u8; 3],
    /// Opacity in `0.0..=1.0`.
    pub opacity: f32,
}

/// Non-destructive annotations drawn over an image, bottom layer first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Overlay {
    layers: Vec<OverlayLayer>,
}

impl Overlay {
    /// Magenta, used for the segmentation mask.
    pub const MAGENTA: [u8; 3] = [255, 0, 255];
    /// Green, used for the skeleton.
    pub const GREEN: [u8; 3] = [0, 255, 0];

    /// Add a layer on top.
    pub fn add(&mut self, layer: OverlayLayer) {
        self.layers.push(layer);
    }

    /// All layers, bottom first.
    #[must_use]
    pub fn layers(&self) -> &[OverlayLayer] {
        &self.layers
    }
}

/// Errors that can occur during an analysis run.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// The threshold method name is not one of the supported methods.
    #[error("unknown threshold method: {0:?}")]
    UnknownThresholdMethod(String),

    /// Ridge detection parameters are out of range.
    #[error("invalid ridge detection parameters: {0}")]
    InvalidRidgeParams(String),

    /// The image is malformed or inconsistent.
    #[error("invalid image: {0}")]
    InvalidImage(String),

    /// The analysis context has no active image.
    #[error("there is no active image")]
    NoActiveImage,

    /// A collaborator produced no usable output (no graphs, no branches,
    /// no threshold level, or a missing named image).
    #[error("missing collaborator output: {0}")]
    MissingCollaboratorOutput(String),

    /// A pre- or post-processing script failed.
    #[error(transparent)]
    Script(#[from] ScriptError),

    /// A result row was assembled without one of the fixed output keys.
    #[error("output parameter {0:?} was not computed")]
    MissingOutputParameter(String),

    /// The batch driver could not find a named output of a run.
    #[error("run produced no output named {0:?}")]
    MissingOutputColumn(String),

    /// A batch job's image could not be loaded.
    #[error("failed to load image {}: {reason}", path.display())]
    ImageLoad {
        /// Path of the image.
        path: PathBuf,
        /// Why loading failed.
        reason: String,
    },
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn plane16(width: u32, height: u32, value: u16) -> Gray16Image {
        Gray16Image::from_pixel(width, height, image::Luma([value]))
    }

    #[test]
    fn new_rejects_empty_planes() {
        let result = Hyperstack::new(
            "empty",
            StackDimensions::PLANE,
            BitDepth::Eight,
            Calibration::default(),
            Vec::new(),
        );
        assert!(matches!(result, Err(PipelineError::InvalidImage(_))));
    }

    #[test]
    fn count_foreground_sums_all_planes() {
        let mut img = GrayImage::new(10, 10);
        for i in 0..5 {
            img.put_pixel(i, 0, image::Luma([255]));
        }
        assert_eq!(count_foreground(&[img.clone(), img]), 10);
    }

    #[test]
    fn new_rejects_plane_count_mismatch() {
        let dims = StackDimensions {
            channels: 2,
            slices: 2,
            frames: 1,
        };
        let planes = vec![plane16(4, 4, 0); 3];
        let result = Hyperstack::new("x", dims, BitDepth::Eight, Calibration::default(), planes);
        assert!(matches!(result, Err(PipelineError::InvalidImage(_))));
    }

    #[test]
    fn new_rejects_mixed_plane_sizes() {
        let dims = StackDimensions {
            channels: 1,
            slices: 2,
            frames: 1,
        };
        let planes = vec![plane16(4, 4, 0), plane16(5, 4, 0)];
        let result = Hyperstack::new("x", dims, BitDepth::Eight, Calibration::default(), planes);
        assert!(matches!(result, Err(PipelineError::InvalidImage(_))));
    }

    #[test]
    fn duplicate_channel_picks_every_nth_plane() {
        let dims = StackDimensions {
            channels: 2,
            slices: 3,
            frames: 1,
        };
        // Channel 0 planes hold 10 + slice, channel 1 planes hold 20 + slice.
        let planes = (0..3)
            .flat_map(|z| [plane16(2, 2, 10 + z), plane16(2, 2, 20 + z)])
            .collect();
        let stack = Hyperstack::new("c", dims, BitDepth::Sixteen, Calibration::default(), planes)
            .unwrap();

        let second = stack.duplicate_channel(1).unwrap();
        assert_eq!(second.dimensions().channels, 1);
        assert_eq!(second.slices(), 3);
        let values: Vec<u16> = second
            .planes()
            .iter()
            .map(|p| p.get_pixel(0, 0).0[0])
            .collect();
        assert_eq!(values, vec![20, 21, 22]);
        assert!(matches!(
            stack.duplicate_channel(2),
            Err(PipelineError::InvalidImage(_))
        ));
    }

    #[test]
    fn plane_indexing_is_channel_fastest() {
        let dims = StackDimensions {
            channels: 2,
            slices: 2,
            frames: 2,
        };
        let planes = (0..8).map(|i| plane16(1, 1, i)).collect();
        let stack = Hyperstack::new("p", dims, BitDepth::Sixteen, Calibration::default(), planes)
            .unwrap();
        assert_eq!(stack.plane(1, 0, 0).unwrap().get_pixel(0, 0).0[0], 1);
        assert_eq!(stack.plane(0, 1, 0).unwrap().get_pixel(0, 0).0[0], 2);
        assert_eq!(stack.plane(0, 0, 1).unwrap().get_pixel(0, 0).0[0], 4);
        assert!(stack.plane(0, 2, 0).is_none());
    }

    #[test]
    fn to_8bit_scales_sixteen_bit_range() {
        let mut plane = plane16(2, 1, 1000);
        plane.put_pixel(1, 0, image::Luma([5000]));
        let mut stack = Hyperstack::new(
            "s",
            StackDimensions::PLANE,
            BitDepth::Sixteen,
            Calibration::default(),
            vec![plane],
        )
        .unwrap();

        stack.to_8bit();
        assert_eq!(stack.bit_depth(), BitDepth::Eight);
        assert_eq!(stack.planes()[0].get_pixel(0, 0).0[0], 0);
        assert_eq!(stack.planes()[0].get_pixel(1, 0).0[0], 255);
    }

    #[test]
    fn to_8bit_leaves_eight_bit_untouched() {
        let plane = GrayImage::from_pixel(3, 3, image::Luma([77]));
        let mut stack = Hyperstack::from_gray("g", &plane, Calibration::default());
        stack.to_8bit();
        assert_eq!(stack.gray_planes()[0], plane);
    }

    #[test]
    fn overlay_can_be_attached_and_removed() {
        let plane = GrayImage::new(2, 2);
        let mut stack = Hyperstack::from_gray("o", &plane, Calibration::default());
        let mut overlay = Overlay::default();
        overlay.add(OverlayLayer {
            image: plane,
            color: Overlay::GREEN,
            opacity: 1.0,
        });
        stack.set_overlay(overlay);
        assert_eq!(stack.overlay().map(|o| o.layers().len()), Some(1));
        assert!(stack.remove_overlay().is_some());
        assert!(stack.overlay().is_none());
    }

    #[test]
    fn pixel_area_uses_width_and_height() {
        let cal = Calibration {
            pixel_width: 0.5,
            pixel_height: 0.25,
            pixel_depth: 2.0,
            unit: "micron".to_owned(),
        };
        assert!((cal.pixel_area() - 0.125).abs() < 1e-12);
    }
}
