//! Overlay compositing.
//!
//! Draws the layers of an [`Overlay`] over a grayscale plane, bottom
//! layer first. Zero pixels of a layer are transparent; non-zero pixels
//! are blended in the layer's colour at the layer's opacity.

use mina_pipeline::types::{GrayImage, RgbaImage};
use mina_pipeline::{Hyperstack, Overlay};

/// Composite `overlay` over `base`.
///
/// Layer pixels outside `base` are ignored.
#[must_use]
pub fn composite(base: &GrayImage, overlay: &Overlay) -> RgbaImage {
    let mut out = RgbaImage::from_fn(base.width(), base.height(), |x, y| {
        let v = base.get_pixel(x, y).0[0];
        image::Rgba([v, v, v, 255])
    });

    for layer in overlay.layers() {
        let alpha = layer.opacity.clamp(0.0, 1.0);
        for (x, y, p) in layer.image.enumerate_pixels() {
            if p.0[0] == 0 {
                continue;
            }
            let Some(dst) = out.get_pixel_mut_checked(x, y) else {
                continue;
            };
            for (channel, &color) in dst.0.iter_mut().zip(&layer.color) {
                *channel = blend(*channel, color, alpha);
            }
        }
    }
    out
}

/// Render the overlay attached to `image` over its current channel's
/// first plane, or `None` if the image carries no overlay.
#[must_use]
pub fn render_overlay(image: &Hyperstack) -> Option<RgbaImage> {
    let overlay = image.overlay()?;
    let base = image
        .duplicate_channel(image.current_channel())
        .ok()?
        .gray_planes()
        .into_iter()
        .next()?;
    Some(composite(&base, overlay))
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn blend(under: u8, over: u8, alpha: f32) -> u8 {
    let v = f32::from(under).mul_add(1.0 - alpha, f32::from(over) * alpha);
    v.round().clamp(0.0, 255.0) as u8
}
