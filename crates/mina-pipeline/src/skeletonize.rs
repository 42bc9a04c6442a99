//! Skeletonization: thin a binary mask to one-pixel-wide topology.
//!
//! This module defines the [`Skeletonizer`] trait for pluggable thinning
//! algorithms and the [`SkeletonizerKind`] enum for selecting one at
//! runtime. Thinning is applied to each plane of the mask on its own.

use serde::{Deserialize, Serialize};

use crate::segment::Mask;
use crate::types::{Calibration, FOREGROUND, GrayImage, count_foreground};

/// A thinned binary image: one-pixel-wide, connectivity preserved.
#[derive(Debug, Clone, PartialEq)]
pub struct Skeleton {
    planes: Vec<GrayImage>,
    calibration: Calibration,
}

impl Skeleton {
    /// Wrap already-thinned planes.
    #[must_use]
    pub const fn new(planes: Vec<GrayImage>, calibration: Calibration) -> Self {
        Self {
            planes,
            calibration,
        }
    }

    /// The skeleton planes, foreground [`FOREGROUND`].
    #[must_use]
    pub fn planes(&self) -> &[GrayImage] {
        &self.planes
    }

    /// Voxel calibration.
    #[must_use]
    pub const fn calibration(&self) -> &Calibration {
        &self.calibration
    }

    /// Width and height of every plane, or `(0, 0)` with no planes.
    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        self.planes.first().map_or((0, 0), GrayImage::dimensions)
    }

    /// Number of skeleton voxels.
    #[must_use]
    pub fn voxel_count(&self) -> u64 {
        count_foreground(&self.planes)
    }
}

/// Selects which thinning algorithm to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SkeletonizerKind {
    /// Guo-Hall two-subiteration parallel thinning. Keeps two-pixel-thick
    /// diagonal lines as one-pixel diagonals.
    #[default]
    GuoHall,
    /// Zhang-Suen two-subiteration parallel thinning. Erases two-pixel-thick
    /// diagonal lines almost entirely.
    ZhangSuen,
}

impl SkeletonizerKind {
    /// Human-readable name, used in diagnostics.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::GuoHall => "Guo-Hall",
            Self::ZhangSuen => "Zhang-Suen",
        }
    }
}

/// Trait for thinning strategies.
///
/// Input: a binary mask. Output: a skeleton with the mask's plane layout
/// and calibration.
pub trait Skeletonizer {
    /// Thin every plane of `mask`.
    fn skeletonize(&self, mask: &Mask) -> Skeleton;
}

impl Skeletonizer for SkeletonizerKind {
    fn skeletonize(&self, mask: &Mask) -> Skeleton {
        let thin: fn(&GrayImage) -> GrayImage = match *self {
            Self::GuoHall => guo_hall,
            Self::ZhangSuen => zhang_suen,
        };
        Skeleton::new(
            mask.planes().iter().map(thin).collect(),
            mask.calibration().clone(),
        )
    }
}

/// Neighbours P2..P9, clockwise from north.
const RING: [(i64, i64); 8] = [
    (0, -1),
    (1, -1),
    (1, 0),
    (1, 1),
    (0, 1),
    (-1, 1),
    (-1, 0),
    (-1, -1),
];

/// Guo-Hall thinning of one binary plane.
///
/// Pixels outside the image count as background.
#[must_use]
pub fn guo_hall(plane: &GrayImage) -> GrayImage {
    thin_parallel(plane, |p, first_pass| {
        let [p2, p3, p4, p5, p6, p7, p8, p9] = p.map(u8::from);
        let c = u8::from(p2 == 0 && (p3 | p4) == 1)
            + u8::from(p4 == 0 && (p5 | p6) == 1)
            + u8::from(p6 == 0 && (p7 | p8) == 1)
            + u8::from(p8 == 0 && (p9 | p2) == 1);
        let n1 = (p9 | p2) + (p3 | p4) + (p5 | p6) + (p7 | p8);
        let n2 = (p2 | p3) + (p4 | p5) + (p6 | p7) + (p8 | p9);
        let n = n1.min(n2);
        let m = if first_pass {
            (p6 | p7 | (1 - p9)) & p8
        } else {
            (p2 | p3 | (1 - p5)) & p4
        };
        c == 1 && (2..=3).contains(&n) && m == 0
    })
}

/// Zhang-Suen thinning of one binary plane.
///
/// Pixels outside the image count as background.
#[must_use]
pub fn zhang_suen(plane: &GrayImage) -> GrayImage {
    thin_parallel(plane, |p, first_pass| {
        let b = p.iter().filter(|&&v| v).count();
        let a = (0..8).filter(|&k| !p[k] && p[(k + 1) % 8]).count();
        // p[0]=N p[2]=E p[4]=S p[6]=W
        let (c1, c2) = if first_pass {
            (p[0] && p[2] && p[4], p[2] && p[4] && p[6])
        } else {
            (p[0] && p[2] && p[6], p[0] && p[4] && p[6])
        };
        (2..=6).contains(&b) && a == 1 && !c1 && !c2
    })
}

/// Two-subiteration parallel thinning until nothing changes.
///
/// `deletable` sees the eight neighbours in [`RING`] order and whether
/// this is the first subiteration.
fn thin_parallel(plane: &GrayImage, deletable: impl Fn(&[bool; 8], bool) -> bool) -> GrayImage {
    let (w, h) = plane.dimensions();
    let (wi, hi) = (i64::from(w), i64::from(h));
    let index = |x: i64, y: i64| -> Option<usize> {
        (x >= 0 && y >= 0 && x < wi && y < hi).then(|| usize::try_from(y * wi + x).ok())?
    };
    let mut on: Vec<bool> = plane.pixels().map(|p| p.0[0] != 0).collect();

    loop {
        let mut changed = false;
        for first_pass in [true, false] {
            let mut delete = Vec::new();
            for y in 0..hi {
                for x in 0..wi {
                    let Some(i) = index(x, y) else { continue };
                    if !on[i] {
                        continue;
                    }
                    let p: [bool; 8] = std::array::from_fn(|k| {
                        let (dx, dy) = RING[k];
                        index(x + dx, y + dy).is_some_and(|j| on[j])
                    });
                    if deletable(&p, first_pass) {
                        delete.push(i);
                    }
                }
            }
            changed |= !delete.is_empty();
            for i in delete {
                on[i] = false;
            }
        }
        if !changed {
            break;
        }
    }

    let mut out = GrayImage::new(w, h);
    for (pixel, &v) in out.pixels_mut().zip(&on) {
        pixel.0[0] = if v { FOREGROUND } else { 0 };
    }
    out
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn count(plane: &GrayImage) -> usize {
        plane.pixels().filter(|p| p.0[0] != 0).count()
    }

    #[test]
    fn default_is_guo_hall() {
        assert_eq!(SkeletonizerKind::default(), SkeletonizerKind::GuoHall);
    }

    #[test]
    fn empty_plane_stays_empty() {
        assert_eq!(count(&guo_hall(&GrayImage::new(8, 8))), 0);
        assert_eq!(count(&zhang_suen(&GrayImage::new(8, 8))), 0);
    }

    #[test]
    fn thin_line_is_unchanged() {
        let mut plane = GrayImage::new(20, 5);
        for x in 3..15 {
            plane.put_pixel(x, 2, image::Luma([FOREGROUND]));
        }
        assert_eq!(guo_hall(&plane), plane);
        assert_eq!(zhang_suen(&plane), plane);
    }

    #[test]
    fn thick_bar_thins_to_one_pixel_width() {
        let plane = GrayImage::from_fn(30, 9, |x, y| {
            image::Luma([if (3..27).contains(&x) && (2..7).contains(&y) {
                FOREGROUND
            } else {
                0
            }])
        });
        let out = guo_hall(&plane);
        assert!(count(&out) > 0);
        // Every column through the middle of the bar keeps exactly one pixel.
        for x in 8..22 {
            let column = (0..9).filter(|&y| out.get_pixel(x, y).0[0] != 0).count();
            assert_eq!(column, 1, "column {x}");
        }
    }

    /// A two-pixel-thick, 4-connected staircase from (2, 2) to (20, 19).
    fn staircase() -> GrayImage {
        let mut plane = GrayImage::new(24, 22);
        for i in 0..18 {
            plane.put_pixel(2 + i, 2 + i, image::Luma([FOREGROUND]));
            plane.put_pixel(3 + i, 2 + i, image::Luma([FOREGROUND]));
        }
        plane
    }

    #[test]
    fn thick_diagonal_thins_to_a_diagonal() {
        let out = guo_hall(&staircase());
        assert_eq!(count(&out), 19);
        for y in 3..20 {
            let row: Vec<u32> = (0..24).filter(|&x| out.get_pixel(x, y).0[0] != 0).collect();
            assert_eq!(row, vec![y + 1], "row {y}");
        }
    }

    #[test]
    fn zhang_suen_erodes_thick_diagonals() {
        assert!(count(&zhang_suen(&staircase())) < 4);
    }

    #[test]
    fn skeletonizer_kinds_dispatch() {
        let mask = Mask::new(vec![staircase()], Calibration::default()).unwrap();
        assert_eq!(SkeletonizerKind::GuoHall.skeletonize(&mask).voxel_count(), 19);
        assert!(SkeletonizerKind::ZhangSuen.skeletonize(&mask).voxel_count() < 4);
    }

    #[test]
    fn skeletonizer_keeps_layout_and_calibration() {
        let calibration = Calibration {
            pixel_width: 0.2,
            ..Calibration::default()
        };
        let planes = vec![GrayImage::from_pixel(6, 6, image::Luma([FOREGROUND])); 3];
        let mask = Mask::new(planes, calibration.clone()).unwrap();
        let skeleton = SkeletonizerKind::GuoHall.skeletonize(&mask);
        assert_eq!(skeleton.planes().len(), 3);
        assert_eq!(skeleton.calibration(), &calibration);
        assert_eq!(skeleton.dimensions(), (6, 6));
        assert!(skeleton.voxel_count() < 3 * 36);
    }
}
