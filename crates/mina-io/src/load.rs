//! Image loading from the filesystem.
//!
//! A file becomes a single-slice stack; a directory becomes a volumetric
//! stack with one slice per image file, ordered by file name. Colour
//! images are split into one channel per colour component (alpha is
//! dropped). Common raster formats carry no physical pixel size, so the
//! caller supplies the calibration.

use std::path::{Path, PathBuf};

use image::{ColorType, DynamicImage, ImageFormat, Luma};
use mina_pipeline::batch::ImageSource;
use mina_pipeline::types::{BitDepth, Gray16Image, StackDimensions, widen};
use mina_pipeline::{Calibration, Hyperstack, PipelineError};

use crate::error::IoError;

/// Loads batch images from the filesystem with one fixed calibration.
#[derive(Debug, Clone, Default)]
pub struct FsImageSource {
    /// Calibration applied to every loaded image.
    pub calibration: Calibration,
}

impl FsImageSource {
    /// A source applying `calibration` to every image.
    #[must_use]
    pub const fn new(calibration: Calibration) -> Self {
        Self { calibration }
    }
}

impl ImageSource for FsImageSource {
    fn load(&self, path: &Path) -> Result<Hyperstack, PipelineError> {
        Ok(load_image(path, &self.calibration)?)
    }
}

/// Load an image file or a directory of slices.
///
/// The stack is titled with the file or directory name.
///
/// # Errors
///
/// Returns [`IoError::Io`] if the path cannot be read,
/// [`IoError::Image`] if a file cannot be decoded, and
/// [`IoError::InvalidStack`] if a directory holds no images or its
/// images differ in size, channel count, or bit depth.
pub fn load_image(path: &Path, calibration: &Calibration) -> Result<Hyperstack, IoError> {
    let metadata = std::fs::metadata(path).map_err(|source| IoError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let title = path.file_name().map_or_else(
        || path.display().to_string(),
        |n| n.to_string_lossy().into_owned(),
    );

    let files = if metadata.is_dir() {
        image_files(path)?
    } else {
        vec![path.to_path_buf()]
    };

    let mut slices = files.iter().map(|f| decode(f).map(|d| (f, d)));
    let Some(first) = slices.next().transpose()? else {
        return Err(IoError::InvalidStack {
            path: path.to_path_buf(),
            reason: "directory contains no images".to_owned(),
        });
    };
    let (_, first) = first;
    let channels = first.planes.len();
    let bit_depth = first.bit_depth;
    let mut planes = first.planes;
    let mut slice_count = 1;

    for slice in slices {
        let (file, decoded) = slice?;
        if decoded.planes.len() != channels || decoded.bit_depth != bit_depth {
            return Err(IoError::InvalidStack {
                path: file.clone(),
                reason: format!(
                    "expected {channels} channel(s) at {bit_depth:?} bits like the first slice, \
                     got {} at {:?}",
                    decoded.planes.len(),
                    decoded.bit_depth,
                ),
            });
        }
        planes.extend(decoded.planes);
        slice_count += 1;
    }

    let dimensions = StackDimensions {
        channels,
        slices: slice_count,
        frames: 1,
    };
    log::debug!(
        "loaded {}: {channels} channel(s), {slice_count} slice(s), {bit_depth:?}",
        path.display(),
    );
    Hyperstack::new(title, dimensions, bit_depth, calibration.clone(), planes).map_err(|e| {
        IoError::InvalidStack {
            path: path.to_path_buf(),
            reason: e.to_string(),
        }
    })
}

/// Image files directly inside `dir`, sorted by file name.
fn image_files(dir: &Path) -> Result<Vec<PathBuf>, IoError> {
    let io_err = |source| IoError::Io {
        path: dir.to_path_buf(),
        source,
    };
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(io_err)? {
        let path = entry.map_err(io_err)?.path();
        if path.is_file() && ImageFormat::from_path(&path).is_ok() {
            files.push(path);
        }
    }
    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(files)
}

/// One decoded file: a plane per channel.
struct Decoded {
    bit_depth: BitDepth,
    planes: Vec<Gray16Image>,
}

fn decode(path: &Path) -> Result<Decoded, IoError> {
    let image = image::ImageReader::open(path)
        .and_then(image::ImageReader::with_guessed_format)
        .map_err(|source| IoError::Io {
            path: path.to_path_buf(),
            source,
        })?
        .decode()
        .map_err(|source| IoError::Image {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(split_channels(&image))
}

fn split_channels(image: &DynamicImage) -> Decoded {
    match image.color() {
        ColorType::L8 | ColorType::La8 => Decoded {
            bit_depth: BitDepth::Eight,
            planes: vec![widen(&image.to_luma8())],
        },
        ColorType::L16 | ColorType::La16 => Decoded {
            bit_depth: BitDepth::Sixteen,
            planes: vec![image.to_luma16()],
        },
        ColorType::Rgb8 | ColorType::Rgba8 => {
            let rgb = image.to_rgb8();
            Decoded {
                bit_depth: BitDepth::Eight,
                planes: (0..3)
                    .map(|c| {
                        Gray16Image::from_fn(rgb.width(), rgb.height(), |x, y| {
                            Luma([u16::from(rgb.get_pixel(x, y).0[c])])
                        })
                    })
                    .collect(),
            }
        }
        _ => {
            let rgb = image.to_rgb16();
            Decoded {
                bit_depth: BitDepth::Sixteen,
                planes: (0..3)
                    .map(|c| {
                        Gray16Image::from_fn(rgb.width(), rgb.height(), |x, y| {
                            Luma([rgb.get_pixel(x, y).0[c]])
                        })
                    })
                    .collect(),
            }
        }
    }
}
