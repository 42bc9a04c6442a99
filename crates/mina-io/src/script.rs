//! Script hooks run as child processes.
//!
//! The active image is written to a temporary input directory as one PNG
//! per plane (`plane_0000.png`, ...), at 8 or 16 bits to match the image.
//! The script is started with the input directory and an empty output
//! directory as its two arguments and waited on. If it writes any images
//! to the output directory, they are loaded as a stack and replace the
//! active image; if it writes none, the image is left as it was.
//!
//! The stack layout is passed in the environment as `MINA_TITLE`,
//! `MINA_CHANNELS`, `MINA_SLICES`, and `MINA_FRAMES`.

use std::path::{Path, PathBuf};
use std::process::Command;

use mina_pipeline::types::BitDepth;
use mina_pipeline::{AnalysisContext, Hyperstack, ScriptError, ScriptRunner};

use crate::error::IoError;
use crate::load::load_image;

/// Runs hook scripts as executables.
#[derive(Debug, Clone, Default)]
pub struct ProcessScriptRunner {
    interpreter: Option<PathBuf>,
}

impl ProcessScriptRunner {
    /// A runner that executes scripts directly.
    #[must_use]
    pub const fn new() -> Self {
        Self { interpreter: None }
    }

    /// A runner that passes every script to `interpreter` (for example
    /// `sh` or `python3`) instead of executing it directly.
    #[must_use]
    pub fn with_interpreter(interpreter: impl Into<PathBuf>) -> Self {
        Self {
            interpreter: Some(interpreter.into()),
        }
    }

    fn command(&self, script: &Path) -> Command {
        match &self.interpreter {
            Some(interpreter) => {
                let mut command = Command::new(interpreter);
                command.arg(script);
                command
            }
            None => Command::new(script),
        }
    }
}

impl ScriptRunner for ProcessScriptRunner {
    fn resolve(&self, path: &Path) -> Option<PathBuf> {
        std::fs::canonicalize(path).ok().filter(|p| p.is_file())
    }

    fn run(&self, script: &Path, context: &mut AnalysisContext) -> Result<(), ScriptError> {
        let launch_err = |reason: String| ScriptError::Launch {
            path: script.to_path_buf(),
            reason,
        };
        let image = context
            .require_active()
            .map_err(|e| launch_err(e.to_string()))?;

        let workdir = tempfile::tempdir().map_err(|e| launch_err(e.to_string()))?;
        let input = workdir.path().join("in");
        let output = workdir.path().join("out");
        for dir in [&input, &output] {
            std::fs::create_dir(dir).map_err(|e| launch_err(e.to_string()))?;
        }
        write_planes(image, &input).map_err(|e| launch_err(e.to_string()))?;

        let dims = image.dimensions();
        log::debug!("running {} on {}", script.display(), input.display());
        let status = self
            .command(script)
            .arg(&input)
            .arg(&output)
            .env("MINA_TITLE", image.title())
            .env("MINA_CHANNELS", dims.channels.to_string())
            .env("MINA_SLICES", dims.slices.to_string())
            .env("MINA_FRAMES", dims.frames.to_string())
            .status()
            .map_err(|e| launch_err(e.to_string()))?;
        if !status.success() {
            return Err(ScriptError::Failed {
                path: script.to_path_buf(),
                reason: status.to_string(),
            });
        }

        let has_output = std::fs::read_dir(&output)
            .map_err(|source| {
                IoError::Io {
                    path: output.clone(),
                    source,
                }
                .into_script_output(script)
            })?
            .next()
            .is_some();
        if !has_output {
            log::debug!("{} left the image unchanged", script.display());
            return Ok(());
        }

        let replacement =
            read_replacement(image, &output).map_err(|e| e.into_script_output(script))?;
        log::debug!(
            "{} replaced the image with {} plane(s)",
            script.display(),
            replacement.planes().len()
        );
        context.set_active(replacement);
        Ok(())
    }
}

/// Write every plane of `image` to `dir`.
fn write_planes(image: &Hyperstack, dir: &Path) -> Result<(), IoError> {
    match image.bit_depth() {
        BitDepth::Eight => {
            for (i, plane) in image.gray_planes().iter().enumerate() {
                let path = plane_path(dir, i);
                plane
                    .save(&path)
                    .map_err(|source| IoError::Image { path, source })?;
            }
        }
        BitDepth::Sixteen => {
            for (i, plane) in image.planes().iter().enumerate() {
                let path = plane_path(dir, i);
                plane
                    .save(&path)
                    .map_err(|source| IoError::Image { path, source })?;
            }
        }
    }
    Ok(())
}

fn plane_path(dir: &Path, index: usize) -> PathBuf {
    dir.join(format!("plane_{index:04}.png"))
}

/// Load the script's output as the new active image.
///
/// When the script wrote single-channel planes, one per input plane, the
/// input's channel, slice, and frame layout is kept. Otherwise the output
/// is taken as a stack of its own.
fn read_replacement(original: &Hyperstack, dir: &Path) -> Result<Hyperstack, IoError> {
    let loaded = load_image(dir, original.calibration())?;
    let same_layout = loaded.dimensions().channels == 1
        && loaded.planes().len() == original.planes().len();
    let mut replacement = if same_layout {
        Hyperstack::new(
            original.title(),
            original.dimensions(),
            loaded.bit_depth(),
            original.calibration().clone(),
            loaded.planes().to_vec(),
        )
        .map_err(|e| IoError::InvalidStack {
            path: dir.to_path_buf(),
            reason: e.to_string(),
        })?
    } else {
        let mut loaded = loaded;
        loaded.set_title(original.title());
        loaded
    };
    if let Err(e) = replacement.set_current_channel(original.current_channel()) {
        log::debug!("analyzing channel 1 of the script output: {e}");
    }
    Ok(replacement)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use image::{GrayImage, Luma};
    use mina_pipeline::Calibration;
    use mina_pipeline::types::{Gray16Image, StackDimensions};

    use super::*;

    #[test]
    fn missing_script_does_not_resolve() {
        let runner = ProcessScriptRunner::new();
        assert_eq!(runner.resolve(Path::new("/definitely/not/here.sh")), None);
    }

    #[test]
    fn scripts_resolve_to_their_canonical_path() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("hooks")).unwrap();
        let script = dir.path().join("hooks").join("pre.sh");
        std::fs::write(&script, "#!/bin/sh\n").unwrap();

        let runner = ProcessScriptRunner::new();
        let indirect = dir.path().join("hooks").join("..").join("hooks").join("pre.sh");
        assert_eq!(
            runner.resolve(&indirect),
            Some(std::fs::canonicalize(&script).unwrap())
        );
        assert_eq!(runner.resolve(&dir.path().join("hooks")), None);
    }

    #[test]
    fn replacement_without_the_analyzed_channel_uses_the_first() {
        let mut image = Hyperstack::new(
            "rgb",
            StackDimensions {
                channels: 3,
                slices: 1,
                frames: 1,
            },
            BitDepth::Eight,
            Calibration::default(),
            vec![Gray16Image::new(4, 3); 3],
        )
        .unwrap();
        image.set_current_channel(2).unwrap();

        let dir = tempfile::tempdir().unwrap();
        GrayImage::new(4, 3)
            .save(plane_path(dir.path(), 0))
            .unwrap();

        let back = read_replacement(&image, dir.path()).unwrap();
        assert_eq!(back.title(), "rgb");
        assert_eq!(back.dimensions().channels, 1);
        assert_eq!(back.current_channel(), 0);
    }

    #[test]
    fn planes_round_trip_through_a_directory() {
        let mut plane = GrayImage::new(4, 3);
        plane.put_pixel(2, 1, Luma([200]));
        let image = Hyperstack::from_gray("cells", &plane, Calibration::default());

        let dir = tempfile::tempdir().unwrap();
        write_planes(&image, dir.path()).unwrap();
        assert!(dir.path().join("plane_0000.png").is_file());

        let back = read_replacement(&image, dir.path()).unwrap();
        assert_eq!(back.title(), "cells");
        assert_eq!(back.bit_depth(), BitDepth::Eight);
        assert_eq!(back.gray_planes()[0], plane);
    }
}
