//! mina-export: Pure serializers for analysis results (sans-IO)
//!
//! Converts result tables into CSV text and composites overlays into
//! RGBA rasters. Writing the results to disk is the caller's job.

pub mod csv;
pub mod overlay;

pub use csv::{batch_csv, results_csv};
pub use overlay::{composite, render_overlay};
