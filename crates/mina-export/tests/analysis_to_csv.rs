//! Integration test: analyze a synthetic network and export the results.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use image::{GrayImage, Luma};
use mina_pipeline::{
    AnalysisContext, AnalysisParams, Calibration, Collaborators, Hyperstack, RESULTS_TABLE_NAME,
};

/// A plus-shaped network: four arms meeting at the centre.
fn cross() -> GrayImage {
    let mut img = GrayImage::new(21, 21);
    for i in 3..18 {
        img.put_pixel(i, 10, Luma([210]));
        img.put_pixel(10, i, Luma([210]));
    }
    img
}

#[test]
fn annotated_runs_export_with_comment_columns() {
    let mut context = AnalysisContext::with_image(Hyperstack::from_gray(
        "cross",
        &cross(),
        Calibration::default(),
    ));

    let first = AnalysisParams {
        comment: "cond=ctrl".to_owned(),
        ..AnalysisParams::default()
    };
    mina_pipeline::analyze(&mut context, &first, Collaborators::builtin())
        .expect("first run should succeed");

    let second = AnalysisParams {
        comment: "looks, fine".to_owned(),
        ..AnalysisParams::default()
    };
    let outcome = mina_pipeline::analyze(&mut context, &second, Collaborators::builtin())
        .expect("second run should succeed");

    let table = context.table(RESULTS_TABLE_NAME).unwrap();
    let csv = mina_export::results_csv(table);
    let lines: Vec<&str> = csv.lines().collect();
    assert_eq!(lines.len(), 3);
    assert!(lines[0].ends_with(",cond,Comment"));
    assert!(lines[1].starts_with("cross,,,otsu,false,75,5,1,3,"));
    assert!(lines[1].ends_with(",ctrl,"));
    assert!(lines[2].ends_with(",,\"looks, fine\""));

    let rgba = mina_export::render_overlay(context.active().unwrap()).unwrap();
    assert_eq!(rgba.dimensions(), (21, 21));
    // Skeleton pixels are drawn opaque green over the mask.
    assert_ne!(outcome.skeleton.planes()[0].get_pixel(10, 5).0[0], 0);
    assert_eq!(rgba.get_pixel(10, 5).0, [0, 255, 0, 255]);
    assert_eq!(rgba.get_pixel(0, 0).0, [0, 0, 0, 255]);
}
