use depthmatte::graph::{GraphCutProblem, MinCutSolver, Solution};
use depthmatte::{ColorFrame, DepthFrame, Phase, SegmentError, Segmenter, SegmenterConfig};
use image::{Luma, Rgb};

const WIDTH: u32 = 48;
const HEIGHT: u32 = 36;
const SCENE_DEPTH: u16 = 1000;

/// Subject rectangle: x in 16..32, y in 10..28
fn in_subject(x: u32, y: u32) -> bool {
    (16..32).contains(&x) && (10..28).contains(&y)
}

fn config() -> SegmenterConfig {
    let mut config = SegmenterConfig::default();
    config.calibration.noise_frames = 4;
    config.calibration.background_frames = 3;
    config.depth.foreground_smoothing = 1;
    config.seed.min_area = 16;
    config.seed.dilation = 4;
    config.gmm.set_cluster_count(2);
    config.gmm.threads = 2;
    config
}

fn scene_depth(frame: u32) -> DepthFrame {
    let wobble = if frame % 2 == 0 { 2 } else { 0 };
    DepthFrame::from_fn(WIDTH, HEIGHT, |_, _| Luma([SCENE_DEPTH - 1 + wobble]))
}

fn scene_color() -> ColorFrame {
    ColorFrame::from_fn(WIDTH, HEIGHT, |x, y| Rgb([30, 150 + ((x * 3 + y * 5) % 11) as u8, 40]))
}

fn subject_depth() -> DepthFrame {
    DepthFrame::from_fn(WIDTH, HEIGHT, |x, y| {
        Luma([if in_subject(x, y) { SCENE_DEPTH - 100 } else { SCENE_DEPTH }])
    })
}

fn subject_color() -> ColorFrame {
    let background = scene_color();
    ColorFrame::from_fn(WIDTH, HEIGHT, |x, y| {
        if in_subject(x, y) {
            Rgb([200, 30, 30])
        } else {
            *background.get_pixel(x, y)
        }
    })
}

fn calibrated(config: SegmenterConfig) -> Segmenter {
    let mut segmenter = Segmenter::new(config).unwrap();
    let color = scene_color();
    let mut frame = 0;
    while segmenter.phase() != Phase::Active {
        segmenter.push_frame(&scene_depth(frame), &color).unwrap();
        frame += 1;
        assert!(frame < 100, "calibration never finished");
    }
    assert_eq!(frame, 7);
    segmenter
}

#[test]
fn subject_is_segmented_after_calibration() {
    let mut segmenter = calibrated(config());
    assert!(segmenter.depth_model().noise().is_valid());

    let report = segmenter.push_frame(&subject_depth(), &subject_color()).unwrap();
    assert_eq!(report.phase, Phase::Active);
    assert_eq!(report.seeds, 1);
    assert!(report.updated);
    assert_eq!(report.foreground_pixels, 16 * 18);
    assert!(report.ratio > 0.0 && report.ratio <= 1.0);
    assert!(report.subject_distance.is_some());

    let labels = segmenter.labels();
    for y in 0..HEIGHT {
        for x in 0..WIDTH {
            let expected = if in_subject(x, y) { 255 } else { 0 };
            assert_eq!(labels.get_pixel(x, y)[0], expected, "label at ({x}, {y})");
        }
    }

    let mixture = segmenter.foreground_model().mixture().unwrap();
    let total: f32 = mixture.components().iter().map(|c| c.weight).sum();
    assert!((total - 1.0).abs() < 1e-3);
}

#[test]
fn labels_are_published_once_per_update() {
    let mut segmenter = calibrated(config());
    let before = segmenter.label_version();
    assert!(segmenter.labels_since(before).is_none());

    segmenter.push_frame(&subject_depth(), &subject_color()).unwrap();
    let (version, labels) = segmenter.labels_since(before).unwrap();
    assert_eq!(labels.dimensions(), (WIDTH, HEIGHT));
    assert!(segmenter.labels_since(version).is_none());

    // subject leaves: an all-background labelling is published
    let report = segmenter.push_frame(&scene_depth(0), &scene_color()).unwrap();
    assert_eq!(report.seeds, 0);
    let (_, labels) = segmenter.labels_since(version).unwrap();
    assert!(labels.pixels().all(|p| p[0] == 0));
}

#[test]
fn merged_seeds_cover_every_subject() {
    let mut config = config();
    config.seed.largest_only = false;
    let mut segmenter = calibrated(config);

    let second = |x: u32, y: u32| (38..44).contains(&x) && (4..10).contains(&y);
    let depth = DepthFrame::from_fn(WIDTH, HEIGHT, |x, y| {
        Luma([if in_subject(x, y) || second(x, y) { SCENE_DEPTH - 100 } else { SCENE_DEPTH }])
    });
    let base = subject_color();
    let color = ColorFrame::from_fn(WIDTH, HEIGHT, |x, y| {
        if second(x, y) {
            Rgb([200, 30, 30])
        } else {
            *base.get_pixel(x, y)
        }
    });

    let report = segmenter.push_frame(&depth, &color).unwrap();
    assert_eq!(report.seeds, 2);
    let labels = segmenter.labels();
    assert_eq!(labels.get_pixel(24, 18)[0], 255);
    assert_eq!(labels.get_pixel(40, 6)[0], 255);
    assert_eq!(labels.get_pixel(2, 32)[0], 0);
}

struct BrokenOracle;

impl MinCutSolver for BrokenOracle {
    fn solve(&mut self, _problem: &GraphCutProblem) -> depthmatte::Result<Solution> {
        Err(SegmentError::Oracle("no device".into()))
    }
}

#[test]
fn oracle_failure_skips_the_frame() {
    let mut config = config();
    config.depth.constant_std_dev = Some(5.0);
    let mut segmenter = Segmenter::with_solver(config, Box::new(BrokenOracle)).unwrap();
    assert_eq!(segmenter.phase(), Phase::CalibratingBackground);
    for frame in 0..3 {
        segmenter.push_frame(&scene_depth(frame), &scene_color()).unwrap();
    }
    assert_eq!(segmenter.phase(), Phase::Active);

    let version = segmenter.label_version();
    let result = segmenter.push_frame(&subject_depth(), &subject_color());
    assert!(matches!(result, Err(SegmentError::Oracle(_))));
    assert_eq!(segmenter.label_version(), version);

    // later frames are still processed
    let report = segmenter.push_frame(&scene_depth(0), &scene_color()).unwrap();
    assert!(report.updated);
}

#[test]
fn calibration_rejects_resolution_changes() {
    let mut segmenter = Segmenter::new(config()).unwrap();
    segmenter.push_frame(&scene_depth(0), &scene_color()).unwrap();
    let small = DepthFrame::from_pixel(8, 8, Luma([SCENE_DEPTH]));
    assert!(matches!(
        segmenter.push_frame(&small, &ColorFrame::new(8, 8)),
        Err(SegmentError::InputShapeMismatch { .. })
    ));
    assert_eq!(segmenter.phase(), Phase::CalibratingNoise);
}
