//! End-to-end scenarios exercising `optimize` against synthetic scenes
//! with a seeded RNG so runs are deterministic.

use camcal_bundle::config::{OptimizeOpts, SolveTolerances};
use camcal_bundle::distortion::DistortionFamily;
use camcal_bundle::observations::{FrameObservation, PointObservation};
use camcal_bundle::pose::Pose;
use camcal_bundle::problem::ProblemDetails;
use camcal_bundle::solver::{SolveInputs, SolverContext};
use camcal_bundle::state::Seed;
use camcal_bundle::{optimize, project};
use approx::assert_relative_eq;
use nalgebra::{Vector2, Vector3};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

fn ideal_board_pixels(
    frame_pose: &Pose,
    extrinsics: Option<&Pose>,
    family: DistortionFamily,
    intrinsics: &[f64],
    width: usize,
    spacing: f64,
) -> Vec<Vector2<f64>> {
    let mut pixels = Vec::with_capacity(width * width);
    for i in 0..width {
        for j in 0..width {
            let vertex = Vector3::new(i as f64 * spacing, j as f64 * spacing, 0.0);
            let p_world = frame_pose.transform_point(&vertex);
            let p_cam = match extrinsics {
                Some(e) => e.transform_point(&p_world),
                None => p_world,
            };
            let proj = project(&p_cam, family, intrinsics, false, false).unwrap();
            pixels.push(proj.px);
        }
    }
    pixels
}

#[test]
fn s1_identity_pinhole_stays_at_seed() {
    let _ = env_logger::try_init();
    let family = DistortionFamily::None;
    let intrinsics = vec![1000.0, 1000.0, 500.0, 500.0];
    let frame_pose = Pose::new(Vector3::zeros(), Vector3::new(0.0, 0.0, 5.0));
    let width = 10;
    let spacing = 0.1;

    let pixels = ideal_board_pixels(&frame_pose, None, family, &intrinsics, width, spacing);
    let board_obs = vec![FrameObservation {
        i_camera: 0,
        i_frame: 0,
        skip_frame: false,
        skip_observation: false,
        pixels,
    }];

    let mut seed = Seed {
        intrinsics: vec![intrinsics.clone()],
        extrinsics: vec![],
        frames: vec![frame_pose],
        points: vec![],
    };

    let inputs = SolveInputs {
        board_obs,
        point_obs: vec![],
        board_spacing: spacing,
        board_width: width,
        sigma: 1.0,
        imager_sizes: &[(1000.0, 1000.0)],
    };

    let opts = OptimizeOpts {
        tolerances: SolveTolerances {
            max_iterations: 5,
            ..SolveTolerances::default()
        },
        ..Default::default()
    };

    let stats = optimize(&mut seed, inputs, ProblemDetails::all_on(), family, &opts, None).unwrap();

    assert!(stats.rms_reproj_error_pixels < 1e-6);
    assert_relative_eq!(seed.intrinsics[0][0], 1000.0, epsilon = 1e-4);
    assert_relative_eq!(seed.frames[0].tvec.z, 5.0, epsilon = 1e-4);
}

fn synthetic_stereo_scene(
    n_frames: usize,
    rng: &mut ChaCha8Rng,
) -> (
    DistortionFamily,
    Vec<Vec<f64>>,
    Pose,
    Vec<Pose>,
    Vec<FrameObservation>,
    f64,
    usize,
) {
    let family = DistortionFamily::OpenCv4;
    let width = 9;
    let spacing = 0.08;

    let true_intrinsics = vec![
        vec![1200.0, 1200.0, 640.0, 480.0, -0.15, 0.02, 0.0005, -0.0003],
        vec![1190.0, 1210.0, 650.0, 470.0, -0.12, 0.015, 0.0004, -0.0002],
    ];
    let true_extrinsics = Pose::new(Vector3::new(0.01, 0.0, 0.0), Vector3::new(0.2, 0.0, 0.0));

    let mut frames = Vec::new();
    let mut board_obs = Vec::new();
    for f in 0..n_frames {
        let rx = rng.gen_range(-0.2..0.2);
        let ry = rng.gen_range(-0.2..0.2);
        let rz = rng.gen_range(-0.1..0.1);
        let tz = rng.gen_range(2.5..4.5);
        let tx = rng.gen_range(-0.3..0.3);
        let ty = rng.gen_range(-0.3..0.3);
        let frame_pose = Pose::new(Vector3::new(rx, ry, rz), Vector3::new(tx, ty, tz));

        for (i_camera, intr) in true_intrinsics.iter().enumerate() {
            let extr = if i_camera == 0 { None } else { Some(&true_extrinsics) };
            let mut pixels = ideal_board_pixels(&frame_pose, extr, family, intr, width, spacing);
            for px in pixels.iter_mut() {
                px.x += rng.gen_range(-0.3..0.3);
                px.y += rng.gen_range(-0.3..0.3);
            }
            board_obs.push(FrameObservation {
                i_camera,
                i_frame: f,
                skip_frame: false,
                skip_observation: false,
                pixels,
            });
        }
        frames.push(frame_pose);
    }
    board_obs.sort_by_key(|o| (o.i_frame, o.i_camera));

    (family, true_intrinsics, true_extrinsics, frames, board_obs, spacing, width)
}

#[test]
fn s2_two_camera_stereo_converges_near_truth() {
    let mut rng = ChaCha8Rng::seed_from_u64(42);
    let (family, true_intrinsics, true_extrinsics, true_frames, board_obs, spacing, width) =
        synthetic_stereo_scene(20, &mut rng);

    let mut seed_intrinsics = true_intrinsics.clone();
    seed_intrinsics[0][0] *= 1.01;
    seed_intrinsics[0][1] *= 1.01;
    seed_intrinsics[1][0] *= 1.01;
    seed_intrinsics[1][1] *= 1.01;
    let mut seed_extrinsics = true_extrinsics;
    seed_extrinsics.tvec.x *= 1.02;

    let mut seed = Seed {
        intrinsics: seed_intrinsics,
        extrinsics: vec![seed_extrinsics],
        frames: true_frames,
        points: vec![],
    };

    let inputs = SolveInputs {
        board_obs,
        point_obs: vec![],
        board_spacing: spacing,
        board_width: width,
        sigma: 0.3,
        imager_sizes: &[(1280.0, 960.0), (1280.0, 960.0)],
    };

    let opts = OptimizeOpts {
        skip_outlier_rejection: true,
        ..Default::default()
    };

    let stats = optimize(&mut seed, inputs, ProblemDetails::all_on(), family, &opts, None).unwrap();

    let baseline_err = (seed.extrinsics[0].tvec.x - 0.2).abs() / 0.2;
    assert!(baseline_err < 0.05, "baseline relative error {baseline_err}");
    assert!(
        stats.rms_reproj_error_pixels < 0.5,
        "rms {}",
        stats.rms_reproj_error_pixels
    );
}

#[test]
fn s3_outlier_rejection_flags_corrupted_observations() {
    let mut rng = ChaCha8Rng::seed_from_u64(7);
    let (family, true_intrinsics, true_extrinsics, true_frames, mut board_obs, spacing, width) =
        synthetic_stereo_scene(20, &mut rng);

    let n_to_corrupt = (board_obs.len() as f64 * 0.05).round().max(1.0) as usize;
    for o in board_obs.iter_mut().take(n_to_corrupt) {
        for px in o.pixels.iter_mut().take(1) {
            px.x += 10.0;
            px.y += 10.0;
        }
    }

    let mut seed = Seed {
        intrinsics: true_intrinsics,
        extrinsics: vec![true_extrinsics],
        frames: true_frames,
        points: vec![],
    };

    let inputs = SolveInputs {
        board_obs,
        point_obs: vec![],
        board_spacing: spacing,
        board_width: width,
        sigma: 0.3,
        imager_sizes: &[(1280.0, 960.0), (1280.0, 960.0)],
    };

    let opts = OptimizeOpts::default();
    let stats = optimize(&mut seed, inputs, ProblemDetails::all_on(), family, &opts, None).unwrap();

    assert!(stats.n_outliers > 0);
}

#[test]
fn s4_range_residual_pulls_point_towards_weighted_midpoint() {
    let family = DistortionFamily::None;
    let intrinsics = vec![1000.0, 1000.0, 500.0, 500.0];
    let true_point = Vector3::new(0.0, 0.0, 3.1);

    let proj = project(&true_point, family, &intrinsics, false, false).unwrap();
    let point_obs = vec![PointObservation {
        i_camera: 0,
        i_point: 0,
        skip_point: false,
        skip_observation: false,
        px: proj.px,
        range: Some((3.0, 0.01)),
    }];

    let mut seed = Seed {
        intrinsics: vec![intrinsics],
        extrinsics: vec![],
        frames: vec![],
        points: vec![Vector3::new(0.0, 0.0, 3.05)],
    };

    let details = ProblemDetails {
        optimize_intrinsic_core: false,
        optimize_intrinsic_distortions: false,
        optimize_extrinsics: false,
        optimize_frames: false,
        skip_regularization: true,
    };

    let inputs = SolveInputs {
        board_obs: vec![],
        point_obs,
        board_spacing: 0.1,
        board_width: 0,
        sigma: 0.3,
        imager_sizes: &[],
    };

    let opts = OptimizeOpts {
        skip_outlier_rejection: true,
        ..Default::default()
    };

    optimize(&mut seed, inputs, details, family, &opts, None).unwrap();

    assert!(seed.points[0].z > 3.0 && seed.points[0].z < 3.1);
}

#[test]
fn s5_gradient_check_reports_small_relative_error() {
    let mut rng = ChaCha8Rng::seed_from_u64(99);
    let (family, true_intrinsics, true_extrinsics, true_frames, board_obs, spacing, width) =
        synthetic_stereo_scene(3, &mut rng);

    let mut seed = Seed {
        intrinsics: true_intrinsics,
        extrinsics: vec![true_extrinsics],
        frames: true_frames,
        points: vec![],
    };

    let inputs = SolveInputs {
        board_obs,
        point_obs: vec![],
        board_spacing: spacing,
        board_width: width,
        sigma: 0.3,
        imager_sizes: &[(1280.0, 960.0), (1280.0, 960.0)],
    };

    let opts = OptimizeOpts {
        check_gradient: true,
        ..Default::default()
    };

    let stats = optimize(&mut seed, inputs, ProblemDetails::all_on(), family, &opts, None).unwrap();
    let max_rel_err = stats.residuals[0];
    assert!(max_rel_err < 1e-3, "max relative error {max_rel_err}");
}

#[test]
fn s6_uncertainty_is_lower_near_image_center() {
    let mut rng = ChaCha8Rng::seed_from_u64(123);
    let (family, true_intrinsics, true_extrinsics, true_frames, board_obs, spacing, width) =
        synthetic_stereo_scene(20, &mut rng);

    let mut seed = Seed {
        intrinsics: true_intrinsics,
        extrinsics: vec![true_extrinsics],
        frames: true_frames,
        points: vec![],
    };

    let inputs = SolveInputs {
        board_obs,
        point_obs: vec![],
        board_spacing: spacing,
        board_width: width,
        sigma: 0.3,
        imager_sizes: &[(1280.0, 960.0), (1280.0, 960.0)],
    };

    let opts = OptimizeOpts {
        skip_outlier_rejection: true,
        want_intrinsic_covariances: true,
        ..Default::default()
    };

    let mut ctx = SolverContext::empty(family, ProblemDetails::all_on());
    let stats = optimize(&mut seed, inputs, ProblemDetails::all_on(), family, &opts, Some(&mut ctx)).unwrap();
    assert!(ctx.has_factor());
    let covariances = stats.intrinsic_covariances.expect("covariances requested");
    assert_eq!(covariances.len(), 2);
    assert_eq!(covariances[0].covariance.len(), covariances[0].width * covariances[0].width);

    let center_ray = Vector3::new(0.0, 0.0, 1.0);
    let corner_ray = Vector3::new(0.35, 0.25, 1.0);

    let traces = camcal_bundle::query_intrinsic_outlierness_at(
        &[center_ray, corner_ray],
        0,
        &seed.intrinsics[0],
        &ctx,
        stats.n_outliers,
    )
    .unwrap();

    assert!(traces[0] < traces[1], "center trace {} corner trace {}", traces[0], traces[1]);
}
