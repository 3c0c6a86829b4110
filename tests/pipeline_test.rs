//! End-to-end tests of the per-frame pipeline with synthetic faces


use head_pose_broadcaster::{
    camera::CameraModel,
    constants::NUM_EXTENDED_LANDMARKS,
    estimator::HeadPoseEstimator,
    pose_estimation::PoseSolver,
    provider::FixtureProvider,
};
use nalgebra::Vector3;
use ndarray::Array3;
use test_helpers::*;

fn calibrated_estimator(provider: StaticProvider) -> HeadPoseEstimator<StaticProvider> {
    let k = test_intrinsics();
    let mut camera = CameraModel::new();
    camera.set_calibration(k.focal_length, k.cx, k.cy);
    HeadPoseEstimator::new(provider, camera, PoseSolver::default())
}

#[test]
fn test_frontal_face_end_to_end() {
    let truth = pose_from_angles(0.0, 0.0, 0.0, Vector3::new(0.0, 0.0, 600.0));
    let provider = StaticProvider::new(vec![synthetic_detection(&truth, &test_intrinsics())]);
    let mut estimator = calibrated_estimator(provider);

    assert_eq!(estimator.update(blank_frame().view()).unwrap(), 1);
    let poses = estimator.poses();
    assert_eq!(poses.len(), 1);

    let angles = poses[0].pose.angles();
    assert_angle_close(angles.yaw, 0.0, 2.0, "yaw");
    assert_angle_close(angles.pitch, 0.0, 2.0, "pitch");
    assert_angle_close(angles.roll, 0.0, 2.0, "roll");

    let z = poses[0].pose.translation.z;
    assert!((z - 600.0).abs() / 600.0 < 0.05, "z = {z}");
    assert!(poses[0].reprojection_rms < 2.0);
}

#[test]
fn test_turned_faces_end_to_end() {
    let cases = [
        (25.0, 0.0, 0.0, 550.0),
        (-30.0, 10.0, 0.0, 700.0),
        (10.0, -15.0, 8.0, 800.0),
        (0.0, 20.0, -12.0, 450.0),
    ];

    for (yaw, pitch, roll, distance) in cases {
        let truth = pose_from_angles(yaw, pitch, roll, Vector3::new(20.0, -10.0, distance));
        let provider = StaticProvider::new(vec![synthetic_detection(&truth, &test_intrinsics())]);
        let mut estimator = calibrated_estimator(provider);

        estimator.update(blank_frame().view()).unwrap();
        let poses = estimator.poses();
        assert_eq!(poses.len(), 1, "no pose for case {yaw}/{pitch}/{roll}");

        let angles = poses[0].pose.angles();
        assert_angle_close(angles.yaw, yaw, 2.0, "yaw");
        assert_angle_close(angles.pitch, pitch, 2.0, "pitch");
        assert_angle_close(angles.roll, roll, 2.0, "roll");
        let z = poses[0].pose.translation.z;
        assert!((z - distance).abs() / distance < 0.05, "z = {z}, expected {distance}");
    }
}

#[test]
fn test_three_faces_keep_detection_order() {
    let k = test_intrinsics();
    let truths = [
        pose_from_angles(0.0, 0.0, 0.0, Vector3::new(-150.0, 0.0, 900.0)),
        pose_from_angles(15.0, 0.0, 0.0, Vector3::new(0.0, 20.0, 1000.0)),
        pose_from_angles(-15.0, 5.0, 0.0, Vector3::new(150.0, 0.0, 1100.0)),
    ];
    let provider = StaticProvider::new(truths.iter().map(|t| synthetic_detection(t, &k)).collect());
    let mut estimator = calibrated_estimator(provider);

    assert_eq!(estimator.update(blank_frame().view()).unwrap(), 3);
    assert_eq!(estimator.landmarks().len(), 3);

    let poses = estimator.poses();
    assert_eq!(poses.len(), 3);
    for (i, (face, truth)) in poses.iter().zip(&truths).enumerate() {
        assert_eq!(face.face_index, i);
        let z = face.pose.translation.z;
        assert!((z - truth.translation.z).abs() / truth.translation.z < 0.05);
        assert_angle_close(face.pose.angles().yaw, truth.angles().yaw, 2.0, "yaw");
    }
}

#[test]
fn test_zero_faces_is_empty_success() {
    let mut estimator = calibrated_estimator(StaticProvider::new(Vec::new()));

    assert_eq!(estimator.update(blank_frame().view()).unwrap(), 0);
    assert!(estimator.landmarks().is_empty());
    assert!(estimator.poses().is_empty());
}

#[test]
fn test_uncalibrated_camera_yields_landmarks_but_no_poses() {
    let truth = pose_from_angles(0.0, 0.0, 0.0, Vector3::new(0.0, 0.0, 600.0));
    let provider = StaticProvider::new(vec![synthetic_detection(&truth, &test_intrinsics())]);
    let mut camera = CameraModel::new();
    camera.set_calibration(0.0, 0.0, 0.0);
    let mut estimator = HeadPoseEstimator::new(provider, camera, PoseSolver::default());

    assert_eq!(estimator.update(blank_frame().view()).unwrap(), 1);
    assert_eq!(estimator.landmarks().len(), 1);
    assert_eq!(estimator.landmarks()[0].landmarks.len(), NUM_EXTENDED_LANDMARKS);
    assert!(estimator.poses().is_empty());
    assert!(estimator.is_uncalibrated_warning_active());

    // Recovery without operator intervention
    let k = test_intrinsics();
    estimator.set_calibration(k.focal_length, k.cx, k.cy);
    estimator.update(blank_frame().view()).unwrap();
    assert_eq!(estimator.poses().len(), 1);
    assert!(!estimator.is_uncalibrated_warning_active());
}

#[test]
fn test_malformed_face_does_not_affect_others() {
    let k = test_intrinsics();
    let good = pose_from_angles(5.0, 0.0, 0.0, Vector3::new(0.0, 0.0, 650.0));
    let provider = StaticProvider::new(vec![
        malformed_detection(67),
        synthetic_detection(&good, &k),
        malformed_detection(0),
    ]);
    let mut estimator = calibrated_estimator(provider);

    assert_eq!(estimator.update(blank_frame().view()).unwrap(), 3);
    assert_eq!(estimator.landmarks().len(), 1);
    assert_eq!(estimator.landmarks()[0].face_index, 1);

    let poses = estimator.poses();
    assert_eq!(poses.len(), 1);
    assert_eq!(poses[0].face_index, 1);
}

#[test]
fn test_zero_area_frame_is_a_no_op() {
    let truth = pose_from_angles(0.0, 0.0, 0.0, Vector3::new(0.0, 0.0, 600.0));
    let provider = StaticProvider::new(vec![synthetic_detection(&truth, &test_intrinsics())]);
    let mut estimator = calibrated_estimator(provider);

    assert_eq!(estimator.update(Array3::<u8>::zeros((480, 0, 3)).view()).unwrap(), 0);
    assert_eq!(estimator.provider_mut().calls, 0);
    assert!(estimator.landmarks().is_empty());
    assert!(estimator.poses().is_empty());
}

#[test]
fn test_results_do_not_leak_into_next_frame() {
    let k = test_intrinsics();
    let truth = pose_from_angles(0.0, 0.0, 0.0, Vector3::new(0.0, 0.0, 600.0));
    let provider = FixtureProvider::new(vec![vec![synthetic_detection(&truth, &k)], vec![]]);
    let mut camera = CameraModel::new();
    camera.set_calibration(k.focal_length, k.cx, k.cy);
    let mut estimator = HeadPoseEstimator::new(provider, camera, PoseSolver::default());

    estimator.update(blank_frame().view()).unwrap();
    assert_eq!(estimator.poses().len(), 1);

    estimator.update(blank_frame().view()).unwrap();
    assert!(estimator.landmarks().is_empty());
    assert!(estimator.poses().is_empty());
}

#[test]
fn test_seeded_tracking_matches_cold_start() {
    let k = test_intrinsics();
    let frames: Vec<_> = (0..5)
        .map(|i| {
            let yaw = f64::from(i) * 3.0;
            vec![synthetic_detection(
                &pose_from_angles(yaw, 0.0, 0.0, Vector3::new(0.0, 0.0, 600.0)),
                &k,
            )]
        })
        .collect();

    let mut camera = CameraModel::new();
    camera.set_calibration(k.focal_length, k.cx, k.cy);
    let mut seeded = HeadPoseEstimator::new(FixtureProvider::new(frames.clone()), camera.clone(), PoseSolver::default())
        .with_previous_frame_seeding(true);
    let mut cold = HeadPoseEstimator::new(FixtureProvider::new(frames), camera, PoseSolver::default());

    for i in 0..5 {
        seeded.update(blank_frame().view()).unwrap();
        cold.update(blank_frame().view()).unwrap();

        let a = seeded.poses()[0].pose;
        let b = cold.poses()[0].pose;
        assert_angle_close(a.angles().yaw, f64::from(i) * 3.0, 0.5, "seeded yaw");
        assert!((a.translation - b.translation).norm() < 1.0);
    }
}

#[test]
fn test_landmarks_without_pose_solving() {
    let k = test_intrinsics();
    let truth = pose_from_angles(0.0, 0.0, 0.0, Vector3::new(0.0, 0.0, 600.0));
    let detection = synthetic_detection(&truth, &k);
    let mut estimator = calibrated_estimator(StaticProvider::new(vec![detection.clone()]));

    estimator.update(blank_frame().view()).unwrap();
    let set = &estimator.landmarks()[0].landmarks;
    for (i, raw) in detection.landmarks.iter().enumerate() {
        assert!((set[i].x - f64::from(raw.x)).abs() < 1e-9);
        assert!((set[i].y - f64::from(raw.y)).abs() < 1e-9);
    }
}
