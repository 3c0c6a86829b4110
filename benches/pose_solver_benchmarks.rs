//! Benchmarks for pose solving and utility functions

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use head_pose_broadcaster::{
    camera::Intrinsics,
    face_model::FaceModel,
    landmarks::{extract_landmarks, LandmarkSet},
    pnp::{self, LmOptions},
    pose_estimation::{rotation_matrix_to_euler, HeadAngles, Pose, PoseSolver},
    provider::BoundingBox,
    report::pose_report,
    utils::refine_boxes,
};
use nalgebra::{Point2, Vector3};

fn synthetic_landmarks(pose: &Pose, k: &Intrinsics) -> LandmarkSet {
    let model = FaceModel::standard();
    let project = |index: usize| {
        model
            .position_of(index)
            .and_then(|p| k.project(&pose.transform_point(&p)))
            .expect("Failed to project model point")
    };

    let mut raw = vec![project(30); 68];
    for reference in model.points().iter().filter(|r| r.landmark < 68) {
        raw[reference.landmark] = project(reference.landmark);
    }
    raw[62] = project(68);
    raw[66] = project(68);
    extract_landmarks(&raw).expect("Failed to extract landmarks")
}

fn benchmark_pose_solver(c: &mut Criterion) {
    let mut group = c.benchmark_group("pose_solver");

    let k = Intrinsics::new(640.0, 320.0, 240.0);
    let truth = Pose::new(
        HeadAngles {
            yaw: 20.0,
            pitch: -10.0,
            roll: 5.0,
        }
        .to_rotation(),
        Vector3::new(30.0, -20.0, 700.0),
    );
    let landmarks = synthetic_landmarks(&truth, &k);
    let solver = PoseSolver::default();

    group.bench_function("cold_start_solve", |b| {
        b.iter(|| {
            let solution = solver
                .solve(black_box(&landmarks), &k, None)
                .expect("Pose solving failed");
            black_box(solution);
        });
    });

    let seed = solver.solve(&landmarks, &k, None).expect("Pose solving failed").pose;
    group.bench_function("seeded_solve", |b| {
        b.iter(|| {
            let solution = solver
                .solve(black_box(&landmarks), &k, Some(&seed))
                .expect("Pose solving failed");
            black_box(solution);
        });
    });

    let (object, image) = solver.correspondences(&landmarks);
    group.bench_function("epnp", |b| {
        b.iter(|| black_box(pnp::epnp(black_box(&object), &image, &k).expect("EPnP failed")));
    });

    let initial = pnp::frontal_guess(&object, &image, &k).expect("Frontal guess failed");
    group.bench_function("levenberg_marquardt_refine", |b| {
        b.iter(|| {
            black_box(pnp::refine(&object, &image, &k, black_box(&initial), &LmOptions::default()).expect("Refinement failed"))
        });
    });

    let rotation = *truth.rotation.matrix();
    group.bench_function("euler_angle_conversion", |b| {
        b.iter(|| black_box(rotation_matrix_to_euler(black_box(&rotation))));
    });

    group.finish();
}

fn benchmark_utils(c: &mut Criterion) {
    let mut group = c.benchmark_group("utils");

    group.bench_function("refine_boxes", |b| {
        let template = vec![
            BoundingBox::new(100.0, 100.0, 50.0, 60.0),
            BoundingBox::new(200.0, 150.0, 80.0, 70.0),
            BoundingBox::new(600.0, 420.0, 60.0, 80.0),
        ];

        b.iter(|| {
            let mut boxes = template.clone();
            refine_boxes(&mut boxes, 640.0, 480.0, 0.1);
            black_box(boxes);
        });
    });

    group.bench_function("extract_landmarks", |b| {
        let raw: Vec<Point2<f64>> = (0..68)
            .map(|i| {
                let angle = f64::from(i) * 2.0 * std::f64::consts::PI / 68.0;
                Point2::new(320.0 + 100.0 * angle.cos(), 240.0 + 100.0 * angle.sin())
            })
            .collect();

        b.iter(|| black_box(extract_landmarks(black_box(&raw)).expect("Failed to extract landmarks")));
    });

    group.finish();
}

fn benchmark_report(c: &mut Criterion) {
    let k = Intrinsics::new(640.0, 320.0, 240.0);
    let solver = PoseSolver::default();
    let poses: Vec<_> = (0..4)
        .map(|i| {
            let truth = Pose::new(
                HeadAngles {
                    yaw: f64::from(i) * 10.0,
                    pitch: 0.0,
                    roll: 0.0,
                }
                .to_rotation(),
                Vector3::new(f64::from(i) * 50.0, 0.0, 800.0),
            );
            let solution = solver
                .solve(&synthetic_landmarks(&truth, &k), &k, None)
                .expect("Pose solving failed");
            head_pose_broadcaster::pose_estimation::FacePose {
                face_index: i as usize,
                pose: solution.pose,
                reprojection_rms: solution.reprojection_rms,
            }
        })
        .collect();

    c.bench_function("pose_report_4_faces", |b| {
        b.iter(|| black_box(pose_report(black_box(&poses))));
    });
}

criterion_group!(benches, benchmark_pose_solver, benchmark_utils, benchmark_report);
criterion_main!(benches);
