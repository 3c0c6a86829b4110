use crate::{
    camera::Intrinsics,
    constants::{
        DEFAULT_CONVERGENCE_EPSILON, DEFAULT_MAX_ITERATIONS, DEFAULT_SEED_ACCEPTANCE_RMS, MIN_PNP_CORRESPONDENCES,
    },
    face_model::FaceModel,
    landmarks::LandmarkSet,
    pnp::{self, LmOptions, Refinement},
    Error, Result,
};
use nalgebra::{Isometry3, Matrix3, Matrix4, Point2, Point3, Rotation3, Translation3, UnitQuaternion, Vector3};

/// Rigid transform from the head frame to the camera frame.
///
/// Translation is in reference model units (millimetres).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    /// Head-to-camera rotation
    pub rotation: Rotation3<f64>,
    /// Position of the head origin (sellion) in the camera frame
    pub translation: Vector3<f64>,
}

impl Pose {
    /// Build a pose from rotation and translation
    #[must_use]
    pub fn new(rotation: Rotation3<f64>, translation: Vector3<f64>) -> Self {
        Self { rotation, translation }
    }

    /// Convert to an isometry
    #[must_use]
    pub fn to_isometry(&self) -> Isometry3<f64> {
        Isometry3::from_parts(
            Translation3::from(self.translation),
            UnitQuaternion::from_rotation_matrix(&self.rotation),
        )
    }

    /// Build from an isometry
    #[must_use]
    pub fn from_isometry(iso: &Isometry3<f64>) -> Self {
        Self {
            rotation: iso.rotation.to_rotation_matrix(),
            translation: iso.translation.vector,
        }
    }

    /// 4x4 homogeneous transform
    #[must_use]
    pub fn matrix(&self) -> Matrix4<f64> {
        let mut m = self.rotation.to_homogeneous();
        m.fixed_view_mut::<3, 1>(0, 3).copy_from(&self.translation);
        m
    }

    /// Rotation as a unit quaternion
    #[must_use]
    pub fn quaternion(&self) -> UnitQuaternion<f64> {
        UnitQuaternion::from_rotation_matrix(&self.rotation)
    }

    /// Map a head-frame point into the camera frame
    #[must_use]
    pub fn transform_point(&self, point: &Point3<f64>) -> Point3<f64> {
        self.rotation * point + self.translation
    }

    /// Head orientation relative to a face looking straight into the camera
    #[must_use]
    pub fn angles(&self) -> HeadAngles {
        let deviation = self.rotation * FaceModel::frontal_rotation().inverse();
        let euler = rotation_matrix_to_euler(deviation.matrix());
        HeadAngles {
            pitch: euler.x,
            yaw: euler.y,
            roll: euler.z,
        }
    }
}

/// Head orientation in degrees.
///
/// Zero for all three means the face looks straight into the camera with the
/// head upright. Yaw turns about the image vertical, pitch about the image
/// horizontal and roll about the optical axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeadAngles {
    /// Rotation about the camera y axis
    pub yaw: f64,
    /// Rotation about the camera x axis
    pub pitch: f64,
    /// Rotation about the camera z axis
    pub roll: f64,
}

impl HeadAngles {
    /// Camera-frame rotation deviating from frontal by these angles
    /// (`Ry(yaw) * Rx(pitch) * Rz(roll)`)
    #[must_use]
    pub fn to_deviation(&self) -> Rotation3<f64> {
        Rotation3::from_axis_angle(&Vector3::y_axis(), self.yaw.to_radians())
            * Rotation3::from_axis_angle(&Vector3::x_axis(), self.pitch.to_radians())
            * Rotation3::from_axis_angle(&Vector3::z_axis(), self.roll.to_radians())
    }

    /// Head-to-camera rotation for these angles
    #[must_use]
    pub fn to_rotation(&self) -> Rotation3<f64> {
        self.to_deviation() * FaceModel::frontal_rotation()
    }
}

/// Convert a rotation matrix to Euler angles in degrees, returned as
/// `(pitch, yaw, roll)` for the `Ry * Rx * Rz` decomposition.
#[must_use]
pub fn rotation_matrix_to_euler(rotation_matrix: &Matrix3<f64>) -> Vector3<f64> {
    let r13 = rotation_matrix[(0, 2)];
    let r21 = rotation_matrix[(1, 0)];
    let r22 = rotation_matrix[(1, 1)];
    let r23 = rotation_matrix[(1, 2)];
    let r33 = rotation_matrix[(2, 2)];

    let pitch = (-r23).clamp(-1.0, 1.0).asin();
    let yaw = r13.atan2(r33);
    let roll = r21.atan2(r22);

    Vector3::new(pitch.to_degrees(), yaw.to_degrees(), roll.to_degrees())
}

/// Solved pose of one face
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FacePose {
    /// Index of the face in the provider's detection order
    pub face_index: usize,
    /// Head-to-camera transform
    pub pose: Pose,
    /// Root-mean-square reprojection error of the model points, in pixels
    pub reprojection_rms: f64,
}

/// Result of a single PnP solve
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoseSolution {
    /// Head-to-camera transform
    pub pose: Pose,
    /// Root-mean-square reprojection error in pixels
    pub reprojection_rms: f64,
    /// Whether the seed pose was accepted instead of a cold start
    pub seeded: bool,
}

/// Solver tuning
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolverOptions {
    /// Maximum Levenberg-Marquardt iterations per refinement
    pub max_iterations: usize,
    /// Convergence threshold on the update norm
    pub convergence_epsilon: f64,
    /// Seeded solves with a larger RMS error (pixels) fall back to a cold start
    pub seed_acceptance_rms: f64,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            convergence_epsilon: DEFAULT_CONVERGENCE_EPSILON,
            seed_acceptance_rms: DEFAULT_SEED_ACCEPTANCE_RMS,
        }
    }
}

/// Head pose solver using `PnP` on the reference model's landmarks
#[derive(Debug, Clone)]
pub struct PoseSolver {
    model: FaceModel,
    options: SolverOptions,
}

impl PoseSolver {
    /// Create a solver for the given reference model
    #[must_use]
    pub fn new(model: FaceModel, options: SolverOptions) -> Self {
        Self { model, options }
    }

    /// The reference model
    #[must_use]
    pub fn model(&self) -> &FaceModel {
        &self.model
    }

    /// Solver options
    #[must_use]
    pub fn options(&self) -> &SolverOptions {
        &self.options
    }

    /// Pair model points with the matching image landmarks, in model order.
    ///
    /// Landmarks that are missing or not finite are skipped.
    #[must_use]
    pub fn correspondences(&self, landmarks: &LandmarkSet) -> (Vec<Point3<f64>>, Vec<Point2<f64>>) {
        self.model
            .points()
            .iter()
            .filter_map(|reference| {
                landmarks
                    .get(reference.landmark)
                    .filter(|p| p.x.is_finite() && p.y.is_finite())
                    .map(|p| (reference.position, *p))
            })
            .unzip()
    }

    /// Estimate the head pose from a landmark set.
    ///
    /// With a seed (typically the same face's pose in the previous frame) the
    /// solver refines from it and keeps the result if it converges in front of
    /// the camera within the acceptance error. Otherwise it cold starts from
    /// EPnP and from a frontal guess, keeping the better refinement.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The intrinsics are invalid
    /// - Fewer than four correspondences are available
    /// - No initialisation leads to a valid pose
    pub fn solve(&self, landmarks: &LandmarkSet, intrinsics: &Intrinsics, seed: Option<&Pose>) -> Result<PoseSolution> {
        if !intrinsics.is_valid() {
            return Err(Error::InvalidCalibration(format!(
                "Focal length {} with optical center ({}, {}) cannot be used",
                intrinsics.focal_length, intrinsics.cx, intrinsics.cy
            )));
        }

        let (object, image) = self.correspondences(landmarks);
        if object.len() < MIN_PNP_CORRESPONDENCES {
            return Err(Error::InsufficientCorrespondences {
                found: object.len(),
                required: MIN_PNP_CORRESPONDENCES,
            });
        }

        let lm = LmOptions {
            max_iterations: self.options.max_iterations,
            epsilon: self.options.convergence_epsilon,
        };

        if let Some(seed) = seed {
            match pnp::refine(&object, &image, intrinsics, &seed.to_isometry(), &lm) {
                Ok(r) if r.converged && r.rms <= self.options.seed_acceptance_rms => {
                    return Ok(PoseSolution {
                        pose: Pose::from_isometry(&r.pose),
                        reprojection_rms: r.rms,
                        seeded: true,
                    });
                }
                Ok(r) => log::debug!("Seeded solve rejected (rms {:.3}px), cold starting", r.rms),
                Err(e) => log::debug!("Seeded solve failed: {e}"),
            }
        }

        let mut best: Option<Refinement> = None;
        let initialisers = [
            pnp::epnp(&object, &image, intrinsics),
            pnp::frontal_guess(&object, &image, intrinsics),
        ];
        for init in initialisers {
            let refined = init.and_then(|start| pnp::refine(&object, &image, intrinsics, &start, &lm));
            match refined {
                Ok(r) if best.map_or(true, |b| r.rms < b.rms) => best = Some(r),
                Ok(_) => {}
                Err(e) => log::debug!("PnP initialisation discarded: {e}"),
            }
        }

        let best = best.ok_or_else(|| Error::SolverFailed("No initialisation produced a valid pose".to_string()))?;
        Ok(PoseSolution {
            pose: Pose::from_isometry(&best.pose),
            reprojection_rms: best.rms,
            seeded: false,
        })
    }

    /// Project every model point through a pose, tagged with its landmark index
    #[must_use]
    pub fn project_model(&self, pose: &Pose, intrinsics: &Intrinsics) -> Vec<(usize, Option<Point2<f64>>)> {
        self.model
            .points()
            .iter()
            .map(|reference| {
                (
                    reference.landmark,
                    intrinsics.project(&pose.transform_point(&reference.position)),
                )
            })
            .collect()
    }
}

impl Default for PoseSolver {
    fn default() -> Self {
        Self::new(FaceModel::standard(), SolverOptions::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{constants::NUM_FACIAL_LANDMARKS, landmarks::extract_landmarks};

    /// Landmark set whose model landmarks are exact projections of `pose`.
    ///
    /// The mouth center is synthesized from 62 and 66, so both are placed on
    /// the projected stomion.
    fn synthetic_landmarks(solver: &PoseSolver, pose: &Pose, k: &Intrinsics) -> LandmarkSet {
        let mut raw = vec![Point2::new(k.cx, k.cy); NUM_FACIAL_LANDMARKS];
        for (landmark, pixel) in solver.project_model(pose, k) {
            let pixel = pixel.unwrap();
            if landmark < NUM_FACIAL_LANDMARKS {
                raw[landmark] = pixel;
            } else {
                raw[62] = pixel;
                raw[66] = pixel;
            }
        }
        extract_landmarks(&raw).unwrap()
    }

    fn pose_from_angles(yaw: f64, pitch: f64, roll: f64, t: Vector3<f64>) -> Pose {
        Pose::new(HeadAngles { yaw, pitch, roll }.to_rotation(), t)
    }

    #[test]
    fn test_euler_angle_conversion() {
        let angles = rotation_matrix_to_euler(&Matrix3::identity());
        assert!(angles.iter().all(|a| a.abs() < 1e-12));
    }

    #[test]
    fn test_frontal_pose_has_zero_angles() {
        let pose = Pose::new(FaceModel::frontal_rotation(), Vector3::new(0.0, 0.0, 600.0));
        let angles = pose.angles();
        assert!(angles.yaw.abs() < 1e-9);
        assert!(angles.pitch.abs() < 1e-9);
        assert!(angles.roll.abs() < 1e-9);
    }

    #[test]
    fn test_angles_round_trip() {
        let pose = pose_from_angles(25.0, -10.0, 5.0, Vector3::new(0.0, 0.0, 600.0));
        let angles = pose.angles();
        assert!((angles.yaw - 25.0).abs() < 1e-9);
        assert!((angles.pitch + 10.0).abs() < 1e-9);
        assert!((angles.roll - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_matrix_layout() {
        let pose = Pose::new(FaceModel::frontal_rotation(), Vector3::new(1.0, 2.0, 3.0));
        let m = pose.matrix();
        assert_eq!(m[(0, 3)], 1.0);
        assert_eq!(m[(1, 3)], 2.0);
        assert_eq!(m[(2, 3)], 3.0);
        assert_eq!(m[(3, 3)], 1.0);
        assert_eq!(m[(2, 0)], -1.0);
    }

    #[test]
    fn test_solve_recovers_synthetic_pose() {
        let solver = PoseSolver::default();
        let k = Intrinsics::new(640.0, 320.0, 240.0);
        let truth = pose_from_angles(20.0, -12.0, 6.0, Vector3::new(40.0, -25.0, 700.0));
        let landmarks = synthetic_landmarks(&solver, &truth, &k);

        let solution = solver.solve(&landmarks, &k, None).unwrap();
        assert!(solution.reprojection_rms < 1e-3);
        assert!(!solution.seeded);

        let angles = solution.pose.angles();
        assert!((angles.yaw - 20.0).abs() < 0.1);
        assert!((angles.pitch + 12.0).abs() < 0.1);
        assert!((angles.roll - 6.0).abs() < 0.1);
        assert!((solution.pose.translation - truth.translation).norm() < 1.0);
    }

    #[test]
    fn test_solve_is_deterministic() {
        let solver = PoseSolver::default();
        let k = Intrinsics::new(500.0, 320.0, 240.0);
        let truth = pose_from_angles(-30.0, 8.0, -4.0, Vector3::new(-60.0, 10.0, 550.0));
        let landmarks = synthetic_landmarks(&solver, &truth, &k);

        let a = solver.solve(&landmarks, &k, None).unwrap();
        let b = solver.solve(&landmarks, &k, None).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_seed_is_used_when_close() {
        let solver = PoseSolver::default();
        let k = Intrinsics::new(600.0, 320.0, 240.0);
        let truth = pose_from_angles(10.0, 5.0, 0.0, Vector3::new(0.0, 0.0, 650.0));
        let landmarks = synthetic_landmarks(&solver, &truth, &k);

        let nearby = pose_from_angles(12.0, 4.0, 1.0, Vector3::new(5.0, -3.0, 640.0));
        let solution = solver.solve(&landmarks, &k, Some(&nearby)).unwrap();
        assert!(solution.seeded);
        assert!((solution.pose.angles().yaw - 10.0).abs() < 0.1);
    }

    #[test]
    fn test_bad_seed_falls_back_to_cold_start() {
        let solver = PoseSolver::default();
        let k = Intrinsics::new(600.0, 320.0, 240.0);
        let truth = pose_from_angles(0.0, 0.0, 0.0, Vector3::new(0.0, 0.0, 650.0));
        let landmarks = synthetic_landmarks(&solver, &truth, &k);

        // Face pointing away from the camera, behind it
        let bad = Pose::new(Rotation3::identity(), Vector3::new(0.0, 0.0, -500.0));
        let solution = solver.solve(&landmarks, &k, Some(&bad)).unwrap();
        assert!(!solution.seeded);
        assert!(solution.reprojection_rms < 1e-3);
    }

    #[test]
    fn test_invalid_calibration_rejected() {
        let solver = PoseSolver::default();
        let good = Intrinsics::new(600.0, 320.0, 240.0);
        let truth = pose_from_angles(0.0, 0.0, 0.0, Vector3::new(0.0, 0.0, 650.0));
        let landmarks = synthetic_landmarks(&solver, &truth, &good);

        let zero = Intrinsics::new(0.0, 320.0, 240.0);
        assert!(matches!(
            solver.solve(&landmarks, &zero, None),
            Err(Error::InvalidCalibration(_))
        ));
    }

    #[test]
    fn test_non_finite_landmarks_reduce_correspondences() {
        let solver = PoseSolver::default();
        let mut raw = vec![Point2::new(f64::NAN, f64::NAN); NUM_FACIAL_LANDMARKS];
        raw[27] = Point2::new(320.0, 200.0);
        raw[30] = Point2::new(320.0, 240.0);
        raw[8] = Point2::new(320.0, 330.0);
        let landmarks = extract_landmarks(&raw).unwrap();

        let k = Intrinsics::new(600.0, 320.0, 240.0);
        match solver.solve(&landmarks, &k, None) {
            Err(Error::InsufficientCorrespondences { found, required }) => {
                assert_eq!(found, 3);
                assert_eq!(required, 4);
            }
            other => panic!("Expected InsufficientCorrespondences, got {other:?}"),
        }
    }
}
