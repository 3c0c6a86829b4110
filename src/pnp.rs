//! Perspective-n-Point geometry: EPnP initialisation and Levenberg-Marquardt
//! refinement of pixel reprojection error.
//!
//! Poses map object (head-frame) coordinates into the camera frame.

use crate::{
    camera::Intrinsics,
    constants::{DEFAULT_CONVERGENCE_EPSILON, DEFAULT_MAX_ITERATIONS, MIN_PNP_CORRESPONDENCES},
    face_model::FaceModel,
    Error, Result,
};
use levenberg_marquardt::{LeastSquaresProblem, LevenbergMarquardt, TerminationReason};
use nalgebra::{
    linalg::SymmetricEigen, storage::Owned, DMatrix, DVector, Dyn, Isometry3, Matrix2x3, Matrix3, OMatrix, Point2,
    Point3, Rotation3, SMatrix, Translation3, UnitQuaternion, Vector3, Vector6, U6,
};

/// Levenberg-Marquardt stopping criteria
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LmOptions {
    /// Patience: at most `max_iterations * 7` residual evaluations
    pub max_iterations: usize,
    /// Relative cost reduction and step size tolerance
    pub epsilon: f64,
}

impl Default for LmOptions {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            epsilon: DEFAULT_CONVERGENCE_EPSILON,
        }
    }
}

/// Outcome of a refinement run
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Refinement {
    /// Refined pose
    pub pose: Isometry3<f64>,
    /// Root-mean-square reprojection error in pixels
    pub rms: f64,
    /// Residual evaluations spent
    pub iterations: usize,
    /// Whether the solver stopped at a minimum rather than running out of patience
    pub converged: bool,
}

fn check_inputs(object: &[Point3<f64>], image: &[Point2<f64>]) -> Result<()> {
    if object.len() != image.len() {
        return Err(Error::InvalidInput(format!(
            "Got {} object points but {} image points",
            object.len(),
            image.len()
        )));
    }
    if object.len() < MIN_PNP_CORRESPONDENCES {
        return Err(Error::InsufficientCorrespondences {
            found: object.len(),
            required: MIN_PNP_CORRESPONDENCES,
        });
    }
    Ok(())
}

/// Sum of squared pixel residuals, or `None` if any point is behind the camera
fn reprojection_cost(
    object: &[Point3<f64>],
    image: &[Point2<f64>],
    k: &Intrinsics,
    pose: &Isometry3<f64>,
) -> Option<f64> {
    let mut cost = 0.0;
    for (pw, pi) in object.iter().zip(image) {
        let projected = k.project(&pose.transform_point(pw))?;
        cost += (projected - pi).norm_squared();
    }
    Some(cost)
}

/// Root-mean-square reprojection error in pixels.
///
/// Returns `None` if any object point lands on or behind the image plane.
#[must_use]
pub fn reprojection_rms(
    object: &[Point3<f64>],
    image: &[Point2<f64>],
    k: &Intrinsics,
    pose: &Isometry3<f64>,
) -> Option<f64> {
    if object.is_empty() {
        return None;
    }
    reprojection_cost(object, image, k, pose).map(|cost| (cost / object.len() as f64).sqrt())
}

/// Rigid transform aligning `object` onto `camera` (Kabsch, SVD based)
fn pose_from_points(object: &[Point3<f64>], camera: &[Vector3<f64>]) -> Result<Isometry3<f64>> {
    let n = object.len() as f64;
    let c_o = object.iter().fold(Vector3::zeros(), |acc, p| acc + p.coords) / n;
    let c_c = camera.iter().fold(Vector3::zeros(), |acc, p| acc + p) / n;

    let mut h = Matrix3::zeros();
    for (po, pc) in object.iter().zip(camera) {
        h += (pc - c_c) * (po.coords - c_o).transpose();
    }

    let svd = h.svd(true, true);
    let u = svd.u.ok_or_else(|| Error::SolverFailed("SVD failed in pose alignment".to_string()))?;
    let v_t = svd.v_t.ok_or_else(|| Error::SolverFailed("SVD failed in pose alignment".to_string()))?;
    let mut r = u * v_t;
    if r.determinant() < 0.0 {
        let mut u_fix = u;
        u_fix.column_mut(2).neg_mut();
        r = u_fix * v_t;
    }

    let t = c_c - r * c_o;
    let rotation = UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(r));
    Ok(Isometry3::from_parts(Translation3::from(t), rotation))
}

/// EPnP pose estimate for four or more non-degenerate points.
///
/// Control points are the object centroid plus its principal axes; their
/// camera-frame positions come from the null vector of the projection
/// system, scaled to preserve inter-control-point distances.
///
/// # Errors
///
/// Fails on mismatched or too few inputs and on degenerate (planar or
/// collinear) control point configurations.
pub fn epnp(object: &[Point3<f64>], image: &[Point2<f64>], k: &Intrinsics) -> Result<Isometry3<f64>> {
    check_inputs(object, image)?;
    let n = object.len();

    let normalized: Vec<Point2<f64>> = image.iter().map(|p| k.normalize(p)).collect();

    let centroid = object.iter().fold(Vector3::zeros(), |acc, p| acc + p.coords) / n as f64;
    let mut cov = Matrix3::zeros();
    for p in object {
        let d = p.coords - centroid;
        cov += d * d.transpose();
    }
    cov /= n as f64;

    let eig = SymmetricEigen::new(cov);
    let mut control_w = [centroid; 4];
    for i in 0..3 {
        let axis = eig.eigenvectors.column(i).into_owned();
        control_w[i + 1] = centroid + axis * eig.eigenvalues[i].abs().sqrt();
    }

    let basis = Matrix3::from_columns(&[
        control_w[1] - control_w[0],
        control_w[2] - control_w[0],
        control_w[3] - control_w[0],
    ]);
    let basis_inv = basis
        .try_inverse()
        .ok_or_else(|| Error::SolverFailed("Degenerate control points for EPnP".to_string()))?;

    let alphas: Vec<[f64; 4]> = object
        .iter()
        .map(|p| {
            let c = basis_inv * (p.coords - control_w[0]);
            [1.0 - c.x - c.y - c.z, c.x, c.y, c.z]
        })
        .collect();

    let mut m = DMatrix::<f64>::zeros(2 * n, 12);
    for (i, (a, uv)) in alphas.iter().zip(&normalized).enumerate() {
        for (j, &alpha) in a.iter().enumerate() {
            let c = 3 * j;
            m[(2 * i, c)] = alpha;
            m[(2 * i, c + 2)] = -uv.x * alpha;
            m[(2 * i + 1, c + 1)] = alpha;
            m[(2 * i + 1, c + 2)] = -uv.y * alpha;
        }
    }

    // Null vector of M via the smallest eigenvector of M^T M
    let mtm = m.transpose() * &m;
    let eig = SymmetricEigen::new(mtm);
    let (min_idx, _) = eig
        .eigenvalues
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.total_cmp(b.1))
        .ok_or_else(|| Error::SolverFailed("Empty EPnP system".to_string()))?;
    let sol = eig.eigenvectors.column(min_idx);

    let mut control_c = [Vector3::zeros(); 4];
    for (j, cc) in control_c.iter_mut().enumerate() {
        *cc = Vector3::new(sol[3 * j], sol[3 * j + 1], sol[3 * j + 2]);
    }

    let mut sum_w = 0.0;
    let mut sum_c = 0.0;
    for i in 0..4 {
        for j in (i + 1)..4 {
            sum_w += (control_w[i] - control_w[j]).norm_squared();
            sum_c += (control_c[i] - control_c[j]).norm_squared();
        }
    }
    if sum_c <= f64::EPSILON {
        return Err(Error::SolverFailed("Degenerate EPnP null vector".to_string()));
    }

    let mut scale = (sum_w / sum_c).sqrt();
    let camera_points = |scale: f64| -> Vec<Vector3<f64>> {
        alphas
            .iter()
            .map(|a| {
                a.iter()
                    .zip(&control_c)
                    .fold(Vector3::zeros(), |acc, (&alpha, cc)| acc + cc * alpha * scale)
            })
            .collect()
    };

    // The null vector's sign is arbitrary; the object must lie in front of the camera
    let mean_depth = camera_points(scale).iter().map(|p| p.z).sum::<f64>() / n as f64;
    if mean_depth < 0.0 {
        scale = -scale;
    }

    pose_from_points(object, &camera_points(scale))
}

/// Initial guess for a face looking straight into the camera.
///
/// Depth comes from the ratio between object spread and image spread, and
/// the object centroid is placed on the ray through the image centroid.
///
/// # Errors
///
/// Fails on mismatched or too few inputs, or if all image points coincide.
pub fn frontal_guess(object: &[Point3<f64>], image: &[Point2<f64>], k: &Intrinsics) -> Result<Isometry3<f64>> {
    check_inputs(object, image)?;
    let n = object.len() as f64;

    let c_obj = object.iter().fold(Vector3::zeros(), |acc, p| acc + p.coords) / n;
    let c_img = image.iter().fold(nalgebra::Vector2::zeros(), |acc, p| acc + p.coords) / n;

    let spread_obj = object.iter().map(|p| (p.coords - c_obj).norm()).sum::<f64>() / n;
    let spread_img = image.iter().map(|p| (p.coords - c_img).norm()).sum::<f64>() / n;
    if spread_img <= f64::EPSILON {
        return Err(Error::SolverFailed("All image points coincide".to_string()));
    }

    let depth = k.focal_length * spread_obj / spread_img;
    let ray = k.normalize(&Point2::from(c_img));
    let centroid_cam = Vector3::new(ray.x * depth, ray.y * depth, depth);

    let rotation = FaceModel::frontal_rotation();
    let translation = centroid_cam - rotation * c_obj;
    Ok(Isometry3::from_parts(
        Translation3::from(translation),
        UnitQuaternion::from_rotation_matrix(&rotation),
    ))
}

/// Jacobian rows and residual of one correspondence at the given pose.
///
/// The rotation is perturbed on the left: `R <- exp(w) R`, `t <- t + dt`.
fn point_terms(
    pw: &Point3<f64>,
    pi: &Point2<f64>,
    k: &Intrinsics,
    rotation: &Rotation3<f64>,
    translation: &Vector3<f64>,
) -> Option<(SMatrix<f64, 2, 6>, nalgebra::Vector2<f64>)> {
    let q = rotation * pw.coords;
    let pc = q + translation;
    if pc.z <= f64::EPSILON {
        return None;
    }

    let f = k.focal_length;
    let inv_z = 1.0 / pc.z;
    let residual = nalgebra::Vector2::new(
        f * pc.x * inv_z + k.cx - pi.x,
        f * pc.y * inv_z + k.cy - pi.y,
    );

    let d_proj = Matrix2x3::new(
        f * inv_z, 0.0, -f * pc.x * inv_z * inv_z,
        0.0, f * inv_z, -f * pc.y * inv_z * inv_z,
    );
    // d(pc)/d(w) = -[q]x
    let d_rot = Matrix3::new(
        0.0, q.z, -q.y,
        -q.z, 0.0, q.x,
        q.y, -q.x, 0.0,
    );

    let mut jacobian = SMatrix::<f64, 2, 6>::zeros();
    jacobian.fixed_view_mut::<2, 3>(0, 0).copy_from(&(d_proj * d_rot));
    jacobian.fixed_view_mut::<2, 3>(0, 3).copy_from(&d_proj);
    Some((jacobian, residual))
}

/// Reprojection least-squares problem over a 6-dof pose.
///
/// Parameters are `[w, t]`: the pose is `(exp(w) * base, t)`.
struct PoseProblem<'a> {
    object: &'a [Point3<f64>],
    image: &'a [Point2<f64>],
    k: &'a Intrinsics,
    base: Rotation3<f64>,
    params: Vector6<f64>,
    rotation: Rotation3<f64>,
}

impl<'a> PoseProblem<'a> {
    fn new(object: &'a [Point3<f64>], image: &'a [Point2<f64>], k: &'a Intrinsics, initial: &Isometry3<f64>) -> Self {
        let base = initial.rotation.to_rotation_matrix();
        let mut params = Vector6::zeros();
        params.fixed_rows_mut::<3>(3).copy_from(&initial.translation.vector);
        Self {
            object,
            image,
            k,
            base,
            params,
            rotation: base,
        }
    }

    fn translation(&self) -> Vector3<f64> {
        self.params.fixed_rows::<3>(3).into_owned()
    }

    fn pose(&self) -> Isometry3<f64> {
        Isometry3::from_parts(
            Translation3::from(self.translation()),
            UnitQuaternion::from_rotation_matrix(&self.rotation),
        )
    }
}

/// Left Jacobian of the SO(3) exponential map
fn so3_left_jacobian(w: &Vector3<f64>) -> Matrix3<f64> {
    let theta = w.norm();
    let skew = w.cross_matrix();
    if theta < 1e-8 {
        return Matrix3::identity() + skew * 0.5 + skew * skew / 6.0;
    }
    let theta2 = theta * theta;
    Matrix3::identity()
        + skew * ((1.0 - theta.cos()) / theta2)
        + skew * skew * ((theta - theta.sin()) / (theta2 * theta))
}

impl LeastSquaresProblem<f64, Dyn, U6> for PoseProblem<'_> {
    type ResidualStorage = Owned<f64, Dyn>;
    type JacobianStorage = Owned<f64, Dyn, U6>;
    type ParameterStorage = Owned<f64, U6>;

    fn set_params(&mut self, x: &Vector6<f64>) {
        self.params.copy_from(x);
        self.rotation = Rotation3::new(x.fixed_rows::<3>(0).into_owned()) * self.base;
    }

    fn params(&self) -> Vector6<f64> {
        self.params
    }

    fn residuals(&self) -> Option<DVector<f64>> {
        let translation = self.translation();
        let mut residuals = DVector::zeros(2 * self.object.len());
        for (i, (pw, pi)) in self.object.iter().zip(self.image).enumerate() {
            let (_, res) = point_terms(pw, pi, self.k, &self.rotation, &translation)?;
            residuals.fixed_rows_mut::<2>(2 * i).copy_from(&res);
        }
        Some(residuals)
    }

    fn jacobian(&self) -> Option<OMatrix<f64, Dyn, U6>> {
        let translation = self.translation();
        let exp_jacobian = so3_left_jacobian(&self.params.fixed_rows::<3>(0).into_owned());
        let mut jacobian = OMatrix::<f64, Dyn, U6>::zeros(2 * self.object.len());
        for (i, (pw, pi)) in self.object.iter().zip(self.image).enumerate() {
            let (jac, _) = point_terms(pw, pi, self.k, &self.rotation, &translation)?;
            jacobian
                .fixed_view_mut::<2, 3>(2 * i, 0)
                .copy_from(&(jac.fixed_view::<2, 3>(0, 0) * exp_jacobian));
            jacobian
                .fixed_view_mut::<2, 3>(2 * i, 3)
                .copy_from(&jac.fixed_view::<2, 3>(0, 3));
        }
        Some(jacobian)
    }
}

/// Refine a pose by Levenberg-Marquardt on pixel reprojection error.
///
/// # Errors
///
/// Fails on mismatched or too few inputs, or if the initial or refined pose
/// puts an object point behind the camera.
pub fn refine(
    object: &[Point3<f64>],
    image: &[Point2<f64>],
    k: &Intrinsics,
    initial: &Isometry3<f64>,
    options: &LmOptions,
) -> Result<Refinement> {
    check_inputs(object, image)?;
    if reprojection_cost(object, image, k, initial).is_none() {
        return Err(Error::SolverFailed("Initial pose puts points behind the camera".to_string()));
    }

    let tolerance = options.epsilon.max(f64::EPSILON);
    let lm = LevenbergMarquardt::new()
        .with_ftol(tolerance)
        .with_xtol(tolerance)
        .with_patience(options.max_iterations.max(1));

    let (problem, report) = lm.minimize(PoseProblem::new(object, image, k, initial));
    let pose = problem.pose();
    let cost = reprojection_cost(object, image, k, &pose)
        .ok_or_else(|| Error::SolverFailed("Refinement moved points behind the camera".to_string()))?;

    // A step no longer reducing the cost means we sit at a minimum
    let converged = report.termination.was_successful()
        || matches!(report.termination, TerminationReason::NoImprovementPossible(_));
    log::trace!("Pose refinement ended with {:?}", report.termination);

    Ok(Refinement {
        pose,
        rms: (cost / object.len() as f64).sqrt(),
        iterations: report.number_of_evaluations,
        converged,
    })
}
