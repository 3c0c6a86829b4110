//! Head pose estimation from facial landmarks, republished as per-face
//! coordinate-frame transforms.
//!
//! The estimation pipeline consists of:
//! 1. A [`LandmarkProvider`](provider::LandmarkProvider) finding faces and their 68 landmarks
//! 2. Landmark extraction, appending a synthesized mouth-center point
//! 3. Pose estimation using `PnP` (Perspective-n-Point) against a fixed
//!    anthropometric 3-D model
//! 4. Publishing one `<prefix>_<face_index>` transform per solved face
//!
//! Frames are processed one at a time. The only state carried across frames
//! is the camera calibration (and, when enabled, the previous frame's poses
//! as solver seeds).
//!
//! # Examples
//!
//! ## Estimating poses from recorded landmarks
//!
//! ```no_run
//! use head_pose_broadcaster::{
//!     camera::CameraModel,
//!     estimator::HeadPoseEstimator,
//!     pose_estimation::PoseSolver,
//!     provider::{Fixture, FixtureProvider},
//!     report::pose_report,
//! };
//! use ndarray::Array3;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let fixture = Fixture::from_file("recording.yaml")?;
//! let provider = FixtureProvider::from_fixture(&fixture);
//! let mut estimator = HeadPoseEstimator::new(provider, CameraModel::with_focal_length(455.0), PoseSolver::default());
//!
//! for frame in &fixture.frames {
//!     let image = Array3::<u8>::zeros((frame.height, frame.width, 3));
//!     estimator.update(image.view())?;
//!     println!("{}", pose_report(estimator.poses()));
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Solving a single face
//!
//! ```no_run
//! use head_pose_broadcaster::{camera::Intrinsics, landmarks::extract_landmarks, pose_estimation::PoseSolver};
//! use nalgebra::Point2;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! # let raw: Vec<Point2<f64>> = Vec::new();
//! let landmarks = extract_landmarks(&raw)?;
//! let solver = PoseSolver::default();
//! let solution = solver.solve(&landmarks, &Intrinsics::new(640.0, 320.0, 240.0), None)?;
//! let angles = solution.pose.angles();
//! println!("Yaw: {:.1}°, Pitch: {:.1}°, Roll: {:.1}°", angles.yaw, angles.pitch, angles.roll);
//! # Ok(())
//! # }
//! ```

/// Main application module
pub mod app;

/// Camera intrinsics and calibration
pub mod camera;

/// Configuration management
pub mod config;

/// Constants used throughout the application
pub mod constants;

/// Error types and result handling
pub mod error;

/// Per-frame orchestration of detection, extraction and solving
pub mod estimator;

/// 3-D anthropometric reference model
pub mod face_model;

/// Landmark extraction into 69-point sets
pub mod landmarks;

/// Publishing loop body driven by camera-info messages
pub mod node;

/// Perspective-n-Point geometry
pub mod pnp;

/// Head pose estimation module using `PnP` algorithm
pub mod pose_estimation;

/// Landmark provider boundary and implementations
pub mod provider;

/// Transform publishing
pub mod publisher;

/// Text reports of frame results
pub mod report;

/// Utility functions for image handling and face region geometry
pub mod utils;

pub use error::{Error, Result};
