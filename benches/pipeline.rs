//! Pipeline benchmarks
//!
//! Runs the full timestep pipeline on a synthetic square trajectory with a ring
//! of landmarks, once per association strategy, plus the association step alone.
//!
//! Run with: `cargo bench`
//! View HTML reports in: `target/criterion/`

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use nalgebra::Point2;
use std::f64::consts::FRAC_PI_2;

use da_slam::{
    AssociationConfig, AssociationMethod, DataAssociation, IncrementalSolver, LieGroup,
    NoiseModel, Observation, Pose, PosePrior, SE2, Slam2D, Timestep2D,
};

// ============================================================================
// Test Fixtures
// ============================================================================

/// Landmarks on a ring around a 4 x 4 square.
fn landmarks() -> Vec<Point2<f64>> {
    (0..12)
        .map(|i| {
            let angle = i as f64 * std::f64::consts::TAU / 12.0;
            Point2::new(2.0 + 4.0 * angle.cos(), 2.0 + 4.0 * angle.sin())
        })
        .collect()
}

/// `laps` laps around the square, one unit per step, observing landmarks within 3.5.
fn square_world(laps: usize) -> Vec<Timestep2D> {
    let odom_noise = NoiseModel::from_sigmas(&[0.05, 0.05, 0.01]).unwrap();
    let obs_noise = NoiseModel::isotropic(2, 0.1).unwrap();
    let landmarks = landmarks();

    let mut pose = SE2::identity();
    let mut timesteps = Vec::new();
    for step in 0..=16 * laps {
        let mut timestep = Timestep2D::new(step);
        if step > 0 {
            let turn = if step % 4 == 0 { FRAC_PI_2 } else { 0.0 };
            let odom = SE2::from_xy_angle(1.0, 0.0, turn);
            pose = pose.compose(&odom);
            timestep = timestep.with_odometry(odom, odom_noise.clone());
        }
        for (id, landmark) in landmarks.iter().enumerate() {
            if (landmark - pose.position()).norm() <= 3.5 {
                timestep = timestep.with_observation(
                    Observation::new(pose.transform_to(landmark), obs_noise.clone())
                        .with_landmark_id(id),
                );
            }
        }
        timesteps.push(timestep);
    }
    timesteps
}

fn run(method: AssociationMethod, timesteps: &[Timestep2D]) -> Slam2D {
    let mut slam = Slam2D::default();
    slam.initialize(
        SE2::default_prior_noise().unwrap(),
        method.build(AssociationConfig::default()),
    )
    .unwrap();
    for timestep in timesteps {
        slam.process_timestep(timestep).unwrap();
    }
    slam
}

// ============================================================================
// Benchmarks
// ============================================================================

fn bench_pipeline(c: &mut Criterion) {
    let mut group = c.benchmark_group("pipeline");
    group.sample_size(10);

    let timesteps = square_world(2);
    for method in [
        AssociationMethod::Known,
        AssociationMethod::MaximumLikelihood,
        AssociationMethod::JointCompatibility,
    ] {
        group.bench_with_input(
            BenchmarkId::new("square_2_laps", method),
            &timesteps,
            |b, timesteps| b.iter(|| run(method, black_box(timesteps))),
        );
    }
    group.finish();
}

fn bench_association(c: &mut Criterion) {
    let mut group = c.benchmark_group("association");

    // Solve one lap, then re-associate the observations of its last timestep.
    let timesteps = square_world(1);
    let slam = run(AssociationMethod::Known, &timesteps);
    let estimate = slam.current_estimate();
    let marginals = slam
        .solver()
        .marginal_covariances(&estimate.keys())
        .unwrap();
    let observations = &timesteps[16].observations;
    assert!(!observations.is_empty());

    for method in [
        AssociationMethod::MaximumLikelihood,
        AssociationMethod::JointCompatibility,
    ] {
        let strategy: Box<dyn DataAssociation<SE2>> = method.build(AssociationConfig::default());
        group.bench_function(BenchmarkId::new("revisit", method), |b| {
            b.iter(|| {
                strategy
                    .associate(black_box(estimate), black_box(&marginals), observations)
                    .unwrap()
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_pipeline, bench_association);
criterion_main!(benches);
