//! g2o dataset integration tests
//!
//! A solved synthetic run is written as a g2o landmark dataset, read back,
//! replayed as timesteps and solved again.

use slam_test_utils::*;

use da_slam::io::{G2oLoader, G2oWriter, load_dataset};
use da_slam::{AssociationConfig, AssociationMethod, KnownAssociation, PosePrior, SE2, Slam2D};

fn solved_world() -> (Slam2D, World) {
    let world = square_world(2, 3.5);
    let mut slam = Slam2D::default();
    slam.initialize(prior_noise(), Box::new(KnownAssociation::new()))
        .unwrap();
    for timestep in &world.timesteps {
        slam.process_timestep(timestep).unwrap();
    }
    (slam, world)
}

#[test]
fn test_written_dataset_replays_as_same_timesteps() -> Result<(), Box<dyn std::error::Error>> {
    let (slam, world) = solved_world();
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("square.g2o");
    G2oWriter::write(&path, slam.graph(), slam.current_estimate())?;

    let dataset = load_dataset::<SE2, _>(&path)?;
    assert_eq!(dataset.poses.len(), world.poses.len());
    assert_eq!(dataset.landmarks.len(), world.observed_ids().len());

    let timesteps = dataset.to_timesteps();
    assert_eq!(timesteps.len(), world.timesteps.len());
    for (replayed, original) in timesteps.iter().zip(&world.timesteps) {
        assert_eq!(replayed.step, original.step);
        assert_eq!(replayed.odometry.is_some(), original.odometry.is_some());
        assert_eq!(replayed.observations.len(), original.observations.len());
    }
    Ok(())
}

#[test]
fn test_replayed_dataset_solves_with_maximum_likelihood() -> Result<(), Box<dyn std::error::Error>>
{
    let (slam, world) = solved_world();
    let text = G2oWriter::render(slam.graph(), slam.current_estimate());
    let timesteps = G2oLoader::parse::<SE2>(&text)?.to_timesteps();

    let mut replay = Slam2D::default();
    replay.initialize(
        SE2::default_prior_noise()?,
        AssociationMethod::MaximumLikelihood.build(AssociationConfig::default()),
    )?;
    for timestep in &timesteps {
        replay.process_timestep(timestep)?;
    }

    assert_eq!(
        replay.keys().landmark_count() as usize,
        world.observed_ids().len()
    );
    assert!(replay.error()? < 1e-6);
    Ok(())
}
