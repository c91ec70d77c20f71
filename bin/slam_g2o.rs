use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use clap::Parser;
use da_slam::init_logger;
use da_slam::io::{G2oFormat, G2oLoader, G2oWriter};
use da_slam::slam::{PosePrior, Slam, SlamConfig};
use da_slam::{AssociationConfig, AssociationMethod, PipelineError, SE2, SE3};
use tracing::{debug, error, info, warn};

#[derive(Parser)]
#[command(name = "slam_g2o")]
#[command(about = "Run incremental landmark SLAM with data association on a g2o dataset")]
struct Args {
    /// g2o dataset with pose and landmark vertices, odometry and observation edges
    input: PathBuf,

    /// Read the dataset as SE3 poses with 3D landmarks
    #[arg(long)]
    three_d: bool,

    /// Association strategy: "ml" (maximum likelihood), "jcbb" or "known"
    #[arg(short, long, default_value = "ml")]
    method: AssociationMethod,

    /// Confidence level of the individual and joint compatibility gates
    #[arg(long, default_value = "0.99")]
    confidence: f64,

    /// Landmarks farther than this from the current pose are not considered
    #[arg(long, default_value = "1e9")]
    max_range: f64,

    /// Relinearization passes after a loop closure
    #[arg(long, default_value = "20")]
    loop_closure_passes: usize,

    /// Directory for estimate.g2o, error.txt and runtime.txt (or exception.txt on failure)
    #[arg(short, long)]
    output: Option<PathBuf>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    init_logger();

    if args.three_d {
        run::<SE3>(&args)
    } else {
        run::<SE2>(&args)
    }
}

fn run<P: G2oFormat + PosePrior>(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let dataset = G2oLoader::load::<P, _>(&args.input)?;
    let timesteps = dataset.to_timesteps();
    info!(
        "Loaded {}: {} vertices, {} edges, {} timesteps",
        args.input.display(),
        dataset.vertex_count(),
        dataset.edge_count(),
        timesteps.len()
    );
    if timesteps.is_empty() {
        warn!("Dataset has no pose chain, nothing to do");
        return Ok(());
    }

    let association = AssociationConfig::new(args.confidence, args.max_range)?;
    let config = SlamConfig::new().with_loop_closure_passes(args.loop_closure_passes);
    let mut slam = Slam::<P>::new(config);
    slam.initialize(P::default_prior_noise()?, args.method.build(association))?;
    info!(
        "Association: {}, confidence {}, max range {}",
        args.method, args.confidence, args.max_range
    );

    let total = timesteps.len();
    let mut runtime = 0.0;
    let mut loop_closures = 0;
    for timestep in &timesteps {
        let start = Instant::now();
        let result = slam.process_timestep(timestep);
        let duration = start.elapsed().as_secs_f64();
        runtime += duration;

        match result {
            Ok(report) => {
                if report.loop_closure {
                    loop_closures += 1;
                }
                debug!(
                    "Step {}: {:.6} s, {} associated, {} new landmarks",
                    report.step,
                    duration,
                    report.associated,
                    report.new_landmarks.len()
                );
            }
            Err(e) => {
                error!("Step {} failed: {}", timestep.step, e);
                if let Some(output) = &args.output {
                    save_failure(output, &e)?;
                }
                return Err(e.into());
            }
        }

        let step = timestep.step + 1;
        if step % (total / 10).max(1) == 0 || step == total {
            info!(
                "Processed timestep {}/{} ({:.0}%)",
                step,
                total,
                100.0 * step as f64 / total as f64
            );
        }
    }

    let final_error = slam.error()?;
    info!(
        "Done: {} poses, {} landmarks, {} loop closures, final error {:.6e}, runtime {:.3} s",
        slam.keys().pose_count(),
        slam.keys().landmark_count(),
        loop_closures,
        final_error,
        runtime
    );

    if let Some(output) = &args.output {
        fs::create_dir_all(output)?;
        G2oWriter::write(
            output.join("estimate.g2o"),
            slam.graph(),
            slam.current_estimate(),
        )?;
        fs::write(output.join("error.txt"), format!("{final_error}\n"))?;
        fs::write(output.join("runtime.txt"), format!("{runtime}\n"))?;
        info!("Results written to {}", output.display());
    }

    Ok(())
}

fn save_failure<P: G2oFormat>(
    output: &Path,
    e: &PipelineError<P>,
) -> Result<(), Box<dyn std::error::Error>> {
    fs::create_dir_all(output)?;
    let exception = output.join("exception.txt");
    match e.diagnostic() {
        Some(diagnostic) => {
            diagnostic.write_report(&exception)?;
            G2oWriter::write(
                output.join("failed_graph.g2o"),
                &diagnostic.graph,
                &diagnostic.estimate,
            )?;
        }
        None => fs::write(&exception, format!("failure: {}\nerror: {e}\n", e.kind()))?,
    }
    info!("Failure report written to {}", exception.display());
    Ok(())
}
