use super::*;
use crate::core::factors::{Factor, FactorGraph};
use crate::core::key::Key;
use crate::core::measurements::{Observation, Odometry, Timestep};
use crate::core::noise::NoiseModel;
use crate::core::values::Values;
use crate::manifold::{EuclideanPoint, LieGroup, Pose, SE2, SE3};
use nalgebra::{Quaternion, Vector3};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::fs;
use tracing::{debug, warn};

/// Per-dimension g2o vocabulary.
pub trait G2oFormat: Pose {
    const POSE_VERTEX: &'static str;
    const POINT_VERTEX: &'static str;
    const ODOMETRY_EDGE: &'static str;
    const OBSERVATION_EDGE: &'static str;
    /// Whether observation edges may carry a sensor parameter id before the measurement
    const OBSERVATION_PARAM: bool;
    /// Numbers encoding one pose
    const POSE_FIELDS: usize;

    fn pose_from_fields(fields: &[f64]) -> Self;

    fn pose_fields(&self) -> Vec<f64>;
}

impl G2oFormat for SE2 {
    const POSE_VERTEX: &'static str = "VERTEX_SE2";
    const POINT_VERTEX: &'static str = "VERTEX_XY";
    const ODOMETRY_EDGE: &'static str = "EDGE_SE2";
    const OBSERVATION_EDGE: &'static str = "EDGE_SE2_XY";
    const OBSERVATION_PARAM: bool = false;
    const POSE_FIELDS: usize = 3;

    fn pose_from_fields(fields: &[f64]) -> Self {
        SE2::from_xy_angle(fields[0], fields[1], fields[2])
    }

    fn pose_fields(&self) -> Vec<f64> {
        vec![self.x(), self.y(), self.angle()]
    }
}

impl G2oFormat for SE3 {
    const POSE_VERTEX: &'static str = "VERTEX_SE3:QUAT";
    const POINT_VERTEX: &'static str = "VERTEX_TRACKXYZ";
    const ODOMETRY_EDGE: &'static str = "EDGE_SE3:QUAT";
    const OBSERVATION_EDGE: &'static str = "EDGE_SE3_TRACKXYZ";
    const OBSERVATION_PARAM: bool = true;
    const POSE_FIELDS: usize = 7;

    // x y z qx qy qz qw
    fn pose_from_fields(fields: &[f64]) -> Self {
        SE3::from_translation_quaternion(
            Vector3::new(fields[0], fields[1], fields[2]),
            Quaternion::new(fields[6], fields[3], fields[4], fields[5]),
        )
    }

    fn pose_fields(&self) -> Vec<f64> {
        let t = self.translation();
        let q = self.rotation_quaternion().into_inner();
        vec![t.x, t.y, t.z, q.i, q.j, q.k, q.w]
    }
}

/// Relative motion between two pose vertices.
#[derive(Debug, Clone, PartialEq)]
pub struct OdometryEdge<P: Pose> {
    pub from: usize,
    pub to: usize,
    pub measured: P,
    pub noise: NoiseModel,
}

/// Landmark position measured from a pose vertex.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservationEdge<Pt: EuclideanPoint> {
    pub pose: usize,
    pub landmark: usize,
    pub measured: Pt,
    pub noise: NoiseModel,
}

/// Contents of a g2o landmark dataset, edges in file order.
#[derive(Debug, Clone)]
pub struct G2oDataset<P: Pose> {
    pub poses: BTreeMap<usize, P>,
    pub landmarks: BTreeMap<usize, P::Point>,
    pub odometry: Vec<OdometryEdge<P>>,
    pub observations: Vec<ObservationEdge<P::Point>>,
}

impl<P: Pose> Default for G2oDataset<P> {
    fn default() -> Self {
        Self {
            poses: BTreeMap::new(),
            landmarks: BTreeMap::new(),
            odometry: Vec::new(),
            observations: Vec::new(),
        }
    }
}

impl<P: Pose> G2oDataset<P> {
    pub fn vertex_count(&self) -> usize {
        self.poses.len() + self.landmarks.len()
    }

    pub fn edge_count(&self) -> usize {
        self.odometry.len() + self.observations.len()
    }

    /// Replay the dataset as a timestep stream.
    ///
    /// The pose chain starts at the source of the first odometry edge and follows
    /// edges whose source is the last pose of the chain. Step `k` is the `k`-th
    /// chain pose; its observations keep the dataset landmark id as
    /// `landmark_id`. Edges off the chain are skipped with a warning.
    pub fn to_timesteps(&self) -> Vec<Timestep<P>> {
        let Some(start) = self
            .odometry
            .first()
            .map(|edge| edge.from)
            .or_else(|| self.poses.keys().next().copied())
        else {
            return Vec::new();
        };

        let mut chain = vec![start];
        let mut visited = HashSet::from([start]);
        let mut motions = Vec::with_capacity(self.odometry.len());
        for edge in &self.odometry {
            let current = chain[chain.len() - 1];
            if edge.from != current || visited.contains(&edge.to) {
                warn!(
                    "skipping odometry edge {} -> {}: not part of the pose chain",
                    edge.from, edge.to
                );
                continue;
            }
            visited.insert(edge.to);
            chain.push(edge.to);
            motions.push(Odometry::new(edge.measured.clone(), edge.noise.clone()));
        }

        let step_of: HashMap<usize, usize> = chain
            .iter()
            .enumerate()
            .map(|(step, id)| (*id, step))
            .collect();
        let mut observations: Vec<Vec<Observation<P::Point>>> = vec![Vec::new(); chain.len()];
        for edge in &self.observations {
            match step_of.get(&edge.pose) {
                Some(&step) => observations[step].push(
                    Observation::new(edge.measured, edge.noise.clone())
                        .with_landmark_id(edge.landmark),
                ),
                None => warn!(
                    "skipping observation of landmark {} from pose {}: pose is not on the chain",
                    edge.landmark, edge.pose
                ),
            }
        }

        let mut motions = motions.into_iter();
        observations
            .into_iter()
            .enumerate()
            .map(|(step, observations)| {
                let mut timestep = Timestep::new(step).with_observations(observations);
                if step > 0 {
                    timestep.odometry = motions.next();
                }
                timestep
            })
            .collect()
    }
}

/// g2o landmark dataset loader
pub struct G2oLoader;

impl G2oLoader {
    pub fn load<P: G2oFormat, Q: AsRef<Path>>(path: Q) -> Result<G2oDataset<P>, IoError> {
        let content = fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse<P: G2oFormat>(content: &str) -> Result<G2oDataset<P>, IoError> {
        let mut dataset = G2oDataset::default();
        let mut vertex_ids = HashSet::new();

        for (index, line) in content.lines().enumerate() {
            Self::parse_line(line, index + 1, &mut dataset, &mut vertex_ids)?;
        }

        debug!(
            "parsed g2o dataset: {} poses, {} landmarks, {} odometry edges, {} observations",
            dataset.poses.len(),
            dataset.landmarks.len(),
            dataset.odometry.len(),
            dataset.observations.len()
        );
        Ok(dataset)
    }

    fn parse_line<P: G2oFormat>(
        line: &str,
        line_num: usize,
        dataset: &mut G2oDataset<P>,
        vertex_ids: &mut HashSet<usize>,
    ) -> Result<(), IoError> {
        let line = line.trim();

        // Skip empty lines and comments
        if line.is_empty() || line.starts_with('#') {
            return Ok(());
        }

        let parts: Vec<&str> = line.split_whitespace().collect();
        let tag = parts[0];
        let point_dim = P::Point::DIM;

        if tag == P::POSE_VERTEX {
            let id = parse_id(&parts, 1, line_num)?;
            let fields = parse_floats(&parts, 2, P::POSE_FIELDS, line_num)?;
            if !vertex_ids.insert(id) {
                return Err(IoError::DuplicateVertex { id });
            }
            dataset.poses.insert(id, P::pose_from_fields(&fields));
        } else if tag == P::POINT_VERTEX {
            let id = parse_id(&parts, 1, line_num)?;
            let fields = parse_floats(&parts, 2, point_dim, line_num)?;
            if !vertex_ids.insert(id) {
                return Err(IoError::DuplicateVertex { id });
            }
            dataset.landmarks.insert(id, P::Point::from_slice(&fields));
        } else if tag == P::ODOMETRY_EDGE {
            let from = parse_id(&parts, 1, line_num)?;
            let to = parse_id(&parts, 2, line_num)?;
            let fields = parse_floats(&parts, 3, P::POSE_FIELDS, line_num)?;
            let noise = Self::parse_noise(&parts, 3 + P::POSE_FIELDS, P::DOF, line_num)?;
            dataset.odometry.push(OdometryEdge {
                from,
                to,
                measured: P::pose_from_fields(&fields),
                noise,
            });
        } else if tag == P::OBSERVATION_EDGE {
            let pose = parse_id(&parts, 1, line_num)?;
            let landmark = parse_id(&parts, 2, line_num)?;
            let plain_len = 3 + point_dim + upper_triangle_len(point_dim);
            let start = if P::OBSERVATION_PARAM && parts.len() > plain_len {
                4
            } else {
                3
            };
            let fields = parse_floats(&parts, start, point_dim, line_num)?;
            let noise = Self::parse_noise(&parts, start + point_dim, point_dim, line_num)?;
            dataset.observations.push(ObservationEdge {
                pose,
                landmark,
                measured: P::Point::from_slice(&fields),
                noise,
            });
        }
        // Other tags (FIX, PARAMS_*, the other dimension) are skipped

        Ok(())
    }

    /// Noise model from an upper-triangular information matrix at `parts[start..]`.
    fn parse_noise(
        parts: &[&str],
        start: usize,
        dim: usize,
        line_num: usize,
    ) -> Result<NoiseModel, IoError> {
        let upper = parse_floats(parts, start, upper_triangle_len(dim), line_num)?;
        NoiseModel::from_information(symmetric_from_upper(dim, &upper)).map_err(|e| {
            IoError::Parse {
                line: line_num,
                message: format!("invalid information matrix: {e}"),
            }
        })
    }
}

/// Writes a solved graph back in g2o format.
///
/// Poses are numbered first, landmarks continue after them, both in key order.
/// Prior factors become `FIX` lines.
pub struct G2oWriter;

impl G2oWriter {
    pub fn write<P: G2oFormat, Q: AsRef<Path>>(
        path: Q,
        graph: &FactorGraph<P>,
        estimate: &Values<P>,
    ) -> Result<(), IoError> {
        let mut out = String::new();
        Self::write_to(&mut out, graph, estimate)
            .map_err(|_| IoError::UnsupportedFormat("could not format the g2o graph".into()))?;
        fs::write(path, out)?;
        Ok(())
    }

    /// Graph as g2o text.
    pub fn render<P: G2oFormat>(graph: &FactorGraph<P>, estimate: &Values<P>) -> String {
        let mut out = String::new();
        match Self::write_to(&mut out, graph, estimate) {
            Ok(()) => out,
            Err(fmt::Error) => String::new(),
        }
    }

    /// Write the vertex and edge lines of `graph` and `estimate` into `out`.
    pub fn write_to<P: G2oFormat>(
        out: &mut impl fmt::Write,
        graph: &FactorGraph<P>,
        estimate: &Values<P>,
    ) -> fmt::Result {
        let mut keys = graph.keys();
        keys.extend(estimate.keys());
        let ids: HashMap<Key, usize> = keys.iter().enumerate().map(|(id, key)| (*key, id)).collect();
        let id = |key: Key| ids.get(&key).copied().ok_or(fmt::Error);

        for (key, pose) in estimate.poses() {
            writeln!(
                out,
                "{} {} {}",
                P::POSE_VERTEX,
                id(Key::Pose(key))?,
                join(&pose.pose_fields())
            )?;
        }
        for (key, point) in estimate.landmarks() {
            writeln!(
                out,
                "{} {} {}",
                P::POINT_VERTEX,
                id(Key::Landmark(key))?,
                join(point.to_dvector().as_slice())
            )?;
        }

        for factor in graph {
            match factor {
                Factor::Prior { key, .. } => {
                    writeln!(out, "FIX {}", id(Key::Pose(*key))?)?;
                }
                Factor::Between {
                    from,
                    to,
                    measured,
                    noise,
                } => {
                    writeln!(
                        out,
                        "{} {} {} {} {}",
                        P::ODOMETRY_EDGE,
                        id(Key::Pose(*from))?,
                        id(Key::Pose(*to))?,
                        join(&measured.pose_fields()),
                        join(&upper_triangle(&noise.information()))
                    )?;
                }
                Factor::PoseToPoint {
                    pose,
                    landmark,
                    measured,
                    noise,
                } => {
                    let param = if P::OBSERVATION_PARAM { " 0" } else { "" };
                    writeln!(
                        out,
                        "{} {} {}{} {} {}",
                        P::OBSERVATION_EDGE,
                        id(Key::Pose(*pose))?,
                        id(Key::Landmark(*landmark))?,
                        param,
                        join(measured.to_dvector().as_slice()),
                        join(&upper_triangle(&noise.information()))
                    )?;
                }
            }
        }
        Ok(())
    }
}

fn join(values: &[f64]) -> String {
    values
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::key::{LandmarkKey, PoseKey};
    use approx::assert_relative_eq;
    use nalgebra::{Point2, Point3};
    use std::io::Write;

    const TOY_2D: &str = "\
# two poses, two landmarks
VERTEX_SE2 0 0 0 0
VERTEX_SE2 1 1 0 0
VERTEX_XY 10 2 0
VERTEX_XY 11 1 1
EDGE_SE2 0 1 1 0 0 100 0 0 100 0 1000
EDGE_SE2_XY 0 10 2 0 400 0 400
EDGE_SE2_XY 1 10 1 0 400 0 400
EDGE_SE2_XY 1 11 0 1 400 0 400
";

    #[test]
    fn test_parse_2d_dataset() {
        let dataset = G2oLoader::parse::<SE2>(TOY_2D).unwrap();
        assert_eq!(dataset.poses.len(), 2);
        assert_eq!(dataset.landmarks.len(), 2);
        assert_eq!(dataset.vertex_count(), 4);
        assert_eq!(dataset.edge_count(), 4);

        let odom = &dataset.odometry[0];
        assert_eq!((odom.from, odom.to), (0, 1));
        assert_relative_eq!(odom.measured.x(), 1.0);
        assert_relative_eq!(odom.noise.sigmas()[2], 1000f64.sqrt().recip(), epsilon = 1e-12);

        let obs = &dataset.observations[2];
        assert_eq!((obs.pose, obs.landmark), (1, 11));
        assert_eq!(obs.measured, Point2::new(0.0, 1.0));
        assert_relative_eq!(obs.noise.sigmas()[0], 0.05, epsilon = 1e-12);
    }

    #[test]
    fn test_to_timesteps() {
        let dataset = G2oLoader::parse::<SE2>(TOY_2D).unwrap();
        let timesteps = dataset.to_timesteps();
        assert_eq!(timesteps.len(), 2);

        assert_eq!(timesteps[0].step, 0);
        assert!(timesteps[0].odometry.is_none());
        assert_eq!(timesteps[0].observations.len(), 1);
        assert_eq!(timesteps[0].observations[0].landmark_id, Some(10));

        assert_eq!(timesteps[1].step, 1);
        assert!(timesteps[1].odometry.is_some());
        let ids: Vec<_> = timesteps[1]
            .observations
            .iter()
            .map(|o| o.landmark_id)
            .collect();
        assert_eq!(ids, vec![Some(10), Some(11)]);
    }

    #[test]
    fn test_off_chain_odometry_is_skipped() {
        let content = "\
EDGE_SE2 0 1 1 0 0 1 0 0 1 0 1
EDGE_SE2 1 0 -1 0 0 1 0 0 1 0 1
EDGE_SE2 5 6 1 0 0 1 0 0 1 0 1
EDGE_SE2 1 2 1 0 0 1 0 0 1 0 1
";
        let dataset = G2oLoader::parse::<SE2>(content).unwrap();
        let timesteps = dataset.to_timesteps();
        assert_eq!(timesteps.len(), 3);
        assert!(timesteps.iter().skip(1).all(|t| t.odometry.is_some()));
    }

    #[test]
    fn test_parse_3d_with_and_without_param() {
        let content = "\
VERTEX_SE3:QUAT 0 0 0 0 0 0 0 1
VERTEX_TRACKXYZ 1 1 2 3
EDGE_SE3_TRACKXYZ 0 1 0 1 2 3 1 0 0 1 0 1
EDGE_SE3_TRACKXYZ 0 1 1 2 3 1 0 0 1 0 1
PARAMS_SE3OFFSET 0 0 0 0 0 0 0 1
";
        let dataset = G2oLoader::parse::<SE3>(content).unwrap();
        assert_eq!(dataset.poses.len(), 1);
        assert_eq!(dataset.landmarks[&1], Point3::new(1.0, 2.0, 3.0));
        assert_eq!(dataset.observations.len(), 2);
        for obs in &dataset.observations {
            assert_eq!(obs.measured, Point3::new(1.0, 2.0, 3.0));
            assert_eq!(obs.noise.dim(), 3);
        }
    }

    #[test]
    fn test_parse_errors() {
        let duplicate = "VERTEX_SE2 0 0 0 0\nVERTEX_XY 0 1 1\n";
        assert!(matches!(
            G2oLoader::parse::<SE2>(duplicate),
            Err(IoError::DuplicateVertex { id: 0 })
        ));

        let short = "VERTEX_SE2 0 0 0 0\nEDGE_SE2_XY 0 1 1.0\n";
        assert!(matches!(
            G2oLoader::parse::<SE2>(short),
            Err(IoError::MissingFields { line: 2 })
        ));

        let bad_number = "VERTEX_SE2 0 zero 0 0\n";
        assert!(matches!(
            G2oLoader::parse::<SE2>(bad_number),
            Err(IoError::InvalidNumber { line: 1, .. })
        ));

        let singular = "EDGE_SE2_XY 0 1 1 0 0 0 0\n";
        assert!(matches!(
            G2oLoader::parse::<SE2>(singular),
            Err(IoError::Parse { line: 1, .. })
        ));
    }

    #[test]
    fn test_load_from_file() -> Result<(), Box<dyn std::error::Error>> {
        let mut file = tempfile::Builder::new().suffix(".g2o").tempfile()?;
        file.write_all(TOY_2D.as_bytes())?;

        let dataset = crate::io::load_dataset::<SE2, _>(file.path())?;
        assert_eq!(dataset.edge_count(), 4);
        Ok(())
    }

    #[test]
    fn test_writer_output_loads_back() {
        let mut graph = FactorGraph::new();
        graph.push(Factor::prior(
            PoseKey(0),
            SE2::identity(),
            NoiseModel::isotropic(3, 0.1).unwrap(),
        ));
        graph.push(Factor::between(
            PoseKey(0),
            PoseKey(1),
            SE2::from_xy_angle(1.0, 0.0, 0.1),
            NoiseModel::from_sigmas(&[0.1, 0.1, 0.01]).unwrap(),
        ));
        graph.push(Factor::pose_to_point(
            PoseKey(1),
            LandmarkKey(0),
            Point2::new(1.0, 0.5),
            NoiseModel::isotropic(2, 0.1).unwrap(),
        ));
        let mut estimate = Values::new();
        estimate.insert_pose(PoseKey(0), SE2::identity()).unwrap();
        estimate
            .insert_pose(PoseKey(1), SE2::from_xy_angle(1.0, 0.0, 0.1))
            .unwrap();
        estimate
            .insert_landmark(LandmarkKey(0), Point2::new(2.0, 0.6))
            .unwrap();

        let text = G2oWriter::render(&graph, &estimate);
        assert!(text.contains("FIX 0"));
        assert!(text.contains("VERTEX_XY 2 2 0.6"));

        let dataset = G2oLoader::parse::<SE2>(&text).unwrap();
        assert_eq!(dataset.poses.len(), 2);
        assert_eq!(dataset.landmarks.len(), 1);
        assert_relative_eq!(dataset.poses[&1].angle(), 0.1, epsilon = 1e-12);
        assert_relative_eq!(
            dataset.odometry[0].noise.sigmas()[2],
            0.01,
            epsilon = 1e-9
        );
        assert_eq!(dataset.observations[0].landmark, 2);

        // Writer errors surface instead of truncating silently.
        struct Full;
        impl fmt::Write for Full {
            fn write_str(&mut self, _: &str) -> fmt::Result {
                Err(fmt::Error)
            }
        }
        assert_eq!(G2oWriter::write_to(&mut Full, &graph, &estimate), Err(fmt::Error));
        let mut same = String::new();
        G2oWriter::write_to(&mut same, &graph, &estimate).unwrap();
        assert_eq!(same, text);
    }
}
