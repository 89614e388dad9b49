//! Metric-driven local adaptation of simplex meshes in 2D and 3D
use core::fmt;
use env_logger::Env;

pub mod adapt;
pub mod cavity;
pub mod geom_elems;
pub mod geometry;
pub mod graph;
pub mod mesh;
pub mod mesh_interpolate;
mod mesh_l2proj;
mod mesh_ls;
pub mod mesh_metric;
pub mod meshb_io;
pub mod metric;
mod metric_reduction;
pub mod remesher;
pub mod stats;
#[cfg(test)]
pub mod test_meshes;
pub mod topo_elems;
pub mod topology;

/// Index of a vertex / element
pub type Idx = u32;
/// Element and face tags
pub type Tag = i16;
/// Topological dimension
pub type Dim = i8;
/// (dimension, tag) of an entity in the topology
pub type TopoTag = (Dim, Tag);

pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error>>;

#[derive(Debug)]
pub struct Error(String);

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "There is an error: {}", self.0)
    }
}

impl std::error::Error for Error {}

impl Error {
    #[must_use]
    pub fn from(msg: &str) -> Box<Self> {
        Box::new(Self(msg.into()))
    }
}

// Bounds on the sizes / anisotropy allowed in the metrics
pub const H_MIN: f64 = 1e-8;
pub const H_MAX: f64 = 1e8;
pub const ANISO_MAX: f64 = 1e5;
pub const S_MIN: f64 = 1.0 / (H_MAX * H_MAX);
pub const S_MAX: f64 = 1.0 / (H_MIN * H_MIN);
pub const S_RATIO_MAX: f64 = ANISO_MAX * ANISO_MAX;

/// Initialize the `env_logger` backend, `RUST_LOG` takes precedence over `level`
pub fn init_log(level: &str) {
    let _ = env_logger::Builder::from_env(Env::default().default_filter_or(level))
        .format_timestamp(None)
        .try_init();
}

pub fn min_iter<I: Iterator<Item = f64>>(it: I) -> f64 {
    it.fold(f64::INFINITY, f64::min)
}

pub fn max_iter<I: Iterator<Item = f64>>(it: I) -> f64 {
    it.fold(f64::NEG_INFINITY, f64::max)
}

pub fn min_max_iter<I: Iterator<Item = f64>>(it: I) -> (f64, f64) {
    it.fold((f64::INFINITY, f64::NEG_INFINITY), |a, b| {
        (a.0.min(b), a.1.max(b))
    })
}
