use crate::{geometry::Geometry, metric::Metric, remesher::Remesher, topo_elems::Elem, Idx};
use core::fmt;
use serde::Serialize;

/// Bins used for the edge lengths
pub const LENGTH_BINS: [f64; 7] = [
    0.0,
    std::f64::consts::FRAC_1_SQRT_2,
    0.840_896_415_253_714_6, // 2^-0.25
    1.0,
    1.189_207_115_002_721, // 2^0.25
    std::f64::consts::SQRT_2,
    2.0,
];

/// Bins used for the element qualities
pub const QUALITY_BINS: [f64; 6] = [0.0, 0.2, 0.4, 0.6, 0.8, 1.0];

/// Simple statistics (histogram + mean / min / max) to be used on edge lengths and element
/// qualities
#[derive(Serialize, Debug, Clone)]
pub struct Stats {
    /// Histogram bins (length = n+1). The first and last values are extended to the
    /// minimum and maximum of the data
    pub bins: Vec<f64>,
    /// Fraction of the values in each bin (length = n)
    pub vals: Vec<f64>,
    pub mean: f64,
    pub min: f64,
    pub max: f64,
}

impl Stats {
    /// Compute the stats of the values of `f` using the bin edges `edges`. Values below
    /// `edges[1]` go to the first bin, values above the next to last edge go to the
    /// last one
    pub fn new<I: Iterator<Item = f64>>(f: I, edges: &[f64]) -> Self {
        assert!(edges.len() > 1);
        let n = edges.len() - 1;

        let mut bins = edges.to_vec();
        let mut vals = vec![0.0; n];
        let mut mini = f64::INFINITY;
        let mut maxi = f64::NEG_INFINITY;
        let mut mean = 0.0;
        let mut count = 0;

        for val in f {
            mini = mini.min(val);
            maxi = maxi.max(val);
            mean += val;
            count += 1;
            let i = edges[1..n].partition_point(|&x| x < val);
            vals[i] += 1.0;
        }

        if count == 0 {
            return Self {
                bins,
                vals,
                mean: 0.0,
                min: 0.0,
                max: 0.0,
            };
        }

        for val in &mut vals {
            *val /= f64::from(count);
        }
        bins[0] = bins[0].min(mini);
        bins[n] = bins[n].max(maxi);
        mean /= f64::from(count);

        Self {
            bins,
            vals,
            mean,
            min: mini,
            max: maxi,
        }
    }
}

impl fmt::Display for Stats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "mean = {:.2}, min = {:.2}, max = {:.2}",
            self.mean, self.min, self.max
        )?;
        for (i, val) in self.vals.iter().enumerate() {
            if *val > 0.0 {
                write!(
                    f,
                    ", {:.2} < {:.1}% < {:.2}",
                    self.bins[i],
                    100.0 * val,
                    self.bins[i + 1]
                )?;
            }
        }
        Ok(())
    }
}

/// Statistics on the remesher state
#[derive(Serialize, Debug, Clone)]
pub struct RemesherStats {
    /// The # of vertices in the mesh
    pub n_verts: Idx,
    /// The # of elements in the mesh
    pub n_elems: Idx,
    /// The # of edges in the mesh
    pub n_edges: Idx,
    /// Edge length stats
    pub stats_l: Stats,
    /// Element quality stats
    pub stats_q: Stats,
}

impl RemesherStats {
    pub fn new<const D: usize, E: Elem, M: Metric<D>, G: Geometry<D>>(
        r: &Remesher<D, E, M, G>,
    ) -> Self {
        Self {
            n_verts: r.n_verts(),
            n_elems: r.n_elems(),
            n_edges: r.n_edges(),
            stats_l: Stats::new(r.lengths_iter(), &LENGTH_BINS),
            stats_q: Stats::new(r.qualities_iter(), &QUALITY_BINS),
        }
    }
}

impl fmt::Display for RemesherStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} verts, {} elems, {} edges",
            self.n_verts, self.n_elems, self.n_edges
        )?;
        writeln!(f, "  lengths: {}", self.stats_l)?;
        write!(f, "  qualities: {}", self.stats_q)
    }
}

/// Statistics for each remeshing step that include `RemesherStats` and additional
/// step-dependent info
#[derive(Serialize, Debug, Clone)]
pub enum StepStats {
    Init(InitStats),
    Split(SplitStats),
    Swap(SwapStats),
    Collapse(CollapseStats),
    Smooth(SmoothStats),
}

impl StepStats {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Init(_) => "Init",
            Self::Split(_) => "Split",
            Self::Swap(_) => "Swap",
            Self::Collapse(_) => "Collapse",
            Self::Smooth(_) => "Smooth",
        }
    }

    /// Remesher state after the step
    #[must_use]
    pub const fn r_stats(&self) -> &RemesherStats {
        match self {
            Self::Init(s) => &s.r_stats,
            Self::Split(s) => &s.r_stats,
            Self::Swap(s) => &s.r_stats,
            Self::Collapse(s) => &s.r_stats,
            Self::Smooth(s) => &s.r_stats,
        }
    }

    /// Number of modifications applied during the step
    #[must_use]
    pub const fn n_applied(&self) -> Idx {
        match self {
            Self::Init(_) => 0,
            Self::Split(s) => s.n_splits,
            Self::Swap(s) => s.n_swaps,
            Self::Collapse(s) => s.n_collapses,
            Self::Smooth(s) => s.n_smooth,
        }
    }
}

impl fmt::Display for StepStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Init(_) => writeln!(f, "Init")?,
            Self::Split(s) => writeln!(f, "Split: {} ({} fails)", s.n_splits, s.n_fails)?,
            Self::Swap(s) => writeln!(f, "Swap: {} ({} fails)", s.n_swaps, s.n_fails)?,
            Self::Collapse(s) => {
                writeln!(f, "Collapse: {} ({} fails)", s.n_collapses, s.n_fails)?;
            }
            Self::Smooth(s) => writeln!(f, "Smooth: {} ({} fails)", s.n_smooth, s.n_fails)?,
        }
        write!(f, "  {}", self.r_stats())
    }
}

#[derive(Serialize, Debug, Clone)]
pub struct InitStats {
    pub r_stats: RemesherStats,
}

impl InitStats {
    pub fn new<const D: usize, E: Elem, M: Metric<D>, G: Geometry<D>>(
        r: &Remesher<D, E, M, G>,
    ) -> Self {
        Self {
            r_stats: RemesherStats::new(r),
        }
    }
}

#[derive(Serialize, Debug, Clone)]
pub struct SplitStats {
    pub n_splits: Idx,
    pub n_fails: Idx,
    pub r_stats: RemesherStats,
}

impl SplitStats {
    pub fn new<const D: usize, E: Elem, M: Metric<D>, G: Geometry<D>>(
        n_splits: Idx,
        n_fails: Idx,
        r: &Remesher<D, E, M, G>,
    ) -> Self {
        Self {
            n_splits,
            n_fails,
            r_stats: RemesherStats::new(r),
        }
    }
}

#[derive(Serialize, Debug, Clone)]
pub struct SwapStats {
    pub n_swaps: Idx,
    pub n_fails: Idx,
    pub r_stats: RemesherStats,
}

impl SwapStats {
    pub fn new<const D: usize, E: Elem, M: Metric<D>, G: Geometry<D>>(
        n_swaps: Idx,
        n_fails: Idx,
        r: &Remesher<D, E, M, G>,
    ) -> Self {
        Self {
            n_swaps,
            n_fails,
            r_stats: RemesherStats::new(r),
        }
    }
}

#[derive(Serialize, Debug, Clone)]
pub struct CollapseStats {
    pub n_collapses: Idx,
    pub n_fails: Idx,
    pub r_stats: RemesherStats,
}

impl CollapseStats {
    pub fn new<const D: usize, E: Elem, M: Metric<D>, G: Geometry<D>>(
        n_collapses: Idx,
        n_fails: Idx,
        r: &Remesher<D, E, M, G>,
    ) -> Self {
        Self {
            n_collapses,
            n_fails,
            r_stats: RemesherStats::new(r),
        }
    }
}

#[derive(Serialize, Debug, Clone)]
pub struct SmoothStats {
    pub n_smooth: Idx,
    pub n_fails: Idx,
    pub r_stats: RemesherStats,
}

impl SmoothStats {
    pub fn new<const D: usize, E: Elem, M: Metric<D>, G: Geometry<D>>(
        n_smooth: Idx,
        n_fails: Idx,
        r: &Remesher<D, E, M, G>,
    ) -> Self {
        Self {
            n_smooth,
            n_fails,
            r_stats: RemesherStats::new(r),
        }
    }
}
