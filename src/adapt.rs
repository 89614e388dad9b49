//! Adaptation of a mesh to a metric field, either with the built-in remesher or with
//! external remeshers (MMG, Omega_h, refine, avro). The external tools communicate
//! through .meshb / .solb files written in a temporary directory.
use crate::{
    geometry::Geometry,
    mesh::SimplexMesh,
    metric::Metric,
    remesher::{Remesher, RemesherParams},
    topo_elems::Elem,
    Error, Result,
};
use log::{debug, info, trace};
use std::{env, path::Path, process::Command};
use tempfile::TempDir;

/// Supported combinations of dimension and metric type
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AdaptCase {
    Iso2d,
    Aniso2d,
    Iso3d,
    Aniso3d,
}

impl AdaptCase {
    /// Select the case from the dimension and the number of metric components
    pub fn new(dim: usize, n_comp: usize) -> Result<Self> {
        match (dim, n_comp) {
            (2, 1) => Ok(Self::Iso2d),
            (2, 3) => Ok(Self::Aniso2d),
            (3, 1) => Ok(Self::Iso3d),
            (3, 6) => Ok(Self::Aniso3d),
            _ => Err(Error::from(&format!(
                "no adaptation for {n_comp} metric components in {dim}D"
            ))),
        }
    }

    #[must_use]
    pub const fn dim(self) -> usize {
        match self {
            Self::Iso2d | Self::Aniso2d => 2,
            Self::Iso3d | Self::Aniso3d => 3,
        }
    }

    #[must_use]
    pub const fn is_iso(self) -> bool {
        matches!(self, Self::Iso2d | Self::Iso3d)
    }
}

/// Flatten a metric field; if `to_aniso` is set, isotropic sizes `h` are converted to
/// tensors `I / h^2`
fn metric_components<const D: usize, M: Metric<D>>(m: &[M], to_aniso: bool) -> Result<Vec<f64>> {
    let case = AdaptCase::new(D, M::N)?;
    if !(to_aniso && case.is_iso()) {
        return Ok(m.iter().copied().flatten().collect());
    }
    let n = D * (D + 1) / 2;
    let mut res = Vec::with_capacity(n * m.len());
    for x in m.iter().copied().flatten() {
        let s = 1.0 / (x * x);
        res.extend((0..n).map(|i| if i < D { s } else { 0.0 }));
    }
    Ok(res)
}

/// Adaptation of a mesh to a metric field
pub trait MeshAdapter<const D: usize, E: Elem, M: Metric<D>> {
    fn name(&self) -> &'static str;

    /// Build a new mesh adapted to metric `m` (defined at the vertices of `mesh`)
    fn adapt<G: Geometry<D>>(
        &self,
        mesh: &SimplexMesh<D, E>,
        m: &[M],
        geom: G,
    ) -> Result<SimplexMesh<D, E>>;
}

/// Adaptation with the built-in `Remesher`
#[derive(Clone, Debug, Default)]
pub struct BuiltinAdapter {
    pub params: RemesherParams,
}

impl<const D: usize, E: Elem, M: Metric<D>> MeshAdapter<D, E, M> for BuiltinAdapter {
    fn name(&self) -> &'static str {
        "builtin"
    }

    fn adapt<G: Geometry<D>>(
        &self,
        mesh: &SimplexMesh<D, E>,
        m: &[M],
        geom: G,
    ) -> Result<SimplexMesh<D, E>> {
        let mut mesh = mesh.clone();
        if mesh.get_topology().is_err() {
            mesh.compute_topology()?;
        }
        let mut remesher = Remesher::new(&mesh, m, geom)?;
        remesher.remesh(&self.params, None)?;
        Ok(remesher.to_mesh(true))
    }
}

/// Executable given by environment variable `var`, or `default`
fn exe_from_env(var: &str, default: &str) -> String {
    env::var(var).unwrap_or_else(|_| default.to_owned())
}

fn path_str(dir: &Path, name: &str) -> Result<String> {
    dir.join(name)
        .to_str()
        .map(ToOwned::to_owned)
        .ok_or_else(|| Error::from(&format!("invalid path for {name}")).into())
}

fn run_command(exe: &str, args: &[String]) -> Result<()> {
    debug!("Run {exe} {}", args.join(" "));
    let output = Command::new(exe)
        .args(args)
        .output()
        .map_err(|e| Error::from(&format!("unable to run {exe}: {e}")))?;
    trace!("{}", String::from_utf8_lossy(&output.stdout));
    if !output.status.success() {
        return Err(Error::from(&format!(
            "{exe} failed ({}): {}",
            output.status,
            String::from_utf8_lossy(&output.stderr)
        )));
    }
    Ok(())
}

/// Files used to exchange data with an external remesher
struct ExternalRun {
    dir: TempDir,
    mesh_in: String,
    sol_in: String,
}

impl ExternalRun {
    /// Write the mesh and the metric in a new temporary directory
    fn new<const D: usize, E: Elem, M: Metric<D>>(
        mesh: &SimplexMesh<D, E>,
        m: &[M],
        to_aniso: bool,
    ) -> Result<Self> {
        if m.len() != mesh.n_verts() as usize {
            return Err(Error::from(&format!(
                "invalid metric: {} values for {} vertices",
                m.len(),
                mesh.n_verts()
            )));
        }
        let dir = TempDir::new()?;
        let mesh_in = path_str(dir.path(), "in.meshb")?;
        let sol_in = path_str(dir.path(), "in.solb")?;
        mesh.write_meshb(&mesh_in)?;
        mesh.write_solb(&metric_components(m, to_aniso)?, &sol_in)?;
        Ok(Self {
            dir,
            mesh_in,
            sol_in,
        })
    }

    fn path(&self, name: &str) -> Result<String> {
        path_str(self.dir.path(), name)
    }

    /// Run the executable and read the mesh it produced. On failure the temporary
    /// directory is kept and its path is reported
    fn run<const D: usize, E: Elem>(
        self,
        exe: &str,
        args: &[String],
        mesh_out: &str,
    ) -> Result<SimplexMesh<D, E>> {
        info!("Adapt the mesh with {exe}");
        match run_command(exe, args).and_then(|()| SimplexMesh::<D, E>::read_meshb(mesh_out)) {
            Ok(mesh) => Ok(mesh),
            Err(e) => {
                let path = self.dir.into_path();
                Err(Error::from(&format!(
                    "{e} (files kept in {})",
                    path.display()
                )))
            }
        }
    }
}

/// Adaptation with MMG (mmg2d / mmg3d)
#[derive(Clone, Debug)]
pub struct MmgAdapter {
    pub hgrad: f64,
    pub hausd: f64,
}

impl Default for MmgAdapter {
    fn default() -> Self {
        Self {
            hgrad: 10.0,
            hausd: 10.0,
        }
    }
}

impl MmgAdapter {
    fn exe(dim: usize) -> String {
        if dim == 2 {
            exe_from_env("MMG2D_EXE", "mmg2d_O3")
        } else {
            exe_from_env("MMG3D_EXE", "mmg3d_O3")
        }
    }
}

impl<const D: usize, E: Elem, M: Metric<D>> MeshAdapter<D, E, M> for MmgAdapter {
    fn name(&self) -> &'static str {
        "mmg"
    }

    fn adapt<G: Geometry<D>>(
        &self,
        mesh: &SimplexMesh<D, E>,
        m: &[M],
        _geom: G,
    ) -> Result<SimplexMesh<D, E>> {
        let case = AdaptCase::new(D, M::N)?;
        let run = ExternalRun::new(mesh, m, false)?;
        let mesh_out = run.path("out.meshb")?;
        let args = vec![
            "-in".to_owned(),
            run.mesh_in.clone(),
            "-sol".to_owned(),
            run.sol_in.clone(),
            "-out".to_owned(),
            mesh_out.clone(),
            "-hgrad".to_owned(),
            self.hgrad.to_string(),
            "-hausd".to_owned(),
            self.hausd.to_string(),
        ];
        run.run(&Self::exe(case.dim()), &args, &mesh_out)
    }
}

/// Adaptation with Omega_h
#[derive(Clone, Debug, Default)]
pub struct OmegaHAdapter;

impl<const D: usize, E: Elem, M: Metric<D>> MeshAdapter<D, E, M> for OmegaHAdapter {
    fn name(&self) -> &'static str {
        "omega_h"
    }

    fn adapt<G: Geometry<D>>(
        &self,
        mesh: &SimplexMesh<D, E>,
        m: &[M],
        _geom: G,
    ) -> Result<SimplexMesh<D, E>> {
        let run = ExternalRun::new(mesh, m, true)?;
        let mesh_out = run.path("out.meshb")?;
        let args = vec![
            "--mesh-in".to_owned(),
            run.mesh_in.clone(),
            "--metric-in".to_owned(),
            run.sol_in.clone(),
            "--mesh-out".to_owned(),
            mesh_out.clone(),
            "--metric-out".to_owned(),
            run.path("out.solb")?,
        ];
        run.run(&exe_from_env("OSH_EXE", "osh_adapt"), &args, &mesh_out)
    }
}

/// Adaptation with refine, optionally using a geometry file
#[derive(Clone, Debug, Default)]
pub struct RefineAdapter {
    pub geom_file: Option<String>,
}

impl<const D: usize, E: Elem, M: Metric<D>> MeshAdapter<D, E, M> for RefineAdapter {
    fn name(&self) -> &'static str {
        "refine"
    }

    fn adapt<G: Geometry<D>>(
        &self,
        mesh: &SimplexMesh<D, E>,
        m: &[M],
        _geom: G,
    ) -> Result<SimplexMesh<D, E>> {
        let run = ExternalRun::new(mesh, m, true)?;
        let mesh_out = run.path("out.meshb")?;
        let mut args = vec![
            "adapt".to_owned(),
            run.mesh_in.clone(),
            "--metric".to_owned(),
            run.sol_in.clone(),
            "-x".to_owned(),
            mesh_out.clone(),
        ];
        if let Some(geom_file) = &self.geom_file {
            args.push("-g".to_owned());
            args.push(geom_file.clone());
        }
        run.run(&exe_from_env("REF_EXE", "ref"), &args, &mesh_out)
    }
}

/// Adaptation with avro; a geometry file is required
#[derive(Clone, Debug)]
pub struct AvroAdapter {
    pub geom_file: String,
    pub limit: bool,
}

impl<const D: usize, E: Elem, M: Metric<D>> MeshAdapter<D, E, M> for AvroAdapter {
    fn name(&self) -> &'static str {
        "avro"
    }

    fn adapt<G: Geometry<D>>(
        &self,
        mesh: &SimplexMesh<D, E>,
        m: &[M],
        _geom: G,
    ) -> Result<SimplexMesh<D, E>> {
        let run = ExternalRun::new(mesh, m, true)?;
        // avro appends the iteration number to the output name
        let mesh_out = run.path("out_0.mesh")?;
        let args = vec![
            "-adapt".to_owned(),
            run.mesh_in.clone(),
            self.geom_file.clone(),
            run.sol_in.clone(),
            run.path("out.mesh")?,
            format!("limit={}", self.limit),
        ];
        run.run(&exe_from_env("AVRO_EXE", "avro"), &args, &mesh_out)
    }
}
