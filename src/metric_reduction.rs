use nalgebra::allocator::Allocator;
use nalgebra::{Const, DefaultAllocator, SMatrix, SVector};

/// Simultaneous reduction of $`(\mathcal M_0, \mathcal M_1)`$: with the Cholesky
/// factorization $`\mathcal M_0 = L L^T`$ and the eigen-decomposition
/// $`L^{-1} \mathcal M_1 L^{-T} = V \Sigma V^T`$, the columns of $`P = L^{-T} V`$ satisfy
/// ```math
/// P^T \mathcal M_0 P = I, \quad P^T \mathcal M_1 P = \Sigma
/// ```
/// Returns $`L`$, $`V`$ and the diagonal of $`\Sigma`$, or `None` if $`\mathcal M_0`$ is not
/// positive definite
fn reduce<const D: usize>(
    mat_a: SMatrix<f64, D, D>,
    mat_b: SMatrix<f64, D, D>,
) -> Option<(SMatrix<f64, D, D>, SMatrix<f64, D, D>, SVector<f64, D>)>
where
    Const<D>: nalgebra::ToTypenum + nalgebra::DimSub<nalgebra::U1>,
    DefaultAllocator: Allocator<<Const<D> as nalgebra::DimSub<nalgebra::U1>>::Output>,
{
    let l = mat_a.cholesky()?.unpack();
    let l_inv = l.try_inverse()?;
    let c = l_inv * mat_b * l_inv.transpose();
    let c = 0.5 * (c + c.transpose());
    let eig = c.symmetric_eigen();
    Some((l, eig.eigenvectors, eig.eigenvalues))
}

/// Intersection of two metric tensors
/// ```math
/// \mathcal M_0 \cap \mathcal M_1 = P^{-T} \max(I, \Sigma) P^{-1} = L V \max(I, \Sigma) V^T L^T
/// ```
/// i.e. in the common basis the largest eigenvalue (the smallest size) is kept
pub fn simultaneous_reduction<const D: usize>(
    mat_a: SMatrix<f64, D, D>,
    mat_b: SMatrix<f64, D, D>,
) -> SMatrix<f64, D, D>
where
    Const<D>: nalgebra::ToTypenum + nalgebra::DimSub<nalgebra::U1>,
    DefaultAllocator: Allocator<<Const<D> as nalgebra::DimSub<nalgebra::U1>>::Output>,
{
    let Some((l, v, s)) = reduce(mat_a, mat_b) else {
        return mat_b;
    };
    let s = s.map(|x| x.max(1.0));
    let lv = l * v;
    lv * SMatrix::<f64, D, D>::from_diagonal(&s) * lv.transpose()
}

/// Bound the sizes of `mat` to between `1/f` and `f` times the sizes of `mat_ref`: in the
/// basis of the simultaneous reduction of `(mat, mat_ref)`, the eigenvalues of `mat`
/// are clipped to $`[\sigma_i / f^2, \sigma_i f^2]`$. Returns `None` if `mat` already
/// satisfies the bounds.
pub fn control_step<const D: usize>(
    mat_ref: SMatrix<f64, D, D>,
    mat: SMatrix<f64, D, D>,
    f: f64,
) -> Option<SMatrix<f64, D, D>>
where
    Const<D>: nalgebra::ToTypenum + nalgebra::DimSub<nalgebra::U1>,
    DefaultAllocator: Allocator<<Const<D> as nalgebra::DimSub<nalgebra::U1>>::Output>,
{
    let (l, v, s) = reduce(mat, mat_ref)?;
    let f2 = f * f;
    let d = s.map(|x| f64::clamp(1.0, x / f2, x * f2));
    if d.iter().all(|&x| f64::abs(x - 1.0) < 1e-12) {
        return None;
    }
    let lv = l * v;
    Some(lv * SMatrix::<f64, D, D>::from_diagonal(&d) * lv.transpose())
}
