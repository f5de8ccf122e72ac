use nalgebra::{allocator::Allocator, Const, DefaultAllocator, DimDiff, DimMin, DimSub, U1};
use nalgebra::{RealField, SMatrix, SVector, SymmetricEigen, SVD};
use num_traits::Zero;

use crate::diff::{Diff, DiffMode};
use crate::fit::{FitState, MeanAccumulator};
use crate::point::Point;
use crate::weight::WeightFunc;

/// Hyperplane primitive: unit normal and a point it passes through.
#[derive(Clone, Copy, Debug)]
pub struct Plane<S, const D: usize> {
    normal: SVector<S, D>,
    center: SVector<S, D>,
}

impl<S: RealField + Copy, const D: usize> Plane<S, D> {
    pub fn new(normal: SVector<S, D>, center: SVector<S, D>) -> Self {
        Self { normal, center }
    }

    /// Identity-valued default, used to reset degenerate fits.
    pub fn reset() -> Self {
        Self {
            normal: SVector::zeros(),
            center: SVector::zeros(),
        }
    }

    pub fn normal(&self) -> SVector<S, D> {
        self.normal
    }

    pub fn center(&self) -> SVector<S, D> {
        self.center
    }

    /// Signed distance of `x` to the plane.
    pub fn potential(&self, x: &SVector<S, D>) -> S {
        self.normal.dot(&(x - self.center))
    }

    /// Orthogonal projection of `x` onto the plane.
    pub fn project(&self, x: &SVector<S, D>) -> SVector<S, D> {
        x - self.normal * self.potential(x)
    }
}

/// Weighted covariance plane fit.
///
/// Accumulates Σw, Σw·q and Σw·q·qᵀ over neighbors relative to the
/// evaluation point, then extracts the normal as the eigenvector of the
/// smallest eigenvalue of the centered covariance.
pub struct CovariancePlaneFit<P: Point<D>, const D: usize, W> {
    weight: W,
    eval_pos: SVector<P::Scalar, D>,
    mean: MeanAccumulator<P::Scalar, D>,
    cov: SMatrix<P::Scalar, D, D>,
    eigenvalues: SVector<P::Scalar, D>,
    min_eigen: usize,
    plane: Plane<P::Scalar, D>,
    state: FitState,
}

impl<P, const D: usize, W> CovariancePlaneFit<P, D, W>
where
    P: Point<D>,
    W: WeightFunc<P, D>,
{
    pub fn new(weight: W) -> Self {
        Self {
            weight,
            eval_pos: SVector::zeros(),
            mean: MeanAccumulator::zeros(),
            cov: SMatrix::zeros(),
            eigenvalues: SVector::zeros(),
            min_eigen: 0,
            plane: Plane::reset(),
            state: FitState::Undefined,
        }
    }

    /// Zeroes every sum and re-centers the fit basis on `eval_pos`.
    pub fn init(&mut self, eval_pos: SVector<P::Scalar, D>) {
        self.eval_pos = eval_pos;
        self.mean = MeanAccumulator::zeros();
        self.cov = SMatrix::zeros();
        self.eigenvalues = SVector::zeros();
        self.min_eigen = 0;
        self.plane = Plane::reset();
        self.state = FitState::Undefined;
    }

    /// Weighs `neighbor` and folds it into the sums. Returns whether the
    /// neighbor was counted (its weight was strictly positive).
    pub fn add_neighbor(&mut self, neighbor: &P) -> bool {
        let q = neighbor.pos() - self.eval_pos;
        let w = self.weight.w(&q, neighbor);
        self.add_local_neighbor(w, &q, neighbor)
    }

    /// Folds an already-weighted neighbor into the sums; `local_q` is the
    /// neighbor position relative to the evaluation point.
    pub fn add_local_neighbor(
        &mut self,
        w: P::Scalar,
        local_q: &SVector<P::Scalar, D>,
        _attributes: &P,
    ) -> bool {
        if w <= P::Scalar::zero() {
            return false;
        }
        self.mean.add(w, local_q);
        self.cov += *local_q * local_q.transpose() * w;
        true
    }

    pub fn state(&self) -> FitState {
        self.state
    }

    pub fn eval_pos(&self) -> SVector<P::Scalar, D> {
        self.eval_pos
    }

    pub fn neighbor_count(&self) -> usize {
        self.mean.count
    }

    /// The fitted plane. Meaningful once [`finalize`](Self::finalize)
    /// returned a ready state.
    pub fn plane(&self) -> &Plane<P::Scalar, D> {
        &self.plane
    }

    pub fn normal(&self) -> SVector<P::Scalar, D> {
        self.plane.normal()
    }

    pub fn center(&self) -> SVector<P::Scalar, D> {
        self.plane.center()
    }
}

impl<P, const D: usize, W> CovariancePlaneFit<P, D, W>
where
    P: Point<D>,
    W: WeightFunc<P, D>,
    Const<D>: DimSub<U1>,
    DefaultAllocator: Allocator<DimDiff<Const<D>, U1>>,
{
    /// Closes the fit: centers the covariance, runs the symmetric
    /// eigendecomposition and extracts the plane.
    ///
    /// With fewer than 3 counted neighbors or a zero weight sum the fit is
    /// [`FitState::Undefined`] and the plane is reset.
    pub fn finalize(&mut self) -> FitState {
        if self.mean.sum_w == P::Scalar::zero() || self.mean.count < 3 {
            self.plane = Plane::reset();
            self.state = FitState::Undefined;
            return self.state;
        }

        // Center the covariance on the weighted centroid.
        self.cov -= self.mean.sum_pos * self.mean.sum_pos.transpose() / self.mean.sum_w;
        let centroid = self.mean.sum_pos / self.mean.sum_w + self.eval_pos;

        let eigen = SymmetricEigen::<P::Scalar, Const<D>>::new(self.cov);
        let min_eigen = eigen.eigenvalues.imin();
        self.eigenvalues = eigen.eigenvalues;
        self.min_eigen = min_eigen;
        self.plane = Plane::new(eigen.eigenvectors.column(min_eigen).into_owned(), centroid);

        self.state = FitState::Stable;
        self.state
    }

    /// Runs a whole fit in one call.
    pub fn compute<'a, I>(&mut self, eval_pos: SVector<P::Scalar, D>, neighbors: I) -> FitState
    where
        P: 'a,
        I: IntoIterator<Item = &'a P>,
    {
        self.init(eval_pos);
        for n in neighbors {
            self.add_neighbor(n);
        }
        self.finalize()
    }

    /// Isotropy of the neighborhood: `λmin / ‖λ‖`, 0 for flat data and for
    /// undefined fits.
    pub fn surface_variation(&self) -> P::Scalar {
        if self.state == FitState::Undefined {
            return P::Scalar::zero();
        }
        self.eigenvalues[self.min_eigen] / self.eigenvalues.norm()
    }
}

/// Covariance plane fit with analytic derivatives in scale and/or space.
///
/// Per neighbor the weight derivatives are accumulated alongside the base
/// sums; the spatial weight gradient enters negated because the relative
/// position `q = neighbor − eval` shrinks when the evaluation point
/// advances. All outputs are world-frame total derivatives.
pub struct CovariancePlaneDer<P: Point<D>, const D: usize, W> {
    fit: CovariancePlaneFit<P, D, W>,
    mode: DiffMode,
    dsum_w: Diff<P::Scalar, D>,
    dcog: Diff<SVector<P::Scalar, D>, D>,
    dcov: Diff<SMatrix<P::Scalar, D, D>, D>,
    dnormal: Diff<SVector<P::Scalar, D>, D>,
    ddist: Diff<P::Scalar, D>,
}

impl<P, const D: usize, W> CovariancePlaneDer<P, D, W>
where
    P: Point<D>,
    W: WeightFunc<P, D>,
{
    pub fn new(weight: W, mode: DiffMode) -> Self {
        Self {
            fit: CovariancePlaneFit::new(weight),
            mode,
            dsum_w: Diff::splat(P::Scalar::zero()),
            dcog: Diff::splat(SVector::zeros()),
            dcov: Diff::splat(SMatrix::zeros()),
            dnormal: Diff::splat(SVector::zeros()),
            ddist: Diff::splat(P::Scalar::zero()),
        }
    }

    pub fn init(&mut self, eval_pos: SVector<P::Scalar, D>) {
        self.fit.init(eval_pos);
        self.dsum_w = Diff::splat(P::Scalar::zero());
        self.dcog = Diff::splat(SVector::zeros());
        self.dcov = Diff::splat(SMatrix::zeros());
        self.dnormal = Diff::splat(SVector::zeros());
        self.ddist = Diff::splat(P::Scalar::zero());
    }

    pub fn add_neighbor(&mut self, neighbor: &P) -> bool {
        let q = neighbor.pos() - self.fit.eval_pos;
        if !self.fit.add_neighbor(neighbor) {
            return false;
        }

        let mut dw: Diff<P::Scalar, D> = Diff::splat(P::Scalar::zero());
        if self.mode.has_scale() {
            dw.scale = self.fit.weight.scale_dw(&q, neighbor);
        }
        if self.mode.has_space() {
            let g = self.fit.weight.space_dw(&q, neighbor);
            for i in 0..D {
                dw.space[i] = -g[i];
            }
        }

        let qq = q * q.transpose();
        self.dsum_w.scale += dw.scale;
        self.dcog.scale += q * dw.scale;
        self.dcov.scale += qq * dw.scale;
        for i in 0..D {
            self.dsum_w.space[i] += dw.space[i];
            self.dcog.space[i] += q * dw.space[i];
            self.dcov.space[i] += qq * dw.space[i];
        }
        true
    }

    pub fn mode(&self) -> DiffMode {
        self.mode
    }

    /// The underlying fit and its primitive accessors.
    pub fn fit(&self) -> &CovariancePlaneFit<P, D, W> {
        &self.fit
    }

    /// Derivative of the plane normal per axis.
    pub fn dnormal(&self) -> &Diff<SVector<P::Scalar, D>, D> {
        &self.dnormal
    }

    /// Derivative of the signed distance of the evaluation point to the
    /// plane per axis.
    pub fn ddist(&self) -> &Diff<P::Scalar, D> {
        &self.ddist
    }
}

impl<P, const D: usize, W> CovariancePlaneDer<P, D, W>
where
    P: Point<D>,
    W: WeightFunc<P, D>,
    Const<D>: DimSub<U1> + DimMin<Const<D>, Output = Const<D>>,
    DefaultAllocator: Allocator<DimDiff<Const<D>, U1>>,
{
    /// Closes the fit and the derivative computation.
    ///
    /// For each axis the covariance derivative is re-centered, the centroid
    /// derivative finalized, and the normal derivative obtained from the
    /// rank-deficient system `(C − λmin·I)·dn = −dC·n` through a full-U/V
    /// SVD (Moore-Penrose solve).
    pub fn finalize(&mut self) -> FitState {
        let state = self.fit.finalize();
        if !state.is_ready() {
            return state;
        }

        let sum_w = self.fit.mean.sum_w;
        let eval_pos = self.fit.eval_pos;
        let centroid = self.fit.plane.center();
        let normal = self.fit.plane.normal();
        let shifted_cog = centroid - eval_pos;
        let lambda = self.fit.eigenvalues[self.fit.min_eigen];

        let mut system = self.fit.cov;
        for i in 0..D {
            system[(i, i)] -= lambda;
        }
        let svd = SVD::<P::Scalar, Const<D>, Const<D>>::new(system, true, true);

        if self.mode.has_scale() {
            let (dn, dd) = plane_der_axis(
                &svd,
                &normal,
                &eval_pos,
                &centroid,
                &shifted_cog,
                sum_w,
                &mut self.dcov.scale,
                &mut self.dcog.scale,
                self.dsum_w.scale,
                None,
            );
            self.dnormal.scale = dn;
            self.ddist.scale = dd;
        }
        if self.mode.has_space() {
            for i in 0..D {
                let (dn, dd) = plane_der_axis(
                    &svd,
                    &normal,
                    &eval_pos,
                    &centroid,
                    &shifted_cog,
                    sum_w,
                    &mut self.dcov.space[i],
                    &mut self.dcog.space[i],
                    self.dsum_w.space[i],
                    Some(i),
                );
                self.dnormal.space[i] = dn;
                self.ddist.space[i] = dd;
            }
        }

        state
    }

    pub fn compute<'a, I>(&mut self, eval_pos: SVector<P::Scalar, D>, neighbors: I) -> FitState
    where
        P: 'a,
        I: IntoIterator<Item = &'a P>,
    {
        self.init(eval_pos);
        for n in neighbors {
            self.add_neighbor(n);
        }
        self.finalize()
    }
}

/// Finalizes one derivative axis of the plane fit.
///
/// `dcov` and `dcog` are rewritten in place: `dcov` is re-centered around
/// the weighted centroid and `dcog` becomes the derivative of the world
/// centroid. `space_axis` carries the spatial axis index, `None` for the
/// scale axis.
#[allow(clippy::too_many_arguments)]
fn plane_der_axis<S, const D: usize>(
    svd: &SVD<S, Const<D>, Const<D>>,
    normal: &SVector<S, D>,
    eval_pos: &SVector<S, D>,
    centroid: &SVector<S, D>,
    shifted_cog: &SVector<S, D>,
    sum_w: S,
    dcov: &mut SMatrix<S, D, D>,
    dcog: &mut SVector<S, D>,
    dsum_w: S,
    space_axis: Option<usize>,
) -> (SVector<S, D>, S)
where
    S: RealField + Copy,
    Const<D>: DimMin<Const<D>, Output = Const<D>>,
{
    // At this stage dcog still holds Σ dw·q; the covariance is translation
    // invariant, so re-centering it here also cancels the moving basis.
    *dcov = *dcov - *shifted_cog * dcog.transpose() - *dcog * shifted_cog.transpose()
        + *shifted_cog * shifted_cog.transpose() * dsum_w;

    // Cancel the centered basis of dcog, then normalize by Σw: dcog becomes
    // the derivative of the world centroid.
    *dcog += *eval_pos * dsum_w;
    *dcog = (*dcog - *centroid * dsum_w) / sum_w;

    let rhs = -(*dcov * normal);
    // Rank-deficient solve: singular values below the scaled cutoff are
    // treated as the null space spanned by the plane normal. `SVD::new`
    // sorts singular values in decreasing order.
    let cutoff = svd.singular_values[0] * S::default_epsilon() * nalgebra::convert(D as f64);
    let dnormal = svd
        .solve(&rhs, cutoff)
        .unwrap_or_else(|_| SVector::zeros());

    let mut ddiff = -*dcog;
    if let Some(axis) = space_axis {
        ddiff[axis] += S::one();
    }
    let ddist = dnormal.dot(&(eval_pos - centroid)) + normal.dot(&ddiff);

    (dnormal, ddist)
}
