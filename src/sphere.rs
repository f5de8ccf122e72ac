use approx::AbsDiffEq;
use nalgebra::{ComplexField, RealField, SVector};
use num_traits::{One, Zero};

use crate::diff::{Diff, DiffMode};
use crate::fit::{FitState, MeanAccumulator};
use crate::point::OrientedPoint;
use crate::weight::WeightFunc;

/// Algebraic sphere `uc + ul·x + uq·‖x‖²` expressed in a local basis.
///
/// The basis is the evaluation point of the fit that produced the sphere;
/// all public entry points take world coordinates and translate internally.
#[derive(Clone, Copy, Debug)]
pub struct AlgebraicSphere<S, const D: usize> {
    basis: SVector<S, D>,
    uc: S,
    ul: SVector<S, D>,
    uq: S,
    normalized: bool,
}

impl<S: RealField + Copy, const D: usize> AlgebraicSphere<S, D> {
    /// Identity-valued sphere centered on `basis`.
    pub fn reset(basis: SVector<S, D>) -> Self {
        Self {
            basis,
            uc: S::zero(),
            ul: SVector::zeros(),
            uq: S::zero(),
            normalized: false,
        }
    }

    pub(crate) fn set(basis: SVector<S, D>, uc: S, ul: SVector<S, D>, uq: S) -> Self {
        Self {
            basis,
            uc,
            ul,
            uq,
            normalized: false,
        }
    }

    pub fn basis(&self) -> SVector<S, D> {
        self.basis
    }

    pub fn uc(&self) -> S {
        self.uc
    }

    pub fn ul(&self) -> SVector<S, D> {
        self.ul
    }

    pub fn uq(&self) -> S {
        self.uq
    }

    /// Whether [`apply_pratt_norm`](Self::apply_pratt_norm) has run.
    pub fn is_normalized(&self) -> bool {
        self.normalized
    }

    /// Whether the quadratic term vanishes and the sphere degenerates to a
    /// plane.
    pub fn is_plane(&self) -> bool {
        self.uq.abs() <= S::default_epsilon()
    }

    /// Scalar field value at `x`.
    pub fn potential(&self, x: &SVector<S, D>) -> S {
        let lx = x - self.basis;
        self.uc + self.ul.dot(&lx) + self.uq * lx.norm_squared()
    }

    /// Field gradient direction at `x`, normalized. Zero when the gradient
    /// vanishes.
    pub fn normal_at(&self, x: &SVector<S, D>) -> SVector<S, D> {
        let lx = x - self.basis;
        let two: S = nalgebra::convert(2.0);
        let grad = self.ul + lx * (two * self.uq);
        let norm = grad.norm();
        if norm > S::zero() {
            grad / norm
        } else {
            SVector::zeros()
        }
    }

    /// Closest point of the zero set to `x`.
    ///
    /// Exact radial projection in the spherical case, orthogonal projection
    /// in the planar limit.
    pub fn project(&self, x: &SVector<S, D>) -> SVector<S, D> {
        if self.is_plane() {
            let n2 = self.ul.norm_squared();
            if n2 == S::zero() {
                return *x;
            }
            return x - self.ul * (self.potential(x) / n2);
        }

        let center = self.center();
        let dir = x - center;
        let norm = dir.norm();
        let unit = if norm > S::zero() {
            dir / norm
        } else {
            // The query sits on the center; any radial direction is closest.
            let mut e = SVector::zeros();
            e[0] = S::one();
            e
        };
        center + unit * self.radius()
    }

    /// Center of the sphere, in world coordinates. Spherical case only.
    pub fn center(&self) -> SVector<S, D> {
        let two: S = nalgebra::convert(2.0);
        self.basis - self.ul / (two * self.uq)
    }

    /// Radius of the sphere. Spherical case only.
    pub fn radius(&self) -> S {
        let two: S = nalgebra::convert(2.0);
        self.pratt_norm() / (two * self.uq.abs())
    }

    /// Squared Pratt norm `‖ul‖² − 4·uc·uq`.
    pub fn pratt_norm2(&self) -> S {
        let four: S = nalgebra::convert(4.0);
        self.ul.norm_squared() - four * self.uc * self.uq
    }

    pub fn pratt_norm(&self) -> S {
        self.pratt_norm2().sqrt()
    }

    /// Scales the sphere so its Pratt norm is 1, making the potential a
    /// signed Euclidean-like distance. Returns `false` when already
    /// normalized or when the norm is too small to divide by.
    pub fn apply_pratt_norm(&mut self) -> bool {
        if self.normalized {
            return false;
        }
        let pn2 = self.pratt_norm2();
        if pn2 <= S::default_epsilon() {
            return false;
        }
        let pn = pn2.sqrt();
        self.uc /= pn;
        self.ul /= pn;
        self.uq /= pn;
        self.normalized = true;
        true
    }
}

/// Oriented algebraic sphere fit (APSS).
///
/// On top of the shared mean sums this accumulates Σw·n, Σw·(q·n) and
/// Σw·(q·q), then solves the closed form for `(uc, ul, uq)`.
pub struct OrientedSphereFit<P: OrientedPoint<D>, const D: usize, W> {
    weight: W,
    eval_pos: SVector<P::Scalar, D>,
    mean: MeanAccumulator<P::Scalar, D>,
    sum_normal: SVector<P::Scalar, D>,
    sum_dot_pn: P::Scalar,
    sum_dot_pp: P::Scalar,
    sphere: AlgebraicSphere<P::Scalar, D>,
    state: FitState,
}

impl<P, const D: usize, W> OrientedSphereFit<P, D, W>
where
    P: OrientedPoint<D>,
    W: WeightFunc<P, D>,
{
    pub fn new(weight: W) -> Self {
        Self {
            weight,
            eval_pos: SVector::zeros(),
            mean: MeanAccumulator::zeros(),
            sum_normal: SVector::zeros(),
            sum_dot_pn: P::Scalar::zero(),
            sum_dot_pp: P::Scalar::zero(),
            sphere: AlgebraicSphere::reset(SVector::zeros()),
            state: FitState::Undefined,
        }
    }

    /// Zeroes every sum and re-centers the fit basis on `eval_pos`.
    pub fn init(&mut self, eval_pos: SVector<P::Scalar, D>) {
        self.eval_pos = eval_pos;
        self.mean = MeanAccumulator::zeros();
        self.sum_normal = SVector::zeros();
        self.sum_dot_pn = P::Scalar::zero();
        self.sum_dot_pp = P::Scalar::zero();
        self.sphere = AlgebraicSphere::reset(eval_pos);
        self.state = FitState::Undefined;
    }

    /// Weighs `neighbor` and folds it into the sums. Returns whether the
    /// neighbor was counted.
    pub fn add_neighbor(&mut self, neighbor: &P) -> bool {
        let q = neighbor.pos() - self.eval_pos;
        let w = self.weight.w(&q, neighbor);
        self.add_local_neighbor(w, &q, neighbor)
    }

    pub fn add_local_neighbor(
        &mut self,
        w: P::Scalar,
        local_q: &SVector<P::Scalar, D>,
        attributes: &P,
    ) -> bool {
        if w <= P::Scalar::zero() {
            return false;
        }
        let n = attributes.normal();
        self.mean.add(w, local_q);
        self.sum_normal += n * w;
        self.sum_dot_pn += local_q.dot(&n) * w;
        self.sum_dot_pp += local_q.norm_squared() * w;
        true
    }

    /// Closes the fit.
    ///
    /// A zero weight sum, an empty neighborhood or a vanishing denominator
    /// leaves the sphere reset and the state [`FitState::Undefined`].
    pub fn finalize(&mut self) -> FitState {
        let half: P::Scalar = nalgebra::convert(0.5);
        let two: P::Scalar = nalgebra::convert(2.0);

        if self.mean.count == 0 || self.mean.sum_w == P::Scalar::zero() {
            self.sphere = AlgebraicSphere::reset(self.eval_pos);
            self.state = FitState::Undefined;
            return self.state;
        }

        let inv_sum_w = P::Scalar::one() / self.mean.sum_w;
        let num = self.sum_dot_pn - inv_sum_w * self.mean.sum_pos.dot(&self.sum_normal);
        let den = self.sum_dot_pp - inv_sum_w * self.mean.sum_pos.norm_squared();

        if den.abs() <= P::Scalar::default_epsilon() {
            self.sphere = AlgebraicSphere::reset(self.eval_pos);
            self.state = FitState::Undefined;
            return self.state;
        }

        let uq = half * num / den;
        let ul = (self.sum_normal - self.mean.sum_pos * (two * uq)) * inv_sum_w;
        let uc = -inv_sum_w * (ul.dot(&self.mean.sum_pos) + uq * self.sum_dot_pp);

        self.sphere = AlgebraicSphere::set(self.eval_pos, uc, ul, uq);
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

    pub fn state(&self) -> FitState {
        self.state
    }

    pub fn eval_pos(&self) -> SVector<P::Scalar, D> {
        self.eval_pos
    }

    pub fn neighbor_count(&self) -> usize {
        self.mean.count
    }

    /// The fitted sphere. Meaningful once [`finalize`](Self::finalize)
    /// returned a ready state.
    pub fn sphere(&self) -> &AlgebraicSphere<P::Scalar, D> {
        &self.sphere
    }

    pub fn sphere_mut(&mut self) -> &mut AlgebraicSphere<P::Scalar, D> {
        &mut self.sphere
    }
}

/// Oriented sphere fit with analytic derivatives in scale and/or space.
///
/// The per-axis sums differentiate the weights only, so the spatial
/// derivatives of `(uc, ul, uq)` are expressed in the basis frozen at the
/// evaluation point; [`d_potential`](Self::d_potential) and
/// [`d_normal`](Self::d_normal) add the in-frame terms and are total
/// derivatives of the moving-fit field.
pub struct OrientedSphereDer<P: OrientedPoint<D>, const D: usize, W> {
    fit: OrientedSphereFit<P, D, W>,
    mode: DiffMode,
    dsum_w: Diff<P::Scalar, D>,
    dsum_pos: Diff<SVector<P::Scalar, D>, D>,
    dsum_normal: Diff<SVector<P::Scalar, D>, D>,
    dsum_dot_pn: Diff<P::Scalar, D>,
    dsum_dot_pp: Diff<P::Scalar, D>,
    duc: Diff<P::Scalar, D>,
    dul: Diff<SVector<P::Scalar, D>, D>,
    duq: Diff<P::Scalar, D>,
}

impl<P, const D: usize, W> OrientedSphereDer<P, D, W>
where
    P: OrientedPoint<D>,
    W: WeightFunc<P, D>,
{
    pub fn new(weight: W, mode: DiffMode) -> Self {
        Self {
            fit: OrientedSphereFit::new(weight),
            mode,
            dsum_w: Diff::splat(P::Scalar::zero()),
            dsum_pos: Diff::splat(SVector::zeros()),
            dsum_normal: Diff::splat(SVector::zeros()),
            dsum_dot_pn: Diff::splat(P::Scalar::zero()),
            dsum_dot_pp: Diff::splat(P::Scalar::zero()),
            duc: Diff::splat(P::Scalar::zero()),
            dul: Diff::splat(SVector::zeros()),
            duq: Diff::splat(P::Scalar::zero()),
        }
    }

    pub fn init(&mut self, eval_pos: SVector<P::Scalar, D>) {
        self.fit.init(eval_pos);
        self.dsum_w = Diff::splat(P::Scalar::zero());
        self.dsum_pos = Diff::splat(SVector::zeros());
        self.dsum_normal = Diff::splat(SVector::zeros());
        self.dsum_dot_pn = Diff::splat(P::Scalar::zero());
        self.dsum_dot_pp = Diff::splat(P::Scalar::zero());
        self.duc = Diff::splat(P::Scalar::zero());
        self.dul = Diff::splat(SVector::zeros());
        self.duq = Diff::splat(P::Scalar::zero());
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

        let n = neighbor.normal();
        let qn = q.dot(&n);
        let qq = q.norm_squared();

        self.dsum_w.scale += dw.scale;
        self.dsum_pos.scale += q * dw.scale;
        self.dsum_normal.scale += n * dw.scale;
        self.dsum_dot_pn.scale += qn * dw.scale;
        self.dsum_dot_pp.scale += qq * dw.scale;
        for i in 0..D {
            self.dsum_w.space[i] += dw.space[i];
            self.dsum_pos.space[i] += q * dw.space[i];
            self.dsum_normal.space[i] += n * dw.space[i];
            self.dsum_dot_pn.space[i] += qn * dw.space[i];
            self.dsum_dot_pp.space[i] += qq * dw.space[i];
        }
        true
    }

    /// Closes the fit and derives `(uc, ul, uq)` per axis through the
    /// quotient rules of the closed form.
    pub fn finalize(&mut self) -> FitState {
        let state = self.fit.finalize();
        if !state.is_ready() {
            return state;
        }

        let half: P::Scalar = nalgebra::convert(0.5);
        let two: P::Scalar = nalgebra::convert(2.0);

        let sum_w = self.fit.mean.sum_w;
        let sum_pos = self.fit.mean.sum_pos;
        let sum_normal = self.fit.sum_normal;
        let sum_dot_pp = self.fit.sum_dot_pp;
        let inv = P::Scalar::one() / sum_w;

        let num = self.fit.sum_dot_pn - inv * sum_pos.dot(&sum_normal);
        let den = sum_dot_pp - inv * sum_pos.norm_squared();

        let uc = self.fit.sphere.uc();
        let ul = self.fit.sphere.ul();
        let uq = self.fit.sphere.uq();

        let mut axes: Vec<usize> = Vec::with_capacity(D + 1);
        if self.mode.has_scale() {
            axes.push(0);
        }
        if self.mode.has_space() {
            axes.extend(1..=D);
        }

        for axis in axes {
            let (dsum_w, dsum_pos, dsum_normal, dsum_dot_pn, dsum_dot_pp) = if axis == 0 {
                (
                    self.dsum_w.scale,
                    self.dsum_pos.scale,
                    self.dsum_normal.scale,
                    self.dsum_dot_pn.scale,
                    self.dsum_dot_pp.scale,
                )
            } else {
                let i = axis - 1;
                (
                    self.dsum_w.space[i],
                    self.dsum_pos.space[i],
                    self.dsum_normal.space[i],
                    self.dsum_dot_pn.space[i],
                    self.dsum_dot_pp.space[i],
                )
            };

            let dnum = dsum_dot_pn
                - inv
                    * inv
                    * (sum_w * (sum_normal.dot(&dsum_pos) + sum_pos.dot(&dsum_normal))
                        - dsum_w * sum_pos.dot(&sum_normal));
            let dden = dsum_dot_pp
                - inv * inv * (two * sum_w * sum_pos.dot(&dsum_pos) - dsum_w * sum_pos.norm_squared());

            let duq = half * (den * dnum - num * dden) / (den * den);
            let dul = (dsum_normal - ul * dsum_w) * inv
                - (sum_pos * duq + dsum_pos * uq) * (two * inv);
            let duc = -inv
                * (sum_pos.dot(&dul)
                    + sum_dot_pp * duq
                    + ul.dot(&dsum_pos)
                    + uq * dsum_dot_pp
                    + dsum_w * uc);

            if axis == 0 {
                self.duq.scale = duq;
                self.dul.scale = dul;
                self.duc.scale = duc;
            } else {
                self.duq.space[axis - 1] = duq;
                self.dul.space[axis - 1] = dul;
                self.duc.space[axis - 1] = duc;
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

    pub fn mode(&self) -> DiffMode {
        self.mode
    }

    /// The underlying fit and its primitive accessors.
    pub fn fit(&self) -> &OrientedSphereFit<P, D, W> {
        &self.fit
    }

    pub fn duc(&self) -> &Diff<P::Scalar, D> {
        &self.duc
    }

    pub fn dul(&self) -> &Diff<SVector<P::Scalar, D>, D> {
        &self.dul
    }

    pub fn duq(&self) -> &Diff<P::Scalar, D> {
        &self.duq
    }

    /// Derivative of the scalar field at the moving evaluation point.
    pub fn d_potential(&self) -> Diff<P::Scalar, D> {
        let mut out = self.duc;
        if self.mode.has_space() {
            let ul = self.fit.sphere.ul();
            for i in 0..D {
                out.space[i] += ul[i];
            }
        }
        out
    }

    /// Derivative of the sphere normal at the moving evaluation point.
    pub fn d_normal(&self) -> Diff<SVector<P::Scalar, D>, D> {
        let two: P::Scalar = nalgebra::convert(2.0);
        let ul = self.fit.sphere.ul();
        let uq = self.fit.sphere.uq();
        let norm = ul.norm();
        let mut out = Diff::splat(SVector::zeros());
        if norm == P::Scalar::zero() {
            return out;
        }
        let norm3 = norm * norm * norm;

        let project = |dgrad: SVector<P::Scalar, D>| {
            dgrad / norm - ul * (ul.dot(&dgrad) / norm3)
        };

        if self.mode.has_scale() {
            out.scale = project(self.dul.scale);
        }
        if self.mode.has_space() {
            for i in 0..D {
                let mut dgrad = self.dul.space[i];
                dgrad[i] += two * uq;
                out.space[i] = project(dgrad);
            }
        }
        out
    }

    /// Derivative of the squared Pratt norm:
    /// `2·ul·dul − 4·(uq·duc + uc·duq)` per axis.
    pub fn d_pratt_norm2(&self) -> Diff<P::Scalar, D> {
        let two: P::Scalar = nalgebra::convert(2.0);
        let four: P::Scalar = nalgebra::convert(4.0);
        let uc = self.fit.sphere.uc();
        let ul = self.fit.sphere.ul();
        let uq = self.fit.sphere.uq();

        let mut out = Diff::splat(P::Scalar::zero());
        out.scale = two * ul.dot(&self.dul.scale) - four * (uq * self.duc.scale + uc * self.duq.scale);
        for i in 0..D {
            out.space[i] = two * ul.dot(&self.dul.space[i])
                - four * (uq * self.duc.space[i] + uc * self.duq.space[i]);
        }
        out
    }

    /// Normalizes the sphere by its Pratt norm and propagates the quotient
    /// rule to the stored derivatives. Returns `false` when the sphere was
    /// already normalized or the norm is too small.
    pub fn apply_pratt_norm(&mut self) -> bool {
        if self.fit.sphere.is_normalized() {
            return false;
        }
        let pn2 = self.fit.sphere.pratt_norm2();
        if pn2 <= P::Scalar::default_epsilon() {
            return false;
        }
        let half: P::Scalar = nalgebra::convert(0.5);
        let pn = pn2.sqrt();
        let dpn2 = self.d_pratt_norm2();

        let uc = self.fit.sphere.uc();
        let ul = self.fit.sphere.ul();
        let uq = self.fit.sphere.uq();

        let mut update = |duc: &mut P::Scalar, dul: &mut SVector<P::Scalar, D>, duq: &mut P::Scalar, dpn2_k: P::Scalar| {
            let factor = half * dpn2_k / pn;
            *duc = (*duc * pn - uc * factor) / pn2;
            *dul = (*dul * pn - ul * factor) / pn2;
            *duq = (*duq * pn - uq * factor) / pn2;
        };

        update(&mut self.duc.scale, &mut self.dul.scale, &mut self.duq.scale, dpn2.scale);
        for i in 0..D {
            update(
                &mut self.duc.space[i],
                &mut self.dul.space[i],
                &mut self.duq.space[i],
                dpn2.space[i],
            );
        }

        self.fit.sphere.apply_pratt_norm()
    }
}
