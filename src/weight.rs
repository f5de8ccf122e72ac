use nalgebra::{RealField, SVector};
use num_traits::Zero;

use crate::point::Point;

/// 1D kernel profile evaluated on the normalized distance `x = ‖q‖ / scale`.
pub trait WeightKernel<S> {
    /// Kernel value at `x ∈ [0, 1]`.
    fn f(&self, x: S) -> S;

    /// First derivative of [`f`](Self::f).
    fn df(&self, x: S) -> S;
}

/// Smooth compactly-supported profile `(1 - x²)²`.
#[derive(Clone, Copy, Debug, Default)]
pub struct SmoothWeightKernel;

impl<S: RealField + Copy> WeightKernel<S> for SmoothWeightKernel {
    fn f(&self, x: S) -> S {
        let v = S::one() - x * x;
        v * v
    }

    fn df(&self, x: S) -> S {
        let four: S = nalgebra::convert(4.0);
        -four * x * (S::one() - x * x)
    }
}

/// Flat profile: every neighbor inside the support weighs 1.
#[derive(Clone, Copy, Debug, Default)]
pub struct ConstantWeightKernel;

impl<S: RealField + Copy> WeightKernel<S> for ConstantWeightKernel {
    fn f(&self, _x: S) -> S {
        S::one()
    }

    fn df(&self, _x: S) -> S {
        S::zero()
    }
}

/// Weighting scheme consumed by the fitting procedures.
///
/// `local_q` is the neighbor position relative to the evaluation point.
/// Weights must be non-negative; a fit drops neighbors whose weight is not
/// strictly positive.
pub trait WeightFunc<P: Point<D>, const D: usize> {
    /// Weight of a neighbor.
    fn w(&self, local_q: &SVector<P::Scalar, D>, attributes: &P) -> P::Scalar;

    /// Derivative of the weight with respect to the evaluation scale.
    fn scale_dw(&self, local_q: &SVector<P::Scalar, D>, attributes: &P) -> P::Scalar;

    /// Gradient of the weight with respect to the neighbor position.
    fn space_dw(&self, local_q: &SVector<P::Scalar, D>, attributes: &P)
        -> SVector<P::Scalar, D>;
}

/// Radial weight: a kernel profile applied to `‖q‖ / scale`, zero outside
/// the support ball of radius `scale`.
#[derive(Clone, Copy, Debug)]
pub struct DistWeightFunc<S, K> {
    scale: S,
    kernel: K,
}

impl<S: RealField + Copy, K> DistWeightFunc<S, K> {
    pub fn new(scale: S, kernel: K) -> Self {
        assert!(scale > S::zero(), "evaluation scale must be positive");
        Self { scale, kernel }
    }

    pub fn scale(&self) -> S {
        self.scale
    }
}

impl<P, const D: usize, K> WeightFunc<P, D> for DistWeightFunc<P::Scalar, K>
where
    P: Point<D>,
    K: WeightKernel<P::Scalar>,
{
    fn w(&self, local_q: &SVector<P::Scalar, D>, _attributes: &P) -> P::Scalar {
        let d = local_q.norm();
        if d > self.scale {
            P::Scalar::zero()
        } else {
            self.kernel.f(d / self.scale)
        }
    }

    fn scale_dw(&self, local_q: &SVector<P::Scalar, D>, _attributes: &P) -> P::Scalar {
        let d = local_q.norm();
        if d > self.scale {
            P::Scalar::zero()
        } else {
            -(d / (self.scale * self.scale)) * self.kernel.df(d / self.scale)
        }
    }

    fn space_dw(
        &self,
        local_q: &SVector<P::Scalar, D>,
        _attributes: &P,
    ) -> SVector<P::Scalar, D> {
        let d = local_q.norm();
        if d > self.scale || d == P::Scalar::zero() {
            SVector::zeros()
        } else {
            *local_q * (self.kernel.df(d / self.scale) / (self.scale * d))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::point::Position;
    use nalgebra::Vector3;

    #[test]
    fn smooth_kernel_profile() {
        let k = SmoothWeightKernel;
        assert_eq!(WeightKernel::<f64>::f(&k, 0.0), 1.0);
        assert_eq!(WeightKernel::<f64>::f(&k, 1.0), 0.0);
        assert_eq!(WeightKernel::<f64>::df(&k, 0.0), 0.0);
        assert!(WeightKernel::<f64>::df(&k, 0.5) < 0.0);
    }

    #[test]
    fn support_boundary() {
        let wf = DistWeightFunc::new(1.0, SmoothWeightKernel);
        let p = Position::<f64, 3>::new(Vector3::zeros());
        let inside = Vector3::new(0.5, 0.0, 0.0);
        let outside = Vector3::new(1.5, 0.0, 0.0);
        assert!(WeightFunc::<Position<f64, 3>, 3>::w(&wf, &inside, &p) > 0.0);
        assert_eq!(WeightFunc::<Position<f64, 3>, 3>::w(&wf, &outside, &p), 0.0);
        assert_eq!(
            WeightFunc::<Position<f64, 3>, 3>::space_dw(&wf, &Vector3::zeros(), &p),
            Vector3::zeros()
        );
    }

    #[test]
    fn scale_derivative_matches_finite_difference() {
        let p = Position::<f64, 3>::new(Vector3::zeros());
        let q = Vector3::new(0.3, 0.2, -0.1);
        let eps = 1e-6;
        let lo = DistWeightFunc::new(1.0 - eps, SmoothWeightKernel);
        let hi = DistWeightFunc::new(1.0 + eps, SmoothWeightKernel);
        let wf = DistWeightFunc::new(1.0, SmoothWeightKernel);
        let fd = (WeightFunc::<Position<f64, 3>, 3>::w(&hi, &q, &p)
            - WeightFunc::<Position<f64, 3>, 3>::w(&lo, &q, &p))
            / (2.0 * eps);
        let analytic = WeightFunc::<Position<f64, 3>, 3>::scale_dw(&wf, &q, &p);
        assert!((fd - analytic).abs() < 1e-8, "fd {fd} vs analytic {analytic}");
    }
}
