use nalgebra::{RealField, SVector};

/// Outcome of a fit finalization.
///
/// Numerical degeneracy is reported through this value and never panics:
/// too few neighbors, a vanishing weight sum or a vanishing denominator
/// yield [`Undefined`](FitState::Undefined) with the primitive reset.
/// [`Unstable`](FitState::Unstable) is reserved for borderline
/// conditioning; the current policy returns `Stable` whenever the
/// `Undefined` checks pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FitState {
    Undefined,
    Unstable,
    Stable,
}

impl FitState {
    pub fn is_stable(self) -> bool {
        self == FitState::Stable
    }

    /// Stable or unstable: the primitive holds usable values.
    pub fn is_ready(self) -> bool {
        matches!(self, FitState::Stable | FitState::Unstable)
    }
}

/// Weighted first-order moments shared by the fitting procedures:
/// Σw, Σw·q over relative neighbor positions, and the neighbor count.
#[derive(Clone, Copy, Debug)]
pub struct MeanAccumulator<S, const D: usize> {
    pub sum_w: S,
    pub sum_pos: SVector<S, D>,
    pub count: usize,
}

impl<S: RealField + Copy, const D: usize> MeanAccumulator<S, D> {
    pub fn zeros() -> Self {
        Self {
            sum_w: S::zero(),
            sum_pos: SVector::zeros(),
            count: 0,
        }
    }

    pub fn add(&mut self, w: S, local_q: &SVector<S, D>) {
        self.sum_w += w;
        self.sum_pos += *local_q * w;
        self.count += 1;
    }

    /// Weighted mean of the relative positions, `None` while Σw is zero.
    pub fn mean(&self) -> Option<SVector<S, D>> {
        (self.sum_w != S::zero()).then(|| self.sum_pos / self.sum_w)
    }
}
