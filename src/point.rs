use nalgebra::{RealField, SVector};

/// A fixed-dimension sample of a point cloud.
///
/// The kd-tree and the fitting procedures are generic over this trait so
/// that callers can index their own point records without copying them into
/// an intermediate layout.
pub trait Point<const D: usize>: Clone {
    type Scalar: RealField + Copy;

    /// Position of the sample.
    fn pos(&self) -> SVector<Self::Scalar, D>;
}

/// A point carrying a unit normal, as required by the oriented sphere fit.
pub trait OrientedPoint<const D: usize>: Point<D> {
    /// Unit normal at the sample.
    fn normal(&self) -> SVector<Self::Scalar, D>;
}

/// Minimal position-only point.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Position<S, const D: usize> {
    pub pos: SVector<S, D>,
}

impl<S: RealField + Copy, const D: usize> Position<S, D> {
    pub fn new(pos: SVector<S, D>) -> Self {
        Self { pos }
    }
}

impl<S: RealField + Copy, const D: usize> Point<D> for Position<S, D> {
    type Scalar = S;

    fn pos(&self) -> SVector<S, D> {
        self.pos
    }
}

/// Position paired with a unit normal.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NormalPosition<S, const D: usize> {
    pub pos: SVector<S, D>,
    pub normal: SVector<S, D>,
}

impl<S: RealField + Copy, const D: usize> NormalPosition<S, D> {
    pub fn new(pos: SVector<S, D>, normal: SVector<S, D>) -> Self {
        Self { pos, normal }
    }
}

impl<S: RealField + Copy, const D: usize> Point<D> for NormalPosition<S, D> {
    type Scalar = S;

    fn pos(&self) -> SVector<S, D> {
        self.pos
    }
}

impl<S: RealField + Copy, const D: usize> OrientedPoint<D> for NormalPosition<S, D> {
    fn normal(&self) -> SVector<S, D> {
        self.normal
    }
}
