use nalgebra::{RealField, SVector};

/// Axis-aligned bounding box over a point range.
///
/// Boxes are computed transiently while the kd-tree is built; nodes do not
/// store them. A box always contains at least one point, so there is no
/// empty state.
#[derive(Clone, Copy, Debug)]
pub struct Aabb<S, const D: usize> {
    pub min: SVector<S, D>,
    pub max: SVector<S, D>,
}

impl<S: RealField + Copy, const D: usize> Aabb<S, D> {
    /// A degenerate box containing a single point.
    pub fn from_point(p: SVector<S, D>) -> Self {
        Self { min: p, max: p }
    }

    /// Grows the box to contain `p`.
    pub fn extend(&mut self, p: &SVector<S, D>) {
        for i in 0..D {
            if p[i] < self.min[i] {
                self.min[i] = p[i];
            }
            if p[i] > self.max[i] {
                self.max[i] = p[i];
            }
        }
    }

    pub fn center(&self) -> SVector<S, D> {
        let half: S = nalgebra::convert(0.5);
        (self.min + self.max) * half
    }

    pub fn extent(&self) -> SVector<S, D> {
        self.max - self.min
    }

    /// Index of the widest axis. Ties resolve to the lowest index.
    pub fn longest_axis(&self) -> usize {
        let extent = self.extent();
        let mut axis = 0;
        for i in 1..D {
            if extent[i] > extent[axis] {
                axis = i;
            }
        }
        axis
    }

    /// Squared distance from `p` to the box, zero when `p` is inside.
    pub fn squared_distance_to(&self, p: &SVector<S, D>) -> S {
        let mut d2 = S::zero();
        for i in 0..D {
            if p[i] < self.min[i] {
                let d = self.min[i] - p[i];
                d2 += d * d;
            } else if p[i] > self.max[i] {
                let d = p[i] - self.max[i];
                d2 += d * d;
            }
        }
        d2
    }

    pub fn contains(&self, p: &SVector<S, D>) -> bool {
        (0..D).all(|i| self.min[i] <= p[i] && p[i] <= self.max[i])
    }
}
