//! # cloudfit
//!
//! `cloudfit` is a Rust library for fitting local geometric primitives
//! (planes and algebraic spheres) to oriented point clouds, together with
//! the spatial-partitioning machinery used to gather the neighborhoods
//! those fits consume. It targets geometry-processing pipelines that
//! estimate surface properties (normals, curvature, surface variation) at
//! sample points of a 3D or higher-dimensional cloud.
//!
//! ## Features
//!
//! - **Static kd-tree**: compact packed nodes, k-nearest / nearest / radius
//!   queries seeded by an external position or by an indexed point, with an
//!   optional subsampled variant and an inverse sample map.
//! - **k-NN graph**: per-sample neighbor rows precomputed in parallel on
//!   top of the kd-tree queries.
//! - **Weighted fits**: covariance plane fit and oriented algebraic sphere
//!   fit (APSS) with O(1) per-neighbor accumulation and closed-form
//!   finalization.
//! - **Analytic derivatives**: scale and spatial differentiation of both
//!   fits, consistent with the accumulated moments.
//!
//! ## Main Interface
//!
//! Build a [`KdTree`] over a cloud of [`Point`]s, gather neighbors with its
//! query iterators, and feed them to a [`CovariancePlaneFit`] or an
//! [`OrientedSphereFit`] through a [`DistWeightFunc`].

mod bounds;
mod diff;
mod fit;
mod kdtree;
mod knn_graph;
mod node;
mod point;
mod query;
mod sampling;
mod weight;
mod plane;
mod sphere;

pub use bounds::Aabb;
pub use diff::{Diff, DiffMode};
pub use fit::{FitState, MeanAccumulator};
pub use kdtree::{KdTree, KdTreeBase, SubsampledKdTree};
pub use knn_graph::{KnnGraph, KnnGraphRangeIter};
pub use node::MAX_DEPTH;
pub use point::{NormalPosition, OrientedPoint, Point, Position};
pub use query::{KNearestIter, RangeIter};
pub use sampling::{DenseSampleMap, SampleMapping, SparseSampleMap};
pub use weight::{ConstantWeightKernel, DistWeightFunc, SmoothWeightKernel, WeightFunc, WeightKernel};
pub use plane::{CovariancePlaneDer, CovariancePlaneFit, Plane};
pub use sphere::{AlgebraicSphere, OrientedSphereDer, OrientedSphereFit};
