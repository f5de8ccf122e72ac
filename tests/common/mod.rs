#![allow(dead_code)]

use cloudfit::{NormalPosition, Position};
use nalgebra::Vector3;
use rand::Rng;

/// Uniform random cloud in `[-1, 1]^3`.
pub fn random_cloud(n: usize, rng: &mut impl Rng) -> Vec<Position<f64, 3>> {
    (0..n)
        .map(|_| {
            Position::new(Vector3::new(
                rng.gen_range(-1.0..1.0),
                rng.gen_range(-1.0..1.0),
                rng.gen_range(-1.0..1.0),
            ))
        })
        .collect()
}

/// Random points on the sphere of the given center and radius, with
/// outward unit normals.
pub fn sphere_cloud(
    n: usize,
    center: Vector3<f64>,
    radius: f64,
    rng: &mut impl Rng,
) -> Vec<NormalPosition<f64, 3>> {
    let mut cloud = Vec::with_capacity(n);
    while cloud.len() < n {
        let v = Vector3::new(
            rng.gen_range(-1.0..1.0),
            rng.gen_range(-1.0..1.0),
            rng.gen_range(-1.0..1.0),
        );
        let norm = v.norm();
        if norm < 1e-3 || norm > 1.0 {
            continue;
        }
        let dir = v / norm;
        cloud.push(NormalPosition::new(center + dir * radius, dir));
    }
    cloud
}

/// Indices of all points within `radius` of `query`, excluding `skip`.
pub fn brute_force_range(
    points: &[Position<f64, 3>],
    sampling: &[u32],
    query: Vector3<f64>,
    radius: f64,
    skip: Option<usize>,
) -> Vec<usize> {
    let r2 = radius * radius;
    let mut out: Vec<usize> = sampling
        .iter()
        .map(|&i| i as usize)
        .filter(|&i| Some(i) != skip)
        .filter(|&i| (points[i].pos - query).norm_squared() <= r2)
        .collect();
    out.sort_unstable();
    out
}

/// The `k` sampled points closest to `query`, excluding `skip`, ordered by
/// (distance, index).
pub fn brute_force_knn(
    points: &[Position<f64, 3>],
    sampling: &[u32],
    query: Vector3<f64>,
    k: usize,
    skip: Option<usize>,
) -> Vec<usize> {
    let mut candidates: Vec<(f64, usize)> = sampling
        .iter()
        .map(|&i| i as usize)
        .filter(|&i| Some(i) != skip)
        .map(|i| ((points[i].pos - query).norm_squared(), i))
        .collect();
    candidates.sort_by(|a, b| a.partial_cmp(b).unwrap());
    candidates.truncate(k);
    candidates.into_iter().map(|(_, i)| i).collect()
}
