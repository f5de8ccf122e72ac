use cloudfit::{
    CovariancePlaneDer, CovariancePlaneFit, DiffMode, DistWeightFunc, FitState, NormalPosition,
    OrientedSphereDer, OrientedSphereFit, Position, SmoothWeightKernel,
};
use nalgebra::Vector3;

mod common;
use common::sphere_cloud;

const FD_STEP: f64 = 1e-5;

fn close(fd: f64, analytic: f64, tol: f64) -> bool {
    (fd - analytic).abs() <= tol * (1.0 + analytic.abs())
}

fn close_vec(fd: Vector3<f64>, analytic: Vector3<f64>, tol: f64) -> bool {
    (fd - analytic).norm() <= tol * (1.0 + analytic.norm())
}

/// Smooth curved height field sampled on a grid, so that every derivative
/// of the plane fit is non-trivial.
fn curved_cloud() -> Vec<Position<f64, 3>> {
    let mut cloud = Vec::new();
    for i in 0..9 {
        for j in 0..9 {
            let x = (i as f64 - 4.0) * 0.25;
            let y = (j as f64 - 4.0) * 0.25;
            let z = 0.2 * x * x - 0.1 * y * y + 0.05 * x * y;
            cloud.push(Position::new(Vector3::new(x, y, z)));
        }
    }
    cloud
}

/// Plane fit at the given eval/scale; the normal (and dependent signed
/// distance) is sign-aligned to `reference` since eigenvectors carry an
/// arbitrary sign.
fn plane_sample(
    cloud: &[Position<f64, 3>],
    eval: Vector3<f64>,
    scale: f64,
    reference: Vector3<f64>,
) -> (Vector3<f64>, f64) {
    let mut fit = CovariancePlaneFit::new(DistWeightFunc::new(scale, SmoothWeightKernel));
    assert_eq!(fit.compute(eval, cloud.iter()), FitState::Stable);
    let mut normal = fit.normal();
    if normal.dot(&reference) < 0.0 {
        normal = -normal;
    }
    let dist = normal.dot(&(eval - fit.center()));
    (normal, dist)
}

#[test]
fn plane_scale_derivative_matches_finite_difference() {
    let cloud = curved_cloud();
    let eval = Vector3::new(0.05, -0.03, 0.02);
    let scale = 1.0;

    let mut der = CovariancePlaneDer::new(
        DistWeightFunc::new(scale, SmoothWeightKernel),
        DiffMode::ScaleSpace,
    );
    assert_eq!(der.compute(eval, cloud.iter()), FitState::Stable);
    let reference = der.fit().normal();

    let (n_hi, d_hi) = plane_sample(&cloud, eval, scale + FD_STEP, reference);
    let (n_lo, d_lo) = plane_sample(&cloud, eval, scale - FD_STEP, reference);

    let fd_normal = (n_hi - n_lo) / (2.0 * FD_STEP);
    let fd_dist = (d_hi - d_lo) / (2.0 * FD_STEP);

    assert!(
        close_vec(fd_normal, der.dnormal().scale, 1e-4),
        "dnormal/dscale: fd {fd_normal:?} vs analytic {:?}",
        der.dnormal().scale
    );
    assert!(
        close(fd_dist, der.ddist().scale, 1e-4),
        "ddist/dscale: fd {fd_dist} vs analytic {}",
        der.ddist().scale
    );
}

#[test]
fn plane_space_derivative_matches_finite_difference() {
    let cloud = curved_cloud();
    let eval = Vector3::new(0.05, -0.03, 0.02);
    let scale = 1.0;

    let mut der = CovariancePlaneDer::new(
        DistWeightFunc::new(scale, SmoothWeightKernel),
        DiffMode::ScaleSpace,
    );
    assert_eq!(der.compute(eval, cloud.iter()), FitState::Stable);
    let reference = der.fit().normal();

    for axis in 0..3 {
        let mut offset = Vector3::zeros();
        offset[axis] = FD_STEP;
        let (n_hi, d_hi) = plane_sample(&cloud, eval + offset, scale, reference);
        let (n_lo, d_lo) = plane_sample(&cloud, eval - offset, scale, reference);

        let fd_normal = (n_hi - n_lo) / (2.0 * FD_STEP);
        let fd_dist = (d_hi - d_lo) / (2.0 * FD_STEP);

        assert!(
            close_vec(fd_normal, der.dnormal().space[axis], 1e-4),
            "axis {axis}: fd {fd_normal:?} vs analytic {:?}",
            der.dnormal().space[axis]
        );
        assert!(
            close(fd_dist, der.ddist().space[axis], 1e-4),
            "axis {axis}: fd {fd_dist} vs analytic {}",
            der.ddist().space[axis]
        );
    }
}

fn sphere_sample(
    cloud: &[NormalPosition<f64, 3>],
    eval: Vector3<f64>,
    scale: f64,
) -> (f64, Vector3<f64>, f64) {
    let mut fit = OrientedSphereFit::new(DistWeightFunc::new(scale, SmoothWeightKernel));
    assert_eq!(fit.compute(eval, cloud.iter()), FitState::Stable);
    let s = fit.sphere();
    (s.uc(), s.ul(), s.uq())
}

#[test]
fn sphere_scale_derivative_matches_finite_difference() {
    let mut rng = rand::thread_rng();
    let cloud = sphere_cloud(512, Vector3::zeros(), 1.0, &mut rng);
    let eval = Vector3::new(0.1, -0.05, 0.2);
    let scale = 1.5;

    let mut der = OrientedSphereDer::new(
        DistWeightFunc::new(scale, SmoothWeightKernel),
        DiffMode::ScaleSpace,
    );
    assert_eq!(der.compute(eval, cloud.iter()), FitState::Stable);

    let (uc_hi, ul_hi, uq_hi) = sphere_sample(&cloud, eval, scale + FD_STEP);
    let (uc_lo, ul_lo, uq_lo) = sphere_sample(&cloud, eval, scale - FD_STEP);

    let fd_uc = (uc_hi - uc_lo) / (2.0 * FD_STEP);
    let fd_ul = (ul_hi - ul_lo) / (2.0 * FD_STEP);
    let fd_uq = (uq_hi - uq_lo) / (2.0 * FD_STEP);

    assert!(close(fd_uc, der.duc().scale, 1e-5), "duc: {fd_uc} vs {}", der.duc().scale);
    assert!(close_vec(fd_ul, der.dul().scale, 1e-5));
    assert!(close(fd_uq, der.duq().scale, 1e-5), "duq: {fd_uq} vs {}", der.duq().scale);

    // Squared Pratt norm derivative, straight from the coefficients.
    let pn2 = |uc: f64, ul: Vector3<f64>, uq: f64| ul.norm_squared() - 4.0 * uc * uq;
    let fd_pn2 = (pn2(uc_hi, ul_hi, uq_hi) - pn2(uc_lo, ul_lo, uq_lo)) / (2.0 * FD_STEP);
    assert!(close(fd_pn2, der.d_pratt_norm2().scale, 1e-5));

    // d_potential in scale is the derivative of the potential at the
    // evaluation point, which is uc itself.
    assert!(close(fd_uc, der.d_potential().scale, 1e-5));

    // Normal derivative: the normal at the evaluation point is ul
    // normalized.
    let fd_normal = (ul_hi.normalize() - ul_lo.normalize()) / (2.0 * FD_STEP);
    assert!(close_vec(fd_normal, der.d_normal().scale, 1e-5));
}

#[test]
fn sphere_space_derivative_matches_finite_difference() {
    let mut rng = rand::thread_rng();
    let cloud = sphere_cloud(512, Vector3::zeros(), 1.0, &mut rng);
    let eval = Vector3::new(0.1, -0.05, 0.2);
    let scale = 1.5;

    let mut der = OrientedSphereDer::new(
        DistWeightFunc::new(scale, SmoothWeightKernel),
        DiffMode::ScaleSpace,
    );
    assert_eq!(der.compute(eval, cloud.iter()), FitState::Stable);

    for axis in 0..3 {
        let mut offset = Vector3::zeros();
        offset[axis] = FD_STEP;
        let (uc_hi, ul_hi, uq_hi) = sphere_sample(&cloud, eval + offset, scale);
        let (uc_lo, ul_lo, uq_lo) = sphere_sample(&cloud, eval - offset, scale);

        // The analytic spatial derivatives of the coefficients are frozen-
        // basis derivatives: re-express the shifted fits in the basis of
        // `eval` before differencing.
        let frozen_uc_hi = uc_hi - ul_hi.dot(&offset) + uq_hi * offset.norm_squared();
        let frozen_uc_lo = uc_lo - ul_lo.dot(&(-offset)) + uq_lo * offset.norm_squared();
        let frozen_ul_hi = ul_hi - offset * (2.0 * uq_hi);
        let frozen_ul_lo = ul_lo + offset * (2.0 * uq_lo);

        let fd_uc = (frozen_uc_hi - frozen_uc_lo) / (2.0 * FD_STEP);
        let fd_ul = (frozen_ul_hi - frozen_ul_lo) / (2.0 * FD_STEP);
        let fd_uq = (uq_hi - uq_lo) / (2.0 * FD_STEP);

        assert!(
            close(fd_uc, der.duc().space[axis], 1e-5),
            "axis {axis}: duc fd {fd_uc} vs {}",
            der.duc().space[axis]
        );
        assert!(close_vec(fd_ul, der.dul().space[axis], 1e-5));
        assert!(close(fd_uq, der.duq().space[axis], 1e-5));

        // The raw (moving-basis) constant term differentiates to the
        // moving-fit potential derivative.
        let fd_raw_uc = (uc_hi - uc_lo) / (2.0 * FD_STEP);
        assert!(
            close(fd_raw_uc, der.d_potential().space[axis], 1e-5),
            "axis {axis}: dpotential fd {fd_raw_uc} vs {}",
            der.d_potential().space[axis]
        );

        // Normal derivative at the moving evaluation point.
        let fd_normal = (ul_hi.normalize() - ul_lo.normalize()) / (2.0 * FD_STEP);
        assert!(close_vec(fd_normal, der.d_normal().space[axis], 1e-5));
    }
}

#[test]
fn pratt_normalized_derivatives_match_finite_difference() {
    let mut rng = rand::thread_rng();
    let cloud = sphere_cloud(512, Vector3::zeros(), 1.0, &mut rng);
    let eval = Vector3::new(0.1, -0.05, 0.2);
    let scale = 1.5;

    let mut der = OrientedSphereDer::new(
        DistWeightFunc::new(scale, SmoothWeightKernel),
        DiffMode::Scale,
    );
    assert_eq!(der.compute(eval, cloud.iter()), FitState::Stable);
    assert!(der.apply_pratt_norm());
    assert!((der.fit().sphere().pratt_norm() - 1.0).abs() <= 1e-9);

    let normalized = |uc: f64, ul: Vector3<f64>, uq: f64| {
        let pn = (ul.norm_squared() - 4.0 * uc * uq).sqrt();
        (uc / pn, ul / pn, uq / pn)
    };
    let (uc_hi, ul_hi, uq_hi) = sphere_sample(&cloud, eval, scale + FD_STEP);
    let (uc_lo, ul_lo, uq_lo) = sphere_sample(&cloud, eval, scale - FD_STEP);
    let (nc_hi, nl_hi, nq_hi) = normalized(uc_hi, ul_hi, uq_hi);
    let (nc_lo, nl_lo, nq_lo) = normalized(uc_lo, ul_lo, uq_lo);

    let fd_uc = (nc_hi - nc_lo) / (2.0 * FD_STEP);
    let fd_ul = (nl_hi - nl_lo) / (2.0 * FD_STEP);
    let fd_uq = (nq_hi - nq_lo) / (2.0 * FD_STEP);

    assert!(close(fd_uc, der.duc().scale, 1e-5));
    assert!(close_vec(fd_ul, der.dul().scale, 1e-5));
    assert!(close(fd_uq, der.duq().scale, 1e-5));
}

#[test]
fn scale_only_mode_leaves_space_slots_at_zero() {
    let mut rng = rand::thread_rng();
    let cloud = sphere_cloud(128, Vector3::zeros(), 1.0, &mut rng);
    let mut der = OrientedSphereDer::new(
        DistWeightFunc::new(1.5, SmoothWeightKernel),
        DiffMode::Scale,
    );
    assert_eq!(der.compute(Vector3::new(0.1, 0.0, 0.0), cloud.iter()), FitState::Stable);
    for axis in 0..3 {
        assert_eq!(der.duc().space[axis], 0.0);
        assert_eq!(der.duq().space[axis], 0.0);
        assert_eq!(der.dul().space[axis], Vector3::zeros());
    }
    assert_ne!(der.duq().scale, 0.0);
}
