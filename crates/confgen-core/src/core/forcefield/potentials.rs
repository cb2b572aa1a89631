#[inline]
pub fn lennard_jones_12_6(dist: f64, r_min: f64, well_depth: f64) -> f64 {
    if dist < 1e-6 {
        return 1e10;
    }
    let rho = r_min / dist;
    let rho6 = rho.powi(6);
    let rho12 = rho6 * rho6;
    well_depth * (rho12 - 2.0 * rho6)
}

/// dE/dr of [`lennard_jones_12_6`].
#[inline]
pub fn lennard_jones_12_6_derivative(dist: f64, r_min: f64, well_depth: f64) -> f64 {
    if dist < 1e-6 {
        return 0.0;
    }
    let rho = r_min / dist;
    let rho6 = rho.powi(6);
    let rho12 = rho6 * rho6;
    12.0 * well_depth * (rho6 - rho12) / dist
}

#[inline]
pub fn harmonic(value: f64, rest: f64, force: f64) -> f64 {
    let delta = value - rest;
    force * delta * delta
}

#[inline]
pub fn harmonic_derivative(value: f64, rest: f64, force: f64) -> f64 {
    2.0 * force * (value - rest)
}

/// Periodic torsion `V/2 * (1 + sign * cos(n * phi))`, `phi` in radians.
///
/// `sign = 1` puts minima at `n * phi = 180°` (staggered for `n = 3`); `sign = -1`
/// puts them at `n * phi = 0°` (planar for `n = 2`).
#[inline]
pub fn periodic_torsion(phi: f64, barrier: f64, periodicity: f64, sign: f64) -> f64 {
    0.5 * barrier * (1.0 + sign * (periodicity * phi).cos())
}

#[inline]
pub fn periodic_torsion_derivative(phi: f64, barrier: f64, periodicity: f64, sign: f64) -> f64 {
    -0.5 * barrier * sign * periodicity * (periodicity * phi).sin()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    fn numeric(f: impl Fn(f64) -> f64, x: f64) -> f64 {
        let h = 1e-6;
        (f(x + h) - f(x - h)) / (2.0 * h)
    }

    #[test]
    fn lennard_jones_minimum_is_at_r_min() {
        let r_min = 3.4;
        let eps = 0.1;
        assert!((lennard_jones_12_6(r_min, r_min, eps) + eps).abs() < 1e-12);
        assert!(lennard_jones_12_6_derivative(r_min, r_min, eps).abs() < 1e-12);
        assert!(lennard_jones_12_6(2.5, r_min, eps) > 0.0);
        assert_eq!(lennard_jones_12_6(0.0, r_min, eps), 1e10);
    }

    #[test]
    fn analytic_derivatives_match_finite_differences() {
        for r in [2.8, 3.4, 4.5] {
            let analytic = lennard_jones_12_6_derivative(r, 3.4, 0.2);
            let numerical = numeric(|x| lennard_jones_12_6(x, 3.4, 0.2), r);
            assert!((analytic - numerical).abs() < 1e-5);
        }
        for phi in [0.3, 1.2, 2.9] {
            let analytic = periodic_torsion_derivative(phi, 2.0, 3.0, 1.0);
            let numerical = numeric(|x| periodic_torsion(x, 2.0, 3.0, 1.0), phi);
            assert!((analytic - numerical).abs() < 1e-6);
        }
        let analytic = harmonic_derivative(1.6, 1.5, 300.0);
        let numerical = numeric(|x| harmonic(x, 1.5, 300.0), 1.6);
        assert!((analytic - numerical).abs() < 1e-4);
    }

    #[test]
    fn torsion_minima_follow_sign_convention() {
        let staggered = periodic_torsion(PI / 3.0, 2.0, 3.0, 1.0);
        let eclipsed = periodic_torsion(0.0, 2.0, 3.0, 1.0);
        assert!(staggered.abs() < 1e-12);
        assert!((eclipsed - 2.0).abs() < 1e-12);

        let planar = periodic_torsion(PI, 45.0, 2.0, -1.0);
        let twisted = periodic_torsion(PI / 2.0, 45.0, 2.0, -1.0);
        assert!(planar.abs() < 1e-9);
        assert!((twisted - 45.0).abs() < 1e-9);
    }
}
