use std::f64::consts;

use crate::{Spectrum, Vec3d};

pub trait FloatExt {
    fn sq(self) -> Self;
    fn lerp(self, other: Self, t: Self) -> Self;
    fn saturate(self) -> Self;
}

impl FloatExt for f64 {
    fn sq(self) -> Self {
        self * self
    }

    fn lerp(self, other: Self, t: Self) -> Self {
        #[allow(clippy::suboptimal_flops)]
        {
            self * (1.0 - t) + other * t
        }
    }

    fn saturate(self) -> Self {
        self.clamp(0.0, 1.0)
    }
}

pub trait VecExt {
    type Scalar;
    #[must_use]
    fn average(self) -> Self::Scalar;
    #[must_use]
    fn sq(self) -> Self;
    #[must_use]
    fn safe_normalize_or(self, fallback: Self) -> Self;
    #[must_use]
    fn is_finite_nonnegative(self) -> bool;
}

impl VecExt for Vec3d {
    type Scalar = f64;

    /// Returns the mean of all channels
    fn average(self) -> Self::Scalar {
        (self.x + self.y + self.z) / 3.0
    }

    fn sq(self) -> Self {
        self * self
    }

    fn safe_normalize_or(self, fallback: Self) -> Self {
        self.try_normalize().unwrap_or(fallback)
    }

    fn is_finite_nonnegative(self) -> bool {
        self.is_finite() && self.min_element() >= 0.0
    }
}

#[must_use]
pub fn safe_sqrt(v: f64) -> f64 {
    v.max(0.0).sqrt()
}

#[must_use]
pub fn safe_acos(v: f64) -> f64 {
    v.clamp(-1.0, 1.0).acos()
}

#[must_use]
pub fn safe_asin(v: f64) -> f64 {
    v.clamp(-1.0, 1.0).asin()
}

#[must_use]
pub fn safe_divide(a: f64, b: f64) -> f64 {
    if b == 0.0 {
        0.0
    } else {
        a / b
    }
}

#[must_use]
pub fn safe_divide_color(a: Spectrum, b: Spectrum) -> Spectrum {
    Spectrum::new(
        safe_divide(a.x, b.x),
        safe_divide(a.y, b.y),
        safe_divide(a.z, b.z),
    )
}

#[must_use]
pub fn cos_from_sin(s: f64) -> f64 {
    safe_sqrt(1.0 - s * s)
}

#[must_use]
pub fn reflect(n: Vec3d, vec: Vec3d) -> Vec3d {
    n * (n.dot(vec) * 2.0) - vec
}

/// Refracts `i` (pointing away from the surface) through the plane with normal `m`, where `eta`
/// is the ratio of the index of refraction below `m` to the one above.
/// Returns `None` on total internal reflection
#[must_use]
pub fn refract(i: Vec3d, m: Vec3d, eta: f64) -> Option<Vec3d> {
    let c = i.dot(m);
    let inv_eta = 1.0 / eta;
    #[allow(clippy::suboptimal_flops)]
    let disc = 1.0 - inv_eta.sq() * (1.0 - c.sq());
    if disc <= 0.0 {
        None
    } else {
        #[allow(clippy::suboptimal_flops)]
        let t = m * (c * inv_eta - c.signum() * disc.sqrt()) - i * inv_eta;
        t.try_normalize()
    }
}

/// Unpolarized fresnel reflectance of a dielectric interface
#[must_use]
pub fn fresnel_dielectric_cos(cosi: f64, eta: f64) -> f64 {
    let c = cosi.abs();
    #[allow(clippy::suboptimal_flops)]
    let g2 = eta.sq() - 1.0 + c.sq();
    if g2 <= 0.0 {
        // total internal reflection
        return 1.0;
    }
    let g = g2.sqrt();
    if g + c == 0.0 {
        return 1.0;
    }
    let f1 = (g - c) / (g + c);

    #[allow(clippy::suboptimal_flops)]
    let f2 = (c * (g + c) - 1.0) / (c * (g - c) + 1.0);
    0.5 * f1.sq() * (1.0 + f2.sq())
}

/// Blends between `cspec0` at normal incidence and white at grazing angles, following the shape of
/// the dielectric fresnel curve
#[must_use]
pub fn interpolate_fresnel_color(
    l: Vec3d,
    h: Vec3d,
    ior: f64,
    f0: f64,
    cspec0: Spectrum,
) -> Spectrum {
    let fh = safe_divide(fresnel_dielectric_cos(l.dot(h), ior) - f0, 1.0 - f0);
    cspec0.lerp(Spectrum::ONE, fh.saturate())
}

fn fresnel_conductor_channel(cosi: f64, eta: f64, k: f64) -> f64 {
    let cosi2 = cosi.sq();
    let sini2 = 1.0 - cosi2;
    let t0 = eta.sq() - k.sq() - sini2;
    let a2b2 = safe_sqrt(t0.mul_add(t0, 4.0 * eta.sq() * k.sq()));
    let t1 = a2b2 + cosi2;
    let a = safe_sqrt(0.5 * (a2b2 + t0));
    let t2 = 2.0 * cosi * a;
    let rs = safe_divide(t1 - t2, t1 + t2);
    let t3 = cosi2.mul_add(a2b2, sini2.sq());
    let t4 = t2 * sini2;
    let rp = rs * safe_divide(t3 - t4, t3 + t4);
    (0.5 * (rp + rs)).saturate()
}

/// Reflectance of a conductor with the complex index of refraction `eta + i k` in each channel
#[must_use]
pub fn fresnel_conductor(cosi: f64, eta: Spectrum, k: Spectrum) -> Spectrum {
    let cosi = cosi.saturate();
    Spectrum::new(
        fresnel_conductor_channel(cosi, eta.x, k.x),
        fresnel_conductor_channel(cosi, eta.y, k.y),
        fresnel_conductor_channel(cosi, eta.z, k.z),
    )
}

#[must_use]
pub fn schlick_fresnel(u: f64) -> f64 {
    pow5((1.0 - u).saturate())
}

#[must_use]
pub fn pow5(v: f64) -> f64 {
    let v2 = v * v;
    v2 * v2 * v
}

/// Returns two tangents that form an orthonormal basis together with `n`
#[must_use]
pub fn make_orthonormals(n: Vec3d) -> (Vec3d, Vec3d) {
    let a = if n.x != n.y || n.x != n.z {
        Vec3d::new(n.z - n.y, n.x - n.z, n.y - n.x)
    } else {
        Vec3d::new(n.z - n.y, n.x + n.z, -n.y - n.x)
    };
    let a = a.normalize();
    (a, n.cross(a))
}

/// Like [`make_orthonormals`], but the first tangent follows `t` as closely as possible
#[must_use]
pub fn make_orthonormals_tangent(n: Vec3d, t: Vec3d) -> (Vec3d, Vec3d) {
    let b = n.cross(t).try_normalize();
    b.map_or_else(|| make_orthonormals(n), |b| (b.cross(n), b))
}

#[must_use]
pub fn to_world(local: Vec3d, x: Vec3d, y: Vec3d, z: Vec3d) -> Vec3d {
    x * local.x + y * local.y + z * local.z
}

#[must_use]
pub fn to_local(v: Vec3d, x: Vec3d, y: Vec3d, z: Vec3d) -> Vec3d {
    Vec3d::new(v.dot(x), v.dot(y), v.dot(z))
}

/* pdf is cos(theta) / pi */
#[must_use]
pub fn hemispherical_sample_cos_weighted_uv(u: f64, v: f64) -> (Vec3d, f64) {
    let eps_theta_sample = u.clamp(1e-6, 1.0); // prevent division by zero (division by pdf)
    let cos_theta = eps_theta_sample.sqrt();
    let sin_theta = (1.0 - eps_theta_sample).sqrt();
    let phi = 2.0 * consts::PI * v;
    let (sin_phi, cos_phi) = phi.sin_cos();
    let omega = Vec3d {
        x: sin_theta * cos_phi,
        y: sin_theta * sin_phi,
        z: cos_theta,
    };
    (omega, cos_theta / consts::PI)
}

/// cosine weighted direction around `n`, the pdf is `cos(theta) / pi`
#[must_use]
pub fn sample_cos_hemisphere(n: Vec3d, u: f64, v: f64) -> (Vec3d, f64) {
    let (local, pdf) = hemispherical_sample_cos_weighted_uv(u, v);
    let (t, b) = make_orthonormals(n);
    (to_world(local, t, b, n), pdf)
}

/// uniformly distributed direction around `n`, the pdf is `1 / 2pi`
#[must_use]
pub fn sample_uniform_hemisphere(n: Vec3d, u: f64, v: f64) -> (Vec3d, f64) {
    let z = u;
    let r = safe_sqrt(1.0 - z * z);
    let phi = 2.0 * consts::PI * v;
    let (sin_phi, cos_phi) = phi.sin_cos();
    let (t, b) = make_orthonormals(n);
    let local = Vec3d::new(r * cos_phi, r * sin_phi, z);
    (to_world(local, t, b, n), 0.5 * consts::FRAC_1_PI)
}

/// uniformly distributed direction inside the cone around `n` with the given opening half angle
#[must_use]
pub fn sample_uniform_cone(n: Vec3d, angle: f64, u: f64, v: f64) -> (Vec3d, f64) {
    let z_min = angle.cos();
    let z = z_min.lerp(1.0, u);
    let r = safe_sqrt(1.0 - z * z);
    let phi = 2.0 * consts::PI * v;
    let (sin_phi, cos_phi) = phi.sin_cos();
    let (t, b) = make_orthonormals(n);
    let local = Vec3d::new(r * cos_phi, r * sin_phi, z);
    (to_world(local, t, b, n), uniform_cone_pdf(angle))
}

#[must_use]
pub fn uniform_cone_pdf(angle: f64) -> f64 {
    0.5 * consts::FRAC_1_PI / (1.0 - angle.cos()).max(f64::MIN_POSITIVE)
}

/// Natural logarithm of the gamma function for positive arguments, Lanczos approximation
#[must_use]
pub fn ln_gamma(x: f64) -> f64 {
    const COEFFICIENTS: [f64; 9] = [
        0.999_999_999_999_809_9,
        676.520_368_121_885_1,
        -1_259.139_216_722_402_8,
        771.323_428_777_653_1,
        -176.615_029_162_140_6,
        12.507_343_278_686_905,
        -0.138_571_095_265_720_12,
        9.984_369_578_019_572e-6,
        1.505_632_735_149_311_6e-7,
    ];
    if x < 0.5 {
        // reflection formula
        return (consts::PI / (consts::PI * x).sin()).ln() - ln_gamma(1.0 - x);
    }
    let x = x - 1.0;
    let t = x + 7.5;
    let mut a = COEFFICIENTS[0];
    for (i, c) in COEFFICIENTS.iter().enumerate().skip(1) {
        #[allow(clippy::cast_precision_loss)]
        {
            a += c / (x + i as f64);
        }
    }
    #[allow(clippy::suboptimal_flops)]
    let result = 0.5 * (2.0 * consts::PI).ln() + (x + 0.5) * t.ln() - t + a.ln();
    result
}

/// The beta function `B(x, y)` for positive arguments
#[must_use]
pub fn beta(x: f64, y: f64) -> f64 {
    (ln_gamma(x) + ln_gamma(y) - ln_gamma(x + y)).exp()
}

/// Small linear congruential generator for closures that need more than two random numbers.
/// Seeded from the inputs of the evaluation, so equal inputs give equal results.
#[derive(Clone, Copy, Debug)]
pub struct Lcg(u32);

impl Lcg {
    #[must_use]
    pub fn from_values(values: &[f64]) -> Self {
        // fnv-1a over the bit patterns
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for v in values {
            for byte in v.to_bits().to_le_bytes() {
                hash ^= u64::from(byte);
                hash = hash.wrapping_mul(0x0100_0000_01b3);
            }
        }
        #[allow(clippy::cast_possible_truncation)]
        Self((hash ^ (hash >> 32)) as u32)
    }

    /// returns a float in `0.0..1.0`
    pub fn step(&mut self) -> f64 {
        self.0 = self.0.wrapping_mul(1_103_515_245).wrapping_add(12345);
        f64::from(self.0) / (f64::from(u32::MAX) + 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::assert_eq_approx_abs;

    #[test]
    fn vector_average() {
        let v = Vec3d::new(1.0, -0.5, 2.0);
        assert_eq_approx_abs!(v.average(), 2.5 / 3.0, 1e-12);
        assert_eq_approx_abs!(Spectrum::splat(0.3).average(), 0.3, 1e-12);
        assert!(v.abs().is_finite_nonnegative());
        assert!(!v.is_finite_nonnegative());
        assert!(!Vec3d::new(f64::NAN, 0.0, 0.0).is_finite_nonnegative());
    }

    #[test]
    fn orthonormal_basis() {
        let mut rd = fastrand::Rng::with_seed(3);
        for _ in 0..1000 {
            let n = crate::test_utils::spherical_sample(&mut rd);
            let (t, b) = make_orthonormals(n);
            assert_eq_approx_abs!(t.dot(n), 0.0, 1e-9);
            assert_eq_approx_abs!(b.dot(n), 0.0, 1e-9);
            assert_eq_approx_abs!(t.dot(b), 0.0, 1e-9);
            assert_eq_approx_abs!(b.length(), 1.0, 1e-9);
        }
    }

    #[test]
    fn fresnel_limits() {
        assert_eq_approx_abs!(fresnel_dielectric_cos(1.0, 1.5), 0.04, 1e-9);
        assert_eq_approx_abs!(fresnel_dielectric_cos(0.0, 1.5), 1.0, 1e-9);
        // total internal reflection from inside the glass
        assert_eq_approx_abs!(fresnel_dielectric_cos(0.1, 1.0 / 1.5), 1.0, 1e-9);
    }

    #[test]
    fn conductor_fresnel() {
        // without extinction the conductor is a dielectric
        let dielectric = fresnel_conductor(0.7, Spectrum::splat(1.5), Spectrum::ZERO);
        let expected = Spectrum::splat(fresnel_dielectric_cos(0.7, 1.5));
        assert_eq_approx_abs!(dielectric, expected, Vec3d::splat(1e-9));
        // ((n - 1)^2 + k^2) / ((n + 1)^2 + k^2) at normal incidence
        let (n, k) = (Spectrum::new(0.18, 0.42, 1.37), Spectrum::new(3.42, 2.35, 1.77));
        let gold = fresnel_conductor(1.0, n, k);
        let expected = |n: f64, k: f64| ((n - 1.0).sq() + k.sq()) / ((n + 1.0).sq() + k.sq());
        assert_eq_approx_abs!(
            gold,
            Spectrum::new(expected(0.18, 3.42), expected(0.42, 2.35), expected(1.37, 1.77)),
            Vec3d::splat(1e-9)
        );
        let grazing = fresnel_conductor(0.0, Spectrum::ONE, Spectrum::ONE);
        assert_eq_approx_abs!(grazing, Spectrum::ONE, Vec3d::splat(1e-9));
        assert!(fresnel_conductor(0.3, Spectrum::ZERO, Spectrum::ZERO).is_finite_nonnegative());
    }

    #[test]
    fn fresnel_color_survives_degenerate_ior() {
        let f0 = fresnel_dielectric_cos(1.0, 1e-5);
        let color = interpolate_fresnel_color(Vec3d::Z, Vec3d::Z, 1e-5, f0, Spectrum::splat(0.5));
        assert!(color.is_finite_nonnegative());
    }

    #[test]
    fn refraction_obeys_snell() {
        let n = Vec3d::Z;
        let i = Vec3d::new(0.6, 0.0, 0.8);
        let t = refract(i, n, 1.5).unwrap();
        assert!(t.z < 0.0);
        let sin_i = i.x;
        let sin_t = -t.x;
        assert_eq_approx_abs!(sin_i, 1.5 * sin_t, 1e-9);
        assert!(refract(Vec3d::new(0.9, 0.0, -0.43588989435406733), n, 1.0 / 1.5).is_none());
    }

    #[test]
    fn gamma_function() {
        assert_eq_approx_abs!(ln_gamma(1.0), 0.0, 1e-10);
        assert_eq_approx_abs!(ln_gamma(5.0), 24.0_f64.ln(), 1e-10);
        assert_eq_approx_abs!(ln_gamma(0.5), consts::PI.sqrt().ln(), 1e-10);
        // B(2, 3) = 1! 2! / 4!
        assert_eq_approx_abs!(beta(2.0, 3.0), 1.0 / 12.0, 1e-10);
    }

    #[test]
    fn lcg_is_deterministic() {
        let mut a = Lcg::from_values(&[0.25, 0.5]);
        let mut b = Lcg::from_values(&[0.25, 0.5]);
        for _ in 0..100 {
            let x = a.step();
            assert!((0.0..1.0).contains(&x));
            assert_eq!(x.to_bits(), b.step().to_bits());
        }
    }

    #[test]
    fn cone_samples_stay_inside() {
        let mut rd = fastrand::Rng::with_seed(7);
        let angle = 0.4;
        for _ in 0..1000 {
            let (omega, pdf) = sample_uniform_cone(Vec3d::Y, angle, rd.f64(), rd.f64());
            assert!(omega.dot(Vec3d::Y) >= angle.cos() - 1e-9);
            assert_eq_approx_abs!(pdf, uniform_cone_pdf(angle), 1e-12);
        }
    }
}
