//! Volume closures: absorption, which only adds extinction, and the phase functions for
//! scattering inside a medium.
//!
//! Every phase function is normalized over the sphere and returned through `eval_reflect`, the
//! transmission lobe is always zero. Sampling places the scattered direction around the direction
//! of travel `-I`, and the pdf of a sample is always the phase value at the sampled direction.
use std::f64::consts;

use crate::{
    alloc::ExtraArena,
    shading::ShaderData,
    utils::{make_orthonormals, safe_sqrt, to_world, FloatExt},
    Bsdf, BsdfEval, BsdfSample, ClosureBase, ClosureLabel, ClosureType, SdFlags, SetupContext,
    Spectrum, Vec3d,
};

/// Below this anisotropy the phase function is treated as isotropic
const ISOTROPIC_G: f64 = 1e-3;

const INV_4PI: f64 = consts::FRAC_1_PI * 0.25;

/// Adds extinction to a volume shading point
pub fn volume_extinction_setup(sd: &mut ShaderData, weight: Spectrum) {
    if sd.flag.contains(SdFlags::EXTINCTION) {
        sd.closure_transparent_extinction += weight;
    } else {
        sd.flag |= SdFlags::EXTINCTION;
        sd.closure_transparent_extinction = weight;
    }
}

/// Builds the scattered direction for a sampled angle to the direction of travel
fn scatter_sample(i: Vec3d, cos_theta: f64, randv: f64, pdf: f64) -> BsdfSample {
    let cos_theta = cos_theta.clamp(-1.0, 1.0);
    let sin_theta = safe_sqrt(1.0 - cos_theta.sq());
    let (sin_phi, cos_phi) = (consts::TAU * randv).sin_cos();

    let d = -i;
    let (t, b) = make_orthonormals(d);
    let local = Vec3d::new(sin_theta * cos_phi, sin_theta * sin_phi, cos_theta);
    let omega_in = to_world(local, t, b, d);
    if !(pdf > 0.0 && pdf.is_finite()) {
        return BsdfSample::rejected(ClosureLabel::VOLUME_SCATTER, omega_in);
    }
    BsdfSample {
        label: ClosureLabel::VOLUME_SCATTER,
        eval: Spectrum::splat(pdf),
        omega_in,
        pdf,
    }
}

/// Finds `x` in `lo..hi` with `cdf(x) == target` for a non-decreasing `cdf`
fn invert_cdf(mut lo: f64, mut hi: f64, target: f64, cdf: impl Fn(f64) -> f64) -> f64 {
    for _ in 0..64 {
        let mid = 0.5 * (lo + hi);
        if cdf(mid) < target {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    0.5 * (lo + hi)
}

/// Density of scattering by the angle with the given cosine, relative to the direction of travel
#[must_use]
pub fn single_peaked_henyey_greenstein(cos_theta: f64, g: f64) -> f64 {
    #[allow(clippy::suboptimal_flops)]
    let denom = (1.0 + g * g - 2.0 * g * cos_theta).max(0.0).powf(1.5);
    (1.0 - g * g) / denom * INV_4PI
}

fn henyey_greenstein(cos_theta: f64, g: f64) -> f64 {
    if g.abs() < ISOTROPIC_G {
        INV_4PI
    } else {
        single_peaked_henyey_greenstein(cos_theta, g)
    }
}

fn sample_henyey_greenstein(g: f64, randu: f64) -> f64 {
    if g.abs() < ISOTROPIC_G {
        2.0f64.mul_add(-randu, 1.0)
    } else {
        let k = (1.0 - g * g) / (2.0 * g).mul_add(randu, 1.0 - g);
        (1.0 + g * g - k * k) / (2.0 * g)
    }
}

/// Phase function with a single lobe around the forward direction
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct HenyeyGreensteinVolume {
    /// anisotropy, `-1` scatters everything back, `1` everything forward
    pub g: f64,
}

impl Bsdf for HenyeyGreensteinVolume {
    fn setup(&mut self, base: &mut ClosureBase, _ctx: &mut SetupContext<'_>) -> SdFlags {
        base.ty = ClosureType::VolumeHenyeyGreenstein;
        // a delta function can not be evaluated
        self.g = self.g.clamp(-(1.0 - ISOTROPIC_G), 1.0 - ISOTROPIC_G);
        SdFlags::SCATTER
    }

    /// The phase function for both hemispheres. `i` points towards the viewer, so light keeps
    /// going straight for `omega_in == -i`.
    fn eval_reflect(
        &self,
        _base: &ClosureBase,
        _extra: &ExtraArena,
        i: Vec3d,
        omega_in: Vec3d,
    ) -> BsdfEval {
        BsdfEval::splat(henyey_greenstein((-i).dot(omega_in), self.g))
    }

    fn eval_transmit(
        &self,
        _base: &ClosureBase,
        _extra: &ExtraArena,
        _i: Vec3d,
        _omega_in: Vec3d,
    ) -> BsdfEval {
        BsdfEval::ZERO
    }

    fn sample(
        &self,
        _base: &ClosureBase,
        _extra: &ExtraArena,
        _ng: Vec3d,
        i: Vec3d,
        randu: f64,
        randv: f64,
    ) -> BsdfSample {
        let cos_theta = sample_henyey_greenstein(self.g, randu).clamp(-1.0, 1.0);
        scatter_sample(i, cos_theta, randv, henyey_greenstein(cos_theta, self.g))
    }
}

/// Fournier-Forand phase function for particles in water. It is parametrized by the fraction of
/// light scattered backwards and the relative refractive index of the particles.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct FournierForandVolume {
    /// backscatter fraction
    pub b: f64,
    /// relative index of refraction of the particles
    pub ior: f64,
    v: f64,
    k: f64,
}

fn fournier_forand_delta(ior: f64, x: f64) -> f64 {
    4.0 * x / (3.0 * (ior - 1.0).sq())
}

impl FournierForandVolume {
    #[must_use]
    pub const fn new(b: f64, ior: f64) -> Self {
        Self {
            b,
            ior,
            v: 0.0,
            k: 0.0,
        }
    }

    /// `x` is `sin^2(theta / 2)`
    fn phase_x(&self, x: f64, cos_theta: f64) -> f64 {
        if x <= 0.0 {
            return 0.0;
        }
        let v = self.v;
        let delta = fournier_forand_delta(self.ior, x);
        let one_minus = 1.0 - delta;
        let p = if one_minus.abs() < 1e-3 {
            // second order expansion around delta == 1
            let a = v * ((v - 1.0) - (v + 1.0) / x) / (8.0 * consts::PI);
            let slope = 2.0f64.mul_add(v - 1.0, -(2.0f64.mul_add(v, 1.0) / x));
            let b = v * (v + 1.0) * one_minus * slope / (24.0 * consts::PI);
            a + b
        } else {
            let dv = delta.powf(v);
            let num = v.mul_add(one_minus, -(1.0 - dv))
                + delta.mul_add(1.0 - dv, -v * one_minus) / x;
            num / (4.0 * consts::PI * one_minus.sq() * dv)
        };
        p + self.k / (16.0 * consts::PI) * 3.0f64.mul_add(cos_theta.sq(), -1.0)
    }

    fn phase(&self, cos_theta: f64) -> f64 {
        self.phase_x(0.5 * (1.0 - cos_theta), cos_theta).max(0.0)
    }

    /// Share of the scattered light within the angle `theta`, with `x = sin^2(theta / 2)`
    fn cdf(&self, x: f64) -> f64 {
        let v = self.v;
        let mut delta = fournier_forand_delta(self.ior, x);
        if (1.0 - delta).abs() < 1e-6 {
            delta = if delta <= 1.0 { 1.0 - 1e-6 } else { 1.0 + 1e-6 };
        }
        let dv = delta.powf(v);
        let cos_theta = 2.0f64.mul_add(-x, 1.0);
        let sin2 = 1.0 - cos_theta.sq();
        (1.0 - delta.powf(v + 1.0) - (1.0 - dv) * x) / ((1.0 - delta) * dv)
            + self.k / 8.0 * cos_theta * sin2
    }
}

impl Bsdf for FournierForandVolume {
    fn setup(&mut self, base: &mut ClosureBase, _ctx: &mut SetupContext<'_>) -> SdFlags {
        base.ty = ClosureType::VolumeFournierForand;
        // the derivation needs 1 < delta(90 degrees), which holds for indices up to 1.5
        self.b = self.b.clamp(1e-3, 0.5 - 1e-3);
        self.ior = self.ior.clamp(1.0 + 1e-3, 1.5);
        let d90 = fournier_forand_delta(self.ior, 0.5);
        let d180 = fournier_forand_delta(self.ior, 1.0);
        self.v = -(2.0 * self.b).mul_add(d90 - 1.0, 1.0).ln() / d90.ln();
        self.k = (d180.powf(-self.v) - 1.0) / (d180 - 1.0);
        SdFlags::SCATTER
    }

    fn eval_reflect(
        &self,
        _base: &ClosureBase,
        _extra: &ExtraArena,
        i: Vec3d,
        omega_in: Vec3d,
    ) -> BsdfEval {
        BsdfEval::splat(self.phase((-i).dot(omega_in)))
    }

    fn eval_transmit(
        &self,
        _base: &ClosureBase,
        _extra: &ExtraArena,
        _i: Vec3d,
        _omega_in: Vec3d,
    ) -> BsdfEval {
        BsdfEval::ZERO
    }

    fn sample(
        &self,
        _base: &ClosureBase,
        _extra: &ExtraArena,
        _ng: Vec3d,
        i: Vec3d,
        randu: f64,
        randv: f64,
    ) -> BsdfSample {
        let x = invert_cdf(0.0, 1.0, randu, |x| self.cdf(x));
        let cos_theta = 2.0f64.mul_add(-x, 1.0);
        scatter_sample(i, cos_theta, randv, self.phase(cos_theta))
    }
}

/// Scattering by particles much smaller than the wavelength
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RayleighVolume;

fn rayleigh(cos_theta: f64) -> f64 {
    3.0 / (16.0 * consts::PI) * cos_theta.mul_add(cos_theta, 1.0)
}

impl Bsdf for RayleighVolume {
    fn setup(&mut self, base: &mut ClosureBase, _ctx: &mut SetupContext<'_>) -> SdFlags {
        base.ty = ClosureType::VolumeRayleigh;
        SdFlags::SCATTER
    }

    fn eval_reflect(
        &self,
        _base: &ClosureBase,
        _extra: &ExtraArena,
        i: Vec3d,
        omega_in: Vec3d,
    ) -> BsdfEval {
        BsdfEval::splat(rayleigh((-i).dot(omega_in)))
    }

    fn eval_transmit(
        &self,
        _base: &ClosureBase,
        _extra: &ExtraArena,
        _i: Vec3d,
        _omega_in: Vec3d,
    ) -> BsdfEval {
        BsdfEval::ZERO
    }

    fn sample(
        &self,
        _base: &ClosureBase,
        _extra: &ExtraArena,
        _ng: Vec3d,
        i: Vec3d,
        randu: f64,
        randv: f64,
    ) -> BsdfSample {
        // closed form root of the cubic cdf
        let a = 4.0f64.mul_add(randu, -2.0);
        let b = (a + a.mul_add(a, 1.0).sqrt()).cbrt();
        let cos_theta = (b - 1.0 / b).clamp(-1.0, 1.0);
        scatter_sample(i, cos_theta, randv, rayleigh(cos_theta))
    }
}

/// Henyey-Greenstein with an additional `alpha` term, which reduces to Cornette-Shanks for
/// `alpha == 1`
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct DraineVolume {
    pub g: f64,
    pub alpha: f64,
}

fn draine(cos_theta: f64, g: f64, alpha: f64) -> f64 {
    let norm = alpha.mul_add(2.0f64.mul_add(g * g, 1.0) / 3.0, 1.0);
    let lobe = alpha.mul_add(cos_theta.sq(), 1.0) / norm;
    if g.abs() < ISOTROPIC_G {
        lobe * INV_4PI
    } else {
        lobe * single_peaked_henyey_greenstein(cos_theta, g)
    }
}

fn draine_cdf(cos_theta: f64, g: f64, alpha: f64) -> f64 {
    if g.abs() < ISOTROPIC_G {
        let mu = cos_theta;
        return (mu + 1.0 + alpha * (mu * mu).mul_add(mu, 1.0) / 3.0)
            / (2.0 + 2.0 * alpha / 3.0);
    }
    let h = g.mul_add(g, 1.0);
    let antiderivative = |mu: f64| {
        let d = (-2.0 * g).mul_add(mu, h);
        let sqrt_d = d.sqrt();
        let alpha_term = (-2.0 * h * h / sqrt_d) - 4.0 * h * sqrt_d + 2.0 / 3.0 * d * sqrt_d;
        1.0 / (sqrt_d * g) - alpha / (8.0 * g * g * g) * alpha_term
    };
    let lo = antiderivative(-1.0);
    (antiderivative(cos_theta) - lo) / (antiderivative(1.0) - lo)
}

fn sample_draine(g: f64, alpha: f64, randu: f64) -> f64 {
    invert_cdf(-1.0, 1.0, randu, |mu| draine_cdf(mu, g, alpha))
}

impl Bsdf for DraineVolume {
    fn setup(&mut self, base: &mut ClosureBase, _ctx: &mut SetupContext<'_>) -> SdFlags {
        base.ty = ClosureType::VolumeDraine;
        self.g = self.g.clamp(-(1.0 - ISOTROPIC_G), 1.0 - ISOTROPIC_G);
        self.alpha = self.alpha.max(0.0);
        SdFlags::SCATTER
    }

    fn eval_reflect(
        &self,
        _base: &ClosureBase,
        _extra: &ExtraArena,
        i: Vec3d,
        omega_in: Vec3d,
    ) -> BsdfEval {
        BsdfEval::splat(draine((-i).dot(omega_in), self.g, self.alpha))
    }

    fn eval_transmit(
        &self,
        _base: &ClosureBase,
        _extra: &ExtraArena,
        _i: Vec3d,
        _omega_in: Vec3d,
    ) -> BsdfEval {
        BsdfEval::ZERO
    }

    fn sample(
        &self,
        _base: &ClosureBase,
        _extra: &ExtraArena,
        _ng: Vec3d,
        i: Vec3d,
        randu: f64,
        randv: f64,
    ) -> BsdfSample {
        let cos_theta = sample_draine(self.g, self.alpha, randu);
        scatter_sample(i, cos_theta, randv, draine(cos_theta, self.g, self.alpha))
    }
}

/// Approximation of Lorenz-Mie scattering by water droplets as a blend of Henyey-Greenstein and
/// Draine, fitted over the droplet diameter.
///
/// * Johannes Jendersie and Eugene d'Eon. An Approximate Mie Scattering Function for Fog and Cloud
///     Rendering. *SIGGRAPH 2023 Talks.*
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct MieVolume {
    pub g_hg: f64,
    pub g_draine: f64,
    pub alpha: f64,
    /// weight of the Draine lobe
    pub mixture: f64,
}

impl MieVolume {
    /// Fitted lobe parameters for a droplet diameter in micrometers
    #[must_use]
    pub fn from_diameter(diameter: f64) -> Self {
        let d = diameter.max(0.0);
        let (g_hg, g_draine, alpha, mixture) = if d <= 0.1 {
            (
                13.8 * d * d,
                1.1456 * d * (9.29044 * d).sin(),
                250.0,
                312.983f64.mul_add(-d.powf(4.3), 0.252_977),
            )
        } else if d < 1.5 {
            let l = d.ln();
            let inner = (l - 0.238_604) * (l + 1.00667) / 0.15677f64.mul_add(-l, 0.507_522);
            let g_draine = 0.379_685
                * 1.19692f64
                    .mul_add(inner.cos(), 1.37932f64.mul_add(l, 0.062_583_5))
                    .cos()
                + 0.344_213;
            (
                0.143f64.mul_add(-l * l, 0.862),
                g_draine,
                250.0,
                0.146_209f64.mul_add(3.38707f64.mul_add(l, 2.11193).cos(), 0.316_072)
                    + 0.077_891_7 * l,
            )
        } else if d < 5.0 {
            let l = d.ln();
            let ll = l.ln();
            (
                0.060_493_1f64.mul_add(ll, 0.940_256),
                0.500_411 - 0.081_287 / (2.0f64.mul_add(-l, l.tan()) + 1.27551),
                7.30354f64.mul_add(l, 6.31675),
                0.026_914f64.mul_add(l - (5.68947 * (ll - 0.029_214_9)).cos(), 0.3764),
            )
        } else {
            (
                (-0.099_056_7 / (d - 1.67154)).exp(),
                (-2.20679 / (d + 3.91029) - 0.428_934).exp(),
                (3.62489 - 8.29288 / (d + 5.52825)).exp(),
                (-0.599_085 / (d - 0.641_583) - 0.665_888).exp(),
            )
        };
        Self {
            g_hg,
            g_draine,
            alpha,
            mixture,
        }
    }

    fn phase(&self, cos_theta: f64) -> f64 {
        let hg = henyey_greenstein(cos_theta, self.g_hg);
        let d = draine(cos_theta, self.g_draine, self.alpha);
        hg.lerp(d, self.mixture)
    }
}

impl Bsdf for MieVolume {
    fn setup(&mut self, base: &mut ClosureBase, _ctx: &mut SetupContext<'_>) -> SdFlags {
        base.ty = ClosureType::VolumeMie;
        let limit = 1.0 - ISOTROPIC_G;
        self.g_hg = self.g_hg.clamp(-limit, limit);
        self.g_draine = self.g_draine.clamp(-limit, limit);
        self.alpha = self.alpha.max(0.0);
        self.mixture = self.mixture.saturate();
        SdFlags::SCATTER
    }

    fn eval_reflect(
        &self,
        _base: &ClosureBase,
        _extra: &ExtraArena,
        i: Vec3d,
        omega_in: Vec3d,
    ) -> BsdfEval {
        BsdfEval::splat(self.phase((-i).dot(omega_in)))
    }

    fn eval_transmit(
        &self,
        _base: &ClosureBase,
        _extra: &ExtraArena,
        _i: Vec3d,
        _omega_in: Vec3d,
    ) -> BsdfEval {
        BsdfEval::ZERO
    }

    fn sample(
        &self,
        _base: &ClosureBase,
        _extra: &ExtraArena,
        _ng: Vec3d,
        i: Vec3d,
        randu: f64,
        randv: f64,
    ) -> BsdfSample {
        let w = self.mixture;
        let cos_theta = if randu < w {
            sample_draine(self.g_draine, self.alpha, randu / w)
        } else {
            let u = ((randu - w) / (1.0 - w)).clamp(0.0, 1.0 - f64::EPSILON);
            sample_henyey_greenstein(self.g_hg, u).clamp(-1.0, 1.0)
        };
        scatter_sample(i, cos_theta, randv, self.phase(cos_theta))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        closure::ClosureModel,
        test_utils::{self, assert_eq_approx_abs, assert_in_range},
        utils::VecExt,
    };

    fn hg(g: f64) -> test_utils::TestClosure {
        test_utils::setup_closure(
            ClosureType::VolumeHenyeyGreenstein,
            ClosureModel::HenyeyGreenstein(HenyeyGreensteinVolume { g }),
        )
    }

    #[test]
    fn henyey_greenstein() {
        for g in [-0.7, -0.2, 0.0, 0.3, 0.8] {
            let closure = hg(g);
            assert_eq!(closure.flags, SdFlags::SCATTER);
            test_utils::test_sample_eval(&closure);
            test_utils::test_determinism(&closure);
            test_utils::test_energy_conservation(&closure, 0.0);
            test_utils::test_pdf_integral(&closure, 0.95);
        }
    }

    #[test]
    fn mean_cosine_is_g() {
        for g in [-0.5, 0.0, 0.6] {
            let closure = hg(g);
            let mut rd = fastrand::Rng::with_seed(77);
            let n = 200_000;
            let mut sum = 0.0;
            let i = Vec3d::new(0.0, 0.6, 0.8);
            for _ in 0..n {
                let sample = closure.sample(i, rd.f64(), rd.f64());
                sum += sample.omega_in.dot(-i);
            }
            assert_eq_approx_abs!(sum / f64::from(n), g, 0.01);
        }
    }

    #[test]
    fn anisotropy_is_clamped() {
        let closure = hg(1.5);
        let ClosureModel::HenyeyGreenstein(volume) = closure.closure().model else {
            panic!("wrong model");
        };
        assert_eq_approx_abs!(volume.g, 0.999, 1e-12);
    }

    fn scatter_fraction_backwards(closure: &test_utils::TestClosure) -> f64 {
        let mut rd = fastrand::Rng::with_seed(0xbac);
        let n = 100_000;
        let i = Vec3d::new(0.6, 0.0, 0.8);
        let backwards = (0..n)
            .filter(|_| closure.sample(i, rd.f64(), rd.f64()).omega_in.dot(-i) < 0.0)
            .count();
        backwards as f64 / f64::from(n)
    }

    #[test]
    fn fournier_forand() {
        for (b, ior) in [(0.1, 1.1), (0.3, 1.3), (0.2, 1.2)] {
            let closure = test_utils::setup_closure(
                ClosureType::VolumeFournierForand,
                ClosureModel::FournierForand(FournierForandVolume::new(b, ior)),
            );
            assert_eq!(closure.flags, SdFlags::SCATTER);
            test_utils::test_sample_eval(&closure);
            test_utils::test_determinism(&closure);
            test_utils::test_energy_conservation(&closure, 0.0);
            assert_eq_approx_abs!(scatter_fraction_backwards(&closure), b, 0.01);
        }
        let closure = test_utils::setup_closure(
            ClosureType::VolumeFournierForand,
            ClosureModel::FournierForand(FournierForandVolume::new(0.3, 1.3)),
        );
        test_utils::test_pdf_integral(&closure, 0.95);
    }

    #[test]
    fn fournier_forand_parameters_are_clamped() {
        for (b, ior) in [(-1.0, -1.0), (2.0, 2.0), (0.0, 1.0)] {
            let closure = test_utils::setup_closure(
                ClosureType::VolumeFournierForand,
                ClosureModel::FournierForand(FournierForandVolume::new(b, ior)),
            );
            let ClosureModel::FournierForand(volume) = closure.closure().model else {
                panic!("wrong model");
            };
            assert_in_range!(volume.b, 1e-3, 0.5);
            assert_in_range!(volume.ior, 1.0 + 1e-3, 1.5);
            let mut rd = fastrand::Rng::with_seed(3);
            for _ in 0..1000 {
                let i = test_utils::spherical_sample(&mut rd);
                let eval = closure.eval(i, test_utils::spherical_sample(&mut rd));
                assert!(eval.eval.is_finite_nonnegative() && eval.pdf >= 0.0);
                let sample = closure.sample(i, rd.f64(), rd.f64());
                assert!(sample.eval.is_finite_nonnegative() && sample.pdf >= 0.0);
            }
        }
    }

    #[test]
    fn rayleigh() {
        let closure = test_utils::setup_closure(
            ClosureType::VolumeRayleigh,
            ClosureModel::Rayleigh(RayleighVolume),
        );
        test_utils::test_sample_eval(&closure);
        test_utils::test_determinism(&closure);
        test_utils::test_energy_conservation(&closure, 0.0);
        test_utils::test_pdf_integral(&closure, 0.99);
        assert_eq_approx_abs!(scatter_fraction_backwards(&closure), 0.5, 0.01);

        let i = Vec3d::Z;
        let forward = closure.eval(i, -i).pdf;
        let side = closure.eval(i, Vec3d::X).pdf;
        assert_eq_approx_abs!(forward, 2.0 * side, 1e-12);
    }

    #[test]
    fn draine() {
        for (g, alpha) in [(0.0, 1.0), (0.5, 1.0), (-0.3, 2.0), (0.7, 0.5)] {
            let closure = test_utils::setup_closure(
                ClosureType::VolumeDraine,
                ClosureModel::Draine(DraineVolume { g, alpha }),
            );
            test_utils::test_sample_eval(&closure);
            test_utils::test_determinism(&closure);
            test_utils::test_energy_conservation(&closure, 0.0);
            test_utils::test_pdf_integral(&closure, 0.95);
        }
    }

    #[test]
    fn draine_without_alpha_is_henyey_greenstein() {
        let draine = test_utils::setup_closure(
            ClosureType::VolumeDraine,
            ClosureModel::Draine(DraineVolume { g: 0.4, alpha: 0.0 }),
        );
        let hg = hg(0.4);
        let mut rd = fastrand::Rng::with_seed(11);
        for _ in 0..100 {
            let i = test_utils::spherical_sample(&mut rd);
            let omega_in = test_utils::spherical_sample(&mut rd);
            assert_eq_approx_abs!(draine.eval(i, omega_in).pdf, hg.eval(i, omega_in).pdf, 1e-12);
        }
        // closed form cdf of Henyey-Greenstein with g = 0.4
        assert_eq_approx_abs!(draine_cdf(0.2, 0.4, 0.0), 0.3, 1e-9);
        assert_eq_approx_abs!(draine_cdf(-1.0, 0.4, 3.0), 0.0, 1e-9);
        assert_eq_approx_abs!(draine_cdf(1.0, 0.4, 3.0), 1.0, 1e-9);
    }

    #[test]
    fn mie() {
        for diameter in [0.05, 0.5, 3.0, 10.0] {
            let closure = test_utils::setup_closure(
                ClosureType::VolumeMie,
                ClosureModel::Mie(MieVolume::from_diameter(diameter)),
            );
            assert_eq!(closure.flags, SdFlags::SCATTER);
            test_utils::test_sample_eval(&closure);
            test_utils::test_determinism(&closure);
            test_utils::test_energy_conservation(&closure, 0.0);
        }
        for diameter in [0.05, 0.5] {
            let closure = test_utils::setup_closure(
                ClosureType::VolumeMie,
                ClosureModel::Mie(MieVolume::from_diameter(diameter)),
            );
            test_utils::test_pdf_integral(&closure, 0.95);
        }
    }

    #[test]
    fn mie_fit_stays_in_range() {
        let small = MieVolume::from_diameter(-1.0);
        assert_eq!(small, MieVolume::from_diameter(0.0));
        assert_eq_approx_abs!(small.g_hg, 0.0, 1e-12);
        assert_eq_approx_abs!(small.mixture, 0.252_977, 1e-9);
        for step in 1..2000 {
            let m = MieVolume::from_diameter(f64::from(step) * 0.025);
            assert!(m.g_hg.abs() < 1.0 && m.g_draine.abs() < 1.0, "{m:?}");
            assert!(m.alpha >= 0.0, "{m:?}");
            assert_in_range!(m.mixture, 0.0, 1.0);
        }
    }

    #[test]
    fn extinction_accumulates() {
        let mut sd = ShaderData::default();
        volume_extinction_setup(&mut sd, Spectrum::splat(0.5));
        volume_extinction_setup(&mut sd, Spectrum::new(0.5, 0.0, 0.0));
        assert!(sd.flag.contains(SdFlags::EXTINCTION));
        assert_eq!(sd.closure_transparent_extinction, Spectrum::new(1.0, 0.5, 0.5));
    }
}
