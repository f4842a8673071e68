//! Physically based hair after Chiang et al., A Practical and Controllable Hair and Fur Model for
//! Production Path Tracing, 2016.
//!
//! Light is split into the primary reflection `R`, the transmission `TT`, the secondary
//! reflection `TRT` and a residual term for all longer paths. Each lobe is the product of a
//! longitudinal term `Mp` over the angle to the fiber and an azimuthal term `Np` around it. The
//! frame of the fiber is stored in an extra block at setup.
use std::f64::consts;

use crate::{
    alloc::{ExtraArena, ExtraData, ExtraRef},
    utils::{cos_from_sin, fresnel_dielectric_cos, safe_asin, safe_divide, safe_sqrt, FloatExt, Lcg},
    Bsdf, BsdfEval, BsdfSample, ClosureBase, ClosureLabel, ClosureType, SdFlags, SetupContext,
    Spectrum, Vec3d,
};

/// Rec. 709 weights used to turn a lobe color into its sampling weight
const LUMINANCE: Vec3d = Vec3d::new(0.2126, 0.7152, 0.0722);

/// Geometry of the fiber at the shading point
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PrincipledHairExtra {
    /// tangent along the curve
    pub x: Vec3d,
    /// perpendicular to the tangent and the viewing direction
    pub y: Vec3d,
    /// where the ray crossed the fiber, from `-1` at one edge over `0` at the center to `1`
    pub h: f64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PrincipledHairBsdf {
    /// absorption coefficient inside the fiber
    pub sigma: Spectrum,
    /// longitudinal roughness, a variance after setup
    pub v: f64,
    /// azimuthal roughness, the logistic scale after setup
    pub s: f64,
    /// tilt of the cuticle scales in radians
    pub alpha: f64,
    pub eta: f64,
    /// longitudinal roughness of the primary reflection, a variance after setup
    pub m0_roughness: f64,
    pub extra: Option<ExtraRef>,
}

/// Absorption coefficient that gives roughly the given color after many bounces
#[must_use]
pub fn sigma_from_reflectance(color: Spectrum, azimuthal_roughness: f64) -> Spectrum {
    let x = azimuthal_roughness;
    let roughness_fac = 0.245f64
        .mul_add(x, 5.574)
        .mul_add(x, -10.73)
        .mul_add(x, 2.532)
        .mul_add(x, -0.215)
        .mul_add(x, 5.969);
    let sigma = Spectrum::new(color.x.ln(), color.y.ln(), color.z.ln()) / roughness_fac;
    sigma * sigma
}

/// Absorption coefficient of a fiber with the given pigment concentrations
#[must_use]
pub fn sigma_from_concentration(eumelanin: f64, pheomelanin: f64) -> Spectrum {
    let eumelanin_sigma = Spectrum::new(0.506, 0.841, 1.653);
    let pheomelanin_sigma = Spectrum::new(0.343, 0.733, 1.924);
    eumelanin_sigma * eumelanin + pheomelanin_sigma * pheomelanin
}

/// maps a user roughness to the variance of the longitudinal lobe
fn longitudinal_variance(roughness: f64) -> f64 {
    #[allow(clippy::suboptimal_flops)]
    let r = 0.726 * roughness + 0.812 * roughness.sq() + 3.7 * roughness.powi(20);
    r.sq()
}

/// maps a user roughness to the scale of the azimuthal logistic
fn azimuthal_scale(roughness: f64) -> f64 {
    const SQRT_PI_8: f64 = 0.626_657_068_657_750_1;
    #[allow(clippy::suboptimal_flops)]
    let s = 0.265 * roughness + 1.194 * roughness.sq() + 5.372 * roughness.powi(22);
    s * SQRT_PI_8
}

/// change of the azimuth after `p` internal paths
fn delta_phi(p: usize, gamma_o: f64, gamma_t: f64) -> f64 {
    #[allow(clippy::cast_precision_loss)]
    let p = p as f64;
    (2.0 * p).mul_add(gamma_t, -2.0 * gamma_o) + p * consts::PI
}

fn wrap_angle(mut a: f64) -> f64 {
    while a > consts::PI {
        a -= consts::TAU;
    }
    while a < -consts::PI {
        a += consts::TAU;
    }
    a
}

fn logistic(x: f64, s: f64) -> f64 {
    let v = (-x.abs() / s).exp();
    v / (s * (1.0 + v).sq())
}

fn logistic_cdf(x: f64, s: f64) -> f64 {
    let arg = -x / s;
    if arg > 100.0 {
        0.0
    } else {
        1.0 / (1.0 + arg.exp())
    }
}

/// logistic distribution normalized over `-pi..pi`
fn trimmed_logistic(x: f64, s: f64) -> f64 {
    let scaling = 2.0f64.mul_add(-logistic_cdf(-consts::PI, s), 1.0);
    safe_divide(logistic(x, s), scaling)
}

fn sample_trimmed_logistic(u: f64, s: f64) -> f64 {
    let cdf_minus_pi = logistic_cdf(-consts::PI, s);
    let denom = u.mul_add(2.0f64.mul_add(-cdf_minus_pi, 1.0), cdf_minus_pi);
    let x = -s * (1.0 / denom - 1.0).ln();
    x.clamp(-consts::PI, consts::PI)
}

/// modified Bessel function of the first kind and order zero
fn bessel_i0(x: f64) -> f64 {
    let x = x.sq();
    let mut val = 0.25f64.mul_add(x, 1.0);
    let mut pow_x_2i = x.sq();
    let mut i_fac_2: u64 = 1;
    let mut pow_4_i: u64 = 16;
    for i in 2..10u64 {
        i_fac_2 *= i * i;
        #[allow(clippy::cast_precision_loss)]
        let next = val + pow_x_2i / (pow_4_i as f64 * i_fac_2 as f64);
        #[allow(clippy::float_cmp)]
        if val == next {
            return val;
        }
        val = next;
        pow_x_2i *= x;
        pow_4_i *= 4;
    }
    val
}

fn log_bessel_i0(x: f64) -> f64 {
    if x > 12.0 {
        let ln_2pi = consts::TAU.ln();
        x + 0.5 * (1.0 / (8.0 * x) - ln_2pi - x.ln())
    } else {
        bessel_i0(x).ln()
    }
}

/// `Mp`, the longitudinal lobe with variance `v`
fn longitudinal_scattering(sin1: f64, cos1: f64, sin2: f64, cos2: f64, v: f64) -> f64 {
    let inv_v = 1.0 / v;
    let cos_arg = cos1 * cos2 * inv_v;
    let sin_arg = sin1 * sin2 * inv_v;
    if v <= 0.1 {
        let i0 = log_bessel_i0(cos_arg);
        (i0 - sin_arg - inv_v + consts::LN_2 + (0.5 * inv_v).ln()).exp()
    } else {
        (-sin_arg).exp() * bessel_i0(cos_arg) / (inv_v.sinh() * 2.0 * v)
    }
}

/// `Np`, the azimuthal lobe of the `p`-th path
fn azimuthal_scattering(phi: f64, p: usize, s: f64, gamma_o: f64, gamma_t: f64) -> f64 {
    trimmed_logistic(wrap_angle(phi - delta_phi(p, gamma_o, gamma_t)), s)
}

/// A lobe color plus its share of the sampling decisions
#[derive(Clone, Copy)]
struct Attenuation {
    color: Spectrum,
    weight: f64,
}

fn hair_attenuation(f: f64, t: Spectrum) -> [Attenuation; 4] {
    let combine = |color: Spectrum| Attenuation {
        color,
        weight: color.dot(LUMINANCE),
    };
    let r = combine(Spectrum::splat(f));
    let mut col = (1.0 - f).sq() * t;
    let tt = combine(col);
    col *= t * f;
    let trt = combine(col);
    let tf = t * f;
    col *= crate::utils::safe_divide_color(tf, Spectrum::ONE - tf);
    let residual = combine(col);

    let mut ap = [r, tt, trt, residual];
    let total: f64 = ap.iter().map(|a| a.weight).sum();
    let fac = safe_divide(1.0, total);
    for a in &mut ap {
        a.weight *= fac;
    }
    ap
}

/// Rotates `theta_i` by the cuticle tilt for the `R`, `TT` and `TRT` lobes. Returns the sine and
/// cosine for each lobe.
fn hair_alpha_angles(sin_theta_i: f64, cos_theta_i: f64, alpha: f64) -> [(f64, f64); 3] {
    let sin_1alpha = alpha.sin();
    let cos_1alpha = cos_from_sin(sin_1alpha);
    let sin_2alpha = 2.0 * sin_1alpha * cos_1alpha;
    let cos_2alpha = cos_1alpha.sq() - sin_1alpha.sq();
    let sin_4alpha = 2.0 * sin_2alpha * cos_2alpha;
    let cos_4alpha = cos_2alpha.sq() - sin_2alpha.sq();

    [
        (
            sin_theta_i.mul_add(cos_2alpha, cos_theta_i * sin_2alpha),
            cos_theta_i.mul_add(cos_2alpha, -sin_theta_i * sin_2alpha).abs(),
        ),
        (
            sin_theta_i.mul_add(cos_1alpha, -cos_theta_i * sin_1alpha),
            cos_theta_i.mul_add(cos_1alpha, sin_theta_i * sin_1alpha).abs(),
        ),
        (
            sin_theta_i.mul_add(cos_4alpha, -cos_theta_i * sin_4alpha),
            cos_theta_i.mul_add(cos_4alpha, sin_theta_i * sin_4alpha).abs(),
        ),
    ]
}

/// Angles of the viewing direction in the fiber frame, shared by eval and sample
struct Outgoing {
    sin_theta_o: f64,
    cos_theta_o: f64,
    phi_o: f64,
    gamma_o: f64,
    gamma_t: f64,
    ap: [Attenuation; 4],
}

impl PrincipledHairBsdf {
    fn frame(extra: &PrincipledHairExtra) -> (Vec3d, Vec3d, Vec3d) {
        let z = extra.x.cross(extra.y).try_normalize().unwrap_or(Vec3d::Z);
        (extra.x, extra.y, z)
    }

    fn outgoing(&self, extra: &PrincipledHairExtra, i: Vec3d) -> Outgoing {
        let (x, y, z) = Self::frame(extra);
        let wo = Vec3d::new(i.dot(x), i.dot(y), i.dot(z));

        let sin_theta_o = wo.x;
        let cos_theta_o = cos_from_sin(sin_theta_o);
        let phi_o = wo.z.atan2(wo.y);

        let sin_theta_t = sin_theta_o / self.eta;
        let cos_theta_t = cos_from_sin(sin_theta_t);

        let sin_gamma_o = extra.h;
        let cos_gamma_o = cos_from_sin(sin_gamma_o);
        let gamma_o = safe_asin(sin_gamma_o);

        let sin_gamma_t = safe_divide(
            sin_gamma_o * cos_theta_o,
            safe_sqrt(self.eta.sq() - sin_theta_o.sq()),
        );
        let cos_gamma_t = cos_from_sin(sin_gamma_t);
        let gamma_t = safe_asin(sin_gamma_t);

        let path = safe_divide(2.0 * cos_gamma_t, cos_theta_t);
        let t = (-self.sigma * path).exp();
        let f = fresnel_dielectric_cos(cos_theta_o * cos_gamma_o, self.eta);
        Outgoing {
            sin_theta_o,
            cos_theta_o,
            phi_o,
            gamma_o,
            gamma_t,
            ap: hair_attenuation(f, t),
        }
    }

    /// the value of all lobes together, the pdf is the luminance weighted sum of the lobes
    fn lobes(&self, o: &Outgoing, sin_theta_i: f64, cos_theta_i: f64, phi: f64) -> BsdfEval {
        let angles = hair_alpha_angles(sin_theta_i, cos_theta_i, self.alpha);
        let variances = [self.m0_roughness, 0.25 * self.v, 4.0 * self.v];

        let mut eval = Spectrum::ZERO;
        let mut pdf = 0.0;
        for (p, ((sin_i, cos_i), v)) in angles.into_iter().zip(variances).enumerate() {
            let mp = longitudinal_scattering(sin_i, cos_i, o.sin_theta_o, o.cos_theta_o, v);
            let np = azimuthal_scattering(phi, p, self.s, o.gamma_o, o.gamma_t);
            eval += o.ap[p].color * (mp * np);
            pdf += o.ap[p].weight * mp * np;
        }

        let mp = longitudinal_scattering(
            sin_theta_i,
            cos_theta_i,
            o.sin_theta_o,
            o.cos_theta_o,
            4.0 * self.v,
        );
        let np = 0.5 * consts::FRAC_1_PI;
        eval += o.ap[3].color * (mp * np);
        pdf += o.ap[3].weight * mp * np;

        if !(eval.is_finite() && pdf.is_finite()) || pdf <= 0.0 {
            return BsdfEval::ZERO;
        }
        BsdfEval { eval, pdf }
    }

    fn eval_full(&self, extra: &ExtraArena, i: Vec3d, omega_in: Vec3d) -> BsdfEval {
        let Some(geom) = extra.principled_hair(self.extra) else {
            return BsdfEval::ZERO;
        };
        let o = self.outgoing(geom, i);
        let (x, y, z) = Self::frame(geom);
        let wi = Vec3d::new(omega_in.dot(x), omega_in.dot(y), omega_in.dot(z));
        let sin_theta_i = wi.x;
        let cos_theta_i = cos_from_sin(sin_theta_i);
        let phi_i = wi.z.atan2(wi.y);
        self.lobes(&o, sin_theta_i, cos_theta_i, phi_i - o.phi_o)
    }
}

impl Bsdf for PrincipledHairBsdf {
    fn setup(&mut self, base: &mut ClosureBase, ctx: &mut SetupContext<'_>) -> SdFlags {
        base.ty = ClosureType::BsdfPrincipledHair;
        let Some(r) = self.extra else {
            return SdFlags::empty();
        };

        self.sigma = self.sigma.max(Spectrum::ZERO);
        self.eta = self.eta.max(1e-3);
        self.v = self.v.clamp(0.001, 1.0);
        self.s = self.s.clamp(0.001, 1.0);
        self.m0_roughness = (self.m0_roughness * self.v).clamp(0.001, 1.0);

        self.v = longitudinal_variance(self.v);
        self.s = azimuthal_scale(self.s);
        self.m0_roughness = longitudinal_variance(self.m0_roughness);

        let x = ctx.dpdu.try_normalize().unwrap_or(Vec3d::X);
        let y = x.cross(ctx.i).try_normalize().unwrap_or_else(|| x.any_orthonormal_vector());
        let z = x.cross(y).try_normalize().unwrap_or(Vec3d::Z);

        // sine of the angle between Ng and Z, seen along the tangent
        let h = if ctx.ribbon {
            -ctx.v
        } else {
            ctx.ng.cross(x).dot(z)
        };

        let geom = PrincipledHairExtra {
            x,
            y,
            h: h.clamp(-1.0, 1.0),
        };
        match ctx.extra.get_mut(r) {
            Some(block) => *block = ExtraData::PrincipledHair(geom),
            None => return SdFlags::empty(),
        }

        SdFlags::BSDF
            | SdFlags::BSDF_HAS_EVAL
            | SdFlags::BSDF_NEEDS_LCG
            | SdFlags::BSDF_HAS_TRANSMISSION
    }

    fn eval_reflect(
        &self,
        base: &ClosureBase,
        extra: &ExtraArena,
        i: Vec3d,
        omega_in: Vec3d,
    ) -> BsdfEval {
        if base.n.dot(omega_in) <= 0.0 {
            return BsdfEval::ZERO;
        }
        self.eval_full(extra, i, omega_in)
    }

    fn eval_transmit(
        &self,
        base: &ClosureBase,
        extra: &ExtraArena,
        i: Vec3d,
        omega_in: Vec3d,
    ) -> BsdfEval {
        if base.n.dot(omega_in) > 0.0 {
            return BsdfEval::ZERO;
        }
        self.eval_full(extra, i, omega_in)
    }

    fn sample(
        &self,
        base: &ClosureBase,
        extra: &ExtraArena,
        ng: Vec3d,
        i: Vec3d,
        randu: f64,
        randv: f64,
    ) -> BsdfSample {
        let Some(geom) = extra.principled_hair(self.extra) else {
            return BsdfSample::rejected(ClosureLabel::GLOSSY | ClosureLabel::REFLECT, base.n);
        };
        let o = self.outgoing(geom, i);
        let (x, y, z) = Self::frame(geom);

        let mut lcg = Lcg::from_values(&[i.x, i.y, i.z, randu, randv]);
        let mut u0 = randu;
        let u1x = lcg.step().max(1e-5);
        let u1y = lcg.step();

        let mut p = 0;
        while p < 3 {
            if u0 < o.ap[p].weight {
                break;
            }
            u0 -= o.ap[p].weight;
            p += 1;
        }

        let v = match p {
            0 => self.m0_roughness,
            1 => 0.25 * self.v,
            _ => 4.0 * self.v,
        };
        let fac = v.mul_add((1.0 - u1x).mul_add((-2.0 / v).exp(), u1x).ln(), 1.0);
        let spread = cos_from_sin(fac) * (consts::TAU * u1y).cos() * o.cos_theta_o;
        let mut sin_theta_i = (-fac).mul_add(o.sin_theta_o, spread);
        let mut cos_theta_i = cos_from_sin(sin_theta_i);

        let phi = if p < 3 {
            let angles = hair_alpha_angles(sin_theta_i, cos_theta_i, -self.alpha);
            (sin_theta_i, cos_theta_i) = angles[p];
            delta_phi(p, o.gamma_o, o.gamma_t) + sample_trimmed_logistic(randv, self.s)
        } else {
            consts::TAU * randv
        };
        let phi_i = o.phi_o + phi;
        let (sin_phi_i, cos_phi_i) = phi_i.sin_cos();
        let omega_in =
            x * sin_theta_i + y * (cos_theta_i * cos_phi_i) + z * (cos_theta_i * sin_phi_i);

        let label = ClosureLabel::GLOSSY
            | if p == 0 {
                ClosureLabel::REFLECT
            } else {
                ClosureLabel::TRANSMIT
            };

        let above = ng.dot(omega_in) >= 0.0;
        if above != (base.n.dot(omega_in) > 0.0) {
            return BsdfSample::rejected(label, omega_in);
        }
        let BsdfEval { eval, pdf } = self.lobes(&o, sin_theta_i, cos_theta_i, phi);
        if pdf <= 0.0 {
            return BsdfSample::rejected(label, omega_in);
        }
        BsdfSample {
            label,
            eval,
            omega_in,
            pdf,
        }
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

    fn hair(sigma: Spectrum, roughness: f64, coat: f64, i: Vec3d) -> test_utils::TestClosure {
        test_utils::setup_closure_with_extra(
            ClosureType::BsdfPrincipledHair,
            ExtraData::PrincipledHair(PrincipledHairExtra::default()),
            i,
            |r| {
                ClosureModel::PrincipledHair(PrincipledHairBsdf {
                    sigma,
                    v: roughness,
                    s: roughness,
                    alpha: 0.035,
                    eta: 1.55,
                    m0_roughness: 1.0 - coat,
                    extra: Some(r),
                })
            },
        )
    }

    #[test]
    fn setup_stores_fiber_frame() {
        let i = Vec3d::new(0.0, 0.6, 0.8);
        let closure = hair(Spectrum::splat(0.5), 0.3, 0.0, i);
        assert_eq!(
            closure.flags,
            SdFlags::BSDF
                | SdFlags::BSDF_HAS_EVAL
                | SdFlags::BSDF_NEEDS_LCG
                | SdFlags::BSDF_HAS_TRANSMISSION
        );
        let ClosureModel::PrincipledHair(bsdf) = closure.closure().model else {
            panic!("wrong model");
        };
        let geom = closure.extra().principled_hair(bsdf.extra).unwrap();
        assert_eq!(geom.x, Vec3d::X);
        assert_eq_approx_abs!(geom.y.dot(i), 0.0, 1e-12);
        assert_eq_approx_abs!(geom.y.length(), 1.0, 1e-12);
        assert_in_range!(geom.h, -1.0, 1.0);
    }

    #[test]
    fn negative_absorption_is_clamped() {
        let closure = hair(Spectrum::new(-1.0, 0.5, -2.0), 0.3, 0.0, Vec3d::new(0.0, 0.6, 0.8));
        let ClosureModel::PrincipledHair(bsdf) = closure.closure().model else {
            panic!("wrong model");
        };
        assert_eq!(bsdf.sigma, Spectrum::new(0.0, 0.5, 0.0));
        let mut rd = fastrand::Rng::with_seed(41);
        for _ in 0..1000 {
            let i = test_utils::spherical_sample(&mut rd);
            let eval = closure.eval(i, test_utils::spherical_sample(&mut rd));
            assert!(eval.eval.is_finite_nonnegative() && eval.pdf >= 0.0);
            let sample = closure.sample(i, rd.f64(), rd.f64());
            assert!(sample.eval.is_finite_nonnegative() && sample.pdf >= 0.0);
        }
    }

    #[test]
    fn roughness_mapping() {
        let closure = hair(Spectrum::ZERO, 0.3, 0.0, Vec3d::Z);
        let ClosureModel::PrincipledHair(bsdf) = closure.closure().model else {
            panic!("wrong model");
        };
        let expected_v = (0.726 * 0.3 + 0.812 * 0.09 + 3.7 * 0.3f64.powi(20)).powi(2);
        assert_eq_approx_abs!(bsdf.v, expected_v, 1e-12);
        // no coat keeps the primary reflection as rough as the rest
        assert_eq_approx_abs!(bsdf.m0_roughness, expected_v, 1e-12);
    }

    #[test]
    fn sample_matches_eval() {
        for roughness in [0.2, 0.5, 0.9] {
            let closure = hair(sigma_from_concentration(0.5, 0.1), roughness, 0.0, Vec3d::Z);
            test_utils::test_sample_eval(&closure);
            test_utils::test_determinism(&closure);
        }
    }

    #[test]
    fn missing_extra_block_disables_closure() {
        let closure = test_utils::setup_closure(
            ClosureType::BsdfPrincipledHair,
            ClosureModel::PrincipledHair(PrincipledHairBsdf {
                eta: 1.55,
                ..PrincipledHairBsdf::default()
            }),
        );
        assert_eq!(closure.flags, SdFlags::empty());
        assert_eq!(closure.eval(Vec3d::Z, Vec3d::Y), BsdfEval::ZERO);
        assert!(closure.sample(Vec3d::Z, 0.5, 0.5).is_rejected());
    }

    #[test]
    fn absorption_darkens() {
        let clear = hair(Spectrum::ZERO, 0.4, 0.0, Vec3d::Z);
        let dark = hair(Spectrum::splat(4.0), 0.4, 0.0, Vec3d::Z);
        let mut rd = fastrand::Rng::with_seed(9);
        let (mut sum_clear, mut sum_dark) = (0.0, 0.0);
        for _ in 0..10_000 {
            let i = test_utils::upper_sample(&mut rd);
            let omega_in = test_utils::spherical_sample(&mut rd);
            sum_clear += clear.eval(i, omega_in).eval.x;
            sum_dark += dark.eval(i, omega_in).eval.x;
        }
        assert!(sum_dark < sum_clear);
    }

    #[test]
    fn trimmed_logistic_is_normalized() {
        for s in [0.05, 0.3, 1.0] {
            let n = 20_000;
            let mut integral = 0.0;
            for k in 0..n {
                let x = (f64::from(k) + 0.5) / f64::from(n) * consts::TAU - consts::PI;
                integral += trimmed_logistic(x, s);
            }
            integral *= consts::TAU / f64::from(n);
            assert_eq_approx_abs!(integral, 1.0, 1e-3);
            let x = sample_trimmed_logistic(0.5, s);
            assert_eq_approx_abs!(x, 0.0, 1e-9);
        }
    }

    #[test]
    fn bessel_matches_series() {
        assert_eq_approx_abs!(bessel_i0(0.0), 1.0, 0.0);
        assert_eq_approx_abs!(bessel_i0(1.0), 1.266_065_877_752_008_4, 1e-9);
        // ln I0(20), switching to the asymptotic expansion
        assert_eq_approx_abs!(log_bessel_i0(20.0), 17.589_5, 0.01);
    }

    #[test]
    fn reflectance_to_sigma() {
        let sigma = sigma_from_reflectance(Spectrum::ONE, 0.3);
        assert_eq!(sigma, Spectrum::ZERO);
        let sigma = sigma_from_reflectance(Spectrum::new(0.8, 0.5, 0.2), 0.3);
        assert!(sigma.x < sigma.y && sigma.y < sigma.z);
    }
}
