//! Rough surfaces modelled as a distribution of tiny mirrors.
//!
//! One record type covers the whole family. The record's [`ClosureType`] selects the
//! distribution (GGX, Beckmann, the clear coat's GTR1 or multiple scattering GGX) and the lobes
//! (reflection, refraction or both for glass). Closures whose roughness vanishes set up as the
//! sharp variants, which only work through [`Bsdf::sample`].
//!
//! # Mathematical background
//! * Bruce Walter et al. Microfacet models for refraction through rough surfaces, 2007.
//! * Eric Heitz. Understanding the masking-shadowing function in microfacet-based brdfs, 2014.
use crate::{
    alloc::{ExtraArena, ExtraRef},
    beckmann::Beckmann,
    distribution::{Gtr1, MicrofacetDistribution},
    ggx::GGX,
    microfacet_multi::MultiScatter,
    utils::{
        fresnel_conductor, fresnel_dielectric_cos, interpolate_fresnel_color,
        make_orthonormals_tangent, pow5, reflect, refract, to_local, to_world, FloatExt, Lcg,
        VecExt,
    },
    Bsdf, BsdfEval, BsdfSample, ClosureBase, ClosureLabel, ClosureType, SdFlags, SetupContext,
    Spectrum, Vec3d,
};

/// Value reported for both eval and pdf of a delta lobe, their ratio is what matters
pub const SINGULAR_PDF: f64 = 1e6;

/// Below this product of the two alphas a surface counts as perfectly smooth
const SHARP_THRESHOLD: f64 = 1e-7;

/// Parameters of the fresnel tinted variants that do not fit into the record
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct MicrofacetExtra {
    /// tint of the multiple scattering bounces
    pub color: Spectrum,
    /// specular colour at normal incidence
    pub cspec0: Spectrum,
    /// clear coat strength
    pub clearcoat: f64,
}

/// Reflectance of a metal surface
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ConductorFresnel {
    /// complex index of refraction `ior + i extinction` per channel
    Physical { ior: Spectrum, extinction: Spectrum },
    /// Schlick's curve through `f0` with a dip towards grazing angles scaled by `b`
    F82Tint { f0: Spectrum, b: Spectrum },
}

impl ConductorFresnel {
    #[must_use]
    pub fn physical(ior: Spectrum, extinction: Spectrum) -> Self {
        Self::Physical {
            ior: ior.max(Spectrum::ZERO),
            extinction: extinction.max(Spectrum::ZERO),
        }
    }

    /// `f0` is the colour at normal incidence, `tint` the colour at an angle of about 82 degrees
    ///
    /// * Naty Hoffman. Generalization of Adobe's Fresnel Model, 2023.
    #[must_use]
    pub fn f82_tint(f0: Spectrum, tint: Spectrum) -> Self {
        let f0 = f0.clamp(Spectrum::ZERO, Spectrum::ONE);
        let tint = tint.clamp(Spectrum::ZERO, Spectrum::ONE);
        // cos(82 degrees) is close enough to 1/7
        let f = 6.0 / 7.0;
        let f5 = pow5(f);
        let schlick = f0.lerp(Spectrum::ONE, f5);
        Self::F82Tint {
            f0,
            b: schlick * (7.0 / (f5 * f)) * (Spectrum::ONE - tint),
        }
    }

    #[must_use]
    pub fn reflectance(&self, cos_theta: f64) -> Spectrum {
        match *self {
            Self::Physical { ior, extinction } => fresnel_conductor(cos_theta, ior, extinction),
            Self::F82Tint { f0, b } => {
                let cos_theta = cos_theta.saturate();
                let s = 1.0 - cos_theta;
                let s5 = pow5(s);
                let schlick = f0.lerp(Spectrum::ONE, s5);
                (schlick - b * (cos_theta * s5 * s)).clamp(Spectrum::ZERO, Spectrum::ONE)
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Distribution {
    Sharp,
    Ggx,
    Beckmann,
    Clearcoat,
    MultiGgx,
}

/// Which hemispheres a microfacet closure scatters into
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MicrofacetLobes {
    Reflect,
    Refract,
    /// reflection and refraction, chosen by the dielectric fresnel term
    Glass,
}

const fn classify(ty: ClosureType) -> Option<(Distribution, MicrofacetLobes)> {
    use ClosureType as T;
    use Distribution as D;
    use MicrofacetLobes as L;
    Some(match ty {
        T::BsdfReflection => (D::Sharp, L::Reflect),
        T::BsdfRefraction => (D::Sharp, L::Refract),
        T::BsdfSharpGlass => (D::Sharp, L::Glass),
        T::BsdfMicrofacetGgx | T::BsdfMicrofacetGgxFresnel | T::BsdfMicrofacetGgxConductor => {
            (D::Ggx, L::Reflect)
        }
        T::BsdfMicrofacetGgxClearcoat => (D::Clearcoat, L::Reflect),
        T::BsdfMicrofacetBeckmann | T::BsdfMicrofacetBeckmannConductor => {
            (D::Beckmann, L::Reflect)
        }
        T::BsdfMicrofacetMultiGgx | T::BsdfMicrofacetMultiGgxFresnel => {
            (D::MultiGgx, L::Reflect)
        }
        T::BsdfMicrofacetGgxRefraction => (D::Ggx, L::Refract),
        T::BsdfMicrofacetBeckmannRefraction => (D::Beckmann, L::Refract),
        T::BsdfMicrofacetGgxGlass => (D::Ggx, L::Glass),
        T::BsdfMicrofacetBeckmannGlass => (D::Beckmann, L::Glass),
        T::BsdfMicrofacetMultiGgxGlass | T::BsdfMicrofacetMultiGgxGlassFresnel => {
            (D::MultiGgx, L::Glass)
        }
        _ => return None,
    })
}

/// The lobes a microfacet closure type scatters into, `None` for other closure types
#[must_use]
pub const fn lobes_of(ty: ClosureType) -> Option<MicrofacetLobes> {
    match classify(ty) {
        Some((_, lobes)) => Some(lobes),
        None => None,
    }
}

const fn uses_fresnel(ty: ClosureType) -> bool {
    matches!(
        ty,
        ClosureType::BsdfMicrofacetGgxFresnel
            | ClosureType::BsdfMicrofacetGgxClearcoat
            | ClosureType::BsdfMicrofacetMultiGgxFresnel
            | ClosureType::BsdfMicrofacetMultiGgxGlassFresnel
    )
}

const fn is_conductor(ty: ClosureType) -> bool {
    matches!(
        ty,
        ClosureType::BsdfMicrofacetGgxConductor | ClosureType::BsdfMicrofacetBeckmannConductor
    )
}

/// Maps the user facing roughness and anisotropy to the two alphas of the distribution
///
/// Returns `(alpha_x, alpha_y, anisotropic)`.
#[must_use]
pub fn microfacet_alphas(roughness: f64, anisotropy: f64) -> (f64, f64, bool) {
    let r = roughness.saturate().sq();
    let a = anisotropy.clamp(-0.99, 0.99);
    if a.abs() <= 1e-4 {
        (r, r, false)
    } else if a < 0.0 {
        (r / (1.0 + a), r * (1.0 + a), true)
    } else {
        (r * (1.0 - a), r / (1.0 - a), true)
    }
}

/// Picks the closure type of a metal for a distribution name. Multiple scattering has no conductor
/// variant and maps to GGX, unknown names map to Beckmann like [`microfacet_type`].
#[must_use]
pub fn conductor_type(distribution: &str) -> ClosureType {
    match distribution {
        "ggx" | "default" | "multi_ggx" => ClosureType::BsdfMicrofacetGgxConductor,
        _ => ClosureType::BsdfMicrofacetBeckmannConductor,
    }
}

/// Picks the closure type for the generic `microfacet` closure of the shading language
///
/// `refract` is 0 for reflection, 1 for refraction and 2 for glass. Unknown distributions fall
/// back to Beckmann.
#[must_use]
pub fn microfacet_type(distribution: &str, refract: i32) -> ClosureType {
    match (distribution, refract) {
        ("ggx" | "default", 0) => ClosureType::BsdfMicrofacetGgx,
        ("ggx" | "default", 1) => ClosureType::BsdfMicrofacetGgxRefraction,
        ("ggx" | "default", _) => ClosureType::BsdfMicrofacetGgxGlass,
        ("multi_ggx", 0) => ClosureType::BsdfMicrofacetMultiGgx,
        ("multi_ggx", _) => ClosureType::BsdfMicrofacetMultiGgxGlass,
        (_, 0) => ClosureType::BsdfMicrofacetBeckmann,
        (_, 1) => ClosureType::BsdfMicrofacetBeckmannRefraction,
        (_, _) => ClosureType::BsdfMicrofacetBeckmannGlass,
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MicrofacetBsdf {
    pub alpha_x: f64,
    pub alpha_y: f64,
    /// relative index of refraction, inside over outside
    pub ior: f64,
    /// tangent for anisotropic roughness, zero for isotropic surfaces
    pub t: Vec3d,
    pub extra: Option<ExtraRef>,
    /// scales the reflection lobe of glass, zeroed by caustics gating
    pub reflection_tint: f64,
    /// scales the refraction lobe of glass, zeroed by caustics gating
    pub transmission_tint: f64,
}

impl Default for MicrofacetBsdf {
    fn default() -> Self {
        Self::new(0.0, 0.0, 1.0, Vec3d::ZERO)
    }
}

impl MicrofacetBsdf {
    #[must_use]
    pub const fn new(alpha_x: f64, alpha_y: f64, ior: f64, t: Vec3d) -> Self {
        Self {
            alpha_x,
            alpha_y,
            ior,
            t,
            extra: None,
            reflection_tint: 1.0,
            transmission_tint: 1.0,
        }
    }

    #[must_use]
    pub const fn isotropic(alpha: f64, ior: f64) -> Self {
        Self::new(alpha, alpha, ior, Vec3d::ZERO)
    }

    #[must_use]
    pub const fn with_extra(mut self, extra: ExtraRef) -> Self {
        self.extra = Some(extra);
        self
    }

    fn frame(&self, n: Vec3d) -> (Vec3d, Vec3d) {
        make_orthonormals_tangent(n, self.t)
    }

    fn fresnel_extra<'a>(
        &self,
        base: &ClosureBase,
        extra: &'a ExtraArena,
    ) -> Option<&'a MicrofacetExtra> {
        if uses_fresnel(base.ty) || base.ty == ClosureType::BsdfReflection {
            extra.microfacet(self.extra)
        } else {
            None
        }
    }

    /// Tint of the reflection off the microfacet `m`, white without fresnel parameters
    fn reflection_color(
        &self,
        base: &ClosureBase,
        extra: &ExtraArena,
        l: Vec3d,
        m: Vec3d,
    ) -> Spectrum {
        if is_conductor(base.ty) || base.ty == ClosureType::BsdfReflection {
            if let Some(fresnel) = extra.conductor(self.extra) {
                return fresnel.reflectance(l.dot(m));
            }
        }
        let Some(params) = self.fresnel_extra(base, extra) else {
            return Spectrum::ONE;
        };
        let f0 = fresnel_dielectric_cos(1.0, self.ior);
        let color = interpolate_fresnel_color(l, m, self.ior, f0, params.cspec0);
        if base.ty == ClosureType::BsdfMicrofacetGgxClearcoat {
            color * (0.25 * params.clearcoat)
        } else {
            color
        }
    }

    fn multi(&self, base: &ClosureBase, extra: &ExtraArena) -> MultiScatter {
        let params = extra.microfacet(self.extra);
        MultiScatter {
            alpha_x: self.alpha_x,
            alpha_y: self.alpha_y,
            eta: self.ior,
            color: params.map_or(Spectrum::ONE, |p| p.color),
            cspec0: if uses_fresnel(base.ty) {
                params.map(|p| p.cspec0)
            } else {
                None
            },
        }
    }

    fn with_distribution<R>(
        &self,
        dist: Distribution,
        f: impl FnOnce(&dyn MicrofacetDistribution) -> R,
    ) -> R {
        match dist {
            Distribution::Beckmann => f(&Beckmann {
                alpha_x: self.alpha_x,
                alpha_y: self.alpha_y,
            }),
            Distribution::Clearcoat => f(&Gtr1 { alpha: self.alpha_x }),
            _ => f(&GGX {
                alpha_x: self.alpha_x,
                alpha_y: self.alpha_y,
            }),
        }
    }

    /// Reflection in the local frame, both directions above the surface
    fn eval_rough_reflect(
        &self,
        dist: &dyn MicrofacetDistribution,
        lobes: MicrofacetLobes,
        tint: impl FnOnce(Vec3d) -> Spectrum,
        wo: Vec3d,
        wi: Vec3d,
    ) -> BsdfEval {
        if wo.z <= 0.0 || wi.z <= 0.0 {
            return BsdfEval::ZERO;
        }
        let Some(m) = (wo + wi).try_normalize() else {
            return BsdfEval::ZERO;
        };
        let cos_mo = wo.dot(m);
        if cos_mo <= 0.0 {
            return BsdfEval::ZERO;
        }
        let d = dist.d(m);
        let g = dist.g1(wo, m) * dist.g1(wi, m);
        let mut pdf = dist.pdf_m(wo, m) / (4.0 * cos_mo);
        let mut eval = tint(m) * (d * g / (4.0 * wo.z));
        if lobes == MicrofacetLobes::Glass {
            let f = fresnel_dielectric_cos(cos_mo, self.ior);
            pdf *= f;
            eval *= f * self.reflection_tint;
        }
        BsdfEval { eval, pdf }
    }

    /// Refraction in the local frame, `wo` above and `wi` below the surface
    fn eval_rough_refract(
        &self,
        dist: &dyn MicrofacetDistribution,
        lobes: MicrofacetLobes,
        wo: Vec3d,
        wi: Vec3d,
    ) -> BsdfEval {
        if wo.z <= 0.0 || wi.z >= 0.0 {
            return BsdfEval::ZERO;
        }
        let eta = self.ior;
        let Some(mut h) = (-(wo + wi * eta)).try_normalize() else {
            return BsdfEval::ZERO;
        };
        if h.z < 0.0 {
            h = -h;
        }
        let cos_ho = wo.dot(h);
        let cos_hi = wi.dot(h);
        if cos_ho <= 0.0 || cos_hi >= 0.0 {
            return BsdfEval::ZERO;
        }
        let denom = eta.mul_add(cos_hi, cos_ho).sq();
        if denom <= 0.0 {
            return BsdfEval::ZERO;
        }
        let d = dist.d(h);
        let g = dist.g1(wo, h) * dist.g1(wi, h);
        let common = (cos_hi * cos_ho).abs() * eta.sq() / denom;
        let mut pdf = dist.pdf_m(wo, h) * cos_hi.abs() * eta.sq() / denom;
        let mut value = g * d * common / wo.z;
        if lobes == MicrofacetLobes::Glass {
            let f = fresnel_dielectric_cos(cos_ho, eta);
            pdf *= 1.0 - f;
            value *= (1.0 - f) * self.transmission_tint;
        }
        BsdfEval {
            eval: Spectrum::splat(value),
            pdf,
        }
    }

    fn lcg_for(i: Vec3d, omega_in: Vec3d) -> Lcg {
        Lcg::from_values(&[i.x, i.y, i.z, omega_in.x, omega_in.y, omega_in.z])
    }

    fn eval_multi(
        &self,
        base: &ClosureBase,
        extra: &ExtraArena,
        glass: bool,
        i: Vec3d,
        omega_in: Vec3d,
    ) -> BsdfEval {
        let (x, y) = self.frame(base.n);
        let wo = to_local(i, x, y, base.n);
        let wi = to_local(omega_in, x, y, base.n);
        let multi = self.multi(base, extra);
        let mut lcg = Self::lcg_for(i, omega_in);
        if glass {
            let outside = wi.z > 0.0;
            let tint = if outside {
                self.reflection_tint
            } else {
                self.transmission_tint
            };
            BsdfEval {
                eval: multi.eval(true, wo, wi, outside, &mut lcg) * tint,
                pdf: multi.glass_pdf(wo, wi),
            }
        } else {
            if wo.z <= 0.0 || wi.z <= 0.0 {
                return BsdfEval::ZERO;
            }
            BsdfEval {
                eval: multi.eval(false, wo, wi, true, &mut lcg),
                pdf: multi.glossy_pdf(wo, wi),
            }
        }
    }

    fn eval_lobe(
        &self,
        base: &ClosureBase,
        extra: &ExtraArena,
        i: Vec3d,
        omega_in: Vec3d,
        transmit: bool,
    ) -> BsdfEval {
        let Some((dist, lobes)) = classify(base.ty) else {
            return BsdfEval::ZERO;
        };
        match (dist, lobes, transmit) {
            (Distribution::Sharp, _, _)
            | (_, MicrofacetLobes::Refract, false)
            | (_, MicrofacetLobes::Reflect, true) => BsdfEval::ZERO,
            (Distribution::MultiGgx, _, _) => {
                let below = base.n.dot(omega_in) < 0.0;
                if below != transmit {
                    return BsdfEval::ZERO;
                }
                self.eval_multi(base, extra, lobes == MicrofacetLobes::Glass, i, omega_in)
            }
            (dist, lobes, transmit) => {
                let (x, y) = self.frame(base.n);
                let wo = to_local(i, x, y, base.n);
                let wi = to_local(omega_in, x, y, base.n);
                self.with_distribution(dist, |d| {
                    if transmit {
                        self.eval_rough_refract(d, lobes, wo, wi)
                    } else {
                        // the fresnel tint only depends on angles, the local frame will do
                        let tint = |m| self.reflection_color(base, extra, wi, m);
                        self.eval_rough_reflect(d, lobes, tint, wo, wi)
                    }
                })
            }
        }
    }

    fn sample_sharp(
        &self,
        base: &ClosureBase,
        extra: &ExtraArena,
        lobes: MicrofacetLobes,
        ng: Vec3d,
        i: Vec3d,
        randu: f64,
    ) -> BsdfSample {
        let n = base.n;
        let cos_no = n.dot(i);
        let reflect_label = ClosureLabel::SINGULAR | ClosureLabel::REFLECT;
        let transmit_label = ClosureLabel::SINGULAR | ClosureLabel::TRANSMIT;
        if cos_no <= 0.0 {
            return BsdfSample::rejected(reflect_label, n);
        }

        let fresnel = fresnel_dielectric_cos(cos_no, self.ior);
        let (choose_reflect, weight) = match lobes {
            MicrofacetLobes::Reflect => (true, 1.0),
            MicrofacetLobes::Refract => (false, 1.0),
            MicrofacetLobes::Glass => {
                if randu < fresnel {
                    (true, fresnel)
                } else {
                    (false, 1.0 - fresnel)
                }
            }
        };

        if choose_reflect {
            let omega_in = reflect(n, i);
            if ng.dot(omega_in) <= 0.0 {
                return BsdfSample::rejected(reflect_label, omega_in);
            }
            let tint = if lobes == MicrofacetLobes::Glass {
                Spectrum::splat(self.reflection_tint)
            } else {
                self.reflection_color(base, extra, omega_in, n)
            };
            BsdfSample {
                label: reflect_label,
                eval: tint * (weight * SINGULAR_PDF),
                omega_in,
                pdf: weight * SINGULAR_PDF,
            }
        } else {
            let Some(omega_in) = refract(i, n, self.ior) else {
                return BsdfSample::rejected(transmit_label, -n);
            };
            if ng.dot(omega_in) >= 0.0 {
                return BsdfSample::rejected(transmit_label, omega_in);
            }
            let tint = if lobes == MicrofacetLobes::Glass {
                self.transmission_tint
            } else {
                1.0
            };
            BsdfSample {
                label: transmit_label,
                eval: Spectrum::splat(tint * weight * SINGULAR_PDF),
                omega_in,
                pdf: weight * SINGULAR_PDF,
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn sample_multi(
        &self,
        base: &ClosureBase,
        extra: &ExtraArena,
        glass: bool,
        ng: Vec3d,
        i: Vec3d,
        randu: f64,
        randv: f64,
    ) -> BsdfSample {
        let (x, y) = self.frame(base.n);
        let wo = to_local(i, x, y, base.n);
        let reflect_label = ClosureLabel::GLOSSY | ClosureLabel::REFLECT;
        if wo.z <= 0.0 {
            return BsdfSample::rejected(reflect_label, base.n);
        }
        let multi = self.multi(base, extra);
        let mut lcg = Lcg::from_values(&[i.x, i.y, i.z, randu, randv]);
        let Some((wi, throughput)) = multi.sample(glass, wo, &mut lcg) else {
            return BsdfSample::rejected(reflect_label, base.n);
        };
        let omega_in = to_world(wi, x, y, base.n);
        let reflected = wi.z > 0.0;
        let label = if reflected {
            reflect_label
        } else {
            ClosureLabel::GLOSSY | ClosureLabel::TRANSMIT
        };
        if (ng.dot(omega_in) > 0.0) != reflected {
            return BsdfSample::rejected(label, omega_in);
        }
        let (pdf, tint) = if glass {
            let tint = if reflected {
                self.reflection_tint
            } else {
                self.transmission_tint
            };
            (multi.glass_pdf(wo, wi), tint)
        } else {
            (multi.glossy_pdf(wo, wi), 1.0)
        };
        if !(pdf > 0.0 && pdf.is_finite()) {
            return BsdfSample::rejected(label, omega_in);
        }
        BsdfSample {
            label,
            eval: throughput * (pdf * tint),
            omega_in,
            pdf,
        }
    }
}

impl Bsdf for MicrofacetBsdf {
    fn setup(&mut self, base: &mut ClosureBase, ctx: &mut SetupContext<'_>) -> SdFlags {
        let (dist, lobes) = classify(base.ty).unwrap_or_else(|| {
            base.ty = ClosureType::BsdfMicrofacetGgx;
            (Distribution::Ggx, MicrofacetLobes::Reflect)
        });
        self.ior = self.ior.max(1e-5);

        match dist {
            Distribution::Sharp => {
                self.alpha_x = 0.0;
                self.alpha_y = 0.0;
            }
            Distribution::MultiGgx => {
                self.alpha_x = self.alpha_x.clamp(1e-4, 1.0);
                self.alpha_y = if lobes == MicrofacetLobes::Glass {
                    self.alpha_x
                } else {
                    self.alpha_y.clamp(1e-4, 1.0)
                };
            }
            Distribution::Clearcoat => {
                self.alpha_x = self.alpha_x.clamp(1e-4, 1.0);
                self.alpha_y = self.alpha_x;
            }
            Distribution::Ggx | Distribution::Beckmann => {
                self.alpha_x = self.alpha_x.saturate();
                self.alpha_y = self.alpha_y.saturate();
            }
        }

        let sharp = dist == Distribution::Sharp
            || (matches!(dist, Distribution::Ggx | Distribution::Beckmann)
                && self.alpha_x * self.alpha_y <= SHARP_THRESHOLD);

        if let Some(params) = ctx.extra.microfacet(self.extra).copied() {
            if uses_fresnel(base.ty) {
                let f0 = fresnel_dielectric_cos(1.0, self.ior);
                let color = interpolate_fresnel_color(ctx.i, base.n, self.ior, f0, params.cspec0);
                let mut weight = color.average();
                if base.ty == ClosureType::BsdfMicrofacetGgxClearcoat {
                    weight *= 0.25 * params.clearcoat;
                }
                base.sample_weight *= weight;
            }
        }
        if is_conductor(base.ty) {
            if let Some(fresnel) = ctx.extra.conductor(self.extra) {
                base.sample_weight *= fresnel.reflectance(ctx.i.dot(base.n)).average();
            }
        }

        if sharp {
            self.alpha_x = 0.0;
            self.alpha_y = 0.0;
            let tinted = uses_fresnel(base.ty) || is_conductor(base.ty);
            let keeps_fresnel = tinted && lobes == MicrofacetLobes::Reflect;
            base.ty = match lobes {
                MicrofacetLobes::Reflect => ClosureType::BsdfReflection,
                MicrofacetLobes::Refract => ClosureType::BsdfRefraction,
                MicrofacetLobes::Glass => ClosureType::BsdfSharpGlass,
            };
            if !keeps_fresnel {
                self.extra = None;
            }
        }

        let mut flags = SdFlags::BSDF;
        if !sharp {
            flags |= SdFlags::BSDF_HAS_EVAL;
        }
        if lobes != MicrofacetLobes::Reflect {
            flags |= SdFlags::BSDF_HAS_TRANSMISSION;
        }
        if dist == Distribution::MultiGgx {
            flags |= SdFlags::BSDF_NEEDS_LCG;
        }
        flags
    }

    fn eval_reflect(
        &self,
        base: &ClosureBase,
        extra: &ExtraArena,
        i: Vec3d,
        omega_in: Vec3d,
    ) -> BsdfEval {
        self.eval_lobe(base, extra, i, omega_in, false)
    }

    fn eval_transmit(
        &self,
        base: &ClosureBase,
        extra: &ExtraArena,
        i: Vec3d,
        omega_in: Vec3d,
    ) -> BsdfEval {
        self.eval_lobe(base, extra, i, omega_in, true)
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
        let reflect_label = ClosureLabel::GLOSSY | ClosureLabel::REFLECT;
        let transmit_label = ClosureLabel::GLOSSY | ClosureLabel::TRANSMIT;
        let Some((dist, lobes)) = classify(base.ty) else {
            return BsdfSample::rejected(reflect_label, base.n);
        };
        match dist {
            Distribution::Sharp => return self.sample_sharp(base, extra, lobes, ng, i, randu),
            Distribution::MultiGgx => {
                let glass = lobes == MicrofacetLobes::Glass;
                return self.sample_multi(base, extra, glass, ng, i, randu, randv);
            }
            _ => {}
        }

        let (x, y) = self.frame(base.n);
        let wo = to_local(i, x, y, base.n);
        if wo.z <= 0.0 {
            return BsdfSample::rejected(reflect_label, base.n);
        }
        let m = self.with_distribution(dist, |d| d.sample_m(wo, randu, randv));
        let choose_reflect = match lobes {
            MicrofacetLobes::Reflect => true,
            MicrofacetLobes::Refract => false,
            MicrofacetLobes::Glass => {
                // Both numbers already went into the microfacet, so the lobe is chosen with a
                // hash of them. The choice is independent of the microfacet but not stratified.
                let f = fresnel_dielectric_cos(wo.dot(m), self.ior);
                Lcg::from_values(&[randu, randv]).step() < f
            }
        };

        if choose_reflect {
            let wi = reflect(m, wo);
            let omega_in = to_world(wi, x, y, base.n);
            if wi.z <= 0.0 || ng.dot(omega_in) <= 0.0 {
                return BsdfSample::rejected(reflect_label, omega_in);
            }
            let BsdfEval { eval, pdf } = self.eval_reflect(base, extra, i, omega_in);
            if pdf > 0.0 && eval.is_finite_nonnegative() {
                BsdfSample {
                    label: reflect_label,
                    eval,
                    omega_in,
                    pdf,
                }
            } else {
                BsdfSample::rejected(reflect_label, omega_in)
            }
        } else {
            let Some(wi) = refract(wo, m, self.ior) else {
                return BsdfSample::rejected(transmit_label, -base.n);
            };
            let omega_in = to_world(wi, x, y, base.n);
            if wi.z >= 0.0 || ng.dot(omega_in) >= 0.0 {
                return BsdfSample::rejected(transmit_label, omega_in);
            }
            let BsdfEval { eval, pdf } = self.eval_transmit(base, extra, i, omega_in);
            if pdf > 0.0 && eval.is_finite_nonnegative() {
                BsdfSample {
                    label: transmit_label,
                    eval,
                    omega_in,
                    pdf,
                }
            } else {
                BsdfSample::rejected(transmit_label, omega_in)
            }
        }
    }
}
