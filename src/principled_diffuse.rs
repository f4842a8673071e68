//! The diffuse part of the principled shader: a Lambertian base with a fresnel shaped falloff
//! plus a retro-reflection term for rough surfaces.
//!
//! See Brent Burley. Physically-based shading at Disney, 2012 and
//! Extending the Disney BRDF to a BSDF with integrated subsurface scattering, 2015.
use std::f64::consts;

use bitflags::bitflags;

use crate::{
    alloc::ExtraArena,
    utils::{sample_cos_hemisphere, schlick_fresnel, FloatExt},
    Bsdf, BsdfEval, BsdfSample, ClosureBase, ClosureLabel, ClosureType, SdFlags, SetupContext,
    Spectrum, Vec3d,
};

bitflags! {
    /// Selects which terms of the diffuse model are evaluated. Subsurface scattering splits the
    /// model: the entry into the surface is handled elsewhere, the exit uses `LAMBERT_EXIT`.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct PrincipledDiffuseComponents: u32 {
        const FULL = 1;
        const LAMBERT = 1 << 1;
        const LAMBERT_EXIT = 1 << 2;
        const RETRO_REFLECTION = 1 << 3;
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PrincipledDiffuseBsdf {
    pub roughness: f64,
    pub components: PrincipledDiffuseComponents,
}

impl PrincipledDiffuseBsdf {
    #[must_use]
    pub const fn new(roughness: f64) -> Self {
        Self {
            roughness,
            components: PrincipledDiffuseComponents::FULL,
        }
    }

    fn brdf(&self, n: Vec3d, v: Vec3d, l: Vec3d) -> f64 {
        let n_dot_l = n.dot(l);
        if n_dot_l <= 0.0 {
            return 0.0;
        }
        let n_dot_v = n.dot(v).max(0.0);
        let fv = schlick_fresnel(n_dot_v);
        let fl = schlick_fresnel(n_dot_l);

        let mut f = 0.0;
        if self.components.intersects(
            PrincipledDiffuseComponents::FULL | PrincipledDiffuseComponents::LAMBERT_EXIT,
        ) {
            #[allow(clippy::suboptimal_flops)]
            {
                f += (1.0 - 0.5 * fv) * (1.0 - 0.5 * fl);
            }
        } else if self.components.contains(PrincipledDiffuseComponents::LAMBERT) {
            f += 1.0;
        }

        if self.components.intersects(
            PrincipledDiffuseComponents::FULL | PrincipledDiffuseComponents::RETRO_REFLECTION,
        ) {
            // 2 cos^2 of the half angle between l and v
            let lh2 = l.dot(v) + 1.0;
            let r = self.roughness * lh2;
            #[allow(clippy::suboptimal_flops)]
            {
                f += r * (fl + fv + fl * fv * (r - 1.0));
            }
        }

        f * consts::FRAC_1_PI * n_dot_l
    }
}

impl Bsdf for PrincipledDiffuseBsdf {
    fn setup(&mut self, base: &mut ClosureBase, _ctx: &mut SetupContext<'_>) -> SdFlags {
        if self.components.is_empty() {
            self.components = PrincipledDiffuseComponents::FULL;
        }
        self.roughness = self.roughness.saturate();
        base.ty = ClosureType::BsdfPrincipledDiffuse;
        SdFlags::BSDF | SdFlags::BSDF_HAS_EVAL
    }

    fn eval_reflect(
        &self,
        base: &ClosureBase,
        _extra: &ExtraArena,
        i: Vec3d,
        omega_in: Vec3d,
    ) -> BsdfEval {
        let n_dot_l = base.n.dot(omega_in);
        if n_dot_l > 0.0 {
            BsdfEval {
                eval: Spectrum::splat(self.brdf(base.n, i, omega_in)),
                pdf: n_dot_l * consts::FRAC_1_PI,
            }
        } else {
            BsdfEval::ZERO
        }
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
        base: &ClosureBase,
        _extra: &ExtraArena,
        ng: Vec3d,
        i: Vec3d,
        randu: f64,
        randv: f64,
    ) -> BsdfSample {
        let label = ClosureLabel::REFLECT | ClosureLabel::DIFFUSE;
        let (omega_in, pdf) = sample_cos_hemisphere(base.n, randu, randv);
        if ng.dot(omega_in) > 0.0 && base.n.dot(omega_in) > 0.0 {
            BsdfSample {
                label,
                eval: Spectrum::splat(self.brdf(base.n, i, omega_in)),
                omega_in,
                pdf,
            }
        } else {
            BsdfSample::rejected(label, omega_in)
        }
    }
}
