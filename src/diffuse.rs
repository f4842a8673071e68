//! Lambertian reflection and its transmissive counterpart
use std::f64::consts;

use crate::{
    alloc::ExtraArena,
    utils::{sample_cos_hemisphere, VecExt},
    Bsdf, BsdfEval, BsdfSample, ClosureBase, ClosureLabel, ClosureType, SdFlags, SetupContext,
    Vec3d,
};

/// [Bsdf] that can resemble smooth Diffuse surfaces like plastic
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DiffuseBsdf;

/// Diffuse light transport through thin sheets, like paper or leaves
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TranslucentBsdf;

impl Bsdf for DiffuseBsdf {
    fn setup(&mut self, base: &mut ClosureBase, _ctx: &mut SetupContext<'_>) -> SdFlags {
        base.ty = ClosureType::BsdfDiffuse;
        SdFlags::BSDF | SdFlags::BSDF_HAS_EVAL
    }

    fn eval_reflect(
        &self,
        base: &ClosureBase,
        _extra: &ExtraArena,
        _i: Vec3d,
        omega_in: Vec3d,
    ) -> BsdfEval {
        BsdfEval::splat(base.n.dot(omega_in).max(0.0) * consts::FRAC_1_PI)
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
        _i: Vec3d,
        randu: f64,
        randv: f64,
    ) -> BsdfSample {
        let label = ClosureLabel::REFLECT | ClosureLabel::DIFFUSE;
        let (omega_in, pdf) = sample_cos_hemisphere(base.n, randu, randv);
        if ng.dot(omega_in) > 0.0 {
            BsdfSample {
                label,
                eval: Vec3d::splat(pdf),
                omega_in,
                pdf,
            }
        } else {
            BsdfSample::rejected(label, omega_in)
        }
    }
}

impl Bsdf for TranslucentBsdf {
    fn setup(&mut self, base: &mut ClosureBase, _ctx: &mut SetupContext<'_>) -> SdFlags {
        base.ty = ClosureType::BsdfTranslucent;
        SdFlags::BSDF | SdFlags::BSDF_HAS_EVAL | SdFlags::BSDF_HAS_TRANSMISSION
    }

    fn eval_reflect(
        &self,
        _base: &ClosureBase,
        _extra: &ExtraArena,
        _i: Vec3d,
        _omega_in: Vec3d,
    ) -> BsdfEval {
        BsdfEval::ZERO
    }

    fn eval_transmit(
        &self,
        base: &ClosureBase,
        _extra: &ExtraArena,
        _i: Vec3d,
        omega_in: Vec3d,
    ) -> BsdfEval {
        BsdfEval::splat((-base.n.dot(omega_in)).max(0.0) * consts::FRAC_1_PI)
    }

    fn sample(
        &self,
        base: &ClosureBase,
        _extra: &ExtraArena,
        ng: Vec3d,
        _i: Vec3d,
        randu: f64,
        randv: f64,
    ) -> BsdfSample {
        let label = ClosureLabel::TRANSMIT | ClosureLabel::DIFFUSE;
        let (omega_in, pdf) = sample_cos_hemisphere(-base.n, randu, randv);
        let eval = Vec3d::splat(pdf);
        if ng.dot(omega_in) < 0.0 && eval.is_finite_nonnegative() {
            BsdfSample {
                label,
                eval,
                omega_in,
                pdf,
            }
        } else {
            BsdfSample::rejected(label, omega_in)
        }
    }
}
