//! Emission, background and holdout. Emission and background have no closure record, their
//! weights are summed into the shading point. A holdout keeps a record without parameters so the
//! integrator can find its weight.
use crate::{
    alloc::ExtraArena, shading::ShaderData, Bsdf, BsdfEval, BsdfSample, ClosureBase,
    ClosureLabel, ClosureType, SdFlags, SetupContext, Spectrum, Vec3d,
};

/// Cuts a hole into the image where the surface is visible
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HoldoutClosure;

impl Bsdf for HoldoutClosure {
    fn setup(&mut self, base: &mut ClosureBase, _ctx: &mut SetupContext<'_>) -> SdFlags {
        base.ty = ClosureType::Holdout;
        SdFlags::HOLDOUT
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
        _ng: Vec3d,
        _i: Vec3d,
        _randu: f64,
        _randv: f64,
    ) -> BsdfSample {
        BsdfSample::rejected(ClosureLabel::empty(), base.n)
    }
}

fn accumulate_emission(sd: &mut ShaderData, weight: Spectrum) {
    if sd.flag.contains(SdFlags::EMISSION) {
        sd.closure_emission_background += weight;
    } else {
        sd.flag |= SdFlags::EMISSION;
        sd.closure_emission_background = weight;
    }
}

/// Adds light emitted by a surface or volume
pub fn emission_setup(sd: &mut ShaderData, weight: Spectrum) {
    accumulate_emission(sd, weight);
}

/// Adds light from the world shader
pub fn background_setup(sd: &mut ShaderData, weight: Spectrum) {
    accumulate_emission(sd, weight);
}

/// Density of emitting into `i` from a surface with geometric normal `ng`. Both sides emit.
#[must_use]
pub fn emissive_pdf(ng: Vec3d, i: Vec3d) -> f64 {
    if ng.dot(i).abs() > 0.0 {
        1.0
    } else {
        0.0
    }
}

/// Emission towards `i` for unit strength
#[must_use]
pub fn emissive_simple_eval(ng: Vec3d, i: Vec3d) -> Spectrum {
    Spectrum::splat(emissive_pdf(ng, i))
}
