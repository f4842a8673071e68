//! Light passing straight through the surface, used for alpha cutouts
use log::trace;

use crate::{
    alloc::{ExtraArena, CLOSURE_WEIGHT_CUTOFF},
    closure::{ClosureModel, ShaderClosure},
    shading::ShaderData,
    utils::VecExt,
    Bsdf, BsdfEval, BsdfSample, ClosureBase, ClosureLabel, ClosureType, PathFlags, SdFlags,
    SetupContext, Spectrum, Vec3d,
};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TransparentBsdf;

impl Bsdf for TransparentBsdf {
    fn setup(&mut self, base: &mut ClosureBase, _ctx: &mut SetupContext<'_>) -> SdFlags {
        base.ty = ClosureType::BsdfTransparent;
        SdFlags::BSDF | SdFlags::TRANSPARENT
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

    /// Only the direction straight through the surface is possible
    fn sample(
        &self,
        _base: &ClosureBase,
        _extra: &ExtraArena,
        _ng: Vec3d,
        i: Vec3d,
        _randu: f64,
        _randv: f64,
    ) -> BsdfSample {
        BsdfSample {
            label: ClosureLabel::TRANSMIT | ClosureLabel::TRANSPARENT,
            eval: Spectrum::ONE,
            omega_in: -i,
            pdf: 1.0,
        }
    }
}

/// Adds transparency to a shading point. All transparent closures of a point are merged into
/// one record, and their weights are also summed into the transparent extinction.
///
/// Paths that are about to terminate keep their transparency, so this may take a slot even when
/// the flattener refuses every other closure.
pub fn transparent_setup(sd: &mut ShaderData, weight: Spectrum) {
    let sample_weight = weight.average().abs();
    if !(sample_weight >= CLOSURE_WEIGHT_CUTOFF) {
        return;
    }

    if sd.flag.contains(SdFlags::TRANSPARENT) {
        sd.closure_transparent_extinction += weight;
        if let Some(existing) = sd
            .closures
            .find_mut(|c| c.base.ty == ClosureType::BsdfTransparent)
        {
            existing.base.weight += weight;
            existing.base.sample_weight += sample_weight;
        }
        return;
    }

    sd.flag |= SdFlags::BSDF | SdFlags::TRANSPARENT;
    sd.closure_transparent_extinction = weight;
    let mut base = ClosureBase::new(ClosureType::BsdfTransparent, weight, sd.n);
    base.sample_weight = sample_weight;
    if sd
        .closures
        .alloc(ShaderClosure::new(base, ClosureModel::Transparent(TransparentBsdf)))
        .is_none()
    {
        trace!("no slot left for the transparent closure");
    }
}

/// Whether a leaf should still be flattened on a path that is about to terminate
#[must_use]
pub const fn survives_termination(ty: ClosureType, path_flag: PathFlags) -> bool {
    !path_flag.contains(PathFlags::TERMINATE)
        || matches!(ty, ClosureType::BsdfTransparent | ClosureType::Holdout)
        || !ty.is_bsdf()
}
