//! Non-photorealistic closures with a hard edged falloff, one around the normal and one around the
//! mirror direction.
use std::f64::consts;

use crate::{
    alloc::ExtraArena,
    utils::{reflect, safe_acos, sample_uniform_cone, uniform_cone_pdf, FloatExt},
    Bsdf, BsdfEval, BsdfSample, ClosureBase, ClosureLabel, ClosureType, SdFlags, SetupContext,
    Spectrum, Vec3d,
};

/// Shared by the diffuse and the glossy toon closure, which one it is depends on the record's
/// type.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ToonBsdf {
    /// angular size of the lit area in \[0,1\], where 1 is a quarter turn
    pub size: f64,
    /// width of the ramp at the edge, same unit as `size`
    pub smooth: f64,
}

/// `1` inside `max_angle`, a linear ramp down to `0` over `smooth` radians, `0` beyond
#[must_use]
pub fn toon_intensity(max_angle: f64, smooth: f64, angle: f64) -> f64 {
    if angle < max_angle {
        1.0
    } else if angle < max_angle + smooth && smooth != 0.0 {
        1.0 - (angle - max_angle) / smooth
    } else {
        0.0
    }
}

fn sample_angle(max_angle: f64, smooth: f64) -> f64 {
    (max_angle + smooth).min(consts::FRAC_PI_2)
}

impl ToonBsdf {
    fn angles(&self) -> (f64, f64) {
        (
            self.size * consts::FRAC_PI_2,
            self.smooth * consts::FRAC_PI_2,
        )
    }

    /// the lobe is centered around this direction
    fn axis(base: &ClosureBase, i: Vec3d) -> Option<Vec3d> {
        if base.ty == ClosureType::BsdfGlossyToon {
            let cos_no = base.n.dot(i);
            (cos_no > 0.0).then(|| reflect(base.n, i))
        } else {
            Some(base.n)
        }
    }

    fn label(base: &ClosureBase) -> ClosureLabel {
        if base.ty == ClosureType::BsdfGlossyToon {
            ClosureLabel::GLOSSY | ClosureLabel::REFLECT
        } else {
            ClosureLabel::DIFFUSE | ClosureLabel::REFLECT
        }
    }
}

impl Bsdf for ToonBsdf {
    fn setup(&mut self, base: &mut ClosureBase, _ctx: &mut SetupContext<'_>) -> SdFlags {
        self.size = self.size.saturate();
        self.smooth = self.smooth.saturate();
        if base.ty != ClosureType::BsdfGlossyToon {
            base.ty = ClosureType::BsdfDiffuseToon;
        }
        SdFlags::BSDF | SdFlags::BSDF_HAS_EVAL
    }

    fn eval_reflect(
        &self,
        base: &ClosureBase,
        _extra: &ExtraArena,
        i: Vec3d,
        omega_in: Vec3d,
    ) -> BsdfEval {
        if base.n.dot(omega_in) <= 0.0 {
            return BsdfEval::ZERO;
        }
        let Some(axis) = Self::axis(base, i) else {
            return BsdfEval::ZERO;
        };
        let (max_angle, smooth) = self.angles();
        let angle = safe_acos(axis.dot(omega_in).max(0.0));
        let intensity = toon_intensity(max_angle, smooth, angle);
        if intensity > 0.0 {
            let pdf = uniform_cone_pdf(sample_angle(max_angle, smooth));
            BsdfEval {
                eval: Spectrum::splat(pdf * intensity),
                pdf,
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
        let label = Self::label(base);
        let Some(axis) = Self::axis(base, i) else {
            return BsdfSample::rejected(label, base.n);
        };
        let (max_angle, smooth) = self.angles();
        let cone = sample_angle(max_angle, smooth);
        if cone <= 0.0 {
            return BsdfSample::rejected(label, axis);
        }
        let (omega_in, pdf) = sample_uniform_cone(axis, cone, randu, randv);
        if ng.dot(omega_in) <= 0.0 || base.n.dot(omega_in) <= 0.0 {
            return BsdfSample::rejected(label, omega_in);
        }
        let angle = safe_acos(axis.dot(omega_in).max(0.0));
        let intensity = toon_intensity(max_angle, smooth, angle);
        if intensity > 0.0 {
            BsdfSample {
                label,
                eval: Spectrum::splat(pdf * intensity),
                omega_in,
                pdf,
            }
        } else {
            BsdfSample::rejected(label, omega_in)
        }
    }
}
