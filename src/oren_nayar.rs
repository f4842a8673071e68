//! Rough diffuse reflection after Oren and Nayar, in the qualitative form with the `A` and `B`
//! terms folded into one normalization.
use std::f64::consts;

use crate::{
    alloc::ExtraArena,
    utils::{sample_uniform_hemisphere, FloatExt},
    Bsdf, BsdfEval, BsdfSample, ClosureBase, ClosureLabel, ClosureType, SdFlags, SetupContext,
    Spectrum, Vec3d,
};

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct OrenNayarBsdf {
    /// standard deviation of the facet angles, in \[0,1\]
    pub roughness: f64,
    pub a: f64,
    pub b: f64,
}

impl OrenNayarBsdf {
    #[must_use]
    pub const fn new(roughness: f64) -> Self {
        Self {
            roughness,
            a: 0.0,
            b: 0.0,
        }
    }

    /// The reflected intensity with the cosine of `l` multiplied in
    #[must_use]
    pub fn intensity(&self, n: Vec3d, v: Vec3d, l: Vec3d) -> f64 {
        let nl = n.dot(l).max(0.0);
        let nv = n.dot(v).max(0.0);
        #[allow(clippy::suboptimal_flops)]
        let mut t = l.dot(v) - nl * nv;

        if t > 0.0 {
            t /= nl.max(nv) + f64::MIN_POSITIVE;
        }
        #[allow(clippy::suboptimal_flops)]
        {
            nl * (self.a + self.b * t)
        }
    }
}

impl Bsdf for OrenNayarBsdf {
    fn setup(&mut self, base: &mut ClosureBase, _ctx: &mut SetupContext<'_>) -> SdFlags {
        let sigma = self.roughness.saturate();
        #[allow(clippy::suboptimal_flops)]
        let div = 1.0 / (consts::PI + (3.0 * consts::PI - 4.0) / 6.0 * sigma);

        self.roughness = sigma;
        self.a = div;
        self.b = sigma * div;
        base.ty = ClosureType::BsdfOrenNayar;
        SdFlags::BSDF | SdFlags::BSDF_HAS_EVAL
    }

    fn eval_reflect(
        &self,
        base: &ClosureBase,
        _extra: &ExtraArena,
        i: Vec3d,
        omega_in: Vec3d,
    ) -> BsdfEval {
        if base.n.dot(omega_in) > 0.0 {
            BsdfEval {
                eval: Spectrum::splat(self.intensity(base.n, i, omega_in)),
                pdf: 0.5 * consts::FRAC_1_PI,
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
        let (omega_in, pdf) = sample_uniform_hemisphere(base.n, randu, randv);
        if ng.dot(omega_in) > 0.0 {
            BsdfSample {
                label,
                eval: Spectrum::splat(self.intensity(base.n, i, omega_in)),
                omega_in,
                pdf,
            }
        } else {
            BsdfSample::rejected(label, omega_in)
        }
    }
}
