//! Ashikhmin's velvet, a microfacet style lobe that peaks at grazing angles.
use std::f64::consts;

use crate::{
    alloc::ExtraArena, utils::sample_uniform_hemisphere, Bsdf, BsdfEval, BsdfSample, ClosureBase,
    ClosureLabel, ClosureType, SdFlags, SetupContext, Spectrum, Vec3d,
};

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct VelvetBsdf {
    pub sigma: f64,
    pub invsigma2: f64,
}

impl VelvetBsdf {
    #[must_use]
    pub const fn new(sigma: f64) -> Self {
        Self {
            sigma,
            invsigma2: 0.0,
        }
    }

    fn value(&self, n: Vec3d, i: Vec3d, omega_in: Vec3d) -> f64 {
        let cos_no = n.dot(i);
        let cos_ni = n.dot(omega_in);
        if cos_no <= 0.0 || cos_ni <= 0.0 {
            return 0.0;
        }
        let Some(h) = (omega_in + i).try_normalize() else {
            return 0.0;
        };
        let cos_nh = n.dot(h);
        let cos_ho = i.dot(h).abs();
        if !(cos_nh.abs() < 1.0 - 1e-5 && cos_ho > 1e-5) {
            return 0.0;
        }
        let cos_nh_div_ho = (cos_nh / cos_ho).max(1e-5);
        let fac1 = 2.0 * (cos_nh_div_ho * cos_no).abs();
        let fac2 = 2.0 * (cos_nh_div_ho * cos_ni).abs();

        #[allow(clippy::suboptimal_flops)]
        let sin_nh2 = 1.0 - cos_nh * cos_nh;
        let sin_nh4 = sin_nh2 * sin_nh2;
        let cotangent2 = (cos_nh * cos_nh) / sin_nh2;

        let d = (-cotangent2 * self.invsigma2).exp() * self.invsigma2 * consts::FRAC_1_PI / sin_nh4;
        let g = fac1.min(fac2).min(1.0);
        0.25 * (d * g) / cos_no
    }
}

impl Bsdf for VelvetBsdf {
    fn setup(&mut self, base: &mut ClosureBase, _ctx: &mut SetupContext<'_>) -> SdFlags {
        let sigma = self.sigma.max(0.01);
        self.sigma = sigma;
        self.invsigma2 = 1.0 / (sigma * sigma);
        base.ty = ClosureType::BsdfAshikhminVelvet;
        SdFlags::BSDF | SdFlags::BSDF_HAS_EVAL
    }

    fn eval_reflect(
        &self,
        base: &ClosureBase,
        _extra: &ExtraArena,
        i: Vec3d,
        omega_in: Vec3d,
    ) -> BsdfEval {
        if base.n.dot(i) > 0.0 && base.n.dot(omega_in) > 0.0 {
            BsdfEval {
                eval: Spectrum::splat(self.value(base.n, i, omega_in)),
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
        if ng.dot(omega_in) > 0.0 && base.n.dot(i) > 0.0 && base.n.dot(omega_in) > 0.0 {
            BsdfSample {
                label,
                eval: Spectrum::splat(self.value(base.n, i, omega_in)),
                omega_in,
                pdf,
            }
        } else {
            BsdfSample::rejected(label, omega_in)
        }
    }
}
