//! The simple hair model with one reflection and one transmission lobe, parameterized over the
//! longitudinal angle to the curve tangent and the azimuth around it.
use std::f64::consts;

use crate::{
    alloc::ExtraArena, utils::safe_acos, utils::safe_asin, Bsdf, BsdfEval, BsdfSample,
    ClosureBase, ClosureLabel, ClosureType, SdFlags, SetupContext, Spectrum, Vec3d,
};

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct HairBsdf {
    /// longitudinal roughness
    pub roughness1: f64,
    /// azimuthal roughness
    pub roughness2: f64,
    /// tilt of the cuticle scales in radians
    pub offset: f64,
    /// curve tangent
    pub t: Vec3d,
}

/// Angles of a direction relative to the hair fiber
struct FiberFrame {
    /// projection of `I` perpendicular to the tangent
    locy: Vec3d,
    locx: Vec3d,
    theta_r: f64,
}

impl HairBsdf {
    #[must_use]
    pub const fn new(roughness1: f64, roughness2: f64, offset: f64, t: Vec3d) -> Self {
        Self {
            roughness1,
            roughness2,
            offset,
            t,
        }
    }

    fn frame(&self, i: Vec3d) -> Option<FiberFrame> {
        let iz = self.t.dot(i);
        let locy = (i - self.t * iz).try_normalize()?;
        Some(FiberFrame {
            locy,
            locx: locy.cross(self.t),
            theta_r: consts::FRAC_PI_2 - safe_acos(iz),
        })
    }

    /// bounds of the sampled longitudinal offsets, `(a, b)` with `a > b`
    fn theta_bounds(&self, theta_r: f64) -> (f64, f64) {
        let inv = 1.0 / self.roughness1;
        let a = (((consts::FRAC_PI_2 + theta_r) * 0.5 - self.offset) * inv).atan();
        let b = (((-consts::FRAC_PI_2 + theta_r) * 0.5 - self.offset) * inv).atan();
        (a, b)
    }

    fn theta_pdf(&self, t: f64, a: f64, b: f64, cos_theta_i: f64) -> f64 {
        let r1 = self.roughness1;
        #[allow(clippy::suboptimal_flops)]
        let pdf = r1 / (2.0 * (t * t + r1 * r1) * (a - b) * cos_theta_i);
        pdf
    }

    fn reflection_phi_pdf(&self, phi: f64) -> f64 {
        let scaled = phi.abs() / self.roughness2;
        if scaled >= consts::PI {
            0.0
        } else {
            (scaled * 0.5).cos() * 0.25 / self.roughness2
        }
    }

    /// normalization of the truncated azimuthal lobe of the transmission
    fn c_tt(&self) -> f64 {
        2.0 * (consts::FRAC_PI_2 / self.roughness2).atan()
    }

    fn transmission_phi_pdf(&self, p: f64) -> f64 {
        let r2 = self.roughness2;
        if p.abs() > consts::FRAC_PI_2 {
            return 0.0;
        }
        #[allow(clippy::suboptimal_flops)]
        let pdf = r2 / (self.c_tt() * (p * p + r2 * r2));
        pdf
    }

    fn is_transmission(base: &ClosureBase) -> bool {
        base.ty == ClosureType::BsdfHairTransmission
    }

    fn eval_lobe(&self, base: &ClosureBase, i: Vec3d, omega_in: Vec3d) -> f64 {
        let Some(frame) = self.frame(i) else {
            return 0.0;
        };
        let omega_in_z = self.t.dot(omega_in);
        let Some(omega_in_y) = (omega_in - self.t * omega_in_z).try_normalize() else {
            return 0.0;
        };
        let theta_i = consts::FRAC_PI_2 - safe_acos(omega_in_z);
        if consts::FRAC_PI_2 - theta_i.abs() < 0.001 {
            return 0.0;
        }
        let cos_phi_i = omega_in_y.dot(frame.locy);
        let (a, b) = self.theta_bounds(frame.theta_r);
        let t = (theta_i + frame.theta_r) * 0.5 - self.offset;
        let theta_pdf = self.theta_pdf(t, a, b, theta_i.cos());

        let phi_pdf = if Self::is_transmission(base) {
            let phi = safe_acos(cos_phi_i);
            self.transmission_phi_pdf(consts::PI - phi)
        } else {
            if cos_phi_i < 0.0 {
                return 0.0;
            }
            self.reflection_phi_pdf(safe_acos(cos_phi_i))
        };
        phi_pdf * theta_pdf
    }
}

impl Bsdf for HairBsdf {
    fn setup(&mut self, base: &mut ClosureBase, ctx: &mut SetupContext<'_>) -> SdFlags {
        self.roughness1 = self.roughness1.clamp(0.001, 1.0);
        self.roughness2 = self.roughness2.clamp(0.001, 1.0);
        self.t = self
            .t
            .try_normalize()
            .or_else(|| ctx.dpdu.try_normalize())
            .unwrap_or(Vec3d::X);
        if Self::is_transmission(base) {
            SdFlags::BSDF | SdFlags::BSDF_HAS_EVAL | SdFlags::BSDF_HAS_TRANSMISSION
        } else {
            base.ty = ClosureType::BsdfHairReflection;
            SdFlags::BSDF | SdFlags::BSDF_HAS_EVAL
        }
    }

    fn eval_reflect(
        &self,
        base: &ClosureBase,
        _extra: &ExtraArena,
        i: Vec3d,
        omega_in: Vec3d,
    ) -> BsdfEval {
        if Self::is_transmission(base) || base.n.dot(omega_in) < 0.0 {
            return BsdfEval::ZERO;
        }
        BsdfEval::splat(self.eval_lobe(base, i, omega_in))
    }

    fn eval_transmit(
        &self,
        base: &ClosureBase,
        _extra: &ExtraArena,
        i: Vec3d,
        omega_in: Vec3d,
    ) -> BsdfEval {
        if !Self::is_transmission(base) || base.n.dot(omega_in) >= 0.0 {
            return BsdfEval::ZERO;
        }
        BsdfEval::splat(self.eval_lobe(base, i, omega_in))
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
        let transmission = Self::is_transmission(base);
        let label = if transmission {
            ClosureLabel::GLOSSY | ClosureLabel::TRANSMIT
        } else {
            ClosureLabel::GLOSSY | ClosureLabel::REFLECT
        };
        let Some(frame) = self.frame(i) else {
            return BsdfSample::rejected(label, base.n);
        };
        let (a, b) = self.theta_bounds(frame.theta_r);
        let t = self.roughness1 * randu.mul_add(a - b, b).tan();
        let theta_i = 2.0f64.mul_add(t + self.offset, -frame.theta_r);
        let (sin_theta_i, cos_theta_i) = theta_i.sin_cos();

        let (phi, phi_pdf) = if transmission {
            let p = self.roughness2 * (self.c_tt() * (randv - 0.5)).tan();
            (p + consts::PI, self.transmission_phi_pdf(p))
        } else {
            let phi = 2.0 * safe_asin(2.0f64.mul_add(-randv, 1.0)) * self.roughness2;
            (phi, self.reflection_phi_pdf(phi))
        };
        let (sin_phi, cos_phi) = phi.sin_cos();
        let omega_in = frame.locy * (cos_phi * cos_theta_i) - frame.locx * (sin_phi * cos_theta_i)
            + self.t * sin_theta_i;

        let side = ng.dot(omega_in);
        let wrong_side = if transmission {
            side >= 0.0 || base.n.dot(omega_in) >= 0.0
        } else {
            side <= 0.0 || base.n.dot(omega_in) < 0.0 || cos_phi < 0.0
        };
        if wrong_side || consts::FRAC_PI_2 - theta_i.abs() < 0.001 {
            return BsdfSample::rejected(label, omega_in);
        }

        let pdf = (phi_pdf * self.theta_pdf(t, a, b, cos_theta_i)).abs();
        if !(pdf > 0.0 && pdf.is_finite()) {
            return BsdfSample::rejected(label, omega_in);
        }
        BsdfSample {
            label,
            eval: Spectrum::splat(pdf),
            omega_in,
            pdf,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::HairBsdf;
    use crate::{
        closure::ClosureModel,
        test_utils::{self, assert_eq_approx_abs},
        ClosureLabel, ClosureType, SdFlags, Vec3d,
    };

    fn hair(ty: ClosureType, r1: f64, r2: f64, offset: f64) -> test_utils::TestClosure {
        test_utils::setup_closure(ty, ClosureModel::Hair(HairBsdf::new(r1, r2, offset, Vec3d::X)))
    }

    #[test]
    fn hair_reflection() {
        for (r1, r2, offset) in [(0.1, 0.3, 0.0), (0.3, 0.9, 0.05), (1.0, 1.0, -0.05)] {
            let closure = hair(ClosureType::BsdfHairReflection, r1, r2, offset);
            assert_eq!(closure.flags, SdFlags::BSDF | SdFlags::BSDF_HAS_EVAL);
            test_utils::test_sample_eval(&closure);
            test_utils::test_hemisphere(&closure, false);
            test_utils::test_determinism(&closure);
            test_utils::test_energy_conservation(&closure, 1.0);
            test_utils::test_pdf_integral(&closure, 0.0);
        }
    }

    #[test]
    fn hair_transmission() {
        for (r1, r2, offset) in [(0.1, 0.3, 0.0), (0.5, 0.5, 0.05)] {
            let closure = hair(ClosureType::BsdfHairTransmission, r1, r2, offset);
            assert!(closure.flags.contains(SdFlags::BSDF_HAS_TRANSMISSION));
            test_utils::test_hemisphere(&closure, true);
            test_utils::test_determinism(&closure);
            test_utils::test_pdf_integral(&closure, 0.0);

            let mut rd = fastrand::Rng::with_seed(31);
            let mut accepted = 0;
            for _ in 0..10_000 {
                let i = test_utils::upper_sample(&mut rd);
                let sample = closure.sample(i, rd.f64(), rd.f64());
                if sample.is_rejected() {
                    continue;
                }
                accepted += 1;
                assert!(sample.label.contains(ClosureLabel::TRANSMIT));
                let eval = closure.eval(i, sample.omega_in);
                assert_eq_approx_abs!(eval.pdf, sample.pdf, 1e-6 * sample.pdf.max(1.0));
            }
            assert!(accepted > 1000);
        }
    }

    #[test]
    fn roughness_is_clamped() {
        let closure = hair(ClosureType::BsdfHairReflection, 0.0, 3.0, 0.0);
        let ClosureModel::Hair(bsdf) = closure.closure().model else {
            panic!("wrong model");
        };
        assert_eq_approx_abs!(bsdf.roughness1, 0.001, 0.0);
        assert_eq_approx_abs!(bsdf.roughness2, 1.0, 0.0);
    }

    #[test]
    fn missing_tangent_falls_back_to_dpdu() {
        let closure = test_utils::setup_closure(
            ClosureType::BsdfHairReflection,
            ClosureModel::Hair(HairBsdf::new(0.2, 0.2, 0.0, Vec3d::ZERO)),
        );
        let ClosureModel::Hair(bsdf) = closure.closure().model else {
            panic!("wrong model");
        };
        assert_eq!(bsdf.t, Vec3d::X);
    }
}
