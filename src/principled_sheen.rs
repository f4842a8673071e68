//! Sheen lobe of the principled shader, a grazing angle retro-reflection for cloth
use std::f64::consts;

use crate::{
    alloc::ExtraArena,
    utils::{sample_cos_hemisphere, schlick_fresnel},
    Bsdf, BsdfEval, BsdfSample, ClosureBase, ClosureLabel, ClosureType, SdFlags, SetupContext,
    Spectrum, Vec3d,
};

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PrincipledSheenBsdf {
    /// albedo estimate for the viewing direction of the setup
    pub avg_value: f64,
}

/// Average value of the lobe for the viewing direction `i`. The half vector is taken to be the
/// normal, so `NdotI = NdotL = NdotV = LdotH`.
#[must_use]
pub fn average_sheen(n: Vec3d, i: Vec3d) -> f64 {
    let n_dot_i = n.dot(i);
    if n_dot_i < 0.0 {
        return 0.0;
    }
    schlick_fresnel(n_dot_i) * n_dot_i
}

fn sheen(n: Vec3d, v: Vec3d, l: Vec3d) -> f64 {
    let n_dot_l = n.dot(l);
    let n_dot_v = n.dot(v);
    if n_dot_l < 0.0 || n_dot_v < 0.0 {
        return 0.0;
    }
    let Some(h) = (l + v).try_normalize() else {
        return 0.0;
    };
    schlick_fresnel(l.dot(h)) * n_dot_l
}

impl Bsdf for PrincipledSheenBsdf {
    fn setup(&mut self, base: &mut ClosureBase, ctx: &mut SetupContext<'_>) -> SdFlags {
        self.avg_value = average_sheen(base.n, ctx.i);
        base.sample_weight *= self.avg_value;
        base.ty = ClosureType::BsdfPrincipledSheen;
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
                eval: Spectrum::splat(sheen(base.n, i, omega_in)),
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
                eval: Spectrum::splat(sheen(base.n, i, omega_in)),
                omega_in,
                pdf,
            }
        } else {
            BsdfSample::rejected(label, omega_in)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{average_sheen, PrincipledSheenBsdf};
    use crate::{
        alloc::ClosureList,
        closure::{ClosureModel, ShaderClosure},
        test_utils::{self, assert_eq_approx_abs},
        ClosureBase, ClosureType, SetupContext, Spectrum, Vec3d,
    };

    #[test]
    fn principled_sheen() {
        let closure = test_utils::setup_closure(
            ClosureType::BsdfPrincipledSheen,
            ClosureModel::PrincipledSheen(PrincipledSheenBsdf::default()),
        );
        test_utils::test_sample_eval(&closure);
        test_utils::test_hemisphere(&closure, false);
        test_utils::test_determinism(&closure);
        // sheen is a small lobe, most light goes elsewhere
        test_utils::test_energy_conservation(&closure, 1.0);
    }

    #[test]
    fn sample_weight_follows_average() {
        let mut list = ClosureList::new(2);
        list.alloc(ShaderClosure::new(
            ClosureBase::new(ClosureType::BsdfPrincipledSheen, Spectrum::ONE, Vec3d::Z),
            ClosureModel::PrincipledSheen(PrincipledSheenBsdf::default()),
        ))
        .unwrap();
        let i = Vec3d::new(0.8, 0.0, 0.6);
        let (record, extra) = list.record_and_extra_mut(0).unwrap();
        record.setup(&mut SetupContext {
            i,
            ng: Vec3d::Z,
            dpdu: Vec3d::X,
            v: 0.0,
            ribbon: false,
            extra,
        });
        let expected = 0.4_f64.powi(5) * 0.6;
        assert_eq_approx_abs!(average_sheen(Vec3d::Z, i), expected, 1e-12);
        assert_eq_approx_abs!(list.get(0).unwrap().base.sample_weight, expected, 1e-12);
    }

    #[test]
    fn no_sheen_from_behind() {
        assert_eq_approx_abs!(average_sheen(Vec3d::Z, -Vec3d::Z), 0.0, 0.0);
    }
}
