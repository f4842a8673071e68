pub trait ApproxEqual: Copy {
    fn equals_approx(self, other: Self, eps: Self, eps_rel: Self) -> bool;
    fn equals_approx_abs(self, other: Self, eps: Self) -> bool;
    fn equals_approx_rel(self, other: Self, eps: Self) -> bool;
}

macro_rules! assert_eq_approx {
    ($lhs:expr, $rhs:expr, $eps_abs:expr, $eps_rel:expr) => {
        assert!(
            $crate::test_utils::ApproxEqual::equals_approx($lhs, $rhs, $eps_abs, $eps_rel),
            r#"assert_eq_abs failed:
    {}: {:?}
    {}: {:?}
    {} (maximum absolute error): {:?}
    {} (maximum relative error): {:?}"#,
            stringify!($lhs),
            $lhs,
            stringify!($rhs),
            $rhs,
            stringify!($eps_abs),
            $eps_abs,
            stringify!($eps_rel),
            $eps_rel,
        );
    };

    ($lhs:expr, $rhs:expr, $eps_abs: expr, $eps_rel:expr, $($arg:tt)+) => {
        assert!(
            $crate::test_utils::ApproxEqual::equals_approx($lhs, $rhs, $eps_abs, $eps_rel),
            $($arg)*
        );
    }
}

macro_rules! assert_eq_approx_abs {
    ($lhs:expr, $rhs:expr, $eps_abs:expr) => {
        assert!(
            $crate::test_utils::ApproxEqual::equals_approx_abs($lhs, $rhs, $eps_abs),
            r#"assert_eq_abs failed:
    {}: {:?}
    {}: {:?}
    {} (maximum absolute error): {:?}"#,
            stringify!($lhs),
            $lhs,
            stringify!($rhs),
            $rhs,
            stringify!($eps_abs),
            $eps_abs,
        )
    };

    ($lhs:expr, $rhs:expr, $eps_abs:expr, $($arg:tt)+) => {
        assert!($crate::test_utils::ApproxEqual::equals_approx_abs($lhs, $rhs, $eps_abs),
        $($arg)*);
    };
}

macro_rules! assert_in_range {
    ($value:expr, $lower:expr, $upper:expr) => {
        assert!(
            $lower <= $value && $value <= $upper,
            r#"assert_in_range failed:
    {} (value): {:?}
    {} (lower bound): {:?}
    {} (upper bound): {:?}"#,
            stringify!($value),
            $value,
            stringify!($lower),
            $lower,
            stringify!($upper),
            $upper
        )
    };
}

macro_rules! impl_approx_equal {
    ($scalar:ty, $vector:ty) => {
        impl ApproxEqual for $scalar {
            fn equals_approx(self, other: Self, eps: Self, eps_rel: Self) -> bool {
                #[allow(clippy::float_cmp)]
                if self == other || (self - other).abs() <= eps {
                    true
                } else {
                    let diff = (self - other).abs();
                    let max = self.abs().max(other.abs());
                    diff <= max * eps_rel
                }
            }

            fn equals_approx_abs(self, other: Self, eps: Self) -> bool {
                #[allow(clippy::float_cmp)]
                if self == other {
                    true
                } else {
                    (self - other).abs() <= eps
                }
            }

            fn equals_approx_rel(self, other: Self, eps: Self) -> bool {
                #[allow(clippy::float_cmp)]
                if self == other {
                    return true;
                }
                let diff = (self - other).abs();
                let max = self.abs().max(other.abs());
                diff <= max * eps
            }
        }

        impl ApproxEqual for $vector {
            fn equals_approx_rel(self, other: Self, eps: Self) -> bool {
                $crate::test_utils::ApproxEqual::equals_approx_rel(self.x, other.x, eps.x)
                    && $crate::test_utils::ApproxEqual::equals_approx_rel(self.y, other.y, eps.y)
                    && $crate::test_utils::ApproxEqual::equals_approx_rel(self.z, other.z, eps.z)
            }
            fn equals_approx_abs(self, other: Self, eps: Self) -> bool {
                $crate::test_utils::ApproxEqual::equals_approx_abs(self.x, other.x, eps.x)
                    && $crate::test_utils::ApproxEqual::equals_approx_abs(self.y, other.y, eps.y)
                    && $crate::test_utils::ApproxEqual::equals_approx_abs(self.z, other.z, eps.z)
            }
            fn equals_approx(self, other: Self, eps_abs: Self, eps_rel: Self) -> bool {
                $crate::test_utils::ApproxEqual::equals_approx(
                    self.x, other.x, eps_abs.x, eps_rel.x,
                ) && $crate::test_utils::ApproxEqual::equals_approx(
                    self.y, other.y, eps_abs.y, eps_rel.y,
                ) && $crate::test_utils::ApproxEqual::equals_approx(
                    self.z, other.z, eps_abs.z, eps_rel.z,
                )
            }
        }
    };
}

impl_approx_equal!(f64, Vec3d);

use std::f64::consts;

pub(crate) use assert_eq_approx;
pub(crate) use assert_eq_approx_abs;
pub(crate) use assert_in_range;

use crate::{
    alloc::{ClosureList, ExtraArena, ExtraData, ExtraRef},
    closure::{ClosureModel, ShaderClosure},
    utils::VecExt,
    BsdfEval, BsdfSample, ClosureBase, ClosureType, SdFlags, SetupContext, Spectrum, Vec3d,
};

pub trait SamplerExt {
    fn vec3d(&mut self) -> Vec3d;
}

impl SamplerExt for fastrand::Rng {
    fn vec3d(&mut self) -> Vec3d {
        Vec3d::new(self.f64(), self.f64(), self.f64())
    }
}

/** sample a direction with density 1 / 4pi */
pub fn spherical_sample(rd: &mut fastrand::Rng) -> Vec3d {
    let u = rd.f64();
    let v = rd.f64();
    spherical_sample_uv(u, v)
}

/// like [`spherical_sample`] but mirrored into the upper hemisphere
pub fn upper_sample(rd: &mut fastrand::Rng) -> Vec3d {
    let v = spherical_sample(rd);
    Vec3d::new(v.x, v.y, v.z.abs().max(1e-3)).normalize()
}

fn spherical_sample_uv(u: f64, v: f64) -> Vec3d {
    #[allow(clippy::suboptimal_flops)]
    let cos_theta = 2.0 * u - 1.0;
    #[allow(clippy::suboptimal_flops)]
    let sin_theta = (1.0 - cos_theta * cos_theta).sqrt();
    let phi = v * 2.0 * consts::PI;
    let (sin_phi, cos_phi) = phi.sin_cos();
    Vec3d::new(sin_theta * sin_phi, sin_theta * cos_phi, cos_theta)
}

/// A single closure that has been set up at a shading point with `N = Ng = (0, 0, 1)`
pub struct TestClosure {
    pub list: ClosureList,
    pub flags: SdFlags,
}

impl TestClosure {
    pub fn closure(&self) -> &ShaderClosure {
        self.list.get(0).expect("the test closure was dropped")
    }

    pub fn extra(&self) -> &ExtraArena {
        self.list.extra()
    }

    pub fn eval(&self, i: Vec3d, omega_in: Vec3d) -> BsdfEval {
        self.closure().eval(self.extra(), Vec3d::Z, i, omega_in)
    }

    pub fn sample(&self, i: Vec3d, randu: f64, randv: f64) -> BsdfSample {
        self.closure().sample(self.extra(), Vec3d::Z, i, randu, randv)
    }
}

fn setup_first(mut list: ClosureList, i: Vec3d) -> TestClosure {
    let (record, extra) = list.record_and_extra_mut(0).expect("allocation failed");
    let mut ctx = SetupContext {
        i,
        ng: Vec3d::Z,
        dpdu: Vec3d::X,
        v: 0.0,
        ribbon: false,
        extra,
    };
    let flags = record.setup(&mut ctx);
    TestClosure { list, flags }
}

pub fn setup_closure(ty: ClosureType, model: ClosureModel) -> TestClosure {
    let mut list = ClosureList::new(4);
    list.alloc(ShaderClosure::new(
        ClosureBase::new(ty, Spectrum::ONE, Vec3d::Z),
        model,
    ))
    .expect("allocation failed");
    setup_first(list, Vec3d::Z)
}

pub fn setup_closure_with_extra(
    ty: ClosureType,
    extra: ExtraData,
    i: Vec3d,
    model: impl FnOnce(ExtraRef) -> ClosureModel,
) -> TestClosure {
    let mut list = ClosureList::new(4);
    list.alloc_with_extra(extra, |r| {
        ShaderClosure::new(ClosureBase::new(ty, Spectrum::ONE, Vec3d::Z), model(r))
    })
    .expect("allocation failed");
    setup_first(list, i)
}

/// Sampled values must agree with evaluating at the sampled direction
pub fn test_sample_eval(closure: &TestClosure) {
    let mut rd = fastrand::Rng::with_seed(0x5eed);
    let runs = 10000;
    let mut accepted = 0;
    for _ in 0..runs {
        let i = upper_sample(&mut rd);
        let sample = closure.sample(i, rd.f64(), rd.f64());
        assert!(sample.pdf >= 0.0 && sample.pdf.is_finite());
        assert!(
            sample.eval.is_finite_nonnegative(),
            "eval: {:?}, i: {i:?}",
            sample.eval
        );
        if sample.is_rejected() {
            continue;
        }
        accepted += 1;
        let BsdfEval { eval, pdf } = closure.eval(i, sample.omega_in);
        assert_eq_approx!(
            sample.pdf,
            pdf,
            1e-6,
            1e-3,
            r#"
    PDFs must be equal for sample and eval,
    sample pdf: {},
    eval pdf: {pdf},
    i: {i:?},
    omega_in: {:?}"#,
            sample.pdf,
            sample.omega_in
        );
        assert_eq_approx!(sample.eval, eval, Vec3d::splat(1e-6), Vec3d::splat(1e-3));
    }
    assert!(accepted > runs / 10, "only {accepted} samples were accepted");
}

/// Nothing is reflected from below the surface, and nothing is transmitted by closures without a
/// transmission lobe
pub fn test_hemisphere(closure: &TestClosure, transmissive: bool) {
    let mut rd = fastrand::Rng::with_seed(0xface);
    for _ in 0..10000 {
        let i = upper_sample(&mut rd);
        let mut omega_in = spherical_sample(&mut rd);
        omega_in.z = -omega_in.z.abs();
        let c = closure.closure();
        let r = c.eval_reflect(closure.extra(), i, omega_in);
        assert_eq!(r.eval, Spectrum::ZERO, "omega_in: {omega_in:?}");
        assert_eq!(r.pdf, 0.0, "omega_in: {omega_in:?}");
        if !transmissive {
            let t = c.eval_transmit(closure.extra(), i, spherical_sample(&mut rd));
            assert_eq!(t, BsdfEval::ZERO);
        }
    }
}

/// Same inputs give bit identical outputs
pub fn test_determinism(closure: &TestClosure) {
    let mut rd = fastrand::Rng::with_seed(0xd1ce);
    for _ in 0..1000 {
        let i = upper_sample(&mut rd);
        let (u, v) = (rd.f64(), rd.f64());
        let a = closure.sample(i, u, v);
        let b = closure.sample(i, u, v);
        assert_eq!(a.eval.to_array().map(f64::to_bits), b.eval.to_array().map(f64::to_bits));
        assert_eq!(a.pdf.to_bits(), b.pdf.to_bits());
        assert_eq!(a.omega_in, b.omega_in);
        let omega_in = spherical_sample(&mut rd);
        assert_eq!(closure.eval(i, omega_in), closure.eval(i, omega_in));
    }
}

/// The albedo estimated through sampling must not exceed one, and must not fall below
/// `1 - allowed_energy_loss`
#[allow(clippy::cast_lossless)]
pub fn test_energy_conservation(closure: &TestClosure, allowed_energy_loss: f64) {
    let mut rd = fastrand::Rng::with_seed(0xe4e4);
    let runs = 20;
    let num_samples = 50_000;
    for _ in 0..runs {
        let i = upper_sample(&mut rd);
        let mut sum = Spectrum::ZERO;
        let mut sum2 = Spectrum::ZERO;
        for _ in 0..num_samples {
            let sample = closure.sample(i, rd.f64(), rd.f64());
            if !sample.is_rejected() {
                let contrib = sample.eval / sample.pdf;
                sum += contrib;
                sum2 += contrib.sq();
            }
        }
        sum /= num_samples as f64;
        sum2 /= num_samples as f64;

        let variance =
            (sum2 - sum.sq()).average() * num_samples as f64 / (num_samples - 1) as f64;
        let std_error = (variance.abs() / num_samples as f64).sqrt();
        let confidence = (4.0 * std_error).max(1e-3);

        assert_in_range!(
            sum.average(),
            1.0 - confidence - allowed_energy_loss,
            1.0 + confidence
        );
    }
}

/// The density reported by eval must integrate to at most one over the sphere, and to at least
/// `min_mass`
#[allow(clippy::cast_lossless)]
pub fn test_pdf_integral(closure: &TestClosure, min_mass: f64) {
    const DOMAIN: f64 = 4.0 * std::f64::consts::PI;

    let mut rd = fastrand::Rng::with_seed(0x1d1d);
    let runs = 10;
    let num_samples = 200_000;
    for _ in 0..runs {
        let i = upper_sample(&mut rd);
        let mut sum = 0.0;
        let mut sum_of_squared = 0.0;
        for _ in 0..num_samples {
            let omega_in = spherical_sample(&mut rd);
            let value = closure.eval(i, omega_in).pdf * DOMAIN;
            sum += value;
            sum_of_squared += value * value;
        }
        sum /= num_samples as f64;
        sum_of_squared /= num_samples as f64;
        let variance = (sum_of_squared - sum * sum).max(0.0);
        let standard_error = (variance / num_samples as f64).sqrt();
        let confidence = (4.0 * standard_error).max(2e-3);
        assert_in_range!(sum, min_mass - confidence, 1.0 + confidence);
    }
}
