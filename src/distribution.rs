//! The interface shared by all microfacet normal distributions, plus the GTR1 distribution used
//! by clear coats.
//!
//! All functions work in the local frame of the surface, `z` is the macro normal.
use std::f64::consts;

use crate::{ggx::GGX, utils::FloatExt, Vec3d};

/// A distribution of microfacet normals together with its Smith masking function
pub trait MicrofacetDistribution {
    /// Distribution of normals / Normal Distribution Function
    fn d(&self, m: Vec3d) -> f64;

    /// Smith's auxiliary function, `G1 = 1 / (1 + lambda)`
    fn lambda(&self, omega: Vec3d) -> f64;

    /// Draws a microfacet normal for the outgoing direction `omega_o`
    fn sample_m(&self, omega_o: Vec3d, r1: f64, r2: f64) -> Vec3d;

    /// The density of [`MicrofacetDistribution::sample_m`] over microfacet normals
    fn pdf_m(&self, omega_o: Vec3d, m: Vec3d) -> f64;

    /// Masking of `omega` by the microsurface, zero if `omega` sees the back of `m`
    fn g1(&self, omega: Vec3d, m: Vec3d) -> f64 {
        if omega.dot(m) * omega.z <= 0.0 {
            0.0
        } else {
            1.0 / (1.0 + self.lambda(omega))
        }
    }
}

/// Berry's distribution as used for the clear coat of the principled shader. The masking uses
/// GGX with a fixed roughness of 0.25.
#[derive(Clone, Copy, Debug)]
pub struct Gtr1 {
    pub alpha: f64,
}

const CLEARCOAT_MASKING: GGX = GGX {
    alpha_x: 0.25,
    alpha_y: 0.25,
};

impl MicrofacetDistribution for Gtr1 {
    fn d(&self, m: Vec3d) -> f64 {
        if m.z <= 0.0 {
            return 0.0;
        }
        if self.alpha >= 1.0 {
            return consts::FRAC_1_PI;
        }
        let alpha2 = self.alpha.sq();
        #[allow(clippy::suboptimal_flops)]
        let t = 1.0 + (alpha2 - 1.0) * m.z.sq();
        (alpha2 - 1.0) / (consts::PI * alpha2.ln() * t)
    }

    fn lambda(&self, omega: Vec3d) -> f64 {
        CLEARCOAT_MASKING.lambda(omega)
    }

    fn sample_m(&self, _omega_o: Vec3d, r1: f64, r2: f64) -> Vec3d {
        let alpha2 = self.alpha.sq();
        let cos_theta = if self.alpha >= 1.0 {
            // D is constant, cosine distributed normals
            (1.0 - r1).sqrt()
        } else {
            ((1.0 - alpha2.powf(1.0 - r1)) / (1.0 - alpha2)).max(0.0).sqrt()
        };
        let sin_theta = (1.0 - cos_theta.sq()).max(0.0).sqrt();
        let (sin_phi, cos_phi) = (2.0 * consts::PI * r2).sin_cos();
        Vec3d::new(sin_theta * cos_phi, sin_theta * sin_phi, cos_theta)
    }

    fn pdf_m(&self, _omega_o: Vec3d, m: Vec3d) -> f64 {
        self.d(m) * m.z.max(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::{Gtr1, MicrofacetDistribution};
    use crate::{
        beckmann::Beckmann,
        ggx::GGX,
        test_utils::{assert_eq_approx_abs, upper_sample},
        Vec3d,
    };

    /// the projected area of the microsurface equals the macro surface
    fn projected_area<D: MicrofacetDistribution>(dist: &D) {
        let mut rd = fastrand::Rng::with_seed(42);
        let num_samples = 400_000;
        let mut sum = 0.0;
        for _ in 0..num_samples {
            let m = upper_sample(&mut rd);
            // uniform hemisphere density is 1 / 2pi
            sum += dist.d(m) * m.z * 2.0 * std::f64::consts::PI;
        }
        assert_eq_approx_abs!(sum / f64::from(num_samples), 1.0, 0.03);
    }

    fn sampled_normals_match_density<D: MicrofacetDistribution>(dist: &D) {
        let mut rd = fastrand::Rng::with_seed(7);
        for _ in 0..1000 {
            let wo = upper_sample(&mut rd);
            let m = dist.sample_m(wo, rd.f64(), rd.f64());
            assert!(m.is_normalized());
            assert!(dist.pdf_m(wo, m) >= 0.0);
        }
    }

    #[test]
    fn ggx() {
        let dist = GGX {
            alpha_x: 0.5,
            alpha_y: 0.3,
        };
        projected_area(&dist);
        sampled_normals_match_density(&dist);
    }

    #[test]
    fn beckmann() {
        let dist = Beckmann {
            alpha_x: 0.4,
            alpha_y: 0.6,
        };
        projected_area(&dist);
        sampled_normals_match_density(&dist);
    }

    #[test]
    fn gtr1() {
        let dist = Gtr1 { alpha: 0.3 };
        projected_area(&dist);
        sampled_normals_match_density(&dist);
    }

    #[test]
    fn smooth_surfaces_do_not_mask() {
        let dist = GGX {
            alpha_x: 1e-4,
            alpha_y: 1e-4,
        };
        let omega = Vec3d::new(0.6, 0.0, 0.8);
        assert_eq_approx_abs!(dist.g1(omega, Vec3d::Z), 1.0, 1e-6);
    }
}
