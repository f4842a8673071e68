//! The Beckmann distribution, sampled over all microfacet normals as in Walter et al.,
//! Microfacet Models for Refraction through Rough Surfaces, 2007.
use std::f64::consts;

use crate::{distribution::MicrofacetDistribution, utils::FloatExt, Vec3d};

#[derive(Clone, Copy, Debug)]
pub struct Beckmann {
    pub alpha_x: f64,
    pub alpha_y: f64,
}

impl MicrofacetDistribution for Beckmann {
    fn d(&self, m: Vec3d) -> f64 {
        if m.z <= 1e-10 {
            return 0.0;
        }
        let cos2 = m.z.sq();
        let tan2 = ((m.x / self.alpha_x).sq() + (m.y / self.alpha_y).sq()) / cos2;
        (-tan2).exp() / (consts::PI * self.alpha_x * self.alpha_y * cos2.sq())
    }

    /// Rational approximation of the Beckmann masking
    fn lambda(&self, omega: Vec3d) -> f64 {
        let projected = ((self.alpha_x * omega.x).sq() + (self.alpha_y * omega.y).sq()).sqrt();
        if projected < 1e-12 {
            return 0.0;
        }
        let a = omega.z.abs() / projected;
        if a >= 1.6 {
            return 0.0;
        }
        #[allow(clippy::suboptimal_flops)]
        let lambda = (1.0 - 1.259 * a + 0.396 * a.sq()) / (3.535 * a + 2.181 * a.sq());
        lambda
    }

    fn sample_m(&self, _omega_o: Vec3d, r1: f64, r2: f64) -> Vec3d {
        let (sin_t, cos_t) = (2.0 * consts::PI * r2).sin_cos();
        let phi = (self.alpha_y * sin_t).atan2(self.alpha_x * cos_t);
        let (sin_phi, cos_phi) = phi.sin_cos();
        let inv_a2 = (cos_phi / self.alpha_x).sq() + (sin_phi / self.alpha_y).sq();
        let tan2 = -(1.0 - r1).max(1e-300).ln() / inv_a2;
        let cos_theta = 1.0 / (1.0 + tan2).sqrt();
        let sin_theta = (1.0 - cos_theta.sq()).max(0.0).sqrt();
        Vec3d::new(sin_theta * cos_phi, sin_theta * sin_phi, cos_theta)
    }

    fn pdf_m(&self, _omega_o: Vec3d, m: Vec3d) -> f64 {
        self.d(m) * m.z.max(0.0)
    }
}
