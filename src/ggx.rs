//! An implementation of the GGX Distribution

use crate::{distribution::MicrofacetDistribution, utils::FloatExt, Vec3d};
use std::f64::consts;

/// This is the common microsurface model to describe anisotropic rough surfaces. It backs the
/// `microfacet_ggx*` closures and the masking of the clear coat.
///
/// # Mathematical background
/// * [Understanding the Masking-Shadowing Function in Microfacet-Based BRDFs][masking]
/// * [Sampling the GGX Distribution of Visible Normals](https://jcgt.org/published/0007/04/01/)
///
/// [masking]: https://jcgt.org/published/0003/02/03/
#[derive(Clone, Copy, Debug)]
pub struct GGX {
    /// roughness in direction x
    /// This roughness values are not perceived linearly, closures map their user facing
    /// roughness with `alpha = roughness^2`.
    pub alpha_x: f64,

    /// roughness in direction y
    pub alpha_y: f64,
}

impl GGX {
    #[must_use]
    pub const fn isotropic(alpha: f64) -> Self {
        Self {
            alpha_x: alpha,
            alpha_y: alpha,
        }
    }

    /// Distribution of normals / Normal Distribution Function
    /// This is the $D$ term in typical Cook-Torance / GGX model
    #[must_use]
    pub fn ndf(&self, m: Vec3d) -> f64 {
        if m.z <= 1e-10 {
            return 0.0;
        }
        let denom = consts::PI
            * self.alpha_x
            * self.alpha_y
            * ((m.x / self.alpha_x).sq() + (m.y / self.alpha_y).sq() + (m.z).sq()).sq();
        1.0 / denom
    }

    /// Density of visible normals for the outgoing direction
    #[must_use]
    pub fn vndf(&self, omega_o: Vec3d, m: Vec3d) -> f64 {
        if omega_o.z.abs() < 1e-10 {
            return 0.0;
        }
        self.g1(omega_o, m) * omega_o.dot(m).clamp(0.0, 1.0) * self.ndf(m) / omega_o.z.abs()
    }

    #[must_use]
    pub fn sample_vndf(&self, omega_o: Vec3d, r1: f64, r2: f64) -> Vec3d {
        let v_h: Vec3d = Vec3d::new(
            omega_o.x * self.alpha_x,
            omega_o.y * self.alpha_y,
            omega_o.z,
        )
        .normalize();

        #[allow(clippy::suboptimal_flops)]
        let lensq = v_h.x * v_h.x + v_h.y * v_h.y;
        let at1: Vec3d = if lensq > (1.0e-10) {
            Vec3d::new(-v_h.y, v_h.x, 0.0) / f64::sqrt(lensq)
        } else {
            Vec3d::new(1.0, 0.0, 0.0)
        };
        let at2: Vec3d = Vec3d::cross(v_h, at1);

        let r = r1.sqrt();
        let phi: f64 = (2.0) * consts::PI * r2;
        let t1 = r * phi.cos();
        let t2 = r * phi.sin();
        let s: f64 = (0.5) * ((1.0) + v_h.z);

        #[allow(clippy::suboptimal_flops)]
        let t2r = (1.0 - s) * (1.0 - t1 * t1).sqrt() + s * t2;

        #[allow(clippy::suboptimal_flops)]
        let m_h: Vec3d = at1 * t1 + at2 * t2r + v_h * (1.0 - t1 * t1 - t2r * t2r).max(0.0).sqrt();

        Vec3d::new(
            self.alpha_x * m_h.x,
            self.alpha_y * m_h.y,
            f64::max(0.0, m_h.z),
        )
        .normalize()
    }
}

impl MicrofacetDistribution for GGX {
    fn d(&self, m: Vec3d) -> f64 {
        self.ndf(m)
    }

    fn lambda(&self, omega: Vec3d) -> f64 {
        if omega.z.abs() < 1e-10 {
            return f64::INFINITY;
        }
        let tan2 = ((self.alpha_x * omega.x).sq() + (self.alpha_y * omega.y).sq()) / omega.z.sq();
        0.5 * ((1.0 + tan2).sqrt() - 1.0)
    }

    fn sample_m(&self, omega_o: Vec3d, r1: f64, r2: f64) -> Vec3d {
        self.sample_vndf(omega_o, r1, r2)
    }

    fn pdf_m(&self, omega_o: Vec3d, m: Vec3d) -> f64 {
        self.vndf(omega_o, m)
    }
}
