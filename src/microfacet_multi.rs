//! Multiple scattering GGX after Heitz et al., Multiple-Scattering Microfacet BSDFs with the Smith
//! Model, 2016.
//!
//! Light performs a random walk over a microsurface with uniformly distributed heights. Evaluation
//! is stochastic: the single scattering term is computed analytically, higher orders are estimated
//! along one random walk. The walk draws its random numbers from an [`Lcg`].
//!
//! All directions are in the local frame of the surface, `wi` is the direction towards the viewer.
use std::f64::consts;

use crate::{
    ggx::GGX,
    utils::{beta, fresnel_dielectric_cos, interpolate_fresnel_color, safe_sqrt, FloatExt, Lcg},
    Spectrum, Vec3d,
};

/// Upper bound on the number of bounces of the random walk
const MAX_ORDER: usize = 10;

/// Parameters of one multiple scattering closure
#[derive(Clone, Copy, Debug)]
pub struct MultiScatter {
    pub alpha_x: f64,
    pub alpha_y: f64,
    /// relative index of refraction, also used by the fresnel tint
    pub eta: f64,
    /// tint applied on every bounce after the first
    pub color: Spectrum,
    /// colour at normal incidence, enables the fresnel tint
    pub cspec0: Option<Spectrum>,
}

fn mf_lambda(w: Vec3d, alpha_x: f64, alpha_y: f64) -> f64 {
    if w.z > 0.9999 {
        return 0.0;
    } else if w.z < -0.9999 {
        return -0.9999;
    }
    let inv_wz2 = 1.0 / w.z.sq().max(1e-7);
    let wa = (w.x * alpha_x).sq() + (w.y * alpha_y).sq();
    let mut v = (1.0 + wa * inv_wz2).sqrt();
    if w.z <= 0.0 {
        v = -v;
    }
    0.5 * (v - 1.0)
}

/// height to cumulative height distribution, for the uniform distribution on `[-1, 1]`
fn mf_c1(h: f64) -> f64 {
    (0.5 * (h + 1.0)).saturate()
}

fn mf_inv_c1(c1: f64) -> f64 {
    2.0f64.mul_add(c1.saturate(), -1.0)
}

fn mf_g1(w: Vec3d, c1: f64, lambda: f64) -> f64 {
    if w.z > 0.9999 {
        1.0
    } else if w.z < 1e-5 {
        0.0
    } else {
        c1.powf(lambda)
    }
}

/// State of a ray walking over the microsurface
struct Walker {
    /// direction of travel
    wr: Vec3d,
    hr: f64,
    c1: f64,
    g1: f64,
    lambda: f64,
}

impl Walker {
    /// Samples the height of the next intersection. Returns false if the ray leaves the surface.
    fn sample_height(&mut self, u: f64) -> bool {
        let w = self.wr;
        if w.z > 0.9999 {
            return false;
        }
        if w.z < -0.9999 {
            self.c1 *= u;
            self.hr = mf_inv_c1(self.c1);
            self.g1 = mf_g1(w, self.c1, self.lambda);
        } else if w.z.abs() >= 0.0001 {
            if u > 1.0 - self.g1 {
                return false;
            }
            if self.lambda >= 0.0 {
                self.c1 = 1.0;
            } else {
                self.c1 *= (1.0 - u).powf(-1.0 / self.lambda);
            }
            self.hr = mf_inv_c1(self.c1);
            self.g1 = mf_g1(w, self.c1, self.lambda);
        }
        true
    }
}

/// Slopes of visible normals for the unit roughness configuration, works for directions below the
/// horizon as well
#[allow(clippy::suboptimal_flops)]
fn sample_p22_11(cos_i: f64, randx: f64, randy: f64) -> (f64, f64) {
    if cos_i > 0.9999 || cos_i.abs() < 1e-6 {
        let r = (randx / (1.0 - randx).max(1e-7)).sqrt();
        let (sin_phi, cos_phi) = (2.0 * consts::PI * randy).sin_cos();
        return (r * cos_phi, r * sin_phi);
    }

    let sin_i = safe_sqrt(1.0 - cos_i * cos_i);
    let tan_i = sin_i / cos_i;
    let proj_a = 0.5 * (cos_i + 1.0);
    if proj_a < 0.0001 {
        return (0.0, 0.0);
    }
    let a = 2.0 * randx * proj_a / cos_i - 1.0;
    let mut tmp = a * a - 1.0;
    if tmp.abs() < 1e-7 {
        return (0.0, 0.0);
    }
    tmp = 1.0 / tmp;
    let d = safe_sqrt(tan_i * tan_i * tmp * tmp - (a * a - tan_i * tan_i) * tmp);

    let slope_x2 = tan_i * tmp + d;
    let slope_x = if a < 0.0 || slope_x2 > 1.0 / tan_i {
        tan_i * tmp - d
    } else {
        slope_x2
    };

    let u2 = if randy >= 0.5 {
        2.0 * (randy - 0.5)
    } else {
        2.0 * (0.5 - randy)
    };
    let z = (u2 * (u2 * (u2 * 0.27385 - 0.73369) + 0.46341))
        / (u2 * (u2 * (u2 * 0.093_073 + 0.309_420) - 1.0) + 0.597_999);
    let slope_y = z * (1.0 + slope_x * slope_x).sqrt();

    if randy >= 0.5 {
        (slope_x, slope_y)
    } else {
        (slope_x, -slope_y)
    }
}

fn sample_vndf(wi: Vec3d, alpha_x: f64, alpha_y: f64, randx: f64, randy: f64) -> Vec3d {
    let wi_11 = Vec3d::new(alpha_x * wi.x, alpha_y * wi.y, wi.z).normalize();
    let (sx, sy) = sample_p22_11(wi_11.z, randx, randy);

    let cossin_phi = Vec3d::new(wi_11.x, wi_11.y, 0.0)
        .try_normalize()
        .unwrap_or(Vec3d::X);
    #[allow(clippy::suboptimal_flops)]
    let slope_x = alpha_x * (cossin_phi.x * sx - cossin_phi.y * sy);
    #[allow(clippy::suboptimal_flops)]
    let slope_y = alpha_y * (cossin_phi.y * sx + cossin_phi.x * sy);
    Vec3d::new(-slope_x, -slope_y, 1.0).normalize()
}

impl MultiScatter {
    fn ggx(&self) -> GGX {
        GGX {
            alpha_x: self.alpha_x,
            alpha_y: self.alpha_y,
        }
    }

    fn lambda(&self, w: Vec3d) -> f64 {
        mf_lambda(w, self.alpha_x, self.alpha_y)
    }

    fn f0(&self) -> f64 {
        fresnel_dielectric_cos(1.0, self.eta)
    }

    /// phase function of a reflecting microsurface for a ray travelling along `w`
    fn eval_phase_glossy(&self, w: Vec3d, lambda: f64, wo: Vec3d) -> f64 {
        if w.z > 0.9999 {
            return 0.0;
        }
        let Some(wh) = (wo - w).try_normalize() else {
            return 0.0;
        };
        if wh.z < 0.0 {
            return 0.0;
        }
        let p_area = if w.z < -0.9999 { 1.0 } else { lambda * w.z };
        let dot_w_wh = (-w).dot(wh);
        if dot_w_wh < 0.0 {
            return 0.0;
        }
        dot_w_wh * 0.25 / (p_area * dot_w_wh).max(1e-7) * self.ggx().ndf(wh)
    }

    /// phase function of a dielectric microsurface, `wo_outside` selects reflection
    fn eval_phase_glass(
        &self,
        w: Vec3d,
        lambda: f64,
        wo: Vec3d,
        wo_outside: bool,
        eta: f64,
    ) -> f64 {
        if w.z > 0.9999 {
            return 0.0;
        }
        let p_area = if w.z < -0.9999 { 1.0 } else { lambda * w.z };
        if wo_outside {
            let Some(wh) = (wo - w).try_normalize() else {
                return 0.0;
            };
            if wh.z < 0.0 {
                return 0.0;
            }
            let dot_w_wh = (-w).dot(wh);
            fresnel_dielectric_cos(dot_w_wh, eta) * dot_w_wh.max(0.0) * self.ggx().ndf(wh) * 0.25
                / (p_area * dot_w_wh).max(1e-7)
        } else {
            let Some(mut wh) = (wo * eta - w).try_normalize() else {
                return 0.0;
            };
            if wh.z < 0.0 {
                wh = -wh;
            }
            let dot_w_wh = (-w).dot(wh);
            let dot_wo_wh = wo.dot(wh);
            if dot_w_wh < 0.0 {
                return 0.0;
            }
            let temp = eta.mul_add(dot_wo_wh, dot_w_wh);
            (1.0 - fresnel_dielectric_cos(dot_w_wh, eta))
                * dot_w_wh.max(0.0)
                * (-dot_wo_wh).max(0.0)
                * self.ggx().ndf(wh)
                / (p_area * temp * temp).max(1e-7)
        }
    }

    /// Glass phase function towards `wo` from the side of the surface the walk is on
    fn glass_phase(&self, walker: &Walker, outside: bool, wo: Vec3d, wo_outside: bool) -> f64 {
        if outside {
            self.eval_phase_glass(walker.wr, walker.lambda, wo, wo_outside, self.eta)
        } else {
            self.eval_phase_glass(walker.wr, walker.lambda, -wo, !wo_outside, 1.0 / self.eta)
        }
    }

    /// Scatters a ray arriving from `wi` on the microfacet `wm`. Returns the new direction and
    /// whether it stayed on the outside.
    fn sample_phase_glass(wi: Vec3d, eta: f64, wm: Vec3d, rand: f64) -> (Vec3d, bool) {
        let cos_i = wi.dot(wm);
        let f = fresnel_dielectric_cos(cos_i, eta);
        if rand < f {
            return (wm * (2.0 * cos_i) - wi, true);
        }
        let inv_eta = 1.0 / eta;
        #[allow(clippy::suboptimal_flops)]
        let cos_t = -safe_sqrt(1.0 - (1.0 - cos_i * cos_i) * inv_eta * inv_eta);
        #[allow(clippy::suboptimal_flops)]
        let wr = (wm * (cos_i * inv_eta + cos_t) - wi * inv_eta)
            .try_normalize()
            .unwrap_or(-wm);
        (wr, false)
    }

    fn fresnel_color(&self, wi: Vec3d, wm: Vec3d) -> Option<Spectrum> {
        self.cspec0
            .map(|cspec0| interpolate_fresnel_color(wi, wm, self.eta, self.f0(), cspec0))
    }

    /// Estimates the value of the closure for light arriving from `wo`, cosine included.
    /// `wo_outside` is false for transmission through glass.
    #[allow(clippy::too_many_lines)]
    pub fn eval(
        &self,
        glass: bool,
        wi: Vec3d,
        wo: Vec3d,
        wo_outside: bool,
        lcg: &mut Lcg,
    ) -> Spectrum {
        let (mut wi, mut wo) = (wi, wo);
        // evaluating from the shallower direction is less noisy, reciprocity allows the swap
        let mut swapped = false;
        if glass && wi.z * wo.z < 0.0 {
            if -wo.z < wi.z {
                swapped = true;
                (wi, wo) = (-wo, -wi);
            }
        } else if wo.z < wi.z {
            swapped = true;
            (wi, wo) = (wo, wi);
        }

        if wi.z < 1e-5 || (wo.z < 1e-5 && wo_outside) || (wo.z > -1e-5 && !wo_outside) {
            return Spectrum::ZERO;
        }

        let mut lambda_r = self.lambda(-wi);
        let shadowing_lambda = self.lambda(if wo_outside { wo } else { -wo });

        let mut eval = if glass {
            let single = self.eval_phase_glass(-wi, lambda_r, wo, wo_outside, self.eta);
            let visibility = if wo_outside {
                -lambda_r / (shadowing_lambda - lambda_r)
            } else {
                -lambda_r * beta(-lambda_r, shadowing_lambda + 1.0)
            };
            Spectrum::splat(single * visibility)
        } else {
            let Some(wh) = (wi + wo).try_normalize() else {
                return Spectrum::ZERO;
            };
            let g2 = 1.0 / (1.0 - (lambda_r + 1.0) + shadowing_lambda);
            let value = g2 * 0.25 / wi.z * self.ggx().ndf(wh);
            let tint = self.fresnel_color(wi, wh).unwrap_or(Spectrum::ONE);
            Spectrum::splat(value) * tint
        };

        let mut throughput = Spectrum::ONE;
        let mut walker = Walker {
            wr: -wi,
            hr: 1.0,
            c1: 1.0,
            g1: 0.0,
            lambda: lambda_r,
        };
        let mut outside = true;
        let use_fresnel = self.cspec0.is_some();

        for order in 0..MAX_ORDER {
            if !walker.sample_height(lcg.step()) {
                break;
            }
            let vndf_rand_y = lcg.step();
            let vndf_rand_x = lcg.step();
            let wm = sample_vndf(-walker.wr, self.alpha_x, self.alpha_y, vndf_rand_x, vndf_rand_y);

            let shadowing = || {
                let h = if outside == wo_outside {
                    walker.hr
                } else {
                    -walker.hr
                };
                mf_g1(if wo_outside { wo } else { -wo }, mf_c1(h), shadowing_lambda)
            };

            if glass && order == 0 && use_fresnel {
                // the fresnel tinted glass replaces the analytic term with the walk's own estimate
                let phase = self.glass_phase(&walker, outside, wo, wo_outside);
                eval = throughput * (phase * shadowing());
            }
            if order > 0 {
                let phase = if glass {
                    self.glass_phase(&walker, outside, wo, wo_outside)
                } else {
                    self.eval_phase_glossy(walker.wr, walker.lambda, wo)
                };
                eval += throughput * (phase * shadowing());
            }
            if order + 1 >= MAX_ORDER {
                break;
            }

            if glass {
                let wi_prev = -walker.wr;
                let eta = if outside { self.eta } else { 1.0 / self.eta };
                let (wr, next_outside) = Self::sample_phase_glass(-walker.wr, eta, wm, lcg.step());
                walker.wr = wr;
                if !next_outside {
                    outside = !outside;
                    walker.wr = -walker.wr;
                    walker.hr = -walker.hr;
                }
                if use_fresnel {
                    if next_outside {
                        if let Some(t_color) = self.fresnel_color(wi_prev, wm) {
                            throughput = if order == 0 { t_color } else { throughput * t_color };
                        }
                    } else {
                        throughput *= self.color;
                    }
                }
            } else {
                if let Some(t_color) = self.fresnel_color(-walker.wr, wm) {
                    throughput = if order == 0 { t_color } else { throughput * t_color };
                }
                let cos_i = (-walker.wr).dot(wm);
                walker.wr = walker.wr + wm * (2.0 * cos_i);
            }

            walker.lambda = self.lambda(walker.wr);
            if !use_fresnel {
                throughput *= self.color;
            }
            walker.c1 = mf_c1(walker.hr);
            walker.g1 = mf_g1(walker.wr, walker.c1, walker.lambda);
        }

        if swapped {
            eval *= (wi.z / wo.z).abs();
        }
        eval
    }

    /// Traces one random walk starting at `wi`. Returns the exit direction and the throughput of
    /// the walk, `None` if the walk did not leave the surface within the bounce limit.
    pub fn sample(&self, glass: bool, wi: Vec3d, lcg: &mut Lcg) -> Option<(Vec3d, Spectrum)> {
        let mut throughput = Spectrum::ONE;
        let mut walker = Walker {
            wr: -wi,
            hr: 1.0,
            c1: 1.0,
            g1: 0.0,
            lambda: self.lambda(-wi),
        };
        let mut outside = true;
        let use_fresnel = self.cspec0.is_some();

        for order in 0..MAX_ORDER {
            if !walker.sample_height(lcg.step()) {
                let wo = if outside { walker.wr } else { -walker.wr };
                return Some((wo, throughput));
            }
            let vndf_rand_y = lcg.step();
            let vndf_rand_x = lcg.step();
            let wm = sample_vndf(-walker.wr, self.alpha_x, self.alpha_y, vndf_rand_x, vndf_rand_y);

            // the colour of the first bounce is part of the closure weight
            if !use_fresnel && order > 0 {
                throughput *= self.color;
            }

            if glass {
                let wi_prev = -walker.wr;
                let eta = if outside { self.eta } else { 1.0 / self.eta };
                let (wr, next_outside) = Self::sample_phase_glass(-walker.wr, eta, wm, lcg.step());
                walker.wr = wr;
                if !next_outside {
                    walker.hr = -walker.hr;
                    walker.wr = -walker.wr;
                    outside = !outside;
                }
                if use_fresnel {
                    if next_outside {
                        if let Some(t_color) = self.fresnel_color(wi_prev, wm) {
                            throughput = if order == 0 { t_color } else { throughput * t_color };
                        }
                    } else {
                        throughput *= self.color;
                    }
                }
            } else {
                if let Some(t_color) = self.fresnel_color(-walker.wr, wm) {
                    throughput = if order == 0 { t_color } else { throughput * t_color };
                }
                let cos_i = (-walker.wr).dot(wm);
                walker.wr = walker.wr + wm * (2.0 * cos_i);
            }

            walker.lambda = self.lambda(walker.wr);
            walker.g1 = mf_g1(walker.wr, walker.c1, walker.lambda);
        }
        None
    }

    /// Approximate density of [`MultiScatter::sample`] for reflection off a rough conductor like
    /// surface
    #[must_use]
    pub fn glossy_pdf(&self, wi: Vec3d, wo: Vec3d) -> f64 {
        let Some(wh) = (wi + wo).try_normalize() else {
            return 0.0;
        };
        let d = self.ggx().ndf(wh);
        let lambda = self.lambda(wi);
        let single = 0.25 * d / ((1.0 + lambda) * wi.z).max(1e-7);
        let multi = wo.z.max(0.0) * consts::FRAC_1_PI;
        let albedo = ggx_albedo((self.alpha_x * self.alpha_y).sqrt());
        albedo.mul_add(single, (1.0 - albedo) * multi)
    }

    /// Approximate density of [`MultiScatter::sample`] for a dielectric surface
    #[must_use]
    pub fn glass_pdf(&self, wi: Vec3d, wo: Vec3d) -> f64 {
        let eta = self.eta;
        let reflect = wi.z * wo.z > 0.0;
        let wh = if reflect { wi + wo } else { wi + wo * eta };
        let Some(mut wh) = wh.try_normalize() else {
            return 0.0;
        };
        let fresnel = if reflect {
            fresnel_dielectric_cos(wi.dot(wh), eta)
        } else {
            1.0 - fresnel_dielectric_cos(wi.dot(wh), eta)
        };
        if wh.z < 0.0 {
            wh = -wh;
        }
        let r_wi = if wi.z < 0.0 { -wi } else { wi };
        let lambda = self.lambda(r_wi);
        let d = self.ggx().ndf(wh);
        let visible = ((1.0 + lambda) * r_wi.z).max(1e-7);

        let single = if reflect {
            0.25 * d / visible
        } else {
            let cos_hi = wi.dot(wh);
            let cos_ho = wo.dot(wh);
            let denom = eta.mul_add(cos_ho, cos_hi).sq().max(1e-7);
            d * (cos_hi * cos_ho).abs() * eta.sq() / (visible * denom)
        };
        let multi = (wo.z * consts::FRAC_1_PI).abs();
        let albedo = ggx_albedo(self.alpha_x);
        fresnel * albedo.mul_add(single, (1.0 - albedo) * multi)
    }
}

/// Fitted directional albedo of single scattering GGX
#[allow(clippy::suboptimal_flops)]
fn ggx_albedo(r: f64) -> f64 {
    let mut albedo = 0.806_495 * (-1.98712 * r * r).exp() + 0.199_531;
    albedo -= ((((((1.76741 * r - 8.43891) * r + 15.784) * r - 14.398) * r + 6.45221) * r
        - 1.19722)
        * r
        + 0.027_803)
        * r
        + 0.005_687_39;
    albedo.saturate()
}
