//! The closure record and the dispatch from its discriminant to the scattering models

use crate::{
    alloc::{ClosureList, ExtraArena},
    diffuse::{DiffuseBsdf, TranslucentBsdf},
    emissive::HoldoutClosure,
    hair::HairBsdf,
    microfacet::MicrofacetBsdf,
    oren_nayar::OrenNayarBsdf,
    principled_diffuse::PrincipledDiffuseBsdf,
    principled_hair::PrincipledHairBsdf,
    principled_sheen::PrincipledSheenBsdf,
    toon::ToonBsdf,
    transparent::TransparentBsdf,
    velvet::VelvetBsdf,
    volume::{DraineVolume, FournierForandVolume, HenyeyGreensteinVolume, MieVolume, RayleighVolume},
    Bsdf, BsdfEval, BsdfSample, ClosureBase, SdFlags, SetupContext, Spectrum, Vec3d,
};

/// Upper bound for the size of one record in bytes
pub const MAX_CLOSURE_SIZE: usize = 192;

/// The parameters of one scattering model
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ClosureModel {
    Diffuse(DiffuseBsdf),
    Translucent(TranslucentBsdf),
    OrenNayar(OrenNayarBsdf),
    PrincipledDiffuse(PrincipledDiffuseBsdf),
    PrincipledSheen(PrincipledSheenBsdf),
    Toon(ToonBsdf),
    Velvet(VelvetBsdf),
    Microfacet(MicrofacetBsdf),
    Hair(HairBsdf),
    PrincipledHair(PrincipledHairBsdf),
    Transparent(TransparentBsdf),
    Holdout(HoldoutClosure),
    HenyeyGreenstein(HenyeyGreensteinVolume),
    FournierForand(FournierForandVolume),
    Rayleigh(RayleighVolume),
    Draine(DraineVolume),
    Mie(MieVolume),
}

/// One analytic scattering function bound to its parameters at a shading point
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ShaderClosure {
    pub base: ClosureBase,
    pub model: ClosureModel,
}

const _: () = assert!(std::mem::size_of::<ShaderClosure>() <= MAX_CLOSURE_SIZE);

macro_rules! dispatch {
    ($model:expr, $bsdf:ident => $body:expr) => {
        match $model {
            ClosureModel::Diffuse($bsdf) => $body,
            ClosureModel::Translucent($bsdf) => $body,
            ClosureModel::OrenNayar($bsdf) => $body,
            ClosureModel::PrincipledDiffuse($bsdf) => $body,
            ClosureModel::PrincipledSheen($bsdf) => $body,
            ClosureModel::Toon($bsdf) => $body,
            ClosureModel::Velvet($bsdf) => $body,
            ClosureModel::Microfacet($bsdf) => $body,
            ClosureModel::Hair($bsdf) => $body,
            ClosureModel::PrincipledHair($bsdf) => $body,
            ClosureModel::Transparent($bsdf) => $body,
            ClosureModel::Holdout($bsdf) => $body,
            ClosureModel::HenyeyGreenstein($bsdf) => $body,
            ClosureModel::FournierForand($bsdf) => $body,
            ClosureModel::Rayleigh($bsdf) => $body,
            ClosureModel::Draine($bsdf) => $body,
            ClosureModel::Mie($bsdf) => $body,
        }
    };
}

impl ShaderClosure {
    #[must_use]
    pub const fn new(base: ClosureBase, model: ClosureModel) -> Self {
        Self { base, model }
    }

    pub fn setup(&mut self, ctx: &mut SetupContext<'_>) -> SdFlags {
        let base = &mut self.base;
        dispatch!(&mut self.model, bsdf => bsdf.setup(base, ctx))
    }

    #[must_use]
    pub fn eval_reflect(&self, extra: &ExtraArena, i: Vec3d, omega_in: Vec3d) -> BsdfEval {
        dispatch!(&self.model, bsdf => bsdf.eval_reflect(&self.base, extra, i, omega_in))
    }

    #[must_use]
    pub fn eval_transmit(&self, extra: &ExtraArena, i: Vec3d, omega_in: Vec3d) -> BsdfEval {
        dispatch!(&self.model, bsdf => bsdf.eval_transmit(&self.base, extra, i, omega_in))
    }

    /// Picks reflection or transmission by the side of the geometric normal `omega_in` is on
    #[must_use]
    pub fn eval(&self, extra: &ExtraArena, ng: Vec3d, i: Vec3d, omega_in: Vec3d) -> BsdfEval {
        if self.base.ty.is_volume() || ng.dot(omega_in) >= 0.0 {
            self.eval_reflect(extra, i, omega_in)
        } else {
            self.eval_transmit(extra, i, omega_in)
        }
    }

    #[must_use]
    pub fn sample(
        &self,
        extra: &ExtraArena,
        ng: Vec3d,
        i: Vec3d,
        randu: f64,
        randv: f64,
    ) -> BsdfSample {
        dispatch!(&self.model, bsdf => bsdf.sample(&self.base, extra, ng, i, randu, randv))
    }
}

impl ClosureList {
    /// Evaluates all closures that support direct evaluation. The returned value is weighted with
    /// each closure's weight, the pdf is the sample-weight average of the individual pdfs.
    #[must_use]
    pub fn eval_all(&self, ng: Vec3d, i: Vec3d, omega_in: Vec3d) -> BsdfEval {
        let mut eval = Spectrum::ZERO;
        let mut sum_pdf = 0.0;
        let mut sum_sample_weight = 0.0;
        for closure in self.iter() {
            if !closure.base.ty.is_bsdf() {
                continue;
            }
            if !closure.base.ty.is_singular() {
                let BsdfEval { eval: e, pdf } = closure.eval(self.extra(), ng, i, omega_in);
                if pdf > 0.0 {
                    eval += e * closure.base.weight;
                    sum_pdf += pdf * closure.base.sample_weight;
                }
            }
            sum_sample_weight += closure.base.sample_weight;
        }
        BsdfEval {
            eval,
            pdf: if sum_sample_weight > 0.0 {
                sum_pdf / sum_sample_weight
            } else {
                0.0
            },
        }
    }

    /// Chooses a scattering closure proportional to its sample weight. `rand` is rescaled so it can
    /// be reused by the closure's own sampling. Returns the index and the rescaled number.
    #[must_use]
    pub fn pick(&self, rand: f64) -> Option<(usize, f64)> {
        let total: f64 = self
            .iter()
            .filter(|c| c.base.ty.is_bsdf())
            .map(|c| c.base.sample_weight)
            .sum();
        if total <= 0.0 {
            return None;
        }
        let mut r = rand * total;
        let mut last = None;
        for (index, closure) in self.iter().enumerate() {
            if !closure.base.ty.is_bsdf() {
                continue;
            }
            let w = closure.base.sample_weight;
            if r < w {
                return Some((index, (r / w).clamp(0.0, 1.0 - f64::EPSILON)));
            }
            r -= w;
            last = Some(index);
        }
        last.map(|index| (index, 1.0 - f64::EPSILON))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ClosureType, Spectrum};

    fn diffuse(weight: f64) -> ShaderClosure {
        ShaderClosure::new(
            ClosureBase::new(ClosureType::BsdfDiffuse, Spectrum::splat(weight), Vec3d::Z),
            ClosureModel::Diffuse(DiffuseBsdf),
        )
    }

    #[test]
    fn record_fits_size_bound() {
        assert!(std::mem::size_of::<ShaderClosure>() <= MAX_CLOSURE_SIZE);
    }

    #[test]
    fn pick_follows_sample_weight() {
        let mut list = ClosureList::new(4);
        list.alloc(diffuse(1.0)).unwrap();
        list.alloc(diffuse(3.0)).unwrap();
        assert_eq!(list.pick(0.1).map(|p| p.0), Some(0));
        assert_eq!(list.pick(0.3).map(|p| p.0), Some(1));
        assert_eq!(list.pick(0.99).map(|p| p.0), Some(1));
        let (_, rescaled) = list.pick(0.125).unwrap();
        assert!((rescaled - 0.5).abs() < 1e-9);
    }

    #[test]
    fn eval_all_weights_closures() {
        let mut list = ClosureList::new(4);
        list.alloc(diffuse(0.25)).unwrap();
        list.alloc(diffuse(0.75)).unwrap();
        let omega_in = Vec3d::new(0.0, 0.6, 0.8);
        let single = list.get(0).unwrap().eval(list.extra(), Vec3d::Z, Vec3d::Z, omega_in);
        let all = list.eval_all(Vec3d::Z, Vec3d::Z, omega_in);
        assert!((all.eval.x - single.eval.x).abs() < 1e-12);
        assert!((all.pdf - single.pdf).abs() < 1e-12);
    }

    #[test]
    fn empty_list_has_nothing_to_pick() {
        let list = ClosureList::new(4);
        assert!(list.pick(0.5).is_none());
        assert_eq!(list.eval_all(Vec3d::Z, Vec3d::Z, Vec3d::Z), BsdfEval::ZERO);
    }
}
