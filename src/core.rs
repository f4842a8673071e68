use bitflags::bitflags;
use strum::{Display, EnumString, IntoStaticStr};

use crate::{alloc::ExtraArena, utils::VecExt};

/// used for colors. Every channel is one wavelength band of the spectrum.
pub type Spectrum = glam::f64::DVec3;

/// used for direction vectors
pub type Vec3d = glam::f64::DVec3;
/// used for direction vectors
pub type Vec2d = glam::f64::DVec2;

bitflags! {
    /// Describes the kind of scattering event that [`Bsdf::sample`] produced. The integrator uses
    /// these to update its path state.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct ClosureLabel: u32 {
        const TRANSMIT = 1;
        const REFLECT = 1 << 1;
        const DIFFUSE = 1 << 2;
        const GLOSSY = 1 << 3;
        const SINGULAR = 1 << 4;
        const TRANSPARENT = 1 << 5;
        const VOLUME_SCATTER = 1 << 6;
    }
}

bitflags! {
    /// Aggregate capability flags of a shading point. Closure setups return the flags they
    /// contribute, which are or-ed into [`crate::ShaderData::flag`].
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct SdFlags: u32 {
        const BACKFACING = 1;
        const EMISSION = 1 << 1;
        const BSDF = 1 << 2;
        const BSDF_HAS_EVAL = 1 << 3;
        const BSDF_HAS_TRANSMISSION = 1 << 4;
        const HOLDOUT = 1 << 5;
        const EXTINCTION = 1 << 6;
        const SCATTER = 1 << 7;
        const TRANSPARENT = 1 << 8;
        /// the random walk closures draw additional random numbers
        const BSDF_NEEDS_LCG = 1 << 9;
        /// the object carries a displacement shader, so surfaces run the bump pre-pass
        const HAS_DISPLACEMENT = 1 << 10;
    }
}

bitflags! {
    /// State of the path that arrived at the shading point. Also used as ray type for the
    /// shading-language globals.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct PathFlags: u32 {
        const CAMERA = 1;
        const REFLECT = 1 << 1;
        const TRANSMIT = 1 << 2;
        const DIFFUSE = 1 << 3;
        const GLOSSY = 1 << 4;
        const SINGULAR = 1 << 5;
        const TRANSPARENT = 1 << 6;
        const SHADOW = 1 << 7;
        const VOLUME_SCATTER = 1 << 8;
        /// russian roulette decided this is the last bounce
        const TERMINATE = 1 << 9;
    }
}

/// Discriminant of a [`crate::closure::ShaderClosure`]. Prints in snake case, e.g.
/// `bsdf_microfacet_ggx`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum ClosureType {
    BsdfDiffuse,
    BsdfOrenNayar,
    BsdfTranslucent,
    BsdfPrincipledDiffuse,
    BsdfPrincipledSheen,
    BsdfDiffuseToon,
    BsdfGlossyToon,
    BsdfAshikhminVelvet,
    BsdfReflection,
    BsdfMicrofacetGgx,
    BsdfMicrofacetGgxFresnel,
    BsdfMicrofacetGgxClearcoat,
    BsdfMicrofacetBeckmann,
    BsdfMicrofacetMultiGgx,
    BsdfMicrofacetMultiGgxFresnel,
    BsdfMicrofacetGgxConductor,
    BsdfMicrofacetBeckmannConductor,
    BsdfRefraction,
    BsdfMicrofacetGgxRefraction,
    BsdfMicrofacetBeckmannRefraction,
    BsdfSharpGlass,
    BsdfMicrofacetGgxGlass,
    BsdfMicrofacetBeckmannGlass,
    BsdfMicrofacetMultiGgxGlass,
    BsdfMicrofacetMultiGgxGlassFresnel,
    BsdfHairReflection,
    BsdfHairTransmission,
    BsdfPrincipledHair,
    BsdfTransparent,
    Holdout,
    VolumeHenyeyGreenstein,
    VolumeFournierForand,
    VolumeRayleigh,
    VolumeDraine,
    VolumeMie,
}

impl ClosureType {
    #[must_use]
    pub const fn is_bsdf(self) -> bool {
        !matches!(self, Self::Holdout) && !self.is_volume()
    }

    #[must_use]
    pub const fn is_volume(self) -> bool {
        matches!(
            self,
            Self::VolumeHenyeyGreenstein
                | Self::VolumeFournierForand
                | Self::VolumeRayleigh
                | Self::VolumeDraine
                | Self::VolumeMie
        )
    }

    /// closures that do not have a closed form and only work with [`Bsdf::sample`]
    #[must_use]
    pub const fn is_singular(self) -> bool {
        matches!(
            self,
            Self::BsdfReflection
                | Self::BsdfRefraction
                | Self::BsdfSharpGlass
                | Self::BsdfTransparent
        )
    }

    #[must_use]
    pub const fn is_glass(self) -> bool {
        matches!(
            self,
            Self::BsdfSharpGlass
                | Self::BsdfMicrofacetGgxGlass
                | Self::BsdfMicrofacetBeckmannGlass
                | Self::BsdfMicrofacetMultiGgxGlass
                | Self::BsdfMicrofacetMultiGgxGlassFresnel
        )
    }
}

/// Returned by [`Bsdf::eval_reflect`] and [`Bsdf::eval_transmit`]
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BsdfEval {
    /// The value of the closure with the cosine of the incoming direction already multiplied in
    pub eval: Spectrum,

    /// The density with which [`Bsdf::sample`] would have produced the same incoming direction
    pub pdf: f64,
}

impl BsdfEval {
    pub const ZERO: Self = Self {
        eval: Spectrum::ZERO,
        pdf: 0.0,
    };

    /// Both eval and pdf are the same scalar, common for closures that sample exactly
    #[must_use]
    pub fn splat(value: f64) -> Self {
        Self {
            eval: Spectrum::splat(value),
            pdf: value,
        }
    }
}

/// Returned by [`Bsdf::sample`]
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BsdfSample {
    /// what kind of scattering event was sampled
    pub label: ClosureLabel,

    /// See [`BsdfEval::eval`]. Zero if the sample was rejected
    pub eval: Spectrum,

    /// # Incoming Direction
    /// The direction where light could be arriving at the surface. Still set on rejected
    /// samples, but must not be used then.
    pub omega_in: Vec3d,

    /// The probability density of choosing `omega_in`. Zero if the sample was rejected
    pub pdf: f64,
}

impl BsdfSample {
    /// a sample that the integrator has to skip
    #[must_use]
    pub const fn rejected(label: ClosureLabel, omega_in: Vec3d) -> Self {
        Self {
            label,
            eval: Spectrum::ZERO,
            omega_in,
            pdf: 0.0,
        }
    }

    #[must_use]
    pub fn is_rejected(&self) -> bool {
        self.pdf <= 0.0
    }
}

/// The header that every closure record starts with
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ClosureBase {
    pub ty: ClosureType,
    pub weight: Spectrum,
    /// importance for picking this closure among all closures of the shading point
    pub sample_weight: f64,
    /// shading normal
    pub n: Vec3d,
}

impl ClosureBase {
    #[must_use]
    pub fn new(ty: ClosureType, weight: Spectrum, n: Vec3d) -> Self {
        Self {
            ty,
            weight,
            sample_weight: weight.average().abs(),
            n,
        }
    }
}

/// Geometry of the shading point that some setups need besides their own parameters
pub struct SetupContext<'a> {
    /// direction towards the viewer
    pub i: Vec3d,
    /// geometric normal
    pub ng: Vec3d,
    /// surface tangent along u, the curve direction for hair
    pub dpdu: Vec3d,
    /// surface parameter v, used as the hair offset on ribbon curves
    pub v: f64,
    /// the shading point lies on a flat ribbon curve instead of a thick one
    pub ribbon: bool,
    pub extra: &'a mut ExtraArena,
}

/// Bidirectional Scattering Distribution Functions. Every scattering model of this crate
/// implements this trait.
///
/// All vectors are in world space and point away from the surface.
pub trait Bsdf {
    /// Normalizes the parameters into the form used for evaluation and sets the record's type.
    /// Returns the capabilities this closure adds to the shading point.
    fn setup(&mut self, base: &mut ClosureBase, ctx: &mut SetupContext<'_>) -> SdFlags;

    /// Evaluates the closure for light arriving from the hemisphere of the shading normal
    ///
    /// # Arguments
    /// * `i` - Direction towards the viewer
    /// * `omega_in` - Direction towards the light
    fn eval_reflect(
        &self,
        base: &ClosureBase,
        extra: &ExtraArena,
        i: Vec3d,
        omega_in: Vec3d,
    ) -> BsdfEval;

    /// Evaluates the closure for light arriving from below the shading normal
    fn eval_transmit(
        &self,
        base: &ClosureBase,
        extra: &ExtraArena,
        i: Vec3d,
        omega_in: Vec3d,
    ) -> BsdfEval;

    /// Samples an incoming direction. `randu` and `randv` are in `0.0..1.0`. Samples ending up on
    /// the wrong side of the geometric normal `ng` are rejected.
    fn sample(
        &self,
        base: &ClosureBase,
        extra: &ExtraArena,
        ng: Vec3d,
        i: Vec3d,
        randu: f64,
        randv: f64,
    ) -> BsdfSample;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::assert_eq_approx_abs;

    #[test]
    fn sample_weight_is_magnitude_of_average() {
        let base = |weight| ClosureBase::new(ClosureType::BsdfDiffuse, weight, Vec3d::Z);
        assert_eq_approx_abs!(base(Spectrum::new(1.0, -0.5, 0.2)).sample_weight, 0.7 / 3.0, 1e-12);
        assert_eq_approx_abs!(base(Spectrum::splat(-0.5)).sample_weight, 0.5, 1e-12);
        assert_eq_approx_abs!(base(Spectrum::new(1.0, -1.0, 0.0)).sample_weight, 0.0, 1e-12);
    }

    #[test]
    fn volume_closures_are_not_bsdfs() {
        for ty in [
            ClosureType::VolumeHenyeyGreenstein,
            ClosureType::VolumeFournierForand,
            ClosureType::VolumeRayleigh,
            ClosureType::VolumeDraine,
            ClosureType::VolumeMie,
        ] {
            assert!(ty.is_volume() && !ty.is_bsdf(), "{ty}");
        }
        assert!(ClosureType::BsdfMicrofacetGgxConductor.is_bsdf());
        assert!(!ClosureType::Holdout.is_bsdf());
    }
}
