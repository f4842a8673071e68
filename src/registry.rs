//! The table of closures the shading language can create.
//!
//! Each entry names a closure, describes its parameters and knows how to turn the parameter
//! values of a leaf into a closure prototype. Ids are dense and follow the registration order.
//! The registry is built once before shading starts and only read afterwards, so it can be shared
//! between threads freely.
use std::collections::HashMap;

use bitflags::bitflags;
use log::{info, warn};

use crate::{
    alloc::{ExtraData, ExtraRef},
    closure::{ClosureModel, ShaderClosure},
    diffuse::{DiffuseBsdf, TranslucentBsdf},
    error::RegistryError,
    hair::HairBsdf,
    microfacet::{
        conductor_type, lobes_of, microfacet_alphas, microfacet_type, ConductorFresnel,
        MicrofacetBsdf, MicrofacetExtra, MicrofacetLobes,
    },
    oren_nayar::OrenNayarBsdf,
    principled_diffuse::PrincipledDiffuseBsdf,
    principled_hair::{PrincipledHairBsdf, PrincipledHairExtra},
    principled_sheen::PrincipledSheenBsdf,
    toon::ToonBsdf,
    utils::FloatExt,
    velvet::VelvetBsdf,
    volume::{
        DraineVolume, FournierForandVolume, HenyeyGreensteinVolume, MieVolume, RayleighVolume,
    },
    ClosureBase, ClosureLabel, ClosureType, Spectrum, Vec3d,
};

/// Below this roughness an Oren-Nayar closure is plain Lambert
const LAMBERT_ROUGHNESS: f64 = 1e-5;

bitflags! {
    /// The kinds of shaders a closure is meaningful in
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct ShaderContexts: u32 {
        const SURFACE = 1;
        const BACKGROUND = 1 << 1;
        const VOLUME = 1 << 2;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ParamKind {
    Float,
    Color,
    Vector,
    Int,
    String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ParamDesc {
    pub name: &'static str,
    pub kind: ParamKind,
}

impl ParamDesc {
    #[must_use]
    pub const fn new(name: &'static str, kind: ParamKind) -> Self {
        Self { name, kind }
    }
}

/// A parameter value of a closure leaf
#[derive(Clone, Debug, PartialEq)]
pub enum ParamValue {
    Float(f64),
    Color(Spectrum),
    Vector(Vec3d),
    Int(i32),
    String(String),
}

impl ParamValue {
    #[must_use]
    pub const fn kind(&self) -> ParamKind {
        match self {
            Self::Float(_) => ParamKind::Float,
            Self::Color(_) => ParamKind::Color,
            Self::Vector(_) => ParamKind::Vector,
            Self::Int(_) => ParamKind::Int,
            Self::String(_) => ParamKind::String,
        }
    }
}

/// Parameter values that have been checked against their descriptors
pub struct Params<'a> {
    values: &'a [ParamValue],
}

impl<'a> Params<'a> {
    #[must_use]
    pub fn float(&self, index: usize) -> f64 {
        match self.values.get(index) {
            Some(ParamValue::Float(v)) => *v,
            _ => 0.0,
        }
    }

    #[must_use]
    pub fn color(&self, index: usize) -> Spectrum {
        match self.values.get(index) {
            Some(ParamValue::Color(v)) => *v,
            _ => Spectrum::ZERO,
        }
    }

    #[must_use]
    pub fn vector(&self, index: usize) -> Vec3d {
        match self.values.get(index) {
            Some(ParamValue::Vector(v)) => *v,
            _ => Vec3d::ZERO,
        }
    }

    #[must_use]
    pub fn int(&self, index: usize) -> i32 {
        match self.values.get(index) {
            Some(ParamValue::Int(v)) => *v,
            _ => 0,
        }
    }

    #[must_use]
    pub fn string(&self, index: usize) -> &'a str {
        match self.values.get(index) {
            Some(ParamValue::String(v)) => v,
            _ => "",
        }
    }
}

/// What a prototype needs to know about the shading point
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PrepareContext {
    /// the ray hit the back of the surface, so indices of refraction are inverted
    pub backfacing: bool,
    /// shading normal, used where the leaf's normal is degenerate
    pub n: Vec3d,
}

/// A scattering closure built from leaf parameters, not yet allocated
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RegisteredClosure {
    pub ty: ClosureType,
    /// used by caustics gating
    pub label: ClosureLabel,
    pub n: Vec3d,
    pub model: ClosureModel,
    pub extra: Option<ExtraData>,
}

impl RegisteredClosure {
    /// The record for this closure with its final weight. `extra` is the block allocated for
    /// [`Self::extra`].
    #[must_use]
    pub fn into_record(self, weight: Spectrum, extra: Option<ExtraRef>) -> ShaderClosure {
        let mut model = self.model;
        if let Some(r) = extra {
            match &mut model {
                ClosureModel::Microfacet(bsdf) => bsdf.extra = Some(r),
                ClosureModel::PrincipledHair(bsdf) => bsdf.extra = Some(r),
                _ => {}
            }
        }
        ShaderClosure::new(ClosureBase::new(self.ty, weight, self.n), model)
    }

    /// `true` for closures that scatter into both hemispheres with separate lobes
    #[must_use]
    pub const fn is_glass(&self) -> bool {
        matches!(lobes_of(self.ty), Some(MicrofacetLobes::Glass))
    }
}

/// The result of preparing a leaf
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Prepared {
    Scatter(RegisteredClosure),
    Emission,
    Background,
    Holdout,
    Transparent,
    Absorption,
}

pub type PrepareFn = fn(&Params<'_>, &PrepareContext) -> Prepared;

pub struct ClosureEntry {
    pub name: &'static str,
    pub id: usize,
    pub params: &'static [ParamDesc],
    pub label: ClosureLabel,
    pub contexts: ShaderContexts,
    prepare: PrepareFn,
}

impl std::fmt::Debug for ClosureEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClosureEntry")
            .field("name", &self.name)
            .field("id", &self.id)
            .field("params", &self.params)
            .field("label", &self.label)
            .field("contexts", &self.contexts)
            .finish_non_exhaustive()
    }
}

impl ClosureEntry {
    #[must_use]
    pub const fn new(
        name: &'static str,
        id: usize,
        params: &'static [ParamDesc],
        label: ClosureLabel,
        contexts: ShaderContexts,
        prepare: PrepareFn,
    ) -> Self {
        Self {
            name,
            id,
            params,
            label,
            contexts,
            prepare,
        }
    }

    /// Builds the prototype for a leaf. Values are matched positionally against the descriptors;
    /// a mismatch drops the leaf.
    #[must_use]
    pub fn prepare(&self, values: &[ParamValue], ctx: &PrepareContext) -> Option<Prepared> {
        if values.len() != self.params.len() {
            warn!(
                "closure {} expects {} parameters, got {}",
                self.name,
                self.params.len(),
                values.len()
            );
            return None;
        }
        for (desc, value) in self.params.iter().zip(values) {
            if desc.kind != value.kind() {
                warn!(
                    "parameter {} of closure {} should be {:?}, got {:?}",
                    desc.name,
                    self.name,
                    desc.kind,
                    value.kind()
                );
                return None;
            }
        }
        Some((self.prepare)(&Params { values }, ctx))
    }
}

#[derive(Debug)]
pub struct Registry {
    entries: Vec<ClosureEntry>,
    ids: HashMap<&'static str, usize>,
}

impl Registry {
    /// Validates a table of entries. Ids have to match the position in the table.
    ///
    /// # Errors
    /// On empty or duplicate names and ids that are not dense
    pub fn new(entries: Vec<ClosureEntry>) -> Result<Self, RegistryError> {
        let mut ids = HashMap::with_capacity(entries.len());
        for (expected, entry) in entries.iter().enumerate() {
            if entry.name.is_empty() {
                return Err(RegistryError::EmptyName { id: entry.id });
            }
            if entry.id != expected {
                return Err(RegistryError::NonDenseId {
                    name: entry.name,
                    expected,
                    found: entry.id,
                });
            }
            if let Some(index) = entry.params.iter().position(|p| p.name.is_empty()) {
                return Err(RegistryError::EmptyParamName {
                    name: entry.name,
                    index,
                });
            }
            if ids.insert(entry.name, entry.id).is_some() {
                return Err(RegistryError::DuplicateName(entry.name));
            }
        }
        Ok(Self { entries, ids })
    }

    /// All closures this crate implements, in their fixed order
    ///
    /// # Errors
    /// See [`Self::new`]
    pub fn build() -> Result<Self, RegistryError> {
        let registry = Self::new(standard_entries())?;
        info!("registered {} closures", registry.len());
        Ok(registry)
    }

    #[must_use]
    pub fn by_id(&self, id: usize) -> Option<&ClosureEntry> {
        self.entries.get(id)
    }

    #[must_use]
    pub fn id_of(&self, name: &str) -> Option<usize> {
        self.ids.get(name).copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ClosureEntry> {
        self.entries.iter()
    }
}

mod params {
    use super::{ParamDesc, ParamKind};

    const fn float(name: &'static str) -> ParamDesc {
        ParamDesc::new(name, ParamKind::Float)
    }
    const fn color(name: &'static str) -> ParamDesc {
        ParamDesc::new(name, ParamKind::Color)
    }
    const fn vector(name: &'static str) -> ParamDesc {
        ParamDesc::new(name, ParamKind::Vector)
    }

    const N: ParamDesc = vector("N");
    const T: ParamDesc = vector("T");

    pub const NONE: &[ParamDesc] = &[];
    pub const NORMAL: &[ParamDesc] = &[N];
    pub const ROUGH: &[ParamDesc] = &[N, float("roughness")];
    pub const REFRACT: &[ParamDesc] = &[N, float("ior")];
    pub const MICROFACET: &[ParamDesc] = &[
        ParamDesc::new("distribution", ParamKind::String),
        N,
        T,
        float("roughness"),
        float("anisotropy"),
        float("ior"),
        ParamDesc::new("refract", ParamKind::Int),
    ];
    pub const ISO: &[ParamDesc] = &[N, float("alpha")];
    pub const ANISO: &[ParamDesc] = &[N, T, float("alpha_x"), float("alpha_y")];
    pub const ISO_REFRACT: &[ParamDesc] = &[N, float("alpha"), float("ior")];
    pub const MULTI: &[ParamDesc] = &[N, float("alpha"), color("color")];
    pub const MULTI_GLASS: &[ParamDesc] = &[N, float("alpha"), float("ior"), color("color")];
    pub const MULTI_ANISO: &[ParamDesc] =
        &[N, T, float("alpha_x"), float("alpha_y"), color("color")];
    pub const FRESNEL: &[ParamDesc] =
        &[N, float("alpha"), float("ior"), color("color"), color("cspec0")];
    pub const FRESNEL_ANISO: &[ParamDesc] = &[
        N,
        T,
        float("alpha_x"),
        float("alpha_y"),
        float("ior"),
        color("color"),
        color("cspec0"),
    ];
    pub const VELVET: &[ParamDesc] = &[N, float("sigma")];
    pub const TOON: &[ParamDesc] = &[N, float("size"), float("smooth")];
    pub const CLEARCOAT: &[ParamDesc] = &[N, float("clearcoat"), float("clearcoat_roughness")];
    pub const HAIR: &[ParamDesc] = &[
        N,
        float("roughness1"),
        float("roughness2"),
        T,
        float("offset"),
    ];
    pub const PRINCIPLED_HAIR: &[ParamDesc] = &[
        N,
        color("sigma"),
        float("v"),
        float("s"),
        float("coat"),
        float("alpha"),
        float("eta"),
    ];
    pub const CONDUCTOR: &[ParamDesc] = &[
        N,
        T,
        float("alpha_x"),
        float("alpha_y"),
        color("ior"),
        color("extinction"),
        ParamDesc::new("distribution", ParamKind::String),
    ];
    pub const F82_TINT: &[ParamDesc] = &[
        N,
        T,
        float("alpha_x"),
        float("alpha_y"),
        color("f0"),
        color("f82"),
        ParamDesc::new("distribution", ParamKind::String),
    ];
    pub const PHASE: &[ParamDesc] = &[float("g")];
    pub const FOURNIER_FORAND: &[ParamDesc] = &[float("B"), float("ior")];
    pub const DRAINE: &[ParamDesc] = &[float("g"), float("alpha")];
    pub const MIE: &[ParamDesc] = &[float("diameter")];
}

const DIFFUSE: ClosureLabel = ClosureLabel::DIFFUSE.union(ClosureLabel::REFLECT);
const TRANSLUCENT: ClosureLabel = ClosureLabel::DIFFUSE.union(ClosureLabel::TRANSMIT);
const GLOSSY: ClosureLabel = ClosureLabel::GLOSSY.union(ClosureLabel::REFLECT);
const GLOSSY_TRANSMIT: ClosureLabel = ClosureLabel::GLOSSY.union(ClosureLabel::TRANSMIT);
const GLOSSY_GLASS: ClosureLabel = GLOSSY.union(ClosureLabel::TRANSMIT);

fn normal(params: &Params<'_>, index: usize, ctx: &PrepareContext) -> Vec3d {
    params.vector(index).try_normalize().unwrap_or(ctx.n)
}

/// index of refraction as seen from the side the ray arrived from
fn facing_ior(ior: f64, ctx: &PrepareContext) -> f64 {
    let ior = ior.max(1e-5);
    if ctx.backfacing {
        1.0 / ior
    } else {
        ior
    }
}

fn scatter(ty: ClosureType, label: ClosureLabel, n: Vec3d, model: ClosureModel) -> Prepared {
    Prepared::Scatter(RegisteredClosure {
        ty,
        label,
        n,
        model,
        extra: None,
    })
}

fn scatter_with_extra(
    ty: ClosureType,
    label: ClosureLabel,
    n: Vec3d,
    model: ClosureModel,
    extra: ExtraData,
) -> Prepared {
    Prepared::Scatter(RegisteredClosure {
        ty,
        label,
        n,
        model,
        extra: Some(extra),
    })
}

fn microfacet_label(ty: ClosureType) -> ClosureLabel {
    match lobes_of(ty) {
        Some(MicrofacetLobes::Refract) => GLOSSY_TRANSMIT,
        Some(MicrofacetLobes::Glass) => GLOSSY_GLASS,
        _ => GLOSSY,
    }
}

fn diffuse(p: &Params<'_>, ctx: &PrepareContext) -> Prepared {
    let n = normal(p, 0, ctx);
    scatter(ClosureType::BsdfDiffuse, DIFFUSE, n, ClosureModel::Diffuse(DiffuseBsdf))
}

fn oren_nayar(p: &Params<'_>, ctx: &PrepareContext) -> Prepared {
    let n = normal(p, 0, ctx);
    let roughness = p.float(1);
    if roughness < LAMBERT_ROUGHNESS {
        scatter(ClosureType::BsdfDiffuse, DIFFUSE, n, ClosureModel::Diffuse(DiffuseBsdf))
    } else {
        let model = ClosureModel::OrenNayar(OrenNayarBsdf::new(roughness));
        scatter(ClosureType::BsdfOrenNayar, DIFFUSE, n, model)
    }
}

fn translucent(p: &Params<'_>, ctx: &PrepareContext) -> Prepared {
    let n = normal(p, 0, ctx);
    let model = ClosureModel::Translucent(TranslucentBsdf);
    scatter(ClosureType::BsdfTranslucent, TRANSLUCENT, n, model)
}

fn reflection(p: &Params<'_>, ctx: &PrepareContext) -> Prepared {
    let n = normal(p, 0, ctx);
    let model = ClosureModel::Microfacet(MicrofacetBsdf::isotropic(0.0, 1.0));
    scatter(ClosureType::BsdfReflection, GLOSSY, n, model)
}

fn refraction(p: &Params<'_>, ctx: &PrepareContext) -> Prepared {
    let n = normal(p, 0, ctx);
    let ior = facing_ior(p.float(1), ctx);
    let model = ClosureModel::Microfacet(MicrofacetBsdf::isotropic(0.0, ior));
    scatter(ClosureType::BsdfRefraction, GLOSSY_TRANSMIT, n, model)
}

fn transparent(_: &Params<'_>, _: &PrepareContext) -> Prepared {
    Prepared::Transparent
}

/// The generic closure that picks distribution and lobes from its parameters
fn microfacet(p: &Params<'_>, ctx: &PrepareContext) -> Prepared {
    let refract = p.int(6);
    let ty = microfacet_type(p.string(0), refract);
    let n = normal(p, 1, ctx);
    let (alpha_x, alpha_y, anisotropic) = microfacet_alphas(p.float(3), p.float(4));
    let t = if anisotropic { p.vector(2) } else { Vec3d::ZERO };
    let ior = if refract == 0 {
        p.float(5)
    } else {
        facing_ior(p.float(5), ctx)
    };
    let model = ClosureModel::Microfacet(MicrofacetBsdf::new(alpha_x, alpha_y, ior, t));
    scatter(ty, microfacet_label(ty), n, model)
}

fn isotropic(p: &Params<'_>, ctx: &PrepareContext, ty: ClosureType) -> Prepared {
    let n = normal(p, 0, ctx);
    let model = ClosureModel::Microfacet(MicrofacetBsdf::isotropic(p.float(1), 1.0));
    scatter(ty, GLOSSY, n, model)
}

fn microfacet_ggx(p: &Params<'_>, ctx: &PrepareContext) -> Prepared {
    isotropic(p, ctx, ClosureType::BsdfMicrofacetGgx)
}

fn microfacet_beckmann(p: &Params<'_>, ctx: &PrepareContext) -> Prepared {
    isotropic(p, ctx, ClosureType::BsdfMicrofacetBeckmann)
}

fn anisotropic(p: &Params<'_>, ctx: &PrepareContext, ty: ClosureType) -> Prepared {
    let n = normal(p, 0, ctx);
    let bsdf = MicrofacetBsdf::new(p.float(2), p.float(3), 1.0, p.vector(1));
    scatter(ty, GLOSSY, n, ClosureModel::Microfacet(bsdf))
}

fn microfacet_ggx_aniso(p: &Params<'_>, ctx: &PrepareContext) -> Prepared {
    anisotropic(p, ctx, ClosureType::BsdfMicrofacetGgx)
}

fn microfacet_beckmann_aniso(p: &Params<'_>, ctx: &PrepareContext) -> Prepared {
    anisotropic(p, ctx, ClosureType::BsdfMicrofacetBeckmann)
}

fn rough_refraction(p: &Params<'_>, ctx: &PrepareContext, ty: ClosureType) -> Prepared {
    let n = normal(p, 0, ctx);
    let bsdf = MicrofacetBsdf::isotropic(p.float(1), facing_ior(p.float(2), ctx));
    scatter(ty, GLOSSY_TRANSMIT, n, ClosureModel::Microfacet(bsdf))
}

fn microfacet_ggx_refraction(p: &Params<'_>, ctx: &PrepareContext) -> Prepared {
    rough_refraction(p, ctx, ClosureType::BsdfMicrofacetGgxRefraction)
}

fn microfacet_beckmann_refraction(p: &Params<'_>, ctx: &PrepareContext) -> Prepared {
    rough_refraction(p, ctx, ClosureType::BsdfMicrofacetBeckmannRefraction)
}

fn with_tint(
    ty: ClosureType,
    n: Vec3d,
    bsdf: MicrofacetBsdf,
    color: Spectrum,
    cspec0: Spectrum,
) -> Prepared {
    let extra = ExtraData::Microfacet(MicrofacetExtra {
        color: color.clamp(Spectrum::ZERO, Spectrum::ONE),
        cspec0: cspec0.clamp(Spectrum::ZERO, Spectrum::ONE),
        clearcoat: 0.0,
    });
    scatter_with_extra(ty, microfacet_label(ty), n, ClosureModel::Microfacet(bsdf), extra)
}

fn microfacet_multi_ggx(p: &Params<'_>, ctx: &PrepareContext) -> Prepared {
    let bsdf = MicrofacetBsdf::isotropic(p.float(1), 1.0);
    let ty = ClosureType::BsdfMicrofacetMultiGgx;
    with_tint(ty, normal(p, 0, ctx), bsdf, p.color(2), Spectrum::ZERO)
}

fn microfacet_multi_ggx_glass(p: &Params<'_>, ctx: &PrepareContext) -> Prepared {
    let bsdf = MicrofacetBsdf::isotropic(p.float(1), facing_ior(p.float(2), ctx));
    let ty = ClosureType::BsdfMicrofacetMultiGgxGlass;
    with_tint(ty, normal(p, 0, ctx), bsdf, p.color(3), Spectrum::ZERO)
}

fn microfacet_multi_ggx_aniso(p: &Params<'_>, ctx: &PrepareContext) -> Prepared {
    let bsdf = MicrofacetBsdf::new(p.float(2), p.float(3), 1.0, p.vector(1));
    let ty = ClosureType::BsdfMicrofacetMultiGgx;
    with_tint(ty, normal(p, 0, ctx), bsdf, p.color(4), Spectrum::ZERO)
}

fn fresnel_iso(p: &Params<'_>, ctx: &PrepareContext, ty: ClosureType) -> Prepared {
    let ior = if lobes_of(ty) == Some(MicrofacetLobes::Glass) {
        facing_ior(p.float(2), ctx)
    } else {
        p.float(2)
    };
    let bsdf = MicrofacetBsdf::isotropic(p.float(1), ior);
    with_tint(ty, normal(p, 0, ctx), bsdf, p.color(3), p.color(4))
}

fn fresnel_aniso(p: &Params<'_>, ctx: &PrepareContext, ty: ClosureType) -> Prepared {
    let bsdf = MicrofacetBsdf::new(p.float(2), p.float(3), p.float(4), p.vector(1));
    with_tint(ty, normal(p, 0, ctx), bsdf, p.color(5), p.color(6))
}

fn microfacet_ggx_fresnel(p: &Params<'_>, ctx: &PrepareContext) -> Prepared {
    fresnel_iso(p, ctx, ClosureType::BsdfMicrofacetGgxFresnel)
}

fn microfacet_ggx_aniso_fresnel(p: &Params<'_>, ctx: &PrepareContext) -> Prepared {
    fresnel_aniso(p, ctx, ClosureType::BsdfMicrofacetGgxFresnel)
}

fn microfacet_multi_ggx_fresnel(p: &Params<'_>, ctx: &PrepareContext) -> Prepared {
    fresnel_iso(p, ctx, ClosureType::BsdfMicrofacetMultiGgxFresnel)
}

fn microfacet_multi_ggx_glass_fresnel(p: &Params<'_>, ctx: &PrepareContext) -> Prepared {
    fresnel_iso(p, ctx, ClosureType::BsdfMicrofacetMultiGgxGlassFresnel)
}

fn microfacet_multi_ggx_aniso_fresnel(p: &Params<'_>, ctx: &PrepareContext) -> Prepared {
    fresnel_aniso(p, ctx, ClosureType::BsdfMicrofacetMultiGgxFresnel)
}

fn ashikhmin_velvet(p: &Params<'_>, ctx: &PrepareContext) -> Prepared {
    let model = ClosureModel::Velvet(VelvetBsdf::new(p.float(1)));
    scatter(ClosureType::BsdfAshikhminVelvet, DIFFUSE, normal(p, 0, ctx), model)
}

fn toon(p: &Params<'_>, ctx: &PrepareContext, ty: ClosureType, label: ClosureLabel) -> Prepared {
    let model = ClosureModel::Toon(ToonBsdf {
        size: p.float(1),
        smooth: p.float(2),
    });
    scatter(ty, label, normal(p, 0, ctx), model)
}

fn diffuse_toon(p: &Params<'_>, ctx: &PrepareContext) -> Prepared {
    toon(p, ctx, ClosureType::BsdfDiffuseToon, DIFFUSE)
}

fn glossy_toon(p: &Params<'_>, ctx: &PrepareContext) -> Prepared {
    toon(p, ctx, ClosureType::BsdfGlossyToon, GLOSSY)
}

fn principled_diffuse(p: &Params<'_>, ctx: &PrepareContext) -> Prepared {
    let model = ClosureModel::PrincipledDiffuse(PrincipledDiffuseBsdf::new(p.float(1)));
    scatter(ClosureType::BsdfPrincipledDiffuse, DIFFUSE, normal(p, 0, ctx), model)
}

fn principled_sheen(p: &Params<'_>, ctx: &PrepareContext) -> Prepared {
    let model = ClosureModel::PrincipledSheen(PrincipledSheenBsdf::default());
    scatter(ClosureType::BsdfPrincipledSheen, DIFFUSE, normal(p, 0, ctx), model)
}

fn principled_clearcoat(p: &Params<'_>, ctx: &PrepareContext) -> Prepared {
    let bsdf = MicrofacetBsdf::isotropic(p.float(2), 1.5);
    let extra = ExtraData::Microfacet(MicrofacetExtra {
        color: Spectrum::ZERO,
        cspec0: Spectrum::splat(0.04),
        clearcoat: p.float(1).saturate(),
    });
    let ty = ClosureType::BsdfMicrofacetGgxClearcoat;
    scatter_with_extra(ty, GLOSSY, normal(p, 0, ctx), ClosureModel::Microfacet(bsdf), extra)
}

fn emission(_: &Params<'_>, _: &PrepareContext) -> Prepared {
    Prepared::Emission
}

fn background(_: &Params<'_>, _: &PrepareContext) -> Prepared {
    Prepared::Background
}

fn holdout(_: &Params<'_>, _: &PrepareContext) -> Prepared {
    Prepared::Holdout
}

fn hair(p: &Params<'_>, ctx: &PrepareContext, ty: ClosureType, label: ClosureLabel) -> Prepared {
    let model = ClosureModel::Hair(HairBsdf::new(p.float(1), p.float(2), p.float(4), p.vector(3)));
    scatter(ty, label, normal(p, 0, ctx), model)
}

fn hair_reflection(p: &Params<'_>, ctx: &PrepareContext) -> Prepared {
    hair(p, ctx, ClosureType::BsdfHairReflection, GLOSSY)
}

fn hair_transmission(p: &Params<'_>, ctx: &PrepareContext) -> Prepared {
    hair(p, ctx, ClosureType::BsdfHairTransmission, GLOSSY_TRANSMIT)
}

fn principled_hair(p: &Params<'_>, ctx: &PrepareContext) -> Prepared {
    let model = ClosureModel::PrincipledHair(PrincipledHairBsdf {
        sigma: p.color(1),
        v: p.float(2),
        s: p.float(3),
        m0_roughness: 1.0 - p.float(4).clamp(0.0, 1.0),
        alpha: p.float(5),
        eta: p.float(6),
        extra: None,
    });
    let extra = ExtraData::PrincipledHair(PrincipledHairExtra::default());
    let ty = ClosureType::BsdfPrincipledHair;
    scatter_with_extra(ty, GLOSSY_GLASS, normal(p, 0, ctx), model, extra)
}

fn conductor(p: &Params<'_>, ctx: &PrepareContext, fresnel: ConductorFresnel) -> Prepared {
    let ty = conductor_type(p.string(6));
    let bsdf = MicrofacetBsdf::new(p.float(2), p.float(3), 1.0, p.vector(1));
    let extra = ExtraData::Conductor(fresnel);
    scatter_with_extra(ty, GLOSSY, normal(p, 0, ctx), ClosureModel::Microfacet(bsdf), extra)
}

fn conductor_bsdf(p: &Params<'_>, ctx: &PrepareContext) -> Prepared {
    conductor(p, ctx, ConductorFresnel::physical(p.color(4), p.color(5)))
}

fn f82_tint(p: &Params<'_>, ctx: &PrepareContext) -> Prepared {
    conductor(p, ctx, ConductorFresnel::f82_tint(p.color(4), p.color(5)))
}

fn phase(ty: ClosureType, ctx: &PrepareContext, model: ClosureModel) -> Prepared {
    scatter(ty, ClosureLabel::VOLUME_SCATTER, ctx.n, model)
}

fn henyey_greenstein(p: &Params<'_>, ctx: &PrepareContext) -> Prepared {
    let model = ClosureModel::HenyeyGreenstein(HenyeyGreensteinVolume { g: p.float(0) });
    phase(ClosureType::VolumeHenyeyGreenstein, ctx, model)
}

fn fournier_forand(p: &Params<'_>, ctx: &PrepareContext) -> Prepared {
    let model = ClosureModel::FournierForand(FournierForandVolume::new(p.float(0), p.float(1)));
    phase(ClosureType::VolumeFournierForand, ctx, model)
}

fn rayleigh(_: &Params<'_>, ctx: &PrepareContext) -> Prepared {
    phase(ClosureType::VolumeRayleigh, ctx, ClosureModel::Rayleigh(RayleighVolume))
}

fn draine(p: &Params<'_>, ctx: &PrepareContext) -> Prepared {
    let model = ClosureModel::Draine(DraineVolume {
        g: p.float(0),
        alpha: p.float(1),
    });
    phase(ClosureType::VolumeDraine, ctx, model)
}

fn mie(p: &Params<'_>, ctx: &PrepareContext) -> Prepared {
    let model = ClosureModel::Mie(MieVolume::from_diameter(p.float(0)));
    phase(ClosureType::VolumeMie, ctx, model)
}

fn absorption(_: &Params<'_>, _: &PrepareContext) -> Prepared {
    Prepared::Absorption
}

type TableRow = (&'static str, &'static [ParamDesc], ClosureLabel, ShaderContexts, PrepareFn);

fn standard_entries() -> Vec<ClosureEntry> {
    const S: ShaderContexts = ShaderContexts::SURFACE;
    const EMIT: ShaderContexts = ShaderContexts::all();
    const B: ShaderContexts = ShaderContexts::BACKGROUND;
    const V: ShaderContexts = ShaderContexts::VOLUME;
    const SCATTER: ClosureLabel = ClosureLabel::VOLUME_SCATTER;
    let none = ClosureLabel::empty();

    let table: [TableRow; 41] = [
        ("diffuse", params::NORMAL, DIFFUSE, S, diffuse),
        ("oren_nayar", params::ROUGH, DIFFUSE, S, oren_nayar),
        ("translucent", params::NORMAL, TRANSLUCENT, S, translucent),
        ("reflection", params::NORMAL, GLOSSY, S, reflection),
        ("refraction", params::REFRACT, GLOSSY_TRANSMIT, S, refraction),
        (
            "transparent",
            params::NONE,
            ClosureLabel::TRANSPARENT.union(ClosureLabel::TRANSMIT),
            S,
            transparent,
        ),
        ("microfacet", params::MICROFACET, GLOSSY, S, microfacet),
        ("microfacet_ggx", params::ISO, GLOSSY, S, microfacet_ggx),
        ("microfacet_ggx_aniso", params::ANISO, GLOSSY, S, microfacet_ggx_aniso),
        (
            "microfacet_ggx_refraction",
            params::ISO_REFRACT,
            GLOSSY_TRANSMIT,
            S,
            microfacet_ggx_refraction,
        ),
        ("microfacet_multi_ggx", params::MULTI, GLOSSY, S, microfacet_multi_ggx),
        (
            "microfacet_multi_ggx_glass",
            params::MULTI_GLASS,
            GLOSSY_GLASS,
            S,
            microfacet_multi_ggx_glass,
        ),
        (
            "microfacet_multi_ggx_aniso",
            params::MULTI_ANISO,
            GLOSSY,
            S,
            microfacet_multi_ggx_aniso,
        ),
        ("microfacet_ggx_fresnel", params::FRESNEL, GLOSSY, S, microfacet_ggx_fresnel),
        (
            "microfacet_ggx_aniso_fresnel",
            params::FRESNEL_ANISO,
            GLOSSY,
            S,
            microfacet_ggx_aniso_fresnel,
        ),
        (
            "microfacet_multi_ggx_fresnel",
            params::FRESNEL,
            GLOSSY,
            S,
            microfacet_multi_ggx_fresnel,
        ),
        (
            "microfacet_multi_ggx_glass_fresnel",
            params::FRESNEL,
            GLOSSY_GLASS,
            S,
            microfacet_multi_ggx_glass_fresnel,
        ),
        (
            "microfacet_multi_ggx_aniso_fresnel",
            params::FRESNEL_ANISO,
            GLOSSY,
            S,
            microfacet_multi_ggx_aniso_fresnel,
        ),
        ("microfacet_beckmann", params::ISO, GLOSSY, S, microfacet_beckmann),
        (
            "microfacet_beckmann_aniso",
            params::ANISO,
            GLOSSY,
            S,
            microfacet_beckmann_aniso,
        ),
        (
            "microfacet_beckmann_refraction",
            params::ISO_REFRACT,
            GLOSSY_TRANSMIT,
            S,
            microfacet_beckmann_refraction,
        ),
        ("ashikhmin_velvet", params::VELVET, DIFFUSE, S, ashikhmin_velvet),
        ("diffuse_toon", params::TOON, DIFFUSE, S, diffuse_toon),
        ("glossy_toon", params::TOON, GLOSSY, S, glossy_toon),
        ("principled_diffuse", params::ROUGH, DIFFUSE, S, principled_diffuse),
        ("principled_sheen", params::NORMAL, DIFFUSE, S, principled_sheen),
        ("principled_clearcoat", params::CLEARCOAT, GLOSSY, S, principled_clearcoat),
        ("emission", params::NONE, none, EMIT, emission),
        ("background", params::NONE, none, B, background),
        ("holdout", params::NONE, none, S, holdout),
        ("hair_reflection", params::HAIR, GLOSSY, S, hair_reflection),
        ("hair_transmission", params::HAIR, GLOSSY_TRANSMIT, S, hair_transmission),
        ("principled_hair", params::PRINCIPLED_HAIR, GLOSSY_GLASS, S, principled_hair),
        ("henyey_greenstein", params::PHASE, SCATTER, V, henyey_greenstein),
        ("absorption", params::NONE, none, V, absorption),
        ("conductor_bsdf", params::CONDUCTOR, GLOSSY, S, conductor_bsdf),
        ("f82_tint", params::F82_TINT, GLOSSY, S, f82_tint),
        ("fournier_forand", params::FOURNIER_FORAND, SCATTER, V, fournier_forand),
        ("rayleigh", params::NONE, SCATTER, V, rayleigh),
        ("draine", params::DRAINE, SCATTER, V, draine),
        ("mie", params::MIE, SCATTER, V, mie),
    ];

    table
        .into_iter()
        .enumerate()
        .map(|(id, (name, params, label, contexts, prepare))| {
            ClosureEntry::new(name, id, params, label, contexts, prepare)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::IntegratorSettings,
        flatten::{flatten_surface, flatten_volume, ClosureTree},
        test_utils::{assert_eq_approx_abs, spherical_sample},
        utils::VecExt,
        PathFlags, ShaderData,
    };

    const FRONT: PrepareContext = PrepareContext {
        backfacing: false,
        n: Vec3d::Z,
    };

    fn prepare(registry: &Registry, name: &str, values: &[ParamValue]) -> Option<Prepared> {
        let entry = registry.by_id(registry.id_of(name).unwrap()).unwrap();
        entry.prepare(values, &FRONT)
    }

    fn scatter_of(prepared: Option<Prepared>) -> RegisteredClosure {
        match prepared {
            Some(Prepared::Scatter(closure)) => closure,
            other => panic!("expected a scattering closure, got {other:?}"),
        }
    }

    #[test]
    fn ids_follow_registration_order() {
        let registry = Registry::build().unwrap();
        assert_eq!(registry.len(), 41);
        assert_eq!(registry.id_of("diffuse"), Some(0));
        assert_eq!(registry.id_of("oren_nayar"), Some(1));
        assert_eq!(registry.id_of("absorption"), Some(34));
        assert_eq!(registry.id_of("mie"), Some(40));
        for (index, entry) in registry.iter().enumerate() {
            assert_eq!(entry.id, index);
            assert_eq!(registry.id_of(entry.name), Some(index));
        }
        assert_eq!(registry.id_of("bssrdf"), None);
        assert!(registry.by_id(41).is_none());
    }

    #[test]
    fn invalid_tables_are_rejected() {
        let entry = |name, id| {
            ClosureEntry::new(name, id, params::NORMAL, DIFFUSE, ShaderContexts::SURFACE, diffuse)
        };
        assert_eq!(
            Registry::new(vec![entry("diffuse", 0), entry("diffuse", 1)]).unwrap_err(),
            RegistryError::DuplicateName("diffuse")
        );
        assert_eq!(
            Registry::new(vec![entry("diffuse", 0), entry("other", 2)]).unwrap_err(),
            RegistryError::NonDenseId {
                name: "other",
                expected: 1,
                found: 2
            }
        );
        assert_eq!(
            Registry::new(vec![entry("", 0)]).unwrap_err(),
            RegistryError::EmptyName { id: 0 }
        );
        const UNNAMED: &[ParamDesc] = &[ParamDesc::new("", ParamKind::Float)];
        let unnamed =
            ClosureEntry::new("x", 0, UNNAMED, DIFFUSE, ShaderContexts::SURFACE, diffuse);
        assert_eq!(
            Registry::new(vec![unnamed]).unwrap_err(),
            RegistryError::EmptyParamName { name: "x", index: 0 }
        );
    }

    #[test]
    fn mismatching_parameters_drop_the_leaf() {
        let registry = Registry::build().unwrap();
        assert!(prepare(&registry, "diffuse", &[]).is_none());
        assert!(prepare(&registry, "diffuse", &[ParamValue::Float(1.0)]).is_none());
        assert!(prepare(&registry, "diffuse", &[ParamValue::Vector(Vec3d::Z)]).is_some());
    }

    #[test]
    fn smooth_oren_nayar_is_lambert() {
        let registry = Registry::build().unwrap();
        let n = ParamValue::Vector(Vec3d::Z);
        let smooth = [n.clone(), ParamValue::Float(0.0)];
        let smooth = scatter_of(prepare(&registry, "oren_nayar", &smooth));
        assert_eq!(smooth.ty, ClosureType::BsdfDiffuse);
        let rough = scatter_of(prepare(&registry, "oren_nayar", &[n, ParamValue::Float(0.5)]));
        assert_eq!(rough.ty, ClosureType::BsdfOrenNayar);
    }

    #[test]
    fn generic_microfacet_decision_table() {
        let registry = Registry::build().unwrap();
        let leaf = |distribution: &str, roughness, anisotropy, refract| {
            vec![
                ParamValue::String(distribution.to_owned()),
                ParamValue::Vector(Vec3d::Z),
                ParamValue::Vector(Vec3d::X),
                ParamValue::Float(roughness),
                ParamValue::Float(anisotropy),
                ParamValue::Float(1.5),
                ParamValue::Int(refract),
            ]
        };

        let ggx = scatter_of(prepare(&registry, "microfacet", &leaf("ggx", 0.5, 0.0, 0)));
        assert_eq!(ggx.ty, ClosureType::BsdfMicrofacetGgx);
        assert_eq!(ggx.label, GLOSSY);
        let ClosureModel::Microfacet(bsdf) = ggx.model else {
            panic!("wrong model");
        };
        assert_eq_approx_abs!(bsdf.alpha_x, 0.25, 1e-12);
        assert_eq_approx_abs!(bsdf.alpha_y, 0.25, 1e-12);
        assert_eq!(bsdf.t, Vec3d::ZERO);

        let aniso = scatter_of(prepare(&registry, "microfacet", &leaf("ggx", 0.5, 0.5, 0)));
        let ClosureModel::Microfacet(bsdf) = aniso.model else {
            panic!("wrong model");
        };
        assert_eq_approx_abs!(bsdf.alpha_x, 0.125, 1e-12);
        assert_eq_approx_abs!(bsdf.alpha_y, 0.5, 1e-12);
        assert_eq!(bsdf.t, Vec3d::X);

        let glass = scatter_of(prepare(&registry, "microfacet", &leaf("beckmann", 0.3, 0.0, 2)));
        assert_eq!(glass.ty, ClosureType::BsdfMicrofacetBeckmannGlass);
        assert_eq!(glass.label, GLOSSY_GLASS);
        assert!(glass.is_glass());

        let multi = scatter_of(prepare(&registry, "microfacet", &leaf("multi_ggx", 0.3, 0.0, 1)));
        assert_eq!(multi.ty, ClosureType::BsdfMicrofacetMultiGgxGlass);
    }

    #[test]
    fn backfacing_inverts_ior() {
        let registry = Registry::build().unwrap();
        let entry = registry.by_id(registry.id_of("refraction").unwrap()).unwrap();
        let values = [ParamValue::Vector(Vec3d::Z), ParamValue::Float(1.5)];
        let back = PrepareContext {
            backfacing: true,
            n: Vec3d::Z,
        };
        let closure = scatter_of(entry.prepare(&values, &back));
        let ClosureModel::Microfacet(bsdf) = closure.model else {
            panic!("wrong model");
        };
        assert_eq_approx_abs!(bsdf.ior, 1.0 / 1.5, 1e-12);
        let closure = scatter_of(entry.prepare(&values, &FRONT));
        let ClosureModel::Microfacet(bsdf) = closure.model else {
            panic!("wrong model");
        };
        assert_eq_approx_abs!(bsdf.ior, 1.5, 1e-12);
    }

    #[test]
    fn extra_blocks_are_attached_on_allocation() {
        let registry = Registry::build().unwrap();
        let values = [
            ParamValue::Vector(Vec3d::Z),
            ParamValue::Float(0.2),
            ParamValue::Float(1.5),
            ParamValue::Color(Spectrum::ONE),
            ParamValue::Color(Spectrum::splat(0.04)),
        ];
        let closure = scatter_of(prepare(&registry, "microfacet_ggx_fresnel", &values));
        assert!(matches!(closure.extra, Some(ExtraData::Microfacet(_))));

        let mut list = crate::alloc::ClosureList::new(4);
        let extra = closure.extra.unwrap();
        let index = list
            .alloc_with_extra(extra, |r| closure.into_record(Spectrum::ONE, Some(r)))
            .unwrap();
        let ClosureModel::Microfacet(bsdf) = list.get(index).unwrap().model else {
            panic!("wrong model");
        };
        assert!(list.extra().microfacet(bsdf.extra).is_some());
    }

    #[test]
    fn degenerate_normal_falls_back_to_shading_normal() {
        let registry = Registry::build().unwrap();
        let values = [ParamValue::Vector(Vec3d::ZERO)];
        let closure = scatter_of(prepare(&registry, "diffuse", &values));
        assert_eq!(closure.n, Vec3d::Z);
    }

    #[test]
    fn contexts() {
        let registry = Registry::build().unwrap();
        let contexts = |name| registry.by_id(registry.id_of(name).unwrap()).unwrap().contexts;
        assert_eq!(contexts("background"), ShaderContexts::BACKGROUND);
        assert_eq!(contexts("emission"), ShaderContexts::all());
        assert_eq!(contexts("henyey_greenstein"), ShaderContexts::VOLUME);
        assert_eq!(contexts("diffuse"), ShaderContexts::SURFACE);
    }

    #[test]
    fn clearcoat_amount_is_clamped() {
        let registry = Registry::build().unwrap();
        let amount = |clearcoat| {
            let values = [
                ParamValue::Vector(Vec3d::Z),
                ParamValue::Float(clearcoat),
                ParamValue::Float(0.3),
            ];
            match scatter_of(prepare(&registry, "principled_clearcoat", &values)).extra {
                Some(ExtraData::Microfacet(extra)) => extra.clearcoat,
                other => panic!("expected a clearcoat block, got {other:?}"),
            }
        };
        assert_eq!(amount(-1.0), 0.0);
        assert_eq!(amount(0.25), 0.25);
        assert_eq!(amount(2.0), 1.0);
    }

    #[test]
    fn tints_are_clamped() {
        let registry = Registry::build().unwrap();
        let values = [
            ParamValue::Vector(Vec3d::Z),
            ParamValue::Float(0.2),
            ParamValue::Float(1.5),
            ParamValue::Color(Spectrum::new(-1.0, 0.5, 2.0)),
            ParamValue::Color(Spectrum::splat(-1.0)),
        ];
        let closure = scatter_of(prepare(&registry, "microfacet_ggx_fresnel", &values));
        let Some(ExtraData::Microfacet(extra)) = closure.extra else {
            panic!("wrong extra block");
        };
        assert_eq!(extra.color, Spectrum::new(0.0, 0.5, 1.0));
        assert_eq!(extra.cspec0, Spectrum::ZERO);
    }

    fn default_value(desc: &ParamDesc) -> ParamValue {
        match desc.kind {
            ParamKind::Float => ParamValue::Float(0.5),
            ParamKind::Color => ParamValue::Color(Spectrum::splat(0.5)),
            ParamKind::Vector if desc.name == "N" => ParamValue::Vector(Vec3d::Z),
            ParamKind::Vector => ParamValue::Vector(Vec3d::X),
            ParamKind::Int => ParamValue::Int(0),
            ParamKind::String => ParamValue::String("ggx".to_owned()),
        }
    }

    fn swept_values(desc: &ParamDesc) -> Vec<ParamValue> {
        match desc.kind {
            ParamKind::Float => [-1.0, 0.0, 2.0].map(ParamValue::Float).to_vec(),
            ParamKind::Color => [-1.0, 0.0, 2.0]
                .map(|v| ParamValue::Color(Spectrum::splat(v)))
                .to_vec(),
            ParamKind::Vector => [-1.0, 0.0, 2.0]
                .map(|v| ParamValue::Vector(Vec3d::splat(v)))
                .to_vec(),
            ParamKind::Int => [-1, 0, 2].map(ParamValue::Int).to_vec(),
            ParamKind::String => ["ggx", "beckmann", "multi_ggx"]
                .map(|s| ParamValue::String(s.to_owned()))
                .to_vec(),
        }
    }

    /// Flattens one leaf and checks every stored record for non-negative results
    fn check_leaf(registry: &Registry, entry: &ClosureEntry, values: Vec<ParamValue>) {
        let settings = IntegratorSettings::default();
        let mut sd = ShaderData::new(settings.max_closures);
        sd.i = Vec3d::new(0.6, 0.0, 0.8);
        let context = format!("{} {values:?}", entry.name);
        let tree = ClosureTree::leaf(registry, entry.name, values).unwrap();
        if entry.contexts.contains(ShaderContexts::SURFACE) {
            flatten_surface(registry, &settings, &mut sd, PathFlags::CAMERA, Some(&tree));
        } else if entry.contexts.contains(ShaderContexts::VOLUME) {
            flatten_volume(registry, &settings, &mut sd, PathFlags::CAMERA, Some(&tree));
        } else {
            return;
        }

        let extra = sd.closures.extra();
        let mut rd = fastrand::Rng::with_seed(0x5eed);
        for closure in sd.closures.iter() {
            let weight = closure.base.sample_weight;
            assert!(weight.is_finite() && weight >= 0.0, "{context}: sample weight {weight}");
            for _ in 0..32 {
                let omega_in = spherical_sample(&mut rd);
                let e = closure.eval(extra, sd.ng, sd.i, omega_in);
                assert!(e.eval.is_finite_nonnegative(), "{context}: eval {:?}", e.eval);
                assert!(e.pdf.is_finite() && e.pdf >= 0.0, "{context}: pdf {}", e.pdf);

                let s = closure.sample(extra, sd.ng, sd.i, rd.f64(), rd.f64());
                assert!(s.eval.is_finite_nonnegative(), "{context}: sampled {:?}", s.eval);
                assert!(s.pdf.is_finite() && s.pdf >= 0.0, "{context}: sampled pdf {}", s.pdf);
            }
        }
    }

    #[test]
    fn out_of_range_parameters_stay_non_negative() {
        let registry = Registry::build().unwrap();
        for entry in registry.iter() {
            let defaults: Vec<_> = entry.params.iter().map(default_value).collect();
            check_leaf(&registry, entry, defaults.clone());
            for (index, desc) in entry.params.iter().enumerate() {
                for value in swept_values(desc) {
                    let mut values = defaults.clone();
                    values[index] = value;
                    check_leaf(&registry, entry, values);
                }
            }
        }
    }
}
