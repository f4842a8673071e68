//! Turns the weighted closure tree produced by a shader into closure records.
//!
//! The walk carries the accumulated weight down the tree. Every leaf is prepared through the
//! registry and then either stored as a record, or summed into the shading point if it has no
//! record of its own (emission, background, absorption).
use log::{debug, trace, warn};

use crate::{
    closure::{ClosureModel, ShaderClosure},
    config::IntegratorSettings,
    emissive::{background_setup, emission_setup, HoldoutClosure},
    error::RegistryError,
    registry::{ParamValue, PrepareContext, Prepared, RegisteredClosure, Registry, ShaderContexts},
    shading::ShaderData,
    transparent::{survives_termination, transparent_setup},
    volume::volume_extinction_setup,
    ClosureBase, ClosureLabel, ClosureType, PathFlags, SdFlags, SetupContext, Spectrum,
};

/// A weighted sum of closures as built by the shading language
#[derive(Clone, Debug, PartialEq)]
pub enum ClosureTree {
    Leaf { id: usize, params: Vec<ParamValue> },
    Mul { weight: Spectrum, child: Box<ClosureTree> },
    Add(Box<ClosureTree>, Box<ClosureTree>),
}

impl ClosureTree {
    /// A leaf for the closure registered under `name`
    ///
    /// # Errors
    /// If no closure with that name is registered
    pub fn leaf(
        registry: &Registry,
        name: &str,
        params: Vec<ParamValue>,
    ) -> Result<Self, RegistryError> {
        let id = registry
            .id_of(name)
            .ok_or_else(|| RegistryError::UnknownClosure(name.to_owned()))?;
        Ok(Self::Leaf { id, params })
    }

    #[must_use]
    pub fn mul(weight: Spectrum, child: Self) -> Self {
        Self::Mul {
            weight,
            child: Box::new(child),
        }
    }

    #[must_use]
    pub fn add(a: Self, b: Self) -> Self {
        Self::Add(Box::new(a), Box::new(b))
    }
}

struct Flattener<'a> {
    registry: &'a Registry,
    settings: &'a IntegratorSettings,
    context: ShaderContexts,
    path_flag: PathFlags,
}

impl Flattener<'_> {
    fn walk(&self, sd: &mut ShaderData, tree: &ClosureTree, weight: Spectrum) {
        match tree {
            ClosureTree::Mul { weight: w, child } => self.walk(sd, child, weight * *w),
            ClosureTree::Add(a, b) => {
                self.walk(sd, a, weight);
                self.walk(sd, b, weight);
            }
            ClosureTree::Leaf { id, params } => self.leaf(sd, *id, params, weight),
        }
    }

    fn leaf(&self, sd: &mut ShaderData, id: usize, params: &[ParamValue], weight: Spectrum) {
        let Some(entry) = self.registry.by_id(id) else {
            warn!("closure id {id} is not registered");
            return;
        };
        if !entry.contexts.intersects(self.context) {
            debug!("closure {} has no meaning in {:?} shaders", entry.name, self.context);
            return;
        }
        let ctx = PrepareContext {
            backfacing: sd.flag.contains(SdFlags::BACKFACING),
            n: sd.n,
        };
        let Some(prepared) = entry.prepare(params, &ctx) else {
            return;
        };

        match prepared {
            Prepared::Scatter(closure) => self.scatter(sd, closure, weight),
            Prepared::Emission if self.context == ShaderContexts::BACKGROUND => {
                background_setup(sd, weight);
            }
            Prepared::Emission => emission_setup(sd, weight),
            Prepared::Background => background_setup(sd, weight),
            Prepared::Holdout => {
                sd.flag |= SdFlags::HOLDOUT;
                let holdout = ShaderClosure::new(
                    ClosureBase::new(ClosureType::Holdout, weight, sd.n),
                    ClosureModel::Holdout(HoldoutClosure),
                );
                if let Some(index) = sd.closures.alloc(holdout) {
                    setup_record(sd, index);
                }
            }
            Prepared::Transparent => transparent_setup(sd, weight),
            Prepared::Absorption => volume_extinction_setup(sd, weight),
        }
    }

    fn scatter(&self, sd: &mut ShaderData, mut closure: RegisteredClosure, weight: Spectrum) {
        if !survives_termination(closure.ty, self.path_flag) {
            trace!("dropping {} on a terminating path", closure.ty);
            return;
        }
        if !self.caustics_gate(&mut closure) {
            trace!("dropping {} as a caustic", closure.ty);
            return;
        }
        if closure.ty.is_volume() {
            volume_extinction_setup(sd, weight);
        }

        let index = match closure.extra {
            Some(data) => sd
                .closures
                .alloc_with_extra(data, |r| closure.into_record(weight, Some(r))),
            None => sd.closures.alloc(closure.into_record(weight, None)),
        };
        if let Some(index) = index {
            setup_record(sd, index);
        }
    }

    /// Returns `false` if the closure is dropped. Glass keeps the lobes that are still enabled.
    fn caustics_gate(&self, closure: &mut RegisteredClosure) -> bool {
        if !closure.label.contains(ClosureLabel::GLOSSY)
            || !self.path_flag.contains(PathFlags::DIFFUSE)
        {
            return true;
        }
        let reflective = self.settings.caustics_reflective;
        let refractive = self.settings.caustics_refractive;

        if closure.is_glass() {
            if let ClosureModel::Microfacet(bsdf) = &mut closure.model {
                if !reflective {
                    bsdf.reflection_tint = 0.0;
                }
                if !refractive {
                    bsdf.transmission_tint = 0.0;
                }
            }
            return reflective || refractive;
        }

        let reflect = closure.label.contains(ClosureLabel::REFLECT);
        let transmit = closure.label.contains(ClosureLabel::TRANSMIT);
        match (reflect, transmit) {
            (true, false) => reflective,
            (false, true) => refractive,
            (true, true) => reflective || refractive,
            (false, false) => true,
        }
    }
}

fn setup_record(sd: &mut ShaderData, index: usize) {
    let (i, ng, dpdu, v, ribbon) = (sd.i, sd.ng, sd.dpdu, sd.v, sd.ribbon);
    let Some((record, extra)) = sd.closures.record_and_extra_mut(index) else {
        return;
    };
    let mut ctx = SetupContext {
        i,
        ng,
        dpdu,
        v,
        ribbon,
        extra,
    };
    let flags = record.setup(&mut ctx);
    sd.flag |= flags;
}

/// Flattens the result of a surface shader into `sd`
pub fn flatten_surface(
    registry: &Registry,
    settings: &IntegratorSettings,
    sd: &mut ShaderData,
    path_flag: PathFlags,
    tree: Option<&ClosureTree>,
) {
    let flattener = Flattener {
        registry,
        settings,
        context: ShaderContexts::SURFACE,
        path_flag,
    };
    if let Some(tree) = tree {
        flattener.walk(sd, tree, Spectrum::ONE);
    }
}

/// Flattens the result of a world shader. Only emitted light is kept.
pub fn flatten_background(
    registry: &Registry,
    settings: &IntegratorSettings,
    sd: &mut ShaderData,
    tree: Option<&ClosureTree>,
) {
    let flattener = Flattener {
        registry,
        settings,
        context: ShaderContexts::BACKGROUND,
        path_flag: PathFlags::empty(),
    };
    if let Some(tree) = tree {
        flattener.walk(sd, tree, Spectrum::ONE);
    }
}

/// Flattens the result of a volume shader into phase functions, extinction and emission
pub fn flatten_volume(
    registry: &Registry,
    settings: &IntegratorSettings,
    sd: &mut ShaderData,
    path_flag: PathFlags,
    tree: Option<&ClosureTree>,
) {
    let flattener = Flattener {
        registry,
        settings,
        context: ShaderContexts::VOLUME,
        path_flag,
    };
    if let Some(tree) = tree {
        flattener.walk(sd, tree, Spectrum::ONE);
    }
}
