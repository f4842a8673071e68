//! The bridge between a shading point and the shading language runtime.
//!
//! A [`ThreadContext`] is created once per render thread. For each shading point it fills the
//! runtime's globals from the [`ShaderData`], runs the shader and flattens the returned closure
//! tree back into the shading point.
use log::{debug, trace};
use strum::{Display, IntoStaticStr};

use crate::{
    alloc::{ClosureList, MAX_CLOSURE},
    attribute::{find_standard_attribute, AttributeKind, AttributeSource, AttributeStandard},
    config::IntegratorSettings,
    flatten::{flatten_background, flatten_surface, flatten_volume, ClosureTree},
    registry::Registry,
    PathFlags, SdFlags, Spectrum, Vec3d,
};

/// Screen space derivatives of a vector
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Differential3 {
    pub dx: Vec3d,
    pub dy: Vec3d,
}

/// Screen space derivatives of a scalar
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Differential {
    pub dx: f64,
    pub dy: f64,
}

/// Everything known about one shading point, including the closures of its shader
#[derive(Clone, Debug)]
pub struct ShaderData {
    pub p: Vec3d,
    pub dp: Differential3,
    /// direction towards the viewer
    pub i: Vec3d,
    pub di: Differential3,
    /// shading normal
    pub n: Vec3d,
    /// geometric normal
    pub ng: Vec3d,
    pub u: f64,
    pub du: Differential,
    pub v: f64,
    pub dv: Differential,
    pub dpdu: Vec3d,
    pub dpdv: Vec3d,
    pub time: f64,
    pub ray_length: f64,
    pub object: Option<usize>,
    pub prim: Option<usize>,
    /// the primitive is a flat ribbon curve
    pub ribbon: bool,
    pub shader: usize,
    pub flag: SdFlags,
    pub closures: ClosureList,
    pub closure_emission_background: Spectrum,
    pub closure_transparent_extinction: Spectrum,
}

impl ShaderData {
    /// A shading point that can hold `max_closures` records
    #[must_use]
    pub fn new(max_closures: usize) -> Self {
        Self {
            p: Vec3d::ZERO,
            dp: Differential3::default(),
            i: Vec3d::Z,
            di: Differential3::default(),
            n: Vec3d::Z,
            ng: Vec3d::Z,
            u: 0.0,
            du: Differential::default(),
            v: 0.0,
            dv: Differential::default(),
            dpdu: Vec3d::X,
            dpdv: Vec3d::Y,
            time: 0.0,
            ray_length: 0.0,
            object: None,
            prim: None,
            ribbon: false,
            shader: 0,
            flag: SdFlags::empty(),
            closures: ClosureList::new(max_closures),
            closure_emission_background: Spectrum::ZERO,
            closure_transparent_extinction: Spectrum::ZERO,
        }
    }

    /// Forgets the result of the previous shader run. Flags describing the geometry are kept.
    pub fn reset_closures(&mut self) {
        self.closures.clear();
        self.flag &= SdFlags::BACKFACING | SdFlags::HAS_DISPLACEMENT;
        self.closure_emission_background = Spectrum::ZERO;
        self.closure_transparent_extinction = Spectrum::ZERO;
    }
}

impl Default for ShaderData {
    fn default() -> Self {
        Self::new(MAX_CLOSURE)
    }
}

/// The state a shader sees while it runs
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ShaderGlobals {
    pub p: Vec3d,
    pub dpdx: Vec3d,
    pub dpdy: Vec3d,
    pub i: Vec3d,
    pub didx: Vec3d,
    pub didy: Vec3d,
    pub n: Vec3d,
    pub ng: Vec3d,
    pub u: f64,
    pub dudx: f64,
    pub dudy: f64,
    pub v: f64,
    pub dvdx: f64,
    pub dvdy: f64,
    pub dpdu: Vec3d,
    pub dpdv: Vec3d,
    pub time: f64,
    pub raytype: PathFlags,
    pub backfacing: bool,
}

impl ShaderGlobals {
    fn load(&mut self, sd: &ShaderData, path_flag: PathFlags) {
        // shaders see the incoming direction, pointing at the surface
        *self = Self {
            p: sd.p,
            dpdx: sd.dp.dx,
            dpdy: sd.dp.dy,
            i: -sd.i,
            didx: sd.di.dx,
            didy: sd.di.dy,
            n: sd.n,
            ng: sd.ng,
            u: sd.u,
            dudx: sd.du.dx,
            dudy: sd.du.dy,
            v: sd.v,
            dvdx: sd.dv.dx,
            dvdy: sd.dv.dy,
            dpdu: sd.dpdu,
            dpdv: sd.dpdv,
            time: sd.time,
            raytype: path_flag,
            backfacing: sd.flag.contains(SdFlags::BACKFACING),
        };
    }
}

/// The shader groups an object can have
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Display, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum ShaderKind {
    Surface,
    /// surface shader evaluated on the undisplaced surface to derive a bump mapped normal
    Bump,
    Displacement,
    Volume,
    Background,
}

/// What a shader may reach while it runs
pub struct ShadingServices<'a> {
    pub attributes: &'a dyn AttributeSource,
    pub sd: &'a ShaderData,
}

/// The shading language runtime that compiles and executes shaders
pub trait ShadingRuntime {
    /// Scratch memory of one thread
    type ThreadState;

    fn create_thread_state(&self) -> Self::ThreadState;
    fn release_thread_state(&self, state: Self::ThreadState);
    fn has_shader(&self, shader: usize, kind: ShaderKind) -> bool;

    /// Runs a shader. Surface, volume and background shaders return the closures they built,
    /// displacement shaders move `globals.p`.
    fn execute(
        &self,
        state: &mut Self::ThreadState,
        shader: usize,
        kind: ShaderKind,
        globals: &mut ShaderGlobals,
        services: &ShadingServices<'_>,
    ) -> Option<ClosureTree>;
}

/// Per thread shading state. The thread state of the runtime is released on drop.
pub struct ThreadContext<'a, R: ShadingRuntime> {
    runtime: &'a R,
    registry: &'a Registry,
    settings: &'a IntegratorSettings,
    state: Option<R::ThreadState>,
    globals: ShaderGlobals,
}

impl<'a, R: ShadingRuntime> ThreadContext<'a, R> {
    #[must_use]
    pub fn new(runtime: &'a R, registry: &'a Registry, settings: &'a IntegratorSettings) -> Self {
        debug!("acquiring shading thread state");
        Self {
            runtime,
            registry,
            settings,
            state: Some(runtime.create_thread_state()),
            globals: ShaderGlobals::default(),
        }
    }

    #[must_use]
    pub const fn globals(&self) -> &ShaderGlobals {
        &self.globals
    }

    fn execute(
        &mut self,
        sd: &ShaderData,
        attributes: &dyn AttributeSource,
        kind: ShaderKind,
    ) -> Option<ClosureTree> {
        let state = self.state.as_mut()?;
        if !self.runtime.has_shader(sd.shader, kind) {
            return None;
        }
        let services = ShadingServices { attributes, sd };
        self.runtime
            .execute(state, sd.shader, kind, &mut self.globals, &services)
    }

    /// A shading point with room for as many closures as the settings allow
    #[must_use]
    pub fn shader_data(&self) -> ShaderData {
        ShaderData::new(self.settings.max_closures)
    }

    /// Clears the previous result and sizes the closure storage to the configured limit
    fn begin(&mut self, sd: &mut ShaderData, path_flag: PathFlags) {
        sd.reset_closures();
        if sd.closures.capacity() != self.settings.max_closures {
            trace!("resizing closure storage to {} slots", self.settings.max_closures);
            sd.closures = ClosureList::new(self.settings.max_closures);
        }
        self.globals.load(sd, path_flag);
    }

    /// Runs the bump shader on the undisplaced surface. The normal it computes stays in the
    /// globals for the surface shader.
    fn bump(&mut self, sd: &mut ShaderData, attributes: &dyn AttributeSource) {
        let desc = find_standard_attribute(attributes, sd, AttributeStandard::PositionUndisplaced);
        if !desc.is_found() || desc.kind != AttributeKind::Float3 {
            trace!("no undisplaced position, skipping bump");
            return;
        }
        let undisplaced = attributes.read_attribute_float3(sd, &desc);
        let (p, dp) = (sd.p, sd.dp);
        sd.p = undisplaced.val;
        sd.dp = Differential3 {
            dx: undisplaced.dx,
            dy: undisplaced.dy,
        };
        self.globals.p = sd.p;
        self.globals.dpdx = sd.dp.dx;
        self.globals.dpdy = sd.dp.dy;

        let _ = self.execute(sd, attributes, ShaderKind::Bump);

        sd.p = p;
        sd.dp = dp;
        self.globals.p = p;
        self.globals.dpdx = dp.dx;
        self.globals.dpdy = dp.dy;
    }

    pub fn eval_surface(
        &mut self,
        sd: &mut ShaderData,
        attributes: &dyn AttributeSource,
        path_flag: PathFlags,
    ) {
        self.begin(sd, path_flag);
        if sd.flag.contains(SdFlags::HAS_DISPLACEMENT) {
            self.bump(sd, attributes);
        }
        let tree = self.execute(sd, attributes, ShaderKind::Surface);
        flatten_surface(self.registry, self.settings, sd, path_flag, tree.as_ref());
    }

    pub fn eval_background(
        &mut self,
        sd: &mut ShaderData,
        attributes: &dyn AttributeSource,
        path_flag: PathFlags,
    ) {
        self.begin(sd, path_flag);
        let tree = self.execute(sd, attributes, ShaderKind::Background);
        flatten_background(self.registry, self.settings, sd, tree.as_ref());
    }

    pub fn eval_volume(
        &mut self,
        sd: &mut ShaderData,
        attributes: &dyn AttributeSource,
        path_flag: PathFlags,
    ) {
        self.begin(sd, path_flag);
        let tree = self.execute(sd, attributes, ShaderKind::Volume);
        flatten_volume(self.registry, self.settings, sd, path_flag, tree.as_ref());
    }

    /// Moves the shading point to the position computed by the displacement shader
    pub fn eval_displacement(&mut self, sd: &mut ShaderData, attributes: &dyn AttributeSource) {
        self.globals.load(sd, PathFlags::empty());
        let _ = self.execute(sd, attributes, ShaderKind::Displacement);
        sd.p = self.globals.p;
    }
}

impl<R: ShadingRuntime> Drop for ThreadContext<'_, R> {
    fn drop(&mut self) {
        if let Some(state) = self.state.take() {
            debug!("releasing shading thread state");
            self.runtime.release_thread_state(state);
        }
    }
}
