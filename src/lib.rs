#![warn(clippy::pedantic)]
#![warn(clippy::perf)]
#![warn(clippy::nursery)]
#![warn(clippy::suboptimal_flops)]
#![deny(clippy::return_self_not_must_use)]
#![allow(clippy::similar_names)]
#![deny(clippy::semicolon_if_nothing_returned)]
#![deny(clippy::must_use_candidate)]
#![deny(clippy::double_must_use)]
#![deny(clippy::use_self)]
#![deny(clippy::unreadable_literal)]
#![deny(clippy::explicit_iter_loop)]
// these are lints to enable later
#![allow(clippy::cast_lossless)]

//! Scattering closures for the shading kernel of a path tracer, together with the machinery that
//! turns the closure trees built by a shading language into flat lists of closure records.
//!
//! # Design Decisions
//! A shader does not return a material. It returns a weighted sum of closures, see
//! [`flatten::ClosureTree`]. Flattening walks that tree once per shading point and stores one
//! [`closure::ShaderClosure`] per leaf in the shading point's [`alloc::ClosureList`]. After that
//! the integrator only talks to the records: [`closure::ShaderClosure::eval`] and
//! [`closure::ShaderClosure::sample`].
//!
//! Lighting calculations are done exclusively in [f64]s. Closures can be extremely spiky and using
//! [f64] has helped reducing numerical errors.
//!
//! All directions are in world space and point away from the shading point: `I` towards the
//! viewer and `omega_in` towards the light. Unlike a plain BSDF, the value returned by eval
//! already contains `|cos theta_in|`, so `eval / pdf` is the throughput of a sampled direction.
//!
//! Sampling is deterministic. You are responsible for generating the [f64]s in the range of
//! `0.0..1.0`. This allows you to control the sampling process and the random generator or low
//! discrepancy sequence in use.
//!
//! Nothing below the closure [`registry::Registry`] returns an error. Degenerate configurations
//! produce zero contributions or are dropped, so a render always completes.
//!
//! This crate is built on [glam] for a simple but fast vector math library at the core.
//!
//! # References
//! * Eric Heitz. Understanding the masking-shadowing function in microfacet-based brdfs.
//!     *Journal of Computer Graphics Techniques, 3(2):32–91,* 2014.
//! * Bruce Walter, Stephen R. Marschner, Hongsong Li, and Kenneth E. Torrance. Microfacet models
//!     for refraction through rough surfaces. In *Proceedings of the Eurographics Symposium on
//!     Rendering,* 2007.
//! * Eric Heitz, Johannes Hanika, Eugene d'Eon and Carsten Dachsbacher. Multiple-Scattering
//!     Microfacet BSDFs with the Smith Model. *ACM Transactions on Graphics 35(4),* 2016.
//! * Brent Burley. Physically-based shading at Disney, course notes, revised 2014. In *ACM
//!     SIGGRAPH, Practical physically-based shading in film and game production,* 2012.
//! * Michael Oren and Shree K. Nayar. Generalization of Lambert's reflectance model.
//!     *SIGGRAPH*, 1994.
//! * Michael Ashikhmin, Simon Premoze and Peter Shirley. A microfacet-based BRDF generator.
//!     *SIGGRAPH*, 2000.
//! * Matt Jen-Yuan Chiang, Benedikt Bitterli, Chuck Tappan and Brent Burley. A Practical and
//!     Controllable Hair and Fur Model for Production Path Tracing. *Computer Graphics Forum
//!     35(2)*, 2016.
//! * Stephen R. Marschner, Henrik Wann Jensen, Mike Cammarano, Steve Worley and Pat Hanrahan.
//!     Light Scattering from Human Hair Fibers. *ACM Transactions on Graphics 22(3)*, 2003.
//! * Georges R. Fournier and Jean Luc Forand. Analytic phase function for ocean water.
//!     *Ocean Optics XII, SPIE 2258*, 1994.
//! * Bruce T. Draine. Scattering by Interstellar Dust Grains. *The Astrophysical Journal 598*,
//!     2003.
//! * Johannes Jendersie and Eugene d'Eon. An Approximate Mie Scattering Function
//!     for Fog and Cloud Rendering. *SIGGRAPH Talks*, 2023.
//! * Naty Hoffman. Generalization of Adobe's Fresnel Model. 2023.
//! * Blenders Cycles closures: [cycles]
//!
//! [cycles]: https://projects.blender.org/blender/blender/src/branch/main/intern/cycles

mod core;

pub use crate::core::{
    Bsdf, BsdfEval, BsdfSample, ClosureBase, ClosureLabel, ClosureType, PathFlags, SdFlags,
    SetupContext, Spectrum, Vec2d, Vec3d,
};
pub use shading::ShaderData;

#[cfg(test)]
pub(crate) mod test_utils;
pub(crate) mod utils;

pub mod alloc;
pub mod attribute;
pub mod closure;
pub mod config;
pub mod error;
pub mod flatten;
pub mod registry;
pub mod shading;

pub mod diffuse;
pub mod emissive;
pub mod hair;
pub mod microfacet;
pub mod oren_nayar;
pub mod principled_diffuse;
pub mod principled_hair;
pub mod principled_sheen;
pub mod toon;
pub mod transparent;
pub mod velvet;
pub mod volume;

pub(crate) mod beckmann;
pub(crate) mod distribution;
pub(crate) mod ggx;
pub(crate) mod microfacet_multi;
