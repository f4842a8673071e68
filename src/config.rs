//! Renderer wide settings that the flattener reads but does not own
#[cfg(feature = "config")]
use std::path::Path;

#[cfg(feature = "config")]
use serde::{Deserialize, Serialize};

use crate::alloc::MAX_CLOSURE;
#[cfg(feature = "config")]
use crate::error::ConfigError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "config", derive(Deserialize, Serialize))]
#[cfg_attr(feature = "config", serde(default))]
pub struct IntegratorSettings {
    /// keep glossy reflection on paths that already bounced off a diffuse surface
    pub caustics_reflective: bool,
    /// keep glossy refraction on paths that already bounced off a diffuse surface
    pub caustics_refractive: bool,
    /// slots per shading point, shared by closure records and their extra blocks
    pub max_closures: usize,
}

impl Default for IntegratorSettings {
    fn default() -> Self {
        Self {
            caustics_reflective: true,
            caustics_refractive: true,
            max_closures: MAX_CLOSURE,
        }
    }
}

#[cfg(feature = "config")]
impl IntegratorSettings {
    /// Parses settings from yaml. Missing fields keep their defaults.
    ///
    /// # Errors
    /// If the yaml is malformed or `max_closures` is zero
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let settings: Self = serde_yaml::from_str(yaml)?;
        if settings.max_closures == 0 {
            return Err(ConfigError::Invalid("max_closures must be at least 1"));
        }
        Ok(settings)
    }

    /// Reads settings from a yaml file
    ///
    /// # Errors
    /// If the file can not be read or [`Self::from_yaml_str`] fails
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let yaml = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&yaml)
    }
}
