//! Errors of the few operations that may fail. Shading itself never fails, it drops what it can
//! not handle.

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("closure {id} has an empty name")]
    EmptyName { id: usize },
    #[error("closure {0:?} is registered twice")]
    DuplicateName(&'static str),
    #[error("closure {name:?} has id {found}, expected {expected}")]
    NonDenseId {
        name: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("parameter {index} of closure {name:?} has an empty name")]
    EmptyParamName { name: &'static str, index: usize },
    #[error("no closure named {0:?} is registered")]
    UnknownClosure(String),
}

#[cfg(feature = "config")]
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("reading settings failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("parsing settings failed: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid setting: {0}")]
    Invalid(&'static str),
}
