//! Crate-level error aggregating the per-module errors.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Material error: {0}")]
    Material(#[from] crate::material::Error),

    #[error("Signature error: {0}")]
    Dsig(#[from] crate::dsig::Error),
}
