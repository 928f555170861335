use std::collections::HashMap;
use std::path::PathBuf;

use config::{Config as ConfigLib, ConfigError, Environment, File};
use secrecy::SecretString;
use serde::Deserialize;

use crate::dsig::SignatureAlgorithm;

/// Typed signer configuration.
///
/// Paths are resolved by the `MaterialStore` they are read through, so a
/// relative path here is relative to whatever base directory the caller
/// injected, not to any process-wide default.
#[derive(Debug, Clone, Deserialize)]
pub struct SignerConfig {
    /// Path to the private signing key (PEM or DER).
    pub private_key_path: PathBuf,

    /// Passphrase for an encrypted PEM key.
    #[serde(default)]
    pub private_key_passphrase: Option<SecretString>,

    /// Path to the X.509 certificate embedded as KeyInfo.
    #[serde(default)]
    pub certificate_path: Option<PathBuf>,

    /// Attribute name consulted first when resolving reference target IDs.
    #[serde(default)]
    pub id_attribute: Option<String>,

    /// Digest/signature algorithm pair.
    #[serde(default)]
    pub algorithm: SignatureAlgorithm,
}

impl SignerConfig {
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with_sources(None)
    }

    pub fn load_with_sources(
        env_vars: Option<HashMap<String, String>>,
    ) -> Result<Self, ConfigError> {
        let mut builder = ConfigLib::builder()
            .set_default("algorithm", "rsa-sha1")?
            .add_source(File::with_name("config/signer").required(false));

        // If env_vars is provided, we use it instead of system environment
        // This is to avoid systems variables pollution across tests
        if let Some(vars) = env_vars {
            for (key, value) in vars {
                builder = builder.set_override(&key, value)?;
            }
        } else {
            // Use system environment variables
            // Should be in the format DSIG_PRIVATE_KEY_PATH
            builder = builder.add_source(
                Environment::with_prefix("DSIG")
                    .prefix_separator("_")
                    .separator("__"),
            );
        }

        builder.build()?.try_deserialize()
    }
}
