//! XML signature signer.
//!
//! [`XmlSigner`] holds the signing key and optional certificate (each
//! loadable exactly once) and produces enveloped `<Signature>` elements,
//! splicing them into the target document at the requested position.

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use std::collections::BTreeMap;
use tracing::{debug, info};

use crate::config::SignerConfig;
use crate::crypto::rsa::{self, RsaPrivateKey};
use crate::dsig::types::*;
use crate::dsig::{Error, Result, algorithms, c14n, ns};
use crate::material::{CertificateMaterial, MaterialStore, is_pem};
use crate::xml::{Document, NodeRef};
use secrecy::ExposeSecret;

/// One signing request: what to sign and where the signature goes.
///
/// All three handles must come from the document passed to
/// [`XmlSigner::sign`]. With no anchor the signature is appended as the
/// insertion parent's last child; with an anchor it is inserted
/// immediately before that child.
#[derive(Debug, Clone, Copy)]
pub struct SignatureRequest {
    pub target: NodeRef,
    pub insertion_parent: NodeRef,
    pub insertion_anchor: Option<NodeRef>,
}

/// Outcome of a successful [`XmlSigner::sign`] call.
///
/// The document already contains the signature at the requested position;
/// this carries the signature element itself and the resolved reference ID.
#[derive(Debug, Clone)]
pub struct SignatureResult {
    pub signature_xml: String,
    pub reference_id: String,
}

/// Enveloped XML-DSig signature generator.
pub struct XmlSigner {
    algorithm: SignatureAlgorithm,
    id_attribute: Option<String>,
    key: Option<RsaPrivateKey>,
    certificate: Option<CertificateMaterial>,
}

impl Default for XmlSigner {
    fn default() -> Self {
        Self::new()
    }
}

impl XmlSigner {
    /// Create an unconfigured signer with the default RSA-SHA1 pair.
    pub fn new() -> Self {
        Self {
            algorithm: SignatureAlgorithm::default(),
            id_attribute: None,
            key: None,
            certificate: None,
        }
    }

    /// Select the digest/signature algorithm pair.
    pub fn with_algorithm(mut self, algorithm: SignatureAlgorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    /// Set the attribute name consulted first when resolving the reference
    /// target's ID, ahead of the built-in detection list.
    pub fn with_id_attribute(mut self, name: impl Into<String>) -> Self {
        self.id_attribute = Some(name.into());
        self
    }

    /// Build a ready signer from configuration, reading key and certificate
    /// bytes through the given store.
    pub fn from_config(
        config: &SignerConfig,
        store: &MaterialStore,
    ) -> std::result::Result<Self, crate::error::Error> {
        let mut signer = Self::new().with_algorithm(config.algorithm);
        if let Some(name) = &config.id_attribute {
            signer = signer.with_id_attribute(name.clone());
        }

        let key_bytes = store.read(&config.private_key_path)?;
        let passphrase = config
            .private_key_passphrase
            .as_ref()
            .map(|secret| secret.expose_secret().to_owned());
        signer.load_private_key(&key_bytes, passphrase.as_deref())?;

        if let Some(path) = &config.certificate_path {
            let cert_bytes = store.read(path)?;
            signer.load_certificate(&cert_bytes)?;
        }
        Ok(signer)
    }

    /// Load the signing key from PEM or DER bytes.
    ///
    /// A passphrase is required for encrypted PEM keys and ignored for DER.
    /// The key can be loaded only once per signer.
    pub fn load_private_key(&mut self, bytes: &[u8], passphrase: Option<&str>) -> Result<()> {
        if self.key.is_some() {
            return Err(Error::KeyAlreadyLoaded);
        }

        let key = if is_pem(bytes) {
            match passphrase {
                Some(passphrase) => RsaPrivateKey::from_encrypted_pem(bytes, passphrase.as_bytes())?,
                None => RsaPrivateKey::from_pem(bytes)?,
            }
        } else {
            RsaPrivateKey::from_der(bytes)?
        };

        info!("Loaded {}-bit RSA signing key", key.key_size().bits());
        self.key = Some(key);
        Ok(())
    }

    /// Load the certificate embedded as KeyInfo, from PEM or DER bytes.
    ///
    /// The certificate can be loaded only once per signer.
    pub fn load_certificate(&mut self, bytes: &[u8]) -> Result<()> {
        if self.certificate.is_some() {
            return Err(Error::CertificateAlreadyLoaded);
        }

        let material = CertificateMaterial::load(bytes)?;
        info!(subject = %material.subject(), "Loaded signing certificate");
        self.certificate = Some(material);
        Ok(())
    }

    /// Whether a private key has been loaded.
    pub fn has_private_key(&self) -> bool {
        self.key.is_some()
    }

    /// Whether a certificate has been loaded.
    pub fn has_certificate(&self) -> bool {
        self.certificate.is_some()
    }

    /// The configured algorithm pair.
    pub fn algorithm(&self) -> SignatureAlgorithm {
        self.algorithm
    }

    /// Sign the target element and splice the resulting `<Signature>` into
    /// the document.
    ///
    /// The signature element is fully assembled before the document is
    /// touched; on any error the document is left unchanged.
    pub fn sign(&self, doc: &mut Document, request: &SignatureRequest) -> Result<SignatureResult> {
        let key = self.key.as_ref().ok_or(Error::NoPrivateKey)?;

        let reference_id = doc
            .id_of(request.target, self.id_attribute.as_deref())?
            .ok_or_else(|| Error::MissingReferenceId {
                element: doc.local_name_of(request.target).unwrap_or_default(),
            })?;

        // Digest the target exactly as it stands, in its inherited
        // namespace scope, before the signature exists anywhere.
        let subtree = doc.subtree(request.target)?;
        let ambient = doc.namespace_scope(request.target)?;
        let canonical_target = c14n::canonicalize(&subtree, &ambient, None)?;

        let hash_alg = self.algorithm.hash_alg();
        let digest = hash_alg.hash(canonical_target.as_bytes())?;
        let digest_value = BASE64.encode(&digest);
        debug!(reference = %reference_id, algorithm = %hash_alg, "Computed reference digest");

        let reference = Reference {
            uri: format!("#{reference_id}"),
            transforms: Transforms {
                transforms: vec![
                    Transform {
                        algorithm: algorithms::ENVELOPED_SIGNATURE.into(),
                    },
                    Transform {
                        algorithm: self.algorithm.canonicalization_uri().into(),
                    },
                ],
            },
            digest_method: DigestMethod {
                algorithm: self.algorithm.digest_uri().into(),
            },
            digest_value,
        };

        let signed_info = SignedInfo {
            xmlns: Some(ns::DSIG.into()),
            canonicalization_method: CanonicalizationMethod {
                algorithm: self.algorithm.canonicalization_uri().into(),
            },
            signature_method: SignatureMethod {
                algorithm: self.algorithm.signature_uri().into(),
            },
            references: vec![reference],
        };

        let signed_info_xml = quick_xml::se::to_string_with_root("SignedInfo", &signed_info)?;
        let canonical_signed_info =
            c14n::canonicalize(&signed_info_xml, &BTreeMap::new(), None)?;

        let signature = rsa::sign(key, canonical_signed_info.as_bytes(), hash_alg)?;
        let signature_value = BASE64.encode(signature.as_bytes());

        let key_info = self.certificate.as_ref().map(|cert| KeyInfo {
            x509_data: X509Data {
                x509_certificate: X509Certificate {
                    certificate: BASE64.encode(cert.der()),
                },
            },
        });

        let signature_element = Signature {
            xmlns: ns::DSIG.into(),
            signed_info: SignedInfo {
                // The namespace is inherited from <Signature> once nested.
                xmlns: None,
                ..signed_info
            },
            signature_value: SignatureValue {
                value: signature_value,
            },
            key_info,
        };
        let signature_xml = quick_xml::se::to_string_with_root("Signature", &signature_element)?;

        doc.insert_child(
            request.insertion_parent,
            request.insertion_anchor,
            &signature_xml,
        )?;
        info!(reference = %reference_id, algorithm = %self.algorithm, "Inserted enveloped signature");

        Ok(SignatureResult {
            signature_xml,
            reference_id,
        })
    }
}
