//! Data structures for the `<Signature>` element tree.

use crate::crypto::HashAlg;
use crate::dsig::algorithms;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Generic XML element with an Algorithm attribute
#[derive(Debug, Clone, Serialize)]
pub struct AlgorithmElement {
    #[serde(rename = "@Algorithm")]
    pub algorithm: String,
}

// Type aliases for better readability
pub type CanonicalizationMethod = AlgorithmElement;
pub type SignatureMethod = AlgorithmElement;
pub type DigestMethod = AlgorithmElement;
pub type Transform = AlgorithmElement;

/// XML transforms container
#[derive(Debug, Clone, Serialize)]
pub struct Transforms {
    #[serde(rename = "Transform")]
    pub transforms: Vec<Transform>,
}

/// XML reference element
#[derive(Debug, Clone, Serialize)]
pub struct Reference {
    #[serde(rename = "@URI")]
    pub uri: String,
    #[serde(rename = "Transforms")]
    pub transforms: Transforms,
    #[serde(rename = "DigestMethod")]
    pub digest_method: DigestMethod,
    #[serde(rename = "DigestValue")]
    pub digest_value: String,
}

/// XML SignedInfo element with optional namespace
///
/// The namespace is spelled out when SignedInfo is serialized standalone
/// for canonicalization and omitted once nested under `<Signature>`, where
/// it is inherited.
#[derive(Debug, Clone, Serialize)]
pub struct SignedInfo {
    #[serde(rename = "@xmlns", skip_serializing_if = "Option::is_none")]
    pub xmlns: Option<String>,
    #[serde(rename = "CanonicalizationMethod")]
    pub canonicalization_method: CanonicalizationMethod,
    #[serde(rename = "SignatureMethod")]
    pub signature_method: SignatureMethod,
    #[serde(rename = "Reference")]
    pub references: Vec<Reference>,
}

/// XML SignatureValue element
#[derive(Debug, Clone, Serialize)]
pub struct SignatureValue {
    #[serde(rename = "$text")]
    pub value: String,
}

/// XML X509Certificate element
#[derive(Debug, Clone, Serialize)]
pub struct X509Certificate {
    #[serde(rename = "$text")]
    pub certificate: String,
}

/// XML X509Data element
#[derive(Debug, Clone, Serialize)]
pub struct X509Data {
    #[serde(rename = "X509Certificate")]
    pub x509_certificate: X509Certificate,
}

/// XML KeyInfo element
#[derive(Debug, Clone, Serialize)]
pub struct KeyInfo {
    #[serde(rename = "X509Data")]
    pub x509_data: X509Data,
}

/// Complete XML Signature element
#[derive(Debug, Clone, Serialize)]
pub struct Signature {
    #[serde(rename = "@xmlns")]
    pub xmlns: String,
    #[serde(rename = "SignedInfo")]
    pub signed_info: SignedInfo,
    #[serde(rename = "SignatureValue")]
    pub signature_value: SignatureValue,
    #[serde(rename = "KeyInfo", skip_serializing_if = "Option::is_none")]
    pub key_info: Option<KeyInfo>,
}

/// Digest/signature algorithm pairs supported by the signer.
///
/// RSA-SHA1 is the default for compatibility with legacy XML-DSig
/// deployments; prefer RSA-SHA256 where the consumer accepts it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SignatureAlgorithm {
    #[default]
    RsaSha1,
    RsaSha256,
    RsaSha384,
    RsaSha512,
}

impl SignatureAlgorithm {
    /// Get the signature algorithm URI
    pub fn signature_uri(&self) -> &'static str {
        match self {
            SignatureAlgorithm::RsaSha1 => algorithms::RSA_SHA1,
            SignatureAlgorithm::RsaSha256 => algorithms::RSA_SHA256,
            SignatureAlgorithm::RsaSha384 => algorithms::RSA_SHA384,
            SignatureAlgorithm::RsaSha512 => algorithms::RSA_SHA512,
        }
    }

    /// Get the digest algorithm URI
    pub fn digest_uri(&self) -> &'static str {
        match self {
            SignatureAlgorithm::RsaSha1 => algorithms::SHA1,
            SignatureAlgorithm::RsaSha256 => algorithms::SHA256,
            SignatureAlgorithm::RsaSha384 => algorithms::SHA384,
            SignatureAlgorithm::RsaSha512 => algorithms::SHA512,
        }
    }

    /// Get the canonicalization algorithm URI
    pub fn canonicalization_uri(&self) -> &'static str {
        algorithms::EXCLUSIVE_C14N
    }

    /// The hash algorithm backing both the reference digest and the
    /// signature method.
    pub fn hash_alg(&self) -> HashAlg {
        match self {
            SignatureAlgorithm::RsaSha1 => HashAlg::Sha1,
            SignatureAlgorithm::RsaSha256 => HashAlg::Sha256,
            SignatureAlgorithm::RsaSha384 => HashAlg::Sha384,
            SignatureAlgorithm::RsaSha512 => HashAlg::Sha512,
        }
    }
}

impl fmt::Display for SignatureAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SignatureAlgorithm::RsaSha1 => "RSA-SHA1",
            SignatureAlgorithm::RsaSha256 => "RSA-SHA256",
            SignatureAlgorithm::RsaSha384 => "RSA-SHA384",
            SignatureAlgorithm::RsaSha512 => "RSA-SHA512",
        };
        write!(f, "{name}")
    }
}
