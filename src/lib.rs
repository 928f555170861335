//! Enveloped XML-DSig signature generation.
//!
//! Parse a document with [`xml::Document`], load a key (and optionally a
//! certificate) into an [`XmlSigner`], and call
//! [`XmlSigner::sign`](dsig::signer::XmlSigner::sign) with handles for the
//! reference target and the insertion position.

pub mod config;
pub mod crypto;
pub mod dsig;
pub mod error;
pub mod material;
pub mod telemetry;
pub mod xml;

pub use dsig::{SignatureAlgorithm, SignatureRequest, SignatureResult, XmlSigner};
pub use error::Error;
pub use xml::Document;
