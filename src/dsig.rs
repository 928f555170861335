//! Enveloped XML-DSig signature generation.
//!
//! The signing pipeline canonicalizes the reference target, digests it,
//! assembles and canonicalizes `<SignedInfo>`, signs it, and splices the
//! finished `<Signature>` element into the document.

pub mod c14n;
mod error;
pub mod signer;
pub mod types;

#[cfg(test)]
mod tests;

pub use error::Error;
pub use signer::{SignatureRequest, SignatureResult, XmlSigner};
pub use types::SignatureAlgorithm;

pub type Result<T> = std::result::Result<T, Error>;

/// Algorithm URIs as per the XML-DSig and related specifications
pub mod algorithms {
    // Digest algorithms
    pub const SHA1: &str = "http://www.w3.org/2000/09/xmldsig#sha1";
    pub const SHA256: &str = "http://www.w3.org/2001/04/xmlenc#sha256";
    pub const SHA384: &str = "http://www.w3.org/2001/04/xmldsig-more#sha384";
    pub const SHA512: &str = "http://www.w3.org/2001/04/xmlenc#sha512";

    // Signature algorithms
    pub const RSA_SHA1: &str = "http://www.w3.org/2000/09/xmldsig#rsa-sha1";
    pub const RSA_SHA256: &str = "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256";
    pub const RSA_SHA384: &str = "http://www.w3.org/2001/04/xmldsig-more#rsa-sha384";
    pub const RSA_SHA512: &str = "http://www.w3.org/2001/04/xmldsig-more#rsa-sha512";

    // Canonicalization algorithms
    pub const EXCLUSIVE_C14N: &str = "http://www.w3.org/2001/10/xml-exc-c14n#";

    // Transform algorithms
    pub const ENVELOPED_SIGNATURE: &str = "http://www.w3.org/2000/09/xmldsig#enveloped-signature";
}

/// Namespaces
pub mod ns {
    pub const DSIG: &str = "http://www.w3.org/2000/09/xmldsig#";
}
