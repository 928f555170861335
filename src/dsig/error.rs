use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("no private key loaded; load one before signing")]
    NoPrivateKey,

    #[error("a private key is already loaded for this signer")]
    KeyAlreadyLoaded,

    #[error("a certificate is already loaded for this signer")]
    CertificateAlreadyLoaded,

    #[error("element <{element}> carries no recognizable ID attribute")]
    MissingReferenceId { element: String },

    #[error("namespace prefix '{0}' is used but not declared")]
    UnresolvedPrefix(String),

    #[error("XML error: {0}")]
    Xml(#[from] crate::xml::Error),

    #[error("Crypto error: {0}")]
    Crypto(#[from] crate::crypto::Error),

    #[error("Material error: {0}")]
    Material(#[from] crate::material::Error),

    #[error("XML serialization error: {0}")]
    Serialize(String),

    #[error("UTF-8 error: {0}")]
    Utf8(#[from] std::str::Utf8Error),
}

impl From<quick_xml::Error> for Error {
    fn from(err: quick_xml::Error) -> Self {
        Error::Xml(crate::xml::Error::Parse(err.to_string()))
    }
}

impl From<quick_xml::events::attributes::AttrError> for Error {
    fn from(err: quick_xml::events::attributes::AttrError) -> Self {
        Error::Xml(crate::xml::Error::Parse(err.to_string()))
    }
}

impl From<quick_xml::SeError> for Error {
    fn from(err: quick_xml::SeError) -> Self {
        Error::Serialize(err.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Xml(crate::xml::Error::Parse(err.to_string()))
    }
}

impl From<std::string::FromUtf8Error> for Error {
    fn from(err: std::string::FromUtf8Error) -> Self {
        Error::Utf8(err.utf8_error())
    }
}
