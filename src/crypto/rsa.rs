use crate::crypto::HashAlg;
use crate::crypto::errors::{CryptoResult, Error};
use crate::crypto::keys::SecureBytes;
use openssl::pkey::{PKey, Private, Public};
use openssl::rsa::Rsa;
use openssl::sign::{Signer, Verifier};
use std::fmt;

/// RSA key sizes supported by the signer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RsaKeySize {
    /// 2048-bit RSA key
    Rsa2048,
    /// 3072-bit RSA key
    Rsa3072,
    /// 4096-bit RSA key
    Rsa4096,
}

impl RsaKeySize {
    /// Get the key size in bits
    pub fn bits(&self) -> u32 {
        match self {
            RsaKeySize::Rsa2048 => 2048,
            RsaKeySize::Rsa3072 => 3072,
            RsaKeySize::Rsa4096 => 4096,
        }
    }

    /// Get the key size in bytes
    pub fn bytes(&self) -> u32 {
        self.bits() / 8
    }

    /// Get all supported key sizes
    pub fn all() -> &'static [RsaKeySize] {
        &[
            RsaKeySize::Rsa2048,
            RsaKeySize::Rsa3072,
            RsaKeySize::Rsa4096,
        ]
    }
}

impl TryFrom<u32> for RsaKeySize {
    type Error = Error;

    fn try_from(bits: u32) -> Result<Self, Self::Error> {
        match bits {
            2048 => Ok(Self::Rsa2048),
            3072 => Ok(Self::Rsa3072),
            4096 => Ok(Self::Rsa4096),
            _ => Err(Error::Invalid("Unsupported RSA key size".into())),
        }
    }
}

/// Represents an RSA signature
#[derive(Clone)]
pub struct RsaSignature {
    key_size: RsaKeySize,
    data: SecureBytes,
}

impl RsaSignature {
    /// Create a new RSA signature
    pub fn new(key_size: RsaKeySize, data: impl Into<Vec<u8>>) -> Self {
        Self {
            key_size,
            data: SecureBytes::new(data.into()),
        }
    }

    /// Get the key size used for this signature
    pub fn key_size(&self) -> RsaKeySize {
        self.key_size
    }

    /// Get the signature data as bytes
    pub fn as_bytes(&self) -> &[u8] {
        self.data.expose_secret()
    }

    /// Convert signature to hex string
    pub fn to_hex(&self) -> String {
        hex::encode(self.data.expose_secret())
    }

    /// Get the signature length in bytes
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if signature is empty
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl fmt::Debug for RsaSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RsaSignature")
            .field("key_size", &self.key_size)
            .field("size", &self.len())
            .field("hex", &self.to_hex())
            .finish()
    }
}

/// RSA private key wrapper
#[derive(Debug, Clone)]
pub struct RsaPrivateKey {
    key: PKey<Private>,
    key_size: RsaKeySize,
}

impl RsaPrivateKey {
    /// Generate a new RSA private key
    pub fn generate(key_size: RsaKeySize) -> CryptoResult<Self> {
        let rsa = Rsa::generate(key_size.bits())?;
        let key = PKey::from_rsa(rsa)?;

        Ok(Self { key, key_size })
    }

    /// Load from PEM-encoded PKCS#1/PKCS#8.
    pub fn from_pem(pem_bytes: impl AsRef<[u8]>) -> CryptoResult<Self> {
        let key = PKey::private_key_from_pem(pem_bytes.as_ref())?;
        Self::from_pkey(key)
    }

    /// Load from passphrase-protected PEM-encoded PKCS#8.
    ///
    /// A wrong passphrase surfaces as an OpenSSL decrypt error.
    pub fn from_encrypted_pem(
        pem_bytes: impl AsRef<[u8]>,
        passphrase: &[u8],
    ) -> CryptoResult<Self> {
        let key = PKey::private_key_from_pem_passphrase(pem_bytes.as_ref(), passphrase)?;
        Self::from_pkey(key)
    }

    /// Load from DER-encoded PKCS#1/PKCS#8.
    pub fn from_der(der_bytes: impl AsRef<[u8]>) -> CryptoResult<Self> {
        let key = PKey::private_key_from_der(der_bytes.as_ref())?;
        Self::from_pkey(key)
    }

    fn from_pkey(key: PKey<Private>) -> CryptoResult<Self> {
        let rsa = key.rsa()?;
        let bits = rsa.size() * 8;
        let key_size = RsaKeySize::try_from(bits)?;
        Ok(Self { key, key_size })
    }

    /// Serialize as DER-encoded PKCS#8.
    pub fn to_der(&self) -> CryptoResult<Vec<u8>> {
        Ok(self.key.private_key_to_pkcs8()?)
    }

    /// Serialize as PEM-encoded PKCS#8.
    pub fn to_pem(&self) -> CryptoResult<String> {
        let pem_bytes = self.key.private_key_to_pem_pkcs8()?;
        Ok(String::from_utf8_lossy(&pem_bytes).to_string())
    }

    /// Get the corresponding public key
    pub fn public_key(&self) -> CryptoResult<RsaPublicKey> {
        let pub_key = PKey::public_key_from_der(&self.key.public_key_to_der()?)?;

        Ok(RsaPublicKey {
            key: pub_key,
            key_size: self.key_size,
        })
    }

    /// Get the key size
    pub fn key_size(&self) -> RsaKeySize {
        self.key_size
    }

    /// Get the underlying OpenSSL private key
    pub(crate) fn pkey(&self) -> &PKey<Private> {
        &self.key
    }
}

/// RSA public key wrapper
#[derive(Debug, Clone)]
pub struct RsaPublicKey {
    key: PKey<Public>,
    key_size: RsaKeySize,
}

impl RsaPublicKey {
    /// Export key in SubjectPublicKeyInfo DER format
    pub fn to_der(&self) -> CryptoResult<Vec<u8>> {
        Ok(self.key.public_key_to_der()?)
    }

    /// Get the key size
    pub fn key_size(&self) -> RsaKeySize {
        self.key_size
    }

    /// Get the underlying OpenSSL public key
    pub(crate) fn pkey(&self) -> &PKey<Public> {
        &self.key
    }
}

/// Sign data using RSA PKCS#1 v1.5 with the given digest
pub fn sign(
    private_key: &RsaPrivateKey,
    data: impl AsRef<[u8]>,
    hash_alg: HashAlg,
) -> CryptoResult<RsaSignature> {
    let mut signer = Signer::new((&hash_alg).into(), private_key.pkey())?;
    let signature_data = signer.sign_oneshot_to_vec(data.as_ref())?;

    Ok(RsaSignature::new(private_key.key_size(), signature_data))
}

/// Verify an RSA PKCS#1 v1.5 signature
pub fn verify(
    public_key: &RsaPublicKey,
    data: impl AsRef<[u8]>,
    signature: &RsaSignature,
    hash_alg: HashAlg,
) -> CryptoResult<bool> {
    if public_key.key_size() != signature.key_size() {
        return Err(Error::Invalid(
            "Signature key size does not match key size".to_string(),
        ));
    }

    let mut verifier = Verifier::new((&hash_alg).into(), public_key.pkey())?;
    let result = verifier.verify_oneshot(signature.as_bytes(), data.as_ref())?;
    Ok(result)
}
