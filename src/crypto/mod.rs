//! PDF cryptographic engine implementation

mod aes;
mod engine;
mod rc4;

pub use self::aes::AESProvider;
pub use self::rc4::RC4Provider;
pub use engine::PDFCryptoEngine;

pub(crate) use self::aes::{cbc_decrypt, cbc_encrypt, Padding};
pub(crate) use self::rc4::rc4;

use crate::error::{PDFError, PDFResult};

/// Trait for PDF string and stream encryption/decryption
pub trait CryptoProvider: Send + Sync {
    fn encrypt(&self, key: &[u8], data: &[u8]) -> PDFResult<Vec<u8>>;
    fn decrypt(&self, key: &[u8], data: &[u8]) -> PDFResult<Vec<u8>>;
}

/// Cipher applied by a crypt filter (`/CFM`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CryptMethod {
    /// Data is left as is
    Identity,
    /// RC4 with a per-object key
    RC4,
    /// AES-128 with a per-object key
    AESV2,
    /// AES-256 with the file key
    AESV3,
}

impl CryptMethod {
    /// Parse a `/CFM` value
    pub fn from_name(name: &str) -> PDFResult<Self> {
        match name {
            "None" | "Identity" => Ok(CryptMethod::Identity),
            "V2" => Ok(CryptMethod::RC4),
            "AESV2" => Ok(CryptMethod::AESV2),
            "AESV3" => Ok(CryptMethod::AESV3),
            other => Err(PDFError::UnsupportedFilter(format!("crypt filter method {}", other))),
        }
    }

    /// `/CFM` name written for this method
    pub fn name(&self) -> &'static str {
        match self {
            CryptMethod::Identity => "None",
            CryptMethod::RC4 => "V2",
            CryptMethod::AESV2 => "AESV2",
            CryptMethod::AESV3 => "AESV3",
        }
    }

    pub fn is_aes(&self) -> bool {
        matches!(self, CryptMethod::AESV2 | CryptMethod::AESV3)
    }
}
