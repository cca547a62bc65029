//! Standard security handler algorithms and the per-session encryption state

mod authentication;
mod key_derivation;

pub(crate) use key_derivation::*;

use std::fmt;

use zeroize::Zeroizing;

use crate::crypto::CryptMethod;
use crate::error::{PDFError, PDFResult};
use crate::handlers::StandardSecurityHandler;
use crate::{EncryptionAlgorithm, PDFPermissions};

/// Standard padding string from PDF spec
pub const PASSWORD_PADDING: [u8; 32] = [
    0x28, 0xBF, 0x4E, 0x5E, 0x4E, 0x75, 0x8A, 0x41, 0x64, 0x00, 0x4E, 0x56, 0xFF, 0xFA, 0x01, 0x08,
    0x2E, 0x2E, 0x00, 0xB6, 0xD0, 0x68, 0x3E, 0x80, 0x2F, 0x0C, 0xA9, 0xFE, 0x64, 0x53, 0x69, 0x7A,
];

/// Standard security handler revision (`/R`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Revision {
    /// RC4 with a 40-bit key
    R2 = 2,
    /// RC4 with a 40 to 128-bit key
    R3 = 3,
    /// Crypt filters, RC4 or AES-128
    R4 = 4,
    /// AES-256, SHA-256 password hash (deprecated extension level 3)
    R5 = 5,
    /// AES-256, ISO 32000-2 password hash
    R6 = 6,
}

impl Revision {
    pub fn from_number(number: i64) -> PDFResult<Self> {
        match number {
            2 => Ok(Revision::R2),
            3 => Ok(Revision::R3),
            4 => Ok(Revision::R4),
            5 => Ok(Revision::R5),
            6 => Ok(Revision::R6),
            other => Err(PDFError::UnsupportedRevision(other)),
        }
    }

    pub fn number(self) -> i64 {
        self as i64
    }

    /// Matching `/V` value
    pub fn version(self) -> i64 {
        match self {
            Revision::R2 => 1,
            Revision::R3 => 2,
            Revision::R4 => 4,
            Revision::R5 | Revision::R6 => 5,
        }
    }

    /// R5 and R6 wrap a random file key instead of deriving it with MD5
    pub fn is_aes256(self) -> bool {
        self >= Revision::R5
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "R{}", self.number())
    }
}

/// Keys and parameters of an authenticated session.
///
/// Derived once, by the writer from passwords or by the reader from the
/// encryption dictionary, and never mutated afterwards. The file key is
/// wiped on drop.
#[derive(Clone)]
pub struct EncryptionState {
    revision: Revision,
    algorithm: EncryptionAlgorithm,
    file_key: Zeroizing<Vec<u8>>,
    permissions: PDFPermissions,
    stream_method: CryptMethod,
    string_method: CryptMethod,
    encrypt_metadata: bool,
    owner_authenticated: bool,
    document_id: Vec<u8>,
}

impl fmt::Debug for EncryptionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptionState")
            .field("revision", &self.revision)
            .field("algorithm", &self.algorithm)
            .field("permissions", &self.permissions)
            .field("encrypt_metadata", &self.encrypt_metadata)
            .field("owner_authenticated", &self.owner_authenticated)
            .finish_non_exhaustive()
    }
}

impl EncryptionState {
    pub(crate) fn new(
        handler: &StandardSecurityHandler,
        file_key: Zeroizing<Vec<u8>>,
        owner_authenticated: bool,
        document_id: &[u8],
    ) -> Self {
        Self {
            revision: handler.revision,
            algorithm: handler.algorithm,
            file_key,
            permissions: PDFPermissions::from_p_value(handler.p_value),
            stream_method: handler.stream_method,
            string_method: handler.string_method,
            encrypt_metadata: handler.encrypt_metadata,
            owner_authenticated,
            document_id: document_id.to_vec(),
        }
    }

    /// State around a bare key, for exercising the cipher layer
    #[cfg(test)]
    pub(crate) fn for_key(algorithm: EncryptionAlgorithm, file_key: Vec<u8>) -> Self {
        let (revision, method) = match algorithm {
            EncryptionAlgorithm::RC4_40 => (Revision::R2, CryptMethod::RC4),
            EncryptionAlgorithm::RC4_128 => (Revision::R3, CryptMethod::RC4),
            EncryptionAlgorithm::AES_128 => (Revision::R4, CryptMethod::AESV2),
            EncryptionAlgorithm::AES_256 => (Revision::R6, CryptMethod::AESV3),
        };
        Self {
            revision,
            algorithm,
            file_key: Zeroizing::new(file_key),
            permissions: PDFPermissions::new(PDFPermissions::ALL),
            stream_method: method,
            string_method: method,
            encrypt_metadata: true,
            owner_authenticated: true,
            document_id: Vec::new(),
        }
    }

    pub fn revision(&self) -> Revision {
        self.revision
    }

    pub fn algorithm(&self) -> EncryptionAlgorithm {
        self.algorithm
    }

    pub fn file_key(&self) -> &[u8] {
        &self.file_key
    }

    /// Permissions granted by `/P`
    pub fn permissions(&self) -> PDFPermissions {
        self.permissions
    }

    pub fn stream_method(&self) -> CryptMethod {
        self.stream_method
    }

    pub fn string_method(&self) -> CryptMethod {
        self.string_method
    }

    pub fn encrypt_metadata(&self) -> bool {
        self.encrypt_metadata
    }

    /// Whether the owner password opened the session
    pub fn is_owner(&self) -> bool {
        self.owner_authenticated
    }

    /// First `/ID` element the keys were derived with
    pub fn document_id(&self) -> &[u8] {
        &self.document_id
    }
}
