//! Error types for the PDF container library

use std::io;
use thiserror::Error;

use crate::pdf::ObjectId;

/// Main error type for PDF container operations
#[derive(Error, Debug)]
pub enum PDFError {
    /// Cross-reference data could not be used; readers recover by scanning
    #[error("Malformed cross-reference data: {0}")]
    MalformedCrossReference(String),

    /// Neither the owner nor the user password matched
    #[error("Bad password")]
    BadPassword,

    /// Ciphertext has an impossible length or invalid padding
    #[error("Corrupt ciphertext: {0}")]
    CorruptCiphertext(String),

    /// Stream payload ends before its declared or required length
    #[error("Truncated stream: {0}")]
    TruncatedStream(String),

    /// Object not found
    #[error("Object not found: {0}")]
    ObjectNotFound(ObjectId),

    /// Malformed PDF structure
    #[error("Malformed PDF structure: {0}")]
    MalformedPDF(String),

    /// Unsupported encryption or stream filter
    #[error("Unsupported filter: {0}")]
    UnsupportedFilter(String),

    /// Unsupported encryption revision
    #[error("Unsupported revision: {0}")]
    UnsupportedRevision(i64),

    /// Invalid key length
    #[error("Invalid key length: {0}")]
    InvalidKeyLength(usize),

    /// Invalid object type
    #[error("Invalid object type: expected {expected}, found {found}")]
    InvalidObjectType {
        expected: &'static str,
        found: &'static str,
    },

    /// Missing required dictionary entry
    #[error("Missing required dictionary entry: {0}")]
    MissingDictionaryEntry(String),

    /// Encryption setup error
    #[error("Encryption setup error: {0}")]
    EncryptionSetupError(String),

    /// Compression error
    #[error("Compression error: {0}")]
    CompressionError(String),

    /// Operation attempted after the writer was closed
    #[error("Writer is closed")]
    WriterClosed,

    /// Operation not allowed in the current session state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Result type for PDF container operations
pub type PDFResult<T> = Result<T, PDFError>;

impl PDFError {
    /// Create a new malformed PDF error
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedPDF(msg.into())
    }

    /// Create a new malformed cross-reference error
    pub fn xref(msg: impl Into<String>) -> Self {
        Self::MalformedCrossReference(msg.into())
    }

    /// Create a new corrupt ciphertext error
    pub fn corrupt(msg: impl Into<String>) -> Self {
        Self::CorruptCiphertext(msg.into())
    }

    /// Create a new truncated stream error
    pub fn truncated(msg: impl Into<String>) -> Self {
        Self::TruncatedStream(msg.into())
    }

    /// Create a new encryption setup error
    pub fn setup(msg: impl Into<String>) -> Self {
        Self::EncryptionSetupError(msg.into())
    }

    /// Create a new invalid state error
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    /// Check if error is authentication related
    pub fn is_auth_error(&self) -> bool {
        matches!(self, Self::BadPassword)
    }

    /// Check if error is cryptographic
    pub fn is_crypto_error(&self) -> bool {
        matches!(
            self,
            Self::CorruptCiphertext(_)
                | Self::InvalidKeyLength(_)
                | Self::EncryptionSetupError(_)
                | Self::UnsupportedRevision(_)
        )
    }

    /// Check if error is related to PDF structure
    pub fn is_structure_error(&self) -> bool {
        matches!(
            self,
            Self::MalformedPDF(_)
                | Self::MalformedCrossReference(_)
                | Self::ObjectNotFound(_)
                | Self::InvalidObjectType { .. }
                | Self::MissingDictionaryEntry(_)
        )
    }

    /// Check if the failure only affects the object being materialized
    pub fn is_object_scoped(&self) -> bool {
        matches!(self, Self::CorruptCiphertext(_) | Self::TruncatedStream(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = PDFError::malformed("Invalid header");
        assert!(matches!(err, PDFError::MalformedPDF(_)));

        let err = PDFError::xref("missing startxref");
        assert!(matches!(err, PDFError::MalformedCrossReference(_)));

        let err = PDFError::corrupt("bad padding");
        assert!(matches!(err, PDFError::CorruptCiphertext(_)));
    }

    #[test]
    fn test_error_categorization() {
        let auth_err = PDFError::BadPassword;
        assert!(auth_err.is_auth_error());
        assert!(!auth_err.is_crypto_error());

        let crypto_err = PDFError::corrupt("test");
        assert!(crypto_err.is_crypto_error());
        assert!(crypto_err.is_object_scoped());
        assert!(!crypto_err.is_structure_error());

        let struct_err = PDFError::xref("test");
        assert!(struct_err.is_structure_error());
        assert!(!struct_err.is_auth_error());

        assert!(PDFError::truncated("eof").is_object_scoped());
    }

    #[test]
    fn test_error_display() {
        let err = PDFError::InvalidKeyLength(32);
        assert_eq!(err.to_string(), "Invalid key length: 32");

        let err = PDFError::ObjectNotFound(ObjectId::new(12, 0));
        assert_eq!(err.to_string(), "Object not found: 12 0 R");

        let err = PDFError::InvalidObjectType {
            expected: "Dictionary",
            found: "Integer",
        };
        assert_eq!(
            err.to_string(),
            "Invalid object type: expected Dictionary, found Integer"
        );
    }

    #[test]
    fn test_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let pdf_err: PDFError = io_err.into();
        assert!(matches!(pdf_err, PDFError::Io(_)));
    }
}
