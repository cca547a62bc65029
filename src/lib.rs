//! PDF container library for Rust
//!
//! Produces and consumes the binary PDF container: the indirect object
//! graph, the cross-reference table with incremental updates and recovery,
//! and the standard password security handler (RC4 and AES, revisions 2
//! to 6).
//!
//! ```no_run
//! use pdf_container::{EncryptionAlgorithm, PDFPermissions, PdfReader, PdfWriter};
//! use pdf_container::pdf::{Dictionary, Object, Stream};
//!
//! # fn main() -> pdf_container::PDFResult<()> {
//! let mut writer = PdfWriter::new();
//! let pages = writer.allocate_object()?;
//! let content = writer.add_object(Stream::from_content("BT (Hello) Tj ET"))?;
//! let mut page = Dictionary::with_type("Page");
//! page.set_reference("Parent", pages);
//! page.set_reference("Contents", content);
//! let page = writer.add_object(page)?;
//! let mut tree = Dictionary::with_type("Pages");
//! tree.set("Kids", vec![Object::Reference(page)]);
//! tree.set("Count", 1);
//! writer.set_object(pages, tree)?;
//! let mut catalog = Dictionary::with_type("Catalog");
//! catalog.set_reference("Pages", pages);
//! let catalog = writer.add_object(catalog)?;
//! writer.set_root(catalog)?;
//! writer.set_encryption(b"user", b"owner", PDFPermissions::default(), EncryptionAlgorithm::AES_256)?;
//! writer.save_to("hello.pdf")?;
//!
//! let reader = PdfReader::open("hello.pdf", b"user")?;
//! assert_eq!(reader.page_text(1)?, "Hello");
//! # Ok(())
//! # }
//! ```

use std::fmt;

use log::{debug, warn};

mod crypto;
mod document;
mod error;
mod handlers;
pub mod pdf;
mod security;
pub mod storage;

pub use crypto::{AESProvider, CryptMethod, CryptoProvider, PDFCryptoEngine, RC4Provider};
pub use document::{
    extract_text, PdfReader, PdfStamper, PdfWriter, ReaderOptions, ReaderState, WriterOptions, WriterState,
};
pub use error::{PDFError, PDFResult};
pub use handlers::{HandlerKind, SecurityHandler, SecurityHandlerRegistry, StandardSecurityHandler};
pub use security::{EncryptionState, Revision, PASSWORD_PADDING};

use pdf::Object;

/// Supported encryption algorithms for PDF encryption
#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EncryptionAlgorithm {
    /// RC4 encryption with 40-bit key (PDF 1.3)
    RC4_40,
    /// RC4 encryption with 128-bit key (PDF 1.4)
    RC4_128,
    /// AES encryption with 128-bit key (PDF 1.6)
    AES_128,
    /// AES encryption with 256-bit key (PDF 1.7+/2.0)
    AES_256,
}

impl fmt::Display for EncryptionAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EncryptionAlgorithm::RC4_40 => write!(f, "RC4-40"),
            EncryptionAlgorithm::RC4_128 => write!(f, "RC4-128"),
            EncryptionAlgorithm::AES_128 => write!(f, "AES-128"),
            EncryptionAlgorithm::AES_256 => write!(f, "AES-256"),
        }
    }
}

/// PDF permissions flags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PDFPermissions(u32);

impl Default for PDFPermissions {
    fn default() -> Self {
        Self::new(Self::ALL)
    }
}

impl PDFPermissions {
    /// No permissions
    pub const NONE: u32 = 0;
    /// Print the document
    pub const PRINT: u32 = 1 << 2;
    /// Modify the document
    pub const MODIFY: u32 = 1 << 3;
    /// Copy text and graphics
    pub const COPY: u32 = 1 << 4;
    /// Add or modify annotations
    pub const ANNOTATE: u32 = 1 << 5;
    /// Fill form fields
    pub const FILL_FORMS: u32 = 1 << 8;
    /// Extract text and graphics for accessibility
    pub const EXTRACT: u32 = 1 << 9;
    /// Assemble the document
    pub const ASSEMBLE: u32 = 1 << 10;
    /// Print in high quality
    pub const PRINT_HIGH: u32 = 1 << 11;
    /// All permissions
    pub const ALL: u32 = 0xF_FFFF;

    /// Create new permissions from raw bits
    pub fn new(bits: u32) -> Self {
        Self(bits & Self::ALL)
    }

    /// Get raw permission bits
    pub fn bits(&self) -> u32 {
        self.0
    }

    /// Check if specific permission is granted
    pub fn has_permission(&self, permission: u32) -> bool {
        (self.0 & permission) == permission
    }

    /// `/P` value: reserved bits set as the revision requires, bits 1 and 2 clear
    pub fn to_p_value(&self, revision: Revision) -> i32 {
        let reserved = if revision >= Revision::R3 { 0xFFFF_F0C0 } else { 0xFFFF_FFC0 };
        ((self.0 | reserved) & 0xFFFF_FFFC) as i32
    }

    /// Permissions granted by a `/P` value
    pub fn from_p_value(p: i32) -> Self {
        Self::new(p as u32)
    }
}

/// What `PdfWriter::set_encryption` should produce
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncryptionMode {
    pub algorithm: EncryptionAlgorithm,
    pub revision: Revision,
    /// Key length in bits
    pub key_length: usize,
    /// `false` leaves XMP metadata streams readable (revision 4 and later)
    pub encrypt_metadata: bool,
}

impl EncryptionMode {
    /// Usual revision and key length for `algorithm`
    pub fn new(algorithm: EncryptionAlgorithm) -> Self {
        let (revision, key_length) = match algorithm {
            EncryptionAlgorithm::RC4_40 => (Revision::R2, 40),
            EncryptionAlgorithm::RC4_128 => (Revision::R3, 128),
            EncryptionAlgorithm::AES_128 => (Revision::R4, 128),
            EncryptionAlgorithm::AES_256 => (Revision::R6, 256),
        };
        Self {
            algorithm,
            revision,
            key_length,
            encrypt_metadata: true,
        }
    }

    pub fn with_revision(mut self, revision: Revision) -> Self {
        self.revision = revision;
        self
    }

    pub fn with_key_length(mut self, bits: usize) -> Self {
        self.key_length = bits;
        self
    }

    pub fn with_encrypt_metadata(mut self, encrypt_metadata: bool) -> Self {
        self.encrypt_metadata = encrypt_metadata;
        self
    }
}

impl From<EncryptionAlgorithm> for EncryptionMode {
    fn from(algorithm: EncryptionAlgorithm) -> Self {
        Self::new(algorithm)
    }
}

/// Whole-file encryption and decryption
#[derive(Debug, Clone, Default)]
pub struct PDFCrypto {
    options: ReaderOptions,
}

impl PDFCrypto {
    /// Create a new PDFCrypto instance
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: ReaderOptions) -> Self {
        Self { options }
    }

    fn read(&self, pdf_data: &[u8], password: &[u8]) -> PDFResult<PdfReader> {
        let store = storage::RandomAccessStore::from_bytes(pdf_data.to_vec());
        PdfReader::from_store(store, password, &self.options)
    }

    /// Decrypt PDF with user or owner password; the result has no `/Encrypt`
    pub fn decrypt_with_password(&self, pdf_data: &[u8], password: &str) -> PDFResult<Vec<u8>> {
        let reader = self.read(pdf_data, password.as_bytes())?;
        let mut writer = copy_document(&reader)?;
        writer.save()?;
        writer.into_bytes()
    }

    /// Encrypt PDF with password
    pub fn encrypt_with_password(
        &self,
        pdf_data: &[u8],
        user_password: &str,
        owner_password: &str,
        permissions: PDFPermissions,
        mode: impl Into<EncryptionMode>,
    ) -> PDFResult<Vec<u8>> {
        let reader = self.read(pdf_data, b"")?;
        if reader.is_encrypted() {
            return Err(PDFError::invalid_state("document is already encrypted"));
        }
        let mut writer = copy_document(&reader)?;
        writer.set_encryption(user_password.as_bytes(), owner_password.as_bytes(), permissions, mode)?;
        writer.save()?;
        writer.into_bytes()
    }

    /// Get encryption information from PDF without a password
    pub fn get_encryption_info(&self, pdf_data: &[u8]) -> PDFResult<EncryptionInfo> {
        let reader = PdfReader::inspect_bytes(pdf_data.to_vec())?;
        let standard = reader.security_handler().and_then(SecurityHandler::as_standard);
        Ok(EncryptionInfo {
            is_encrypted: reader.is_encrypted(),
            algorithm: standard.map(StandardSecurityHandler::algorithm),
            revision: standard.map(StandardSecurityHandler::revision),
            permissions: reader.permissions(),
            encrypt_metadata: standard.map_or(true, StandardSecurityHandler::encrypt_metadata),
        })
    }
}

/// Every object of `reader` (decrypted) in a writer under the same numbers
fn copy_document(reader: &PdfReader) -> PDFResult<PdfWriter> {
    let mut writer = PdfWriter::with_options(WriterOptions {
        version: reader.version().to_string(),
        ..WriterOptions::default()
    });
    let encrypt = reader.trailer().encrypt;

    let mut copied = 0;
    for id in reader.xref().live_ids() {
        if Some(id) == encrypt {
            continue;
        }
        let object = match reader.load_object(id) {
            Ok(object) => object,
            Err(err) if err.is_object_scoped() => {
                warn!("Dropping unreadable object {}: {}", id, err);
                continue;
            }
            Err(err) => return Err(err),
        };
        // Cross-reference and object streams are unpacked into plain objects
        if let Object::Stream(stream) = &object {
            if stream.has_type("XRef") || stream.has_type("ObjStm") {
                continue;
            }
        }
        writer.insert_object(id, object)?;
        copied += 1;
    }
    debug!("Copied {} objects", copied);

    writer.set_root(reader.trailer().root)?;
    if let Some(info) = reader.trailer().info {
        writer.set_info(info)?;
    }
    Ok(writer)
}

/// Information about PDF encryption
#[derive(Debug, Clone, PartialEq)]
pub struct EncryptionInfo {
    /// Whether the PDF is encrypted
    pub is_encrypted: bool,
    /// The encryption algorithm used
    pub algorithm: Option<EncryptionAlgorithm>,
    pub revision: Option<Revision>,
    /// Permissions granted to user-password sessions
    pub permissions: PDFPermissions,
    pub encrypt_metadata: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdf::{Dictionary, Stream};
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn sample_pdf() -> PDFResult<Vec<u8>> {
        let mut writer = PdfWriter::new();
        let pages = writer.allocate_object()?;
        let content = writer.add_object(Stream::from_content("BT (sample text) Tj ET"))?;
        let mut page = Dictionary::with_type("Page");
        page.set_reference("Parent", pages);
        page.set_reference("Contents", content);
        let page = writer.add_object(page)?;
        let mut tree = Dictionary::with_type("Pages");
        tree.set("Kids", vec![Object::Reference(page)]);
        tree.set("Count", 1);
        writer.set_object(pages, tree)?;
        let mut catalog = Dictionary::with_type("Catalog");
        catalog.set_reference("Pages", pages);
        let catalog = writer.add_object(catalog)?;
        writer.set_root(catalog)?;
        let mut info = Dictionary::new();
        info.set("Title", Object::string("Sample"));
        let info = writer.add_object(info)?;
        writer.set_info(info)?;
        writer.save()?;
        writer.into_bytes()
    }

    #[test_log::test]
    fn test_permissions() {
        let perms = PDFPermissions::new(PDFPermissions::PRINT | PDFPermissions::COPY);
        assert!(perms.has_permission(PDFPermissions::PRINT));
        assert!(perms.has_permission(PDFPermissions::COPY));
        assert!(!perms.has_permission(PDFPermissions::MODIFY));
    }

    #[rstest]
    #[case(Revision::R2, -64)]
    #[case(Revision::R3, -3904)]
    fn test_p_value(#[case] revision: Revision, #[case] empty: i32) {
        let none = PDFPermissions::new(PDFPermissions::NONE);
        assert_eq!(none.to_p_value(revision), empty);
        assert_eq!(PDFPermissions::default().to_p_value(revision), -4);

        let print = PDFPermissions::new(PDFPermissions::PRINT).to_p_value(revision);
        assert!(PDFPermissions::from_p_value(print).has_permission(PDFPermissions::PRINT));
        assert!(!PDFPermissions::from_p_value(print).has_permission(PDFPermissions::MODIFY));
    }

    #[test_log::test]
    fn test_encryption_mode_defaults() {
        let mode = EncryptionMode::from(EncryptionAlgorithm::AES_256);
        assert_eq!(mode.revision, Revision::R6);
        assert_eq!(mode.key_length, 256);
        assert!(mode.encrypt_metadata);
        assert_eq!(EncryptionMode::new(EncryptionAlgorithm::RC4_40).revision, Revision::R2);
    }

    #[rstest]
    #[case(EncryptionAlgorithm::RC4_40)]
    #[case(EncryptionAlgorithm::RC4_128)]
    #[case(EncryptionAlgorithm::AES_128)]
    #[case(EncryptionAlgorithm::AES_256)]
    fn test_password_encryption(#[case] algorithm: EncryptionAlgorithm) -> PDFResult<()> {
        let pdf_crypto = PDFCrypto::new();
        let sample = sample_pdf()?;

        let encrypted = pdf_crypto.encrypt_with_password(
            &sample,
            "user123",
            "owner123",
            PDFPermissions::new(PDFPermissions::PRINT),
            algorithm,
        )?;
        let info = pdf_crypto.get_encryption_info(&encrypted)?;
        assert!(info.is_encrypted);
        assert_eq!(info.algorithm, Some(algorithm));
        assert!(info.permissions.has_permission(PDFPermissions::PRINT));
        assert!(!info.permissions.has_permission(PDFPermissions::MODIFY));

        assert!(matches!(
            pdf_crypto.decrypt_with_password(&encrypted, "wrong"),
            Err(PDFError::BadPassword)
        ));
        let decrypted = pdf_crypto.decrypt_with_password(&encrypted, "user123")?;
        let reader = PdfReader::from_bytes(decrypted, b"")?;
        assert!(!reader.is_encrypted());
        assert_eq!(reader.page_text(1)?, "sample text");
        let title = reader.info()?.and_then(|info| info.get_string("Title").map(<[u8]>::to_vec));
        assert_eq!(title, Some(b"Sample".to_vec()));
        Ok(())
    }

    #[test_log::test]
    fn test_unencrypted_info() -> PDFResult<()> {
        let info = PDFCrypto::new().get_encryption_info(&sample_pdf()?)?;
        assert!(!info.is_encrypted);
        assert_eq!(info.algorithm, None);
        assert_eq!(info.permissions, PDFPermissions::default());
        Ok(())
    }

    #[test_log::test]
    fn test_encrypting_twice_is_refused() -> PDFResult<()> {
        let pdf_crypto = PDFCrypto::new();
        let encrypted = pdf_crypto.encrypt_with_password(
            &sample_pdf()?,
            "",
            "owner",
            PDFPermissions::default(),
            EncryptionAlgorithm::RC4_128,
        )?;
        assert!(pdf_crypto
            .encrypt_with_password(&encrypted, "", "owner", PDFPermissions::default(), EncryptionAlgorithm::RC4_128)
            .is_err());
        Ok(())
    }
}
