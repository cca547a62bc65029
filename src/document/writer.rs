//! Writing sessions: build an object graph and serialise it with a full xref table

use std::io::Write;
use std::path::Path;

use log::{debug, info};

use super::{generate_document_id, PdfReader, PdfStamper, ReaderOptions, SectionWriter};
use crate::crypto::PDFCryptoEngine;
use crate::error::{PDFError, PDFResult};
use crate::handlers::StandardSecurityHandler;
use crate::pdf::{Object, ObjectGraph, ObjectId, Trailer};
use crate::security::EncryptionState;
use crate::storage::RandomAccessStore;
use crate::{EncryptionMode, PDFPermissions};

/// Header comment with high-bit bytes so transfers treat the file as binary
const BINARY_MARKER: &[u8] = b"%\xE2\xE3\xCF\xD3\n";

/// Options for a writing session
#[derive(Debug, Clone)]
pub struct WriterOptions {
    /// Version written in the `%PDF-` header
    pub version: String,
    /// Flate level for streams without a filter; `None` leaves them as given
    pub compression_level: Option<u32>,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            version: "1.7".to_string(),
            compression_level: None,
        }
    }
}

/// Lifecycle of a writer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterState {
    Created,
    /// At least one object exists
    Opened,
    /// `save` is serialising the document
    Writing,
    /// Output is complete; nothing can change any more
    Closed,
}

struct Security {
    handler: StandardSecurityHandler,
    state: EncryptionState,
    /// Number of the `/Encrypt` dictionary, fixed by the first save attempt
    encrypt: Option<ObjectId>,
}

/// Builds a new PDF file
pub struct PdfWriter {
    graph: ObjectGraph,
    options: WriterOptions,
    state: WriterState,
    root: Option<ObjectId>,
    info: Option<ObjectId>,
    document_id: Vec<u8>,
    security: Option<Security>,
    output: RandomAccessStore,
}

impl std::fmt::Debug for PdfWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PdfWriter")
            .field("state", &self.state)
            .field("objects", &self.graph.len())
            .field("root", &self.root)
            .field("encrypted", &self.security.is_some())
            .finish()
    }
}

impl Default for PdfWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl PdfWriter {
    pub fn new() -> Self {
        Self::with_options(WriterOptions::default())
    }

    pub fn with_options(options: WriterOptions) -> Self {
        Self {
            graph: ObjectGraph::new(),
            options,
            state: WriterState::Created,
            root: None,
            info: None,
            document_id: generate_document_id(),
            security: None,
            output: RandomAccessStore::new(),
        }
    }

    pub fn state(&self) -> WriterState {
        self.state
    }

    /// First `/ID` element; encryption keys are bound to it
    pub fn document_id(&self) -> &[u8] {
        &self.document_id
    }

    fn ensure_mutable(&mut self) -> PDFResult<()> {
        match self.state {
            WriterState::Created => {
                self.state = WriterState::Opened;
                Ok(())
            }
            WriterState::Opened => Ok(()),
            WriterState::Writing => Err(PDFError::invalid_state("document is being written")),
            WriterState::Closed => Err(PDFError::WriterClosed),
        }
    }

    /// Move from `Created` to `Opened` explicitly
    pub fn open(&mut self) -> PDFResult<()> {
        self.ensure_mutable()
    }

    /// Reserve an object number to fill in later with [`PdfWriter::set_object`]
    pub fn allocate_object(&mut self) -> PDFResult<ObjectId> {
        self.ensure_mutable()?;
        Ok(self.graph.allocate())
    }

    /// Give an allocated object its value
    pub fn set_object(&mut self, id: ObjectId, object: impl Into<Object>) -> PDFResult<()> {
        self.ensure_mutable()?;
        self.graph.set(id, object.into())
    }

    /// Allocate a number and store `object` under it
    pub fn add_object(&mut self, object: impl Into<Object>) -> PDFResult<ObjectId> {
        self.ensure_mutable()?;
        Ok(self.graph.add(object.into()))
    }

    /// Store `object` under an explicit id, keeping numbers from another file
    pub fn insert_object(&mut self, id: ObjectId, object: impl Into<Object>) -> PDFResult<()> {
        self.ensure_mutable()?;
        self.graph.insert(id, object.into());
        Ok(())
    }

    pub fn get_object(&self, id: ObjectId) -> Option<&Object> {
        self.graph.get(id)
    }

    pub fn get_object_mut(&mut self, id: ObjectId) -> PDFResult<Option<&mut Object>> {
        self.ensure_mutable()?;
        Ok(self.graph.get_mut(id))
    }

    /// Drop an object; its number is written as a free entry
    pub fn free_object(&mut self, id: ObjectId) -> PDFResult<()> {
        self.ensure_mutable()?;
        self.graph.free(id)
    }

    /// Catalog referenced by the trailer's `/Root`
    pub fn set_root(&mut self, id: ObjectId) -> PDFResult<()> {
        self.ensure_mutable()?;
        self.root = Some(id);
        Ok(())
    }

    /// Information dictionary referenced by the trailer's `/Info`
    pub fn set_info(&mut self, id: ObjectId) -> PDFResult<()> {
        self.ensure_mutable()?;
        self.info = Some(id);
        Ok(())
    }

    /// Encrypt the document with the standard security handler.
    ///
    /// An empty owner password is replaced by a random one, leaving the
    /// document without a usable owner password.
    pub fn set_encryption(
        &mut self,
        user_password: &[u8],
        owner_password: &[u8],
        permissions: PDFPermissions,
        mode: impl Into<EncryptionMode>,
    ) -> PDFResult<()> {
        self.ensure_mutable()?;
        let mode = mode.into();
        let (handler, state) =
            StandardSecurityHandler::create(user_password, owner_password, permissions, mode, &self.document_id)?;
        info!("Document will be encrypted with {} {}", state.algorithm(), state.revision());
        let encrypt = self.security.as_ref().and_then(|security| security.encrypt);
        self.security = Some(Security {
            handler,
            state,
            encrypt,
        });
        Ok(())
    }

    pub fn is_encrypted(&self) -> bool {
        self.security.is_some()
    }

    /// Serialise the document; returns the number of bytes written
    pub fn save(&mut self) -> PDFResult<u64> {
        self.ensure_mutable()?;
        let root = self
            .root
            .ok_or_else(|| PDFError::invalid_state("no document catalog was set"))?;

        self.state = WriterState::Writing;
        match self.write_document(root) {
            Ok(output) => {
                self.output = output;
                self.state = WriterState::Closed;
                info!("Wrote {} byte document", self.output.len());
                Ok(self.output.len())
            }
            Err(err) => {
                self.state = WriterState::Opened;
                Err(err)
            }
        }
    }

    fn write_document(&mut self, root: ObjectId) -> PDFResult<RandomAccessStore> {
        let mut out = RandomAccessStore::new();
        write!(out, "%PDF-{}\n", self.options.version)?;
        out.write_all(BINARY_MARKER)?;

        let mut trailer = Trailer::new(root, 0);
        trailer.info = self.info;
        trailer.id = Some([self.document_id.clone(), self.document_id.clone()]);

        let engine = match &mut self.security {
            Some(security) => {
                let encrypt = *security.encrypt.get_or_insert_with(|| self.graph.allocate());
                self.graph.insert(encrypt, Object::Dictionary(security.handler.to_dict()));
                trailer.encrypt = Some(encrypt);
                debug!("Encryption dictionary is object {}", encrypt);
                Some(PDFCryptoEngine::new(&security.state).with_encrypt_dictionary(encrypt))
            }
            None => None,
        };

        match self.graph.get(root) {
            Some(Object::Dictionary(_)) => {}
            Some(other) => {
                return Err(PDFError::invalid_state(format!(
                    "document catalog {} is a {}",
                    root,
                    other.type_name()
                )))
            }
            None => return Err(PDFError::invalid_state(format!("document catalog {} has no value", root))),
        }

        let section = SectionWriter {
            engine: engine.as_ref(),
            compression: self.options.compression_level,
            full_table: true,
        };
        section.write(&mut out, self.graph.slots(), &mut trailer)?;
        Ok(out)
    }

    /// Bytes of the saved document
    pub fn as_bytes(&self) -> PDFResult<Vec<u8>> {
        self.closed_output().map(RandomAccessStore::to_vec)
    }

    pub fn into_bytes(self) -> PDFResult<Vec<u8>> {
        self.as_bytes()
    }

    /// Save if needed and write the document to `path`
    pub fn save_to<P: AsRef<Path>>(&mut self, path: P) -> PDFResult<u64> {
        if self.state != WriterState::Closed {
            self.save()?;
        }
        Ok(self.output.save_to_path(path)?)
    }

    /// Reopen the saved output for incremental updates.
    ///
    /// The stamper draws object numbers from this writer's allocator.
    pub fn into_stamper(self, password: &[u8]) -> PDFResult<PdfStamper> {
        let output = self.closed_output()?.duplicate();
        let reader = PdfReader::from_store(output, password, &ReaderOptions::default())?;
        PdfStamper::with_allocator(reader, self.graph.allocator().clone())
    }

    fn closed_output(&self) -> PDFResult<&RandomAccessStore> {
        match self.state {
            WriterState::Closed => Ok(&self.output),
            _ => Err(PDFError::invalid_state("document has not been saved")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdf::{Dictionary, Stream};
    use crate::EncryptionAlgorithm;
    use pretty_assertions::assert_eq;
    use test_log::test;

    fn one_page(writer: &mut PdfWriter, text: &str) -> PDFResult<ObjectId> {
        let pages = writer.allocate_object()?;
        let content = writer.add_object(Stream::from_content(format!("BT ({}) Tj ET", text)))?;
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
        Ok(catalog)
    }

    #[test]
    fn test_save_and_read_back() -> PDFResult<()> {
        let mut writer = PdfWriter::new();
        assert_eq!(writer.state(), WriterState::Created);
        one_page(&mut writer, "written")?;
        assert_eq!(writer.state(), WriterState::Opened);

        let written = writer.save()?;
        assert_eq!(writer.state(), WriterState::Closed);
        let bytes = writer.into_bytes()?;
        assert_eq!(bytes.len() as u64, written);
        assert!(bytes.starts_with(b"%PDF-1.7\n"));
        assert!(bytes.ends_with(b"%%EOF\n"));

        let reader = PdfReader::from_bytes(bytes, b"")?;
        assert!(!reader.is_rebuilt());
        assert_eq!(reader.trailer().size, 5);
        assert_eq!(reader.page_text(1)?, "written");
        Ok(())
    }

    #[test]
    fn test_closed_writer_rejects_changes() -> PDFResult<()> {
        let mut writer = PdfWriter::new();
        one_page(&mut writer, "x")?;
        writer.save()?;

        assert!(matches!(writer.add_object(Object::Null), Err(PDFError::WriterClosed)));
        assert!(matches!(
            writer.set_encryption(b"u", b"o", PDFPermissions::default(), EncryptionAlgorithm::RC4_128),
            Err(PDFError::WriterClosed)
        ));
        assert!(matches!(writer.save(), Err(PDFError::WriterClosed)));
        Ok(())
    }

    #[test]
    fn test_save_without_root() {
        let mut writer = PdfWriter::new();
        assert!(matches!(writer.save(), Err(PDFError::InvalidState(_))));
        assert!(writer.as_bytes().is_err());
    }

    #[test]
    fn test_failed_save_keeps_encrypt_number() -> PDFResult<()> {
        let mut writer = PdfWriter::new();
        let catalog = writer.allocate_object()?;
        writer.set_root(catalog)?;
        writer.set_encryption(b"u", b"o", PDFPermissions::default(), EncryptionAlgorithm::AES_128)?;

        assert!(matches!(writer.save(), Err(PDFError::InvalidState(_))));
        assert!(matches!(writer.save(), Err(PDFError::InvalidState(_))));
        assert_eq!(writer.state(), WriterState::Opened);

        writer.set_object(catalog, Dictionary::with_type("Catalog"))?;
        writer.save()?;

        let reader = PdfReader::from_bytes(writer.into_bytes()?, b"u")?;
        assert_eq!(reader.trailer().encrypt, Some(ObjectId::new(2, 0)));
        assert_eq!(reader.trailer().size, 3);
        Ok(())
    }

    #[test]
    fn test_unset_allocation_is_written_free() -> PDFResult<()> {
        let mut writer = PdfWriter::new();
        let unused = writer.allocate_object()?;
        one_page(&mut writer, "gap")?;
        writer.save()?;

        let reader = PdfReader::from_bytes(writer.into_bytes()?, b"")?;
        let entry = reader.xref().get(unused.number).cloned();
        assert!(entry.is_some_and(|entry| entry.is_free() && entry.generation == 1));
        assert_eq!(reader.get_object(unused)?, Object::Null);
        Ok(())
    }

    #[test]
    fn test_compressed_streams() -> PDFResult<()> {
        let mut writer = PdfWriter::with_options(WriterOptions {
            version: "1.5".to_string(),
            compression_level: Some(6),
        });
        one_page(&mut writer, "squeezed")?;
        writer.save()?;

        let bytes = writer.into_bytes()?;
        assert!(bytes.starts_with(b"%PDF-1.5"));
        let reader = PdfReader::from_bytes(bytes, b"")?;
        assert_eq!(reader.page_text(1)?, "squeezed");
        Ok(())
    }

    #[test]
    fn test_encrypted_save() -> PDFResult<()> {
        let mut writer = PdfWriter::new();
        one_page(&mut writer, "secret")?;
        writer.set_encryption(b"user", b"owner", PDFPermissions::default(), EncryptionAlgorithm::AES_128)?;
        writer.save()?;
        let bytes = writer.into_bytes()?;
        assert!(!bytes.windows(6).any(|w| w == b"secret"));

        let reader = PdfReader::from_bytes(bytes, b"user")?;
        assert_eq!(reader.page_text(1)?, "secret");
        Ok(())
    }
}
