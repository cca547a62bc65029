//! Incremental updates: append changed objects and a new xref section

use std::io::Write;
use std::path::Path;

use log::{debug, info};

use super::{generate_document_id, PdfReader, ReaderState, SectionWriter};
use crate::error::{PDFError, PDFResult};
use crate::pdf::graph::MAX_GENERATION;
use crate::pdf::{EntryKind, Object, ObjectAllocator, ObjectGraph, ObjectId, Slot};
use crate::storage::RandomAccessStore;

/// Appends an update section to an existing document.
///
/// The original bytes are never touched. Objects that are not changed
/// through the stamper are read from the underlying reader, and the
/// reader's encryption state is reused for everything written.
pub struct PdfStamper {
    reader: PdfReader,
    graph: ObjectGraph,
    root: ObjectId,
    info: Option<ObjectId>,
    output: Option<RandomAccessStore>,
}

impl std::fmt::Debug for PdfStamper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PdfStamper")
            .field("reader", &self.reader)
            .field("changed", &self.graph.len())
            .field("closed", &self.output.is_some())
            .finish()
    }
}

impl PdfStamper {
    pub fn new(reader: PdfReader) -> PDFResult<Self> {
        Self::with_allocator(reader, ObjectAllocator::default())
    }

    /// Stamper drawing new object numbers from `allocator`
    pub fn with_allocator(reader: PdfReader, allocator: ObjectAllocator) -> PDFResult<Self> {
        if reader.is_rebuilt() {
            return Err(PDFError::invalid_state(
                "cross-reference table was rebuilt; an update section would have no /Prev",
            ));
        }
        if reader.state() != ReaderState::Ready {
            return Err(PDFError::invalid_state(format!("reader is {:?}", reader.state())));
        }
        if !reader.is_opened_with_full_permissions() {
            return Err(PDFError::invalid_state("updating an encrypted document needs the owner password"));
        }

        let size = reader.trailer().size.max(reader.xref().max_number().saturating_add(1));
        allocator.reserve_through(size.saturating_sub(1));
        debug!("Stamping document with /Size {}, next object {}", size, allocator.peek());

        Ok(Self {
            root: reader.trailer().root,
            info: reader.trailer().info,
            reader,
            graph: ObjectGraph::with_allocator(allocator),
            output: None,
        })
    }

    pub fn reader(&self) -> &PdfReader {
        &self.reader
    }

    fn ensure_open(&self) -> PDFResult<()> {
        match self.output {
            Some(_) => Err(PDFError::WriterClosed),
            None => Ok(()),
        }
    }

    /// Current id of `number` in the existing file: the generation of a
    /// live entry, or the next generation of a free one
    fn existing(&self, number: u32) -> Option<(ObjectId, bool)> {
        let entry = self.reader.xref().get(number)?;
        match entry.kind {
            EntryKind::InUse => Some((entry.id(), true)),
            EntryKind::Compressed { .. } => Some((ObjectId::new(number, 0), true)),
            EntryKind::Free if number == 0 => None,
            EntryKind::Free => Some((entry.id(), false)),
        }
    }

    /// Latest version of an object, changed or not; unknown ids read as null
    pub fn get_object(&self, id: ObjectId) -> PDFResult<Object> {
        match self.graph.slot(id.number) {
            Some((current, Slot::Live(object))) if current == id => Ok(object.clone()),
            Some(_) => Ok(Object::Null),
            None => self.reader.get_object(id),
        }
    }

    /// Store a new value under an existing or allocated id
    pub fn set_object(&mut self, id: ObjectId, object: impl Into<Object>) -> PDFResult<()> {
        self.ensure_open()?;
        if self.graph.slot(id.number).is_some() {
            return self.graph.set(id, object.into());
        }
        match self.existing(id.number) {
            Some((current, true)) if current == id => {
                self.graph.insert(id, object.into());
                Ok(())
            }
            _ => Err(PDFError::ObjectNotFound(id)),
        }
    }

    /// Add a new object under a fresh number
    pub fn add_object(&mut self, object: impl Into<Object>) -> PDFResult<ObjectId> {
        self.ensure_open()?;
        Ok(self.graph.add(object.into()))
    }

    pub fn allocate_object(&mut self) -> PDFResult<ObjectId> {
        self.ensure_open()?;
        Ok(self.graph.allocate())
    }

    /// Free an object; the update lists it with the next generation
    pub fn free_object(&mut self, id: ObjectId) -> PDFResult<()> {
        self.ensure_open()?;
        if self.graph.slot(id.number).is_some() {
            return self.graph.free(id);
        }
        match self.existing(id.number) {
            Some((current, true)) if current == id => {
                self.graph
                    .mark_free(ObjectId::new(id.number, id.generation.saturating_add(1)));
                debug!("Freed existing object {}", id);
                Ok(())
            }
            _ => Err(PDFError::ObjectNotFound(id)),
        }
    }

    /// Write a new version of `number`; returns the id with its bumped
    /// generation
    pub fn replace_object(&mut self, number: u32, object: impl Into<Object>) -> PDFResult<ObjectId> {
        self.ensure_open()?;
        if self.graph.slot(number).is_some() {
            return self.graph.replace(number, object.into());
        }
        let (current, live) = self
            .existing(number)
            .ok_or(PDFError::ObjectNotFound(ObjectId::new(number, 0)))?;
        let generation = if live {
            current.generation.saturating_add(1)
        } else {
            current.generation
        };
        if generation == MAX_GENERATION {
            return Err(PDFError::malformed(format!("object {} has no generations left", number)));
        }
        let id = ObjectId::new(number, generation);
        self.graph.insert(id, object.into());
        Ok(id)
    }

    pub fn set_root(&mut self, id: ObjectId) -> PDFResult<()> {
        self.ensure_open()?;
        self.root = id;
        Ok(())
    }

    pub fn set_info(&mut self, id: ObjectId) -> PDFResult<()> {
        self.ensure_open()?;
        self.info = Some(id);
        Ok(())
    }

    /// Append the update; returns the number of bytes added
    pub fn close(&mut self) -> PDFResult<u64> {
        self.ensure_open()?;
        let source = self.reader.store();
        let original = source.len();
        let mut out = source.duplicate();
        out.set_position(original);
        if source.byte_at(original.saturating_sub(1)) != Some(b'\n') {
            out.write_all(b"\n")?;
        }

        let previous = self.reader.trailer();
        let mut trailer = previous.clone();
        trailer.root = self.root;
        trailer.info = self.info;
        trailer.prev = self.reader.startxref();
        trailer.xref_stream = None;
        trailer.size = previous.size.max(self.reader.xref().max_number().saturating_add(1));
        let first = match &previous.id {
            Some([first, _]) => first.clone(),
            None if self.reader.is_encrypted() => Vec::new(),
            None => generate_document_id(),
        };
        trailer.id = Some([first, generate_document_id()]);

        let section = SectionWriter {
            engine: self.reader.engine(),
            compression: None,
            full_table: false,
        };
        let (xref, startxref) = section.write(&mut out, self.graph.slots(), &mut trailer)?;

        let appended = out.len() - original;
        info!(
            "Appended {} bytes: {} xref entries at {}, /Size {}",
            appended,
            xref.len(),
            startxref,
            trailer.size
        );
        self.output = Some(out);
        Ok(appended)
    }

    fn closed_output(&self) -> PDFResult<&RandomAccessStore> {
        self.output
            .as_ref()
            .ok_or_else(|| PDFError::invalid_state("update has not been closed"))
    }

    /// Whole updated document
    pub fn as_bytes(&self) -> PDFResult<Vec<u8>> {
        self.closed_output().map(RandomAccessStore::to_vec)
    }

    pub fn into_bytes(self) -> PDFResult<Vec<u8>> {
        self.as_bytes()
    }

    /// Close if needed and write the updated document to `path`
    pub fn save_to<P: AsRef<Path>>(&mut self, path: P) -> PDFResult<u64> {
        if self.output.is_none() {
            self.close()?;
        }
        Ok(self.closed_output()?.save_to_path(path)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::PdfWriter;
    use crate::pdf::{Dictionary, Stream};
    use crate::{EncryptionAlgorithm, PDFPermissions};
    use pretty_assertions::assert_eq;
    use test_log::test;

    /// Single-page document; returns the writer and the content stream id
    fn document(text: &str) -> PDFResult<(PdfWriter, ObjectId)> {
        let mut writer = PdfWriter::new();
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
        Ok((writer, content))
    }

    #[test]
    fn test_update_appends_section() -> PDFResult<()> {
        let (mut writer, content) = document("before")?;
        writer.save()?;
        let original = writer.as_bytes()?;
        let previous = PdfReader::from_bytes(original.clone(), b"")?.startxref();

        let mut stamper = writer.into_stamper(b"")?;
        stamper.set_object(content, Stream::from_content("BT (after) Tj ET"))?;
        let extra = stamper.add_object(Object::string("new"))?;
        assert_eq!(extra.number, 5);
        let appended = stamper.close()?;

        let updated = stamper.into_bytes()?;
        assert_eq!(updated.len(), original.len() + appended as usize);
        assert_eq!(&updated[..original.len()], original.as_slice());

        let reader = PdfReader::from_bytes(updated, b"")?;
        assert_eq!(reader.trailer().prev, previous);
        assert_eq!(reader.trailer().size, 6);
        assert_eq!(reader.page_text(1)?, "after");
        assert_eq!(reader.get_object(extra)?, Object::string("new"));
        Ok(())
    }

    #[test]
    fn test_free_and_replace() -> PDFResult<()> {
        let (mut writer, content) = document("gone")?;
        writer.save()?;
        let mut stamper = PdfStamper::new(PdfReader::from_bytes(writer.into_bytes()?, b"")?)?;

        let extra = stamper.add_object(Object::from(1))?;
        stamper.free_object(content)?;
        let replaced = stamper.replace_object(extra.number, Object::from(2))?;
        assert_eq!(replaced, ObjectId::new(extra.number, 1));
        assert!(stamper.set_object(ObjectId::new(70, 0), Object::Null).is_err());
        stamper.close()?;

        let reader = PdfReader::from_bytes(stamper.into_bytes()?, b"")?;
        let entry = reader.xref().get(content.number).copied();
        assert!(entry.is_some_and(|entry| entry.is_free() && entry.generation == 1));
        assert_eq!(reader.get_object(content)?, Object::Null);
        assert_eq!(reader.get_object(replaced)?, Object::Integer(2));
        assert_eq!(reader.page_content(1)?, Vec::<u8>::new());
        Ok(())
    }

    #[test]
    fn test_closed_stamper_rejects_changes() -> PDFResult<()> {
        let (mut writer, _) = document("x")?;
        writer.save()?;
        let mut stamper = writer.into_stamper(b"")?;
        stamper.close()?;
        assert!(matches!(stamper.add_object(Object::Null), Err(PDFError::WriterClosed)));
        assert!(matches!(stamper.close(), Err(PDFError::WriterClosed)));
        Ok(())
    }

    #[test]
    fn test_user_session_cannot_stamp() -> PDFResult<()> {
        let (mut writer, _) = document("locked")?;
        writer.set_encryption(b"user", b"owner", PDFPermissions::default(), EncryptionAlgorithm::RC4_128)?;
        writer.save()?;
        let bytes = writer.into_bytes()?;

        let user = PdfReader::from_bytes(bytes.clone(), b"user")?;
        assert!(PdfStamper::new(user).is_err());
        let locked = PdfReader::inspect_bytes(bytes.clone())?;
        assert!(PdfStamper::new(locked).is_err());

        let mut stamper = PdfStamper::new(PdfReader::from_bytes(bytes, b"owner")?)?;
        stamper.add_object(Object::string("encrypted too"))?;
        stamper.close()?;
        let reader = PdfReader::from_bytes(stamper.into_bytes()?, b"user")?;
        assert_eq!(reader.page_text(1)?, "locked");
        let added = reader.get_object(ObjectId::new(6, 0))?;
        assert_eq!(added.as_bytes(), Some(b"encrypted too".as_slice()));
        Ok(())
    }
}
