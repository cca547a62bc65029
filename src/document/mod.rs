//! Writer, reader and incremental-update sessions over the PDF container

mod content;
mod pages;
mod reader;
mod stamper;
mod writer;

pub use content::extract_text;
pub use reader::{PdfReader, ReaderOptions, ReaderState};
pub use stamper::PdfStamper;
pub use writer::{PdfWriter, WriterOptions, WriterState};

use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use log::{debug, trace, warn};

use crate::crypto::PDFCryptoEngine;
use crate::error::PDFResult;
use crate::pdf::{IndirectObject, Object, ObjectId, Slot, Trailer, XRefEntry, XRefTable};
use crate::storage::RandomAccessStore;

static ID_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Fresh 16-byte `/ID` element: MD5 of the clock, a process-wide sequence
/// number and the process id
pub(crate) fn generate_document_id() -> Vec<u8> {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_nanos())
        .unwrap_or_default();
    let mut hasher = md5::Context::new();
    hasher.consume(nanos.to_le_bytes());
    hasher.consume(ID_SEQUENCE.fetch_add(1, Ordering::Relaxed).to_le_bytes());
    hasher.consume(std::process::id().to_le_bytes());
    hasher.compute().0.to_vec()
}

/// How one body-plus-xref section is written
pub(crate) struct SectionWriter<'a> {
    pub engine: Option<&'a PDFCryptoEngine>,
    pub compression: Option<u32>,
    /// Full tables list every number below `/Size`; update sections only
    /// list what changed
    pub full_table: bool,
}

impl SectionWriter<'_> {
    /// Append `slots`, an xref section and `trailer` at the store position.
    ///
    /// Returns the xref table written and the `startxref` offset.
    pub fn write<'s>(
        &self,
        out: &mut RandomAccessStore,
        slots: impl Iterator<Item = (ObjectId, &'s Slot)>,
        trailer: &mut Trailer,
    ) -> PDFResult<(XRefTable, u64)> {
        let mut xref = XRefTable::new();
        let mut max_number = 0;

        for (id, slot) in slots {
            max_number = max_number.max(id.number);
            match slot {
                Slot::Live(object) => {
                    let offset = out.position();
                    let object = self.prepare(id, object)?;
                    IndirectObject::new(id, object).write_to(out)?;
                    xref.insert(XRefEntry::in_use(id.number, offset, id.generation));
                    trace!("Wrote object {} at {}", id, offset);
                }
                Slot::Reserved => {
                    warn!("Object {} was allocated but never set, writing it as free", id);
                    xref.insert(XRefEntry::free(id.number, 0, id.generation.saturating_add(1)));
                }
                Slot::Free => xref.insert(XRefEntry::free(id.number, 0, id.generation)),
            }
        }

        trailer.size = trailer.size.max(max_number + 1);
        if self.full_table {
            xref.fill_gaps(trailer.size);
        }
        xref.link_free_list();

        let startxref = out.position();
        xref.write_to(out)?;
        out.write_all(b"trailer\n")?;
        trailer.to_dictionary().write_to(out)?;
        write!(out, "\nstartxref\n{}\n%%EOF\n", startxref)?;
        debug!(
            "Wrote xref section with {} entries at {} (size {})",
            xref.len(),
            startxref,
            trailer.size
        );
        Ok((xref, startxref))
    }

    fn prepare(&self, id: ObjectId, object: &Object) -> PDFResult<Object> {
        let mut object = object.clone();
        if let (Some(level), Object::Stream(stream)) = (self.compression, &mut object) {
            stream.flate_compress(level)?;
        }
        if let Some(engine) = self.engine {
            engine.encrypt_object(id, &mut object)?;
        }
        Ok(object)
    }
}
