//! File-structure parsing: header, cross-reference chain and recovery
//!
//! This layer only locates and parses raw objects. Decryption and lazy
//! resolution live in the document reader.

use std::collections::HashSet;

use log::{debug, info, trace, warn};

use super::lexer::{find_backward, Lexer, Token};
use super::xref::{EntryKind, XRefEntry, XRefTable};
use super::{Dictionary, Object, ObjectId, Stream, Trailer};
use crate::error::{PDFError, PDFResult};
use crate::storage::RandomAccessStore;

const HEADER_WINDOW: usize = 1024;

/// Cross-reference data merged across an update chain
#[derive(Debug, Clone)]
pub struct XRefChain {
    /// Entries of all sections, newer sections shadowing older ones
    pub table: XRefTable,
    /// Trailer of the newest section
    pub trailer: Trailer,
    /// Offset of the newest section
    pub startxref: u64,
    /// Number of sections walked
    pub sections: usize,
}

/// Structural parser over a store
pub struct PDFParser<'a> {
    store: &'a RandomAccessStore,
}

impl<'a> PDFParser<'a> {
    /// Create new parser
    pub fn new(store: &'a RandomAccessStore) -> Self {
        Self { store }
    }

    /// Version from the `%PDF-x.y` header, which may sit after some junk
    pub fn header_version(&self) -> PDFResult<String> {
        let head = self.store.slice_at(0, HEADER_WINDOW);
        let start = head
            .windows(5)
            .position(|w| w == b"%PDF-")
            .ok_or_else(|| PDFError::malformed("PDF header signature not found"))?;
        if start > 0 {
            warn!("PDF header found at offset {}", start);
        }

        let version: String = head[start + 5..]
            .iter()
            .take_while(|b| b.is_ascii_digit() || **b == b'.')
            .map(|&b| b as char)
            .collect();
        if version.is_empty() {
            return Err(PDFError::malformed("PDF header has no version"));
        }
        Ok(version)
    }

    /// Offset recorded after the last `startxref` keyword
    pub fn find_startxref(&self) -> PDFResult<u64> {
        let pos = find_backward(self.store, self.store.len(), b"startxref")
            .ok_or_else(|| PDFError::xref("startxref not found"))?;
        let mut lexer = Lexer::at(self.store, pos + b"startxref".len() as u64);
        match lexer.next_token() {
            Ok(Some(Token::Integer(offset))) if offset >= 0 => Ok(offset as u64),
            other => Err(PDFError::xref(format!("startxref at {} has no offset: {:?}", pos, other))),
        }
    }

    /// Walk the section chain from `startxref` through every `/Prev`
    pub fn read_xref_chain(&self) -> PDFResult<XRefChain> {
        let startxref = self.find_startxref()?;
        let mut visited = HashSet::new();
        let mut next = Some(startxref);
        let mut table = XRefTable::new();
        let mut newest: Option<Trailer> = None;
        let mut sections = 0usize;

        while let Some(offset) = next {
            if !visited.insert(offset) {
                return Err(PDFError::xref(format!("xref chain loops back to {}", offset)));
            }
            let (mut section, dictionary) = self.read_section_at(offset)?;
            let trailer = Trailer::from_dictionary(dictionary)?;

            if let Some(stream_offset) = trailer.xref_stream {
                if visited.insert(stream_offset) {
                    let (hybrid, _) = self.read_section_at(stream_offset)?;
                    section.merge_older(hybrid);
                }
            }

            debug!("Read xref section at {} ({} entries)", offset, section.len());
            table.merge_older(section);
            next = trailer.prev;
            sections += 1;
            if newest.is_none() {
                newest = Some(trailer);
            }
        }

        let trailer = newest.ok_or_else(|| PDFError::xref("no xref section"))?;
        Ok(XRefChain {
            table,
            trailer,
            startxref,
            sections,
        })
    }

    /// Section and trailer dictionary at `offset`, classic or stream form
    fn read_section_at(&self, offset: u64) -> PDFResult<(XRefTable, Dictionary)> {
        if offset >= self.store.len() {
            return Err(PDFError::xref(format!(
                "xref offset {} beyond end of file {}",
                offset,
                self.store.len()
            )));
        }

        let mut lexer = Lexer::at(self.store, offset);
        let first = lexer.next_token().map_err(to_xref_error)?;
        lexer.seek(offset);

        match first {
            Some(token) if token.is_keyword("xref") => {
                let table = XRefTable::parse_section(&mut lexer)?;
                lexer.expect_keyword("trailer").map_err(to_xref_error)?;
                match lexer.parse_object().map_err(to_xref_error)? {
                    Object::Dictionary(dict) => Ok((table, dict)),
                    other => Err(PDFError::xref(format!("trailer is a {}", other.type_name()))),
                }
            }
            Some(Token::Integer(_)) => {
                let object = lexer.parse_indirect_object(&|_| None).map_err(to_xref_error)?;
                match object.object {
                    Object::Stream(stream) if stream.has_type("XRef") => {
                        let table = XRefTable::from_stream(&stream).map_err(to_xref_error)?;
                        Ok((table, stream.dict().clone()))
                    }
                    other => Err(PDFError::xref(format!(
                        "object at {} is a {} not an xref stream",
                        offset,
                        other.type_name()
                    ))),
                }
            }
            other => Err(PDFError::xref(format!("no xref at {}: {:?}", offset, other))),
        }
    }

    /// Parse the raw object an in-use entry points at
    pub fn read_object(
        &self,
        entry: &XRefEntry,
        resolve_length: &dyn Fn(ObjectId) -> Option<i64>,
    ) -> PDFResult<Object> {
        if entry.kind != EntryKind::InUse {
            return Err(PDFError::ObjectNotFound(entry.id()));
        }
        if entry.offset >= self.store.len() {
            return Err(PDFError::malformed(format!(
                "object {} offset {} beyond end of file",
                entry.number, entry.offset
            )));
        }

        let mut lexer = Lexer::at(self.store, entry.offset);
        let object = lexer.parse_indirect_object(resolve_length)?;
        if object.id.number != entry.number {
            return Err(PDFError::malformed(format!(
                "offset {} holds object {} instead of {}",
                entry.offset, object.id.number, entry.number
            )));
        }
        if object.id.generation != entry.generation {
            warn!(
                "object {} has generation {} but xref says {}",
                entry.number, object.id.generation, entry.generation
            );
        }
        Ok(object.object)
    }

    /// Check that every in-use entry points at its own `N G obj` header
    pub fn verify_offsets(&self, table: &XRefTable) -> PDFResult<()> {
        for entry in table.iter().filter(|entry| entry.kind == EntryKind::InUse) {
            let header = (entry.offset < self.store.len())
                .then(|| Lexer::at(self.store, entry.offset).read_object_header())
                .flatten();
            match header {
                Some(id) if id.number == entry.number => {}
                Some(id) => {
                    return Err(PDFError::xref(format!(
                        "offset {} of object {} holds object {}",
                        entry.offset, entry.number, id
                    )))
                }
                None => {
                    return Err(PDFError::xref(format!(
                        "no header for object {} at offset {}",
                        entry.number, entry.offset
                    )))
                }
            }
        }
        Ok(())
    }

    /// Rebuild the table by scanning for `N G obj` at line starts.
    ///
    /// A later definition replaces an earlier one unless its generation is
    /// lower. The last `trailer` carrying `/Root` is used; when none survives,
    /// an xref stream dictionary or the catalog object stands in for it.
    pub fn rebuild_xref(&self) -> PDFResult<(XRefTable, Trailer)> {
        info!("Rebuilding cross-reference table by scanning {} bytes", self.store.len());
        let mut table = XRefTable::new();
        let mut trailer_dict: Option<Dictionary> = None;

        for line_start in LineStarts::new(self.store) {
            match self.store.byte_at(line_start) {
                Some(b't') => {
                    if self.store.slice_at(line_start, 7).as_ref() != b"trailer" {
                        continue;
                    }
                    let mut lexer = Lexer::at(self.store, line_start + 7);
                    if let Ok(Object::Dictionary(dict)) = lexer.parse_object() {
                        if dict.get_reference("Root").is_some() {
                            trailer_dict = Some(dict);
                        }
                    }
                }
                Some(b'0'..=b'9') => {
                    let mut lexer = Lexer::at(self.store, line_start);
                    if let Some(id) = lexer.read_object_header() {
                        let newer = table
                            .get(id.number)
                            .map_or(true, |existing| id.generation >= existing.generation);
                        if newer {
                            trace!("Found object {} at {}", id, line_start);
                            table.insert(XRefEntry::in_use(id.number, line_start, id.generation));
                        }
                    }
                }
                _ => {}
            }
        }

        if table.is_empty() {
            return Err(PDFError::malformed("no objects found while rebuilding xref"));
        }

        let mut trailer = match trailer_dict {
            Some(dict) => Trailer::from_dictionary(dict)?,
            None => self.synthesize_trailer(&table)?,
        };
        trailer.prev = None;
        trailer.xref_stream = None;
        trailer.size = trailer.size.max(table.max_number() + 1);

        info!("Rebuilt xref with {} objects, root {}", table.len(), trailer.root);
        Ok((table, trailer))
    }

    fn synthesize_trailer(&self, table: &XRefTable) -> PDFResult<Trailer> {
        warn!("No trailer survived, looking for an xref stream or catalog");
        let mut entries: Vec<&XRefEntry> = table.iter().collect();
        entries.sort_by_key(|e| e.offset);

        let mut xref_dict = None;
        let mut catalog = None;
        for entry in entries {
            match self.read_object(entry, &|_| None) {
                Ok(Object::Stream(stream)) if stream.has_type("XRef") => {
                    if stream.dict().get_reference("Root").is_some() {
                        xref_dict = Some(stream.dict().clone());
                    }
                }
                Ok(Object::Dictionary(dict)) if dict.has_type("Catalog") => {
                    catalog = Some(entry.id());
                }
                _ => {}
            }
        }

        if let Some(dict) = xref_dict {
            return Trailer::from_dictionary(dict);
        }
        let root = catalog.ok_or_else(|| PDFError::malformed("no trailer and no catalog found"))?;
        Ok(Trailer::new(root, table.max_number() + 1))
    }
}

/// Decoded object stream: `(number, offset)` pairs followed by objects
pub struct ObjectStream {
    store: RandomAccessStore,
    first: u64,
    offsets: Vec<(u32, u64)>,
}

impl ObjectStream {
    /// Decode an `/ObjStm` stream whose payload is already decrypted
    pub fn parse(stream: &Stream) -> PDFResult<Self> {
        let dict = stream.dict();
        let count = dict
            .get_integer("N")
            .filter(|&n| n >= 0)
            .ok_or_else(|| PDFError::MissingDictionaryEntry("N".to_string()))?;
        let first = dict
            .get_integer("First")
            .filter(|&f| f >= 0)
            .ok_or_else(|| PDFError::MissingDictionaryEntry("First".to_string()))? as u64;

        let store = RandomAccessStore::from_bytes(stream.decoded_content()?);
        let mut lexer = Lexer::new(&store);
        let mut offsets = Vec::with_capacity(count as usize);
        for _ in 0..count {
            match (lexer.next_token()?, lexer.next_token()?) {
                (Some(Token::Integer(number)), Some(Token::Integer(offset)))
                    if number >= 0 && offset >= 0 =>
                {
                    offsets.push((number as u32, offset as u64))
                }
                _ => return Err(PDFError::malformed("object stream header is damaged")),
            }
        }
        Ok(Self { store, first, offsets })
    }

    /// Object `number`, preferring the slot at `index`
    pub fn get(&self, number: u32, index: u32) -> PDFResult<Object> {
        let slot = match self.offsets.get(index as usize) {
            Some(&(n, offset)) if n == number => Some(offset),
            _ => self.offsets.iter().find(|(n, _)| *n == number).map(|&(_, o)| o),
        };
        let offset = slot.ok_or(PDFError::ObjectNotFound(ObjectId::new(number, 0)))?;
        Lexer::at(&self.store, self.first + offset).parse_object()
    }

    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }
}

fn to_xref_error(error: PDFError) -> PDFError {
    match error {
        PDFError::MalformedPDF(msg) | PDFError::TruncatedStream(msg) => PDFError::MalformedCrossReference(msg),
        other => other,
    }
}

/// Iterator over positions that start a line (0 and every byte after an EOL)
struct LineStarts<'a> {
    store: &'a RandomAccessStore,
    pos: Option<u64>,
}

impl<'a> LineStarts<'a> {
    fn new(store: &'a RandomAccessStore) -> Self {
        Self { store, pos: Some(0) }
    }
}

impl Iterator for LineStarts<'_> {
    type Item = u64;

    fn next(&mut self) -> Option<u64> {
        let start = self.pos.filter(|&p| p < self.store.len())?;
        let mut scan = start;
        self.pos = loop {
            let block = self.store.slice_at(scan, 4096);
            if block.is_empty() {
                break None;
            }
            if let Some(i) = block.iter().position(|&b| b == b'\r' || b == b'\n') {
                let eol = scan + i as u64;
                let crlf = self.store.byte_at(eol) == Some(b'\r') && self.store.byte_at(eol + 1) == Some(b'\n');
                break Some(if crlf { eol + 2 } else { eol + 1 });
            }
            scan += block.len() as u64;
        };
        Some(start)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdf::ObjectId;
    use pretty_assertions::assert_eq;
    use test_log::test;

    const SIMPLE: &[u8] = b"%PDF-1.4\n\
1 0 obj\n<</Type /Catalog /Pages 2 0 R>>\nendobj\n\
2 0 obj\n<</Type /Pages /Kids [] /Count 0>>\nendobj\n\
xref\n0 3\n0000000000 65535 f \n0000000009 00000 n \n0000000056 00000 n \n\
trailer\n<</Size 3 /Root 1 0 R>>\nstartxref\n106\n%%EOF\n";

    fn store(data: &[u8]) -> RandomAccessStore {
        RandomAccessStore::from_bytes(data.to_vec())
    }

    #[test]
    fn test_header_and_chain() -> PDFResult<()> {
        let data = store(SIMPLE);
        let parser = PDFParser::new(&data);
        assert_eq!(parser.header_version()?, "1.4");

        let chain = parser.read_xref_chain()?;
        assert_eq!(chain.startxref, 106);
        assert_eq!(chain.sections, 1);
        assert_eq!(chain.trailer.root, ObjectId::new(1, 0));

        let entry = chain.table.get(2).copied().ok_or(PDFError::ObjectNotFound(ObjectId::new(2, 0)))?;
        let pages = parser.read_object(&entry, &|_| None)?;
        assert_eq!(pages.expect_dict()?.get_integer("Count"), Some(0));
        Ok(())
    }

    #[test]
    fn test_bad_startxref_is_xref_error() {
        let mut bytes = SIMPLE.to_vec();
        let pos = bytes.windows(3).rposition(|w| w == b"106").unwrap();
        bytes[pos..pos + 3].copy_from_slice(b"999");
        let data = store(&bytes);
        assert!(matches!(
            PDFParser::new(&data).read_xref_chain(),
            Err(PDFError::MalformedCrossReference(_))
        ));
    }

    #[test]
    fn test_verify_offsets() -> PDFResult<()> {
        let data = store(SIMPLE);
        let parser = PDFParser::new(&data);
        parser.verify_offsets(&parser.read_xref_chain()?.table)?;

        let mut bytes = SIMPLE.to_vec();
        let pos = bytes.windows(10).position(|w| w == b"0000000056").unwrap();
        bytes[pos..pos + 10].copy_from_slice(b"0000000057");
        let data = store(&bytes);
        let parser = PDFParser::new(&data);
        let table = parser.read_xref_chain()?.table;
        assert!(matches!(
            parser.verify_offsets(&table),
            Err(PDFError::MalformedCrossReference(msg)) if msg.contains("object 2")
        ));
        Ok(())
    }

    #[test]
    fn test_rebuild_finds_objects_and_trailer() -> PDFResult<()> {
        let data = store(SIMPLE);
        let (table, trailer) = PDFParser::new(&data).rebuild_xref()?;
        assert_eq!(table.get(1).map(|e| e.offset), Some(9));
        assert_eq!(table.get(2).map(|e| e.offset), Some(56));
        assert_eq!(trailer.root, ObjectId::new(1, 0));
        assert_eq!(trailer.size, 3);
        Ok(())
    }

    #[test]
    fn test_rebuild_without_trailer_uses_catalog() -> PDFResult<()> {
        let cut = SIMPLE.windows(4).position(|w| w == b"xref").unwrap();
        let mut bytes = SIMPLE[..cut].to_vec();
        bytes.extend_from_slice(b"1 1 obj\n<</Type /Catalog /Pages 2 0 R /Rev 2>>\nendobj\n");
        let data = store(&bytes);

        let (table, trailer) = PDFParser::new(&data).rebuild_xref()?;
        assert_eq!(table.get(1).map(|e| e.generation), Some(1));
        assert_eq!(trailer.root, ObjectId::new(1, 1));
        Ok(())
    }

    #[test]
    fn test_prev_loop_is_detected() {
        let text = b"%PDF-1.4\nxref\n0 1\n0000000000 65535 f \ntrailer\n<</Size 1 /Root 1 0 R /Prev 9>>\nstartxref\n9\n%%EOF";
        let data = store(text);
        let result = PDFParser::new(&data).read_xref_chain();
        assert!(matches!(result, Err(PDFError::MalformedCrossReference(msg)) if msg.contains("loops")));
    }

    #[test]
    fn test_object_stream() -> PDFResult<()> {
        let mut dict = Dictionary::with_type("ObjStm");
        dict.set("N", 2);
        dict.set("First", 9);
        let stream = Stream::new(dict, b"7 0 8 3 1 (hi)".to_vec());
        let objects = ObjectStream::parse(&stream)?;

        assert_eq!(objects.len(), 2);
        assert_eq!(objects.get(7, 0)?, Object::Integer(1));
        assert_eq!(objects.get(8, 0)?, Object::string("hi"));
        assert!(objects.get(9, 1).is_err());
        Ok(())
    }
}
