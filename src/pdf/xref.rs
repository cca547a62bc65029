//! PDF cross-reference table implementation

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::io::Write;

use byteorder::{BigEndian, ByteOrder};
use log::{trace, warn};

use super::graph::MAX_GENERATION;
use super::lexer::{Lexer, Token};
use super::{ObjectId, Stream};
use crate::error::{PDFError, PDFResult};

/// Length of one serialized table record, EOL included
pub const XREF_ENTRY_LEN: usize = 20;

/// Largest offset that fits the ten-digit record field
pub const MAX_XREF_OFFSET: u64 = 9_999_999_999;

/// What a cross-reference entry points at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// Object stored at `offset`
    InUse,
    /// Free slot; `offset` holds the next free object number
    Free,
    /// Object stored inside an object stream (read only)
    Compressed { stream: u32, index: u32 },
}

/// One cross-reference entry.
///
/// Entries order and compare by object number alone: two entries for the
/// same number are the same slot, whatever their offsets or generations.
#[derive(Debug, Clone, Copy)]
pub struct XRefEntry {
    pub number: u32,
    pub offset: u64,
    pub generation: u16,
    pub kind: EntryKind,
}

impl PartialEq for XRefEntry {
    fn eq(&self, other: &Self) -> bool {
        self.number == other.number
    }
}

impl Eq for XRefEntry {}

impl PartialOrd for XRefEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for XRefEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.number.cmp(&other.number)
    }
}

impl XRefEntry {
    pub fn in_use(number: u32, offset: u64, generation: u16) -> Self {
        Self {
            number,
            offset,
            generation,
            kind: EntryKind::InUse,
        }
    }

    pub fn free(number: u32, next_free: u32, generation: u16) -> Self {
        Self {
            number,
            offset: next_free as u64,
            generation,
            kind: EntryKind::Free,
        }
    }

    pub fn compressed(number: u32, stream: u32, index: u32) -> Self {
        Self {
            number,
            offset: 0,
            generation: 0,
            kind: EntryKind::Compressed { stream, index },
        }
    }

    /// Head of the free list
    pub fn head() -> Self {
        Self::free(0, 0, MAX_GENERATION)
    }

    pub fn id(&self) -> ObjectId {
        ObjectId::new(self.number, self.generation)
    }

    pub fn is_free(&self) -> bool {
        self.kind == EntryKind::Free
    }

    /// Fixed-width record `oooooooooo ggggg n \n`
    pub fn to_bytes(&self) -> PDFResult<[u8; XREF_ENTRY_LEN]> {
        let flag = match self.kind {
            EntryKind::InUse => 'n',
            EntryKind::Free => 'f',
            EntryKind::Compressed { .. } => {
                return Err(PDFError::xref(format!(
                    "object {} lives in an object stream and has no table record",
                    self.number
                )))
            }
        };
        if self.offset > MAX_XREF_OFFSET {
            return Err(PDFError::xref(format!(
                "offset {} of object {} does not fit ten digits",
                self.offset, self.number
            )));
        }

        let text = format!("{:010} {:05} {} \n", self.offset, self.generation, flag);
        let mut record = [0u8; XREF_ENTRY_LEN];
        record.copy_from_slice(text.as_bytes());
        Ok(record)
    }
}

/// PDF cross-reference table
#[derive(Debug, Clone, Default)]
pub struct XRefTable {
    entries: BTreeMap<u32, XRefEntry>,
}

impl XRefTable {
    /// Create new xref table
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an entry
    pub fn insert(&mut self, entry: XRefEntry) {
        self.entries.insert(entry.number, entry);
    }

    pub fn get(&self, number: u32) -> Option<&XRefEntry> {
        self.entries.get(&number)
    }

    /// Add entries from an older section; entries already present win
    pub fn merge_older(&mut self, older: XRefTable) {
        for (number, entry) in older.entries {
            self.entries.entry(number).or_insert(entry);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in ascending object-number order
    pub fn iter(&self) -> impl Iterator<Item = &XRefEntry> {
        self.entries.values()
    }

    /// In-use and compressed entries, which is what a reader can materialize
    pub fn live_ids(&self) -> impl Iterator<Item = ObjectId> + '_ {
        self.iter().filter(|e| !e.is_free()).map(XRefEntry::id)
    }

    pub fn max_number(&self) -> u32 {
        self.entries.keys().next_back().copied().unwrap_or(0)
    }

    /// Mark every missing number below `size` as free
    pub fn fill_gaps(&mut self, size: u32) {
        for number in 1..size {
            self.entries
                .entry(number)
                .or_insert_with(|| XRefEntry::free(number, 0, 0));
        }
    }

    /// Chain free entries through their offsets, headed by object 0.
    ///
    /// Object 0 points at the first free number and the last free entry
    /// points back to 0.
    pub fn link_free_list(&mut self) {
        self.entries.insert(0, XRefEntry::head());
        let free: Vec<u32> = self
            .entries
            .values()
            .filter(|e| e.is_free())
            .map(|e| e.number)
            .collect();

        for (i, number) in free.iter().enumerate() {
            let next = free.get(i + 1).copied().unwrap_or(0);
            if let Some(entry) = self.entries.get_mut(number) {
                entry.offset = next as u64;
            }
        }
    }

    /// Runs of consecutive object numbers: `(first, entries)`
    pub fn subsections(&self) -> Vec<(u32, Vec<&XRefEntry>)> {
        let mut sections: Vec<(u32, Vec<&XRefEntry>)> = Vec::new();
        for entry in self.entries.values() {
            match sections.last_mut() {
                Some((first, run)) if *first as usize + run.len() == entry.number as usize => {
                    run.push(entry)
                }
                _ => sections.push((entry.number, vec![entry])),
            }
        }
        sections
    }

    /// Write `xref`, subsection headers and records
    pub fn write_to<W: Write>(&self, out: &mut W) -> PDFResult<()> {
        out.write_all(b"xref\n")?;
        for (first, run) in self.subsections() {
            write!(out, "{} {}\n", first, run.len())?;
            for entry in run {
                out.write_all(&entry.to_bytes()?)?;
            }
        }
        Ok(())
    }

    /// Parse a classic section starting at the `xref` keyword.
    ///
    /// The lexer is left in front of the `trailer` keyword.
    pub fn parse_section(lexer: &mut Lexer<'_>) -> PDFResult<XRefTable> {
        Self::parse_section_tokens(lexer).map_err(|e| match e {
            PDFError::MalformedPDF(msg) => PDFError::MalformedCrossReference(msg),
            other => other,
        })
    }

    fn parse_section_tokens(lexer: &mut Lexer<'_>) -> PDFResult<XRefTable> {
        lexer.expect_keyword("xref")?;
        let mut table = XRefTable::new();

        loop {
            let mark = lexer.position();
            let (start, count) = match lexer.expect_token()? {
                token if token.is_keyword("trailer") => {
                    lexer.seek(mark);
                    break;
                }
                Token::Integer(start) => (start, expect_integer(lexer, "subsection count")?),
                token => {
                    return Err(PDFError::xref(format!(
                        "unexpected {:?} in xref section at {}",
                        token, mark
                    )))
                }
            };
            if start < 0 || count < 0 || start + count > u32::MAX as i64 {
                return Err(PDFError::xref(format!("bad subsection {} {}", start, count)));
            }

            let mut start = start as u32;
            for i in 0..count as u32 {
                let offset = expect_integer(lexer, "entry offset")?;
                let generation = expect_integer(lexer, "entry generation")?;
                let flag = lexer.expect_token()?;
                if offset < 0 || !(0..=MAX_GENERATION as i64).contains(&generation) {
                    return Err(PDFError::xref(format!("bad entry {} {}", offset, generation)));
                }

                let free = flag.is_keyword("f");
                if !free && !flag.is_keyword("n") {
                    return Err(PDFError::xref(format!("bad entry type {:?}", flag)));
                }
                // Some writers number the first subsection from 1 while still
                // listing the object 0 record.
                if i == 0 && start == 1 && free && offset == 0 && generation == MAX_GENERATION as i64 {
                    start = 0;
                }

                let number = start + i;
                let entry = if free {
                    XRefEntry::free(number, offset.min(u32::MAX as i64) as u32, generation as u16)
                } else {
                    XRefEntry::in_use(number, offset as u64, generation as u16)
                };
                table.insert(entry);
            }
        }

        trace!("Parsed xref section with {} entries", table.len());
        Ok(table)
    }

    /// Decode the entries of a cross-reference stream
    pub fn from_stream(stream: &Stream) -> PDFResult<XRefTable> {
        let dict = stream.dict();
        let data = stream.decoded_content()?;

        let widths: Vec<usize> = dict
            .get_array("W")
            .ok_or_else(|| PDFError::xref("xref stream without /W"))?
            .iter()
            .map(|w| w.as_integer().unwrap_or(0).clamp(0, 8) as usize)
            .collect();
        if widths.len() < 3 {
            return Err(PDFError::xref("xref stream /W needs three widths"));
        }
        let row = widths[0] + widths[1] + widths[2];
        if row == 0 {
            return Err(PDFError::xref("xref stream rows are empty"));
        }

        let size = dict.get_integer("Size").unwrap_or(0).max(0);
        let index: Vec<(i64, i64)> = match dict.get_array("Index") {
            Some(items) => items
                .chunks(2)
                .filter_map(|pair| match pair {
                    [first, count] => Some((first.as_integer()?, count.as_integer()?)),
                    _ => None,
                })
                .collect(),
            None => vec![(0, size)],
        };

        let mut table = XRefTable::new();
        let mut pos = 0usize;
        'sections: for (first, count) in index {
            for i in 0..count.max(0) {
                if pos + row > data.len() {
                    warn!("xref stream ends after {} bytes", data.len());
                    break 'sections;
                }
                let mut fields = [0u64; 3];
                let mut field_pos = pos;
                for (field, &width) in fields.iter_mut().zip(&widths) {
                    if width > 0 {
                        *field = BigEndian::read_uint(&data[field_pos..field_pos + width], width);
                    }
                    field_pos += width;
                }
                pos += row;

                let kind = if widths[0] == 0 { 1 } else { fields[0] };
                let number = (first + i).clamp(0, u32::MAX as i64) as u32;
                let entry = match kind {
                    0 => XRefEntry::free(number, fields[1] as u32, fields[2] as u16),
                    1 => XRefEntry::in_use(number, fields[1], fields[2] as u16),
                    2 => XRefEntry::compressed(number, fields[1] as u32, fields[2] as u32),
                    _ => continue,
                };
                table.insert(entry);
            }
        }

        trace!("Decoded xref stream with {} entries", table.len());
        Ok(table)
    }
}

fn expect_integer(lexer: &mut Lexer<'_>, what: &str) -> PDFResult<i64> {
    match lexer.expect_token()? {
        Token::Integer(value) => Ok(value),
        token => Err(PDFError::xref(format!("expected {}, found {:?}", what, token))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdf::{Dictionary, Object};
    use crate::storage::RandomAccessStore;
    use pretty_assertions::assert_eq;
    use test_log::test;

    #[test]
    fn test_record_is_twenty_bytes() -> PDFResult<()> {
        for entry in [
            XRefEntry::in_use(1, 15, 0),
            XRefEntry::in_use(2, MAX_XREF_OFFSET, 65535),
            XRefEntry::head(),
        ] {
            let record = entry.to_bytes()?;
            assert_eq!(record.len(), XREF_ENTRY_LEN);
            assert!(record[..10].iter().all(u8::is_ascii_digit));
            assert_eq!(record[10], b' ');
            assert!(record[11..16].iter().all(u8::is_ascii_digit));
            assert_eq!(record[16], b' ');
            assert!(matches!(record[17], b'n' | b'f'));
            assert_eq!(&record[18..], b" \n");
        }
        assert_eq!(&XRefEntry::head().to_bytes()?, b"0000000000 65535 f \n");
        assert!(XRefEntry::in_use(3, MAX_XREF_OFFSET + 1, 0).to_bytes().is_err());
        Ok(())
    }

    #[test]
    fn test_ordering_and_equality_by_number() {
        let mut entries = vec![
            XRefEntry::in_use(9, 10, 0),
            XRefEntry::in_use(2, 999, 4),
            XRefEntry::free(5, 0, 1),
        ];
        entries.sort();
        let numbers: Vec<u32> = entries.iter().map(|e| e.number).collect();
        assert_eq!(numbers, vec![2, 5, 9]);

        assert_eq!(XRefEntry::in_use(4, 100, 0), XRefEntry::in_use(4, 200, 3));
        assert_eq!(XRefEntry::free(4, 7, 1), XRefEntry::in_use(4, 200, 0));
        assert_ne!(XRefEntry::in_use(4, 100, 0), XRefEntry::in_use(5, 100, 0));
    }

    #[test]
    fn test_free_list_and_subsections() -> PDFResult<()> {
        let mut table = XRefTable::new();
        table.insert(XRefEntry::in_use(1, 15, 0));
        table.insert(XRefEntry::in_use(4, 80, 0));
        table.insert(XRefEntry::in_use(7, 120, 0));
        table.fill_gaps(8);
        table.link_free_list();

        let chain: Vec<(u32, u64)> = table
            .iter()
            .filter(|e| e.is_free())
            .map(|e| (e.number, e.offset))
            .collect();
        assert_eq!(chain, vec![(0, 2), (2, 3), (3, 5), (5, 6), (6, 0)]);
        assert_eq!(table.get(0).map(|e| e.generation), Some(65535));

        let mut sparse = XRefTable::new();
        sparse.insert(XRefEntry::in_use(3, 10, 0));
        sparse.insert(XRefEntry::in_use(4, 20, 0));
        sparse.insert(XRefEntry::in_use(9, 30, 0));
        sparse.link_free_list();
        let headers: Vec<(u32, usize)> = sparse
            .subsections()
            .iter()
            .map(|(first, run)| (*first, run.len()))
            .collect();
        assert_eq!(headers, vec![(0, 1), (3, 2), (9, 1)]);

        let mut out = Vec::new();
        sparse.write_to(&mut out)?;
        let text = String::from_utf8_lossy(&out);
        assert!(text.starts_with("xref\n0 1\n0000000000 65535 f \n3 2\n"));
        assert_eq!(out.len(), 5 + 4 + 4 + 4 + 4 * XREF_ENTRY_LEN);
        Ok(())
    }

    #[test]
    fn test_parse_section() -> PDFResult<()> {
        let data = RandomAccessStore::from_bytes(
            b"xref\n1 3\n0000000000 65535 f \n0000000012 00000 n \n0000000234 00002 n\r\n\
              7 1\n0000000300 00000 n \ntrailer\n<<>>"
                .to_vec(),
        );
        let mut lexer = Lexer::new(&data);
        let table = XRefTable::parse_section(&mut lexer)?;

        assert_eq!(table.len(), 4);
        assert!(table.get(0).map_or(false, XRefEntry::is_free));
        assert_eq!(table.get(1).map(|e| e.offset), Some(12));
        assert_eq!(table.get(2).map(|e| e.id()), Some(ObjectId::new(2, 2)));
        assert_eq!(table.get(7).map(|e| e.offset), Some(300));
        assert!(lexer.next_token()?.map_or(false, |t| t.is_keyword("trailer")));
        Ok(())
    }

    #[test]
    fn test_invalid_section() {
        let data = RandomAccessStore::from_bytes(b"xref\n0 2\ninvalid entry\n".to_vec());
        let result = XRefTable::parse_section(&mut Lexer::new(&data));
        assert!(matches!(result, Err(PDFError::MalformedCrossReference(_))));
    }

    #[test]
    fn test_xref_stream_entries() -> PDFResult<()> {
        let mut dict = Dictionary::with_type("XRef");
        dict.set("W", vec![Object::from(1), Object::from(2), Object::from(1)]);
        dict.set("Index", vec![Object::from(0), Object::from(2), Object::from(10), Object::from(1)]);
        dict.set("Size", 11);
        let rows = vec![
            0, 0x00, 0x00, 0xFF, // 0: free
            1, 0x01, 0x2C, 0x00, // 1: offset 300
            2, 0x00, 0x05, 0x03, // 10: object stream 5, index 3
        ];
        let table = XRefTable::from_stream(&Stream::new(dict, rows))?;

        assert!(table.get(0).map_or(false, XRefEntry::is_free));
        assert_eq!(table.get(1).map(|e| e.offset), Some(300));
        assert_eq!(
            table.get(10).map(|e| e.kind),
            Some(EntryKind::Compressed { stream: 5, index: 3 })
        );
        Ok(())
    }

    #[test]
    fn test_merge_keeps_newer_entries() {
        let mut newer = XRefTable::new();
        newer.insert(XRefEntry::in_use(1, 500, 0));
        let mut older = XRefTable::new();
        older.insert(XRefEntry::in_use(1, 10, 0));
        older.insert(XRefEntry::in_use(2, 20, 0));

        newer.merge_older(older);
        assert_eq!(newer.get(1).map(|e| e.offset), Some(500));
        assert_eq!(newer.get(2).map(|e| e.offset), Some(20));
    }
}
