//! PDF stream object implementation

use std::io::{self, Write};

use log::trace;

use super::filter::{self, Filter, FilterContext};
use super::{Dictionary, Object};
use crate::error::PDFResult;

/// PDF stream object
///
/// The dictionary is kept apart from the raw payload. The payload is stored
/// exactly as it appears in the file (still filtered, possibly encrypted);
/// `/Length` follows the payload on every write.
#[derive(Debug, Clone, PartialEq)]
pub struct Stream {
    /// Stream dictionary
    dictionary: Dictionary,
    /// Raw stream data
    content: Vec<u8>,
}

impl Stream {
    /// Create new stream object
    pub fn new(dictionary: Dictionary, content: Vec<u8>) -> Self {
        let mut stream = Self {
            dictionary,
            content: Vec::new(),
        };
        stream.set_content(content);
        stream
    }

    /// Stream over unfiltered bytes with an otherwise empty dictionary
    pub fn from_content(content: impl Into<Vec<u8>>) -> Self {
        Self::new(Dictionary::new(), content.into())
    }

    pub fn dict(&self) -> &Dictionary {
        &self.dictionary
    }

    pub fn dict_mut(&mut self) -> &mut Dictionary {
        &mut self.dictionary
    }

    /// Raw payload bytes
    pub fn content(&self) -> &[u8] {
        &self.content
    }

    /// Replace the raw payload and update `/Length`
    pub fn set_content(&mut self, content: Vec<u8>) {
        self.dictionary.set("Length", content.len());
        self.content = content;
    }

    /// Whether `/Type` equals `expected`
    pub fn has_type(&self, expected: &str) -> bool {
        self.dictionary.has_type(expected)
    }

    /// Payload with all declared filters removed
    pub fn decoded_content(&self) -> PDFResult<Vec<u8>> {
        trace!("Decoding {} byte stream", self.content.len());
        filter::decode_all(&self.dictionary, &self.content)
    }

    /// Compress an unfiltered payload with Flate
    pub fn flate_compress(&mut self, level: u32) -> PDFResult<()> {
        if self.dictionary.contains_key("Filter") {
            return Ok(());
        }
        let ctx = FilterContext {
            compression_level: level,
            ..FilterContext::default()
        };
        let encoded = Filter::FlateDecode.encode(&self.content, &ctx)?;
        self.dictionary.set("Filter", Object::name(Filter::FlateDecode.name()));
        self.set_content(encoded);
        Ok(())
    }

    /// Write `<<dict>>\nstream\n...\nendstream`
    pub fn write_to<W: Write>(&self, out: &mut W) -> io::Result<()> {
        let mut dictionary = self.dictionary.clone();
        dictionary.set("Length", self.content.len());
        dictionary.write_to(out)?;
        out.write_all(b"\nstream\n")?;
        out.write_all(&self.content)?;
        out.write_all(b"\nendstream")
    }
}
