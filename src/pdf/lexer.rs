//! Byte-level tokenizer and object parser
//!
//! A [`Lexer`] borrows a [`RandomAccessStore`] and keeps its own position, so
//! any number of lexers can walk the same store at once.

use log::{trace, warn};

use super::object::{is_delimiter, is_whitespace};
use super::{Dictionary, IndirectObject, Object, ObjectId, Stream, StringFormat};
use crate::error::{PDFError, PDFResult};
use crate::storage::RandomAccessStore;

const MAX_NESTING: usize = 256;
const SEARCH_BLOCK: usize = 4096;

/// Lexical token
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Integer(i64),
    Real(f64),
    Name(String),
    String(Vec<u8>),
    HexString(Vec<u8>),
    ArrayStart,
    ArrayEnd,
    DictStart,
    DictEnd,
    /// Any other run of regular characters (`obj`, `R`, `true`, operators)
    Keyword(String),
}

impl Token {
    pub fn is_keyword(&self, keyword: &str) -> bool {
        matches!(self, Token::Keyword(k) if k == keyword)
    }
}

/// Tokenizer over a store
pub struct Lexer<'a> {
    store: &'a RandomAccessStore,
    pos: u64,
    depth: usize,
}

impl<'a> Lexer<'a> {
    /// Lexer at the start of `store`
    pub fn new(store: &'a RandomAccessStore) -> Self {
        Self::at(store, 0)
    }

    /// Lexer at an absolute position
    pub fn at(store: &'a RandomAccessStore, pos: u64) -> Self {
        Self { store, pos, depth: 0 }
    }

    pub fn position(&self) -> u64 {
        self.pos
    }

    pub fn seek(&mut self, pos: u64) {
        self.pos = pos;
    }

    pub fn is_eof(&self) -> bool {
        self.pos >= self.store.len()
    }

    fn peek(&self) -> Option<u8> {
        self.store.byte_at(self.pos)
    }

    fn peek_at(&self, offset: u64) -> Option<u8> {
        self.store.byte_at(self.pos + offset)
    }

    fn advance(&mut self) -> Option<u8> {
        let byte = self.peek();
        if byte.is_some() {
            self.pos += 1;
        }
        byte
    }

    /// Skip whitespace and comments
    pub fn skip_whitespace(&mut self) {
        while let Some(b) = self.peek() {
            if is_whitespace(b) {
                self.pos += 1;
            } else if b == b'%' {
                while let Some(c) = self.advance() {
                    if c == b'\n' || c == b'\r' {
                        break;
                    }
                }
            } else {
                break;
            }
        }
    }

    /// Next token, `None` at end of input
    pub fn next_token(&mut self) -> PDFResult<Option<Token>> {
        self.skip_whitespace();
        let Some(b) = self.peek() else {
            return Ok(None);
        };

        let token = match b {
            b'[' => {
                self.pos += 1;
                Token::ArrayStart
            }
            b']' => {
                self.pos += 1;
                Token::ArrayEnd
            }
            b'<' if self.peek_at(1) == Some(b'<') => {
                self.pos += 2;
                Token::DictStart
            }
            b'<' => {
                self.pos += 1;
                Token::HexString(self.read_hex_string()?)
            }
            b'>' if self.peek_at(1) == Some(b'>') => {
                self.pos += 2;
                Token::DictEnd
            }
            b'(' => {
                self.pos += 1;
                Token::String(self.read_literal_string()?)
            }
            b'/' => {
                self.pos += 1;
                Token::Name(self.read_name())
            }
            b'0'..=b'9' | b'+' | b'-' | b'.' => self.read_number(),
            b'>' | b')' | b'{' | b'}' => {
                self.pos += 1;
                Token::Keyword((b as char).to_string())
            }
            _ => Token::Keyword(String::from_utf8_lossy(&self.read_regular()).into_owned()),
        };
        Ok(Some(token))
    }

    /// Next token or an error at end of input
    pub fn expect_token(&mut self) -> PDFResult<Token> {
        self.next_token()?
            .ok_or_else(|| PDFError::malformed(format!("unexpected end of input at {}", self.pos)))
    }

    /// Consume a specific keyword
    pub fn expect_keyword(&mut self, keyword: &str) -> PDFResult<()> {
        match self.expect_token()? {
            token if token.is_keyword(keyword) => Ok(()),
            token => Err(PDFError::malformed(format!(
                "expected '{}' at {}, found {:?}",
                keyword, self.pos, token
            ))),
        }
    }

    fn read_regular(&mut self) -> Vec<u8> {
        let mut bytes = self.read_run();
        if bytes.is_empty() {
            if let Some(b) = self.advance() {
                bytes.push(b);
            }
        }
        bytes
    }

    fn read_number(&mut self) -> Token {
        let raw = self.read_regular();
        let text = String::from_utf8_lossy(&raw);

        if !text.contains('.') {
            if let Ok(value) = text.parse::<i64>() {
                return Token::Integer(value);
            }
        } else {
            let normalized = if text.starts_with("-.") {
                text.replacen("-.", "-0.", 1)
            } else if text.starts_with('.') {
                format!("0{}", text)
            } else {
                text.to_string()
            };
            if let Ok(value) = normalized.parse::<f64>() {
                return Token::Real(value);
            }
        }
        Token::Keyword(text.into_owned())
    }

    fn read_name(&mut self) -> String {
        let raw = self.read_run();
        let mut bytes = Vec::with_capacity(raw.len());
        let mut i = 0;
        while i < raw.len() {
            if raw[i] == b'#' && i + 2 < raw.len() {
                if let Ok(value) = u8::from_str_radix(&String::from_utf8_lossy(&raw[i + 1..i + 3]), 16) {
                    bytes.push(value);
                    i += 3;
                    continue;
                }
            }
            bytes.push(raw[i]);
            i += 1;
        }
        String::from_utf8_lossy(&bytes).into_owned()
    }

    fn read_run(&mut self) -> Vec<u8> {
        let mut bytes = Vec::new();
        while let Some(b) = self.peek() {
            if is_whitespace(b) || is_delimiter(b) {
                break;
            }
            bytes.push(b);
            self.pos += 1;
        }
        bytes
    }

    fn read_literal_string(&mut self) -> PDFResult<Vec<u8>> {
        let start = self.pos;
        let mut output = Vec::new();
        let mut depth = 1usize;

        loop {
            let Some(b) = self.advance() else {
                return Err(PDFError::malformed(format!("unterminated string at {}", start)));
            };
            match b {
                b'\\' => {
                    let Some(escaped) = self.advance() else { continue };
                    match escaped {
                        b'n' => output.push(b'\n'),
                        b'r' => output.push(b'\r'),
                        b't' => output.push(b'\t'),
                        b'b' => output.push(0x08),
                        b'f' => output.push(0x0C),
                        b'0'..=b'7' => {
                            let mut value = (escaped - b'0') as u32;
                            for _ in 0..2 {
                                match self.peek() {
                                    Some(d @ b'0'..=b'7') => {
                                        value = value * 8 + (d - b'0') as u32;
                                        self.pos += 1;
                                    }
                                    _ => break,
                                }
                            }
                            output.push(value as u8);
                        }
                        b'\r' => {
                            if self.peek() == Some(b'\n') {
                                self.pos += 1;
                            }
                        }
                        b'\n' => {}
                        other => output.push(other),
                    }
                }
                b'(' => {
                    depth += 1;
                    output.push(b);
                }
                b')' => {
                    depth -= 1;
                    if depth == 0 {
                        break;
                    }
                    output.push(b);
                }
                b'\r' => {
                    if self.peek() == Some(b'\n') {
                        self.pos += 1;
                    }
                    output.push(b'\n');
                }
                _ => output.push(b),
            }
        }
        Ok(output)
    }

    fn read_hex_string(&mut self) -> PDFResult<Vec<u8>> {
        let start = self.pos;
        let mut digits = Vec::new();
        loop {
            match self.advance() {
                Some(b'>') => break,
                Some(b) if b.is_ascii_hexdigit() => digits.push(b),
                Some(b) if is_whitespace(b) => {}
                Some(b) => {
                    return Err(PDFError::malformed(format!(
                        "invalid hex string byte 0x{:02X} at {}",
                        b, self.pos
                    )))
                }
                None => return Err(PDFError::malformed(format!("unterminated hex string at {}", start))),
            }
        }
        if digits.len() % 2 == 1 {
            digits.push(b'0');
        }
        hex::decode(&digits).map_err(|e| PDFError::malformed(e.to_string()))
    }

    /// Parse the next object
    pub fn parse_object(&mut self) -> PDFResult<Object> {
        let token = self.expect_token()?;
        self.object_from_token(token)
    }

    /// Build an object starting with an already read token
    pub fn object_from_token(&mut self, token: Token) -> PDFResult<Object> {
        match token {
            Token::Integer(n) => Ok(self.try_reference(n)),
            Token::Real(r) => Ok(Object::Real(r)),
            Token::Name(name) => Ok(Object::Name(name)),
            Token::String(bytes) => Ok(Object::String(bytes, StringFormat::Literal)),
            Token::HexString(bytes) => Ok(Object::String(bytes, StringFormat::Hexadecimal)),
            Token::ArrayStart => {
                self.enter()?;
                let mut items = Vec::new();
                loop {
                    match self.expect_token()? {
                        Token::ArrayEnd => break,
                        token => items.push(self.object_from_token(token)?),
                    }
                }
                self.depth -= 1;
                Ok(Object::Array(items))
            }
            Token::DictStart => {
                self.enter()?;
                let dict = self.parse_dictionary_body()?;
                self.depth -= 1;
                Ok(Object::Dictionary(dict))
            }
            Token::Keyword(keyword) => match keyword.as_str() {
                "true" => Ok(Object::Boolean(true)),
                "false" => Ok(Object::Boolean(false)),
                "null" => Ok(Object::Null),
                _ => Err(PDFError::malformed(format!(
                    "unexpected keyword '{}' at {}",
                    keyword, self.pos
                ))),
            },
            Token::ArrayEnd | Token::DictEnd => Err(PDFError::malformed(format!(
                "unexpected {:?} at {}",
                token, self.pos
            ))),
        }
    }

    fn enter(&mut self) -> PDFResult<()> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(PDFError::malformed(format!("nesting too deep at {}", self.pos)));
        }
        Ok(())
    }

    fn try_reference(&mut self, number: i64) -> Object {
        let mark = self.pos;
        if (0..=u32::MAX as i64).contains(&number) {
            if let Ok(Some(Token::Integer(generation))) = self.next_token() {
                if (0..=u16::MAX as i64).contains(&generation) {
                    if let Ok(Some(token)) = self.next_token() {
                        if token.is_keyword("R") {
                            return Object::Reference(ObjectId::new(number as u32, generation as u16));
                        }
                    }
                }
            }
        }
        self.pos = mark;
        Object::Integer(number)
    }

    fn parse_dictionary_body(&mut self) -> PDFResult<Dictionary> {
        let mut dict = Dictionary::new();
        loop {
            match self.expect_token()? {
                Token::DictEnd => break,
                Token::Name(key) => {
                    let value = match self.expect_token()? {
                        Token::DictEnd => {
                            warn!("dictionary key /{} has no value", key);
                            break;
                        }
                        token => self.object_from_token(token)?,
                    };
                    dict.set(key, value);
                }
                token => {
                    return Err(PDFError::malformed(format!(
                        "dictionary key is not a name: {:?} at {}",
                        token, self.pos
                    )))
                }
            }
        }
        Ok(dict)
    }

    /// Try to read `N G obj` at the current position.
    ///
    /// The position is restored when the header is not there.
    pub fn read_object_header(&mut self) -> Option<ObjectId> {
        let mark = self.pos;
        if let (Ok(Some(Token::Integer(number))), Ok(Some(Token::Integer(generation)))) =
            (self.next_token(), self.next_token())
        {
            if let Ok(Some(token)) = self.next_token() {
                if token.is_keyword("obj")
                    && (0..=u32::MAX as i64).contains(&number)
                    && (0..=u16::MAX as i64).contains(&generation)
                {
                    return Some(ObjectId::new(number as u32, generation as u16));
                }
            }
        }
        self.pos = mark;
        None
    }

    /// Parse `N G obj ... endobj`, including a stream payload.
    ///
    /// `resolve_length` is asked for the value of an indirect `/Length`.
    pub fn parse_indirect_object(
        &mut self,
        resolve_length: &dyn Fn(ObjectId) -> Option<i64>,
    ) -> PDFResult<IndirectObject> {
        let start = self.pos;
        let id = self
            .read_object_header()
            .ok_or_else(|| PDFError::malformed(format!("no object header at {}", start)))?;
        trace!("Parsing object {} at {}", id, start);

        let object = match self.expect_token()? {
            token if token.is_keyword("endobj") => return Ok(IndirectObject::new(id, Object::Null)),
            token => self.object_from_token(token)?,
        };

        let mark = self.pos;
        let object = match (object, self.next_token()?) {
            (Object::Dictionary(dict), Some(token)) if token.is_keyword("stream") => {
                let content = self.read_stream_payload(&dict, resolve_length)?;
                let mark = self.pos;
                if !matches!(self.next_token(), Ok(Some(ref t)) if t.is_keyword("endobj")) {
                    self.pos = mark;
                }
                Object::Stream(Stream::new(dict, content))
            }
            (object, Some(token)) if token.is_keyword("endobj") => object,
            (object, _) => {
                warn!("object {} is missing endobj", id);
                self.pos = mark;
                object
            }
        };
        Ok(IndirectObject::new(id, object))
    }

    fn read_stream_payload(
        &mut self,
        dict: &Dictionary,
        resolve_length: &dyn Fn(ObjectId) -> Option<i64>,
    ) -> PDFResult<Vec<u8>> {
        while self.peek() == Some(b' ') {
            self.pos += 1;
        }
        match self.peek() {
            Some(b'\r') => {
                self.pos += 1;
                if self.peek() == Some(b'\n') {
                    self.pos += 1;
                }
            }
            Some(b'\n') => self.pos += 1,
            _ => {}
        }
        let start = self.pos;

        let declared = match dict.get("Length") {
            Some(Object::Reference(id)) => resolve_length(*id),
            Some(other) => other.as_integer(),
            None => None,
        };

        if let Some(length) = declared.filter(|&len| len >= 0) {
            let end = start + length as u64;
            if end <= self.store.len() {
                let mut probe = Lexer::at(self.store, end);
                if matches!(probe.next_token(), Ok(Some(ref t)) if t.is_keyword("endstream")) {
                    let content = self.store.read_exact_at(start, length as usize)?;
                    self.pos = probe.pos;
                    return Ok(content);
                }
            }
            warn!("stream /Length {} at {} is wrong, searching for endstream", length, start);
        }

        let end = find_forward(self.store, start, b"endstream")
            .ok_or_else(|| PDFError::truncated(format!("stream at {} has no endstream", start)))?;
        let mut content = self.store.read_exact_at(start, (end - start) as usize)?;
        if content.ends_with(b"\r\n") {
            content.truncate(content.len() - 2);
        } else if content.ends_with(b"\n") || content.ends_with(b"\r") {
            content.truncate(content.len() - 1);
        }
        self.pos = end + b"endstream".len() as u64;
        Ok(content)
    }
}

/// Position of the first `needle` at or after `from`
pub fn find_forward(store: &RandomAccessStore, from: u64, needle: &[u8]) -> Option<u64> {
    let mut pos = from;
    while pos < store.len() {
        let window = store.slice_at(pos, SEARCH_BLOCK + needle.len() - 1);
        if let Some(i) = window.windows(needle.len()).position(|w| w == needle) {
            return Some(pos + i as u64);
        }
        if window.len() < SEARCH_BLOCK {
            break;
        }
        pos += SEARCH_BLOCK as u64;
    }
    None
}

/// Position of the last `needle` that ends at or before `before`
pub fn find_backward(store: &RandomAccessStore, before: u64, needle: &[u8]) -> Option<u64> {
    let overlap = needle.len() as u64 - 1;
    let mut end = before.min(store.len());
    while end >= needle.len() as u64 {
        let start = end.saturating_sub(SEARCH_BLOCK as u64);
        let window = store.slice_at(start, (end - start) as usize);
        if let Some(i) = window.windows(needle.len()).rposition(|w| w == needle) {
            return Some(start + i as u64);
        }
        if start == 0 {
            break;
        }
        end = start + overlap;
    }
    None
}
