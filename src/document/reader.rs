//! Reading sessions: xref chain, recovery, authentication and lazy objects

use std::collections::HashMap;
use std::path::Path;
use std::sync::RwLock;

use log::{debug, info, trace, warn};
use zeroize::Zeroizing;

use super::{content, pages};
use crate::crypto::PDFCryptoEngine;
use crate::error::{PDFError, PDFResult};
use crate::handlers::{SecurityHandler, SecurityHandlerRegistry};
use crate::pdf::parser::ObjectStream;
use crate::pdf::{Dictionary, EntryKind, Object, ObjectId, PDFParser, Trailer, XRefTable};
use crate::security::EncryptionState;
use crate::storage::{RandomAccessStore, MAX_CHUNK_SIZE};
use crate::PDFPermissions;

/// Longest chain of references [`PdfReader::resolve`] follows
const MAX_REFERENCE_CHAIN: usize = 32;

/// Decrypted objects kept by a reader unless configured otherwise
const DEFAULT_CACHE_CAPACITY: usize = 1024;

/// Options for opening a document
#[derive(Debug, Clone)]
pub struct ReaderOptions {
    /// Filter names the reader knows how to authenticate against
    pub registry: SecurityHandlerRegistry,
    /// Size of the pieces a file is mapped or read in
    pub chunk_size: usize,
    /// Most decrypted objects kept in memory; 0 disables the cache
    pub cache_capacity: usize,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self {
            registry: SecurityHandlerRegistry::default(),
            chunk_size: MAX_CHUNK_SIZE,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
        }
    }
}

/// Lifecycle of a reader
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderState {
    /// Bytes are available, nothing parsed
    Opened,
    /// Xref chain and trailer parsed and checked
    Validated,
    /// Xref chain unusable, rebuilding from a scan
    Recovering,
    /// Objects can be read
    Ready,
    /// Encrypted and opened without a password; only raw structure is readable
    Locked,
}

struct Unlocked {
    handler: SecurityHandler,
    state: EncryptionState,
    engine: PDFCryptoEngine,
    password: Zeroizing<Vec<u8>>,
}

enum Encryption {
    None,
    Locked(SecurityHandler),
    Unlocked(Box<Unlocked>),
}

/// Read-only view of a PDF file.
///
/// Objects are parsed and decrypted on first request and then served from a
/// bounded cache behind a lock, so a ready reader can be shared between
/// threads.
pub struct PdfReader {
    store: RandomAccessStore,
    version: String,
    xref: XRefTable,
    trailer: Trailer,
    startxref: Option<u64>,
    state: ReaderState,
    encryption: Encryption,
    cache: RwLock<HashMap<ObjectId, Object>>,
    cache_capacity: usize,
}

impl std::fmt::Debug for PdfReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PdfReader")
            .field("version", &self.version)
            .field("length", &self.store.len())
            .field("objects", &self.xref.len())
            .field("state", &self.state)
            .field("rebuilt", &self.is_rebuilt())
            .field("encrypted", &self.is_encrypted())
            .finish()
    }
}

impl PdfReader {
    /// Open a file, authenticating with `password` when it is encrypted
    pub fn open<P: AsRef<Path>>(path: P, password: &[u8]) -> PDFResult<Self> {
        Self::open_with_options(path, password, &ReaderOptions::default())
    }

    pub fn open_with_options<P: AsRef<Path>>(path: P, password: &[u8], options: &ReaderOptions) -> PDFResult<Self> {
        let store = RandomAccessStore::open_with_chunk_size(path, options.chunk_size)?;
        Self::load(store, Some(password), options)
    }

    /// Read a document held in memory
    pub fn from_bytes(data: Vec<u8>, password: &[u8]) -> PDFResult<Self> {
        Self::load(RandomAccessStore::from_bytes(data), Some(password), &ReaderOptions::default())
    }

    /// Read a document from an existing store
    pub fn from_store(store: RandomAccessStore, password: &[u8], options: &ReaderOptions) -> PDFResult<Self> {
        Self::load(store, Some(password), options)
    }

    /// Open a file without a password.
    ///
    /// Encrypted documents end up [`ReaderState::Locked`]: the xref table,
    /// the trailer and raw objects are available, decrypted content is not.
    pub fn inspect<P: AsRef<Path>>(path: P) -> PDFResult<Self> {
        let options = ReaderOptions::default();
        let store = RandomAccessStore::open_with_chunk_size(path, options.chunk_size)?;
        Self::load(store, None, &options)
    }

    /// [`PdfReader::inspect`] for a document held in memory
    pub fn inspect_bytes(data: Vec<u8>) -> PDFResult<Self> {
        Self::load(RandomAccessStore::from_bytes(data), None, &ReaderOptions::default())
    }

    fn load(store: RandomAccessStore, password: Option<&[u8]>, options: &ReaderOptions) -> PDFResult<Self> {
        if store.is_empty() {
            return Err(PDFError::malformed("empty file"));
        }

        let mut reader = Self {
            store,
            version: String::new(),
            xref: XRefTable::new(),
            trailer: Trailer::new(ObjectId::new(0, 0), 0),
            startxref: None,
            state: ReaderState::Opened,
            encryption: Encryption::None,
            cache: RwLock::new(HashMap::new()),
            cache_capacity: options.cache_capacity,
        };
        debug!("Reading {} byte document", reader.store.len());

        let parser = PDFParser::new(&reader.store);
        reader.version = parser.header_version().unwrap_or_else(|err| {
            warn!("{}, assuming version 1.4", err);
            "1.4".to_string()
        });

        match reader.read_chain() {
            Ok(()) => reader.state = ReaderState::Validated,
            Err(err) if err.is_structure_error() => {
                warn!("Cross-reference data is unusable ({}), rebuilding", err);
                reader.state = ReaderState::Recovering;
                reader.rebuild()?;
            }
            Err(err) => return Err(err),
        }

        reader.setup_encryption(password, options)?;
        debug!(
            "Document ready: version {}, {} xref entries, state {:?}",
            reader.version,
            reader.xref.len(),
            reader.state
        );
        Ok(reader)
    }

    fn read_chain(&mut self) -> PDFResult<()> {
        let parser = PDFParser::new(&self.store);
        let chain = parser.read_xref_chain()?;
        parser.verify_offsets(&chain.table)?;
        debug!(
            "Read {} xref sections ending at {}",
            chain.sections, chain.startxref
        );
        self.xref = chain.table;
        self.trailer = chain.trailer;
        self.startxref = Some(chain.startxref);

        let root = self.trailer.root;
        match self.get_raw_object(root) {
            Ok(Object::Dictionary(_)) => Ok(()),
            Ok(other) => Err(PDFError::xref(format!("trailer /Root {} is a {}", root, other.type_name()))),
            Err(err) => Err(PDFError::xref(format!("trailer /Root {} does not resolve: {}", root, err))),
        }
    }

    fn rebuild(&mut self) -> PDFResult<()> {
        let (xref, trailer) = PDFParser::new(&self.store).rebuild_xref()?;
        info!("Rebuilt xref table with {} entries", xref.len());
        self.xref = xref;
        self.trailer = trailer;
        self.startxref = None;
        Ok(())
    }

    fn setup_encryption(&mut self, password: Option<&[u8]>, options: &ReaderOptions) -> PDFResult<()> {
        let encrypt = match (self.trailer.encrypt, self.trailer.dictionary().get_dict("Encrypt")) {
            (Some(id), _) => self.get_raw_object(id)?,
            (None, Some(dict)) => Object::Dictionary(dict.clone()),
            (None, None) => {
                self.state = ReaderState::Ready;
                return Ok(());
            }
        };
        let handler = options.registry.create(encrypt.expect_dict()?)?;

        let Some(password) = password else {
            debug!("Encrypted document opened without a password");
            self.encryption = Encryption::Locked(handler);
            self.state = ReaderState::Locked;
            return Ok(());
        };

        let state = handler.authenticate(password, self.trailer.file_id())?;
        let mut engine = PDFCryptoEngine::new(&state);
        if let Some(id) = self.trailer.encrypt {
            engine = engine.with_encrypt_dictionary(id);
        }
        self.encryption = Encryption::Unlocked(Box::new(Unlocked {
            handler,
            state,
            engine,
            password: Zeroizing::new(password.to_vec()),
        }));
        self.state = ReaderState::Ready;
        Ok(())
    }

    /// Value of an indirect `/Length`, parsed without following further lengths
    fn resolve_length(&self, id: ObjectId) -> Option<i64> {
        let entry = self.xref.get(id.number)?;
        PDFParser::new(&self.store)
            .read_object(entry, &|_| None)
            .ok()?
            .as_integer()
    }

    /// Object exactly as stored: strings and streams still encrypted.
    ///
    /// Objects inside object streams come out in the clear since their
    /// container is decrypted as a whole.
    pub fn get_raw_object(&self, id: ObjectId) -> PDFResult<Object> {
        let entry = self
            .xref
            .get(id.number)
            .filter(|entry| !entry.is_free())
            .ok_or(PDFError::ObjectNotFound(id))?;

        match entry.kind {
            EntryKind::InUse => {
                if entry.generation != id.generation {
                    return Err(PDFError::ObjectNotFound(id));
                }
                PDFParser::new(&self.store).read_object(entry, &|length| self.resolve_length(length))
            }
            EntryKind::Compressed { stream, index } => {
                if id.generation != 0 {
                    return Err(PDFError::ObjectNotFound(id));
                }
                self.object_stream(stream)?.get(id.number, index)
            }
            EntryKind::Free => Err(PDFError::ObjectNotFound(id)),
        }
    }

    fn object_stream(&self, number: u32) -> PDFResult<ObjectStream> {
        let entry = self
            .xref
            .get(number)
            .filter(|entry| entry.kind == EntryKind::InUse)
            .ok_or_else(|| PDFError::malformed(format!("object stream {} is not a plain object", number)))?;
        let id = entry.id();
        let raw = PDFParser::new(&self.store).read_object(entry, &|length| self.resolve_length(length))?;
        let Object::Stream(mut stream) = raw else {
            return Err(PDFError::InvalidObjectType {
                expected: "Stream",
                found: raw.type_name(),
            });
        };

        match &self.encryption {
            Encryption::None => {}
            Encryption::Locked(_) => return Err(locked()),
            Encryption::Unlocked(unlocked) => {
                let clear = unlocked.engine.decrypt_stream_data(id, stream.content())?;
                stream.set_content(clear);
            }
        }
        ObjectStream::parse(&stream)
    }

    /// Object with strings and streams decrypted; a missing or freed
    /// object reads as null
    pub fn get_object(&self, id: ObjectId) -> PDFResult<Object> {
        match self.load_object(id) {
            Err(PDFError::ObjectNotFound(_)) => {
                trace!("Object {} does not exist, reading it as null", id);
                Ok(Object::Null)
            }
            other => other,
        }
    }

    /// Like [`PdfReader::get_object`] but a missing object is an error
    pub fn load_object(&self, id: ObjectId) -> PDFResult<Object> {
        if let Some(object) = self.cached(id) {
            return Ok(object);
        }

        let mut object = self.get_raw_object(id)?;
        let stored_plain = self
            .xref
            .get(id.number)
            .is_some_and(|entry| entry.kind == EntryKind::InUse);

        match &self.encryption {
            Encryption::None => {}
            Encryption::Locked(_) => return Err(locked()),
            Encryption::Unlocked(unlocked) if stored_plain => unlocked.engine.decrypt_object(id, &mut object)?,
            Encryption::Unlocked(_) => {}
        }
        self.remember(id, &object);
        Ok(object)
    }

    fn cached(&self, id: ObjectId) -> Option<Object> {
        self.cache.read().ok()?.get(&id).cloned()
    }

    fn remember(&self, id: ObjectId, object: &Object) {
        if let Ok(mut cache) = self.cache.write() {
            if cache.len() < self.cache_capacity {
                cache.insert(id, object.clone());
            }
        }
    }

    /// Number of decrypted objects currently cached
    pub fn cached_objects(&self) -> usize {
        self.cache.read().map_or(0, |cache| cache.len())
    }

    /// Follow references until a direct object is reached
    pub fn resolve(&self, object: &Object) -> PDFResult<Object> {
        let mut current = object.clone();
        for _ in 0..MAX_REFERENCE_CHAIN {
            match current {
                Object::Reference(id) => current = self.get_object(id)?,
                direct => return Ok(direct),
            }
        }
        Err(PDFError::malformed("reference chain too long"))
    }

    /// Document catalog
    pub fn catalog(&self) -> PDFResult<Dictionary> {
        match self.get_object(self.trailer.root)? {
            Object::Dictionary(dict) => Ok(dict),
            other => Err(PDFError::InvalidObjectType {
                expected: "Dictionary",
                found: other.type_name(),
            }),
        }
    }

    /// Document information dictionary, if any
    pub fn info(&self) -> PDFResult<Option<Dictionary>> {
        match self.trailer.info {
            Some(id) => Ok(self.get_object(id)?.as_dict().cloned()),
            None => Ok(None),
        }
    }

    /// Ids of all pages in order
    pub fn pages(&self) -> PDFResult<Vec<ObjectId>> {
        pages::collect_pages(self)
    }

    pub fn number_of_pages(&self) -> PDFResult<usize> {
        Ok(self.pages()?.len())
    }

    /// Page dictionary, counting from 1
    pub fn page(&self, number: usize) -> PDFResult<Dictionary> {
        let id = pages::page_id(self, number)?;
        Ok(self.get_object(id)?.expect_dict()?.clone())
    }

    /// Decoded content stream bytes of a page
    pub fn page_content(&self, number: usize) -> PDFResult<Vec<u8>> {
        pages::page_content(self, number)
    }

    /// Text shown on a page
    pub fn page_text(&self, number: usize) -> PDFResult<String> {
        content::extract_text(&self.page_content(number)?)
    }

    pub fn trailer(&self) -> &Trailer {
        &self.trailer
    }

    /// Merged cross-reference table, newest entries first
    pub fn xref(&self) -> &XRefTable {
        &self.xref
    }

    /// Header version, e.g. `1.7`
    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn state(&self) -> ReaderState {
        self.state
    }

    /// Whether the xref table came from a scan rather than the file's own
    pub fn is_rebuilt(&self) -> bool {
        self.startxref.is_none()
    }

    /// Offset of the newest xref section
    pub fn startxref(&self) -> Option<u64> {
        self.startxref
    }

    /// Length of the file in bytes
    pub fn file_length(&self) -> u64 {
        self.store.len()
    }

    pub fn is_encrypted(&self) -> bool {
        !matches!(self.encryption, Encryption::None)
    }

    /// True for unencrypted documents and owner-password sessions
    pub fn is_opened_with_full_permissions(&self) -> bool {
        match &self.encryption {
            Encryption::None => true,
            Encryption::Locked(_) => false,
            Encryption::Unlocked(unlocked) => unlocked.state.is_owner(),
        }
    }

    /// Permissions from `/P`; everything for unencrypted documents
    pub fn permissions(&self) -> PDFPermissions {
        match &self.encryption {
            Encryption::None => PDFPermissions::new(PDFPermissions::ALL),
            Encryption::Locked(handler) => handler
                .as_standard()
                .map_or(PDFPermissions::new(PDFPermissions::NONE), |standard| standard.permissions()),
            Encryption::Unlocked(unlocked) => unlocked.state.permissions(),
        }
    }

    pub fn security_handler(&self) -> Option<&SecurityHandler> {
        match &self.encryption {
            Encryption::None => None,
            Encryption::Locked(handler) => Some(handler),
            Encryption::Unlocked(unlocked) => Some(&unlocked.handler),
        }
    }

    pub fn encryption_state(&self) -> Option<&EncryptionState> {
        match &self.encryption {
            Encryption::Unlocked(unlocked) => Some(&unlocked.state),
            _ => None,
        }
    }

    /// Recover the user password of an R2 to R4 document opened with the
    /// owner password
    pub fn compute_user_password(&self) -> PDFResult<Vec<u8>> {
        let Encryption::Unlocked(unlocked) = &self.encryption else {
            return Err(PDFError::invalid_state("document is not encrypted or not unlocked"));
        };
        if !unlocked.state.is_owner() {
            return Err(PDFError::invalid_state("the owner password was not used"));
        }
        let handler = unlocked
            .handler
            .as_standard()
            .ok_or_else(|| PDFError::invalid_state("not a standard security handler"))?;
        handler.compute_user_password(&unlocked.password, self.trailer.file_id())
    }

    pub(crate) fn store(&self) -> &RandomAccessStore {
        &self.store
    }

    pub(crate) fn engine(&self) -> Option<&PDFCryptoEngine> {
        match &self.encryption {
            Encryption::Unlocked(unlocked) => Some(&unlocked.engine),
            _ => None,
        }
    }
}

fn locked() -> PDFError {
    PDFError::invalid_state("document is encrypted and was opened without a password")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use test_log::test;

    const MINIMAL: &[u8] = b"%PDF-1.4\n\
1 0 obj\n<</Type /Catalog /Pages 2 0 R>>\nendobj\n\
2 0 obj\n<</Type /Pages /Kids [3 0 R] /Count 1>>\nendobj\n\
3 0 obj\n<</Type /Page /Parent 2 0 R /Contents 4 0 R>>\nendobj\n\
4 0 obj\n<</Length 30>>\nstream\nBT (Hello from page one) Tj ET\nendstream\nendobj\n\
trailer\n<</Size 5 /Root 1 0 R>>\n%%EOF\n";

    #[test]
    fn test_reader_without_xref_recovers() -> PDFResult<()> {
        let reader = PdfReader::from_bytes(MINIMAL.to_vec(), b"")?;
        assert!(reader.is_rebuilt());
        assert_eq!(reader.state(), ReaderState::Ready);
        assert_eq!(reader.version(), "1.4");
        assert_eq!(reader.number_of_pages()?, 1);
        assert_eq!(reader.page_text(1)?, "Hello from page one");
        assert!(reader.page(2).is_err());
        assert!(!reader.is_encrypted());
        assert!(reader.is_opened_with_full_permissions());
        Ok(())
    }

    #[test]
    fn test_dangling_reference_is_null() -> PDFResult<()> {
        let reader = PdfReader::from_bytes(MINIMAL.to_vec(), b"")?;
        assert_eq!(reader.get_object(ObjectId::new(40, 0))?, Object::Null);
        assert_eq!(reader.get_object(ObjectId::new(1, 3))?, Object::Null);
        assert!(matches!(
            reader.load_object(ObjectId::new(40, 0)),
            Err(PDFError::ObjectNotFound(_))
        ));
        Ok(())
    }

    #[test]
    fn test_objects_are_cached() -> PDFResult<()> {
        let reader = PdfReader::from_bytes(MINIMAL.to_vec(), b"")?;
        assert_eq!(reader.cached_objects(), 0);
        assert_eq!(reader.page_text(1)?, "Hello from page one");
        let cached = reader.cached_objects();
        assert!(cached > 0);
        assert_eq!(reader.page_text(1)?, "Hello from page one");
        assert_eq!(reader.cached_objects(), cached);
        assert_eq!(reader.get_object(ObjectId::new(40, 0))?, Object::Null);
        assert_eq!(reader.cached_objects(), cached);

        let options = ReaderOptions {
            cache_capacity: 0,
            ..ReaderOptions::default()
        };
        let uncached = PdfReader::from_store(RandomAccessStore::from_bytes(MINIMAL.to_vec()), b"", &options)?;
        assert_eq!(uncached.page_text(1)?, "Hello from page one");
        assert_eq!(uncached.cached_objects(), 0);
        Ok(())
    }

    #[test]
    fn test_empty_file() {
        assert!(matches!(PdfReader::from_bytes(Vec::new(), b""), Err(PDFError::MalformedPDF(_))));
    }

    #[test]
    fn test_reader_is_sync() {
        fn assert_sync<T: Send + Sync>() {}
        assert_sync::<PdfReader>();
    }
}
