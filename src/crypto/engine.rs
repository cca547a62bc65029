//! Core cryptographic engine implementation

use log::trace;
use zeroize::Zeroizing;

use super::aes::AESProvider;
use super::rc4::RC4Provider;
use super::{CryptMethod, CryptoProvider};
use crate::error::PDFResult;
use crate::pdf::{Object, ObjectId, Stream};
use crate::security::EncryptionState;

static RC4: RC4Provider = RC4Provider;
static AES_128: AESProvider = AESProvider::new(16);
static AES_256: AESProvider = AESProvider::new(32);

fn provider(method: CryptMethod) -> Option<&'static dyn CryptoProvider> {
    match method {
        CryptMethod::Identity => None,
        CryptMethod::RC4 => Some(&RC4),
        CryptMethod::AESV2 => Some(&AES_128),
        CryptMethod::AESV3 => Some(&AES_256),
    }
}

/// Encrypts and decrypts the strings and streams of indirect objects.
///
/// Built once from an authenticated [`EncryptionState`]; holds its own copy
/// of the file key.
#[derive(Clone)]
pub struct PDFCryptoEngine {
    file_key: Zeroizing<Vec<u8>>,
    stream_method: CryptMethod,
    string_method: CryptMethod,
    encrypt_metadata: bool,
    encrypt_dictionary: Option<ObjectId>,
}

impl std::fmt::Debug for PDFCryptoEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PDFCryptoEngine")
            .field("stream_method", &self.stream_method)
            .field("string_method", &self.string_method)
            .field("encrypt_metadata", &self.encrypt_metadata)
            .finish_non_exhaustive()
    }
}

impl PDFCryptoEngine {
    /// Create engine for an authenticated session
    pub fn new(state: &EncryptionState) -> Self {
        Self {
            file_key: Zeroizing::new(state.file_key().to_vec()),
            stream_method: state.stream_method(),
            string_method: state.string_method(),
            encrypt_metadata: state.encrypt_metadata(),
            encrypt_dictionary: None,
        }
    }

    /// Leave the object holding the encryption dictionary untouched
    pub fn with_encrypt_dictionary(mut self, id: ObjectId) -> Self {
        self.encrypt_dictionary = Some(id);
        self
    }

    /// Whether objects with this id are never encrypted
    pub fn is_exempt(&self, id: ObjectId) -> bool {
        self.encrypt_dictionary == Some(id)
    }

    /// Generate unique encryption key for each object.
    ///
    /// AESV3 uses the file key as is; the other methods hash the file key
    /// with the low 3 bytes of the object number and the low 2 bytes of the
    /// generation (plus `sAlT` for AES) and keep `n + 5` bytes, at most 16.
    pub fn object_key(&self, id: ObjectId, method: CryptMethod) -> Zeroizing<Vec<u8>> {
        if method == CryptMethod::AESV3 {
            return self.file_key.clone();
        }

        let mut hasher = md5::Context::new();
        hasher.consume(self.file_key.as_slice());
        hasher.consume(&id.number.to_le_bytes()[..3]);
        hasher.consume(id.generation.to_le_bytes());
        if method == CryptMethod::AESV2 {
            hasher.consume(b"sAlT");
        }
        let digest = hasher.compute().0;
        let length = (self.file_key.len() + 5).min(16);
        Zeroizing::new(digest[..length].to_vec())
    }

    fn apply(&self, method: CryptMethod, id: ObjectId, data: &[u8], encrypt: bool) -> PDFResult<Vec<u8>> {
        let Some(provider) = provider(method) else {
            return Ok(data.to_vec());
        };
        let key = self.object_key(id, method);
        if encrypt {
            provider.encrypt(&key, data)
        } else {
            provider.decrypt(&key, data)
        }
    }

    /// Encrypt a string belonging to object `id`
    pub fn encrypt_bytes(&self, id: ObjectId, data: &[u8]) -> PDFResult<Vec<u8>> {
        self.apply(self.string_method, id, data, true)
    }

    /// Decrypt a string belonging to object `id`
    pub fn decrypt_bytes(&self, id: ObjectId, data: &[u8]) -> PDFResult<Vec<u8>> {
        self.apply(self.string_method, id, data, false)
    }

    /// Encrypt a stream payload belonging to object `id`
    pub fn encrypt_stream_data(&self, id: ObjectId, data: &[u8]) -> PDFResult<Vec<u8>> {
        self.apply(self.stream_method, id, data, true)
    }

    /// Decrypt a stream payload belonging to object `id`
    pub fn decrypt_stream_data(&self, id: ObjectId, data: &[u8]) -> PDFResult<Vec<u8>> {
        self.apply(self.stream_method, id, data, false)
    }

    /// Streams whose payload stays in the clear
    fn is_clear_stream(&self, stream: &Stream) -> bool {
        stream.has_type("XRef") || (!self.encrypt_metadata && stream.has_type("Metadata"))
    }

    /// Encrypt every string and stream payload inside `object` in place
    pub fn encrypt_object(&self, id: ObjectId, object: &mut Object) -> PDFResult<()> {
        if self.is_exempt(id) {
            return Ok(());
        }
        trace!("Encrypting object {}", id);
        self.walk(id, object, true)
    }

    /// Decrypt every string and stream payload inside `object` in place
    pub fn decrypt_object(&self, id: ObjectId, object: &mut Object) -> PDFResult<()> {
        if self.is_exempt(id) {
            return Ok(());
        }
        trace!("Decrypting object {}", id);
        self.walk(id, object, false)
    }

    fn walk(&self, id: ObjectId, object: &mut Object, encrypt: bool) -> PDFResult<()> {
        match object {
            Object::String(bytes, _) => {
                *bytes = self.apply(self.string_method, id, bytes, encrypt)?;
            }
            Object::Array(items) => {
                for item in items.iter_mut() {
                    self.walk(id, item, encrypt)?;
                }
            }
            Object::Dictionary(dict) => {
                for (_, value) in dict.iter_mut() {
                    self.walk(id, value, encrypt)?;
                }
            }
            Object::Stream(stream) => {
                for (_, value) in stream.dict_mut().iter_mut() {
                    self.walk(id, value, encrypt)?;
                }
                if !self.is_clear_stream(stream) {
                    let content = self.apply(self.stream_method, id, stream.content(), encrypt)?;
                    stream.set_content(content);
                }
            }
            _ => {}
        }
        Ok(())
    }
}
