//! Standard Security Handler implementation according to PDF specification

use log::{debug, warn};
use zeroize::ZeroizeOnDrop;

use crate::crypto::CryptMethod;
use crate::error::{PDFError, PDFResult};
use crate::pdf::{Dictionary, Object};
use crate::security::{
    compute_aes256_values, compute_file_key, compute_owner_hash, compute_perms, compute_user_hash,
    random_file_key, random_password, EncryptionState, Revision,
};
use crate::{EncryptionAlgorithm, EncryptionMode, PDFPermissions};

/// Name of the crypt filter written for V4 and V5 handlers
const STD_CF: &str = "StdCF";

/// Standard security handler for password-based encryption.
///
/// Holds the values of an `/Encrypt` dictionary; keys are derived from it
/// on authentication.
#[derive(Clone, ZeroizeOnDrop)]
pub struct StandardSecurityHandler {
    #[zeroize(skip)]
    pub(crate) revision: Revision,
    #[zeroize(skip)]
    pub(crate) algorithm: EncryptionAlgorithm,
    /// File key length in bytes
    pub(crate) key_length: usize,
    pub(crate) p_value: i32,
    pub(crate) owner_hash: Vec<u8>,
    pub(crate) user_hash: Vec<u8>,
    pub(crate) owner_key: Option<Vec<u8>>,
    pub(crate) user_key: Option<Vec<u8>>,
    pub(crate) perms: Option<Vec<u8>>,
    pub(crate) encrypt_metadata: bool,
    #[zeroize(skip)]
    pub(crate) stream_method: CryptMethod,
    #[zeroize(skip)]
    pub(crate) string_method: CryptMethod,
}

impl std::fmt::Debug for StandardSecurityHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StandardSecurityHandler")
            .field("revision", &self.revision)
            .field("algorithm", &self.algorithm)
            .field("key_length", &self.key_length)
            .field("p_value", &self.p_value)
            .field("encrypt_metadata", &self.encrypt_metadata)
            .field("stream_method", &self.stream_method)
            .field("string_method", &self.string_method)
            .finish_non_exhaustive()
    }
}

/// Key length in bytes and cipher for a requested mode
fn resolve_mode(mode: &EncryptionMode) -> PDFResult<(usize, CryptMethod)> {
    use EncryptionAlgorithm::*;

    if !mode.encrypt_metadata && mode.revision < Revision::R4 {
        return Err(PDFError::setup(format!(
            "clear metadata needs revision 4 or later, got {}",
            mode.revision
        )));
    }

    match (mode.algorithm, mode.revision) {
        (RC4_40, Revision::R2 | Revision::R3) => Ok((5, CryptMethod::RC4)),
        (RC4_128, Revision::R3) => {
            let bits = mode.key_length;
            if !(40..=128).contains(&bits) || bits % 8 != 0 {
                return Err(PDFError::setup(format!("RC4 key length {} bits", bits)));
            }
            Ok((bits / 8, CryptMethod::RC4))
        }
        (RC4_128, Revision::R4) => Ok((16, CryptMethod::RC4)),
        (AES_128, Revision::R4) => Ok((16, CryptMethod::AESV2)),
        (AES_256, Revision::R5 | Revision::R6) => Ok((32, CryptMethod::AESV3)),
        (algorithm, revision) => Err(PDFError::setup(format!(
            "{} is not available with revision {}",
            algorithm, revision
        ))),
    }
}

impl StandardSecurityHandler {
    /// Build the handler for a new document and the state used to encrypt it.
    ///
    /// An empty owner password is replaced by random bytes, so only the user
    /// password opens the result.
    pub fn create(
        user_password: &[u8],
        owner_password: &[u8],
        permissions: PDFPermissions,
        mode: EncryptionMode,
        file_id: &[u8],
    ) -> PDFResult<(Self, EncryptionState)> {
        let (key_length, method) = resolve_mode(&mode)?;
        let revision = mode.revision;
        let p_value = permissions.to_p_value(revision);

        let random_owner;
        let owner_password = if owner_password.is_empty() {
            debug!("No owner password given, using a random one");
            random_owner = random_password();
            random_owner.as_slice()
        } else {
            owner_password
        };

        let mut handler = Self {
            revision,
            algorithm: mode.algorithm,
            key_length,
            p_value,
            owner_hash: Vec::new(),
            user_hash: Vec::new(),
            owner_key: None,
            user_key: None,
            perms: None,
            encrypt_metadata: mode.encrypt_metadata,
            stream_method: method,
            string_method: method,
        };

        let file_key = if revision.is_aes256() {
            let file_key = random_file_key();
            let values = compute_aes256_values(revision, user_password, owner_password, &file_key)?;
            handler.owner_hash = values.owner_hash;
            handler.user_hash = values.user_hash;
            handler.owner_key = Some(values.owner_key);
            handler.user_key = Some(values.user_key);
            handler.perms = Some(compute_perms(p_value, mode.encrypt_metadata, &file_key)?);
            file_key
        } else {
            handler.owner_hash = compute_owner_hash(owner_password, user_password, revision, key_length)?;
            let file_key = compute_file_key(
                user_password,
                &handler.owner_hash,
                p_value,
                file_id,
                revision,
                key_length,
                mode.encrypt_metadata,
            );
            handler.user_hash = compute_user_hash(&file_key, revision, file_id)?;
            file_key
        };

        debug!("Created {} security handler for {}", revision, mode.algorithm);
        let state = EncryptionState::new(&handler, file_key, true, file_id);
        Ok((handler, state))
    }

    /// Read the handler values from an `/Encrypt` dictionary
    pub fn from_dict(dict: &Dictionary) -> PDFResult<Self> {
        let revision = Revision::from_number(
            dict.get_integer("R")
                .ok_or_else(|| PDFError::MissingDictionaryEntry("R".into()))?,
        )?;
        let version = dict.get_integer("V").unwrap_or(0);
        let p_value = dict
            .get_integer("P")
            .ok_or_else(|| PDFError::MissingDictionaryEntry("P".into()))? as i32;
        let encrypt_metadata = dict.get_bool("EncryptMetadata").unwrap_or(true);

        let hash_len = if revision.is_aes256() { 48 } else { 32 };
        let hash = |key: &str| -> PDFResult<Vec<u8>> {
            let value = dict
                .get_string(key)
                .ok_or_else(|| PDFError::MissingDictionaryEntry(key.into()))?;
            if value.len() < hash_len {
                return Err(PDFError::malformed(format!(
                    "/{} is {} bytes, expected {}",
                    key,
                    value.len(),
                    hash_len
                )));
            }
            Ok(value[..hash_len].to_vec())
        };
        let owner_hash = hash("O")?;
        let user_hash = hash("U")?;

        let (stream_method, string_method) = if version >= 4 {
            (crypt_filter(dict, "StmF")?, crypt_filter(dict, "StrF")?)
        } else {
            (CryptMethod::RC4, CryptMethod::RC4)
        };

        let length_bits = dict.get_integer("Length").unwrap_or(40);
        let (algorithm, key_length) = match revision {
            Revision::R2 => (EncryptionAlgorithm::RC4_40, 5),
            Revision::R3 => {
                let bytes = (length_bits / 8).clamp(5, 16) as usize;
                let algorithm = if bytes == 5 {
                    EncryptionAlgorithm::RC4_40
                } else {
                    EncryptionAlgorithm::RC4_128
                };
                (algorithm, bytes)
            }
            Revision::R4 => {
                let algorithm = if stream_method == CryptMethod::AESV2 || string_method == CryptMethod::AESV2 {
                    EncryptionAlgorithm::AES_128
                } else {
                    EncryptionAlgorithm::RC4_128
                };
                (algorithm, 16)
            }
            Revision::R5 | Revision::R6 => (EncryptionAlgorithm::AES_256, 32),
        };

        let (owner_key, user_key, perms) = if revision.is_aes256() {
            let entry = |key: &str| {
                dict.get_string(key)
                    .map(|value| value.to_vec())
                    .ok_or_else(|| PDFError::MissingDictionaryEntry(key.into()))
            };
            (Some(entry("OE")?), Some(entry("UE")?), dict.get_string("Perms").map(|v| v.to_vec()))
        } else {
            (None, None, None)
        };

        if version != revision.version() && !(revision == Revision::R4 && version == 4) {
            warn!("/V {} does not match {}", version, revision);
        }

        Ok(Self {
            revision,
            algorithm,
            key_length,
            p_value,
            owner_hash,
            user_hash,
            owner_key,
            user_key,
            perms,
            encrypt_metadata,
            stream_method,
            string_method,
        })
    }

    /// Create dictionary representation
    pub fn to_dict(&self) -> Dictionary {
        let mut dict = Dictionary::new();
        dict.set("Filter", Object::name("Standard"));
        dict.set("V", self.revision.version());
        dict.set("R", self.revision.number());
        dict.set("O", Object::hex_string(self.owner_hash.clone()));
        dict.set("U", Object::hex_string(self.user_hash.clone()));
        dict.set("P", self.p_value as i64);

        match self.revision {
            Revision::R2 => {}
            Revision::R3 => dict.set("Length", (self.key_length * 8) as i64),
            Revision::R4 | Revision::R5 | Revision::R6 => {
                dict.set("Length", (self.key_length * 8) as i64);

                let mut filter = Dictionary::with_type("CryptFilter");
                filter.set("CFM", Object::name(self.stream_method.name()));
                filter.set("Length", self.key_length);
                filter.set("AuthEvent", Object::name("DocOpen"));
                let mut filters = Dictionary::new();
                filters.set(STD_CF, filter);
                dict.set("CF", filters);
                dict.set("StmF", Object::name(STD_CF));
                dict.set("StrF", Object::name(STD_CF));
                if !self.encrypt_metadata {
                    dict.set("EncryptMetadata", false);
                }
            }
        }

        if let (Some(owner_key), Some(user_key)) = (&self.owner_key, &self.user_key) {
            dict.set("OE", Object::hex_string(owner_key.clone()));
            dict.set("UE", Object::hex_string(user_key.clone()));
        }
        if let Some(perms) = &self.perms {
            dict.set("Perms", Object::hex_string(perms.clone()));
        }
        dict
    }

    pub fn revision(&self) -> Revision {
        self.revision
    }

    pub fn algorithm(&self) -> EncryptionAlgorithm {
        self.algorithm
    }

    /// Raw `/P` value
    pub fn p_value(&self) -> i32 {
        self.p_value
    }

    pub fn permissions(&self) -> PDFPermissions {
        PDFPermissions::from_p_value(self.p_value)
    }

    pub fn encrypt_metadata(&self) -> bool {
        self.encrypt_metadata
    }
}

/// Method of the crypt filter `/StmF` or `/StrF` names
fn crypt_filter(dict: &Dictionary, key: &str) -> PDFResult<CryptMethod> {
    let name = dict.get_name(key).unwrap_or("Identity");
    if name == "Identity" {
        return Ok(CryptMethod::Identity);
    }
    let filter = dict
        .get_dict("CF")
        .and_then(|filters| filters.get_dict(name))
        .ok_or_else(|| PDFError::MissingDictionaryEntry(format!("CF/{}", name)))?;
    match filter.get_name("CFM") {
        Some(method) => CryptMethod::from_name(method),
        None => Ok(CryptMethod::Identity),
    }
}
