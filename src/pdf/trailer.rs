//! Trailer dictionary

use super::{Dictionary, Object, ObjectId};
use crate::error::{PDFError, PDFResult};

/// Typed view of a trailer dictionary.
///
/// The raw dictionary is kept so keys this type does not model survive a
/// round trip.
#[derive(Debug, Clone, PartialEq)]
pub struct Trailer {
    pub root: ObjectId,
    pub size: u32,
    pub prev: Option<u64>,
    pub encrypt: Option<ObjectId>,
    pub info: Option<ObjectId>,
    pub id: Option<[Vec<u8>; 2]>,
    pub xref_stream: Option<u64>,
    dictionary: Dictionary,
}

impl Trailer {
    /// Trailer for a freshly written document
    pub fn new(root: ObjectId, size: u32) -> Self {
        Self {
            root,
            size,
            prev: None,
            encrypt: None,
            info: None,
            id: None,
            xref_stream: None,
            dictionary: Dictionary::new(),
        }
    }

    /// Read a trailer; a missing or non-reference `/Root` is a
    /// cross-reference failure so readers fall back to recovery.
    pub fn from_dictionary(dictionary: Dictionary) -> PDFResult<Self> {
        let root = dictionary
            .get_reference("Root")
            .ok_or_else(|| PDFError::xref("trailer has no /Root reference"))?;
        let size = dictionary
            .get_integer("Size")
            .filter(|&size| (0..=u32::MAX as i64).contains(&size))
            .ok_or_else(|| PDFError::xref("trailer has no valid /Size"))? as u32;

        let offset = |key: &str| dictionary.get_integer(key).filter(|&v| v >= 0).map(|v| v as u64);
        let id = match dictionary.get_array("ID") {
            Some([first, second, ..]) => match (first.as_bytes(), second.as_bytes()) {
                (Some(a), Some(b)) => Some([a.to_vec(), b.to_vec()]),
                _ => None,
            },
            _ => None,
        };

        Ok(Self {
            root,
            size,
            prev: offset("Prev"),
            encrypt: dictionary.get_reference("Encrypt"),
            info: dictionary.get_reference("Info"),
            id,
            xref_stream: offset("XRefStm"),
            dictionary,
        })
    }

    /// Raw dictionary as read
    pub fn dictionary(&self) -> &Dictionary {
        &self.dictionary
    }

    /// First `/ID` element, used by key derivation
    pub fn file_id(&self) -> &[u8] {
        self.id.as_ref().map_or(&[], |id| id[0].as_slice())
    }

    /// Dictionary for writing, typed fields taking precedence
    pub fn to_dictionary(&self) -> Dictionary {
        let mut dict = self.dictionary.clone();
        for key in ["Prev", "XRefStm", "Type", "W", "Index", "Length", "Filter", "DecodeParms"] {
            dict.remove(key);
        }
        dict.set("Size", self.size);
        dict.set_reference("Root", self.root);
        // Direct /Info and /Encrypt dictionaries are kept as read
        if let Some(info) = self.info {
            dict.set_reference("Info", info);
        }
        if let Some(encrypt) = self.encrypt {
            dict.set_reference("Encrypt", encrypt);
        }
        match &self.id {
            Some([first, second]) => dict.set(
                "ID",
                vec![Object::hex_string(first.clone()), Object::hex_string(second.clone())],
            ),
            None => {
                dict.remove("ID");
            }
        }
        if let Some(prev) = self.prev {
            dict.set("Prev", prev as i64);
        }
        dict
    }
}
