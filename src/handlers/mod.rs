//! Security handlers for PDF encryption/decryption

mod standard;

pub use standard::StandardSecurityHandler;

use log::debug;

use crate::error::{PDFError, PDFResult};
use crate::pdf::Dictionary;
use crate::security::EncryptionState;
use crate::EncryptionAlgorithm;

/// Kinds of security handler this crate can drive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerKind {
    /// Password-based handler (`/Filter /Standard`)
    Standard,
}

/// Security handler interface for PDF encryption
#[derive(Debug, Clone)]
pub enum SecurityHandler {
    /// Standard password-based security handler
    Standard(StandardSecurityHandler),
}

impl SecurityHandler {
    /// Authenticate with password, owner first
    pub fn authenticate(&self, password: &[u8], file_id: &[u8]) -> PDFResult<EncryptionState> {
        debug!("Attempting password authentication");
        match self {
            SecurityHandler::Standard(handler) => handler.authenticate(password, file_id),
        }
    }

    /// Get encryption algorithm
    pub fn algorithm(&self) -> EncryptionAlgorithm {
        match self {
            SecurityHandler::Standard(handler) => handler.algorithm(),
        }
    }

    /// Create dictionary representation
    pub fn to_dict(&self) -> Dictionary {
        match self {
            SecurityHandler::Standard(handler) => handler.to_dict(),
        }
    }

    pub fn as_standard(&self) -> Option<&StandardSecurityHandler> {
        match self {
            SecurityHandler::Standard(handler) => Some(handler),
        }
    }
}

/// Maps `/Filter` names to handler kinds.
///
/// Each reader session carries its own registry; the default one knows
/// `/Standard`.
#[derive(Debug, Clone)]
pub struct SecurityHandlerRegistry {
    handlers: Vec<(String, HandlerKind)>,
}

impl Default for SecurityHandlerRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register("Standard", HandlerKind::Standard);
        registry
    }
}

impl SecurityHandlerRegistry {
    /// Registry that knows no filter at all
    pub fn empty() -> Self {
        Self { handlers: Vec::new() }
    }

    /// Route `filter` to `kind`, replacing an earlier registration
    pub fn register(&mut self, filter: impl Into<String>, kind: HandlerKind) {
        let filter = filter.into();
        self.handlers.retain(|(name, _)| *name != filter);
        self.handlers.push((filter, kind));
    }

    pub fn lookup(&self, filter: &str) -> Option<HandlerKind> {
        self.handlers
            .iter()
            .find(|(name, _)| name == filter)
            .map(|(_, kind)| *kind)
    }

    /// Build the handler an `/Encrypt` dictionary asks for
    pub fn create(&self, encrypt: &Dictionary) -> PDFResult<SecurityHandler> {
        let filter = encrypt
            .get_name("Filter")
            .ok_or_else(|| PDFError::MissingDictionaryEntry("Filter".into()))?;
        match self.lookup(filter) {
            Some(HandlerKind::Standard) => Ok(SecurityHandler::Standard(StandardSecurityHandler::from_dict(encrypt)?)),
            None => Err(PDFError::UnsupportedFilter(filter.to_string())),
        }
    }
}
