//! Password authentication against a standard security handler

use log::{debug, warn};
use zeroize::Zeroizing;

use super::{
    compute_file_key, compute_user_hash, decrypt_owner_hash, decrypt_perms, hash_password, strip_padding,
    unwrap_file_key, user_hash_check_len, EncryptionState,
};
use crate::error::{PDFError, PDFResult};
use crate::handlers::StandardSecurityHandler;

/// Compare without short-circuiting on the first difference
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

impl StandardSecurityHandler {
    /// Try the owner password, then the user password.
    ///
    /// Which one matched decides whether the session gets full permissions.
    pub fn authenticate(&self, password: &[u8], file_id: &[u8]) -> PDFResult<EncryptionState> {
        let (file_key, owner) = match self.authenticate_owner_password(password, file_id) {
            Ok(key) => (key, true),
            Err(PDFError::BadPassword) => (self.authenticate_user_password(password, file_id)?, false),
            Err(err) => return Err(err),
        };
        debug!(
            "Authenticated {} password for {} handler",
            if owner { "owner" } else { "user" },
            self.revision
        );
        Ok(EncryptionState::new(self, file_key, owner, file_id))
    }

    /// Algorithms 6 and 11: authenticate user password
    pub fn authenticate_user_password(&self, password: &[u8], file_id: &[u8]) -> PDFResult<Zeroizing<Vec<u8>>> {
        if self.revision.is_aes256() {
            let validation_salt = &self.user_hash[32..40];
            let hash = hash_password(self.revision, password, validation_salt, &[])?;
            if !constant_time_eq(&hash, &self.user_hash[..32]) {
                return Err(PDFError::BadPassword);
            }
            let intermediate = hash_password(self.revision, password, &self.user_hash[40..48], &[])?;
            let wrapped = self
                .user_key
                .as_deref()
                .ok_or_else(|| PDFError::MissingDictionaryEntry("UE".into()))?;
            let file_key = unwrap_file_key(&intermediate, wrapped)?;
            if !self.check_perms(&file_key)? {
                warn!("User password matched but /Perms does not decrypt");
            }
            return Ok(file_key);
        }

        let file_key = compute_file_key(
            password,
            &self.owner_hash,
            self.p_value,
            file_id,
            self.revision,
            self.key_length,
            self.encrypt_metadata,
        );
        let expected = compute_user_hash(&file_key, self.revision, file_id)?;
        let n = user_hash_check_len(self.revision);
        if constant_time_eq(&expected[..n], &self.user_hash[..n]) {
            Ok(file_key)
        } else {
            Err(PDFError::BadPassword)
        }
    }

    /// Algorithms 7 and 12: authenticate owner password
    pub fn authenticate_owner_password(&self, password: &[u8], file_id: &[u8]) -> PDFResult<Zeroizing<Vec<u8>>> {
        if self.revision.is_aes256() {
            let user_data = &self.user_hash[..48];
            let hash = hash_password(self.revision, password, &self.owner_hash[32..40], user_data)?;
            if !constant_time_eq(&hash, &self.owner_hash[..32]) {
                return Err(PDFError::BadPassword);
            }
            let intermediate = hash_password(self.revision, password, &self.owner_hash[40..48], user_data)?;
            let wrapped = self
                .owner_key
                .as_deref()
                .ok_or_else(|| PDFError::MissingDictionaryEntry("OE".into()))?;
            let file_key = unwrap_file_key(&intermediate, wrapped)?;
            if !self.check_perms(&file_key)? {
                warn!("Owner password matched but /Perms does not decrypt");
                return Err(PDFError::BadPassword);
            }
            return Ok(file_key);
        }

        let user_password = decrypt_owner_hash(password, &self.owner_hash, self.revision, self.key_length)?;
        self.authenticate_user_password(&user_password, file_id)
    }

    /// Validate `/Perms` against the file key.
    ///
    /// A missing or undecodable block only fails for R6; R5 files written by
    /// older tools often carry junk here.
    fn check_perms(&self, file_key: &[u8]) -> PDFResult<bool> {
        let decoded = match &self.perms {
            Some(perms) => decrypt_perms(perms, file_key)?,
            None => None,
        };
        match decoded {
            Some((p_value, _)) => {
                if p_value != self.p_value {
                    warn!("/Perms holds P {} but /P is {}", p_value, self.p_value);
                }
                Ok(true)
            }
            None => {
                if self.revision == super::Revision::R6 {
                    Ok(false)
                } else {
                    warn!("/Perms could not be validated");
                    Ok(true)
                }
            }
        }
    }

    /// Recover the user password from the owner password (R2 to R4)
    pub fn compute_user_password(&self, owner_password: &[u8], file_id: &[u8]) -> PDFResult<Vec<u8>> {
        if self.revision.is_aes256() {
            return Err(PDFError::invalid_state(format!(
                "the user password cannot be recovered for {}",
                self.revision
            )));
        }
        let padded = decrypt_owner_hash(owner_password, &self.owner_hash, self.revision, self.key_length)?;
        self.authenticate_user_password(&padded, file_id)?;
        Ok(strip_padding(&padded))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::Revision;
    use crate::{EncryptionAlgorithm, EncryptionMode, PDFPermissions};
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    const FILE_ID: &[u8] = b"\x01\x02\x03\x04\x05\x06\x07\x08\x09\x0a\x0b\x0c\x0d\x0e\x0f\x10";

    fn create_handler(mode: EncryptionMode, user: &[u8], owner: &[u8]) -> (StandardSecurityHandler, EncryptionState) {
        let permissions = PDFPermissions::new(PDFPermissions::PRINT);
        StandardSecurityHandler::create(user, owner, permissions, mode, FILE_ID).unwrap()
    }

    #[rstest]
    #[case(EncryptionMode::new(EncryptionAlgorithm::RC4_40))]
    #[case(EncryptionMode::new(EncryptionAlgorithm::RC4_40).with_revision(Revision::R3))]
    #[case(EncryptionMode::new(EncryptionAlgorithm::RC4_128))]
    #[case(EncryptionMode::new(EncryptionAlgorithm::RC4_128).with_revision(Revision::R4))]
    #[case(EncryptionMode::new(EncryptionAlgorithm::AES_128))]
    #[case(EncryptionMode::new(EncryptionAlgorithm::AES_128).with_encrypt_metadata(false))]
    #[case(EncryptionMode::new(EncryptionAlgorithm::AES_256).with_revision(Revision::R5))]
    #[case(EncryptionMode::new(EncryptionAlgorithm::AES_256))]
    fn test_owner_user_asymmetry(#[case] mode: EncryptionMode) -> PDFResult<()> {
        let (handler, created) = create_handler(mode, b"user", b"owner");

        let owner = handler.authenticate(b"owner", FILE_ID)?;
        assert!(owner.is_owner());
        assert_eq!(owner.file_key(), created.file_key());

        let user = handler.authenticate(b"user", FILE_ID)?;
        assert!(!user.is_owner());
        assert_eq!(user.file_key(), created.file_key());
        assert!(user.permissions().has_permission(PDFPermissions::PRINT));

        assert!(matches!(handler.authenticate(b"wrong", FILE_ID), Err(PDFError::BadPassword)));
        Ok(())
    }

    #[test_log::test]
    fn test_empty_user_password() -> PDFResult<()> {
        let (handler, _) = create_handler(EncryptionMode::new(EncryptionAlgorithm::AES_128), b"", b"owner");
        assert!(!handler.authenticate(b"", FILE_ID)?.is_owner());
        Ok(())
    }

    #[test_log::test]
    fn test_random_owner_password() -> PDFResult<()> {
        let (handler, _) = create_handler(EncryptionMode::new(EncryptionAlgorithm::RC4_128), b"user", b"");
        assert!(!handler.authenticate(b"user", FILE_ID)?.is_owner());
        assert!(matches!(handler.authenticate(b"", FILE_ID), Err(PDFError::BadPassword)));
        Ok(())
    }

    #[test_log::test]
    fn test_wrong_file_id() {
        let (handler, _) = create_handler(EncryptionMode::new(EncryptionAlgorithm::RC4_128), b"user", b"owner");
        assert!(matches!(handler.authenticate(b"user", b"other id"), Err(PDFError::BadPassword)));
    }

    #[test_log::test]
    fn test_compute_user_password() -> PDFResult<()> {
        let (handler, _) = create_handler(EncryptionMode::new(EncryptionAlgorithm::AES_128), b"reader", b"owner");
        assert_eq!(handler.compute_user_password(b"owner", FILE_ID)?, b"reader".to_vec());
        assert!(handler.compute_user_password(b"nope", FILE_ID).is_err());

        let (aes256, _) = create_handler(EncryptionMode::new(EncryptionAlgorithm::AES_256), b"reader", b"owner");
        assert!(matches!(
            aes256.compute_user_password(b"owner", FILE_ID),
            Err(PDFError::InvalidState(_))
        ));
        Ok(())
    }

    #[test_log::test]
    fn test_r6_owner_requires_perms() -> PDFResult<()> {
        let (mut handler, _) = create_handler(EncryptionMode::new(EncryptionAlgorithm::AES_256), b"user", b"owner");
        handler.perms = Some(vec![0u8; 16]);
        assert!(matches!(handler.authenticate_owner_password(b"owner", FILE_ID), Err(PDFError::BadPassword)));
        Ok(())
    }
}
