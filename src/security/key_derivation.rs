//! Password padding, file-key derivation and the `/O` `/U` `/OE` `/UE` `/Perms` values

use num_bigint::BigUint;
use rand::{thread_rng, RngCore};
use sha2::{Digest, Sha256, Sha384, Sha512};
use zeroize::Zeroizing;

use super::{Revision, PASSWORD_PADDING};
use crate::crypto::{cbc_decrypt, cbc_encrypt, rc4, Padding};
use crate::error::{PDFError, PDFResult};

/// Longest password honoured by R5 and R6
pub const MAX_AES256_PASSWORD: usize = 127;

const ZERO_IV: [u8; 16] = [0; 16];

/// Pad or truncate a password to 32 bytes with the standard padding
pub(crate) fn pad_password(password: &[u8]) -> [u8; 32] {
    let mut padded = [0u8; 32];
    let len = password.len().min(32);
    padded[..len].copy_from_slice(&password[..len]);
    padded[len..].copy_from_slice(&PASSWORD_PADDING[..32 - len]);
    padded
}

/// Strip the standard padding from a recovered 32-byte password
pub(crate) fn strip_padding(padded: &[u8]) -> Vec<u8> {
    (0..=padded.len())
        .find(|&i| PASSWORD_PADDING.starts_with(&padded[i..]))
        .map_or_else(|| padded.to_vec(), |i| padded[..i].to_vec())
}

/// Key length in bytes actually used by a legacy revision
fn legacy_key_length(revision: Revision, key_length: usize) -> usize {
    match revision {
        Revision::R2 => 5,
        _ => key_length.clamp(5, 16),
    }
}

fn xor_key(key: &[u8], round: u8) -> Vec<u8> {
    key.iter().map(|b| b ^ round).collect()
}

/// Algorithm 2: file key for R2 to R4
pub(crate) fn compute_file_key(
    password: &[u8],
    owner_hash: &[u8],
    p_value: i32,
    file_id: &[u8],
    revision: Revision,
    key_length: usize,
    encrypt_metadata: bool,
) -> Zeroizing<Vec<u8>> {
    let n = legacy_key_length(revision, key_length);

    let mut hasher = md5::Context::new();
    hasher.consume(pad_password(password));
    hasher.consume(&owner_hash[..owner_hash.len().min(32)]);
    hasher.consume((p_value as u32).to_le_bytes());
    hasher.consume(file_id);
    if revision >= Revision::R4 && !encrypt_metadata {
        hasher.consume([0xFF; 4]);
    }
    let mut digest = Zeroizing::new(hasher.compute().0);

    if revision >= Revision::R3 {
        for _ in 0..50 {
            *digest = md5::compute(&digest[..n]).0;
        }
    }
    Zeroizing::new(digest[..n].to_vec())
}

/// RC4 key protecting `/O`, from the owner password
fn owner_rc4_key(owner_password: &[u8], revision: Revision, key_length: usize) -> Zeroizing<Vec<u8>> {
    let mut digest = Zeroizing::new(md5::compute(pad_password(owner_password)).0);
    if revision >= Revision::R3 {
        for _ in 0..50 {
            *digest = md5::compute(*digest).0;
        }
    }
    Zeroizing::new(digest[..legacy_key_length(revision, key_length)].to_vec())
}

/// Algorithm 3: `/O` for R2 to R4.
///
/// An empty owner password falls back to the user password.
pub(crate) fn compute_owner_hash(
    owner_password: &[u8],
    user_password: &[u8],
    revision: Revision,
    key_length: usize,
) -> PDFResult<Vec<u8>> {
    let owner_password = if owner_password.is_empty() { user_password } else { owner_password };
    let key = owner_rc4_key(owner_password, revision, key_length);

    let mut value = rc4(&key, &pad_password(user_password))?;
    if revision >= Revision::R3 {
        for round in 1..=19u8 {
            value = rc4(&xor_key(&key, round), &value)?;
        }
    }
    Ok(value)
}

/// Undo algorithm 3: the padded user password hidden in `/O`
pub(crate) fn decrypt_owner_hash(
    owner_password: &[u8],
    owner_hash: &[u8],
    revision: Revision,
    key_length: usize,
) -> PDFResult<Zeroizing<Vec<u8>>> {
    let key = owner_rc4_key(owner_password, revision, key_length);
    let mut value = owner_hash[..owner_hash.len().min(32)].to_vec();

    if revision == Revision::R2 {
        value = rc4(&key, &value)?;
    } else {
        for round in (0..=19u8).rev() {
            value = rc4(&xor_key(&key, round), &value)?;
        }
    }
    Ok(Zeroizing::new(value))
}

/// Algorithms 4 and 5: `/U` for R2 to R4.
///
/// R3 and later only define the first 16 bytes; the rest is zero filled.
pub(crate) fn compute_user_hash(file_key: &[u8], revision: Revision, file_id: &[u8]) -> PDFResult<Vec<u8>> {
    if revision == Revision::R2 {
        return rc4(file_key, &PASSWORD_PADDING);
    }

    let mut hasher = md5::Context::new();
    hasher.consume(PASSWORD_PADDING);
    hasher.consume(file_id);
    let mut value = rc4(file_key, &hasher.compute().0)?;
    for round in 1..=19u8 {
        value = rc4(&xor_key(file_key, round), &value)?;
    }
    value.resize(32, 0);
    Ok(value)
}

/// Number of `/U` bytes compared during authentication
pub(crate) fn user_hash_check_len(revision: Revision) -> usize {
    match revision {
        Revision::R2 => 32,
        _ => 16,
    }
}

/// UTF-8 password cut to the length R5 and R6 honour
pub(crate) fn truncate_password(password: &[u8]) -> &[u8] {
    &password[..password.len().min(MAX_AES256_PASSWORD)]
}

/// Password hash for R5 (plain SHA-256) and R6 (algorithm 2.B)
pub(crate) fn hash_password(
    revision: Revision,
    password: &[u8],
    salt: &[u8],
    user_data: &[u8],
) -> PDFResult<Zeroizing<Vec<u8>>> {
    let password = truncate_password(password);
    let mut hasher = Sha256::new();
    hasher.update(password);
    hasher.update(salt);
    hasher.update(user_data);
    let seed = Zeroizing::new(hasher.finalize().to_vec());

    match revision {
        Revision::R5 => Ok(seed),
        Revision::R6 => hash_r6(seed, password, user_data),
        other => Err(PDFError::UnsupportedRevision(other.number())),
    }
}

fn hash_r6(mut k: Zeroizing<Vec<u8>>, password: &[u8], user_data: &[u8]) -> PDFResult<Zeroizing<Vec<u8>>> {
    let mut round: i32 = 0;
    loop {
        let mut block = Zeroizing::new(Vec::with_capacity(password.len() + k.len() + user_data.len()));
        block.extend_from_slice(password);
        block.extend_from_slice(&k);
        block.extend_from_slice(user_data);
        let k1 = Zeroizing::new(block.repeat(64));

        let e = Zeroizing::new(cbc_encrypt(&k[..16], &k[16..32], &k1, Padding::None)?);
        let selector = (BigUint::from_bytes_be(&e[..16]) % 3u32)
            .to_u32_digits()
            .first()
            .copied()
            .unwrap_or(0);
        *k = match selector {
            0 => Sha256::digest(e.as_slice()).to_vec(),
            1 => Sha384::digest(e.as_slice()).to_vec(),
            _ => Sha512::digest(e.as_slice()).to_vec(),
        };

        round += 1;
        let last = e.last().copied().unwrap_or(0) as i32;
        if round >= 64 && last <= round - 32 {
            break;
        }
    }
    k.truncate(32);
    Ok(k)
}

/// `/U`, `/UE`, `/O` and `/OE` of an R5 or R6 handler
pub(crate) struct Aes256Values {
    pub user_hash: Vec<u8>,
    pub user_key: Vec<u8>,
    pub owner_hash: Vec<u8>,
    pub owner_key: Vec<u8>,
}

fn random_salt() -> [u8; 8] {
    let mut salt = [0u8; 8];
    thread_rng().fill_bytes(&mut salt);
    salt
}

/// Hash, validation salt and key salt, 48 bytes in all
fn salted_hash(
    revision: Revision,
    password: &[u8],
    user_data: &[u8],
) -> PDFResult<(Vec<u8>, [u8; 8])> {
    let validation_salt = random_salt();
    let key_salt = random_salt();
    let mut value = hash_password(revision, password, &validation_salt, user_data)?.to_vec();
    value.extend_from_slice(&validation_salt);
    value.extend_from_slice(&key_salt);
    Ok((value, key_salt))
}

/// Algorithms 8 and 9: wrap `file_key` under both passwords
pub(crate) fn compute_aes256_values(
    revision: Revision,
    user_password: &[u8],
    owner_password: &[u8],
    file_key: &[u8],
) -> PDFResult<Aes256Values> {
    let (user_hash, user_key_salt) = salted_hash(revision, user_password, &[])?;
    let intermediate = hash_password(revision, user_password, &user_key_salt, &[])?;
    let user_key = cbc_encrypt(&intermediate, &ZERO_IV, file_key, Padding::None)?;

    let (owner_hash, owner_key_salt) = salted_hash(revision, owner_password, &user_hash)?;
    let intermediate = hash_password(revision, owner_password, &owner_key_salt, &user_hash)?;
    let owner_key = cbc_encrypt(&intermediate, &ZERO_IV, file_key, Padding::None)?;

    Ok(Aes256Values {
        user_hash,
        user_key,
        owner_hash,
        owner_key,
    })
}

/// Decrypt `/UE` or `/OE` with an intermediate key
pub(crate) fn unwrap_file_key(intermediate: &[u8], wrapped: &[u8]) -> PDFResult<Zeroizing<Vec<u8>>> {
    if wrapped.len() < 32 {
        return Err(PDFError::malformed(format!(
            "wrapped file key is {} bytes, expected 32",
            wrapped.len()
        )));
    }
    Ok(Zeroizing::new(cbc_decrypt(
        intermediate,
        &ZERO_IV,
        &wrapped[..32],
        Padding::None,
    )?))
}

/// Algorithm 10: `/Perms`
pub(crate) fn compute_perms(p_value: i32, encrypt_metadata: bool, file_key: &[u8]) -> PDFResult<Vec<u8>> {
    let mut block = [0u8; 16];
    block[..4].copy_from_slice(&(p_value as u32).to_le_bytes());
    block[4..8].copy_from_slice(&[0xFF; 4]);
    block[8] = if encrypt_metadata { b'T' } else { b'F' };
    block[9..12].copy_from_slice(b"adb");
    thread_rng().fill_bytes(&mut block[12..]);
    cbc_encrypt(file_key, &ZERO_IV, &block, Padding::None)
}

/// Decrypt `/Perms`; `None` when the `adb` marker is missing
pub(crate) fn decrypt_perms(perms: &[u8], file_key: &[u8]) -> PDFResult<Option<(i32, bool)>> {
    if perms.len() < 16 {
        return Ok(None);
    }
    let block = cbc_decrypt(file_key, &ZERO_IV, &perms[..16], Padding::None)?;
    if &block[9..12] != b"adb" {
        return Ok(None);
    }
    let p_value = u32::from_le_bytes([block[0], block[1], block[2], block[3]]) as i32;
    Ok(Some((p_value, block[8] == b'T')))
}

/// Random bytes standing in for an empty owner password
pub(crate) fn random_password() -> Vec<u8> {
    let mut password = vec![0u8; 32];
    thread_rng().fill_bytes(&mut password);
    password
}

/// Random 32-byte file key for R5 and R6
pub(crate) fn random_file_key() -> Zeroizing<Vec<u8>> {
    let mut key = Zeroizing::new(vec![0u8; 32]);
    thread_rng().fill_bytes(&mut key);
    key
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use test_log::test;

    const FILE_ID: [u8; 16] = [0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15];
    const SALT: [u8; 8] = [1, 2, 3, 4, 5, 6, 7, 8];

    #[test]
    fn test_password_padding() {
        let padded = pad_password(b"test");
        assert_eq!(&padded[..4], b"test");
        assert_eq!(&padded[4..], &PASSWORD_PADDING[..28]);
        assert_eq!(pad_password(&[]), PASSWORD_PADDING);
        assert_eq!(strip_padding(&padded), b"test".to_vec());
        assert_eq!(strip_padding(&PASSWORD_PADDING), Vec::<u8>::new());
    }

    #[test]
    fn test_rev3_values() -> PDFResult<()> {
        let owner_hash = compute_owner_hash(b"owner", b"user", Revision::R3, 16)?;
        assert_eq!(
            hex::encode(&owner_hash),
            "0ba3835f88f90388e74e54584125ce142be0de24c6b0d37746e075b891756671"
        );

        let key = compute_file_key(b"user", &owner_hash, -4, &FILE_ID, Revision::R3, 16, true);
        assert_eq!(hex::encode(key.as_slice()), "4c8652a72175cef37e14c485b59602d2");

        let user_hash = compute_user_hash(&key, Revision::R3, &FILE_ID)?;
        assert_eq!(hex::encode(&user_hash[..16]), "b5eeee15d9561a1fad6c9d5a195dde33");
        assert_eq!(&user_hash[16..], &[0u8; 16]);
        Ok(())
    }

    #[test]
    fn test_rev2_values() -> PDFResult<()> {
        let owner_hash = compute_owner_hash(b"owner", b"user", Revision::R2, 5)?;
        assert_eq!(
            hex::encode(&owner_hash),
            "94e8094419662a774442fb072e3d9f19e9d130ec09a4d0061e78fe920f7ab62f"
        );
        let key = compute_file_key(b"user", &owner_hash, -4, &FILE_ID, Revision::R2, 16, true);
        assert_eq!(hex::encode(key.as_slice()), "2a136df655");
        assert_eq!(
            hex::encode(compute_user_hash(&key, Revision::R2, &FILE_ID)?),
            "56a39de58f86fa456642db1674c3060f327a4e038275843997dccfd58ea7900e"
        );
        Ok(())
    }

    #[test]
    fn test_owner_hash_recovers_user_password() -> PDFResult<()> {
        for revision in [Revision::R2, Revision::R3, Revision::R4] {
            let owner_hash = compute_owner_hash(b"secret", b"reader", revision, 16)?;
            let padded = decrypt_owner_hash(b"secret", &owner_hash, revision, 16)?;
            assert_eq!(strip_padding(&padded), b"reader".to_vec());
        }
        Ok(())
    }

    #[test]
    fn test_metadata_flag_changes_r4_key() {
        let o = [0xAA; 32];
        let with = compute_file_key(b"u", &o, -4, &FILE_ID, Revision::R4, 16, true);
        let without = compute_file_key(b"u", &o, -4, &FILE_ID, Revision::R4, 16, false);
        assert_ne!(with, without);
    }

    #[test]
    fn test_aes256_hashes() -> PDFResult<()> {
        assert_eq!(
            hex::encode(hash_password(Revision::R5, b"user", &SALT, &[])?.as_slice()),
            "ad7c98e251cb1c7b3e2830b6f0becbd8352a6ab712232d6e82f2fca45f304dcc"
        );
        assert_eq!(
            hex::encode(hash_password(Revision::R6, b"user", &SALT, &[])?.as_slice()),
            "17424b40ead366f7ddef0ff073608aa68ba701714b5cef3409b94c4ffa763726"
        );
        assert_eq!(
            hex::encode(hash_password(Revision::R6, b"owner", &SALT, &[0u8; 48])?.as_slice()),
            "0251140b8ebd19228eb6d01626469446cff496996a91468211aadc54bf0869c6"
        );
        Ok(())
    }

    #[test]
    fn test_long_passwords_are_truncated() -> PDFResult<()> {
        let long = vec![b'x'; 200];
        assert_eq!(
            hash_password(Revision::R6, &long, &SALT, &[])?,
            hash_password(Revision::R6, &long[..127], &SALT, &[])?
        );
        Ok(())
    }

    #[test]
    fn test_wrapped_key_and_perms() -> PDFResult<()> {
        let file_key = random_file_key();
        let values = compute_aes256_values(Revision::R6, b"user", b"owner", &file_key)?;
        assert_eq!(values.user_hash.len(), 48);
        assert_eq!(values.owner_hash.len(), 48);
        assert_eq!(values.user_key.len(), 32);

        let intermediate = hash_password(Revision::R6, b"user", &values.user_hash[40..48], &[])?;
        assert_eq!(unwrap_file_key(&intermediate, &values.user_key)?, file_key);

        let perms = compute_perms(-3904, false, &file_key)?;
        assert_eq!(decrypt_perms(&perms, &file_key)?, Some((-3904, false)));
        assert_eq!(decrypt_perms(&perms, &[0u8; 32])?, None);
        Ok(())
    }
}
