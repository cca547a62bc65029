//! AES encryption provider implementation
//!
//! Streams and strings use CBC with a random 16-byte IV stored in front of
//! the ciphertext and PKCS#7 padding. Key derivation needs raw CBC without
//! padding, exposed through [`cbc_encrypt`] and [`cbc_decrypt`].

use aes::cipher::block_padding::{NoPadding, Pkcs7};
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use cbc::{Decryptor, Encryptor};
use log::warn;
use rand::{thread_rng, RngCore};

use super::CryptoProvider;
use crate::error::{PDFError, PDFResult};

type Aes128CbcEnc = Encryptor<aes::Aes128>;
type Aes256CbcEnc = Encryptor<aes::Aes256>;
type Aes128CbcDec = Decryptor<aes::Aes128>;
type Aes256CbcDec = Decryptor<aes::Aes256>;

pub(crate) const BLOCK_SIZE: usize = 16;

/// Padding applied by [`cbc_encrypt`] and removed by [`cbc_decrypt`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Padding {
    Pkcs7,
    None,
}

fn bad_iv(_: aes::cipher::InvalidLength) -> PDFError {
    PDFError::corrupt("AES IV must be 16 bytes")
}

/// AES-CBC encryption with a 16 or 32 byte key
pub(crate) fn cbc_encrypt(key: &[u8], iv: &[u8], data: &[u8], padding: Padding) -> PDFResult<Vec<u8>> {
    if padding == Padding::None && data.len() % BLOCK_SIZE != 0 {
        return Err(PDFError::corrupt(format!(
            "{} bytes is not a whole number of AES blocks",
            data.len()
        )));
    }

    let output = match (key.len(), padding) {
        (16, Padding::Pkcs7) => Aes128CbcEnc::new_from_slices(key, iv)
            .map_err(bad_iv)?
            .encrypt_padded_vec_mut::<Pkcs7>(data),
        (16, Padding::None) => Aes128CbcEnc::new_from_slices(key, iv)
            .map_err(bad_iv)?
            .encrypt_padded_vec_mut::<NoPadding>(data),
        (32, Padding::Pkcs7) => Aes256CbcEnc::new_from_slices(key, iv)
            .map_err(bad_iv)?
            .encrypt_padded_vec_mut::<Pkcs7>(data),
        (32, Padding::None) => Aes256CbcEnc::new_from_slices(key, iv)
            .map_err(bad_iv)?
            .encrypt_padded_vec_mut::<NoPadding>(data),
        (n, _) => return Err(PDFError::InvalidKeyLength(n)),
    };
    Ok(output)
}

/// AES-CBC decryption with a 16 or 32 byte key
pub(crate) fn cbc_decrypt(key: &[u8], iv: &[u8], data: &[u8], padding: Padding) -> PDFResult<Vec<u8>> {
    if data.len() % BLOCK_SIZE != 0 {
        return Err(PDFError::corrupt(format!(
            "{} bytes is not a whole number of AES blocks",
            data.len()
        )));
    }

    let result = match (key.len(), padding) {
        (16, Padding::Pkcs7) => Aes128CbcDec::new_from_slices(key, iv)
            .map_err(bad_iv)?
            .decrypt_padded_vec_mut::<Pkcs7>(data),
        (16, Padding::None) => Aes128CbcDec::new_from_slices(key, iv)
            .map_err(bad_iv)?
            .decrypt_padded_vec_mut::<NoPadding>(data),
        (32, Padding::Pkcs7) => Aes256CbcDec::new_from_slices(key, iv)
            .map_err(bad_iv)?
            .decrypt_padded_vec_mut::<Pkcs7>(data),
        (32, Padding::None) => Aes256CbcDec::new_from_slices(key, iv)
            .map_err(bad_iv)?
            .decrypt_padded_vec_mut::<NoPadding>(data),
        (n, _) => return Err(PDFError::InvalidKeyLength(n)),
    };
    result.map_err(|_| PDFError::corrupt("invalid AES padding"))
}

/// AES encryption provider for AESV2 (16-byte keys) and AESV3 (32-byte keys)
#[derive(Debug)]
pub struct AESProvider {
    key_length: usize,
}

impl AESProvider {
    pub const fn new(key_length: usize) -> Self {
        Self { key_length }
    }

    fn check_key(&self, key: &[u8]) -> PDFResult<()> {
        if key.len() != self.key_length {
            return Err(PDFError::InvalidKeyLength(key.len()));
        }
        Ok(())
    }
}

impl CryptoProvider for AESProvider {
    fn encrypt(&self, key: &[u8], data: &[u8]) -> PDFResult<Vec<u8>> {
        self.check_key(key)?;
        let mut iv = [0u8; BLOCK_SIZE];
        thread_rng().fill_bytes(&mut iv);

        let ciphertext = cbc_encrypt(key, &iv, data, Padding::Pkcs7)?;
        let mut output = Vec::with_capacity(BLOCK_SIZE + ciphertext.len());
        output.extend_from_slice(&iv);
        output.extend_from_slice(&ciphertext);
        Ok(output)
    }

    fn decrypt(&self, key: &[u8], data: &[u8]) -> PDFResult<Vec<u8>> {
        self.check_key(key)?;
        match data.len() {
            0 => Ok(Vec::new()),
            n if n < BLOCK_SIZE => Err(PDFError::truncated(format!(
                "{} bytes cannot hold an AES IV",
                n
            ))),
            BLOCK_SIZE => {
                warn!("AES data holds an IV and nothing else");
                Ok(Vec::new())
            }
            _ => {
                let (iv, ciphertext) = data.split_at(BLOCK_SIZE);
                cbc_decrypt(key, iv, ciphertext, Padding::Pkcs7)
            }
        }
    }
}
