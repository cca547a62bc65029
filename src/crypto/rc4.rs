//! RC4 encryption provider implementation

use rc4::consts::{U10, U11, U12, U13, U14, U15, U16, U5, U6, U7, U8, U9};
use rc4::{KeyInit, Rc4, StreamCipher};

use super::CryptoProvider;
use crate::error::{PDFError, PDFResult};

/// XOR the RC4 keystream into `data`.
///
/// Standard security handler keys are 5 to 16 bytes long: file keys of
/// 40 to 128 bits and the object keys derived from them.
fn keystream(key: &[u8], data: &mut [u8]) -> PDFResult<()> {
    macro_rules! keyed {
        ($($len:literal => $size:ty),+ $(,)?) => {
            match key.len() {
                $($len => Rc4::<$size>::new_from_slice(key)
                    .map_err(|_| PDFError::InvalidKeyLength(key.len()))?
                    .apply_keystream(data),)+
                other => return Err(PDFError::InvalidKeyLength(other)),
            }
        };
    }

    keyed!(
        5 => U5, 6 => U6, 7 => U7, 8 => U8, 9 => U9, 10 => U10,
        11 => U11, 12 => U12, 13 => U13, 14 => U14, 15 => U15, 16 => U16,
    );
    Ok(())
}

/// One-shot RC4 over a copy of `data`
pub(crate) fn rc4(key: &[u8], data: &[u8]) -> PDFResult<Vec<u8>> {
    let mut output = data.to_vec();
    keystream(key, &mut output)?;
    Ok(output)
}

/// RC4 encryption provider
#[derive(Debug, Default)]
pub struct RC4Provider;

impl CryptoProvider for RC4Provider {
    fn encrypt(&self, key: &[u8], data: &[u8]) -> PDFResult<Vec<u8>> {
        rc4(key, data)
    }

    fn decrypt(&self, key: &[u8], data: &[u8]) -> PDFResult<Vec<u8>> {
        rc4(key, data)
    }
}
