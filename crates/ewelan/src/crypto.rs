//! Symmetric payload codec for encrypted (non-DIY) devices.
//!
//! The cipher key is the raw MD5 digest of the UTF-8 device key, used
//! directly as an AES-128 key. This matches what the device firmware does on
//! its side and must be preserved bit-exactly for interoperability; it is a
//! compatibility constraint, not a key-derivation recommendation.

use aes::cipher::block_padding::Pkcs7;
use aes::cipher::BlockDecryptMut;
use aes::cipher::BlockEncryptMut;
use aes::cipher::KeyIvInit;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use md5::Digest;
use md5::Md5;
use rand::rng;
use rand::RngCore;

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("Invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Invalid key or IV length")]
    KeyIv,

    #[error("Invalid padding in decrypted payload")]
    Padding,
}

fn derive_key(device_key: &str) -> [u8; 16] {
    Md5::digest(device_key.as_bytes()).into()
}

/// Decrypt a base64 payload from an encrypted device.
pub fn decrypt(data: &str, iv: &str, device_key: &str) -> Result<Vec<u8>, CryptoError> {
    let key = derive_key(device_key);
    let iv = BASE64.decode(iv)?;
    let ciphertext = BASE64.decode(data)?;

    let cipher = Aes128CbcDec::new_from_slices(&key, &iv).map_err(|_| CryptoError::KeyIv)?;
    cipher
        .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext)
        .map_err(|_| CryptoError::Padding)
}

/// Encrypt a payload for an encrypted device, returning base64 ciphertext.
pub fn encrypt(data: &str, iv: &str, device_key: &str) -> Result<String, CryptoError> {
    let key = derive_key(device_key);
    let iv = BASE64.decode(iv)?;

    let cipher = Aes128CbcEnc::new_from_slices(&key, &iv).map_err(|_| CryptoError::KeyIv)?;
    let ciphertext = cipher.encrypt_padded_vec_mut::<Pkcs7>(data.as_bytes());
    Ok(BASE64.encode(ciphertext))
}

/// Generate a fresh base64 IV for an outbound message.
pub fn generate_iv() -> String {
    let mut iv = [0u8; 16];
    rng().fill_bytes(&mut iv);
    BASE64.encode(iv)
}
