use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, AeadCore, KeyInit, OsRng},
};
use thiserror::Error;

const NONCE_LEN: usize = 12;

#[derive(Error, Debug)]
pub enum CipherError {
    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),
    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),
    #[error("Encryption key must be 32 bytes (256 bits) long")]
    InvalidKeyLength,
    #[error("Invalid hex key: {0}")]
    InvalidHexKey(#[from] hex::FromHexError),
}

/// Seals notification channel settings (SMTP passwords, webhook URLs)
/// before they are written to the database. AES-256-GCM.
pub struct ChannelCipher {
    cipher: Aes256Gcm,
}

impl ChannelCipher {
    pub fn new(key: &[u8]) -> Result<Self, CipherError> {
        let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| CipherError::InvalidKeyLength)?;
        Ok(Self { cipher })
    }

    /// Builds a cipher from a hex-encoded 32-byte key as found in config.
    pub fn from_hex(key_hex: &str) -> Result<Self, CipherError> {
        let key = hex::decode(key_hex.trim())?;
        Self::new(&key)
    }

    /// Output layout: 12-byte nonce followed by the ciphertext.
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, CipherError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext)
            .map_err(|e| CipherError::EncryptionFailed(e.to_string()))?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    pub fn open(&self, sealed: &[u8]) -> Result<Vec<u8>, CipherError> {
        if sealed.len() < NONCE_LEN {
            return Err(CipherError::DecryptionFailed(
                "sealed data is shorter than a nonce".to_string(),
            ));
        }
        let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_LEN);
        self.cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|e| CipherError::DecryptionFailed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";
    const OTHER_KEY: &str = "f1e1d1c1b1a191817161514131211101f0e0d0c0b0a090807060504030201000";

    #[test]
    fn seal_then_open_returns_plaintext() {
        let cipher = ChannelCipher::from_hex(KEY).unwrap();
        let sealed = cipher.seal(b"smtp-password").unwrap();

        assert_ne!(&sealed[NONCE_LEN..], b"smtp-password");
        assert_eq!(cipher.open(&sealed).unwrap(), b"smtp-password");
    }

    #[test]
    fn nonces_differ_between_seals() {
        let cipher = ChannelCipher::from_hex(KEY).unwrap();
        let a = cipher.seal(b"same").unwrap();
        let b = cipher.seal(b"same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn open_with_wrong_key_fails() {
        let sealed = ChannelCipher::from_hex(KEY).unwrap().seal(b"secret").unwrap();
        let result = ChannelCipher::from_hex(OTHER_KEY).unwrap().open(&sealed);
        assert!(matches!(result, Err(CipherError::DecryptionFailed(_))));
    }

    #[test]
    fn bad_keys_are_rejected() {
        assert!(matches!(
            ChannelCipher::from_hex("1234"),
            Err(CipherError::InvalidKeyLength)
        ));
        assert!(matches!(
            ChannelCipher::from_hex("not-a-hex-string"),
            Err(CipherError::InvalidHexKey(_))
        ));
    }

    #[test]
    fn truncated_input_is_rejected() {
        let cipher = ChannelCipher::from_hex(KEY).unwrap();
        assert!(matches!(
            cipher.open(&[0u8; 4]),
            Err(CipherError::DecryptionFailed(_))
        ));
    }
}
