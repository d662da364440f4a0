//! §4.1 Crypto envelope: AEAD encryption of chunk bytes and file names, and
//! the two key materials described in §3/§4.1 — the login secret (a salted
//! adaptive hash verified by the server) and the crypto passphrase (a
//! client-derived symmetric key, never sent to the server, whose
//! correctness the server can only confirm via a one-way verifier).

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};

use crate::error::{CoreError, CoreResult};

pub const NONCE_LEN: usize = 12; // 96 bits, per §4.1.
pub const KEY_LEN: usize = 32; // 256-bit derived key; AES's block size (128 bits) is fixed regardless.

/// A derived symmetric key. Held only in memory for the duration of a sync
/// session; never persisted to disk in either plaintext or derived form.
pub struct CryptoKey([u8; KEY_LEN]);

impl CryptoKey {
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        CryptoKey(bytes)
    }

    fn cipher(&self) -> Aes256Gcm {
        Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.0))
    }

    /// `encrypt(plain) -> nonce || ciphertext_with_tag`.
    pub fn encrypt(&self, plain: &[u8]) -> Vec<u8> {
        let cipher = self.cipher();
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let mut sealed = cipher
            .encrypt(&nonce, plain)
            .expect("AES-256-GCM encryption of bounded-size plaintext cannot fail");
        let mut out = Vec::with_capacity(NONCE_LEN + sealed.len());
        out.extend_from_slice(nonce.as_slice());
        out.append(&mut sealed);
        out
    }

    /// `decrypt(blob) -> plain | AuthFailed`.
    pub fn decrypt(&self, blob: &[u8]) -> CoreResult<Vec<u8>> {
        if blob.len() < NONCE_LEN {
            return Err(CoreError::AuthFailed);
        }
        let (nonce_bytes, ciphertext) = blob.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);
        self.cipher()
            .decrypt(nonce, ciphertext)
            .map_err(|_| CoreError::AuthFailed)
    }

    /// `encrypt_name(s) = base64url(encrypt(utf8(s)))`.
    pub fn encrypt_name(&self, name: &str) -> String {
        URL_SAFE_NO_PAD.encode(self.encrypt(name.as_bytes()))
    }

    /// `decrypt_name(encrypt_name(s)) = s`.
    pub fn decrypt_name(&self, ciphertext_name: &str) -> CoreResult<String> {
        let blob = URL_SAFE_NO_PAD
            .decode(ciphertext_name)
            .map_err(|_| CoreError::AuthFailed)?;
        let plain = self.decrypt(&blob)?;
        String::from_utf8(plain).map_err(|_| CoreError::AuthFailed)
    }

    /// Hash-of-the-derived-key, stored server-side as `crypto-verifier` so
    /// the client can confirm a re-entered passphrase reproduces the same
    /// key without ever revealing the key itself.
    pub fn verifier(&self) -> Vec<u8> {
        let argon2 = Argon2::default();
        let salt = SaltString::encode_b64(b"coldstore-crypto-verifier-salt1").expect("valid salt");
        argon2
            .hash_password(&self.0, &salt)
            .expect("argon2 hashing of a fixed-size key cannot fail")
            .hash
            .expect("hash_password always produces a hash")
            .as_bytes()
            .to_vec()
    }
}

/// Derive the crypto key from a user's crypto passphrase and their login
/// salt (reused here rather than a second stored salt, since both values are
/// already per-user and the two key materials are independent by
/// construction — the login hash and the crypto key are computed with
/// different algorithms over different input strings).
pub fn derive_crypto_key(passphrase: &str, login_salt: &str) -> CryptoKey {
    let argon2 = Argon2::default();
    let mut out = [0u8; KEY_LEN];
    argon2
        .hash_password_into(passphrase.as_bytes(), login_salt.as_bytes(), &mut out)
        .expect("argon2 key derivation with a non-empty salt cannot fail");
    CryptoKey::from_bytes(out)
}

/// Generate a fresh random login salt, encoded for storage as a string.
pub fn generate_login_salt() -> String {
    SaltString::generate(&mut OsRng).to_string()
}

/// Hash a login password with Argon2id for storage as `login-verifier`.
pub fn hash_login_password(password: &str, salt: &str) -> CoreResult<Vec<u8>> {
    let argon2 = Argon2::default();
    let salt = SaltString::from_b64(salt).map_err(|e| CoreError::Other(anyhow::anyhow!(e)))?;
    let hash = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| CoreError::Other(anyhow::anyhow!(e)))?;
    Ok(hash.to_string().into_bytes())
}

/// Verify a login password against its stored verifier by recomputing.
pub fn verify_login_password(password: &str, verifier: &[u8]) -> bool {
    let Ok(verifier_str) = std::str::from_utf8(verifier) else {
        return false;
    };
    let Ok(parsed) = PasswordHash::new(verifier_str) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypt_decrypt_round_trips() {
        let key = CryptoKey::from_bytes([7u8; KEY_LEN]);
        let plain = b"hello, zero-knowledge world";
        let blob = key.encrypt(plain);
        assert_eq!(key.decrypt(&blob).unwrap(), plain);
    }

    #[test]
    fn decrypt_rejects_tampered_ciphertext() {
        let key = CryptoKey::from_bytes([3u8; KEY_LEN]);
        let mut blob = key.encrypt(b"some plaintext");
        let last = blob.len() - 1;
        blob[last] ^= 0xFF;
        assert!(matches!(key.decrypt(&blob), Err(CoreError::AuthFailed)));
    }

    #[test]
    fn name_round_trips() {
        let key = CryptoKey::from_bytes([9u8; KEY_LEN]);
        let name = "documents/résumé.pdf";
        let ciphertext = key.encrypt_name(name);
        assert_eq!(key.decrypt_name(&ciphertext).unwrap(), name);
    }

    #[test]
    fn login_password_round_trips() {
        let salt = generate_login_salt();
        let verifier = hash_login_password("hunter2", &salt).unwrap();
        assert!(verify_login_password("hunter2", &verifier));
        assert!(!verify_login_password("wrong", &verifier));
    }

    #[test]
    fn derived_key_is_deterministic_per_passphrase_and_salt() {
        let salt = generate_login_salt();
        let k1 = derive_crypto_key("my passphrase", &salt);
        let k2 = derive_crypto_key("my passphrase", &salt);
        assert_eq!(k1.verifier(), k2.verifier());
        let k3 = derive_crypto_key("a different passphrase", &salt);
        assert_ne!(k1.verifier(), k3.verifier());
    }
}
