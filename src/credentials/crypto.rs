//! Envelope encryption for cached OAuth tokens.
//!
//! Uses:
//! - ChaCha20-Poly1305 for the payload, under a fresh key per save
//! - RSA-OAEP (SHA-256 digest and MGF1) to wrap that key for the deployment
//!
//! Sealed payload layout:
//! `version(1) || created_at(8, BE unix secs) || nonce(12) || ciphertext+tag`.
//! The version byte and timestamp are bound as associated data.
//!
//! Wrapped key layout:
//! `fingerprint(8) || oaep(key) || checksum(8)`. The fingerprint names the
//! public key that wrapped it; the checksum covers everything before it.

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Key, Nonce,
};
use chrono::Utc;
use rand::{rngs::OsRng, RngCore};
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};
use std::time::Duration;
use thiserror::Error;
use zeroize::Zeroizing;

const SEALED_VERSION: u8 = 0x01;
const HEADER_LEN: usize = 1 + 8;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const KEY_LEN: usize = 32;
const FINGERPRINT_LEN: usize = 8;
const CHECKSUM_LEN: usize = 8;

/// Cryptographic errors
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Wrapped key was produced for a different key pair")]
    KeyMismatch,

    #[error("Integrity check failed - ciphertext or wrapped key is corrupt")]
    IntegrityError,

    #[error("Sealed payload is older than the allowed freshness window")]
    PayloadExpired,

    #[error("Invalid key material: {0}")]
    InvalidKey(String),

    #[error("RSA operation failed: {0}")]
    Rsa(#[from] rsa::Error),
}

/// Result type for crypto operations
pub type CryptoResult<T> = Result<T, CryptoError>;

/// The two ciphertexts persisted for one saved secret.
#[derive(Clone, PartialEq, Eq)]
pub struct Envelope {
    pub ciphertext: Vec<u8>,
    pub wrapped_key: Vec<u8>,
}

impl std::fmt::Debug for Envelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Envelope")
            .field("ciphertext_len", &self.ciphertext.len())
            .field("wrapped_key_len", &self.wrapped_key.len())
            .finish()
    }
}

/// Single-use symmetric key. Zeroized on drop.
struct SealingKey(Zeroizing<[u8; KEY_LEN]>);

impl SealingKey {
    fn generate() -> Self {
        let mut key = Zeroizing::new([0u8; KEY_LEN]);
        OsRng.fill_bytes(&mut key[..]);
        Self(key)
    }

    fn from_slice(bytes: &[u8]) -> CryptoResult<Self> {
        if bytes.len() != KEY_LEN {
            return Err(CryptoError::IntegrityError);
        }
        let mut key = Zeroizing::new([0u8; KEY_LEN]);
        key.copy_from_slice(bytes);
        Ok(Self(key))
    }

    fn cipher(&self) -> ChaCha20Poly1305 {
        ChaCha20Poly1305::new(Key::from_slice(&self.0[..]))
    }

    fn seal(&self, plaintext: &[u8], created_at: u64) -> CryptoResult<Vec<u8>> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);

        let mut sealed = Vec::with_capacity(HEADER_LEN + NONCE_LEN + plaintext.len() + TAG_LEN);
        sealed.push(SEALED_VERSION);
        sealed.extend_from_slice(&created_at.to_be_bytes());

        let ciphertext = self
            .cipher()
            .encrypt(
                Nonce::from_slice(&nonce_bytes),
                Payload {
                    msg: plaintext,
                    aad: &sealed[..HEADER_LEN],
                },
            )
            .map_err(|_| CryptoError::IntegrityError)?;

        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    fn open(&self, sealed: &[u8], max_age: Option<Duration>, now: u64) -> CryptoResult<Vec<u8>> {
        if sealed.len() < HEADER_LEN + NONCE_LEN + TAG_LEN || sealed[0] != SEALED_VERSION {
            return Err(CryptoError::IntegrityError);
        }

        let (header, rest) = sealed.split_at(HEADER_LEN);
        let (nonce, ciphertext) = rest.split_at(NONCE_LEN);

        let plaintext = self
            .cipher()
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: ciphertext,
                    aad: header,
                },
            )
            .map_err(|_| CryptoError::IntegrityError)?;

        // Freshness is only meaningful once the timestamp is authenticated.
        if let Some(max_age) = max_age {
            let mut ts = [0u8; 8];
            ts.copy_from_slice(&header[1..HEADER_LEN]);
            let created_at = u64::from_be_bytes(ts);
            if now.saturating_sub(created_at) > max_age.as_secs() {
                return Err(CryptoError::PayloadExpired);
            }
        }

        Ok(plaintext)
    }
}

fn unix_now() -> u64 {
    u64::try_from(Utc::now().timestamp()).unwrap_or(0)
}

fn fingerprint_of(public: &RsaPublicKey) -> CryptoResult<[u8; FINGERPRINT_LEN]> {
    let der = public
        .to_public_key_der()
        .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
    Ok(truncated_sha256(der.as_bytes()))
}

fn truncated_sha256(bytes: &[u8]) -> [u8; 8] {
    let digest = Sha256::digest(bytes);
    let mut out = [0u8; 8];
    out.copy_from_slice(&digest[..8]);
    out
}

fn oaep() -> Oaep {
    Oaep::new::<Sha256>()
}

/// Public half of the deployment key pair. Used for wrapping.
#[derive(Clone)]
pub struct PublicKey {
    key: RsaPublicKey,
    fingerprint: [u8; FINGERPRINT_LEN],
}

impl PublicKey {
    pub fn from_pem(pem: &str) -> CryptoResult<Self> {
        let key = RsaPublicKey::from_public_key_pem(pem)
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        Self::from_rsa(key)
    }

    fn from_rsa(key: RsaPublicKey) -> CryptoResult<Self> {
        let fingerprint = fingerprint_of(&key)?;
        Ok(Self { key, fingerprint })
    }

    pub fn to_pem(&self) -> CryptoResult<String> {
        self.key
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))
    }

    /// Short hex identifier, safe to log.
    pub fn fingerprint_hex(&self) -> String {
        self.fingerprint.iter().map(|b| format!("{:02x}", b)).collect()
    }
}

impl std::fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublicKey")
            .field("fingerprint", &self.fingerprint_hex())
            .finish()
    }
}

/// Private half of the deployment key pair. Used for unwrapping.
pub struct PrivateKey {
    key: RsaPrivateKey,
    fingerprint: [u8; FINGERPRINT_LEN],
}

impl PrivateKey {
    /// Parse a PKCS#8 PEM, falling back to PKCS#1 ("RSA PRIVATE KEY").
    pub fn from_pem(pem: &str) -> CryptoResult<Self> {
        let key = RsaPrivateKey::from_pkcs8_pem(pem)
            .or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem))
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        Self::from_rsa(key)
    }

    fn from_rsa(key: RsaPrivateKey) -> CryptoResult<Self> {
        let fingerprint = fingerprint_of(&RsaPublicKey::from(&key))?;
        Ok(Self { key, fingerprint })
    }

    pub fn to_pem(&self) -> CryptoResult<Zeroizing<String>> {
        self.key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))
    }
}

impl std::fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrivateKey").finish_non_exhaustive()
    }
}

/// The long-lived asymmetric key pair for the whole deployment.
#[derive(Debug)]
pub struct KeyPair {
    public: PublicKey,
    private: PrivateKey,
}

impl KeyPair {
    /// Generate a new key pair. Production deployments use 3072 bits.
    pub fn generate(bits: usize) -> CryptoResult<Self> {
        let key = RsaPrivateKey::new(&mut OsRng, bits)?;
        let public = PublicKey::from_rsa(RsaPublicKey::from(&key))?;
        let private = PrivateKey::from_rsa(key)?;
        Ok(Self { public, private })
    }

    /// Build from a private key PEM, deriving the public half.
    pub fn from_private_pem(pem: &str) -> CryptoResult<Self> {
        let private = PrivateKey::from_pem(pem)?;
        let public = PublicKey::from_rsa(RsaPublicKey::from(&private.key))?;
        Ok(Self { public, private })
    }

    /// Build from both halves, rejecting halves that do not belong together.
    pub fn from_pems(private_pem: &str, public_pem: &str) -> CryptoResult<Self> {
        let private = PrivateKey::from_pem(private_pem)?;
        let public = PublicKey::from_pem(public_pem)?;
        if public.fingerprint != private.fingerprint {
            return Err(CryptoError::KeyMismatch);
        }
        Ok(Self { public, private })
    }

    pub fn public(&self) -> &PublicKey {
        &self.public
    }

    pub fn private(&self) -> &PrivateKey {
        &self.private
    }
}

/// Encrypt `payload` under a fresh symmetric key and wrap that key with
/// `public`. Both outputs must be persisted together.
pub fn wrap(payload: &[u8], public: &PublicKey) -> CryptoResult<Envelope> {
    let key = SealingKey::generate();
    let ciphertext = key.seal(payload, unix_now())?;

    let oaep_ct = public.key.encrypt(&mut OsRng, oaep(), &key.0[..])?;

    let mut wrapped_key = Vec::with_capacity(FINGERPRINT_LEN + oaep_ct.len() + CHECKSUM_LEN);
    wrapped_key.extend_from_slice(&public.fingerprint);
    wrapped_key.extend_from_slice(&oaep_ct);
    let checksum = truncated_sha256(&wrapped_key);
    wrapped_key.extend_from_slice(&checksum);

    Ok(Envelope {
        ciphertext,
        wrapped_key,
    })
}

/// Reverse [`wrap`]. Never returns data that failed authentication.
pub fn unwrap(envelope: &Envelope, private: &PrivateKey) -> CryptoResult<Vec<u8>> {
    unwrap_fresh(envelope, private, None)
}

/// Like [`unwrap`], additionally rejecting payloads sealed more than
/// `max_age` ago with [`CryptoError::PayloadExpired`].
pub fn unwrap_fresh(
    envelope: &Envelope,
    private: &PrivateKey,
    max_age: Option<Duration>,
) -> CryptoResult<Vec<u8>> {
    let key = unwrap_key(&envelope.wrapped_key, private)?;
    key.open(&envelope.ciphertext, max_age, unix_now())
}

fn unwrap_key(wrapped: &[u8], private: &PrivateKey) -> CryptoResult<SealingKey> {
    if wrapped.len() <= FINGERPRINT_LEN + CHECKSUM_LEN {
        return Err(CryptoError::IntegrityError);
    }

    let (body, checksum) = wrapped.split_at(wrapped.len() - CHECKSUM_LEN);
    if truncated_sha256(body) != checksum {
        return Err(CryptoError::IntegrityError);
    }

    let (fingerprint, oaep_ct) = body.split_at(FINGERPRINT_LEN);
    if fingerprint != private.fingerprint {
        return Err(CryptoError::KeyMismatch);
    }

    let key_bytes = Zeroizing::new(
        private
            .key
            .decrypt(oaep(), oaep_ct)
            .map_err(|_| CryptoError::IntegrityError)?,
    );
    SealingKey::from_slice(&key_bytes)
}
