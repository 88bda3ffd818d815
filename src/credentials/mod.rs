//! Envelope-encrypted storage of delegated Spotify credentials.
//!
//! ## Security Model
//!
//! - One RSA key pair per deployment, loaded at startup
//! - Every save seals the token under a fresh ChaCha20-Poly1305 key
//! - That key is wrapped with RSA-OAEP (SHA-256) and stored next to the
//!   ciphertext; both are replaced together
//! - Corrupt or foreign-key entries are errors, never "no token"
//!
//! ## Usage
//!
//! ```ignore
//! let keys = Arc::new(KeyPair::from_private_pem(&pem)?);
//! let store = Arc::new(SqliteCredentialStore::new(pool.clone()));
//! let cache = CredentialCache::new(store, keys);
//!
//! cache.save_token_to_cache(&principal, &token).await?;
//! let token = cache.get_cached_token(&principal).await?;
//! ```

pub mod cache;
pub mod crypto;
pub mod store;
pub mod token;

pub use cache::CredentialCache;
pub use crypto::{unwrap, unwrap_fresh, wrap, CryptoError, Envelope, KeyPair, PrivateKey, PublicKey};
pub use store::{CredentialStore, MemoryCredentialStore, SqliteCredentialStore};
pub use token::{Principal, Token};
