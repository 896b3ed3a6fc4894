//! Per-peer key management with session rotation.
//!
//! Each paired peer has one persisted master key, generated on first use and
//! never transmitted. Session keys are derived from the master key with a
//! random salt and rotated once a usage count or age threshold is crossed.
//! Rotation is transparent to callers: one file transfer pins the session it
//! started with, so encrypt and decrypt always observe a single current key.
//!
//! All access to the per-peer session table goes through one mutex, making
//! rotation atomic with respect to concurrent derivations for the same peer.

use crate::aead::SessionKey;
use crate::error::CryptoError;
use crate::kdf;
use crate::store::KeyStore;
use rand::rngs::OsRng;
use rand_core::RngCore;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Master key length in bytes.
pub const MASTER_KEY_LEN: usize = 32;

/// Session salt length in bytes.
pub const SESSION_SALT_LEN: usize = 16;

/// When a session key is retired and a fresh one derived.
#[derive(Debug, Clone, Copy)]
pub struct RotationPolicy {
    /// Maximum number of uses before rotation.
    pub max_uses: u64,
    /// Maximum session age before rotation.
    pub max_age: Duration,
}

impl Default for RotationPolicy {
    fn default() -> Self {
        Self {
            max_uses: 100_000,
            max_age: Duration::from_secs(60 * 60),
        }
    }
}

struct PeerSession {
    salt: [u8; SESSION_SALT_LEN],
    key: SessionKey,
    uses: u64,
    created: Instant,
}

/// Manages per-peer master keys and derived session keys.
pub struct KeyManager {
    store: Arc<dyn KeyStore>,
    sessions: Mutex<HashMap<String, PeerSession>>,
    policy: RotationPolicy,
}

impl KeyManager {
    /// Create a manager over the given store with the default rotation policy.
    pub fn new(store: Arc<dyn KeyStore>) -> Self {
        Self::with_policy(store, RotationPolicy::default())
    }

    /// Create a manager with an explicit rotation policy.
    pub fn with_policy(store: Arc<dyn KeyStore>, policy: RotationPolicy) -> Self {
        Self {
            store,
            sessions: Mutex::new(HashMap::new()),
            policy,
        }
    }

    /// Fetch the persisted master key for `peer`, generating and storing a
    /// fresh one on first use.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::Store` on persistence failure.
    pub async fn master_key(&self, peer: &str) -> Result<[u8; MASTER_KEY_LEN], CryptoError> {
        let identifier = format!("master-{peer}");
        if let Some(bytes) = self.store.get(&identifier).await? {
            if bytes.len() != MASTER_KEY_LEN {
                return Err(CryptoError::InvalidKeyLength {
                    expected: MASTER_KEY_LEN,
                    actual: bytes.len(),
                });
            }
            let mut key = [0u8; MASTER_KEY_LEN];
            key.copy_from_slice(&bytes);
            return Ok(key);
        }

        let mut key = [0u8; MASTER_KEY_LEN];
        OsRng.fill_bytes(&mut key);
        self.store.set(&identifier, &key).await?;
        tracing::debug!(peer, "generated master key");
        Ok(key)
    }

    /// Replace the master key for `peer` with one provisioned out of band,
    /// dropping any derived session so the next transfer re-keys.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::Store` on persistence failure.
    pub async fn import_master_key(
        &self,
        peer: &str,
        key: [u8; MASTER_KEY_LEN],
    ) -> Result<(), CryptoError> {
        self.store.set(&format!("master-{peer}"), &key).await?;
        self.sessions.lock().await.remove(peer);
        tracing::debug!(peer, "imported master key");
        Ok(())
    }

    /// Current session salt and key for `peer`, rotating if thresholds were
    /// crossed. Each call counts as one use.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError` on store or derivation failure.
    pub async fn current_session(
        &self,
        peer: &str,
    ) -> Result<([u8; SESSION_SALT_LEN], SessionKey), CryptoError> {
        let master = self.master_key(peer).await?;
        let mut sessions = self.sessions.lock().await;

        let rotate = match sessions.get(peer) {
            Some(s) => s.uses >= self.policy.max_uses || s.created.elapsed() >= self.policy.max_age,
            None => true,
        };

        if rotate {
            let mut salt = [0u8; SESSION_SALT_LEN];
            OsRng.fill_bytes(&mut salt);
            let key = kdf::derive_session_key(&master, &salt)?;
            tracing::debug!(peer, "rotated session key");
            sessions.insert(
                peer.to_owned(),
                PeerSession {
                    salt,
                    key,
                    uses: 0,
                    created: Instant::now(),
                },
            );
        }

        let session = sessions
            .get_mut(peer)
            .ok_or_else(|| CryptoError::Derivation("session vanished during rotation".into()))?;
        session.uses += 1;
        Ok((session.salt, session.key.clone()))
    }

    /// Derive the session key for a known salt (receiver path, resume path).
    ///
    /// # Errors
    ///
    /// Returns `CryptoError` on store or derivation failure.
    pub async fn session_key_for(
        &self,
        peer: &str,
        salt: &[u8; SESSION_SALT_LEN],
    ) -> Result<SessionKey, CryptoError> {
        let master = self.master_key(peer).await?;
        kdf::derive_session_key(&master, salt)
    }

    /// Derive the streaming HMAC key for a known salt.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError` on store or derivation failure.
    pub async fn stream_hmac_key_for(
        &self,
        peer: &str,
        salt: &[u8; SESSION_SALT_LEN],
    ) -> Result<[u8; 32], CryptoError> {
        let master = self.master_key(peer).await?;
        kdf::derive_stream_hmac_key(&master, salt)
    }

    /// Derive the streaming nonce salt for a known session salt.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError` on store or derivation failure.
    pub async fn stream_nonce_salt_for(
        &self,
        peer: &str,
        salt: &[u8; SESSION_SALT_LEN],
    ) -> Result<[u8; 4], CryptoError> {
        let master = self.master_key(peer).await?;
        kdf::derive_stream_nonce_salt(&master, salt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryKeyStore;

    fn manager_with_policy(policy: RotationPolicy) -> KeyManager {
        KeyManager::with_policy(Arc::new(MemoryKeyStore::new()), policy)
    }

    #[tokio::test]
    async fn master_key_persists_across_calls() {
        let manager = KeyManager::new(Arc::new(MemoryKeyStore::new()));
        let k1 = manager.master_key("peer-a").await.unwrap();
        let k2 = manager.master_key("peer-a").await.unwrap();
        assert_eq!(k1, k2);
    }

    #[tokio::test]
    async fn distinct_peers_get_distinct_masters() {
        let manager = KeyManager::new(Arc::new(MemoryKeyStore::new()));
        let a = manager.master_key("peer-a").await.unwrap();
        let b = manager.master_key("peer-b").await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn session_stable_below_thresholds() {
        let manager = manager_with_policy(RotationPolicy {
            max_uses: 100,
            max_age: Duration::from_secs(3600),
        });
        let (salt1, key1) = manager.current_session("peer-a").await.unwrap();
        let (salt2, key2) = manager.current_session("peer-a").await.unwrap();
        assert_eq!(salt1, salt2);
        assert_eq!(key1.as_bytes(), key2.as_bytes());
    }

    #[tokio::test]
    async fn session_rotates_after_max_uses() {
        let manager = manager_with_policy(RotationPolicy {
            max_uses: 2,
            max_age: Duration::from_secs(3600),
        });
        let (salt1, _) = manager.current_session("peer-a").await.unwrap();
        let (salt2, _) = manager.current_session("peer-a").await.unwrap();
        assert_eq!(salt1, salt2);
        // Third call crosses the usage threshold and rotates.
        let (salt3, _) = manager.current_session("peer-a").await.unwrap();
        assert_ne!(salt1, salt3);
    }

    #[tokio::test]
    async fn receiver_derives_matching_key_from_salt() {
        let store = Arc::new(MemoryKeyStore::new());
        let sender = KeyManager::new(Arc::clone(&store) as Arc<dyn KeyStore>);
        let receiver = KeyManager::new(store as Arc<dyn KeyStore>);

        let (salt, key) = sender.current_session("peer-a").await.unwrap();
        let derived = receiver.session_key_for("peer-a", &salt).await.unwrap();
        assert_eq!(key.as_bytes(), derived.as_bytes());
    }

    #[tokio::test]
    async fn imported_master_key_replaces_generated_one() {
        let manager = KeyManager::new(Arc::new(MemoryKeyStore::new()));
        let generated = manager.master_key("peer-a").await.unwrap();
        let provisioned = [0x42u8; MASTER_KEY_LEN];
        manager.import_master_key("peer-a", provisioned).await.unwrap();
        assert_ne!(generated, provisioned);
        assert_eq!(manager.master_key("peer-a").await.unwrap(), provisioned);
    }

    #[tokio::test]
    async fn bad_master_length_rejected() {
        let store = Arc::new(MemoryKeyStore::new());
        store.set("master-peer-a", &[0u8; 16]).await.unwrap();
        let manager = KeyManager::new(store as Arc<dyn KeyStore>);
        assert!(matches!(
            manager.master_key("peer-a").await,
            Err(CryptoError::InvalidKeyLength { .. })
        ));
    }
}
