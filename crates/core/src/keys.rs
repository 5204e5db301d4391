//! Key generation and public-key derivation.
//!
//! Identity is a secp256k1 keypair: a 32-byte secret scalar and the
//! 32-byte x-only coordinate of its public point. All signing uses
//! BIP-340 Schnorr over x-only keys; there is no compressed-key or
//! ECDSA code path.

use secp256k1::{Keypair, Message, Secp256k1, SecretKey, XOnlyPublicKey, schnorr};
use thiserror::Error;

use crate::nip19::{self, Nip19Error};

/// Errors that can occur during key operations.
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("invalid hex: {0}")]
    InvalidHex(String),

    #[error("key store error: {0}")]
    Store(String),
}

/// Generate a random 32-byte secret key.
///
/// The scalar is drawn uniformly from [1, n-1]; out-of-range draws are
/// retried internally by the curve library.
pub fn generate_secret_key() -> [u8; 32] {
    let secret_key = SecretKey::new(&mut rand::thread_rng());
    secret_key.secret_bytes()
}

/// Derive the x-only public key (32 bytes) from a secret key.
///
/// Fails with [`KeyError::InvalidKey`] if the scalar is zero or not
/// below the curve order.
pub fn get_public_key(secret_key: &[u8; 32]) -> Result<[u8; 32], KeyError> {
    let secp = Secp256k1::new();
    let sk =
        SecretKey::from_slice(secret_key).map_err(|e| KeyError::InvalidKey(e.to_string()))?;
    let (xonly, _parity) = sk.x_only_public_key(&secp);
    Ok(xonly.serialize())
}

/// Derive the public key as a lowercase hex string from a secret key.
pub fn get_public_key_hex(secret_key: &[u8; 32]) -> Result<String, KeyError> {
    Ok(hex::encode(get_public_key(secret_key)?))
}

/// Sign a 32-byte event id with BIP-340 Schnorr.
///
/// Deterministic: uses the auxiliary-randomness-free variant, so the
/// same (id, key) pair always yields the same 64-byte signature.
pub fn sign_event_id(event_id: &[u8; 32], secret_key: &[u8; 32]) -> Result<[u8; 64], KeyError> {
    let secp = Secp256k1::new();
    let sk =
        SecretKey::from_slice(secret_key).map_err(|e| KeyError::InvalidKey(e.to_string()))?;
    let keypair = Keypair::from_secret_key(&secp, &sk);
    let message = Message::from_digest(*event_id);
    let sig = secp.sign_schnorr_no_aux_rand(&message, &keypair);
    Ok(sig.serialize())
}

/// Verify a BIP-340 Schnorr signature over a 32-byte event id.
///
/// Returns `false` for any malformed input; never errors. All-zero
/// signatures are rejected outright.
pub fn verify_event_id(event_id: &[u8; 32], sig: &[u8; 64], public_key: &[u8; 32]) -> bool {
    if sig.iter().all(|&b| b == 0) {
        return false;
    }

    let Ok(signature) = schnorr::Signature::from_slice(sig) else {
        return false;
    };
    let Ok(xonly) = XOnlyPublicKey::from_slice(public_key) else {
        return false;
    };

    let secp = Secp256k1::verification_only();
    let message = Message::from_digest(*event_id);
    secp.verify_schnorr(&signature, &message, &xonly).is_ok()
}

/// Storage seam for key material.
///
/// Implementations own persistence and encryption-at-rest; the core only
/// moves raw 32-byte secrets through this interface.
pub trait KeyStore: Send + Sync {
    /// Load the stored secret key, if any.
    fn load(&self) -> Result<Option<[u8; 32]>, KeyError>;

    /// Save a secret key, replacing any previous one.
    fn save(&self, secret_key: &[u8; 32]) -> Result<(), KeyError>;
}

/// In-memory [`KeyStore`] with no persistence.
#[derive(Default)]
pub struct MemoryKeyStore {
    secret: std::sync::Mutex<Option<[u8; 32]>>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyStore for MemoryKeyStore {
    fn load(&self) -> Result<Option<[u8; 32]>, KeyError> {
        let guard = self
            .secret
            .lock()
            .map_err(|_| KeyError::Store("key store lock poisoned".to_string()))?;
        Ok(*guard)
    }

    fn save(&self, secret_key: &[u8; 32]) -> Result<(), KeyError> {
        let mut guard = self
            .secret
            .lock()
            .map_err(|_| KeyError::Store("key store lock poisoned".to_string()))?;
        *guard = Some(*secret_key);
        Ok(())
    }
}

/// An identity: a secret key and its derived x-only public key.
#[derive(Clone, PartialEq, Eq)]
pub struct KeyPair {
    secret_key: [u8; 32],
    public_key: [u8; 32],
}

impl KeyPair {
    /// Generate a fresh random keypair.
    pub fn generate() -> Self {
        let secp = Secp256k1::new();
        let (sk, _pk) = secp.generate_keypair(&mut rand::thread_rng());
        let (xonly, _parity) = sk.x_only_public_key(&secp);
        Self {
            secret_key: sk.secret_bytes(),
            public_key: xonly.serialize(),
        }
    }

    /// Build a keypair from raw secret bytes.
    pub fn from_secret_bytes(secret_key: &[u8; 32]) -> Result<Self, KeyError> {
        let public_key = get_public_key(secret_key)?;
        Ok(Self {
            secret_key: *secret_key,
            public_key,
        })
    }

    /// Build a keypair from a 64-character hex secret key.
    pub fn from_secret_hex(secret_hex: &str) -> Result<Self, KeyError> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(secret_hex, &mut bytes)
            .map_err(|e| KeyError::InvalidHex(e.to_string()))?;
        Self::from_secret_bytes(&bytes)
    }

    /// Build a keypair from an `nsec` bech32 string.
    pub fn from_nsec(nsec: &str) -> Result<Self, KeyError> {
        let secret_key =
            nip19::decode_nsec(nsec).map_err(|e| KeyError::InvalidKey(e.to_string()))?;
        Self::from_secret_bytes(&secret_key)
    }

    /// Load the key from the store, or generate and save a fresh one.
    pub fn load_or_generate(store: &dyn KeyStore) -> Result<Self, KeyError> {
        match store.load()? {
            Some(secret_key) => Self::from_secret_bytes(&secret_key),
            None => {
                let pair = Self::generate();
                store.save(pair.secret_bytes())?;
                Ok(pair)
            }
        }
    }

    /// The raw 32-byte secret key.
    pub fn secret_bytes(&self) -> &[u8; 32] {
        &self.secret_key
    }

    /// The raw 32-byte x-only public key.
    pub fn public_bytes(&self) -> &[u8; 32] {
        &self.public_key
    }

    /// The secret key as lowercase hex.
    pub fn secret_hex(&self) -> String {
        hex::encode(self.secret_key)
    }

    /// The public key as lowercase hex.
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public_key)
    }

    /// The public key as an `npub` bech32 string.
    pub fn npub(&self) -> Result<String, Nip19Error> {
        nip19::encode_npub(&self.public_key)
    }

    /// The secret key as an `nsec` bech32 string.
    pub fn nsec(&self) -> Result<String, Nip19Error> {
        nip19::encode_nsec(&self.secret_key)
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &self.public_key_hex())
            .field("secret_key", &"[redacted]")
            .finish()
    }
}
