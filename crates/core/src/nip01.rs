//! Event model, canonical serialization and signing flow (NIP-01).
//!
//! This module implements the core event structure and operations:
//! - Event structure (id, pubkey, created_at, kind, tags, content, sig)
//! - Canonical serialization for hashing
//! - Event signing with Schnorr signatures
//! - Event verification
//! - Kind classification (regular, replaceable, ephemeral, addressable)

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::keys;

/// Errors that can occur while building or signing events.
#[derive(Debug, Error)]
pub enum Nip01Error {
    #[error("invalid event: {0}")]
    InvalidEvent(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("signing error: {0}")]
    Signing(String),
}

/// A signed event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// 32-bytes lowercase hex-encoded sha256 of the serialized event data
    pub id: String,
    /// 32-bytes lowercase hex-encoded x-only public key of the event creator
    pub pubkey: String,
    /// Unix timestamp in seconds
    pub created_at: u64,
    /// Event kind (integer between 0 and 65535)
    pub kind: u16,
    /// Array of arrays of strings (tags)
    pub tags: Vec<Vec<String>>,
    /// Arbitrary string content
    pub content: String,
    /// 64-bytes lowercase hex Schnorr signature of the id
    pub sig: String,
}

/// An unsigned event (before signing).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsignedEvent {
    /// 32-bytes lowercase hex-encoded x-only public key of the event creator
    pub pubkey: String,
    /// Unix timestamp in seconds
    pub created_at: u64,
    /// Event kind
    pub kind: u16,
    /// Array of arrays of strings (tags)
    pub tags: Vec<Vec<String>>,
    /// Arbitrary string content
    pub content: String,
}

/// A template for creating events, without the pubkey.
///
/// The pubkey is derived from the secret key during signing, so templates
/// don't carry one.
///
/// # Examples
///
/// ```
/// use relaykit_core::{EventTemplate, KIND_SHORT_TEXT_NOTE, unix_now};
///
/// let template = EventTemplate {
///     created_at: unix_now(),
///     kind: KIND_SHORT_TEXT_NOTE,
///     tags: vec![],
///     content: "hello".to_string(),
/// };
/// # let _ = template;
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventTemplate {
    /// Unix timestamp in seconds
    pub created_at: u64,
    /// Event kind
    pub kind: u16,
    /// Array of arrays of strings (tags)
    pub tags: Vec<Vec<String>>,
    /// Arbitrary string content
    pub content: String,
}

/// Event kind classification according to NIP-01.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KindClassification {
    /// Events expected to be stored by relays
    Regular,
    /// Only latest event per pubkey+kind is stored
    Replaceable,
    /// Not expected to be stored by relays
    Ephemeral,
    /// Only latest event per pubkey+kind+d-tag is stored
    Addressable,
    /// Unknown classification
    Unknown,
}

// Standard event kinds
pub const KIND_METADATA: u16 = 0;
pub const KIND_SHORT_TEXT_NOTE: u16 = 1;
pub const KIND_RECOMMEND_RELAY: u16 = 2;
pub const KIND_CONTACTS: u16 = 3;

/// Seconds since the Unix epoch, for `created_at` fields.
///
/// Clocks before the epoch clamp to zero.
pub fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn is_lowercase_hex(s: &str, len: usize) -> bool {
    s.len() == len && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

/// Serialize an unsigned event into its canonical hashing form.
///
/// Format: `[0, pubkey, created_at, kind, tags, content]`, minified JSON
/// with no whitespace between elements.
pub fn serialize_event(event: &UnsignedEvent) -> Result<String, Nip01Error> {
    if !validate_unsigned_event(event) {
        return Err(Nip01Error::InvalidEvent(
            "can't serialize event with wrong or missing properties".to_string(),
        ));
    }

    // Serde encodes the tuple as a JSON array, which is exactly the
    // canonical [0, pubkey, created_at, kind, tags, content] form.
    let serialized = serde_json::to_string(&(
        0,
        &event.pubkey,
        event.created_at,
        event.kind,
        &event.tags,
        &event.content,
    ))
    .map_err(|e| Nip01Error::Serialization(e.to_string()))?;

    Ok(serialized)
}

/// Get the event id: the sha256 of the canonical serialization, as hex.
pub fn get_event_hash(event: &UnsignedEvent) -> Result<String, Nip01Error> {
    let serialized = serialize_event(event)?;
    let hash = Sha256::digest(serialized.as_bytes());
    Ok(hex::encode(hash))
}

/// Validate an unsigned event structure.
///
/// Tags are deliberately unchecked beyond their shape; unknown tags are
/// carried through untouched.
pub fn validate_unsigned_event(event: &UnsignedEvent) -> bool {
    is_lowercase_hex(&event.pubkey, 64)
}

/// Validate a signed event structure (not including signature verification).
pub fn validate_event(event: &Event) -> bool {
    is_lowercase_hex(&event.id, 64)
        && is_lowercase_hex(&event.pubkey, 64)
        && is_lowercase_hex(&event.sig, 128)
}

/// Sign an event template with a secret key, producing a complete signed event.
///
/// Derives the pubkey, computes the id over the canonical serialization,
/// then signs the id. Signing is deterministic, so the same template and
/// key always produce the same event.
pub fn finalize_event(
    template: &EventTemplate,
    secret_key: &[u8; 32],
) -> Result<Event, Nip01Error> {
    let pubkey =
        keys::get_public_key_hex(secret_key).map_err(|e| Nip01Error::Signing(e.to_string()))?;

    let unsigned = UnsignedEvent {
        pubkey: pubkey.clone(),
        created_at: template.created_at,
        kind: template.kind,
        tags: template.tags.clone(),
        content: template.content.clone(),
    };

    let id = get_event_hash(&unsigned)?;

    let mut id_bytes = [0u8; 32];
    hex::decode_to_slice(&id, &mut id_bytes)
        .map_err(|e| Nip01Error::Signing(format!("invalid id hex: {}", e)))?;

    let sig = keys::sign_event_id(&id_bytes, secret_key)
        .map_err(|e| Nip01Error::Signing(e.to_string()))?;

    Ok(Event {
        id,
        pubkey,
        created_at: template.created_at,
        kind: template.kind,
        tags: template.tags.clone(),
        content: template.content.clone(),
        sig: hex::encode(sig),
    })
}

/// Verify an event's id and signature.
///
/// Returns `false` for any malformed, tampered or forged event; never
/// errors. A `true` result means the id matches the canonical
/// serialization and the signature verifies against the pubkey.
pub fn verify_event(event: &Event) -> bool {
    if !validate_event(event) {
        return false;
    }

    let unsigned = UnsignedEvent {
        pubkey: event.pubkey.clone(),
        created_at: event.created_at,
        kind: event.kind,
        tags: event.tags.clone(),
        content: event.content.clone(),
    };

    let Ok(computed_id) = get_event_hash(&unsigned) else {
        return false;
    };
    if computed_id != event.id {
        return false;
    }

    let mut id_bytes = [0u8; 32];
    let mut sig_bytes = [0u8; 64];
    let mut pubkey_bytes = [0u8; 32];
    if hex::decode_to_slice(&event.id, &mut id_bytes).is_err()
        || hex::decode_to_slice(&event.sig, &mut sig_bytes).is_err()
        || hex::decode_to_slice(&event.pubkey, &mut pubkey_bytes).is_err()
    {
        return false;
    }

    keys::verify_event_id(&id_bytes, &sig_bytes, &pubkey_bytes)
}

/// Classify an event kind according to NIP-01 rules.
pub fn classify_kind(kind: u16) -> KindClassification {
    let k = kind as u32;

    if (1000..10000).contains(&k) || (4..45).contains(&k) || k == 1 || k == 2 {
        return KindClassification::Regular;
    }

    if (10000..20000).contains(&k) || k == 0 || k == 3 {
        return KindClassification::Replaceable;
    }

    if (20000..30000).contains(&k) {
        return KindClassification::Ephemeral;
    }

    if (30000..40000).contains(&k) {
        return KindClassification::Addressable;
    }

    KindClassification::Unknown
}

/// Check if a kind is regular.
pub fn is_regular_kind(kind: u16) -> bool {
    matches!(classify_kind(kind), KindClassification::Regular)
}

/// Check if a kind is replaceable.
pub fn is_replaceable_kind(kind: u16) -> bool {
    matches!(classify_kind(kind), KindClassification::Replaceable)
}

/// Check if a kind is ephemeral.
pub fn is_ephemeral_kind(kind: u16) -> bool {
    matches!(classify_kind(kind), KindClassification::Ephemeral)
}

/// Check if a kind is addressable.
pub fn is_addressable_kind(kind: u16) -> bool {
    matches!(classify_kind(kind), KindClassification::Addressable)
}
