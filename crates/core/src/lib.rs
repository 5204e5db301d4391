//! Core protocol types and crypto for relaykit.
//!
//! This crate provides:
//! - Event structure, canonical serialization, signing and verification (NIP-01)
//! - Kind classification (regular, replaceable, ephemeral, addressable)
//! - secp256k1 key generation, x-only public key derivation and key storage
//! - bech32-encoded keys and event ids (NIP-19)
//!
//! Everything here is transport-agnostic; relay sessions live in the
//! `relaykit-client` crate.

mod keys;
mod nip01;
mod nip19;

// Keys: generation, derivation, Schnorr signing, storage
pub use keys::{
    KeyError, KeyPair, KeyStore, MemoryKeyStore, generate_secret_key, get_public_key,
    get_public_key_hex, sign_event_id, verify_event_id,
};

// NIP-01: events, signing, verification
pub use nip01::{
    Event, EventTemplate, KIND_CONTACTS, KIND_METADATA, KIND_RECOMMEND_RELAY,
    KIND_SHORT_TEXT_NOTE, KindClassification, Nip01Error, UnsignedEvent, classify_kind,
    finalize_event, get_event_hash, is_addressable_kind, is_ephemeral_kind, is_regular_kind,
    is_replaceable_kind, serialize_event, unix_now, validate_event, validate_unsigned_event,
    verify_event,
};

// NIP-19: bech32-encoded entities
pub use nip19::{
    Nip19Entity, Nip19Error, decode, decode_npub, decode_nsec, decode_note, encode_npub,
    encode_nsec, encode_note,
};
