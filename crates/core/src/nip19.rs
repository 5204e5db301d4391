//! bech32 encoding of keys and event ids (NIP-19).
//!
//! Three bare entity kinds, each wrapping exactly 32 bytes: `npub`
//! (public key), `nsec` (secret key) and `note` (event id). The codec
//! is payload-agnostic: it does not check that a decoded secret key is
//! a valid scalar, only that the string is well-formed bech32 with the
//! right prefix and length. Wire-format fields stay hex; these strings
//! are for display and user input only.

use bech32::primitives::decode::{CheckedHrpstring, CheckedHrpstringError};
use bech32::{Bech32, Hrp};
use thiserror::Error;

const NPUB_HRP: Hrp = Hrp::parse_unchecked("npub");
const NSEC_HRP: Hrp = Hrp::parse_unchecked("nsec");
const NOTE_HRP: Hrp = Hrp::parse_unchecked("note");

/// Errors that can occur while encoding or decoding bech32 entities.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Nip19Error {
    /// The string is not syntactically valid bech32.
    #[error("malformed bech32 string: {0}")]
    Format(String),

    /// The string parses but its checksum does not verify.
    #[error("bech32 checksum mismatch: {0}")]
    Checksum(String),

    /// The string carries a different prefix than the caller expected.
    #[error("wrong bech32 prefix: expected {expected}, got {got}")]
    InvalidHrp { expected: String, got: String },

    /// The decoded payload is not 32 bytes.
    #[error("bech32 payload must be 32 bytes, got {0}")]
    InvalidLength(usize),
}

fn encode(hrp: Hrp, data: &[u8; 32]) -> Result<String, Nip19Error> {
    bech32::encode::<Bech32>(hrp, data).map_err(|e| Nip19Error::Format(e.to_string()))
}

/// Encode a 32-byte public key as an `npub` string.
pub fn encode_npub(public_key: &[u8; 32]) -> Result<String, Nip19Error> {
    encode(NPUB_HRP, public_key)
}

/// Encode a 32-byte secret key as an `nsec` string.
pub fn encode_nsec(secret_key: &[u8; 32]) -> Result<String, Nip19Error> {
    encode(NSEC_HRP, secret_key)
}

/// Encode a 32-byte event id as a `note` string.
pub fn encode_note(event_id: &[u8; 32]) -> Result<String, Nip19Error> {
    encode(NOTE_HRP, event_id)
}

fn decode_checked(s: &str) -> Result<(String, Vec<u8>), Nip19Error> {
    let checked = CheckedHrpstring::new::<Bech32>(s).map_err(|e| match e {
        CheckedHrpstringError::Checksum(err) => Nip19Error::Checksum(err.to_string()),
        other => Nip19Error::Format(other.to_string()),
    })?;
    // Spare bits in the final field element must be zero. Despite the
    // name this is the crate's generic zero-padding check, not a
    // segwit-only rule.
    checked
        .validate_segwit_padding()
        .map_err(|e| Nip19Error::Format(e.to_string()))?;
    let hrp = checked.hrp().to_string().to_lowercase();
    let data = checked.byte_iter().collect();
    Ok((hrp, data))
}

fn expect_32_bytes(data: Vec<u8>) -> Result<[u8; 32], Nip19Error> {
    let len = data.len();
    <[u8; 32]>::try_from(data).map_err(|_| Nip19Error::InvalidLength(len))
}

fn decode_with_hrp(s: &str, expected: &str) -> Result<[u8; 32], Nip19Error> {
    let (hrp, data) = decode_checked(s)?;
    if hrp != expected {
        return Err(Nip19Error::InvalidHrp {
            expected: expected.to_string(),
            got: hrp,
        });
    }
    expect_32_bytes(data)
}

/// Decode an `npub` string into a 32-byte public key.
pub fn decode_npub(npub: &str) -> Result<[u8; 32], Nip19Error> {
    decode_with_hrp(npub, "npub")
}

/// Decode an `nsec` string into a 32-byte secret key.
pub fn decode_nsec(nsec: &str) -> Result<[u8; 32], Nip19Error> {
    decode_with_hrp(nsec, "nsec")
}

/// Decode a `note` string into a 32-byte event id.
pub fn decode_note(note: &str) -> Result<[u8; 32], Nip19Error> {
    decode_with_hrp(note, "note")
}

/// A decoded bech32 entity, tagged by its prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Nip19Entity {
    PublicKey([u8; 32]),
    SecretKey([u8; 32]),
    EventId([u8; 32]),
}

/// Decode any supported bech32 entity, dispatching on its prefix.
pub fn decode(s: &str) -> Result<Nip19Entity, Nip19Error> {
    let (hrp, data) = decode_checked(s)?;
    match hrp.as_str() {
        "npub" => Ok(Nip19Entity::PublicKey(expect_32_bytes(data)?)),
        "nsec" => Ok(Nip19Entity::SecretKey(expect_32_bytes(data)?)),
        "note" => Ok(Nip19Entity::EventId(expect_32_bytes(data)?)),
        other => Err(Nip19Error::InvalidHrp {
            expected: "npub, nsec or note".to_string(),
            got: other.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bech32::{ByteIterExt, Fe32, Fe32IterExt};
    use proptest::prelude::*;

    const VECTOR_SECRET_HEX: &str =
        "7f7ff03d123792d6ac594bfa67bf6d0c0ab55b6b1fdb6249303fe861f1ccba9a";
    const VECTOR_PUBLIC_HEX: &str =
        "17162c921dc4d2518f9a101db33695df1afb56ab82f5ff3e5da6eec3ca5cd917";
    const VECTOR_NSEC: &str = "nsec10allq0gjx7fddtzef0ax00mdps9t2kmtrldkyjfs8l5xruwvh2dq0lhhkp";
    const VECTOR_NPUB: &str = "npub1zutzeysacnf9rru6zqwmxd54mud0k44tst6l70ja5mhv8jjumytsd2x7nu";

    fn hex32(s: &str) -> [u8; 32] {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s, &mut bytes).expect("valid test hex");
        bytes
    }

    #[test]
    fn test_encode_nsec_vector() {
        let encoded = encode_nsec(&hex32(VECTOR_SECRET_HEX)).expect("encode");
        assert_eq!(encoded, VECTOR_NSEC);
    }

    #[test]
    fn test_encode_npub_vector() {
        let encoded = encode_npub(&hex32(VECTOR_PUBLIC_HEX)).expect("encode");
        assert_eq!(encoded, VECTOR_NPUB);
    }

    #[test]
    fn test_decode_nsec_vector() {
        let decoded = decode_nsec(VECTOR_NSEC).expect("decode");
        assert_eq!(decoded, hex32(VECTOR_SECRET_HEX));
    }

    #[test]
    fn test_decode_npub_vector() {
        let decoded = decode_npub(VECTOR_NPUB).expect("decode");
        assert_eq!(decoded, hex32(VECTOR_PUBLIC_HEX));
    }

    #[test]
    fn test_note_roundtrip() {
        let id = [0xABu8; 32];
        let encoded = encode_note(&id).expect("encode");
        assert!(encoded.starts_with("note1"));
        assert_eq!(decode_note(&encoded).expect("decode"), id);
    }

    #[test]
    fn test_decode_wrong_hrp() {
        let result = decode_npub(VECTOR_NSEC);
        assert_eq!(
            result,
            Err(Nip19Error::InvalidHrp {
                expected: "npub".to_string(),
                got: "nsec".to_string(),
            })
        );

        let result = decode_nsec(VECTOR_NPUB);
        assert_eq!(
            result,
            Err(Nip19Error::InvalidHrp {
                expected: "nsec".to_string(),
                got: "npub".to_string(),
            })
        );
    }

    #[test]
    fn test_decode_corrupted_checksum() {
        // Flip the final checksum character to another valid bech32 char.
        let mut corrupted = VECTOR_NPUB.to_string();
        corrupted.pop();
        corrupted.push('p');

        assert!(matches!(
            decode_npub(&corrupted),
            Err(Nip19Error::Checksum(_))
        ));
    }

    #[test]
    fn test_decode_corrupted_data() {
        // Flip a data character in the middle of the string.
        let mut chars: Vec<char> = VECTOR_NPUB.chars().collect();
        let mid = chars.len() / 2;
        chars[mid] = if chars[mid] == 'q' { 'p' } else { 'q' };
        let corrupted: String = chars.into_iter().collect();

        assert!(matches!(
            decode_npub(&corrupted),
            Err(Nip19Error::Checksum(_))
        ));
    }

    #[test]
    fn test_decode_missing_separator() {
        assert!(matches!(
            decode_npub("npubqqqqqqqq"),
            Err(Nip19Error::Format(_))
        ));
    }

    #[test]
    fn test_decode_invalid_characters() {
        // 'i' and 'o' are excluded from the bech32 charset.
        assert!(matches!(
            decode_npub("npub1iiiiiiii"),
            Err(Nip19Error::Format(_))
        ));
    }

    #[test]
    fn test_decode_mixed_case_rejected() {
        let mut mixed = VECTOR_NPUB.to_string();
        mixed.replace_range(0..1, "N");
        assert!(matches!(decode_npub(&mixed), Err(Nip19Error::Format(_))));
    }

    #[test]
    fn test_decode_all_uppercase_accepted() {
        let upper = VECTOR_NPUB.to_uppercase();
        let decoded = decode_npub(&upper).expect("decode");
        assert_eq!(decoded, hex32(VECTOR_PUBLIC_HEX));
    }

    #[test]
    fn test_decode_wrong_payload_length() {
        let hrp = Hrp::parse("npub").expect("valid hrp");
        let short = bech32::encode::<Bech32>(hrp, &[0u8; 20]).expect("encode");
        assert_eq!(decode_npub(&short), Err(Nip19Error::InvalidLength(20)));
    }

    #[test]
    fn test_decode_nonzero_padding_rejected() {
        // 32 bytes span 52 field elements with four spare padding bits
        // in the last one. Set one and recompute a valid checksum.
        let payload = [0x42u8; 32];
        let mut fes: Vec<Fe32> = payload.iter().copied().bytes_to_fes().collect();
        let last = fes.pop().expect("payload is non-empty");
        fes.push(Fe32::try_from(last.to_u8() | 0x01).expect("still a field element"));
        let dirty: String = fes
            .into_iter()
            .with_checksum::<Bech32>(&NPUB_HRP)
            .chars()
            .collect();

        assert!(matches!(decode_npub(&dirty), Err(Nip19Error::Format(_))));

        // The same construction with the padding bits left at zero is
        // exactly what encode_npub produces.
        let clean: String = payload
            .iter()
            .copied()
            .bytes_to_fes()
            .with_checksum::<Bech32>(&NPUB_HRP)
            .chars()
            .collect();
        assert_eq!(clean, encode_npub(&payload).expect("encode"));
        assert_eq!(decode_npub(&clean).expect("decode"), payload);
    }

    #[test]
    fn test_decode_entity_dispatch() {
        assert_eq!(
            decode(VECTOR_NPUB).expect("decode"),
            Nip19Entity::PublicKey(hex32(VECTOR_PUBLIC_HEX))
        );
        assert_eq!(
            decode(VECTOR_NSEC).expect("decode"),
            Nip19Entity::SecretKey(hex32(VECTOR_SECRET_HEX))
        );

        let note = encode_note(&[0x01u8; 32]).expect("encode");
        assert_eq!(
            decode(&note).expect("decode"),
            Nip19Entity::EventId([0x01u8; 32])
        );
    }

    #[test]
    fn test_decode_entity_unknown_prefix() {
        let hrp = Hrp::parse("nevent").expect("valid hrp");
        let encoded = bech32::encode::<Bech32>(hrp, &[0u8; 32]).expect("encode");

        assert_eq!(
            decode(&encoded),
            Err(Nip19Error::InvalidHrp {
                expected: "npub, nsec or note".to_string(),
                got: "nevent".to_string(),
            })
        );
    }

    proptest! {
        #[test]
        fn prop_npub_roundtrip(bytes in prop::array::uniform32(any::<u8>())) {
            let encoded = encode_npub(&bytes).expect("encode");
            prop_assert_eq!(decode_npub(&encoded).expect("decode"), bytes);
        }

        #[test]
        fn prop_nsec_roundtrip(bytes in prop::array::uniform32(any::<u8>())) {
            let encoded = encode_nsec(&bytes).expect("encode");
            prop_assert_eq!(decode_nsec(&encoded).expect("decode"), bytes);
        }

        #[test]
        fn prop_note_roundtrip(bytes in prop::array::uniform32(any::<u8>())) {
            let encoded = encode_note(&bytes).expect("encode");
            prop_assert_eq!(decode_note(&encoded).expect("decode"), bytes);
        }
    }
}
