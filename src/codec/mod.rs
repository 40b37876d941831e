//! Codec
//!
//! Turns domain events into the envelope bytes the event log stores, and
//! back. Kept deliberately thin: a tagged-union `serde` enum round-trips
//! almost for free, so the only real work here is the checksum and the
//! fallback for event types a newer writer recorded that this binary's
//! enum doesn't know about yet.

use serde::{de::DeserializeOwned, Serialize};
use sha2::{Digest, Sha256};

mod error;

pub use error::CodecError;

/// A decoded event, or the raw carrier for one this binary doesn't
/// recognize. Replaying a `Generic` variant is a decision for the
/// aggregate, not the codec - see `aggregate::replay`.
#[derive(Debug, Clone)]
pub enum Decoded<E> {
    Known(E),
    Generic(GenericEvent),
}

/// Carrier for an event type unknown to this binary's domain enum.
/// Preserves the exact bytes so a future replay (after a deploy that
/// knows the new variant) or a downstream consumer can still make sense
/// of it.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct GenericEvent {
    pub event_type: String,
    pub payload: serde_json::Value,
}

/// Encode a domain event to its storage representation plus a checksum
/// of the encoded bytes.
pub fn encode_event<E: Serialize>(event: &E) -> Result<(serde_json::Value, String), CodecError> {
    let value = serde_json::to_value(event)?;
    let checksum = checksum_of(&value)?;
    Ok((value, checksum))
}

/// Decode a stored event, verifying the checksum first. Falls back to
/// `Decoded::Generic` when the event's `type` tag isn't one of `E`'s
/// variants instead of failing the whole load - schema evolution across
/// binary versions must not make old streams unreadable.
pub fn decode_event<E: DeserializeOwned>(
    event_type: &str,
    payload: serde_json::Value,
    expected_checksum: &str,
) -> Result<Decoded<E>, CodecError> {
    let actual = checksum_of(&payload)?;
    if actual != expected_checksum {
        return Err(CodecError::ChecksumMismatch {
            expected: expected_checksum.to_string(),
            actual,
        });
    }

    match serde_json::from_value::<E>(payload.clone()) {
        Ok(event) => Ok(Decoded::Known(event)),
        Err(_) => Ok(Decoded::Generic(GenericEvent {
            event_type: event_type.to_string(),
            payload,
        })),
    }
}

/// Encode an arbitrary metadata bag (correlation/causation ids, tenant,
/// client info, ...) to JSON. Metadata never participates in the
/// checksum - it's context about the event, not the event itself.
pub fn encode_metadata<M: Serialize>(metadata: &M) -> Result<serde_json::Value, CodecError> {
    Ok(serde_json::to_value(metadata)?)
}

pub fn decode_metadata<M: DeserializeOwned>(value: serde_json::Value) -> Result<M, CodecError> {
    Ok(serde_json::from_value(value)?)
}

/// SHA-256 checksum of a JSON value's canonical (serde_json's stable,
/// sorted-by-insertion) serialization, as 64 lowercase hex digits.
pub fn checksum(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    hex::encode(digest)
}

fn checksum_of(value: &serde_json::Value) -> Result<String, CodecError> {
    let bytes = serde_json::to_vec(value)?;
    Ok(checksum(&bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    #[serde(tag = "type")]
    enum TestEvent {
        Foo { n: i32 },
    }

    #[test]
    fn round_trips_known_event() {
        let event = TestEvent::Foo { n: 42 };
        let (payload, checksum) = encode_event(&event).unwrap();
        let decoded: Decoded<TestEvent> = decode_event("Foo", payload, &checksum).unwrap();
        match decoded {
            Decoded::Known(TestEvent::Foo { n }) => assert_eq!(n, 42),
            _ => panic!("expected known variant"),
        }
    }

    #[test]
    fn falls_back_to_generic_for_unknown_type() {
        let payload = serde_json::json!({"type": "SomethingNewer", "x": 1});
        let checksum = checksum_of(&payload).unwrap();
        let decoded: Decoded<TestEvent> = decode_event("SomethingNewer", payload, &checksum).unwrap();
        match decoded {
            Decoded::Generic(g) => assert_eq!(g.event_type, "SomethingNewer"),
            _ => panic!("expected generic carrier"),
        }
    }

    #[test]
    fn rejects_tampered_payload() {
        let event = TestEvent::Foo { n: 1 };
        let (payload, checksum) = encode_event(&event).unwrap();
        let tampered = serde_json::json!({"type": "Foo", "n": 2});
        let result: Result<Decoded<TestEvent>, _> = decode_event("Foo", tampered, &checksum);
        assert!(matches!(result, Err(CodecError::ChecksumMismatch { .. })));
        let _ = payload;
    }
}
