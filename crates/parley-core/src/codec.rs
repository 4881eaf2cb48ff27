//! Envelope codec: cleartext or sealed frames
//!
//! [`encode`] turns an envelope into exactly one transportable string and
//! [`decode`] reverses it. With a recipient public key the cleartext wire
//! form is sealed (see [`crate::crypto`]) and framed as
//! `PLX1|<ephemeral public key hex>|<base64 nonce+ciphertext>`; without one
//! the cleartext `PLV1` form travels as-is.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use x25519_dalek::PublicKey;

use crate::crypto::{self, KeyPair};
use crate::envelope::Envelope;
use crate::errors::{CodecError, ParleyError, Result};
use crate::wire::WireFormat;

/// Format tag for sealed envelopes
pub const SEALED_TAG: &str = "PLX1";

// ----------------------------------------------------------------------------
// Encode / Decode
// ----------------------------------------------------------------------------

/// Encode an envelope, sealing it when a recipient key is supplied
pub fn encode(envelope: &Envelope, recipient: Option<&PublicKey>) -> Result<String> {
    let clear = WireFormat::encode(envelope);
    match recipient {
        None => Ok(clear),
        Some(public) => {
            let (ephemeral, blob) = crypto::seal(clear.as_bytes(), public)?;
            Ok(format!(
                "{}|{}|{}",
                SEALED_TAG,
                hex::encode(ephemeral.as_bytes()),
                BASE64.encode(&blob)
            ))
        }
    }
}

/// Decode an envelope, unsealing it with the local key pair when required
pub fn decode(raw: &str, local: Option<&KeyPair>) -> Result<Envelope> {
    let raw = raw.trim_end_matches(['\n', '\r']);
    if !is_sealed(raw) {
        return WireFormat::decode(raw);
    }

    let local = local.ok_or(ParleyError::Codec(CodecError::KeysNotConfigured))?;

    let mut parts = raw.splitn(3, '|');
    let _tag = parts.next();
    let ephemeral_hex = parts
        .next()
        .ok_or_else(|| ParleyError::decoding("sealed frame missing ephemeral key"))?;
    let payload_b64 = parts
        .next()
        .ok_or_else(|| ParleyError::decoding("sealed frame missing payload"))?;

    let ephemeral = crypto::parse_public_key(ephemeral_hex)?;
    let blob = BASE64
        .decode(payload_b64)
        .map_err(|_| ParleyError::decoding("sealed payload is not valid base64"))?;

    let clear = crypto::open(&ephemeral, &blob, local)?;
    let clear = String::from_utf8(clear)
        .map_err(|_| ParleyError::decoding("sealed payload is not valid UTF-8"))?;
    WireFormat::decode(&clear)
}

/// Whether a raw frame is sealed and will need local keys to decode
pub fn is_sealed(raw: &str) -> bool {
    raw.starts_with(SEALED_TAG)
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::props;
    use crate::types::CommandId;

    fn sample() -> Envelope {
        let mut env = Envelope::request(CommandId::Handshake, "media-library", "2.4.1");
        env.session_id = "s1".to_string();
        env.set_property(props::CLIENT_PUBLIC_KEY, "PKc");
        env
    }

    #[test]
    fn test_cleartext_round_trip() {
        let env = sample();
        let raw = encode(&env, None).unwrap();
        assert!(!is_sealed(&raw));
        assert_eq!(decode(&raw, None).unwrap(), env);
    }

    #[test]
    fn test_sealed_round_trip() {
        let recipient = KeyPair::generate();
        let env = sample();

        let raw = encode(&env, Some(recipient.public())).unwrap();
        assert!(is_sealed(&raw));
        assert_eq!(decode(&raw, Some(&recipient)).unwrap(), env);
    }

    #[test]
    fn test_sealed_without_keys_is_distinct_failure() {
        let recipient = KeyPair::generate();
        let raw = encode(&sample(), Some(recipient.public())).unwrap();
        let err = decode(&raw, None).unwrap_err();
        assert!(matches!(
            err,
            ParleyError::Codec(CodecError::KeysNotConfigured)
        ));
    }

    #[test]
    fn test_sealed_with_wrong_keys_fails() {
        let recipient = KeyPair::generate();
        let other = KeyPair::generate();
        let raw = encode(&sample(), Some(recipient.public())).unwrap();
        assert!(decode(&raw, Some(&other)).is_err());
    }

    #[test]
    fn test_trailing_newline_tolerated() {
        let raw = format!("{}\n", encode(&sample(), None).unwrap());
        assert_eq!(decode(&raw, None).unwrap(), sample());
    }
}
