//! Key material and the sealed payload primitive
//!
//! Each side of the protocol holds an X25519 key pair; public keys travel
//! as hex strings in configuration and handshake properties. Encrypted
//! envelopes use a sealed-box construction: an ephemeral X25519 key
//! agreement with the recipient's public key, a SHA-256 KDF over the shared
//! secret and both public keys, and ChaCha20-Poly1305 over the cleartext
//! wire form.

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand_core::{OsRng, RngCore};
use sha2::{Digest, Sha256};
use x25519_dalek::{EphemeralSecret, SharedSecret, StaticSecret};

pub use x25519_dalek::PublicKey;

use crate::errors::{CodecError, ParleyError, Result};

/// X25519 key length in bytes
pub const KEY_LEN: usize = 32;

/// ChaCha20-Poly1305 nonce length in bytes
const NONCE_LEN: usize = 12;

// ----------------------------------------------------------------------------
// Key Pair
// ----------------------------------------------------------------------------

/// A local X25519 key pair
#[derive(Clone)]
pub struct KeyPair {
    secret: StaticSecret,
    public: PublicKey,
}

impl KeyPair {
    /// Generate a fresh key pair from the OS random source
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    /// Rebuild a key pair from a hex-encoded secret key
    pub fn from_secret_hex(secret_hex: &str) -> Result<Self> {
        let bytes = decode_key_bytes(secret_hex)?;
        let secret = StaticSecret::from(bytes);
        let public = PublicKey::from(&secret);
        Ok(Self { secret, public })
    }

    pub fn public(&self) -> &PublicKey {
        &self.public
    }

    /// Hex encoding of the public key, the form carried on the wire
    pub fn public_hex(&self) -> String {
        hex::encode(self.public.as_bytes())
    }

    /// Hex encoding of the secret key, for configuration storage
    pub fn secret_hex(&self) -> String {
        hex::encode(self.secret.to_bytes())
    }

    fn agree(&self, their_public: &PublicKey) -> SharedSecret {
        self.secret.diffie_hellman(their_public)
    }
}

impl core::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        // Secret key material stays out of debug output.
        f.debug_struct("KeyPair")
            .field("public", &self.public_hex())
            .finish_non_exhaustive()
    }
}

/// Parse a hex-encoded X25519 public key
pub fn parse_public_key(public_hex: &str) -> Result<PublicKey> {
    Ok(PublicKey::from(decode_key_bytes(public_hex)?))
}

fn decode_key_bytes(raw: &str) -> Result<[u8; KEY_LEN]> {
    let bytes = hex::decode(raw.trim()).map_err(|_| {
        ParleyError::Codec(CodecError::MalformedKey {
            reason: "key is not valid hex".to_string(),
        })
    })?;
    bytes.try_into().map_err(|_| {
        ParleyError::Codec(CodecError::MalformedKey {
            reason: format!("expected {} key bytes", KEY_LEN),
        })
    })
}

// ----------------------------------------------------------------------------
// Sealed Payloads
// ----------------------------------------------------------------------------

/// Encrypt a payload to a recipient's public key.
///
/// Returns the ephemeral public key the recipient needs for the key
/// agreement and the nonce-prefixed ciphertext.
pub fn seal(plaintext: &[u8], recipient: &PublicKey) -> Result<(PublicKey, Vec<u8>)> {
    let ephemeral = EphemeralSecret::random_from_rng(OsRng);
    let ephemeral_public = PublicKey::from(&ephemeral);
    let shared = ephemeral.diffie_hellman(recipient);
    let key = derive_key(&shared, &ephemeral_public, recipient);

    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);

    let cipher = ChaCha20Poly1305::new(Key::from_slice(&key));
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|_| ParleyError::Codec(CodecError::Encryption))?;

    let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    blob.extend_from_slice(&nonce);
    blob.extend_from_slice(&ciphertext);
    Ok((ephemeral_public, blob))
}

/// Decrypt a payload sealed to our public key
pub fn open(ephemeral_public: &PublicKey, blob: &[u8], local: &KeyPair) -> Result<Vec<u8>> {
    if blob.len() <= NONCE_LEN {
        return Err(ParleyError::Codec(CodecError::Decryption));
    }
    let shared = local.agree(ephemeral_public);
    let key = derive_key(&shared, ephemeral_public, local.public());

    let (nonce, ciphertext) = blob.split_at(NONCE_LEN);
    let cipher = ChaCha20Poly1305::new(Key::from_slice(&key));
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| ParleyError::Codec(CodecError::Decryption))
}

fn derive_key(
    shared: &SharedSecret,
    ephemeral_public: &PublicKey,
    recipient: &PublicKey,
) -> [u8; KEY_LEN] {
    let mut hasher = Sha256::new();
    hasher.update(shared.as_bytes());
    hasher.update(ephemeral_public.as_bytes());
    hasher.update(recipient.as_bytes());
    hasher.finalize().into()
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
