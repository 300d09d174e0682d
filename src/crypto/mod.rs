//! Signature & nonce utilities (C2)
//!
//! Ed25519 signature verification over UTF-8 payloads, plus CSPRNG-backed
//! nonce generation for authentication challenges. The server holds no
//! private key material of its own here — every signature is verified
//! against a client-supplied public key.

use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use rand::RngCore;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid public key encoding")]
    InvalidPublicKey,
    #[error("invalid signature encoding")]
    InvalidSignature,
    #[error("signature verification failed")]
    VerificationFailed,
}

/// Decode a base64 Ed25519 public key and verify `signature` over `message`.
///
/// Never reveals *why* verification failed beyond the three coarse error
/// variants above — callers at the transport edge collapse all of them into
/// a single generic `AuthFailed`.
pub fn verify_signature(
    public_key_b64: &str,
    message: &[u8],
    signature_b64: &str,
) -> Result<(), CryptoError> {
    use base64::Engine as _;

    let key_bytes = base64::engine::general_purpose::STANDARD
        .decode(public_key_b64)
        .map_err(|_| CryptoError::InvalidPublicKey)?;
    let key_bytes: [u8; 32] = key_bytes.try_into().map_err(|_| CryptoError::InvalidPublicKey)?;
    let verifying_key = VerifyingKey::from_bytes(&key_bytes).map_err(|_| CryptoError::InvalidPublicKey)?;

    let sig_bytes = base64::engine::general_purpose::STANDARD
        .decode(signature_b64)
        .map_err(|_| CryptoError::InvalidSignature)?;
    let sig_bytes: [u8; 64] = sig_bytes.try_into().map_err(|_| CryptoError::InvalidSignature)?;
    let signature = Signature::from_bytes(&sig_bytes);

    verifying_key
        .verify(message, &signature)
        .map_err(|_| CryptoError::VerificationFailed)
}

/// Generate a 32-byte CSPRNG nonce, hex-encoded to 64 characters.
#[must_use]
pub fn generate_nonce_hex() -> String {
    let mut bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Validate that `signature_b64` base64-decodes to exactly 64 bytes (an
/// Ed25519 signature), without performing cryptographic verification.
#[must_use]
pub fn is_well_formed_signature(signature_b64: &str) -> bool {
    use base64::Engine as _;
    base64::engine::general_purpose::STANDARD
        .decode(signature_b64)
        .map(|bytes| bytes.len() == 64)
        .unwrap_or(false)
}

/// Validate that `public_key_b64` base64-decodes to exactly 32 bytes (an
/// Ed25519 public key length).
#[must_use]
pub fn is_well_formed_public_key(public_key_b64: &str) -> bool {
    use base64::Engine as _;
    base64::engine::general_purpose::STANDARD
        .decode(public_key_b64)
        .map(|bytes| bytes.len() == 32)
        .unwrap_or(false)
}
